// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use crate::types::HOST_PREFIX;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// IPv4 source address that marks a frame as a liveness probe.
pub const DEFAULT_PROBE_SENTINEL: Ipv4Addr = Ipv4Addr::new(10, 7, 10, 7);

/// Controller tunables. Every field has a default, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// How long to wait for a probe to reach its tap.
    pub probe_timeout_ms: u64,

    /// How long to wait after installing a tap before sending the probe.
    pub probe_send_delay_ms: u64,

    /// Tick interval of the clock thread.
    pub clock_resolution_ms: u64,

    /// Priority of temporary tap rules. Must be above
    /// `forwarding_priority` so taps shadow the rule they copy.
    pub tap_priority: u16,

    /// Priority of learned forwarding rules.
    pub forwarding_priority: u16,

    /// IPv4 source address carried by probes.
    pub probe_sentinel: Ipv4Addr,

    /// Prefix of human readable host identifiers.
    pub host_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 1000,
            probe_send_delay_ms: 1000,
            clock_resolution_ms: 10,
            tap_priority: 2,
            forwarding_priority: 1,
            probe_sentinel: DEFAULT_PROBE_SENTINEL,
            host_prefix: HOST_PREFIX.to_string(),
        }
    }
}

impl Config {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn probe_send_delay(&self) -> Duration {
        Duration::from_millis(self.probe_send_delay_ms)
    }

    pub fn clock_resolution(&self) -> Duration {
        Duration::from_millis(self.clock_resolution_ms)
    }

    /// Load a JSON config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.tap_priority <= self.forwarding_priority {
            return Err(Error::Config(format!(
                "tap priority {} must be above forwarding priority {}",
                self.tap_priority, self.forwarding_priority,
            )));
        }
        if self.clock_resolution_ms == 0 {
            return Err(Error::Config(
                "clock resolution must be non-zero".into(),
            ));
        }
        if self.host_prefix.ends_with(|c: char| c.is_ascii_digit()) {
            return Err(Error::Config(format!(
                "host prefix {:?} may not end in a digit",
                self.host_prefix
            )));
        }
        Ok(())
    }
}
