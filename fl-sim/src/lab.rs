// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A controller running on its own thread against a simulated network,
//! with a real clock driving its timers.

use crate::{host_mac, Network, COMPONENT_SIM};
use anyhow::{anyhow, Result};
use fl::clock::Clock;
use fl::config::Config;
use fl::packet::{build_frame, EtherType};
use fl::session::TraceReport;
use fl::types::{MacAddr, Path};
use fl::{AdminEvent, Controller, Event};
use slog::{error, info, Logger};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::{sleep, spawn, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long to wait for the controller to answer an admin request.
const ADMIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Lab {
    pub net: Network,
    tx: Sender<Event>,
    reports: Receiver<TraceReport>,
    controller: Option<JoinHandle<()>>,
    log: Logger,
}

impl Lab {
    /// Start a controller in front of `n` switches in a line. See
    /// [`Network::linear`] for the wiring.
    pub fn linear(n: u64, config: Config, log: Logger) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = channel();
        let net = Network::linear(n, tx.clone(), log.clone());
        let clock =
            Clock::new(config.clock_resolution(), tx.clone(), log.clone());
        let mut ctl =
            Controller::new(net.clone(), clock, config, log.clone());
        let reports = ctl.watch_reports();
        net.announce();
        let controller = Some(spawn(move || ctl.run(rx)));
        Ok(Self {
            net,
            tx,
            reports,
            controller,
            log,
        })
    }

    /// Get the controller to learn both hosts and install rules between
    /// them: `src` broadcasts, then `dst` answers with a unicast frame.
    pub fn establish(
        &self,
        src: u64,
        dst: u64,
        timeout: Duration,
    ) -> Result<()> {
        let src_mac = mac(src)?;
        let dst_mac = mac(dst)?;

        let seen = self.net.delivered(dst_mac).len();
        self.net.host_send(src_mac, arp(src_mac, MacAddr::BROADCAST))?;
        if !wait_until(timeout, || self.net.delivered(dst_mac).len() > seen) {
            return Err(anyhow!(
                "broadcast from {src_mac} never reached {dst_mac}"
            ));
        }

        let seen = self.net.delivered(src_mac).len();
        self.net.host_send(dst_mac, arp(dst_mac, src_mac))?;
        if !wait_until(timeout, || self.net.delivered(src_mac).len() > seen) {
            return Err(anyhow!("reply from {dst_mac} never reached {src_mac}"));
        }
        info!(self.log, "hosts established";
            "component" => COMPONENT_SIM,
            "src" => format!("{src_mac}"),
            "dst" => format!("{dst_mac}")
        );
        Ok(())
    }

    /// Ask the controller to trace from host `src` to host `dst`. Returns
    /// the path the trace runs over.
    pub fn trace(&self, src: &str, dst: &str) -> Result<Path> {
        let (reply, rx) = channel();
        self.send(Event::Admin(AdminEvent::Trace {
            src: src.to_string(),
            dst: dst.to_string(),
            reply: Some(reply),
        }))?;
        Ok(rx.recv_timeout(ADMIN_TIMEOUT)??)
    }

    pub fn cancel(&self) -> Result<()> {
        let (reply, rx) = channel();
        self.send(Event::Admin(AdminEvent::Cancel { reply: Some(reply) }))?;
        Ok(rx.recv_timeout(ADMIN_TIMEOUT)??)
    }

    fn send(&self, event: Event) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow!("controller is not running"))
    }

    /// The next finished trace report, if one shows up within `timeout`.
    pub fn next_report(&self, timeout: Duration) -> Option<TraceReport> {
        self.reports.recv_timeout(timeout).ok()
    }

    /// Stop the controller and wait for its thread to finish.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.controller.take() else {
            return;
        };
        let _ = self.tx.send(Event::Shutdown);
        if handle.join().is_err() {
            error!(self.log, "controller thread panicked";
                "component" => COMPONENT_SIM
            );
        }
    }
}

impl Drop for Lab {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn mac(host: u64) -> Result<MacAddr> {
    host_mac(host).ok_or_else(|| anyhow!("host {host} has no address"))
}

fn arp(src: MacAddr, dst: MacAddr) -> Vec<u8> {
    build_frame(dst, src, EtherType::Arp as u16, &[0u8; 28])
}

fn wait_until<F: Fn() -> bool>(timeout: Duration, f: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if f() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL);
    }
}
