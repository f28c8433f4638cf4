// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

/// Default prefix for human readable host identifiers.
pub const HOST_PREFIX: &str = "h";

/// Largest value representable by a 48-bit hardware address.
const MAC_MAX: u64 = (1 << 48) - 1;

/// A switch (datapath) identifier.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct Dpid(pub u64);

impl Display for Dpid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl From<u64> for Dpid {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

pub type PortNo = u32;

/// A 48-bit hardware address.
#[derive(
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    /// Build an address from the low 48 bits of `value`. Returns `None` if
    /// `value` does not fit.
    pub fn from_u64(value: u64) -> Option<Self> {
        if value > MAC_MAX {
            return None;
        }
        let b = value.to_be_bytes();
        Some(Self([b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    pub fn to_u64(&self) -> u64 {
        let mut b = [0u8; 8];
        b[2..].copy_from_slice(&self.0);
        u64::from_be_bytes(b)
    }

    /// Addresses whose first octet is non-zero. The controller only learns
    /// from frames where at least one of source or destination falls outside
    /// this class.
    pub fn is_reserved_class(&self) -> bool {
        self.0[0] != 0
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl Debug for MacAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    /// Parse `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Error::Parse(format!("invalid mac address: {s}"));
        let sep = if s.contains('-') { '-' } else { ':' };
        let mut octets = [0u8; 6];
        let mut parts = s.split(sep);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(bad)?;
            if part.len() != 2 {
                return Err(bad());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| bad())?;
        }
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self(octets))
    }
}

/// Convert a hardware address to its host identifier: `prefix` followed by
/// the decimal value of the address.
pub fn address_to_host_id(addr: MacAddr, prefix: &str) -> String {
    format!("{prefix}{}", addr.to_u64())
}

/// Inverse of [`address_to_host_id`].
pub fn host_id_to_address(id: &str, prefix: &str) -> Result<MacAddr, Error> {
    let bad = || Error::InvalidHostId(id.to_string());
    let digits = id.strip_prefix(prefix).ok_or_else(bad)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    // Only the canonical spelling maps back, so "h01" is not "h1".
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(bad());
    }
    let value: u64 = digits.parse().map_err(|_| bad())?;
    MacAddr::from_u64(value).ok_or_else(bad)
}

/// A directed inter-switch link: `src`'s port `src_port` connects to `dst`.
/// A bidirectional cable shows up as two links.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct Link {
    pub src: Dpid,
    pub dst: Dpid,
    pub src_port: PortNo,
}

impl Link {
    pub fn new(src: Dpid, dst: Dpid, src_port: PortNo) -> Self {
        Self { src, dst, src_port }
    }
}

impl Display for Link {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} -> {}", self.src, self.src_port, self.dst)
    }
}

/// An installed exact-match rule: frames for `dst` arriving on `in_port`
/// leave through `out_port`.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct ForwardingEntry {
    pub in_port: PortNo,
    pub dst: MacAddr,
    pub out_port: PortNo,
}

impl ForwardingEntry {
    pub fn new(in_port: PortNo, dst: MacAddr, out_port: PortNo) -> Self {
        Self {
            in_port,
            dst,
            out_port,
        }
    }
}

/// One switch along a resolved path.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct Hop {
    pub switch: Dpid,
    /// Port the flow enters this switch on.
    pub ingress: PortNo,
    /// Port the installed entry for the flow sends it out of.
    pub egress: PortNo,
}

/// The sequence of switches a flow from `src` to `dst` traverses, from the
/// source's access switch to the destination's access switch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Path {
    pub src: MacAddr,
    pub dst: MacAddr,
    pub hops: Vec<Hop>,
}

impl Path {
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn switches(&self) -> Vec<Dpid> {
        self.hops.iter().map(|h| h.switch).collect()
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", DpidList(&self.switches()))
    }
}

/// A link that fault localization determined to be down.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct FailedLink {
    pub from: Dpid,
    pub to: Dpid,
}

impl Display for FailedLink {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Formats a run of switches as `[s1, s2, s3]`.
pub struct DpidList<'a>(pub &'a [Dpid]);

impl Display for DpidList<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mac_parse_and_display() {
        let a: MacAddr = "00:00:00:00:00:0a".parse().unwrap();
        assert_eq!(a, MacAddr([0, 0, 0, 0, 0, 10]));
        assert_eq!(a.to_string(), "00:00:00:00:00:0a");

        let b: MacAddr = "0A-1b-00-00-00-01".parse().unwrap();
        assert_eq!(b, MacAddr([0x0a, 0x1b, 0, 0, 0, 1]));

        assert!("00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("00:00:00:00:00:00:00".parse::<MacAddr>().is_err());
        assert!("00:00:00:00:00:zz".parse::<MacAddr>().is_err());
        assert!("0:00:00:00:00:00".parse::<MacAddr>().is_err());
    }

    #[test]
    fn host_id_round_trip() {
        let samples = [
            0u64,
            1,
            2,
            255,
            256,
            0x0000_0000_ffff,
            0x0123_4567_89ab,
            0x7fff_ffff_ffff,
            MAC_MAX,
        ];
        for value in samples {
            let a = MacAddr::from_u64(value).unwrap();
            let id = address_to_host_id(a, HOST_PREFIX);
            assert_eq!(id, format!("h{value}"));
            assert_eq!(host_id_to_address(&id, HOST_PREFIX).unwrap(), a);
        }

        // Sweep a spread of addresses across the whole 48 bit space.
        let mut value: u64 = 1;
        while value <= MAC_MAX {
            let a = MacAddr::from_u64(value).unwrap();
            let back =
                host_id_to_address(&address_to_host_id(a, "host"), "host")
                    .unwrap();
            assert_eq!(back, a);
            value = value * 3 + 7;
        }
    }

    #[test]
    fn host_id_matches_address_text() {
        let a: MacAddr = "00:00:00:00:01:00".parse().unwrap();
        assert_eq!(address_to_host_id(a, HOST_PREFIX), "h256");
        assert_eq!(
            host_id_to_address("h3", HOST_PREFIX).unwrap().to_string(),
            "00:00:00:00:00:03"
        );
    }

    #[test]
    fn invalid_host_ids() {
        for id in [
            "",
            "h",
            "x1",
            "h-1",
            "h+1",
            "h1a",
            "h01",
            "h00",
            "h281474976710656",
        ] {
            assert!(
                matches!(
                    host_id_to_address(id, HOST_PREFIX),
                    Err(Error::InvalidHostId(_))
                ),
                "{id} should be rejected"
            );
        }
    }

    #[test]
    fn reserved_class() {
        assert!(MacAddr::BROADCAST.is_reserved_class());
        assert!("33:33:00:00:00:16"
            .parse::<MacAddr>()
            .unwrap()
            .is_reserved_class());
        assert!(!"00:00:00:00:00:01"
            .parse::<MacAddr>()
            .unwrap()
            .is_reserved_class());
    }

    #[test]
    fn path_display() {
        let p = Path {
            src: MacAddr::from_u64(1).unwrap(),
            dst: MacAddr::from_u64(2).unwrap(),
            hops: vec![
                Hop {
                    switch: Dpid(1),
                    ingress: 1,
                    egress: 2,
                },
                Hop {
                    switch: Dpid(2),
                    ingress: 3,
                    egress: 1,
                },
            ],
        };
        assert_eq!(p.to_string(), "[s1, s2]");
        assert_eq!(p.switches(), vec![Dpid(1), Dpid(2)]);
    }
}
