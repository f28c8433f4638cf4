// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The slice of frame handling the controller needs: enough Ethernet to
//! learn and forward, enough IPv4 to recognize and build probes.

use crate::error::Error;
use crate::types::MacAddr;
use num_enum::TryFromPrimitive;
use std::net::Ipv4Addr;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;

/// IP protocol number carried by probes (RFC 3692 experimentation).
const PROBE_IP_PROTOCOL: u8 = 253;
const PROBE_TTL: u8 = 255;

#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum EtherType {
    Ipv4 = 0x0800,
    Arp = 0x0806,
    Lldp = 0x88cc,
}

/// An Ethernet II frame.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                     Destination Address                       |
/// +                               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                               |                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
/// |                        Source Address                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           EtherType           |          Payload ...          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame<'a> {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
    pub payload: &'a [u8],
}

impl<'a> EthernetFrame<'a> {
    pub fn from_bytes(d: &'a [u8]) -> Result<Self, Error> {
        if d.len() < ETHERNET_HEADER_LEN {
            return Err(Error::Parse(format!(
                "ethernet frame too small: {} bytes",
                d.len()
            )));
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&d[0..6]);
        src.copy_from_slice(&d[6..12]);
        Ok(Self {
            dst: MacAddr(dst),
            src: MacAddr(src),
            ethertype: u16::from_be_bytes([d[12], d[13]]),
            payload: &d[ETHERNET_HEADER_LEN..],
        })
    }

    /// The well known ethertype of this frame, if it is one we care about.
    pub fn kind(&self) -> Option<EtherType> {
        EtherType::try_from(self.ethertype).ok()
    }

    /// The IPv4 source address of the encapsulated packet, if this frame
    /// carries an IPv4 header.
    pub fn ipv4_source(&self) -> Option<Ipv4Addr> {
        if self.kind() != Some(EtherType::Ipv4) {
            return None;
        }
        let p = self.payload;
        if p.len() < IPV4_HEADER_LEN || p[0] >> 4 != 4 {
            return None;
        }
        Some(Ipv4Addr::new(p[12], p[13], p[14], p[15]))
    }
}

/// Serialize an Ethernet II frame.
pub fn build_frame(
    dst: MacAddr,
    src: MacAddr,
    ethertype: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut v = Vec::with_capacity(ETHERNET_HEADER_LEN + payload.len());
    v.extend_from_slice(&dst.0);
    v.extend_from_slice(&src.0);
    v.extend_from_slice(&ethertype.to_be_bytes());
    v.extend_from_slice(payload);
    v
}

/// A bare IPv4 header. Probes carry nothing past the header.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version|  IHL  |Type of Service|          Total Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Identification        |Flags|      Fragment Offset    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Time to Live |    Protocol   |         Header Checksum       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Source Address                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Destination Address                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
fn ipv4_header(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8) -> [u8; 20] {
    let mut h = [0u8; IPV4_HEADER_LEN];
    h[0] = (4 << 4) | 5;
    h[2..4].copy_from_slice(&(IPV4_HEADER_LEN as u16).to_be_bytes());
    h[8] = PROBE_TTL;
    h[9] = protocol;
    h[12..16].copy_from_slice(&src.octets());
    h[16..20].copy_from_slice(&dst.octets());
    let csum = ipv4_checksum(&h);
    h[10..12].copy_from_slice(&csum);
    h
}

/// RFC 791 header checksum. The checksum field must be zero, or hold the
/// checksum already, in which case the result is zero for a valid header.
pub fn ipv4_checksum(header: &[u8]) -> [u8; 2] {
    let mut ck = internet_checksum::Checksum::new();
    ck.add_bytes(header);
    ck.checksum()
}

/// Build a liveness probe addressed from `src` to `dst`. The IPv4 source
/// is the reserved `sentinel` which marks the frame as a probe wherever it
/// shows up.
pub fn probe_frame(src: MacAddr, dst: MacAddr, sentinel: Ipv4Addr) -> Vec<u8> {
    let ip = ipv4_header(sentinel, Ipv4Addr::UNSPECIFIED, PROBE_IP_PROTOCOL);
    build_frame(dst, src, EtherType::Ipv4 as u16, &ip)
}

/// Returns true if `frame` carries the probe sentinel as its IPv4 source.
pub fn is_probe(frame: &EthernetFrame<'_>, sentinel: Ipv4Addr) -> bool {
    frame.ipv4_source() == Some(sentinel)
}
