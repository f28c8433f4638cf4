// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared test fixtures: a switch channel that records what the controller
//! asks of it, an alarm that only fires when told to, and the three switch
//! line most tests run on.
//!
//! ```text
//!   h1 --p1-[s1]-p2------p1-[s2]-p2------p1-[s3]-p2-- h2
//! ```

use crate::channel::{
    Action, BufferId, FlowMatch, FlowRule, InPort, Payload, SwitchChannel,
};
use crate::clock::{Alarm, TimerEvent, TimerKind};
use crate::error::Error;
use crate::packet::{build_frame, EtherType};
use crate::types::{Dpid, Hop, Link, MacAddr, Path};
use fl_common::lock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const H1: u64 = 1;
pub const H2: u64 = 2;

pub fn mac(v: u64) -> MacAddr {
    MacAddr::from_u64(v).unwrap()
}

/// An ARP-typed frame. The body is never looked at.
pub fn arp(src: MacAddr, dst: MacAddr) -> Vec<u8> {
    build_frame(dst, src, EtherType::Arp as u16, &[0u8; 28])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOp {
    Install {
        dpid: Dpid,
        rule: FlowRule,
        buffer: Option<BufferId>,
    },
    Remove {
        dpid: Dpid,
        matcher: FlowMatch,
        priority: u16,
    },
    PacketOut {
        dpid: Dpid,
        in_port: InPort,
        actions: Vec<Action>,
        payload: Payload,
    },
}

#[derive(Default)]
pub struct RecordingChannel {
    ops: Mutex<Vec<ChannelOp>>,
    switches: Mutex<BTreeSet<Dpid>>,
    links: Mutex<BTreeSet<Link>>,
    failing: AtomicBool,
}

impl RecordingChannel {
    pub fn ops(&self) -> Vec<ChannelOp> {
        lock!(self.ops).clone()
    }

    pub fn clear(&self) {
        lock!(self.ops).clear();
    }

    /// Make every programming call fail until turned back off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn add_switch(&self, dpid: Dpid) {
        lock!(self.switches).insert(dpid);
    }

    /// Add both directions of a cable between `a`'s port `pa` and `b`'s
    /// port `pb`.
    pub fn add_cable(&self, a: Dpid, pa: u32, b: Dpid, pb: u32) {
        let mut links = lock!(self.links);
        links.insert(Link::new(a, b, pa));
        links.insert(Link::new(b, a, pb));
    }

    fn record(&self, op: ChannelOp) -> Result<(), Error> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::Channel("injected failure".into()));
        }
        lock!(self.ops).push(op);
        Ok(())
    }
}

impl SwitchChannel for RecordingChannel {
    fn install_rule(
        &self,
        dpid: Dpid,
        rule: FlowRule,
        buffer: Option<BufferId>,
    ) -> Result<(), Error> {
        self.record(ChannelOp::Install { dpid, rule, buffer })
    }

    fn remove_rule(
        &self,
        dpid: Dpid,
        matcher: FlowMatch,
        priority: u16,
    ) -> Result<(), Error> {
        self.record(ChannelOp::Remove {
            dpid,
            matcher,
            priority,
        })
    }

    fn packet_out(
        &self,
        dpid: Dpid,
        in_port: InPort,
        actions: Vec<Action>,
        payload: Payload,
    ) -> Result<(), Error> {
        self.record(ChannelOp::PacketOut {
            dpid,
            in_port,
            actions,
            payload,
        })
    }

    fn current_switches(&self) -> BTreeSet<Dpid> {
        lock!(self.switches).clone()
    }

    fn current_links(&self) -> BTreeSet<Link> {
        lock!(self.links).clone()
    }
}

/// s1, s2 and s3 in a line. Hosts hang off port 1 of s1 and port 2 of s3.
pub fn linear_channel() -> RecordingChannel {
    let ch = RecordingChannel::default();
    for d in 1..=3 {
        ch.add_switch(Dpid(d));
    }
    ch.add_cable(Dpid(1), 2, Dpid(2), 1);
    ch.add_cable(Dpid(2), 2, Dpid(3), 1);
    ch
}

/// A path from h1 to h2 over switches `1..=n`, entering each on port 1 and
/// leaving on port 2.
pub fn chain_path(n: u64) -> Path {
    Path {
        src: mac(H1),
        dst: mac(H2),
        hops: (1..=n)
            .map(|d| Hop {
                switch: Dpid(d),
                ingress: 1,
                egress: 2,
            })
            .collect(),
    }
}

/// An alarm that remembers what is armed and fires only when a test takes
/// the expiration.
#[derive(Default)]
pub struct ManualAlarm {
    armed: Mutex<BTreeMap<TimerKind, (u64, Duration)>>,
}

impl ManualAlarm {
    /// Remove an armed timer and return the event it would have fired.
    pub fn take(&self, kind: TimerKind) -> Option<TimerEvent> {
        lock!(self.armed)
            .remove(&kind)
            .map(|(round, _)| TimerEvent { kind, round })
    }

    pub fn armed(&self, kind: TimerKind) -> bool {
        lock!(self.armed).contains_key(&kind)
    }

    pub fn delay(&self, kind: TimerKind) -> Option<Duration> {
        lock!(self.armed).get(&kind).map(|(_, d)| *d)
    }

    pub fn is_empty(&self) -> bool {
        lock!(self.armed).is_empty()
    }
}

impl Alarm for ManualAlarm {
    fn arm(&self, kind: TimerKind, round: u64, after: Duration) {
        lock!(self.armed).insert(kind, (round, after));
    }

    fn disarm(&self, kind: TimerKind) {
        lock!(self.armed).remove(&kind);
    }
}
