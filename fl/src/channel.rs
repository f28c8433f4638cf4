// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The seam between the controller core and whatever speaks the switch
//! control protocol. Message encoding, feature negotiation, topology
//! discovery and the per-switch table-miss rule all live on the other side
//! of [`SwitchChannel`].

use crate::error::Error;
use crate::types::{Dpid, ForwardingEntry, Link, MacAddr, PortNo};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Identifies a frame held in a switch buffer awaiting a controller
/// decision.
pub type BufferId = u32;

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum Action {
    /// Send out a specific port.
    Output(PortNo),
    /// Send out every port except the one the frame arrived on.
    Flood,
    /// Send a copy to the controller as a packet-in.
    ToController,
}

/// Where an injected frame is considered to have come from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InPort {
    Port(PortNo),
    Controller,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A frame already sitting in a switch buffer.
    Buffered(BufferId),
    /// Raw frame bytes.
    Data(Vec<u8>),
}

/// Match predicate for a rule. Unset fields are wildcards.
#[derive(
    Debug,
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub struct FlowMatch {
    pub in_port: Option<PortNo>,
    pub eth_dst: Option<MacAddr>,
}

impl FlowMatch {
    pub fn exact(in_port: PortNo, eth_dst: MacAddr) -> Self {
        Self {
            in_port: Some(in_port),
            eth_dst: Some(eth_dst),
        }
    }

    pub fn matches(&self, in_port: PortNo, eth_dst: MacAddr) -> bool {
        self.in_port.map_or(true, |p| p == in_port)
            && self.eth_dst.map_or(true, |d| d == eth_dst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FlowRule {
    pub priority: u16,
    pub matcher: FlowMatch,
    pub actions: Vec<Action>,
}

impl FlowRule {
    /// An ordinary exact-match forwarding rule.
    pub fn forwarding(
        priority: u16,
        in_port: PortNo,
        dst: MacAddr,
        out_port: PortNo,
    ) -> Self {
        Self {
            priority,
            matcher: FlowMatch::exact(in_port, dst),
            actions: vec![Action::Output(out_port)],
        }
    }

    /// A tap: mirror matching frames to the controller and keep forwarding
    /// them out `out_port`.
    pub fn tap(
        priority: u16,
        in_port: PortNo,
        dst: MacAddr,
        out_port: PortNo,
    ) -> Self {
        Self {
            priority,
            matcher: FlowMatch::exact(in_port, dst),
            actions: vec![Action::ToController, Action::Output(out_port)],
        }
    }

    /// The forwarding entry this rule represents, if it is an exact match
    /// rule whose first action is an output to a port.
    pub fn forwarding_entry(&self) -> Option<ForwardingEntry> {
        let in_port = self.matcher.in_port?;
        let dst = self.matcher.eth_dst?;
        match self.actions.first()? {
            Action::Output(out) => {
                Some(ForwardingEntry::new(in_port, dst, *out))
            }
            _ => None,
        }
    }
}

/// A frame delivered to the controller by a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub dpid: Dpid,
    pub in_port: PortNo,
    /// Set when the switch kept the full frame in a buffer.
    pub buffer_id: Option<BufferId>,
    /// Length of the frame on the wire. May exceed `data.len()` when the
    /// switch truncated what it sent up.
    pub total_len: usize,
    pub data: Vec<u8>,
}

impl PacketIn {
    pub fn new(dpid: Dpid, in_port: PortNo, data: Vec<u8>) -> Self {
        Self {
            dpid,
            in_port,
            buffer_id: None,
            total_len: data.len(),
            data,
        }
    }

    pub fn truncated(&self) -> bool {
        self.data.len() < self.total_len
    }
}

/// Operations the controller needs from the switch control channel.
///
/// Failures are not retried by the controller; they surface as
/// [`Error::Channel`] and are left to the surrounding framework.
pub trait SwitchChannel {
    /// Install `rule` on switch `dpid`. When `buffer` is set the switch
    /// applies the new rule to the buffered frame.
    fn install_rule(
        &self,
        dpid: Dpid,
        rule: FlowRule,
        buffer: Option<BufferId>,
    ) -> Result<(), Error>;

    /// Strictly delete the rule with exactly this match and priority.
    fn remove_rule(
        &self,
        dpid: Dpid,
        matcher: FlowMatch,
        priority: u16,
    ) -> Result<(), Error>;

    /// Have switch `dpid` process `payload` with `actions` as if it had just
    /// arrived from `in_port`.
    fn packet_out(
        &self,
        dpid: Dpid,
        in_port: InPort,
        actions: Vec<Action>,
        payload: Payload,
    ) -> Result<(), Error>;

    /// Switches currently known to the topology service.
    fn current_switches(&self) -> BTreeSet<Dpid>;

    /// Links currently known to the topology service.
    fn current_links(&self) -> BTreeSet<Link>;
}

impl<T: SwitchChannel + ?Sized> SwitchChannel for Arc<T> {
    fn install_rule(
        &self,
        dpid: Dpid,
        rule: FlowRule,
        buffer: Option<BufferId>,
    ) -> Result<(), Error> {
        (**self).install_rule(dpid, rule, buffer)
    }

    fn remove_rule(
        &self,
        dpid: Dpid,
        matcher: FlowMatch,
        priority: u16,
    ) -> Result<(), Error> {
        (**self).remove_rule(dpid, matcher, priority)
    }

    fn packet_out(
        &self,
        dpid: Dpid,
        in_port: InPort,
        actions: Vec<Action>,
        payload: Payload,
    ) -> Result<(), Error> {
        (**self).packet_out(dpid, in_port, actions, payload)
    }

    fn current_switches(&self) -> BTreeSet<Dpid> {
        (**self).current_switches()
    }

    fn current_links(&self) -> BTreeSet<Link> {
        (**self).current_links()
    }
}
