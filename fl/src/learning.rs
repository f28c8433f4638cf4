// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MAC learning and forwarding.
//!
//! Every frame punted to the controller teaches it which port the source
//! address lives behind on that switch. Once the destination is known too,
//! rules for both directions are installed along the whole learned path so
//! later traffic stays in the dataplane.

use crate::channel::{
    Action, BufferId, FlowRule, InPort, PacketIn, Payload, SwitchChannel,
};
use crate::config::Config;
use crate::error::Error;
use crate::fwd::ForwardingState;
use crate::log::learning_log;
use crate::packet::{is_probe, EtherType, EthernetFrame};
use crate::topology::Topology;
use crate::types::{Dpid, ForwardingEntry, MacAddr, PortNo};
use slog::Logger;
use std::collections::{BTreeMap, BTreeSet};

const UNIT_LEARNING: &str = "mac_learning";

/// What happened to a frame handed to [`Learning::process`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A probe seen by a tap on `dpid` at `in_port`.
    ProbeResponse { dpid: Dpid, in_port: PortNo },
    /// A copy of traffic already covered by an installed rule.
    Consumed,
    Dropped(DropReason),
    /// Destination unknown, sent out every port.
    Flooded,
    /// Destination known, rules installed and the frame sent on.
    Forwarded { out_port: PortNo },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DropReason {
    Lldp,
    /// Neither address is an ordinary unicast host address.
    ReservedAddress,
    Malformed,
    /// Carries the probe sentinel but matches no installed rule.
    StrayProbe,
}

/// Everything frame processing touches besides the address tables.
pub struct LearningContext<'a, C> {
    pub channel: &'a C,
    pub topology: &'a Topology,
    pub fwd: &'a mut ForwardingState,
    pub config: &'a Config,
}

impl<C: SwitchChannel> LearningContext<'_, C> {
    /// Install a forwarding rule and record the entry it carries.
    fn install(
        &mut self,
        dpid: Dpid,
        entry: ForwardingEntry,
        buffer: Option<BufferId>,
    ) -> Result<(), Error> {
        let rule = FlowRule::forwarding(
            self.config.forwarding_priority,
            entry.in_port,
            entry.dst,
            entry.out_port,
        );
        let recorded = rule.forwarding_entry();
        self.channel.install_rule(dpid, rule, buffer)?;
        if let Some(e) = recorded {
            self.fwd.record(dpid, e);
        }
        Ok(())
    }
}

/// Per switch address location tables.
pub struct Learning {
    tables: BTreeMap<Dpid, BTreeMap<MacAddr, PortNo>>,
    log: Logger,
}

impl Learning {
    pub fn new(log: Logger) -> Self {
        Self {
            tables: BTreeMap::new(),
            log,
        }
    }

    /// The port `addr` was last seen on at `dpid`.
    pub fn port_of(&self, dpid: Dpid, addr: MacAddr) -> Option<PortNo> {
        self.tables.get(&dpid)?.get(&addr).copied()
    }

    /// Every `(switch, port)` `addr` has been learned at, lowest switch
    /// first.
    pub fn locations(
        &self,
        addr: MacAddr,
    ) -> impl Iterator<Item = (Dpid, PortNo)> + '_ {
        self.tables
            .iter()
            .filter_map(move |(d, t)| t.get(&addr).map(|p| (*d, *p)))
    }

    pub fn table(&self, dpid: Dpid) -> Option<&BTreeMap<MacAddr, PortNo>> {
        self.tables.get(&dpid)
    }

    pub fn reset(&mut self) {
        self.tables.clear();
    }

    /// Learn from and forward a punted frame.
    pub fn process<C: SwitchChannel>(
        &mut self,
        pkt: &PacketIn,
        ctx: &mut LearningContext<'_, C>,
    ) -> Result<Disposition, Error> {
        let dpid = pkt.dpid;
        let frame = match EthernetFrame::from_bytes(&pkt.data) {
            Ok(f) => f,
            Err(e) => {
                learning_log!(self, warn, dpid, "dropping frame: {}", e;
                    "in_port" => pkt.in_port
                );
                return Ok(Disposition::Dropped(DropReason::Malformed));
            }
        };
        let probe = is_probe(&frame, ctx.config.probe_sentinel);

        // Anything matching an installed rule only reaches the controller
        // through a tap.
        if ctx.fwd.matches(dpid, pkt.in_port, frame.dst) {
            if probe {
                return Ok(Disposition::ProbeResponse {
                    dpid,
                    in_port: pkt.in_port,
                });
            }
            return Ok(Disposition::Consumed);
        }
        if probe {
            learning_log!(self, debug, dpid, "stray probe";
                "in_port" => pkt.in_port,
                "dst" => format!("{}", frame.dst)
            );
            return Ok(Disposition::Dropped(DropReason::StrayProbe));
        }

        if pkt.truncated() {
            learning_log!(self, debug, dpid,
                "packet truncated: only {} of {} bytes",
                pkt.data.len(),
                pkt.total_len
            );
        }

        if frame.kind() == Some(EtherType::Lldp) {
            return Ok(Disposition::Dropped(DropReason::Lldp));
        }

        let (src, dst) = (frame.src, frame.dst);
        if src.is_reserved_class() && dst.is_reserved_class() {
            return Ok(Disposition::Dropped(DropReason::ReservedAddress));
        }

        self.tables
            .entry(dpid)
            .or_default()
            .insert(src, pkt.in_port);

        let Some(out_port) = self.port_of(dpid, dst) else {
            learning_log!(self, trace, dpid, "flood";
                "src" => format!("{src}"),
                "dst" => format!("{dst}"),
                "in_port" => pkt.in_port
            );
            ctx.channel.packet_out(
                dpid,
                InPort::Port(pkt.in_port),
                vec![Action::Flood],
                payload(pkt),
            )?;
            return Ok(Disposition::Flooded);
        };

        self.install_path_entries(ctx, dpid, src, dst)?;

        let entry = ForwardingEntry::new(pkt.in_port, dst, out_port);
        ctx.install(dpid, entry, pkt.buffer_id)?;
        // A buffered frame is released by the rule install itself.
        if pkt.buffer_id.is_none() {
            ctx.channel.packet_out(
                dpid,
                InPort::Port(pkt.in_port),
                vec![Action::Output(out_port)],
                Payload::Data(pkt.data.clone()),
            )?;
        }
        learning_log!(self, debug, dpid, "forward";
            "src" => format!("{src}"),
            "dst" => format!("{dst}"),
            "in_port" => pkt.in_port,
            "out_port" => out_port
        );
        Ok(Disposition::Forwarded { out_port })
    }

    /// Install rules for both directions of `src <-> dst` starting at `dpid`
    /// and walking toward `dst` along learned ports, as far as the learned
    /// state and known links reach.
    pub fn install_path_entries<C: SwitchChannel>(
        &self,
        ctx: &mut LearningContext<'_, C>,
        dpid: Dpid,
        src: MacAddr,
        dst: MacAddr,
    ) -> Result<(), Error> {
        let (Some(to_dst), Some(to_src)) =
            (self.port_of(dpid, dst), self.port_of(dpid, src))
        else {
            return Ok(());
        };
        ctx.install(dpid, ForwardingEntry::new(to_dst, src, to_src), None)?;

        let mut visited = BTreeSet::from([dpid]);
        let mut current = dpid;
        let mut next_port = to_dst;
        while let Some(link) = ctx.topology.link_from(current, next_port) {
            let prev = current;
            current = link.dst;
            if !visited.insert(current) {
                learning_log!(self, warn, current, "loop in learned path";
                    "src" => format!("{src}"),
                    "dst" => format!("{dst}")
                );
                break;
            }
            let Some(in_port) = self.port_of(current, dst) else {
                break;
            };
            let Some(back) = ctx.topology.port_toward(current, prev) else {
                break;
            };
            let src_bound = ForwardingEntry::new(in_port, src, back);
            ctx.install(current, src_bound, None)?;
            let dst_bound = ForwardingEntry::new(back, dst, in_port);
            ctx.install(current, dst_bound, None)?;
            next_port = in_port;
        }
        Ok(())
    }
}

fn payload(pkt: &PacketIn) -> Payload {
    match pkt.buffer_id {
        Some(id) => Payload::Buffered(id),
        None => Payload::Data(pkt.data.clone()),
    }
}
