// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconstructs the path a flow takes from the forwarding rules the
//! controller has installed.

use crate::error::Error;
use crate::fwd::ForwardingState;
use crate::learning::Learning;
use crate::topology::Topology;
use crate::types::{
    host_id_to_address, Dpid, ForwardingEntry, Hop, MacAddr, Path, PortNo,
};
use std::collections::{BTreeMap, BTreeSet};

/// A forwarding entry together with where its egress port leads: the next
/// switch and the port the flow enters it on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AugmentedEdge {
    pub entry: ForwardingEntry,
    pub next: Option<(Dpid, PortNo)>,
}

/// Annotate every recorded entry with its next hop. An entry has no next
/// hop unless both the link out of its egress port and the link coming
/// back are known.
pub fn augment(
    topology: &Topology,
    fwd: &ForwardingState,
) -> BTreeMap<Dpid, Vec<AugmentedEdge>> {
    let mut graph: BTreeMap<Dpid, Vec<AugmentedEdge>> = BTreeMap::new();
    for (dpid, entry) in fwd.iter() {
        let next = topology.link_from(dpid, entry.out_port).and_then(|l| {
            topology.port_toward(l.dst, dpid).map(|p| (l.dst, p))
        });
        graph.entry(dpid).or_default().push(AugmentedEdge {
            entry: *entry,
            next,
        });
    }
    graph
}

/// Where `addr` attaches to the network: a switch port it was learned on
/// that does not face another switch. Lowest switch wins if there are
/// several.
pub fn access_port(
    learning: &Learning,
    topology: &Topology,
    addr: MacAddr,
) -> Option<(Dpid, PortNo)> {
    learning
        .locations(addr)
        .find(|(d, p)| !topology.is_link_port(*d, *p))
}

/// Resolve the path traffic from host `src_id` to host `dst_id` follows.
pub fn resolve(
    src_id: &str,
    dst_id: &str,
    prefix: &str,
    topology: &Topology,
    fwd: &ForwardingState,
    learning: &Learning,
) -> Result<Path, Error> {
    let src = host_id_to_address(src_id, prefix)?;
    let dst = host_id_to_address(dst_id, prefix)?;

    let unknown = |id: &str, addr| Error::UnknownHost {
        id: id.to_string(),
        addr,
    };
    let (mut switch, mut ingress) = access_port(learning, topology, src)
        .ok_or_else(|| unknown(src_id, src))?;
    let (dst_switch, _) = access_port(learning, topology, dst)
        .ok_or_else(|| unknown(dst_id, dst))?;

    let discontinuity = || Error::PathDiscontinuity {
        src: src_id.to_string(),
        dst: dst_id.to_string(),
    };

    let graph = augment(topology, fwd);
    let mut hops = Vec::new();
    let mut visited = BTreeSet::new();
    loop {
        if !visited.insert((switch, ingress)) {
            return Err(discontinuity());
        }
        let matching: Vec<&AugmentedEdge> = graph
            .get(&switch)
            .into_iter()
            .flatten()
            .filter(|e| e.entry.in_port == ingress && e.entry.dst == dst)
            .collect();
        let Some(first) = matching.first() else {
            return Err(discontinuity());
        };
        let chosen = matching
            .iter()
            .find(|e| e.next.is_some())
            .unwrap_or(first);
        hops.push(Hop {
            switch,
            ingress,
            egress: chosen.entry.out_port,
        });
        match chosen.next {
            Some((next, port)) => {
                switch = next;
                ingress = port;
            }
            None => break,
        }
    }

    if switch != dst_switch {
        return Err(discontinuity());
    }
    Ok(Path { src, dst, hops })
}
