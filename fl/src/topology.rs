// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Accumulated view of the switch topology.
//!
//! The snapshot only ever grows. Whatever the discovery service reports is
//! unioned in on every frame event, and a switch or link that later
//! disappears from discovery stays here until [`Topology::reset`] is called.

use crate::types::{Dpid, Link, PortNo};
use std::collections::BTreeSet;

#[derive(Debug, Default, Clone)]
pub struct Topology {
    switches: BTreeSet<Dpid>,
    links: BTreeSet<Link>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the switch was not already known.
    pub fn record_switch(&mut self, dpid: Dpid) -> bool {
        self.switches.insert(dpid)
    }

    /// Returns true if the link was not already known.
    pub fn record_link(&mut self, link: Link) -> bool {
        self.links.insert(link)
    }

    /// Union a discovery report into the snapshot.
    pub fn merge<S, L>(&mut self, switches: S, links: L)
    where
        S: IntoIterator<Item = Dpid>,
        L: IntoIterator<Item = Link>,
    {
        self.switches.extend(switches);
        self.links.extend(links);
    }

    pub fn snapshot(&self) -> (BTreeSet<Dpid>, BTreeSet<Link>) {
        (self.switches.clone(), self.links.clone())
    }

    pub fn switches(&self) -> &BTreeSet<Dpid> {
        &self.switches
    }

    pub fn links(&self) -> &BTreeSet<Link> {
        &self.links
    }

    /// The link whose source endpoint is `(dpid, port)`.
    pub fn link_from(&self, dpid: Dpid, port: PortNo) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.src == dpid && l.src_port == port)
    }

    /// The port on `src` that leads to `dst`.
    pub fn port_toward(&self, src: Dpid, dst: Dpid) -> Option<PortNo> {
        self.links
            .iter()
            .find(|l| l.src == src && l.dst == dst)
            .map(|l| l.src_port)
    }

    /// Returns true if `(dpid, port)` is the source endpoint of a known link,
    /// i.e. the port faces another switch rather than a host.
    pub fn is_link_port(&self, dpid: Dpid, port: PortNo) -> bool {
        self.link_from(dpid, port).is_some()
    }

    pub fn reset(&mut self) {
        self.switches.clear();
        self.links.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn linear() -> Topology {
        let mut t = Topology::new();
        t.merge(
            [Dpid(1), Dpid(2), Dpid(3)],
            [
                Link::new(Dpid(1), Dpid(2), 2),
                Link::new(Dpid(2), Dpid(1), 1),
                Link::new(Dpid(2), Dpid(3), 2),
                Link::new(Dpid(3), Dpid(2), 1),
            ],
        );
        t
    }

    #[test]
    fn queries() {
        let t = linear();
        assert_eq!(t.link_from(Dpid(2), 2).map(|l| l.dst), Some(Dpid(3)));
        assert_eq!(t.link_from(Dpid(3), 2), None);
        assert_eq!(t.port_toward(Dpid(3), Dpid(2)), Some(1));
        assert_eq!(t.port_toward(Dpid(1), Dpid(3)), None);
        assert!(t.is_link_port(Dpid(1), 2));
        assert!(!t.is_link_port(Dpid(1), 1));
    }

    #[test]
    fn monotonic_merge() {
        let mut t = linear();
        let before = t.snapshot();

        // A discovery report missing things removes nothing.
        t.merge([Dpid(1)], []);
        assert_eq!(t.snapshot(), before);

        assert!(t.record_switch(Dpid(4)));
        assert!(!t.record_switch(Dpid(4)));
        assert!(t.record_link(Link::new(Dpid(3), Dpid(4), 3)));
        assert_eq!(t.switches().len(), 4);
        assert_eq!(t.links().len(), 5);

        t.reset();
        assert!(t.switches().is_empty());
        assert!(t.links().is_empty());
    }
}
