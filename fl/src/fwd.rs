// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The controller's record of the exact-match forwarding rules it has
//! installed. Only forwarding rules live here. Taps are owned by the probe
//! session that installs them.

use crate::types::{Dpid, ForwardingEntry, MacAddr, PortNo};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default, Clone)]
pub struct ForwardingState {
    // Insertion order is kept so lookups resolve to the oldest matching
    // entry.
    entries: BTreeMap<Dpid, Vec<ForwardingEntry>>,
}

impl ForwardingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an installed entry. Returns true if it was not already known.
    pub fn record(&mut self, dpid: Dpid, entry: ForwardingEntry) -> bool {
        let v = self.entries.entry(dpid).or_default();
        if v.contains(&entry) {
            return false;
        }
        v.push(entry);
        true
    }

    pub fn entries_for(&self, dpid: Dpid) -> BTreeSet<ForwardingEntry> {
        self.entries
            .get(&dpid)
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The first recorded entry on `dpid` matching `(in_port, dst)`.
    pub fn lookup(
        &self,
        dpid: Dpid,
        in_port: PortNo,
        dst: MacAddr,
    ) -> Option<&ForwardingEntry> {
        self.entries
            .get(&dpid)?
            .iter()
            .find(|e| e.in_port == in_port && e.dst == dst)
    }

    pub fn matches(&self, dpid: Dpid, in_port: PortNo, dst: MacAddr) -> bool {
        self.lookup(dpid, in_port, dst).is_some()
    }

    /// All entries in switch order, each switch's entries in the order they
    /// were recorded.
    pub fn iter(&self) -> impl Iterator<Item = (Dpid, &ForwardingEntry)> {
        self.entries
            .iter()
            .flat_map(|(d, v)| v.iter().map(move |e| (*d, e)))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything recorded for one switch.
    pub fn clear_switch(&mut self, dpid: Dpid) {
        self.entries.remove(&dpid);
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mac(v: u64) -> MacAddr {
        MacAddr::from_u64(v).unwrap()
    }

    #[test]
    fn idempotent_record() {
        let mut fwd = ForwardingState::new();
        let e = ForwardingEntry::new(1, mac(2), 3);
        assert!(fwd.record(Dpid(1), e));
        assert!(!fwd.record(Dpid(1), e));
        assert!(fwd.record(Dpid(2), e));
        assert_eq!(fwd.len(), 2);
        assert_eq!(fwd.entries_for(Dpid(1)), BTreeSet::from([e]));
        assert!(fwd.entries_for(Dpid(9)).is_empty());
    }

    #[test]
    fn lookup_prefers_oldest() {
        let mut fwd = ForwardingState::new();
        fwd.record(Dpid(1), ForwardingEntry::new(1, mac(2), 4));
        fwd.record(Dpid(1), ForwardingEntry::new(1, mac(2), 3));
        fwd.record(Dpid(1), ForwardingEntry::new(2, mac(1), 1));

        assert_eq!(fwd.lookup(Dpid(1), 1, mac(2)).map(|e| e.out_port), Some(4));
        assert!(fwd.matches(Dpid(1), 2, mac(1)));
        assert!(!fwd.matches(Dpid(1), 2, mac(2)));
        assert!(!fwd.matches(Dpid(2), 1, mac(2)));
    }

    #[test]
    fn clear() {
        let mut fwd = ForwardingState::new();
        fwd.record(Dpid(1), ForwardingEntry::new(1, mac(2), 3));
        fwd.record(Dpid(2), ForwardingEntry::new(1, mac(2), 3));
        fwd.clear_switch(Dpid(1));
        assert_eq!(
            fwd.iter().map(|(d, _)| d).collect::<Vec<_>>(),
            vec![Dpid(2)]
        );
        fwd.reset();
        assert!(fwd.is_empty());
    }
}
