// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated switched network for driving the controller end to end.
//!
//! Switches hold prioritized flow tables and start out with a table-miss
//! rule that punts to the controller. Cables join switch ports to other
//! switch ports or to hosts, and any cable can be failed, after which it
//! silently drops frames in both directions. Frames are walked through the
//! network synchronously inside the call that produced them, and punted
//! frames are queued for the controller as [`Event::FrameArrival`].
//!
//! This is not a full fidelity switch. It models enough of rule matching,
//! buffering and packet-out to exercise learning and fault localization.

pub mod lab;

pub use lab::Lab;

use fl::channel::{
    Action, BufferId, FlowMatch, FlowRule, InPort, PacketIn, Payload,
    SwitchChannel,
};
use fl::types::{Dpid, Link, MacAddr, PortNo};
use fl::{Error, Event};
use fl_common::lock;
use slog::{debug, warn, Logger};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

pub const COMPONENT_SIM: &str = "fl-sim";

/// Frames one injection may generate before the rest are dropped. Keeps a
/// flood around a loop from running forever.
const HOP_LIMIT: usize = 1024;

/// Priority of the table-miss rule every switch starts with.
const TABLE_MISS_PRIORITY: u16 = 0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Attachment {
    Switch(Dpid, PortNo),
    Host(MacAddr),
}

#[derive(Debug, Default)]
struct Switch {
    ports: BTreeSet<PortNo>,
    rules: Vec<FlowRule>,
    buffers: BTreeMap<BufferId, (PortNo, Vec<u8>)>,
}

impl Switch {
    fn new() -> Self {
        Self {
            rules: vec![FlowRule {
                priority: TABLE_MISS_PRIORITY,
                matcher: FlowMatch::default(),
                actions: vec![Action::ToController],
            }],
            ..Default::default()
        }
    }

    /// Highest priority rule matching the frame. Among equal priorities the
    /// oldest rule wins.
    fn lookup(&self, in_port: PortNo, dst: MacAddr) -> Option<&FlowRule> {
        let mut best: Option<&FlowRule> = None;
        for r in self.rules.iter().filter(|r| r.matcher.matches(in_port, dst)) {
            if best.map_or(true, |b| r.priority > b.priority) {
                best = Some(r);
            }
        }
        best
    }
}

#[derive(Default)]
struct State {
    switches: BTreeMap<Dpid, Switch>,
    cables: BTreeMap<(Dpid, PortNo), Attachment>,
    hosts: BTreeMap<MacAddr, (Dpid, PortNo)>,
    down: BTreeSet<(Dpid, Dpid)>,
    delivered: BTreeMap<MacAddr, Vec<Vec<u8>>>,
    buffering: bool,
    next_buffer: BufferId,
}

impl State {
    fn switch(&mut self, dpid: Dpid) -> Result<&mut Switch, Error> {
        self.switches
            .get_mut(&dpid)
            .ok_or_else(|| Error::Channel(format!("unknown switch {dpid}")))
    }

    fn is_down(&self, a: Dpid, b: Dpid) -> bool {
        self.down.contains(&ordered(a, b))
    }
}

fn ordered(a: Dpid, b: Dpid) -> (Dpid, Dpid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A frame in flight: either arriving at a switch port, or being sent by
/// the controller with explicit actions.
enum Work {
    Arrive {
        dpid: Dpid,
        in_port: PortNo,
        frame: Vec<u8>,
    },
    Apply {
        dpid: Dpid,
        in_port: InPort,
        actions: Vec<Action>,
        frame: Vec<u8>,
    },
}

/// Handle to a simulated network. Clones share the same network.
#[derive(Clone)]
pub struct Network {
    state: Arc<Mutex<State>>,
    events: Sender<Event>,
    log: Logger,
}

impl Network {
    /// An empty network that punts frames into `events`.
    pub fn new(events: Sender<Event>, log: Logger) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            events,
            log,
        }
    }

    /// `n` switches in a line. Host `i` (address `i`) sits on port 1 of
    /// switch `i`. Port 2 of switch `i` is cabled to port 3 of switch `i+1`.
    pub fn linear(n: u64, events: Sender<Event>, log: Logger) -> Self {
        let net = Self::new(events, log);
        for i in 1..=n {
            net.add_switch(Dpid(i));
            if let Some(h) = host_mac(i) {
                net.add_host(h, Dpid(i), 1);
            }
            if i > 1 {
                net.add_cable(Dpid(i - 1), 2, Dpid(i), 3);
            }
        }
        net
    }

    pub fn add_switch(&self, dpid: Dpid) {
        lock!(self.state).switches.entry(dpid).or_insert_with(Switch::new);
    }

    /// Cable `a`'s port `pa` to `b`'s port `pb`.
    pub fn add_cable(&self, a: Dpid, pa: PortNo, b: Dpid, pb: PortNo) {
        let mut st = lock!(self.state);
        st.cables.insert((a, pa), Attachment::Switch(b, pb));
        st.cables.insert((b, pb), Attachment::Switch(a, pa));
        for (d, p) in [(a, pa), (b, pb)] {
            st.switches.entry(d).or_insert_with(Switch::new).ports.insert(p);
        }
    }

    pub fn add_host(&self, mac: MacAddr, dpid: Dpid, port: PortNo) {
        let mut st = lock!(self.state);
        st.cables.insert((dpid, port), Attachment::Host(mac));
        st.hosts.insert(mac, (dpid, port));
        st.switches
            .entry(dpid)
            .or_insert_with(Switch::new)
            .ports
            .insert(port);
    }

    /// Tell the controller about every switch and inter-switch link, the
    /// way a discovery service would.
    pub fn announce(&self) {
        for dpid in self.current_switches() {
            self.notify(Event::SwitchJoin(dpid));
        }
        for link in self.current_links() {
            self.notify(Event::LinkDiscovered(link));
        }
    }

    /// Break the cable between `a` and `b`.
    pub fn fail_link(&self, a: Dpid, b: Dpid) {
        lock!(self.state).down.insert(ordered(a, b));
        warn!(self.log, "link down";
            "component" => COMPONENT_SIM,
            "link" => format!("{a} <-> {b}")
        );
    }

    pub fn restore_link(&self, a: Dpid, b: Dpid) {
        lock!(self.state).down.remove(&ordered(a, b));
    }

    /// Whether table-miss punts hold the frame in a switch buffer.
    pub fn set_buffering(&self, on: bool) {
        lock!(self.state).buffering = on;
    }

    /// Rules currently installed on `dpid`, table-miss included.
    pub fn rules(&self, dpid: Dpid) -> Vec<FlowRule> {
        lock!(self.state)
            .switches
            .get(&dpid)
            .map(|s| s.rules.clone())
            .unwrap_or_default()
    }

    /// Frames host `mac` has received so far.
    pub fn delivered(&self, mac: MacAddr) -> Vec<Vec<u8>> {
        lock!(self.state)
            .delivered
            .get(&mac)
            .cloned()
            .unwrap_or_default()
    }

    /// Have host `mac` put `frame` on the wire.
    pub fn host_send(&self, mac: MacAddr, frame: Vec<u8>) -> Result<(), Error> {
        let mut st = lock!(self.state);
        let (dpid, in_port) = *st
            .hosts
            .get(&mac)
            .ok_or_else(|| Error::Channel(format!("unknown host {mac}")))?;
        self.walk(
            &mut st,
            Work::Arrive {
                dpid,
                in_port,
                frame,
            },
        )
    }

    /// Push `first` and everything it causes through the network.
    fn walk(&self, st: &mut State, first: Work) -> Result<(), Error> {
        let mut queue = VecDeque::from([first]);
        let mut budget = HOP_LIMIT;
        while let Some(work) = queue.pop_front() {
            if budget == 0 {
                warn!(self.log, "hop limit reached, dropping frames";
                    "component" => COMPONENT_SIM,
                    "dropped" => queue.len() + 1
                );
                break;
            }
            budget -= 1;
            match work {
                Work::Arrive {
                    dpid,
                    in_port,
                    frame,
                } => self.arrive(st, &mut queue, dpid, in_port, frame)?,
                Work::Apply {
                    dpid,
                    in_port,
                    actions,
                    frame,
                } => {
                    self.apply(st, &mut queue, dpid, in_port, &actions, frame)?
                }
            }
        }
        Ok(())
    }

    fn arrive(
        &self,
        st: &mut State,
        queue: &mut VecDeque<Work>,
        dpid: Dpid,
        in_port: PortNo,
        frame: Vec<u8>,
    ) -> Result<(), Error> {
        let Some(dst) = eth_dst(&frame) else {
            return Ok(());
        };
        let buffering = st.buffering;
        let sw = st.switch(dpid)?;
        let Some(rule) = sw.lookup(in_port, dst).cloned() else {
            return Ok(());
        };

        // Table-miss punts may be buffered, everything else is sent up
        // whole.
        if rule.priority == TABLE_MISS_PRIORITY && buffering {
            let id = st.next_buffer;
            st.next_buffer = st.next_buffer.wrapping_add(1);
            st.switch(dpid)?.buffers.insert(id, (in_port, frame.clone()));
            self.punt(dpid, in_port, Some(id), frame);
            return Ok(());
        }
        self.apply(st, queue, dpid, InPort::Port(in_port), &rule.actions, frame)
    }

    fn apply(
        &self,
        st: &mut State,
        queue: &mut VecDeque<Work>,
        dpid: Dpid,
        in_port: InPort,
        actions: &[Action],
        frame: Vec<u8>,
    ) -> Result<(), Error> {
        for action in actions {
            match action {
                Action::Output(port) => {
                    self.transmit(st, queue, dpid, *port, frame.clone())
                }
                Action::Flood => {
                    let ports = st.switch(dpid)?.ports.clone();
                    for port in ports {
                        if in_port != InPort::Port(port) {
                            self.transmit(st, queue, dpid, port, frame.clone());
                        }
                    }
                }
                Action::ToController => {
                    if let InPort::Port(p) = in_port {
                        self.punt(dpid, p, None, frame.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn transmit(
        &self,
        st: &mut State,
        queue: &mut VecDeque<Work>,
        dpid: Dpid,
        port: PortNo,
        frame: Vec<u8>,
    ) {
        match st.cables.get(&(dpid, port)).copied() {
            Some(Attachment::Switch(peer, peer_port)) => {
                if st.is_down(dpid, peer) {
                    debug!(self.log, "frame lost on failed link";
                        "component" => COMPONENT_SIM,
                        "from" => format!("{dpid}"),
                        "to" => format!("{peer}")
                    );
                    return;
                }
                queue.push_back(Work::Arrive {
                    dpid: peer,
                    in_port: peer_port,
                    frame,
                });
            }
            Some(Attachment::Host(mac)) => {
                st.delivered.entry(mac).or_default().push(frame);
            }
            None => {}
        }
    }

    fn punt(
        &self,
        dpid: Dpid,
        in_port: PortNo,
        buffer_id: Option<BufferId>,
        data: Vec<u8>,
    ) {
        let pkt = PacketIn {
            dpid,
            in_port,
            buffer_id,
            total_len: data.len(),
            data,
        };
        self.notify(Event::FrameArrival(pkt));
    }

    fn notify(&self, event: Event) {
        if let Err(e) = self.events.send(event) {
            debug!(self.log, "controller gone, dropping event";
                "component" => COMPONENT_SIM,
                "event" => format!("{:?}", e.0)
            );
        }
    }
}

impl SwitchChannel for Network {
    fn install_rule(
        &self,
        dpid: Dpid,
        rule: FlowRule,
        buffer: Option<BufferId>,
    ) -> Result<(), Error> {
        let mut st = lock!(self.state);
        let sw = st.switch(dpid)?;
        // Same match and priority replaces, as a flow add would.
        sw.rules.retain(|r| {
            !(r.matcher == rule.matcher && r.priority == rule.priority)
        });
        sw.rules.push(rule);
        let Some(id) = buffer else {
            return Ok(());
        };
        let Some((in_port, frame)) = sw.buffers.remove(&id) else {
            return Err(Error::Channel(format!("{dpid}: no buffer {id}")));
        };
        self.walk(
            &mut st,
            Work::Arrive {
                dpid,
                in_port,
                frame,
            },
        )
    }

    fn remove_rule(
        &self,
        dpid: Dpid,
        matcher: FlowMatch,
        priority: u16,
    ) -> Result<(), Error> {
        let mut st = lock!(self.state);
        st.switch(dpid)?
            .rules
            .retain(|r| !(r.matcher == matcher && r.priority == priority));
        Ok(())
    }

    fn packet_out(
        &self,
        dpid: Dpid,
        in_port: InPort,
        actions: Vec<Action>,
        payload: Payload,
    ) -> Result<(), Error> {
        let mut st = lock!(self.state);
        let frame = match payload {
            Payload::Data(d) => d,
            Payload::Buffered(id) => st
                .switch(dpid)?
                .buffers
                .remove(&id)
                .map(|(_, f)| f)
                .ok_or_else(|| {
                    Error::Channel(format!("{dpid}: no buffer {id}"))
                })?,
        };
        self.walk(
            &mut st,
            Work::Apply {
                dpid,
                in_port,
                actions,
                frame,
            },
        )
    }

    fn current_switches(&self) -> BTreeSet<Dpid> {
        lock!(self.state).switches.keys().copied().collect()
    }

    /// Failed cables are still reported. Discovery has not noticed yet.
    fn current_links(&self) -> BTreeSet<Link> {
        lock!(self.state)
            .cables
            .iter()
            .filter_map(|((d, p), a)| match a {
                Attachment::Switch(peer, _) => Some(Link::new(*d, *peer, *p)),
                Attachment::Host(_) => None,
            })
            .collect()
    }
}

/// Address of host `i` in networks built by [`Network::linear`].
pub fn host_mac(i: u64) -> Option<MacAddr> {
    MacAddr::from_u64(i)
}

fn eth_dst(frame: &[u8]) -> Option<MacAddr> {
    fl::packet::EthernetFrame::from_bytes(frame)
        .ok()
        .map(|f| f.dst)
}
