// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The controller proper. All state is owned by one [`Controller`] and only
//! changes in response to an [`Event`], so a single thread running
//! [`Controller::run`] is the whole concurrency story.

use crate::channel::{PacketIn, SwitchChannel};
use crate::clock::{Alarm, TimerEvent};
use crate::config::Config;
use crate::error::Error;
use crate::fwd::ForwardingState;
use crate::learning::{Disposition, Learning, LearningContext};
use crate::log::controller_log;
use crate::resolver::resolve;
use crate::session::{Phase, ProbeContext, ProbeSession, TraceReport};
use crate::topology::Topology;
use crate::types::{Dpid, Link, Path};
use slog::Logger;
use std::sync::mpsc::{channel, Receiver, Sender};

const UNIT_CONTROLLER: &str = "controller";

#[derive(Debug)]
pub enum Event {
    /// A frame punted to the controller by a switch.
    FrameArrival(PacketIn),
    SwitchJoin(Dpid),
    LinkDiscovered(Link),
    Timer(TimerEvent),
    Admin(AdminEvent),
    Shutdown,
}

/// Operator requests. Replies go back on the included channel when one is
/// given.
#[derive(Debug)]
pub enum AdminEvent {
    Trace {
        src: String,
        dst: String,
        reply: Option<Sender<Result<Path, Error>>>,
    },
    Cancel {
        reply: Option<Sender<Result<(), Error>>>,
    },
}

pub struct Controller<C: SwitchChannel, A: Alarm> {
    channel: C,
    alarm: A,
    config: Config,

    topology: Topology,
    fwd: ForwardingState,
    learning: Learning,

    session: Option<ProbeSession>,
    last_report: Option<TraceReport>,
    watchers: Vec<Sender<TraceReport>>,

    log: Logger,
}

impl<C: SwitchChannel, A: Alarm> Controller<C, A> {
    pub fn new(channel: C, alarm: A, config: Config, log: Logger) -> Self {
        Self {
            channel,
            alarm,
            config,
            topology: Topology::new(),
            fwd: ForwardingState::new(),
            learning: Learning::new(log.clone()),
            session: None,
            last_report: None,
            watchers: Vec::new(),
            log,
        }
    }

    /// Handle events until a shutdown event arrives or every sender is
    /// gone.
    pub fn run(&mut self, rx: Receiver<Event>) {
        controller_log!(self, info, "controller running");
        loop {
            let event = match rx.recv() {
                Ok(Event::Shutdown) => break,
                Ok(event) => event,
                Err(_) => break,
            };
            if let Err(e) = self.handle_event(event) {
                controller_log!(self, error, "{}", e);
            }
        }
        controller_log!(self, info, "controller shutting down");
    }

    pub fn handle_event(&mut self, event: Event) -> Result<(), Error> {
        match event {
            Event::FrameArrival(pkt) => self.on_frame(&pkt).map(|_| ()),
            Event::SwitchJoin(dpid) => {
                if self.topology.record_switch(dpid) {
                    controller_log!(self, info, "switch joined";
                        "switch" => format!("{dpid}")
                    );
                }
                Ok(())
            }
            Event::LinkDiscovered(link) => {
                if self.topology.record_link(link) {
                    controller_log!(self, info, "link discovered";
                        "link" => format!("{link}")
                    );
                }
                Ok(())
            }
            Event::Timer(ev) => self.on_timer(ev),
            Event::Admin(AdminEvent::Trace { src, dst, reply }) => {
                let result = self.trace(&src, &dst);
                match reply {
                    Some(tx) => {
                        let _ = tx.send(result);
                        Ok(())
                    }
                    None => result.map(|_| ()),
                }
            }
            Event::Admin(AdminEvent::Cancel { reply }) => {
                let result = self.cancel_trace();
                match reply {
                    Some(tx) => {
                        let _ = tx.send(result);
                        Ok(())
                    }
                    None => result,
                }
            }
            Event::Shutdown => Ok(()),
        }
    }

    /// Process a frame punted by a switch.
    pub fn on_frame(&mut self, pkt: &PacketIn) -> Result<Disposition, Error> {
        self.refresh_topology();
        let mut ctx = LearningContext {
            channel: &self.channel,
            topology: &self.topology,
            fwd: &mut self.fwd,
            config: &self.config,
        };
        let disposition = self.learning.process(pkt, &mut ctx)?;
        if let Disposition::ProbeResponse { dpid, in_port } = disposition {
            self.drive(|s, ctx| s.on_probe_response(ctx, dpid, in_port))?;
        }
        Ok(disposition)
    }

    pub fn on_timer(&mut self, ev: TimerEvent) -> Result<(), Error> {
        self.drive(|s, ctx| s.on_timer(ctx, ev))
    }

    /// Start localizing faults on the path from host `src` to host `dst`.
    /// Only one trace runs at a time. A trace requested while another is
    /// running is refused and the running one is left alone.
    pub fn trace(&mut self, src: &str, dst: &str) -> Result<Path, Error> {
        if self.trace_active() {
            controller_log!(self, warn, "trace already in progress";
                "src" => src,
                "dst" => dst
            );
            return Err(Error::TraceInProgress);
        }
        self.refresh_topology();
        let path = match resolve(
            src,
            dst,
            &self.config.host_prefix,
            &self.topology,
            &self.fwd,
            &self.learning,
        ) {
            Ok(p) => p,
            Err(e) => {
                controller_log!(self, info, "trace failed: {}", e;
                    "src" => src,
                    "dst" => dst
                );
                return Err(e);
            }
        };
        controller_log!(self, info, "tracing";
            "src" => src,
            "dst" => dst,
            "path" => format!("{path}")
        );
        self.session = Some(ProbeSession::new(
            src,
            dst,
            path.clone(),
            self.log.clone(),
        ));
        self.drive(|s, ctx| s.start(ctx))?;
        Ok(path)
    }

    /// Stop the running trace without a report.
    pub fn cancel_trace(&mut self) -> Result<(), Error> {
        let ctx = ProbeContext {
            channel: &self.channel,
            alarm: &self.alarm,
            config: &self.config,
        };
        match self.session.as_mut() {
            Some(s) if s.is_active() => {
                s.abort(&ctx, "cancelled");
                Ok(())
            }
            _ => Err(Error::NoTrace),
        }
    }

    pub fn trace_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_active())
    }

    /// Phase of the current or most recent trace.
    pub fn phase(&self) -> Phase {
        self.session
            .as_ref()
            .map(|s| s.phase())
            .unwrap_or(Phase::Terminal)
    }

    pub fn session(&self) -> Option<&ProbeSession> {
        self.session.as_ref()
    }

    pub fn last_report(&self) -> Option<&TraceReport> {
        self.last_report.as_ref()
    }

    /// Get a copy of every trace report produced from now on.
    pub fn watch_reports(&mut self) -> Receiver<TraceReport> {
        let (tx, rx) = channel();
        self.watchers.push(tx);
        rx
    }

    /// Forget all learned state: topology, address tables and installed
    /// rules. Rules already on switches are left there. Refused while a
    /// trace is running.
    pub fn reset_state(&mut self) -> Result<(), Error> {
        if self.trace_active() {
            return Err(Error::TraceInProgress);
        }
        self.topology.reset();
        self.fwd.reset();
        self.learning.reset();
        controller_log!(self, info, "learned state reset");
        Ok(())
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn forwarding(&self) -> &ForwardingState {
        &self.fwd
    }

    pub fn learning(&self) -> &Learning {
        &self.learning
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn refresh_topology(&mut self) {
        self.topology.merge(
            self.channel.current_switches(),
            self.channel.current_links(),
        );
    }

    /// Run `f` against the active session. A failure aborts the session. A
    /// finished session's report is published.
    fn drive<F>(&mut self, f: F) -> Result<(), Error>
    where
        F: FnOnce(
            &mut ProbeSession,
            &ProbeContext<'_, C, A>,
        ) -> Result<Option<TraceReport>, Error>,
    {
        let result = {
            let Some(session) = self.session.as_mut() else {
                return Ok(());
            };
            if !session.is_active() {
                return Ok(());
            }
            let ctx = ProbeContext {
                channel: &self.channel,
                alarm: &self.alarm,
                config: &self.config,
            };
            let result = f(session, &ctx);
            if let Err(e) = &result {
                session.abort(&ctx, &e.to_string());
            }
            result
        };
        if let Some(report) = result? {
            self.publish(report);
        }
        Ok(())
    }

    fn publish(&mut self, report: TraceReport) {
        controller_log!(self, info, "trace report";
            "src" => report.src.as_str(),
            "dst" => report.dst.as_str(),
            "failed_links" => report.failed_links.len()
        );
        self.watchers.retain(|w| w.send(report.clone()).is_ok());
        self.last_report = Some(report);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::{Action, InPort, Payload};
    use crate::clock::TimerKind;
    use crate::packet::probe_frame;
    use crate::session::ProbeOutcome;
    use crate::test::{
        arp, linear_channel, mac, ChannelOp, ManualAlarm, RecordingChannel,
        H1, H2,
    };
    use crate::types::{FailedLink, MacAddr};
    use fl_common::log::discard_logger;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    type TestController = Controller<Arc<RecordingChannel>, Arc<ManualAlarm>>;

    struct Net {
        ctl: TestController,
        channel: Arc<RecordingChannel>,
        alarm: Arc<ManualAlarm>,
    }

    impl Net {
        /// The three switch line with h1 and h2 learned and rules for
        /// h1 <-> h2 installed on every switch.
        fn established() -> Self {
            let channel = Arc::new(linear_channel());
            let alarm = Arc::new(ManualAlarm::default());
            let ctl = Controller::new(
                channel.clone(),
                alarm.clone(),
                Config::default(),
                discard_logger(),
            );
            let mut net = Self {
                ctl,
                channel,
                alarm,
            };
            let bcast = arp(mac(H1), MacAddr::BROADCAST);
            for d in 1..=3 {
                net.frame(d, 1, bcast.clone());
            }
            net.frame(3, 2, arp(mac(H2), mac(H1)));
            net.channel.clear();
            net
        }

        fn frame(&mut self, dpid: u64, in_port: u32, data: Vec<u8>) {
            self.ctl
                .handle_event(Event::FrameArrival(PacketIn::new(
                    Dpid(dpid),
                    in_port,
                    data,
                )))
                .unwrap();
        }

        fn fire(&mut self, kind: TimerKind) {
            let ev = self.alarm.take(kind).unwrap();
            self.ctl.handle_event(Event::Timer(ev)).unwrap();
        }

        /// The most recent probe injection and tap install, as the segment
        /// `[a, b]` of the path being traced.
        fn segment(&self) -> (usize, usize) {
            let path = self.ctl.session().unwrap().path().clone();
            let ops = self.channel.ops();
            let a = ops.iter().rev().find_map(|op| match op {
                ChannelOp::PacketOut {
                    dpid,
                    in_port: InPort::Controller,
                    ..
                } => path.hops.iter().position(|h| h.switch == *dpid),
                _ => None,
            });
            let b = ops.iter().rev().find_map(|op| match op {
                ChannelOp::Install { dpid, rule, .. } if rule.priority == 2 => {
                    path.hops.iter().position(|h| h.switch == *dpid)
                }
                _ => None,
            });
            (a.unwrap(), b.unwrap())
        }

        /// Play the dataplane for a running trace. Link `k` joins hop `k`
        /// and hop `k + 1`, and the links in `down` drop everything.
        fn complete(&mut self, down: &[usize]) -> TraceReport {
            let sentinel = self.ctl.config().probe_sentinel;
            for _ in 0..64 {
                if !self.ctl.trace_active() {
                    return self.ctl.last_report().unwrap().clone();
                }
                if self.alarm.armed(TimerKind::ProbeSend) {
                    self.fire(TimerKind::ProbeSend);
                }
                let (a, b) = self.segment();
                if down.iter().all(|k| !(a <= *k && *k < b)) {
                    let path = self.ctl.session().unwrap().path().clone();
                    let hop = path.hops[b];
                    let probe = probe_frame(path.src, path.dst, sentinel);
                    self.frame(hop.switch.0, hop.ingress, probe);
                } else {
                    self.fire(TimerKind::ProbeDeadline);
                }
            }
            panic!("trace did not finish");
        }
    }

    #[test]
    fn trace_resolves_linear_path() {
        let mut net = Net::established();
        let path = net.ctl.trace("h1", "h2").unwrap();
        assert_eq!(path.to_string(), "[s1, s2, s3]");
        assert_eq!(net.ctl.phase(), Phase::Sequential);

        // First round: tap on s2, probe send timer armed.
        assert_eq!(
            net.alarm.delay(TimerKind::ProbeSend),
            Some(Duration::from_secs(1))
        );
        let ops = net.channel.ops();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            ChannelOp::Install { dpid, rule, .. } => {
                assert_eq!(*dpid, Dpid(2));
                assert_eq!(
                    rule.actions,
                    vec![Action::ToController, Action::Output(2)]
                );
            }
            other => panic!("expected tap install, got {other:?}"),
        }

        net.fire(TimerKind::ProbeSend);
        match net.channel.ops().last() {
            Some(ChannelOp::PacketOut {
                dpid,
                in_port,
                actions,
                payload: Payload::Data(data),
            }) => {
                assert_eq!(*dpid, Dpid(1));
                assert_eq!(*in_port, InPort::Controller);
                assert_eq!(*actions, vec![Action::Output(2)]);
                assert_eq!(
                    *data,
                    probe_frame(
                        mac(H1),
                        mac(H2),
                        net.ctl.config().probe_sentinel
                    )
                );
            }
            other => panic!("expected probe, got {other:?}"),
        }
        assert_eq!(
            net.alarm.delay(TimerKind::ProbeDeadline),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn localize_failed_link() {
        let mut net = Net::established();
        net.ctl.trace("h1", "h2").unwrap();
        let report = net.complete(&[1]);
        assert_eq!(
            report.failed_links,
            vec![FailedLink {
                from: Dpid(2),
                to: Dpid(3)
            }]
        );
        assert!(report.probe_rounds <= 2);
        assert_eq!(net.ctl.phase(), Phase::Terminal);
        assert!(net.alarm.is_empty());
    }

    #[test]
    fn healthy_path_reports_nothing() {
        let mut net = Net::established();
        let reports = net.ctl.watch_reports();
        net.ctl.trace("h1", "h2").unwrap();
        let report = net.complete(&[]);
        assert!(report.failed_links.is_empty());
        assert_eq!(reports.try_recv().unwrap(), report);
    }

    #[test]
    fn sequential_phase_evaluates_every_hop() {
        let mut net = Net::established();
        net.ctl.trace("h1", "h2").unwrap();
        let report = net.complete(&[0]);
        assert_eq!(
            report
                .sequential
                .iter()
                .map(|r| (r.hops.len(), r.outcome))
                .collect::<Vec<_>>(),
            vec![(2, ProbeOutcome::Timeout), (3, ProbeOutcome::Timeout)]
        );
        assert_eq!(
            report.failed_links,
            vec![FailedLink {
                from: Dpid(1),
                to: Dpid(2)
            }]
        );
    }

    #[test]
    fn trace_while_active_is_rejected() {
        let mut net = Net::established();
        net.ctl.trace("h1", "h2").unwrap();
        net.fire(TimerKind::ProbeSend);
        let before = net.channel.ops();

        assert!(matches!(
            net.ctl.trace("h2", "h1"),
            Err(Error::TraceInProgress)
        ));
        assert!(matches!(net.ctl.reset_state(), Err(Error::TraceInProgress)));

        // The running trace is untouched and still completes.
        assert_eq!(net.channel.ops(), before);
        assert_eq!(net.ctl.phase(), Phase::Sequential);
        assert_eq!(net.ctl.session().unwrap().outstanding(), Some((0, 1)));
        let report = net.complete(&[]);
        assert_eq!(report.src, "h1");
    }

    #[test]
    fn trace_from_terminal_restarts() {
        let mut net = Net::established();
        net.ctl.trace("h1", "h2").unwrap();
        let first = net.complete(&[1]);
        assert_eq!(net.ctl.phase(), Phase::Terminal);

        let path = net.ctl.trace("h2", "h1").unwrap();
        assert_eq!(path.to_string(), "[s3, s2, s1]");
        assert_eq!(net.ctl.phase(), Phase::Sequential);
        let second = net.complete(&[]);
        assert_eq!(second.src, "h2");
        assert!(second.failed_links.is_empty());
        assert_ne!(first, second);
    }

    #[test]
    fn cancel_removes_tap() {
        let mut net = Net::established();
        assert!(matches!(net.ctl.cancel_trace(), Err(Error::NoTrace)));

        net.ctl.trace("h1", "h2").unwrap();
        let (tx, rx) = channel();
        net.ctl
            .handle_event(Event::Admin(AdminEvent::Cancel { reply: Some(tx) }))
            .unwrap();
        rx.recv().unwrap().unwrap();

        assert_eq!(net.ctl.phase(), Phase::Terminal);
        assert!(net.alarm.is_empty());
        assert!(net.ctl.last_report().is_none());
        assert!(matches!(
            net.channel.ops().last(),
            Some(ChannelOp::Remove {
                dpid: Dpid(2),
                priority: 2,
                ..
            })
        ));
    }

    #[test]
    fn unknown_host() {
        let mut net = Net::established();
        let (tx, rx) = channel();
        net.ctl
            .handle_event(Event::Admin(AdminEvent::Trace {
                src: "h1".into(),
                dst: "h9".into(),
                reply: Some(tx),
            }))
            .unwrap();
        match rx.recv().unwrap() {
            Err(Error::UnknownHost { id, addr }) => {
                assert_eq!(id, "h9");
                assert_eq!(addr, mac(9));
            }
            other => panic!("expected unknown host, got {other:?}"),
        }
        assert!(!net.ctl.trace_active());
        assert!(net.channel.ops().is_empty());
    }

    #[test]
    fn stale_timer_is_ignored() {
        let mut net = Net::established();
        net.ctl.trace("h1", "h2").unwrap();
        let live = net.alarm.take(TimerKind::ProbeSend).unwrap();
        net.ctl
            .handle_event(Event::Timer(TimerEvent {
                kind: TimerKind::ProbeSend,
                round: live.round.wrapping_sub(1),
            }))
            .unwrap();
        assert_eq!(net.channel.ops().len(), 1);

        net.ctl.handle_event(Event::Timer(live)).unwrap();
        assert_eq!(net.channel.ops().len(), 2);
    }

    #[test]
    fn channel_failure_aborts_trace() {
        let mut net = Net::established();
        net.ctl.trace("h1", "h2").unwrap();
        net.channel.set_failing(true);
        let ev = net.alarm.take(TimerKind::ProbeSend).unwrap();
        assert!(matches!(
            net.ctl.handle_event(Event::Timer(ev)),
            Err(Error::Channel(_))
        ));
        assert_eq!(net.ctl.phase(), Phase::Terminal);
        assert!(net.alarm.is_empty());

        // Learning carries on and a new trace can start.
        net.channel.set_failing(false);
        net.ctl.trace("h1", "h2").unwrap();
        net.complete(&[]);
    }

    #[test]
    fn topology_events_and_reset() {
        let mut net = Net::established();
        net.ctl.handle_event(Event::SwitchJoin(Dpid(4))).unwrap();
        let link = Link::new(Dpid(3), Dpid(4), 3);
        net.ctl.handle_event(Event::LinkDiscovered(link)).unwrap();
        assert!(net.ctl.topology().switches().contains(&Dpid(4)));
        assert!(net.ctl.topology().is_link_port(Dpid(3), 3));
        assert!(!net.ctl.forwarding().is_empty());

        net.ctl.reset_state().unwrap();
        assert!(net.ctl.topology().switches().is_empty());
        assert!(net.ctl.forwarding().is_empty());
        assert!(net.ctl.learning().table(Dpid(1)).is_none());
        assert!(matches!(
            net.ctl.trace("h1", "h2"),
            Err(Error::UnknownHost { .. })
        ));
    }

    #[test]
    fn run_until_shutdown() {
        let ch = Arc::new(linear_channel());
        let alarm = Arc::new(ManualAlarm::default());
        let mut ctl = Controller::new(
            ch.clone(),
            alarm,
            Config::default(),
            discard_logger(),
        );
        let (tx, rx) = channel();
        let bcast = arp(mac(H1), MacAddr::BROADCAST);
        tx.send(Event::FrameArrival(PacketIn::new(Dpid(1), 1, bcast)))
            .unwrap();
        tx.send(Event::Shutdown).unwrap();
        tx.send(Event::SwitchJoin(Dpid(9))).unwrap();
        ctl.run(rx);

        assert_eq!(ctl.learning().port_of(Dpid(1), mac(H1)), Some(1));
        assert_eq!(ch.ops().len(), 1);
        assert!(!ctl.topology().switches().contains(&Dpid(9)));
    }
}
