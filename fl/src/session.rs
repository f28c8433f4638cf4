// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Active fault localization along a resolved path.
//!
//! A session probes segments `[a, b]` of the path. For each segment a tap is
//! installed at hop `b` that copies matching frames to the controller while
//! still forwarding them, then a probe carrying the sentinel source address
//! is injected at hop `a`. Seeing the probe at the tap before the deadline
//! means every link in the segment is up.
//!
//! The session first probes `[0, 1]`, `[0, 2]`, ... up to the end of the
//! path, recording every outcome. It then runs a binary search over the
//! path that records each failed link it finds and resumes after it, so
//! several failures on one path are all reported.
//!
//! ```text
//!   Start -> SetupSequential -> Sequential -> SetupBinarySearch
//!                                  ^  |               |
//!                                  +--+  (per probe)  v
//!   Terminal <- Report <------------------------ BinarySearch
//!                                                  ^  |
//!                                                  +--+
//! ```

use crate::channel::{
    Action, FlowMatch, FlowRule, InPort, Payload, SwitchChannel,
};
use crate::clock::{Alarm, TimerEvent, TimerKind};
use crate::config::Config;
use crate::error::Error;
use crate::log::session_log;
use crate::packet::probe_frame;
use crate::types::{Dpid, DpidList, FailedLink, Hop, Path, PortNo};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

const UNIT_SESSION: &str = "probe_session";

/// Probe round identifiers are unique for the life of the process so a
/// timer armed by an earlier session can never be mistaken for a current
/// one.
static NEXT_ROUND: AtomicU64 = AtomicU64::new(1);

fn next_round() -> u64 {
    NEXT_ROUND.fetch_add(1, Ordering::Relaxed)
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub enum Phase {
    Start,
    SetupSequential,
    Sequential,
    SetupBinarySearch,
    BinarySearch,
    Report,
    Terminal,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Phase::Start => write!(f, "start"),
            Phase::SetupSequential => write!(f, "setup sequential"),
            Phase::Sequential => write!(f, "sequential"),
            Phase::SetupBinarySearch => write!(f, "setup binary search"),
            Phase::BinarySearch => write!(f, "binary search"),
            Phase::Report => write!(f, "report"),
            Phase::Terminal => write!(f, "terminal"),
        }
    }
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub enum ProbeOutcome {
    /// The probe was seen at the tap.
    Reached,
    /// The deadline passed first.
    Timeout,
}

impl Display for ProbeOutcome {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ProbeOutcome::Reached => write!(f, "ok"),
            ProbeOutcome::Timeout => write!(f, "not ok"),
        }
    }
}

/// Outcome of probing the path from its first hop up to the last switch in
/// `hops`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SequentialResult {
    pub hops: Vec<Dpid>,
    pub outcome: ProbeOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TraceReport {
    pub src: String,
    pub dst: String,
    pub path: Path,
    pub sequential: Vec<SequentialResult>,
    pub failed_links: Vec<FailedLink>,
    /// Number of binary search probes it took to find `failed_links`.
    pub probe_rounds: usize,
}

impl Display for TraceReport {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.failed_links.is_empty() {
            return write!(f, "no failed link");
        }
        write!(f, "failed link:")?;
        for l in &self.failed_links {
            write!(f, "\n{l}")?;
        }
        Ok(())
    }
}

/// What a session needs from the controller while it runs.
pub struct ProbeContext<'a, C, A> {
    pub channel: &'a C,
    pub alarm: &'a A,
    pub config: &'a Config,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Round {
    id: u64,
    /// Index of the hop the probe is injected at.
    from: usize,
    /// Index of the hop carrying the tap.
    to: usize,
    probe_sent: bool,
}

pub struct ProbeSession {
    phase: Phase,
    src_id: String,
    dst_id: String,
    path: Path,

    /// End of the next sequential segment.
    next: usize,
    sequential: Vec<SequentialResult>,

    /// Binary search window and the midpoint being probed.
    l: usize,
    r: usize,
    mid: usize,
    failed: Vec<FailedLink>,
    probe_rounds: usize,

    round: Option<Round>,
    log: Logger,
}

impl ProbeSession {
    pub fn new(src_id: &str, dst_id: &str, path: Path, log: Logger) -> Self {
        Self {
            phase: Phase::Start,
            src_id: src_id.to_string(),
            dst_id: dst_id.to_string(),
            path,
            next: 1,
            sequential: Vec::new(),
            l: 0,
            r: 0,
            mid: 0,
            failed: Vec::new(),
            probe_rounds: 0,
            round: None,
            log,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != Phase::Terminal
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Binary search window `(l, r)`.
    pub fn window(&self) -> (usize, usize) {
        (self.l, self.r)
    }

    pub fn failed_links(&self) -> &[FailedLink] {
        &self.failed
    }

    /// The segment currently being probed, if a round is outstanding.
    pub fn outstanding(&self) -> Option<(usize, usize)> {
        self.round.map(|r| (r.from, r.to))
    }

    /// Kick off the session. Runs until the first probe round is armed.
    pub fn start<C: SwitchChannel, A: Alarm>(
        &mut self,
        ctx: &ProbeContext<'_, C, A>,
    ) -> Result<Option<TraceReport>, Error> {
        self.advance(ctx, None)
    }

    /// Handle a timer expiration. Expirations for anything but the
    /// outstanding round's next step are ignored.
    pub fn on_timer<C: SwitchChannel, A: Alarm>(
        &mut self,
        ctx: &ProbeContext<'_, C, A>,
        ev: TimerEvent,
    ) -> Result<Option<TraceReport>, Error> {
        let Some(round) = self.round.filter(|r| r.id == ev.round) else {
            session_log!(self, debug, "ignoring stale timer";
                "timer" => format!("{}", ev.kind),
                "round" => ev.round
            );
            return Ok(None);
        };
        match (ev.kind, round.probe_sent) {
            (TimerKind::ProbeSend, false) => {
                self.send_probe(ctx, round)?;
                Ok(None)
            }
            (TimerKind::ProbeDeadline, true) => {
                self.finish_round(ctx, round, ProbeOutcome::Timeout)
            }
            _ => Ok(None),
        }
    }

    /// Handle a probe copied to the controller by a tap at `dpid`/`in_port`.
    pub fn on_probe_response<C: SwitchChannel, A: Alarm>(
        &mut self,
        ctx: &ProbeContext<'_, C, A>,
        dpid: Dpid,
        in_port: PortNo,
    ) -> Result<Option<TraceReport>, Error> {
        let round = match self.round {
            Some(r) if r.probe_sent => r,
            _ => {
                session_log!(self, debug, "probe response with no probe out";
                    "switch" => format!("{dpid}"),
                    "in_port" => in_port
                );
                return Ok(None);
            }
        };
        let tap = self.path.hops[round.to];
        if tap.switch != dpid || tap.ingress != in_port {
            session_log!(self, debug, "probe response from wrong tap";
                "switch" => format!("{dpid}"),
                "in_port" => in_port,
                "expected" => format!("{}:{}", tap.switch, tap.ingress)
            );
            return Ok(None);
        }
        ctx.alarm.disarm(TimerKind::ProbeDeadline);
        self.finish_round(ctx, round, ProbeOutcome::Reached)
    }

    /// Stop the session without a report. Any outstanding tap is removed on
    /// a best effort basis.
    pub fn abort<C: SwitchChannel, A: Alarm>(
        &mut self,
        ctx: &ProbeContext<'_, C, A>,
        reason: &str,
    ) {
        ctx.alarm.disarm(TimerKind::ProbeSend);
        ctx.alarm.disarm(TimerKind::ProbeDeadline);
        if let Some(round) = self.round.take() {
            let hop = self.path.hops[round.to];
            if let Err(e) = self.remove_tap(ctx, hop) {
                session_log!(self, warn, "remove tap: {}", e;
                    "switch" => format!("{}", hop.switch)
                );
            }
        }
        session_log!(self, info, "trace aborted: {}", reason);
        self.phase = Phase::Terminal;
    }

    /// Drive the phase machine forward, consuming the outcome of the round
    /// that just finished if there is one. Falls through phases until a new
    /// round is armed or the session is done.
    fn advance<C: SwitchChannel, A: Alarm>(
        &mut self,
        ctx: &ProbeContext<'_, C, A>,
        mut outcome: Option<ProbeOutcome>,
    ) -> Result<Option<TraceReport>, Error> {
        loop {
            match self.phase {
                Phase::Start => {
                    session_log!(self, info, "starting trace";
                        "path" => format!("{}", self.path)
                    );
                    self.phase = Phase::SetupSequential;
                }
                Phase::SetupSequential => {
                    self.next = 1;
                    self.sequential.clear();
                    self.phase = Phase::Sequential;
                }
                Phase::Sequential => {
                    if let Some(o) = outcome.take() {
                        let hops = self.path.switches()[..=self.next].to_vec();
                        session_log!(self, info, "tr: {} result: {}",
                            DpidList(&hops), o
                        );
                        self.sequential.push(SequentialResult {
                            hops,
                            outcome: o,
                        });
                        self.next += 1;
                    }
                    if self.next < self.path.len() {
                        self.begin_round(ctx, 0, self.next)?;
                        return Ok(None);
                    }
                    self.phase = Phase::SetupBinarySearch;
                }
                Phase::SetupBinarySearch => {
                    self.l = 0;
                    self.r = self.path.len().saturating_sub(1);
                    self.failed.clear();
                    self.probe_rounds = 0;
                    self.phase = Phase::BinarySearch;
                }
                Phase::BinarySearch => {
                    if let Some(o) = outcome.take() {
                        self.search_step(o);
                    }
                    if self.l < self.r {
                        self.mid = (self.l + self.r + 1) / 2;
                        self.probe_rounds += 1;
                        self.begin_round(ctx, self.l, self.mid)?;
                        return Ok(None);
                    }
                    self.phase = Phase::Report;
                }
                Phase::Report => {
                    let report = self.report();
                    session_log!(self, info, "trace done: {}", report;
                        "probe_rounds" => report.probe_rounds
                    );
                    self.phase = Phase::Terminal;
                    return Ok(Some(report));
                }
                Phase::Terminal => return Ok(None),
            }
        }
    }

    /// Narrow the search window with the outcome of probing `[l, mid]`.
    fn search_step(&mut self, outcome: ProbeOutcome) {
        let tested = self.path.switches()[self.l..=self.mid].to_vec();
        session_log!(self, info, "testing route: {} result: {}",
            DpidList(&tested), outcome
        );
        match outcome {
            ProbeOutcome::Reached => self.l = self.mid,
            ProbeOutcome::Timeout => self.r = self.mid - 1,
        }
        if self.l >= self.r {
            let last = self.path.len() - 1;
            if self.r < last {
                let link = FailedLink {
                    from: self.path.hops[self.r].switch,
                    to: self.path.hops[self.r + 1].switch,
                };
                session_log!(self, info, "failed link: {}", link);
                self.failed.push(link);
            }
            // Keep searching past the failure.
            self.l = self.r + 1;
            self.r = last;
        }
    }

    fn begin_round<C: SwitchChannel, A: Alarm>(
        &mut self,
        ctx: &ProbeContext<'_, C, A>,
        from: usize,
        to: usize,
    ) -> Result<(), Error> {
        let hop = self.path.hops[to];
        let tap = FlowRule::tap(
            ctx.config.tap_priority,
            hop.ingress,
            self.path.dst,
            hop.egress,
        );
        ctx.channel.install_rule(hop.switch, tap, None)?;
        let id = next_round();
        self.round = Some(Round {
            id,
            from,
            to,
            probe_sent: false,
        });
        ctx.alarm
            .arm(TimerKind::ProbeSend, id, ctx.config.probe_send_delay());
        session_log!(self, debug, "tap installed";
            "switch" => format!("{}", hop.switch),
            "in_port" => hop.ingress,
            "round" => id
        );
        Ok(())
    }

    fn send_probe<C: SwitchChannel, A: Alarm>(
        &mut self,
        ctx: &ProbeContext<'_, C, A>,
        round: Round,
    ) -> Result<(), Error> {
        let hop = self.path.hops[round.from];
        let frame = probe_frame(
            self.path.src,
            self.path.dst,
            ctx.config.probe_sentinel,
        );
        ctx.channel.packet_out(
            hop.switch,
            InPort::Controller,
            vec![Action::Output(hop.egress)],
            Payload::Data(frame),
        )?;
        self.round = Some(Round {
            probe_sent: true,
            ..round
        });
        ctx.alarm.arm(
            TimerKind::ProbeDeadline,
            round.id,
            ctx.config.probe_timeout(),
        );
        session_log!(self, debug, "probe sent";
            "switch" => format!("{}", hop.switch),
            "out_port" => hop.egress,
            "round" => round.id
        );
        Ok(())
    }

    fn finish_round<C: SwitchChannel, A: Alarm>(
        &mut self,
        ctx: &ProbeContext<'_, C, A>,
        round: Round,
        outcome: ProbeOutcome,
    ) -> Result<Option<TraceReport>, Error> {
        // The round stays outstanding until its tap is gone so an abort
        // still knows what to clean up.
        self.remove_tap(ctx, self.path.hops[round.to])?;
        self.round = None;
        self.advance(ctx, Some(outcome))
    }

    fn remove_tap<C: SwitchChannel, A: Alarm>(
        &self,
        ctx: &ProbeContext<'_, C, A>,
        hop: Hop,
    ) -> Result<(), Error> {
        ctx.channel.remove_rule(
            hop.switch,
            FlowMatch::exact(hop.ingress, self.path.dst),
            ctx.config.tap_priority,
        )
    }

    fn report(&self) -> TraceReport {
        TraceReport {
            src: self.src_id.clone(),
            dst: self.dst_id.clone(),
            path: self.path.clone(),
            sequential: self.sequential.clone(),
            failed_links: self.failed.clone(),
            probe_rounds: self.probe_rounds,
        }
    }
}
