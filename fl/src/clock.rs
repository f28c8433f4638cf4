// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::controller::Event;
use crate::log::clock_log;
use fl_common::lock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{sleep, spawn, JoinHandle};
use std::time::Duration;

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
pub enum TimerKind {
    /// Fires once a freshly installed tap has had time to land, at which
    /// point the probe is sent.
    ProbeSend,
    /// Fires when a sent probe has not been seen in time.
    ProbeDeadline,
}

impl Display for TimerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::ProbeSend => write!(f, "probe send"),
            TimerKind::ProbeDeadline => write!(f, "probe deadline"),
        }
    }
}

/// Delivered to the controller when an armed timer runs out. `round`
/// identifies the probe round the timer was armed for so that expirations
/// belonging to an earlier round can be told apart.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimerEvent {
    pub kind: TimerKind,
    pub round: u64,
}

/// Something that can schedule timer events for the controller.
pub trait Alarm {
    /// Arm timer `kind` to fire once after `after`, replacing any pending
    /// expiration of the same kind.
    fn arm(&self, kind: TimerKind, round: u64, after: Duration);

    /// Cancel a pending expiration of timer `kind`, if any.
    fn disarm(&self, kind: TimerKind);
}

impl<T: Alarm + ?Sized> Alarm for Arc<T> {
    fn arm(&self, kind: TimerKind, round: u64, after: Duration) {
        (**self).arm(kind, round, after)
    }

    fn disarm(&self, kind: TimerKind) {
        (**self).disarm(kind)
    }
}

pub struct ClockTimers {
    /// Delay between installing a tap and sending the probe.
    pub probe_send: Timer,

    /// How long to wait for a sent probe to show up at the tap.
    pub probe_deadline: Timer,
}

impl ClockTimers {
    pub fn get(&self, kind: TimerKind) -> &Timer {
        match kind {
            TimerKind::ProbeSend => &self.probe_send,
            TimerKind::ProbeDeadline => &self.probe_deadline,
        }
    }
}

/// A thread that ticks the controller's timers at a fixed resolution and
/// sends an [`Event::Timer`] for each expiration.
pub struct Clock {
    pub resolution: Duration,
    pub timers: Arc<ClockTimers>,
    pub join_handle: Option<JoinHandle<()>>,

    shutdown: Arc<AtomicBool>,
}

impl Clock {
    pub fn new(resolution: Duration, s: Sender<Event>, log: Logger) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let timers = Arc::new(ClockTimers {
            probe_send: Timer::new(),
            probe_deadline: Timer::new(),
        });
        let join_handle = Some(Self::run(
            resolution,
            timers.clone(),
            s,
            shutdown.clone(),
            log,
        ));
        Self {
            resolution,
            timers,
            join_handle,
            shutdown,
        }
    }

    fn run(
        resolution: Duration,
        timers: Arc<ClockTimers>,
        s: Sender<Event>,
        shutdown: Arc<AtomicBool>,
        log: Logger,
    ) -> JoinHandle<()> {
        spawn(move || loop {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            Self::step_all(resolution, &timers, &s, &log);
            sleep(resolution);
        })
    }

    fn step_all(
        resolution: Duration,
        timers: &ClockTimers,
        s: &Sender<Event>,
        log: &Logger,
    ) {
        for kind in [TimerKind::ProbeSend, TimerKind::ProbeDeadline] {
            Self::step(resolution, timers.get(kind), kind, s, log);
        }
    }

    fn step(
        resolution: Duration,
        t: &Timer,
        kind: TimerKind,
        s: &Sender<Event>,
        log: &Logger,
    ) {
        t.tick(resolution);
        if let Some(round) = t.take_expired() {
            let event = TimerEvent { kind, round };
            if let Err(e) = s.send(Event::Timer(event)) {
                clock_log!(log, error, "send timer event: {}", e;
                    "timer" => format!("{kind}"),
                    "round" => round
                );
            }
        }
    }
}

impl Alarm for Clock {
    fn arm(&self, kind: TimerKind, round: u64, after: Duration) {
        self.timers.get(kind).arm(round, after);
    }

    fn disarm(&self, kind: TimerKind) {
        self.timers.get(kind).disable();
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct TimerState {
    enabled: bool,
    remaining: Duration,
    round: u64,
}

/// A one-shot countdown timer.
#[derive(Clone, Default)]
pub struct Timer {
    value: Arc<Mutex<TimerState>>,
}

impl Timer {
    /// Create a new, disabled timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the timer to expire after `after`, tagged with `round`.
    pub fn arm(&self, round: u64, after: Duration) {
        let mut value = lock!(self.value);
        value.enabled = true;
        value.remaining = after;
        value.round = round;
    }

    /// Make the timer tick, decrementing the value by the specified
    /// resolution. Saturates at zero.
    pub fn tick(&self, resolution: Duration) {
        let mut value = lock!(self.value);
        if value.enabled {
            value.remaining = value.remaining.saturating_sub(resolution);
        }
    }

    /// Returns true if the timer is enabled.
    pub fn enabled(&self) -> bool {
        lock!(self.value).enabled
    }

    /// Disable the timer. Only enabled timers can expire.
    pub fn disable(&self) {
        lock!(self.value).enabled = false
    }

    /// If the timer is enabled and has ticked down to zero, disable it and
    /// return the round it was armed for.
    pub fn take_expired(&self) -> Option<u64> {
        let mut value = lock!(self.value);
        if value.enabled && value.remaining.is_zero() {
            value.enabled = false;
            Some(value.round)
        } else {
            None
        }
    }
}
