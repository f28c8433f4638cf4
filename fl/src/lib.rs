// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Control-plane core of a learning switch controller with active fault
//! localization.
//!
//! The controller learns where hosts live, installs exact-match forwarding
//! rules along multi-hop paths, and on request walks an established path
//! with synthetic probes to find the first failed link. Probing uses a
//! temporary "tap" rule that both forwards and mirrors matching traffic to
//! the controller, so the controller learns whether a probe reached a given
//! hop without disturbing live traffic.
//!
//! Everything in this crate is driven by [`controller::Event`]s handled on a
//! single worker. Switch programming happens through the
//! [`channel::SwitchChannel`] trait and timers through [`clock::Alarm`].

pub mod channel;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod fwd;
pub mod learning;
pub mod log;
pub mod packet;
pub mod resolver;
pub mod session;
pub mod topology;
pub mod types;

#[cfg(test)]
mod test;

pub use controller::{AdminEvent, Controller, Event};
pub use error::Error;

pub const COMPONENT_FL: &str = "fl";
pub const MOD_CONTROLLER: &str = "controller";
pub const MOD_LEARNING: &str = "learning";
pub const MOD_SESSION: &str = "session";
pub const MOD_CLOCK: &str = "clock";
