// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared plumbing for the fault localization controller crates: lock
//! helpers, logger construction and test macros.

pub mod log;
pub mod test;

/// Lock a mutex, panicking if the mutex has been poisoned. A poisoned mutex
/// means another thread panicked while holding controller or dataplane
/// state, at which point there is nothing sensible left to do.
#[macro_export]
macro_rules! lock {
    ($mtx:expr) => {
        $mtx.lock().expect("lock mutex")
    };
}
