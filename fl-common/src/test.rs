// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test utilities and macros for use across multiple crates.

/// Polling period for `wait_for!` in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 10;

/// Number of polls `wait_for!` makes before giving up (5 seconds).
pub const DEFAULT_ITERATIONS: u64 = 500;

#[macro_export]
macro_rules! wait_for_eq {
    ($lhs:expr, $rhs:expr, $period:expr, $count:expr) => {
        $crate::wait_for!($lhs, ==, $rhs, $period, $count);
    };
    ($lhs:expr, $rhs:expr) => {
        $crate::wait_for!(
            $lhs,
            ==,
            $rhs,
            $crate::test::DEFAULT_INTERVAL_MS,
            $crate::test::DEFAULT_ITERATIONS
        );
    };
}

/// Poll a comparison until it holds, sleeping `$period` milliseconds between
/// attempts. After `$count` failed attempts the comparison is asserted so the
/// test fails with both sides printed.
#[macro_export]
macro_rules! wait_for {
    ($lhs:expr, $op:tt, $rhs:expr, $period:expr, $count:expr) => {
        let mut ok = false;
        for _ in 0..$count {
            if $lhs $op $rhs {
                ok = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis($period));
        }
        if !ok {
            assert!($lhs $op $rhs, "{:?} {} {:?}", $lhs, stringify!($op), $rhs);
        }
    };
    ($lhs:expr, $op:tt, $rhs:expr) => {
        $crate::wait_for!(
            $lhs,
            $op,
            $rhs,
            $crate::test::DEFAULT_INTERVAL_MS,
            $crate::test::DEFAULT_ITERATIONS
        );
    };
}
