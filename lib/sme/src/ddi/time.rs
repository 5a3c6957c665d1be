// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Moments in monotonic time.

use core::ops::Add;
use core::time::Duration;
use std::sync::OnceLock;
use std::time::Instant;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;
/// The number of nanoseconds in a second.
pub const NANOS: u64 = 1_000_000_000;

static FIRST_TS: OnceLock<Instant> = OnceLock::new();

/// A moment in monotonic time.
///
/// Internally this is a duration since the first moment the process
/// observed, which lets a raw nanosecond count round-trip through dump
/// types without reference to wall-clock time.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Moment {
    inner: Duration,
}

impl Moment {
    pub fn now() -> Self {
        let first_ts = *FIRST_TS.get_or_init(Instant::now);
        Self { inner: Instant::now().saturating_duration_since(first_ts) }
    }

    /// Compute the delta between `self - earlier` and return it as
    /// milliseconds, saturating to zero if `earlier` is later.
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        let delta = self.inner.saturating_sub(earlier.inner);
        delta.as_secs() * MILLIS + u64::from(delta.subsec_millis())
    }

    /// The underlying timestamp, in nanoseconds, for dumps.
    pub fn raw(&self) -> u64 {
        self.inner.as_nanos() as u64
    }
}

impl Add<Duration> for Moment {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Moment { inner: self.inner + rhs }
    }
}

impl Default for Moment {
    fn default() -> Self {
        Self::now()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delta_saturates() {
        let a = Moment::now();
        let b = a + Duration::from_millis(250);
        assert_eq!(b.delta_as_millis(a), 250);
        assert_eq!(a.delta_as_millis(b), 0);
    }
}
