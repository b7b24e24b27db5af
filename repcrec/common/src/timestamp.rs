//! Logical time for the simulated data store.
//!
//! Every operation handed to the engine carries a [`Timestamp`]. Time is never read from a
//! shared global: the driver owns the tick counter and the engine only checks, through
//! [`LogicalClock`], that the values it receives never go backwards.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TimestampError;

/// A logical point in time, counted in driver ticks.
///
/// Tick `0` is reserved for the initial versions every site starts with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The commit time of the initial database image.
    pub const ZERO: Self = Self(0);

    /// Create a timestamp from a raw tick.
    #[inline]
    pub const fn with_ts(tick: u64) -> Self {
        Self(tick)
    }

    /// Returns the raw tick.
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Returns the following tick.
    pub fn next(&self) -> Result<Self, TimestampError> {
        self.0
            .checked_add(1)
            .map(Self)
            .ok_or(TimestampError::Overflow(self.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(tick: u64) -> Self {
        Self(tick)
    }
}

/// Monotonic guard over the timestamps handed to the engine.
#[derive(Debug, Clone, Default)]
pub struct LogicalClock {
    current: Timestamp,
}

impl LogicalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest timestamp observed so far.
    #[inline]
    pub fn current(&self) -> Timestamp {
        self.current
    }

    /// Move the clock to `ts`.
    ///
    /// Equal timestamps are accepted: several engine calls may share one driver tick (a new
    /// command plus the retries it unblocks).
    pub fn advance_to(&mut self, ts: Timestamp) -> Result<(), TimestampError> {
        if ts < self.current {
            return Err(TimestampError::Regression {
                current: self.current,
                given: ts,
            });
        }
        self.current = ts;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::ZERO < Timestamp::with_ts(1));
        assert_eq!(Timestamp::with_ts(41).next().unwrap(), Timestamp::with_ts(42));
        assert!(Timestamp::with_ts(u64::MAX).next().is_err());
    }

    #[test]
    fn test_clock_accepts_equal_and_later() {
        let mut clock = LogicalClock::new();
        clock.advance_to(Timestamp::with_ts(3)).unwrap();
        clock.advance_to(Timestamp::with_ts(3)).unwrap();
        clock.advance_to(Timestamp::with_ts(7)).unwrap();
        assert_eq!(clock.current(), Timestamp::with_ts(7));
    }

    #[test]
    fn test_clock_rejects_regression() {
        let mut clock = LogicalClock::new();
        clock.advance_to(Timestamp::with_ts(5)).unwrap();
        let err = clock.advance_to(Timestamp::with_ts(4)).unwrap_err();
        assert_eq!(err.to_string(), "clock went backwards: current 5, given 4");
        assert_eq!(clock.current(), Timestamp::with_ts(5));
    }
}
