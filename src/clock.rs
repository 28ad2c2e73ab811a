//! Translation of record timestamps into the unified trace-time clock.
//!
//! perf records carry CLOCK_MONOTONIC nanoseconds. For perf sessions the
//! trace-time clock is set to MONOTONIC, making translation the identity;
//! other domains translate through a registered offset and fail without one.
//! A failed translation skips the record upstream, it never aborts the
//! pipeline.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockDomain {
    Monotonic,
    Realtime,
    Boottime,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockError {
    #[error("no conversion path from clock {0:?} to trace time")]
    Untranslatable(ClockDomain),
    #[error("timestamp {0} does not fit in trace time")]
    OutOfRange(u64),
}

pub struct ClockTracker {
    trace_time_clock: ClockDomain,
    offsets: HashMap<ClockDomain, i64>,
}

impl ClockTracker {
    pub fn new() -> Self {
        Self {
            trace_time_clock: ClockDomain::Boottime,
            offsets: HashMap::new(),
        }
    }

    pub fn set_trace_time_clock(&mut self, domain: ClockDomain) {
        self.trace_time_clock = domain;
    }

    pub fn trace_time_clock(&self) -> ClockDomain {
        self.trace_time_clock
    }

    /// Registers `trace_time = ts + offset` for a non-trace-time domain.
    pub fn set_clock_offset(&mut self, domain: ClockDomain, offset: i64) {
        self.offsets.insert(domain, offset);
    }

    pub fn to_trace_time(&self, domain: ClockDomain, ts: u64) -> Result<i64, ClockError> {
        let ts = i64::try_from(ts).map_err(|_| ClockError::OutOfRange(ts))?;
        if domain == self.trace_time_clock {
            return Ok(ts);
        }
        match self.offsets.get(&domain) {
            Some(offset) => Ok(ts + offset),
            None => Err(ClockError::Untranslatable(domain)),
        }
    }
}

impl Default for ClockTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_time_clock_is_identity() {
        let mut tracker = ClockTracker::new();
        tracker.set_trace_time_clock(ClockDomain::Monotonic);
        assert_eq!(tracker.to_trace_time(ClockDomain::Monotonic, 1234), Ok(1234));
    }

    #[test]
    fn test_unknown_domain_fails() {
        let mut tracker = ClockTracker::new();
        tracker.set_trace_time_clock(ClockDomain::Monotonic);
        assert_eq!(
            tracker.to_trace_time(ClockDomain::Realtime, 10),
            Err(ClockError::Untranslatable(ClockDomain::Realtime))
        );
    }

    #[test]
    fn test_offset_translation() {
        let mut tracker = ClockTracker::new();
        tracker.set_trace_time_clock(ClockDomain::Monotonic);
        tracker.set_clock_offset(ClockDomain::Realtime, -100);
        assert_eq!(tracker.to_trace_time(ClockDomain::Realtime, 250), Ok(150));
    }

    #[test]
    fn test_out_of_range_timestamp() {
        let tracker = ClockTracker::new();
        assert_eq!(
            tracker.to_trace_time(ClockDomain::Boottime, u64::MAX),
            Err(ClockError::OutOfRange(u64::MAX))
        );
    }
}
