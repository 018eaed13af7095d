//! Memory-touch and timing counters
//!
//! The access count is a proxy for the memory access pattern a query leaves
//! behind: one tick per comparison that reads the resident dataset. Timings
//! are cumulative microseconds per phase. None of this feeds back into query
//! results.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Phases timed by [`Instrumentation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Decrypt,
    Process,
    Encrypt,
    Total,
}

/// Snapshot of the cumulative phase timings, in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingReport {
    pub decrypt_us: u64,
    pub process_us: u64,
    pub encrypt_us: u64,
    pub total_us: u64,
}

impl TimingReport {
    /// Phase-wise saturating sum of two reports
    pub fn combined(self, other: TimingReport) -> TimingReport {
        TimingReport {
            decrypt_us: self.decrypt_us.saturating_add(other.decrypt_us),
            process_us: self.process_us.saturating_add(other.process_us),
            encrypt_us: self.encrypt_us.saturating_add(other.encrypt_us),
            total_us: self.total_us.saturating_add(other.total_us),
        }
    }
}

/// Counters scoped to the current resident dataset
#[derive(Debug, Default)]
pub struct Instrumentation {
    access_count: u64,
    timing: TimingReport,
}

impl Instrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one read of the resident dataset
    #[inline]
    pub fn touch(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn timing(&self) -> TimingReport {
        self.timing
    }

    pub fn record(&mut self, phase: Phase, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let slot = match phase {
            Phase::Decrypt => &mut self.timing.decrypt_us,
            Phase::Process => &mut self.timing.process_us,
            Phase::Encrypt => &mut self.timing.encrypt_us,
            Phase::Total => &mut self.timing.total_us,
        };
        *slot = slot.saturating_add(us);
    }

    /// Runs `f`, charging its wall time to `phase`
    pub fn timed<T>(&mut self, phase: Phase, f: impl FnOnce(&mut Self) -> T) -> T {
        let start = Instant::now();
        let out = f(self);
        self.record(phase, start.elapsed());
        out
    }

    /// Zeroes every counter
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_saturates() {
        let a = TimingReport {
            decrypt_us: 1,
            process_us: u64::MAX,
            encrypt_us: 3,
            total_us: 4,
        };
        let b = TimingReport {
            decrypt_us: 10,
            process_us: 1,
            encrypt_us: 0,
            total_us: 40,
        };
        let sum = a.combined(b);
        assert_eq!(sum.decrypt_us, 11);
        assert_eq!(sum.process_us, u64::MAX);
        assert_eq!(sum.encrypt_us, 3);
        assert_eq!(sum.total_us, 44);
    }

    #[test]
    fn test_touch_and_reset() {
        let mut meter = Instrumentation::new();
        meter.touch();
        meter.touch();
        assert_eq!(meter.access_count(), 2);
        meter.record(Phase::Process, Duration::from_micros(5));
        meter.reset();
        assert_eq!(meter.access_count(), 0);
        assert_eq!(meter.timing(), TimingReport::default());
    }

    #[test]
    fn test_record_accumulates_per_phase() {
        let mut meter = Instrumentation::new();
        meter.record(Phase::Decrypt, Duration::from_micros(10));
        meter.record(Phase::Decrypt, Duration::from_micros(15));
        meter.record(Phase::Encrypt, Duration::from_micros(3));
        meter.record(Phase::Total, Duration::from_millis(1));

        let timing = meter.timing();
        assert_eq!(timing.decrypt_us, 25);
        assert_eq!(timing.process_us, 0);
        assert_eq!(timing.encrypt_us, 3);
        assert_eq!(timing.total_us, 1000);
    }

    #[test]
    fn test_counters_saturate() {
        let mut meter = Instrumentation::new();
        meter.record(Phase::Total, Duration::MAX);
        meter.record(Phase::Total, Duration::MAX);
        assert_eq!(meter.timing().total_us, u64::MAX);
    }

    #[test]
    fn test_timed_passes_meter_through() {
        let mut meter = Instrumentation::new();
        let out = meter.timed(Phase::Process, |m| {
            m.touch();
            7
        });
        assert_eq!(out, 7);
        assert_eq!(meter.access_count(), 1);
    }
}
