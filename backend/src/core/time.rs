//! Simulated market time
//!
//! The market operates in fixed-length delivery intervals. Intervals are
//! grouped into clearing runs; each run covers `run_horizon_intervals`
//! consecutive intervals. This module provides deterministic advancement
//! of the interval cursor.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Tracks the next interval to be offered and the number of completed runs
///
/// # Example
/// ```
/// use market_clearing_core_rs::IntervalClock;
///
/// let mut clock = IntervalClock::new(60, 24, 0); // hourly, day-ahead batches
/// assert_eq!(clock.next_run_range(), 0..24);
///
/// clock.advance_run();
/// assert_eq!(clock.current_interval(), 24);
/// assert_eq!(clock.runs_completed(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalClock {
    /// First interval of the next run
    current_interval: usize,
    /// Length of one interval in minutes
    interval_duration_minutes: u32,
    /// Intervals batched per run
    run_horizon_intervals: usize,
    /// Runs completed (settled or aborted) so far
    runs_completed: usize,
}

impl IntervalClock {
    /// Create a new clock starting at `first_interval`
    ///
    /// # Panics
    /// Panics if the interval duration or run horizon is zero. Market
    /// configuration is validated before a clock is built.
    pub fn new(
        interval_duration_minutes: u32,
        run_horizon_intervals: usize,
        first_interval: usize,
    ) -> Self {
        assert!(
            interval_duration_minutes > 0,
            "interval_duration_minutes must be positive"
        );
        assert!(
            run_horizon_intervals > 0,
            "run_horizon_intervals must be positive"
        );
        Self {
            current_interval: first_interval,
            interval_duration_minutes,
            run_horizon_intervals,
            runs_completed: 0,
        }
    }

    /// Interval index the next run starts at
    pub fn current_interval(&self) -> usize {
        self.current_interval
    }

    /// Number of runs completed so far
    pub fn runs_completed(&self) -> usize {
        self.runs_completed
    }

    /// Interval length in minutes
    pub fn interval_duration_minutes(&self) -> u32 {
        self.interval_duration_minutes
    }

    /// Interval length in hours (converts MW into MWh)
    ///
    /// # Example
    /// ```
    /// use market_clearing_core_rs::IntervalClock;
    ///
    /// let clock = IntervalClock::new(15, 4, 0);
    /// assert_eq!(clock.interval_hours(), 0.25);
    /// ```
    pub fn interval_hours(&self) -> f64 {
        f64::from(self.interval_duration_minutes) / 60.0
    }

    /// Interval range covered by the next run (half-open)
    pub fn next_run_range(&self) -> Range<usize> {
        self.current_interval..self.current_interval + self.run_horizon_intervals
    }

    /// Advance past the intervals of one run
    pub fn advance_run(&mut self) {
        self.current_interval += self.run_horizon_intervals;
        self.runs_completed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "run_horizon_intervals must be positive")]
    fn test_zero_run_horizon_panics() {
        IntervalClock::new(60, 0, 0);
    }

    #[test]
    fn test_runs_advance_by_horizon() {
        let mut clock = IntervalClock::new(60, 3, 5);
        assert_eq!(clock.next_run_range(), 5..8);
        clock.advance_run();
        clock.advance_run();
        assert_eq!(clock.next_run_range(), 11..14);
        assert_eq!(clock.runs_completed(), 2);
    }
}
