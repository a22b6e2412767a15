//! Interval scheduler
//!
//! Owns one market's sequence of clearing runs. See `engine.rs` for the
//! state machine.

pub mod config;
pub mod engine;
pub mod run;

pub use config::{ConfigError, MarketConfig};
pub use engine::{IntervalScheduler, SchedulerError, SchedulerState};
pub use run::{result_digest, RunReport, RunStatus, RunSummary, EMPTY_RESULTS_DIGEST};
