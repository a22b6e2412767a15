//! Result publishing
//!
//! After settlement the scheduler hands a [`PublishBatch`] to the
//! [`ResultPublisher`], which fans it out to every registered
//! [`ResultSink`] (agent inboxes, persistence writers, dashboards).
//!
//! # Critical Invariants
//!
//! 1. **Bounded Wait**: one publish never blocks longer than the configured
//!    timeout; slow sinks are reported, not waited for
//! 2. **Ordering**: each sink receives batches in run order
//! 3. **Exactly Once**: [`InboxRegistry`] delivers each result to its agent once
//!
//! Sinks run on dedicated worker threads, so a stalled consumer only delays
//! its own queue.

pub mod inbox;
pub mod worker;

pub use inbox::InboxRegistry;
pub use worker::ResultPublisher;

use crate::models::{Event, MarketResult};
use crate::scheduler::RunSummary;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything published for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishBatch {
    pub summary: RunSummary,
    /// One result per order, in ID order
    pub results: Vec<MarketResult>,
    /// Events logged since the previous batch
    pub events: Vec<Event>,
}

/// Delivery failure reported by a sink
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink rejected batch: {0}")]
    Rejected(String),

    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Consumer of published runs
///
/// `deliver` runs on the sink's own worker thread. An error triggers a
/// redelivery of the same batch until the retry budget is spent.
pub trait ResultSink: Send + 'static {
    /// Name used in logs and publish events
    fn name(&self) -> &str;

    fn deliver(&mut self, batch: &PublishBatch) -> Result<(), SinkError>;
}

/// Per-sink result of one publish, by sink name in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub delivered: Vec<String>,
    /// No acknowledgement within the timeout (or the sink's queue was full)
    pub timed_out: Vec<String>,
    /// `(sink, reason)` for sinks that failed after all retries
    pub failed: Vec<(String, String)>,
}

impl PublishOutcome {
    pub fn all_delivered(&self) -> bool {
        self.timed_out.is_empty() && self.failed.is_empty()
    }
}
