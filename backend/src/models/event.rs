//! Event logging for market runs.
//!
//! This module defines the Event enum which captures every lifecycle step of
//! the clearing runs of one market instance. Events enable:
//! - Telemetry (forwarded with each published batch)
//! - Debugging (understand what happened in which run)
//! - Auditing (solver failures, infeasible intervals, slow consumers)
//!
//! # Event Types
//!
//! Events are categorized by run phase:
//! - **Open/Close**: bidding window lifecycle with submission counters
//! - **Clearing**: method used, welfare, infeasible intervals, solver failures
//! - **Settlement**: final interval prices
//! - **Publishing**: slow or failing result consumers
//! - **Lifecycle**: aborted runs and simulation end
//!
//! # Example
//!
//! ```rust
//! use market_clearing_core_rs::models::Event;
//! use market_clearing_core_rs::models::order_book::RunId;
//!
//! let event = Event::NoClearing {
//!     run_id: RunId(4),
//!     interval: 17,
//! };
//!
//! assert_eq!(event.run_id(), Some(RunId(4)));
//! assert_eq!(event.event_type(), "NoClearing");
//! ```

use crate::clearing::ClearingMethod;
use crate::models::order_book::RunId;
use crate::settlement::PricingPolicy;
use serde::{Deserialize, Serialize};

/// Market event capturing a run state change.
///
/// Events are logged in the order they occur.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Event {
    /// Bidding window opened
    RunOpened {
        run_id: RunId,
        first_interval: usize,
        last_interval: usize,
    },

    /// Bidding window closed; book frozen
    RunClosed {
        run_id: RunId,
        orders: usize,
        rejected_invalid: usize,
        rejected_late: usize,
    },

    /// Clearing algorithm produced accepted volumes
    RunCleared {
        run_id: RunId,
        method: ClearingMethod,
        accepted_orders: usize,
        welfare: f64,
    },

    /// No volume could be cleared in an interval (economic infeasibility)
    NoClearing { run_id: RunId, interval: usize },

    /// Optimization could not produce a solution; run failed
    SolverFailure { run_id: RunId, reason: String },

    /// Settlement prices fixed and results handed to the publisher
    RunSettled {
        run_id: RunId,
        pricing_policy: PricingPolicy,
        clearing_prices: Vec<(usize, Option<f64>)>,
    },

    /// A result consumer did not acknowledge within the timeout
    PublishTimeout { run_id: RunId, sink: String },

    /// A result consumer rejected the batch or is gone
    PublishFailed {
        run_id: RunId,
        sink: String,
        reason: String,
    },

    /// Run discarded before clearing
    RunAborted { run_id: RunId },

    /// Scheduler reached its terminal state
    SimulationFinished { runs_completed: usize },
}

impl Event {
    /// Get the run this event belongs to
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            Event::RunOpened { run_id, .. }
            | Event::RunClosed { run_id, .. }
            | Event::RunCleared { run_id, .. }
            | Event::NoClearing { run_id, .. }
            | Event::SolverFailure { run_id, .. }
            | Event::RunSettled { run_id, .. }
            | Event::PublishTimeout { run_id, .. }
            | Event::PublishFailed { run_id, .. }
            | Event::RunAborted { run_id } => Some(*run_id),
            Event::SimulationFinished { .. } => None,
        }
    }

    /// Get a short description of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::RunOpened { .. } => "RunOpened",
            Event::RunClosed { .. } => "RunClosed",
            Event::RunCleared { .. } => "RunCleared",
            Event::NoClearing { .. } => "NoClearing",
            Event::SolverFailure { .. } => "SolverFailure",
            Event::RunSettled { .. } => "RunSettled",
            Event::PublishTimeout { .. } => "PublishTimeout",
            Event::PublishFailed { .. } => "PublishFailed",
            Event::RunAborted { .. } => "RunAborted",
            Event::SimulationFinished { .. } => "SimulationFinished",
        }
    }
}

/// Event log for storing and querying market events.
///
/// This is a simple wrapper around Vec<Event> with convenience methods.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Add an event to the log
    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Get the number of events logged
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Get all events
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Events logged at or after position `start`
    pub fn events_since(&self, start: usize) -> &[Event] {
        &self.events[start.min(self.events.len())..]
    }

    /// Get events for a specific run
    pub fn events_for_run(&self, run_id: RunId) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.run_id() == Some(run_id))
            .collect()
    }

    /// Get events of a specific type
    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_log_query_by_run() {
        let mut log = EventLog::new();
        log.log(Event::RunOpened {
            run_id: RunId(0),
            first_interval: 0,
            last_interval: 23,
        });
        log.log(Event::RunAborted { run_id: RunId(0) });
        log.log(Event::RunOpened {
            run_id: RunId(1),
            first_interval: 24,
            last_interval: 47,
        });
        log.log(Event::SimulationFinished { runs_completed: 2 });

        assert_eq!(log.events_for_run(RunId(0)).len(), 2);
        assert_eq!(log.events_of_type("RunOpened").len(), 2);
        assert_eq!(log.events_since(3).len(), 1);
        assert!(log.events_since(10).is_empty());
    }
}
