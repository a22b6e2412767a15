//! Interval scheduler - the market's run loop
//!
//! Drives one market instance through repeated clearing runs:
//!
//! ```text
//! Idle ──open──▶ Open ──close──▶ Closed ──clear──▶ Cleared ──settle──▶ Settled
//!   ▲              │                │                                     │
//!   │              └─────abort──────┘                                   advance
//!   └──────────────────────────(runs remaining)───────────────────────────┘
//!                                                    (horizon reached) ──▶ Finished
//! ```
//!
//! Each run offers `run_horizon_intervals` consecutive intervals. After the
//! run is settled (or aborted) the clock moves past those intervals.
//!
//! # Critical Invariants
//!
//! 1. **Sequential Runs**: at most one run exists at a time
//! 2. **Clear Once**: each closed book is cleared exactly once
//! 3. **Always Advance**: a failed solver still produces a settled (all
//!    rejected) run and the clock moves on
//! 4. **Terminal Finish**: every transition after `Finished` fails
//!
//! # Example
//!
//! ```rust
//! use market_clearing_core_rs::scheduler::{IntervalScheduler, MarketConfig, SchedulerState};
//! use market_clearing_core_rs::{OrderRequest, Side};
//!
//! let config = MarketConfig {
//!     run_horizon_intervals: 2,
//!     simulation_horizon: 3,
//!     ..MarketConfig::default()
//! };
//! let mut scheduler = IntervalScheduler::new(config).unwrap();
//!
//! let reports = scheduler
//!     .run_to_completion(|handle| {
//!         let first = handle.intervals().start;
//!         handle.submit(OrderRequest::simple("LOAD", Side::Demand, 90.0, 5.0, first)).unwrap();
//!         handle.submit(OrderRequest::simple("PLANT", Side::Supply, 30.0, 5.0, first)).unwrap();
//!     })
//!     .unwrap();
//!
//! assert_eq!(reports.len(), 3);
//! assert_eq!(scheduler.state(), SchedulerState::Finished);
//! assert_eq!(scheduler.clock().current_interval(), 6);
//! ```

use crate::clearing::{ClearingEngine, ClearingOutcome, MilpSolver, SolverError};
use crate::core::time::IntervalClock;
use crate::models::{
    AgentId, ClosedOrderBook, Event, EventLog, OpenOrderBook, RunId, SubmissionHandle,
    SubmissionRules,
};
use crate::publisher::{PublishBatch, ResultPublisher, ResultSink};
use crate::scheduler::config::{ConfigError, MarketConfig};
use crate::scheduler::run::{RunReport, RunStatus, RunSummary};
use crate::settlement::{self, SettlementPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

// ============================================================================
// State & errors
// ============================================================================

/// Externally visible scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerState {
    Idle,
    Open,
    Closed,
    Cleared,
    Settled,
    Finished,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Open => "open",
            SchedulerState::Closed => "closed",
            SchedulerState::Cleared => "cleared",
            SchedulerState::Settled => "settled",
            SchedulerState::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Scheduler error types
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        from: SchedulerState,
        action: &'static str,
    },

    #[error("Scheduler has finished")]
    Finished,

    #[error("Failed to start sink worker: {0}")]
    SinkWorker(#[from] io::Error),

    #[error("Failed to serialize run results: {0}")]
    Digest(#[source] serde_json::Error),
}

/// Current run, owned by the state machine
enum Phase {
    Idle,
    Open {
        book: OpenOrderBook,
    },
    Closed {
        book: ClosedOrderBook,
    },
    Cleared {
        book: ClosedOrderBook,
        outcome: Result<ClearingOutcome, SolverError>,
    },
    Settled {
        report: Arc<RunReport>,
    },
    Finished,
}

impl Phase {
    fn state(&self) -> SchedulerState {
        match self {
            Phase::Idle => SchedulerState::Idle,
            Phase::Open { .. } => SchedulerState::Open,
            Phase::Closed { .. } => SchedulerState::Closed,
            Phase::Cleared { .. } => SchedulerState::Cleared,
            Phase::Settled { .. } => SchedulerState::Settled,
            Phase::Finished => SchedulerState::Finished,
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Owns one market's run sequence
///
/// Several schedulers can coexist; nothing is global.
pub struct IntervalScheduler {
    config: Arc<MarketConfig>,
    clock: IntervalClock,
    engine: ClearingEngine,
    policy: Box<dyn SettlementPolicy>,
    publisher: ResultPublisher,
    phase: Phase,

    /// ID of the next run to open
    next_run_id: u64,

    /// Order IDs stay unique across runs
    next_order_id: u64,

    registered_agents: BTreeSet<AgentId>,

    /// Archived summaries, one per completed run
    history: Vec<RunSummary>,

    event_log: EventLog,

    /// Event log position already included in a published batch
    publish_cursor: usize,

    last_report: Option<Arc<RunReport>>,
}

impl IntervalScheduler {
    /// Create a scheduler using the bundled solver
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] if the configuration is invalid.
    pub fn new(config: MarketConfig) -> Result<Self, SchedulerError> {
        let engine = ClearingEngine::new(config.solver, config.marginal_price_rule);
        Self::build(config, engine)
    }

    /// Create a scheduler clearing with a custom solver
    pub fn with_solver(
        config: MarketConfig,
        solver: Box<dyn MilpSolver>,
    ) -> Result<Self, SchedulerError> {
        let engine = ClearingEngine::with_solver(solver, config.marginal_price_rule);
        Self::build(config, engine)
    }

    fn build(config: MarketConfig, engine: ClearingEngine) -> Result<Self, SchedulerError> {
        config.validate()?;

        let clock = IntervalClock::new(
            config.interval_duration_minutes,
            config.run_horizon_intervals,
            config.first_interval,
        );
        let publisher = ResultPublisher::new(
            config.publish_timeout(),
            config.publish_max_retries,
            config.publish_queue_capacity,
        );
        let policy = config.pricing_policy.build();

        info!(
            market = %config.name,
            pricing = policy.name(),
            solver = engine.solver_name(),
            runs = config.simulation_horizon,
            "market scheduler created"
        );

        Ok(Self {
            config: Arc::new(config),
            clock,
            engine,
            policy,
            publisher,
            phase: Phase::Idle,
            next_run_id: 0,
            next_order_id: 1,
            registered_agents: BTreeSet::new(),
            history: Vec::new(),
            event_log: EventLog::new(),
            publish_cursor: 0,
            last_report: None,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> SchedulerState {
        self.phase.state()
    }

    pub fn config(&self) -> &Arc<MarketConfig> {
        &self.config
    }

    pub fn clock(&self) -> &IntervalClock {
        &self.clock
    }

    /// Summaries of completed runs, oldest first
    pub fn history(&self) -> &[RunSummary] {
        &self.history
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    /// Report of the most recently settled run
    pub fn last_report(&self) -> Option<&Arc<RunReport>> {
        self.last_report.as_ref()
    }

    /// Run currently in progress
    pub fn current_run_id(&self) -> Option<RunId> {
        match &self.phase {
            Phase::Open { book } => Some(book.run_id()),
            Phase::Closed { book } | Phase::Cleared { book, .. } => Some(book.run_id()),
            Phase::Settled { report } => Some(report.run_id()),
            Phase::Idle | Phase::Finished => None,
        }
    }

    /// Submission handle of the open run
    pub fn handle(&self) -> Option<SubmissionHandle> {
        match &self.phase {
            Phase::Open { book } => Some(book.handle()),
            _ => None,
        }
    }

    pub fn is_registered(&self, agent: &AgentId) -> bool {
        self.registered_agents.contains(agent)
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Make an agent eligible to submit (applies from the next opened run)
    ///
    /// Returns false if the agent was already registered.
    pub fn register_agent(&mut self, agent: impl Into<AgentId>) -> bool {
        self.registered_agents.insert(agent.into())
    }

    /// Attach a result sink on its own worker thread
    pub fn add_sink(&mut self, sink: Box<dyn ResultSink>) -> Result<(), SchedulerError> {
        self.publisher.add_sink(sink)?;
        Ok(())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn invalid(&self, action: &'static str) -> SchedulerError {
        match self.phase {
            Phase::Finished => SchedulerError::Finished,
            _ => SchedulerError::InvalidTransition {
                from: self.state(),
                action,
            },
        }
    }

    /// Open the bidding window for the next run (Idle → Open)
    pub fn open(&mut self) -> Result<SubmissionHandle, SchedulerError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(self.invalid("open"));
        }

        let run_id = RunId(self.next_run_id);
        let intervals = self.clock.next_run_range();
        let rules = SubmissionRules {
            limits: self.config.order_limits.clone(),
            registered_agents: self
                .config
                .require_registration
                .then(|| self.registered_agents.clone()),
            deadline: self
                .config
                .bidding_deadline()
                .map(|window| Instant::now() + window),
        };

        let book = OpenOrderBook::new(run_id, intervals.clone(), rules, self.next_order_id);
        let handle = book.handle();
        self.phase = Phase::Open { book };

        info!(
            market = %self.config.name,
            %run_id,
            first_interval = intervals.start,
            last_interval = intervals.end - 1,
            "bidding window opened"
        );
        self.event_log.log(Event::RunOpened {
            run_id,
            first_interval: intervals.start,
            last_interval: intervals.end - 1,
        });

        Ok(handle)
    }

    /// Close the bidding window and freeze the book (Open → Closed)
    pub fn close(&mut self) -> Result<(), SchedulerError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Open { book } => {
                let book = self.freeze(book);
                self.phase = Phase::Closed { book };
                Ok(())
            }
            other => {
                self.phase = other;
                Err(self.invalid("close"))
            }
        }
    }

    /// Wait for the configured bidding deadline, then close
    ///
    /// Without a configured deadline the book is closed immediately.
    pub fn close_at_deadline(&mut self) -> Result<(), SchedulerError> {
        let Phase::Open { book } = &self.phase else {
            return Err(self.invalid("close"));
        };
        if let Some(deadline) = book.deadline() {
            let wait = deadline.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
        self.close()
    }

    fn freeze(&mut self, book: OpenOrderBook) -> ClosedOrderBook {
        let book = book.close();
        self.next_order_id = book.next_order_id();
        let stats = book.stats();

        info!(
            run_id = %book.run_id(),
            orders = book.len(),
            rejected_invalid = stats.rejected_invalid,
            rejected_late = stats.rejected_late,
            "bidding window closed"
        );
        self.event_log.log(Event::RunClosed {
            run_id: book.run_id(),
            orders: book.len(),
            rejected_invalid: stats.rejected_invalid,
            rejected_late: stats.rejected_late,
        });
        book
    }

    /// Clear the closed book (Closed → Cleared)
    ///
    /// Returns [`RunStatus::Failed`] when the solver could not produce a
    /// solution; the run must still be settled.
    pub fn clear(&mut self) -> Result<RunStatus, SchedulerError> {
        let book = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Closed { book } => book,
            other => {
                self.phase = other;
                return Err(self.invalid("clear"));
            }
        };
        let run_id = book.run_id();

        let outcome = self.engine.clear(&book);
        let status = match &outcome {
            Ok(outcome) => {
                for interval in &outcome.intervals {
                    if interval.clearing_price.is_none() && interval.has_orders() {
                        warn!(%run_id, interval = interval.interval, "no volume cleared");
                        self.event_log.log(Event::NoClearing {
                            run_id,
                            interval: interval.interval,
                        });
                    }
                }
                info!(
                    %run_id,
                    method = outcome.method.as_str(),
                    accepted_orders = outcome.accepted_orders(),
                    welfare = outcome.welfare,
                    "run cleared"
                );
                self.event_log.log(Event::RunCleared {
                    run_id,
                    method: outcome.method,
                    accepted_orders: outcome.accepted_orders(),
                    welfare: outcome.welfare,
                });
                RunStatus::Cleared
            }
            Err(err) => {
                error!(%run_id, error = %err, "clearing failed; rejecting all orders");
                self.event_log.log(Event::SolverFailure {
                    run_id,
                    reason: err.to_string(),
                });
                RunStatus::Failed
            }
        };

        self.phase = Phase::Cleared { book, outcome };
        Ok(status)
    }

    /// Compute settlement prices and publish results (Cleared → Settled)
    pub fn settle(&mut self) -> Result<Arc<RunReport>, SchedulerError> {
        let (book, outcome) = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Cleared { book, outcome } => (book, outcome),
            other => {
                self.phase = other;
                return Err(self.invalid("settle"));
            }
        };
        let run_id = book.run_id();

        let report = match self.build_report(&book, &outcome) {
            Ok(report) => report,
            Err(err) => {
                error!(%run_id, error = %err, "failed to digest run results");
                self.phase = Phase::Cleared { book, outcome };
                return Err(SchedulerError::Digest(err));
            }
        };
        if let Ok(outcome) = &outcome {
            self.event_log.log(Event::RunSettled {
                run_id,
                pricing_policy: self.config.pricing_policy,
                clearing_prices: outcome.clearing_prices(),
            });
        }

        info!(
            %run_id,
            status = %report.status(),
            accepted = report.summary.accepted_orders,
            rejected = report.summary.rejected_orders,
            digest = %report.summary.result_digest,
            "run settled"
        );

        let report = Arc::new(report);
        self.publish(&report);
        self.last_report = Some(Arc::clone(&report));
        self.phase = Phase::Settled {
            report: Arc::clone(&report),
        };
        Ok(report)
    }

    fn build_report(
        &self,
        book: &ClosedOrderBook,
        outcome: &Result<ClearingOutcome, SolverError>,
    ) -> Result<RunReport, serde_json::Error> {
        let run_id = book.run_id();
        let market = self.config.name.as_str();
        let report = match outcome {
            Ok(outcome) => {
                let results = settlement::settle(
                    book,
                    outcome,
                    self.policy.as_ref(),
                    self.clock.interval_hours(),
                );
                let summary = RunSummary::settled(
                    run_id,
                    market,
                    book.intervals(),
                    book.stats(),
                    outcome,
                    &results,
                )?;
                RunReport { summary, results }
            }
            Err(err) => {
                let results = settlement::reject_all(book);
                let summary = RunSummary::failed(
                    run_id,
                    market,
                    book.intervals(),
                    book.stats(),
                    err.to_string(),
                    &results,
                )?;
                RunReport { summary, results }
            }
        };
        Ok(report)
    }

    fn publish(&mut self, report: &RunReport) {
        let events = self.event_log.events_since(self.publish_cursor).to_vec();
        self.publish_cursor = self.event_log.len();
        self.history.push(report.summary.clone());

        let outcome = self.publisher.publish(PublishBatch {
            summary: report.summary.clone(),
            results: report.results.clone(),
            events,
        });

        let run_id = report.run_id();
        for sink in outcome.timed_out {
            self.event_log.log(Event::PublishTimeout { run_id, sink });
        }
        for (sink, reason) in outcome.failed {
            self.event_log.log(Event::PublishFailed {
                run_id,
                sink,
                reason,
            });
        }
    }

    /// Move past the settled run's intervals (Settled → Idle | Finished)
    pub fn advance(&mut self) -> Result<SchedulerState, SchedulerError> {
        if !matches!(self.phase, Phase::Settled { .. }) {
            return Err(self.invalid("advance"));
        }
        self.complete_run();
        Ok(self.state())
    }

    /// Discard the current run without results (Open | Closed → Idle | Finished)
    pub fn abort(&mut self) -> Result<SchedulerState, SchedulerError> {
        let book = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Open { book } => self.freeze(book),
            Phase::Closed { book } => book,
            other => {
                self.phase = other;
                return Err(self.invalid("abort"));
            }
        };
        let run_id = book.run_id();

        warn!(%run_id, orders = book.len(), "run aborted");
        self.event_log.log(Event::RunAborted { run_id });
        self.history.push(RunSummary::aborted(
            run_id,
            &self.config.name,
            book.intervals(),
            book.stats(),
        ));

        self.complete_run();
        Ok(self.state())
    }

    /// Stop the simulation early
    ///
    /// An open or closed run is aborted; a cleared run is settled and
    /// published first. Always ends in `Finished`.
    pub fn stop(&mut self) -> Result<(), SchedulerError> {
        match self.state() {
            SchedulerState::Finished => return Err(SchedulerError::Finished),
            SchedulerState::Open | SchedulerState::Closed => {
                self.abort()?;
            }
            SchedulerState::Cleared => {
                self.settle()?;
                self.advance()?;
            }
            SchedulerState::Settled => {
                self.advance()?;
            }
            SchedulerState::Idle => {}
        }
        if !matches!(self.phase, Phase::Finished) {
            self.finish();
        }
        Ok(())
    }

    fn complete_run(&mut self) {
        self.clock.advance_run();
        self.next_run_id += 1;
        if self.clock.runs_completed() >= self.config.simulation_horizon {
            self.finish();
        } else {
            self.phase = Phase::Idle;
        }
    }

    fn finish(&mut self) {
        let runs_completed = self.clock.runs_completed();
        info!(market = %self.config.name, runs_completed, "simulation finished");
        self.event_log
            .log(Event::SimulationFinished { runs_completed });
        self.phase = Phase::Finished;
    }

    // ========================================================================
    // Convenience drivers
    // ========================================================================

    /// Run one full cycle: open, let `bidding` submit, close, clear, settle, advance
    pub fn run_once<F>(&mut self, bidding: F) -> Result<Arc<RunReport>, SchedulerError>
    where
        F: FnOnce(&SubmissionHandle),
    {
        let handle = self.open()?;
        bidding(&handle);
        self.close()?;
        self.clear()?;
        let report = self.settle()?;
        self.advance()?;
        Ok(report)
    }

    /// Repeat [`Self::run_once`] until the scheduler finishes
    pub fn run_to_completion<F>(
        &mut self,
        mut bidding: F,
    ) -> Result<Vec<Arc<RunReport>>, SchedulerError>
    where
        F: FnMut(&SubmissionHandle),
    {
        let mut reports = Vec::new();
        while self.state() != SchedulerState::Finished {
            reports.push(self.run_once(&mut bidding)?);
        }
        Ok(reports)
    }
}

impl fmt::Debug for IntervalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntervalScheduler")
            .field("market", &self.config.name)
            .field("state", &self.state())
            .field("current_interval", &self.clock.current_interval())
            .field("runs_completed", &self.clock.runs_completed())
            .field("history_len", &self.history.len())
            .field("event_count", &self.event_log.len())
            .finish()
    }
}
