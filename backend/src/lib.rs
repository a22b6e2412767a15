//! Market Clearing Core - Rust Engine
//!
//! Wholesale electricity market simulator: repeated sealed-bid auctions
//! cleared at fixed intervals, with deterministic results.
//!
//! # Architecture
//!
//! - **core**: Interval clock
//! - **models**: Domain types (Order, OrderBook, MarketResult, Event)
//! - **clearing**: Merit order and MILP welfare maximization, marginal pricing
//! - **settlement**: Pricing policies (uniform, pay-as-bid) and cash flows
//! - **scheduler**: Run state machine and market configuration
//! - **publisher**: Result sinks on worker threads, agent inboxes
//!
//! # Critical Invariants
//!
//! 1. Accepted supply equals accepted demand in every interval
//! 2. Identical order books produce bit-identical results
//! 3. A run's results are immutable once settled
//! 4. FFI boundary is minimal and safe

// Module declarations
pub mod clearing;
pub mod core;
pub mod models;
pub mod publisher;
pub mod scheduler;
pub mod settlement;

// Re-exports for convenience
pub use clearing::{
    BranchAndBound, ClearingEngine, ClearingMethod, ClearingOutcome, IntervalOutcome,
    MarginalPriceRule, MilpSolver, SolverConfig, SolverError,
};
pub use core::time::IntervalClock;
pub use models::{
    AgentId, ClosedOrderBook, Event, EventLog, ExclusiveGroupId, LinkRelation, MarketResult,
    Order, OrderId, OrderKind, OrderLimits, OrderRequest, RunId, Side, SubmissionHandle,
    SubmitError, ValidationError, WindowClosedError,
};
pub use publisher::{InboxRegistry, PublishBatch, ResultSink, SinkError};
pub use scheduler::{
    IntervalScheduler, MarketConfig, RunReport, RunStatus, RunSummary, SchedulerError,
    SchedulerState,
};
pub use settlement::{PricingPolicy, SettlementPolicy};

// FFI module (when feature enabled)
#[cfg(feature = "pyo3")]
pub mod ffi;

// PyO3 exports (when feature enabled)
#[cfg(feature = "pyo3")]
use pyo3::prelude::*;

#[cfg(feature = "pyo3")]
#[pymodule]
fn market_clearing_core_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<ffi::market::PyMarket>()?;
    Ok(())
}
