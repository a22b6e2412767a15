//! Domain models for the market clearing engine

pub mod event;
pub mod order;
pub mod order_book;
pub mod result;

// Re-exports
pub use event::{Event, EventLog};
pub use order::{
    AgentId, ExclusiveGroupId, LinkRelation, Order, OrderId, OrderKind, OrderLimits, OrderLink,
    OrderRequest, Side, ValidationError,
};
pub use order_book::{
    BookStats, ClosedOrderBook, OpenOrderBook, RunId, SubmissionHandle, SubmissionRules,
    SubmitError, WindowClosedError,
};
pub use result::{IntervalSettlement, MarketResult};
