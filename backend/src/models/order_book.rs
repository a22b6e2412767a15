//! Order book for one clearing run
//!
//! The book has two phases:
//! - **Open**: agents append orders concurrently through cloneable
//!   [`SubmissionHandle`]s. Insertion is serialized by a mutex; IDs are
//!   assigned under the lock so ID order equals submission order.
//! - **Closed**: [`OpenOrderBook::close`] consumes the open book and returns an
//!   immutable [`ClosedOrderBook`]. Handles that outlive the close keep
//!   failing with [`WindowClosedError`].
//!
//! # Critical Invariants
//!
//! 1. **Unique IDs**: IDs come from one monotonically increasing counter
//! 2. **Window Range**: Every order's window lies inside the run's intervals
//! 3. **Link Order**: A linked parent exists in the same book with a lower ID
//! 4. **No Late Orders**: Nothing is appended after close or past the deadline

use crate::models::order::{
    AgentId, Order, OrderId, OrderLimits, OrderRequest, Side, ValidationError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::warn;

/// Clearing run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run_{:06}", self.0)
    }
}

/// Submission after the bidding window closed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Bidding window for {run_id} is closed")]
pub struct WindowClosedError {
    pub run_id: RunId,
}

/// Any reason a submission fails
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    WindowClosed(#[from] WindowClosedError),
}

/// Submission counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookStats {
    pub accepted: usize,
    pub rejected_invalid: usize,
    pub rejected_late: usize,
}

/// Rules the book enforces on every submission
#[derive(Debug, Clone, Default)]
pub struct SubmissionRules {
    pub limits: OrderLimits,
    /// `None` means any agent may submit
    pub registered_agents: Option<BTreeSet<AgentId>>,
    /// Wall-clock bidding deadline
    pub deadline: Option<Instant>,
}

struct BookState {
    orders: Vec<Order>,
    closed: bool,
    next_id: u64,
    stats: BookStats,
}

struct BookShared {
    run_id: RunId,
    intervals: Range<usize>,
    rules: SubmissionRules,
    state: Mutex<BookState>,
}

impl BookShared {
    fn submit(&self, mut request: OrderRequest) -> Result<OrderId, SubmitError> {
        let mut state = self.state.lock();

        let past_deadline = self
            .rules
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if state.closed || past_deadline {
            state.stats.rejected_late += 1;
            warn!(
                run_id = %self.run_id,
                agent_id = %request.agent_id,
                "late submission rejected"
            );
            return Err(WindowClosedError {
                run_id: self.run_id,
            }
            .into());
        }

        if let Err(err) = self.validate(&state, &mut request) {
            state.stats.rejected_invalid += 1;
            warn!(
                run_id = %self.run_id,
                agent_id = %request.agent_id,
                error = %err,
                "order rejected"
            );
            return Err(err.into());
        }

        let id = OrderId(state.next_id);
        state.next_id += 1;
        state.stats.accepted += 1;
        state.orders.push(Order::from_request(id, request));
        Ok(id)
    }

    fn validate(&self, state: &BookState, request: &mut OrderRequest) -> Result<(), ValidationError> {
        request.validate_shape()?;

        if let Some(registered) = &self.rules.registered_agents {
            if !registered.contains(&request.agent_id) {
                return Err(ValidationError::UnregisteredAgent {
                    agent_id: request.agent_id.clone(),
                });
            }
        }

        request.apply_limits(&self.rules.limits)?;

        let first = request.time_window[0];
        let last = request.time_window[request.time_window.len() - 1];
        if first < self.intervals.start || last >= self.intervals.end {
            return Err(ValidationError::WindowOutsideRun {
                first,
                last,
                run_start: self.intervals.start,
                run_end: self.intervals.end,
            });
        }

        if let Some(link) = request.link {
            // Orders are pushed in ID order, so a binary search suffices
            let known = state
                .orders
                .binary_search_by_key(&link.parent, |o| o.id())
                .is_ok();
            if !known {
                return Err(ValidationError::UnknownLinkedOrder {
                    parent: link.parent,
                });
            }
        }

        Ok(())
    }
}

// ============================================================================
// Open book
// ============================================================================

/// Book accepting submissions; owned by the scheduler
pub struct OpenOrderBook {
    shared: Arc<BookShared>,
}

/// Cloneable, thread-safe submission endpoint handed to agents
///
/// # Example
/// ```
/// use market_clearing_core_rs::models::order_book::{OpenOrderBook, RunId, SubmissionRules};
/// use market_clearing_core_rs::{OrderRequest, Side};
///
/// let book = OpenOrderBook::new(RunId(0), 0..24, SubmissionRules::default(), 1);
/// let handle = book.handle();
///
/// let id = handle
///     .submit(OrderRequest::simple("LOAD_1", Side::Demand, 90.0, 10.0, 3))
///     .unwrap();
/// assert_eq!(id.0, 1);
///
/// let closed = book.close();
/// assert_eq!(closed.len(), 1);
/// assert!(handle.submit(OrderRequest::simple("LOAD_1", Side::Demand, 90.0, 10.0, 3)).is_err());
/// ```
#[derive(Clone)]
pub struct SubmissionHandle {
    shared: Arc<BookShared>,
}

impl SubmissionHandle {
    /// Submit an order; returns the assigned ID
    pub fn submit(&self, request: OrderRequest) -> Result<OrderId, SubmitError> {
        self.shared.submit(request)
    }

    pub fn run_id(&self) -> RunId {
        self.shared.run_id
    }

    /// Intervals open for bidding in this run
    pub fn intervals(&self) -> Range<usize> {
        self.shared.intervals.clone()
    }

    /// True once the book is closed or the deadline has passed
    pub fn is_closed(&self) -> bool {
        let state = self.shared.state.lock();
        state.closed
            || self
                .shared
                .rules
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

impl fmt::Debug for SubmissionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionHandle")
            .field("run_id", &self.shared.run_id)
            .field("intervals", &self.shared.intervals)
            .finish()
    }
}

impl OpenOrderBook {
    /// Create an empty book for `intervals`, numbering orders from `first_order_id`
    pub fn new(
        run_id: RunId,
        intervals: Range<usize>,
        rules: SubmissionRules,
        first_order_id: u64,
    ) -> Self {
        Self {
            shared: Arc::new(BookShared {
                run_id,
                intervals,
                rules,
                state: Mutex::new(BookState {
                    orders: Vec::new(),
                    closed: false,
                    next_id: first_order_id,
                    stats: BookStats::default(),
                }),
            }),
        }
    }

    pub fn handle(&self) -> SubmissionHandle {
        SubmissionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.shared.run_id
    }

    pub fn intervals(&self) -> Range<usize> {
        self.shared.intervals.clone()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.shared.rules.deadline
    }

    /// Number of orders accepted so far
    pub fn len(&self) -> usize {
        self.shared.state.lock().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze the book; later submissions through any handle fail
    pub fn close(self) -> ClosedOrderBook {
        let mut state = self.shared.state.lock();
        state.closed = true;
        let orders = std::mem::take(&mut state.orders);
        ClosedOrderBook::new(
            self.shared.run_id,
            self.shared.intervals.clone(),
            orders,
            state.stats,
            state.next_id,
        )
    }
}

// ============================================================================
// Closed book
// ============================================================================

/// Immutable snapshot of a run's orders, sorted by ID
#[derive(Debug, Clone)]
pub struct ClosedOrderBook {
    run_id: RunId,
    intervals: Range<usize>,
    orders: Vec<Order>,
    index: BTreeMap<OrderId, usize>,
    stats: BookStats,
    next_order_id: u64,
}

impl ClosedOrderBook {
    fn new(
        run_id: RunId,
        intervals: Range<usize>,
        mut orders: Vec<Order>,
        stats: BookStats,
        next_order_id: u64,
    ) -> Self {
        orders.sort_by_key(|o| o.id());
        let index = orders
            .iter()
            .enumerate()
            .map(|(position, order)| (order.id(), position))
            .collect();
        Self {
            run_id,
            intervals,
            orders,
            index,
            stats,
            next_order_id,
        }
    }

    /// Build a closed book directly from requests (default limits, any agent)
    ///
    /// Orders are numbered from 1 in the given order. Useful for driving the
    /// clearing engine without a scheduler.
    pub fn from_requests(
        run_id: RunId,
        intervals: Range<usize>,
        requests: impl IntoIterator<Item = OrderRequest>,
    ) -> Result<Self, SubmitError> {
        let book = OpenOrderBook::new(run_id, intervals, SubmissionRules::default(), 1);
        let handle = book.handle();
        for request in requests {
            handle.submit(request)?;
        }
        Ok(book.close())
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn intervals(&self) -> Range<usize> {
        self.intervals.clone()
    }

    /// All orders in ID order
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.index.get(&id).map(|&position| &self.orders[position])
    }

    /// Position of an order in [`Self::orders`]
    pub fn position(&self, id: OrderId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn stats(&self) -> BookStats {
        self.stats
    }

    /// First ID not yet assigned
    pub fn next_order_id(&self) -> u64 {
        self.next_order_id
    }

    pub fn side(&self, side: Side) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(move |o| o.side() == side)
    }

    /// Orders whose window covers `interval`
    pub fn covering(&self, interval: usize) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(move |o| o.covers(interval))
    }

    /// True when merit order alone can clear this book
    pub fn is_plain(&self) -> bool {
        self.orders.iter().all(Order::is_plain)
    }

    /// Offered volume per side in `interval`
    pub fn offered_volume(&self, interval: usize, side: Side) -> f64 {
        self.covering(interval)
            .filter(|o| o.side() == side)
            .map(Order::volume)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::LinkRelation;

    #[test]
    fn test_link_to_later_order_is_rejected() {
        let book = OpenOrderBook::new(RunId(0), 0..2, SubmissionRules::default(), 10);
        let handle = book.handle();
        let result = handle.submit(
            OrderRequest::simple("A", Side::Supply, 10.0, 1.0, 0)
                .with_link(OrderId(11), LinkRelation::Dependent),
        );
        assert_eq!(
            result,
            Err(SubmitError::Validation(ValidationError::UnknownLinkedOrder {
                parent: OrderId(11)
            }))
        );
    }

    #[test]
    fn test_close_reports_next_id_and_stats() {
        let book = OpenOrderBook::new(RunId(3), 0..1, SubmissionRules::default(), 5);
        let handle = book.handle();
        handle
            .submit(OrderRequest::simple("A", Side::Supply, 10.0, 1.0, 0))
            .unwrap();
        handle
            .submit(OrderRequest::simple("A", Side::Supply, 10.0, -1.0, 0))
            .unwrap_err();
        let closed = book.close();
        assert_eq!(closed.next_order_id(), 6);
        assert_eq!(closed.stats().accepted, 1);
        assert_eq!(closed.stats().rejected_invalid, 1);
    }
}
