//! Clearing algorithm
//!
//! Consumes a closed order book and decides the acceptance ratio of every
//! order, then derives a uniform marginal price per interval.
//!
//! Two paths:
//! - **Merit order** when every order is simple, single-interval, ungrouped
//!   and unlinked
//! - **Optimization** (MILP over [`solver::MilpSolver`]) otherwise
//!
//! # Critical Invariants
//!
//! 1. **Balance**: accepted supply equals accepted demand in every interval
//! 2. **Bounds**: `0 <= ratio <= 1` for every order
//! 3. **Blocks**: ratio is 0 or at least the minimum, identical across the window
//! 4. **Exclusivity**: at most one member of an exclusive group is accepted
//! 5. **Determinism**: identical books give identical outcomes
//!
//! Economic infeasibility (no crossing orders) is a valid outcome with zero
//! volume and no price. Only solver failures are errors.
//!
//! # Example
//!
//! ```
//! use market_clearing_core_rs::clearing::ClearingEngine;
//! use market_clearing_core_rs::models::{ClosedOrderBook, RunId};
//! use market_clearing_core_rs::{OrderRequest, Side};
//!
//! let book = ClosedOrderBook::from_requests(
//!     RunId(0),
//!     0..1,
//!     vec![
//!         OrderRequest::simple("L1", Side::Demand, 100.0, 10.0, 0),
//!         OrderRequest::simple("L2", Side::Demand, 80.0, 10.0, 0),
//!         OrderRequest::simple("G1", Side::Supply, 60.0, 10.0, 0),
//!         OrderRequest::simple("G2", Side::Supply, 90.0, 10.0, 0),
//!     ],
//! )
//! .unwrap();
//!
//! let outcome = ClearingEngine::default().clear(&book).unwrap();
//! assert_eq!(outcome.clearing_price(0), Some(80.0));
//! assert_eq!(outcome.intervals[0].accepted_volume, 10.0);
//! ```

pub(crate) mod formulation;
pub(crate) mod merit_order;
pub mod pricing;
pub mod solver;

pub use pricing::MarginalPriceRule;
pub use solver::{BranchAndBound, MilpSolver, SolverConfig, SolverError};

use crate::models::{ClosedOrderBook, OrderId, Side};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Relative imbalance tolerated before a solution is rejected
const BALANCE_TOLERANCE: f64 = 1e-6;

/// Algorithm that produced a clearing outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClearingMethod {
    MeritOrder,
    Optimization,
}

impl ClearingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearingMethod::MeritOrder => "merit_order",
            ClearingMethod::Optimization => "optimization",
        }
    }
}

/// Aggregate result of one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalOutcome {
    pub interval: usize,
    /// Uniform marginal price; `None` when nothing cleared
    pub clearing_price: Option<f64>,
    /// Accepted supply (= accepted demand), MW
    pub accepted_volume: f64,
    pub offered_supply: f64,
    pub offered_demand: f64,
}

impl IntervalOutcome {
    /// True when the interval had orders on either side
    pub fn has_orders(&self) -> bool {
        self.offered_supply > 0.0 || self.offered_demand > 0.0
    }
}

/// Accepted ratios and prices for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearingOutcome {
    pub method: ClearingMethod,
    /// Acceptance ratio per order
    pub ratios: BTreeMap<OrderId, f64>,
    /// One entry per run interval, in interval order
    pub intervals: Vec<IntervalOutcome>,
    /// Total welfare of accepted orders (volume-weighted, over all intervals)
    pub welfare: f64,
    /// Branch-and-bound nodes (0 for merit order)
    pub solver_nodes: usize,
    pub proven_optimal: bool,
}

impl ClearingOutcome {
    /// Acceptance ratio of an order (0 if unknown)
    pub fn ratio(&self, order_id: OrderId) -> f64 {
        self.ratios.get(&order_id).copied().unwrap_or(0.0)
    }

    pub fn clearing_price(&self, interval: usize) -> Option<f64> {
        self.intervals
            .iter()
            .find(|i| i.interval == interval)
            .and_then(|i| i.clearing_price)
    }

    /// Number of orders with a positive ratio
    pub fn accepted_orders(&self) -> usize {
        self.ratios.values().filter(|&&r| r > 0.0).count()
    }

    /// `(interval, clearing_price)` pairs in interval order
    pub fn clearing_prices(&self) -> Vec<(usize, Option<f64>)> {
        self.intervals
            .iter()
            .map(|i| (i.interval, i.clearing_price))
            .collect()
    }
}

/// Clears closed books; holds the solver and price rule of one market
pub struct ClearingEngine {
    solver: Box<dyn MilpSolver>,
    price_rule: MarginalPriceRule,
}

impl Default for ClearingEngine {
    fn default() -> Self {
        Self::new(SolverConfig::default(), MarginalPriceRule::default())
    }
}

impl ClearingEngine {
    /// Engine using the bundled branch-and-bound solver
    pub fn new(solver_config: SolverConfig, price_rule: MarginalPriceRule) -> Self {
        Self::with_solver(Box::new(BranchAndBound::new(solver_config)), price_rule)
    }

    /// Engine using a custom solver
    pub fn with_solver(solver: Box<dyn MilpSolver>, price_rule: MarginalPriceRule) -> Self {
        Self { solver, price_rule }
    }

    pub fn price_rule(&self) -> MarginalPriceRule {
        self.price_rule
    }

    pub fn solver_name(&self) -> &str {
        self.solver.name()
    }

    /// Clear a closed book
    ///
    /// # Errors
    ///
    /// Returns [`SolverError`] when the optimization path cannot produce a
    /// balanced solution. The merit-order path never fails.
    pub fn clear(&self, book: &ClosedOrderBook) -> Result<ClearingOutcome, SolverError> {
        let (method, ratios, solver_nodes, proven_optimal) = if book.is_plain() {
            (ClearingMethod::MeritOrder, merit_order::clear(book), 0, true)
        } else {
            let (ratios, nodes, proven_optimal) = self.optimize(book)?;
            (ClearingMethod::Optimization, ratios, nodes, proven_optimal)
        };

        check_balance(book, &ratios)?;

        let intervals = pricing::interval_outcomes(book, &ratios, self.price_rule);
        let welfare = book
            .orders()
            .iter()
            .zip(&ratios)
            .map(|(order, ratio)| order.full_welfare() * ratio)
            .sum();

        debug!(
            run_id = %book.run_id(),
            method = method.as_str(),
            orders = book.len(),
            welfare,
            "book cleared"
        );

        Ok(ClearingOutcome {
            method,
            ratios: book
                .orders()
                .iter()
                .map(|o| o.id())
                .zip(ratios)
                .collect(),
            intervals,
            welfare,
            solver_nodes,
            proven_optimal,
        })
    }
}

impl ClearingEngine {
    /// Solve the MILP until no accepted simple orders cross each other
    ///
    /// Each round solves for welfare, then re-solves with the ID bonus under
    /// a welfare floor. If a link forced simple orders on opposite sides to
    /// cross, the later one is excluded and the book is solved again.
    fn optimize(&self, book: &ClosedOrderBook) -> Result<(Vec<f64>, usize, bool), SolverError> {
        let mut excluded = BTreeSet::new();
        let mut nodes = 0;

        loop {
            let formulation = formulation::formulate(book, &excluded);
            debug!(
                run_id = %book.run_id(),
                solver = self.solver.name(),
                variables = formulation.problem.num_variables(),
                constraints = formulation.problem.constraints().len(),
                excluded = excluded.len(),
                "solving clearing problem"
            );

            let welfare_stage = self.solver.solve(&formulation.problem)?;
            nodes += welfare_stage.nodes_explored;
            let tie_break = formulation.tie_break_problem(book, welfare_stage.objective);
            let assignment = match self.solver.solve(&tie_break) {
                Ok(mut assignment) => {
                    nodes += assignment.nodes_explored;
                    assignment.proven_optimal &= welfare_stage.proven_optimal;
                    assignment
                }
                Err(err) => {
                    warn!(
                        run_id = %book.run_id(),
                        error = %err,
                        "tie-break stage failed; keeping welfare solution"
                    );
                    welfare_stage
                }
            };

            let ratios = formulation::extract_ratios(book, &formulation, &assignment);
            match pricing::crossed_simple_order(book, &ratios) {
                Some(position) if excluded.insert(position) => {
                    debug!(
                        run_id = %book.run_id(),
                        order_id = %book.orders()[position].id(),
                        "excluding crossed simple order"
                    );
                }
                _ => return Ok((ratios, nodes, assignment.proven_optimal)),
            }
        }
    }
}

fn check_balance(book: &ClosedOrderBook, ratios: &[f64]) -> Result<(), SolverError> {
    for interval in book.intervals() {
        let mut net = 0.0;
        let mut scale: f64 = 1.0;
        for (order, ratio) in book.orders().iter().zip(ratios) {
            if !order.covers(interval) {
                continue;
            }
            let volume = order.volume() * ratio;
            net += match order.side() {
                Side::Supply => volume,
                Side::Demand => -volume,
            };
            scale = scale.max(order.volume());
        }
        if net.abs() > BALANCE_TOLERANCE * scale {
            return Err(SolverError::BalanceViolation {
                interval,
                imbalance: net,
            });
        }
    }
    Ok(())
}
