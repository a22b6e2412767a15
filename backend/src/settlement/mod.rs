//! Settlement
//!
//! Turns a clearing outcome into one [`MarketResult`] per order: settlement
//! price per interval and signed cash flow.
//!
//! The pricing rule is chosen once per market via [`PricingPolicy`] and
//! never varies within a run:
//! - [`UniformPricing`]: every accepted order pays or receives the interval's
//!   clearing price (pay-as-clear)
//! - [`PayAsBid`]: every accepted order settles at its own price limit
//!
//! # Critical Invariants
//!
//! 1. **One Result Per Order**: results are returned in ID order
//! 2. **No Price Without Volume**: rejected orders have no settlement price
//! 3. **Cash Sign**: supply receives (positive), demand pays (negative)
//!
//! # Example
//!
//! ```rust
//! use market_clearing_core_rs::clearing::ClearingEngine;
//! use market_clearing_core_rs::models::{ClosedOrderBook, RunId};
//! use market_clearing_core_rs::settlement::{self, PricingPolicy};
//! use market_clearing_core_rs::{OrderRequest, Side};
//!
//! let book = ClosedOrderBook::from_requests(
//!     RunId(0),
//!     0..1,
//!     vec![
//!         OrderRequest::simple("LOAD", Side::Demand, 100.0, 10.0, 0),
//!         OrderRequest::simple("PLANT", Side::Supply, 40.0, 10.0, 0),
//!     ],
//! )
//! .unwrap();
//! let outcome = ClearingEngine::default().clear(&book).unwrap();
//!
//! let policy = PricingPolicy::Uniform.build();
//! let results = settlement::settle(&book, &outcome, policy.as_ref(), 1.0);
//!
//! // Midpoint of 40 and 100
//! assert_eq!(results[0].settlement_price(0), Some(70.0));
//! assert_eq!(results[0].cash_flow, -700.0);
//! assert_eq!(results[1].cash_flow, 700.0);
//! ```

pub mod pay_as_bid;
pub mod uniform;

pub use pay_as_bid::PayAsBid;
pub use uniform::UniformPricing;

use crate::clearing::ClearingOutcome;
use crate::models::{ClosedOrderBook, IntervalSettlement, MarketResult, Order};
use serde::{Deserialize, Serialize};

/// Market-level pricing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PricingPolicy {
    /// Pay-as-clear at the interval's marginal price
    #[default]
    Uniform,
    /// Each accepted order settles at its own price limit
    PayAsBid,
}

impl PricingPolicy {
    /// Instantiate the policy
    pub fn build(self) -> Box<dyn SettlementPolicy> {
        match self {
            PricingPolicy::Uniform => Box::new(UniformPricing),
            PricingPolicy::PayAsBid => Box::new(PayAsBid),
        }
    }
}

/// Price an accepted order settles at in one interval
pub trait SettlementPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Settlement price of `order` given the interval's clearing price
    ///
    /// Only called for accepted orders.
    fn settlement_price(&self, order: &Order, clearing_price: Option<f64>) -> Option<f64>;
}

/// Build results for every order of a cleared book
///
/// `interval_hours` converts MW per interval into MWh for the cash flow.
pub fn settle(
    book: &ClosedOrderBook,
    outcome: &ClearingOutcome,
    policy: &dyn SettlementPolicy,
    interval_hours: f64,
) -> Vec<MarketResult> {
    book.orders()
        .iter()
        .map(|order| {
            let ratio = outcome.ratio(order.id());
            let prices = order
                .time_window()
                .iter()
                .map(|&interval| (interval, outcome.clearing_price(interval)));

            if ratio <= 0.0 {
                return MarketResult::rejected(
                    order.id(),
                    order.agent_id().clone(),
                    order.side(),
                    order.volume(),
                    prices,
                );
            }

            let accepted_volume = order.volume() * ratio;
            let intervals: Vec<IntervalSettlement> = prices
                .map(|(interval, clearing_price)| IntervalSettlement {
                    interval,
                    clearing_price,
                    settlement_price: policy.settlement_price(order, clearing_price),
                })
                .collect();

            let cash_flow = order.side().cash_sign()
                * intervals
                    .iter()
                    .filter_map(|s| s.settlement_price)
                    .map(|price| price * accepted_volume * interval_hours)
                    .sum::<f64>();

            MarketResult {
                order_id: order.id(),
                agent_id: order.agent_id().clone(),
                side: order.side(),
                volume: order.volume(),
                accepted_volume,
                acceptance_ratio: ratio,
                accepted: true,
                intervals,
                cash_flow,
            }
        })
        .collect()
}

/// Results for a failed run: every order rejected, no prices
pub fn reject_all(book: &ClosedOrderBook) -> Vec<MarketResult> {
    book.orders()
        .iter()
        .map(|order| {
            MarketResult::rejected(
                order.id(),
                order.agent_id().clone(),
                order.side(),
                order.volume(),
                order.time_window().iter().map(|&interval| (interval, None)),
            )
        })
        .collect()
}
