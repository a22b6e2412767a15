//! Per-order clearing results
//!
//! A [`MarketResult`] is produced for every order of a settled run, in ID
//! order. Results are immutable once the run is settled.

use crate::models::order::{AgentId, OrderId, Side};
use serde::{Deserialize, Serialize};

/// Prices for one interval of an order's window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalSettlement {
    pub interval: usize,
    /// Uniform marginal price of the interval (`None` = nothing cleared)
    pub clearing_price: Option<f64>,
    /// Price this order actually settles at (`None` = not accepted)
    pub settlement_price: Option<f64>,
}

/// Outcome of one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketResult {
    pub order_id: OrderId,
    pub agent_id: AgentId,
    pub side: Side,
    /// Order volume per interval
    pub volume: f64,
    /// Accepted volume per interval (identical across the window)
    pub accepted_volume: f64,
    /// `accepted_volume / volume`
    pub acceptance_ratio: f64,
    pub accepted: bool,
    /// One entry per interval of the order's window
    pub intervals: Vec<IntervalSettlement>,
    /// Signed money flow: positive = received (supply), negative = paid (demand)
    pub cash_flow: f64,
}

impl MarketResult {
    /// Rejected result with no settlement prices
    pub fn rejected(
        order_id: OrderId,
        agent_id: AgentId,
        side: Side,
        volume: f64,
        intervals: impl IntoIterator<Item = (usize, Option<f64>)>,
    ) -> Self {
        Self {
            order_id,
            agent_id,
            side,
            volume,
            accepted_volume: 0.0,
            acceptance_ratio: 0.0,
            accepted: false,
            intervals: intervals
                .into_iter()
                .map(|(interval, clearing_price)| IntervalSettlement {
                    interval,
                    clearing_price,
                    settlement_price: None,
                })
                .collect(),
            cash_flow: 0.0,
        }
    }

    /// Clearing price for `interval`, if the order covers it
    pub fn clearing_price(&self, interval: usize) -> Option<f64> {
        self.intervals
            .iter()
            .find(|s| s.interval == interval)
            .and_then(|s| s.clearing_price)
    }

    /// Settlement price for `interval`, if accepted there
    pub fn settlement_price(&self, interval: usize) -> Option<f64> {
        self.intervals
            .iter()
            .find(|s| s.interval == interval)
            .and_then(|s| s.settlement_price)
    }
}
