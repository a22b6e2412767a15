//! Marginal price determination per interval
//!
//! For each interval with accepted volume, the last accepted supply level
//! (highest accepted supply price) and last accepted demand level (lowest
//! accepted demand price) are found. A level is marginal when divisible
//! volume at exactly that price was left partly unaccepted. A single
//! marginal side sets the price; otherwise the [`MarginalPriceRule`] decides.
//!
//! The price is then kept inside the limits of every accepted simple order
//! (at least the highest simple supply limit, at most the lowest simple
//! demand limit). Only block orders may end up paradoxically accepted.

use crate::clearing::IntervalOutcome;
use crate::models::{ClosedOrderBook, Order, Side};
use serde::{Deserialize, Serialize};

/// Accepted volume at or below this counts as nothing cleared
const VOLUME_EPS: f64 = 1e-9;

/// Ratio threshold for "accepted" and "fully accepted"
const RATIO_EPS: f64 = 1e-9;

/// Price rule when neither or both sides are marginal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarginalPriceRule {
    /// Average of the last accepted supply and demand levels
    #[default]
    Midpoint,
    /// Highest accepted supply price
    LastAcceptedSupply,
    /// Lowest accepted demand price
    LastAcceptedDemand,
}

impl MarginalPriceRule {
    fn resolve(self, supply_level: f64, demand_level: f64) -> f64 {
        match self {
            MarginalPriceRule::Midpoint => (supply_level + demand_level) / 2.0,
            MarginalPriceRule::LastAcceptedSupply => supply_level,
            MarginalPriceRule::LastAcceptedDemand => demand_level,
        }
    }
}

/// Order still has volume that could have been traded at its price
fn has_divisible_remainder(order: &Order, ratio: f64) -> bool {
    if ratio >= 1.0 - RATIO_EPS {
        return false;
    }
    // A rejected block is not divisible at all
    !order.is_block() || ratio > RATIO_EPS
}

fn marginal_at(orders: &[(&Order, f64)], level: f64) -> bool {
    orders
        .iter()
        .any(|&(order, ratio)| order.price_limit() == level && has_divisible_remainder(order, ratio))
}

/// Highest accepted simple supply limit and lowest accepted simple demand limit
fn simple_bounds(supply: &[(&Order, f64)], demand: &[(&Order, f64)]) -> (f64, f64) {
    let accepted_simple = |orders: &[(&Order, f64)]| -> Vec<f64> {
        orders
            .iter()
            .filter(|&&(o, r)| !o.is_block() && r > RATIO_EPS)
            .map(|&(o, _)| o.price_limit())
            .collect()
    };
    let floor = accepted_simple(supply)
        .into_iter()
        .fold(f64::NEG_INFINITY, f64::max);
    let cap = accepted_simple(demand).into_iter().fold(f64::INFINITY, f64::min);
    (floor, cap)
}

/// First accepted simple order that no uniform price can satisfy
///
/// Looks for an interval where an accepted simple supply asks more than an
/// accepted simple demand bids. Of the two extreme orders, the later one
/// (higher position) is returned.
pub(crate) fn crossed_simple_order(book: &ClosedOrderBook, ratios: &[f64]) -> Option<usize> {
    let orders = book.orders();
    for interval in book.intervals() {
        let mut supply: Option<usize> = None;
        let mut demand: Option<usize> = None;
        for (position, (order, &ratio)) in orders.iter().zip(ratios).enumerate() {
            if order.is_block() || ratio <= RATIO_EPS || !order.covers(interval) {
                continue;
            }
            let limit = order.price_limit();
            match order.side() {
                Side::Supply => {
                    if supply.map_or(true, |s| limit >= orders[s].price_limit()) {
                        supply = Some(position);
                    }
                }
                Side::Demand => {
                    if demand.map_or(true, |d| limit <= orders[d].price_limit()) {
                        demand = Some(position);
                    }
                }
            }
        }
        if let (Some(s), Some(d)) = (supply, demand) {
            if orders[s].price_limit() > orders[d].price_limit() {
                return Some(s.max(d));
            }
        }
    }
    None
}

/// Per-interval prices and volumes for `ratios` (indexed by order position)
pub(crate) fn interval_outcomes(
    book: &ClosedOrderBook,
    ratios: &[f64],
    rule: MarginalPriceRule,
) -> Vec<IntervalOutcome> {
    let orders = book.orders();

    book.intervals()
        .map(|interval| {
            let mut supply: Vec<(&Order, f64)> = Vec::new();
            let mut demand: Vec<(&Order, f64)> = Vec::new();
            for (order, &ratio) in orders.iter().zip(ratios) {
                if !order.covers(interval) {
                    continue;
                }
                match order.side() {
                    Side::Supply => supply.push((order, ratio)),
                    Side::Demand => demand.push((order, ratio)),
                }
            }

            let accepted_volume: f64 = supply.iter().map(|&(o, r)| o.volume() * r).sum();
            let offered_supply = book.offered_volume(interval, Side::Supply);
            let offered_demand = book.offered_volume(interval, Side::Demand);

            let clearing_price = if accepted_volume <= VOLUME_EPS {
                None
            } else {
                let supply_level = supply
                    .iter()
                    .filter(|&&(_, r)| r > RATIO_EPS)
                    .map(|&(o, _)| o.price_limit())
                    .fold(f64::NEG_INFINITY, f64::max);
                let demand_level = demand
                    .iter()
                    .filter(|&&(_, r)| r > RATIO_EPS)
                    .map(|&(o, _)| o.price_limit())
                    .fold(f64::INFINITY, f64::min);

                if !supply_level.is_finite() || !demand_level.is_finite() {
                    None
                } else {
                    let price = match (
                        marginal_at(&supply, supply_level),
                        marginal_at(&demand, demand_level),
                    ) {
                        (true, false) => supply_level,
                        (false, true) => demand_level,
                        _ => rule.resolve(supply_level, demand_level),
                    };
                    let (floor, cap) = simple_bounds(&supply, &demand);
                    Some(price.max(floor).min(cap))
                }
            };

            IntervalOutcome {
                interval,
                clearing_price,
                accepted_volume: if clearing_price.is_some() {
                    accepted_volume
                } else {
                    0.0
                },
                offered_supply,
                offered_demand,
            }
        })
        .collect()
}
