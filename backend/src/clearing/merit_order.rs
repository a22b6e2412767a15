//! Merit-order matching for single-interval simple orders
//!
//! Demand is sorted by price descending, supply by price ascending, both
//! with ascending ID as the tie-breaker. Orders are matched pairwise while
//! the demand price covers the supply price. At an equal price the earlier
//! ID is filled completely before a later one receives anything.

use crate::models::{ClosedOrderBook, Order, Side};
use std::cmp::Ordering;

/// Remaining volume at or below this is treated as exhausted
const VOLUME_EPS: f64 = 1e-12;

/// Acceptance ratio per order position of a plain book
pub(crate) fn clear(book: &ClosedOrderBook) -> Vec<f64> {
    let orders = book.orders();
    let mut accepted = vec![0.0; orders.len()];

    for interval in book.intervals() {
        let mut demand: Vec<usize> = Vec::new();
        let mut supply: Vec<usize> = Vec::new();
        for (position, order) in orders.iter().enumerate() {
            if !order.covers(interval) {
                continue;
            }
            match order.side() {
                Side::Demand => demand.push(position),
                Side::Supply => supply.push(position),
            }
        }
        if demand.is_empty() || supply.is_empty() {
            continue;
        }

        demand.sort_by(|&a, &b| {
            let (a, b) = (&orders[a], &orders[b]);
            b.price_limit()
                .total_cmp(&a.price_limit())
                .then(a.id().cmp(&b.id()))
        });
        supply.sort_by(|&a, &b| by_price_then_id(&orders[a], &orders[b]));

        let mut i = 0;
        let mut j = 0;
        let mut remaining_demand = orders[demand[0]].volume();
        let mut remaining_supply = orders[supply[0]].volume();

        while i < demand.len() && j < supply.len() {
            let bid = &orders[demand[i]];
            let offer = &orders[supply[j]];
            if bid.price_limit() < offer.price_limit() {
                break;
            }

            let matched = remaining_demand.min(remaining_supply);
            accepted[demand[i]] += matched;
            accepted[supply[j]] += matched;
            remaining_demand -= matched;
            remaining_supply -= matched;

            if remaining_demand <= VOLUME_EPS {
                i += 1;
                if let Some(&next) = demand.get(i) {
                    remaining_demand = orders[next].volume();
                }
            }
            if remaining_supply <= VOLUME_EPS {
                j += 1;
                if let Some(&next) = supply.get(j) {
                    remaining_supply = orders[next].volume();
                }
            }
        }
    }

    orders
        .iter()
        .zip(accepted)
        .map(|(order, volume)| {
            let ratio = volume / order.volume();
            if ratio > 1.0 - VOLUME_EPS {
                1.0
            } else {
                ratio
            }
        })
        .collect()
}

fn by_price_then_id(a: &Order, b: &Order) -> Ordering {
    a.price_limit()
        .total_cmp(&b.price_limit())
        .then(a.id().cmp(&b.id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderRequest, RunId};

    #[test]
    fn test_equal_price_fills_earlier_id_first() {
        let book = ClosedOrderBook::from_requests(
            RunId(0),
            0..1,
            vec![
                OrderRequest::simple("S1", Side::Supply, 50.0, 10.0, 0),
                OrderRequest::simple("S2", Side::Supply, 50.0, 10.0, 0),
                OrderRequest::simple("D1", Side::Demand, 100.0, 15.0, 0),
            ],
        )
        .unwrap();

        assert_eq!(clear(&book), vec![1.0, 0.5, 1.0]);
    }
}
