//! Property tests for clearing invariants
//!
//! Random small books (simple, block and grouped orders over two intervals)
//! must always clear to a balanced, feasible and reproducible outcome.

use market_clearing_core_rs::models::{ClosedOrderBook, RunId};
use market_clearing_core_rs::{
    ClearingEngine, ClearingMethod, ClearingOutcome, OrderKind, OrderRequest, Side,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

// ============================================================================
// Helpers
// ============================================================================

const EPS: f64 = 1e-6;
const INTERVALS: usize = 2;

#[derive(Debug, Clone)]
enum Shape {
    Simple { interval: usize },
    Block { min_ratio: f64, grouped: bool },
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Supply), Just(Side::Demand)]
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    prop_oneof![
        3 => (0..INTERVALS).prop_map(|interval| Shape::Simple { interval }),
        1 => (prop_oneof![Just(0.4), Just(1.0)], any::<bool>())
            .prop_map(|(min_ratio, grouped)| Shape::Block { min_ratio, grouped }),
    ]
}

fn request_strategy() -> impl Strategy<Value = OrderRequest> {
    (side_strategy(), 1u32..100, 1u32..20, shape_strategy()).prop_map(
        |(side, price, volume, shape)| {
            let price = f64::from(price);
            let volume = f64::from(volume);
            match shape {
                Shape::Simple { interval } => {
                    OrderRequest::simple("AGENT", side, price, volume, interval)
                }
                Shape::Block { min_ratio, grouped } => {
                    let block =
                        OrderRequest::block("AGENT", side, price, volume, 0..INTERVALS, min_ratio);
                    if grouped {
                        block.with_exclusive_group("modes")
                    } else {
                        block
                    }
                }
            }
        },
    )
}

fn plain_request_strategy() -> impl Strategy<Value = OrderRequest> {
    (side_strategy(), 1u32..100, 1u32..20).prop_map(|(side, price, volume)| {
        OrderRequest::simple("AGENT", side, f64::from(price), f64::from(volume), 0)
    })
}

/// Same orders, with the first one in a single-member exclusive group so the
/// book takes the optimization path
fn through_solver(mut requests: Vec<OrderRequest>) -> Vec<OrderRequest> {
    if let Some(first) = requests.first_mut() {
        *first = first.clone().with_exclusive_group("solo");
    }
    requests
}

fn clear(requests: Vec<OrderRequest>) -> (ClosedOrderBook, ClearingOutcome) {
    let book = ClosedOrderBook::from_requests(RunId(0), 0..INTERVALS, requests).unwrap();
    let outcome = ClearingEngine::default().clear(&book).unwrap();
    (book, outcome)
}

/// Net accepted supply minus demand in `interval`
fn imbalance(book: &ClosedOrderBook, outcome: &ClearingOutcome, interval: usize) -> f64 {
    book.covering(interval)
        .map(|order| {
            let volume = order.volume() * outcome.ratio(order.id());
            match order.side() {
                Side::Supply => volume,
                Side::Demand => -volume,
            }
        })
        .sum()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_every_interval_balances(requests in prop::collection::vec(request_strategy(), 0..7)) {
        let (book, outcome) = clear(requests);
        for interval in 0..INTERVALS {
            let net = imbalance(&book, &outcome, interval);
            prop_assert!(net.abs() < EPS, "interval {} imbalance {}", interval, net);
        }
    }

    #[test]
    fn prop_ratios_respect_order_rules(requests in prop::collection::vec(request_strategy(), 0..7)) {
        let (book, outcome) = clear(requests);
        let mut accepted_per_group: BTreeMap<String, usize> = BTreeMap::new();

        for order in book.orders() {
            let ratio = outcome.ratio(order.id());
            prop_assert!((0.0..=1.0).contains(&ratio), "ratio {} out of range", ratio);

            if let OrderKind::Block { min_acceptance_ratio } = order.kind() {
                prop_assert!(
                    ratio == 0.0 || ratio >= min_acceptance_ratio - EPS,
                    "block ratio {} below minimum {}",
                    ratio,
                    min_acceptance_ratio
                );
            }
            if let Some(group) = order.exclusive_group() {
                if ratio > 0.0 {
                    *accepted_per_group.entry(group.as_str().to_string()).or_default() += 1;
                }
            }
        }

        prop_assert!(accepted_per_group.values().all(|&count| count <= 1));
    }

    #[test]
    fn prop_clearing_is_deterministic(requests in prop::collection::vec(request_strategy(), 0..7)) {
        let (_, first) = clear(requests.clone());
        let (_, second) = clear(requests);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_merit_order_respects_limits(requests in prop::collection::vec(plain_request_strategy(), 1..12)) {
        let (book, outcome) = clear(requests);
        prop_assert!(outcome.welfare >= -EPS);

        let Some(price) = outcome.clearing_price(0) else {
            prop_assert_eq!(outcome.accepted_orders(), 0);
            return Ok(());
        };
        for order in book.orders() {
            if outcome.ratio(order.id()) > 0.0 {
                match order.side() {
                    Side::Supply => prop_assert!(order.price_limit() <= price + EPS),
                    Side::Demand => prop_assert!(order.price_limit() >= price - EPS),
                }
            }
        }
    }

    #[test]
    fn prop_accepted_simple_orders_within_limits(requests in prop::collection::vec(request_strategy(), 0..7)) {
        let (book, outcome) = clear(requests);
        prop_assert!(outcome.welfare >= -EPS, "negative welfare {}", outcome.welfare);

        for interval in 0..INTERVALS {
            let Some(price) = outcome.clearing_price(interval) else {
                continue;
            };
            for order in book.covering(interval) {
                if order.is_block() || outcome.ratio(order.id()) <= 0.0 {
                    continue;
                }
                match order.side() {
                    Side::Supply => prop_assert!(
                        order.price_limit() <= price + EPS,
                        "supply {} accepted at {}", order.price_limit(), price
                    ),
                    Side::Demand => prop_assert!(
                        order.price_limit() >= price - EPS,
                        "demand {} accepted at {}", order.price_limit(), price
                    ),
                }
            }
        }
    }

    #[test]
    fn prop_solver_matches_merit_order_welfare(requests in prop::collection::vec(plain_request_strategy(), 1..10)) {
        let (_, merit) = clear(requests.clone());
        let (_, optimized) = clear(through_solver(requests));

        prop_assert_eq!(merit.method, ClearingMethod::MeritOrder);
        prop_assert_eq!(optimized.method, ClearingMethod::Optimization);
        let tolerance = 1e-6 * (1.0 + merit.welfare.abs());
        prop_assert!(
            optimized.welfare >= merit.welfare - tolerance,
            "solver welfare {} below merit order {}", optimized.welfare, merit.welfare
        );
        prop_assert!(optimized.welfare <= merit.welfare + tolerance);
    }
}
