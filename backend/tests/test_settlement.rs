//! Tests for settlement pricing and cash flows

use market_clearing_core_rs::models::{ClosedOrderBook, RunId};
use market_clearing_core_rs::settlement::{self, PayAsBid, SettlementPolicy, UniformPricing};
use market_clearing_core_rs::{
    ClearingEngine, MarketResult, OrderId, OrderRequest, PricingPolicy, Side,
};

// ============================================================================
// Helpers
// ============================================================================

fn simple_book() -> ClosedOrderBook {
    ClosedOrderBook::from_requests(
        RunId(0),
        0..1,
        vec![
            OrderRequest::simple("LOAD", Side::Demand, 100.0, 10.0, 0),
            OrderRequest::simple("PLANT", Side::Supply, 40.0, 10.0, 0),
            OrderRequest::simple("PEAKER", Side::Supply, 150.0, 10.0, 0),
        ],
    )
    .unwrap()
}

fn settle_with(policy: PricingPolicy, book: &ClosedOrderBook, hours: f64) -> Vec<MarketResult> {
    let outcome = ClearingEngine::default().clear(book).unwrap();
    settlement::settle(book, &outcome, policy.build().as_ref(), hours)
}

// ============================================================================
// Uniform pricing
// ============================================================================

#[test]
fn test_uniform_pricing_pays_clearing_price() {
    let results = settle_with(PricingPolicy::Uniform, &simple_book(), 1.0);

    assert_eq!(results.len(), 3);
    let load = &results[0];
    let plant = &results[1];

    assert!(load.accepted);
    assert_eq!(load.clearing_price(0), Some(70.0));
    assert_eq!(load.settlement_price(0), Some(70.0));
    assert_eq!(load.cash_flow, -700.0);

    assert_eq!(plant.settlement_price(0), Some(70.0));
    assert_eq!(plant.cash_flow, 700.0);
}

#[test]
fn test_uniform_cash_flows_balance() {
    let results = settle_with(PricingPolicy::Uniform, &simple_book(), 1.0);
    let net: f64 = results.iter().map(|r| r.cash_flow).sum();
    assert_eq!(net, 0.0);
}

#[test]
fn test_rejected_order_has_no_settlement_price() {
    let results = settle_with(PricingPolicy::Uniform, &simple_book(), 1.0);
    let peaker = &results[2];

    assert_eq!(peaker.order_id, OrderId(3));
    assert!(!peaker.accepted);
    assert_eq!(peaker.accepted_volume, 0.0);
    assert_eq!(peaker.acceptance_ratio, 0.0);
    assert_eq!(peaker.settlement_price(0), None);
    // The interval's price is still reported
    assert_eq!(peaker.clearing_price(0), Some(70.0));
    assert_eq!(peaker.cash_flow, 0.0);
}

// ============================================================================
// Pay-as-bid
// ============================================================================

#[test]
fn test_pay_as_bid_settles_at_own_limit() {
    let results = settle_with(PricingPolicy::PayAsBid, &simple_book(), 1.0);

    assert_eq!(results[0].settlement_price(0), Some(100.0));
    assert_eq!(results[0].clearing_price(0), Some(70.0));
    assert_eq!(results[0].cash_flow, -1000.0);
    assert_eq!(results[1].settlement_price(0), Some(40.0));
    assert_eq!(results[1].cash_flow, 400.0);
    assert_eq!(results[2].settlement_price(0), None);
}

#[test]
fn test_policy_objects_are_named() {
    assert_eq!(PricingPolicy::Uniform.build().name(), "uniform");
    assert_eq!(PricingPolicy::PayAsBid.build().name(), "pay_as_bid");
    assert_eq!(UniformPricing.name(), "uniform");
    assert_eq!(PayAsBid.name(), "pay_as_bid");
}

// ============================================================================
// Volumes and durations
// ============================================================================

#[test]
fn test_cash_flow_scales_with_interval_duration() {
    let results = settle_with(PricingPolicy::Uniform, &simple_book(), 0.25);
    assert_eq!(results[0].cash_flow, -175.0);
    assert_eq!(results[1].cash_flow, 175.0);
}

#[test]
fn test_partial_acceptance_volume() {
    let book = ClosedOrderBook::from_requests(
        RunId(0),
        0..1,
        vec![
            OrderRequest::simple("LOAD", Side::Demand, 100.0, 15.0, 0),
            OrderRequest::simple("PLANT", Side::Supply, 50.0, 10.0, 0),
            OrderRequest::simple("PEAKER", Side::Supply, 70.0, 10.0, 0),
        ],
    )
    .unwrap();
    let results = settle_with(PricingPolicy::Uniform, &book, 1.0);

    let peaker = &results[2];
    assert!(peaker.accepted);
    assert_eq!(peaker.acceptance_ratio, 0.5);
    assert_eq!(peaker.accepted_volume, 5.0);
    assert_eq!(peaker.cash_flow, 350.0);
}

#[test]
fn test_block_cash_flow_covers_whole_window() {
    let book = ClosedOrderBook::from_requests(
        RunId(0),
        0..2,
        vec![
            OrderRequest::block("PLANT", Side::Supply, 40.0, 10.0, 0..2, 1.0),
            OrderRequest::simple("L0", Side::Demand, 100.0, 10.0, 0),
            OrderRequest::simple("L1", Side::Demand, 100.0, 10.0, 1),
        ],
    )
    .unwrap();
    let results = settle_with(PricingPolicy::PayAsBid, &book, 1.0);

    let block = &results[0];
    assert_eq!(block.intervals.len(), 2);
    assert_eq!(block.settlement_price(0), Some(40.0));
    assert_eq!(block.settlement_price(1), Some(40.0));
    assert!((block.cash_flow - 800.0).abs() < 1e-6);
}

#[test]
fn test_reject_all_clears_nothing() {
    let book = simple_book();
    let results = settlement::reject_all(&book);

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| !r.accepted));
    assert!(results.iter().all(|r| r.clearing_price(0).is_none()));
    assert!(results.iter().all(|r| r.cash_flow == 0.0));
}

#[test]
fn test_pricing_policy_deserializes_by_name() {
    let policy: PricingPolicy = serde_json::from_str("\"PayAsBid\"").unwrap();
    assert_eq!(policy, PricingPolicy::PayAsBid);
    assert_eq!(PricingPolicy::default(), PricingPolicy::Uniform);
}
