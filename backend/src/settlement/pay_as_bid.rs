//! Pay-as-bid pricing

use super::SettlementPolicy;
use crate::models::Order;

/// Accepted orders settle at their own price limit
///
/// The clearing price is still reported on the result, so agents can see
/// the spread between their bid and the marginal price.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayAsBid;

impl SettlementPolicy for PayAsBid {
    fn name(&self) -> &'static str {
        "pay_as_bid"
    }

    fn settlement_price(&self, order: &Order, _clearing_price: Option<f64>) -> Option<f64> {
        Some(order.price_limit())
    }
}
