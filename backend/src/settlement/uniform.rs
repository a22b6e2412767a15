//! Pay-as-clear pricing

use super::SettlementPolicy;
use crate::models::Order;

/// Accepted orders settle at the interval's clearing price
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformPricing;

impl SettlementPolicy for UniformPricing {
    fn name(&self) -> &'static str {
        "uniform"
    }

    fn settlement_price(&self, _order: &Order, clearing_price: Option<f64>) -> Option<f64> {
        clearing_price
    }
}
