//! Market configuration
//!
//! One [`MarketConfig`] per market instance, built once (from code or JSON),
//! validated, and shared read-only by the scheduler for its whole lifetime.
//! Every field has a default, so a JSON document only needs the fields it
//! overrides.

use crate::clearing::{MarginalPriceRule, SolverConfig};
use crate::models::OrderLimits;
use crate::settlement::PricingPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration validation error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid market config: {0}")]
    Invalid(String),

    #[error("Malformed market config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Complete market configuration
///
/// # Example
/// ```
/// use market_clearing_core_rs::scheduler::MarketConfig;
/// use market_clearing_core_rs::settlement::PricingPolicy;
///
/// let config = MarketConfig::from_json(
///     r#"{ "name": "intraday", "interval_duration_minutes": 15, "pricing_policy": "PayAsBid" }"#,
/// )
/// .unwrap();
///
/// assert_eq!(config.run_horizon_intervals, 24);
/// assert_eq!(config.pricing_policy, PricingPolicy::PayAsBid);
/// assert_eq!(config.interval_hours(), 0.25);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Market name, reported in run summaries
    pub name: String,

    /// Length of one delivery interval
    pub interval_duration_minutes: u32,

    /// Intervals offered per clearing run
    pub run_horizon_intervals: usize,

    /// Number of runs before the scheduler finishes
    pub simulation_horizon: usize,

    /// Interval index of the first run
    pub first_interval: usize,

    pub pricing_policy: PricingPolicy,

    pub marginal_price_rule: MarginalPriceRule,

    /// Bidding window length in wall-clock milliseconds (`None` = closed explicitly)
    pub bidding_deadline_ms: Option<u64>,

    /// Time to wait for each result sink per run
    pub publish_timeout_ms: u64,

    /// Redeliveries after a sink reports an error
    pub publish_max_retries: u32,

    /// Batches buffered per sink before deliveries count as timed out
    pub publish_queue_capacity: usize,

    pub order_limits: OrderLimits,

    /// Only registered agents may submit
    pub require_registration: bool,

    pub solver: SolverConfig,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            name: "day_ahead".to_string(),
            interval_duration_minutes: 60,
            run_horizon_intervals: 24,
            simulation_horizon: 1,
            first_interval: 0,
            pricing_policy: PricingPolicy::default(),
            marginal_price_rule: MarginalPriceRule::default(),
            bidding_deadline_ms: None,
            publish_timeout_ms: 1_000,
            publish_max_retries: 2,
            publish_queue_capacity: 16,
            order_limits: OrderLimits::default(),
            require_registration: false,
            solver: SolverConfig::default(),
        }
    }
}

impl MarketConfig {
    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the scheduler cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".to_string()));
        }
        if self.interval_duration_minutes == 0 {
            return Err(ConfigError::Invalid(
                "interval_duration_minutes must be positive".to_string(),
            ));
        }
        if self.run_horizon_intervals == 0 {
            return Err(ConfigError::Invalid(
                "run_horizon_intervals must be positive".to_string(),
            ));
        }
        if self.simulation_horizon == 0 {
            return Err(ConfigError::Invalid(
                "simulation_horizon must be positive".to_string(),
            ));
        }
        if self.publish_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "publish_queue_capacity must be positive".to_string(),
            ));
        }

        let limits = &self.order_limits;
        if !limits.min_price.is_finite() || !limits.max_price.is_finite() {
            return Err(ConfigError::Invalid("price limits must be finite".to_string()));
        }
        if limits.min_price > limits.max_price {
            return Err(ConfigError::Invalid(format!(
                "min_price {} exceeds max_price {}",
                limits.min_price, limits.max_price
            )));
        }
        if !(limits.max_volume > 0.0) {
            return Err(ConfigError::Invalid("max_volume must be positive".to_string()));
        }
        for (field, tick) in [
            ("price_tick", limits.price_tick),
            ("volume_tick", limits.volume_tick),
        ] {
            if let Some(tick) = tick {
                if !(tick > 0.0 && tick.is_finite()) {
                    return Err(ConfigError::Invalid(format!(
                        "{field} must be positive and finite, got {tick}"
                    )));
                }
            }
        }

        if self.solver.max_nodes == 0 || self.solver.max_lp_iterations == 0 {
            return Err(ConfigError::Invalid("solver limits must be positive".to_string()));
        }
        Ok(())
    }

    /// Interval length in hours
    pub fn interval_hours(&self) -> f64 {
        f64::from(self.interval_duration_minutes) / 60.0
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn bidding_deadline(&self) -> Option<Duration> {
        self.bidding_deadline_ms.map(Duration::from_millis)
    }
}
