//! Order model
//!
//! Represents one supply offer or demand bid for one or more delivery
//! intervals. Each order has:
//! - Owning agent ID (the agent itself is never referenced)
//! - Side (supply or demand) and a signed price limit
//! - Volume per interval (MW held over every interval of the window)
//! - Contiguous window of interval indices
//! - Kind: simple, or block with a minimum acceptance ratio
//! - Optional exclusive group and optional link to an earlier order
//!
//! Agents submit an [`OrderRequest`]; the order book validates it and turns it
//! into an immutable [`Order`] carrying the assigned [`OrderId`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Relative tolerance used when checking tick multiples
const TICK_TOLERANCE: f64 = 1e-9;

// ============================================================================
// Identifiers
// ============================================================================

/// Order identifier, assigned by the order book in submission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ord_{:08}", self.0)
    }
}

/// Owning agent reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exclusive group identifier (at most one member may be accepted)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExclusiveGroupId(String);

impl ExclusiveGroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExclusiveGroupId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ExclusiveGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Order attributes
// ============================================================================

/// Market side of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Offer to produce; price limit is the minimum acceptable price
    Supply,
    /// Bid to consume; price limit is the maximum willingness to pay
    Demand,
}

impl Side {
    /// Sign of this side's contribution to welfare (demand +, supply -)
    pub fn welfare_sign(self) -> f64 {
        match self {
            Side::Supply => -1.0,
            Side::Demand => 1.0,
        }
    }

    /// Sign of this side's cash flow (supply receives, demand pays)
    pub fn cash_sign(self) -> f64 {
        -self.welfare_sign()
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Supply => f.write_str("supply"),
            Side::Demand => f.write_str("demand"),
        }
    }
}

/// Kind-specific order payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderKind {
    /// Freely divisible in every interval of its window
    Simple,

    /// One acceptance ratio across the whole window, either 0 or at least
    /// `min_acceptance_ratio`
    Block { min_acceptance_ratio: f64 },
}

/// How a linked order depends on its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkRelation {
    /// Child acceptance ratio may not exceed the parent's
    Dependent,
    /// Child and parent may not both be accepted
    MutuallyExclusive,
}

impl LinkRelation {
    /// Parse `"dependent"` or `"mutually_exclusive"` (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "dependent" => Some(Self::Dependent),
            "mutually_exclusive" => Some(Self::MutuallyExclusive),
            _ => None,
        }
    }
}

/// Link from an order to an earlier order of the same run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLink {
    pub parent: OrderId,
    pub relation: LinkRelation,
}

/// Market-level bounds applied to every submission
///
/// `None` ticks disable the tick check for that field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderLimits {
    pub min_price: f64,
    pub max_price: f64,
    pub max_volume: f64,
    pub price_tick: Option<f64>,
    pub volume_tick: Option<f64>,
}

impl Default for OrderLimits {
    fn default() -> Self {
        Self {
            min_price: -500.0,
            max_price: 3000.0,
            max_volume: 1e6,
            price_tick: None,
            volume_tick: None,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Reasons a submission is rejected before it reaches the book
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Volume must be positive, got {volume}")]
    NonPositiveVolume { volume: f64 },

    #[error("Field {field} must be finite")]
    NonFiniteValue { field: &'static str },

    #[error("Time window is empty")]
    EmptyWindow,

    #[error("Time window not strictly increasing: {previous} followed by {next}")]
    NonMonotonicWindow { previous: usize, next: usize },

    #[error("Time window not contiguous: {previous} followed by {next}")]
    NonContiguousWindow { previous: usize, next: usize },

    #[error("Minimum acceptance ratio must be in (0, 1], got {ratio}")]
    InvalidAcceptanceRatio { ratio: f64 },

    #[error("Window {first}..={last} outside run intervals {run_start}..{run_end}")]
    WindowOutsideRun {
        first: usize,
        last: usize,
        run_start: usize,
        run_end: usize,
    },

    #[error("Linked order {parent} not found in this run")]
    UnknownLinkedOrder { parent: OrderId },

    #[error("Price {price} outside allowed range [{min}, {max}]")]
    PriceOutOfRange { price: f64, min: f64, max: f64 },

    #[error("Volume {volume} exceeds maximum {max}")]
    VolumeAboveMaximum { volume: f64, max: f64 },

    #[error("Field {field} value {value} is not a multiple of tick {tick}")]
    OffTick {
        field: &'static str,
        value: f64,
        tick: f64,
    },

    #[error("Agent {agent_id} is not registered with this market")]
    UnregisteredAgent { agent_id: AgentId },
}

// ============================================================================
// OrderRequest
// ============================================================================

/// An order as submitted by an agent, before an ID is assigned
///
/// # Example
/// ```
/// use market_clearing_core_rs::{OrderRequest, Side};
///
/// let bid = OrderRequest::simple("LOAD_1", Side::Demand, 120.0, 25.0, 7);
/// let block = OrderRequest::block("PLANT_1", Side::Supply, 40.0, 100.0, 0..4, 1.0)
///     .with_exclusive_group("PLANT_1_variants");
/// assert_eq!(block.time_window, vec![0, 1, 2, 3]);
/// # let _ = bid;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub agent_id: AgentId,
    pub side: Side,
    pub price_limit: f64,
    pub volume: f64,
    pub time_window: Vec<usize>,
    pub kind: OrderKind,
    pub exclusive_group: Option<ExclusiveGroupId>,
    pub link: Option<OrderLink>,
}

impl OrderRequest {
    /// Single-interval divisible order
    pub fn simple(
        agent_id: impl Into<AgentId>,
        side: Side,
        price_limit: f64,
        volume: f64,
        interval: usize,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            side,
            price_limit,
            volume,
            time_window: vec![interval],
            kind: OrderKind::Simple,
            exclusive_group: None,
            link: None,
        }
    }

    /// Block order spanning `window` with a minimum acceptance ratio
    pub fn block(
        agent_id: impl Into<AgentId>,
        side: Side,
        price_limit: f64,
        volume: f64,
        window: impl IntoIterator<Item = usize>,
        min_acceptance_ratio: f64,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            side,
            price_limit,
            volume,
            time_window: window.into_iter().collect(),
            kind: OrderKind::Block {
                min_acceptance_ratio,
            },
            exclusive_group: None,
            link: None,
        }
    }

    /// Replace the time window (a simple order may span several intervals)
    pub fn with_window(mut self, window: impl IntoIterator<Item = usize>) -> Self {
        self.time_window = window.into_iter().collect();
        self
    }

    pub fn with_exclusive_group(mut self, group: impl Into<ExclusiveGroupId>) -> Self {
        self.exclusive_group = Some(group.into());
        self
    }

    pub fn with_link(mut self, parent: OrderId, relation: LinkRelation) -> Self {
        self.link = Some(OrderLink { parent, relation });
        self
    }

    /// Check the request's intrinsic shape
    ///
    /// Context-dependent checks (run range, link parent, market limits) are
    /// done by the order book.
    pub fn validate_shape(&self) -> Result<(), ValidationError> {
        if !self.price_limit.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                field: "price_limit",
            });
        }
        if !self.volume.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "volume" });
        }
        if self.volume <= 0.0 {
            return Err(ValidationError::NonPositiveVolume {
                volume: self.volume,
            });
        }

        if self.time_window.is_empty() {
            return Err(ValidationError::EmptyWindow);
        }
        for pair in self.time_window.windows(2) {
            let (previous, next) = (pair[0], pair[1]);
            if next <= previous {
                return Err(ValidationError::NonMonotonicWindow { previous, next });
            }
            if next != previous + 1 {
                return Err(ValidationError::NonContiguousWindow { previous, next });
            }
        }

        if let OrderKind::Block {
            min_acceptance_ratio,
        } = self.kind
        {
            if !(min_acceptance_ratio > 0.0 && min_acceptance_ratio <= 1.0) {
                return Err(ValidationError::InvalidAcceptanceRatio {
                    ratio: min_acceptance_ratio,
                });
            }
        }

        Ok(())
    }

    /// Check against market limits and snap price/volume onto the tick grid
    pub fn apply_limits(&mut self, limits: &OrderLimits) -> Result<(), ValidationError> {
        if let Some(tick) = limits.price_tick {
            self.price_limit = snap_to_tick("price_limit", self.price_limit, tick)?;
        }
        if let Some(tick) = limits.volume_tick {
            self.volume = snap_to_tick("volume", self.volume, tick)?;
        }

        if self.price_limit < limits.min_price || self.price_limit > limits.max_price {
            return Err(ValidationError::PriceOutOfRange {
                price: self.price_limit,
                min: limits.min_price,
                max: limits.max_price,
            });
        }
        if self.volume > limits.max_volume {
            return Err(ValidationError::VolumeAboveMaximum {
                volume: self.volume,
                max: limits.max_volume,
            });
        }
        // Snapping can round a tiny volume down to zero
        if self.volume <= 0.0 {
            return Err(ValidationError::NonPositiveVolume {
                volume: self.volume,
            });
        }
        Ok(())
    }
}

/// Round `value` to the nearest multiple of `tick` if it is already one
/// within tolerance
fn snap_to_tick(field: &'static str, value: f64, tick: f64) -> Result<f64, ValidationError> {
    if tick <= 0.0 {
        return Ok(value);
    }
    let steps = (value / tick).round();
    let snapped = steps * tick;
    if (snapped - value).abs() > TICK_TOLERANCE * tick.max(value.abs()) {
        return Err(ValidationError::OffTick { field, value, tick });
    }
    Ok(snapped)
}

// ============================================================================
// Order
// ============================================================================

/// An accepted submission, owned by the order book for the run's lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    agent_id: AgentId,
    side: Side,
    price_limit: f64,
    volume: f64,
    time_window: Vec<usize>,
    kind: OrderKind,
    exclusive_group: Option<ExclusiveGroupId>,
    link: Option<OrderLink>,
}

impl Order {
    /// Build an order from a validated request
    pub(crate) fn from_request(id: OrderId, request: OrderRequest) -> Self {
        Self {
            id,
            agent_id: request.agent_id,
            side: request.side,
            price_limit: request.price_limit,
            volume: request.volume,
            time_window: request.time_window,
            kind: request.kind,
            exclusive_group: request.exclusive_group,
            link: request.link,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn price_limit(&self) -> f64 {
        self.price_limit
    }

    /// Volume per interval
    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn time_window(&self) -> &[usize] {
        &self.time_window
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn exclusive_group(&self) -> Option<&ExclusiveGroupId> {
        self.exclusive_group.as_ref()
    }

    pub fn link(&self) -> Option<OrderLink> {
        self.link
    }

    pub fn is_block(&self) -> bool {
        matches!(self.kind, OrderKind::Block { .. })
    }

    /// Minimum acceptance ratio (block orders only)
    pub fn min_acceptance_ratio(&self) -> Option<f64> {
        match self.kind {
            OrderKind::Simple => None,
            OrderKind::Block {
                min_acceptance_ratio,
            } => Some(min_acceptance_ratio),
        }
    }

    pub fn first_interval(&self) -> usize {
        self.time_window[0]
    }

    pub fn last_interval(&self) -> usize {
        self.time_window[self.time_window.len() - 1]
    }

    pub fn covers(&self, interval: usize) -> bool {
        interval >= self.first_interval() && interval <= self.last_interval()
    }

    /// True when the order can be cleared by plain merit order
    pub fn is_plain(&self) -> bool {
        matches!(self.kind, OrderKind::Simple)
            && self.time_window.len() == 1
            && self.exclusive_group.is_none()
            && self.link.is_none()
    }

    /// Welfare contribution when fully accepted
    pub fn full_welfare(&self) -> f64 {
        self.side.welfare_sign() * self.price_limit * self.volume * self.time_window.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_to_tick_accepts_near_multiples() {
        assert_eq!(snap_to_tick("price_limit", 10.100000000001, 0.1).unwrap(), 101.0 * 0.1);
        assert!(snap_to_tick("price_limit", 10.15, 0.1).is_err());
    }

    #[test]
    fn test_link_relation_names() {
        assert_eq!(LinkRelation::parse("Dependent"), Some(LinkRelation::Dependent));
        assert_eq!(
            LinkRelation::parse("mutually_exclusive"),
            Some(LinkRelation::MutuallyExclusive)
        );
        assert_eq!(LinkRelation::parse("exclusive"), None);
    }

    #[test]
    fn test_window_gap_is_rejected() {
        let request = OrderRequest::simple("A", Side::Supply, 10.0, 1.0, 0).with_window([0, 2]);
        assert_eq!(
            request.validate_shape(),
            Err(ValidationError::NonContiguousWindow {
                previous: 0,
                next: 2
            })
        );
    }
}
