//! Clearing run records
//!
//! A settled run produces a [`RunReport`]: the immutable per-order results
//! plus a [`RunSummary`] for telemetry. Summaries are archived in the
//! scheduler's history after publishing.

use crate::clearing::{ClearingMethod, ClearingOutcome, IntervalOutcome};
use crate::models::{BookStats, MarketResult, RunId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Lifecycle status of a clearing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Open,
    Closed,
    Cleared,
    /// Solver failed; every order rejected
    Failed,
    Settled,
    /// Discarded before clearing; no results
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Open => "open",
            RunStatus::Closed => "closed",
            RunStatus::Cleared => "cleared",
            RunStatus::Failed => "failed",
            RunStatus::Settled => "settled",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Telemetry record of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub market: String,
    pub first_interval: usize,
    pub last_interval: usize,
    pub status: RunStatus,
    /// `None` when the run never reached clearing or the solver failed
    pub method: Option<ClearingMethod>,
    pub intervals: Vec<IntervalOutcome>,
    pub total_welfare: f64,
    pub accepted_orders: usize,
    pub rejected_orders: usize,
    pub book: BookStats,
    pub solver_nodes: usize,
    pub proven_optimal: bool,
    pub failure_reason: Option<String>,
    /// SHA-256 of the serialized results (hex)
    pub result_digest: String,
}

impl RunSummary {
    /// Summary of a settled run
    pub(crate) fn settled(
        run_id: RunId,
        market: &str,
        intervals: std::ops::Range<usize>,
        book: BookStats,
        outcome: &ClearingOutcome,
        results: &[MarketResult],
    ) -> Result<Self, serde_json::Error> {
        let accepted_orders = results.iter().filter(|r| r.accepted).count();
        Ok(Self {
            run_id,
            market: market.to_string(),
            first_interval: intervals.start,
            last_interval: intervals.end.saturating_sub(1),
            status: RunStatus::Settled,
            method: Some(outcome.method),
            intervals: outcome.intervals.clone(),
            total_welfare: outcome.welfare,
            accepted_orders,
            rejected_orders: results.len() - accepted_orders,
            book,
            solver_nodes: outcome.solver_nodes,
            proven_optimal: outcome.proven_optimal,
            failure_reason: None,
            result_digest: result_digest(results)?,
        })
    }

    /// Summary of a run whose solver failed
    pub(crate) fn failed(
        run_id: RunId,
        market: &str,
        intervals: std::ops::Range<usize>,
        book: BookStats,
        reason: String,
        results: &[MarketResult],
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            run_id,
            market: market.to_string(),
            first_interval: intervals.start,
            last_interval: intervals.end.saturating_sub(1),
            status: RunStatus::Failed,
            method: None,
            intervals: Vec::new(),
            total_welfare: 0.0,
            accepted_orders: 0,
            rejected_orders: results.len(),
            book,
            solver_nodes: 0,
            proven_optimal: false,
            failure_reason: Some(reason),
            result_digest: result_digest(results)?,
        })
    }

    /// Summary of an aborted run
    pub(crate) fn aborted(
        run_id: RunId,
        market: &str,
        intervals: std::ops::Range<usize>,
        book: BookStats,
    ) -> Self {
        Self {
            run_id,
            market: market.to_string(),
            first_interval: intervals.start,
            last_interval: intervals.end.saturating_sub(1),
            status: RunStatus::Aborted,
            method: None,
            intervals: Vec::new(),
            total_welfare: 0.0,
            accepted_orders: 0,
            rejected_orders: 0,
            book,
            solver_nodes: 0,
            proven_optimal: false,
            failure_reason: None,
            result_digest: EMPTY_RESULTS_DIGEST.to_string(),
        }
    }

    pub fn clearing_price(&self, interval: usize) -> Option<f64> {
        self.intervals
            .iter()
            .find(|i| i.interval == interval)
            .and_then(|i| i.clearing_price)
    }
}

/// Results of a settled run, shared with the publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    /// One result per order, in ID order
    pub results: Vec<MarketResult>,
}

impl RunReport {
    pub fn run_id(&self) -> RunId {
        self.summary.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.summary.status
    }

    pub fn result(&self, order_id: crate::models::OrderId) -> Option<&MarketResult> {
        self.results
            .binary_search_by_key(&order_id, |r| r.order_id)
            .ok()
            .map(|i| &self.results[i])
    }
}

/// Digest of a run without results, `sha256("[]")`
pub const EMPTY_RESULTS_DIGEST: &str =
    "4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945";

/// SHA-256 hex digest of the serialized results
///
/// Two runs over identical books produce identical digests.
pub fn result_digest(results: &[MarketResult]) -> Result<String, serde_json::Error> {
    json_digest(results)
}

fn json_digest<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    #[test]
    fn test_empty_digest_is_stable() {
        assert_eq!(result_digest(&[]).unwrap(), EMPTY_RESULTS_DIGEST);
    }

    #[test]
    fn test_unserializable_input_is_an_error() {
        // JSON object keys must be strings
        let mut keyed = BTreeMap::new();
        keyed.insert((1u8, 2u8), 0u8);
        assert!(json_digest(&keyed).is_err());
        assert!(json_digest(&[1u8, 2]).is_ok());
    }
}
