//! Agent inboxes
//!
//! [`InboxRegistry`] is the sink agents read their results from. Clones share
//! the same inboxes: register one clone with the scheduler and keep another
//! for the agents.

use super::{PublishBatch, ResultSink, SinkError};
use crate::models::{AgentId, MarketResult, OrderId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inboxes {
    pending: BTreeMap<AgentId, VecDeque<MarketResult>>,
    /// Highest order pushed; IDs grow across runs, so anything at or below
    /// it is a redelivery
    last_delivered: Option<OrderId>,
    delivered: usize,
}

/// Per-agent result queues
///
/// # Example
/// ```
/// use market_clearing_core_rs::publisher::InboxRegistry;
/// use market_clearing_core_rs::AgentId;
///
/// let inbox = InboxRegistry::new();
/// assert_eq!(inbox.pending(&AgentId::from("PLANT_1")), 0);
/// assert!(inbox.drain(&AgentId::from("PLANT_1")).is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct InboxRegistry {
    inner: Arc<Mutex<Inboxes>>,
}

impl InboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all queued results of `agent`, oldest first
    pub fn drain(&self, agent: &AgentId) -> Vec<MarketResult> {
        let mut inner = self.inner.lock();
        inner
            .pending
            .remove(agent)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Number of queued results for `agent`
    pub fn pending(&self, agent: &AgentId) -> usize {
        self.inner
            .lock()
            .pending
            .get(agent)
            .map_or(0, VecDeque::len)
    }

    /// Number of distinct results delivered so far
    pub fn delivered_count(&self) -> usize {
        self.inner.lock().delivered
    }
}

impl ResultSink for InboxRegistry {
    fn name(&self) -> &str {
        "agent_inbox"
    }

    fn deliver(&mut self, batch: &PublishBatch) -> Result<(), SinkError> {
        let mut inner = self.inner.lock();
        for result in &batch.results {
            if inner.last_delivered.is_some_and(|last| result.order_id <= last) {
                continue;
            }
            inner.last_delivered = Some(result.order_id);
            inner.delivered += 1;
            inner
                .pending
                .entry(result.agent_id.clone())
                .or_default()
                .push_back(result.clone());
        }
        Ok(())
    }
}
