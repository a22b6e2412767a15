//! Tests for result publishing
//!
//! Sinks run on worker threads, so timing-based tests keep generous margins
//! between the publish timeout and the artificial sink delays.

use market_clearing_core_rs::models::RunId;
use market_clearing_core_rs::publisher::{InboxRegistry, ResultPublisher};
use market_clearing_core_rs::scheduler::{IntervalScheduler, MarketConfig, RunReport};
use market_clearing_core_rs::{
    AgentId, Event, OrderRequest, PublishBatch, ResultSink, Side, SinkError, SubmissionHandle,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Helpers
// ============================================================================

fn crossing_bids(handle: &SubmissionHandle) {
    let first = handle.intervals().start;
    handle
        .submit(OrderRequest::simple("LOAD", Side::Demand, 100.0, 10.0, first))
        .unwrap();
    handle
        .submit(OrderRequest::simple("PLANT", Side::Supply, 60.0, 10.0, first))
        .unwrap();
}

/// Reports of `runs` consecutive single-interval runs
fn reports(runs: usize) -> Vec<Arc<RunReport>> {
    let config = MarketConfig {
        run_horizon_intervals: 1,
        simulation_horizon: runs,
        ..MarketConfig::default()
    };
    IntervalScheduler::new(config)
        .unwrap()
        .run_to_completion(crossing_bids)
        .unwrap()
}

fn batch(report: &RunReport) -> PublishBatch {
    PublishBatch {
        summary: report.summary.clone(),
        results: report.results.clone(),
        events: Vec::new(),
    }
}

/// Records the run and events of every batch it receives
#[derive(Clone, Default)]
struct RecordingSink {
    batches: Arc<Mutex<Vec<PublishBatch>>>,
}

impl RecordingSink {
    fn run_ids(&self) -> Vec<RunId> {
        self.batches.lock().iter().map(|b| b.summary.run_id).collect()
    }
}

impl ResultSink for RecordingSink {
    fn name(&self) -> &str {
        "recorder"
    }

    fn deliver(&mut self, batch: &PublishBatch) -> Result<(), SinkError> {
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

/// Sleeps on its first delivery only
struct SlowFirstSink {
    delay: Duration,
    calls: usize,
}

impl ResultSink for SlowFirstSink {
    fn name(&self) -> &str {
        "slow"
    }

    fn deliver(&mut self, _batch: &PublishBatch) -> Result<(), SinkError> {
        self.calls += 1;
        if self.calls == 1 {
            thread::sleep(self.delay);
        }
        Ok(())
    }
}

/// Fails the first `failures` deliveries
struct FlakySink {
    failures: usize,
    attempts: Arc<Mutex<usize>>,
}

impl ResultSink for FlakySink {
    fn name(&self) -> &str {
        "flaky"
    }

    fn deliver(&mut self, _batch: &PublishBatch) -> Result<(), SinkError> {
        let mut attempts = self.attempts.lock();
        *attempts += 1;
        if *attempts <= self.failures {
            Err(SinkError::Unavailable("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

struct BrokenSink;

impl ResultSink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    fn deliver(&mut self, _batch: &PublishBatch) -> Result<(), SinkError> {
        Err(SinkError::Rejected("schema mismatch".to_string()))
    }
}

// ============================================================================
// Delivery
// ============================================================================

#[test]
fn test_batches_delivered_in_run_order() {
    let recorder = RecordingSink::default();
    let mut publisher = ResultPublisher::new(Duration::from_secs(2), 0, 4);
    publisher.add_sink(Box::new(recorder.clone())).unwrap();
    assert_eq!(publisher.sink_names(), vec!["recorder"]);

    for report in reports(3) {
        let outcome = publisher.publish(batch(&report));
        assert!(outcome.all_delivered());
        assert_eq!(outcome.delivered, vec!["recorder".to_string()]);
    }

    assert_eq!(recorder.run_ids(), vec![RunId(0), RunId(1), RunId(2)]);
}

#[test]
fn test_publish_without_sinks_is_trivial() {
    let publisher = ResultPublisher::new(Duration::from_millis(10), 0, 1);
    let report = &reports(1)[0];
    let outcome = publisher.publish(batch(report));
    assert!(outcome.all_delivered());
    assert!(outcome.delivered.is_empty());
}

#[test]
fn test_flaky_sink_succeeds_within_retries() {
    let attempts = Arc::new(Mutex::new(0));
    let mut publisher = ResultPublisher::new(Duration::from_secs(2), 2, 4);
    publisher
        .add_sink(Box::new(FlakySink {
            failures: 2,
            attempts: Arc::clone(&attempts),
        }))
        .unwrap();

    let outcome = publisher.publish(batch(&reports(1)[0]));
    assert_eq!(outcome.delivered, vec!["flaky".to_string()]);
    assert_eq!(*attempts.lock(), 3);
}

#[test]
fn test_failing_sink_reported_after_retries() {
    let mut publisher = ResultPublisher::new(Duration::from_secs(2), 1, 4);
    publisher.add_sink(Box::new(BrokenSink)).unwrap();
    publisher.add_sink(Box::new(RecordingSink::default())).unwrap();

    let outcome = publisher.publish(batch(&reports(1)[0]));
    assert!(!outcome.all_delivered());
    assert_eq!(outcome.delivered, vec!["recorder".to_string()]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, "broken");
    assert!(outcome.failed[0].1.contains("schema mismatch"));
}

// ============================================================================
// Timeouts
// ============================================================================

#[test]
fn test_slow_sink_times_out_without_blocking_publish() {
    let recorder = RecordingSink::default();
    let mut publisher = ResultPublisher::new(Duration::from_millis(100), 0, 4);
    publisher
        .add_sink(Box::new(SlowFirstSink {
            delay: Duration::from_millis(500),
            calls: 0,
        }))
        .unwrap();
    publisher.add_sink(Box::new(recorder.clone())).unwrap();

    let all = reports(2);
    let started = Instant::now();
    let outcome = publisher.publish(batch(&all[0]));

    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(outcome.timed_out, vec!["slow".to_string()]);
    assert_eq!(outcome.delivered, vec!["recorder".to_string()]);

    // The late acknowledgement for run 0 must not count for run 1
    thread::sleep(Duration::from_millis(600));
    let outcome = publisher.publish(batch(&all[1]));
    assert!(outcome.all_delivered());
    assert_eq!(outcome.delivered.len(), 2);
    assert_eq!(recorder.run_ids(), vec![RunId(0), RunId(1)]);
}

#[test]
fn test_drop_does_not_wait_for_stuck_sink() {
    let mut publisher = ResultPublisher::new(Duration::from_millis(50), 0, 4);
    publisher
        .add_sink(Box::new(SlowFirstSink {
            delay: Duration::from_secs(3),
            calls: 0,
        }))
        .unwrap();

    let outcome = publisher.publish(batch(&reports(1)[0]));
    assert_eq!(outcome.timed_out, vec!["slow".to_string()]);

    let started = Instant::now();
    drop(publisher);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_scheduler_drop_does_not_wait_for_stuck_sink() {
    let config = MarketConfig {
        run_horizon_intervals: 1,
        simulation_horizon: 1,
        publish_timeout_ms: 50,
        ..MarketConfig::default()
    };
    let mut scheduler = IntervalScheduler::new(config).unwrap();
    scheduler
        .add_sink(Box::new(SlowFirstSink {
            delay: Duration::from_secs(3),
            calls: 0,
        }))
        .unwrap();
    scheduler.run_once(crossing_bids).unwrap();

    let started = Instant::now();
    drop(scheduler);
    assert!(started.elapsed() < Duration::from_secs(1));
}

// ============================================================================
// Agent inboxes
// ============================================================================

#[test]
fn test_inbox_delivers_each_result_once() {
    let inbox = InboxRegistry::new();
    let mut sink = inbox.clone();
    let report = &reports(1)[0];

    sink.deliver(&batch(report)).unwrap();
    sink.deliver(&batch(report)).unwrap();

    let load = AgentId::from("LOAD");
    assert_eq!(inbox.pending(&load), 1);
    assert_eq!(inbox.delivered_count(), 2);

    let results = inbox.drain(&load);
    assert_eq!(results.len(), 1);
    assert!(results[0].accepted);
    assert_eq!(inbox.pending(&load), 0);
    assert!(inbox.drain(&load).is_empty());
}

#[test]
fn test_inbox_ignores_stale_runs() {
    let inbox = InboxRegistry::new();
    let mut sink = inbox.clone();
    let all = reports(2);

    sink.deliver(&batch(&all[1])).unwrap();
    sink.deliver(&batch(&all[0])).unwrap();
    sink.deliver(&batch(&all[1])).unwrap();

    assert_eq!(inbox.delivered_count(), 2);
    let load = inbox.drain(&AgentId::from("LOAD"));
    let latest = all[1]
        .results
        .iter()
        .find(|r| r.agent_id == AgentId::from("LOAD"))
        .unwrap();
    assert_eq!(load.len(), 1);
    assert_eq!(load[0].order_id, latest.order_id);
}

#[test]
fn test_inbox_keeps_agents_separate() {
    let inbox = InboxRegistry::new();
    let mut sink = inbox.clone();
    for report in reports(2) {
        sink.deliver(&batch(&report)).unwrap();
    }

    let plant = inbox.drain(&AgentId::from("PLANT"));
    assert_eq!(plant.len(), 2);
    assert!(plant.iter().all(|r| r.agent_id == AgentId::from("PLANT")));
    assert!(plant[0].order_id < plant[1].order_id);
    assert_eq!(inbox.pending(&AgentId::from("LOAD")), 2);
}

// ============================================================================
// Scheduler integration
// ============================================================================

#[test]
fn test_scheduler_publishes_and_logs_timeouts() {
    let config = MarketConfig {
        run_horizon_intervals: 1,
        simulation_horizon: 2,
        publish_timeout_ms: 100,
        ..MarketConfig::default()
    };
    let mut scheduler = IntervalScheduler::new(config).unwrap();
    let inbox = InboxRegistry::new();
    let recorder = RecordingSink::default();
    scheduler.add_sink(Box::new(inbox.clone())).unwrap();
    scheduler.add_sink(Box::new(recorder.clone())).unwrap();
    scheduler
        .add_sink(Box::new(SlowFirstSink {
            delay: Duration::from_millis(400),
            calls: 0,
        }))
        .unwrap();

    scheduler.run_once(crossing_bids).unwrap();
    let timeouts = scheduler.event_log().events_of_type("PublishTimeout");
    assert_eq!(timeouts.len(), 1);
    assert_eq!(
        timeouts[0],
        &Event::PublishTimeout {
            run_id: RunId(0),
            sink: "slow".to_string()
        }
    );
    assert_eq!(inbox.pending(&AgentId::from("LOAD")), 1);

    thread::sleep(Duration::from_millis(500));
    scheduler.run_once(crossing_bids).unwrap();

    // The timeout of run 0 travels with the batch of run 1
    let batches = recorder.batches.lock();
    assert_eq!(batches.len(), 2);
    assert!(batches[0]
        .events
        .iter()
        .any(|e| e.event_type() == "RunSettled"));
    assert!(batches[1].events.iter().any(|e| matches!(
        e,
        Event::PublishTimeout { run_id: RunId(0), .. }
    )));
    assert_eq!(inbox.delivered_count(), 4);
}
