//! Sink worker threads
//!
//! Each sink owns a thread and a bounded job queue. Publishing enqueues the
//! batch for every sink without blocking, then collects acknowledgements
//! until all sinks answered or the timeout elapsed. Acknowledgements that
//! arrive late are tagged with their run and skipped by later publishes.
//!
//! Dropping the publisher closes every queue and waits up to the timeout for
//! the workers to exit. A worker still stuck in `deliver` is detached.

use super::{PublishBatch, PublishOutcome, ResultSink};
use crate::models::RunId;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct Job {
    run_id: RunId,
    batch: Arc<PublishBatch>,
}

enum Ack {
    Delivered,
    Failed(String),
}

struct AckMessage {
    sink: usize,
    run_id: RunId,
    ack: Ack,
}

struct SinkWorker {
    name: String,
    jobs: Option<Sender<Job>>,
    /// Disconnects when the worker thread exits
    exited: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

enum Delivery {
    Pending,
    Delivered,
    TimedOut,
    Failed(String),
}

/// Fans published batches out to sink worker threads
pub struct ResultPublisher {
    workers: Vec<SinkWorker>,
    acks_tx: Sender<AckMessage>,
    acks_rx: Receiver<AckMessage>,
    timeout: Duration,
    max_retries: u32,
    queue_capacity: usize,
}

impl ResultPublisher {
    pub fn new(timeout: Duration, max_retries: u32, queue_capacity: usize) -> Self {
        let (acks_tx, acks_rx) = unbounded();
        Self {
            workers: Vec::new(),
            acks_tx,
            acks_rx,
            timeout,
            max_retries,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Start a worker thread for `sink`
    pub fn add_sink(&mut self, mut sink: Box<dyn ResultSink>) -> io::Result<()> {
        let index = self.workers.len();
        let name = sink.name().to_string();
        let (jobs_tx, jobs_rx) = bounded::<Job>(self.queue_capacity);
        let (exit_tx, exited) = bounded::<()>(1);
        let acks = self.acks_tx.clone();
        let max_retries = self.max_retries;
        let sink_name = name.clone();

        let thread = thread::Builder::new()
            .name(format!("sink-{name}"))
            .spawn(move || {
                let _exit = exit_tx;
                for job in jobs_rx {
                    let mut attempt = 0;
                    let ack = loop {
                        match sink.deliver(&job.batch) {
                            Ok(()) => break Ack::Delivered,
                            Err(err) if attempt < max_retries => {
                                attempt += 1;
                                debug!(
                                    sink = %sink_name,
                                    run_id = %job.run_id,
                                    attempt,
                                    error = %err,
                                    "retrying delivery"
                                );
                            }
                            Err(err) => break Ack::Failed(err.to_string()),
                        }
                    };
                    let message = AckMessage {
                        sink: index,
                        run_id: job.run_id,
                        ack,
                    };
                    // Publisher gone; nothing left to report to
                    if acks.send(message).is_err() {
                        break;
                    }
                }
            })?;

        self.workers.push(SinkWorker {
            name,
            jobs: Some(jobs_tx),
            exited,
            thread: Some(thread),
        });
        Ok(())
    }

    pub fn sink_count(&self) -> usize {
        self.workers.len()
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name.as_str()).collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deliver `batch` to every sink, waiting at most the timeout overall
    pub fn publish(&self, batch: PublishBatch) -> PublishOutcome {
        let run_id = batch.summary.run_id;
        let batch = Arc::new(batch);
        let mut status: Vec<Delivery> = Vec::with_capacity(self.workers.len());

        for worker in &self.workers {
            let job = Job {
                run_id,
                batch: Arc::clone(&batch),
            };
            let delivery = match worker.jobs.as_ref().map(|tx| tx.try_send(job)) {
                Some(Ok(())) => Delivery::Pending,
                Some(Err(TrySendError::Full(_))) => Delivery::TimedOut,
                Some(Err(TrySendError::Disconnected(_))) | None => {
                    Delivery::Failed("sink worker stopped".to_string())
                }
            };
            status.push(delivery);
        }

        let deadline = Instant::now() + self.timeout;
        let mut pending = status
            .iter()
            .filter(|s| matches!(s, Delivery::Pending))
            .count();
        while pending > 0 {
            match self.acks_rx.recv_deadline(deadline) {
                Ok(message) => {
                    if message.run_id != run_id {
                        debug!(run_id = %message.run_id, "skipping late acknowledgement");
                        continue;
                    }
                    let Some(slot) = status.get_mut(message.sink) else {
                        continue;
                    };
                    if matches!(slot, Delivery::Pending) {
                        *slot = match message.ack {
                            Ack::Delivered => Delivery::Delivered,
                            Ack::Failed(reason) => Delivery::Failed(reason),
                        };
                        pending -= 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut outcome = PublishOutcome::default();
        for (worker, delivery) in self.workers.iter().zip(status) {
            match delivery {
                Delivery::Delivered => outcome.delivered.push(worker.name.clone()),
                Delivery::Pending | Delivery::TimedOut => {
                    warn!(sink = %worker.name, %run_id, "sink did not acknowledge in time");
                    outcome.timed_out.push(worker.name.clone());
                }
                Delivery::Failed(reason) => {
                    warn!(sink = %worker.name, %run_id, reason = %reason, "delivery failed");
                    outcome.failed.push((worker.name.clone(), reason));
                }
            }
        }
        outcome
    }
}

impl Drop for ResultPublisher {
    fn drop(&mut self) {
        // Closing the job queues ends each worker loop
        for worker in &mut self.workers {
            worker.jobs.take();
        }
        let deadline = Instant::now() + self.timeout;
        for worker in &mut self.workers {
            let Some(thread) = worker.thread.take() else {
                continue;
            };
            match worker.exited.recv_deadline(deadline) {
                Err(RecvTimeoutError::Timeout) => {
                    warn!(sink = %worker.name, "sink worker still busy; detaching");
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    let _ = thread.join();
                }
            }
        }
    }
}

impl std::fmt::Debug for ResultPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultPublisher")
            .field("sinks", &self.sink_names())
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
