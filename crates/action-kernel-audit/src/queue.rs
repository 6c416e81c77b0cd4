//! Bounded audit/event queue with a retrying background worker
//!
//! Records are delivered in enqueue order. A failed delivery is retried with
//! exponential backoff (`initial_backoff_ms * 2^attempt`) up to `max_retries`
//! times, then logged and dropped so one bad record never stalls the queue.
//!
//! [`AuditQueue::append`], [`AuditQueue::record`] and [`AuditQueue::publish`]
//! never wait: when the queue is full the record is dropped, counted and
//! logged. The `*_guaranteed` variants wait for capacity instead.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{AuditError, AuditResult};
use crate::record::{AuditEntry, AuditSink, EventBus, EventRecord};

/// Queue and retry settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Channel capacity
    pub max_queue_size: usize,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Delay before the first retry, doubled on each further retry
    pub initial_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_retries: 3,
            initial_backoff_ms: 100,
        }
    }
}

impl QueueConfig {
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_retry(mut self, max_retries: u32, initial_backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff_ms = initial_backoff_ms;
        self
    }
}

/// Delivery counters, shared between the handle and the worker
#[derive(Debug, Default)]
pub struct QueueStats {
    delivered: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

impl QueueStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

enum Envelope {
    Audit(AuditEntry),
    Event(EventRecord),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle for enqueuing audit entries and events
#[derive(Clone)]
pub struct AuditQueue {
    sender: mpsc::Sender<Envelope>,
    stats: Arc<QueueStats>,
}

impl std::fmt::Debug for AuditQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditQueue")
            .field("capacity", &self.sender.max_capacity())
            .field("stats", &self.stats)
            .finish()
    }
}

impl AuditQueue {
    /// Start the background worker and return the enqueue handle
    ///
    /// The worker exits once every handle has been dropped and the queue is
    /// drained.
    pub fn spawn(
        sink: Arc<dyn AuditSink>,
        bus: Arc<dyn EventBus>,
        config: QueueConfig,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.max_queue_size.max(1));
        let stats = Arc::new(QueueStats::default());
        let worker = Worker {
            sink,
            bus,
            config,
            stats: Arc::clone(&stats),
        };
        let handle = tokio::spawn(worker.run(receiver));
        (Self { sender, stats }, handle)
    }

    /// Enqueue an audit entry built from its parts, dropping it if the queue is full
    pub async fn append(
        &self,
        tenant_id: Option<&str>,
        actor_id: &str,
        action_id: &str,
        payload: Value,
    ) -> AuditResult<()> {
        self.record(AuditEntry::new(tenant_id, actor_id, action_id, payload))
            .await
    }

    pub async fn record(&self, entry: AuditEntry) -> AuditResult<()> {
        self.offer(Envelope::Audit(entry))
    }

    /// Enqueue an audit entry, waiting for queue capacity
    pub async fn append_guaranteed(
        &self,
        tenant_id: Option<&str>,
        actor_id: &str,
        action_id: &str,
        payload: Value,
    ) -> AuditResult<()> {
        self.record_guaranteed(AuditEntry::new(tenant_id, actor_id, action_id, payload))
            .await
    }

    pub async fn record_guaranteed(&self, entry: AuditEntry) -> AuditResult<()> {
        self.enqueue(Envelope::Audit(entry)).await
    }

    /// Enqueue an event for the bus, dropping it if the queue is full
    pub async fn publish(&self, name: &str, payload: Value) -> AuditResult<()> {
        self.offer(Envelope::Event(EventRecord::new(name, payload)))
    }

    /// Wait until everything enqueued before this call has been handled
    pub async fn flush(&self) -> AuditResult<()> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Envelope::Flush(tx)).await?;
        rx.await.map_err(|_| AuditError::QueueClosed)
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    fn offer(&self, envelope: Envelope) -> AuditResult<()> {
        match self.sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                match &envelope {
                    Envelope::Audit(entry) => tracing::warn!(
                        entry_id = %entry.id,
                        action_id = %entry.action_id,
                        "Audit queue full, entry dropped"
                    ),
                    Envelope::Event(event) => tracing::warn!(
                        event_id = %event.id,
                        name = %event.name,
                        "Audit queue full, event dropped"
                    ),
                    Envelope::Flush(_) => {}
                }
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(AuditError::QueueClosed),
        }
    }

    async fn enqueue(&self, envelope: Envelope) -> AuditResult<()> {
        self.sender
            .send(envelope)
            .await
            .map_err(|_| AuditError::QueueClosed)
    }
}

struct Worker {
    sink: Arc<dyn AuditSink>,
    bus: Arc<dyn EventBus>,
    config: QueueConfig,
    stats: Arc<QueueStats>,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = receiver.recv().await {
            match envelope {
                Envelope::Audit(entry) => self.deliver_audit(&entry).await,
                Envelope::Event(event) => self.deliver_event(&event).await,
                Envelope::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("Audit queue closed, worker exiting");
    }

    async fn deliver_audit(&self, entry: &AuditEntry) {
        let mut attempt = 0u32;
        loop {
            match self.sink.append_audit_entry(entry).await {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        entry_id = %entry.id,
                        action_id = %entry.action_id,
                        "Audit entry recorded"
                    );
                    return;
                }
                Err(e) if attempt < self.config.max_retries => {
                    tracing::warn!(
                        entry_id = %entry.id,
                        attempt = attempt + 1,
                        error = %e,
                        "Audit append failed, retrying"
                    );
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        entry_id = %entry.id,
                        action_id = %entry.action_id,
                        error = %e,
                        "Audit entry dropped after exhausting retries"
                    );
                    return;
                }
            }
        }
    }

    async fn deliver_event(&self, event: &EventRecord) {
        let mut attempt = 0u32;
        loop {
            match self.bus.publish(event).await {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(event_id = %event.id, name = %event.name, "Event published");
                    return;
                }
                Err(e) if attempt < self.config.max_retries => {
                    tracing::warn!(
                        event_id = %event.id,
                        attempt = attempt + 1,
                        error = %e,
                        "Event publish failed, retrying"
                    );
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        event_id = %event.id,
                        name = %event.name,
                        error = %e,
                        "Event dropped after exhausting retries"
                    );
                    return;
                }
            }
        }
    }

    async fn backoff(&self, attempt: u32) {
        self.stats.retried.fetch_add(1, Ordering::Relaxed);
        let delay = self
            .config
            .initial_backoff_ms
            .saturating_mul(1u64 << attempt.min(16));
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
