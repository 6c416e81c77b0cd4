//! Audit trail and event emission
//!
//! Policy decisions, migration phases and drift events are recorded through
//! two collaborators:
//!
//! - [`AuditSink`]: `append_audit_entry(tenant, actor, action, payload)`
//! - [`EventBus`]: `publish(event_name, payload)`
//!
//! Callers never talk to them directly. They enqueue onto an [`AuditQueue`],
//! a bounded channel drained by one background worker that retries failed
//! deliveries with exponential backoff (at-least-once delivery within the
//! retry budget).
//!
//! # Example
//!
//! ```rust,no_run
//! use action_kernel_audit::{AuditQueue, MemoryAuditLog, MemoryEventBus, QueueConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let log = Arc::new(MemoryAuditLog::new());
//!     let bus = Arc::new(MemoryEventBus::new());
//!     let (queue, _worker) = AuditQueue::spawn(log.clone(), bus, QueueConfig::default());
//!
//!     queue
//!         .append(Some("tenant-a"), "user-1", "acct.create.entry", serde_json::json!({"allowed": true}))
//!         .await
//!         .unwrap();
//!     queue.flush().await.unwrap();
//!     assert_eq!(log.entries().len(), 1);
//! }
//! ```

pub mod error;
pub mod memory;
pub mod queue;
pub mod record;

pub use error::{AuditError, AuditResult};
pub use memory::{MemoryAuditLog, MemoryEventBus};
pub use queue::{AuditQueue, QueueConfig, QueueStats};
pub use record::{AuditEntry, AuditSink, EventBus, EventRecord};
