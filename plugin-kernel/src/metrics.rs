//! # Kernel Metrics
//!
//! Process-wide counters a host can poll or expose through its own metrics
//! surface (Prometheus, logs, whatever it already uses — wiring an exporter
//! is the host's job, this module only accumulates the numbers). Plain
//! atomic counters, no exporter wiring of its own.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::manager::PluginManager;

/// A point-in-time read of the counters below, cheap to clone and log.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub active_plugin_count: usize,
    pub total_invocations: u64,
    pub total_denied: u64,
    pub total_bulkhead_rejections: u64,
    pub total_timeouts: u64,
    pub audit_dropped_count: u64,
}

/// Monotonic counters incremented by the governance kernel's event stream.
/// Cheap, lock-free writes (`Relaxed` is sufficient — these are reported
/// counters, not synchronization points).
#[derive(Default)]
pub struct KernelMetrics {
    total_invocations: AtomicU64,
    total_denied: AtomicU64,
    total_bulkhead_rejections: AtomicU64,
    total_timeouts: AtomicU64,
}

impl KernelMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_invocation(&self) {
        self.total_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.total_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bulkhead_rejection(&self) {
        self.total_bulkhead_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Read just this process's own counters, with no catalog/audit join —
    /// for callers that only have a kernel handle, not a manager.
    pub fn snapshot_counters(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_plugin_count: 0,
            total_invocations: self.total_invocations.load(Ordering::Relaxed),
            total_denied: self.total_denied.load(Ordering::Relaxed),
            total_bulkhead_rejections: self.total_bulkhead_rejections.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            audit_dropped_count: 0,
        }
    }

    /// Combine this process's counters with a manager's live catalog size
    /// and the audit executor's drop count into one snapshot.
    pub fn snapshot(&self, manager: &PluginManager) -> MetricsSnapshot {
        MetricsSnapshot {
            active_plugin_count: manager.get_installed_plugins().len(),
            audit_dropped_count: manager.kernel().audit_executor().dropped_count(),
            ..self.snapshot_counters()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use std::sync::Arc;

    #[test]
    fn snapshot_reflects_recorded_counters_and_empty_catalog() {
        let metrics = KernelMetrics::new();
        metrics.record_invocation();
        metrics.record_invocation();
        metrics.record_denied();
        let manager = Arc::new(PluginManager::new(HostConfig::default()));
        let snap = metrics.snapshot(&manager);
        assert_eq!(snap.total_invocations, 2);
        assert_eq!(snap.total_denied, 1);
        assert_eq!(snap.active_plugin_count, 0);
        assert_eq!(snap.audit_dropped_count, 0);
    }
}
