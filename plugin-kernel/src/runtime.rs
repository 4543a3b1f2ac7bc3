//! # Plugin Runtime
//!
//! Per-plugin lifecycle state machine owning one [`InstancePool`], a
//! label/weight routing policy, and traffic statistics. `select_instance`
//! implements a four-step selection algorithm modeled on a dispatch-by-strategy
//! shape, rewritten around instance labels instead of named routing strategies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;

use plugin_kernel_sdk::routing::{score_labels, LabelScore, Labels, RoutingDecision};

use crate::error::KernelError;
use crate::instance::{InstancePool, PluginInstance};

/// Lifecycle state of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    Installed,
    Loaded,
    Active,
    Stopping,
    Uninstalled,
}

impl RuntimeStatus {
    /// Whether `self -> next` is a legal edge in the state diagram.
    fn can_transition_to(self, next: RuntimeStatus) -> bool {
        use RuntimeStatus::*;
        matches!(
            (self, next),
            (Installed, Loaded)
                | (Loaded, Active)
                | (Active, Loaded)
                | (Loaded, Stopping)
                | (Active, Stopping)
                | (Stopping, Uninstalled)
        )
    }
}

/// Monotonic request counters plus a resettable window start.
///
/// This struct is the kernel's single writer for traffic stats — nothing
/// outside [`PluginRuntime::select_instance`] increments these counters,
/// which avoids double-counting a call that crosses multiple proxies.
#[derive(Default)]
pub struct TrafficStats {
    total: AtomicU64,
    stable: AtomicU64,
    canary: AtomicU64,
    window_start: RwLock<Option<Instant>>,
}

#[derive(Debug, Clone, Copy)]
pub struct TrafficSnapshot {
    pub total: u64,
    pub stable: u64,
    pub canary: u64,
}

impl TrafficStats {
    fn record(&self, decision: RoutingDecision) {
        self.window_start.write().get_or_insert_with(Instant::now);
        self.total.fetch_add(1, Ordering::Relaxed);
        match decision {
            RoutingDecision::Stable => self.stable.fetch_add(1, Ordering::Relaxed),
            RoutingDecision::Canary => self.canary.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            total: self.total.load(Ordering::Relaxed),
            stable: self.stable.load(Ordering::Relaxed),
            canary: self.canary.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.stable.store(0, Ordering::Relaxed);
        self.canary.store(0, Ordering::Relaxed);
        *self.window_start.write() = Some(Instant::now());
    }
}

/// Per-plugin lifecycle owner: one instance pool, a status machine, and
/// traffic stats. The manager holds runtimes keyed by plugin id; the proxy
/// resolves a runtime by id on every call rather than caching a reference,
/// so blue/green swaps are transparent to callers mid-flight.
pub struct PluginRuntime {
    pub plugin_id: String,
    pub pool: InstancePool,
    status: RwLock<RuntimeStatus>,
    pub stats: TrafficStats,
    pub created_at: Instant,
    stopping_since: RwLock<Option<Instant>>,
}

impl PluginRuntime {
    pub fn new(plugin_id: impl Into<String>, max_dying: usize) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            pool: InstancePool::new(max_dying),
            status: RwLock::new(RuntimeStatus::Installed),
            stats: TrafficStats::default(),
            created_at: Instant::now(),
            stopping_since: RwLock::new(None),
        }
    }

    pub fn status(&self) -> RuntimeStatus {
        *self.status.read()
    }

    pub fn transition(&self, next: RuntimeStatus) -> Result<(), KernelError> {
        let mut status = self.status.write();
        if !status.can_transition_to(next) {
            return Err(KernelError::InvalidArgument(format!(
                "illegal transition {:?} -> {:?} for plugin '{}'",
                *status, next, self.plugin_id
            )));
        }
        if next == RuntimeStatus::Stopping {
            *self.stopping_since.write() = Some(Instant::now());
        }
        *status = next;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status() == RuntimeStatus::Active
    }

    /// Elapsed time since entering `STOPPING`, if applicable.
    pub fn stopping_elapsed(&self) -> Option<Duration> {
        self.stopping_since.read().map(|t| t.elapsed())
    }

    /// Select a target instance for one call:
    /// 1. gather active `READY` instances;
    /// 2. empty labels -> single candidate or weighted random;
    /// 3. non-empty labels -> highest label score, rejecting on conflict;
    /// 4. fall back to the default if no candidate passes.
    ///
    /// Records the routing decision (stable vs. canary) into traffic stats.
    pub fn select_instance(&self, labels: &Labels) -> Option<Arc<PluginInstance>> {
        let candidates: Vec<Arc<PluginInstance>> = self
            .pool
            .active_instances()
            .into_iter()
            .filter(|i| i.is_ready())
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let chosen = if labels.is_empty() {
            if candidates.len() == 1 {
                Some(candidates[0].clone())
            } else {
                Some(weighted_random(&candidates))
            }
        } else {
            self.select_by_labels(&candidates, labels)
        };

        let chosen = chosen.or_else(|| self.pool.default_instance())?;
        let decision = match self.pool.default_instance() {
            Some(def) if Arc::ptr_eq(&def, &chosen) => RoutingDecision::Stable,
            Some(_) => RoutingDecision::Canary,
            None => RoutingDecision::Stable,
        };
        self.stats.record(decision);
        Some(chosen)
    }

    fn select_by_labels(
        &self,
        candidates: &[Arc<PluginInstance>],
        requested: &Labels,
    ) -> Option<Arc<PluginInstance>> {
        let mut best: Option<(u32, usize)> = None;
        for (idx, inst) in candidates.iter().enumerate() {
            match score_labels(&inst.labels, requested) {
                LabelScore::Rejected => continue,
                LabelScore::Matched(score) => {
                    if best.map(|(s, _)| score > s).unwrap_or(true) {
                        best = Some((score, idx));
                    }
                }
            }
        }
        best.map(|(_, idx)| candidates[idx].clone())
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

/// Weighted-random selection over `traffic_weight`; falls back to the first
/// candidate if all weights sum to zero.
fn weighted_random(candidates: &[Arc<PluginInstance>]) -> Arc<PluginInstance> {
    let total: u64 = candidates.iter().map(|i| i.traffic_weight as u64).sum();
    if total == 0 {
        return candidates[0].clone();
    }
    let mut roll = rand::thread_rng().gen_range(0..total);
    for inst in candidates {
        let w = inst.traffic_weight as u64;
        if roll < w {
            return inst.clone();
        }
        roll -= w;
    }
    candidates[candidates.len() - 1].clone()
}
