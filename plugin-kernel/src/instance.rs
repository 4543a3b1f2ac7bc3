//! # Plugin Instance & Instance Pool
//!
//! One [`PluginInstance`] exists per deployed `(plugin, version)` pair; an
//! [`InstancePool`] holds every instance currently active or dying for a
//! single plugin id. The pool's `default` pointer is the router's fallback
//! target and must stay lock-free for readers (`arc-swap`, pulled in
//! specifically for this linearizable-pointer requirement).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use plugin_kernel_sdk::PluginContainer;

/// Lifecycle state of one deployed instance. `READY -> DYING` is the only
/// transition before destruction; destruction requires `DYING` with zero
/// inflight calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Ready,
    Dying,
    Destroyed,
}

/// One deployed `(plugin, version)` pair: the container handle, its
/// definition, an inflight-call counter that is never allowed negative, and
/// the labels a routing request can match against.
pub struct PluginInstance {
    pub plugin_id: String,
    pub version: String,
    pub container: Arc<dyn PluginContainer>,
    pub labels: std::collections::HashMap<String, String>,
    pub traffic_weight: u32,
    pub created_at: Instant,
    state: Mutex<InstanceState>,
    inflight: AtomicI64,
}

impl PluginInstance {
    pub fn new(
        plugin_id: impl Into<String>,
        version: impl Into<String>,
        container: Arc<dyn PluginContainer>,
        labels: std::collections::HashMap<String, String>,
        traffic_weight: u32,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            version: version.into(),
            container,
            labels,
            traffic_weight,
            created_at: Instant::now(),
            state: Mutex::new(InstanceState::Ready),
            inflight: AtomicI64::new(0),
        }
    }

    pub fn state(&self) -> InstanceState {
        *self.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), InstanceState::Ready)
    }

    pub fn inflight(&self) -> i64 {
        self.inflight.load(Ordering::Acquire)
    }

    /// Atomically test `state == READY` and bump the inflight counter. Fails
    /// once the instance has moved to `DYING` or `DESTROYED`.
    pub fn try_enter(&self) -> bool {
        let state = self.state.lock();
        if *state != InstanceState::Ready {
            return false;
        }
        self.inflight.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Balances a prior `try_enter`. Never lets the counter go negative.
    pub fn exit(&self) {
        let prev = self.inflight.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            Some((v - 1).max(0))
        });
        debug_assert!(prev.unwrap_or(0) >= 0);
    }

    fn mark_dying(&self) {
        *self.state.lock() = InstanceState::Dying;
    }

    fn mark_destroyed(&self) {
        *self.state.lock() = InstanceState::Destroyed;
    }
}

/// Per-plugin holder of active instances and a bounded dying queue.
///
/// Invariants: an instance is in exactly one of {active, dying, destroyed};
/// `default`, if set, is active and `READY`; the dying queue never exceeds
/// `max_dying`.
pub struct InstancePool {
    active: Mutex<Vec<Arc<PluginInstance>>>,
    default: ArcSwapOption<PluginInstance>,
    dying: Mutex<VecDeque<Arc<PluginInstance>>>,
    max_dying: usize,
}

impl InstancePool {
    pub fn new(max_dying: usize) -> Self {
        Self {
            active: Mutex::new(Vec::new()),
            default: ArcSwapOption::from(None),
            dying: Mutex::new(VecDeque::new()),
            max_dying,
        }
    }

    pub fn default_instance(&self) -> Option<Arc<PluginInstance>> {
        self.default.load_full()
    }

    pub fn active_instances(&self) -> Vec<Arc<PluginInstance>> {
        self.active.lock().clone()
    }

    /// Insert `inst` into the active set. If `set_default`, swap the default
    /// pointer and return whatever instance was previously default.
    pub fn add(&self, inst: Arc<PluginInstance>, set_default: bool) -> Option<Arc<PluginInstance>> {
        self.active.lock().push(inst.clone());
        if set_default {
            self.default.swap(Some(inst))
        } else {
            None
        }
    }

    /// Retire `inst`: clear it from `default` if it was the default, remove
    /// it from the active set, mark it `DYING`, and append to the bounded
    /// dying queue. No-op if `inst` is already dying/destroyed or not active.
    pub fn move_to_dying(&self, inst: &Arc<PluginInstance>) {
        if matches!(inst.state(), InstanceState::Dying | InstanceState::Destroyed) {
            return;
        }
        if let Some(cur) = self.default.load_full() {
            if Arc::ptr_eq(&cur, inst) {
                self.default.store(None);
            }
        }
        self.active.lock().retain(|i| !Arc::ptr_eq(i, inst));
        inst.mark_dying();
        self.dying.lock().push_back(inst.clone());
    }

    /// For each dying entry with zero inflight calls, remove it and invoke
    /// `destroy_fn` exactly once. Returns the count cleaned.
    pub fn cleanup_idle(&self, destroy_fn: impl Fn(&Arc<PluginInstance>)) -> usize {
        let snapshot: Vec<Arc<PluginInstance>> = self.dying.lock().iter().cloned().collect();
        let mut cleaned = 0;
        for inst in snapshot {
            if inst.inflight() != 0 {
                continue;
            }
            let mut dying = self.dying.lock();
            let before = dying.len();
            dying.retain(|i| !Arc::ptr_eq(i, &inst));
            let removed = dying.len() < before;
            drop(dying);
            if removed {
                inst.mark_destroyed();
                destroy_fn(&inst);
                cleaned += 1;
            }
        }
        cleaned
    }

    /// Unconditionally destroy every dying entry regardless of inflight
    /// count. Used during shutdown once the grace period expires.
    pub fn force_cleanup_all(&self, destroy_fn: impl Fn(&Arc<PluginInstance>)) -> usize {
        let drained: Vec<Arc<PluginInstance>> = self.dying.lock().drain(..).collect();
        for inst in &drained {
            inst.mark_destroyed();
            destroy_fn(inst);
        }
        drained.len()
    }

    /// Clear the default pointer and move every active instance to dying.
    /// Returns the list of instances moved.
    pub fn shutdown(&self) -> Vec<Arc<PluginInstance>> {
        self.default.store(None);
        let active: Vec<Arc<PluginInstance>> = self.active.lock().drain(..).collect();
        for inst in &active {
            inst.mark_dying();
            self.dying.lock().push_back(inst.clone());
        }
        active
    }

    pub fn can_add_instance(&self) -> bool {
        self.dying.lock().len() < self.max_dying
    }

    pub fn has_available_instance(&self) -> bool {
        self.active.lock().iter().any(|i| i.is_ready())
    }

    pub fn dying_len(&self) -> usize {
        self.dying.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use plugin_kernel_sdk::{CodeDomain, PluginContext};
    use std::any::Any;
    use std::collections::HashMap;

    struct NullDomain;
    impl CodeDomain for NullDomain {
        fn name(&self) -> &str {
            "null"
        }
    }

    struct NullContainer;
    #[async_trait]
    impl PluginContainer for NullContainer {
        async fn start(&self, _ctx: PluginContext) -> Result<(), plugin_kernel_sdk::SdkError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), plugin_kernel_sdk::SdkError> {
            Ok(())
        }
        fn is_active(&self) -> bool {
            true
        }
        fn lookup(&self, _interface: &str) -> Option<Arc<dyn Any + Send + Sync>> {
            None
        }
        fn code_domain(&self) -> Arc<dyn CodeDomain> {
            Arc::new(NullDomain)
        }
    }

    fn instance(plugin: &str, version: &str) -> Arc<PluginInstance> {
        Arc::new(PluginInstance::new(
            plugin,
            version,
            Arc::new(NullContainer),
            HashMap::new(),
            100,
        ))
    }

    #[test]
    fn try_enter_then_exit_is_balanced() {
        let inst = instance("p", "1.0.0");
        assert!(inst.try_enter());
        assert_eq!(inst.inflight(), 1);
        inst.exit();
        assert_eq!(inst.inflight(), 0);
    }

    #[test]
    fn try_enter_fails_once_dying() {
        let pool = InstancePool::new(5);
        let inst = instance("p", "1.0.0");
        pool.add(inst.clone(), true);
        pool.move_to_dying(&inst);
        assert!(!inst.try_enter());
    }

    #[test]
    fn add_with_set_default_swaps_and_returns_previous() {
        let pool = InstancePool::new(5);
        let a = instance("p", "1.0.0");
        let b = instance("p", "2.0.0");
        assert!(pool.add(a.clone(), true).is_none());
        let prev = pool.add(b.clone(), true).unwrap();
        assert!(Arc::ptr_eq(&prev, &a));
        assert!(Arc::ptr_eq(&pool.default_instance().unwrap(), &b));
    }

    #[test]
    fn move_to_dying_clears_default_if_it_was_default() {
        let pool = InstancePool::new(5);
        let a = instance("p", "1.0.0");
        pool.add(a.clone(), true);
        pool.move_to_dying(&a);
        assert!(pool.default_instance().is_none());
        assert_eq!(pool.dying_len(), 1);
    }

    #[test]
    fn move_to_dying_is_noop_on_already_dying() {
        let pool = InstancePool::new(5);
        let a = instance("p", "1.0.0");
        pool.add(a.clone(), true);
        pool.move_to_dying(&a);
        pool.move_to_dying(&a);
        assert_eq!(pool.dying_len(), 1);
    }

    #[test]
    fn dying_queue_respects_capacity_and_cleanup_frees_a_slot() {
        let pool = InstancePool::new(2);
        let a = instance("p", "1.0.0");
        let b = instance("p", "2.0.0");
        pool.add(a.clone(), false);
        pool.add(b.clone(), false);
        pool.move_to_dying(&a);
        pool.move_to_dying(&b);
        assert!(!pool.can_add_instance());
        let cleaned = pool.cleanup_idle(|_| {});
        assert_eq!(cleaned, 2);
        assert!(pool.can_add_instance());
    }

    #[test]
    fn cleanup_idle_skips_instances_with_inflight_calls() {
        let pool = InstancePool::new(5);
        let a = instance("p", "1.0.0");
        pool.add(a.clone(), true);
        assert!(a.try_enter());
        pool.move_to_dying(&a);
        let cleaned = pool.cleanup_idle(|_| {});
        assert_eq!(cleaned, 0);
        a.exit();
        let cleaned = pool.cleanup_idle(|_| {});
        assert_eq!(cleaned, 1);
    }

    #[test]
    fn force_cleanup_all_destroys_regardless_of_inflight() {
        let pool = InstancePool::new(5);
        let a = instance("p", "1.0.0");
        pool.add(a.clone(), true);
        assert!(a.try_enter());
        pool.move_to_dying(&a);
        let destroyed = std::sync::atomic::AtomicUsize::new(0);
        pool.force_cleanup_all(|_| {
            destroyed.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(a.state(), InstanceState::Destroyed);
    }

    #[test]
    fn shutdown_moves_everything_to_dying_and_clears_default() {
        let pool = InstancePool::new(5);
        let a = instance("p", "1.0.0");
        let b = instance("p", "2.0.0");
        pool.add(a.clone(), true);
        pool.add(b.clone(), false);
        let moved = pool.shutdown();
        assert_eq!(moved.len(), 2);
        assert!(pool.default_instance().is_none());
        assert_eq!(pool.dying_len(), 2);
    }
}
