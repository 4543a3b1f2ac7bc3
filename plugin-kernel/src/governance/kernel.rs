//! # Governance Kernel
//!
//! The per-invocation pipeline: trace propagation, policy
//! resolution, permission enforcement, bulkhead admission, timeout, dispatch,
//! audit emission, and cleanup. Every stage translates its own failures into
//! the [`KernelError`] taxonomy rather than leaking a raw internal fault;
//! `dispatch_fn`'s own `Err` (a business-domain failure from the plugin) is
//! passed through unchanged to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Semaphore;
use uuid::Uuid;

use plugin_kernel_sdk::PluginDefinition;

use crate::context::{InvocationContext, TraceDepthGuard};
use crate::error::KernelError;
use crate::governance::audit::{AuditExecutor, AuditRecord, EventBus, KernelEvent};
use crate::governance::permission::PermissionService;
use crate::governance::policy::{PolicyChain, PolicyQuery};
use crate::metrics::KernelMetrics;
use crate::runtime::PluginRuntime;

/// Tunables the kernel applies uniformly unless a governance decision
/// overrides the timeout for a specific call.
#[derive(Debug, Clone, Copy)]
pub struct KernelSettings {
    pub bulkhead_max_concurrent: usize,
    pub bulkhead_acquire_timeout: Duration,
    pub host_governance_enabled: bool,
    pub host_governance_internal_calls: bool,
}

/// Ties the policy chain, permission service, audit executor, and event bus
/// together around one `invoke` entry point. One kernel instance serves
/// every plugin; per-runtime bulkhead semaphores are created lazily and
/// cached by plugin id.
pub struct GovernanceKernel {
    policy_chain: PolicyChain,
    permission_service: Arc<PermissionService>,
    audit_executor: Arc<AuditExecutor>,
    event_bus: Arc<EventBus>,
    settings: KernelSettings,
    bulkheads: DashMap<String, Arc<Semaphore>>,
    metrics: Arc<KernelMetrics>,
}

impl GovernanceKernel {
    pub fn new(
        policy_chain: PolicyChain,
        permission_service: Arc<PermissionService>,
        audit_executor: Arc<AuditExecutor>,
        event_bus: Arc<EventBus>,
        settings: KernelSettings,
    ) -> Self {
        Self::with_metrics(
            policy_chain,
            permission_service,
            audit_executor,
            event_bus,
            settings,
            Arc::new(KernelMetrics::new()),
        )
    }

    pub fn with_metrics(
        policy_chain: PolicyChain,
        permission_service: Arc<PermissionService>,
        audit_executor: Arc<AuditExecutor>,
        event_bus: Arc<EventBus>,
        settings: KernelSettings,
        metrics: Arc<KernelMetrics>,
    ) -> Self {
        Self {
            policy_chain,
            permission_service,
            audit_executor,
            event_bus,
            settings,
            bulkheads: DashMap::new(),
            metrics,
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn audit_executor(&self) -> &Arc<AuditExecutor> {
        &self.audit_executor
    }

    pub fn metrics(&self) -> &Arc<KernelMetrics> {
        &self.metrics
    }

    fn bulkhead_for(&self, plugin_id: &str) -> Arc<Semaphore> {
        self.bulkheads
            .entry(plugin_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.settings.bulkhead_max_concurrent)))
            .clone()
    }

    /// Run one invocation through the full pipeline. `dispatch_fn` performs
    /// the actual call (typically: select an instance, `try_enter`, invoke
    /// the container, `exit`); its `Err` is the plugin's own failure and is
    /// returned unchanged to the caller.
    pub async fn invoke<R, F, Fut>(
        &self,
        runtime: &Arc<PluginRuntime>,
        definition: &PluginDefinition,
        method: &str,
        ctx: &mut InvocationContext,
        dispatch_fn: F,
    ) -> Result<R, KernelError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, KernelError>>,
    {
        // 1. Trace propagation.
        if ctx.trace_id.is_empty() {
            ctx.trace_id = Uuid::new_v4().to_string();
        }
        let _trace_guard = TraceDepthGuard::enter();

        // 2. Policy resolution, merged into the context.
        let query = PolicyQuery {
            plugin_id: &runtime.plugin_id,
            method,
            caller_plugin_id: &ctx.caller_plugin_id,
            definition,
        };
        let decision = self.policy_chain.resolve(&query);
        ctx.required_permission = decision.required_permission.clone();
        ctx.access_type = Some(decision.access_type);
        ctx.audit_action = decision.audit_action.clone();
        ctx.should_audit = decision.should_audit;
        ctx.timeout = Some(decision.timeout);

        let start = Instant::now();

        // 3. Permission enforcement.
        const HOST_APP: &str = "host-app";
        let caller_is_host = ctx.caller_plugin_id == HOST_APP;
        let target_is_host = runtime.plugin_id == HOST_APP;
        let bypass_host_governance = caller_is_host
            && (!self.settings.host_governance_enabled
                || (target_is_host && !self.settings.host_governance_internal_calls));
        if !bypass_host_governance {
            let allowed = self.permission_service.is_allowed(
                Some(&ctx.caller_plugin_id),
                &ctx.required_permission,
                decision.access_type,
            );
            if !allowed {
                self.audit_denied(ctx, start);
                self.metrics.record_denied();
                return Err(KernelError::PermissionDenied {
                    caller: ctx.caller_plugin_id.clone(),
                    permission: ctx.required_permission.clone(),
                    access_type: decision.access_type,
                });
            }
        }

        // 4. Bulkhead admission.
        let bulkhead = self.bulkhead_for(&runtime.plugin_id);
        let permit = tokio::time::timeout(
            self.settings.bulkhead_acquire_timeout,
            bulkhead.acquire_owned(),
        )
        .await;
        let _permit = match permit {
            Ok(Ok(permit)) => permit,
            _ => {
                self.event_bus.publish(KernelEvent::InvocationRejected {
                    trace_id: ctx.trace_id.clone(),
                    plugin_id: runtime.plugin_id.clone(),
                    reason: "bulkhead full".to_string(),
                });
                self.metrics.record_bulkhead_rejection();
                return Err(KernelError::BulkheadFull {
                    plugin_id: runtime.plugin_id.clone(),
                });
            }
        };

        self.event_bus.publish(KernelEvent::InvocationStarted {
            trace_id: ctx.trace_id.clone(),
            plugin_id: runtime.plugin_id.clone(),
        });

        // 5+6. Timeout-wrapped dispatch.
        let timeout = decision.timeout;
        let result = tokio::time::timeout(timeout, dispatch_fn()).await;

        let outcome = match result {
            Ok(inner) => inner,
            Err(_) => {
                self.metrics.record_timeout();
                Err(KernelError::TimedOut {
                    millis: timeout.as_millis() as u64,
                })
            }
        };
        self.metrics.record_invocation();

        // 7. Audit and event emission.
        let duration = start.elapsed();
        if ctx.should_audit {
            self.audit_executor.enqueue(AuditRecord {
                trace_id: ctx.trace_id.clone(),
                caller_plugin_id: ctx.caller_plugin_id.clone(),
                action: ctx.audit_action.clone(),
                resource: ctx.resource_id.clone(),
                args_fingerprint: fingerprint(ctx),
                result_summary: if outcome.is_ok() { "ok".to_string() } else { "error".to_string() },
                duration_nanos: duration.as_nanos() as u64,
                success: outcome.is_ok(),
            });
        }
        self.event_bus.publish(KernelEvent::InvocationCompleted {
            trace_id: ctx.trace_id.clone(),
            plugin_id: runtime.plugin_id.clone(),
            success: outcome.is_ok(),
            duration_ms: duration.as_millis() as u64,
        });

        // 8. Cleanup: the bulkhead permit drops here, the trace guard drops
        // when this function returns.
        outcome
    }

    fn audit_denied(&self, ctx: &InvocationContext, start: Instant) {
        self.permission_service.audit(
            &ctx.caller_plugin_id,
            &ctx.required_permission,
            &ctx.operation,
            false,
        );
        self.audit_executor.enqueue(AuditRecord {
            trace_id: ctx.trace_id.clone(),
            caller_plugin_id: ctx.caller_plugin_id.clone(),
            action: "DENIED".to_string(),
            resource: ctx.resource_id.clone(),
            args_fingerprint: fingerprint(ctx),
            result_summary: "denied".to_string(),
            duration_nanos: start.elapsed().as_nanos() as u64,
            success: false,
        });
    }
}

fn fingerprint(ctx: &InvocationContext) -> String {
    match &ctx.args {
        Some(args) => format!("{}-args", args.len()),
        None => "no-args".to_string(),
    }
}
