//! # Plugin Manager
//!
//! Catalog of [`PluginRuntime`]s keyed by plugin id, orchestrating
//! install/reload/uninstall/canary-deploy and acting as the `ServiceLocator`
//! a plugin's [`PluginContext`] delegates to for cross-plugin lookups.
//! Keyed by a `DashMap` catalog for lock-free concurrent reads.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use plugin_kernel_sdk::routing::Labels;
use plugin_kernel_sdk::{PluginContainer, PluginContext, PluginDefinition, ServiceLocator};

use crate::config::HostConfig;
use crate::context::InvocationContext;
use crate::error::KernelError;
use crate::governance::audit::KernelEvent;
use crate::governance::kernel::{GovernanceKernel, KernelSettings};
use crate::governance::patch::GovernancePatchStore;
use crate::governance::permission::PermissionService;
use crate::governance::policy::{PolicyChain, StandardProvider};
use crate::isolation::DomainRegistry;
use crate::runtime::{PluginRuntime, RuntimeStatus};

/// Catalog entry: the runtime plus the definition that was installed into
/// it most recently (the governance chain reads this for P2/P3).
struct CatalogEntry {
    runtime: Arc<PluginRuntime>,
    definition: PluginDefinition,
}

/// Central orchestrator: owns every runtime, the shared governance kernel,
/// the domain registry, and the interface->plugin cache used by
/// host-originated lookups.
pub struct PluginManager {
    catalog: DashMap<String, CatalogEntry>,
    domains: DomainRegistry,
    kernel: Arc<GovernanceKernel>,
    permission_service: Arc<PermissionService>,
    patch_store: Arc<GovernancePatchStore>,
    interface_cache: DashMap<String, String>,
    config: HostConfig,
    shutting_down: AtomicBool,
}

impl PluginManager {
    pub fn new(config: HostConfig) -> Self {
        let patch_store = Arc::new(
            GovernancePatchStore::load(&config.governance_patch.path).unwrap_or_else(|_| {
                GovernancePatchStore::in_memory()
            }),
        );
        let mut chain = PolicyChain::new(config.runtime.default_timeout);
        chain.register(Box::new(StandardProvider::new(
            &config.rules,
            patch_store.clone(),
        )));
        let permission_service = Arc::new(PermissionService::new(config.dev_mode));
        let audit_executor = Arc::new(crate::governance::audit::AuditExecutor::start(Arc::new(
            crate::governance::audit::TracingAuditSink,
        )));
        let event_bus = Arc::new(crate::governance::audit::EventBus::new());
        let settings = KernelSettings {
            bulkhead_max_concurrent: config.runtime.bulkhead_max_concurrent,
            bulkhead_acquire_timeout: config.runtime.bulkhead_acquire_timeout,
            host_governance_enabled: config.host_governance_enabled,
            host_governance_internal_calls: config.host_governance_internal_calls,
        };
        let kernel = Arc::new(GovernanceKernel::new(
            chain,
            permission_service.clone(),
            audit_executor,
            event_bus,
            settings,
        ));
        Self {
            catalog: DashMap::new(),
            domains: DomainRegistry::new(),
            kernel,
            permission_service,
            patch_store,
            interface_cache: DashMap::new(),
            config,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn kernel(&self) -> &Arc<GovernanceKernel> {
        &self.kernel
    }

    pub fn permission_service(&self) -> &Arc<PermissionService> {
        &self.permission_service
    }

    pub fn patch_store(&self) -> &Arc<GovernancePatchStore> {
        &self.patch_store
    }

    pub fn get_runtime(&self, plugin_id: &str) -> Option<Arc<PluginRuntime>> {
        self.catalog.get(plugin_id).map(|e| e.runtime.clone())
    }

    pub fn get_definition(&self, plugin_id: &str) -> Option<PluginDefinition> {
        self.catalog.get(plugin_id).map(|e| e.definition.clone())
    }

    pub fn get_installed_plugins(&self) -> Vec<(String, String, RuntimeStatus)> {
        self.catalog
            .iter()
            .map(|e| (e.key().clone(), e.definition.version.clone(), e.runtime.status()))
            .collect()
    }

    /// Build the context handed to a container at `start` time, wired back
    /// to this manager so cross-plugin lookups flow through governance.
    fn plugin_context(self: &Arc<Self>, definition: &PluginDefinition) -> PluginContext {
        PluginContext::new(
            definition.id.clone(),
            definition.properties.clone(),
            self.clone() as Arc<dyn ServiceLocator>,
        )
    }

    /// Install a plugin package: build the runtime, start the container,
    /// add it to the pool as the default instance. All-or-nothing — on any
    /// failure nothing is added to the catalog.
    pub async fn install(
        self: &Arc<Self>,
        definition: PluginDefinition,
        container: Arc<dyn PluginContainer>,
    ) -> Result<(), KernelError> {
        self.install_internal(definition, container, HashMap::new(), true)
            .await
    }

    /// Install from an unpacked development directory (no packaging step in
    /// this crate); identical wiring to `install`, kept as a distinct entry
    /// point so a host's dev-mode tooling can call it explicitly.
    pub async fn install_dev(
        self: &Arc<Self>,
        definition: PluginDefinition,
        container: Arc<dyn PluginContainer>,
    ) -> Result<(), KernelError> {
        self.install(definition, container).await
    }

    /// Install as a labeled, non-default canary instance. Traffic share is
    /// controlled externally by attaching matching labels to inbound
    /// `InvocationContext`s; this call only deploys and labels the instance.
    pub async fn deploy_canary(
        self: &Arc<Self>,
        definition: PluginDefinition,
        container: Arc<dyn PluginContainer>,
        labels: HashMap<String, String>,
    ) -> Result<(), KernelError> {
        self.install_internal(definition, container, labels, false)
            .await
    }

    async fn install_internal(
        self: &Arc<Self>,
        definition: PluginDefinition,
        container: Arc<dyn PluginContainer>,
        labels: HashMap<String, String>,
        set_default: bool,
    ) -> Result<(), KernelError> {
        let plugin_id = definition.id.clone();
        let ctx = self.plugin_context(&definition);
        container.start(ctx).await.map_err(|e| KernelError::PluginInstallFailure {
            plugin_id: plugin_id.clone(),
            reason: e.to_string(),
        })?;

        self.domains.acquire(&plugin_id);
        let runtime = self
            .catalog
            .entry(plugin_id.clone())
            .or_insert_with(|| CatalogEntry {
                runtime: Arc::new(PluginRuntime::new(plugin_id.as_str(), self.config.runtime.max_dying)),
                definition: definition.clone(),
            })
            .runtime
            .clone();

        if !runtime.pool.can_add_instance() {
            let _ = container.stop().await;
            self.domains.release(&plugin_id);
            return Err(KernelError::PluginInstallFailure {
                plugin_id,
                reason: "dying queue at capacity".to_string(),
            });
        }

        let weight = definition.traffic_weight();
        let instance = Arc::new(crate::instance::PluginInstance::new(
            plugin_id.as_str(),
            definition.version.as_str(),
            container,
            labels,
            weight,
        ));
        let previous_default = runtime.pool.add(instance, set_default);

        if matches!(runtime.status(), RuntimeStatus::Installed) {
            runtime.transition(RuntimeStatus::Loaded)?;
            runtime.transition(RuntimeStatus::Active)?;
        }

        self.catalog
            .entry(plugin_id.clone())
            .and_modify(|e| e.definition = definition.clone());

        self.kernel.event_bus().publish(KernelEvent::InstanceReady {
            plugin_id: plugin_id.clone(),
            version: definition.version.clone(),
        });

        if let Some(prev) = previous_default {
            runtime.pool.move_to_dying(&prev);
            self.kernel.event_bus().publish(KernelEvent::InstanceDying {
                plugin_id: plugin_id.clone(),
                version: prev.version.clone(),
            });
            self.schedule_drain(runtime, prev);
        }
        Ok(())
    }

    /// Re-derive and deploy a new version into the same runtime: install it
    /// as the new default (blue/green), move the prior default to dying,
    /// and schedule its cleanup.
    pub async fn reload(
        self: &Arc<Self>,
        definition: PluginDefinition,
        container: Arc<dyn PluginContainer>,
    ) -> Result<(), KernelError> {
        self.install(definition, container).await
    }

    /// Background drain: poll the retired instance until it quiesces or the
    /// force-cleanup delay elapses, then force-destroy it either way. This
    /// never blocks the caller of `install`/`reload`/`uninstall`.
    fn schedule_drain(self: &Arc<Self>, runtime: Arc<PluginRuntime>, _retired: Arc<crate::instance::PluginInstance>) {
        let manager = self.clone();
        let delay = manager.config.runtime.force_cleanup_delay;
        let interval = manager.config.runtime.dying_check_interval;
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + delay;
            loop {
                let cleaned = runtime.pool.cleanup_idle(|inst| {
                    manager.kernel.event_bus().publish(KernelEvent::InstanceDestroyed {
                        plugin_id: inst.plugin_id.clone(),
                        version: inst.version.clone(),
                    });
                });
                let _ = cleaned;
                if runtime.pool.dying_len() == 0 || tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(interval.min(delay)).await;
            }
            runtime.pool.force_cleanup_all(|inst| {
                manager.kernel.event_bus().publish(KernelEvent::InstanceDestroyed {
                    plugin_id: inst.plugin_id.clone(),
                    version: inst.version.clone(),
                });
            });
        });
    }

    /// Uninstall: transition to `STOPPING`, drain inflight calls up to the
    /// configured grace period, force-destroy any stragglers, then reach
    /// `UNINSTALLED`. Idempotent and never blocks beyond the grace period.
    pub async fn uninstall(self: &Arc<Self>, plugin_id: &str) -> Result<(), KernelError> {
        let entry = self
            .catalog
            .get(plugin_id)
            .map(|e| e.runtime.clone())
            .ok_or_else(|| KernelError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })?;

        if entry.status() == RuntimeStatus::Stopping || entry.status() == RuntimeStatus::Uninstalled {
            return Ok(());
        }

        entry.transition(RuntimeStatus::Stopping)?;
        self.kernel
            .event_bus()
            .publish(KernelEvent::RuntimeShuttingDown {
                plugin_id: plugin_id.to_string(),
            });

        let retired = entry.pool.shutdown();
        for inst in &retired {
            self.kernel.event_bus().publish(KernelEvent::InstanceDying {
                plugin_id: inst.plugin_id.clone(),
                version: inst.version.clone(),
            });
        }

        let grace = self.config.runtime.grace_period;
        let poll = Duration::from_millis(20).min(grace);
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            entry.pool.cleanup_idle(|inst| {
                self.kernel.event_bus().publish(KernelEvent::InstanceDestroyed {
                    plugin_id: inst.plugin_id.clone(),
                    version: inst.version.clone(),
                });
            });
            if entry.pool.dying_len() == 0 || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(poll).await;
        }
        entry.pool.force_cleanup_all(|inst| {
            self.kernel.event_bus().publish(KernelEvent::InstanceDestroyed {
                plugin_id: inst.plugin_id.clone(),
                version: inst.version.clone(),
            });
        });

        self.domains.release(plugin_id);
        entry.transition(RuntimeStatus::Uninstalled)?;
        self.catalog.remove(plugin_id);
        self.permission_service.remove_plugin(plugin_id);
        self.kernel.event_bus().remove_subscriptions_for(plugin_id);
        self.interface_cache.retain(|_, v| v != plugin_id);
        self.kernel.event_bus().publish(KernelEvent::RuntimeShutdown {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    /// Scan installed runtimes for one whose default instance exposes
    /// `interface`, caching the hit. The cache is invalidated per-plugin on
    /// uninstall (see above).
    fn resolve_interface(&self, interface: &str) -> Option<String> {
        if let Some(cached) = self.interface_cache.get(interface) {
            return Some(cached.clone());
        }
        for entry in self.catalog.iter() {
            if let Some(default) = entry.runtime.pool.default_instance() {
                if default.container.lookup(interface).is_some() {
                    self.interface_cache
                        .insert(interface.to_string(), entry.key().clone());
                    return Some(entry.key().clone());
                }
            }
        }
        None
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Combine the kernel's invocation counters with this manager's live
    /// catalog size and audit drop count, for a host's own metrics surface.
    pub fn metrics_snapshot(&self) -> crate::metrics::MetricsSnapshot {
        self.kernel.metrics().snapshot(self)
    }

    /// A per-caller routing surface for `caller_plugin_id`'s outbound calls,
    /// bound once so call sites don't repeat the caller identity.
    pub fn get_service_proxy(
        self: &Arc<Self>,
        caller_plugin_id: impl Into<String>,
    ) -> crate::proxy::ServiceProxy {
        crate::proxy::ServiceProxy::new(self.clone(), caller_plugin_id)
    }

    /// Host-originated routing surface, addressed by interface rather than
    /// by a caller-bound plugin id; the target plugin is resolved (and
    /// cached) per interface at invoke time.
    pub fn get_global_service_proxy(self: &Arc<Self>) -> crate::proxy::GlobalServiceProxy {
        crate::proxy::GlobalServiceProxy::new(self.clone())
    }
}

#[async_trait]
impl ServiceLocator for PluginManager {
    async fn service(
        &self,
        caller_plugin_id: &str,
        interface: &str,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        let target_plugin_id = self.resolve_interface(interface)?;
        let runtime = self.get_runtime(&target_plugin_id)?;
        let definition = self.get_definition(&target_plugin_id)?;

        let mut ctx = InvocationContext::default();
        ctx.caller_plugin_id = caller_plugin_id.to_string();
        ctx.target_plugin_id = target_plugin_id.clone();
        ctx.resource_id = format!("{interface}:lookup");
        ctx.operation = "lookup".to_string();
        let method = format!("lookup:{interface}");
        let labels = Labels::new();

        let result = self
            .kernel
            .invoke(&runtime, &definition, &method, &mut ctx, move || async move {
                let instance = runtime
                    .select_instance(&labels)
                    .ok_or_else(|| KernelError::ServiceUnavailable {
                        plugin_id: target_plugin_id.clone(),
                    })?;
                if !instance.try_enter() {
                    return Err(KernelError::ServiceUnavailable {
                        plugin_id: target_plugin_id.clone(),
                    });
                }
                let looked_up = instance.container.lookup(interface);
                instance.exit();
                Ok(looked_up)
            })
            .await;
        ctx.scrub();
        result.ok().flatten()
    }

    fn publish(&self, caller_plugin_id: &str, event: Value) {
        tracing::debug!(caller = caller_plugin_id, %event, "plugin published event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_kernel_sdk::{CodeDomain, SdkError};
    use std::collections::HashMap as Map;

    struct NullDomain;
    impl CodeDomain for NullDomain {
        fn name(&self) -> &str {
            "null"
        }
    }

    struct EchoContainer {
        active: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl PluginContainer for EchoContainer {
        async fn start(&self, _ctx: PluginContext) -> Result<(), SdkError> {
            self.active.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> Result<(), SdkError> {
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
        fn lookup(&self, interface: &str) -> Option<Arc<dyn Any + Send + Sync>> {
            if interface == "echo" {
                Some(Arc::new(42i32))
            } else {
                None
            }
        }
        fn code_domain(&self) -> Arc<dyn CodeDomain> {
            Arc::new(NullDomain)
        }
    }

    fn definition(id: &str, version: &str) -> PluginDefinition {
        PluginDefinition {
            id: id.to_string(),
            version: version.to_string(),
            provider: String::new(),
            description: String::new(),
            main_entry: "x".to_string(),
            dependencies: Vec::new(),
            governance: Default::default(),
            properties: Map::new(),
        }
    }

    fn manager() -> Arc<PluginManager> {
        let mut config = HostConfig::default();
        config.runtime.grace_period = Duration::from_millis(50);
        config.runtime.force_cleanup_delay = Duration::from_millis(50);
        config.runtime.dying_check_interval = Duration::from_millis(10);
        Arc::new(PluginManager::new(config))
    }

    #[tokio::test]
    async fn install_activates_runtime_and_sets_default() {
        let manager = manager();
        let container = Arc::new(EchoContainer {
            active: std::sync::atomic::AtomicBool::new(false),
        });
        manager.install(definition("echo", "1.0.0"), container).await.unwrap();
        let runtime = manager.get_runtime("echo").unwrap();
        assert!(runtime.is_active());
        assert!(runtime.pool.default_instance().is_some());
    }

    #[tokio::test]
    async fn s6_reload_blue_green_keeps_old_version_serving_until_drained() {
        let manager = manager();
        let c1 = Arc::new(EchoContainer {
            active: std::sync::atomic::AtomicBool::new(false),
        });
        manager.install(definition("p", "1.0.0"), c1).await.unwrap();
        let runtime = manager.get_runtime("p").unwrap();
        let old_default = runtime.pool.default_instance().unwrap();
        assert!(old_default.try_enter());

        let c2 = Arc::new(EchoContainer {
            active: std::sync::atomic::AtomicBool::new(false),
        });
        manager.reload(definition("p", "2.0.0"), c2).await.unwrap();

        let new_default = runtime.pool.default_instance().unwrap();
        assert_eq!(new_default.version, "2.0.0");
        assert_eq!(old_default.state(), crate::instance::InstanceState::Dying);
        assert_eq!(old_default.inflight(), 1);

        old_default.exit();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(old_default.state(), crate::instance::InstanceState::Destroyed);
    }

    #[tokio::test]
    async fn uninstall_is_idempotent_and_removes_from_catalog() {
        let manager = manager();
        let container = Arc::new(EchoContainer {
            active: std::sync::atomic::AtomicBool::new(false),
        });
        manager.install(definition("p", "1.0.0"), container).await.unwrap();
        manager.uninstall("p").await.unwrap();
        assert!(manager.get_runtime("p").is_none());
        assert!(manager.uninstall("p").await.is_ok());
    }

    #[tokio::test]
    async fn service_locator_resolves_cross_plugin_interface() {
        let manager = manager();
        let container = Arc::new(EchoContainer {
            active: std::sync::atomic::AtomicBool::new(false),
        });
        manager.install(definition("echo-plugin", "1.0.0"), container).await.unwrap();
        let found = ServiceLocator::service(manager.as_ref(), "caller", "echo").await;
        assert!(found.is_some());
        let missing = ServiceLocator::service(manager.as_ref(), "caller", "nope").await;
        assert!(missing.is_none());
    }
}
