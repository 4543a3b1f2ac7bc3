//! # Service Routing Proxy
//!
//! Two thin call surfaces over [`PluginManager`]: a [`ServiceProxy`] bound to
//! one caller plugin (handed out by `getGlobalServiceProxy`'s per-plugin
//! counterpart so a plugin's own outbound calls carry its identity without
//! repeating it at every call site) and a [`GlobalServiceProxy`] for
//! host-originated calls, which resolves an interface to a plugin id by
//! scanning the catalog and caches the hit. Every call still goes through
//! [`GovernanceKernel::invoke`] — this module only fixes the caller identity
//! and the dispatch closure shape, it never bypasses governance.

use std::any::Any;
use std::sync::Arc;

use plugin_kernel_sdk::routing::Labels;
use plugin_kernel_sdk::PluginDefinition;

use crate::context::InvocationContext;
use crate::error::KernelError;
use crate::manager::PluginManager;
use crate::runtime::PluginRuntime;

const HOST_APP: &str = "host-app";

/// Bound to one caller plugin id. Handed to a plugin's container indirectly
/// through [`plugin_kernel_sdk::PluginContext`]; kept here as the concrete
/// type a host can use directly for host-to-plugin calls that want a fixed
/// caller identity (e.g. a CLI issuing calls as `"host-app"`).
pub struct ServiceProxy {
    manager: Arc<PluginManager>,
    caller_plugin_id: String,
}

impl ServiceProxy {
    pub fn new(manager: Arc<PluginManager>, caller_plugin_id: impl Into<String>) -> Self {
        Self {
            manager,
            caller_plugin_id: caller_plugin_id.into(),
        }
    }

    /// Invoke `method` on `target_plugin_id`'s currently routed instance,
    /// through the full governance pipeline. `dispatch_fn` receives the
    /// selected, entered instance and must call `exit()` itself — mirroring
    /// the contract `GovernanceKernel::invoke`'s `dispatch_fn` already has.
    pub async fn invoke<R, F, Fut>(
        &self,
        target_plugin_id: &str,
        method: &str,
        labels: Labels,
        dispatch_fn: F,
    ) -> Result<R, KernelError>
    where
        F: FnOnce(Arc<crate::instance::PluginInstance>) -> Fut,
        Fut: std::future::Future<Output = Result<R, KernelError>>,
    {
        let runtime = self
            .manager
            .get_runtime(target_plugin_id)
            .ok_or_else(|| KernelError::PluginNotFound {
                plugin_id: target_plugin_id.to_string(),
            })?;
        let definition =
            self.manager
                .get_definition(target_plugin_id)
                .ok_or_else(|| KernelError::PluginNotFound {
                    plugin_id: target_plugin_id.to_string(),
                })?;
        dispatch_through(
            &self.manager,
            &runtime,
            &definition,
            method,
            &self.caller_plugin_id,
            labels,
            dispatch_fn,
        )
        .await
    }
}

/// Host-originated, interface-addressed routing: resolves `interface` to a
/// plugin id by scanning every installed runtime's default instance, caching
/// the hit. The cache is invalidated per-plugin by [`PluginManager::uninstall`]
/// (it clears entries pointing at the removed plugin), so a resolve never
/// returns a stale target after a plugin is gone.
pub struct GlobalServiceProxy {
    manager: Arc<PluginManager>,
}

impl GlobalServiceProxy {
    pub fn new(manager: Arc<PluginManager>) -> Self {
        Self { manager }
    }

    /// Look up a service by its interface descriptor as the host itself
    /// (caller id `"host-app"`), honoring whatever `host_governance_enabled`
    /// / `host_governance_internal_calls` settings the kernel was built
    /// with.
    pub async fn lookup(&self, interface: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        plugin_kernel_sdk::ServiceLocator::service(self.manager.as_ref(), HOST_APP, interface)
            .await
    }

    /// Invoke a method on whichever plugin currently provides `interface`,
    /// as the host caller.
    pub async fn invoke<R, F, Fut>(
        &self,
        interface_owner_plugin_id: &str,
        method: &str,
        labels: Labels,
        dispatch_fn: F,
    ) -> Result<R, KernelError>
    where
        F: FnOnce(Arc<crate::instance::PluginInstance>) -> Fut,
        Fut: std::future::Future<Output = Result<R, KernelError>>,
    {
        let runtime = self
            .manager
            .get_runtime(interface_owner_plugin_id)
            .ok_or_else(|| KernelError::PluginNotFound {
                plugin_id: interface_owner_plugin_id.to_string(),
            })?;
        let definition = self
            .manager
            .get_definition(interface_owner_plugin_id)
            .ok_or_else(|| KernelError::PluginNotFound {
                plugin_id: interface_owner_plugin_id.to_string(),
            })?;
        dispatch_through(
            &self.manager,
            &runtime,
            &definition,
            method,
            HOST_APP,
            labels,
            dispatch_fn,
        )
        .await
    }
}

/// Shared dispatch path for both proxy kinds: build a pooled context, route
/// through `GovernanceKernel::invoke`, and scrub the context in a `finally`
/// regardless of outcome.
async fn dispatch_through<R, F, Fut>(
    manager: &Arc<PluginManager>,
    runtime: &Arc<PluginRuntime>,
    definition: &PluginDefinition,
    method: &str,
    caller_plugin_id: &str,
    labels: Labels,
    dispatch_fn: F,
) -> Result<R, KernelError>
where
    F: FnOnce(Arc<crate::instance::PluginInstance>) -> Fut,
    Fut: std::future::Future<Output = Result<R, KernelError>>,
{
    let mut pooled = crate::context::PooledContext::acquire();
    pooled.caller_plugin_id = caller_plugin_id.to_string();
    pooled.target_plugin_id = runtime.plugin_id.clone();
    pooled.resource_id = format!("{}:{}", runtime.plugin_id, method);
    pooled.operation = method.to_string();
    pooled.labels = labels.clone();

    let outcome = manager
        .kernel()
        .invoke(runtime, definition, method, &mut pooled, move || async move {
            let instance = runtime
                .select_instance(&labels)
                .ok_or_else(|| KernelError::ServiceUnavailable {
                    plugin_id: runtime.plugin_id.clone(),
                })?;
            if !instance.try_enter() {
                return Err(KernelError::ServiceUnavailable {
                    plugin_id: runtime.plugin_id.clone(),
                });
            }
            let result = dispatch_fn(instance.clone()).await;
            instance.exit();
            result
        })
        .await;
    // `pooled`'s Drop scrubs and returns it to the thread-local pool here,
    // regardless of which branch above produced `outcome`.
    outcome
}
