//! # Plugin Container Abstraction
//!
//! The narrow interface every plugin's embedded object graph must satisfy to
//! be managed by the kernel, plus the context object handed to a plugin at
//! start time. Everything a plugin does beyond this contract — its own
//! services, its own state — is invisible to the kernel; only `start`,
//! `stop`, `is_active`, `lookup`, and `code_domain` cross the boundary.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SdkError;

/// Opaque handle to a plugin's isolation scope. The kernel's isolation loader
/// is the only real implementor; the SDK crate never constructs one, it only
/// names the capability a container must expose.
pub trait CodeDomain: Send + Sync {
    /// Stable, human-readable identifier for logging and diagnostics.
    fn name(&self) -> &str;
}

/// Host-side capability a [`PluginContext`] delegates to for cross-plugin
/// service lookup and event publication. Implemented by the kernel's manager;
/// the SDK crate depends only on this trait, never the concrete manager type,
/// keeping the dependency edge one-directional.
#[async_trait]
pub trait ServiceLocator: Send + Sync {
    /// Resolve an exposed service by its interface descriptor, routed through
    /// the kernel so governance applies uniformly to plugin-to-plugin calls.
    async fn service(
        &self,
        caller_plugin_id: &str,
        interface: &str,
    ) -> Option<Arc<dyn Any + Send + Sync>>;

    /// Publish an event onto the shared event bus, attributed to the caller.
    fn publish(&self, caller_plugin_id: &str, event: Value);
}

/// Handed to a plugin's container at `start` time. Every lookup is routed
/// back through the kernel so governance applies even to a plugin reading its
/// own declared properties indirectly through a shared service.
pub struct PluginContext {
    plugin_id: String,
    properties: std::collections::HashMap<String, Value>,
    locator: Arc<dyn ServiceLocator>,
}

impl PluginContext {
    pub fn new(
        plugin_id: impl Into<String>,
        properties: std::collections::HashMap<String, Value>,
        locator: Arc<dyn ServiceLocator>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            properties,
            locator,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub async fn service(&self, interface: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.locator.service(&self.plugin_id, interface).await
    }

    pub fn publish(&self, event: Value) {
        self.locator.publish(&self.plugin_id, event);
    }
}

/// Capability contract every plugin's embedded object graph must satisfy.
#[async_trait]
pub trait PluginContainer: Send + Sync {
    /// Initialize the plugin; may block (asynchronously) until ready.
    async fn start(&self, ctx: PluginContext) -> Result<(), SdkError>;

    /// Begin teardown. Idempotent — calling it twice is not an error.
    async fn stop(&self) -> Result<(), SdkError>;

    /// Whether the container currently considers itself ready to serve calls.
    fn is_active(&self) -> bool;

    /// Retrieve an exposed service by its interface descriptor.
    fn lookup(&self, interface: &str) -> Option<Arc<dyn Any + Send + Sync>>;

    /// The isolation domain this container's code runs in.
    fn code_domain(&self) -> Arc<dyn CodeDomain>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NullLocator;

    #[async_trait]
    impl ServiceLocator for NullLocator {
        async fn service(&self, _caller: &str, _interface: &str) -> Option<Arc<dyn Any + Send + Sync>> {
            None
        }
        fn publish(&self, _caller: &str, _event: Value) {}
    }

    struct TestDomain;
    impl CodeDomain for TestDomain {
        fn name(&self) -> &str {
            "test-domain"
        }
    }

    struct TestContainer {
        active: AtomicBool,
    }

    #[async_trait]
    impl PluginContainer for TestContainer {
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

        fn lookup(&self, _interface: &str) -> Option<Arc<dyn Any + Send + Sync>> {
            None
        }

        fn code_domain(&self) -> Arc<dyn CodeDomain> {
            Arc::new(TestDomain)
        }
    }

    #[tokio::test]
    async fn start_stop_toggles_active() {
        let container = TestContainer {
            active: AtomicBool::new(false),
        };
        let ctx = PluginContext::new("p", HashMap::new(), Arc::new(NullLocator));
        assert!(!container.is_active());
        container.start(ctx).await.unwrap();
        assert!(container.is_active());
        container.stop().await.unwrap();
        assert!(!container.is_active());
    }

    #[test]
    fn context_exposes_properties() {
        let mut props = HashMap::new();
        props.insert("region".to_string(), Value::String("eu".to_string()));
        let ctx = PluginContext::new("p", props, Arc::new(NullLocator));
        assert_eq!(ctx.plugin_id(), "p");
        assert_eq!(ctx.property("region").unwrap(), "eu");
        assert!(ctx.property("missing").is_none());
    }
}
