//! Shared fixtures for the integration suite: a minimal `PluginContainer`
//! that counts lifecycle calls and exposes one lookup interface, plus a
//! definition builder shaped like a parsed manifest.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use plugin_kernel_sdk::{
    CodeDomain, GovernancePolicy, PluginContainer, PluginContext, PluginDefinition, SdkError,
};

pub struct NullDomain(pub String);

impl CodeDomain for NullDomain {
    fn name(&self) -> &str {
        &self.0
    }
}

/// A container whose `lookup("ping")` resolves to its generation number, so
/// a test can tell which deployed version actually served a call.
pub struct FakeContainer {
    pub generation: u32,
    active: AtomicBool,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
}

impl FakeContainer {
    pub fn new(generation: u32) -> Arc<Self> {
        Arc::new(Self {
            generation,
            active: AtomicBool::new(false),
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl PluginContainer for FakeContainer {
    async fn start(&self, _ctx: PluginContext) -> Result<(), SdkError> {
        self.active.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SdkError> {
        self.active.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn lookup(&self, interface: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        if interface == "ping" {
            Some(Arc::new(self.generation))
        } else {
            None
        }
    }

    fn code_domain(&self) -> Arc<dyn CodeDomain> {
        Arc::new(NullDomain(format!("fake-{}", self.generation)))
    }
}

pub fn definition(id: &str, version: &str) -> PluginDefinition {
    definition_with_governance(id, version, GovernancePolicy::default())
}

pub fn definition_with_governance(
    id: &str,
    version: &str,
    governance: GovernancePolicy,
) -> PluginDefinition {
    PluginDefinition {
        id: id.to_string(),
        version: version.to_string(),
        provider: "test".to_string(),
        description: String::new(),
        main_entry: "main".to_string(),
        dependencies: Vec::new(),
        governance,
        properties: HashMap::new(),
    }
}

pub fn canary_definition(id: &str, version: &str, weight: u32) -> PluginDefinition {
    let mut def = definition(id, version);
    def.properties
        .insert("trafficWeight".to_string(), serde_json::json!(weight));
    def
}
