//! # Isolation Loader
//!
//! Three-tier code namespace: `Host` -> `SharedApi` -> one `PluginDomain` per
//! installed plugin. Resolution is child-first except for names matching the
//! delegation whitelist, which always resolve in the parent and never fall
//! through to the child (this is what keeps contract types identity-stable
//! across plugins instead of fracturing into per-plugin copies).
//!
//! Uses an `OnceLock`-backed singleton for the shared-API tier, and
//! `parking_lot`/`dashmap` for the per-domain resource maps.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::KernelError;

/// Default delegation-whitelist prefixes: language-runtime core, this
/// platform's own public contract namespace, the structured-logging facade,
/// structured-data format parsers, and the aspect/reflection facade the host
/// exposes. Plugins never get a private copy of types under these prefixes.
pub const DEFAULT_WHITELIST: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "plugin_kernel_sdk::",
    "tracing::",
    "serde::",
    "serde_json::",
];

/// A resolved resource: an opaque byte payload plus the tier it came from,
/// used only to prove which domain answered a multi-result lookup.
#[derive(Debug, Clone)]
pub struct Resource {
    pub tier: &'static str,
    pub data: Arc<[u8]>,
}

/// One named entry a domain can resolve: either a type/name binding or a
/// loadable resource. The loader does not care which; both go through the
/// same child-first / whitelist algorithm.
#[derive(Debug, Clone)]
enum Entry {
    Name(Arc<str>),
    Resource(Resource),
}

/// Shared-API tier: a process-wide singleton domain sitting below `Host` and
/// above every plugin tier. Prefixes registered here are implicitly added to
/// every plugin domain's delegation whitelist.
pub struct SharedApiTier {
    entries: DashMap<String, Entry>,
    prefixes: RwLock<HashSet<String>>,
}

impl SharedApiTier {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
            prefixes: RwLock::new(HashSet::new()),
        }
    }

    /// Register a namespace prefix (from `preload_api_jars` at boot, or a
    /// plugin declaring a shared contract). Prefixes accumulate; they are
    /// never removed except at process teardown.
    pub fn register_prefix(&self, prefix: impl Into<String>) {
        self.prefixes.write().insert(prefix.into());
    }

    pub fn add_name(&self, name: impl Into<String>, value: impl Into<String>) {
        self.entries
            .insert(name.into(), Entry::Name(Arc::from(value.into().as_str())));
    }

    fn lookup_name(&self, name: &str) -> Option<Arc<str>> {
        match self.entries.get(name)?.value() {
            Entry::Name(v) => Some(v.clone()),
            Entry::Resource(_) => None,
        }
    }

    fn whitelist_prefixes(&self) -> Vec<String> {
        self.prefixes.read().iter().cloned().collect()
    }
}

static SHARED_API: OnceLock<Arc<SharedApiTier>> = OnceLock::new();

/// Process-wide shared-API tier accessor, lazily initialized on first use.
pub fn shared_api() -> &'static Arc<SharedApiTier> {
    SHARED_API.get_or_init(|| Arc::new(SharedApiTier::new()))
}

/// Per-plugin isolation domain. Owns its own name/resource table and a
/// whitelist of prefixes (the process defaults plus whatever the
/// shared-API tier has registered at construction time) that always
/// delegate to the parent instead of resolving locally.
pub struct PluginDomain {
    plugin_id: String,
    entries: DashMap<String, Entry>,
    whitelist: Vec<String>,
    closed: AtomicBool,
    ref_count: AtomicUsize,
}

impl PluginDomain {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        let mut whitelist: Vec<String> = DEFAULT_WHITELIST.iter().map(|s| s.to_string()).collect();
        whitelist.extend(shared_api().whitelist_prefixes());
        Self {
            plugin_id: plugin_id.into(),
            entries: DashMap::new(),
            whitelist,
            closed: AtomicBool::new(false),
            ref_count: AtomicUsize::new(0),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn add_name(&self, name: impl Into<String>, value: impl Into<String>) {
        self.entries
            .insert(name.into(), Entry::Name(Arc::from(value.into().as_str())));
    }

    fn is_whitelisted(&self, name: &str) -> bool {
        self.whitelist.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Single-name resolution: whitelist hits delegate to the
    /// shared-API/host parent and never fall through to the plugin's own
    /// table even on parent miss; everything else tries the plugin's own
    /// entries first and only then delegates upward.
    pub fn resolve(&self, name: &str) -> Result<Arc<str>, KernelError> {
        if self.is_closed() {
            return Err(KernelError::LoaderClosed {
                domain: self.plugin_id.clone(),
            });
        }
        if self.is_whitelisted(name) {
            return shared_api()
                .lookup_name(name)
                .ok_or_else(|| KernelError::NameNotFound {
                    domain: "shared-api".to_string(),
                    name: name.to_string(),
                });
        }
        if let Some(v) = self.lookup_own(name) {
            return Ok(v);
        }
        shared_api()
            .lookup_name(name)
            .ok_or_else(|| KernelError::NameNotFound {
                domain: self.plugin_id.clone(),
                name: name.to_string(),
            })
    }

    fn lookup_own(&self, name: &str) -> Option<Arc<str>> {
        match self.entries.get(name)?.value() {
            Entry::Name(v) => Some(v.clone()),
            Entry::Resource(_) => None,
        }
    }

    /// Multi-result resource lookup: child resources first, parent (shared
    /// API) results appended and deduplicated by name.
    pub fn resolve_resources(&self, name: &str) -> Result<Vec<Resource>, KernelError> {
        if self.is_closed() {
            return Err(KernelError::LoaderClosed {
                domain: self.plugin_id.clone(),
            });
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        if let Some(Entry::Resource(r)) = self.entries.get(name).as_deref() {
            out.push(r.clone());
            seen.insert("own".to_string());
        }
        if let Some(Entry::Resource(r)) = shared_api().entries.get(name).as_deref() {
            if seen.insert(r.tier.to_string()) {
                out.push(r.clone());
            }
        }
        Ok(out)
    }

    /// Close the domain. Lookups in flight before this call are unaffected;
    /// every lookup after this point fails with `LoaderClosed`. Does not
    /// block concurrent readers (`closed` is a plain atomic flag, not a
    /// lock held across the close).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.entries.clear();
    }

    fn acquire(&self) -> usize {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn release(&self) -> usize {
        self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

impl plugin_kernel_sdk::CodeDomain for PluginDomain {
    fn name(&self) -> &str {
        &self.plugin_id
    }
}

/// Tracks reference counts on a plugin's code domain across the instances
/// that share it: a domain is closed and dropped only once every instance
/// that referenced it has released its hold. Owned by the Manager.
#[derive(Default)]
pub struct DomainRegistry {
    domains: DashMap<String, Arc<PluginDomain>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reuse, if already present) the domain for `plugin_id` and
    /// bump its reference count.
    pub fn acquire(&self, plugin_id: &str) -> Arc<PluginDomain> {
        let domain = self
            .domains
            .entry(plugin_id.to_string())
            .or_insert_with(|| Arc::new(PluginDomain::new(plugin_id)))
            .clone();
        domain.acquire();
        domain
    }

    /// Release one reference. When the count reaches zero, the domain is
    /// closed and dropped from the registry.
    pub fn release(&self, plugin_id: &str) {
        let should_remove = match self.domains.get(plugin_id) {
            Some(d) => d.release() == 0,
            None => return,
        };
        if should_remove {
            if let Some((_, domain)) = self.domains.remove(plugin_id) {
                domain.close();
            }
        }
    }

    pub fn get(&self, plugin_id: &str) -> Option<Arc<PluginDomain>> {
        self.domains.get(plugin_id).map(|d| d.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_first_resolution() {
        let domain = PluginDomain::new("p1");
        domain.add_name("widget::Thing", "child-value");
        shared_api().add_name("widget::Thing", "parent-value");
        assert_eq!(domain.resolve("widget::Thing").unwrap().as_ref(), "child-value");
    }

    #[test]
    fn whitelist_always_delegates_to_parent() {
        let domain = PluginDomain::new("p2");
        domain.add_name("plugin_kernel_sdk::Marker", "child-shadow");
        shared_api().add_name("plugin_kernel_sdk::Marker", "parent-canonical");
        assert_eq!(
            domain.resolve("plugin_kernel_sdk::Marker").unwrap().as_ref(),
            "parent-canonical"
        );
    }

    #[test]
    fn whitelist_miss_does_not_fall_through_to_child() {
        let domain = PluginDomain::new("p3");
        domain.add_name("plugin_kernel_sdk::OnlyChild", "should-not-resolve");
        let err = domain.resolve("plugin_kernel_sdk::OnlyChild").unwrap_err();
        assert!(matches!(err, KernelError::NameNotFound { .. }));
    }

    #[test]
    fn closed_domain_fails_lookups() {
        let domain = PluginDomain::new("p4");
        domain.add_name("x", "y");
        domain.close();
        let err = domain.resolve("x").unwrap_err();
        assert!(matches!(err, KernelError::LoaderClosed { .. }));
    }

    #[test]
    fn registry_closes_domain_when_refcount_hits_zero() {
        let registry = DomainRegistry::new();
        let d1 = registry.acquire("p5");
        let d2 = registry.acquire("p5");
        assert!(Arc::ptr_eq(&d1, &d2));
        registry.release("p5");
        assert!(!d1.is_closed());
        registry.release("p5");
        assert!(d1.is_closed());
    }
}
