//! # Permission Service
//!
//! In-memory `map<pluginId, map<capability, AccessType>>`, consulted by the
//! governance kernel's permission stage. Nested `DashMap`s keyed first by
//! plugin id, then by granted capability.

use dashmap::DashMap;

use plugin_kernel_sdk::AccessType;

/// Prefix that is always allowed regardless of grants: this platform's own
/// public contract namespace, matching the isolation loader's whitelist.
pub const WHITELIST_PREFIX: &str = "plugin_kernel_sdk::";

/// `map<pluginId, map<capability, AccessType>>` with `dev_mode` warn-only
/// override: a deny is logged but still returns `true`.
pub struct PermissionService {
    grants: DashMap<String, DashMap<String, AccessType>>,
    dev_mode: bool,
}

impl PermissionService {
    pub fn new(dev_mode: bool) -> Self {
        Self {
            grants: DashMap::new(),
            dev_mode,
        }
    }

    pub fn grant(&self, plugin_id: &str, capability: &str, access: AccessType) {
        self.grants
            .entry(plugin_id.to_string())
            .or_default()
            .insert(capability.to_string(), access);
    }

    pub fn revoke(&self, plugin_id: &str, capability: &str) {
        if let Some(by_cap) = self.grants.get(plugin_id) {
            by_cap.remove(capability);
        }
    }

    pub fn get_permission(&self, plugin_id: &str, capability: &str) -> Option<AccessType> {
        self.grants.get(plugin_id)?.get(capability).map(|v| *v)
    }

    /// `None` caller id (internal calls) and the whitelisted contract
    /// namespace are always allowed. In `dev_mode`, a would-be deny is
    /// logged and allowed anyway (warn-only). Otherwise, the granted level
    /// must be at least as permissive as `required`.
    pub fn is_allowed(
        &self,
        caller_plugin_id: Option<&str>,
        capability: &str,
        required: AccessType,
    ) -> bool {
        let Some(caller) = caller_plugin_id else {
            return true;
        };
        if caller.starts_with(WHITELIST_PREFIX) {
            return true;
        }
        let granted = self.get_permission(caller, capability);
        let allowed = granted.map(|g| g.satisfies(required)).unwrap_or(false);
        if !allowed && self.dev_mode {
            tracing::warn!(
                caller,
                capability,
                ?required,
                "permission denied but allowed under dev_mode"
            );
            return true;
        }
        allowed
    }

    pub fn remove_plugin(&self, plugin_id: &str) {
        self.grants.remove(plugin_id);
    }

    pub fn audit(&self, caller_plugin_id: &str, capability: &str, operation: &str, allowed: bool) {
        tracing::info!(
            caller = caller_plugin_id,
            capability,
            operation,
            allowed,
            "permission check"
        );
    }
}
