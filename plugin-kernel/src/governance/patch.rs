//! # Governance-Patch Persistence
//!
//! A per-plugin `GovernancePolicy` overlay (priority P1, ahead of a plugin's
//! own self-declared policy) that a host operator can update at runtime
//! without touching the plugin package. Stored as `map<pluginId,
//! GovernancePolicy>` in a single YAML file, written full-replace with an
//! atomic rename, generalized to YAML for manifest-format consistency with
//! `plugin-kernel-sdk::definition`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use dashmap::DashMap;

use plugin_kernel_sdk::GovernancePolicy;

/// File-backed patch overlay. `update_patch` requires `&mut self`-level
/// discipline by going through a single writer (the manager); reads are
/// lock-free via `DashMap`.
pub struct GovernancePatchStore {
    path: Option<PathBuf>,
    patches: DashMap<String, GovernancePolicy>,
}

impl GovernancePatchStore {
    /// Load from `path` if it exists; an absent file starts with an empty
    /// patch set (not an error — there is nothing to patch yet).
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let patches = match std::fs::read(&path) {
            Ok(bytes) => serde_yaml::from_slice::<HashMap<String, GovernancePolicy>>(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: Some(path),
            patches: patches.into_iter().collect(),
        })
    }

    /// A store with no backing file, for tests and embedding hosts that
    /// don't want disk persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            patches: DashMap::new(),
        }
    }

    pub fn get(&self, plugin_id: &str) -> Option<GovernancePolicy> {
        self.patches.get(plugin_id).map(|p| p.value().clone())
    }

    /// Replace `plugin_id`'s patch and persist the whole map, full-replace,
    /// via a temp-file-then-rename so readers never observe a half-written
    /// file.
    pub fn update_patch(&self, plugin_id: &str, policy: GovernancePolicy) -> io::Result<()> {
        self.patches.insert(plugin_id.to_string(), policy);
        self.persist()
    }

    pub fn remove_patch(&self, plugin_id: &str) -> io::Result<()> {
        self.patches.remove(plugin_id);
        self.persist()
    }

    fn persist(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot: HashMap<String, GovernancePolicy> = self
            .patches
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let body = serde_yaml::to_string(&snapshot)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_kernel_sdk::PermissionRule;

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = GovernancePatchStore::load(dir.path().join("patch.yml")).unwrap();
        assert!(store.get("p").is_none());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.yml");
        let store = GovernancePatchStore::load(&path).unwrap();
        let mut policy = GovernancePolicy::default();
        policy.permissions.push(PermissionRule {
            method_pattern: "get*".to_string(),
            permission_id: "users:read".to_string(),
        });
        store.update_patch("users", policy).unwrap();
        assert!(path.exists());

        let reloaded = GovernancePatchStore::load(&path).unwrap();
        let policy = reloaded.get("users").unwrap();
        assert_eq!(policy.permission_for("getUser"), Some("users:read"));
    }

    #[test]
    fn remove_patch_clears_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.yml");
        let store = GovernancePatchStore::load(&path).unwrap();
        store.update_patch("users", GovernancePolicy::default()).unwrap();
        store.remove_patch("users").unwrap();
        assert!(store.get("users").is_none());
    }
}
