//! # Manifest & Definition Model
//!
//! Typed representation of a plugin's manifest: identity, declared dependencies,
//! self-declared governance policy, and free-form properties. `parse` is the
//! only entry point — a pure function over manifest bytes, no I/O, matching the
//! narrow "manifest parsing front-end is out of scope" boundary: this module
//! turns bytes already read by someone else into validated, immutable structs.

use std::collections::HashMap;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::SdkError;

/// Three-level access ordering used throughout governance and permission
/// checks. `Read < Write < Execute`; a granted level satisfies any required
/// level at or below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

impl AccessType {
    /// `true` iff `self` is at least as permissive as `required`.
    pub fn satisfies(&self, required: AccessType) -> bool {
        *self >= required
    }
}

/// A plugin's reference to another plugin it requires, with a minimum
/// acceptable version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDependency {
    pub id: String,
    #[serde(rename = "minVersion")]
    pub min_version: String,
}

impl PluginDependency {
    /// Parsed `min_version`, validated at manifest-parse time so downstream
    /// version comparisons never need to handle a malformed string.
    pub fn min_version(&self) -> Result<Version, SdkError> {
        Version::parse(&self.min_version).map_err(|e| SdkError::InvalidVersion {
            value: self.min_version.clone(),
            reason: e.to_string(),
        })
    }
}

/// One entry in a [`GovernancePolicy`]'s permission list: which permission id
/// applies to methods matching `method_pattern`.
///
/// `method_pattern` is exact-match, or a trailing-`*` prefix (e.g. `get*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    #[serde(rename = "methodPattern")]
    pub method_pattern: String,
    #[serde(rename = "permissionId")]
    pub permission_id: String,
}

/// One entry in a [`GovernancePolicy`]'s capability list: the access level a
/// capability requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRule {
    pub capability: String,
    #[serde(rename = "accessType")]
    pub access_type: AccessType,
}

/// One entry in a [`GovernancePolicy`]'s audit list: whether methods matching
/// `method_pattern` should be audited, and under what action name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRule {
    #[serde(rename = "methodPattern")]
    pub method_pattern: String,
    pub action: String,
    pub enabled: bool,
}

impl PermissionRule {
    pub fn matches(&self, method: &str) -> bool {
        match_pattern(&self.method_pattern, method)
    }
}

impl AuditRule {
    pub fn matches(&self, method: &str) -> bool {
        match_pattern(&self.method_pattern, method)
    }
}

/// Exact match, or trailing-`*` prefix match, per the manifest pattern syntax.
pub fn match_pattern(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => pattern == candidate,
    }
}

/// A plugin's self-declared governance policy: ordered rule lists consulted
/// at priority P2 of the governance chain (plugin self-declared), and the same
/// shape persisted as a dynamic patch overlay at priority P1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernancePolicy {
    #[serde(default)]
    pub permissions: Vec<PermissionRule>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityRule>,
    #[serde(default)]
    pub audits: Vec<AuditRule>,
}

impl GovernancePolicy {
    pub fn permission_for(&self, method: &str) -> Option<&str> {
        self.permissions
            .iter()
            .find(|r| r.matches(method))
            .map(|r| r.permission_id.as_str())
    }

    pub fn capability_for(&self, capability: &str) -> Option<AccessType> {
        self.capabilities
            .iter()
            .find(|r| r.capability == capability)
            .map(|r| r.access_type)
    }

    pub fn audit_for(&self, method: &str) -> Option<&AuditRule> {
        self.audits.iter().find(|r| r.matches(method))
    }
}

/// Immutable, validated description of one plugin package.
///
/// Reserved `properties` keys: `canary` (bool) marks a deployed instance as
/// non-default traffic, `trafficWeight` (int) sets its weighted-random share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDefinition {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "mainEntry")]
    pub main_entry: String,
    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,
    #[serde(default)]
    pub governance: GovernancePolicy,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl PluginDefinition {
    /// Parse and validate a manifest document.
    ///
    /// Pure function: the only input is `source_bytes`, no filesystem or
    /// network access happens here.
    pub fn parse(source_bytes: &[u8]) -> Result<Self, SdkError> {
        if source_bytes.is_empty() {
            return Err(SdkError::ManifestMissing);
        }
        let def: PluginDefinition = serde_yaml::from_slice(source_bytes)?;
        def.validate()?;
        Ok(def)
    }

    fn validate(&self) -> Result<(), SdkError> {
        if self.id.is_empty() {
            return Err(SdkError::ManifestInvalid {
                field: "id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if !self
            .id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(SdkError::ManifestInvalid {
                field: "id".to_string(),
                reason: "must match [a-z0-9-]+".to_string(),
            });
        }
        if self.version.is_empty() {
            return Err(SdkError::ManifestInvalid {
                field: "version".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Version::parse(&self.version).map_err(|e| SdkError::ManifestInvalid {
            field: "version".to_string(),
            reason: e.to_string(),
        })?;
        if self.main_entry.is_empty() {
            return Err(SdkError::ManifestInvalid {
                field: "mainEntry".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        for dep in &self.dependencies {
            dep.min_version().map_err(|_| SdkError::ManifestInvalid {
                field: "dependencies.minVersion".to_string(),
                reason: format!("'{}' is not a valid semver", dep.min_version),
            })?;
        }
        Ok(())
    }

    /// `properties.canary`, defaulting to `false` when absent or non-boolean.
    pub fn is_canary(&self) -> bool {
        self.properties
            .get("canary")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// `properties.trafficWeight`, defaulting to 100 when absent or non-numeric.
    pub fn traffic_weight(&self) -> u32 {
        self.properties
            .get("trafficWeight")
            .and_then(|v| v.as_u64())
            .map(|w| w as u32)
            .unwrap_or(100)
    }
}
