//! # Governance Policy Chain
//!
//! An ordered list of providers, each answering `resolve` with a partial
//! decision or abstaining (`None`). The first non-null answer for each field
//! wins across the whole chain; a later, lower-priority provider can never
//! override a field an earlier provider already set. The standard provider
//! implements five internal priority levels (P0 host-forced through P4
//! inferred) using the same first-non-null merge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use plugin_kernel_sdk::{AccessType, PluginDefinition};

use crate::config::HostRule;
use crate::governance::patch::GovernancePatchStore;

/// What a governance decision is queried for: the target plugin's
/// definition, the method being invoked, and the caller's plugin id (for
/// P0 rules keyed by `pluginId.methodPattern`).
pub struct PolicyQuery<'a> {
    pub plugin_id: &'a str,
    pub method: &'a str,
    pub caller_plugin_id: &'a str,
    pub definition: &'a PluginDefinition,
}

/// A provider's answer: only the fields it has an opinion on are `Some`.
#[derive(Debug, Clone, Default)]
pub struct PartialDecision {
    pub required_permission: Option<String>,
    pub access_type: Option<AccessType>,
    pub audit_action: Option<String>,
    pub should_audit: Option<bool>,
    pub timeout: Option<Duration>,
}

impl PartialDecision {
    fn merge_missing(&mut self, other: &PartialDecision) {
        if self.required_permission.is_none() {
            self.required_permission = other.required_permission.clone();
        }
        if self.access_type.is_none() {
            self.access_type = other.access_type;
        }
        if self.audit_action.is_none() {
            self.audit_action = other.audit_action.clone();
        }
        if self.should_audit.is_none() {
            self.should_audit = other.should_audit;
        }
        if self.timeout.is_none() {
            self.timeout = other.timeout;
        }
    }

    fn is_complete(&self) -> bool {
        self.required_permission.is_some()
            && self.access_type.is_some()
            && self.audit_action.is_some()
            && self.should_audit.is_some()
            && self.timeout.is_some()
    }
}

/// Fully resolved governance outcome for one invocation.
#[derive(Debug, Clone)]
pub struct GovernanceDecision {
    pub required_permission: String,
    pub access_type: AccessType,
    pub audit_action: String,
    pub should_audit: bool,
    pub timeout: Duration,
}

/// Hard floor applied after every provider has had a chance to answer.
const FLOOR_PERMISSION: &str = "default:execute";
const FLOOR_ACCESS: AccessType = AccessType::Execute;
const FLOOR_AUDIT_ENABLED: bool = false;

impl GovernanceDecision {
    fn from_partial(partial: PartialDecision, default_timeout: Duration) -> Self {
        Self {
            required_permission: partial
                .required_permission
                .unwrap_or_else(|| FLOOR_PERMISSION.to_string()),
            access_type: partial.access_type.unwrap_or(FLOOR_ACCESS),
            audit_action: partial.audit_action.unwrap_or_default(),
            should_audit: partial.should_audit.unwrap_or(FLOOR_AUDIT_ENABLED),
            timeout: partial.timeout.unwrap_or(default_timeout),
        }
    }
}

/// One provider in the chain, ordered ascending by [`GovernanceProvider::order`].
pub trait GovernanceProvider: Send + Sync {
    fn order(&self) -> i32;
    fn resolve(&self, query: &PolicyQuery<'_>) -> Option<PartialDecision>;
}

/// Ordered chain of providers plus the default timeout applied by the hard
/// floor when no provider sets one.
pub struct PolicyChain {
    providers: Vec<Box<dyn GovernanceProvider>>,
    default_timeout: Duration,
}

impl PolicyChain {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            default_timeout,
        }
    }

    /// Register a provider and keep the chain sorted ascending by `order`.
    pub fn register(&mut self, provider: Box<dyn GovernanceProvider>) {
        self.providers.push(provider);
        self.providers.sort_by_key(|p| p.order());
    }

    /// Resolve a decision for one call: first-non-null per field across
    /// providers in ascending order, then the hard floor fills whatever
    /// remains unset.
    pub fn resolve(&self, query: &PolicyQuery<'_>) -> GovernanceDecision {
        let mut acc = PartialDecision::default();
        for provider in &self.providers {
            if acc.is_complete() {
                break;
            }
            if let Some(partial) = provider.resolve(query) {
                acc.merge_missing(&partial);
            }
        }
        GovernanceDecision::from_partial(acc, self.default_timeout)
    }
}

/// Method-level declarative markers a plugin manifest can attach under
/// `properties.annotations.<method>`, standing in for code-level
/// annotations (there is no runtime reflection over Rust plugin code, so
/// the manifest carries the same declarative intent).
#[derive(Debug, Clone, Deserialize)]
struct MethodAnnotation {
    #[serde(default)]
    permission: Option<String>,
    #[serde(default, rename = "accessType")]
    access_type: Option<AccessType>,
    #[serde(default)]
    audit: Option<bool>,
    #[serde(default, rename = "auditAction")]
    audit_action: Option<String>,
}

/// The standard governance provider: P0 host-forced, P1 dynamic patch, P2
/// plugin self-declared, P3 manifest annotations, P4 inferred-from-name.
/// Always registered with the lowest priority (`order = i32::MAX`) so any
/// admin-supplied custom provider can preempt it field-by-field.
pub struct StandardProvider {
    host_rules: Vec<CompiledHostRule>,
    patch_store: Arc<GovernancePatchStore>,
}

struct CompiledHostRule {
    regex: Regex,
    rule: HostRule,
}

impl StandardProvider {
    pub fn new(host_rules: &[HostRule], patch_store: Arc<GovernancePatchStore>) -> Self {
        let compiled = host_rules
            .iter()
            .filter_map(|r| glob_to_regex(&r.pattern).ok().map(|re| CompiledHostRule {
                regex: re,
                rule: r.clone(),
            }))
            .collect();
        Self {
            host_rules: compiled,
            patch_store,
        }
    }

    fn p0_host_forced(&self, query: &PolicyQuery<'_>) -> Option<PartialDecision> {
        let key = format!("{}.{}", query.plugin_id, query.method);
        self.host_rules
            .iter()
            .find(|c| c.regex.is_match(&key))
            .map(|c| PartialDecision {
                required_permission: Some(c.rule.permission.clone()),
                access_type: Some(c.rule.access),
                audit_action: c.rule.audit_action.clone(),
                should_audit: Some(c.rule.audit),
                timeout: c.rule.timeout.map(Duration::from_millis),
            })
    }

    fn p1_dynamic_patch(&self, query: &PolicyQuery<'_>) -> Option<PartialDecision> {
        let policy = self.patch_store.get(query.plugin_id)?;
        partial_from_policy(&policy, query.method)
    }

    fn p2_self_declared(&self, query: &PolicyQuery<'_>) -> Option<PartialDecision> {
        partial_from_policy(&query.definition.governance, query.method)
    }

    fn p3_annotations(&self, query: &PolicyQuery<'_>) -> Option<PartialDecision> {
        let annotations = query.definition.properties.get("annotations")?;
        let by_method: HashMap<String, MethodAnnotation> =
            serde_json::from_value(annotations.clone()).ok()?;
        let ann = by_method.get(query.method)?;
        Some(PartialDecision {
            required_permission: ann.permission.clone(),
            access_type: ann.access_type,
            audit_action: ann.audit_action.clone(),
            should_audit: ann.audit,
            timeout: None,
        })
    }

    fn p4_inferred(&self, query: &PolicyQuery<'_>) -> PartialDecision {
        let access_type = infer_access_type(query.method);
        let permission = format!("{}:{:?}", query.definition.id, access_type).to_lowercase();
        let should_audit = matches!(access_type, AccessType::Write | AccessType::Execute);
        PartialDecision {
            required_permission: Some(permission),
            access_type: Some(access_type),
            audit_action: Some(query.method.to_string()),
            should_audit: Some(should_audit),
            timeout: None,
        }
    }
}

impl GovernanceProvider for StandardProvider {
    fn order(&self) -> i32 {
        i32::MAX
    }

    fn resolve(&self, query: &PolicyQuery<'_>) -> Option<PartialDecision> {
        let mut acc = PartialDecision::default();
        for partial in [
            self.p0_host_forced(query),
            self.p1_dynamic_patch(query),
            self.p2_self_declared(query),
            self.p3_annotations(query),
            Some(self.p4_inferred(query)),
        ]
        .into_iter()
        .flatten()
        {
            if acc.is_complete() {
                break;
            }
            acc.merge_missing(&partial);
        }
        Some(acc)
    }
}

fn partial_from_policy(
    policy: &plugin_kernel_sdk::GovernancePolicy,
    method: &str,
) -> Option<PartialDecision> {
    let permission = policy.permission_for(method).map(|s| s.to_string());
    let audit = policy.audit_for(method);
    if permission.is_none() && audit.is_none() {
        return None;
    }
    Some(PartialDecision {
        required_permission: permission,
        access_type: None,
        audit_action: audit.map(|a| a.action.clone()),
        should_audit: audit.map(|a| a.enabled),
        timeout: None,
    })
}

/// `get|find|query|list|select|count|check|is|has` -> READ;
/// `create|save|insert|update|modify|delete|remove|add|set` -> WRITE
/// (delete included here rather than as a distinct access level);
/// everything else -> EXECUTE.
fn infer_access_type(method: &str) -> AccessType {
    const READ_PREFIXES: &[&str] = &[
        "get", "find", "query", "list", "select", "count", "check", "is", "has",
    ];
    const WRITE_PREFIXES: &[&str] = &[
        "create", "save", "insert", "update", "modify", "delete", "remove", "add", "set",
    ];
    if READ_PREFIXES.iter().any(|p| method.starts_with(p)) {
        AccessType::Read
    } else if WRITE_PREFIXES.iter().any(|p| method.starts_with(p)) {
        AccessType::Write
    } else {
        AccessType::Execute
    }
}

/// Compile a `*`-glob host rule pattern into an anchored regex, so a rule
/// only matches a full prefix/suffix span rather than any substring.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::from("^");
    for part in pattern.split('*') {
        out.push_str(&regex::escape(part));
        out.push_str(".*");
    }
    for _ in 0..2 {
        out.pop();
    }
    out.push('$');
    Regex::new(&out)
}
