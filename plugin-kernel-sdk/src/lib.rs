//! # Plugin Kernel SDK
//!
//! Shared contract types for the plugin runtime kernel: the manifest/definition
//! model a plugin author writes against, the narrow container interface a
//! plugin's object graph must satisfy, the routing vocabulary shared between a
//! deployed instance and the kernel's instance-selection logic, and the
//! error type both sides raise.
//!
//! This crate holds no kernel-internal mutable state — no instance pools, no
//! governance chains, no audit queues. Those live in `plugin-kernel`, which
//! depends on this crate rather than the other way around, so a plugin can be
//! compiled against the SDK alone.
//!
//! ## Modules
//!
//! - [`definition`]: `PluginDefinition`, `GovernancePolicy`, and the
//!   declarative rule types (`PermissionRule`, `CapabilityRule`, `AuditRule`).
//! - [`container`]: `PluginContainer`, `PluginContext`, `ServiceLocator`.
//! - [`routing`]: `Labels`, `TrafficWeight`, label-scoring helpers shared with
//!   the kernel's instance selection.
//! - [`error`]: `SdkError`.

pub mod container;
pub mod definition;
pub mod error;
pub mod routing;

pub use container::{CodeDomain, PluginContainer, PluginContext, ServiceLocator};
pub use definition::{
    AccessType, AuditRule, CapabilityRule, GovernancePolicy, PermissionRule, PluginDefinition,
    PluginDependency,
};
pub use error::SdkError;
pub use routing::{LabelScore, Labels, RoutingDecision, TrafficWeight};
