//! # Governance
//!
//! Everything the invocation pipeline consults before and after a dispatch:
//! the policy chain (C7), the permission service (C12), the audit/event bus
//! (C11), the governance-patch persistence layer, and the kernel pipeline
//! itself (C8) that ties them together.

pub mod audit;
pub mod kernel;
pub mod patch;
pub mod permission;
pub mod policy;

pub use audit::{AuditExecutor, AuditRecord, AuditSink, EventBus, KernelEvent, TracingAuditSink};
pub use kernel::GovernanceKernel;
pub use patch::GovernancePatchStore;
pub use permission::PermissionService;
pub use policy::{GovernanceDecision, GovernanceProvider, PartialDecision, PolicyChain, PolicyQuery};
