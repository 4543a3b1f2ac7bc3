//! # Plugin Runtime Kernel
//!
//! A process-embedded plugin platform: an isolation loader, a manifest model,
//! a blue/green instance pool per plugin, a governance pipeline (policy
//! chain, permission service, bulkhead, audit), and a hot-reload detector for
//! development. Plugins compile against `plugin-kernel-sdk` alone; this crate
//! holds every piece of kernel-internal mutable state and wires them together
//! behind [`manager::PluginManager`].
//!
//! ## Architecture
//!
//! - **[`isolation`]**: three-tier code namespace (Host -> SharedApi -> one
//!   domain per plugin), with a delegation whitelist for contract types.
//! - **[`instance`]**: one [`instance::PluginInstance`] per deployed
//!   `(plugin, version)`, held in an [`instance::InstancePool`] with a
//!   lock-free default pointer and a bounded dying queue.
//! - **[`runtime`]**: per-plugin lifecycle state machine and label/weight
//!   instance selection.
//! - **[`governance`]**: the policy chain (host-forced through
//!   inferred-from-name priorities), the permission service, the audit sink
//!   and event bus, and the kernel pipeline tying them together around one
//!   `invoke` entry point.
//! - **[`manager`]**: the plugin catalog — install, reload, canary-deploy,
//!   uninstall — and the `ServiceLocator` a plugin's context delegates to.
//! - **[`proxy`]**: per-caller and host-originated routing surfaces over the
//!   manager.
//! - **[`hotreload`]**: filesystem watch + per-plugin debounce, `dev_mode`
//!   only.
//! - **[`context`]**: the pooled per-call `InvocationContext` and trace-depth
//!   tracking threaded through governance.
//! - **[`config`]**: host startup configuration.
//! - **[`error`]**: the kernel's error taxonomy.
//! - **[`metrics`]**: process-wide counters for a host's own metrics surface.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use plugin_kernel::config::HostConfig;
//! use plugin_kernel::manager::PluginManager;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = HostConfig::load("config/plugin-kernel.toml")?;
//! let manager = Arc::new(PluginManager::new(config));
//! // manager.install(definition, container).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod governance;
pub mod hotreload;
pub mod instance;
pub mod isolation;
pub mod manager;
pub mod metrics;
pub mod proxy;
pub mod runtime;

pub use config::HostConfig;
pub use error::KernelError;
pub use manager::PluginManager;
