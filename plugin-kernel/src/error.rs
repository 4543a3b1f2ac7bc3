//! # Kernel Error Taxonomy
//!
//! The full set of failure kinds a host embedding the kernel can observe,
//! per the error handling design: each kernel stage translates its
//! stage-specific failures to one of these kinds rather than leaking a raw
//! internal fault. Business-domain failures raised by a plugin's own dispatch
//! are wrapped once (`InternalFault`) and unwrapped again at the proxy
//! boundary so callers see the originating cause.

use thiserror::Error;

use plugin_kernel_sdk::SdkError;

#[derive(Error, Debug)]
pub enum KernelError {
    /// A manifest failed to parse or validate. Install makes no state change.
    #[error("manifest invalid: {0}")]
    ManifestInvalid(#[from] SdkError),

    /// An isolation-loader lookup was attempted after the domain closed.
    #[error("loader closed: domain '{domain}'")]
    LoaderClosed { domain: String },

    /// An isolation-loader lookup found no matching name.
    #[error("name not found: '{name}' in domain '{domain}'")]
    NameNotFound { domain: String, name: String },

    /// An operation named a plugin id the manager has no runtime for.
    #[error("plugin not found: '{plugin_id}'")]
    PluginNotFound { plugin_id: String },

    /// `install`/`reload` failed after partial setup; rolled back.
    #[error("plugin install failed for '{plugin_id}': {reason}")]
    PluginInstallFailure { plugin_id: String, reason: String },

    /// No `READY` instance was available, or `tryEnter` failed.
    #[error("service unavailable: '{plugin_id}'")]
    ServiceUnavailable { plugin_id: String },

    /// A governance/permission check denied the call.
    #[error("permission denied: caller '{caller}' lacks '{permission}' at {access_type:?}")]
    PermissionDenied {
        caller: String,
        permission: String,
        access_type: plugin_kernel_sdk::AccessType,
    },

    /// The bulkhead semaphore could not be acquired within its timeout.
    #[error("bulkhead full: runtime '{plugin_id}'")]
    BulkheadFull { plugin_id: String },

    /// The dispatched call exceeded its deadline.
    #[error("timed out after {millis}ms")]
    TimedOut { millis: u64 },

    /// A caller-supplied argument or state transition was illegal.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other failure, wrapped once with its original cause preserved.
    #[error("internal fault: {message}")]
    InternalFault { message: String },
}

impl KernelError {
    pub fn internal(message: impl Into<String>) -> Self {
        KernelError::InternalFault {
            message: message.into(),
        }
    }
}
