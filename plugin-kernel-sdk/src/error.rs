//! # Error Handling Module
//!
//! Error types shared by plugin authors and the kernel: failures that can occur
//! while parsing a manifest into a [`crate::definition::PluginDefinition`], and
//! failures a [`crate::container::PluginContainer`] implementation may report
//! back through its narrow lifecycle contract.
//!
//! The kernel crate's own error type wraps [`SdkError`] the same way it wraps
//! every other stage-specific failure, so a manifest problem surfaces to an
//! operator with the same shape as a permission denial or a bulkhead rejection.

use thiserror::Error;

/// Errors raised while parsing or validating a plugin manifest, or while a
/// container reports a lifecycle failure back across the SDK boundary.
#[derive(Error, Debug)]
pub enum SdkError {
    /// No manifest bytes were supplied, or the document was empty.
    #[error("manifest missing")]
    ManifestMissing,

    /// The manifest parsed as a document but failed validation.
    #[error("manifest invalid: field '{field}' - {reason}")]
    ManifestInvalid { field: String, reason: String },

    /// The manifest body could not be parsed as YAML at all.
    #[error("manifest parse error: {0}")]
    ManifestParse(#[from] serde_yaml::Error),

    /// A dependency's `minVersion` (or the manifest's own `version`) was not a
    /// valid semantic version string.
    #[error("invalid version '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },

    /// A container failed to start, stop, or otherwise satisfy its contract.
    #[error("container fault: {message}")]
    ContainerFault { message: String },

    /// A lookup through [`crate::container::PluginContext`] asked for a type
    /// the container does not expose.
    #[error("service not found: {interface}")]
    ServiceNotFound { interface: String },
}
