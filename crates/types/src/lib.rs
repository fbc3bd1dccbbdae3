//! Shared types for the audit configuration subsystem
//!
//! This crate contains the error taxonomy and the small domain types shared by
//! the configuration store and its integration layer.

pub mod change;
pub mod environment;
pub mod error;
pub mod utils;
pub mod version;

// Re-export commonly used types
pub use change::ConfigChangeEvent;
pub use environment::Environment;
pub use error::{
    AuditConfigError, ConfigLoadError, ConfigPathError, ConfigValidationError, CryptoError, Result,
    ValidationIssue, ValidationKind,
};
pub use version::VersionStamp;
