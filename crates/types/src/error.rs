//! Error types for the audit configuration subsystem

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for configuration operations
#[derive(Error, Debug)]
pub enum AuditConfigError {
    /// Loading, parsing or decrypting the backing store failed
    #[error(transparent)]
    Load(#[from] ConfigLoadError),

    /// One or more validation rules were violated
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),

    /// Unknown or unusable dotted path
    #[error(transparent)]
    Path(#[from] ConfigPathError),

    /// Encryption failures while persisting
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Writing the backing store failed
    #[error("Failed to persist configuration to {target}: {message}")]
    Persist { target: String, message: String },

    /// Operation not permitted in the current lifecycle state
    #[error("Configuration manager is {state}; cannot {operation}")]
    InvalidState {
        state: String,
        operation: &'static str,
    },

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, AuditConfigError>;

/// Errors raised while reading the backing store at boot or on reload
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    /// File not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },

    /// File exists but could not be read
    #[error("Failed to read configuration from {path}: {message}")]
    Io { path: String, message: String },

    /// Malformed JSON
    #[error("Configuration parse error: {0}")]
    Parse(String),

    /// JSON is well formed but does not fit the configuration schema
    #[error("Configuration schema mismatch: {0}")]
    Schema(String),

    /// Decryption or authentication failure
    #[error("Failed to decrypt configuration: {0}")]
    Decrypt(#[from] CryptoError),

    /// Secure storage is enabled but no secret was supplied
    #[error("Secure storage is enabled but {variable} is not set")]
    MissingSecret { variable: String },

    /// Encrypted payload found but secure storage is disabled
    #[error("Configuration at {path} is encrypted but secure storage is disabled")]
    EncryptedWithoutKey { path: String },

    /// I/O or crypto exceeded the configured bound
    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },
}

/// Errors for dotted path lookups and updates
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigPathError {
    /// Path is empty
    #[error("Configuration path is empty")]
    Empty,

    /// Path does not name a field of the configuration tree
    #[error("Configuration path not found: {path}")]
    NotFound { path: String },

    /// Path names a section, not a leaf field
    #[error("Configuration path {path} is a section, not a field")]
    NotALeaf { path: String },

    /// Path is managed by the configuration manager itself
    #[error("Configuration path {path} is read-only")]
    ReadOnly { path: String },
}

/// Cryptography specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Unknown algorithm identifier
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Key derivation parameters rejected
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failure
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failure, including authentication tag mismatch
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Envelope fields missing or not hex encoded
    #[error("Malformed encrypted envelope: {0}")]
    MalformedEnvelope(String),
}

/// Kind of a single validation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationKind {
    Required,
    Type,
    Min,
    Max,
    Pattern,
    Enum,
    Custom,
    CrossField,
    ProductionRequired,
    ProductionConstraint,
}

impl ValidationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::Required => "required",
            ValidationKind::Type => "type",
            ValidationKind::Min => "min",
            ValidationKind::Max => "max",
            ValidationKind::Pattern => "pattern",
            ValidationKind::Enum => "enum",
            ValidationKind::Custom => "custom",
            ValidationKind::CrossField => "cross-field",
            ValidationKind::ProductionRequired => "production-required",
            ValidationKind::ProductionConstraint => "production-constraint",
        }
    }
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single violated rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.path, self.kind, self.message)
    }
}

/// Every violated rule of one validation pass
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ConfigValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    /// Whether any issue was reported for `path` with the given kind
    pub fn has(&self, path: &str, kind: ValidationKind) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.path == path && issue.kind == kind)
    }

    /// Distinct paths with at least one issue
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = Vec::new();
        for issue in &self.issues {
            if !paths.contains(&issue.path.as_str()) {
                paths.push(issue.path.as_str());
            }
        }
        paths
    }
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Configuration validation failed with {} error(s)",
            self.issues.len()
        )?;
        for issue in &self.issues {
            write!(f, "\n  - {}", issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}

impl AuditConfigError {
    /// Validation issues carried by this error, if any
    pub fn validation_issues(&self) -> Option<&[ValidationIssue]> {
        match self {
            AuditConfigError::Validation(err) => Some(&err.issues),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregated_message_lists_every_issue() {
        let err = ConfigValidationError::new(vec![
            ValidationIssue::new("retry.maxDelay", ValidationKind::CrossField, "must be >= retry.baseDelay"),
            ValidationIssue::new("logging.level", ValidationKind::Enum, "unknown level"),
        ]);

        let message = err.to_string();
        assert!(message.contains("2 error(s)"));
        assert!(message.contains("retry.maxDelay [cross-field]"));
        assert!(message.contains("logging.level [enum]"));
        assert!(err.has("retry.maxDelay", ValidationKind::CrossField));
        assert!(!err.has("retry.maxDelay", ValidationKind::Min));
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ValidationKind::ProductionRequired).unwrap();
        assert_eq!(json, "\"production-required\"");
        assert_eq!(ValidationKind::CrossField.to_string(), "cross-field");
    }

    #[test]
    fn test_crypto_error_converts_to_load_error() {
        let load: ConfigLoadError = CryptoError::Decryption("tag mismatch".to_string()).into();
        assert!(load.to_string().contains("tag mismatch"));

        let top: AuditConfigError = load.into();
        assert!(matches!(top, AuditConfigError::Load(ConfigLoadError::Decrypt(_))));
    }
}
