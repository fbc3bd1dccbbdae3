//! Configuration loader implementation
//!
//! Turns stored bytes into a validated [`AuditConfig`] and back. Parsing goes
//! through `serde_json::Value` first so the validation engine sees wrong types
//! as individual issues; the typed tree is only built once the value passes.

use crate::schema::AuditConfig;
use crate::secure::{EncryptedEnvelope, SecureStore};
use crate::validation::{ValidationEngine, ValidationReport};
use serde_json::Value;
use tracing::{debug, warn};
use types::{AuditConfigError, ConfigLoadError, Result};

/// Document read from storage
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AuditConfig,
    pub report: ValidationReport,
    /// Whether the stored form was an encrypted envelope
    pub was_encrypted: bool,
}

/// Configuration loader that handles plaintext and encrypted JSON
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    engine: ValidationEngine,
}

impl ConfigLoader {
    pub fn new(engine: ValidationEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &ValidationEngine {
        &self.engine
    }

    /// Decode, decrypt if needed, validate and type a stored document
    pub fn load(&self, source: &str, bytes: &[u8], store: Option<&SecureStore>) -> Result<LoadedConfig> {
        let (value, was_encrypted) = Self::decode(source, bytes, store)?;
        let (config, report) = self.parse_value(value)?;

        if !was_encrypted && store.is_some() {
            warn!(source = %source, "Plaintext configuration found while secure storage is enabled");
        }

        Ok(LoadedConfig {
            config,
            report,
            was_encrypted,
        })
    }

    /// Load from a plaintext JSON string (for testing and the CLI)
    pub fn load_from_str(&self, json: &str) -> Result<AuditConfig> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ConfigLoadError::Parse(e.to_string()))?;
        Ok(self.parse_value(value)?.0)
    }

    /// Raw bytes to a JSON value, unwrapping an encrypted envelope
    pub fn decode(
        source: &str,
        bytes: &[u8],
        store: Option<&SecureStore>,
    ) -> std::result::Result<(Value, bool), ConfigLoadError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| ConfigLoadError::Parse(e.to_string()))?;

        if !EncryptedEnvelope::looks_like(&value) {
            return Ok((value, false));
        }

        let store = store.ok_or_else(|| ConfigLoadError::EncryptedWithoutKey {
            path: source.to_string(),
        })?;
        let envelope: EncryptedEnvelope = serde_json::from_value(value)
            .map_err(|e| ConfigLoadError::Parse(format!("Invalid envelope: {}", e)))?;
        let plaintext = store.open(&envelope)?;

        debug!(source = %source, algorithm = %envelope.algorithm, "Decrypted configuration");

        let value = serde_json::from_slice(&plaintext)
            .map_err(|e| ConfigLoadError::Parse(format!("Decrypted payload: {}", e)))?;
        Ok((value, true))
    }

    /// Validate a JSON tree, then deserialize it into the closed schema
    pub fn parse_value(&self, value: Value) -> Result<(AuditConfig, ValidationReport)> {
        let report = self.engine.validate_value(&value)?;
        let config: AuditConfig = serde_json::from_value(value)
            .map_err(|e| ConfigLoadError::Schema(e.to_string()))?;

        for warning in &report.warnings {
            warn!(path = %warning.path, "{}", warning.message);
        }
        Ok((config, report))
    }

    /// Serialize a tree for storage, sealing it when a store is given
    pub fn encode(config: &AuditConfig, store: Option<&SecureStore>) -> Result<Vec<u8>> {
        let plaintext = serde_json::to_vec_pretty(config)
            .map_err(|e| AuditConfigError::Internal(format!("Failed to serialize configuration: {}", e)))?;

        match store {
            None => Ok(plaintext),
            Some(store) => {
                let envelope = store.seal(&plaintext)?;
                serde_json::to_vec_pretty(&envelope)
                    .map_err(|e| AuditConfigError::Internal(format!("Failed to serialize envelope: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure::{CipherAlgorithm, KdfAlgorithm};
    use serde_json::json;
    use types::ValidationKind;

    fn store() -> SecureStore {
        SecureStore::derive("pw", "00112233445566778899aabbccddeeff", KdfAlgorithm::Pbkdf2, 1_000, CipherAlgorithm::Aes256Gcm)
            .unwrap()
    }

    #[test]
    fn test_plaintext_round_trip() {
        let loader = ConfigLoader::default();
        let bytes = ConfigLoader::encode(&AuditConfig::default(), None).unwrap();
        let loaded = loader.load("memory", &bytes, None).unwrap();
        assert!(!loaded.was_encrypted);
        assert_eq!(loaded.config, AuditConfig::default());
    }

    #[test]
    fn test_encrypted_round_trip() {
        let loader = ConfigLoader::default();
        let store = store();
        let bytes = ConfigLoader::encode(&AuditConfig::default(), Some(&store)).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"authTag\""));
        assert!(!text.contains("postgresql"));

        let loaded = loader.load("memory", &bytes, Some(&store)).unwrap();
        assert!(loaded.was_encrypted);
        assert_eq!(loaded.config, AuditConfig::default());
    }

    #[test]
    fn test_encrypted_without_key_is_rejected() {
        let bytes = ConfigLoader::encode(&AuditConfig::default(), Some(&store())).unwrap();
        let err = ConfigLoader::default().load("audit.json", &bytes, None).unwrap_err();
        assert!(matches!(
            err,
            AuditConfigError::Load(ConfigLoadError::EncryptedWithoutKey { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        let err = ConfigLoader::default().load("audit.json", b"{not json", None).unwrap_err();
        assert!(matches!(err, AuditConfigError::Load(ConfigLoadError::Parse(_))));
    }

    #[test]
    fn test_wrong_types_surface_as_issues() {
        let mut value = serde_json::to_value(AuditConfig::default()).unwrap();
        value["worker"]["concurrency"] = json!("four");
        let err = ConfigLoader::default().parse_value(value).unwrap_err();
        match err {
            AuditConfigError::Validation(issues) => {
                assert!(issues.has("worker.concurrency", ValidationKind::Type))
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unknown_keys_are_a_schema_error() {
        let mut value = serde_json::to_value(AuditConfig::default()).unwrap();
        value["worker"]["threads"] = json!(4);
        let err = ConfigLoader::default().parse_value(value).unwrap_err();
        assert!(matches!(err, AuditConfigError::Load(ConfigLoadError::Schema(_))));
    }
}
