//! Environment-specific configuration trees
//!
//! Development is the fully populated baseline. Staging is layered over
//! development and production over staging, each overlay expressed as a JSON
//! object merged with [`deep_merge`] and deserialized back into the closed
//! [`AuditConfig`] schema. Test is layered directly over development.

use crate::env::EnvOverrides;
use crate::schema::AuditConfig;
use rand::RngCore;
use serde_json::{json, Value};
use tracing::debug;
use types::{AuditConfigError, Environment, Result};

/// Recipient used when reporting is enabled and none were supplied
pub const DEFAULT_REPORT_RECIPIENT: &str = "compliance@localhost";

/// Merge `overlay` into `base`
///
/// Objects are merged key by key recursively; arrays and primitives in the
/// overlay replace the base value wholesale.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Owned variant of [`deep_merge`]
pub fn merged(mut base: Value, overlay: Value) -> Value {
    deep_merge(&mut base, overlay);
    base
}

/// Builds complete configuration trees per environment
#[derive(Debug, Clone, Default)]
pub struct ConfigFactory {
    overrides: EnvOverrides,
}

impl ConfigFactory {
    pub fn new(overrides: EnvOverrides) -> Self {
        Self { overrides }
    }

    /// Factory over the current process environment
    pub fn from_env() -> std::result::Result<Self, figment::Error> {
        Ok(Self::new(EnvOverrides::from_env()?))
    }

    pub fn overrides(&self) -> &EnvOverrides {
        &self.overrides
    }

    /// Build the complete tree for `environment`
    pub fn build_config(&self, environment: Environment) -> Result<AuditConfig> {
        let mut config = match environment {
            Environment::Development => self.development(),
            Environment::Test => layer(self.development(), self.test_overlay(), environment)?,
            Environment::Staging => layer(self.development(), self.staging_overlay(), environment)?,
            Environment::Production => {
                let staging = layer(self.development(), self.staging_overlay(), Environment::Staging)?;
                layer(staging, self.production_overlay(), environment)?
            }
        };

        config.environment = environment;
        self.fill_secrets(&mut config);

        debug!(environment = %environment, "Built configuration tree");
        Ok(config)
    }

    fn development(&self) -> AuditConfig {
        let mut config = AuditConfig::default();

        if let Some(url) = &self.overrides.database_url {
            config.database.url = url.clone();
        }
        if let Some(url) = &self.overrides.redis_url {
            config.redis.url = url.clone();
        }
        config.compliance.reporting_schedule.recipients = self.overrides.recipients();
        config.security.encryption_key = self.overrides.audit_log_encryption_key.clone();

        config
    }

    fn database_url(&self, database: &str) -> String {
        self.overrides
            .database_url
            .clone()
            .unwrap_or_else(|| format!("postgresql://audit@localhost:5432/{}", database))
    }

    fn test_overlay(&self) -> Value {
        json!({
            "database": {
                "url": self.database_url("audit_test"),
                "pool": { "min": 1, "max": 2 }
            },
            "worker": {
                "concurrency": 1,
                "batchSize": 10,
                "pollInterval": 10,
                "shutdownTimeout": 1_000
            },
            "retry": {
                "maxAttempts": 2,
                "baseDelay": 10,
                "maxDelay": 100,
                "jitter": false
            },
            "circuitBreaker": {
                "timeout": 1_000,
                "monitoringPeriod": 1_000
            },
            "monitoring": { "enabled": false },
            "compliance": {
                "autoArchival": false,
                "enablePseudonymization": false
            },
            "archive": { "enabled": false },
            "logging": {
                "level": "error",
                "includeStackTrace": true
            }
        })
    }

    fn staging_overlay(&self) -> Value {
        json!({
            "database": {
                "url": self.database_url("audit_staging"),
                "pool": { "min": 5, "max": 25 },
                "ssl": true
            },
            "worker": {
                "concurrency": 8,
                "batchSize": 100
            },
            "circuitBreaker": {
                "failureThreshold": 3,
                "timeout": 30_000
            },
            "deadLetter": {
                "retentionDays": 90,
                "alertThreshold": 50
            },
            "monitoring": {
                "metricsInterval": 15_000,
                "alertThresholds": {
                    "errorRate": 0.05,
                    "queueDepth": 5_000,
                    "processingLatency": 3_000
                }
            },
            "security": {
                "enableEventSigning": true,
                "enableLogEncryption": true
            },
            "compliance": { "dataRetentionDays": 730 },
            "archive": { "storagePath": "/var/lib/audit/archive" },
            "logging": {
                "level": "info",
                "structured": true
            }
        })
    }

    fn production_overlay(&self) -> Value {
        json!({
            "database": {
                "url": self.database_url("audit"),
                "pool": { "min": 10, "max": 50 },
                "ssl": true
            },
            "worker": {
                "concurrency": 16,
                "batchSize": 200,
                "shutdownTimeout": 60_000
            },
            "retry": {
                "retryableErrors": ["ECONNRESET", "ETIMEDOUT"]
            },
            "circuitBreaker": {
                "failureThreshold": 3,
                "successThreshold": 3,
                "timeout": 30_000,
                "halfOpenMaxCalls": 1
            },
            "deadLetter": {
                "retentionDays": 365,
                "alertThreshold": 10
            },
            "monitoring": {
                "healthCheckInterval": 10_000,
                "alertThresholds": {
                    "errorRate": 0.01,
                    "queueDepth": 10_000,
                    "processingLatency": 2_000,
                    "memoryUsage": 0.85
                }
            },
            "security": {
                "enableIntegrityVerification": true,
                "signingAlgorithm": "hmac-sha512",
                "hashAlgorithm": "sha512"
            },
            "compliance": {
                "dataRetentionDays": 2_555,
                "reportingSchedule": {
                    "enabled": true,
                    "frequency": "weekly"
                }
            },
            "validation": { "strictMode": true },
            "archive": {
                "compressionAlgorithm": "brotli",
                "deleteAfterDays": 3_650
            },
            "logging": {
                "level": "info",
                "includeStackTrace": false
            }
        })
    }

    fn fill_secrets(&self, config: &mut AuditConfig) {
        if config.security.enable_log_encryption && config.security.encryption_key.is_none() {
            debug!("No log encryption key supplied, generating one");
            config.security.encryption_key = Some(generate_hex_key());
        }

        let schedule = &mut config.compliance.reporting_schedule;
        if schedule.enabled && schedule.recipients.is_empty() {
            schedule.recipients = vec![DEFAULT_REPORT_RECIPIENT.to_string()];
        }
    }
}

fn layer(base: AuditConfig, overlay: Value, environment: Environment) -> Result<AuditConfig> {
    let base = serde_json::to_value(base)
        .map_err(|e| AuditConfigError::Internal(format!("Failed to serialize baseline: {}", e)))?;
    serde_json::from_value(merged(base, overlay)).map_err(|e| {
        AuditConfigError::Internal(format!("Invalid {} overlay: {}", environment, e))
    })
}

/// Random 256-bit key as lowercase hex
pub fn generate_hex_key() -> String {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    hex::encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationEngine;

    fn factory() -> ConfigFactory {
        ConfigFactory::new(EnvOverrides::default())
    }

    #[test]
    fn test_deep_merge_nested_objects() {
        let merged = merged(json!({"a": {"x": 1, "y": 2}}), json!({"a": {"y": 3}}));
        assert_eq!(merged, json!({"a": {"x": 1, "y": 3}}));
    }

    #[test]
    fn test_deep_merge_replaces_arrays() {
        let merged = merged(
            json!({"codes": ["A", "B", "C"], "n": 1}),
            json!({"codes": ["Z"]}),
        );
        assert_eq!(merged, json!({"codes": ["Z"], "n": 1}));
    }

    #[test]
    fn test_deep_merge_primitive_replaces_object() {
        let merged = merged(json!({"a": {"x": 1}}), json!({"a": 5, "b": {"c": true}}));
        assert_eq!(merged, json!({"a": 5, "b": {"c": true}}));
    }

    #[test]
    fn test_every_environment_validates() {
        let engine = ValidationEngine::new();
        for environment in Environment::ALL {
            let config = factory().build_config(environment).unwrap();
            assert_eq!(config.environment, environment);
            if let Err(err) = engine.validate(&config) {
                panic!("{} failed validation: {}", environment, err);
            }
        }
    }

    #[test]
    fn test_production_is_hardened() {
        let config = factory().build_config(Environment::Production).unwrap();
        assert!(config.database.ssl);
        assert!(config.security.enable_event_signing);
        assert!(config.security.enable_log_encryption);
        assert_eq!(config.security.encryption_key.as_ref().map(String::len), Some(64));
        assert_eq!(config.database.pool.max, 50);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.retry.retryable_errors, vec!["ECONNRESET", "ETIMEDOUT"]);
        assert_ne!(config.logging.level, "debug");
        assert_eq!(
            config.compliance.reporting_schedule.recipients,
            vec![DEFAULT_REPORT_RECIPIENT.to_string()]
        );
    }

    #[test]
    fn test_production_inherits_staging() {
        let staging = factory().build_config(Environment::Staging).unwrap();
        let production = factory().build_config(Environment::Production).unwrap();
        // set in staging only
        assert_eq!(staging.monitoring.metrics_interval, 15_000);
        assert_eq!(production.monitoring.metrics_interval, 15_000);
        assert!(production.logging.structured);
    }

    #[test]
    fn test_test_environment_strips_side_effects() {
        let config = factory().build_config(Environment::Test).unwrap();
        assert_eq!(config.worker.concurrency, 1);
        assert!(!config.monitoring.enabled);
        assert!(!config.compliance.auto_archival);
        assert!(!config.compliance.enable_pseudonymization);
        assert!(!config.archive.enabled);
    }

    #[test]
    fn test_env_overrides_are_applied() {
        let overrides = EnvOverrides {
            database_url: Some("postgresql://svc:pw@db.prod:5432/audit".to_string()),
            redis_url: Some("rediss://cache.prod:6380".to_string()),
            compliance_report_recipients: Some("dpo@corp.io,legal@corp.io".to_string()),
            audit_log_encryption_key: Some("cd".repeat(32)),
            ..EnvOverrides::default()
        };
        let config = ConfigFactory::new(overrides)
            .build_config(Environment::Production)
            .unwrap();

        assert_eq!(config.database.url, "postgresql://svc:pw@db.prod:5432/audit");
        assert_eq!(config.redis.url, "rediss://cache.prod:6380");
        assert_eq!(config.security.encryption_key, Some("cd".repeat(32)));
        assert_eq!(
            config.compliance.reporting_schedule.recipients,
            vec!["dpo@corp.io", "legal@corp.io"]
        );
    }
}
