//! Environment variables consumed by the factory and the bootstrap

use figment::{providers::Env, Figment};
use serde::{Deserialize, Deserializer};
use std::fmt;
use types::utils::split_list;

/// Environment variable names read by [`EnvOverrides::from_env`]
pub const ENV_VARS: [&str; 11] = [
    "DATABASE_URL",
    "REDIS_URL",
    "CONFIG_ENCRYPTION_PASSWORD",
    "CONFIG_SALT",
    "COMPLIANCE_REPORT_RECIPIENTS",
    "AUDIT_CONFIG_DIR",
    "AUDIT_ENV",
    "AUDIT_LOG_ENCRYPTION_KEY",
    "AUDIT_CONFIG_HOT_RELOAD",
    "AUDIT_CONFIG_SECURE_STORAGE",
    "AUDIT_CONFIG_POLL_INTERVAL_MS",
];

/// Values sourced from the process environment
#[derive(Clone, Default, Deserialize)]
pub struct EnvOverrides {
    /// Primary datastore connection URL
    #[serde(default, deserialize_with = "lenient_string")]
    pub database_url: Option<String>,
    /// Cache connection URL
    #[serde(default, deserialize_with = "lenient_string")]
    pub redis_url: Option<String>,
    /// Password the at-rest encryption key is derived from
    #[serde(default, deserialize_with = "lenient_string")]
    pub config_encryption_password: Option<String>,
    /// Hex salt for key derivation
    #[serde(default, deserialize_with = "lenient_string")]
    pub config_salt: Option<String>,
    /// Comma-separated compliance report recipients
    #[serde(default, deserialize_with = "lenient_string")]
    pub compliance_report_recipients: Option<String>,
    /// Directory holding the configuration file
    #[serde(default, deserialize_with = "lenient_string")]
    pub audit_config_dir: Option<String>,
    /// Environment to build and load
    #[serde(default, deserialize_with = "lenient_string")]
    pub audit_env: Option<String>,
    /// Log encryption key placed into `security.encryptionKey`
    #[serde(default, deserialize_with = "lenient_string")]
    pub audit_log_encryption_key: Option<String>,
    #[serde(default)]
    pub audit_config_hot_reload: Option<bool>,
    #[serde(default)]
    pub audit_config_secure_storage: Option<bool>,
    #[serde(default)]
    pub audit_config_poll_interval_ms: Option<u64>,
}

impl EnvOverrides {
    /// Read the known variables from the process environment
    pub fn from_env() -> Result<Self, figment::Error> {
        Figment::new().merge(Env::raw().only(&ENV_VARS)).extract()
    }

    /// Parsed recipient list, empty when unset
    pub fn recipients(&self) -> Vec<String> {
        self.compliance_report_recipients
            .as_deref()
            .map(split_list)
            .unwrap_or_default()
    }
}

impl fmt::Debug for EnvOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("EnvOverrides")
            .field("database_url", &self.database_url.as_deref().map(types::utils::mask_url_credentials))
            .field("redis_url", &self.redis_url.as_deref().map(types::utils::mask_url_credentials))
            .field("config_encryption_password", &redact(&self.config_encryption_password))
            .field("config_salt", &self.config_salt)
            .field("compliance_report_recipients", &self.compliance_report_recipients)
            .field("audit_config_dir", &self.audit_config_dir)
            .field("audit_env", &self.audit_env)
            .field("audit_log_encryption_key", &redact(&self.audit_log_encryption_key))
            .field("audit_config_hot_reload", &self.audit_config_hot_reload)
            .field("audit_config_secure_storage", &self.audit_config_secure_storage)
            .field("audit_config_poll_interval_ms", &self.audit_config_poll_interval_ms)
            .finish()
    }
}

/// Environment values are parsed into scalars, so an all-digit password or
/// salt arrives as a number; accept any scalar as text.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Flag(bool),
    }

    let scalar = Option::<Scalar>::deserialize(deserializer)?;
    Ok(scalar.map(|s| match s {
        Scalar::Text(text) => text,
        Scalar::Unsigned(n) => n.to_string(),
        Scalar::Signed(n) => n.to_string(),
        Scalar::Float(n) => n.to_string(),
        Scalar::Flag(b) => b.to_string(),
    }))
}
