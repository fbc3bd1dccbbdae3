//! Runtime policies handed to the configuration manager

use crate::secure::{CipherAlgorithm, KdfAlgorithm};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Paths that may change without a restart
pub const DEFAULT_HOT_RELOAD_PATHS: [&str; 11] = [
    "worker.concurrency",
    "monitoring.alertThresholds",
    "retry.maxAttempts",
    "retry.baseDelay",
    "retry.maxDelay",
    "circuitBreaker.failureThreshold",
    "circuitBreaker.successThreshold",
    "circuitBreaker.timeout",
    "deadLetter.alertThreshold",
    "logging.level",
    "compliance.reportingSchedule",
];

/// Default watcher poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// Default PBKDF2 rounds
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Default bound on the change history
pub const DEFAULT_MAX_HISTORY: usize = 1_000;

/// Default timeout for storage and crypto work
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Hot reload settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotReloadPolicy {
    pub enabled: bool,
    /// Dotted paths; an entry naming a section allows every leaf below it
    pub allowed_paths: Vec<String>,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
}

impl HotReloadPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Whether changes to `path` are delivered as hot reloads
    pub fn allows(&self, path: &str) -> bool {
        self.allowed_paths.iter().any(|allowed| {
            path == allowed.as_str()
                || (path.len() > allowed.len()
                    && path.starts_with(allowed.as_str())
                    && path.as_bytes()[allowed.len()] == b'.')
        })
    }
}

impl Default for HotReloadPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_paths: DEFAULT_HOT_RELOAD_PATHS.iter().map(|p| p.to_string()).collect(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Encryption at rest settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureStorageConfig {
    pub enabled: bool,
    pub algorithm: CipherAlgorithm,
    pub kdf: KdfAlgorithm,
    /// Hex-encoded salt
    pub salt: String,
    /// PBKDF2 rounds, or the scrypt cost N
    pub iterations: u32,
}

impl SecureStorageConfig {
    pub fn enabled_with_salt(salt: impl Into<String>) -> Self {
        Self {
            enabled: true,
            salt: salt.into(),
            ..Self::default()
        }
    }
}

impl Default for SecureStorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: CipherAlgorithm::Aes256Gcm,
            kdf: KdfAlgorithm::Pbkdf2,
            salt: String::new(),
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

/// Everything the manager needs besides its storage
#[derive(Clone)]
pub struct ManagerOptions {
    pub hot_reload: HotReloadPolicy,
    pub secure_storage: SecureStorageConfig,
    /// Consumed during initialization to derive the key
    pub encryption_password: Option<Zeroizing<String>>,
    pub max_history: usize,
    pub io_timeout: Duration,
    /// Recorded as `changedBy` for deltas picked up from storage
    pub reload_actor: String,
}

impl ManagerOptions {
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.encryption_password = Some(Zeroizing::new(password.into()));
        self
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            hot_reload: HotReloadPolicy::disabled(),
            secure_storage: SecureStorageConfig::default(),
            encryption_password: None,
            max_history: DEFAULT_MAX_HISTORY,
            io_timeout: DEFAULT_IO_TIMEOUT,
            reload_actor: "file-watcher".to_string(),
        }
    }
}

impl fmt::Debug for ManagerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerOptions")
            .field("hot_reload", &self.hot_reload)
            .field("secure_storage", &self.secure_storage)
            .field("encryption_password", &self.encryption_password.as_ref().map(|_| "<redacted>"))
            .field("max_history", &self.max_history)
            .field("io_timeout", &self.io_timeout)
            .field("reload_actor", &self.reload_actor)
            .finish()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_matches_exact_and_sections() {
        let policy = HotReloadPolicy::default();
        assert!(policy.allows("worker.concurrency"));
        assert!(policy.allows("monitoring.alertThresholds.errorRate"));
        assert!(policy.allows("compliance.reportingSchedule.recipients"));
        assert!(!policy.allows("worker.batchSize"));
        assert!(!policy.allows("database.url"));
        // sibling with a shared prefix is not a child
        assert!(!policy.allows("retry.maxAttemptsOverride"));
    }

    #[test]
    fn test_defaults() {
        let options = ManagerOptions::default();
        assert!(!options.hot_reload.enabled);
        assert!(!options.secure_storage.enabled);
        assert_eq!(options.max_history, 1_000);
        assert_eq!(options.io_timeout, Duration::from_secs(5));
        assert_eq!(options.secure_storage.iterations, 100_000);
    }

    #[test]
    fn test_debug_redacts_password() {
        let options = ManagerOptions::default().with_password("hunter2");
        assert!(!format!("{:?}", options).contains("hunter2"));
    }
}
