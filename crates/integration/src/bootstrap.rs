//! Process wiring for the configuration manager
//!
//! Resolves the environment and file location, makes sure a configuration
//! file exists, prepares secure storage and hot reload from the process
//! environment, and connects the manager to a [`ChangeHandlerRegistry`].

use crate::registry::ChangeHandlerRegistry;
use anyhow::{Context, Result};
use config::policy::DEFAULT_POLL_INTERVAL;
use config::secure::generate_salt;
use config::{
    ConfigFactory, ConfigLoader, ConfigStorage, ConfigurationManager, EnvOverrides, FileStorage, HotReloadPolicy,
    ManagerOptions, SecureStorageConfig, Subscription,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use types::utils::sanitize_for_logging;
use types::Environment;
use zeroize::Zeroizing;

/// Directory used when `AUDIT_CONFIG_DIR` is unset
pub const DEFAULT_CONFIG_DIR: &str = "./config";

/// Salt sidecar written next to the configuration file
pub const SALT_FILE: &str = ".config-salt";

/// Inputs to [`initialize_audit_config`]; unset fields fall back to the environment
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    pub environment: Option<Environment>,
    pub config_path: Option<PathBuf>,
    pub hot_reload: Option<bool>,
    pub hot_reload_paths: Option<Vec<String>>,
    pub poll_interval: Option<Duration>,
    pub secure_storage: Option<bool>,
    /// Create the file from the factory when it is missing
    pub create_if_missing: bool,
    pub overrides: EnvOverrides,
}

impl BootstrapOptions {
    /// Options over the current process environment
    pub fn from_env() -> Result<Self> {
        let overrides = EnvOverrides::from_env().context("Failed to read environment variables")?;
        Ok(Self {
            create_if_missing: true,
            overrides,
            ..Self::default()
        })
    }

    pub fn environment(&self) -> Result<Environment> {
        match (&self.environment, &self.overrides.audit_env) {
            (Some(environment), _) => Ok(*environment),
            (None, Some(raw)) => raw.parse().map_err(|e| anyhow::anyhow!("Invalid AUDIT_ENV: {}", e)),
            (None, None) => Ok(Environment::Development),
        }
    }

    pub fn config_path(&self, environment: Environment) -> PathBuf {
        self.config_path
            .clone()
            .unwrap_or_else(|| resolve_config_path(environment, self.overrides.audit_config_dir.as_deref()))
    }

    fn secure_storage_enabled(&self, environment: Environment) -> bool {
        self.secure_storage
            .or(self.overrides.audit_config_secure_storage)
            .unwrap_or(matches!(environment, Environment::Staging | Environment::Production))
    }

    fn hot_reload_policy(&self, environment: Environment) -> HotReloadPolicy {
        let enabled = self
            .hot_reload
            .or(self.overrides.audit_config_hot_reload)
            .unwrap_or(environment != Environment::Test);
        let poll_interval = self
            .poll_interval
            .or(self.overrides.audit_config_poll_interval_ms.map(Duration::from_millis))
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let mut policy = HotReloadPolicy {
            enabled,
            poll_interval,
            ..HotReloadPolicy::default()
        };
        if let Some(paths) = &self.hot_reload_paths {
            policy.allowed_paths = paths.clone();
        }
        policy
    }
}

/// `<dir>/audit-config.<environment>.json`
pub fn resolve_config_path(environment: Environment, dir: Option<&str>) -> PathBuf {
    Path::new(dir.unwrap_or(DEFAULT_CONFIG_DIR)).join(format!("audit-config.{}.json", environment))
}

/// Write the factory tree for `environment` unless the file already exists
///
/// Returns whether a file was written.
pub async fn ensure_config_file(path: &Path, environment: Environment, factory: &ConfigFactory) -> Result<bool> {
    if tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("Failed to inspect {}", path.display()))?
    {
        debug!(path = %path.display(), "Configuration file present");
        return Ok(false);
    }
    write_config_file(path, environment, factory).await?;
    Ok(true)
}

/// Write the factory tree for `environment`, replacing any existing file
pub async fn write_config_file(path: &Path, environment: Environment, factory: &ConfigFactory) -> Result<()> {
    let config = factory
        .build_config(environment)
        .with_context(|| format!("Failed to build {} configuration", environment))?;
    let bytes = ConfigLoader::encode(&config, None)?;
    FileStorage::new(path)
        .write(&bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(path = %path.display(), environment = %environment, "Wrote default configuration");
    Ok(())
}

/// Salt from `CONFIG_SALT`, else the sidecar, else a new one written to the sidecar
pub async fn resolve_salt(config_dir: &Path, overrides: &EnvOverrides) -> Result<String> {
    if let Some(salt) = overrides.config_salt.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        hex::decode(salt).context("CONFIG_SALT must be hex encoded")?;
        return Ok(salt.to_string());
    }

    let sidecar = FileStorage::new(config_dir.join(SALT_FILE));
    if let Some(bytes) = sidecar.read().await? {
        let salt = String::from_utf8(bytes).context("Salt file is not UTF-8")?;
        let salt = salt.trim().to_string();
        if !salt.is_empty() {
            hex::decode(&salt).with_context(|| format!("{} is not hex encoded", sidecar.describe()))?;
            debug!(path = %sidecar.describe(), "Using persisted salt");
            return Ok(salt);
        }
    }

    let salt = generate_salt();
    sidecar
        .write(salt.as_bytes())
        .await
        .with_context(|| format!("Failed to persist salt to {}", sidecar.describe()))?;
    warn!(path = %sidecar.describe(), "Generated a new key derivation salt");
    Ok(salt)
}

/// Manager plus the registry its notifications are forwarded to
#[derive(Debug)]
pub struct AuditConfigBootstrap {
    pub manager: Arc<ConfigurationManager>,
    pub registry: Arc<ChangeHandlerRegistry>,
    pub environment: Environment,
    pub config_path: PathBuf,
    subscriptions: Vec<Subscription>,
}

impl AuditConfigBootstrap {
    /// Detach the registry and stop the manager
    pub async fn shutdown(self) -> Result<()> {
        for subscription in &self.subscriptions {
            subscription.cancel();
        }
        self.manager
            .shutdown()
            .await
            .context("Failed to shut down configuration manager")
    }
}

/// Build, initialize and wire a [`ConfigurationManager`]
pub async fn initialize_audit_config(options: BootstrapOptions) -> Result<AuditConfigBootstrap> {
    let environment = options.environment()?;
    let config_path = options.config_path(environment);
    let factory = ConfigFactory::new(options.overrides.clone());

    if options.create_if_missing {
        ensure_config_file(&config_path, environment, &factory).await?;
    }

    let mut manager_options = ManagerOptions {
        hot_reload: options.hot_reload_policy(environment),
        ..ManagerOptions::default()
    };

    if options.secure_storage_enabled(environment) {
        let config_dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let salt = resolve_salt(config_dir, &options.overrides).await?;
        manager_options.secure_storage = SecureStorageConfig::enabled_with_salt(salt);
        manager_options.encryption_password = options
            .overrides
            .config_encryption_password
            .clone()
            .map(Zeroizing::new);
    }

    info!(
        environment = %environment,
        path = %config_path.display(),
        database = %options.overrides.database_url.as_deref().map(sanitize_for_logging).unwrap_or_default(),
        hot_reload = manager_options.hot_reload.enabled,
        secure_storage = manager_options.secure_storage.enabled,
        "Bootstrapping audit configuration"
    );

    let manager = ConfigurationManager::with_file(environment, &config_path, manager_options);
    let registry = Arc::new(ChangeHandlerRegistry::new());
    // attach before initialize so nothing emitted during startup is missed
    let subscriptions = registry.attach(&manager);

    manager
        .initialize()
        .await
        .with_context(|| format!("Failed to initialize configuration from {}", config_path.display()))?;

    Ok(AuditConfigBootstrap {
        manager,
        registry,
        environment,
        config_path,
        subscriptions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn options(dir: &TempDir, environment: Environment) -> BootstrapOptions {
        BootstrapOptions {
            environment: Some(environment),
            hot_reload: Some(false),
            create_if_missing: true,
            overrides: EnvOverrides {
                audit_config_dir: Some(dir.path().display().to_string()),
                ..EnvOverrides::default()
            },
            ..BootstrapOptions::default()
        }
    }

    #[test]
    fn test_resolve_config_path() {
        assert_eq!(
            resolve_config_path(Environment::Staging, None),
            PathBuf::from("./config/audit-config.staging.json")
        );
        assert_eq!(
            resolve_config_path(Environment::Test, Some("/etc/audit")),
            PathBuf::from("/etc/audit/audit-config.test.json")
        );
    }

    #[test]
    fn test_environment_resolution() {
        let mut options = BootstrapOptions::default();
        assert_eq!(options.environment().unwrap(), Environment::Development);
        options.overrides.audit_env = Some("prod".to_string());
        assert_eq!(options.environment().unwrap(), Environment::Production);
        options.overrides.audit_env = Some("qa".to_string());
        assert_err!(options.environment());
        options.environment = Some(Environment::Test);
        assert_eq!(options.environment().unwrap(), Environment::Test);
    }

    #[test]
    fn test_secure_storage_defaults_by_environment() {
        let options = BootstrapOptions::default();
        assert!(!options.secure_storage_enabled(Environment::Development));
        assert!(!options.secure_storage_enabled(Environment::Test));
        assert!(options.secure_storage_enabled(Environment::Staging));
        assert!(options.secure_storage_enabled(Environment::Production));

        let forced = BootstrapOptions {
            secure_storage: Some(false),
            ..BootstrapOptions::default()
        };
        assert!(!forced.secure_storage_enabled(Environment::Production));
    }

    #[tokio::test]
    async fn test_ensure_config_file_only_writes_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit-config.test.json");
        let factory = ConfigFactory::default();

        assert!(assert_ok!(ensure_config_file(&path, Environment::Test, &factory).await));
        std::fs::write(&path, b"{\"sentinel\":true}").unwrap();
        assert!(!assert_ok!(ensure_config_file(&path, Environment::Test, &factory).await));
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"sentinel\":true}");
    }

    #[tokio::test]
    async fn test_salt_sources() {
        let dir = TempDir::new().unwrap();
        let pinned = EnvOverrides {
            config_salt: Some("a1b2c3d4".to_string()),
            ..EnvOverrides::default()
        };
        assert_eq!(resolve_salt(dir.path(), &pinned).await.unwrap(), "a1b2c3d4");
        assert!(!dir.path().join(SALT_FILE).exists());

        let generated = resolve_salt(dir.path(), &EnvOverrides::default()).await.unwrap();
        assert_eq!(generated.len(), 32);
        assert_eq!(
            std::fs::read_to_string(dir.path().join(SALT_FILE)).unwrap(),
            generated
        );
        assert_eq!(resolve_salt(dir.path(), &EnvOverrides::default()).await.unwrap(), generated);

        let bad = EnvOverrides {
            config_salt: Some("not-hex".to_string()),
            ..EnvOverrides::default()
        };
        assert_err!(resolve_salt(dir.path(), &bad).await);
    }

    #[tokio::test]
    async fn test_bootstrap_forwards_changes_to_registry() {
        let dir = TempDir::new().unwrap();
        let bootstrap = initialize_audit_config(options(&dir, Environment::Development)).await.unwrap();
        assert!(bootstrap.config_path.exists());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bootstrap
            .registry
            .register_typed::<u32, _>("worker.concurrency", move |v| sink.lock().push(v));

        bootstrap
            .manager
            .update_config("worker.concurrency", json!(7), "ops", Some("load test"))
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![7]);

        assert_ok!(bootstrap.shutdown().await);
    }

    #[tokio::test]
    async fn test_secure_bootstrap_requires_password() {
        let dir = TempDir::new().unwrap();
        let mut options = options(&dir, Environment::Development);
        options.secure_storage = Some(true);

        let err = assert_err!(initialize_audit_config(options).await);
        assert!(format!("{:#}", err).contains("CONFIG_ENCRYPTION_PASSWORD"));
    }
}
