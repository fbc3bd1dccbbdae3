//! Process-wide configuration manager
//!
//! Holds the live [`AuditConfig`] behind an `ArcSwap` so readers never block.
//! Updates and reloads are serialized by an async mutex; each one builds a
//! candidate tree, validates it, persists it and only then swaps it in.

use crate::events::{ConfigEvent, ErrorNotice, EventBus, EventKind, HotReloadNotice, ReloadNotice, Subscription};
use crate::loader::ConfigLoader;
use crate::paths::{self, LeafChange};
use crate::policy::{HotReloadPolicy, ManagerOptions};
use crate::schema::AuditConfig;
use crate::secure::SecureStore;
use crate::storage::{ConfigStorage, FileStorage, StorageFingerprint};
use crate::validation::{ValidationEngine, ValidationReport};
use crate::watcher::ConfigWatcher;
use arc_swap::ArcSwapOption;
use chrono::Utc;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use types::utils::{mask_url_credentials, MASKED};
use types::version::sha256_hex;
use types::{
    AuditConfigError, ConfigChangeEvent, ConfigLoadError, CryptoError, Environment, Result, VersionStamp,
};
use zeroize::Zeroizing;

/// Variable the bootstrap reads the encryption password from
pub const PASSWORD_VARIABLE: &str = "CONFIG_ENCRYPTION_PASSWORD";

/// Coarsest modification-time resolution trusted by the fingerprint shortcut
const MTIME_GRANULARITY: Duration = Duration::from_secs(2);

/// Lifecycle of a [`ConfigurationManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
    Reloading,
    ShuttingDown,
    Stopped,
}

impl ManagerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerState::Uninitialized => "uninitialized",
            ManagerState::Initializing => "initializing",
            ManagerState::Ready => "ready",
            ManagerState::Reloading => "reloading",
            ManagerState::ShuttingDown => "shutting down",
            ManagerState::Stopped => "stopped",
        }
    }

    /// States in which the live tree may be read and changed
    fn is_serving(&self) -> bool {
        matches!(self, ManagerState::Ready | ManagerState::Reloading)
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Snapshot {
    config: Arc<AuditConfig>,
    version: VersionStamp,
}

/// What the manager last wrote to or read from storage
#[derive(Debug, Default)]
struct StoredMarker {
    hash: Option<String>,
    fingerprint: Option<StorageFingerprint>,
}

/// Versioned, validated configuration store
pub struct ConfigurationManager {
    environment: Environment,
    storage: Arc<dyn ConfigStorage>,
    loader: ConfigLoader,
    hot_reload: HotReloadPolicy,
    options: ManagerOptions,
    events: EventBus,
    state: RwLock<ManagerState>,
    current: ArcSwapOption<Snapshot>,
    secure: OnceCell<SecureStore>,
    password: Mutex<Option<Zeroizing<String>>>,
    write_lock: tokio::sync::Mutex<()>,
    history: Mutex<VecDeque<ConfigChangeEvent>>,
    stored: Mutex<StoredMarker>,
    watcher: Mutex<Option<ConfigWatcher>>,
}

impl ConfigurationManager {
    pub fn new(environment: Environment, storage: Arc<dyn ConfigStorage>, mut options: ManagerOptions) -> Arc<Self> {
        let password = options.encryption_password.take();
        Arc::new(Self {
            environment,
            storage,
            loader: ConfigLoader::new(ValidationEngine::new()),
            hot_reload: options.hot_reload.clone(),
            options,
            events: EventBus::new(),
            state: RwLock::new(ManagerState::Uninitialized),
            current: ArcSwapOption::empty(),
            secure: OnceCell::new(),
            password: Mutex::new(password),
            write_lock: tokio::sync::Mutex::new(()),
            history: Mutex::new(VecDeque::new()),
            stored: Mutex::new(StoredMarker::default()),
            watcher: Mutex::new(None),
        })
    }

    /// Manager over a JSON file
    pub fn with_file(environment: Environment, path: impl Into<PathBuf>, options: ManagerOptions) -> Arc<Self> {
        Self::new(environment, Arc::new(FileStorage::new(path)), options)
    }

    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn hot_reload_policy(&self) -> &HotReloadPolicy {
        &self.hot_reload
    }

    pub fn storage_description(&self) -> String {
        self.storage.describe()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ConfigEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.events.unsubscribe(subscription)
    }

    /// Load, validate and start serving the stored configuration
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ManagerState::Uninitialized {
                return Err(invalid_state(*state, "initialize"));
            }
            *state = ManagerState::Initializing;
        }

        info!(
            environment = %self.environment,
            source = %self.storage.describe(),
            secure_storage = self.options.secure_storage.enabled,
            "Initializing configuration manager"
        );

        match self.load_initial().await {
            Ok(snapshot) => {
                let version = snapshot.version.to_string();
                let config = snapshot.config.clone();
                self.current.store(Some(Arc::new(snapshot)));
                self.set_state(ManagerState::Ready);

                info!(version = %version, "Configuration manager ready");
                self.events.emit(ConfigEvent::Initialized {
                    environment: self.environment,
                    version,
                    config,
                });

                if self.hot_reload.enabled {
                    let watcher = ConfigWatcher::spawn(self, self.hot_reload.poll_interval);
                    *self.watcher.lock() = Some(watcher);
                }
                Ok(())
            }
            Err(e) => {
                error!("Configuration manager initialization failed: {}", e);
                self.set_state(ManagerState::Uninitialized);
                Err(e)
            }
        }
    }

    async fn load_initial(&self) -> Result<Snapshot> {
        let store = self.secure_store().await?;

        let bytes = self
            .bounded("read configuration", self.storage.read())
            .await?
            .ok_or_else(|| ConfigLoadError::NotFound {
                path: self.storage.describe(),
            })?;

        let loaded = self.loader.load(&self.storage.describe(), &bytes, store)?;
        self.check_environment(&loaded.config)?;

        let mut config = loaded.config;
        let mut needs_persist = store.is_some() && !loaded.was_encrypted;

        let content = content_bytes(&config)?;
        let version = match config.version.as_deref().map(str::parse::<VersionStamp>) {
            Some(Ok(stamp)) => stamp,
            Some(Err(e)) => {
                warn!("Discarding stored version: {}", e);
                needs_persist = true;
                VersionStamp::new(1, &content)
            }
            None => {
                needs_persist = true;
                VersionStamp::new(1, &content)
            }
        };
        config.version = Some(version.to_string());
        if config.last_updated.is_none() {
            config.last_updated = Some(Utc::now());
            needs_persist = true;
        }

        if needs_persist {
            debug!(encrypted = store.is_some(), "Persisting normalized configuration");
            self.persist(&config).await?;
        } else {
            let fingerprint = self.storage.fingerprint().await.ok().flatten();
            self.remember(&bytes, fingerprint);
        }

        Ok(Snapshot {
            config: Arc::new(config),
            version,
        })
    }

    /// Derive the at-rest key once; the password is dropped after a successful derivation
    async fn secure_store(&self) -> Result<Option<&SecureStore>> {
        if !self.options.secure_storage.enabled {
            return Ok(None);
        }
        if let Some(store) = self.secure.get() {
            return Ok(Some(store));
        }

        let password = self.password.lock().clone().ok_or_else(|| ConfigLoadError::MissingSecret {
            variable: PASSWORD_VARIABLE.to_string(),
        })?;
        let settings = self.options.secure_storage.clone();

        let task = tokio::task::spawn_blocking(move || {
            SecureStore::derive(
                &password,
                &settings.salt,
                settings.kdf,
                settings.iterations,
                settings.algorithm,
            )
        });
        let derivation = async move {
            match task.await {
                Ok(derived) => derived.map_err(ConfigLoadError::from),
                Err(e) => Err(ConfigLoadError::Decrypt(CryptoError::KeyDerivation(e.to_string()))),
            }
        };
        let store = self.bounded("key derivation", derivation).await?;

        let store = self.secure.get_or_init(|| store);
        self.password.lock().take();
        Ok(Some(store))
    }

    /// Shared snapshot of the live tree
    pub fn get_config(&self) -> Result<Arc<AuditConfig>> {
        Ok(self.snapshot("read configuration")?.config.clone())
    }

    /// Value at a dotted path; sections are returned as objects
    pub fn get_config_value(&self, path: &str) -> Result<Value> {
        paths::resolve(path)?;
        let tree = to_value(&*self.get_config()?)?;
        paths::get(&tree, path.trim())
            .cloned()
            .ok_or_else(|| types::ConfigPathError::NotFound { path: path.to_string() }.into())
    }

    pub fn get_version(&self) -> Result<String> {
        Ok(self.snapshot("read version")?.version.to_string())
    }

    /// Apply one leaf change after validating the resulting tree
    pub async fn update_config(
        &self,
        path: &str,
        value: Value,
        changed_by: &str,
        reason: Option<&str>,
    ) -> Result<ConfigChangeEvent> {
        self.ensure_serving("update configuration")?;
        paths::resolve_writable(path)?;

        let guard = self.write_lock.lock().await;
        // shutdown may have begun while waiting for the lock
        let current = self.snapshot("update configuration")?;

        let mut tree = to_value(&current.config)?;
        let previous_value = paths::set(&mut tree, path, value.clone())?;

        let (mut candidate, _report) = self.loader.parse_value(tree).map_err(|e| {
            debug!(path = %path, "Rejected configuration update: {}", e);
            e
        })?;

        let version = current.version.next(&content_bytes(&candidate)?);
        candidate.version = Some(version.to_string());
        candidate.last_updated = Some(Utc::now());

        self.persist(&candidate).await?;

        self.current.store(Some(Arc::new(Snapshot {
            config: Arc::new(candidate),
            version: version.clone(),
        })));

        let event = ConfigChangeEvent::new(path, previous_value, value, changed_by, self.environment)
            .with_reason(reason.map(str::to_string))
            .with_versions(Some(current.version.to_string()), Some(version.to_string()));
        self.record(event.clone());
        drop(guard);

        info!(
            path = %path,
            changed_by = %changed_by,
            version = %version,
            "Configuration updated"
        );
        self.announce(&event);
        Ok(event)
    }

    /// Re-read storage and apply whatever changed
    pub async fn reload_configuration(&self) -> Result<Vec<LeafChange>> {
        self.ensure_serving("reload configuration")?;
        let guard = self.write_lock.lock().await;
        {
            let mut state = self.state.write();
            if *state != ManagerState::Ready {
                return Err(invalid_state(*state, "reload configuration"));
            }
            *state = ManagerState::Reloading;
        }

        let outcome = self.reload_locked().await;

        {
            let mut state = self.state.write();
            if *state == ManagerState::Reloading {
                *state = ManagerState::Ready;
            }
        }
        drop(guard);

        match outcome {
            Ok((changes, events, notice)) => {
                for event in &events {
                    self.announce(event);
                }
                if let Some(notice) = notice {
                    info!(changes = changes.len(), version = %notice.version, "Configuration reloaded");
                    self.events.emit(ConfigEvent::ConfigReloaded(notice));
                }
                Ok(changes)
            }
            Err(e) => {
                error!("Configuration reload failed, keeping current configuration: {}", e);
                self.events.emit(ConfigEvent::Error(ErrorNotice {
                    operation: "reload",
                    message: e.to_string(),
                }));
                Err(e)
            }
        }
    }

    async fn reload_locked(&self) -> Result<(Vec<LeafChange>, Vec<ConfigChangeEvent>, Option<ReloadNotice>)> {
        let current = self.snapshot("reload configuration")?;
        let store = self.secure.get();

        let bytes = self
            .bounded("read configuration", self.storage.read())
            .await?
            .ok_or_else(|| ConfigLoadError::NotFound {
                path: self.storage.describe(),
            })?;
        let fingerprint = self.storage.fingerprint().await.ok().flatten();

        let loaded = match self
            .loader
            .load(&self.storage.describe(), &bytes, store)
            .and_then(|loaded| self.check_environment(&loaded.config).map(|_| loaded))
        {
            Ok(loaded) => loaded,
            Err(e) => {
                // the watcher stays quiet until these bytes change
                self.remember(&bytes, fingerprint);
                return Err(e);
            }
        };

        let changes = paths::diff(&to_value(&current.config)?, &to_value(&loaded.config)?);
        if changes.is_empty() {
            debug!("Reload found no changes");
            self.remember(&bytes, fingerprint);
            return Ok((changes, Vec::new(), None));
        }

        let mut config = loaded.config;
        let version = current.version.next(&content_bytes(&config)?);
        config.version = Some(version.to_string());
        config.last_updated = Some(Utc::now());

        if store.is_some() && !loaded.was_encrypted {
            self.persist(&config).await?;
        } else {
            self.remember(&bytes, fingerprint);
        }

        let config = Arc::new(config);
        self.current.store(Some(Arc::new(Snapshot {
            config: config.clone(),
            version: version.clone(),
        })));

        let events: Vec<ConfigChangeEvent> = changes
            .iter()
            .map(|change| {
                ConfigChangeEvent::new(
                    change.path.clone(),
                    change.previous_value.clone(),
                    change.new_value.clone(),
                    self.options.reload_actor.clone(),
                    self.environment,
                )
                .with_reason(Some("reloaded from storage".to_string()))
                .with_versions(Some(current.version.to_string()), Some(version.to_string()))
            })
            .collect();
        for event in &events {
            self.record(event.clone());
        }

        let notice = ReloadNotice {
            changes: changes.clone(),
            config,
            version: version.to_string(),
        };
        Ok((changes, events, Some(notice)))
    }

    /// One watcher tick: reload only when storage changed and the change is not ours
    pub async fn poll_storage(&self) -> Result<()> {
        if !self.state().is_serving() {
            return Ok(());
        }

        let fingerprint = self.bounded("stat configuration", self.storage.fingerprint()).await?;
        if let Some(current) = fingerprint {
            if self.stored.lock().fingerprint == fingerprint && current.is_settled(MTIME_GRANULARITY) {
                return Ok(());
            }
        }

        let Some(bytes) = self.bounded("read configuration", self.storage.read()).await? else {
            warn!(source = %self.storage.describe(), "Configuration storage is empty");
            return Ok(());
        };

        if self.stored.lock().hash.as_deref() == Some(sha256_hex(&bytes).as_str()) {
            debug!("Skipping self-triggered configuration change");
            self.stored.lock().fingerprint = fingerprint;
            return Ok(());
        }

        self.reload_configuration().await.map(|_| ())
    }

    /// Validate the live tree again
    pub fn validate_current_config(&self) -> Result<ValidationReport> {
        let config = self.get_config()?;
        Ok(self.loader.engine().validate(&config)?)
    }

    /// JSON copy of the live tree, with credentials masked unless requested
    pub fn export_config(&self, include_sensitive: bool) -> Result<Value> {
        let mut tree = to_value(&*self.get_config()?)?;
        if !include_sensitive {
            mask_sensitive(&mut tree);
        }
        Ok(tree)
    }

    /// Applied changes, oldest first; `limit` keeps the newest entries
    pub fn get_change_history(&self, limit: Option<usize>) -> Vec<ConfigChangeEvent> {
        let history = self.history.lock();
        let skip = limit.map(|n| history.len().saturating_sub(n)).unwrap_or(0);
        history.iter().skip(skip).cloned().collect()
    }

    /// Stop the watcher, detach listeners and refuse further operations
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                ManagerState::Stopped | ManagerState::ShuttingDown => return Ok(()),
                _ => *state = ManagerState::ShuttingDown,
            }
        }
        info!("Shutting down configuration manager");

        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.stop().await;
            self.events.emit(ConfigEvent::HotReloadStopped);
        }

        // wait for an in-flight update to finish
        let _guard = self.write_lock.lock().await;
        self.events.clear();
        self.set_state(ManagerState::Stopped);
        info!("Configuration manager stopped");
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().as_ref().map(ConfigWatcher::is_running).unwrap_or(false)
    }

    fn set_state(&self, state: ManagerState) {
        *self.state.write() = state;
    }

    fn ensure_serving(&self, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state.is_serving() {
            Ok(())
        } else {
            Err(invalid_state(state, operation))
        }
    }

    fn snapshot(&self, operation: &'static str) -> Result<Arc<Snapshot>> {
        self.ensure_serving(operation)?;
        self.current
            .load_full()
            .ok_or_else(|| invalid_state(self.state(), operation))
    }

    fn check_environment(&self, config: &AuditConfig) -> Result<()> {
        if config.environment != self.environment {
            return Err(ConfigLoadError::Schema(format!(
                "Stored configuration is for {} but the manager runs {}",
                config.environment, self.environment
            ))
            .into());
        }
        Ok(())
    }

    async fn bounded<T, F>(&self, operation: &str, future: F) -> std::result::Result<T, ConfigLoadError>
    where
        F: Future<Output = std::result::Result<T, ConfigLoadError>>,
    {
        match tokio::time::timeout(self.options.io_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(ConfigLoadError::Timeout {
                operation: operation.to_string(),
                millis: self.options.io_timeout.as_millis() as u64,
            }),
        }
    }

    async fn persist(&self, config: &AuditConfig) -> Result<()> {
        let bytes = ConfigLoader::encode(config, self.secure.get())?;
        self.bounded("write configuration", self.storage.write(&bytes))
            .await
            .map_err(|e| AuditConfigError::Persist {
                target: self.storage.describe(),
                message: e.to_string(),
            })?;

        let fingerprint = self.storage.fingerprint().await.ok().flatten();
        self.remember(&bytes, fingerprint);
        Ok(())
    }

    fn remember(&self, bytes: &[u8], fingerprint: Option<StorageFingerprint>) {
        let mut stored = self.stored.lock();
        stored.hash = Some(sha256_hex(bytes));
        stored.fingerprint = fingerprint;
    }

    fn record(&self, event: ConfigChangeEvent) {
        let mut history = self.history.lock();
        history.push_back(event);
        while history.len() > self.options.max_history {
            history.pop_front();
        }
    }

    fn announce(&self, event: &ConfigChangeEvent) {
        self.events.emit(ConfigEvent::ConfigChanged(event.clone()));
        if self.hot_reload.allows(&event.path) {
            self.events.emit(ConfigEvent::HotReload(HotReloadNotice {
                path: event.path.clone(),
                previous_value: event.previous_value.clone(),
                new_value: event.new_value.clone(),
                version: event.new_version.clone().unwrap_or_default(),
            }));
        }
    }
}

impl fmt::Debug for ConfigurationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationManager")
            .field("environment", &self.environment)
            .field("storage", &self.storage.describe())
            .field("state", &self.state())
            .finish()
    }
}

fn invalid_state(state: ManagerState, operation: &'static str) -> AuditConfigError {
    AuditConfigError::InvalidState {
        state: state.to_string(),
        operation,
    }
}

fn to_value(config: &AuditConfig) -> Result<Value> {
    serde_json::to_value(config)
        .map_err(|e| AuditConfigError::Internal(format!("Failed to serialize configuration: {}", e)))
}

/// Canonical content used for version digests
fn content_bytes(config: &AuditConfig) -> Result<Vec<u8>> {
    let value = paths::without_metadata(&to_value(config)?);
    serde_json::to_vec(&value).map_err(|e| AuditConfigError::Internal(e.to_string()))
}

fn mask_sensitive(tree: &mut Value) {
    for path in ["database.url", "redis.url"] {
        if let Some(Value::String(url)) = paths::get(tree, path).cloned() {
            let _ = paths::set(tree, path, Value::String(mask_url_credentials(&url)));
        }
    }
    if paths::get(tree, "security.encryptionKey").map(|v| !v.is_null()).unwrap_or(false) {
        let _ = paths::set(tree, "security.encryptionKey", Value::String(MASKED.to_string()));
    }
}
