//! Configuration management for the audit platform
//!
//! This crate builds environment-specific configuration trees, validates them
//! against the audit schema, stores them (optionally encrypted at rest) and
//! serves them to the running process through [`ConfigurationManager`].

pub mod env;
pub mod events;
pub mod factory;
pub mod loader;
pub mod manager;
pub mod paths;
pub mod policy;
pub mod schema;
pub mod secure;
pub mod storage;
pub mod validation;
pub mod watcher;

pub use env::EnvOverrides;
pub use events::{ConfigEvent, ErrorNotice, EventBus, EventKind, HotReloadNotice, ReloadNotice, Subscription};
pub use factory::{deep_merge, ConfigFactory};
pub use loader::ConfigLoader;
pub use manager::{ConfigurationManager, ManagerState};
pub use paths::LeafChange;
pub use policy::{HotReloadPolicy, ManagerOptions, SecureStorageConfig};
pub use schema::*;
pub use secure::{CipherAlgorithm, EncryptedEnvelope, KdfAlgorithm, SecureStore};
pub use storage::{ConfigStorage, FileStorage};
pub use validation::*;
