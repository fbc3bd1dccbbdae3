//! Integration layer for the audit configuration manager
//!
//! Wires a [`config::ConfigurationManager`] into a process: file location,
//! secure storage secrets, hot reload policy, per-path change handlers and
//! logging.

pub mod app;
pub mod bootstrap;
pub mod logging;
pub mod registry;

pub use app::Application;
pub use bootstrap::{
    ensure_config_file, initialize_audit_config, resolve_config_path, AuditConfigBootstrap, BootstrapOptions,
};
pub use logging::{init_logging, LogHandle};
pub use registry::{ChangeHandlerRegistry, HandlerId};
