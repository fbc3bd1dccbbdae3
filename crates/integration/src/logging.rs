//! Tracing subscriber setup with a reloadable level filter

use crate::registry::{ChangeHandlerRegistry, HandlerId};
use anyhow::{Context, Result};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

/// Path of the hot-reloadable log level
pub const LOG_LEVEL_PATH: &str = "logging.level";

/// Handle used to swap the active filter at runtime
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    /// Set when `RUST_LOG` pinned the filter at startup
    pinned: bool,
}

impl LogHandle {
    /// Replace the filter with `level`, unless `RUST_LOG` pinned it
    pub fn set_level(&self, level: &str) -> Result<()> {
        if self.pinned {
            info!(level = %level, "RUST_LOG is set, ignoring configured log level");
            return Ok(());
        }
        let filter = EnvFilter::try_new(level).with_context(|| format!("Invalid log level '{}'", level))?;
        self.handle
            .reload(filter)
            .context("Failed to reload log filter")?;
        info!(level = %level, "Log level updated");
        Ok(())
    }

    /// Apply `logging.level` hot reloads through `registry`
    pub fn register(&self, registry: &ChangeHandlerRegistry) -> HandlerId {
        let handle = self.clone();
        registry.register_typed::<String, _>(LOG_LEVEL_PATH, move |level| {
            if let Err(e) = handle.set_level(&level) {
                warn!("Could not apply log level: {:#}", e);
            }
        })
    }
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle").field("pinned", &self.pinned).finish()
    }
}

/// Initialize logging based on environment variables
///
/// `RUST_LOG` wins over `default_level`; `LOG_FORMAT` selects `json` or `pretty`.
/// Logs are written to stderr.
pub fn init_logging(default_level: &str) -> Result<LogHandle> {
    let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let (env_filter, pinned) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(default_level), false),
    };
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let registry = tracing_subscriber::registry().with(filter_layer);

    match log_format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .context("Failed to initialize JSON logging")?;
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .context("Failed to initialize pretty logging")?;
        }
    }

    info!(format = %log_format, pinned, "Logging initialized");
    Ok(LogHandle { handle, pinned })
}
