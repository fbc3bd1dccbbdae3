//! Long-running watch mode: serve the configuration and log every change

use crate::bootstrap::AuditConfigBootstrap;
use crate::logging::LogHandle;
use crate::registry::{HandlerId, ALL_PATHS};
use anyhow::{Context, Result};
use config::{ConfigEvent, EventKind, Subscription};
use tracing::{error, info};
use types::utils::sanitize_for_logging;

/// Configuration service that stays up until shutdown
pub struct Application {
    bootstrap: AuditConfigBootstrap,
    handlers: Vec<HandlerId>,
    subscriptions: Vec<Subscription>,
}

impl Application {
    /// Wire change logging and the hot-reloadable log level
    pub fn new(bootstrap: AuditConfigBootstrap, log: Option<&LogHandle>) -> Self {
        let mut handlers = Vec::new();

        handlers.push(bootstrap.registry.register_change(ALL_PATHS, |event| {
            info!(
                path = %event.path,
                previous = %sanitize_for_logging(&event.previous_value.to_string()),
                new = %sanitize_for_logging(&event.new_value.to_string()),
                changed_by = %event.changed_by,
                version = %event.new_version.as_deref().unwrap_or("-"),
                "Configuration changed"
            );
        }));

        if let Some(log) = log {
            handlers.push(log.register(&bootstrap.registry));
        }

        let events = bootstrap.manager.events();
        let subscriptions = vec![
            events.on_reload(|notice| {
                info!(changes = notice.changes.len(), version = %notice.version, "Configuration reloaded from storage");
            }),
            events.on_error(|notice| {
                error!(operation = notice.operation, "Configuration error: {}", notice.message);
            }),
            events.subscribe(EventKind::HotReloadStarted, |event| {
                if let ConfigEvent::HotReloadStarted { source } = event {
                    info!(source = %source, "Watching configuration for changes");
                }
            }),
        ];

        Self {
            bootstrap,
            handlers,
            subscriptions,
        }
    }

    /// Block until ctrl-c, then shut down
    pub async fn run(self) -> Result<()> {
        info!(
            environment = %self.bootstrap.environment,
            path = %self.bootstrap.config_path.display(),
            version = %self.bootstrap.manager.get_version()?,
            watching = self.bootstrap.manager.is_watching(),
            "Configuration service running"
        );

        tokio::signal::ctrl_c()
            .await
            .context("Failed to install CTRL+C signal handler")?;
        info!("Shutdown signal received");

        self.shutdown().await
    }

    /// Detach handlers and stop the manager
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down configuration service...");
        for subscription in &self.subscriptions {
            subscription.cancel();
        }
        for id in &self.handlers {
            self.bootstrap.registry.remove(*id);
        }
        self.bootstrap.shutdown().await?;
        info!("Configuration service shutdown complete");
        Ok(())
    }
}
