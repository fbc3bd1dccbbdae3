//! Polling watcher for external edits to the backing store

use crate::events::ConfigEvent;
use crate::manager::ConfigurationManager;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a running watch loop
#[derive(Debug)]
pub struct ConfigWatcher {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Spawn the poll loop for `manager`
    ///
    /// The loop holds only a weak reference so it never keeps the manager alive.
    pub fn spawn(manager: &Arc<ConfigurationManager>, poll_interval: Duration) -> Self {
        let token = CancellationToken::new();
        let weak = Arc::downgrade(manager);
        let source = manager.storage_description();

        manager.events().emit(ConfigEvent::HotReloadStarted {
            source: source.clone(),
        });
        info!(source = %source, interval_ms = poll_interval.as_millis() as u64, "Configuration watcher started");

        let task = tokio::spawn(run(weak, poll_interval, token.clone()));
        Self { token, task }
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }

    /// Cancel the loop and wait for it to exit
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("Configuration watcher task ended abnormally: {}", e);
        }
        debug!("Configuration watcher stopped");
    }
}

async fn run(manager: Weak<ConfigurationManager>, poll_interval: Duration, token: CancellationToken) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(manager) = manager.upgrade() else { break };
                if let Err(e) = manager.poll_storage().await {
                    warn!("Configuration poll failed: {}", e);
                }
            }
        }
    }
}
