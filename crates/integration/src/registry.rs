//! Per-path change handlers for downstream consumers
//!
//! Consumers register interest in a dotted path; an entry naming a section
//! also receives every leaf below it, and `*` receives everything.

use config::{ConfigurationManager, HotReloadNotice, Subscription};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use types::ConfigChangeEvent;

/// Matches every path
pub const ALL_PATHS: &str = "*";

/// Identifier returned on registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type ChangeHandler = Arc<dyn Fn(&ConfigChangeEvent) + Send + Sync>;
type HotReloadHandler = Arc<dyn Fn(&HotReloadNotice) + Send + Sync>;

struct Entry<H> {
    id: HandlerId,
    pattern: String,
    handler: H,
}

/// Registry of `configChanged` and `hotReload` callbacks keyed by path
#[derive(Default)]
pub struct ChangeHandlerRegistry {
    next_id: AtomicU64,
    change: RwLock<Vec<Entry<ChangeHandler>>>,
    hot_reload: RwLock<Vec<Entry<HotReloadHandler>>>,
}

impl ChangeHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Called for every applied change under `path`
    pub fn register_change<F>(&self, path: &str, handler: F) -> HandlerId
    where
        F: Fn(&ConfigChangeEvent) + Send + Sync + 'static,
    {
        let id = self.next();
        self.change.write().push(Entry {
            id,
            pattern: path.to_string(),
            handler: Arc::new(handler),
        });
        debug!(path = %path, "Registered change handler");
        id
    }

    /// Called for hot-reloadable changes under `path`
    pub fn register_hot_reload<F>(&self, path: &str, handler: F) -> HandlerId
    where
        F: Fn(&HotReloadNotice) + Send + Sync + 'static,
    {
        let id = self.next();
        self.hot_reload.write().push(Entry {
            id,
            pattern: path.to_string(),
            handler: Arc::new(handler),
        });
        debug!(path = %path, "Registered hot reload handler");
        id
    }

    /// Hot reload handler receiving the new value as `T`
    ///
    /// Values that do not deserialize are logged and skipped.
    pub fn register_typed<T, F>(&self, path: &str, handler: F) -> HandlerId
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.register_hot_reload(path, move |notice| {
            match serde_json::from_value::<T>(notice.new_value.clone()) {
                Ok(value) => handler(value),
                Err(e) => warn!(
                    path = %notice.path,
                    "Ignoring hot reload value of unexpected type: {}",
                    e
                ),
            }
        })
    }

    /// Change handler receiving the previous and new values as `T`
    pub fn register_typed_change<T, F>(&self, path: &str, handler: F) -> HandlerId
    where
        T: DeserializeOwned,
        F: Fn(Option<T>, T) + Send + Sync + 'static,
    {
        self.register_change(path, move |event| {
            let previous = serde_json::from_value::<T>(event.previous_value.clone()).ok();
            match serde_json::from_value::<T>(event.new_value.clone()) {
                Ok(value) => handler(previous, value),
                Err(e) => warn!(path = %event.path, "Ignoring change value of unexpected type: {}", e),
            }
        })
    }

    /// Remove a handler of either kind
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut removed = false;
        self.change.write().retain(|e| {
            let keep = e.id != id;
            removed |= !keep;
            keep
        });
        self.hot_reload.write().retain(|e| {
            let keep = e.id != id;
            removed |= !keep;
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.change.read().len() + self.hot_reload.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke matching change handlers, returning how many ran
    pub fn dispatch_change(&self, event: &ConfigChangeEvent) -> usize {
        let handlers: Vec<ChangeHandler> = self
            .change
            .read()
            .iter()
            .filter(|e| path_matches(&e.pattern, &event.path))
            .map(|e| e.handler.clone())
            .collect();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Invoke matching hot reload handlers, returning how many ran
    pub fn dispatch_hot_reload(&self, notice: &HotReloadNotice) -> usize {
        let handlers: Vec<HotReloadHandler> = self
            .hot_reload
            .read()
            .iter()
            .filter(|e| path_matches(&e.pattern, &notice.path))
            .map(|e| e.handler.clone())
            .collect();
        for handler in &handlers {
            handler(notice);
        }
        handlers.len()
    }

    /// Forward the manager's `configChanged` and `hotReload` notifications
    pub fn attach(self: &Arc<Self>, manager: &ConfigurationManager) -> Vec<Subscription> {
        let registry = Arc::clone(self);
        let changes = manager.events().on_change(move |event| {
            registry.dispatch_change(event);
        });
        let registry = Arc::clone(self);
        let hot = manager.events().on_hot_reload(move |notice| {
            let handled = registry.dispatch_hot_reload(notice);
            debug!(path = %notice.path, handlers = handled, "Dispatched hot reload");
        });
        vec![changes, hot]
    }
}

impl std::fmt::Debug for ChangeHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeHandlerRegistry")
            .field("change", &self.change.read().len())
            .field("hot_reload", &self.hot_reload.read().len())
            .finish()
    }
}

/// Exact match, section prefix match, or the wildcard
pub fn path_matches(pattern: &str, path: &str) -> bool {
    pattern == ALL_PATHS
        || pattern == path
        || path
            .strip_prefix(pattern)
            .map(|rest| rest.starts_with('.'))
            .unwrap_or(false)
}
