//! Typed notifications emitted by the configuration manager
//!
//! Handlers are invoked synchronously on the emitting task, after the
//! subscriber list has been copied out of the lock, so a handler may subscribe
//! or cancel without deadlocking.

use crate::paths::LeafChange;
use crate::schema::AuditConfig;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;
use types::{ConfigChangeEvent, Environment};

/// Notification kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Initialized,
    ConfigChanged,
    HotReload,
    ConfigReloaded,
    HotReloadStarted,
    HotReloadStopped,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Initialized => "initialized",
            EventKind::ConfigChanged => "configChanged",
            EventKind::HotReload => "hotReload",
            EventKind::ConfigReloaded => "configReloaded",
            EventKind::HotReloadStarted => "hotReloadStarted",
            EventKind::HotReloadStopped => "hotReloadStopped",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to a hot-reloadable path
#[derive(Debug, Clone, PartialEq)]
pub struct HotReloadNotice {
    pub path: String,
    pub previous_value: Value,
    pub new_value: Value,
    pub version: String,
}

/// Outcome of a reload that changed at least one leaf
#[derive(Debug, Clone)]
pub struct ReloadNotice {
    pub changes: Vec<LeafChange>,
    pub config: Arc<AuditConfig>,
    pub version: String,
}

/// Runtime failure reported to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub operation: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum ConfigEvent {
    Initialized {
        environment: Environment,
        version: String,
        config: Arc<AuditConfig>,
    },
    ConfigChanged(ConfigChangeEvent),
    HotReload(HotReloadNotice),
    ConfigReloaded(ReloadNotice),
    HotReloadStarted {
        source: String,
    },
    HotReloadStopped,
    Error(ErrorNotice),
}

impl ConfigEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConfigEvent::Initialized { .. } => EventKind::Initialized,
            ConfigEvent::ConfigChanged(_) => EventKind::ConfigChanged,
            ConfigEvent::HotReload(_) => EventKind::HotReload,
            ConfigEvent::ConfigReloaded(_) => EventKind::ConfigReloaded,
            ConfigEvent::HotReloadStarted { .. } => EventKind::HotReloadStarted,
            ConfigEvent::HotReloadStopped => EventKind::HotReloadStopped,
            ConfigEvent::Error(_) => EventKind::Error,
        }
    }
}

type Handler = Arc<dyn Fn(&ConfigEvent) + Send + Sync>;

struct Listener {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<Listener>,
}

/// Publish/subscribe registry for [`ConfigEvent`]s
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Listeners>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ConfigEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push(Listener {
            id,
            kind,
            handler: Arc::new(handler),
        });

        Subscription {
            id,
            kind,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Subscribe to `configChanged` with the change record
    pub fn on_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConfigChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ConfigChanged, move |event| {
            if let ConfigEvent::ConfigChanged(change) = event {
                handler(change)
            }
        })
    }

    /// Subscribe to `hotReload`
    pub fn on_hot_reload<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&HotReloadNotice) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::HotReload, move |event| {
            if let ConfigEvent::HotReload(notice) = event {
                handler(notice)
            }
        })
    }

    /// Subscribe to `configReloaded`
    pub fn on_reload<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ReloadNotice) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ConfigReloaded, move |event| {
            if let ConfigEvent::ConfigReloaded(notice) = event {
                handler(notice)
            }
        })
    }

    /// Subscribe to `error`
    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ErrorNotice) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Error, move |event| {
            if let ConfigEvent::Error(notice) = event {
                handler(notice)
            }
        })
    }

    /// Returns whether the subscription was still registered
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        remove(&self.listeners, subscription.id)
    }

    /// Detach every listener
    pub fn clear(&self) {
        self.listeners.lock().entries.clear();
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .lock()
            .entries
            .iter()
            .filter(|l| l.kind == kind)
            .count()
    }

    /// Deliver `event` to every listener of its kind
    pub fn emit(&self, event: ConfigEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .listeners
            .lock()
            .entries
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| l.handler.clone())
            .collect();

        trace!(event = %kind, listeners = handlers.len(), "Emitting configuration event");
        for handler in handlers {
            handler(&event);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.lock().entries.len())
            .finish()
    }
}

fn remove(listeners: &Mutex<Listeners>, id: u64) -> bool {
    let mut listeners = listeners.lock();
    let before = listeners.entries.len();
    listeners.entries.retain(|l| l.id != id);
    listeners.entries.len() != before
}

/// Handle returned by [`EventBus::subscribe`]
///
/// Dropping the handle keeps the listener registered; call [`cancel`](Self::cancel).
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the listener; a no-op when already removed or the bus is gone
    pub fn cancel(&self) -> bool {
        match self.listeners.upgrade() {
            Some(listeners) => remove(&listeners, self.id),
            None => false,
        }
    }
}
