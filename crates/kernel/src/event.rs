//! Kernel event bus.
//!
//! Every kernel and every plugin owns an [`EventBus`]. Listeners are plain
//! synchronous closures keyed by [`EventKind`]; emission clones the matching
//! listeners out of the lock first, so a listener may subscribe, unsubscribe
//! or emit again without deadlocking.

use std::{
    fmt,
    sync::{Arc, RwLock, Weak},
};

use {
    kindle_channels::MessageEvent,
    tracing::{debug, trace, warn},
    uuid::Uuid,
};

use crate::{
    plugin::{LifecyclePhase, Plugin},
    service::Service,
};

/// Events flowing through the kernel.
#[derive(Clone)]
pub enum KernelEvent {
    /// Adapters are started.
    Start,
    PluginBeforeMount(Arc<Plugin>),
    PluginMounted(Arc<Plugin>),
    PluginBeforeUnmount(Arc<Plugin>),
    PluginUnmounted(Arc<Plugin>),
    /// Configured plugins are loaded.
    Ready,
    /// An inbound message, emitted before the middleware chain runs.
    Message { adapter: String, event: MessageEvent },
    ServiceRegister { name: String, service: Service },
    ServiceDestroy { name: String, service: Service },
}

impl KernelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Start => EventKind::Start,
            Self::PluginBeforeMount(_) => EventKind::PluginBeforeMount,
            Self::PluginMounted(_) => EventKind::PluginMounted,
            Self::PluginBeforeUnmount(_) => EventKind::PluginBeforeUnmount,
            Self::PluginUnmounted(_) => EventKind::PluginUnmounted,
            Self::Ready => EventKind::Ready,
            Self::Message { .. } => EventKind::Message,
            Self::ServiceRegister { .. } => EventKind::ServiceRegister,
            Self::ServiceDestroy { .. } => EventKind::ServiceDestroy,
        }
    }

    /// The lifecycle phase and plugin for `plugin-*` events.
    pub fn lifecycle(&self) -> Option<(LifecyclePhase, &Arc<Plugin>)> {
        match self {
            Self::PluginBeforeMount(p) => Some((LifecyclePhase::BeforeMount, p)),
            Self::PluginMounted(p) => Some((LifecyclePhase::Mounted, p)),
            Self::PluginBeforeUnmount(p) => Some((LifecyclePhase::BeforeUnmount, p)),
            Self::PluginUnmounted(p) => Some((LifecyclePhase::Unmounted, p)),
            _ => None,
        }
    }
}

impl fmt::Debug for KernelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PluginBeforeMount(p)
            | Self::PluginMounted(p)
            | Self::PluginBeforeUnmount(p)
            | Self::PluginUnmounted(p) => write!(f, "{}({})", self.kind(), p.name()),
            Self::Message { adapter, event } => {
                write!(f, "message({adapter}, {})", event.message_id)
            },
            Self::ServiceRegister { name, .. } | Self::ServiceDestroy { name, .. } => {
                write!(f, "{}({name})", self.kind())
            },
            Self::Start | Self::Ready => write!(f, "{}", self.kind()),
        }
    }
}

/// Discriminant of [`KernelEvent`], used to key listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    PluginBeforeMount,
    PluginMounted,
    PluginBeforeUnmount,
    PluginUnmounted,
    Ready,
    Message,
    ServiceRegister,
    ServiceDestroy,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::PluginBeforeMount => "plugin-beforeMount",
            Self::PluginMounted => "plugin-mounted",
            Self::PluginBeforeUnmount => "plugin-beforeUnmount",
            Self::PluginUnmounted => "plugin-unmounted",
            Self::Ready => "ready",
            Self::Message => "message",
            Self::ServiceRegister => "service-register",
            Self::ServiceDestroy => "service-destroy",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration handle for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

type Listener = Arc<dyn Fn(&KernelEvent) + Send + Sync>;

struct Entry {
    id: SubscriberId,
    kind: Option<EventKind>,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct Listeners {
    entries: RwLock<Vec<Entry>>,
}

impl Listeners {
    fn remove(&self, id: SubscriberId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    fn contains(&self, id: SubscriberId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|e| e.id == id)
    }
}

/// Synchronous publish/subscribe surface.
#[derive(Default, Clone)]
pub struct EventBus {
    inner: Arc<Listeners>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listener_count", &self.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> SubscriberId
    where
        F: Fn(&KernelEvent) + Send + Sync + 'static,
    {
        self.insert(Some(kind), false, Arc::new(listener))
    }

    /// Listen for the next event of `kind` only.
    pub fn once<F>(&self, kind: EventKind, listener: F) -> SubscriberId
    where
        F: Fn(&KernelEvent) + Send + Sync + 'static,
    {
        self.insert(Some(kind), true, Arc::new(listener))
    }

    /// Listen for every event regardless of kind.
    pub fn on_any<F>(&self, listener: F) -> SubscriberId
    where
        F: Fn(&KernelEvent) + Send + Sync + 'static,
    {
        self.insert(None, false, Arc::new(listener))
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn off(&self, id: SubscriberId) -> bool {
        self.inner.remove(id)
    }

    /// Like [`EventBus::on`], but the listener lives as long as the returned
    /// guard.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&KernelEvent) + Send + Sync + 'static,
    {
        let id = self.on(kind, listener);
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to matching listeners in registration order.
    ///
    /// Returns the number of listeners invoked. Listeners removed by an
    /// earlier listener during the same emission are skipped.
    pub fn emit(&self, event: &KernelEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<(SubscriberId, bool, Listener)> = self
            .inner
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.kind.is_none_or(|k| k == kind))
            .map(|e| (e.id, e.once, Arc::clone(&e.listener)))
            .collect();

        let mut invoked = 0;
        for (id, once, listener) in snapshot {
            // a once-listener is claimed by removing it before the call
            let live = if once {
                self.inner.remove(id)
            } else {
                self.inner.contains(id)
            };
            if !live {
                trace!(subscriber_id = ?id, event = %kind, "listener gone, skipped");
                continue;
            }
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(event);
            }));
            invoked += 1;
            if let Err(e) = result {
                warn!(subscriber_id = ?id, event = %kind, error = ?e, "listener panicked");
            }
        }
        invoked
    }

    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, kind: Option<EventKind>, once: bool, listener: Listener) -> SubscriberId {
        let id = SubscriberId::new();
        self.inner
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Entry {
                id,
                kind,
                once,
                listener,
            });
        trace!(subscriber_id = ?id, kind = ?kind, once, "listener registered");
        id
    }
}

/// Listener registration that is removed when the guard is dropped.
#[must_use = "the listener is removed as soon as the subscription is dropped"]
pub struct Subscription {
    id: SubscriberId,
    bus: Weak<Listeners>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Subscription").field(&self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.bus.upgrade()
            && listeners.remove(self.id)
        {
            debug!(subscriber_id = ?self.id, "subscription released");
        }
    }
}
