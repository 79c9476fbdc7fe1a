//! Hierarchical hook event bus
//!
//! Handlers subscribe to one or more [`EventToken`]s. On publish, every
//! handler whose token accepts the event's runtime [`EventTag`] is invoked
//! concurrently (bounded by [`HookSettings::max_concurrent_handlers`]).
//! Fan-out is fail-fast: the first handler failure cancels the in-flight
//! siblings and surfaces as [`HookError::ExecutionFailed`].
//!
//! A bus may have a parent. Publishing also forwards the same event to the
//! parent bus, concurrently with the local handlers, so that transaction and
//! connection events reach driver-level listeners.
//!
//! The listener registry is copy-on-write behind a `RwLock`: publish only
//! clones an `Arc` under the read lock, subscribe/unsubscribe swap in a new
//! registry under the write lock.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::error::HookError;
use super::event::HookEvent;
use super::kind::{EventTag, EventToken};
use crate::Config;

/// Type-erased hook handler.
pub type HookHandler =
    Arc<dyn Fn(Arc<HookEvent>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Default upper bound on handlers running concurrently for one publish
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 64;

/// Process-wide hook configuration, passed into every bus at construction.
///
/// The enable switch is shared: child buses created through
/// [`EventBus::child`] observe the same flag as their parent. Independent
/// `HookSettings` values give fully independent buses.
#[derive(Debug, Clone)]
pub struct HookSettings {
    enabled: Arc<AtomicBool>,
    max_concurrent_handlers: usize,
}

impl HookSettings {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }

    pub fn with_max_concurrent_handlers(mut self, max: usize) -> Self {
        self.max_concurrent_handlers = max.max(1);
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.hooks_enabled).with_max_concurrent_handlers(config.max_concurrent_handlers)
    }

    /// Turn hooks on. Publishing has a real cost once enabled: every
    /// driver operation builds and dispatches two events.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn max_concurrent_handlers(&self) -> usize {
        self.max_concurrent_handlers
    }
}

impl Default for HookSettings {
    fn default() -> Self {
        Self::new(false)
    }
}

struct Listener {
    id: u64,
    tokens: Vec<EventToken>,
    handler: HookHandler,
}

#[derive(Default)]
struct Registry {
    generation: u64,
    listeners: Vec<Arc<Listener>>,
}

struct BusInner {
    settings: HookSettings,
    parent: Option<EventBus>,
    registry: RwLock<Arc<Registry>>,
    /// Handlers resolved per concrete runtime tag, keyed with the registry
    /// generation they were computed from.
    resolved: DashMap<EventTag, (u64, Arc<[HookHandler]>)>,
    next_id: AtomicU64,
    /// Cancelled when the last handle to this bus goes away.
    closed: CancellationToken,
}

impl BusInner {
    fn snapshot(&self) -> Arc<Registry> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut Vec<Arc<Listener>>)) {
        let mut guard = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let mut listeners = guard.listeners.clone();
        f(&mut listeners);
        *guard = Arc::new(Registry {
            generation: guard.generation + 1,
            listeners,
        });
        drop(guard);
        self.resolved.clear();
    }

    fn remove(&self, id: u64) {
        self.update(|listeners| listeners.retain(|l| l.id != id));
        trace!(subscription = id, "Hook handler unsubscribed");
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Typed, hierarchical publish/subscribe bus for [`HookEvent`]s.
///
/// Cloning is cheap and shares the registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a root bus.
    pub fn new(settings: HookSettings) -> Self {
        Self::with_parent(settings, None)
    }

    fn with_parent(settings: HookSettings, parent: Option<EventBus>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                settings,
                parent,
                registry: RwLock::new(Arc::new(Registry::default())),
                resolved: DashMap::new(),
                next_id: AtomicU64::new(1),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Create a bus that forwards every publish to `self`.
    pub fn child(&self) -> Self {
        Self::with_parent(self.inner.settings.clone(), Some(self.clone()))
    }

    pub fn settings(&self) -> &HookSettings {
        &self.inner.settings
    }

    pub fn parent(&self) -> Option<&EventBus> {
        self.inner.parent.as_ref()
    }

    /// A token that fires once every handle to this bus has been dropped.
    pub fn closed(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    /// Number of handlers registered directly on this bus.
    pub fn listener_count(&self) -> usize {
        self.inner.snapshot().listeners.len()
    }

    /// Register `handler` for every event that is an instance of any of
    /// `tokens`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped, unsubscribed, or its cancellation token fires.
    pub fn subscribe<I, T, F, Fut>(&self, tokens: I, handler: F) -> Result<Subscription, HookError>
    where
        I: IntoIterator<Item = T>,
        T: Into<EventToken>,
        F: Fn(Arc<HookEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if !self.inner.settings.is_enabled() {
            return Err(HookError::Disabled);
        }

        let mut unique: Vec<EventToken> = Vec::new();
        for token in tokens.into_iter().map(Into::into) {
            if !unique.contains(&token) {
                unique.push(token);
            }
        }
        let tokens = unique;
        if tokens.is_empty() {
            return Err(HookError::NoEventTypes);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handler: HookHandler = Arc::new(move |event| handler(event).boxed());
        debug!(subscription = id, tokens = ?tokens, "Hook handler subscribed");
        self.inner.update(|listeners| {
            listeners.push(Arc::new(Listener {
                id,
                tokens,
                handler,
            }))
        });

        Ok(Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        })
    }

    /// Publish an event and wait for every matching handler, here and on
    /// the parent chain, to complete.
    ///
    /// `make_event` is only evaluated when the bus is enabled.
    pub async fn publish<F>(&self, make_event: F) -> Result<(), HookError>
    where
        F: FnOnce() -> HookEvent,
    {
        if !self.inner.settings.is_enabled() {
            return Ok(());
        }
        self.dispatch(Arc::new(make_event())).await
    }

    fn dispatch(&self, event: Arc<HookEvent>) -> BoxFuture<'_, Result<(), HookError>> {
        async move {
            let tag = event.tag();
            let handlers = self.resolve(tag);

            let parent = async {
                match &self.inner.parent {
                    Some(parent) => parent.dispatch(Arc::clone(&event)).await,
                    None => Ok(()),
                }
            };

            if handlers.is_empty() {
                trace!(kind = %tag.kind, source = ?tag.source, "No local hook handlers");
                return parent.await;
            }

            debug!(
                kind = %tag.kind,
                source = ?tag.source,
                handlers = handlers.len(),
                "Hook event dispatched"
            );

            let calls: Vec<BoxFuture<'static, anyhow::Result<()>>> = handlers
                .iter()
                .map(|handler| handler(Arc::clone(&event)))
                .collect();
            let max = self.inner.settings.max_concurrent_handlers();
            let local = async move {
                match stream::iter(calls)
                    .buffer_unordered(max)
                    .try_collect::<Vec<()>>()
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        warn!(kind = %tag.kind, error = %e, "Hook handler failed");
                        Err(HookError::ExecutionFailed(e))
                    }
                }
            };

            futures::try_join!(local, parent).map(|_| ())
        }
        .boxed()
    }

    fn resolve(&self, tag: EventTag) -> Arc<[HookHandler]> {
        let registry = self.inner.snapshot();

        if let Some(cached) = self.inner.resolved.get(&tag) {
            if cached.0 == registry.generation {
                return Arc::clone(&cached.1);
            }
        }

        let handlers: Arc<[HookHandler]> = registry
            .listeners
            .iter()
            .filter(|l| l.tokens.iter().any(|t| t.accepts(tag)))
            .map(|l| Arc::clone(&l.handler))
            .collect();
        self.inner
            .resolved
            .insert(tag, (registry.generation, Arc::clone(&handlers)));
        handlers
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("enabled", &self.inner.settings.is_enabled())
            .field("listeners", &self.listener_count())
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

/// Keeps a handler registered on an [`EventBus`].
///
/// Removal happens on drop. Publishes that resolved their handler set
/// before removal may still invoke the handler once.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unsubscribe now.
    pub fn unsubscribe(self) {
        drop(self)
    }

    /// Tie this subscription to `token`: the handler is removed once the
    /// token is cancelled.
    ///
    /// The returned task also finishes when the bus itself is dropped, so an
    /// uncancelled token does not keep it alive.
    pub fn cancel_on(self, token: CancellationToken) -> JoinHandle<()> {
        let bus_closed = self.bus.upgrade().map(|bus| bus.closed.clone());
        tokio::spawn(async move {
            if let Some(bus_closed) = bus_closed {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = bus_closed.cancelled() => {}
                }
            }
            drop(self);
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
