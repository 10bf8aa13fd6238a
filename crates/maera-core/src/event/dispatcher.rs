use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::Mutex;

use crate::event::{AsyncEventHandler, DispatchReport, Event, EventId, HandlerResult};

/// Shared handle to a registered handler
pub type EventHandler = Arc<dyn AsyncEventHandler>;

//--------------------------------------------------
// EventDispatcher (Internal, wrapped by SharedEventDispatcher)
//--------------------------------------------------

/// Handler storage keyed by event name and by concrete event type.
pub struct EventDispatcher {
    handlers: HashMap<&'static str, Vec<(EventId, EventHandler)>>,
    type_handlers: HashMap<TypeId, Vec<(EventId, EventHandler)>>,
    next_handler_id: EventId,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("name_handlers_count", &self.handlers.values().map(Vec::len).sum::<usize>())
            .field("type_handlers_count", &self.type_handlers.values().map(Vec::len).sum::<usize>())
            .field("next_handler_id", &self.next_handler_id)
            .finish()
    }
}

/// Adapts a synchronous closure to [`AsyncEventHandler`].
struct SyncHandler<F> {
    f: F,
}

#[async_trait]
impl<F> AsyncEventHandler for SyncHandler<F>
where
    F: Fn(&dyn Event) -> HandlerResult + Send + Sync,
{
    async fn handle(&self, event: &dyn Event) -> HandlerResult {
        (self.f)(event)
    }
}

/// Synchronous closure over a concrete event type. Other events are ignored.
struct TypedSyncHandler<E, F> {
    f: F,
    _event: PhantomData<fn(&E)>,
}

#[async_trait]
impl<E, F> AsyncEventHandler for TypedSyncHandler<E, F>
where
    E: Event + 'static,
    F: Fn(&E) -> HandlerResult + Send + Sync,
{
    async fn handle(&self, event: &dyn Event) -> HandlerResult {
        match event.as_any().downcast_ref::<E>() {
            Some(e) => (self.f)(e),
            None => Ok(()),
        }
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            type_handlers: HashMap::new(),
            next_handler_id: 1,
        }
    }

    fn next_id(&mut self) -> EventId {
        let id = self.next_handler_id;
        self.next_handler_id += 1;
        id
    }

    pub fn register_handler(&mut self, event_name: &'static str, handler: EventHandler) -> EventId {
        let id = self.next_id();
        self.handlers.entry(event_name).or_default().push((id, handler));
        id
    }

    pub fn register_type_handler(&mut self, type_id: TypeId, handler: EventHandler) -> EventId {
        let id = self.next_id();
        self.type_handlers.entry(type_id).or_default().push((id, handler));
        id
    }

    pub fn unregister_handler(&mut self, id: EventId) -> bool {
        let mut found = false;
        for handlers in self.handlers.values_mut().chain(self.type_handlers.values_mut()) {
            let len_before = handlers.len();
            handlers.retain(|(h_id, _)| *h_id != id);
            found |= handlers.len() < len_before;
        }
        found
    }

    /// Handlers interested in `event`, ordered by registration.
    pub fn handlers_for(&self, event: &dyn Event) -> Vec<EventHandler> {
        let mut matched: Vec<(EventId, EventHandler)> = Vec::new();
        if let Some(by_name) = self.handlers.get(event.name()) {
            matched.extend(by_name.iter().cloned());
        }
        if let Some(by_type) = self.type_handlers.get(&event.as_any().type_id()) {
            matched.extend(by_type.iter().cloned());
        }
        matched.sort_by_key(|(id, _)| *id);
        matched.into_iter().map(|(_, handler)| handler).collect()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.values().chain(self.type_handlers.values()).map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
        self.type_handlers.clear();
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------
// SharedEventDispatcher (Public API)
//--------------------------------------------------

/// Thread-safe shared event dispatcher using Tokio Mutex
#[derive(Clone, Default)]
pub struct SharedEventDispatcher {
    dispatcher: Arc<Mutex<EventDispatcher>>,
}

impl fmt::Debug for SharedEventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEventDispatcher").finish_non_exhaustive()
    }
}

impl SharedEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every interested handler.
    ///
    /// The handler list is snapshotted and the lock released before any
    /// handler runs.
    pub async fn dispatch(&self, event: &dyn Event) -> DispatchReport {
        let handlers = {
            let dispatcher = self.dispatcher.lock().await;
            dispatcher.handlers_for(event)
        };

        let mut report = DispatchReport::default();
        for handler in handlers {
            report.delivered += 1;
            if let Err(e) = handler.handle(event).await {
                warn!("Event handler failed for '{}': {}", event.name(), e);
                report.failures.push(e);
            }
        }
        debug!("Dispatched '{}' to {} handler(s)", event.name(), report.delivered);
        report
    }

    pub async fn register_handler(&self, event_name: &'static str, handler: EventHandler) -> EventId {
        self.dispatcher.lock().await.register_handler(event_name, handler)
    }

    pub async fn register_type_handler<E: Event + 'static>(&self, handler: EventHandler) -> EventId {
        self.register_type_handler_id(TypeId::of::<E>(), handler).await
    }

    pub async fn register_type_handler_id(&self, type_id: TypeId, handler: EventHandler) -> EventId {
        self.dispatcher.lock().await.register_type_handler(type_id, handler)
    }

    pub async fn unregister_handler(&self, id: EventId) -> bool {
        self.dispatcher.lock().await.unregister_handler(id)
    }

    pub async fn handler_count(&self) -> usize {
        self.dispatcher.lock().await.handler_count()
    }

    pub async fn clear(&self) {
        self.dispatcher.lock().await.clear();
    }
}

//--------------------------------------------------
// Helper Functions
//--------------------------------------------------

/// Create a new event dispatcher instance
pub fn create_dispatcher() -> SharedEventDispatcher {
    SharedEventDispatcher::new()
}

/// Wrap a synchronous closure as a handler
pub fn sync_event_handler<F>(f: F) -> EventHandler
where
    F: Fn(&dyn Event) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(SyncHandler { f })
}

/// Wrap a synchronous closure over a concrete event type as a handler
pub fn sync_typed_handler<E, F>(f: F) -> EventHandler
where
    E: Event + 'static,
    F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(TypedSyncHandler { f, _event: PhantomData })
}
