use std::any::TypeId;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::info;

use crate::event::dispatcher::{self, EventHandler, SharedEventDispatcher};
use crate::event::{DispatchReport, Event, EventId, HandlerResult};
use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result;

/// Type alias for boxed event
pub type BoxedEvent = Box<dyn Event>;

/// Event manager interface
#[async_trait]
pub trait EventManager: KernelComponent + Send + Sync {
    /// Register a handler for events with a specific name
    async fn register_handler(&self, event_name: &'static str, handler: EventHandler) -> EventId;

    /// Register a handler for every event whose concrete type is `type_id`
    async fn register_type_handler_id(&self, type_id: TypeId, handler: EventHandler) -> EventId;

    /// Unregister a handler by its ID
    async fn unregister_handler(&self, id: EventId) -> bool;

    /// Publish an event to all interested handlers, in registration order
    async fn dispatch(&self, event: &dyn Event) -> DispatchReport;
}

/// Default implementation of EventManager
#[derive(Debug)]
pub struct DefaultEventManager {
    name: &'static str,
    dispatcher: Arc<SharedEventDispatcher>,
    stopped: AtomicBool,
}

impl DefaultEventManager {
    pub fn new() -> Self {
        Self {
            name: "DefaultEventManager",
            dispatcher: Arc::new(dispatcher::create_dispatcher()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Get a reference to the underlying dispatcher Arc
    pub fn dispatcher(&self) -> &Arc<SharedEventDispatcher> {
        &self.dispatcher
    }

    /// Register a synchronous handler for events with a specific name
    pub async fn register_sync_handler<F>(&self, event_name: &'static str, handler: F) -> EventId
    where
        F: Fn(&dyn Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_handler(event_name, dispatcher::sync_event_handler(handler)).await
    }

    /// Register a synchronous handler for events of a specific type
    pub async fn register_sync_type_handler<E, F>(&self, handler: F) -> EventId
    where
        E: Event + 'static,
        F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
    {
        self.dispatcher
            .register_type_handler::<E>(dispatcher::sync_typed_handler(handler))
            .await
    }
}

#[async_trait]
impl KernelComponent for DefaultEventManager {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self) -> Result<()> {
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Drops every registered handler; later dispatches reach nobody.
    async fn stop(&self) -> Result<()> {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let count = self.dispatcher.handler_count().await;
            self.dispatcher.clear().await;
            info!("Event manager stopped, released {} handler(s)", count);
        }
        Ok(())
    }
}

#[async_trait]
impl EventManager for DefaultEventManager {
    async fn register_handler(&self, event_name: &'static str, handler: EventHandler) -> EventId {
        self.dispatcher.register_handler(event_name, handler).await
    }

    async fn register_type_handler_id(&self, type_id: TypeId, handler: EventHandler) -> EventId {
        self.dispatcher.register_type_handler_id(type_id, handler).await
    }

    async fn unregister_handler(&self, id: EventId) -> bool {
        self.dispatcher.unregister_handler(id).await
    }

    async fn dispatch(&self, event: &dyn Event) -> DispatchReport {
        self.dispatcher.dispatch(event).await
    }
}

impl Default for DefaultEventManager {
    fn default() -> Self {
        Self::new()
    }
}
