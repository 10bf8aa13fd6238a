//! # Maera Core Event System
//!
//! Synchronous, in-process publish/subscribe for framework lifecycle
//! notifications.
//!
//! Events are delivered to handlers in registration order, one at a time,
//! and the dispatcher never holds its own lock while a handler runs, so a
//! handler may register further handlers or publish follow-up events.
//! A failing handler is logged and reported in the [`DispatchReport`];
//! delivery to the remaining handlers continues.
//!
//! Key components:
//! - [`Event`]: trait implemented by every publishable event.
//! - [`AsyncEventHandler`]: trait for subscribers.
//! - [`dispatcher`]: handler storage and delivery.
//! - [`manager`]: the [`EventManager`] kernel component.
//! - [`types`]: framework, plugin and container event enums.
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod types;

use std::any::Any;
use std::fmt;

use async_trait::async_trait;

use crate::event::error::EventSystemError;

/// Type for handler registration identifiers
pub type EventId = u64;

/// Outcome of a single handler invocation
pub type HandlerResult = std::result::Result<(), EventSystemError>;

/// Core event trait
pub trait Event: Any + fmt::Debug + Send + Sync {
    /// Get the name of this event
    fn name(&self) -> &'static str;

    /// Clone this event
    fn clone_event(&self) -> Box<dyn Event>;

    /// Cast to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Asynchronous event handler trait
#[async_trait]
pub trait AsyncEventHandler: Send + Sync {
    async fn handle(&self, event: &dyn Event) -> HandlerResult;
}

/// What happened when an event was published.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Number of handlers that were invoked
    pub delivered: usize,
    /// Errors returned by handlers, in delivery order
    pub failures: Vec<EventSystemError>,
}

impl DispatchReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Consumes the report, yielding the first handler failure if any.
    pub fn into_first_failure(self) -> Option<EventSystemError> {
        self.failures.into_iter().next()
    }
}

/// Re-export important types
pub use dispatcher::{EventDispatcher, SharedEventDispatcher, create_dispatcher};
pub use manager::{BoxedEvent, DefaultEventManager, EventManager};
pub use types::{ContainerEvent, FrameworkEvent, PluginEvent};

// Test module declaration
#[cfg(test)]
mod tests;
