//! # Maera Core Event System Errors
//!
//! Defines [`EventSystemError`], returned by handlers and by handler
//! registration.
use crate::event::EventId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventSystemError {
    #[error("Handler for event '{event_name}' failed: {reason}")]
    HandlerFailed {
        event_name: String,
        reason: String,
    },

    #[error("Failed to unregister event handler with ID {id}: {reason}")]
    HandlerUnregistrationFailed {
        id: EventId,
        reason: String,
    },

    #[error("Event manager '{component}' is stopped")]
    ManagerStopped {
        component: String,
    },

    #[error("Internal event system error: {0}")]
    InternalError(String),
}

impl EventSystemError {
    /// Convenience for handlers turning a subsystem error into a failure report.
    pub fn handler_failed(event_name: &str, reason: impl ToString) -> Self {
        EventSystemError::HandlerFailed {
            event_name: event_name.to_string(),
            reason: reason.to_string(),
        }
    }
}
