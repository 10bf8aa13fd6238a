//! Service trackers handed out by the container manager.
//!
//! The manager keeps every open tracker in a [`TrackerSet`] so it can close
//! them all on stop. A tracker leaves the set when it is closed or dropped.
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::container::framework::{Framework, ServiceReference};

#[derive(Debug)]
struct TrackerInner {
    interface: String,
    framework: Arc<dyn Framework>,
    closed: AtomicBool,
}

/// Open trackers of one container manager
#[derive(Debug, Default)]
pub struct TrackerSet {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, Arc<TrackerInner>>>,
}

impl TrackerSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.open.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes and forgets every open tracker.
    pub fn close_all(&self) {
        let drained: Vec<Arc<TrackerInner>> = self
            .open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, t)| t)
            .collect();
        for tracker in drained {
            tracker.closed.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn open(self: &Arc<Self>, interface: &str, framework: Arc<dyn Framework>) -> ServiceTracker {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::new(TrackerInner {
            interface: interface.to_string(),
            framework,
            closed: AtomicBool::new(false),
        });
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, inner.clone());
        ServiceTracker {
            id,
            inner,
            set: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) {
        self.open.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }
}

/// Live view of the services registered under one interface.
#[derive(Debug)]
pub struct ServiceTracker {
    id: u64,
    inner: Arc<TrackerInner>,
    set: Weak<TrackerSet>,
}

impl ServiceTracker {
    pub fn interface(&self) -> &str {
        &self.inner.interface
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Current services; empty once closed
    pub fn services(&self) -> Vec<ServiceReference> {
        if self.is_closed() {
            return Vec::new();
        }
        self.inner.framework.services(&self.inner.interface)
    }

    /// First tracked service that is a `T`
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services().iter().find_map(|s| s.downcast::<T>())
    }

    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}

impl Drop for ServiceTracker {
    fn drop(&mut self) {
        self.close();
    }
}
