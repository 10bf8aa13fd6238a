use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use async_trait::async_trait;
use crate::kernel::error::Result;

/// Core component lifecycle trait for all kernel components
#[async_trait]
pub trait KernelComponent: Any + Send + Sync + Debug {
    fn name(&self) -> &'static str;
    async fn initialize(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// Registry storing components as `Arc<dyn KernelComponent>`, keyed by the
/// concrete type so callers can get typed handles back.
#[derive(Default, Debug)]
pub struct DependencyRegistry {
    instances: HashMap<TypeId, Arc<dyn KernelComponent>>,
    // Registration order, used for start (forward) and stop (reverse).
    order: Vec<TypeId>,
}

impl DependencyRegistry {
    /// Create a new empty dependency registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component instance, replacing any previous instance of the same type.
    pub fn register_instance<V>(&mut self, instance: Arc<V>)
    where
        V: KernelComponent + 'static,
    {
        let type_id = TypeId::of::<V>();
        if self.instances.insert(type_id, instance).is_none() {
            self.order.push(type_id);
        }
    }

    /// Get a component instance by concrete type T.
    pub fn get_concrete<T: KernelComponent + 'static>(&self) -> Option<Arc<T>> {
        self.instances
            .get(&TypeId::of::<T>())
            .and_then(|arc_kc| {
                let arc_any: Arc<dyn Any + Send + Sync> = arc_kc.clone();
                Arc::downcast::<T>(arc_any).ok()
            })
    }

    /// Components in registration order.
    pub fn components_in_order(&self) -> Vec<Arc<dyn KernelComponent>> {
        self.order
            .iter()
            .filter_map(|id| self.instances.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Clear all instances.
    pub fn clear(&mut self) {
        self.instances.clear();
        self.order.clear();
    }
}
