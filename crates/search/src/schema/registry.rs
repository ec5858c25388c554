//! Descriptor registry.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::descriptor::EntityDescriptor;
use super::entity::Entity;

/// Caches one [`EntityDescriptor`] per entity type.
///
/// Descriptors are computed on first use and shared afterwards. Lookups by
/// store type name only see types that have been used or registered.
#[derive(Debug, Default)]
pub struct Schema {
    inner: RwLock<SchemaInner>,
}

#[derive(Debug, Default)]
struct SchemaInner {
    by_type: HashMap<TypeId, Arc<EntityDescriptor>>,
    by_name: HashMap<String, Arc<EntityDescriptor>>,
}

impl Schema {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the descriptor of `E`, computing it on first use.
    pub fn descriptor<E: Entity>(&self) -> Arc<EntityDescriptor> {
        if let Some(descriptor) = self.inner.read().by_type.get(&TypeId::of::<E>()) {
            return descriptor.clone();
        }
        self.register::<E>()
    }

    /// Registers `E` and returns its descriptor.
    pub fn register<E: Entity>(&self) -> Arc<EntityDescriptor> {
        let mut inner = self.inner.write();
        if let Some(descriptor) = inner.by_type.get(&TypeId::of::<E>()) {
            return descriptor.clone();
        }

        let descriptor = Arc::new(E::descriptor());
        if inner.by_name.contains_key(descriptor.type_name()) {
            tracing::warn!(
                type_name = %descriptor.type_name(),
                "Type name registered by more than one entity type"
            );
        }
        inner.by_type.insert(TypeId::of::<E>(), descriptor.clone());
        inner
            .by_name
            .insert(descriptor.type_name().to_string(), descriptor.clone());
        tracing::debug!(
            type_name = %descriptor.type_name(),
            index = %descriptor.index(),
            "Registered entity descriptor"
        );
        descriptor
    }

    /// Looks up a descriptor by store type name.
    pub fn by_type_name(&self, type_name: &str) -> Option<Arc<EntityDescriptor>> {
        self.inner.read().by_name.get(type_name).cloned()
    }

    /// Returns all known descriptors ordered by type name.
    pub fn descriptors(&self) -> Vec<Arc<EntityDescriptor>> {
        let mut all: Vec<_> = self.inner.read().by_name.values().cloned().collect();
        all.sort_by(|a, b| a.type_name().cmp(b.type_name()));
        all
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.inner.read().by_type.len()
    }

    /// Returns true if no type has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::schema::{EntityMeta, Property};

    static DESCRIBED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Counted {
        #[serde(skip)]
        meta: EntityMeta,
    }

    impl Entity for Counted {
        fn descriptor() -> EntityDescriptor {
            DESCRIBED.fetch_add(1, Ordering::SeqCst);
            EntityDescriptor::new("Counted", "misc").property(Property::keyword("name"))
        }
        fn meta(&self) -> &EntityMeta {
            &self.meta
        }
        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.meta
        }
    }

    #[test]
    fn test_descriptor_is_computed_once() {
        let schema = Schema::new();
        let first = schema.descriptor::<Counted>();
        let second = schema.descriptor::<Counted>();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(DESCRIBED.load(Ordering::SeqCst), 1);
        assert_eq!(schema.len(), 1);
        assert!(schema.by_type_name("Counted").is_some());
        assert!(schema.by_type_name("Other").is_none());
    }
}
