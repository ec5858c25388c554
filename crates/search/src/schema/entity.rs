//! The entity contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::IndexResult;
use crate::index::Index;

use super::descriptor::EntityDescriptor;

/// Id carried by entities that have not been persisted yet.
pub const NEW_ID: &str = "new";

/// Persistence metadata of an entity.
///
/// Entities embed this struct with `#[serde(skip)]`; the id and version travel
/// as document metadata, never as part of the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    id: String,
    version: i64,
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self {
            id: NEW_ID.to_string(),
            version: 0,
        }
    }
}

impl EntityMeta {
    /// Creates metadata for a stored document.
    pub fn stored(id: impl Into<String>, version: i64) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    /// Returns the document id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the version last read or written.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns true until the entity has been created in the store.
    pub fn is_new(&self) -> bool {
        self.id == NEW_ID
    }

    pub(crate) fn set(&mut self, id: impl Into<String>, version: i64) {
        self.id = id.into();
        self.version = version;
    }
}

/// A type persisted as a document.
///
/// Field (de)serialization is delegated to serde; the [`EntityDescriptor`]
/// returned by [`Entity::descriptor`] adds the store type name, index and
/// field mapping. The descriptor is computed once per type and cached by
/// [`Schema`](super::Schema).
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use sirius_search::schema::{Entity, EntityDescriptor, EntityMeta, Property};
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Customer {
///     #[serde(skip)]
///     meta: EntityMeta,
///     name: String,
/// }
///
/// impl Entity for Customer {
///     fn descriptor() -> EntityDescriptor {
///         EntityDescriptor::new("Customer", "crm").property(Property::text("name"))
///     }
///     fn meta(&self) -> &EntityMeta {
///         &self.meta
///     }
///     fn meta_mut(&mut self) -> &mut EntityMeta {
///         &mut self.meta
///     }
/// }
///
/// assert!(Customer::default().is_new());
/// ```
#[async_trait]
pub trait Entity: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Describes how this type is stored.
    fn descriptor() -> EntityDescriptor;

    /// Returns the persistence metadata.
    fn meta(&self) -> &EntityMeta;

    /// Returns the persistence metadata for modification.
    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Returns the document id (`"new"` if not persisted yet).
    fn id(&self) -> &str {
        self.meta().id()
    }

    /// Returns the version last read or written.
    fn version(&self) -> i64 {
        self.meta().version()
    }

    /// Returns true if the entity has not been created yet.
    fn is_new(&self) -> bool {
        self.meta().is_new()
    }

    /// Returns an id to create the document with, or `None` for a generated one.
    fn compute_possible_id(&self) -> Option<String> {
        None
    }

    /// Normalizes fields before the save checks run.
    fn before_save_checks(&mut self) {}

    /// Validates the entity; an error aborts the save.
    fn perform_save_checks(&self) -> IndexResult<()> {
        Ok(())
    }

    /// Last hook before the document is written.
    fn before_save(&mut self) {}

    /// Called after the document has been written.
    fn after_save(&mut self) {}

    /// Validates a delete; an error aborts it.
    fn perform_delete_checks(&self) -> IndexResult<()> {
        Ok(())
    }

    /// Removes or updates dependent entities after this one was deleted.
    async fn cascade_delete(&self, _index: &Index) -> IndexResult<()> {
        Ok(())
    }
}
