//! Entity schema.
//!
//! - [`Entity`] - the contract persisted types implement
//! - [`EntityDescriptor`] / [`Property`] - declarative field mapping
//! - [`Schema`] - registry caching one descriptor per type

mod descriptor;
mod entity;
mod registry;

pub use descriptor::{EntityDescriptor, Property, PropertyKind};
pub use entity::{Entity, EntityMeta, NEW_ID};
pub use registry::Schema;
