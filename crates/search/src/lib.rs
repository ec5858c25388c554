//! # sirius-search
//!
//! Versioned document persistence on top of a search engine.
//!
//! The crate maps typed entities onto documents of a search index and offers
//! three building blocks:
//!
//! - [`Index`]: create, update, find and delete entities with optimistic
//!   locking, run units of work with [`Index::retry`], defer actions until
//!   writes are searchable via the delay-line, and reindex into a new prefix.
//! - [`Query`]: a fluent, typed query builder with constraints, ordering,
//!   paging, term facets, scroll-based iteration and delete-by-query.
//! - [`Page`]: one window of a result set with the data a paginated listing
//!   needs to render its navigation and facet links.
//!
//! ## Backends
//!
//! | Backend        | Feature         | Notes                                  |
//! |----------------|-----------------|----------------------------------------|
//! | Memory         | always          | configurable refresh lag for tests     |
//! | Elasticsearch  | `elasticsearch` | external versioning, scroll API        |
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sirius_search::{Index, IndexConfig, backends::MemoryStore};
//!
//! let index = Index::new(Arc::new(MemoryStore::new()), IndexConfig::default());
//!
//! let mut customer = Customer::named("Ada");
//! index.create(&mut customer).await?;
//!
//! let active = index
//!     .select::<Customer>()
//!     .eq("status", "active")
//!     .order_by_asc("name")
//!     .query_page()
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod index;
pub mod page;
pub mod query;
pub mod schema;

// Re-export commonly used types at crate root
pub use config::{DelayLineConfig, IndexConfig};
pub use error::{
    BackendError, ConcurrencyError, EntityError, HandledError, IndexError, IndexResult,
    QueryError,
};
pub use index::{Index, MetricsSnapshot, ReindexProgress, ReindexStatus};
pub use page::Page;
pub use query::{Constraint, Facet, FacetItem, Query, ResultList, Translator};
pub use schema::{Entity, EntityDescriptor, EntityMeta, Property, PropertyKind, Schema};

// Re-export the store trait
pub use core::{DocumentStore, StoreKind};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
