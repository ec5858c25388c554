//! Elasticsearch document store.
//!
//! Entities are stored one physical index per entity type. Optimistic locking
//! maps onto external versioning, scrolls onto the scroll API and background
//! reindexing onto reindex tasks.

mod config;
mod query_builder;
mod schema;
mod store;

pub use config::{ElasticsearchAuth, ElasticsearchConfig, IndexSettings};
pub use query_builder::{build_query, build_search, constraint_to_dsl};
pub use schema::create_index_body;
pub use store::ElasticsearchStore;
