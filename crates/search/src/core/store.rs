//! Document store abstraction.
//!
//! This module defines the [`DocumentStore`] trait, the single seam between the
//! index layer and a concrete store. Requests are typed and backend-neutral;
//! each backend translates them into its own wire format.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IndexResult;
use crate::query::Constraint;

/// Identifies the kind of document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// In-process store.
    Memory,
    /// Elasticsearch cluster.
    Elasticsearch,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Memory => write!(f, "memory"),
            StoreKind::Elasticsearch => write!(f, "elasticsearch"),
        }
    }
}

/// A document as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Document id.
    pub id: String,
    /// Current version.
    pub version: i64,
    /// Routing key the document was written with.
    pub routing: Option<String>,
    /// Document source.
    pub source: Map<String, Value>,
}

/// Precondition of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail if a document with the id exists.
    Create,
    /// Fail unless the stored version equals the given one.
    Versioned(i64),
    /// Last write wins.
    Overwrite,
}

/// A single-document write.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    /// Physical index name.
    pub index: String,
    /// Entity type name, for error reporting.
    pub type_name: String,
    /// Document id.
    pub id: String,
    /// Routing key.
    pub routing: Option<String>,
    /// Document source.
    pub source: Map<String, Value>,
    /// Write precondition.
    pub mode: WriteMode,
}

/// A single-document delete.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    /// Physical index name.
    pub index: String,
    /// Entity type name, for error reporting.
    pub type_name: String,
    /// Document id.
    pub id: String,
    /// Routing key.
    pub routing: Option<String>,
    /// Version the stored document must have, or `None` to force.
    pub expected_version: Option<i64>,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// A sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    /// Field to sort by.
    pub field: String,
    /// Direction.
    pub direction: SortDirection,
}

/// A term aggregation over a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetRequest {
    /// Aggregated field.
    pub field: String,
    /// Maximum number of buckets.
    pub size: usize,
}

/// Buckets computed for one [`FacetRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetBuckets {
    /// Aggregated field.
    pub field: String,
    /// `(term, document count)` ordered by count, then term.
    pub buckets: Vec<(String, u64)>,
}

/// A search against one physical index.
///
/// `query` holds the relevance-scoring part; `filters` are non-scoring and
/// AND-combined.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Physical index name.
    pub index: String,
    /// Routing key.
    pub routing: Option<String>,
    /// Scoring constraint.
    pub query: Option<Constraint>,
    /// Non-scoring constraints.
    pub filters: Vec<Constraint>,
    /// Sort keys in priority order.
    pub sort: Vec<SortOrder>,
    /// Seed of a random ordering; overrides `sort` when set.
    pub random_seed: Option<u64>,
    /// Term aggregations.
    pub facets: Vec<FacetRequest>,
    /// Offset of the first hit.
    pub from: usize,
    /// Maximum number of hits.
    pub size: usize,
    /// Read from primary shards.
    pub primary: bool,
}

impl SearchRequest {
    /// Creates a request matching every document of `index`.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            routing: None,
            query: None,
            filters: Vec::new(),
            sort: Vec::new(),
            random_seed: None,
            facets: Vec::new(),
            from: 0,
            size: 10,
            primary: false,
        }
    }

    /// Returns true if `source` satisfies the query and all filters.
    pub fn matches(&self, source: &Map<String, Value>) -> bool {
        self.query.as_ref().is_none_or(|q| q.matches(source))
            && self.filters.iter().all(|f| f.matches(source))
    }
}

/// Result of a search.
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    /// Hits in result order.
    pub hits: Vec<StoredDocument>,
    /// Total number of matching documents.
    pub total: u64,
    /// Computed facets, in request order.
    pub facets: Vec<FacetBuckets>,
    /// Time the store spent.
    pub took: Duration,
}

/// One batch of a scroll.
#[derive(Debug, Clone, Default)]
pub struct ScrollBatch {
    /// Id to continue the scroll with.
    pub scroll_id: Option<String>,
    /// Hits of this batch; empty once the scroll is exhausted.
    pub hits: Vec<StoredDocument>,
}

/// Outcome of copying an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyOutcome {
    /// All documents were copied.
    Completed {
        /// Number of copied documents.
        documents: u64,
    },
    /// The copy runs as a task inside the store.
    Submitted {
        /// Store task id.
        task: String,
    },
}

/// A document store the index layer can persist entities in.
///
/// Versions are positive and increase by one with every write. Writes and
/// deletes report a version mismatch as
/// [`ConcurrencyError::OptimisticLock`](crate::error::ConcurrencyError::OptimisticLock)
/// and a create over an existing id as
/// [`EntityError::AlreadyExists`](crate::error::EntityError::AlreadyExists).
#[async_trait]
pub trait DocumentStore: Debug + Send + Sync {
    /// Returns the kind of this store.
    fn kind(&self) -> StoreKind;

    /// Returns a human-readable name.
    fn name(&self) -> &'static str;

    /// Checks that the store is reachable and healthy.
    async fn health_check(&self) -> IndexResult<()>;

    /// Creates `index` with `mapping` unless it exists.
    async fn ensure_index(&self, index: &str, mapping: &Value) -> IndexResult<()>;

    /// Lists physical indices starting with `prefix`.
    async fn list_indices(&self, prefix: &str) -> IndexResult<Vec<String>>;

    /// Returns the mapping of `index`, or `None` if it does not exist.
    async fn get_mapping(&self, index: &str) -> IndexResult<Option<Value>>;

    /// Reads a document by id, bypassing search visibility lag.
    async fn get(
        &self,
        index: &str,
        id: &str,
        routing: Option<&str>,
    ) -> IndexResult<Option<StoredDocument>>;

    /// Writes a document and returns its new version.
    async fn write(&self, request: WriteRequest) -> IndexResult<i64>;

    /// Deletes a document; returns false if it did not exist.
    async fn delete(&self, request: DeleteRequest) -> IndexResult<bool>;

    /// Runs a search.
    async fn search(&self, request: &SearchRequest) -> IndexResult<SearchResponse>;

    /// Counts matching documents, ignoring paging.
    async fn count(&self, request: &SearchRequest) -> IndexResult<u64>;

    /// Deletes all matching documents, ignoring paging.
    async fn delete_by_query(&self, request: &SearchRequest) -> IndexResult<u64>;

    /// Starts a scroll over all matching documents.
    async fn open_scroll(
        &self,
        request: &SearchRequest,
        keep_alive: Duration,
        batch_size: usize,
    ) -> IndexResult<ScrollBatch>;

    /// Fetches the next batch of a scroll.
    async fn next_scroll(&self, scroll_id: &str, keep_alive: Duration)
    -> IndexResult<ScrollBatch>;

    /// Releases a scroll context.
    async fn clear_scroll(&self, scroll_id: &str) -> IndexResult<()>;

    /// Makes all writes to `index` visible to searches.
    async fn refresh(&self, index: &str) -> IndexResult<()>;

    /// Copies every document of `source` into `dest`.
    async fn copy_index(&self, source: &str, dest: &str) -> IndexResult<CopyOutcome>;
}
