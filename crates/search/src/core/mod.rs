//! Core store abstractions.
//!
//! [`DocumentStore`] is implemented by every backend in
//! [`backends`](crate::backends); the index layer only talks to this trait.

mod store;

pub use store::{
    CopyOutcome, DeleteRequest, DocumentStore, FacetBuckets, FacetRequest, ScrollBatch,
    SearchRequest, SearchResponse, SortDirection, SortOrder, StoreKind, StoredDocument,
    WriteMode, WriteRequest,
};
