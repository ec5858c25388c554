//! In-process document store.
//!
//! [`MemoryStore`] keeps every index in a map guarded by one lock. It applies
//! the same version, routing and scroll rules as a real cluster and can
//! simulate the visibility lag between a write and the next refresh:
//!
//! - [`MemoryStore::new`] makes writes searchable immediately.
//! - [`MemoryStore::with_refresh_lag`] keeps a separate searchable snapshot
//!   that only [`DocumentStore::refresh`] updates. Gets always see the latest
//!   write, like realtime gets do.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::core::{
    CopyOutcome, DeleteRequest, DocumentStore, FacetBuckets, ScrollBatch, SearchRequest,
    SearchResponse, SortDirection, StoreKind, StoredDocument, WriteMode, WriteRequest,
};
use crate::error::{ConcurrencyError, EntityError, IndexResult, QueryError};
use crate::query::{compare_values, elements, lookup, term_string};

#[derive(Debug, Clone)]
struct MemoryDocument {
    version: i64,
    routing: Option<String>,
    source: Map<String, Value>,
}

#[derive(Debug, Default)]
struct MemoryIndex {
    mapping: Value,
    live: BTreeMap<String, MemoryDocument>,
    searchable: BTreeMap<String, MemoryDocument>,
}

#[derive(Debug)]
struct Scroll {
    remaining: VecDeque<StoredDocument>,
    batch_size: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    indices: BTreeMap<String, MemoryIndex>,
    scrolls: HashMap<String, Scroll>,
}

/// An in-process [`DocumentStore`].
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    refresh_lag: bool,
    scroll_fetches: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store whose writes are searchable immediately.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            refresh_lag: false,
            scroll_fetches: AtomicU64::new(0),
        }
    }

    /// Creates a store whose writes are only searchable after a refresh.
    pub fn with_refresh_lag() -> Self {
        Self {
            refresh_lag: true,
            ..Self::new()
        }
    }

    /// Returns the number of live documents in `index`.
    pub fn document_count(&self, index: &str) -> usize {
        self.state
            .read()
            .indices
            .get(index)
            .map_or(0, |i| i.live.len())
    }

    /// Returns the number of `next_scroll` calls served so far.
    pub fn scroll_fetches(&self) -> u64 {
        self.scroll_fetches.load(AtomicOrdering::SeqCst)
    }

    /// Returns the number of open scroll contexts.
    pub fn open_scrolls(&self) -> usize {
        self.state.read().scrolls.len()
    }

    fn publish(&self, index: &mut MemoryIndex, id: &str) {
        if self.refresh_lag {
            return;
        }
        match index.live.get(id) {
            Some(doc) => {
                index.searchable.insert(id.to_string(), doc.clone());
            }
            None => {
                index.searchable.remove(id);
            }
        }
    }

    /// Returns all searchable matches of `request` in result order.
    fn matching(&self, state: &MemoryState, request: &SearchRequest) -> Vec<StoredDocument> {
        let Some(index) = state.indices.get(&request.index) else {
            return Vec::new();
        };
        let mut hits: Vec<StoredDocument> = index
            .searchable
            .iter()
            .filter(|(_, doc)| {
                request.routing.is_none() || doc.routing.as_deref() == request.routing.as_deref()
            })
            .filter(|(_, doc)| request.matches(&doc.source))
            .map(|(id, doc)| StoredDocument {
                id: id.clone(),
                version: doc.version,
                routing: doc.routing.clone(),
                source: doc.source.clone(),
            })
            .collect();

        if let Some(seed) = request.random_seed {
            hits.shuffle(&mut StdRng::seed_from_u64(seed));
        } else if !request.sort.is_empty() {
            hits.sort_by(|a, b| {
                request
                    .sort
                    .iter()
                    .map(|order| {
                        compare_sort_keys(
                            sort_key(&a.source, &order.field),
                            sort_key(&b.source, &order.field),
                            order.direction,
                        )
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or_else(|| a.id.cmp(&b.id))
            });
        }
        hits
    }
}

fn sort_key<'a>(source: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    elements(lookup(source, field)).next()
}

/// Missing values sort last in both directions.
fn compare_sort_keys(a: Option<&Value>, b: Option<&Value>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ordering = compare_values(a, b).unwrap_or(Ordering::Equal);
            match direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        }
    }
}

fn compute_facets(hits: &[StoredDocument], request: &SearchRequest) -> Vec<FacetBuckets> {
    request
        .facets
        .iter()
        .map(|facet| {
            let mut counts: HashMap<String, u64> = HashMap::new();
            for hit in hits {
                for value in elements(lookup(&hit.source, &facet.field)) {
                    if let Some(term) = term_string(value) {
                        *counts.entry(term).or_default() += 1;
                    }
                }
            }
            let mut buckets: Vec<(String, u64)> = counts.into_iter().collect();
            buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            buckets.truncate(facet.size);
            FacetBuckets {
                field: facet.field.clone(),
                buckets,
            }
        })
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> IndexResult<()> {
        Ok(())
    }

    async fn ensure_index(&self, index: &str, mapping: &Value) -> IndexResult<()> {
        let mut state = self.state.write();
        state
            .indices
            .entry(index.to_string())
            .or_insert_with(|| MemoryIndex {
                mapping: mapping.clone(),
                ..Default::default()
            });
        Ok(())
    }

    async fn list_indices(&self, prefix: &str) -> IndexResult<Vec<String>> {
        Ok(self
            .state
            .read()
            .indices
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_mapping(&self, index: &str) -> IndexResult<Option<Value>> {
        Ok(self
            .state
            .read()
            .indices
            .get(index)
            .map(|i| i.mapping.clone()))
    }

    async fn get(
        &self,
        index: &str,
        id: &str,
        routing: Option<&str>,
    ) -> IndexResult<Option<StoredDocument>> {
        let state = self.state.read();
        let Some(doc) = state.indices.get(index).and_then(|i| i.live.get(id)) else {
            return Ok(None);
        };
        if routing.is_some() && doc.routing.is_some() && routing != doc.routing.as_deref() {
            return Ok(None);
        }
        Ok(Some(StoredDocument {
            id: id.to_string(),
            version: doc.version,
            routing: doc.routing.clone(),
            source: doc.source.clone(),
        }))
    }

    async fn write(&self, request: WriteRequest) -> IndexResult<i64> {
        let mut state = self.state.write();
        let index = state.indices.entry(request.index.clone()).or_insert_with(|| MemoryIndex {
            mapping: json!({}),
            ..Default::default()
        });

        let current = index.live.get(&request.id).map(|doc| doc.version);
        let version = match (request.mode, current) {
            (WriteMode::Create, Some(_)) => {
                return Err(EntityError::AlreadyExists {
                    entity_type: request.type_name,
                    id: request.id,
                }
                .into());
            }
            (WriteMode::Versioned(expected), actual) if actual != Some(expected) => {
                return Err(ConcurrencyError::OptimisticLock {
                    entity_type: request.type_name,
                    id: request.id,
                    expected_version: expected,
                    actual_version: actual,
                }
                .into());
            }
            (_, current) => current.unwrap_or(0) + 1,
        };

        index.live.insert(
            request.id.clone(),
            MemoryDocument {
                version,
                routing: request.routing,
                source: request.source,
            },
        );
        self.publish(index, &request.id);
        Ok(version)
    }

    async fn delete(&self, request: DeleteRequest) -> IndexResult<bool> {
        let mut state = self.state.write();
        let Some(index) = state.indices.get_mut(&request.index) else {
            return Ok(false);
        };
        let Some(current) = index.live.get(&request.id).map(|doc| doc.version) else {
            return Ok(false);
        };
        if let Some(expected) = request.expected_version
            && expected != current
        {
            return Err(ConcurrencyError::OptimisticLock {
                entity_type: request.type_name,
                id: request.id,
                expected_version: expected,
                actual_version: Some(current),
            }
            .into());
        }
        index.live.remove(&request.id);
        self.publish(index, &request.id);
        Ok(true)
    }

    async fn search(&self, request: &SearchRequest) -> IndexResult<SearchResponse> {
        let started = Instant::now();
        let state = self.state.read();
        let hits = self.matching(&state, request);
        let facets = compute_facets(&hits, request);
        let total = hits.len() as u64;
        let hits = hits
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .collect();
        Ok(SearchResponse {
            hits,
            total,
            facets,
            took: started.elapsed(),
        })
    }

    async fn count(&self, request: &SearchRequest) -> IndexResult<u64> {
        let state = self.state.read();
        Ok(self.matching(&state, request).len() as u64)
    }

    async fn delete_by_query(&self, request: &SearchRequest) -> IndexResult<u64> {
        let mut state = self.state.write();
        let ids: Vec<String> = self
            .matching(&state, request)
            .into_iter()
            .map(|doc| doc.id)
            .collect();
        let Some(index) = state.indices.get_mut(&request.index) else {
            return Ok(0);
        };
        for id in &ids {
            index.live.remove(id);
            index.searchable.remove(id);
        }
        Ok(ids.len() as u64)
    }

    async fn open_scroll(
        &self,
        request: &SearchRequest,
        _keep_alive: Duration,
        batch_size: usize,
    ) -> IndexResult<ScrollBatch> {
        let mut state = self.state.write();
        let remaining: VecDeque<_> = self.matching(&state, request).into();
        let scroll_id = Uuid::new_v4().to_string();
        let mut scroll = Scroll {
            remaining,
            batch_size: batch_size.max(1),
        };
        let hits = take_batch(&mut scroll);
        state.scrolls.insert(scroll_id.clone(), scroll);
        Ok(ScrollBatch {
            scroll_id: Some(scroll_id),
            hits,
        })
    }

    async fn next_scroll(
        &self,
        scroll_id: &str,
        _keep_alive: Duration,
    ) -> IndexResult<ScrollBatch> {
        self.scroll_fetches.fetch_add(1, AtomicOrdering::SeqCst);
        let mut state = self.state.write();
        let scroll = state
            .scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| QueryError::ScrollLost {
                scroll_id: scroll_id.to_string(),
            })?;
        Ok(ScrollBatch {
            scroll_id: Some(scroll_id.to_string()),
            hits: take_batch(scroll),
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> IndexResult<()> {
        self.state.write().scrolls.remove(scroll_id);
        Ok(())
    }

    async fn refresh(&self, index: &str) -> IndexResult<()> {
        if let Some(index) = self.state.write().indices.get_mut(index) {
            index.searchable = index.live.clone();
        }
        Ok(())
    }

    async fn copy_index(&self, source: &str, dest: &str) -> IndexResult<CopyOutcome> {
        let mut state = self.state.write();
        let Some(docs) = state.indices.get(source).map(|i| i.live.clone()) else {
            return Ok(CopyOutcome::Completed { documents: 0 });
        };
        let documents = docs.len() as u64;
        let target = state.indices.entry(dest.to_string()).or_default();
        target.live.extend(docs);
        target.searchable = target.live.clone();
        Ok(CopyOutcome::Completed { documents })
    }
}

fn take_batch(scroll: &mut Scroll) -> Vec<StoredDocument> {
    let n = scroll.batch_size.min(scroll.remaining.len());
    scroll.remaining.drain(..n).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::core::{FacetRequest, SortOrder};
    use crate::query::Constraint;

    fn write(id: &str, source: Value, mode: WriteMode) -> WriteRequest {
        WriteRequest {
            index: "test-doc".to_string(),
            type_name: "Doc".to_string(),
            id: id.to_string(),
            routing: None,
            source: source.as_object().cloned().unwrap_or_default(),
            mode,
        }
    }

    #[tokio::test]
    async fn test_versions_increase() {
        let store = MemoryStore::new();
        let v1 = store
            .write(write("a", json!({"n": 1}), WriteMode::Create))
            .await
            .unwrap();
        let v2 = store
            .write(write("a", json!({"n": 2}), WriteMode::Versioned(1)))
            .await
            .unwrap();
        assert_eq!((v1, v2), (1, 2));

        let stale = store
            .write(write("a", json!({"n": 3}), WriteMode::Versioned(1)))
            .await
            .unwrap_err();
        assert!(stale.is_optimistic_lock());

        let duplicate = store
            .write(write("a", json!({}), WriteMode::Create))
            .await
            .unwrap_err();
        assert!(matches!(
            duplicate,
            crate::error::IndexError::Entity(EntityError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_lag() {
        let store = MemoryStore::with_refresh_lag();
        store
            .write(write("a", json!({"n": 1}), WriteMode::Create))
            .await
            .unwrap();

        let request = SearchRequest::new("test-doc");
        assert_eq!(store.count(&request).await.unwrap(), 0);
        assert!(store.get("test-doc", "a", None).await.unwrap().is_some());

        store.refresh("test-doc").await.unwrap();
        assert_eq!(store.count(&request).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_sort_and_facets() {
        let store = MemoryStore::new();
        for (id, n, color) in [("a", 3, "red"), ("b", 1, "blue"), ("c", 2, "red")] {
            store
                .write(write(id, json!({"n": n, "color": color}), WriteMode::Create))
                .await
                .unwrap();
        }

        let mut request = SearchRequest::new("test-doc");
        request.sort = vec![SortOrder {
            field: "n".to_string(),
            direction: SortDirection::Descending,
        }];
        request.facets = vec![FacetRequest {
            field: "color".to_string(),
            size: 10,
        }];
        request.filters = vec![Constraint::filled("color")];
        request.size = 2;

        let response = store.search(&request).await.unwrap();
        let ids: Vec<_> = response.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(response.total, 3);
        assert_eq!(
            response.facets[0].buckets,
            vec![("red".to_string(), 2), ("blue".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_random_order_is_seeded() {
        let store = MemoryStore::new();
        for i in 0..20 {
            store
                .write(write(&format!("{:02}", i), json!({}), WriteMode::Create))
                .await
                .unwrap();
        }
        let mut request = SearchRequest::new("test-doc");
        request.size = 20;
        request.random_seed = Some(7);
        let first = store.search(&request).await.unwrap();
        let second = store.search(&request).await.unwrap();
        let ids = |r: &SearchResponse| r.hits.iter().map(|h| h.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.hits.len(), 20);
    }

    #[tokio::test]
    async fn test_scroll_batches() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .write(write(&i.to_string(), json!({}), WriteMode::Create))
                .await
                .unwrap();
        }
        let request = SearchRequest::new("test-doc");
        let first = store
            .open_scroll(&request, Duration::from_secs(60), 2)
            .await
            .unwrap();
        assert_eq!(first.hits.len(), 2);
        let id = first.scroll_id.unwrap();

        let second = store.next_scroll(&id, Duration::from_secs(60)).await.unwrap();
        let third = store.next_scroll(&id, Duration::from_secs(60)).await.unwrap();
        let fourth = store.next_scroll(&id, Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            (second.hits.len(), third.hits.len(), fourth.hits.len()),
            (2, 1, 0)
        );

        store.clear_scroll(&id).await.unwrap();
        let lost = store.next_scroll(&id, Duration::from_secs(60)).await;
        assert!(lost.is_err());
    }

    #[tokio::test]
    async fn test_versioned_delete() {
        let store = MemoryStore::new();
        store
            .write(write("a", json!({}), WriteMode::Create))
            .await
            .unwrap();
        let delete = |expected_version| DeleteRequest {
            index: "test-doc".to_string(),
            type_name: "Doc".to_string(),
            id: "a".to_string(),
            routing: None,
            expected_version,
        };

        assert!(store.delete(delete(Some(5))).await.unwrap_err().is_optimistic_lock());
        assert!(store.delete(delete(Some(1))).await.unwrap());
        assert!(!store.delete(delete(None)).await.unwrap());
    }
}
