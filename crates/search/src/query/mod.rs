//! Fluent query builder.
//!
//! A [`Query`] is obtained from [`Index::select`](crate::Index::select). It
//! collects AND-combined constraints, ordering, facets and a paging window, and
//! executes them against the index's store:
//!
//! ```ignore
//! let page = index
//!     .select::<Customer>()
//!     .eq("status", "active")
//!     .query("smith")
//!     .add_term_facet("country", None::<String>)
//!     .order_by_asc("name")
//!     .page(2)
//!     .query_page()
//!     .await?;
//! ```
//!
//! Constraints created by [`Query::query`] affect relevance scoring; all other
//! constraints are non-scoring filters.

mod constraint;
mod facet;
mod result;

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::core::{
    FacetRequest, SearchRequest, SearchResponse, SortDirection, SortOrder, StoredDocument,
};
use crate::error::{HandledError, IndexError, IndexResult};
use crate::index::Index;
use crate::page::Page;
use crate::schema::{Entity, EntityDescriptor};

pub use constraint::Constraint;
pub(crate) use constraint::{compare_values, elements, lookup, term_string};
pub use facet::{Facet, FacetItem, Translator};
pub(crate) use result::LazyFacets;
pub use result::ResultList;

/// Number of buckets requested per term facet.
const FACET_SIZE: usize = 25;

/// A query over entities of type `E`.
///
/// The builder methods consume and return the query. Execution methods take
/// `&self`, so a query may be executed more than once.
#[must_use]
pub struct Query<'a, E: Entity> {
    index: &'a Index,
    descriptor: Arc<EntityDescriptor>,
    constraints: Vec<Constraint>,
    orders: Vec<SortOrder>,
    random_seed: Option<u64>,
    facets: Vec<Facet>,
    query_string: Option<String>,
    start: usize,
    limit: Option<usize>,
    page: Option<usize>,
    primary: bool,
    routing: Option<String>,
    index_override: Option<String>,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, E: Entity> Query<'a, E> {
    pub(crate) fn new(index: &'a Index) -> Self {
        Self {
            descriptor: index.schema().descriptor::<E>(),
            index,
            constraints: Vec::new(),
            orders: Vec::new(),
            random_seed: None,
            facets: Vec::new(),
            query_string: None,
            start: 0,
            limit: None,
            page: None,
            primary: false,
            routing: None,
            index_override: None,
            _entity: PhantomData,
        }
    }

    /// Adds a constraint; all constraints are AND-combined.
    pub fn where_(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Adds an OR-group of constraints.
    pub fn or(self, constraints: Vec<Constraint>) -> Self {
        self.where_(Constraint::or(constraints))
    }

    /// `field == value`. A null value matches documents without the field.
    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.where_(Constraint::eq(field, value))
    }

    /// `field != value`.
    pub fn not_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.where_(Constraint::not_eq(field, value))
    }

    /// Requires `field` to have a value.
    pub fn filled(self, field: &str) -> Self {
        self.where_(Constraint::filled(field))
    }

    /// Requires `field` to have no value.
    pub fn not_filled(self, field: &str) -> Self {
        self.where_(Constraint::not_filled(field))
    }

    /// Requires `field` to equal one of `values`.
    pub fn in_values<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.where_(Constraint::one_in(field, values))
    }

    /// Requires `field` to equal one of the comma-separated `values`.
    ///
    /// Empty input adds no constraint.
    pub fn equals_any(self, field: &str, values: &str) -> Self {
        let tokens = split_values(values);
        if tokens.is_empty() {
            return self;
        }
        self.or(tokens
            .into_iter()
            .map(|v| Constraint::eq(field, v))
            .collect())
    }

    /// Requires the list field to contain one of the comma-separated `values`.
    pub fn contains_any(self, field: &str, values: &str) -> Self {
        let tokens = split_values(values);
        if tokens.is_empty() {
            return self;
        }
        self.where_(Constraint::one_in(field, tokens))
    }

    /// Requires the list field to contain all of the comma-separated `values`.
    pub fn contains_all(self, field: &str, values: &str) -> Self {
        let tokens = split_values(values);
        if tokens.is_empty() {
            return self;
        }
        self.where_(Constraint::and(
            tokens
                .into_iter()
                .map(|v| Constraint::eq(field, v))
                .collect(),
        ))
    }

    /// Requires `field` to lie within the inclusive bounds.
    pub fn range(
        self,
        field: &str,
        lower: Option<impl Into<Value>>,
        upper: Option<impl Into<Value>>,
    ) -> Self {
        self.where_(Constraint::range(field, lower, upper))
    }

    /// Requires `field` to start with `value`.
    pub fn prefix(self, field: &str, value: &str) -> Self {
        self.where_(Constraint::prefix(field, value))
    }

    /// Adds a full-text query in the store's query-string syntax.
    ///
    /// Blank input is ignored.
    pub fn query(mut self, text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return self;
        }
        self.query_string = Some(text.to_string());
        self.where_(Constraint::query_string(text))
    }

    /// Sorts ascending by `field`, after any previous ordering.
    pub fn order_by_asc(mut self, field: &str) -> Self {
        self.orders.push(SortOrder {
            field: field.to_string(),
            direction: SortDirection::Ascending,
        });
        self
    }

    /// Sorts descending by `field`, after any previous ordering.
    pub fn order_by_desc(mut self, field: &str) -> Self {
        self.orders.push(SortOrder {
            field: field.to_string(),
            direction: SortDirection::Descending,
        });
        self
    }

    /// Orders results randomly, overriding any sort order.
    pub fn randomize(self) -> Self {
        self.randomize_with_seed(rand::random())
    }

    /// Orders results by a random permutation derived from `seed`.
    pub fn randomize_with_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Adds a term facet on `field`.
    ///
    /// A non-empty `value` is the currently selected term and also filters the
    /// results. Enumeration properties get their labels as translator.
    pub fn add_term_facet(self, field: &str, value: Option<impl Into<String>>) -> Self {
        self.add_term_facet_with(field, value, None)
    }

    /// Adds a term facet on `field` using an explicit label translator.
    ///
    /// Falls back to the enumeration labels if `translator` is `None`.
    pub fn add_term_facet_with(
        mut self,
        field: &str,
        value: Option<impl Into<String>>,
        translator: Option<Translator>,
    ) -> Self {
        let translator = translator.or_else(|| self.descriptor.label_translator(field));
        let facet = Facet::new(field, value.map(Into::into), translator);
        if let Some(value) = facet.value() {
            self.constraints.push(Constraint::eq(field, value));
        }
        self.facets.push(facet);
        self
    }

    /// Skips the first `start` results.
    pub fn start(mut self, start: usize) -> Self {
        self.start = start;
        self.page = None;
        self
    }

    /// Returns at most `limit` results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Selects the 1-based page `page` of size `limit` (or the default page size).
    pub fn page(mut self, page: usize) -> Self {
        self.page = Some(page.max(1));
        self
    }

    /// Reads from primary shards, so that just-written documents are seen.
    pub fn from_primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Restricts the query to documents with the given routing key.
    pub fn routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into()).filter(|r: &String| !r.is_empty());
        self
    }

    /// Queries the logical index `index` instead of the type's own.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index_override = Some(index.into());
        self
    }

    /// Returns the constraints collected so far.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Returns the full-text query, if one was given.
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Returns the first matching entity.
    pub async fn query_first(&self) -> IndexResult<Option<E>> {
        let mut request = self.build_request(false);
        request.size = 1;
        let response = self.search("query_first", &request).await?;
        response
            .hits
            .into_iter()
            .next()
            .map(|doc| self.read(doc))
            .transpose()
            .map_err(|e| self.handle("query_first", e))
    }

    /// Returns the matching entities within the paging window.
    ///
    /// Without a limit or page, the window extends to `max_result_window`.
    pub async fn query_list(&self) -> IndexResult<Vec<E>> {
        Ok(self.query_result_list().await?.into_items())
    }

    /// Returns the matching entities within the paging window, with facets.
    pub async fn query_result_list(&self) -> IndexResult<ResultList<E>> {
        let mut request = self.build_request(true);
        request.size = self.window_size(request.from);
        let response = self.search("query_result_list", &request).await?;
        let items = self.read_all(response.hits, "query_result_list")?;
        Ok(ResultList::new(
            items,
            response.total,
            response.took,
            LazyFacets::new(self.facets.clone(), response.facets),
        ))
    }

    /// Counts all matching entities, ignoring paging.
    pub async fn count(&self) -> IndexResult<u64> {
        let request = self.build_request(false);
        let started = Instant::now();
        let result = self.index.store().count(&request).await;
        self.index.metrics().record_query(started.elapsed());
        result.map_err(|e| self.handle("count", e))
    }

    /// Returns true if at least one entity matches.
    pub async fn exists(&self) -> IndexResult<bool> {
        Ok(self.count().await? > 0)
    }

    /// Returns one page of results.
    ///
    /// Fetches one entity more than the page size to determine whether a next
    /// page exists without counting.
    pub async fn query_page(&self) -> IndexResult<Page<E>> {
        let page_size = self.page_size();
        let mut request = self.build_request(true);
        let remaining = self
            .index
            .config()
            .max_result_window
            .saturating_sub(request.from);
        request.size = page_size.saturating_add(1).min(remaining);
        let response = self.search("query_page", &request).await?;

        let mut items = self.read_all(response.hits, "query_page")?;
        let has_more = items.len() > page_size;
        items.truncate(page_size);

        Ok(Page::new(
            self.query_string.clone().unwrap_or_default(),
            request.from,
            request.from.saturating_add(items.len()),
            items,
            has_more,
            response.took,
            page_size,
            LazyFacets::new(self.facets.clone(), response.facets),
        ))
    }

    /// Visits every matching entity using a scroll.
    ///
    /// Batches are fetched until one comes back empty, or until `limit`
    /// entities have been visited if a limit is set. The handler returning
    /// `Ok(false)` stops the iteration before the next entity. Handler errors
    /// and unreadable documents are logged and skipped.
    pub async fn iterate<F, Fut>(&self, mut handler: F) -> IndexResult<()>
    where
        F: FnMut(E) -> Fut,
        Fut: Future<Output = IndexResult<bool>>,
    {
        if self.limit == Some(0) {
            return Ok(());
        }
        let config = self.index.config();
        let store = self.index.store();
        let request = self.build_request(false);
        let keep_alive = config.scroll_keep_alive();

        let started = Instant::now();
        let mut batch = store
            .open_scroll(&request, keep_alive, config.scroll_batch_size)
            .await
            .map_err(|e| self.handle("iterate", e))?;
        self.index.metrics().record_query(started.elapsed());

        let mut visited = 0usize;
        loop {
            if batch.hits.is_empty() {
                break;
            }
            for doc in std::mem::take(&mut batch.hits) {
                let id = doc.id.clone();
                let entity = match self.read(doc) {
                    Ok(entity) => entity,
                    Err(e) => {
                        tracing::warn!(
                            entity_type = %self.descriptor.type_name(),
                            id = %id,
                            error = %e,
                            "Skipping unreadable document during iteration"
                        );
                        continue;
                    }
                };
                match handler(entity).await {
                    Ok(true) => {}
                    Ok(false) => {
                        self.close_scroll(batch.scroll_id.as_deref()).await;
                        return Ok(());
                    }
                    Err(e) => tracing::error!(
                        entity_type = %self.descriptor.type_name(),
                        id = %id,
                        error = %e,
                        "Iteration handler failed"
                    ),
                }
                visited += 1;
                if self.limit.is_some_and(|limit| visited >= limit) {
                    self.close_scroll(batch.scroll_id.as_deref()).await;
                    return Ok(());
                }
            }

            let Some(scroll_id) = batch.scroll_id.clone() else {
                break;
            };
            let started = Instant::now();
            batch = store
                .next_scroll(&scroll_id, keep_alive)
                .await
                .map_err(|e| self.handle("iterate", e))?;
            self.index.metrics().record_query(started.elapsed());
        }

        self.close_scroll(batch.scroll_id.as_deref()).await;
        Ok(())
    }

    /// Deletes all matching entities, ignoring paging.
    ///
    /// Returns the number of deleted documents. Lifecycle hooks do not run.
    pub async fn delete(&self) -> IndexResult<u64> {
        let request = self.build_request(false);
        tracing::info!(
            entity_type = %self.descriptor.type_name(),
            query = %self.to_string_redacted(true),
            "Deleting by query"
        );
        self.index
            .store()
            .delete_by_query(&request)
            .await
            .map_err(|e| self.handle("delete", e))
    }

    /// Renders the query, replacing constraint values with `?` if `skip_values`.
    pub fn to_string_redacted(&self, skip_values: bool) -> String {
        let mut out = self.descriptor.type_name().to_string();
        if !self.constraints.is_empty() {
            let rendered: Vec<_> = self
                .constraints
                .iter()
                .map(|c| c.render(skip_values))
                .collect();
            out.push_str(" WHERE ");
            out.push_str(&rendered.join(" AND "));
        }
        if self.random_seed.is_some() {
            out.push_str(" ORDER BY RANDOM");
        } else if !self.orders.is_empty() {
            let orders: Vec<_> = self
                .orders
                .iter()
                .map(|o| match o.direction {
                    SortDirection::Ascending => format!("{} ASC", o.field),
                    SortDirection::Descending => format!("{} DESC", o.field),
                })
                .collect();
            out.push_str(" ORDER BY ");
            out.push_str(&orders.join(", "));
        }
        let start = self.effective_start();
        if start > 0 {
            out.push_str(&format!(" START {}", start));
        }
        if let Some(limit) = self.limit {
            out.push_str(&format!(" LIMIT {}", limit));
        }
        out
    }

    fn page_size(&self) -> usize {
        let config = self.index.config();
        self.limit
            .unwrap_or(config.default_page_size)
            .clamp(1, config.max_result_window.max(1))
    }

    /// Number of results a list query fetches from `from` on. Searches may not
    /// reach past `max_result_window`.
    fn window_size(&self, from: usize) -> usize {
        let remaining = self.index.config().max_result_window.saturating_sub(from);
        let requested = match (self.limit, self.page) {
            (Some(limit), _) => limit,
            (None, Some(_)) => self.page_size(),
            (None, None) => remaining,
        };
        requested.min(remaining)
    }

    fn effective_start(&self) -> usize {
        match self.page {
            Some(page) => (page - 1).saturating_mul(self.page_size()),
            None => self.start,
        }
    }

    fn physical_index(&self) -> String {
        let logical = self
            .index_override
            .as_deref()
            .unwrap_or(self.descriptor.index());
        self.index
            .config()
            .physical_index(logical, self.descriptor.type_name())
    }

    pub(crate) fn build_request(&self, with_facets: bool) -> SearchRequest {
        let (scoring, filters): (Vec<_>, Vec<_>) = self
            .constraints
            .iter()
            .cloned()
            .partition(Constraint::is_scoring);
        let query = match scoring.len() {
            0 => None,
            1 => scoring.into_iter().next(),
            _ => Some(Constraint::and(scoring)),
        };

        if self.descriptor.has_routing() && self.routing.is_none() {
            tracing::debug!(
                entity_type = %self.descriptor.type_name(),
                "Querying routed type without routing"
            );
        }

        let mut request = SearchRequest::new(self.physical_index());
        request.routing = self.routing.clone();
        request.query = query;
        request.filters = filters;
        request.sort = self.orders.clone();
        request.random_seed = self.random_seed;
        request.from = self.effective_start();
        request.primary = self.primary;
        if with_facets {
            request.facets = self
                .facets
                .iter()
                .map(|f| FacetRequest {
                    field: f.field().to_string(),
                    size: FACET_SIZE,
                })
                .collect();
        }
        request
    }

    async fn search(
        &self,
        operation: &'static str,
        request: &SearchRequest,
    ) -> IndexResult<SearchResponse> {
        let started = Instant::now();
        let result = self.index.store().search(request).await;
        let elapsed = started.elapsed();
        self.index.metrics().record_query(elapsed);
        if elapsed > Duration::from_secs(1) {
            tracing::warn!(
                query = %self.to_string_redacted(true),
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow query"
            );
        } else {
            tracing::debug!(
                query = %self.to_string_redacted(true),
                elapsed_ms = elapsed.as_millis() as u64,
                "Executed query"
            );
        }
        result.map_err(|e| self.handle(operation, e))
    }

    fn read(&self, doc: StoredDocument) -> IndexResult<E> {
        self.descriptor.read_source(&doc.id, doc.version, doc.source)
    }

    fn read_all(&self, hits: Vec<StoredDocument>, operation: &'static str) -> IndexResult<Vec<E>> {
        hits.into_iter()
            .map(|doc| self.read(doc))
            .collect::<IndexResult<Vec<_>>>()
            .map_err(|e| self.handle(operation, e))
    }

    async fn close_scroll(&self, scroll_id: Option<&str>) {
        if let Some(scroll_id) = scroll_id
            && let Err(e) = self.index.store().clear_scroll(scroll_id).await
        {
            tracing::debug!(error = %e, "Failed to clear scroll");
        }
    }

    fn handle(&self, operation: &'static str, error: IndexError) -> IndexError {
        HandledError::wrap(operation, self.descriptor.type_name(), "-", error)
    }
}

impl<E: Entity> fmt::Display for Query<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_redacted(false))
    }
}

impl<E: Entity> fmt::Debug for Query<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("type", &self.descriptor.type_name())
            .field("query", &self.to_string_redacted(true))
            .finish()
    }
}

fn split_values(values: &str) -> Vec<String> {
    values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_values() {
        assert_eq!(split_values(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_values(" , ").is_empty());
    }
}
