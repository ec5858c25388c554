//! Paged query results.

use std::time::Duration;

use url::form_urlencoded;

use crate::query::{Facet, LazyFacets};

/// Query-string parameter holding the full-text query.
pub const QUERY_PARAM: &str = "query";

/// Query-string parameter holding the start offset.
pub const START_PARAM: &str = "start";

/// One page of query results.
///
/// Offsets are 0-based. Facet items are computed on the first call to
/// [`Page::facets`] and kept for the lifetime of the page.
#[derive(Debug)]
pub struct Page<E> {
    query: String,
    start: usize,
    end: usize,
    items: Vec<E>,
    has_more: bool,
    duration: Duration,
    page_size: usize,
    facets: LazyFacets,
}

impl<E> Page<E> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        query: String,
        start: usize,
        end: usize,
        items: Vec<E>,
        has_more: bool,
        duration: Duration,
        page_size: usize,
        facets: LazyFacets,
    ) -> Self {
        Self {
            query,
            start,
            end,
            items,
            has_more,
            duration,
            page_size,
            facets,
        }
    }

    /// Returns the entities of this page.
    pub fn items(&self) -> &[E] {
        &self.items
    }

    /// Consumes the page, returning its entities.
    pub fn into_items(self) -> Vec<E> {
        self.items
    }

    /// Returns the full-text query the page was computed for.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Offset of the first entity.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Offset after the last entity.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Returns the page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns true if a next page exists.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Returns true if a previous page exists.
    pub fn has_less(&self) -> bool {
        self.start > 0
    }

    /// Offset of the previous page.
    pub fn previous_start(&self) -> usize {
        self.start.saturating_sub(self.page_size)
    }

    /// Offset of the next page.
    pub fn next_start(&self) -> usize {
        self.start + self.page_size
    }

    /// Time the query took.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Human-readable range like `"26 - 50"`, or `"0"` for an empty page.
    pub fn range(&self) -> String {
        if self.items.is_empty() {
            "0".to_string()
        } else {
            format!("{} - {}", self.start + 1, self.end)
        }
    }

    /// Returns the facets, computing their items on first call.
    pub fn facets(&self) -> &[Facet] {
        self.facets.get()
    }

    /// Returns true if any facet has items.
    pub fn has_facets(&self) -> bool {
        self.facets().iter().any(Facet::has_items)
    }

    /// Builds a query string selecting `value` for `field`.
    ///
    /// Other active facet selections and the full-text query are kept. An empty
    /// `value` removes `field`. Unless `reset_start` is set, the current offset
    /// is kept.
    pub fn create_query_string(&self, field: &str, value: &str, reset_start: bool) -> String {
        let mut out = form_urlencoded::Serializer::new(String::new());
        let mut field_found = false;

        for facet in self.facets.templates() {
            if facet.field() == field {
                field_found = true;
                if !value.is_empty() {
                    out.append_pair(field, value);
                }
            } else if let Some(active) = facet.value() {
                out.append_pair(facet.field(), active);
            }
        }

        let special = field == QUERY_PARAM || field == START_PARAM;
        if !field_found && !special && !value.is_empty() {
            out.append_pair(field, value);
        }

        if field == START_PARAM {
            if !value.is_empty() {
                out.append_pair(START_PARAM, value);
            }
        } else if !reset_start && self.start > 0 {
            out.append_pair(START_PARAM, &self.start.to_string());
        }

        if field == QUERY_PARAM {
            if !value.is_empty() {
                out.append_pair(QUERY_PARAM, value);
            }
        } else if !self.query.is_empty() {
            out.append_pair(QUERY_PARAM, &self.query);
        }

        out.finish()
    }
}
