//! Query results.

use std::sync::OnceLock;
use std::time::Duration;

use crate::core::FacetBuckets;

use super::facet::Facet;

/// Facets whose items are materialized on first access.
#[derive(Debug, Default)]
pub(crate) struct LazyFacets {
    templates: Vec<Facet>,
    buckets: Vec<FacetBuckets>,
    computed: OnceLock<Vec<Facet>>,
}

impl LazyFacets {
    pub(crate) fn new(templates: Vec<Facet>, buckets: Vec<FacetBuckets>) -> Self {
        Self {
            templates,
            buckets,
            computed: OnceLock::new(),
        }
    }

    pub(crate) fn get(&self) -> &[Facet] {
        self.computed.get_or_init(|| {
            self.templates
                .iter()
                .map(|facet| {
                    let buckets = self.buckets.iter().find(|b| b.field == facet.field());
                    facet.filled(buckets)
                })
                .collect()
        })
    }

    pub(crate) fn is_computed(&self) -> bool {
        self.computed.get().is_some()
    }

    pub(crate) fn templates(&self) -> &[Facet] {
        &self.templates
    }
}

/// A slice of query results together with the facets computed for them.
#[derive(Debug)]
pub struct ResultList<E> {
    items: Vec<E>,
    total: u64,
    duration: Duration,
    facets: LazyFacets,
}

impl<E> ResultList<E> {
    pub(crate) fn new(items: Vec<E>, total: u64, duration: Duration, facets: LazyFacets) -> Self {
        Self {
            items,
            total,
            duration,
            facets,
        }
    }

    /// Returns the entities of this slice.
    pub fn items(&self) -> &[E] {
        &self.items
    }

    /// Consumes the list, returning its entities.
    pub fn into_items(self) -> Vec<E> {
        self.items
    }

    /// Returns the number of entities in this slice.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of matches, ignoring paging.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Time the query took.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns the facets, computing their items on first call.
    pub fn facets(&self) -> &[Facet] {
        self.facets.get()
    }

    /// Iterates the entities.
    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.items.iter()
    }
}

impl<E> IntoIterator for ResultList<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, E> IntoIterator for &'a ResultList<E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
