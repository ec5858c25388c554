//! Term facets.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::core::FacetBuckets;

/// Maps a stored facet term to its display label.
pub type Translator = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// One distinct value of a facet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetItem {
    /// Stored term.
    pub key: String,
    /// Display label.
    pub title: String,
    /// Number of matching documents.
    pub count: u64,
    /// True if this term is the facet's selected value.
    pub active: bool,
}

/// A term aggregation that doubles as a filter once a value is selected.
#[derive(Clone)]
pub struct Facet {
    field: String,
    value: Option<String>,
    translator: Option<Translator>,
    items: Vec<FacetItem>,
}

impl fmt::Debug for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facet")
            .field("field", &self.field)
            .field("value", &self.value)
            .field("translated", &self.translator.is_some())
            .field("items", &self.items)
            .finish()
    }
}

impl Facet {
    /// Creates an empty facet for `field`.
    pub fn new(field: impl Into<String>, value: Option<String>, translator: Option<Translator>) -> Self {
        Self {
            field: field.into(),
            value: value.filter(|v| !v.is_empty()),
            translator,
            items: Vec::new(),
        }
    }

    /// Returns the aggregated field.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the selected value, if any.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Returns true if a value is selected.
    pub fn is_active(&self) -> bool {
        self.value.is_some()
    }

    /// Returns the computed items.
    pub fn items(&self) -> &[FacetItem] {
        &self.items
    }

    /// Returns true if the facet has at least one item.
    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    /// Returns a copy of this facet holding the items of `buckets`.
    ///
    /// A selected value missing from the buckets is kept as an item with a
    /// zero count so it can still be toggled off.
    pub(crate) fn filled(&self, buckets: Option<&FacetBuckets>) -> Facet {
        let mut items: Vec<FacetItem> = buckets
            .map(|b| b.buckets.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|(key, count)| self.item(key, *count))
            .collect();
        if let Some(value) = &self.value
            && !items.iter().any(|item| &item.key == value)
        {
            items.push(self.item(value, 0));
        }
        Facet {
            items,
            ..self.clone()
        }
    }

    fn item(&self, key: &str, count: u64) -> FacetItem {
        FacetItem {
            key: key.to_string(),
            title: self
                .translator
                .as_ref()
                .map(|t| t(key))
                .unwrap_or_else(|| key.to_string()),
            count,
            active: self.value.as_deref() == Some(key),
        }
    }
}
