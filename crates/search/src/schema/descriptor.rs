//! Declarative entity descriptors.
//!
//! A descriptor maps an entity type to a store type name, a logical index and
//! the per-field mapping rules. It also owns the conversion between entities
//! and document sources.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::error::{BackendError, IndexResult};
use crate::query::Translator;

use super::entity::{Entity, EntityMeta};

/// How a property is mapped in the store.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    /// Exact-match string.
    Keyword,
    /// Analyzed full-text string.
    Text,
    /// 64-bit integer.
    Long,
    /// Floating point number.
    Double,
    /// Boolean flag.
    Boolean,
    /// RFC 3339 timestamp or date.
    Date,
    /// Nested JSON stored verbatim and not indexed.
    Object,
    /// List of exact-match strings.
    KeywordList,
    /// Exact-match string limited to known constants with display labels.
    Enumeration(Vec<(String, String)>),
}

/// A mapped field of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    name: String,
    kind: PropertyKind,
    indexed: bool,
}

impl Property {
    /// Creates a property of the given kind.
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            indexed: true,
        }
    }

    /// Exact-match string property.
    pub fn keyword(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Keyword)
    }

    /// Analyzed text property.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Text)
    }

    /// Integer property.
    pub fn long(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Long)
    }

    /// Floating point property.
    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Double)
    }

    /// Boolean property.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Boolean)
    }

    /// Date property.
    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Date)
    }

    /// Unindexed object property.
    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Object)
    }

    /// List of keywords.
    pub fn keyword_list(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::KeywordList)
    }

    /// Enumeration property with `(constant, label)` pairs.
    pub fn enumeration<I, K, L>(name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, L)>,
        K: Into<String>,
        L: Into<String>,
    {
        Self::new(
            name,
            PropertyKind::Enumeration(
                labels
                    .into_iter()
                    .map(|(k, l)| (k.into(), l.into()))
                    .collect(),
            ),
        )
    }

    /// Stores the field without indexing it.
    pub fn not_indexed(mut self) -> Self {
        self.indexed = false;
        self
    }

    /// Returns the field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the mapping kind.
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    /// Returns whether the field is searchable.
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Returns the store mapping of this field.
    pub fn mapping(&self) -> Value {
        let mut mapping = match &self.kind {
            PropertyKind::Keyword | PropertyKind::KeywordList | PropertyKind::Enumeration(_) => {
                json!({ "type": "keyword" })
            }
            PropertyKind::Text => json!({ "type": "text", "analyzer": "standard" }),
            PropertyKind::Long => json!({ "type": "long" }),
            PropertyKind::Double => json!({ "type": "double" }),
            PropertyKind::Boolean => json!({ "type": "boolean" }),
            PropertyKind::Date => json!({
                "type": "date",
                "format": "strict_date_optional_time||epoch_millis"
            }),
            PropertyKind::Object => return json!({ "type": "object", "enabled": false }),
        };
        if !self.indexed {
            mapping["index"] = json!(false);
        }
        mapping
    }
}

/// Describes how an entity type is stored.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    type_name: String,
    index: String,
    routing: Option<String>,
    properties: Vec<Property>,
}

impl EntityDescriptor {
    /// Creates a descriptor for `type_name` stored in the logical `index`.
    pub fn new(type_name: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            index: index.into(),
            routing: None,
            properties: Vec::new(),
        }
    }

    /// Routes documents by the value of `field`.
    pub fn with_routing(mut self, field: impl Into<String>) -> Self {
        self.routing = Some(field.into());
        self
    }

    /// Declares a mapped property.
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Returns the store type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns the logical index name.
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Returns true if documents of this type are routed.
    pub fn has_routing(&self) -> bool {
        self.routing.is_some()
    }

    /// Returns the routing field, if any.
    pub fn routing_field(&self) -> Option<&str> {
        self.routing.as_deref()
    }

    /// Returns the declared properties.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Looks up a declared property by name.
    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Serializes the entity's fields into a document source.
    pub fn write_to<E: Entity>(&self, entity: &E) -> IndexResult<Map<String, Value>> {
        match serde_json::to_value(entity)? {
            Value::Object(source) => Ok(source),
            other => Err(BackendError::SerializationError {
                message: format!(
                    "{} must serialize to an object, got {}",
                    self.type_name, other
                ),
            }
            .into()),
        }
    }

    /// Builds an entity from a stored document.
    pub fn read_source<E: Entity>(
        &self,
        id: &str,
        version: i64,
        source: Map<String, Value>,
    ) -> IndexResult<E> {
        let mut entity: E = serde_json::from_value(Value::Object(source))?;
        *entity.meta_mut() = EntityMeta::stored(id, version);
        Ok(entity)
    }

    /// Extracts the routing key from a document source.
    pub fn routing_value(&self, source: &Map<String, Value>) -> Option<String> {
        let field = self.routing.as_deref()?;
        match source.get(field)? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Returns a label translator for enumeration properties.
    pub fn label_translator(&self, field: &str) -> Option<Translator> {
        match self.find_property(field)?.kind() {
            PropertyKind::Enumeration(labels) => {
                let labels: HashMap<String, String> = labels.iter().cloned().collect();
                Some(Arc::new(move |key: &str| {
                    labels.get(key).cloned().unwrap_or_else(|| key.to_string())
                }))
            }
            _ => None,
        }
    }

    /// Returns the store mapping for this type.
    pub fn create_mapping(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|p| (p.name.clone(), p.mapping()))
            .collect();

        let mut mapping = json!({
            "dynamic": true,
            "properties": properties,
        });
        if self.routing.is_some() {
            mapping["_routing"] = json!({ "required": true });
        }
        mapping
    }
}
