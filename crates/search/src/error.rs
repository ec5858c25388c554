//! Error types for the index layer.
//!
//! Errors are split by category. Only [`ConcurrencyError::OptimisticLock`] is an
//! expected, recoverable condition; every other unexpected failure reaching a
//! caller of [`Index`](crate::Index) is wrapped into a [`HandledError`] that
//! carries the operation, entity type and id it happened in.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all index operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Concurrency and versioning errors
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Entity state and validation errors
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Query construction errors
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Document store errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A failure that has been logged and is fatal to the calling operation
    #[error(transparent)]
    Handled(#[from] HandledError),
}

impl IndexError {
    /// Returns true if this error is an optimistic lock failure.
    pub fn is_optimistic_lock(&self) -> bool {
        matches!(
            self,
            IndexError::Concurrency(ConcurrencyError::OptimisticLock { .. })
        )
    }

    /// Returns true if this error has already been wrapped and logged.
    pub fn is_handled(&self) -> bool {
        matches!(self, IndexError::Handled(_))
    }
}

/// Errors related to concurrency control.
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// The stored document changed since the entity was read.
    #[error("optimistic lock failure: {entity_type}/{id} was modified (expected version {expected_version})")]
    OptimisticLock {
        entity_type: String,
        id: String,
        expected_version: i64,
        actual_version: Option<i64>,
    },
}

/// Errors related to entity state.
#[derive(Error, Debug)]
pub enum EntityError {
    /// A document with the computed id already exists.
    #[error("entity already exists: {entity_type}/{id}")]
    AlreadyExists { entity_type: String, id: String },

    /// The entity is not in a state that permits the operation.
    #[error("invalid entity state for {entity_type}/{id}: {message}")]
    InvalidState {
        entity_type: String,
        id: String,
        message: String,
    },

    /// A save or delete check rejected the entity.
    #[error("{entity_type} rejected: {message}")]
    CheckFailed {
        entity_type: String,
        message: String,
    },

    /// No descriptor is registered for the requested type name.
    #[error("unknown entity type: {type_name}")]
    UnknownType { type_name: String },
}

/// Errors related to query construction.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The field is not declared in the entity's descriptor.
    #[error("unknown field '{field}' for {entity_type}")]
    UnknownField { entity_type: String, field: String },

    /// A constraint value could not be used.
    #[error("invalid value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// The scroll context expired or was cleared.
    #[error("scroll context lost: {scroll_id}")]
    ScrollLost { scroll_id: String },
}

/// Errors originating from the document store.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The store is currently unavailable.
    #[error("store unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Connection to the store failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// The requested index does not exist.
    #[error("index not found: {index}")]
    IndexNotFound { index: String },

    /// Internal store error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// A logged failure carrying the context it happened in.
#[derive(Error, Debug)]
#[error("{operation} failed for {entity_type}/{id}: {source}")]
pub struct HandledError {
    pub operation: &'static str,
    pub entity_type: String,
    pub id: String,
    #[source]
    pub source: Box<IndexError>,
}

impl HandledError {
    /// Wraps `source` and logs it with full context.
    pub fn wrap(
        operation: &'static str,
        entity_type: impl Into<String>,
        id: impl Into<String>,
        source: IndexError,
    ) -> IndexError {
        if let IndexError::Handled(inner) = source {
            return IndexError::Handled(inner);
        }
        let handled = HandledError {
            operation,
            entity_type: entity_type.into(),
            id: id.into(),
            source: Box::new(source),
        };
        tracing::error!(
            operation = handled.operation,
            entity_type = %handled.entity_type,
            id = %handled.id,
            error = %handled.source,
            "Index operation failed"
        );
        IndexError::Handled(handled)
    }
}

/// Result type alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "elasticsearch")]
impl From<elasticsearch::Error> for IndexError {
    fn from(err: elasticsearch::Error) -> Self {
        IndexError::Backend(BackendError::Internal {
            backend_name: "elasticsearch".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_error() -> IndexError {
        ConcurrencyError::OptimisticLock {
            entity_type: "Order".to_string(),
            id: "42".to_string(),
            expected_version: 3,
            actual_version: Some(4),
        }
        .into()
    }

    #[test]
    fn test_optimistic_lock_display() {
        assert_eq!(
            lock_error().to_string(),
            "optimistic lock failure: Order/42 was modified (expected version 3)"
        );
        assert!(lock_error().is_optimistic_lock());
    }

    #[test]
    fn test_wrap_adds_context() {
        let err = HandledError::wrap("update", "Order", "42", lock_error());
        assert!(err.is_handled());
        assert!(!err.is_optimistic_lock());
        assert!(err.to_string().starts_with("update failed for Order/42"));
    }

    #[test]
    fn test_wrap_is_idempotent() {
        let once = HandledError::wrap("find", "Order", "1", lock_error());
        let twice = HandledError::wrap("delete", "Order", "2", once);
        match twice {
            IndexError::Handled(h) => assert_eq!(h.operation, "find"),
            other => panic!("Expected handled error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_serde_error() {
        let err: IndexError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(
            err,
            IndexError::Backend(BackendError::SerializationError { .. })
        ));
    }
}
