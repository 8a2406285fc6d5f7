//! Error types for airtrack-core

use thiserror::Error;

use crate::element::{ElementId, ElementType, FieldId};

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for airtrack-core
#[derive(Error, Debug)]
pub enum Error {
    /// An accessor or operator was invoked against an element of the wrong kind.
    #[error("can't {operation} on {found}")]
    TypeMismatch {
        /// Operation that was attempted (e.g. "get int64_t", "insert into map").
        operation: &'static str,
        /// Actual kind of the element.
        found: ElementType,
    },

    /// Link/unlink bookkeeping was violated by the caller.
    #[error("Ownership violation: {0}")]
    Ownership(#[from] OwnershipError),

    /// No field has been registered under this id.
    #[error("unknown field id {0}")]
    UnknownField(FieldId),

    /// No field has been registered under this name.
    #[error("unknown field name `{0}`")]
    UnknownFieldName(String),

    /// A name was re-registered with a different kind.
    #[error("field `{name}` already registered as {registered}, not {requested}")]
    FieldKindConflict {
        /// Dotted field name.
        name: String,
        /// Kind the name was first registered with.
        registered: ElementType,
        /// Kind requested by the conflicting registration.
        requested: ElementType,
    },

    /// Persisted input could not be turned back into a tree.
    #[error("Import error: {0}")]
    Import(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a [`Error::TypeMismatch`].
    #[must_use]
    pub fn mismatch(operation: &'static str, found: ElementType) -> Self {
        Self::TypeMismatch { operation, found }
    }

    /// Whether this error is a kind mismatch.
    #[must_use]
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. })
    }

    /// Whether this error is an ownership violation.
    #[must_use]
    pub fn is_ownership_violation(&self) -> bool {
        matches!(self, Self::Ownership(_))
    }
}

/// Violations of the shared-ownership contract of the element store.
///
/// All of these indicate a caller bug; none are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OwnershipError {
    /// Destroy was requested while containers still hold the element.
    #[error("destroying element {id} with non-zero reference count ({refcount})")]
    DestroyReferenced {
        /// Element that was to be destroyed.
        id: ElementId,
        /// Number of containers still holding it.
        refcount: u32,
    },

    /// Sequence removal past the end.
    #[error("vector index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// Requested position.
        index: usize,
        /// Sequence length.
        len: usize,
    },

    /// The handle refers to an element that no longer exists.
    #[error("element {0} does not exist")]
    Dangling(ElementId),

    /// Inserting the child would make the parent reachable from itself.
    #[error("inserting {child} into {parent} would create a cycle")]
    Cycle {
        /// Container receiving the child.
        parent: ElementId,
        /// Child that already reaches the parent.
        child: ElementId,
    },

    /// Id-keyed maps can only hold elements that carry a field id.
    #[error("element {0} has no field id and can't be keyed into a map")]
    AnonymousMapChild(ElementId),

    /// Unlink was requested for an element no container holds.
    #[error("unlinking element {0} with zero reference count")]
    RefcountUnderflow(ElementId),

    /// An element's refcount disagrees with the containers holding it.
    #[error("element {id} has refcount {refcount} but {holders} container edges")]
    RefcountMismatch {
        /// Element being audited.
        id: ElementId,
        /// Recorded reference count.
        refcount: u32,
        /// Edges actually pointing at it.
        holders: u32,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config file {path}: {message}")]
    ReadFailed {
        /// Path that was read
        path: String,
        /// Underlying failure
        message: String,
    },

    /// TOML could not be parsed
    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    /// Configuration could not be written back out
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    /// Parsed configuration is not usable
    #[error("Invalid config value for {field}: {message}")]
    InvalidValue {
        /// Offending key
        field: &'static str,
        /// Why it was rejected
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_mismatch_message_names_operation_and_kind() {
        let err = Error::mismatch("increment", ElementType::String);
        assert_eq!(err.to_string(), "can't increment on string");
        assert!(err.is_type_mismatch());
        assert!(!err.is_ownership_violation());
    }

    #[test]
    fn ownership_error_converts() {
        let err: Error = OwnershipError::IndexOutOfRange { index: 7, len: 3 }.into();
        assert!(err.is_ownership_violation());
        assert!(err.to_string().contains("index 7 out of range (len 3)"));
    }

    #[test]
    fn destroy_referenced_message_includes_refcount() {
        let err = OwnershipError::DestroyReferenced {
            id: ElementId::new(4, 1),
            refcount: 2,
        };
        assert!(err.to_string().contains("non-zero reference count (2)"));
    }

    #[test]
    fn kind_conflict_message() {
        let err = Error::FieldKindConflict {
            name: "airtrack.common.rrd.last_time".to_string(),
            registered: ElementType::UInt64,
            requested: ElementType::Int32,
        };
        let msg = err.to_string();
        assert!(msg.contains("uint64_t"));
        assert!(msg.contains("int32_t"));
    }

    #[test]
    fn config_error_converts() {
        let err: Error = ConfigError::ParseFailed("bad".to_string()).into();
        assert!(matches!(err, Error::Config(_)));
    }
}
