//! Error types for the QuartzDB engine.

use std::fmt;
use std::io;

/// Engine-wide result alias
pub type Result<T> = std::result::Result<T, QuartzError>;

/// Status class of an error, used by callers (the HTTP layer) to map
/// engine failures onto response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Named collection, document, or index absent (404)
    NotFound,
    /// Name or identifier collision (409)
    Conflict,
    /// Malformed query, pipeline, or update spec (400)
    BadRequest,
    /// I/O failure or broken invariant (500)
    Internal,
}

/// QuartzDB engine error
#[derive(Debug)]
pub enum QuartzError {
    /// Collection does not exist
    CollectionNotFound(String),
    /// Document does not exist in the collection
    DocumentNotFound(String),
    /// Index does not exist on the collection
    IndexNotFound(String),
    /// Collection name already taken
    CollectionExists(String),
    /// Document identifier already present in the collection
    DuplicateDocument(String),
    /// Rejected collection or field name
    InvalidName(String),
    /// Malformed filter or update specification
    InvalidQuery(String),
    /// Malformed aggregation stage or expression
    AggregationError(String),
    /// Pipeline stage name not recognized
    UnsupportedStage(String),
    /// Expression operator not recognized
    UnsupportedOperator(String),
    /// `$divide` with a zero divisor
    DivisionByZero,
    /// JSON (de)serialization failure
    Serialization(String),
    /// Filesystem failure
    Io(io::Error),
    /// Unexpected internal state
    Internal(String),
}

impl QuartzError {
    /// Status class for this error (see spec mapping in the HTTP layer).
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuartzError::CollectionNotFound(_)
            | QuartzError::DocumentNotFound(_)
            | QuartzError::IndexNotFound(_) => ErrorKind::NotFound,
            QuartzError::CollectionExists(_) | QuartzError::DuplicateDocument(_) => {
                ErrorKind::Conflict
            }
            QuartzError::InvalidName(_)
            | QuartzError::InvalidQuery(_)
            | QuartzError::AggregationError(_)
            | QuartzError::UnsupportedStage(_)
            | QuartzError::UnsupportedOperator(_)
            | QuartzError::DivisionByZero => ErrorKind::BadRequest,
            QuartzError::Serialization(_) | QuartzError::Io(_) | QuartzError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl fmt::Display for QuartzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuartzError::CollectionNotFound(name) => write!(f, "Collection not found: {}", name),
            QuartzError::DocumentNotFound(id) => write!(f, "Document not found: {}", id),
            QuartzError::IndexNotFound(name) => write!(f, "Index not found: {}", name),
            QuartzError::CollectionExists(name) => {
                write!(f, "Collection already exists: {}", name)
            }
            QuartzError::DuplicateDocument(id) => {
                write!(f, "Duplicate document identifier: {}", id)
            }
            QuartzError::InvalidName(msg) => write!(f, "Invalid name: {}", msg),
            QuartzError::InvalidQuery(msg) => write!(f, "Invalid query: {}", msg),
            QuartzError::AggregationError(msg) => write!(f, "Aggregation error: {}", msg),
            QuartzError::UnsupportedStage(name) => {
                write!(f, "Unsupported pipeline stage: {}", name)
            }
            QuartzError::UnsupportedOperator(name) => {
                write!(f, "Unsupported expression operator: {}", name)
            }
            QuartzError::DivisionByZero => write!(f, "Division by zero"),
            QuartzError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            QuartzError::Io(err) => write!(f, "I/O error: {}", err),
            QuartzError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for QuartzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QuartzError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for QuartzError {
    fn from(err: io::Error) -> Self {
        QuartzError::Io(err)
    }
}

impl From<serde_json::Error> for QuartzError {
    fn from(err: serde_json::Error) -> Self {
        QuartzError::Serialization(err.to_string())
    }
}
