//! Error types for jitload operations.

use std::fmt;

/// Result alias used throughout jitload.
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type for all jitload operations.
#[derive(Debug)]
pub enum Error {
    /// Query execution errors, propagated unchanged from the fetcher.
    Query(QueryError),
    /// Schema registry misuse (unknown entity or association).
    Metadata(MetadataError),
    /// Serialization/deserialization errors.
    Serde(String),
    /// Custom error with message.
    Custom(String),
}

/// An error reported by the underlying query execution layer.
///
/// jitload has no recovery policy of its own: these propagate to the caller
/// unchanged, with no retry.
#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in the generated query
    Syntax,
    /// Constraint violation
    Constraint,
    /// Table or column not found
    NotFound,
    /// Statement timeout
    Timeout,
    /// Other database error
    Database,
}

/// Schema registry misuse detected at declaration or lookup time.
///
/// These indicate a programming error (an aggregate declared against an
/// association the entity does not have, a fetch against an unregistered
/// entity) rather than a load-time failure.
#[derive(Debug)]
pub struct MetadataError {
    pub kind: MetadataErrorKind,
    pub entity: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataErrorKind {
    /// Entity is not registered in the schema
    UnknownEntity,
    /// Association is not declared on the entity (or any STI ancestor)
    UnknownAssociation,
}

impl Error {
    /// Build a query error with the given kind and message.
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Build an unknown-entity metadata error.
    pub fn unknown_entity(entity: impl Into<String>) -> Self {
        Error::Metadata(MetadataError {
            kind: MetadataErrorKind::UnknownEntity,
            entity: entity.into(),
            name: None,
        })
    }

    /// Build an unknown-association metadata error.
    pub fn unknown_association(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Error::Metadata(MetadataError {
            kind: MetadataErrorKind::UnknownAssociation,
            entity: entity.into(),
            name: Some(name.into()),
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Query(e) => write!(f, "query error: {}", e.message),
            Error::Metadata(e) => match (&e.kind, &e.name) {
                (MetadataErrorKind::UnknownEntity, _) => {
                    write!(f, "unknown entity '{}'", e.entity)
                }
                (MetadataErrorKind::UnknownAssociation, Some(name)) => {
                    write!(f, "entity '{}' has no association '{}'", e.entity, name)
                }
                (MetadataErrorKind::UnknownAssociation, None) => {
                    write!(f, "entity '{}' has no such association", e.entity)
                }
            },
            Error::Serde(msg) => write!(f, "serialization error: {msg}"),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_ref()
                .map(|s| s.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
