pub mod pretty;

use std::{fmt, io};
use thiserror::Error;

/// Logical identifier for a page. Page numbers are 1-based; 0 is reserved
/// and means "no page" wherever a page reference may be absent.
pub type PageNumber = u32;

/// The reserved "no page" sentinel used in page headers.
pub const NO_PAGE: PageNumber = 0;

/// Root page of the system catalog table.
pub const SCHEMA_ROOT_PAGE: PageNumber = 1;

/// Fixed page size in bytes. The unit of I/O, caching, and journaling.
pub const PAGE_SIZE: usize = 4096;

/// Bytes reserved at the front of the database file before page 1. Holds
/// the current max allocated page counter as a little-endian u32.
pub const FILE_HEADER_SIZE: usize = 4;

/// Database file name used when the embedder passes an empty string.
pub const DEFAULT_DB_NAME: &str = "cdb";

/// Classification of a failed storage operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageErrorKind {
    IoError,
    NotFound,
    PermissionDenied,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError => write!(f, "io error"),
            Self::NotFound => write!(f, "not found"),
            Self::PermissionDenied => write!(f, "permission denied"),
        }
    }
}

/// A failed read, write, or journal operation in the storage layer.
/// Fatal to the enclosing transaction.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::IoError,
        };
        Self::new(kind, err.to_string())
    }
}

/// Canonical error type shared across the engine's subsystems.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("transaction misuse: {0}")]
    TransactionMisuse(String),
    /// The live catalog no longer matches the version the plan was compiled
    /// against. Recoverable: the caller re-plans and retries.
    #[error("schema changed: plan expected version {expected}, catalog is {actual}")]
    VersionChanged { expected: String, actual: String },
    #[error("plan: {0}")]
    Plan(String),
    #[error("codec: {0}")]
    Codec(String),
    #[error("parse: {0}")]
    Parser(String),
    #[error("planner: {0}")]
    Planner(String),
}

impl From<io::Error> for DbError {
    fn from(err: io::Error) -> Self {
        DbError::Storage(err.into())
    }
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_storage_kinds() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = StorageError::from(not_found);
        assert_eq!(err.kind, StorageErrorKind::NotFound);

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "locked down");
        assert_eq!(
            StorageError::from(denied).kind,
            StorageErrorKind::PermissionDenied
        );

        let other = io::Error::new(io::ErrorKind::UnexpectedEof, "short read");
        assert_eq!(StorageError::from(other).kind, StorageErrorKind::IoError);
    }

    #[test]
    fn version_changed_names_both_versions() {
        let err = DbError::VersionChanged {
            expected: "3".into(),
            actual: "4".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3"));
        assert!(msg.contains("4"));
    }
}
