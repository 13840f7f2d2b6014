//! Error types for the VLESS user registry

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed backend error kept as the source of a storage failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in the user registry
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Storage Taxonomy
    // =========================================================================
    /// Credential payload is not of the expected account kind
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Record absent from the store
    #[error("User not found: {0}")]
    NotFound(String),

    /// Backing store unreachable or connection dropped
    #[error("Storage connection error: {context}")]
    Connection {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Uniqueness constraint violated on insert
    #[error("User already exists: {context}")]
    DuplicateKey {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Generic backend failure
    #[error("Storage query error: {context}")]
    Query {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Storage type discriminator names no known backend
    #[error("Unsupported storage driver: {0}")]
    UnsupportedDriver(String),

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON encode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`], used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Connection,
    DuplicateKey,
    Query,
    Other,
}

impl ErrorKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Connection => "connection",
            ErrorKind::DuplicateKey => "duplicate_key",
            ErrorKind::Query => "query",
            ErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Connection failure with a backend source
    pub fn connection(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Connection {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// Duplicate-key conflict with a backend source
    pub fn duplicate_key(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::DuplicateKey {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// Generic query failure with a backend source
    pub fn query(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Query {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Connection { .. } => ErrorKind::Connection,
            Error::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Error::Query { .. } => ErrorKind::Query,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    pub fn is_duplicate_key(&self) -> bool {
        self.kind() == ErrorKind::DuplicateKey
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        let err = Error::connection("db down", std::io::Error::other("refused"));
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.is_connection_error());
        assert!(!err.is_duplicate_key());

        let err = Error::DuplicateKey {
            context: "a@example.com".to_string(),
            source: None,
        };
        assert!(err.is_duplicate_key());

        assert!(Error::NotFound("x".to_string()).is_not_found());
        assert_eq!(Error::Config("bad".to_string()).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error as _;

        let err = Error::query("select failed", std::io::Error::other("boom"));
        assert_eq!(err.to_string(), "Storage query error: select failed");
        assert_eq!(err.source().map(|s| s.to_string()), Some("boom".to_string()));
    }

    #[test]
    fn test_io_error_conversion() {
        fn write_failed() -> Result<()> {
            let write: std::io::Result<()> = Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdout closed",
            ));
            write?;
            Ok(())
        }

        let err = write_failed().unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::BrokenPipe));
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(err.to_string(), "I/O error: stdout closed");
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ErrorKind::DuplicateKey.to_string(), "duplicate_key");
        assert_eq!(ErrorKind::Connection.as_str(), "connection");
    }
}
