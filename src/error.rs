//! Custom error types for archivist
//!
//! Errors carry a small closed set of semantic kinds. Adapters wrap
//! transient infrastructure failures into `Temporary` at the boundary;
//! everything else maps to an internal error at the edge.

use thiserror::Error;

/// Main error type for archivist operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("{operation}: invalid input: {message}")]
    InvalidInput { operation: String, message: String },

    #[error("{operation}: unauthorized: {message}")]
    Unauthorized { operation: String, message: String },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("{operation}: temporary failure: {source}")]
    Temporary {
        operation: String,
        #[source]
        source: Box<Error>,
    },

    #[error("circuit open for operation {0}")]
    CircuitOpen(String),

    #[error("operation canceled or deadline exceeded")]
    Canceled,

    #[error("{operation} status {status}: {body}")]
    HttpStatus {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("qdrant error: {0}")]
    Qdrant(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for archivist
pub type Result<T> = std::result::Result<T, Error>;

/// Semantic error kinds recognised at service boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Unauthorized,
    DocumentNotFound,
    Temporary,
}

impl Error {
    pub fn invalid_input(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidInput {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Unauthorized {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Wrap an error as a temporary failure, preserving the cause.
    /// An error that is already `Temporary` is passed through unchanged.
    pub fn temporary(operation: impl Into<String>, source: Error) -> Self {
        if matches!(source, Error::Temporary { .. }) {
            return source;
        }
        Error::Temporary {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Check whether this error is of the given semantic kind, walking
    /// wrapped causes so kinds produced deep in a pipeline stay visible.
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        let direct = match (self, kind) {
            (Error::InvalidInput { .. }, ErrorKind::InvalidInput) => true,
            (Error::Unauthorized { .. }, ErrorKind::Unauthorized) => true,
            (Error::DocumentNotFound(_), ErrorKind::DocumentNotFound) => true,
            (Error::Temporary { .. }, ErrorKind::Temporary) => true,
            _ => false,
        };
        if direct {
            return true;
        }
        match self {
            Error::Temporary { source, .. } => source.is_kind(kind),
            _ => false,
        }
    }

    /// The fixed boundary mapping from error kind to HTTP status code.
    pub fn http_status(&self) -> u16 {
        if self.is_kind(ErrorKind::InvalidInput) {
            400
        } else if self.is_kind(ErrorKind::Unauthorized) {
            401
        } else if self.is_kind(ErrorKind::DocumentNotFound) {
            404
        } else if self.is_kind(ErrorKind::Temporary) {
            503
        } else {
            500
        }
    }
}
