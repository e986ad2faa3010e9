//! Error types for Request Jar

use std::io;
use thiserror::Error;

use crate::id::{JarId, RequestId};

/// Result type for Request Jar operations
pub type Result<T> = std::result::Result<T, JarError>;

/// Coarse error classification used at the HTTP boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Jar or request absent
    NotFound,
    /// Malformed client input
    BadRequest,
    /// Everything else
    Internal,
}

/// Errors that can occur in Request Jar
#[derive(Debug, Error)]
pub enum JarError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Jar is not registered
    #[error("jar not found: {0}")]
    JarNotFound(JarId),

    /// Request is not stored under the jar
    #[error("request {request_id} not found in jar {jar_id}")]
    RequestNotFound {
        /// Owning jar
        jar_id: JarId,
        /// Missing request
        request_id: RequestId,
    },

    /// Malformed client input
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal failure (ID generation, encoding)
    #[error("internal error: {0}")]
    Internal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A store error annotated with the operation and jar it came from
    #[error("{operation} failed for jar {jar_id}: {source}")]
    Context {
        /// Operation that failed
        operation: &'static str,
        /// Jar the operation targeted
        jar_id: JarId,
        /// Underlying error
        #[source]
        source: Box<JarError>,
    },

    /// One or more jar deletion steps failed; every step was still attempted
    #[error("cleanup of jar {jar_id} incomplete: {}", join_failures(.failures))]
    CleanupFailed {
        /// Jar being deleted
        jar_id: JarId,
        /// Every step that failed, in execution order
        failures: Vec<JarError>,
    },
}

impl JarError {
    /// Classify the error, looking through context wrappers
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::JarNotFound(_) | Self::RequestNotFound { .. } => ErrorKind::NotFound,
            Self::BadRequest(_) | Self::Json(_) => ErrorKind::BadRequest,
            Self::Context { source, .. } => source.kind(),
            _ => ErrorKind::Internal,
        }
    }

    /// Whether this is a not-found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Wrap with the operation and jar it came from
    #[must_use]
    pub fn context(self, operation: &'static str, jar_id: &JarId) -> Self {
        Self::Context {
            operation,
            jar_id: jar_id.clone(),
            source: Box::new(self),
        }
    }
}

/// Attach operation context to a store result
pub trait ResultExt<T> {
    /// Wrap the error (if any) with the operation and jar it came from
    ///
    /// # Errors
    ///
    /// Returns the wrapped error when `self` is an error
    fn context(self, operation: &'static str, jar_id: &JarId) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, operation: &'static str, jar_id: &JarId) -> Result<T> {
        self.map_err(|e| e.context(operation, jar_id))
    }
}

fn join_failures(failures: &[JarError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
