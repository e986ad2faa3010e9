//! Storage for jars and their captured requests
//!
//! Both stores are synchronous and never hold a lock across an await point.
//! The service composes them with the subscription registry; any backend
//! implementing these traits can be swapped in without touching either.

mod jar;
mod request;

use std::sync::Arc;

pub use jar::InMemoryJarStore;
pub use request::InMemoryRequestStore;

use crate::id::{JarId, RequestId};
use crate::model::{CapturedRequest, Jar};
use crate::Result;

/// Maximum attempts to find an unused jar ID before giving up
pub const MAX_ID_ATTEMPTS: usize = 8;

/// Owner of jar metadata
pub trait JarStore: Send + Sync {
    /// Create a jar with a fresh ID
    ///
    /// # Errors
    ///
    /// Returns `Internal` if no unused ID could be generated
    fn create(&self, name: &str) -> Result<JarId>;

    /// Fetch a jar
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` if the jar does not exist
    fn get(&self, jar_id: &JarId) -> Result<Jar>;

    /// Snapshot of every jar, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read
    fn list(&self) -> Result<Vec<Jar>>;

    /// Remove a jar; removing an absent jar is not an error
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be written
    fn delete(&self, jar_id: &JarId) -> Result<()>;
}

/// Owner of the ordered request sequence of every registered jar
pub trait RequestStore: Send + Sync {
    /// Start an empty sequence for a jar; registering twice is a no-op
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be written
    fn register_jar(&self, jar_id: &JarId) -> Result<()>;

    /// Append a request to the jar's sequence
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` if the jar was never registered or was deleted
    fn create_request(&self, jar_id: &JarId, request: Arc<CapturedRequest>) -> Result<()>;

    /// Fetch one request
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` or `RequestNotFound`
    fn get(&self, jar_id: &JarId, request_id: &RequestId) -> Result<Arc<CapturedRequest>>;

    /// Snapshot of the jar's requests in capture order
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` if the jar is not registered
    fn list(&self, jar_id: &JarId) -> Result<Vec<Arc<CapturedRequest>>>;

    /// Remove one request; an absent request ID is silently ignored
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` if the jar is not registered
    fn delete_one(&self, jar_id: &JarId, request_id: &RequestId) -> Result<()>;

    /// Drop the jar's sequence and its registration
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` if the jar is not registered
    fn delete_all_for_jar(&self, jar_id: &JarId) -> Result<()>;
}
