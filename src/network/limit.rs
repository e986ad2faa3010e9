//! Bound on concurrently served connections

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps the number of connections served at once
///
/// Cloning shares the same budget.
#[derive(Debug, Clone)]
pub struct ConnectionLimit {
    permits: Arc<Semaphore>,
    max_connections: usize,
}

impl ConnectionLimit {
    /// Create a limit; zero is raised to one
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Claim a slot for a new connection, `None` when the limit is reached
    ///
    /// The slot is released when the returned permit is dropped.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).try_acquire_owned().ok()
    }

    /// Connections currently holding a slot
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.permits.available_permits()
    }

    /// Configured maximum
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}
