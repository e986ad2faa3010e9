//! Registry of live subscriptions keyed by jar

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::id::{JarId, SubscriberId};
use crate::model::CapturedRequest;

use super::{BroadcastReport, OverflowPolicy, DEFAULT_BUFFER_SIZE};

type Delivery = Arc<CapturedRequest>;
type SubscriberSet = HashMap<SubscriberId, mpsc::Sender<Delivery>>;

struct RegistryInner {
    jars: RwLock<HashMap<JarId, SubscriberSet>>,
    next_id: AtomicU64,
    buffer_size: usize,
    overflow: OverflowPolicy,
}

impl RegistryInner {
    fn remove(&self, jar_id: &JarId, id: SubscriberId) -> bool {
        let mut jars = self.jars.write();
        let Some(set) = jars.get_mut(jar_id) else {
            return false;
        };

        let removed = set.remove(&id).is_some();
        if set.is_empty() {
            jars.remove(jar_id);
        }
        removed
    }
}

/// Per-jar sets of subscriber channels
///
/// Cloning is cheap; clones share the same registrations.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(buffer_size: usize, overflow: OverflowPolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                jars: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer_size: buffer_size.max(1),
                overflow,
            }),
        }
    }

    /// Register a new subscriber for a jar
    ///
    /// The returned handle unregisters itself when dropped.
    #[must_use]
    pub fn subscribe(&self, jar_id: &JarId) -> Subscription {
        let id = SubscriberId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.inner.buffer_size);

        self.inner
            .jars
            .write()
            .entry(jar_id.clone())
            .or_default()
            .insert(id, sender);

        debug!("Subscriber {} added to jar {}", id, jar_id);

        Subscription {
            jar_id: jar_id.clone(),
            id,
            receiver,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber; returns whether it was still registered
    pub fn unsubscribe(&self, jar_id: &JarId, id: SubscriberId) -> bool {
        let removed = self.inner.remove(jar_id, id);
        if removed {
            debug!("Subscriber {} removed from jar {}", id, jar_id);
        }
        removed
    }

    /// Offer a request to every subscriber currently registered for the jar
    ///
    /// The lock is held only while snapshotting the subscriber set; delivery
    /// itself never blocks. Full buffers are handled per the overflow policy.
    pub fn broadcast(&self, jar_id: &JarId, request: &Arc<CapturedRequest>) -> BroadcastReport {
        let targets: Vec<(SubscriberId, mpsc::Sender<Delivery>)> = {
            let jars = self.inner.jars.read();
            match jars.get(jar_id) {
                Some(set) => set.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return BroadcastReport::default(),
            }
        };

        let mut report = BroadcastReport::default();
        let mut stale = Vec::new();

        for (id, sender) in targets {
            match sender.try_send(Arc::clone(request)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => match self.inner.overflow {
                    OverflowPolicy::DropNewest => {
                        warn!("Subscriber {} on jar {} is full, dropping request {}", id, jar_id, request.id);
                        report.dropped += 1;
                    }
                    OverflowPolicy::Disconnect => {
                        warn!("Subscriber {} on jar {} is too slow, disconnecting", id, jar_id);
                        stale.push(id);
                    }
                },
                Err(TrySendError::Closed(_)) => stale.push(id),
            }
        }

        for id in stale {
            if self.inner.remove(jar_id, id) {
                report.disconnected += 1;
            }
        }

        report
    }

    /// Terminate every subscriber of a jar; returns how many were closed
    ///
    /// Each handle yields anything already buffered, then observes closure.
    pub fn close_all(&self, jar_id: &JarId) -> usize {
        let closed = self
            .inner
            .jars
            .write()
            .remove(jar_id)
            .map_or(0, |set| set.len());

        debug!("Closed {} subscribers of jar {}", closed, jar_id);
        closed
    }

    /// Terminate every subscriber of every jar
    pub fn close_everything(&self) -> usize {
        let drained: Vec<SubscriberSet> = self.inner.jars.write().drain().map(|(_, set)| set).collect();
        drained.iter().map(HashMap::len).sum()
    }

    /// Number of subscribers registered for a jar
    #[must_use]
    pub fn subscriber_count(&self, jar_id: &JarId) -> usize {
        self.inner.jars.read().get(jar_id).map_or(0, HashMap::len)
    }

    /// Number of subscribers across all jars
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.inner.jars.read().values().map(HashMap::len).sum()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, OverflowPolicy::default())
    }
}

/// Receiving end of one live subscription
pub struct Subscription {
    jar_id: JarId,
    id: SubscriberId,
    receiver: mpsc::Receiver<Delivery>,
    registry: Weak<RegistryInner>,
}

impl Subscription {
    /// Jar this subscription observes
    #[must_use]
    pub fn jar_id(&self) -> &JarId {
        &self.jar_id
    }

    /// Registry identifier of this subscription
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next captured request
    ///
    /// Returns `None` once the subscription has been closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<CapturedRequest>> {
        self.receiver.recv().await
    }

    /// Take a buffered request without waiting
    pub fn try_recv(&mut self) -> Option<Arc<CapturedRequest>> {
        self.receiver.try_recv().ok()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("jar_id", &self.jar_id)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            if inner.remove(&self.jar_id, self.id) {
                debug!("Subscriber {} dropped from jar {}", self.id, self.jar_id);
            }
        }
    }
}
