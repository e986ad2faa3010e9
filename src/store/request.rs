//! In-memory captured-request store
//!
//! Sequences live in a sharded map: every mutation of one jar's sequence
//! happens under that shard's write lock, so an append is never observed
//! half-done, while jars on different shards never contend.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;

use crate::id::{JarId, RequestId};
use crate::model::CapturedRequest;
use crate::{JarError, Result};

use super::RequestStore;

/// Request store keyed by jar
pub struct InMemoryRequestStore {
    sequences: DashMap<JarId, Vec<Arc<CapturedRequest>>>,
}

impl InMemoryRequestStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            sequences: DashMap::new(),
        }
    }

    /// Number of registered jars
    #[must_use]
    pub fn jar_count(&self) -> usize {
        self.sequences.len()
    }
}

impl Default for InMemoryRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestStore for InMemoryRequestStore {
    fn register_jar(&self, jar_id: &JarId) -> Result<()> {
        match self.sequences.entry(jar_id.clone()) {
            Entry::Occupied(_) => {
                warn!("Jar {} already registered for requests", jar_id);
            }
            Entry::Vacant(slot) => {
                slot.insert(Vec::new());
            }
        }
        Ok(())
    }

    fn create_request(&self, jar_id: &JarId, request: Arc<CapturedRequest>) -> Result<()> {
        let mut sequence = self
            .sequences
            .get_mut(jar_id)
            .ok_or_else(|| JarError::JarNotFound(jar_id.clone()))?;

        sequence.push(request);
        Ok(())
    }

    fn get(&self, jar_id: &JarId, request_id: &RequestId) -> Result<Arc<CapturedRequest>> {
        let sequence = self
            .sequences
            .get(jar_id)
            .ok_or_else(|| JarError::JarNotFound(jar_id.clone()))?;

        sequence
            .iter()
            .find(|r| &r.id == request_id)
            .cloned()
            .ok_or_else(|| JarError::RequestNotFound {
                jar_id: jar_id.clone(),
                request_id: request_id.clone(),
            })
    }

    fn list(&self, jar_id: &JarId) -> Result<Vec<Arc<CapturedRequest>>> {
        self.sequences
            .get(jar_id)
            .map(|sequence| sequence.value().clone())
            .ok_or_else(|| JarError::JarNotFound(jar_id.clone()))
    }

    fn delete_one(&self, jar_id: &JarId, request_id: &RequestId) -> Result<()> {
        let mut sequence = self
            .sequences
            .get_mut(jar_id)
            .ok_or_else(|| JarError::JarNotFound(jar_id.clone()))?;

        if let Some(index) = sequence.iter().position(|r| &r.id == request_id) {
            sequence.remove(index);
        }
        Ok(())
    }

    fn delete_all_for_jar(&self, jar_id: &JarId) -> Result<()> {
        self.sequences
            .remove(jar_id)
            .map(|_| ())
            .ok_or_else(|| JarError::JarNotFound(jar_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IncomingRequest;
    use chrono::Utc;
    use proptest::prelude::*;
    use std::thread;

    fn request(id: &str) -> Arc<CapturedRequest> {
        Arc::new(CapturedRequest::new(
            RequestId::from(id),
            Utc::now(),
            IncomingRequest {
                method: "GET".to_string(),
                path: format!("/r/jar/{id}"),
                ..Default::default()
            },
        ))
    }

    fn ids(store: &InMemoryRequestStore, jar_id: &JarId) -> Vec<String> {
        store
            .list(jar_id)
            .unwrap()
            .iter()
            .map(|r| r.id.to_string())
            .collect()
    }

    #[test]
    fn test_create_requires_registration() {
        let store = InMemoryRequestStore::new();
        let jar_id = JarId::from("unknown");

        let err = store.create_request(&jar_id, request("r1")).unwrap_err();
        assert!(matches!(err, JarError::JarNotFound(_)));
        assert!(store.list(&jar_id).is_err());
        assert_eq!(store.jar_count(), 0);
    }

    #[test]
    fn test_register_twice_keeps_requests() {
        let store = InMemoryRequestStore::new();
        let jar_id = JarId::from("j");

        store.register_jar(&jar_id).unwrap();
        store.create_request(&jar_id, request("r1")).unwrap();
        store.register_jar(&jar_id).unwrap();

        assert_eq!(ids(&store, &jar_id), vec!["r1"]);
    }

    #[test]
    fn test_list_in_capture_order() {
        let store = InMemoryRequestStore::new();
        let jar_id = JarId::from("j");
        store.register_jar(&jar_id).unwrap();

        for id in ["a", "b", "c"] {
            store.create_request(&jar_id, request(id)).unwrap();
        }

        assert_eq!(ids(&store, &jar_id), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_get_one() {
        let store = InMemoryRequestStore::new();
        let jar_id = JarId::from("j");
        store.register_jar(&jar_id).unwrap();
        store.create_request(&jar_id, request("a")).unwrap();

        assert_eq!(store.get(&jar_id, &RequestId::from("a")).unwrap().id.as_str(), "a");
        assert!(matches!(
            store.get(&jar_id, &RequestId::from("zz")).unwrap_err(),
            JarError::RequestNotFound { .. }
        ));
        assert!(matches!(
            store.get(&JarId::from("other"), &RequestId::from("a")).unwrap_err(),
            JarError::JarNotFound(_)
        ));
    }

    #[test]
    fn test_delete_one_missing_request_is_noop() {
        let store = InMemoryRequestStore::new();
        let jar_id = JarId::from("j");
        store.register_jar(&jar_id).unwrap();
        store.create_request(&jar_id, request("a")).unwrap();

        store.delete_one(&jar_id, &RequestId::from("nope")).unwrap();
        assert_eq!(ids(&store, &jar_id), vec!["a"]);

        let err = store
            .delete_one(&JarId::from("other"), &RequestId::from("a"))
            .unwrap_err();
        assert!(matches!(err, JarError::JarNotFound(_)));
    }

    #[test]
    fn test_delete_all_unregisters() {
        let store = InMemoryRequestStore::new();
        let jar_id = JarId::from("j");
        store.register_jar(&jar_id).unwrap();
        store.create_request(&jar_id, request("a")).unwrap();

        store.delete_all_for_jar(&jar_id).unwrap();

        assert!(store.list(&jar_id).is_err());
        assert!(store.create_request(&jar_id, request("b")).is_err());
        assert!(store.delete_all_for_jar(&jar_id).is_err());
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let store = Arc::new(InMemoryRequestStore::new());
        let jar_id = JarId::from("busy");
        store.register_jar(&jar_id).unwrap();

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let store = Arc::clone(&store);
                let jar_id = jar_id.clone();
                thread::spawn(move || {
                    store
                        .create_request(&jar_id, request(&format!("m{i}")))
                        .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let mut stored = ids(&store, &jar_id);
        stored.sort();
        stored.dedup();
        assert_eq!(stored.len(), 100);
    }

    proptest! {
        #[test]
        fn prop_delete_one_preserves_order(count in 1usize..40, pick in 0usize..40) {
            let store = InMemoryRequestStore::new();
            let jar_id = JarId::from("p");
            store.register_jar(&jar_id).unwrap();

            let all: Vec<String> = (0..count).map(|i| format!("r{i}")).collect();
            for id in &all {
                store.create_request(&jar_id, request(id)).unwrap();
            }

            let victim = &all[pick % count];
            store.delete_one(&jar_id, &RequestId::from(victim.as_str())).unwrap();

            let expected: Vec<String> = all.iter().filter(|id| *id != victim).cloned().collect();
            prop_assert_eq!(ids(&store, &jar_id), expected);
        }
    }
}
