//! Jar service: composes the stores with the subscription registry

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SubscriptionConfig;
use crate::error::ResultExt;
use crate::id::{IdGenerator, JarId, RequestId, SubscriberId};
use crate::model::{CapturedRequest, IncomingRequest, Jar};
use crate::store::{InMemoryJarStore, InMemoryRequestStore, JarStore, RequestStore};
use crate::subscription::{Subscription, SubscriptionRegistry};
use crate::{JarError, Result};

/// Public operations over jars, captured requests and live subscriptions
///
/// The three collaborators are locked independently. Captures into one jar
/// are additionally serialized by a per-jar sequencer held across the append
/// and the broadcast, so every subscriber sees the stored order. The
/// sequencer is always taken first; no other path acquires it.
pub struct JarService {
    jars: Arc<dyn JarStore>,
    requests: Arc<dyn RequestStore>,
    subscriptions: SubscriptionRegistry,
    sequencers: DashMap<JarId, Arc<Mutex<()>>>,
    ids: IdGenerator,
}

impl JarService {
    /// Create a service over the given stores and registry
    #[must_use]
    pub fn new(
        jars: Arc<dyn JarStore>,
        requests: Arc<dyn RequestStore>,
        subscriptions: SubscriptionRegistry,
    ) -> Self {
        Self {
            jars,
            requests,
            subscriptions,
            sequencers: DashMap::new(),
            ids: IdGenerator::new(),
        }
    }

    /// Create a service backed by empty in-memory stores
    #[must_use]
    pub fn in_memory(config: &SubscriptionConfig) -> Self {
        Self::new(
            Arc::new(InMemoryJarStore::new()),
            Arc::new(InMemoryRequestStore::new()),
            SubscriptionRegistry::new(config.buffer_size, config.overflow),
        )
    }

    /// Subscription registry (for introspection)
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Create a jar and register it for captures
    ///
    /// If registration fails the jar metadata is removed again.
    ///
    /// # Errors
    ///
    /// Returns error if either store rejects the jar
    pub fn create_jar(&self, name: &str) -> Result<JarId> {
        let jar_id = self.jars.create(name)?;

        if let Err(e) = self.requests.register_jar(&jar_id) {
            if let Err(rollback) = self.jars.delete(&jar_id) {
                warn!("Rollback of jar {} failed: {}", jar_id, rollback);
            }
            return Err(e.context("register jar", &jar_id));
        }

        self.sequencers.insert(jar_id.clone(), Arc::default());
        info!("Created jar {} ({:?})", jar_id, name);
        Ok(jar_id)
    }

    /// Delete a jar, its requests and its subscriptions
    ///
    /// Requests are dropped first so no new capture can land, then the
    /// metadata, then live subscriptions are closed. Every step runs even if
    /// an earlier one failed; all failures are reported together.
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` if the jar does not exist, `CleanupFailed` if
    /// any step failed
    pub fn delete_jar(&self, jar_id: &JarId) -> Result<()> {
        self.jars.get(jar_id)?;

        let mut failures = Vec::new();

        if let Err(e) = self.requests.delete_all_for_jar(jar_id) {
            failures.push(e.context("delete requests", jar_id));
        }

        if let Err(e) = self.jars.delete(jar_id) {
            failures.push(e.context("delete metadata", jar_id));
        }

        self.sequencers.remove(jar_id);
        let closed = self.subscriptions.close_all(jar_id);

        if failures.is_empty() {
            info!("Deleted jar {} ({} subscribers closed)", jar_id, closed);
            Ok(())
        } else {
            warn!("Jar {} deleted with {} failed steps", jar_id, failures.len());
            Err(JarError::CleanupFailed {
                jar_id: jar_id.clone(),
                failures,
            })
        }
    }

    /// Metadata of every jar
    ///
    /// # Errors
    ///
    /// Returns error if the jar store cannot be read
    pub fn list_all_jar_metadata(&self) -> Result<Vec<Jar>> {
        self.jars.list()
    }

    /// Metadata of one jar
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` if the jar does not exist
    pub fn get_jar_metadata(&self, jar_id: &JarId) -> Result<Jar> {
        self.jars.get(jar_id)
    }

    /// A jar together with its captured requests in capture order
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` if the jar does not exist
    pub fn get_jar_with_requests(&self, jar_id: &JarId) -> Result<(Jar, Vec<Arc<CapturedRequest>>)> {
        let jar = self.jars.get(jar_id).context("get jar", jar_id)?;
        let requests = self.requests.list(jar_id).context("list requests", jar_id)?;
        Ok((jar, requests))
    }

    /// One captured request
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` or `RequestNotFound`
    pub fn get_request(&self, jar_id: &JarId, request_id: &RequestId) -> Result<Arc<CapturedRequest>> {
        self.requests.get(jar_id, request_id)
    }

    /// Record an inbound request under a jar and notify its subscribers
    ///
    /// The request gets a fresh ID and timestamp; every other field passes
    /// through unchanged. Append and broadcast run under the jar's
    /// sequencer, so subscribers receive captures in stored order.
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` if the jar does not exist (nothing is stored)
    pub fn capture_request(
        &self,
        jar_id: &JarId,
        incoming: IncomingRequest,
    ) -> Result<Arc<CapturedRequest>> {
        let request = Arc::new(CapturedRequest::new(
            self.ids.request_id(),
            Utc::now(),
            incoming,
        ));

        let sequencer = self.sequencer(jar_id).context("capture request", jar_id)?;
        let report = {
            let _order = sequencer.lock();
            self.requests
                .create_request(jar_id, Arc::clone(&request))
                .context("capture request", jar_id)?;
            self.subscriptions.broadcast(jar_id, &request)
        };
        debug!(
            "Captured {} {} as {} in jar {} (delivered: {}, dropped: {}, disconnected: {})",
            request.method,
            request.path,
            request.id,
            jar_id,
            report.delivered,
            report.dropped,
            report.disconnected
        );

        Ok(request)
    }

    // Jars registered before the service existed get their sequencer lazily.
    fn sequencer(&self, jar_id: &JarId) -> Result<Arc<Mutex<()>>> {
        if let Some(sequencer) = self.sequencers.get(jar_id) {
            return Ok(Arc::clone(sequencer.value()));
        }

        self.jars.get(jar_id)?;
        Ok(Arc::clone(
            self.sequencers.entry(jar_id.clone()).or_default().value(),
        ))
    }

    /// Delete one captured request
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` if the jar is not registered
    pub fn delete_request(&self, jar_id: &JarId, request_id: &RequestId) -> Result<()> {
        self.requests
            .delete_one(jar_id, request_id)
            .context("delete request", jar_id)
    }

    /// Open a live subscription to a jar
    ///
    /// Existence is re-checked after registering, so a subscription can never
    /// outlive a concurrent deletion of its jar unnoticed.
    ///
    /// # Errors
    ///
    /// Returns `JarNotFound` if the jar does not exist
    pub fn subscribe(&self, jar_id: &JarId) -> Result<Subscription> {
        self.jars.get(jar_id)?;

        let subscription = self.subscriptions.subscribe(jar_id);

        // Dropping the handle on this path unregisters it
        if let Err(e) = self.jars.get(jar_id) {
            debug!("Jar {} deleted while subscribing", jar_id);
            return Err(e);
        }

        Ok(subscription)
    }

    /// Remove a subscription; absent jars or handles are ignored
    pub fn unsubscribe(&self, jar_id: &JarId, subscriber: SubscriberId) -> bool {
        self.subscriptions.unsubscribe(jar_id, subscriber)
    }

    /// Close every live subscription (server shutdown)
    pub fn shutdown(&self) {
        let closed = self.subscriptions.close_everything();
        info!("Closed {} live subscriptions", closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::thread;
    use std::time::Duration;

    fn service() -> JarService {
        JarService::in_memory(&SubscriptionConfig::default())
    }

    fn incoming(marker: &str) -> IncomingRequest {
        IncomingRequest {
            method: "POST".to_string(),
            path: format!("/r/jar/{marker}"),
            headers: BTreeMap::from([("X-Marker".to_string(), marker.to_string())]),
            query: BTreeMap::new(),
            client_ip: "10.0.0.1:4000".to_string(),
            body: Bytes::from(marker.to_string()),
        }
    }

    /// Request store that refuses registrations
    struct BrokenRequestStore;

    impl RequestStore for BrokenRequestStore {
        fn register_jar(&self, _: &JarId) -> Result<()> {
            Err(JarError::Internal("registration refused".to_string()))
        }
        fn create_request(&self, jar_id: &JarId, _: Arc<CapturedRequest>) -> Result<()> {
            Err(JarError::JarNotFound(jar_id.clone()))
        }
        fn get(&self, jar_id: &JarId, _: &RequestId) -> Result<Arc<CapturedRequest>> {
            Err(JarError::JarNotFound(jar_id.clone()))
        }
        fn list(&self, jar_id: &JarId) -> Result<Vec<Arc<CapturedRequest>>> {
            Err(JarError::JarNotFound(jar_id.clone()))
        }
        fn delete_one(&self, jar_id: &JarId, _: &RequestId) -> Result<()> {
            Err(JarError::JarNotFound(jar_id.clone()))
        }
        fn delete_all_for_jar(&self, jar_id: &JarId) -> Result<()> {
            Err(JarError::JarNotFound(jar_id.clone()))
        }
    }

    #[test]
    fn test_create_then_list() {
        let svc = service();

        let id = svc.create_jar("inbox").unwrap();
        let jars = svc.list_all_jar_metadata().unwrap();

        assert_eq!(jars.len(), 1);
        assert_eq!(jars[0].id, id);
        assert_eq!(jars[0].name, "inbox");
        assert!(!jars[0].id.as_str().is_empty());
    }

    #[test]
    fn test_create_rolls_back_on_registration_failure() {
        let jars = Arc::new(InMemoryJarStore::new());
        let svc = JarService::new(
            jars.clone(),
            Arc::new(BrokenRequestStore),
            SubscriptionRegistry::default(),
        );

        let err = svc.create_jar("doomed").unwrap_err();
        assert!(matches!(err, JarError::Context { operation: "register jar", .. }));
        assert!(jars.is_empty());
    }

    #[test]
    fn test_capture_unknown_jar() {
        let svc = service();
        let err = svc
            .capture_request(&JarId::from("nope"), incoming("x"))
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(svc.get_jar_with_requests(&JarId::from("nope")).is_err());
    }

    #[test]
    fn test_capture_round_trip() {
        let svc = service();
        let id = svc.create_jar("rt").unwrap();

        let sent = IncomingRequest {
            method: "PUT".to_string(),
            path: format!("/r/{id}/things"),
            headers: BTreeMap::from([("X-Test".to_string(), "1".to_string())]),
            query: BTreeMap::from([("q".to_string(), "v".to_string())]),
            client_ip: "192.168.1.9:51000".to_string(),
            body: Bytes::from_static(b"hello"),
        };
        let captured = svc.capture_request(&id, sent.clone()).unwrap();

        let (jar, requests) = svc.get_jar_with_requests(&id).unwrap();
        assert_eq!(jar.id, id);
        assert_eq!(requests.len(), 1);

        let stored = &requests[0];
        assert_eq!(stored.id, captured.id);
        assert_eq!(stored.method, sent.method);
        assert_eq!(stored.path, sent.path);
        assert_eq!(stored.headers, sent.headers);
        assert_eq!(stored.query, sent.query);
        assert_eq!(stored.client_ip, sent.client_ip);
        assert_eq!(stored.body, sent.body);

        assert_eq!(svc.get_request(&id, &captured.id).unwrap(), captured);
    }

    #[test]
    fn test_delete_one_request_keeps_order() {
        let svc = service();
        let id = svc.create_jar("order").unwrap();

        let captured: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|m| svc.capture_request(&id, incoming(m)).unwrap())
            .collect();

        svc.delete_request(&id, &captured[1].id).unwrap();

        let (_, remaining) = svc.get_jar_with_requests(&id).unwrap();
        let ids: Vec<_> = remaining.iter().map(|r| r.id.clone()).collect();
        assert_eq!(
            ids,
            vec![captured[0].id.clone(), captured[2].id.clone(), captured[3].id.clone()]
        );
    }

    #[test]
    fn test_delete_unknown_jar() {
        let svc = service();

        let err = svc.delete_jar(&JarId::from("ghost")).unwrap_err();
        assert!(matches!(err, JarError::JarNotFound(_)));
    }

    #[test]
    fn test_delete_jar_reports_every_failed_step() {
        let jars = Arc::new(InMemoryJarStore::new());
        let jar_id = jars.create("half").unwrap();
        let svc = JarService::new(
            jars.clone(),
            Arc::new(BrokenRequestStore),
            SubscriptionRegistry::default(),
        );

        let err = svc.delete_jar(&jar_id).unwrap_err();
        match err {
            JarError::CleanupFailed { failures, .. } => assert_eq!(failures.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
        // Metadata removal still ran
        assert!(jars.get(&jar_id).is_err());
    }

    #[tokio::test]
    async fn test_delete_jar_cascades() {
        let svc = service();
        let id = svc.create_jar("doomed").unwrap();
        svc.capture_request(&id, incoming("before")).unwrap();
        let mut sub = svc.subscribe(&id).unwrap();

        svc.delete_jar(&id).unwrap();

        assert!(svc.capture_request(&id, incoming("after")).unwrap_err().is_not_found());
        assert!(svc.list_all_jar_metadata().unwrap().is_empty());
        assert!(svc.get_jar_with_requests(&id).unwrap_err().is_not_found());

        let next = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("subscription hung after jar deletion");
        assert!(next.is_none());
        assert_eq!(svc.subscriptions().subscriber_count(&id), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_identical_copy() {
        let svc = service();
        let id = svc.create_jar("fanout").unwrap();
        let mut subs: Vec<_> = (0..4).map(|_| svc.subscribe(&id).unwrap()).collect();

        let captured = svc.capture_request(&id, incoming("shared")).unwrap();
        let expected = serde_json::to_vec(captured.as_ref()).unwrap();

        for sub in &mut subs {
            let got = sub.recv().await.unwrap();
            assert_eq!(serde_json::to_vec(got.as_ref()).unwrap(), expected);
            assert!(sub.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn test_subscriber_sees_capture_order() {
        let svc = service();
        let id = svc.create_jar("ordered").unwrap();
        let mut sub = svc.subscribe(&id).unwrap();

        let sent: Vec<_> = (0..10)
            .map(|i| svc.capture_request(&id, incoming(&i.to_string())).unwrap().id.clone())
            .collect();

        let mut received = Vec::new();
        for _ in 0..10 {
            received.push(sub.recv().await.unwrap().id.clone());
        }
        assert_eq!(received, sent);
    }

    #[test]
    fn test_concurrent_captures_reach_subscriber_in_stored_order() {
        let config = SubscriptionConfig {
            buffer_size: 1_000,
            ..SubscriptionConfig::default()
        };

        for _ in 0..20 {
            let svc = Arc::new(JarService::in_memory(&config));
            let id = svc.create_jar("contended").unwrap();
            let mut sub = svc.subscribe(&id).unwrap();

            let writers: Vec<_> = (0..8)
                .map(|t| {
                    let svc = Arc::clone(&svc);
                    let id = id.clone();
                    thread::spawn(move || {
                        for i in 0..50 {
                            svc.capture_request(&id, incoming(&format!("{t}-{i}")))
                                .unwrap();
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            let (_, stored) = svc.get_jar_with_requests(&id).unwrap();
            let stored: Vec<_> = stored.iter().map(|r| r.id.clone()).collect();
            let mut received = Vec::new();
            while let Some(request) = sub.try_recv() {
                received.push(request.id.clone());
            }

            assert_eq!(stored.len(), 400);
            assert_eq!(received, stored);
        }
    }

    #[test]
    fn test_subscribe_racing_delete_leaves_no_subscriber() {
        let svc = Arc::new(service());

        for _ in 0..200 {
            let id = svc.create_jar("short-lived").unwrap();

            let subscriber = {
                let svc = Arc::clone(&svc);
                let id = id.clone();
                thread::spawn(move || svc.subscribe(&id).ok())
            };
            let deleter = {
                let svc = Arc::clone(&svc);
                let id = id.clone();
                thread::spawn(move || svc.delete_jar(&id))
            };

            deleter.join().unwrap().unwrap();
            // Keep any handle alive so a ghost registration would still be counted
            let handle = subscriber.join().unwrap();
            assert_eq!(svc.subscriptions().total_subscribers(), 0);
            drop(handle);
        }
    }

    #[test]
    fn test_capture_into_jar_registered_outside_service() {
        let jars = Arc::new(InMemoryJarStore::new());
        let requests = Arc::new(InMemoryRequestStore::new());
        let id = jars.create("preexisting").unwrap();
        requests.register_jar(&id).unwrap();

        let svc = JarService::new(jars, requests, SubscriptionRegistry::default());
        svc.capture_request(&id, incoming("late")).unwrap();

        assert_eq!(svc.get_jar_with_requests(&id).unwrap().1.len(), 1);
    }

    #[test]
    fn test_subscribe_unknown_jar() {
        let svc = service();

        assert!(svc.subscribe(&JarId::from("missing")).unwrap_err().is_not_found());
        assert_eq!(svc.subscriptions().total_subscribers(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let svc = service();
        let id = svc.create_jar("subs").unwrap();
        let sub = svc.subscribe(&id).unwrap();

        assert!(svc.unsubscribe(&id, sub.id()));
        assert!(!svc.unsubscribe(&id, sub.id()));
        drop(sub);
        assert!(!svc.unsubscribe(&JarId::from("other"), SubscriberId::new(1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_captures_are_all_stored() {
        let svc = Arc::new(service());
        let id = svc.create_jar("burst").unwrap();

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let svc = Arc::clone(&svc);
                let id = id.clone();
                tokio::spawn(async move { svc.capture_request(&id, incoming(&format!("m{i}"))) })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let (_, requests) = svc.get_jar_with_requests(&id).unwrap();
        let mut markers: Vec<_> = requests
            .iter()
            .map(|r| r.headers["X-Marker"].clone())
            .collect();
        markers.sort();
        markers.dedup();
        assert_eq!(markers.len(), 100);
    }

    #[tokio::test]
    async fn test_shutdown_closes_streams() {
        let svc = service();
        let id = svc.create_jar("shut").unwrap();
        let mut sub = svc.subscribe(&id).unwrap();

        svc.shutdown();
        assert!(sub.recv().await.is_none());
    }
}
