//! Response listeners: one per outstanding request, keyed by correlation hash.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use xpost_core::{DomainSpec, XpostError, XpostResult};

use crate::window::{Window, WindowId, WindowRef};

/// Tracks one request that expects an ack and a response.
///
/// The result slot is single-settlement: the first of response, watchdog or
/// transport failure wins and every later attempt is ignored.
pub struct ResponseListener {
    name: String,
    hash: String,
    window: Weak<dyn Window>,
    window_id: WindowId,
    domain: DomainSpec,
    ack: AtomicBool,
    cancelled: AtomicBool,
    result_tx: Mutex<Option<oneshot::Sender<XpostResult<Value>>>>,
}

impl ResponseListener {
    pub fn new(
        name: &str,
        hash: &str,
        window: &WindowRef,
        domain: DomainSpec,
    ) -> (Arc<Self>, oneshot::Receiver<XpostResult<Value>>) {
        let (tx, rx) = oneshot::channel();
        let listener = Arc::new(Self {
            name: name.to_string(),
            hash: hash.to_string(),
            window: Arc::downgrade(window),
            window_id: window.id(),
            domain,
            ack: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            result_tx: Mutex::new(Some(tx)),
        });
        (listener, rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn window_id(&self) -> WindowId {
        self.window_id
    }

    /// The target window, if it still exists.
    pub fn window(&self) -> Option<WindowRef> {
        self.window.upgrade()
    }

    pub fn domain(&self) -> &DomainSpec {
        &self.domain
    }

    pub fn acknowledge(&self) {
        self.ack.store(true, Ordering::SeqCst);
    }

    pub fn is_acked(&self) -> bool {
        self.ack.load(Ordering::SeqCst)
    }

    /// Ask for the request to be abandoned. Takes effect at the next watchdog tick.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Settle the request. Returns `false` if it was already settled.
    pub fn settle(&self, result: XpostResult<Value>) -> bool {
        match self.result_tx.lock().take() {
            Some(tx) => {
                // The caller may have stopped waiting; that still counts as settled.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.result_tx
            .lock()
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }
}

/// How long a failed hash is remembered. Replies arriving later are treated as unknown.
pub const ERRORED_RETENTION: Duration = Duration::from_secs(60);

/// Routes inbound acks and responses back to their listener by hash.
#[derive(Default)]
pub struct ListenerTable {
    listeners: Mutex<HashMap<String, Arc<ResponseListener>>>,
    /// Failed hashes and when they failed.
    errored: Mutex<HashMap<String, Instant>>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, hash: &str, listener: Arc<ResponseListener>) {
        if self
            .listeners
            .lock()
            .insert(hash.to_string(), listener)
            .is_some()
        {
            warn!(hash = %hash, "replaced an existing response listener");
        }
    }

    pub fn get(&self, hash: &str) -> Option<Arc<ResponseListener>> {
        self.listeners.lock().get(hash).cloned()
    }

    pub fn delete(&self, hash: &str) -> Option<Arc<ResponseListener>> {
        self.listeners.lock().remove(hash)
    }

    /// Remember that `hash` failed so a late reply can be told apart from garbage.
    /// Entries older than [`ERRORED_RETENTION`] are evicted on the way.
    pub fn mark_errored(&self, hash: &str) {
        let now = Instant::now();
        let mut errored = self.errored.lock();
        let before = errored.len();
        errored.retain(|_, at| now.duration_since(*at) < ERRORED_RETENTION);
        if errored.len() != before {
            debug!(evicted = before - errored.len(), "forgot expired errored hashes");
        }
        errored.insert(hash.to_string(), now);
    }

    pub fn is_errored(&self, hash: &str) -> bool {
        self.errored
            .lock()
            .get(hash)
            .is_some_and(|at| at.elapsed() < ERRORED_RETENTION)
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record an ack from `origin`. Returns whether a listener accepted it.
    pub fn handle_ack(&self, hash: &str, origin: &str) -> bool {
        match self.lookup(hash, origin) {
            Some(listener) => {
                debug!(name = %listener.name(), hash = %hash, "ack received");
                listener.acknowledge();
                true
            }
            None => false,
        }
    }

    /// Settle the listener for `hash` with a response from `origin`.
    pub fn handle_response(
        &self,
        hash: &str,
        origin: &str,
        result: Result<Value, String>,
    ) -> bool {
        let Some(listener) = self.lookup(hash, origin) else {
            return false;
        };
        listener.acknowledge();
        let outcome = result.map_err(|message| XpostError::Remote {
            name: listener.name().to_string(),
            message,
        });
        let settled = listener.settle(outcome);
        if !settled {
            debug!(name = %listener.name(), hash = %hash, "response arrived after settlement");
        }
        settled
    }

    fn lookup(&self, hash: &str, origin: &str) -> Option<Arc<ResponseListener>> {
        let Some(listener) = self.get(hash) else {
            if self.is_errored(hash) {
                debug!(hash = %hash, "ignoring reply for a request that already failed");
            } else {
                warn!(hash = %hash, origin = %origin, "no response listener for hash");
            }
            return None;
        };
        if !listener.domain().matches(origin) {
            warn!(
                hash = %hash,
                origin = %origin,
                expected = %listener.domain(),
                "reply origin does not match request domain"
            );
            return None;
        }
        Some(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackNet;
    use serde_json::json;

    fn listener(domain: DomainSpec) -> (Arc<ResponseListener>, oneshot::Receiver<XpostResult<Value>>, WindowRef) {
        let net = LoopbackNet::new();
        let win: WindowRef = net.open_window("https://child.com", None);
        let (l, rx) = ResponseListener::new("getUser", "getUser_1", &win, domain);
        (l, rx, win)
    }

    #[tokio::test]
    async fn settles_only_once() {
        let (l, rx, _win) = listener(DomainSpec::Wildcard);
        assert!(l.settle(Ok(json!(1))));
        assert!(!l.settle(Err(XpostError::Cancelled { name: "getUser".into() })));
        assert_eq!(rx.await.unwrap().unwrap(), json!(1));
        assert!(l.is_settled());
    }

    #[test]
    fn dropped_receiver_counts_as_settled() {
        let (l, rx, _win) = listener(DomainSpec::Wildcard);
        assert!(!l.is_settled());
        drop(rx);
        assert!(l.is_settled());
    }

    #[tokio::test]
    async fn response_routes_by_hash() {
        let table = ListenerTable::new();
        let (l, rx, _win) = listener(DomainSpec::Wildcard);
        table.add("getUser_1", l.clone());

        assert!(table.handle_ack("getUser_1", "https://child.com"));
        assert!(l.is_acked());
        assert!(table.handle_response("getUser_1", "https://child.com", Ok(json!({"id": 3}))));
        assert_eq!(rx.await.unwrap().unwrap(), json!({"id": 3}));
    }

    #[tokio::test]
    async fn error_response_becomes_remote_error() {
        let table = ListenerTable::new();
        let (l, rx, _win) = listener(DomainSpec::Wildcard);
        table.add("getUser_1", l);
        table.handle_response("getUser_1", "https://child.com", Err("denied".into()));
        match rx.await.unwrap() {
            Err(XpostError::Remote { name, message }) => {
                assert_eq!(name, "getUser");
                assert_eq!(message, "denied");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn reply_from_wrong_origin_is_dropped() {
        let table = ListenerTable::new();
        let (l, _rx, _win) = listener(DomainSpec::from("https://child.com"));
        table.add("getUser_1", l.clone());
        assert!(!table.handle_ack("getUser_1", "https://evil.com"));
        assert!(!l.is_acked());
    }

    #[test]
    fn errored_and_unknown_hashes_are_ignored() {
        let table = ListenerTable::new();
        table.mark_errored("gone_1");
        assert!(table.is_errored("gone_1"));
        assert!(!table.handle_response("gone_1", "https://a.com", Ok(json!(null))));
        assert!(!table.handle_ack("never_1", "https://a.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn errored_hashes_expire() {
        let table = ListenerTable::new();
        for hash in ["a_1", "a_2", "a_3"] {
            table.mark_errored(hash);
        }
        tokio::time::advance(ERRORED_RETENTION - Duration::from_secs(1)).await;
        assert!(table.is_errored("a_1"));

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!table.is_errored("a_1"));

        table.mark_errored("b_1");
        assert_eq!(table.errored.lock().len(), 1);
        assert!(table.is_errored("b_1"));
    }
}
