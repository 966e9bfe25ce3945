//! Hello handshake: learning which origin a window belongs to.
//!
//! A child window announces itself to its parent with a `xpost_hello` request.
//! A parent about to send into a child waits for that announcement first; any
//! other sender with a non-literal domain asks the peer directly.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time;
use tracing::debug;
use xpost_core::{names, DomainSpec, XpostError, XpostResult};

use crate::dispatcher::{Dispatcher, SendOptions};
use crate::window::{Window, WindowId, WindowRef};

/// What a handshake tells us about a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloInfo {
    pub origin: String,
}

/// Origin discovery used by the dispatcher before sending.
pub trait Handshake: Send + Sync {
    /// Wait, at most `timeout`, for `window` to announce itself.
    fn await_window_hello<'a>(
        &'a self,
        window: &'a WindowRef,
        timeout: Duration,
    ) -> BoxFuture<'a, XpostResult<HelloInfo>>;

    /// Ask `window` for its origin using `dispatcher`.
    fn say_hello<'a>(
        &'a self,
        dispatcher: &'a Dispatcher,
        window: &'a WindowRef,
    ) -> BoxFuture<'a, XpostResult<HelloInfo>>;

    /// Whether `window` has been heard from before.
    fn is_window_known(&self, window: &dyn Window) -> bool;

    /// Drop what was learned about `window`, once it has closed.
    fn forget_window(&self, window: WindowId);
}

/// Built-in [`Handshake`] backed by the messages this window has received.
#[derive(Default)]
pub struct HelloRegistry {
    /// Every window we have received a message from.
    known: Mutex<HashSet<WindowId>>,
    hellos: Mutex<HashMap<WindowId, HelloInfo>>,
    waiters: Mutex<HashMap<WindowId, Vec<oneshot::Sender<HelloInfo>>>>,
}

impl HelloRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_known(&self, window: WindowId) {
        self.known.lock().insert(window);
    }

    /// Record that `window` announced itself and wake anyone waiting for it.
    pub fn record_hello(&self, window: WindowId, origin: &str) {
        let info = HelloInfo {
            origin: origin.to_string(),
        };
        self.mark_known(window);
        self.hellos.lock().insert(window, info.clone());

        let waiters = self.waiters.lock().remove(&window).unwrap_or_default();
        debug!(window = %window, origin = %origin, waiters = waiters.len(), "hello recorded");
        for tx in waiters {
            let _ = tx.send(info.clone());
        }
    }

    /// Forget everything about `window`.
    pub fn forget(&self, window: WindowId) {
        self.known.lock().remove(&window);
        self.hellos.lock().remove(&window);
        self.waiters.lock().remove(&window);
    }
}

impl Handshake for HelloRegistry {
    fn await_window_hello<'a>(
        &'a self,
        window: &'a WindowRef,
        timeout: Duration,
    ) -> BoxFuture<'a, XpostResult<HelloInfo>> {
        async move {
            let id = window.id();
            let rx = {
                // Hold the waiter lock across the check so a concurrent hello cannot slip past.
                let mut waiters = self.waiters.lock();
                if let Some(info) = self.hellos.lock().get(&id).cloned() {
                    return Ok(info);
                }
                let (tx, rx) = oneshot::channel();
                let list = waiters.entry(id).or_default();
                list.retain(|tx| !tx.is_closed());
                list.push(tx);
                rx
            };

            match time::timeout(timeout, rx).await {
                Ok(Ok(info)) => Ok(info),
                Ok(Err(_)) | Err(_) => Err(XpostError::HandshakeTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        }
        .boxed()
    }

    fn say_hello<'a>(
        &'a self,
        dispatcher: &'a Dispatcher,
        window: &'a WindowRef,
    ) -> BoxFuture<'a, XpostResult<HelloInfo>> {
        async move {
            let reply = dispatcher
                .send(
                    window,
                    names::HELLO,
                    json!({}),
                    SendOptions::default().domain(DomainSpec::Wildcard),
                )
                .await?;
            let origin = reply
                .get("origin")
                .and_then(Value::as_str)
                .ok_or_else(|| XpostError::Codec("hello reply is missing `origin`".into()))?;
            self.record_hello(window.id(), origin);
            Ok(HelloInfo {
                origin: origin.to_string(),
            })
        }
        .boxed()
    }

    fn is_window_known(&self, window: &dyn Window) -> bool {
        self.known.lock().contains(&window.id())
    }

    fn forget_window(&self, window: WindowId) {
        debug!(window = %window, "forgetting closed window");
        self.forget(window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackNet;

    #[tokio::test(start_paused = true)]
    async fn waiter_is_woken_by_hello() {
        let net = LoopbackNet::new();
        let child: WindowRef = net.open_window("https://child.com", None);
        let registry = std::sync::Arc::new(HelloRegistry::new());

        let r = registry.clone();
        let id = child.id();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(200)).await;
            r.record_hello(id, "https://child.com");
        });

        let info = registry
            .await_window_hello(&child, Duration::from_millis(1000))
            .await
            .unwrap();
        assert_eq!(info.origin, "https://child.com");
        assert!(registry.is_window_known(child.as_ref()));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_hello_times_out() {
        let net = LoopbackNet::new();
        let child: WindowRef = net.open_window("https://child.com", None);
        let registry = HelloRegistry::new();

        let err = registry
            .await_window_hello(&child, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, XpostError::HandshakeTimeout { timeout_ms: 300 }));
    }

    #[tokio::test]
    async fn earlier_hello_resolves_immediately() {
        let net = LoopbackNet::new();
        let child: WindowRef = net.open_window("https://child.com", None);
        let registry = HelloRegistry::new();
        registry.record_hello(child.id(), "https://child.com");

        let info = registry
            .await_window_hello(&child, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(info.origin, "https://child.com");

        registry.forget(child.id());
        assert!(!registry.is_window_known(child.as_ref()));
    }
}
