//! In-process windows and transport.
//!
//! Every window lives in one `LoopbackNet`; messages are CBOR-framed and delivered
//! to the target's inbox, where a pump task feeds them to the target's [`Bridge`].
//! Latency, message filtering and send failures can be injected for testing.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};
use xpost_core::codec::decode_envelope;
use xpost_core::{frame_encode, Envelope, TimeoutConfig, XpostError, XpostResult, WILDCARD};

use crate::bridge::Bridge;
use crate::transport::Transport;
use crate::window::{Window, WindowId, WindowRef};

/// A simulated window.
pub struct LoopbackWindow {
    id: WindowId,
    origin: String,
    parent: Option<Weak<LoopbackWindow>>,
    closed: AtomicBool,
    unreachable: AtomicBool,
}

impl LoopbackWindow {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Make every access to this window fail, as after a cross-origin navigation.
    pub fn set_unreachable(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }
}

impl Window for LoopbackWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn touch(&self) -> XpostResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(XpostError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is not accessible", self.id),
            )));
        }
        Ok(())
    }

    fn parent(&self) -> Option<WindowRef> {
        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|p| p as WindowRef)
    }
}

/// Decides whether an envelope is delivered. `false` drops it silently.
pub type DeliveryFilter = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

struct Delivery {
    source: WindowId,
    origin: String,
    frame: Vec<u8>,
}

#[derive(Default)]
pub struct LoopbackNet {
    next_id: AtomicU64,
    windows: Mutex<HashMap<WindowId, Arc<LoopbackWindow>>>,
    inboxes: Mutex<HashMap<WindowId, mpsc::UnboundedSender<Delivery>>>,
    latency: Mutex<Duration>,
    filter: Mutex<Option<DeliveryFilter>>,
    fail_sends: AtomicBool,
}

impl LoopbackNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open_window(&self, origin: &str, parent: Option<&Arc<LoopbackWindow>>) -> Arc<LoopbackWindow> {
        let id = WindowId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let window = Arc::new(LoopbackWindow {
            id,
            origin: origin.to_string(),
            parent: parent.map(Arc::downgrade),
            closed: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
        });
        self.windows.lock().insert(id, window.clone());
        window
    }

    pub fn window(&self, id: WindowId) -> Option<Arc<LoopbackWindow>> {
        self.windows.lock().get(&id).cloned()
    }

    pub fn transport(self: &Arc<Self>, from: &Arc<LoopbackWindow>) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            net: Arc::downgrade(self),
            from: from.id,
            origin: from.origin.clone(),
        })
    }

    /// Build a bridge for `window` and start delivering its inbox to it.
    pub fn bridge(
        self: &Arc<Self>,
        window: &Arc<LoopbackWindow>,
        config: TimeoutConfig,
    ) -> XpostResult<Arc<Bridge>> {
        let bridge = Arc::new(Bridge::new(
            window.clone() as WindowRef,
            window.origin.clone(),
            self.transport(window) as Arc<dyn Transport>,
            config,
        )?);
        self.attach(window, bridge.clone());
        Ok(bridge)
    }

    /// Deliver everything addressed to `window` to `bridge`.
    pub fn attach(self: &Arc<Self>, window: &Arc<LoopbackWindow>, bridge: Arc<Bridge>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        self.inboxes.lock().insert(window.id, tx);
        let net = Arc::downgrade(self);
        let target = window.id;

        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let Some(net) = net.upgrade() else { break };
                let Some(source) = net.window(delivery.source) else {
                    debug!(source = %delivery.source, "message from unknown window");
                    continue;
                };
                match decode_envelope(&delivery.frame) {
                    Ok(envelope) => {
                        let bridge = bridge.clone();
                        tokio::spawn(async move {
                            bridge
                                .receive(source as WindowRef, &delivery.origin, envelope)
                                .await;
                        });
                    }
                    Err(e) => warn!(target = %target, error = %e, "undecodable frame"),
                }
            }
            debug!(target = %target, "inbox pump ended");
        })
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_filter(&self, filter: impl Fn(&Envelope) -> bool + Send + Sync + 'static) {
        *self.filter.lock() = Some(Arc::new(filter));
    }

    /// Make every subsequent `send_message` fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

/// The send primitive of one loopback window.
pub struct LoopbackTransport {
    net: Weak<LoopbackNet>,
    from: WindowId,
    origin: String,
}

impl Transport for LoopbackTransport {
    fn send_message<'a>(
        &'a self,
        target: &'a WindowRef,
        domain: &'a str,
        envelope: Envelope,
    ) -> BoxFuture<'a, XpostResult<()>> {
        async move {
            let net = self.net.upgrade().ok_or_else(|| {
                XpostError::Io(io::Error::new(io::ErrorKind::NotConnected, "loopback network is gone"))
            })?;
            if net.fail_sends.load(Ordering::SeqCst) {
                return Err(XpostError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "injected send failure",
                )));
            }
            let window = net.window(target.id()).ok_or_else(|| {
                XpostError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} is not a loopback window", target.id()),
                ))
            })?;

            // Like postMessage: undeliverable messages vanish without an error.
            if window.is_closed() {
                debug!(target = %window.id, "dropping message to closed window");
                return Ok(());
            }
            if domain != WILDCARD && domain != window.origin {
                debug!(target = %window.id, domain = %domain, actual = %window.origin, "target origin mismatch, dropping");
                return Ok(());
            }
            let filter = net.filter.lock().clone();
            if filter.is_some_and(|deliver| !deliver(&envelope)) {
                debug!(name = %envelope.name, msg_type = ?envelope.msg_type, "filtered out");
                return Ok(());
            }

            let frame = frame_encode(&envelope)?;
            let Some(inbox) = net.inboxes.lock().get(&window.id).cloned() else {
                debug!(target = %window.id, "no bridge attached, dropping");
                return Ok(());
            };
            let delivery = Delivery {
                source: self.from,
                origin: self.origin.clone(),
                frame,
            };

            let latency = *net.latency.lock();
            if latency.is_zero() {
                let _ = inbox.send(delivery);
            } else {
                tokio::spawn(async move {
                    time::sleep(latency).await;
                    let _ = inbox.send(delivery);
                });
            }
            Ok(())
        }
        .boxed()
    }
}
