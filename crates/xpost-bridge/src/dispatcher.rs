//! The `send` operation: validate, resolve the target origin, dispatch, and wait.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info_span, Instrument};
use xpost_core::config::response_deadline;
use xpost_core::{DomainSpec, Envelope, TimeoutConfig, WaitPhase, XpostError, XpostResult};

use crate::handshake::Handshake;
use crate::listener::{ListenerTable, ResponseListener};
use crate::pending::PendingRequests;
use crate::transport::Transport;
use crate::watchdog::{TimeoutWatchdog, WatchdogParams};
use crate::window::{is_ancestor, is_window_closed, WindowId, WindowRef};

/// Per-call options for [`Dispatcher::send`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Origins the target may belong to. Defaults to any origin.
    pub domain: Option<DomainSpec>,
    /// Response deadline in ms; `-1` for none. Defaults to the configured `res_timeout`.
    pub timeout: Option<i64>,
    /// Resolve once the transport accepts the message; no ack or response expected.
    pub fire_and_forget: bool,
}

impl SendOptions {
    pub fn domain(mut self, domain: impl Into<DomainSpec>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn timeout(mut self, timeout_ms: i64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn fire_and_forget(mut self) -> Self {
        self.fire_and_forget = true;
        self
    }
}

/// Sends requests from one window and waits for their responses.
pub struct Dispatcher {
    window: WindowRef,
    origin: String,
    transport: Arc<dyn Transport>,
    handshake: Arc<dyn Handshake>,
    listeners: Arc<ListenerTable>,
    pending: Arc<PendingRequests>,
    config: TimeoutConfig,
}

impl Dispatcher {
    pub fn new(
        window: WindowRef,
        origin: impl Into<String>,
        transport: Arc<dyn Transport>,
        handshake: Arc<dyn Handshake>,
        listeners: Arc<ListenerTable>,
        pending: Arc<PendingRequests>,
        config: TimeoutConfig,
    ) -> Self {
        Self {
            window,
            origin: origin.into(),
            transport,
            handshake,
            listeners,
            pending,
            config,
        }
    }

    /// The window this dispatcher sends from.
    pub fn window(&self) -> &WindowRef {
        &self.window
    }

    /// Origin of the local window.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    pub fn listeners(&self) -> &Arc<ListenerTable> {
        &self.listeners
    }

    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    /// Send `name` with `data` to `target` and wait for the response payload.
    ///
    /// Validation and origin resolution failures are returned before anything is
    /// handed to the transport. Fire-and-forget requests resolve to `Value::Null`
    /// as soon as the transport accepts them.
    pub async fn send(
        &self,
        target: &WindowRef,
        name: &str,
        data: Value,
        opts: SendOptions,
    ) -> XpostResult<Value> {
        let domain = opts.domain.unwrap_or_default();
        let timeout = opts.timeout.unwrap_or(self.config.res_timeout);
        let fire_and_forget = opts.fire_and_forget;
        self.validate(target, name, &domain, timeout)?;

        let span = info_span!("send", name = %name, target = %target.id());
        async move {
            let target_origin = self.resolve_domain(target, &domain).await?;
            let envelope = Envelope::request(&self.origin, name, data, fire_and_forget);

            if fire_and_forget {
                self.submit(target, &target_origin, envelope).await?;
                debug!("fire-and-forget request accepted by transport");
                return Ok(Value::Null);
            }

            self.request(target, &target_origin, envelope, domain, timeout)
                .await
        }
        .instrument(span)
        .await
    }

    fn validate(
        &self,
        target: &WindowRef,
        name: &str,
        domain: &DomainSpec,
        timeout: i64,
    ) -> XpostResult<()> {
        if name.is_empty() {
            return Err(XpostError::Validation("expected message name".into()));
        }
        domain.validate()?;
        if timeout < -1 {
            return Err(XpostError::Validation(format!(
                "timeout must be -1 or a non-negative number of ms, got {timeout}"
            )));
        }
        if is_window_closed(target.as_ref()) {
            self.handshake.forget_window(target.id());
            return Err(XpostError::WindowClosed {
                name: name.to_string(),
                phase: WaitPhase::BeforeSend,
            });
        }
        Ok(())
    }

    /// Work out the origin to address the envelope to.
    async fn resolve_domain(&self, target: &WindowRef, domain: &DomainSpec) -> XpostResult<String> {
        let mut actual = None;
        if is_ancestor(self.window.as_ref(), target.as_ref()) {
            let hello = self
                .handshake
                .await_window_hello(target, self.config.child_window_timeout())
                .await?;
            actual = Some(hello.origin);
        }

        if let Some(literal) = domain.literal() {
            return Ok(literal.to_string());
        }

        let origin = match actual {
            Some(origin) => origin,
            None => self.handshake.say_hello(self, target).await?.origin,
        };
        if !domain.matches(&origin) {
            return Err(XpostError::DomainMismatch {
                expected: domain.to_string(),
                actual: origin,
            });
        }
        Ok(origin)
    }

    async fn submit(&self, target: &WindowRef, target_origin: &str, envelope: Envelope) -> XpostResult<()> {
        let name = envelope.name.clone();
        self.transport
            .send_message(target, target_origin, envelope)
            .await
            .map_err(|e| XpostError::Transport {
                name,
                origin: self.origin.clone(),
                reason: e.to_string(),
            })
    }

    async fn request(
        &self,
        target: &WindowRef,
        target_origin: &str,
        envelope: Envelope,
        domain: DomainSpec,
        timeout: i64,
    ) -> XpostResult<Value> {
        let name = envelope.name.clone();
        let hash = envelope.hash.clone();
        let (listener, rx) = ResponseListener::new(&name, &hash, target, domain);

        let known = self.handshake.is_window_known(target.as_ref());
        let params = WatchdogParams {
            origin: self.origin.clone(),
            ack_timeout_ms: self.config.ack_timeout_for(known),
            res_timeout_ms: response_deadline(timeout),
            cycle: self.config.cycle(),
        };

        self.listeners.add(&hash, listener.clone());
        self.pending.push(target.id(), listener.clone());
        let mut guard = RequestGuard {
            listeners: &self.listeners,
            pending: &self.pending,
            window: target.id(),
            hash: &hash,
            watchdog: Some(TimeoutWatchdog::start(listener.clone(), params)),
            failed: true,
        };

        if let Err(e) = self.submit(target, target_origin, envelope).await {
            listener.settle(Err(e));
        }

        let result = rx.await.unwrap_or_else(|_| {
            Err(XpostError::Cancelled { name: name.clone() })
        });
        guard.failed = result.is_err();
        match &result {
            Ok(_) => debug!(hash = %hash, "request resolved"),
            Err(e) => {
                if matches!(e, XpostError::WindowClosed { .. }) {
                    self.handshake.forget_window(target.id());
                }
                debug!(hash = %hash, error = %e, timeout = e.is_timeout(), "request failed");
            }
        }
        result
    }
}

/// Undoes a request's bookkeeping exactly once, including when the caller drops
/// the `send` future before it settles.
struct RequestGuard<'a> {
    listeners: &'a ListenerTable,
    pending: &'a PendingRequests,
    window: WindowId,
    hash: &'a str,
    watchdog: Option<TimeoutWatchdog>,
    failed: bool,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
        self.pending.remove(self.window, self.hash);
        if self.failed {
            self.listeners.mark_errored(self.hash);
        }
        self.listeners.delete(self.hash);
    }
}
