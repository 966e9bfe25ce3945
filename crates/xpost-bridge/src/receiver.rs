//! Inbound side: answers requests and routes acks/responses to their listeners.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use xpost_core::{AckStatus, DomainSpec, Envelope, MsgType, XpostError, XpostResult};

use crate::handshake::HelloRegistry;
use crate::listener::ListenerTable;
use crate::transport::Transport;
use crate::window::WindowRef;

/// Everything a request handler gets to see.
#[derive(Clone)]
pub struct RequestContext {
    pub source: WindowRef,
    /// Origin the request was delivered from.
    pub origin: String,
    pub name: String,
    pub data: Value,
}

pub type Handler = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, XpostResult<Value>> + Send + Sync>;

struct HandlerEntry {
    domain: DomainSpec,
    handler: Handler,
}

/// Request handlers keyed by message name.
#[derive(Default)]
pub struct HandlerTable {
    handlers: Mutex<HashMap<String, HandlerEntry>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`, accepting requests from origins matching `domain`.
    pub fn on<F, Fut>(&self, name: &str, domain: DomainSpec, handler: F) -> XpostResult<()>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = XpostResult<Value>> + Send + 'static,
    {
        if name.is_empty() {
            return Err(XpostError::Validation("expected handler name".into()));
        }
        domain.validate()?;

        let mut handlers = self.handlers.lock();
        if handlers.contains_key(name) {
            return Err(XpostError::Validation(format!(
                "a handler for {name} is already registered"
            )));
        }
        let handler: Handler = Arc::new(move |ctx| handler(ctx).boxed());
        handlers.insert(name.to_string(), HandlerEntry { domain, handler });
        Ok(())
    }

    pub fn off(&self, name: &str) -> bool {
        self.handlers.lock().remove(name).is_some()
    }

    /// Find the handler for `name` willing to serve `origin`.
    pub fn lookup(&self, name: &str, origin: &str) -> Result<Handler, String> {
        let handlers = self.handlers.lock();
        match handlers.get(name) {
            Some(entry) if entry.domain.matches(origin) => Ok(entry.handler.clone()),
            Some(entry) => Err(format!(
                "request origin {origin} does not match domain {} for {name}",
                entry.domain
            )),
            None => Err(format!("no handler for {name}")),
        }
    }
}

/// Processes envelopes delivered to one window.
pub struct Receiver {
    origin: String,
    transport: Arc<dyn Transport>,
    listeners: Arc<ListenerTable>,
    handlers: Arc<HandlerTable>,
    hellos: Arc<HelloRegistry>,
}

impl Receiver {
    pub fn new(
        origin: impl Into<String>,
        transport: Arc<dyn Transport>,
        listeners: Arc<ListenerTable>,
        handlers: Arc<HandlerTable>,
        hellos: Arc<HelloRegistry>,
    ) -> Self {
        Self {
            origin: origin.into(),
            transport,
            listeners,
            handlers,
            hellos,
        }
    }

    /// Handle `envelope` delivered from `source`, whose origin the transport vouches for.
    pub async fn receive(&self, source: WindowRef, origin: &str, envelope: Envelope) {
        self.hellos.mark_known(source.id());

        match envelope.msg_type {
            MsgType::Ack => {
                self.listeners.handle_ack(&envelope.hash, origin);
            }
            MsgType::Response => {
                let result = match envelope.ack {
                    Some(AckStatus::Error) => Err(envelope
                        .error
                        .unwrap_or_else(|| "unknown error".to_string())),
                    _ => Ok(envelope.data),
                };
                self.listeners.handle_response(&envelope.hash, origin, result);
            }
            MsgType::Request => self.handle_request(source, origin, envelope).await,
        }
    }

    async fn handle_request(&self, source: WindowRef, origin: &str, envelope: Envelope) {
        let handler = self.handlers.lookup(&envelope.name, origin);
        let reply = !envelope.fire_and_forget;

        let result = match handler {
            Ok(handler) => {
                if reply {
                    let ack = Envelope::ack_for(&envelope, &self.origin);
                    if let Err(e) = self.transport.send_message(&source, origin, ack).await {
                        warn!(name = %envelope.name, error = %e, "failed to send ack");
                        return;
                    }
                }
                let ctx = RequestContext {
                    source: source.clone(),
                    origin: origin.to_string(),
                    name: envelope.name.clone(),
                    data: envelope.data.clone(),
                };
                handler(ctx).await.map_err(|e| e.to_string())
            }
            Err(reason) => {
                warn!(name = %envelope.name, origin = %origin, "{}", reason);
                Err(reason)
            }
        };

        if !reply {
            if let Err(e) = result {
                debug!(name = %envelope.name, error = %e, "fire-and-forget request failed");
            }
            return;
        }

        let response = Envelope::response_for(&envelope, &self.origin, result);
        if let Err(e) = self.transport.send_message(&source, origin, response).await {
            warn!(name = %envelope.name, error = %e, "failed to send response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn lookup_enforces_handler_domain() {
        let table = HandlerTable::new();
        table
            .on("getUser", DomainSpec::from("https://parent.com"), |_ctx| async {
                Ok(json!({"id": 1}))
            })
            .unwrap();

        assert!(table.lookup("getUser", "https://parent.com").is_ok());
        let err = table.lookup("getUser", "https://evil.com").err().unwrap();
        assert!(err.contains("does not match"));
        assert_eq!(table.lookup("other", "https://parent.com").err().unwrap(), "no handler for other");
    }

    #[test]
    fn duplicate_and_empty_names_are_rejected() {
        let table = HandlerTable::new();
        table.on("a", DomainSpec::Wildcard, |_| async { Ok(Value::Null) }).unwrap();
        assert!(table.on("a", DomainSpec::Wildcard, |_| async { Ok(Value::Null) }).is_err());
        assert!(table.on("", DomainSpec::Wildcard, |_| async { Ok(Value::Null) }).is_err());
        assert!(table.off("a"));
        assert!(!table.off("a"));
    }
}
