//! `Bridge`: everything one window needs to talk to its peers.
//!
//! Owns the per-window tables that would otherwise be process-wide state and wires
//! the dispatcher, receiver, handshake and tunnel components together.

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;
use xpost_core::{names, DomainSpec, Envelope, TimeoutConfig, XpostError, XpostResult};

use crate::dispatcher::{Dispatcher, SendOptions};
use crate::handshake::{Handshake, HelloInfo, HelloRegistry};
use crate::listener::ListenerTable;
use crate::method::{MethodCall, MethodTable};
use crate::pending::PendingRequests;
use crate::receiver::{HandlerTable, Receiver, RequestContext};
use crate::transport::Transport;
use crate::tunnel::relay::OpenTunnelRequest;
use crate::tunnel::{InstalledTunnels, TunnelDescriptor, TunnelRegistry, TunnelRelay};
use crate::window::{WindowId, WindowRef};

pub struct Bridge {
    dispatcher: Arc<Dispatcher>,
    receiver: Receiver,
    handlers: Arc<HandlerTable>,
    hellos: Arc<HelloRegistry>,
    methods: Arc<MethodTable>,
    tunnels: Arc<TunnelRegistry>,
    installed: Arc<InstalledTunnels>,
    relay: TunnelRelay,
}

impl Bridge {
    /// Set up messaging for `window`, which lives at `origin`.
    pub fn new(
        window: WindowRef,
        origin: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: TimeoutConfig,
    ) -> XpostResult<Self> {
        config.validate()?;
        let origin = origin.into();

        let listeners = Arc::new(ListenerTable::new());
        let pending = Arc::new(PendingRequests::new());
        let handlers = Arc::new(HandlerTable::new());
        let hellos = Arc::new(HelloRegistry::new());
        let methods = Arc::new(MethodTable::new());
        let tunnels = Arc::new(TunnelRegistry::with_methods(methods.clone()));
        let installed = Arc::new(InstalledTunnels::new());

        let dispatcher = Arc::new(Dispatcher::new(
            window,
            origin.clone(),
            transport.clone(),
            hellos.clone() as Arc<dyn Handshake>,
            listeners.clone(),
            pending,
            config,
        ));
        let receiver = Receiver::new(
            origin.clone(),
            transport,
            listeners,
            handlers.clone(),
            hellos.clone(),
        );
        let relay = TunnelRelay::new(dispatcher.clone(), tunnels.clone(), methods.clone());

        let bridge = Self {
            dispatcher,
            receiver,
            handlers,
            hellos,
            methods,
            tunnels,
            installed,
            relay,
        };
        bridge.register_builtins(origin)?;
        Ok(bridge)
    }

    fn register_builtins(&self, origin: String) -> XpostResult<()> {
        let hellos = self.hellos.clone();
        self.handlers.on(names::HELLO, DomainSpec::Wildcard, move |ctx: RequestContext| {
            hellos.record_hello(ctx.source.id(), &ctx.origin);
            let reply = json!({ "origin": origin });
            async move { Ok(reply) }
        })?;

        let methods = self.methods.clone();
        self.handlers.on(names::METHOD, DomainSpec::Wildcard, move |ctx: RequestContext| {
            let result = serde_json::from_value::<MethodCall>(ctx.data)
                .map_err(|e| XpostError::Codec(e.to_string()))
                .and_then(|call| methods.call(&call.id, call.args));
            async move { result }
        })?;

        let installed = self.installed.clone();
        self.handlers.on(names::OPEN_TUNNEL, DomainSpec::Wildcard, move |ctx: RequestContext| {
            let result = serde_json::from_value::<OpenTunnelRequest>(ctx.data)
                .map_err(|e| XpostError::Codec(e.to_string()))
                .map(|request| {
                    let name = request.name.clone();
                    installed.install(&ctx.source, request);
                    debug!(name = %name, source = %ctx.source.id(), "installed tunnel proxy");
                    json!({ "installed": name })
                });
            async move { result }
        })?;
        Ok(())
    }

    pub fn window(&self) -> &WindowRef {
        self.dispatcher.window()
    }

    pub fn origin(&self) -> &str {
        self.dispatcher.origin()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Serve requests named `name` from origins matching `domain`.
    pub fn on<F, Fut>(&self, name: &str, domain: DomainSpec, handler: F) -> XpostResult<()>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = XpostResult<Value>> + Send + 'static,
    {
        self.handlers.on(name, domain, handler)
    }

    pub fn off(&self, name: &str) -> bool {
        self.handlers.off(name)
    }

    pub async fn send(
        &self,
        target: &WindowRef,
        name: &str,
        data: Value,
        opts: SendOptions,
    ) -> XpostResult<Value> {
        self.dispatcher.send(target, name, data, opts).await
    }

    /// Feed an envelope delivered by the transport.
    pub async fn receive(&self, source: WindowRef, origin: &str, envelope: Envelope) {
        self.receiver.receive(source, origin, envelope).await
    }

    /// Announce ourselves to `window` and learn its origin.
    pub async fn say_hello(&self, window: &WindowRef) -> XpostResult<HelloInfo> {
        self.hellos.say_hello(&self.dispatcher, window).await
    }

    pub fn is_window_known(&self, window: &WindowRef) -> bool {
        self.hellos.is_window_known(window.as_ref())
    }

    pub fn pending_count(&self, window: WindowId) -> usize {
        self.dispatcher.pending().count(window)
    }

    /// Cancel every request in flight to `window`. Takes effect at the next watchdog tick.
    pub fn cancel_all(&self, window: WindowId) -> usize {
        self.dispatcher.pending().cancel_all(window)
    }

    pub fn listeners(&self) -> &ListenerTable {
        self.dispatcher.listeners()
    }

    pub fn tunnels(&self) -> &TunnelRegistry {
        &self.tunnels
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub async fn open_tunnel_to_parent(&self, descriptor: TunnelDescriptor) -> XpostResult<String> {
        self.relay.open_tunnel_to_parent(descriptor).await
    }

    /// Names of tunnels children have installed with us.
    pub fn installed_tunnels(&self) -> Vec<String> {
        self.installed.names()
    }

    /// Invoke an installed tunnel's relay in the child that registered it.
    pub async fn call_tunnel(&self, name: &str, args: Vec<Value>) -> XpostResult<Value> {
        let (source, method) = self
            .installed
            .resolve(name)
            .ok_or_else(|| XpostError::Validation(format!("no live tunnel named {name}")))?;
        let call = MethodCall {
            id: method.id,
            args,
        };
        let data = serde_json::to_value(&call).map_err(|e| XpostError::Codec(e.to_string()))?;
        self.dispatcher
            .send(
                &source,
                names::METHOD,
                data,
                SendOptions::default().domain(DomainSpec::Wildcard),
            )
            .await
    }
}
