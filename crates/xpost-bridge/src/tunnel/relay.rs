//! Opening a tunnel to the parent window, and the parent's record of installed tunnels.
//!
//! Only serializable data crosses the window boundary: the child keeps the
//! descriptor in its [`TunnelRegistry`] and sends the parent a [`MethodRef`] to a
//! proxy that looks the descriptor up by id on every call.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use xpost_core::{names, DomainSpec, XpostError, XpostResult};

use super::registry::{TunnelDescriptor, TunnelRegistry};
use crate::dispatcher::{Dispatcher, SendOptions};
use crate::method::{MethodFn, MethodRef, MethodTable};
use crate::window::{upgrade_live, Window, WindowRef};

/// Body of an `xpost_open_tunnel` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTunnelRequest {
    pub name: String,
    pub relay: MethodRef,
}

/// Child side: registers relays and asks the parent to install proxies for them.
pub struct TunnelRelay {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<TunnelRegistry>,
    methods: Arc<MethodTable>,
}

impl TunnelRelay {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        registry: Arc<TunnelRegistry>,
        methods: Arc<MethodTable>,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            methods,
        }
    }

    /// Register `descriptor` and ask the parent window to install a forwarding proxy.
    ///
    /// Returns the tunnel id. Fails with [`XpostError::NoParent`] when the local
    /// window has no parent; nothing is registered in that case.
    pub async fn open_tunnel_to_parent(&self, descriptor: TunnelDescriptor) -> XpostResult<String> {
        let parent = self
            .dispatcher
            .window()
            .parent()
            .ok_or(XpostError::NoParent)?;

        let name = descriptor.name.clone();
        let id = self.registry.add_tunnel_window(descriptor);

        // Weak: the registry owns the proxy's method id, the proxy must not own the registry.
        let registry = Arc::downgrade(&self.registry);
        let tunnel_id = id.clone();
        let proxy: MethodFn = Arc::new(move |args: Vec<Value>| -> XpostResult<Value> {
            let Some(registry) = registry.upgrade() else {
                return Ok(Value::Null);
            };
            Ok(registry
                .forward(&tunnel_id, args)
                .transpose()?
                .unwrap_or(Value::Null))
        });
        let relay = self.methods.register(&name, proxy);
        self.registry.set_method(&id, &relay.id);

        match self.request_install(&parent, &name, &relay).await {
            Ok(()) => {
                info!(id = %id, name = %name, parent = %parent.id(), "tunnel opened to parent");
                Ok(id)
            }
            Err(e) => {
                self.methods.unregister(&relay.id);
                self.registry.remove(&id);
                Err(e)
            }
        }
    }

    async fn request_install(&self, parent: &WindowRef, name: &str, relay: &MethodRef) -> XpostResult<()> {
        let request = OpenTunnelRequest {
            name: name.to_string(),
            relay: relay.clone(),
        };
        let data = serde_json::to_value(&request).map_err(|e| XpostError::Codec(e.to_string()))?;
        self.dispatcher
            .send(
                parent,
                names::OPEN_TUNNEL,
                data,
                SendOptions::default().domain(DomainSpec::Wildcard),
            )
            .await?;
        Ok(())
    }
}

/// A proxy installed on behalf of a child window.
#[derive(Clone)]
pub struct InstalledTunnel {
    pub name: String,
    pub source: Weak<dyn Window>,
    pub method: MethodRef,
}

/// Parent side: proxies children asked us to install, keyed by tunnel name.
#[derive(Default)]
pub struct InstalledTunnels {
    tunnels: Mutex<HashMap<String, InstalledTunnel>>,
}

impl InstalledTunnels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, source: &WindowRef, request: OpenTunnelRequest) {
        let tunnel = InstalledTunnel {
            name: request.name.clone(),
            source: Arc::downgrade(source),
            method: request.relay,
        };
        if self
            .tunnels
            .lock()
            .insert(request.name.clone(), tunnel)
            .is_some()
        {
            warn!(name = %request.name, "replacing installed tunnel");
        }
    }

    /// The live source window and method for `name`. Dead entries are dropped.
    pub fn resolve(&self, name: &str) -> Option<(WindowRef, MethodRef)> {
        let mut tunnels = self.tunnels.lock();
        let tunnel = tunnels.get(name)?;
        match upgrade_live(&tunnel.source) {
            Some(source) => Some((source, tunnel.method.clone())),
            None => {
                tunnels.remove(name);
                None
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tunnels.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
