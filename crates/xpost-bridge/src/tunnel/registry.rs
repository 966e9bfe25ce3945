//! Registered tunnel descriptors, pruned as their source windows go away.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};
use xpost_core::{unique_id, XpostResult};

use crate::method::MethodTable;
use crate::window::{Window, WindowRef};

/// Liveness probe supplied by the tunnel owner. An error means the tunnel is dead.
pub type Canary = Arc<dyn Fn() -> XpostResult<()> + Send + Sync>;

/// The function calls are forwarded to.
pub type Relay = Arc<dyn Fn(Vec<Value>) -> XpostResult<Value> + Send + Sync>;

/// A relay registered by a nested window.
#[derive(Clone)]
pub struct TunnelDescriptor {
    pub name: String,
    /// The window that owns the relay. Not kept alive by the registry.
    pub source: Weak<dyn Window>,
    pub canary: Canary,
    pub relay: Relay,
}

impl TunnelDescriptor {
    pub fn new(name: impl Into<String>, source: &WindowRef, canary: Canary, relay: Relay) -> Self {
        Self {
            name: name.into(),
            source: Arc::downgrade(source),
            canary,
            relay,
        }
    }
}

impl fmt::Debug for TunnelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelDescriptor")
            .field("name", &self.name)
            .field("source_alive", &(self.source.strong_count() > 0))
            .finish_non_exhaustive()
    }
}

/// Why a descriptor's source can no longer be used.
fn source_state(descriptor: &TunnelDescriptor) -> Result<WindowRef, &'static str> {
    let source = descriptor.source.upgrade().ok_or("source dropped")?;
    if source.touch().is_err() {
        return Err("source unreachable");
    }
    if source.is_closed() {
        return Err("source closed");
    }
    Ok(source)
}

/// A stored descriptor and the proxy method exposed for it, if any.
struct TunnelEntry {
    descriptor: TunnelDescriptor,
    method: Option<String>,
}

/// Tunnel descriptors keyed by id.
///
/// When built with [`TunnelRegistry::with_methods`], dropping a tunnel also
/// unregisters the proxy method attached to it with [`TunnelRegistry::set_method`].
#[derive(Default)]
pub struct TunnelRegistry {
    tunnels: Mutex<HashMap<String, TunnelEntry>>,
    methods: Option<Arc<MethodTable>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_methods(methods: Arc<MethodTable>) -> Self {
        Self {
            tunnels: Mutex::default(),
            methods: Some(methods),
        }
    }

    /// Prune dead tunnels, then store `descriptor` under a fresh id.
    pub fn add_tunnel_window(&self, descriptor: TunnelDescriptor) -> String {
        self.cleanup();

        let id = unique_id();
        info!(id = %id, name = %descriptor.name, "tunnel registered");
        self.tunnels.lock().insert(
            id.clone(),
            TunnelEntry {
                descriptor,
                method: None,
            },
        );
        id
    }

    /// Tie the proxy method `method_id` to tunnel `id`. Returns `false` if the tunnel is gone.
    pub fn set_method(&self, id: &str, method_id: &str) -> bool {
        match self.tunnels.lock().get_mut(id) {
            Some(entry) => {
                entry.method = Some(method_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Remove every descriptor whose source is gone, unreachable or closed.
    pub fn cleanup(&self) -> Vec<String> {
        let dead: Vec<(String, TunnelEntry)> = {
            let mut tunnels = self.tunnels.lock();
            let ids: Vec<String> = tunnels
                .iter()
                .filter_map(|(id, entry)| match source_state(&entry.descriptor) {
                    Ok(_) => None,
                    Err(reason) => {
                        debug!(id = %id, name = %entry.descriptor.name, reason, "pruning tunnel");
                        Some(id.clone())
                    }
                })
                .collect();
            ids.into_iter()
                .filter_map(|id| tunnels.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        dead.into_iter()
            .map(|(id, entry)| {
                self.release(&entry);
                id
            })
            .collect()
    }

    /// Forward `args` to the relay registered under `id`.
    ///
    /// Returns `None` without calling anything if the tunnel is unknown or dead;
    /// dead tunnels are removed on the way.
    pub fn forward(&self, id: &str, args: Vec<Value>) -> Option<XpostResult<Value>> {
        let Some(descriptor) = self.get(id) else {
            debug!(id = %id, "no tunnel with this id");
            return None;
        };

        if let Err(reason) = source_state(&descriptor) {
            debug!(id = %id, name = %descriptor.name, reason, "dropping call for dead tunnel");
            self.remove(id);
            return None;
        }

        if let Err(e) = (descriptor.canary)() {
            debug!(id = %id, name = %descriptor.name, error = %e, "tunnel canary failed");
            self.remove(id);
            return None;
        }

        Some((descriptor.relay)(args))
    }

    pub fn get(&self, id: &str) -> Option<TunnelDescriptor> {
        self.tunnels.lock().get(id).map(|entry| entry.descriptor.clone())
    }

    pub fn remove(&self, id: &str) -> bool {
        // Release outside the lock: the proxy may be calling into us.
        let entry = self.tunnels.lock().remove(id);
        match entry {
            Some(entry) => {
                self.release(&entry);
                true
            }
            None => false,
        }
    }

    fn release(&self, entry: &TunnelEntry) {
        if let (Some(methods), Some(method)) = (&self.methods, &entry.method) {
            methods.unregister(method);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tunnels.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tunnels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackNet;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use xpost_core::XpostError;

    fn counting_relay(counter: Arc<AtomicU32>) -> Relay {
        Arc::new(move |args: Vec<Value>| -> XpostResult<Value> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Array(args))
        })
    }

    fn healthy() -> Canary {
        Arc::new(|| -> XpostResult<()> { Ok(()) })
    }

    #[test]
    fn forward_passes_args_verbatim() {
        let net = LoopbackNet::new();
        let src: WindowRef = net.open_window("https://frame.com", None);
        let calls = Arc::new(AtomicU32::new(0));
        let registry = TunnelRegistry::new();
        let id = registry.add_tunnel_window(TunnelDescriptor::new(
            "bridge",
            &src,
            healthy(),
            counting_relay(calls.clone()),
        ));

        let out = registry.forward(&id, vec![json!("a"), json!({"b": 2})]).unwrap().unwrap();
        assert_eq!(out, json!(["a", {"b": 2}]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_source_is_pruned_on_next_registration() {
        let net = LoopbackNet::new();
        let a = net.open_window("https://a.com", None);
        let b: WindowRef = net.open_window("https://b.com", None);
        let registry = TunnelRegistry::new();

        let a_ref: WindowRef = a.clone();
        let first = registry.add_tunnel_window(TunnelDescriptor::new(
            "a",
            &a_ref,
            healthy(),
            counting_relay(Arc::new(AtomicU32::new(0))),
        ));
        a.close();

        registry.add_tunnel_window(TunnelDescriptor::new(
            "b",
            &b,
            healthy(),
            counting_relay(Arc::new(AtomicU32::new(0))),
        ));
        assert!(!registry.contains(&first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn call_through_closed_source_is_a_silent_no_op() {
        let net = LoopbackNet::new();
        let src = net.open_window("https://frame.com", None);
        let calls = Arc::new(AtomicU32::new(0));
        let registry = TunnelRegistry::new();
        let src_ref: WindowRef = src.clone();
        let id = registry.add_tunnel_window(TunnelDescriptor::new(
            "bridge",
            &src_ref,
            healthy(),
            counting_relay(calls.clone()),
        ));

        src.close();
        assert!(registry.forward(&id, vec![json!(1)]).is_none());
        assert!(registry.forward(&id, vec![json!(1)]).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn unreachable_source_is_removed() {
        let net = LoopbackNet::new();
        let src = net.open_window("https://frame.com", None);
        let registry = TunnelRegistry::new();
        let src_ref: WindowRef = src.clone();
        let id = registry.add_tunnel_window(TunnelDescriptor::new(
            "bridge",
            &src_ref,
            healthy(),
            counting_relay(Arc::new(AtomicU32::new(0))),
        ));

        src.set_unreachable();
        assert_eq!(registry.cleanup(), vec![id]);
    }

    #[test]
    fn failing_canary_removes_descriptor_and_skips_relay() {
        let net = LoopbackNet::new();
        let src: WindowRef = net.open_window("https://frame.com", None);
        let calls = Arc::new(AtomicU32::new(0));
        let dead = Arc::new(AtomicBool::new(false));
        let canary_flag = dead.clone();
        let canary: Canary = Arc::new(move || -> XpostResult<()> {
            if canary_flag.load(Ordering::SeqCst) {
                Err(XpostError::Validation("frame navigated away".into()))
            } else {
                Ok(())
            }
        });
        let registry = TunnelRegistry::new();
        let id = registry.add_tunnel_window(TunnelDescriptor::new(
            "bridge",
            &src,
            canary,
            counting_relay(calls.clone()),
        ));

        assert!(registry.forward(&id, vec![]).is_some());
        dead.store(true, Ordering::SeqCst);
        assert!(registry.forward(&id, vec![]).is_none());
        assert!(!registry.contains(&id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_id_is_a_no_op() {
        let registry = TunnelRegistry::new();
        assert!(registry.forward("missing", vec![json!(1)]).is_none());
    }

    #[test]
    fn dropping_a_tunnel_unregisters_its_proxy_method() {
        let net = LoopbackNet::new();
        let methods = Arc::new(MethodTable::new());
        let registry = TunnelRegistry::with_methods(methods.clone());

        let mut windows = Vec::new();
        for i in 0..5 {
            let win = net.open_window("https://frame.com", None);
            let win_ref: WindowRef = win.clone();
            let id = registry.add_tunnel_window(TunnelDescriptor::new(
                format!("t{i}"),
                &win_ref,
                healthy(),
                counting_relay(Arc::new(AtomicU32::new(0))),
            ));
            let proxy = methods.register(&format!("t{i}"), Arc::new(|_args: Vec<Value>| -> XpostResult<Value> {
                Ok(Value::Null)
            }));
            assert!(registry.set_method(&id, &proxy.id));
            windows.push((id, win));
        }
        assert_eq!(methods.len(), 5);

        // Pruned by cleanup.
        windows[0].1.close();
        windows[1].1.close();
        assert_eq!(registry.cleanup().len(), 2);
        assert_eq!(methods.len(), 3);

        // Pruned by a forward to a closed source, and by explicit removal.
        windows[2].1.close();
        assert!(registry.forward(&windows[2].0, vec![]).is_none());
        assert!(registry.remove(&windows[3].0));
        assert_eq!(methods.len(), 1);

        windows[4].1.close();
        registry.cleanup();
        assert!(registry.is_empty());
        assert!(methods.is_empty());
    }

    #[test]
    fn method_cannot_be_attached_to_unknown_tunnel() {
        let registry = TunnelRegistry::with_methods(Arc::new(MethodTable::new()));
        assert!(!registry.set_method("missing", "m1"));
    }
}
