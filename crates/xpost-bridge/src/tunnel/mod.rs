//! Tunnel relays: a nested window exposes a relay function to its parent so a
//! distant ancestor can route calls through the intermediate window.

pub mod registry;
pub mod relay;

pub use registry::{Canary, Relay, TunnelDescriptor, TunnelRegistry};
pub use relay::{InstalledTunnel, InstalledTunnels, TunnelRelay};
