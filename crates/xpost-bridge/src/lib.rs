//! xpost-bridge: timeout-bounded request/response messaging between windows.
//!
//! Windows can only exchange unordered, best-effort messages through a single
//! send primitive ([`Transport`]). On top of that this crate provides correlated
//! requests with a two-phase ack/response watchdog, origin discovery through a
//! hello handshake, and tunnel relays that let a nested window expose a function
//! to its ancestors.
//!
//! # Quick Start
//!
//! ```no_run
//! use serde_json::json;
//! use xpost_bridge::{LoopbackNet, SendOptions, WindowRef};
//! use xpost_core::{DomainSpec, TimeoutConfig};
//!
//! # async fn example() -> xpost_core::XpostResult<()> {
//! let net = LoopbackNet::new();
//! let page = net.open_window("https://page.example", None);
//! let frame = net.open_window("https://frame.example", Some(&page));
//!
//! let page_bridge = net.bridge(&page, TimeoutConfig::default())?;
//! let frame_bridge = net.bridge(&frame, TimeoutConfig::default())?;
//! frame_bridge.on("getUser", DomainSpec::from("https://page.example"), |ctx| async move {
//!     Ok(json!({ "id": ctx.data["id"], "name": "alice" }))
//! })?;
//! frame_bridge.say_hello(&(page.clone() as WindowRef)).await?;
//!
//! let frame_ref: WindowRef = frame.clone();
//! let user = page_bridge
//!     .send(&frame_ref, "getUser", json!({ "id": 7 }), SendOptions::default().timeout(2000))
//!     .await?;
//! println!("{user}");
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod dispatcher;
pub mod handshake;
pub mod listener;
pub mod loopback;
pub mod method;
pub mod pending;
pub mod receiver;
pub mod transport;
pub mod tunnel;
pub mod watchdog;
pub mod window;

// Re-export primary public types.
pub use bridge::Bridge;
pub use dispatcher::{Dispatcher, SendOptions};
pub use handshake::{Handshake, HelloInfo, HelloRegistry};
pub use listener::{ListenerTable, ResponseListener};
pub use loopback::{LoopbackNet, LoopbackTransport, LoopbackWindow};
pub use method::{MethodRef, MethodTable};
pub use pending::PendingRequests;
pub use receiver::{HandlerTable, Receiver, RequestContext};
pub use transport::Transport;
pub use tunnel::{TunnelDescriptor, TunnelRegistry, TunnelRelay};
pub use watchdog::{TimeoutWatchdog, WatchdogParams};
pub use window::{Window, WindowId, WindowRef};

// Re-export xpost-core error types for convenience.
pub use xpost_core::{XpostError, XpostResult};
