//! xpost-core: Shared protocol library for cross-window request/response messaging.
//!
//! Provides the wire envelope, length-prefixed CBOR codec, domain specifications
//! and origin matching, timeout policy, unique id generation, and the error taxonomy.

pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod id;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{cbor_decode, frame_encode, FrameDecoder};
pub use config::TimeoutConfig;
pub use domain::{DomainSpec, WILDCARD};
pub use error::{WaitPhase, XpostError, XpostResult};
pub use id::unique_id;
pub use messages::{names, AckStatus, Envelope, MsgType};
