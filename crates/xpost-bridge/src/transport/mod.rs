//! The low-level send primitive.

use futures_util::future::BoxFuture;
use xpost_core::{Envelope, XpostResult};

use crate::window::WindowRef;

/// Hands an envelope to another window.
///
/// The returned future settles once the message has been accepted for delivery.
/// It never guarantees that the peer received it; `domain` is the target origin the
/// underlying channel must enforce (`*` for any).
pub trait Transport: Send + Sync {
    fn send_message<'a>(
        &'a self,
        target: &'a WindowRef,
        domain: &'a str,
        envelope: Envelope,
    ) -> BoxFuture<'a, XpostResult<()>>;
}
