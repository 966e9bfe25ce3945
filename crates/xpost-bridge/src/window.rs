//! Window handles: the peer contexts messages are exchanged with.

use std::fmt;
use std::sync::{Arc, Weak};

use xpost_core::XpostResult;

/// Stable identity of a window, used to key per-window bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "win#{}", self.0)
    }
}

/// A context that can be the target or source of messages.
pub trait Window: Send + Sync {
    fn id(&self) -> WindowId;

    /// Whether the window reports itself closed.
    fn is_closed(&self) -> bool;

    /// Probe whether the window object can still be accessed at all.
    ///
    /// A window that navigated to another origin or was torn down may fail here
    /// even though it never reported itself closed.
    fn touch(&self) -> XpostResult<()> {
        Ok(())
    }

    /// The window that embeds or opened this one, if any.
    fn parent(&self) -> Option<WindowRef>;
}

pub type WindowRef = Arc<dyn Window>;

/// Upper bound on the parent chain walked by [`is_ancestor`].
const MAX_FRAME_DEPTH: usize = 64;

/// Whether `ancestor` appears anywhere in `child`'s parent chain.
pub fn is_ancestor(ancestor: &dyn Window, child: &dyn Window) -> bool {
    let target = ancestor.id();
    let mut current = child.parent();
    let mut depth = 0;
    while let Some(win) = current {
        if win.id() == target {
            return true;
        }
        depth += 1;
        if depth >= MAX_FRAME_DEPTH {
            return false;
        }
        current = win.parent();
    }
    false
}

/// Closed, or no longer accessible.
pub fn is_window_closed(window: &dyn Window) -> bool {
    window.touch().is_err() || window.is_closed()
}

/// Upgrade a non-owning reference, returning `None` if the window is gone,
/// inaccessible or closed.
pub fn upgrade_live(window: &Weak<dyn Window>) -> Option<WindowRef> {
    window.upgrade().filter(|w| !is_window_closed(w.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackNet;

    #[test]
    fn ancestry_walks_the_whole_chain() {
        let net = LoopbackNet::new();
        let top = net.open_window("https://top.com", None);
        let mid = net.open_window("https://mid.com", Some(&top));
        let leaf = net.open_window("https://leaf.com", Some(&mid));

        assert!(is_ancestor(top.as_ref(), leaf.as_ref()));
        assert!(is_ancestor(mid.as_ref(), leaf.as_ref()));
        assert!(!is_ancestor(leaf.as_ref(), top.as_ref()));
        assert!(!is_ancestor(leaf.as_ref(), leaf.as_ref()));
    }

    #[test]
    fn unreachable_counts_as_closed() {
        let net = LoopbackNet::new();
        let win = net.open_window("https://a.com", None);
        assert!(!is_window_closed(win.as_ref()));
        win.set_unreachable();
        assert!(is_window_closed(win.as_ref()));

        let weak: Weak<dyn Window> = Arc::downgrade(&(win.clone() as WindowRef));
        assert!(upgrade_live(&weak).is_none());
    }
}
