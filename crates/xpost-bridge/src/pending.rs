//! Per-window view of requests still in flight.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::listener::ResponseListener;
use crate::window::WindowId;

/// Outstanding requests grouped by target window, in dispatch order.
#[derive(Default)]
pub struct PendingRequests {
    by_window: Mutex<HashMap<WindowId, Vec<Arc<ResponseListener>>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, window: WindowId, listener: Arc<ResponseListener>) {
        self.by_window.lock().entry(window).or_default().push(listener);
    }

    /// Remove the request with `hash`. Removing twice is harmless.
    pub fn remove(&self, window: WindowId, hash: &str) -> bool {
        let mut by_window = self.by_window.lock();
        let Some(list) = by_window.get_mut(&window) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.hash() != hash);
        let removed = list.len() != before;
        if list.is_empty() {
            by_window.remove(&window);
        }
        removed
    }

    pub fn list(&self, window: WindowId) -> Vec<Arc<ResponseListener>> {
        self.by_window
            .lock()
            .get(&window)
            .cloned()
            .unwrap_or_default()
    }

    /// Flag every request to `window` as cancelled. Returns how many were flagged.
    pub fn cancel_all(&self, window: WindowId) -> usize {
        let list = self.list(window);
        for listener in &list {
            listener.cancel();
        }
        if !list.is_empty() {
            debug!(window = %window, count = list.len(), "cancelled pending requests");
        }
        list.len()
    }

    pub fn count(&self, window: WindowId) -> usize {
        self.by_window.lock().get(&window).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.by_window.lock().values().map(Vec::len).sum()
    }
}
