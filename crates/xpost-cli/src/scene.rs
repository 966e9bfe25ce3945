//! The simulated page with one embedded frame.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;
use xpost_bridge::{Bridge, LoopbackNet, LoopbackWindow, WindowRef};

use crate::config::Config;

pub struct Scene {
    pub net: Arc<LoopbackNet>,
    pub page_win: Arc<LoopbackWindow>,
    pub frame_win: Arc<LoopbackWindow>,
    pub page: Arc<Bridge>,
    pub frame: Arc<Bridge>,
}

impl Scene {
    /// Open the page and its frame, attach bridges, and let the frame say hello
    /// to the page the way an embedded document announces itself on load.
    pub async fn start(cfg: &Config) -> Result<Self> {
        let net = LoopbackNet::new();
        let page_win = net.open_window(&cfg.windows.page_origin, None);
        let frame_win = net.open_window(&cfg.windows.frame_origin, Some(&page_win));
        let page = net
            .bridge(&page_win, cfg.timeouts.clone())
            .context("failed to set up page bridge")?;
        let frame = net
            .bridge(&frame_win, cfg.timeouts.clone())
            .context("failed to set up frame bridge")?;

        let page_ref: WindowRef = page_win.clone();
        frame
            .say_hello(&page_ref)
            .await
            .context("frame failed to greet the page")?;
        debug!(page = %page_win.origin(), frame = %frame_win.origin(), "scene ready");

        net.set_latency(Duration::from_millis(cfg.windows.latency_ms));
        Ok(Self {
            net,
            page_win,
            frame_win,
            page,
            frame,
        })
    }

    pub fn frame_ref(&self) -> WindowRef {
        self.frame_win.clone()
    }
}

/// Parse a JSON command-line argument.
pub fn parse_json(what: &str, raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).with_context(|| format!("{what} is not valid JSON: {raw}"))
}
