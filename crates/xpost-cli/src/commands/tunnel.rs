//! `xpost tunnel`: relay calls from the page through the frame to a nested window.
//!
//! A window nested inside the frame owns the relay. The frame registers it and asks
//! the page to install a proxy, then the page calls the proxy by name.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use xpost_bridge::tunnel::{Canary, Relay};
use xpost_bridge::{TunnelDescriptor, WindowRef};
use xpost_core::XpostResult;

use crate::config::Config;
use crate::scene::{parse_json, Scene};

const TUNNEL: &str = "relay";

pub async fn run(cfg: &Config, args: &str, close_source: bool) -> Result<()> {
    let Value::Array(call_args) = parse_json("--args", args)? else {
        bail!("--args must be a JSON array");
    };

    let scene = Scene::start(cfg).await?;
    let nested = scene
        .net
        .open_window(&cfg.windows.frame_origin, Some(&scene.frame_win));
    let nested_ref: WindowRef = nested.clone();

    let canary: Canary = Arc::new(|| -> XpostResult<()> { Ok(()) });
    let relay: Relay = Arc::new(|args: Vec<Value>| -> XpostResult<Value> {
        Ok(json!({ "relayed": args }))
    });
    let id = scene
        .frame
        .open_tunnel_to_parent(TunnelDescriptor::new(TUNNEL, &nested_ref, canary, relay))
        .await
        .context("failed to open tunnel")?;
    println!("opened tunnel {TUNNEL} ({id})");
    println!("installed on page: {}", scene.page.installed_tunnels().join(", "));

    if close_source {
        nested.close();
        println!("closed {}", nested_ref.id());
    }

    let out = scene
        .page
        .call_tunnel(TUNNEL, call_args)
        .await
        .context("tunnel call failed")?;
    println!("{out}");
    if close_source && !scene.frame.tunnels().is_empty() {
        bail!("tunnel with a closed source was not pruned");
    }
    Ok(())
}
