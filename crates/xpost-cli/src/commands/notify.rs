//! `xpost notify`: fire-and-forget message to the frame.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use xpost_bridge::SendOptions;
use xpost_core::DomainSpec;

use crate::config::Config;
use crate::scene::{parse_json, Scene};

/// How long to wait for the frame to see the notification before giving up.
const DELIVERY_WAIT: Duration = Duration::from_secs(2);

pub async fn run(cfg: &Config, name: &str, data: &str) -> Result<()> {
    let data = parse_json("--data", data)?;
    let scene = Scene::start(cfg).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    scene.frame.on(name, DomainSpec::Wildcard, move |ctx| {
        let _ = tx.send(ctx.data);
        async { Ok(serde_json::Value::Null) }
    })?;

    let ret = scene
        .page
        .send(&scene.frame_ref(), name, data, SendOptions::default().fire_and_forget())
        .await
        .with_context(|| format!("notification {name} was not accepted"))?;
    println!("sent {name} (returned {ret})");

    let seen = tokio::time::timeout(DELIVERY_WAIT, rx.recv())
        .await
        .ok()
        .flatten()
        .context("frame never received the notification")?;
    println!("frame received {seen}");
    Ok(())
}
