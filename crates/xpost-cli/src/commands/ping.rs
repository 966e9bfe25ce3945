//! `xpost ping`: hello round trip from the page to its frame.

use anyhow::{Context, Result};
use tokio::time::Instant;

use crate::config::Config;
use crate::scene::Scene;

pub async fn run(cfg: &Config) -> Result<()> {
    let scene = Scene::start(cfg).await?;

    let started = Instant::now();
    let hello = scene
        .page
        .say_hello(&scene.frame_ref())
        .await
        .context("hello to frame failed")?;

    println!(
        "{} -> {}: origin {} ({} ms)",
        scene.page_win.origin(),
        scene.frame_win.origin(),
        hello.origin,
        started.elapsed().as_millis()
    );
    Ok(())
}
