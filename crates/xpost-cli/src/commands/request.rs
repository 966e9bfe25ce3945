//! `xpost request`: one request from the page to a handler in the frame.
//!
//! The frame serves `name` by waiting `delay` ms and echoing the payload back
//! together with the origin it came from.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;
use xpost_bridge::SendOptions;
use xpost_core::DomainSpec;

use crate::config::Config;
use crate::scene::{parse_json, Scene};

pub struct Args {
    pub name: String,
    pub data: String,
    pub delay: u64,
    pub timeout: Option<i64>,
    pub domains: Vec<String>,
    pub pattern: Option<String>,
}

pub async fn run(cfg: &Config, args: Args) -> Result<()> {
    let data = parse_json("--data", &args.data)?;
    let domain = domain_from_args(&args.domains, args.pattern.as_deref())?;

    let scene = Scene::start(cfg).await?;
    let delay = Duration::from_millis(args.delay);
    scene.frame.on(&args.name, DomainSpec::Wildcard, move |ctx| async move {
        tokio::time::sleep(delay).await;
        Ok(json!({ "echo": ctx.data, "from": ctx.origin }))
    })?;

    let mut opts = SendOptions::default();
    if let Some(domain) = domain {
        opts = opts.domain(domain);
    }
    if let Some(ms) = args.timeout {
        opts = opts.timeout(ms);
    }

    info!(name = %args.name, "sending request");
    let response = scene
        .page
        .send(&scene.frame_ref(), &args.name, data, opts)
        .await
        .with_context(|| format!("request {} failed", args.name))?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// `--domain` values: one gives an exact origin (or `*`), several give a list.
/// Both flags go through the JSON domain form.
fn domain_from_args(domains: &[String], pattern: Option<&str>) -> Result<Option<DomainSpec>> {
    let value = match (pattern, domains) {
        (Some(p), _) => json!({ "pattern": p }),
        (None, []) => return Ok(None),
        (None, [one]) => json!(one),
        (None, many) => json!(many),
    };
    DomainSpec::from_value(&value)
        .map(Some)
        .context("invalid target domain")
}
