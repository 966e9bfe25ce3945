//! `xpost close`: close the frame while a request to it is outstanding.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::ValueEnum;
use serde_json::Value;
use xpost_bridge::SendOptions;
use xpost_core::{DomainSpec, MsgType, WaitPhase, XpostError};

use crate::config::Config;
use crate::scene::Scene;

const SLOW: &str = "slow";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Phase {
    /// The frame never acknowledges the request.
    Ack,
    /// The frame acknowledges but never answers.
    Response,
}

impl Phase {
    fn expected(self) -> WaitPhase {
        match self {
            Phase::Ack => WaitPhase::BeforeAck,
            Phase::Response => WaitPhase::BeforeResponse,
        }
    }
}

pub async fn run(cfg: &Config, phase: Phase, after: u64) -> Result<()> {
    let scene = Scene::start(cfg).await?;
    scene
        .frame
        .on(SLOW, DomainSpec::Wildcard, |_| std::future::pending())?;
    if phase == Phase::Ack {
        // Lose the request on the way so no ack ever comes back.
        scene
            .net
            .set_filter(|env| !(env.msg_type == MsgType::Request && env.name == SLOW));
    }

    let frame = scene.frame_win.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(after)).await;
        frame.close();
    });

    let result = scene
        .page
        .send(&scene.frame_ref(), SLOW, Value::Null, SendOptions::default())
        .await;
    match result {
        Err(err @ XpostError::WindowClosed { phase: seen, .. }) if seen == phase.expected() => {
            println!("{err}");
            Ok(())
        }
        Err(err) => bail!("unexpected failure: {err}"),
        Ok(value) => bail!("{SLOW} unexpectedly answered {value}"),
    }
}
