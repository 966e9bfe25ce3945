//! xpost: cross-window messaging playground.
//!
//! Runs scripted exchanges between a simulated page and an embedded frame over
//! the in-process loopback transport: handshakes, requests with timeouts,
//! fire-and-forget notifications, windows closing mid-request, and tunnels.

mod commands;
mod config;
mod scene;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// xpost: cross-window request/response
#[derive(Parser)]
#[command(name = "xpost", version, about = "Cross-window request/response over a simulated page and frame")]
struct Cli {
    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Ack timeout for windows not yet known, in ms
    #[arg(long, global = true)]
    ack_timeout: Option<u64>,

    /// Watchdog poll interval in ms
    #[arg(long, global = true)]
    cycle: Option<u64>,

    /// One-way delivery latency between windows in ms
    #[arg(long, global = true)]
    latency: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Say hello to the frame and report its origin
    Ping,

    /// Send a request to a handler in the frame and print the response
    Request {
        /// Message name
        #[arg(default_value = "echo")]
        name: String,

        /// JSON payload
        #[arg(long, default_value = "null")]
        data: String,

        /// How long the frame's handler takes, in ms
        #[arg(long, default_value_t = 0)]
        delay: u64,

        /// Response timeout in ms (-1 waits forever)
        #[arg(long, allow_hyphen_values = true)]
        timeout: Option<i64>,

        /// Acceptable target origin; repeat for a list, `*` for any
        #[arg(long = "domain")]
        domains: Vec<String>,

        /// Regular expression the target origin must match
        #[arg(long, conflicts_with = "domains")]
        pattern: Option<String>,
    },

    /// Send a fire-and-forget notification to the frame
    Notify {
        /// Message name
        #[arg(default_value = "notify")]
        name: String,

        /// JSON payload
        #[arg(long, default_value = "null")]
        data: String,
    },

    /// Close the frame while a request to it is in flight
    Close {
        /// What the request is waiting for when the frame closes
        #[arg(long, value_enum, default_value_t = commands::close::Phase::Response)]
        phase: commands::close::Phase,

        /// Delay before closing, in ms
        #[arg(long, default_value_t = 200)]
        after: u64,
    },

    /// Open a tunnel from the frame to the page and call it
    Tunnel {
        /// JSON array of call arguments
        #[arg(long, default_value = "[]")]
        args: String,

        /// Close the tunnel's source window before calling
        #[arg(long)]
        close_source: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing. RUST_LOG wins over -v.
    let default_filter = if cli.verbose {
        "xpost=debug,xpost_cli=debug,xpost_bridge=debug,xpost_core=debug"
    } else {
        "xpost=warn,xpost_cli=warn,xpost_bridge=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("xpost: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_path);
    let mut cfg = config::Config::load(&config_path)?;
    cfg.apply(&config::Overrides {
        ack_timeout: cli.ack_timeout,
        cycle: cli.cycle,
        latency: cli.latency,
    });

    match cli.command {
        Command::Ping => commands::ping::run(&cfg).await,
        Command::Request {
            name,
            data,
            delay,
            timeout,
            domains,
            pattern,
        } => {
            let args = commands::request::Args {
                name,
                data,
                delay,
                timeout,
                domains,
                pattern,
            };
            commands::request::run(&cfg, args).await
        }
        Command::Notify { name, data } => commands::notify::run(&cfg, &name, &data).await,
        Command::Close { phase, after } => commands::close::run(&cfg, phase, after).await,
        Command::Tunnel { args, close_source } => {
            commands::tunnel::run(&cfg, &args, close_source).await
        }
    }
}
