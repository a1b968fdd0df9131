//! rollgated — the progressive delivery daemon.
//!
//! Watches labeled services on a serving platform and gradually shifts
//! traffic toward their newest revision, promoting it once it has held full
//! traffic healthily and rolling back when health criteria fail.
//!
//! Two mutually exclusive modes:
//!
//! - **run** — tick every `strategy.interval` seconds until interrupted
//! - **serve** — listen on an address and run one tick per trigger request
//!
//! # Usage
//!
//! ```text
//! rollgated run --file rollgate.toml
//! rollgated serve --file rollgate.toml --addr 0.0.0.0:8080
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use rollgate_config::Config;
use rollgated::{runner, server, AppState};

#[derive(Parser)]
#[command(name = "rollgated", about = "Progressive delivery for serverless services")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run rollout ticks in a loop until interrupted.
    Run {
        /// The rollout configuration file.
        #[arg(long)]
        file: PathBuf,
    },

    /// Listen for trigger requests and run one tick per request.
    Serve {
        /// The rollout configuration file.
        #[arg(long)]
        file: PathBuf,

        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rollgated=debug,rollgate=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { file } => run_loop(&file).await,
        Command::Serve { file, addr } => serve(&file, addr).await,
    }
}

async fn run_loop(file: &PathBuf) -> anyhow::Result<()> {
    let config = Config::from_file(file)?;
    let state = AppState::from_config(config)?;

    // TODO: handle all configured strategies, not only the first one.
    let strategy = state.config.strategies[0].clone();
    let interval = Duration::from_secs(strategy.interval.max(1) as u64);
    info!(interval_secs = interval.as_secs(), "rollout loop starting");

    loop {
        let errs = runner::run_rollouts(&state, &strategy).await;
        for err in &errs {
            error!(error = %format!("{err:#}"), "rollout failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}

async fn serve(file: &PathBuf, addr: SocketAddr) -> anyhow::Result<()> {
    let config = Config::from_file(file)?;
    let state = AppState::from_config(config)?;

    let router = server::build_router(state);
    info!(%addr, "trigger server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("rollgated stopped");
    Ok(())
}
