//! CLI entry point for the aiod daemon.
//!
//! ```bash
//! aiod                 # control port 18767, streaming port 18768
//! aiod 20000           # control port 20000, streaming port 20001
//! aiod --config /etc/aiod.toml
//! AIOD_LOG_LEVEL=debug aiod
//! ```

use std::path::PathBuf;

use aiod::logging::{self, TracingConfig};
use aiod::{Daemon, DaemonConfig};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(name = "aiod")]
#[command(about = "Serve an AIO data-acquisition board over TCP", long_about = None)]
struct Cli {
    /// Control port; streaming uses the next port up
    port: Option<u16>,

    /// Configuration file (defaults to ./aiod.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DaemonConfig::load(cli.config.as_deref(), cli.port)
        .context("Failed to load configuration")?;
    logging::init(TracingConfig::from_config(&config.logging)?)?;

    let daemon = Daemon::start(config).context("Failed to start daemon")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted");
        }
        () = daemon.wait() => {}
    }

    daemon.shutdown();
    Ok(())
}
