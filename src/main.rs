use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use taskbridge::config::BridgeConfig;
use taskbridge::server;

#[derive(Parser)]
#[command(
    name = "taskbridge",
    version,
    about = "Bidirectional task sync between an internal backend and an external project-management service"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge server (webhook receiver, task API, dashboard data).
    Serve {
        /// Path to the TOML configuration file.
        #[arg(short, long, default_value = "taskbridge.toml")]
        config: PathBuf,

        /// Override the configured listen port.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Build the identity mapping once, print it as JSON, and exit.
    Mapping {
        #[arg(short, long, default_value = "taskbridge.toml")]
        config: PathBuf,
    },
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("taskbridge=info,tower_http=warn")
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, port } => {
            let mut config = BridgeConfig::load(&config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            server::start_server(config).await
        }
        Command::Mapping { config } => {
            let config = BridgeConfig::load(&config)?;
            let state = server::build_state(&config)?;
            let report = state.mapper.report().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            state.queue.shutdown().await;
            Ok(())
        }
    }
}
