//! Microbus command-line utility.
//!
//! Provides the `probe` command used by orchestration health checks: it
//! calls the per-instance health endpoint of a service and reports success
//! through the exit code.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use microbus_core::{config::Settings, health, transport::BusConfig, Client};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Health-check a service instance; exits 0 on success
    Probe(ProbeArgs),
}

#[derive(Args)]
struct ProbeArgs {
    /// Service name to probe
    service: String,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bus server URL (overrides configuration)
    #[arg(long, env = "MICROBUS_BUS_URL")]
    url: Option<String>,

    /// Instance id serving the health endpoint
    #[arg(long, env = "MICROBUS_INSTANCE_ID")]
    instance_id: Option<String>,

    /// Request timeout in milliseconds (overrides configuration)
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => match probe(args).await {
            Ok(()) => {
                println!("probe succeeded");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("probe failed: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn probe(args: ProbeArgs) -> anyhow::Result<()> {
    let settings = Settings::load(args.config.as_deref())?;
    let url = args.url.unwrap_or_else(|| settings.bus.url.clone());
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| settings.request_timeout());
    let instance_id = args
        .instance_id
        .or_else(|| settings.instance_id.clone())
        .context("no instance id: pass --instance-id or set MICROBUS_INSTANCE_ID")?;

    println!("probing service {}", args.service);
    let connection = BusConfig::nats(url).connect().await?;
    let client = Client::new(&args.service, connection).with_timeout(timeout);
    client
        .request(&health::endpoint_name(&instance_id), None)
        .await?;
    Ok(())
}
