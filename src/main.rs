use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use inputd::config::InputdConfig;
use inputd::event_dispatcher::transport::{MemoryTransport, RemoteInputTransport, TcpTransport};
use inputd::replay::{self, ReplayScript};

#[derive(Parser, Debug)]
#[command(name = "inputd")]
#[command(about = "Forward captured input to a remote session")]
struct Args {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed a script of raw input through the pipeline
    Replay {
        #[arg(short, long, value_name = "FILE")]
        script: PathBuf,

        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Overrides `transport.address`
        #[arg(short, long, value_name = "ADDR")]
        address: Option<String>,

        /// Record events in memory instead of connecting
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the effective configuration
    Config {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_tracing(args.verbose);

    match args.command {
        Command::Replay {
            script,
            config,
            address,
            dry_run,
        } => {
            let config = load_config(config.as_deref())?;
            let script = ReplayScript::load(&script)?;
            let (transport, address): (Arc<dyn RemoteInputTransport>, String) = if dry_run {
                (Arc::new(MemoryTransport::new()), "memory".to_owned())
            } else {
                let address = address.unwrap_or_else(|| config.transport.address.clone());
                (Arc::new(TcpTransport::new()), address)
            };

            let report = replay::run(&config, &script, transport.clone(), &address).await?;
            transport.disconnect().await;
            println!("{}", serde_json::to_string_pretty(&report).context("failed to render report")?);
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<InputdConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            InputdConfig::load(path)
        }
        None => Ok(InputdConfig::default()),
    }
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("inputd=debug,info")
        } else {
            EnvFilter::new("inputd=info,warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
