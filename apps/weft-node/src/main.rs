mod config;
mod demo;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::NodeConfig;
use weft_runtime::{DomainConfig, InProcTransport, PolicyDomain};
use weft_types::Location;

/// Weft node host: brings up a policy-domain topology in one process.
#[derive(Parser)]
#[command(name = "weft-node")]
#[command(about = "Weft runtime node - distributed task-graph host")]
#[command(version)]
struct Cli {
    /// Path to the topology configuration file (YAML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,

    /// Log verbosity (-v debug, -vv trace); RUST_LOG wins when set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the topology up and run the demo DAG.
    Run,
    /// Validate the configuration and exit.
    Check,
}

fn init_logging(config: &NodeConfig, verbose: u8) {
    let fallback = match verbose {
        0 => config.logging.filter.clone(),
        1 => "debug".to_owned(),
        _ => "trace".to_owned(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = NodeConfig::load(cli.config.as_deref())?;
    init_logging(&config, cli.verbose);

    if cli.print_config {
        println!("Effective configuration (JSON):\n{}", config.to_json()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check => {
            println!("Configuration is valid");
            println!("Effective configuration (JSON):\n{}", config.to_json()?);
            Ok(())
        }
        Commands::Run => {
            let code = run_node(config).await?;
            std::process::exit(code);
        }
    }
}

async fn run_node(config: NodeConfig) -> Result<i32> {
    let n = config.topology.domains;
    tracing::info!(domains = n, "Bringing up policy-domain topology");

    let mesh = InProcTransport::mesh(n as usize, config.topology.channel_capacity);
    let mut domains = Vec::with_capacity(n as usize);
    for (rank, transport) in mesh.into_iter().enumerate() {
        let mut domain_cfg = DomainConfig::new(Location(rank as u32), n);
        domain_cfg.compute_workers = config.topology.workers_per_domain;
        let domain = PolicyDomain::new(domain_cfg, transport);
        demo::register_funcs(&domain);
        domain.start().await;
        domains.push(domain);
    }

    // First Ctrl-C begins a clean distributed shutdown.
    {
        let pd0 = domains[0].clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, shutting the topology down");
                pd0.initiate_shutdown(130).await;
            }
        });
    }

    demo::launch(&domains, config.demo.rounds).await?;

    let waits = domains
        .iter()
        .map(|d| {
            let d = d.clone();
            async move { d.run_until_shutdown().await }
        })
        .collect::<Vec<_>>();
    let codes = futures::future::join_all(waits).await;
    let code = codes.first().copied().unwrap_or(0);
    tracing::info!(code, "Topology quiesced");
    Ok(code)
}
