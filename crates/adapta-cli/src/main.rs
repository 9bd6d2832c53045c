mod config;

use adapta_backends::AdapterRegistry;
use adapta_gateway::GatewayServer;
use adapta_tasks::{InMemoryTaskStore, TaskExecutor};
use clap::{Parser, Subcommand};
use config::AdaptaConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "adapta", about = "Serve any agent backend as an A2A agent")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "adapta.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the agent card the gateway would serve
    Card,
    /// List the adapter kinds available from config
    Kinds,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json);
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let registry = AdapterRegistry::with_builtins();

    match cli.command {
        Commands::Serve { host, port } => {
            let config = AdaptaConfig::load(&cli.config).await?;
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);
            let addr = format!("{host}:{port}");

            let adapter = registry.build(&config.adapter)?;
            let card = config
                .agent
                .card_builder(&format!("http://{addr}"))
                .build_for(adapter.as_ref());
            info!(
                agent = card.name(),
                adapter = adapter.kind(),
                streaming = card.streaming(),
                "Agent ready"
            );

            let executor = TaskExecutor::new(adapter, Arc::new(InMemoryTaskStore::new()));
            let app = GatewayServer::build(card, executor.clone());

            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("adapta gateway listening on {}", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            executor.close().await;
            info!("adapta gateway stopped");
        }
        Commands::Card => {
            let config = AdaptaConfig::load(&cli.config).await?;
            let adapter = registry.build(&config.adapter)?;
            let fallback = format!("http://{}:{}", config.server.host, config.server.port);
            let card = config
                .agent
                .card_builder(&fallback)
                .build_for(adapter.as_ref());
            println!("{}", serde_json::to_string_pretty(&card)?);
            adapter.close().await;
        }
        Commands::Kinds => {
            println!("Adapter kinds:");
            for kind in registry.kinds() {
                println!("  {kind}");
            }
            println!("\nSelect one with `adapter = \"<kind>\"` under [adapter] in the config file.");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining tasks");
}
