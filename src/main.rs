use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cli")]
use leasegate::cli::{ClientArgs, LeaseCommands, run_lease};
use leasegate::config::GatewayConfig;
use leasegate::lease::{LeaseEngine, publisher_from_config, spawn_reclaim_task};
use leasegate::server::{AppState, create_router};
use leasegate::store::{EmbeddedStore, open_store};

#[derive(Parser)]
#[command(name = "leasegate")]
#[command(about = "A lease gateway for concurrent repository writers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Serve {
        /// Path to the configuration file
        #[arg(long, short, env = "LEASEGATE_CONFIG", default_value = "leasegate.toml")]
        config: PathBuf,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Acquire, commit and inspect leases on a running gateway
    #[cfg(feature = "cli")]
    Lease {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: LeaseCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Load and validate a configuration file
    Check {
        /// Path to the configuration file
        #[arg(long, short, env = "LEASEGATE_CONFIG", default_value = "leasegate.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Rewrite the embedded store's journal down to the live leases
    Compact {
        /// Data directory of a stopped gateway
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },
}

fn run_config_check(path: PathBuf) -> anyhow::Result<()> {
    let config = GatewayConfig::load(&path)?;

    let keys: usize = config.repositories.values().map(|r| r.keys.len()).sum();
    println!("{} is valid", path.display());
    println!("  Listen:       {}:{}", config.server.host, config.server.port);
    println!("  Store:        {:?}", config.store.backend);
    println!("  Lease TTL:    {}s", config.leases.ttl_secs);
    println!("  Recovery:     {:?}", config.leases.commit_recovery);
    println!(
        "  Repositories: {} ({keys} keys)",
        config.repositories.len()
    );
    Ok(())
}

fn run_admin_compact(data_dir: PathBuf) -> anyhow::Result<()> {
    let journal = data_dir.join("leases.db");
    if !journal.exists() {
        anyhow::bail!("No lease journal found at {}", journal.display());
    }

    let store = EmbeddedStore::open(&journal)?;
    store.compact()?;
    println!(
        "Compacted {} to {} rows",
        journal.display(),
        store.journal_len()?
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}

async fn run_serve(path: PathBuf) -> anyhow::Result<()> {
    let config = Arc::new(GatewayConfig::load(&path)?);
    if config.repositories.is_empty() {
        tracing::warn!("No repositories configured, every acquisition will be refused");
    }

    let store = open_store(&config.store).await?;
    let publisher = publisher_from_config(&config.publisher);
    let engine = Arc::new(LeaseEngine::new(config.clone(), store.clone(), publisher));
    let reclaim = spawn_reclaim_task(engine.clone(), config.leases.reclaim_interval());

    let state = Arc::new(AppState::new(config.clone(), engine));
    let app = create_router(state);
    let addr = config.server.socket_addr()?;

    info!(
        backend = ?config.store.backend,
        repositories = config.repositories.len(),
        "Starting gateway on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reclaim.shutdown().await;
    store.close().await?;
    info!("Gateway stopped");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("leasegate=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_serve(config))?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Check { config } => run_config_check(config)?,
        },
        Commands::Admin { command } => match command {
            AdminCommands::Compact { data_dir } => run_admin_compact(data_dir)?,
        },
        #[cfg(feature = "cli")]
        Commands::Lease { client, command } => run_lease(&client, command)?,
    }

    Ok(())
}
