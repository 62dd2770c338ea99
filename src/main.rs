//! Multisig Wallet Service CLI Application
//!
//! Runs the REST API server and operator commands over the persisted state.
//! A data directory is owned by one process at a time, so the operator
//! commands only run while no server is using it.

use clap::{Parser, Subcommand};
use multisig_wallet_service::api::{create_router, ApiState};
use multisig_wallet_service::cli::{self, AppState};
use multisig_wallet_service::multisig::EngineConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "wallet-service")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Transaction-proposal and quorum engine for multisig wallets", long_about = None)]
struct Cli {
    /// Data directory for service state
    #[arg(short, long, default_value = ".wallet_service_data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Proposal lifetime in seconds (0 disables expiry)
        #[arg(long, default_value = "86400")]
        ttl_secs: u64,

        /// Seconds between expiry sweeps
        #[arg(long, default_value = "60")]
        sweep_interval_secs: u64,
    },

    /// Expire stale proposals and release their UTXOs (offline; `serve` sweeps by itself)
    Sweep,

    /// List proposals
    Proposals {
        /// Only proposals of this wallet
        #[arg(short, long)]
        wallet: Option<String>,

        /// Only proposals in this state (draft, pending, signed, ...)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show a wallet
    Wallet {
        /// Wallet id
        #[arg(short, long)]
        id: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if cli::has_state(&cli.data_dir) {
        println!("📂 Loading service state from {:?}...", cli.data_dir);
    } else {
        println!("🆕 Creating service state in {:?}...", cli.data_dir);
    }

    match cli.command {
        Commands::Serve {
            port,
            ttl_secs,
            sweep_interval_secs,
        } => {
            let config = EngineConfig {
                proposal_ttl_secs: (ttl_secs > 0).then_some(ttl_secs),
                ..Default::default()
            };
            let state = AppState::new(cli.data_dir.clone(), config)?;
            run_server(state, port, sweep_interval_secs)?;
        }

        Commands::Sweep => {
            let state = AppState::new(cli.data_dir.clone(), EngineConfig::default())?;
            cli::cmd_sweep(&state)?;
        }

        Commands::Proposals { wallet, status } => {
            let state = AppState::new(cli.data_dir.clone(), EngineConfig::default())?;
            cli::cmd_proposals(&state, wallet.as_deref(), status.as_deref())?;
        }

        Commands::Wallet { id } => {
            let state = AppState::new(cli.data_dir.clone(), EngineConfig::default())?;
            cli::cmd_wallet(&state, &id)?;
        }
    }

    Ok(())
}

fn run_server(
    state: AppState,
    port: u16,
    sweep_interval_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let manager = state.manager.clone();

        // Background expiry sweep
        let sweeper = manager.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval_secs.max(1)));
            loop {
                interval.tick().await;
                let manager = sweeper.clone();
                let result =
                    tokio::task::spawn_blocking(move || manager.expire_stale(chrono::Utc::now()))
                        .await;
                match result {
                    Ok(Ok(expired)) if !expired.is_empty() => {
                        log::info!("Sweep expired {} proposals", expired.len());
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => log::error!("Expiry sweep failed: {}", e),
                    Err(e) => log::error!("Expiry sweep task panicked: {}", e),
                }
            }
        });

        let app = create_router(ApiState { manager });

        let addr = format!("0.0.0.0:{}", port);
        println!("🚀 REST API server starting on http://localhost:{}", port);
        println!("   Outbox: {:?}", state.outbox_path());

        // Ctrl+C stops the server and lets the store release the data directory
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c().await.ok();
                println!("\n📴 Shutting down wallet service...");
            })
            .await?;

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}
