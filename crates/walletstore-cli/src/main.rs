mod cli;
mod config;
mod storage;
mod wallets;

use crate::cli::ConfigCommand;
use clap::Parser;
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use walletstore_core::wallet::{Store, StoreLocationProvider};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Version => print_version(),
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Health => {
            let store = storage::store_from_config(&config).await?;
            run_store_health(&store).await?;
        }
        cli::Command::Location => {
            let store = storage::store_from_config(&config).await?;
            println!("{}", store.location());
        }
        cli::Command::Wallet(cmd) => {
            let store = storage::store_from_config(&config).await?;
            wallets::handle_wallet(cmd, &store).await?
        }
        cli::Command::Account(cmd) => {
            let store = storage::store_from_config(&config).await?;
            wallets::handle_account(cmd, &store).await?
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("walletstore {}", env!("CARGO_PKG_VERSION"));
}

/// Enumerate every wallet, which exercises listing, fetching and decryption.
async fn run_store_health<S: Store + StoreLocationProvider>(store: &S) -> Result<usize> {
    let wallets = wallets::list_wallets(store).await;
    info!(
        backend = store.name(),
        location = %store.location(),
        wallets = wallets.len(),
        "store reachable"
    );
    println!("Storage: ok ({} wallets at {})", wallets.len(), store.location());
    Ok(wallets.len())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
