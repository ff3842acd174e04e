// Operator tooling for the multi-ledger platform

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use mtp_core::{Amount, GlobalId, Ledger};
use mtp_infra::config::PlatformConfig;
use mtp_infra::{
    Coordinator, FileOutOfSyncLog, InMemoryOutOfSyncLog, OutOfSyncLog, SqliteStore,
};
use mtp_ledgers::{
    AdapterRegistry, ElementsAdapter, IrohaAdapter, LedgerAdapter, SimulatedElements, SimulatedIroha,
};
use mtp_observability::TracingOptions;

#[derive(Parser)]
#[command(name = "mtp")]
#[command(about = "Multi-ledger transaction platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop all bookkeeping data and recreate the schema
    Rebuild,

    /// Print the effective configuration
    Config,

    /// Run create/mint/transfer against simulated ledgers and print the result
    Demo {
        /// Amount minted to alice on every ledger
        #[arg(long, default_value = "50")]
        alice_mint: Amount,

        /// Amount minted to bob on every ledger
        #[arg(long, default_value = "15")]
        bob_mint: Amount,

        /// Amount alice sends to bob on every ledger
        #[arg(long, default_value = "5.5")]
        transfer: Amount,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = PlatformConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let mut tracing_options = TracingOptions {
        filter: config.logging.filter.clone(),
        json: config.logging.json,
    };
    if cli.verbose {
        tracing_options.filter = "debug".to_string();
    }
    mtp_observability::init(&tracing_options);

    match cli.command {
        Commands::Rebuild => rebuild(&config).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Demo {
            alice_mint,
            bob_mint,
            transfer,
        } => demo(&config, [alice_mint, bob_mint], transfer).await,
    }
}

async fn rebuild(config: &PlatformConfig) -> anyhow::Result<()> {
    let ledgers = config.ledgers();
    let store = SqliteStore::open(&config.database, &ledgers)
        .await
        .with_context(|| format!("failed to open {}", config.database.url))?;
    store.rebuild(&ledgers).await?;
    tracing::info!(url = %config.database.url, ledgers = ledgers.len(), "bookkeeping store rebuilt");
    Ok(())
}

/// One simulated node per configured ledger, picked by ledger name.
fn simulated_adapters(config: &PlatformConfig) -> anyhow::Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    for ledger in config.ledgers() {
        let adapter: Arc<dyn LedgerAdapter> = match ledger.name.to_ascii_lowercase().as_str() {
            "iroha" => {
                let node = Arc::new(SimulatedIroha::new(&config.iroha));
                Arc::new(IrohaAdapter::new(node, config.iroha.clone()))
            }
            "elements" => {
                let node = Arc::new(SimulatedElements::new(&config.elements));
                Arc::new(ElementsAdapter::new(node, config.elements.clone()))
            }
            other => bail!("no simulator for ledger {other:?}"),
        };
        registry.register(ledger, adapter);
    }
    Ok(registry)
}

async fn demo(config: &PlatformConfig, mints: [Amount; 2], transfer: Amount) -> anyhow::Result<()> {
    let ledgers: Vec<Ledger> = config.ledgers();
    let store = SqliteStore::open(&config.database, &ledgers)
        .await
        .with_context(|| format!("failed to open {}", config.database.url))?;
    // Simulated ledgers start empty, so the bookkeeping store must too.
    store.rebuild(&ledgers).await?;

    let journal: Arc<dyn OutOfSyncLog> = match &config.out_of_sync_log {
        Some(path) => Arc::new(FileOutOfSyncLog::new(path)),
        None => Arc::new(InMemoryOutOfSyncLog::new()),
    };
    let coordinator = Coordinator::new(
        Arc::new(store),
        Arc::new(simulated_adapters(config)?),
        journal,
        config.coordinator.clone(),
    )
    .await?;

    let alice = coordinator.create_account_everywhere("alice").await?;
    let bob = coordinator.create_account_everywhere("bob").await?;
    for created in [&alice, &bob] {
        println!("{}", serde_json::to_string_pretty(created)?);
    }

    for ledger in &ledgers {
        let ledger_id = ledger.ledger_id;
        for ((name, global_id), amount) in [("alice", alice.global_id), ("bob", bob.global_id)].into_iter().zip(mints) {
            let minted = coordinator.mint(ledger_id, global_id, amount).await?;
            println!(
                "{}: minted {} to {} (GlobalTxID {}, ledger tx {})",
                ledger.name, amount, name, minted.global_tx_id, minted.local_tx_id
            );
        }
        let moved = coordinator
            .transfer(ledger_id, alice.global_id, bob.global_id, transfer, "demo")
            .await?;
        println!(
            "{}: alice sent {} to bob (GlobalTxID {}, ledger tx {})",
            ledger.name, transfer, moved.global_tx_id, moved.local_tx_id
        );
    }

    print_balances(&coordinator, &ledgers, &[("alice", alice.global_id), ("bob", bob.global_id)]).await?;

    let report = coordinator.reporter().report().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_clean() {
        bail!("reconciliation found discrepancies");
    }
    Ok(())
}

async fn print_balances(
    coordinator: &Coordinator<SqliteStore>,
    ledgers: &[Ledger],
    users: &[(&str, GlobalId)],
) -> anyhow::Result<()> {
    for (name, global_id) in users {
        for ledger in ledgers {
            let balance = coordinator.balance(*global_id, ledger.ledger_id).await?;
            println!("{name:<8} {:<10} {balance:>12}", ledger.name);
        }
    }
    Ok(())
}
