use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use simvault::{RunId, RunStore, StoreConfig, ValueKind, ValueTypeKey};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "simvault")]
#[command(about = "Inspect and maintain a simvault run-value store")]
struct Cli {
    /// Store directory holding the snapshot and WAL
    #[arg(long, global = true, default_value = "./simvault_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print store statistics as JSON
    Stats,
    /// List runs with their status and digests
    Runs,
    /// Show the binding and physical owner of one run value
    Owner {
        #[arg(long)]
        run: RunId,
        /// parameter, table or generation
        #[arg(long)]
        kind: ValueKind,
        #[arg(long)]
        hid: u64,
    },
    /// Delete a run, re-parenting values other runs still share
    DeleteRun {
        #[arg(long)]
        run: RunId,
    },
    /// Check bindings and physical rows against the dedup invariants
    Verify,
    /// Write a snapshot and truncate the WAL
    Checkpoint,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("simvault=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if !cli.data_dir.exists() {
        return Err(anyhow!("data dir does not exist: {}", cli.data_dir.display()));
    }

    let store = RunStore::open(StoreConfig::persistent(&cli.data_dir))
        .await
        .with_context(|| format!("failed to open store at {}", cli.data_dir.display()))?;

    match cli.command {
        Commands::Stats => print_json(&store.stats().await)?,
        Commands::Runs => print_json(&store.list_runs().await)?,
        Commands::Owner { run, kind, hid } => {
            let binding = store
                .binding(run, ValueTypeKey { kind, hid })
                .await
                .with_context(|| format!("no {} {} bound to run {}", kind, hid, run))?;
            print_json(&binding)?;
        }
        Commands::DeleteRun { run } => {
            let report = store
                .delete_run(run)
                .await
                .with_context(|| format!("failed to delete run {}", run))?;
            print_json(&report)?;
        }
        Commands::Verify => {
            store.verify().await.context("store verification failed")?;
            println!("ok");
        }
        Commands::Checkpoint => {
            store.checkpoint().await.context("checkpoint failed")?;
            println!("checkpoint written to {}", cli.data_dir.display());
        }
    }

    Ok(())
}
