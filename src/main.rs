//! sqlhook - hook and invalidation demo
//!
//! Runs a reactive query against the in-memory backend while writing to it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use sqlhook::driver::{Driver, MockBackend, QueryExecutor};
use sqlhook::hook::{EventKind, HookEvent, HookSettings};
use sqlhook::invalidation::{InvalidationHandler, TableId, TableSet};
use sqlhook::repository::Repository;
use sqlhook::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sqlhook")]
#[command(about = "Driver hooks and table invalidation demo")]
struct Cli {
    /// Path to the YAML config file (defaults to ./sqlhook.yaml)
    #[arg(short, long, global = true, env = "SQLHOOK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch tables with a reactive query while writing to the mock backend
    Demo {
        /// Comma-separated tables the reactive query depends on
        #[arg(short, long, value_delimiter = ',', default_value = "users,orders")]
        watch: Vec<String>,

        /// Number of autocommit writes, rotating over users, orders and payments
        #[arg(long, default_value = "3")]
        writes: usize,
    },

    /// Print the effective configuration
    Config,
}

const DEMO_TABLES: [&str; 3] = ["users", "orders", "payments"];

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlhook=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Demo { watch, writes } => run_demo(config, watch, writes).await,
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

async fn run_demo(config: Config, watch: Vec<String>, writes: usize) -> Result<()> {
    let driver = Driver::new(MockBackend::new(), HookSettings::from_config(&config));
    let handler = InvalidationHandler::install(&driver)?;

    let _audit = driver
        .hook()
        .subscribe([EventKind::AfterCrudRepoStatement], |event| async move {
            if let HookEvent::AfterCrud {
                op,
                dependent_tables,
                result,
                ..
            } = &*event
            {
                tracing::info!(op = ?op, tables = ?dependent_tables, ok = result.is_ok(), "Write");
            }
            Ok::<_, anyhow::Error>(())
        })?;

    let watched: TableSet = watch.iter().map(|t| t.trim()).filter(|t| !t.is_empty()).collect();
    tracing::info!(tables = ?watched, "Starting reactive query");

    let reader = driver.clone();
    let query_tables: Vec<TableId> = watched.iter().cloned().collect();
    let mut results = driver.listen_for_invalidation(watched, move || {
        let reader = reader.clone();
        let tables = query_tables.clone();
        async move {
            let mut total = 0;
            for table in &tables {
                total += reader
                    .fetch_all(&format!("SELECT * FROM {table}"))
                    .await?
                    .len();
            }
            Ok::<_, sqlhook::driver::SqlError>(total)
        }
    })?;

    let shutdown = CancellationToken::new();
    let listener_shutdown = shutdown.clone();
    let listener = tokio::spawn(async move {
        let mut emissions = 0usize;
        loop {
            tokio::select! {
                _ = listener_shutdown.cancelled() => break,
                next = results.next() => match next {
                    Some(Ok(rows)) => {
                        emissions += 1;
                        tracing::info!(emission = emissions, rows, "Reactive query result");
                    }
                    Some(Err(e)) => tracing::warn!(error = %e, "Reactive query failed"),
                    None => break,
                },
            }
        }
        emissions
    });

    // Autocommit writes publish immediately.
    for i in 0..writes {
        let table = DEMO_TABLES[i % DEMO_TABLES.len()];
        Repository::new(table)
            .insert(&driver, &format!(r#"INSERT INTO {table} {{"seq": {i}}}"#))
            .await?;
        settle().await;
    }

    // A committed transaction publishes its tables once, on commit.
    let conn = driver.acquire().await?;
    let tx = conn.begin().await?;
    Repository::new("users")
        .insert(&tx, r#"INSERT INTO users {"name": "ada"}"#)
        .await?;
    Repository::new("orders")
        .insert(&tx, r#"INSERT INTO orders {"item": "tea"}"#)
        .await?;
    tracing::info!("Committing transaction");
    tx.commit().await?;
    settle().await;

    // A rolled-back transaction publishes nothing.
    let tx = conn.begin().await?;
    Repository::new("users")
        .delete(&tx, "DELETE FROM users")
        .await?;
    tracing::info!("Rolling back transaction");
    tx.rollback().await?;
    settle().await;

    shutdown.cancel();
    let emissions = listener.await?;
    tracing::info!(emissions, "Demo finished");

    conn.close().await?;
    handler.uninstall();
    driver.close().await?;
    Ok(())
}

/// Give the listener task a moment to observe the last write.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
