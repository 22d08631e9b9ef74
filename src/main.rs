//! # Knowledge Sync CLI (`ksync`)
//!
//! The `ksync` binary drives the sync pipeline: database initialization,
//! job triggering, running syncs, status reporting, stale-run sweeping,
//! and the HTTP status server.
//!
//! ## Usage
//!
//! ```bash
//! ksync --config ./config/ksync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ksync init` | Create the SQLite database and run schema migrations |
//! | `ksync scopes` | List configured sync scopes and their connectors |
//! | `ksync enqueue <scope>` | Queue a sync job for a scope |
//! | `ksync sync <scope>` | Claim and run the pending job for a scope |
//! | `ksync status <scope>` | Show job, progress, and index counts |
//! | `ksync sweep` | Fail running jobs with no recent progress |
//! | `ksync serve` | Start the HTTP status/trigger server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use knowledge_sync::config;
use knowledge_sync::connector::ConnectorRegistry;
use knowledge_sync::db;
use knowledge_sync::error::SyncError;
use knowledge_sync::ledger;
use knowledge_sync::migrate;
use knowledge_sync::orchestrator;
use knowledge_sync::server;
use knowledge_sync::status;

/// Knowledge Sync — connector-driven ingestion into a versioned,
/// content-addressed knowledge base.
#[derive(Parser)]
#[command(
    name = "ksync",
    about = "Knowledge Sync — ingest external content into a versioned knowledge base",
    version,
    long_about = "Knowledge Sync ingests content from external sources (uploads, document \
    stores, issue trackers, wikis, chat) into a versioned, content-addressed knowledge base. \
    Sync jobs are tracked through a ledger with retries and dead-lettering, and per-run \
    progress is exposed for live status display."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ksync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (sources,
    /// source_versions, chunks, jobs, job_runs). Idempotent.
    Init,

    /// List configured sync scopes.
    ///
    /// Shows each scope's connector kind and whether a connector
    /// implementation is available in this binary.
    Scopes,

    /// Queue a sync job for a scope.
    ///
    /// Fails with a nonzero exit when a job for the scope is already
    /// running; queueing behind other pending jobs is allowed.
    Enqueue {
        /// Scope id as configured under `[scopes.<id>]`.
        scope: String,
    },

    /// Claim and run the pending sync job for a scope.
    ///
    /// Enqueues a job first when none is pending. A scope that is already
    /// running is treated as a duplicate trigger and exits successfully
    /// without doing anything.
    Sync {
        /// Scope id as configured under `[scopes.<id>]`.
        scope: String,
    },

    /// Show sync status for a scope.
    ///
    /// Joins the latest job, its latest run, normalized progress, and
    /// index counts. Read-only.
    Status {
        /// Scope id as configured under `[scopes.<id>]`.
        scope: String,

        /// Emit the raw JSON document instead of the human rendering.
        #[arg(long)]
        json: bool,
    },

    /// Fail running jobs that have stopped reporting progress.
    ///
    /// A run with no stats update within `sync.stale_after_secs` is marked
    /// failed and its job becomes eligible for retry (or dead-letters).
    /// Run this from cron or a supervisor.
    Sweep,

    /// Start the HTTP status/trigger server.
    ///
    /// Binds to `[server].bind` and serves scope status and sync triggers.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("knowledge_sync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Scopes => {
            let registry = ConnectorRegistry::from_config(&cfg)?;
            if cfg.scopes.is_empty() {
                println!("No scopes configured.");
                return Ok(());
            }
            for (scope_id, scope_cfg) in &cfg.scopes {
                let availability = match registry.find(scope_id) {
                    Some(connector) => connector.describe(),
                    None => format!("{} (no connector registered in this binary)", scope_cfg.connector),
                };
                println!("{}  {}  {}", scope_id, scope_cfg.connector, availability);
            }
        }
        Commands::Enqueue { scope } => {
            let scope_cfg = cfg.scope(&scope)?;
            let kind = scope_cfg.connector_kind()?;
            let pool = db::connect(&cfg).await?;
            match ledger::enqueue(&pool, &scope_cfg.workspace, &scope, kind).await {
                Ok(job) => {
                    println!("enqueued job {} for scope {}", job.id, scope);
                }
                Err(SyncError::AlreadyRunning { .. }) => {
                    pool.close().await;
                    anyhow::bail!("a sync job is already running for scope '{}'", scope);
                }
                Err(e) => {
                    pool.close().await;
                    return Err(e.into());
                }
            }
            pool.close().await;
        }
        Commands::Sync { scope } => {
            let pool = db::connect(&cfg).await?;
            let registry = ConnectorRegistry::from_config(&cfg)?;
            let outcome = orchestrator::run_sync(&pool, &cfg, &registry, &scope).await?;
            pool.close().await;

            if outcome.no_op {
                println!("sync {}: already running, nothing to do", scope);
                return Ok(());
            }

            println!("sync {}", scope);
            println!("  fetched:  {} items", outcome.fetched);
            println!("  upserted: {} new versions", outcome.upserted);
            println!("  chunks:   {} written", outcome.chunks_created);
            match &outcome.error {
                None => println!("ok"),
                Some(message) => {
                    println!("  status:   {}", outcome.job_status.as_str());
                    anyhow::bail!("sync failed: {}", message);
                }
            }
        }
        Commands::Status { scope, json } => {
            let pool = db::connect(&cfg).await?;
            let report = status::scope_status(&pool, &scope).await?;
            pool.close().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_human());
            }
        }
        Commands::Sweep => {
            let pool = db::connect(&cfg).await?;
            let swept =
                ledger::expire_stale(&pool, cfg.sync.stale_after_secs, cfg.sync.max_attempts)
                    .await?;
            pool.close().await;
            if swept.is_empty() {
                println!("no stale runs");
            } else {
                for run_id in &swept {
                    println!("swept stale run {}", run_id);
                }
            }
        }
        Commands::Serve => {
            let pool = db::connect(&cfg).await?;
            server::run_server(&cfg, pool).await?;
        }
    }

    Ok(())
}
