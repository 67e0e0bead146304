//! # contractor-etl CLI (`cetl`)
//!
//! Loads staging exports, reconciles UEIs, and reports mapping coverage.
//!
//! ## Usage
//!
//! ```bash
//! cetl --config ./config/cetl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cetl init` | Create the SQLite database and schema |
//! | `cetl tables` | List configured staging tables |
//! | `cetl load <table\|all>` | Load staging files in batches |
//! | `cetl match` | Run the fuzzy UEI-to-profile matcher |
//! | `cetl review list` | Show candidates waiting for review |
//! | `cetl review apply <uei>` | Apply a reviewed candidate |
//! | `cetl stats` | Print mapping coverage |
//!
//! Exit status is 0 on success (including loads with failed rows) and 1 on
//! a fatal error. Logs go to stderr; set `RUST_LOG` to adjust verbosity.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use contractor_etl::config;
use contractor_etl::context::AppContext;
use contractor_etl::ingest::{self, LoadArgs};
use contractor_etl::match_cmd::{self, MatchArgs};
use contractor_etl::migrate;
use contractor_etl::progress::ProgressMode;
use contractor_etl::stats;
use contractor_etl::tables;

/// contractor-etl: staging loader and UEI reconciliation.
#[derive(Parser)]
#[command(
    name = "cetl",
    about = "Load warehouse staging exports and reconcile contractor UEIs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cetl.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the reconciliation tables and every configured target
    /// table. Safe to run repeatedly.
    Init,

    /// List configured staging tables and whether their files exist.
    Tables,

    /// Load a staging table (or `all`) into the database.
    ///
    /// Rows are inserted in batches. A failed batch is reported and the
    /// load continues with the next one.
    Load {
        /// Table key from the config, or `all`.
        table: String,

        /// Override `loader.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Delete existing rows in the target first.
        #[arg(long)]
        truncate: bool,

        /// Parse and transform without writing.
        #[arg(long)]
        dry_run: bool,

        /// Count rows before loading so progress shows a percentage.
        #[arg(long)]
        count_first: bool,
    },

    /// Match unmapped UEIs to contractor profiles by name.
    Match {
        /// Minimum name similarity (0.0-1.0).
        #[arg(long)]
        min_similarity: Option<f64>,

        /// Minimum confidence (0-100) for a match to be applied.
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Maximum number of UEIs to examine.
        #[arg(long)]
        limit: Option<usize>,

        /// Report candidates without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or apply low-confidence match candidates.
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Print UEI mapping coverage.
    Stats,
}

#[derive(Subcommand)]
enum ReviewAction {
    /// List candidates waiting for review.
    List,
    /// Apply the queued candidate for a UEI.
    Apply {
        /// UEI to map.
        uei: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contractor_etl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
            return Ok(());
        }
        Commands::Tables => {
            tables::list_tables(&cfg)?;
            return Ok(());
        }
        _ => {}
    }

    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();
    let ctx = AppContext::open(cfg).await?;

    let result = match cli.command {
        Commands::Load {
            table,
            batch_size,
            truncate,
            dry_run,
            count_first,
        } => {
            let args = LoadArgs {
                batch_size,
                truncate,
                dry_run,
                count_first,
            };
            ingest::run_load(&ctx, &table, &args, progress.as_ref()).await
        }
        Commands::Match {
            min_similarity,
            min_confidence,
            limit,
            dry_run,
        } => {
            let args = MatchArgs {
                min_similarity,
                min_confidence,
                limit,
                dry_run,
            };
            match_cmd::run_match(&ctx, &args).await
        }
        Commands::Review { action } => match action {
            ReviewAction::List => match_cmd::run_review_list(&ctx).await,
            ReviewAction::Apply { uei } => match_cmd::run_review_apply(&ctx, &uei).await,
        },
        Commands::Stats => stats::run_stats(&ctx).await,
        Commands::Init | Commands::Tables => {
            // Handled above (before opening the context)
            unreachable!()
        }
    };

    ctx.close().await;
    result
}
