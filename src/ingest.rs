//! Staging load orchestration for the CLI.
//!
//! Resolves a table key from the config, makes sure the target exists,
//! runs the batched loader against SQLite, and prints a summary. A load
//! with failed rows still succeeds; only fatal errors end the command with
//! a non-zero status.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::config::{Config, TableConfig};
use crate::context::AppContext;
use crate::loader::{self, LoadOptions, LoadSummary, SqliteSink};
use crate::migrate;
use crate::progress::{format_number, LoadProgressReporter};

/// How many failure messages the CLI summary prints.
const PRINTED_ERRORS: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    pub batch_size: Option<usize>,
    pub truncate: bool,
    pub dry_run: bool,
    pub count_first: bool,
}

impl LoadArgs {
    fn options(&self, config: &Config) -> LoadOptions {
        LoadOptions {
            batch_size: self.batch_size.unwrap_or(config.loader.batch_size),
            max_reported_errors: config.loader.max_reported_errors,
            count_first: self.count_first,
            dry_run: self.dry_run,
            truncate: self.truncate,
        }
    }
}

/// `cetl load <table|all>`
pub async fn run_load(
    ctx: &AppContext,
    target: &str,
    args: &LoadArgs,
    progress: &dyn LoadProgressReporter,
) -> Result<()> {
    let config = &ctx.config;
    if args.batch_size == Some(0) {
        bail!("--batch-size must be > 0");
    }

    let tables: Vec<&TableConfig> = if target == "all" {
        config.tables.iter().collect()
    } else {
        match config.table(target) {
            Some(t) => vec![t],
            None => {
                let known: Vec<&str> = config.tables.iter().map(|t| t.key.as_str()).collect();
                bail!(
                    "Unknown table: '{}'. Available: all, {}",
                    target,
                    known.join(", ")
                );
            }
        }
    };

    if tables.is_empty() {
        bail!("No tables configured. Add [[tables]] entries to the config file.");
    }

    let opts = args.options(config);
    let mut fatal = Vec::new();

    for table in tables {
        match load_table(&ctx.pool, config, table, &opts, progress).await {
            Ok(summary) => {
                if summary.total_inserted > 0 {
                    ctx.cache.invalidate_by_table(&table.target);
                }
                print_summary(&table.key, &summary, opts.dry_run);
            }
            // With a single table the error is the command's error.
            Err(e) if target != "all" => return Err(e),
            Err(e) => {
                eprintln!("load {} failed: {:#}", table.key, e);
                fatal.push(table.key.clone());
            }
        }
    }

    if !fatal.is_empty() {
        bail!("{} table(s) failed to load: {}", fatal.len(), fatal.join(", "));
    }
    Ok(())
}

pub async fn load_table(
    pool: &SqlitePool,
    config: &Config,
    table: &TableConfig,
    opts: &LoadOptions,
    progress: &dyn LoadProgressReporter,
) -> Result<LoadSummary> {
    migrate::create_target_table(pool, table).await?;
    let sink = SqliteSink::new(pool.clone(), &table.target, &table.columns);
    let path = config.staging_path(table);
    let summary =
        loader::load_file(&path, &table.key, &table.columns, &sink, opts, progress).await?;
    Ok(summary)
}

fn print_summary(key: &str, summary: &LoadSummary, dry_run: bool) {
    if dry_run {
        println!("load {} (dry-run)", key);
    } else {
        println!("load {}", key);
    }
    println!("  processed: {}", format_number(summary.total_processed));
    println!("  inserted:  {}", format_number(summary.total_inserted));
    println!("  failed:    {}", format_number(summary.total_failed));
    println!("  batches:   {}", summary.batches);

    if !summary.errors.is_empty() {
        println!("  errors:");
        for e in summary.errors.iter().take(PRINTED_ERRORS) {
            println!("    {}", e);
        }
        let hidden = summary.errors.len().saturating_sub(PRINTED_ERRORS) + summary.errors_dropped;
        if hidden > 0 {
            println!("    ... and {} more", hidden);
        }
    }

    if summary.is_success() {
        println!("ok");
    } else {
        println!("partial");
    }
}
