//! UEI mapping coverage.
//!
//! Counts how many known UEIs have a canonical profile link. Used by
//! `cetl stats`, and at the end of every matcher run. The cached variant
//! tags its payload with both tables it reads, so a new mapping or a UEI
//! load drops it.

use anyhow::Result as AnyResult;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::cache::QueryCache;
use crate::context::AppContext;
use crate::error::Result;
use crate::models::MappingStats;

pub const MAPPING_TABLE: &str = "uei_profile_mappings";
pub const UEIS_TABLE: &str = "ueis";

const TOTAL_UEIS_SQL: &str = "SELECT COUNT(*) FROM ueis";
const MAPPED_UEIS_SQL: &str =
    "SELECT COUNT(*) FROM ueis u JOIN uei_profile_mappings m ON m.uei_id = u.uei_id";

pub async fn mapping_stats(pool: &SqlitePool) -> Result<MappingStats> {
    let total: i64 = sqlx::query_scalar(TOTAL_UEIS_SQL).fetch_one(pool).await?;
    let mapped: i64 = sqlx::query_scalar(MAPPED_UEIS_SQL).fetch_one(pool).await?;
    Ok(MappingStats::from_counts(total, mapped))
}

/// [`mapping_stats`] through the query cache.
pub async fn cached_mapping_stats(pool: &SqlitePool, cache: &QueryCache) -> Result<MappingStats> {
    let payload = cache
        .get_or_insert_with(MAPPED_UEIS_SQL, None, None, || async {
            let stats = mapping_stats(pool).await?;
            Ok::<Value, crate::error::EtlError>(json!({
                "data": stats,
                "metadata": { "tables": [MAPPING_TABLE, UEIS_TABLE] }
            }))
        })
        .await?;
    Ok(serde_json::from_value(payload["data"].clone())?)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(ctx: &AppContext) -> AnyResult<()> {
    let config = &ctx.config;
    let pool = &ctx.pool;

    let stats = cached_mapping_stats(pool, &ctx.cache).await?;
    let reviews: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fuzzy_match_reviews")
        .fetch_one(pool)
        .await?;
    let profiles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contractor_profiles")
        .fetch_one(pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("UEI mapping stats");
    println!("=================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Profiles:    {}", profiles);
    println!("  UEIs:        {}", stats.total_ueis);
    println!(
        "  Mapped:      {} ({:.2}%)",
        stats.mapped_ueis, stats.mapping_percentage
    );
    println!("  Unmapped:    {}", stats.unmapped_ueis);
    println!("  In review:   {}", reviews);
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
