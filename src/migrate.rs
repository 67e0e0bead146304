use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::{Config, TableConfig};
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool, config).await?;
    pool.close().await;
    Ok(())
}

/// Create the reconciliation schema and every configured target table.
pub async fn migrate_pool(pool: &SqlitePool, config: &Config) -> Result<()> {
    // Canonical contractor profiles (owned upstream, loaded from staging)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contractor_profiles (
            id INTEGER PRIMARY KEY,
            canonical_name TEXT NOT NULL,
            organization_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Every UEI seen in award data, with the contractor name as reported
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ueis (
            uei_id TEXT PRIMARY KEY,
            raw_name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS uei_profile_mappings (
            uei_id TEXT PRIMARY KEY,
            profile_id INTEGER NOT NULL,
            similarity REAL,
            confidence REAL,
            match_method TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (profile_id) REFERENCES contractor_profiles(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Candidates below the auto-apply confidence
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fuzzy_match_reviews (
            uei_id TEXT PRIMARY KEY,
            raw_name TEXT NOT NULL,
            profile_id INTEGER NOT NULL,
            profile_name TEXT NOT NULL,
            similarity REAL NOT NULL,
            confidence REAL NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_uei_profile_mappings_profile ON uei_profile_mappings(profile_id)",
    )
    .execute(pool)
    .await?;

    for table in &config.tables {
        create_target_table(pool, table).await?;
    }

    Ok(())
}

/// `CREATE TABLE IF NOT EXISTS` for a configured staging target.
///
/// Existing tables are left untouched, so a target may also be one of the
/// reconciliation tables above.
pub async fn create_target_table(pool: &SqlitePool, table: &TableConfig) -> Result<()> {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("{} {}{}", c.name, c.kind.sql_type(), null)
        })
        .collect();

    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table.target,
        columns.join(", ")
    );
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}
