//! Fuzzy reconciliation of UEIs against canonical contractor profiles.
//!
//! A UEI is "unmapped" while it has no row in `uei_profile_mappings`. For
//! each unmapped UEI (in `uei_id` order, up to `limit`) the reported
//! contractor name is compared against every profile name and the best
//! candidate kept when its similarity clears `min_similarity`.
//!
//! Candidates whose confidence reaches `min_confidence` are written to the
//! mapping table; the rest go to `fuzzy_match_reviews` for a person to
//! look at, and are never applied automatically.
//!
//! Running the matcher again over unchanged data is a no-op for mapped
//! UEIs (they are no longer examined, and existing mappings are never
//! rewritten) and reproduces the same review candidates for the rest.

use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::cache::QueryCache;
use crate::error::{EtlError, Result};
use crate::models::{FuzzyMatchCandidate, FuzzyMatchReport};
use crate::stats::{self, MAPPING_TABLE};

/// Corporate designators ignored when comparing names.
const DESIGNATORS: &[&str] = &[
    "LLC",
    "L L C",
    "INC",
    "INCORPORATED",
    "CORP",
    "CORPORATION",
    "CO",
    "COMPANY",
    "LTD",
    "LIMITED",
    "LP",
    "LLP",
    "PLLC",
    "PC",
];

#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Minimum normalized similarity, 0.0..=1.0.
    pub min_similarity: f64,
    /// Minimum confidence for auto-apply, 0..=100.
    pub min_confidence: f64,
    /// Maximum unmapped UEIs examined in one run.
    pub limit: usize,
    /// Find candidates without writing anything.
    pub dry_run: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            min_similarity: 0.7,
            min_confidence: 75.0,
            limit: 100,
            dry_run: false,
        }
    }
}

/// Uppercase, strip punctuation, and drop a leading "THE" and trailing
/// corporate designators.
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .flat_map(|c| {
            let mapped = if c.is_alphanumeric() || c == '&' { c } else { ' ' };
            mapped.to_uppercase()
        })
        .collect();
    let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();

    if tokens.len() > 1 && tokens[0] == "THE" {
        tokens.remove(0);
    }
    // "L L C" survives punctuation stripping of "L.L.C."
    loop {
        let joined = tokens.join(" ");
        let stripped = DESIGNATORS.iter().find_map(|d| {
            let suffix_len = d.split(' ').count();
            (tokens.len() > suffix_len && joined.ends_with(&format!(" {}", d)))
                .then_some(suffix_len)
        });
        match stripped {
            Some(n) => tokens.truncate(tokens.len() - n),
            None => break,
        }
    }

    tokens.join(" ")
}

fn token_set(name: &str) -> HashSet<&str> {
    name.split_whitespace().collect()
}

/// Similarity of two normalized names: the better of normalized
/// Levenshtein and the Jaccard index of their token sets.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let edit = strsim::normalized_levenshtein(a, b);
    let (ta, tb) = (token_set(a), token_set(b));
    let union = ta.union(&tb).count();
    let jaccard = if union == 0 {
        0.0
    } else {
        ta.intersection(&tb).count() as f64 / union as f64
    };
    edit.max(jaccard)
}

/// Share of the shorter name's tokens present in the other name.
fn token_overlap(a: &str, b: &str) -> f64 {
    let (ta, tb) = (token_set(a), token_set(b));
    let smaller = ta.len().min(tb.len());
    if smaller == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / smaller as f64
}

/// Confidence (0..=100) for a pair of normalized names.
///
/// 70% similarity, 30% token overlap; an exact normalized match is 100.
pub fn confidence(a: &str, b: &str, similarity: f64) -> f64 {
    if !a.is_empty() && a == b {
        return 100.0;
    }
    let raw = 100.0 * (0.7 * similarity + 0.3 * token_overlap(a, b));
    round2(raw.min(100.0))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

struct Profile {
    id: i64,
    name: String,
    normalized: String,
}

/// Best-scoring profile for `raw_name`; ties go to the lowest profile id.
fn best_candidate(
    uei_id: &str,
    raw_name: &str,
    profiles: &[Profile],
) -> Option<FuzzyMatchCandidate> {
    let normalized = normalize_name(raw_name);
    let mut best: Option<(&Profile, f64)> = None;
    for p in profiles {
        let score = similarity(&normalized, &p.normalized);
        // profiles are ordered by id, so strict > keeps the lowest id on ties
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((p, score));
        }
    }
    best.map(|(p, score)| FuzzyMatchCandidate {
        uei_id: uei_id.to_string(),
        raw_name: raw_name.to_string(),
        profile_id: p.id,
        profile_name: p.name.clone(),
        similarity: round4(score),
        confidence: confidence(&normalized, &p.normalized, score),
    })
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Run one reconciliation pass.
///
/// When `cache` is given, cached results sourced from the mapping table
/// are invalidated once new mappings are written.
pub async fn run_fuzzy_matching_process(
    pool: &SqlitePool,
    cache: Option<&QueryCache>,
    opts: &MatchOptions,
) -> Result<FuzzyMatchReport> {
    let profiles: Vec<Profile> =
        sqlx::query("SELECT id, canonical_name FROM contractor_profiles ORDER BY id")
            .fetch_all(pool)
            .await?
            .iter()
            .map(|row| {
                let name: String = row.get("canonical_name");
                Profile {
                    id: row.get("id"),
                    normalized: normalize_name(&name),
                    name,
                }
            })
            .collect();

    let unmapped = sqlx::query(
        r#"
        SELECT u.uei_id, u.raw_name
        FROM ueis u
        LEFT JOIN uei_profile_mappings m ON m.uei_id = u.uei_id
        WHERE m.uei_id IS NULL
        ORDER BY u.uei_id
        LIMIT ?
        "#,
    )
    .bind(i64::try_from(opts.limit).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await?;

    info!(
        profiles = profiles.len(),
        unmapped = unmapped.len(),
        min_similarity = opts.min_similarity,
        min_confidence = opts.min_confidence,
        "starting fuzzy matching"
    );

    let mut candidates = Vec::new();
    for row in &unmapped {
        let uei_id: String = row.get("uei_id");
        let raw_name: String = row.get("raw_name");
        match best_candidate(&uei_id, &raw_name, &profiles) {
            Some(c) if c.similarity >= opts.min_similarity => candidates.push(c),
            Some(c) => debug!(uei = %uei_id, similarity = c.similarity, "below similarity threshold"),
            None => {}
        }
    }

    let (to_apply, to_review): (Vec<_>, Vec<_>) = candidates
        .iter()
        .partition(|c| c.confidence >= opts.min_confidence);

    let mut applied = 0usize;
    if !opts.dry_run {
        let now = chrono::Utc::now().timestamp();
        let mut tx = pool.begin().await?;

        for c in &to_apply {
            let result = sqlx::query(
                r#"
                INSERT INTO uei_profile_mappings (uei_id, profile_id, similarity, confidence, match_method, created_at)
                VALUES (?, ?, ?, ?, 'fuzzy', ?)
                ON CONFLICT(uei_id) DO NOTHING
                "#,
            )
            .bind(&c.uei_id)
            .bind(c.profile_id)
            .bind(c.similarity)
            .bind(c.confidence)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            applied += result.rows_affected() as usize;

            sqlx::query("DELETE FROM fuzzy_match_reviews WHERE uei_id = ?")
                .bind(&c.uei_id)
                .execute(&mut *tx)
                .await?;
        }

        for c in &to_review {
            sqlx::query(
                r#"
                INSERT INTO fuzzy_match_reviews (uei_id, raw_name, profile_id, profile_name, similarity, confidence, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(uei_id) DO UPDATE SET
                    raw_name = excluded.raw_name,
                    profile_id = excluded.profile_id,
                    profile_name = excluded.profile_name,
                    similarity = excluded.similarity,
                    confidence = excluded.confidence,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&c.uei_id)
            .bind(&c.raw_name)
            .bind(c.profile_id)
            .bind(&c.profile_name)
            .bind(c.similarity)
            .bind(c.confidence)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if applied > 0 {
            if let Some(cache) = cache {
                cache.invalidate_by_table(MAPPING_TABLE);
            }
        }
    }

    let average_confidence = if candidates.is_empty() {
        0.0
    } else {
        round2(candidates.iter().map(|c| c.confidence).sum::<f64>() / candidates.len() as f64)
    };

    let stats = stats::mapping_stats(pool).await?;

    info!(
        found = candidates.len(),
        applied,
        review = to_review.len(),
        average_confidence,
        mapped_pct = stats.mapping_percentage,
        "fuzzy matching finished"
    );

    Ok(FuzzyMatchReport {
        found_matches: candidates.len(),
        applied_matches: applied,
        queued_for_review: to_review.len(),
        average_confidence,
        candidates: candidates.clone(),
        stats,
    })
}

/// Candidates waiting for review, highest confidence first.
pub async fn list_reviews(pool: &SqlitePool) -> Result<Vec<FuzzyMatchCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT uei_id, raw_name, profile_id, profile_name, similarity, confidence
        FROM fuzzy_match_reviews
        ORDER BY confidence DESC, uei_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(review_from_row).collect())
}

fn review_from_row(row: &sqlx::sqlite::SqliteRow) -> FuzzyMatchCandidate {
    FuzzyMatchCandidate {
        uei_id: row.get("uei_id"),
        raw_name: row.get("raw_name"),
        profile_id: row.get("profile_id"),
        profile_name: row.get("profile_name"),
        similarity: row.get("similarity"),
        confidence: row.get("confidence"),
    }
}

/// Promote a queued review candidate to a permanent mapping.
pub async fn apply_review(
    pool: &SqlitePool,
    cache: Option<&QueryCache>,
    uei_id: &str,
) -> Result<FuzzyMatchCandidate> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        "SELECT uei_id, raw_name, profile_id, profile_name, similarity, confidence FROM fuzzy_match_reviews WHERE uei_id = ?",
    )
    .bind(uei_id)
    .fetch_optional(&mut *tx)
    .await?;
    let candidate = match row {
        Some(row) => review_from_row(&row),
        None => return Err(EtlError::ReviewNotFound(uei_id.to_string())),
    };

    sqlx::query(
        r#"
        INSERT INTO uei_profile_mappings (uei_id, profile_id, similarity, confidence, match_method, created_at)
        VALUES (?, ?, ?, ?, 'manual', ?)
        ON CONFLICT(uei_id) DO NOTHING
        "#,
    )
    .bind(&candidate.uei_id)
    .bind(candidate.profile_id)
    .bind(candidate.similarity)
    .bind(candidate.confidence)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM fuzzy_match_reviews WHERE uei_id = ?")
        .bind(uei_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    if let Some(cache) = cache {
        cache.invalidate_by_table(MAPPING_TABLE);
    }
    info!(uei = %uei_id, profile = candidate.profile_id, "applied reviewed match");
    Ok(candidate)
}
