use anyhow::{bail, Result};

use crate::context::AppContext;
use crate::matcher::{self, MatchOptions};

/// Overrides for `cetl match`; unset fields fall back to `[matcher]`.
#[derive(Debug, Clone, Default)]
pub struct MatchArgs {
    pub min_similarity: Option<f64>,
    pub min_confidence: Option<f64>,
    pub limit: Option<usize>,
    pub dry_run: bool,
}

pub async fn run_match(ctx: &AppContext, args: &MatchArgs) -> Result<()> {
    let config = &ctx.config;
    let opts = MatchOptions {
        min_similarity: args.min_similarity.unwrap_or(config.matcher.min_similarity),
        min_confidence: args.min_confidence.unwrap_or(config.matcher.min_confidence),
        limit: args.limit.unwrap_or(config.matcher.limit),
        dry_run: args.dry_run,
    };

    if !(0.0..=1.0).contains(&opts.min_similarity) {
        bail!("--min-similarity must be in [0.0, 1.0]");
    }
    if !(0.0..=100.0).contains(&opts.min_confidence) {
        bail!("--min-confidence must be in [0, 100]");
    }

    let report =
        matcher::run_fuzzy_matching_process(&ctx.pool, Some(ctx.cache.as_ref()), &opts).await?;

    if opts.dry_run {
        println!("match (dry-run)");
    } else {
        println!("match");
    }
    println!("  found matches:      {}", report.found_matches);
    println!("  applied matches:    {}", report.applied_matches);
    println!("  queued for review:  {}", report.queued_for_review);
    println!("  average confidence: {:.2}", report.average_confidence);
    println!(
        "  mapped UEIs:        {} / {} ({:.2}%)",
        report.stats.mapped_ueis, report.stats.total_ueis, report.stats.mapping_percentage
    );
    println!("ok");
    Ok(())
}

pub async fn run_review_list(ctx: &AppContext) -> Result<()> {
    let reviews = matcher::list_reviews(&ctx.pool).await?;

    if reviews.is_empty() {
        println!("No matches waiting for review.");
        return Ok(());
    }

    println!(
        "{:<14} {:>6} {:>6}  {:<32} PROFILE",
        "UEI", "SIM", "CONF", "REPORTED NAME"
    );
    for r in &reviews {
        println!(
            "{:<14} {:>6.3} {:>6.1}  {:<32} {} (#{})",
            r.uei_id, r.similarity, r.confidence, r.raw_name, r.profile_name, r.profile_id
        );
    }
    Ok(())
}

pub async fn run_review_apply(ctx: &AppContext, uei_id: &str) -> Result<()> {
    let applied = matcher::apply_review(&ctx.pool, Some(ctx.cache.as_ref()), uei_id).await?;
    println!(
        "mapped {} -> {} (#{})",
        applied.uei_id, applied.profile_name, applied.profile_id
    );
    Ok(())
}
