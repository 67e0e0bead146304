//! Core data models shared by the loader, cache, and matcher.
//!
//! Raw staging data enters as [`StagingRow`] (header-keyed strings) and is
//! normalized into [`CellValue`]s before it reaches the database.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Column type of a target table column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    #[default]
    Text,
    Integer,
    Decimal,
}

impl ColumnKind {
    /// SQLite column type used when creating target tables.
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Text => "TEXT",
            ColumnKind::Integer => "INTEGER",
            // NUMERIC affinity keeps decimal text exact when it round-trips.
            ColumnKind::Decimal => "NUMERIC",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnKind::Text => "text",
            ColumnKind::Integer => "integer",
            ColumnKind::Decimal => "decimal",
        };
        f.write_str(s)
    }
}

/// One CSV record from a staging export, keyed by header name.
#[derive(Debug, Clone)]
pub struct StagingRow {
    /// 1-based data row number (the header is not counted).
    pub row_number: u64,
    pub fields: HashMap<String, String>,
}

impl StagingRow {
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields.get(header).map(String::as_str)
    }
}

/// A normalized field value, ready to bind into an INSERT.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    /// Validated decimal text, kept as text so no precision is lost.
    Decimal(String),
}

/// A row that could not be transformed; the row is skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct RowParseError {
    pub row: u64,
    pub message: String,
}

impl fmt::Display for RowParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.message)
    }
}

/// A batch the database rejected; its rows are counted as failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchInsertError {
    pub first_row: u64,
    pub last_row: u64,
    pub message: String,
}

impl fmt::Display for BatchInsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows {}-{}: {}",
            self.first_row, self.last_row, self.message
        )
    }
}

/// Non-fatal failure recorded in a load summary.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadFailure {
    Row(RowParseError),
    Batch(BatchInsertError),
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadFailure::Row(e) => e.fmt(f),
            LoadFailure::Batch(e) => e.fmt(f),
        }
    }
}

/// Best profile match found for an unmapped UEI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuzzyMatchCandidate {
    pub uei_id: String,
    pub raw_name: String,
    pub profile_id: i64,
    pub profile_name: String,
    /// Normalized string similarity, 0.0..=1.0.
    pub similarity: f64,
    /// Derived score, 0..=100, gating auto-apply.
    pub confidence: f64,
}

/// Coverage of the UEI → profile mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MappingStats {
    pub total_ueis: i64,
    pub mapped_ueis: i64,
    pub unmapped_ueis: i64,
    pub mapping_percentage: f64,
}

impl MappingStats {
    pub fn from_counts(total_ueis: i64, mapped_ueis: i64) -> Self {
        let mapping_percentage = if total_ueis > 0 {
            // two decimal places
            ((mapped_ueis as f64 / total_ueis as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        Self {
            total_ueis,
            mapped_ueis,
            unmapped_ueis: total_ueis - mapped_ueis,
            mapping_percentage,
        }
    }
}

/// Outcome of one fuzzy matching run.
#[derive(Debug, Clone, Serialize)]
pub struct FuzzyMatchReport {
    pub found_matches: usize,
    pub applied_matches: usize,
    pub queued_for_review: usize,
    pub average_confidence: f64,
    pub candidates: Vec<FuzzyMatchCandidate>,
    pub stats: MappingStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_percentage_rounds_to_two_places() {
        let stats = MappingStats::from_counts(3, 1);
        assert_eq!(stats.unmapped_ueis, 2);
        assert_eq!(stats.mapping_percentage, 33.33);
    }

    #[test]
    fn mapping_percentage_empty_table() {
        let stats = MappingStats::from_counts(0, 0);
        assert_eq!(stats.mapping_percentage, 0.0);
    }

    #[test]
    fn failure_display_includes_row_range() {
        let failure = LoadFailure::Batch(BatchInsertError {
            first_row: 1001,
            last_row: 2000,
            message: "UNIQUE constraint failed".to_string(),
        });
        assert_eq!(
            failure.to_string(),
            "rows 1001-2000: UNIQUE constraint failed"
        );
    }
}
