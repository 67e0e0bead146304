//! Row normalization at the ingestion boundary.
//!
//! Snowflake exports SQL NULL as the sentinel `\N` (sometimes escaped to
//! `\\N`). The sentinel never leaves this module: it becomes
//! [`CellValue::Null`] for nullable columns, or a type default for
//! non-nullable ones.

use crate::config::ColumnConfig;
use crate::models::{CellValue, ColumnKind, RowParseError, StagingRow};

pub const NULL_SENTINEL: &str = "\\N";
pub const ESCAPED_NULL_SENTINEL: &str = "\\\\N";

pub fn is_null_sentinel(raw: &str) -> bool {
    raw == NULL_SENTINEL || raw == ESCAPED_NULL_SENTINEL
}

/// Value written for a sentinel in a non-nullable column.
pub fn default_for(kind: ColumnKind) -> CellValue {
    match kind {
        ColumnKind::Text => CellValue::Text(String::new()),
        ColumnKind::Integer => CellValue::Integer(0),
        ColumnKind::Decimal => CellValue::Decimal("0".to_string()),
    }
}

/// Convert one raw field according to its column's kind and null policy.
pub fn convert_field(raw: &str, column: &ColumnConfig) -> Result<CellValue, String> {
    if is_null_sentinel(raw) {
        return Ok(if column.nullable {
            CellValue::Null
        } else {
            default_for(column.kind)
        });
    }

    match column.kind {
        ColumnKind::Text => Ok(CellValue::Text(raw.to_string())),
        ColumnKind::Integer | ColumnKind::Decimal => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                if column.nullable {
                    return Ok(CellValue::Null);
                }
                return Err(format!("{}: empty value in non-nullable column", column.name));
            }
            if column.kind == ColumnKind::Integer {
                parse_integer(trimmed)
                    .map(CellValue::Integer)
                    .ok_or_else(|| format!("{}: invalid integer '{}'", column.name, raw))
            } else {
                normalize_decimal(trimmed)
                    .map(CellValue::Decimal)
                    .ok_or_else(|| format!("{}: invalid decimal '{}'", column.name, raw))
            }
        }
    }
}

/// Integers sometimes arrive as `"42.0"` or `"42.00"` from numeric exports.
fn parse_integer(s: &str) -> Option<i64> {
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let (int_part, frac) = s.split_once('.')?;
    if !frac.is_empty() && frac.bytes().all(|b| b == b'0') {
        int_part.parse::<i64>().ok()
    } else {
        None
    }
}

/// Validate decimal text (`[+-]digits[.digits]`) and strip a leading `+`.
fn normalize_decimal(s: &str) -> Option<String> {
    let (sign, body) = match s.as_bytes()[0] {
        b'-' => ("-", &s[1..]),
        b'+' => ("", &s[1..]),
        _ => ("", s),
    };
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    let int_ok = int_part.bytes().all(|b| b.is_ascii_digit());
    let frac_ok = frac_part.map_or(true, |f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()));
    if !int_ok || !frac_ok || (int_part.is_empty() && frac_part.is_none()) {
        return None;
    }
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    Some(match frac_part {
        Some(f) => format!("{}{}.{}", sign, int_part, f),
        None => format!("{}{}", sign, int_part),
    })
}

/// Transform a staging row into values ordered like `columns`.
///
/// Headers are checked once up front by the loader, so a missing field
/// here means the record itself is short.
pub fn transform_row(
    columns: &[ColumnConfig],
    row: &StagingRow,
) -> Result<Vec<CellValue>, RowParseError> {
    columns
        .iter()
        .map(|col| {
            let raw = row.get(col.source_header()).ok_or_else(|| RowParseError {
                row: row.row_number,
                message: format!("missing field '{}'", col.source_header()),
            })?;
            convert_field(raw, col).map_err(|message| RowParseError {
                row: row.row_number,
                message,
            })
        })
        .collect()
}
