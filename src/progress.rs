//! Load progress reporting.
//!
//! The loader emits one event per batch so users see how far a staging file
//! has been processed. When the row count is known up front (pre-count
//! pass) events carry a total and the human reporter prints a percentage.
//! Progress goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event for a load.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadProgressEvent {
    /// Counting rows ahead of the load (total not yet known).
    Counting { table: String },
    /// `processed` rows handled so far, out of `total` when known.
    Loading {
        table: String,
        processed: u64,
        total: Option<u64>,
    },
}

/// Receives progress events from the loader.
pub trait LoadProgressReporter: Send + Sync {
    fn report(&self, event: LoadProgressEvent);
}

/// Human-friendly progress on stderr: "load awards  1,000 / 2,500 rows (40%)".
pub struct StderrProgress;

impl LoadProgressReporter for StderrProgress {
    fn report(&self, event: LoadProgressEvent) {
        let line = match &event {
            LoadProgressEvent::Counting { table } => format!("load {}  counting rows...\n", table),
            LoadProgressEvent::Loading {
                table,
                processed,
                total: Some(total),
            } => format!(
                "load {}  {} / {} rows ({}%)\n",
                table,
                format_number(*processed),
                format_number(*total),
                percent(*processed, *total)
            ),
            LoadProgressEvent::Loading {
                table,
                processed,
                total: None,
            } => format!("load {}  {} rows\n", table, format_number(*processed)),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl LoadProgressReporter for JsonProgress {
    fn report(&self, event: LoadProgressEvent) {
        let obj = match &event {
            LoadProgressEvent::Counting { table } => serde_json::json!({
                "event": "progress",
                "table": table,
                "phase": "counting"
            }),
            LoadProgressEvent::Loading {
                table,
                processed,
                total,
            } => serde_json::json!({
                "event": "progress",
                "table": table,
                "phase": "loading",
                "processed": processed,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl LoadProgressReporter for NoProgress {
    fn report(&self, _event: LoadProgressEvent) {}
}

fn percent(n: u64, total: u64) -> u64 {
    if total == 0 {
        100
    } else {
        (n.min(total) * 100) / total
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn LoadProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(percent(0, 2500), 0);
        assert_eq!(percent(1000, 2500), 40);
        assert_eq!(percent(2500, 2500), 100);
        assert_eq!(percent(3000, 2500), 100);
        assert_eq!(percent(0, 0), 100);
    }
}
