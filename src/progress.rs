//! Ingestion and benchmark progress reporting.
//!
//! Long runs (re-indexing three collections, benchmarking every question of
//! every source through several generators) report what they are doing so the
//! user can tell a slow oracle from a hung one. Progress is emitted on
//! **stderr** so stdout stays parseable for scripts.

use std::io::Write;
use std::sync::Arc;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// `n` of `total` files of a collection have been chunked and stored.
    Ingesting {
        collection: String,
        n: u64,
        total: u64,
    },
    /// `n` of `total` questions of a source are done; `label` is the
    /// question (or variation) being processed.
    Benchmarking {
        source: String,
        n: u64,
        total: u64,
        label: String,
    },
    /// `n` of `total` coherence groups have been scored.
    Coherence { n: u64, total: u64 },
}

/// Receives progress events from the pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "ingest docs  1,234 / 5,000 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Ingesting {
                collection,
                n,
                total,
            } => format!(
                "ingest {}  {} / {} files\n",
                collection,
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Benchmarking {
                source,
                n,
                total,
                label,
            } => format!(
                "benchmark {}  {} / {}  {}\n",
                source,
                format_number(*n),
                format_number(*total),
                truncate_label(label, 60)
            ),
            ProgressEvent::Coherence { n, total } => format!(
                "coherence  {} / {} groups\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Ingesting {
                collection,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "ingesting",
                "collection": collection,
                "n": n,
                "total": total
            }),
            ProgressEvent::Benchmarking {
                source,
                n,
                total,
                label,
            } => serde_json::json!({
                "event": "progress",
                "phase": "benchmarking",
                "source": source,
                "n": n,
                "total": total,
                "label": label
            }),
            ProgressEvent::Coherence { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "coherence",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
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

fn truncate_label(label: &str, max_chars: usize) -> String {
    if label.chars().count() <= max_chars {
        label.to_string()
    } else {
        let cut: String = label.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
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

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
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
    fn long_labels_are_shortened() {
        assert_eq!(truncate_label("short", 10), "short");
        assert_eq!(truncate_label("abcdefghijkl", 5), "abcde...");
    }
}
