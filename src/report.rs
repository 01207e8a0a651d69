//! CSV reports.
//!
//! Three files are written into the configured output directory:
//!
//! - `benchmark_results.csv`: append-only log of base results across runs;
//!   the header is written when the file is new or empty.
//! - `benchmark_results_detailed.csv`: every variation result of the last run.
//! - `benchmark_results_stats.csv`: aggregate metrics of the last run.
//!
//! Fields are quoted per RFC 4180 when they contain a comma, a quote, a line
//! break or surrounding whitespace.

use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::{DetailedTestResult, SourceResult};
use crate::stats::AggregateStat;

pub const RESULTS_FILE: &str = "benchmark_results.csv";
pub const DETAILED_FILE: &str = "benchmark_results_detailed.csv";
pub const STATS_FILE: &str = "benchmark_results_stats.csv";

const RESULTS_HEADER: [&str; 9] = [
    "Date",
    "Source",
    "Category",
    "Question",
    "ChatBot Response",
    "Score (0-5)",
    "Judge Reason",
    "Model Used",
    "Response Time (ms)",
];

const DETAILED_HEADER: [&str; 12] = [
    "Date",
    "Source",
    "Test Suite",
    "Category",
    "Original Question",
    "Variation Type",
    "Variation Question",
    "Response",
    "Score",
    "Reason",
    "Time (ms)",
    "Coherence Score",
];

const STATS_HEADER: [&str; 4] = ["Metric", "Source", "Category/Type", "Value"];

/// Local wall-clock time as written in the `Date` column.
pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn escape(field: &str) -> Cow<'_, str> {
    let needs_quotes = field.contains([',', '"', '\n', '\r'])
        || field.starts_with(' ')
        || field.ends_with(' ');
    if needs_quotes {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| escape(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

pub struct ReportWriter {
    dir: PathBuf,
    model: String,
}

impl ReportWriter {
    /// `model` is recorded in the `Model Used` column of the results log.
    pub fn new(dir: &Path, model: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            model: model.to_string(),
        }
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(RESULTS_FILE)
    }

    pub fn detailed_path(&self) -> PathBuf {
        self.dir.join(DETAILED_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join(STATS_FILE)
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create output directory: {}", self.dir.display()))
    }

    /// Append base results to the results log.
    pub fn append_results(&self, rows: &[SourceResult], timestamp: &str) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.results_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut out = String::new();
        if file.metadata()?.len() == 0 {
            out.push_str(&csv_line(&RESULTS_HEADER));
        }
        for row in rows {
            out.push_str(&csv_line(&[
                timestamp.to_string(),
                row.source.to_string(),
                row.question.category.to_string(),
                row.question.question.clone(),
                row.result.response.clone(),
                row.result.score.to_string(),
                row.result.reason.clone(),
                self.model.clone(),
                row.result.time_ms.to_string(),
            ]));
        }

        file.write_all(out.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Rewrite the detailed results file.
    pub fn write_detailed(&self, rows: &[DetailedTestResult], timestamp: &str) -> Result<PathBuf> {
        self.ensure_dir()?;
        let mut out = csv_line(&DETAILED_HEADER);
        for r in rows {
            out.push_str(&csv_line(&[
                timestamp.to_string(),
                r.source.to_string(),
                r.test_suite.clone(),
                r.category.to_string(),
                r.original_question.clone(),
                r.variation_type.clone(),
                r.variation_question.clone(),
                r.response.clone(),
                r.score.to_string(),
                r.reason.clone(),
                r.time_ms.to_string(),
                r.coherence_score.map(|c| c.to_string()).unwrap_or_default(),
            ]));
        }

        let path = self.detailed_path();
        std::fs::write(&path, out).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Rewrite the stats file.
    pub fn write_stats(&self, stats: &[AggregateStat]) -> Result<PathBuf> {
        self.ensure_dir()?;
        let mut out = csv_line(&STATS_HEADER);
        for s in stats {
            out.push_str(&csv_line(&[
                s.metric.to_string(),
                s.source.to_string(),
                s.label.clone(),
                s.display_value(),
            ]));
        }

        let path = self.stats_path();
        std::fs::write(&path, out).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
