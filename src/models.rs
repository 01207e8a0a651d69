//! Core data models used throughout the harness.
//!
//! These types represent the chunks that flow through ingestion and the
//! questions, answers and verdicts that flow through a benchmark run. All of
//! them are plain values: once built they are never mutated, only replaced.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Variation label carried by results produced from the unperturbed question.
pub const ORIGINAL_VARIATION: &str = "original";

/// One of the three indexed sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Docs,
    Code,
    Combined,
}

impl Collection {
    /// All collections, in benchmark order.
    pub const ALL: [Collection; 3] = [Collection::Docs, Collection::Code, Collection::Combined];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Docs => "docs",
            Collection::Code => "code",
            Collection::Combined => "combined",
        }
    }

    /// Name of the backing table in the SQLite store.
    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Docs => "vector_store_docs",
            Collection::Code => "vector_store_code",
            Collection::Combined => "vector_store_combined",
        }
    }

    /// Human description used in re-index output.
    pub fn description(&self) -> &'static str {
        match self {
            Collection::Docs => "Documentation (Markdown)",
            Collection::Code => "Code (tests + fixtures)",
            Collection::Combined => "Combined (docs + tests + fixtures)",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docs" => Ok(Collection::Docs),
            "code" => Ok(Collection::Code),
            "combined" => Ok(Collection::Combined),
            _ => Err(ConfigurationError::UnknownCollection(s.to_string())),
        }
    }
}

/// Segmentation policy a chunk was produced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChunkKind {
    Code,
    Doc,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Code => "CODE",
            ChunkKind::Doc => "DOC",
        }
    }
}

/// A retrievable unit of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub filename: String,
    pub chunk_index: usize,
    pub kind: ChunkKind,
    pub collection: Collection,
}

impl Chunk {
    /// Metadata row persisted alongside the chunk vector.
    pub fn metadata_json(&self, hash: &str) -> String {
        serde_json::json!({
            "filename": self.filename,
            "chunk_index": self.chunk_index,
            "type": self.kind.as_str(),
            "source": self.collection.as_str(),
            "hash": hash,
        })
        .to_string()
    }
}

/// Question category; drives the judge rubric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionCategory {
    Basic,
    Code,
    Advanced,
    Security,
    Testing,
    Trap,
}

impl QuestionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionCategory::Basic => "basic",
            QuestionCategory::Code => "code",
            QuestionCategory::Advanced => "advanced",
            QuestionCategory::Security => "security",
            QuestionCategory::Testing => "testing",
            QuestionCategory::Trap => "trap",
        }
    }
}

impl fmt::Display for QuestionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestQuestion {
    pub question: String,
    pub category: QuestionCategory,
    pub expected: String,
}

impl TestQuestion {
    pub fn new(question: &str, category: QuestionCategory, expected: &str) -> Self {
        Self {
            question: question.to_string(),
            category,
            expected: expected.to_string(),
        }
    }
}

/// Answer plus verdict for one (question, source) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub response: String,
    /// Always within `0..=5`.
    pub score: u8,
    pub reason: String,
    pub time_ms: u64,
}

/// A [`TestResult`] recorded for the base question of a source, as written to
/// the append-only results log.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceResult {
    pub source: Collection,
    pub question: TestQuestion,
    pub result: TestResult,
}

/// Result of one question variation, tagged with enough context to group and
/// aggregate it later.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedTestResult {
    pub source: Collection,
    pub test_suite: String,
    pub category: QuestionCategory,
    pub original_question: String,
    pub variation_type: String,
    pub variation_question: String,
    pub response: String,
    pub score: u8,
    pub reason: String,
    pub time_ms: u64,
    /// Filled in by the coherence pass; within `[-1.0, 1.0]` when present.
    pub coherence_score: Option<f64>,
}

impl DetailedTestResult {
    pub fn is_original(&self) -> bool {
        self.variation_type == ORIGINAL_VARIATION
    }

    /// A copy of this result carrying a coherence score.
    pub fn with_coherence(&self, score: f64) -> Self {
        Self {
            coherence_score: Some(score.clamp(-1.0, 1.0)),
            ..self.clone()
        }
    }
}
