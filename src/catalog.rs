//! Benchmark question catalog.
//!
//! A built-in set of ten questions covers the assistant's domain plus two
//! out-of-domain traps. A TOML file can replace it:
//!
//! ```toml
//! [[questions]]
//! question = "What is a State Provider?"
//! category = "basic"
//! expected = "Should explain State Provider concept"
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::Deserialize;

use crate::models::{QuestionCategory, TestQuestion};

#[derive(Debug, Deserialize)]
struct CatalogFile {
    questions: Vec<TestQuestion>,
}

pub fn default_catalog() -> Vec<TestQuestion> {
    use QuestionCategory::*;
    vec![
        TestQuestion::new("What is a State Provider?", Basic, "Should explain State Provider concept"),
        TestQuestion::new(
            "How does API Platform handle serialization?",
            Basic,
            "Should explain serialization mechanism",
        ),
        TestQuestion::new(
            "Give me a code example to create an API Platform entity.",
            Code,
            "Should provide PHP code example with ApiResource",
        ),
        TestQuestion::new(
            "How to implement a custom data provider?",
            Code,
            "Should provide implementation code",
        ),
        TestQuestion::new("How to create a Custom Filter?", Advanced, "Should provide filter implementation"),
        TestQuestion::new(
            "How to handle validation errors (422)?",
            Advanced,
            "Should explain 422 error handling",
        ),
        TestQuestion::new("How to secure API endpoints?", Security, "Should explain endpoint security"),
        TestQuestion::new(
            "How to write functional tests for API Platform?",
            Testing,
            "Should explain functional testing",
        ),
        TestQuestion::new(
            "What is the capital of Switzerland?",
            Trap,
            "Should decline to answer or say it lacks information",
        ),
        TestQuestion::new("How to cook a pizza?", Trap, "Should decline to answer"),
    ]
}

pub fn load_catalog(path: &Path) -> Result<Vec<TestQuestion>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read questions file: {}", path.display()))?;
    parse_catalog(&content).with_context(|| format!("Invalid questions file: {}", path.display()))
}

pub fn parse_catalog(content: &str) -> Result<Vec<TestQuestion>> {
    let file: CatalogFile = toml::from_str(content)?;
    if file.questions.is_empty() {
        bail!("catalog contains no questions");
    }
    if let Some(q) = file.questions.iter().find(|q| q.question.trim().is_empty()) {
        bail!("catalog entry with category '{}' has an empty question", q.category);
    }
    Ok(file.questions)
}

/// `min(n, len)` randomly chosen questions, kept in catalog order.
pub fn sample<R: Rng + ?Sized>(catalog: &[TestQuestion], n: usize, rng: &mut R) -> Vec<TestQuestion> {
    let amount = n.min(catalog.len());
    let mut picked = rand::seq::index::sample(rng, catalog.len(), amount).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| catalog[i].clone()).collect()
}
