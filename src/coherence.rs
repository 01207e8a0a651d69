//! Cross-variation answer coherence.
//!
//! Results are grouped by `(source, original_question)`. Within each group of
//! two or more, every response is embedded and compared with the anchor
//! response (the unperturbed `"original"` result when present, otherwise the
//! first in encounter order) by cosine similarity, rounded to three decimals.
//! The anchor itself keeps no score. An embedding failure leaves the affected
//! member unscored, or the whole group when it is the anchor that failed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::gateway::ModelGateway;
use crate::models::{Collection, DetailedTestResult};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::vector::{cosine_similarity, round_to};

pub struct CoherenceAnalyzer {
    gateway: Arc<dyn ModelGateway>,
    progress: Arc<dyn ProgressReporter>,
}

impl CoherenceAnalyzer {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self {
            gateway,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Return `results` with coherence scores filled in.
    ///
    /// The output has the same length and order; scored entries are new
    /// values, everything else is passed through untouched.
    pub async fn compute(&self, results: Vec<DetailedTestResult>) -> Vec<DetailedTestResult> {
        let groups = group_indices(&results);
        let total = groups.len() as u64;
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for (done, members) in groups.iter().enumerate() {
            if members.len() >= 2 {
                self.score_group(&results, members, &mut scores).await;
            }
            self.progress.report(ProgressEvent::Coherence {
                n: done as u64 + 1,
                total,
            });
        }

        results
            .into_iter()
            .enumerate()
            .map(|(idx, result)| match scores.get(&idx) {
                Some(score) => result.with_coherence(*score),
                None => result,
            })
            .collect()
    }

    async fn score_group(
        &self,
        results: &[DetailedTestResult],
        members: &[usize],
        scores: &mut HashMap<usize, f64>,
    ) {
        let anchor = members
            .iter()
            .copied()
            .find(|&i| results[i].is_original())
            .unwrap_or(members[0]);

        let anchor_vec = match self.gateway.embed(&results[anchor].response).await {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    source = %results[anchor].source,
                    question = %results[anchor].original_question,
                    error = %e,
                    "anchor embedding failed, group left unscored"
                );
                return;
            }
        };

        for &idx in members.iter().filter(|&&i| i != anchor) {
            match self.gateway.embed(&results[idx].response).await {
                Ok(v) => {
                    let similarity = cosine_similarity(&anchor_vec, &v);
                    scores.insert(idx, round_to(similarity, 3));
                }
                Err(e) => {
                    warn!(
                        variation = %results[idx].variation_type,
                        error = %e,
                        "response embedding failed, left unscored"
                    );
                }
            }
        }
    }
}

/// Indices of each `(source, original_question)` group, groups in order of
/// first appearance.
fn group_indices(results: &[DetailedTestResult]) -> Vec<Vec<usize>> {
    let mut order: Vec<(Collection, &str)> = Vec::new();
    let mut groups: HashMap<(Collection, &str), Vec<usize>> = HashMap::new();

    for (idx, result) in results.iter().enumerate() {
        let key = (result.source, result.original_question.as_str());
        groups
            .entry(key)
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(idx);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::gateway::{ChatRequest, TokenStream};
    use crate::models::{QuestionCategory, ORIGINAL_VARIATION};
    use async_trait::async_trait;

    /// Maps known responses to fixed vectors; anything else fails.
    struct TableGateway(Vec<(&'static str, Vec<f32>)>);

    #[async_trait]
    impl ModelGateway for TableGateway {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
            self.0
                .iter()
                .find(|(t, _)| *t == text)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| OracleError::Transport {
                    endpoint: "/api/embed".into(),
                    message: "unknown text".into(),
                })
        }

        async fn generate(&self, _request: &ChatRequest) -> Result<Option<String>, OracleError> {
            Ok(None)
        }

        async fn generate_stream(&self, _request: &ChatRequest) -> Result<TokenStream, OracleError> {
            Err(OracleError::Malformed("unused".into()))
        }
    }

    fn result(source: Collection, question: &str, variation: &str, response: &str) -> DetailedTestResult {
        DetailedTestResult {
            source,
            test_suite: if variation == ORIGINAL_VARIATION { "original" } else { "robustness" }.into(),
            category: QuestionCategory::Basic,
            original_question: question.into(),
            variation_type: variation.into(),
            variation_question: question.into(),
            response: response.into(),
            score: 3,
            reason: "ok".into(),
            time_ms: 10,
            coherence_score: None,
        }
    }

    fn gateway() -> Arc<TableGateway> {
        Arc::new(TableGateway(vec![
            ("base", vec![1.0, 0.0]),
            ("same", vec![2.0, 0.0]),
            ("orthogonal", vec![0.0, 1.0]),
            ("diagonal", vec![1.0, 1.0]),
        ]))
    }

    #[tokio::test]
    async fn group_of_three_scores_two() {
        let input = vec![
            result(Collection::Docs, "Q1", "lowercase", "same"),
            result(Collection::Docs, "Q1", ORIGINAL_VARIATION, "base"),
            result(Collection::Docs, "Q1", "uppercase", "diagonal"),
        ];
        let out = CoherenceAnalyzer::new(gateway()).compute(input.clone()).await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].coherence_score, Some(1.0));
        assert_eq!(out[1].coherence_score, None);
        assert_eq!(out[2].coherence_score, Some(0.707));
        for (before, after) in input.iter().zip(out.iter()) {
            assert_eq!(before.response, after.response);
            assert_eq!(before.variation_type, after.variation_type);
        }
    }

    #[tokio::test]
    async fn first_member_anchors_without_original() {
        let input = vec![
            result(Collection::Code, "Q", "lowercase", "base"),
            result(Collection::Code, "Q", "uppercase", "orthogonal"),
        ];
        let out = CoherenceAnalyzer::new(gateway()).compute(input).await;
        assert_eq!(out[0].coherence_score, None);
        assert_eq!(out[1].coherence_score, Some(0.0));
    }

    #[tokio::test]
    async fn singletons_and_other_sources_are_separate() {
        let input = vec![
            result(Collection::Docs, "Q", ORIGINAL_VARIATION, "base"),
            result(Collection::Code, "Q", "lowercase", "same"),
        ];
        let out = CoherenceAnalyzer::new(gateway()).compute(input).await;
        assert!(out.iter().all(|r| r.coherence_score.is_none()));
    }

    #[tokio::test]
    async fn embedding_failure_leaves_member_unscored() {
        let input = vec![
            result(Collection::Docs, "Q", ORIGINAL_VARIATION, "base"),
            result(Collection::Docs, "Q", "lowercase", "unembeddable"),
            result(Collection::Docs, "Q", "uppercase", "same"),
        ];
        let out = CoherenceAnalyzer::new(gateway()).compute(input).await;
        assert_eq!(out[1].coherence_score, None);
        assert_eq!(out[2].coherence_score, Some(1.0));
    }

    #[tokio::test]
    async fn scores_stay_in_range() {
        let input = vec![
            result(Collection::Combined, "Q", ORIGINAL_VARIATION, "base"),
            result(Collection::Combined, "Q", "a", "orthogonal"),
            result(Collection::Combined, "Q", "b", "diagonal"),
            result(Collection::Combined, "Q", "c", "same"),
        ];
        let out = CoherenceAnalyzer::new(gateway()).compute(input).await;
        for r in out.iter().filter_map(|r| r.coherence_score) {
            assert!((-1.0..=1.0).contains(&r));
        }
    }
}
