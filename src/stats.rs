//! Aggregate benchmark statistics.
//!
//! | Metric | Keyed by | Rounding |
//! |--------|----------|----------|
//! | `avg_score_by_category` | source, category | 2 decimals |
//! | `avg_time_by_category` | source, category | integer ms |
//! | `avg_score_by_test` | source, `suite/variation` | 2 decimals |
//! | `avg_time_by_test` | source, `suite/variation` | integer ms |
//! | `pass_rate_by_test` | source, `suite/variation` | percent, 1 decimal |
//! | `avg_coherence_by_test` | source, `suite/variation` | 3 decimals |
//! | `coherence_avg` / `_min` / `_max` | source, `all` | 3 decimals |
//!
//! Category metrics come from the base results, the rest from the detailed
//! results. Rows appear in encounter order.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::models::{Collection, DetailedTestResult, SourceResult};
use crate::vector::round_to;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStat {
    pub metric: &'static str,
    pub source: Collection,
    pub label: String,
    pub value: f64,
    pub percent: bool,
}

impl AggregateStat {
    fn new(metric: &'static str, source: Collection, label: &str, value: f64) -> Self {
        Self {
            metric,
            source,
            label: label.to_string(),
            value,
            percent: false,
        }
    }

    fn percent(mut self) -> Self {
        self.percent = true;
        self
    }

    /// Value as written to the stats report, e.g. `4.5` or `80%`.
    pub fn display_value(&self) -> String {
        if self.percent {
            format!("{}%", self.value)
        } else {
            format!("{}", self.value)
        }
    }
}

impl fmt::Display for AggregateStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.metric,
            self.source,
            self.label,
            self.display_value()
        )
    }
}

/// Per-source summary of the base results.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub source: Collection,
    pub tests: usize,
    pub avg_score: f64,
    pub avg_time_ms: f64,
}

/// Group `items` by `key`, preserving first-seen order of keys.
fn ordered_groups<'a, T, K, F>(items: &'a [T], key: F) -> Vec<(K, Vec<&'a T>)>
where
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<&T>)> = Vec::new();
    for item in items {
        let k = key(item);
        match index.get(&k) {
            Some(&i) => groups[i].1.push(item),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, vec![item]));
            }
        }
    }
    groups
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

pub fn compute(
    base: &[SourceResult],
    detailed: &[DetailedTestResult],
    pass_threshold: u8,
) -> Vec<AggregateStat> {
    let mut stats = Vec::new();

    for ((source, category), group) in ordered_groups(base, |r| (r.source, r.question.category)) {
        let label = category.as_str();
        let avg_score = mean(group.iter().map(|r| r.result.score as f64));
        let avg_time = mean(group.iter().map(|r| r.result.time_ms as f64));
        stats.push(AggregateStat::new("avg_score_by_category", source, label, round_to(avg_score, 2)));
        stats.push(AggregateStat::new("avg_time_by_category", source, label, round_to(avg_time, 0)));
    }

    let by_test = ordered_groups(detailed, |r| {
        (r.source, r.test_suite.clone(), r.variation_type.clone())
    });
    for ((source, suite, variation), group) in by_test {
        let label = format!("{}/{}", suite, variation);
        let avg_score = mean(group.iter().map(|r| r.score as f64));
        let avg_time = mean(group.iter().map(|r| r.time_ms as f64));
        let passed = group.iter().filter(|r| r.score >= pass_threshold).count();
        let pass_rate = passed as f64 / group.len() as f64 * 100.0;

        stats.push(AggregateStat::new("avg_score_by_test", source, &label, round_to(avg_score, 2)));
        stats.push(AggregateStat::new("avg_time_by_test", source, &label, round_to(avg_time, 0)));
        stats.push(
            AggregateStat::new("pass_rate_by_test", source, &label, round_to(pass_rate, 1)).percent(),
        );

        let coherence: Vec<f64> = group.iter().filter_map(|r| r.coherence_score).collect();
        if !coherence.is_empty() {
            stats.push(AggregateStat::new(
                "avg_coherence_by_test",
                source,
                &label,
                round_to(mean(coherence.iter().copied()), 3),
            ));
        }
    }

    let scored: Vec<&DetailedTestResult> = detailed
        .iter()
        .filter(|r| r.coherence_score.is_some())
        .collect();
    for (source, group) in ordered_groups(&scored, |r| r.source) {
        let scores: Vec<f64> = group.iter().filter_map(|r| r.coherence_score).collect();
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        stats.push(AggregateStat::new("coherence_avg", source, "all", round_to(mean(scores.iter().copied()), 3)));
        stats.push(AggregateStat::new("coherence_min", source, "all", round_to(min, 3)));
        stats.push(AggregateStat::new("coherence_max", source, "all", round_to(max, 3)));
    }

    stats
}

/// Average score and latency of the base results, per source in encounter order.
pub fn summarize_sources(base: &[SourceResult]) -> Vec<SourceSummary> {
    ordered_groups(base, |r| r.source)
        .into_iter()
        .map(|(source, group)| SourceSummary {
            source,
            tests: group.len(),
            avg_score: round_to(mean(group.iter().map(|r| r.result.score as f64)), 2),
            avg_time_ms: round_to(mean(group.iter().map(|r| r.result.time_ms as f64)), 0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuestionCategory, TestQuestion, TestResult};

    fn base(source: Collection, category: QuestionCategory, score: u8, time_ms: u64) -> SourceResult {
        SourceResult {
            source,
            question: TestQuestion::new("Q", category, "E"),
            result: TestResult {
                response: "A".into(),
                score,
                reason: "r".into(),
                time_ms,
            },
        }
    }

    fn detailed(
        source: Collection,
        suite: &str,
        variation: &str,
        score: u8,
        coherence: Option<f64>,
    ) -> DetailedTestResult {
        DetailedTestResult {
            source,
            test_suite: suite.into(),
            category: QuestionCategory::Basic,
            original_question: "Q".into(),
            variation_type: variation.into(),
            variation_question: "q".into(),
            response: "A".into(),
            score,
            reason: "r".into(),
            time_ms: 100,
            coherence_score: coherence,
        }
    }

    fn find<'a>(stats: &'a [AggregateStat], metric: &str, source: Collection, label: &str) -> &'a AggregateStat {
        stats
            .iter()
            .find(|s| s.metric == metric && s.source == source && s.label == label)
            .unwrap_or_else(|| panic!("missing {} {} {}", metric, source, label))
    }

    #[test]
    fn category_averages_per_source() {
        let results = vec![
            base(Collection::Docs, QuestionCategory::Basic, 4, 1000),
            base(Collection::Docs, QuestionCategory::Basic, 3, 1501),
            base(Collection::Docs, QuestionCategory::Trap, 5, 200),
            base(Collection::Code, QuestionCategory::Basic, 1, 10),
        ];
        let stats = compute(&results, &[], 3);

        assert_eq!(find(&stats, "avg_score_by_category", Collection::Docs, "basic").value, 3.5);
        assert_eq!(find(&stats, "avg_time_by_category", Collection::Docs, "basic").value, 1251.0);
        assert_eq!(find(&stats, "avg_score_by_category", Collection::Code, "basic").value, 1.0);
        assert_eq!(stats.len(), 6);
        assert_eq!(stats[0].metric, "avg_score_by_category");
        assert_eq!(stats[0].source, Collection::Docs);
    }

    #[test]
    fn pass_rate_and_coherence_per_test() {
        let rows = vec![
            detailed(Collection::Docs, "robustness", "lowercase", 4, Some(0.9)),
            detailed(Collection::Docs, "robustness", "lowercase", 2, Some(0.8)),
            detailed(Collection::Docs, "robustness", "lowercase", 3, None),
            detailed(Collection::Docs, "security", "jailbreak_roleplay", 0, None),
        ];
        let stats = compute(&[], &rows, 3);

        let pass = find(&stats, "pass_rate_by_test", Collection::Docs, "robustness/lowercase");
        assert_eq!(pass.value, 66.7);
        assert_eq!(pass.display_value(), "66.7%");
        assert_eq!(
            find(&stats, "avg_coherence_by_test", Collection::Docs, "robustness/lowercase").value,
            0.85
        );
        assert!(!stats
            .iter()
            .any(|s| s.metric == "avg_coherence_by_test" && s.label == "security/jailbreak_roleplay"));
        assert_eq!(
            find(&stats, "pass_rate_by_test", Collection::Docs, "security/jailbreak_roleplay").display_value(),
            "0%"
        );
    }

    #[test]
    fn global_coherence_by_source() {
        let rows = vec![
            detailed(Collection::Combined, "bias", "name_asian", 4, Some(0.5)),
            detailed(Collection::Combined, "bias", "name_arabic", 4, Some(0.9)),
            detailed(Collection::Docs, "bias", "name_asian", 4, None),
        ];
        let stats = compute(&[], &rows, 3);
        assert_eq!(find(&stats, "coherence_avg", Collection::Combined, "all").value, 0.7);
        assert_eq!(find(&stats, "coherence_min", Collection::Combined, "all").value, 0.5);
        assert_eq!(find(&stats, "coherence_max", Collection::Combined, "all").value, 0.9);
        assert!(!stats.iter().any(|s| s.metric == "coherence_avg" && s.source == Collection::Docs));
    }

    #[test]
    fn source_summary() {
        let results = vec![
            base(Collection::Docs, QuestionCategory::Basic, 5, 100),
            base(Collection::Docs, QuestionCategory::Code, 2, 301),
            base(Collection::Code, QuestionCategory::Basic, 4, 50),
        ];
        let summary = summarize_sources(&results);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].tests, 2);
        assert_eq!(summary[0].avg_score, 3.5);
        assert_eq!(summary[0].avg_time_ms, 201.0);
        assert_eq!(summary[1].source, Collection::Code);
    }
}
