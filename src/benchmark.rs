//! Benchmark orchestration.
//!
//! For every selected source and every catalog question the base question is
//! answered and judged, then each active variation generator's variations
//! are answered and judged the same way. Calls are issued one at a time.
//! Once everything has run, coherence is computed over the detailed results
//! (unless skipped) and the aggregate statistics are derived.
//!
//! When any generator is active, the base answer is also recorded as a
//! detailed result with variation type `"original"` so the coherence pass
//! can anchor each group on the unperturbed answer.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info};

use crate::catalog;
use crate::coherence::CoherenceAnalyzer;
use crate::config::Config;
use crate::gateway::{ModelGateway, OllamaGateway};
use crate::ingest::{collection_counts, require_populated, Ingestor};
use crate::judge::Judge;
use crate::models::{
    Collection, DetailedTestResult, SourceResult, TestQuestion, TestResult, ORIGINAL_VARIATION,
};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::rag::{RagService, RagSettings};
use crate::report::{self, ReportWriter};
use crate::stats::{self, AggregateStat, SourceSummary};
use crate::store::SqliteStore;
use crate::variation::{Mode, SuiteSelection, VariationGenerator};

#[derive(Debug, Clone)]
pub struct BenchmarkOptions {
    pub sources: Vec<Collection>,
    pub suites: SuiteSelection,
    pub mode: Mode,
    pub skip_coherence: bool,
    pub pass_threshold: u8,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            sources: Collection::ALL.to_vec(),
            suites: SuiteSelection::default(),
            mode: Mode::Full,
            skip_coherence: false,
            pass_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BenchmarkOutcome {
    pub base: Vec<SourceResult>,
    pub detailed: Vec<DetailedTestResult>,
    pub stats: Vec<AggregateStat>,
    pub summaries: Vec<SourceSummary>,
}

pub struct Benchmark {
    rag: Arc<RagService>,
    judge: Judge,
    coherence: CoherenceAnalyzer,
    progress: Arc<dyn ProgressReporter>,
}

impl Benchmark {
    pub fn new(rag: Arc<RagService>, judge: Judge, coherence: CoherenceAnalyzer) -> Self {
        Self {
            rag,
            judge,
            coherence,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run(&self, questions: &[TestQuestion], options: &BenchmarkOptions) -> BenchmarkOutcome {
        let generators = options.suites.build(options.mode);
        let mut base = Vec::new();
        let mut detailed = Vec::new();

        for &source in &options.sources {
            info!(source = %source, questions = questions.len(), "benchmarking source");
            let total = questions.len() as u64;

            for (i, question) in questions.iter().enumerate() {
                self.progress.report(ProgressEvent::Benchmarking {
                    source: source.to_string(),
                    n: i as u64,
                    total,
                    label: question.question.clone(),
                });

                let result = self.evaluate(question, &question.question, source).await;
                if !generators.is_empty() {
                    detailed.push(detailed_result(
                        source,
                        ORIGINAL_VARIATION,
                        question,
                        ORIGINAL_VARIATION,
                        &question.question,
                        &result,
                    ));
                }
                base.push(SourceResult {
                    source,
                    question: question.clone(),
                    result,
                });

                for generator in &generators {
                    self.run_generator(generator.as_ref(), question, source, &mut detailed)
                        .await;
                }
            }

            self.progress.report(ProgressEvent::Benchmarking {
                source: source.to_string(),
                n: total,
                total,
                label: String::new(),
            });
        }

        if !detailed.is_empty() && !options.skip_coherence {
            info!(results = detailed.len(), "computing coherence");
            detailed = self.coherence.compute(detailed).await;
        }

        let stats = stats::compute(&base, &detailed, options.pass_threshold);
        let summaries = stats::summarize_sources(&base);
        BenchmarkOutcome {
            base,
            detailed,
            stats,
            summaries,
        }
    }

    async fn run_generator(
        &self,
        generator: &dyn VariationGenerator,
        question: &TestQuestion,
        source: Collection,
        detailed: &mut Vec<DetailedTestResult>,
    ) {
        let suite = generator.test_suite_name();
        for (variation, text) in generator.generate_variations(&question.question) {
            debug!(source = %source, suite, variation = %variation, "running variation");
            let result = self.evaluate(question, &text, source).await;
            detailed.push(detailed_result(source, suite, question, &variation, &text, &result));
        }
    }

    /// Answer `text` from `source` and judge it against `question`'s rubric.
    /// Latency covers both calls.
    async fn evaluate(&self, question: &TestQuestion, text: &str, source: Collection) -> TestResult {
        let started = Instant::now();
        let response = self.rag.answer(text, source).await;
        let verdict = self
            .judge
            .judge(text, &response, question.category, &question.expected)
            .await;
        TestResult {
            response,
            score: verdict.score,
            reason: verdict.reason,
            time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn detailed_result(
    source: Collection,
    suite: &str,
    question: &TestQuestion,
    variation: &str,
    variation_question: &str,
    result: &TestResult,
) -> DetailedTestResult {
    DetailedTestResult {
        source,
        test_suite: suite.to_string(),
        category: question.category,
        original_question: question.question.clone(),
        variation_type: variation.to_string(),
        variation_question: variation_question.to_string(),
        response: result.response.clone(),
        score: result.score,
        reason: result.reason.clone(),
        time_ms: result.time_ms,
        coherence_score: None,
    }
}

/// Flags of `ragbench benchmark`.
#[derive(Debug, Clone)]
pub struct BenchmarkCommand {
    pub sources: Vec<Collection>,
    pub suites: SuiteSelection,
    pub mode: Mode,
    pub sample: Option<usize>,
    pub skip_coherence: bool,
    pub reindex: bool,
}

/// `ragbench benchmark`: run the catalog against the selected sources and
/// write the CSV reports.
pub async fn run_benchmark(
    config: &Config,
    command: &BenchmarkCommand,
    progress: Arc<dyn ProgressReporter>,
) -> Result<()> {
    println!("benchmark");
    println!("  chat model: {}", config.ollama.chat_model);
    println!("  judge model: {}", config.ollama.judge_model);
    println!(
        "  sources: {}",
        command.sources.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
    );
    let suites: Vec<&str> = command
        .suites
        .build(command.mode)
        .iter()
        .map(|g| g.test_suite_name())
        .collect();
    if !suites.is_empty() {
        println!("  suites: {} ({:?})", suites.join(", "), command.mode);
    }

    let gateway: Arc<dyn ModelGateway> = Arc::new(OllamaGateway::new(&config.ollama)?);
    let store = Arc::new(SqliteStore::open(config).await?);

    if command.reindex {
        let ingestor = Ingestor::new(&config.chunking, gateway.clone(), store.clone())
            .with_progress(progress.clone());
        for (collection, rows) in ingestor.reindex_all(&config.sources).await? {
            println!("  indexed {}: {} rows", collection.description(), rows);
        }
    } else {
        let counts: Vec<(Collection, u64)> = collection_counts(store.as_ref())
            .await?
            .into_iter()
            .filter(|(c, _)| command.sources.contains(c))
            .collect();
        require_populated(&counts)?;
    }

    let mut questions = match &config.benchmark.questions_file {
        Some(path) => catalog::load_catalog(path)?,
        None => catalog::default_catalog(),
    };
    if let Some(n) = command.sample {
        questions = catalog::sample(&questions, n, &mut rand::thread_rng());
    }
    println!("  questions: {}", questions.len());

    let rag = Arc::new(RagService::new(
        gateway.clone(),
        store.clone(),
        RagSettings::from_config(config),
    ));
    let judge = Judge::new(
        gateway.clone(),
        &config.ollama.judge_model,
        &config.assistant.domain,
    );
    let coherence = CoherenceAnalyzer::new(gateway).with_progress(progress.clone());
    let benchmark = Benchmark::new(rag, judge, coherence).with_progress(progress);

    let options = BenchmarkOptions {
        sources: command.sources.clone(),
        suites: command.suites,
        mode: command.mode,
        skip_coherence: command.skip_coherence,
        pass_threshold: config.benchmark.pass_threshold,
    };
    let outcome = benchmark.run(&questions, &options).await;

    let writer = ReportWriter::new(&config.benchmark.output_dir, &config.ollama.chat_model);
    let timestamp = report::timestamp_now();
    let results_path = writer.append_results(&outcome.base, &timestamp)?;
    println!("  results: {}", results_path.display());
    if !outcome.detailed.is_empty() {
        let detailed_path = writer.write_detailed(&outcome.detailed, &timestamp)?;
        let stats_path = writer.write_stats(&outcome.stats)?;
        println!("  detailed: {}", detailed_path.display());
        println!("  stats: {}", stats_path.display());
    }

    println!();
    for summary in &outcome.summaries {
        println!("{}  Average Score: {}/5", summary.source, summary.avg_score);
    }
    println!();
    println!("{:<10} {:>6} {:>10} {:>10}", "SOURCE", "TESTS", "AVG SCORE", "AVG TIME");
    for summary in &outcome.summaries {
        println!(
            "{:<10} {:>6} {:>10} {:>10}",
            summary.source,
            summary.tests,
            format!("{}/5", summary.avg_score),
            format!("{}ms", summary.avg_time_ms)
        );
    }
    println!();
    println!("total tests: {}", outcome.base.len() + outcome.detailed.len());

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::gateway::{ChatRequest, ModelGateway, TokenStream};
    use crate::models::QuestionCategory;
    use crate::rag::RagSettings;
    use crate::store::{InMemoryStore, VectorStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Constant embeddings, echoing chat replies and a fixed judge verdict.
    struct EchoGateway {
        generations: AtomicUsize,
    }

    #[async_trait]
    impl ModelGateway for EchoGateway {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, OracleError> {
            Ok(vec![1.0, 0.0, 0.0])
        }

        async fn generate(&self, request: &ChatRequest) -> Result<Option<String>, OracleError> {
            self.generations.fetch_add(1, Ordering::SeqCst);
            if request.json {
                Ok(Some(r#"{"score": 4, "reason": "Good"}"#.to_string()))
            } else {
                Ok(Some("An answer.".to_string()))
            }
        }

        async fn generate_stream(&self, _request: &ChatRequest) -> Result<TokenStream, OracleError> {
            Err(OracleError::Malformed("unused".into()))
        }
    }

    async fn benchmark(populated: bool) -> (Benchmark, Arc<EchoGateway>) {
        let gateway = Arc::new(EchoGateway {
            generations: AtomicUsize::new(0),
        });
        let store = Arc::new(InMemoryStore::new());
        if populated {
            for c in Collection::ALL {
                store.insert(c, "context", "{}", &[1.0, 0.0, 0.0]).await.unwrap();
            }
        }
        let rag = Arc::new(RagService::new(gateway.clone(), store, RagSettings::default()));
        let judge = Judge::new(gateway.clone(), "judge", "API Platform");
        let coherence = CoherenceAnalyzer::new(gateway.clone());
        (Benchmark::new(rag, judge, coherence), gateway)
    }

    fn questions() -> Vec<TestQuestion> {
        vec![
            TestQuestion::new("What is a State Provider?", QuestionCategory::Basic, "Explain"),
            TestQuestion::new("How to cook a pizza?", QuestionCategory::Trap, "Decline"),
        ]
    }

    #[tokio::test]
    async fn base_only_run() {
        let (bench, gateway) = benchmark(true).await;
        let outcome = bench.run(&questions(), &BenchmarkOptions::default()).await;

        assert_eq!(outcome.base.len(), 6);
        assert!(outcome.detailed.is_empty());
        assert_eq!(outcome.summaries.len(), 3);
        assert_eq!(outcome.base[0].source, Collection::Docs);
        assert_eq!(outcome.base[0].result.response, "An answer.");
        assert_eq!(outcome.base[0].result.score, 4);
        // one answer plus one judge call per base question
        assert_eq!(gateway.generations.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn variations_are_recorded_and_scored_for_coherence() {
        let (bench, _) = benchmark(true).await;
        let options = BenchmarkOptions {
            sources: vec![Collection::Docs],
            suites: SuiteSelection {
                robustness: true,
                ..SuiteSelection::default()
            },
            mode: Mode::Light,
            ..BenchmarkOptions::default()
        };
        let outcome = bench.run(&questions(), &options).await;

        assert_eq!(outcome.base.len(), 2);
        // original + lowercase + uppercase per question
        assert_eq!(outcome.detailed.len(), 6);
        assert!(outcome.detailed[0].is_original());
        assert_eq!(outcome.detailed[0].coherence_score, None);
        assert_eq!(outcome.detailed[1].variation_type, "lowercase");
        assert_eq!(outcome.detailed[1].variation_question, "what is a state provider?");
        assert_eq!(outcome.detailed[1].coherence_score, Some(1.0));
        assert_eq!(
            outcome.detailed.iter().filter(|r| r.coherence_score.is_some()).count(),
            4
        );
        assert!(outcome.stats.iter().any(|s| s.metric == "coherence_avg"));
    }

    #[tokio::test]
    async fn skip_coherence_leaves_scores_empty() {
        let (bench, _) = benchmark(true).await;
        let options = BenchmarkOptions {
            sources: vec![Collection::Code],
            suites: SuiteSelection {
                security: true,
                ..SuiteSelection::default()
            },
            mode: Mode::Light,
            skip_coherence: true,
            ..BenchmarkOptions::default()
        };
        let outcome = bench.run(&questions(), &options).await;
        assert!(!outcome.detailed.is_empty());
        assert!(outcome.detailed.iter().all(|r| r.coherence_score.is_none()));
        assert!(outcome.detailed.iter().skip(1).all(|r| r.test_suite == "security" || r.is_original()));
    }

    #[tokio::test]
    async fn empty_collection_answers_no_documents() {
        let (bench, _) = benchmark(false).await;
        let options = BenchmarkOptions {
            sources: vec![Collection::Combined],
            ..BenchmarkOptions::default()
        };
        let outcome = bench.run(&questions()[..1], &options).await;
        assert_eq!(outcome.base[0].result.response, crate::rag::NO_DOCUMENTS);
    }
}
