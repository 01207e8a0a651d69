//! # ragbench CLI
//!
//! The `ragbench` binary indexes the documentation corpus, answers questions
//! from it, benchmarks the answers and serves a streaming chat endpoint.
//!
//! ## Usage
//!
//! ```bash
//! ragbench --config ./config/ragbench.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragbench init` | Create the SQLite database and the collection tables |
//! | `ragbench ingest <path> --target <collection>` | Chunk, embed and store a file or directory |
//! | `ragbench reindex` | Rebuild every collection from `[sources]` |
//! | `ragbench status` | Row count of every collection |
//! | `ragbench ask "<question>"` | Answer one question |
//! | `ragbench benchmark` | Run the question catalog and write CSV reports |
//! | `ragbench serve` | Start the streaming chat server |
//!
//! ## Examples
//!
//! ```bash
//! # Index the Markdown docs into the docs collection, replacing its content
//! ragbench ingest ./docs --target docs --clear
//!
//! # Count chunks without calling the embedding model
//! ragbench ingest ./core/tests --target code --dry-run --exclude "**/Fixtures/**"
//!
//! # Quick benchmark of two sources with every suite in light mode
//! ragbench benchmark --sources docs,code --all-suites --light --sample 3
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragbench::benchmark::{self, BenchmarkCommand};
use ragbench::models::Collection;
use ragbench::progress::ProgressMode;
use ragbench::variation::{Mode, SuiteSelection};
use ragbench::{config, ingest, migrate, rag, server};

/// Ingestion, retrieval and benchmark harness for a documentation RAG
/// assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragbench.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "ragbench", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragbench.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Progress output on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and one table per collection.
    /// Running it again is safe.
    Init,

    /// Ingest a file or directory into one collection.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,

        /// Target collection: `docs`, `code` or `combined`.
        #[arg(long)]
        target: String,

        /// Truncate the collection before inserting.
        #[arg(long)]
        clear: bool,

        /// Chunk only. Nothing is embedded or written.
        #[arg(long)]
        dry_run: bool,

        /// Extra exclusion glob, matched against paths relative to `path`.
        #[arg(long = "exclude")]
        excludes: Vec<String>,

        /// Report progress every N files.
        #[arg(long, default_value_t = 10)]
        batch_size: usize,
    },

    /// Rebuild every collection from the `[sources]` paths.
    Reindex,

    /// Show the row count of every collection.
    Status,

    /// Answer one question from a collection.
    Ask {
        question: String,

        /// Collection to retrieve from.
        #[arg(long, default_value = "combined")]
        source: String,

        /// Print tokens as they are generated.
        #[arg(long)]
        stream: bool,
    },

    /// Run the question catalog against the collections and write CSV reports.
    Benchmark {
        /// Run the robustness suite (case, typos, punctuation).
        #[arg(long)]
        robustness: bool,

        /// Run the security suite (prompt injection, jailbreaks).
        #[arg(long)]
        security: bool,

        /// Run the bias suite (names, gender, tone).
        #[arg(long)]
        bias: bool,

        /// Run the context-noise suite (irrelevant padding).
        #[arg(long)]
        context_noise: bool,

        /// Run every suite.
        #[arg(long)]
        all_suites: bool,

        /// Fewer variations per suite.
        #[arg(long)]
        light: bool,

        /// Benchmark N randomly chosen questions instead of the whole catalog.
        #[arg(long)]
        sample: Option<usize>,

        /// Do not compute coherence scores.
        #[arg(long)]
        skip_coherence: bool,

        /// Rebuild every collection before running.
        #[arg(long)]
        reindex: bool,

        /// Comma-separated sources to benchmark (default: all).
        #[arg(long, value_delimiter = ',')]
        sources: Vec<Collection>,
    },

    /// Start the streaming chat server on `[server].bind`.
    Serve,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            target,
            clear,
            dry_run,
            excludes,
            batch_size,
        } => {
            let options = ingest::IngestOptions {
                clear,
                dry_run,
                excludes,
                batch_size,
            };
            ingest::run_ingest(&cfg, &path, &target, &options, progress).await?;
        }
        Commands::Reindex => {
            ingest::run_reindex(&cfg, progress).await?;
        }
        Commands::Status => {
            ingest::run_status(&cfg).await?;
        }
        Commands::Ask {
            question,
            source,
            stream,
        } => {
            rag::run_ask(&cfg, &question, &source, stream).await?;
        }
        Commands::Benchmark {
            robustness,
            security,
            bias,
            context_noise,
            all_suites,
            light,
            sample,
            skip_coherence,
            reindex,
            sources,
        } => {
            let suites = if all_suites {
                SuiteSelection::all()
            } else {
                SuiteSelection {
                    robustness,
                    security,
                    bias,
                    context_noise,
                }
            };
            let sources = if sources.is_empty() {
                Collection::ALL.to_vec()
            } else {
                sources
            };
            let command = BenchmarkCommand {
                sources,
                suites,
                mode: Mode::from_light_flag(light),
                sample,
                skip_coherence,
                reindex,
            };
            benchmark::run_benchmark(&cfg, &command, progress).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
