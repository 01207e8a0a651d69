//! # ragbench
//!
//! A retrieval-augmented question-answering assistant over a documentation
//! corpus, and a harness that benchmarks it.
//!
//! Documentation and code are chunked, embedded through a local Ollama
//! server and stored in three SQLite-backed vector collections (`docs`,
//! `code`, `combined`). Questions are answered from the nearest chunks of one
//! collection. The benchmark answers a question catalog against every
//! collection, perturbs each question through variation suites (robustness,
//! security, bias, context noise), has a judge model score every answer,
//! measures how consistent the answers to perturbed questions stay, and
//! writes CSV reports.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Docs/Code  │──▶│   Ingest    │──▶│    SQLite    │
//! │   files    │   │ Chunk+Embed │   │ 3 collections│
//! └────────────┘   └─────────────┘   └──────┬───────┘
//!                                           │
//!                     ┌─────────────────────┤
//!                     ▼                     ▼
//!              ┌─────────────┐       ┌────────────┐
//!              │  Benchmark  │       │ Chat (HTTP)│
//!              │ RAG + Judge │       │  streaming │
//!              └─────────────┘       └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragbench init                                  # create tables
//! ragbench ingest ./docs --target docs --clear   # index one collection
//! ragbench reindex                               # rebuild all collections
//! ragbench ask "What is a State Provider?"
//! ragbench benchmark --all-suites --light --sample 3
//! ragbench serve                                 # streaming chat endpoint
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed oracle and configuration errors |
//! | [`models`] | Core data types |
//! | [`chunk`] | Prose and code chunking |
//! | [`vector`] | Vector encoding and cosine similarity |
//! | [`gateway`] | Embedding and chat model oracle (Ollama) |
//! | [`store`] | Vector store abstraction, SQLite and in-memory |
//! | [`db`] | Database connection |
//! | [`migrate`] | Collection tables |
//! | [`ingest`] | File discovery, chunking and indexing |
//! | [`rag`] | Retrieval-augmented answering |
//! | [`variation`] | Question variation suites |
//! | [`judge`] | LLM-as-judge scoring |
//! | [`coherence`] | Cross-variation answer similarity |
//! | [`catalog`] | Benchmark question catalog |
//! | [`benchmark`] | Benchmark orchestration |
//! | [`stats`] | Aggregate statistics |
//! | [`report`] | CSV reports |
//! | [`progress`] | Progress reporting |
//! | [`server`] | Streaming chat HTTP server |

pub mod benchmark;
pub mod catalog;
pub mod chunk;
pub mod coherence;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod judge;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod rag;
pub mod report;
pub mod server;
pub mod stats;
pub mod store;
pub mod variation;
pub mod vector;
