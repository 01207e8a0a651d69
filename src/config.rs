use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::Collection;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_chat_model")]
    pub judge_model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            embed_model: default_embed_model(),
            chat_model: default_chat_model(),
            judge_model: default_chat_model(),
            temperature: 0.0,
            timeout_secs: default_timeout_secs(),
            embed_timeout_secs: default_timeout_secs(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            max_retries: 0,
        }
    }
}

fn default_ollama_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_chat_model() -> String {
    "mistral".to_string()
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_stream_idle_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Section threshold for prose and window length for code, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_code_overlap")]
    pub code_overlap: usize,
    /// A code window is cut at its last newline only past this fraction.
    #[serde(default = "default_min_cut_ratio")]
    pub min_cut_ratio: f64,
    #[serde(default = "default_doc_extensions")]
    pub doc_extensions: Vec<String>,
    #[serde(default = "default_code_extensions")]
    pub code_extensions: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            code_overlap: default_code_overlap(),
            min_cut_ratio: default_min_cut_ratio(),
            doc_extensions: default_doc_extensions(),
            code_extensions: default_code_extensions(),
            exclude_globs: default_exclude_globs(),
        }
    }
}

fn default_chunk_size() -> usize {
    1500
}
fn default_code_overlap() -> usize {
    200
}
fn default_min_cut_ratio() -> f64 {
    0.7
}
fn default_doc_extensions() -> Vec<String> {
    vec!["md".to_string(), "mdx".to_string()]
}
fn default_code_extensions() -> Vec<String> {
    vec!["php".to_string()]
}
fn default_exclude_globs() -> Vec<String> {
    vec![
        "**/vendor/**".to_string(),
        "**/var/**".to_string(),
        "**/cache/**".to_string(),
        "**/.git/**".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    /// Documentation domain the assistant is restricted to.
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
        }
    }
}

fn default_domain() -> String {
    "API Platform and Symfony".to_string()
}

/// Paths fed into each collection by `ragbench reindex`.
#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_docs_paths")]
    pub docs: Vec<String>,
    #[serde(default = "default_code_paths")]
    pub code: Vec<String>,
    #[serde(default = "default_combined_paths")]
    pub combined: Vec<String>,
    /// Extra paths, one per line, appended to `code` and `combined`.
    #[serde(default)]
    pub fixtures_file: Option<PathBuf>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            docs: default_docs_paths(),
            code: default_code_paths(),
            combined: default_combined_paths(),
            fixtures_file: None,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_docs_paths() -> Vec<String> {
    vec!["docs/".to_string()]
}
fn default_code_paths() -> Vec<String> {
    vec!["core/tests/Functional/".to_string()]
}
fn default_combined_paths() -> Vec<String> {
    vec!["docs/".to_string(), "core/tests/Functional/".to_string()]
}

impl SourcesConfig {
    /// Resolve the ingestion paths of a collection.
    ///
    /// Relative entries are joined onto `root`; fixture lines are appended to
    /// `code` and `combined`. Paths are returned whether or not they exist.
    pub fn paths_for(&self, collection: Collection) -> Result<Vec<PathBuf>> {
        let mut entries: Vec<String> = match collection {
            Collection::Docs => self.docs.clone(),
            Collection::Code => self.code.clone(),
            Collection::Combined => self.combined.clone(),
        };

        if collection != Collection::Docs {
            entries.extend(self.fixture_lines()?);
        }

        Ok(entries
            .iter()
            .map(|entry| {
                let p = PathBuf::from(entry);
                if p.is_absolute() {
                    p
                } else {
                    self.root.join(p)
                }
            })
            .collect())
    }

    fn fixture_lines(&self) -> Result<Vec<String>> {
        let Some(file) = &self.fixtures_file else {
            return Ok(Vec::new());
        };
        let path = if file.is_absolute() {
            file.clone()
        } else {
            self.root.join(file)
        };
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read fixtures file: {}", path.display()))?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BenchmarkConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Minimum score counted as a pass.
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: u8,
    #[serde(default)]
    pub questions_file: Option<PathBuf>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            pass_threshold: default_pass_threshold(),
            questions_file: None,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_pass_threshold() -> u8 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if !(config.chunking.min_cut_ratio > 0.0 && config.chunking.min_cut_ratio < 1.0) {
        anyhow::bail!("chunking.min_cut_ratio must be in (0.0, 1.0)");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.benchmark.pass_threshold > 5 {
        anyhow::bail!("benchmark.pass_threshold must be <= 5");
    }

    if config.ollama.temperature < 0.0 {
        anyhow::bail!("ollama.temperature must be >= 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"data/rb.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 1500);
        assert_eq!(cfg.chunking.code_overlap, 200);
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.ollama.embed_model, "nomic-embed-text");
        assert_eq!(cfg.ollama.timeout_secs, 300);
        assert_eq!(cfg.benchmark.pass_threshold, 3);
        assert_eq!(cfg.ollama.temperature, 0.0);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = parse_config("[db]\npath = \"x\"\n[chunking]\nchunk_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn rejects_out_of_range_cut_ratio() {
        assert!(parse_config("[db]\npath = \"x\"\n[chunking]\nmin_cut_ratio = 1.5\n").is_err());
    }

    #[test]
    fn example_config_parses() {
        let cfg = parse_config(include_str!("../config/ragbench.example.toml")).unwrap();
        assert_eq!(cfg.ollama.judge_model, "mistral");
        assert_eq!(cfg.server.bind, "127.0.0.1:7341");
        assert_eq!(cfg.sources.combined.len(), 2);
    }

    #[test]
    fn fixtures_append_to_code_and_combined() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("files_to_index.txt"),
            "tests/Fixtures/Book.php\n\n  tests/Fixtures/Author.php  \n",
        )
        .unwrap();

        let sources = SourcesConfig {
            root: tmp.path().to_path_buf(),
            docs: vec!["docs/".into()],
            code: vec!["src/".into()],
            combined: vec!["docs/".into(), "src/".into()],
            fixtures_file: Some(PathBuf::from("files_to_index.txt")),
        };

        let docs = sources.paths_for(Collection::Docs).unwrap();
        assert_eq!(docs, vec![tmp.path().join("docs/")]);

        let code = sources.paths_for(Collection::Code).unwrap();
        assert_eq!(code.len(), 3);
        assert_eq!(code[2], tmp.path().join("tests/Fixtures/Author.php"));

        let combined = sources.paths_for(Collection::Combined).unwrap();
        assert_eq!(combined.len(), 4);
    }
}
