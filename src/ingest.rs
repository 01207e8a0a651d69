//! Ingestion pipeline.
//!
//! Walks a file or directory, chunks every documentation or code file,
//! embeds each chunk through the [`ModelGateway`] and appends it to one
//! collection of the [`VectorStore`]. A chunk whose embedding fails is logged
//! and counted; the rest of the run continues.
//!
//! Re-indexing ([`Ingestor::reindex_all`]) rebuilds every collection from the
//! `[sources]` configuration, truncating each one first.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::{detect_kind, Chunker};
use crate::config::{ChunkingConfig, Config, SourcesConfig};
use crate::error::ConfigurationError;
use crate::gateway::{ModelGateway, OllamaGateway};
use crate::models::{ChunkKind, Collection};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::store::{SqliteStore, VectorStore};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Truncate the collection before inserting.
    pub clear: bool,
    /// Chunk only: no truncate, no embedding, no inserts.
    pub dry_run: bool,
    /// Extra exclusion globs on top of `chunking.exclude_globs`.
    pub excludes: Vec<String>,
    /// Emit a progress event every `batch_size` files.
    pub batch_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            clear: false,
            dry_run: false,
            excludes: Vec::new(),
            batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files: u64,
    pub chunks: u64,
    pub inserted: u64,
    /// Chunks whose embedding failed.
    pub failed: u64,
    /// Files that could not be read as UTF-8 text.
    pub skipped_files: u64,
}

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Name recorded in chunk prefixes and metadata, relative to the ingest root.
    pub name: String,
    pub kind: ChunkKind,
}

pub struct Ingestor {
    chunker: Chunker,
    chunking: ChunkingConfig,
    gateway: Arc<dyn ModelGateway>,
    store: Arc<dyn VectorStore>,
    progress: Arc<dyn ProgressReporter>,
}

impl Ingestor {
    pub fn new(
        chunking: &ChunkingConfig,
        gateway: Arc<dyn ModelGateway>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            chunker: Chunker::from_config(chunking),
            chunking: chunking.clone(),
            gateway,
            store,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Ingest every eligible file under `path` into `collection`.
    ///
    /// Fails with [`ConfigurationError::MissingPath`] when `path` does not
    /// exist; nothing is truncated in that case.
    pub async fn ingest_path(
        &self,
        path: &Path,
        collection: Collection,
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        if !path.exists() {
            return Err(ConfigurationError::MissingPath(path.to_path_buf()).into());
        }

        let files = discover_files(path, &self.chunking, &options.excludes)?;
        info!(
            collection = %collection,
            path = %path.display(),
            files = files.len(),
            dry_run = options.dry_run,
            "ingesting"
        );

        if options.clear && !options.dry_run {
            self.store.truncate(collection).await?;
        }

        let total = files.len() as u64;
        let batch = options.batch_size.max(1) as u64;
        let mut report = IngestReport::default();

        for (i, file) in files.iter().enumerate() {
            let text = match std::fs::read_to_string(&file.path) {
                Ok(t) => t,
                Err(e) => {
                    warn!(file = %file.path.display(), error = %e, "skipping unreadable file");
                    report.skipped_files += 1;
                    continue;
                }
            };

            let chunks = self
                .chunker
                .chunk_document(&text, &file.name, file.kind, collection);
            report.files += 1;
            report.chunks += chunks.len() as u64;
            debug!(file = %file.name, kind = file.kind.as_str(), chunks = chunks.len(), "chunked");

            if !options.dry_run {
                for chunk in &chunks {
                    match self.gateway.embed(&chunk.content).await {
                        Ok(vector) => {
                            let metadata = chunk.metadata_json(&content_hash(&chunk.content));
                            self.store
                                .insert(collection, &chunk.content, &metadata, &vector)
                                .await?;
                            report.inserted += 1;
                        }
                        Err(e) => {
                            warn!(
                                file = %chunk.filename,
                                chunk_index = chunk.chunk_index,
                                error = %e,
                                "embedding failed, chunk skipped"
                            );
                            report.failed += 1;
                        }
                    }
                }
            }

            let done = i as u64 + 1;
            if done % batch == 0 || done == total {
                self.progress.report(ProgressEvent::Ingesting {
                    collection: collection.to_string(),
                    n: done,
                    total,
                });
            }
        }

        Ok(report)
    }

    /// Truncate `collection` and ingest every configured path into it.
    ///
    /// Configured paths that do not exist are skipped with a warning.
    /// Returns the collection's row count afterwards.
    pub async fn reindex_collection(
        &self,
        sources: &SourcesConfig,
        collection: Collection,
    ) -> Result<u64> {
        self.store.truncate(collection).await?;

        let options = IngestOptions::default();
        for path in sources.paths_for(collection)? {
            if !path.exists() {
                warn!(collection = %collection, path = %path.display(), "source path missing, skipped");
                continue;
            }
            let report = self.ingest_path(&path, collection, &options).await?;
            info!(
                collection = %collection,
                path = %path.display(),
                inserted = report.inserted,
                failed = report.failed,
                "path indexed"
            );
        }

        self.store.count(collection).await
    }

    /// Rebuild all three collections. Returns `(collection, rows)` pairs.
    pub async fn reindex_all(&self, sources: &SourcesConfig) -> Result<Vec<(Collection, u64)>> {
        let mut counts = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let rows = self.reindex_collection(sources, collection).await?;
            counts.push((collection, rows));
        }
        Ok(counts)
    }
}

/// Row count of every collection, in [`Collection::ALL`] order.
pub async fn collection_counts(store: &dyn VectorStore) -> Result<Vec<(Collection, u64)>> {
    let mut counts = Vec::with_capacity(Collection::ALL.len());
    for collection in Collection::ALL {
        counts.push((collection, store.count(collection).await?));
    }
    Ok(counts)
}

/// Fail when any collection is empty.
pub fn require_populated(counts: &[(Collection, u64)]) -> Result<()> {
    let empty: Vec<&str> = counts
        .iter()
        .filter(|(_, n)| *n == 0)
        .map(|(c, _)| c.as_str())
        .collect();
    if !empty.is_empty() {
        bail!(
            "empty collection(s): {}; run with --reindex first",
            empty.join(", ")
        );
    }
    Ok(())
}

/// Eligible files under `root`, sorted by name.
///
/// `root` may be a single file, in which case its file name is used as the
/// recorded name. Exclusion globs match paths relative to `root`.
pub fn discover_files(
    root: &Path,
    config: &ChunkingConfig,
    extra_excludes: &[String],
) -> Result<Vec<SourceFile>> {
    let mut patterns = config.exclude_globs.clone();
    patterns.extend(extra_excludes.iter().cloned());
    let exclude_set = build_globset(&patterns)?;

    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        return Ok(detect_kind(root, config)
            .map(|kind| SourceFile {
                path: root.to_path_buf(),
                name,
                kind,
            })
            .into_iter()
            .collect());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }

        if let Some(kind) = detect_kind(path, config) {
            files.push(SourceFile {
                path: path.to_path_buf(),
                name: rel_str,
                kind,
            });
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============ Commands ============

async fn open_ingestor(
    config: &Config,
    progress: Arc<dyn ProgressReporter>,
) -> Result<(Ingestor, Arc<SqliteStore>)> {
    let gateway: Arc<dyn ModelGateway> = Arc::new(OllamaGateway::new(&config.ollama)?);
    let store = Arc::new(SqliteStore::open(config).await?);
    let ingestor = Ingestor::new(&config.chunking, gateway, store.clone()).with_progress(progress);
    Ok((ingestor, store))
}

/// `ragbench ingest <path> --target <collection>`.
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    target: &str,
    options: &IngestOptions,
    progress: Arc<dyn ProgressReporter>,
) -> Result<()> {
    let collection: Collection = target.parse()?;
    let (ingestor, store) = open_ingestor(config, progress).await?;
    let report = ingestor.ingest_path(path, collection, options).await?;

    if options.dry_run {
        println!("ingest {} (dry-run)", collection);
        println!("  files: {}", report.files);
        println!("  chunks: {}", report.chunks);
    } else {
        println!("ingest {}", collection);
        println!("  files: {}", report.files);
        println!("  chunks: {}", report.chunks);
        println!("  inserted: {}", report.inserted);
        println!("  failed: {}", report.failed);
        println!("  rows in collection: {}", store.count(collection).await?);
    }
    if report.skipped_files > 0 {
        println!("  skipped files: {}", report.skipped_files);
    }
    println!("ok");

    store.close().await;
    Ok(())
}

/// `ragbench reindex`: rebuild every collection from `[sources]`.
pub async fn run_reindex(config: &Config, progress: Arc<dyn ProgressReporter>) -> Result<()> {
    let (ingestor, store) = open_ingestor(config, progress).await?;
    let counts = ingestor.reindex_all(&config.sources).await?;

    println!("reindex");
    for (collection, rows) in &counts {
        println!("  {:<9} {:>7} rows  {}", collection, rows, collection.description());
    }
    println!("ok");

    store.close().await;
    Ok(())
}

/// `ragbench status`: row count of every collection.
pub async fn run_status(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let counts = collection_counts(&store).await?;

    println!("{:<10} {:>8}  {}", "COLLECTION", "ROWS", "CONTENT");
    for (collection, rows) in &counts {
        println!("{:<10} {:>8}  {}", collection, rows, collection.description());
    }

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn discover_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b/guide.md", "# B");
        write(tmp.path(), "a/Book.php", "<?php");
        write(tmp.path(), "a/logo.png", "png");
        write(tmp.path(), "vendor/lib/X.php", "<?php");
        write(tmp.path(), "sub/var/cache.md", "# c");

        let files = discover_files(tmp.path(), &ChunkingConfig::default(), &[]).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a/Book.php", "b/guide.md"]);
        assert_eq!(files[0].kind, ChunkKind::Code);
        assert_eq!(files[1].kind, ChunkKind::Doc);
    }

    #[test]
    fn extra_excludes_apply() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "docs/a.md", "# A");
        write(tmp.path(), "docs/drafts/b.md", "# B");

        let files = discover_files(
            tmp.path(),
            &ChunkingConfig::default(),
            &["**/drafts/**".to_string()],
        )
        .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "docs/a.md");
    }

    #[test]
    fn single_file_root() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "only.md", "# Only");
        let files = discover_files(&tmp.path().join("only.md"), &ChunkingConfig::default(), &[])
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "only.md");
    }

    #[test]
    fn invalid_glob_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(discover_files(tmp.path(), &ChunkingConfig::default(), &["a[".to_string()]).is_err());
    }

    #[test]
    fn require_populated_names_empty_collections() {
        let counts = vec![
            (Collection::Docs, 4),
            (Collection::Code, 0),
            (Collection::Combined, 0),
        ];
        let err = require_populated(&counts).unwrap_err().to_string();
        assert!(err.contains("code, combined"));
        assert!(err.contains("--reindex"));
        assert!(require_populated(&[(Collection::Docs, 1)]).is_ok());
    }

    #[test]
    fn hash_is_sha256_hex() {
        let h = content_hash("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
