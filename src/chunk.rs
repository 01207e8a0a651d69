//! Text segmentation for ingestion.
//!
//! Two policies, chosen by file type:
//!
//! - **Prose** (markdown): split on heading lines, keeping the heading as
//!   section context. A section whose body is shorter than `chunk_size` is one
//!   chunk; a longer one is packed paragraph by paragraph (`\n\n` boundaries)
//!   into buffers that stay within `chunk_size`. Each chunk is prefixed with
//!   `File: <name>\nSection: <heading>[ (Continued)]\n\n`.
//! - **Code**: a sliding window of `chunk_size` bytes advancing by
//!   `window length - code_overlap`. A window that is not the last one is cut
//!   back to its last newline when that newline lies past `min_cut_ratio` of
//!   the window, so statements are not split mid-line. Each chunk is prefixed
//!   with `File: <name> (<Language> Code)\n\n`.
//!
//! Both policies are deterministic, and empty input yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use ragbench::chunk::Chunker;
//! use ragbench::models::ChunkKind;
//!
//! let chunker = Chunker::new(1500, 200, 0.7);
//! let chunks = chunker.chunk("# Intro\nShort text.", "intro.md", ChunkKind::Doc);
//! assert_eq!(chunks, vec!["File: intro.md\nSection: Intro\n\nShort text.".to_string()]);
//! ```

use std::ops::Range;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkKind, Collection};

/// Section name used for text that precedes the first heading.
const DEFAULT_SECTION: &str = "Introduction";

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#+ .*$").expect("heading pattern is valid"))
}

/// Splits documents according to their [`ChunkKind`].
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    min_cut_ratio: f64,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize, min_cut_ratio: f64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
            min_cut_ratio,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.code_overlap, config.min_cut_ratio)
    }

    /// Chunk contents for one document, in order.
    pub fn chunk(&self, text: &str, filename: &str, kind: ChunkKind) -> Vec<String> {
        match kind {
            ChunkKind::Doc => self.chunk_prose(text, filename),
            ChunkKind::Code => self.chunk_code(text, filename),
        }
    }

    /// Like [`chunk`](Self::chunk), wrapped into [`Chunk`] records for `collection`.
    pub fn chunk_document(
        &self,
        text: &str,
        filename: &str,
        kind: ChunkKind,
        collection: Collection,
    ) -> Vec<Chunk> {
        self.chunk(text, filename, kind)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| Chunk {
                content,
                filename: filename.to_string(),
                chunk_index,
                kind,
                collection,
            })
            .collect()
    }

    fn chunk_prose(&self, text: &str, filename: &str) -> Vec<String> {
        let text = normalize_newlines(text);
        let mut chunks = Vec::new();

        for section in split_sections(&text) {
            let body = section.body.trim();
            if body.is_empty() {
                continue;
            }

            if section.body.len() < self.chunk_size {
                chunks.push(format!(
                    "File: {}\nSection: {}\n\n{}",
                    filename, section.heading, body
                ));
            } else {
                for packed in pack_paragraphs(section.body, self.chunk_size) {
                    chunks.push(format!(
                        "File: {}\nSection: {} (Continued)\n\n{}",
                        filename, section.heading, packed
                    ));
                }
            }
        }

        chunks
    }

    fn chunk_code(&self, text: &str, filename: &str) -> Vec<String> {
        let text = normalize_newlines(text);
        let prefix = format!("File: {} ({} Code)\n\n", filename, language_label(filename));

        self.window_spans(&text)
            .into_iter()
            .map(|span| format!("{}{}", prefix, &text[span]))
            .collect()
    }

    /// Byte ranges of the code windows over `text`.
    ///
    /// Consecutive ranges overlap by exactly `overlap` bytes (adjusted to char
    /// boundaries for non-ASCII input) and the last range always ends at
    /// `text.len()`.
    pub fn window_spans(&self, text: &str) -> Vec<Range<usize>> {
        let len = text.len();
        let mut spans = Vec::new();
        let mut start = 0usize;

        while start < len {
            let mut end = floor_char_boundary(text, (start + self.chunk_size).min(len));
            if end <= start {
                end = next_char_boundary(text, start);
            }

            if end < len {
                if let Some(newline) = text[start..end].rfind('\n') {
                    if newline as f64 > self.chunk_size as f64 * self.min_cut_ratio {
                        end = start + newline;
                    }
                }
            }

            spans.push(start..end);

            if end >= len {
                break;
            }

            let step = (end - start).saturating_sub(self.overlap).max(1);
            let next = floor_char_boundary(text, start + step);
            start = if next > start {
                next
            } else {
                next_char_boundary(text, start)
            };
        }

        spans
    }
}

/// Decide the chunking policy for a file from its extension.
///
/// Returns `None` for files that are neither documentation nor code.
pub fn detect_kind(path: &Path, config: &ChunkingConfig) -> Option<ChunkKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if config.code_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
        Some(ChunkKind::Code)
    } else if config.doc_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
        Some(ChunkKind::Doc)
    } else {
        None
    }
}

struct Section<'a> {
    heading: String,
    body: &'a str,
}

fn split_sections(text: &str) -> Vec<Section<'_>> {
    let mut sections = Vec::new();
    let mut heading = DEFAULT_SECTION.to_string();
    let mut cursor = 0;

    for m in heading_regex().find_iter(text) {
        sections.push(Section {
            heading: std::mem::replace(&mut heading, clean_heading(m.as_str())),
            body: &text[cursor..m.start()],
        });
        cursor = m.end();
    }

    sections.push(Section {
        heading,
        body: &text[cursor..],
    });

    sections
}

fn clean_heading(line: &str) -> String {
    line.trim().trim_start_matches('#').trim().to_string()
}

/// Greedy paragraph packing.
///
/// Blank paragraphs are skipped. A single paragraph longer than `max_len`
/// becomes its own buffer rather than being split.
fn pack_paragraphs(body: &str, max_len: usize) -> Vec<String> {
    let mut packed = Vec::new();
    let mut buf = String::new();

    for para in body.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if !buf.is_empty() && buf.len() + 2 + para.len() > max_len {
            packed.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        packed.push(buf);
    }

    packed
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn language_label(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "php" => "PHP",
        "rs" => "Rust",
        "py" => "Python",
        "js" | "mjs" => "JavaScript",
        "ts" => "TypeScript",
        "go" => "Go",
        "java" => "Java",
        _ => "Source",
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .char_indices()
        .nth(1)
        .map(|(i, _)| index + i)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::new(1500, 200, 0.7)
    }

    /// Strip the `File:`/`Section:` header a prose chunk carries.
    fn body(chunk: &str) -> &str {
        chunk.split_once("\n\n").map(|(_, b)| b).unwrap_or("")
    }

    #[test]
    fn short_markdown_is_one_chunk() {
        let chunks = chunker().chunk("# Intro\nShort text.", "intro.md", ChunkKind::Doc);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("File: intro.md\nSection: Intro\n\n"));
        assert_eq!(body(&chunks[0]), "Short text.");
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(chunker().chunk("", "a.md", ChunkKind::Doc).is_empty());
        assert!(chunker().chunk("", "a.php", ChunkKind::Code).is_empty());
        assert!(chunker().chunk("\n\n  \n", "a.md", ChunkKind::Doc).is_empty());
    }

    #[test]
    fn text_before_first_heading_is_introduction() {
        let text = "Preamble line.\n\n## Install\nRun it.";
        let chunks = chunker().chunk(text, "guide.md", ChunkKind::Doc);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("Section: Introduction\n"));
        assert_eq!(body(&chunks[0]), "Preamble line.");
        assert!(chunks[1].contains("Section: Install\n"));
        assert_eq!(body(&chunks[1]), "Run it.");
    }

    #[test]
    fn heading_without_body_is_skipped() {
        let text = "# Title\n## Sub\nContent here.";
        let chunks = chunker().chunk(text, "a.md", ChunkKind::Doc);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Section: Sub\n"));
    }

    #[test]
    fn long_section_is_packed_by_paragraph() {
        let small = Chunker::new(60, 10, 0.7);
        let paragraphs: Vec<String> = (0..8)
            .map(|i| format!("Paragraph {} has some words.", i))
            .collect();
        let text = format!("# Big\n{}", paragraphs.join("\n\n"));
        let chunks = small.chunk(&text, "big.md", ChunkKind::Doc);

        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.contains("Section: Big (Continued)\n"));
            assert!(body(c).len() <= 60, "packed body too long: {:?}", body(c));
        }
    }

    #[test]
    fn packing_keeps_every_paragraph_in_order() {
        let small = Chunker::new(80, 10, 0.7);
        let paragraphs: Vec<String> = (0..25)
            .map(|i| format!("Sentence number {} about serialization groups.", i))
            .collect();
        let text = paragraphs.join("\n\n");
        let chunks = small.chunk(&text, "doc.md", ChunkKind::Doc);

        let rebuilt: Vec<String> = chunks
            .iter()
            .flat_map(|c| body(c).split("\n\n").map(str::to_string).collect::<Vec<_>>())
            .collect();
        assert_eq!(rebuilt, paragraphs);
    }

    #[test]
    fn oversized_paragraph_is_kept_whole() {
        let small = Chunker::new(20, 5, 0.7);
        let long = "x".repeat(50);
        let text = format!("short\n\n{}\n\ntail", long);
        let chunks = small.chunk(&text, "a.md", ChunkKind::Doc);
        let bodies: Vec<&str> = chunks.iter().map(|c| body(c)).collect();
        assert_eq!(bodies, vec!["short", long.as_str(), "tail"]);
    }

    #[test]
    fn code_below_window_is_one_chunk() {
        let chunks = chunker().chunk("<?php\necho 1;\n", "Foo.php", ChunkKind::Code);
        assert_eq!(chunks, vec!["File: Foo.php (PHP Code)\n\n<?php\necho 1;\n".to_string()]);
    }

    #[test]
    fn code_windows_overlap_and_cover_input() {
        let text: String = (0..400).map(|i| format!("$x{} = {};\n", i, i)).collect();
        let chunker = chunker();
        let spans = chunker.window_spans(&text);

        assert!(spans.len() > 1);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans.last().unwrap().end, text.len());
        for pair in spans.windows(2) {
            assert_eq!(pair[1].start, pair[0].end - 200, "overlap mismatch");
        }
    }

    #[test]
    fn code_window_cuts_at_late_newline() {
        let text: String = (0..300).map(|i| format!("line {:04}\n", i)).collect();
        let spans = chunker().window_spans(&text);
        let first = &text[spans[0].clone()];
        assert!(first.len() > 1050 && first.len() <= 1500);
        assert!(text[first.len()..].starts_with('\n'));
    }

    #[test]
    fn code_window_ignores_early_newline() {
        let text = format!("head\n{}", "y".repeat(3000));
        let spans = chunker().window_spans(&text);
        assert_eq!(spans[0], 0..1500);
    }

    #[test]
    fn tiny_window_still_progresses() {
        let tiny = Chunker::new(4, 10, 0.7);
        let text = "abcdefghij";
        let spans = tiny.window_spans(text);
        assert_eq!(spans.last().unwrap().end, text.len());
        for pair in spans.windows(2) {
            assert!(pair[1].start > pair[0].start);
        }
    }

    #[test]
    fn tail_shorter_than_window_is_emitted_once() {
        let text = "a".repeat(1600);
        let spans = chunker().window_spans(&text);
        assert_eq!(spans, vec![0..1500, 1300..1600]);
    }

    #[test]
    fn multibyte_text_never_splits_a_char() {
        let text = "é".repeat(1200);
        let chunks = chunker().chunk(&text, "accents.php", ChunkKind::Code);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.contains('é'));
        }
    }

    #[test]
    fn crlf_is_normalized() {
        let chunks = chunker().chunk("# A\r\nline one\r\n", "a.md", ChunkKind::Doc);
        assert_eq!(body(&chunks[0]), "line one");
        assert!(!chunks[0].contains('\r'));
    }

    #[test]
    fn deterministic_chunking() {
        let text = "# A\nalpha\n\n# B\nbeta\n\ngamma";
        let a = chunker().chunk(text, "x.md", ChunkKind::Doc);
        let b = chunker().chunk(text, "x.md", ChunkKind::Doc);
        assert_eq!(a, b);
    }

    #[test]
    fn detect_kind_by_extension() {
        let cfg = ChunkingConfig::default();
        assert_eq!(detect_kind(Path::new("a/B.php"), &cfg), Some(ChunkKind::Code));
        assert_eq!(detect_kind(Path::new("guide.MD"), &cfg), Some(ChunkKind::Doc));
        assert_eq!(detect_kind(Path::new("page.mdx"), &cfg), Some(ChunkKind::Doc));
        assert_eq!(detect_kind(Path::new("image.png"), &cfg), None);
        assert_eq!(detect_kind(Path::new("Makefile"), &cfg), None);
    }

    #[test]
    fn chunk_document_assigns_indices() {
        let text = "# A\none\n\n# B\ntwo\n\n# C\nthree";
        let chunks = chunker().chunk_document(text, "x.md", ChunkKind::Doc, Collection::Docs);
        let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(chunks.iter().all(|c| c.collection == Collection::Docs));
    }
}
