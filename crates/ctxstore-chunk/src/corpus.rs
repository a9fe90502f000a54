//! Repository-wide chunk collection.
//!
//! Each file yields a [`FileOutcome`]: its chunks, or the reason it was
//! skipped. Skips are logged and counted, never fatal.

use std::fmt;
use std::path::{Path, PathBuf};

use ctxstore_core::{CodeChunk, CtxError, IndexConfig};

use crate::heading::ProseCorpus;
use crate::notebook::flatten_notebook;
use crate::structural::{chunk_python, ChunkOptions};
use crate::walker::{read_lenient, walk_repo, FileKind, ReadFailure, WalkEntry};

/// Why a file contributed nothing to the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge(u64),
    Binary,
    Unreadable(String),
    Unparseable(String),
    MalformedNotebook(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooLarge(size) => write!(f, "file too large ({size} bytes)"),
            SkipReason::Binary => write!(f, "binary content"),
            SkipReason::Unreadable(e) => write!(f, "unreadable: {e}"),
            SkipReason::Unparseable(e) => write!(f, "unparseable: {e}"),
            SkipReason::MalformedNotebook(e) => write!(f, "malformed notebook: {e}"),
        }
    }
}

impl From<ReadFailure> for SkipReason {
    fn from(failure: ReadFailure) -> Self {
        match failure {
            ReadFailure::TooLarge(size) => SkipReason::TooLarge(size),
            ReadFailure::Binary => SkipReason::Binary,
            ReadFailure::Io(e) => SkipReason::Unreadable(e),
        }
    }
}

/// Result of processing a single file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome<T> {
    Chunks(T),
    Skipped { path: PathBuf, reason: SkipReason },
}

/// Counters reported after a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub files_scanned: usize,
    pub files_skipped: usize,
}

impl CorpusStats {
    fn record<T>(&mut self, outcome: FileOutcome<T>) -> Option<T> {
        self.files_scanned += 1;
        match outcome {
            FileOutcome::Chunks(chunks) => Some(chunks),
            FileOutcome::Skipped { path, reason } => {
                tracing::warn!(path = %path.display(), "skipping file: {reason}");
                self.files_skipped += 1;
                None
            }
        }
    }
}

/// Structural chunks of every Python file under a root.
#[derive(Debug, Clone, Default)]
pub struct CodeCorpus {
    pub chunks: Vec<CodeChunk>,
    pub stats: CorpusStats,
}

/// Walk `root` and chunk every Python file.
///
/// # Errors
///
/// Returns [`CtxError::Config`] if `root` is not a directory or an exclude
/// pattern is invalid. Problems with individual files only show up in
/// [`CorpusStats::files_skipped`].
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use ctxstore_core::IndexConfig;
/// use ctxstore_chunk::{collect_code_corpus, ChunkOptions};
///
/// let corpus = collect_code_corpus(Path::new("."), &IndexConfig::default(), ChunkOptions::DENSE).unwrap();
/// println!("{} chunks", corpus.chunks.len());
/// ```
pub fn collect_code_corpus(
    root: &Path,
    config: &IndexConfig,
    options: ChunkOptions,
) -> Result<CodeCorpus, CtxError> {
    let entries = walk_repo(root, &[FileKind::Python], config)?;
    let mut corpus = CodeCorpus::default();

    for entry in &entries {
        if let Some(chunks) = corpus.stats.record(code_file(entry, config, options)) {
            corpus.chunks.extend(chunks);
        }
    }

    tracing::debug!(
        files = corpus.stats.files_scanned,
        skipped = corpus.stats.files_skipped,
        chunks = corpus.chunks.len(),
        "collected code corpus"
    );
    Ok(corpus)
}

/// Walk `root` and chunk every Markdown, text, and notebook file.
///
/// # Errors
///
/// Same conditions as [`collect_code_corpus`].
pub fn collect_prose_corpus(
    root: &Path,
    config: &IndexConfig,
) -> Result<(ProseCorpus, CorpusStats), CtxError> {
    let entries = walk_repo(root, &FileKind::PROSE, config)?;
    let mut corpus = ProseCorpus::default();
    let mut stats = CorpusStats::default();

    for entry in &entries {
        if let Some(sections) = stats.record(prose_file(entry, config)) {
            corpus.extend(sections);
        }
    }

    tracing::debug!(
        files = stats.files_scanned,
        skipped = stats.files_skipped,
        sections = corpus.len(),
        "collected prose corpus"
    );
    Ok((corpus, stats))
}

/// Chunk one Python file.
pub fn code_file(
    entry: &WalkEntry,
    config: &IndexConfig,
    options: ChunkOptions,
) -> FileOutcome<Vec<CodeChunk>> {
    let content = match read_lenient(&entry.path, config.max_file_size) {
        Ok(c) => c,
        Err(e) => return skipped(entry, e.into()),
    };
    match chunk_python(&entry.relative, &content, options) {
        Ok(chunks) => FileOutcome::Chunks(chunks),
        Err(e) => skipped(entry, SkipReason::Unparseable(e.to_string())),
    }
}

/// Chunk one prose or notebook file.
pub fn prose_file(entry: &WalkEntry, config: &IndexConfig) -> FileOutcome<ProseCorpus> {
    let Some(element_type) = entry.kind.prose_element_type() else {
        return skipped(
            entry,
            SkipReason::Unparseable(format!("not a prose file: {:?}", entry.kind)),
        );
    };

    let content = match read_lenient(&entry.path, config.max_file_size) {
        Ok(c) => c,
        Err(e) => return skipped(entry, e.into()),
    };

    let text = if entry.kind == FileKind::Notebook {
        match flatten_notebook(&content) {
            Ok(flat) => {
                if flat.magic_lines > 0 {
                    tracing::trace!(
                        path = %entry.relative.display(),
                        magic_lines = flat.magic_lines,
                        "ignored notebook magics"
                    );
                }
                flat.markdown
            }
            Err(e) => return skipped(entry, SkipReason::MalformedNotebook(e.to_string())),
        }
    } else {
        content
    };

    let mut sections = ProseCorpus::default();
    sections.process_source(&entry.relative, &text, element_type);
    FileOutcome::Chunks(sections)
}

fn skipped<T>(entry: &WalkEntry, reason: SkipReason) -> FileOutcome<T> {
    FileOutcome::Skipped {
        path: entry.relative.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxstore_core::ElementType;
    use std::fs;

    const SECTION: &str = "one\ntwo\nthree\nfour\n";

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn code_corpus_skips_bad_files_and_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "a.py", "def alpha():\n    return 1\n");
        write(root, "b.py", "def broken(:\n");
        write(root, "c.py", "class Gamma:\n    def run(self):\n        pass\n");
        fs::write(root.join("d.py"), b"def f():\x00\n").unwrap();

        let corpus = collect_code_corpus(root, &IndexConfig::default(), ChunkOptions::DENSE).unwrap();
        let names: Vec<&str> = corpus.chunks.iter().map(|c| c.element_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "Gamma", "run"]);
        assert_eq!(corpus.stats.files_scanned, 4);
        assert_eq!(corpus.stats.files_skipped, 2);
        assert_eq!(corpus.chunks[1].file_path, PathBuf::from("c.py"));
    }

    #[test]
    fn empty_repo_gives_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let corpus =
            collect_code_corpus(dir.path(), &IndexConfig::default(), ChunkOptions::DENSE).unwrap();
        assert!(corpus.chunks.is_empty());
        assert_eq!(corpus.stats, CorpusStats::default());
    }

    #[test]
    fn prose_corpus_tags_each_kind() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "guide.md", &format!("# Guide\n{SECTION}"));
        write(root, "notes.txt", &format!("# Notes\n{SECTION}"));
        write(
            root,
            "nb/tour.ipynb",
            r##"{"cells": [{"cell_type": "markdown", "metadata": {}, "source": "# Tour\none\ntwo\nthree\nfour"}]}"##,
        );
        write(root, "broken.ipynb", "{not json");

        let (corpus, stats) = collect_prose_corpus(root, &IndexConfig::default()).unwrap();
        assert_eq!(stats.files_scanned, 4);
        assert_eq!(stats.files_skipped, 1);

        let tagged: Vec<(&str, ElementType)> = corpus
            .metadata
            .iter()
            .map(|m| (m.heading_path.as_str(), m.element_type))
            .collect();
        assert_eq!(
            tagged,
            vec![
                ("Guide", ElementType::Markdown),
                ("Tour", ElementType::Notebook),
                ("Notes", ElementType::ProseText),
            ]
        );
    }

    #[test]
    fn skip_reason_messages() {
        assert_eq!(SkipReason::TooLarge(10).to_string(), "file too large (10 bytes)");
        assert_eq!(SkipReason::from(ReadFailure::Binary), SkipReason::Binary);
    }
}
