//! Embedding-free JSON indices scored by token overlap.
//!
//! A build writes two files per repository: `<repo>_signatures.json` with
//! public definitions and their signatures, and `<repo>_fullsource.json`
//! with every definition and its full source. Either file can be queried.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use ctxstore_chunk::{collect_code_corpus, ChunkOptions, CorpusStats};
use ctxstore_core::{line_range, CodeChunk, CtxError, ElementType, IndexConfig};
use serde::{Deserialize, Serialize};

/// One definition in a JSON index.
///
/// Signature files carry `signature` and no `source_code`; full-source files
/// the reverse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalRecord {
    pub file_path: PathBuf,
    #[serde(default)]
    pub element_name: String,
    pub element_type: ElementType,
    #[serde(default)]
    pub start_line: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub docstring: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
}

impl LexicalRecord {
    fn signature_of(chunk: &CodeChunk) -> Self {
        Self {
            file_path: chunk.file_path.clone(),
            element_name: chunk.element_name.clone(),
            element_type: chunk.element_type,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            docstring: chunk.docstring.clone(),
            signature: Some(chunk.signature.clone().unwrap_or_default()),
            source_code: None,
        }
    }

    fn full_source_of(chunk: &CodeChunk) -> Self {
        Self {
            signature: None,
            source_code: Some(chunk.source_code.clone()),
            ..Self::signature_of(chunk)
        }
    }
}

/// A JSON index query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalHit {
    pub file: String,
    pub element_name: String,
    pub element_type: ElementType,
    pub lines: String,
    pub docstring: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Number of distinct query tokens matched.
    pub score: usize,
}

/// Where a JSON build wrote its files.
#[derive(Debug, Clone)]
pub struct JsonIndexPaths {
    pub signatures: PathBuf,
    pub full_source: PathBuf,
    pub stats: CorpusStats,
    pub signature_records: usize,
    pub full_source_records: usize,
}

/// Whether a name belongs in the signatures file: not underscore-prefixed,
/// unless it is a dunder like `__init__`.
///
/// # Examples
///
/// ```
/// use ctxstore_index::lexical::is_public_name;
///
/// assert!(is_public_name("load"));
/// assert!(is_public_name("__init__"));
/// assert!(!is_public_name("_helper"));
/// assert!(!is_public_name("__private"));
/// assert!(is_public_name("____"));
/// ```
pub fn is_public_name(name: &str) -> bool {
    let dunder = name.starts_with("__") && name.ends_with("__");
    !name.starts_with('_') || dunder
}

/// Name used for the index files: the final component of the resolved root.
pub fn repo_name(root: &Path) -> String {
    let resolved = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string())
}

/// Chunk every Python file under `root` and write both JSON indices into
/// `output_dir`, creating it if needed.
///
/// # Errors
///
/// Returns [`CtxError::Config`] for a missing root, or an I/O error if the
/// files cannot be written.
pub fn build_json_indices(
    root: &Path,
    output_dir: &Path,
    config: &IndexConfig,
) -> Result<JsonIndexPaths, CtxError> {
    let corpus = collect_code_corpus(root, config, ChunkOptions::LEXICAL)?;

    let full_source: Vec<LexicalRecord> =
        corpus.chunks.iter().map(LexicalRecord::full_source_of).collect();
    let signatures: Vec<LexicalRecord> = corpus
        .chunks
        .iter()
        .filter(|c| is_public_name(&c.element_name))
        .map(LexicalRecord::signature_of)
        .collect();

    std::fs::create_dir_all(output_dir)?;
    let name = repo_name(root);
    let paths = JsonIndexPaths {
        signatures: output_dir.join(format!("{name}_signatures.json")),
        full_source: output_dir.join(format!("{name}_fullsource.json")),
        stats: corpus.stats,
        signature_records: signatures.len(),
        full_source_records: full_source.len(),
    };

    write_json(&paths.signatures, &signatures)?;
    write_json(&paths.full_source, &full_source)?;
    Ok(paths)
}

fn write_json(path: &Path, records: &[LexicalRecord]) -> Result<(), CtxError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, records)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| CtxError::Io(e.error))?;
    tracing::debug!(path = %path.display(), records = records.len(), "wrote JSON index");
    Ok(())
}

/// Read a signatures or full-source file.
///
/// # Errors
///
/// Returns [`CtxError::IndexNotFound`] if the file is absent, and
/// [`CtxError::MalformedIndex`] if it is not a list of records.
pub fn load_json_index(path: &Path) -> Result<Vec<LexicalRecord>, CtxError> {
    if !path.is_file() {
        return Err(CtxError::IndexNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| CtxError::MalformedIndex {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Score records by how many distinct lowercased query tokens occur in
/// `"{name} {docstring}"`, keep those matching at least one, and return the
/// best `k` ordered by score then by start line.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use ctxstore_core::ElementType;
/// use ctxstore_index::lexical::{search_records, LexicalRecord};
///
/// let record = LexicalRecord {
///     file_path: PathBuf::from("io.py"),
///     element_name: "read_config".into(),
///     element_type: ElementType::Function,
///     start_line: 1,
///     end_line: 4,
///     docstring: "Load settings from disk.".into(),
///     signature: Some("def read_config(path):".into()),
///     source_code: None,
/// };
/// let hits = search_records(&[record], "config disk", 3);
/// assert_eq!(hits[0].score, 2);
/// ```
pub fn search_records(records: &[LexicalRecord], query: &str, k: usize) -> Vec<LexicalHit> {
    let tokens: HashSet<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &LexicalRecord)> = records
        .iter()
        .filter_map(|r| {
            let haystack = format!("{} {}", r.element_name, r.docstring).to_lowercase();
            let hits = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
            (hits > 0).then_some((hits, r))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.start_line.cmp(&b.1.start_line)));

    scored
        .into_iter()
        .take(k)
        .map(|(score, r)| LexicalHit {
            file: r.file_path.to_string_lossy().into_owned(),
            element_name: r.element_name.clone(),
            element_type: r.element_type,
            lines: line_range(r.start_line, r.end_line),
            docstring: r.docstring.clone(),
            signature: r.signature.clone(),
            snippet: r.source_code.clone(),
            score,
        })
        .collect()
}

/// Load a JSON index and query it.
///
/// # Errors
///
/// Same as [`load_json_index`].
pub fn query_json_index(path: &Path, query: &str, k: usize) -> Result<Vec<LexicalHit>, CtxError> {
    let records = load_json_index(path)?;
    Ok(search_records(&records, query, k))
}
