use std::path::{Path, PathBuf};

use ctxstore_core::{CtxError, ElementType, IndexConfig};

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// File kind detected from the extension.
///
/// # Examples
///
/// ```
/// use ctxstore_chunk::walker::FileKind;
///
/// assert_eq!(FileKind::from_extension("py"), FileKind::Python);
/// assert_eq!(FileKind::from_extension("MD"), FileKind::Markdown);
/// assert_eq!(FileKind::from_extension("ipynb"), FileKind::Notebook);
/// assert_eq!(FileKind::from_extension("rs"), FileKind::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Python,
    Markdown,
    PlainText,
    Notebook,
    Unknown,
}

impl FileKind {
    /// Detect the kind from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "py" => FileKind::Python,
            "md" | "markdown" => FileKind::Markdown,
            "txt" | "rst" => FileKind::PlainText,
            "ipynb" => FileKind::Notebook,
            _ => FileKind::Unknown,
        }
    }

    /// Kinds handled by the heading chunker.
    pub const PROSE: [FileKind; 3] = [FileKind::Markdown, FileKind::PlainText, FileKind::Notebook];

    /// Element tag for prose kinds, `None` for code or unknown files.
    pub fn prose_element_type(self) -> Option<ElementType> {
        match self {
            FileKind::Markdown => Some(ElementType::Markdown),
            FileKind::PlainText => Some(ElementType::ProseText),
            FileKind::Notebook => Some(ElementType::Notebook),
            FileKind::Python | FileKind::Unknown => None,
        }
    }
}

/// A file discovered during repository walking. Content is read later so
/// that a read failure becomes a per-file skip.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,
    /// Path relative to the repository root.
    pub relative: PathBuf,
    /// Detected kind.
    pub kind: FileKind,
}

/// Why a file could not be read as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFailure {
    TooLarge(u64),
    Binary,
    Io(String),
}

/// Walk `root`, returning files whose kind is in `kinds`.
///
/// Respects `.gitignore`, skips hidden entries, the configured directory
/// names, and paths matching the configured glob patterns. Entries are
/// returned sorted by path so chunk order is reproducible.
///
/// # Errors
///
/// Returns [`CtxError::Config`] if `root` is not a directory or a glob
/// pattern is invalid.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use ctxstore_core::IndexConfig;
/// use ctxstore_chunk::walker::{walk_repo, FileKind};
///
/// let files = walk_repo(Path::new("."), &[FileKind::Python], &IndexConfig::default()).unwrap();
/// for f in &files {
///     println!("{}", f.relative.display());
/// }
/// ```
pub fn walk_repo(
    root: &Path,
    kinds: &[FileKind],
    config: &IndexConfig,
) -> Result<Vec<WalkEntry>, CtxError> {
    if !root.is_dir() {
        return Err(CtxError::Config(format!(
            "repository root not found: {}",
            root.display()
        )));
    }

    let patterns = config
        .exclude_patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| CtxError::Config(format!("invalid exclude pattern '{p}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let excluded_dirs = config.exclude_dirs.clone();
    let walker = ignore::WalkBuilder::new(root)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            if !is_dir || entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !excluded_dirs.iter().any(|d| d.as_str() == name)
        })
        .build();

    let mut files = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("walk error: {e}");
                continue;
            }
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let kind = FileKind::from_extension(ext);
        if !kinds.contains(&kind) {
            continue;
        }

        let relative = match path.strip_prefix(root) {
            Ok(r) => r.to_path_buf(),
            Err(_) => path.to_path_buf(),
        };
        if patterns.iter().any(|p| p.matches_path(&relative)) {
            tracing::debug!("excluded by pattern: {}", relative.display());
            continue;
        }

        files.push(WalkEntry {
            path: path.to_path_buf(),
            relative,
            kind,
        });
    }

    Ok(files)
}

/// Read a file as text, replacing invalid UTF-8 sequences.
///
/// Files over `max_size` bytes or with a NUL byte in the first 8 KiB are
/// refused.
pub fn read_lenient(path: &Path, max_size: u64) -> Result<String, ReadFailure> {
    let metadata = std::fs::metadata(path).map_err(|e| ReadFailure::Io(e.to_string()))?;
    if metadata.len() > max_size {
        return Err(ReadFailure::TooLarge(metadata.len()));
    }

    let bytes = std::fs::read(path).map_err(|e| ReadFailure::Io(e.to_string()))?;
    let check_len = bytes.len().min(BINARY_CHECK_SIZE);
    if bytes[..check_len].contains(&0) {
        return Err(ReadFailure::Binary);
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
