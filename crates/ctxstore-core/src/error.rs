use std::path::PathBuf;

/// Errors that can occur while building or querying an index.
///
/// Per-file problems during a build never surface here; they become skipped
/// outcomes. What does surface is either an I/O or embedding failure, or one
/// of the configuration errors ([`CtxError::IndexNotFound`],
/// [`CtxError::MalformedIndex`], [`CtxError::DimensionMismatch`]) that callers
/// must be able to tell apart from an empty result list.
///
/// # Examples
///
/// ```
/// use ctxstore_core::CtxError;
///
/// let err = CtxError::Config("missing model".into());
/// assert!(err.to_string().contains("missing model"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CtxError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Source text could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Embedding model load or inference failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// SQLite storage failure.
    #[error("database error: {0}")]
    Database(String),

    /// The index file does not exist.
    #[error("index file not found: {}", .0.display())]
    #[diagnostic(help("build the index first, e.g. `ctxstore build --repo <dir> --index <file>`"))]
    IndexNotFound(PathBuf),

    /// The index file exists but lacks a required array or field.
    #[error("malformed index {}: {reason}", .path.display())]
    #[diagnostic(help("rebuild the index with the current version of ctxstore"))]
    MalformedIndex {
        /// Path of the offending index.
        path: PathBuf,
        /// What was missing or unreadable.
        reason: String,
    },

    /// The query vector and the stored vectors have different lengths.
    #[error("embedding dimension mismatch: index has {expected}, query has {found}")]
    #[diagnostic(help("query with the same model the index was built with"))]
    DimensionMismatch {
        /// Dimension of the stored vectors.
        expected: usize,
        /// Dimension of the query vector.
        found: usize,
    },
}

impl CtxError {
    /// Whether this error means the index itself is absent or unusable, as
    /// opposed to a transient I/O or model failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use ctxstore_core::CtxError;
    ///
    /// assert!(CtxError::IndexNotFound(PathBuf::from("x.db")).is_index_error());
    /// assert!(!CtxError::Config("x".into()).is_index_error());
    /// ```
    pub fn is_index_error(&self) -> bool {
        matches!(
            self,
            CtxError::IndexNotFound(_)
                | CtxError::MalformedIndex { .. }
                | CtxError::DimensionMismatch { .. }
        )
    }
}
