//! Build and query entry points with explicit caches.
//!
//! A [`Session`] owns the loaded embedding models and every index it has
//! loaded or built, keyed by canonical path. Cached indices are never
//! refreshed from disk on their own: call [`Session::evict`] or
//! [`Session::clear`] after an external rebuild.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use ctxstore_chunk::{collect_code_corpus, collect_prose_corpus, ChunkOptions};
use ctxstore_core::{CtxError, IndexConfig};

use crate::embedding::EmbeddingGateway;
use crate::search::{search_code, search_prose, CodeHit, ProseHit};
use crate::store::{CodeIndex, ProseIndex};

/// Summary of a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub index_path: PathBuf,
    pub model: String,
    pub dimension: usize,
    pub chunks: usize,
    pub files_scanned: usize,
    pub files_skipped: usize,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Indexed {} chunks from {} files ({} skipped) into {} [model: {}, dim: {}]",
            self.chunks,
            self.files_scanned,
            self.files_skipped,
            self.index_path.display(),
            self.model,
            self.dimension
        )
    }
}

/// Caches for one process: embedding models plus loaded indices.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use ctxstore_core::IndexConfig;
/// use ctxstore_index::Session;
///
/// let mut session = Session::new(IndexConfig::default());
/// session.build_code_index(Path::new("."), Path::new("code.db"), "hash").unwrap();
/// let hits = session.query_code(Path::new("code.db"), "parse config", 3, Some(2000), None).unwrap();
/// println!("{} hits", hits.len());
/// ```
#[derive(Debug)]
pub struct Session {
    config: IndexConfig,
    gateway: EmbeddingGateway,
    code_indices: HashMap<PathBuf, CodeIndex>,
    prose_indices: HashMap<PathBuf, ProseIndex>,
}

impl Session {
    pub fn new(config: IndexConfig) -> Self {
        Self::with_gateway(config, EmbeddingGateway::new())
    }

    pub fn with_gateway(config: IndexConfig, gateway: EmbeddingGateway) -> Self {
        Self {
            config,
            gateway,
            code_indices: HashMap::new(),
            prose_indices: HashMap::new(),
        }
    }

    pub fn gateway(&self) -> &EmbeddingGateway {
        &self.gateway
    }

    /// Number of cached indices of either kind.
    pub fn cached_indices(&self) -> usize {
        self.code_indices.len() + self.prose_indices.len()
    }

    /// Drop a cached index so the next query rereads it. Returns whether
    /// anything was cached under `path`.
    pub fn evict(&mut self, path: &Path) -> bool {
        let key = cache_key(path);
        let code = self.code_indices.remove(&key).is_some();
        let prose = self.prose_indices.remove(&key).is_some();
        code || prose
    }

    /// Drop every cached index and model.
    pub fn clear(&mut self) {
        self.code_indices.clear();
        self.prose_indices.clear();
        self.gateway.clear();
    }

    /// Chunk every Python file under `root`, embed the chunks, and write a
    /// dense index to `index_path`. An empty corpus still writes an index.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::Config`] for a bad root, [`CtxError::Embedding`]
    /// if the model fails, or a storage error if the file cannot be written.
    pub fn build_code_index(
        &mut self,
        root: &Path,
        index_path: &Path,
        model: &str,
    ) -> Result<BuildReport, CtxError> {
        let corpus = collect_code_corpus(root, &self.config, ChunkOptions::DENSE)?;
        tracing::info!(
            "embedding {} chunks from {} files",
            corpus.chunks.len(),
            corpus.stats.files_scanned
        );

        let texts: Vec<String> = corpus.chunks.iter().map(|c| c.source_code.clone()).collect();
        let embeddings = self.gateway.embed_documents(model, &texts)?;
        let index = CodeIndex::new(model, embeddings, corpus.chunks)?;
        index.save(index_path)?;

        let report = BuildReport {
            index_path: index_path.to_path_buf(),
            model: model.to_string(),
            dimension: index.dimension,
            chunks: index.len(),
            files_scanned: corpus.stats.files_scanned,
            files_skipped: corpus.stats.files_skipped,
        };
        self.code_indices.insert(cache_key(index_path), index);
        Ok(report)
    }

    /// Chunk every Markdown, text, and notebook file under `root` and write
    /// a dense prose index to `index_path`.
    ///
    /// # Errors
    ///
    /// Same as [`Session::build_code_index`].
    pub fn build_prose_index(
        &mut self,
        root: &Path,
        index_path: &Path,
        model: &str,
    ) -> Result<BuildReport, CtxError> {
        let (corpus, stats) = collect_prose_corpus(root, &self.config)?;
        tracing::info!(
            "embedding {} sections from {} files",
            corpus.len(),
            stats.files_scanned
        );

        let embeddings = self.gateway.embed_documents(model, &corpus.texts)?;
        let index = ProseIndex::new(model, embeddings, corpus.texts, corpus.metadata)?;
        index.save(index_path)?;

        let report = BuildReport {
            index_path: index_path.to_path_buf(),
            model: model.to_string(),
            dimension: index.dimension,
            chunks: index.len(),
            files_scanned: stats.files_scanned,
            files_skipped: stats.files_skipped,
        };
        self.prose_indices.insert(cache_key(index_path), index);
        Ok(report)
    }

    /// Load (or reuse) a code index.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::IndexNotFound`] or [`CtxError::MalformedIndex`].
    pub fn code_index(&mut self, index_path: &Path) -> Result<&CodeIndex, CtxError> {
        let key = cache_key(index_path);
        if !self.code_indices.contains_key(&key) {
            let index = CodeIndex::load(index_path)?;
            tracing::debug!(path = %key.display(), rows = index.len(), "loaded code index");
            self.code_indices.insert(key.clone(), index);
        }
        self.code_indices
            .get(&key)
            .ok_or_else(|| CtxError::IndexNotFound(index_path.to_path_buf()))
    }

    /// Load (or reuse) a prose index.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::IndexNotFound`] or [`CtxError::MalformedIndex`].
    pub fn prose_index(&mut self, index_path: &Path) -> Result<&ProseIndex, CtxError> {
        let key = cache_key(index_path);
        if !self.prose_indices.contains_key(&key) {
            let index = ProseIndex::load(index_path)?;
            tracing::debug!(path = %key.display(), rows = index.len(), "loaded prose index");
            self.prose_indices.insert(key.clone(), index);
        }
        self.prose_indices
            .get(&key)
            .ok_or_else(|| CtxError::IndexNotFound(index_path.to_path_buf()))
    }

    /// Top `k` structural hits for `query`, limited to `max_tokens` words
    /// when given. `model` defaults to the one the index was built with.
    ///
    /// An empty index returns no hits without loading a model.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::IndexNotFound`], [`CtxError::MalformedIndex`], or
    /// [`CtxError::DimensionMismatch`] so callers can tell a broken setup
    /// from an empty result.
    pub fn query_code(
        &mut self,
        index_path: &Path,
        query: &str,
        k: usize,
        max_tokens: Option<usize>,
        model: Option<&str>,
    ) -> Result<Vec<CodeHit>, CtxError> {
        self.code_index(index_path)?;
        let key = cache_key(index_path);
        let Some(index) = self.code_indices.get(&key) else {
            return Err(CtxError::IndexNotFound(index_path.to_path_buf()));
        };
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let model = resolve_model(model, &index.model);
        let query_vector = self.gateway.embed_query(&model, query)?;
        search_code(index, &query_vector, k, max_tokens)
    }

    /// Top `k` prose hits for `query`.
    ///
    /// # Errors
    ///
    /// Same as [`Session::query_code`].
    pub fn query_prose(
        &mut self,
        index_path: &Path,
        query: &str,
        k: usize,
        model: Option<&str>,
    ) -> Result<Vec<ProseHit>, CtxError> {
        self.prose_index(index_path)?;
        let key = cache_key(index_path);
        let Some(index) = self.prose_indices.get(&key) else {
            return Err(CtxError::IndexNotFound(index_path.to_path_buf()));
        };
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let model = resolve_model(model, &index.model);
        let query_vector = self.gateway.embed_query(&model, query)?;
        search_prose(index, &query_vector, k)
    }
}

fn resolve_model(requested: Option<&str>, stored: &str) -> String {
    match requested {
        Some(m) if m != stored => {
            tracing::warn!("querying with model '{m}' but index was built with '{stored}'");
            m.to_string()
        }
        Some(m) => m.to_string(),
        None => stored.to_string(),
    }
}

fn cache_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
