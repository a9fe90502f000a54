//! Dense-vector index files.
//!
//! An index is a single SQLite file holding a `manifest` table (kind, model,
//! dimension, row count), an `embeddings` table of little-endian `f32` BLOBs,
//! and one JSON/text table per parallel record array. Code indices carry a
//! `meta` table of chunks; prose indices keep section text in `texts` apart
//! from `metadata`.
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! reader never sees a half-written index.

use std::path::{Path, PathBuf};

use ctxstore_core::{CodeChunk, CtxError, ProseMeta};
use rusqlite::{params, Connection, OpenFlags};
use serde::{de::DeserializeOwned, Serialize};

/// Which record layout an index file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Code,
    Prose,
}

impl IndexKind {
    fn as_str(self) -> &'static str {
        match self {
            IndexKind::Code => "code",
            IndexKind::Prose => "prose",
        }
    }
}

/// Structural chunks and their embeddings.
///
/// # Examples
///
/// ```
/// use ctxstore_index::store::CodeIndex;
///
/// let index = CodeIndex::empty("hash");
/// assert!(index.is_empty());
/// assert_eq!(index.dimension, 0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CodeIndex {
    /// Model the embeddings were produced with.
    pub model: String,
    /// Length of every vector; 0 for an empty index.
    pub dimension: usize,
    /// One unit vector per chunk.
    pub embeddings: Vec<Vec<f32>>,
    /// Chunks, parallel to `embeddings`.
    pub meta: Vec<CodeChunk>,
}

/// Prose sections and their embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProseIndex {
    pub model: String,
    pub dimension: usize,
    pub embeddings: Vec<Vec<f32>>,
    /// Verbatim section text, parallel to `embeddings`.
    pub texts: Vec<String>,
    pub metadata: Vec<ProseMeta>,
}

impl CodeIndex {
    pub fn empty(model: &str) -> Self {
        Self {
            model: model.to_string(),
            dimension: 0,
            embeddings: Vec::new(),
            meta: Vec::new(),
        }
    }

    /// Pair chunks with their embeddings.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::Embedding`] if the two lengths differ or the
    /// vectors do not share one dimension.
    pub fn new(
        model: &str,
        embeddings: Vec<Vec<f32>>,
        meta: Vec<CodeChunk>,
    ) -> Result<Self, CtxError> {
        let dimension = check_parallel(&embeddings, meta.len())?;
        Ok(Self {
            model: model.to_string(),
            dimension,
            embeddings,
            meta,
        })
    }

    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    /// Write the index to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::Database`] or [`CtxError::Io`] on write failure.
    pub fn save(&self, path: &Path) -> Result<(), CtxError> {
        let meta = to_json_rows(&self.meta)?;
        write_index(
            path,
            &Manifest {
                kind: IndexKind::Code,
                model: self.model.clone(),
                dimension: self.dimension,
                rows: self.meta.len(),
            },
            &self.embeddings,
            &[("meta", meta.as_slice())],
        )
    }

    /// Read an index written by [`CodeIndex::save`].
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::IndexNotFound`] if `path` does not exist, and
    /// [`CtxError::MalformedIndex`] if it is not a code index or any table,
    /// field, or row is missing.
    pub fn load(path: &Path) -> Result<Self, CtxError> {
        let mut stored = read_index(path, IndexKind::Code, &["meta"])?;
        let meta = from_json_rows(path, "meta", stored.columns.remove(0))?;
        Ok(Self {
            model: stored.manifest.model,
            dimension: stored.manifest.dimension,
            embeddings: stored.embeddings,
            meta,
        })
    }
}

impl ProseIndex {
    pub fn empty(model: &str) -> Self {
        Self {
            model: model.to_string(),
            dimension: 0,
            embeddings: Vec::new(),
            texts: Vec::new(),
            metadata: Vec::new(),
        }
    }

    /// Pair sections with their embeddings.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::Embedding`] if the arrays are not parallel.
    pub fn new(
        model: &str,
        embeddings: Vec<Vec<f32>>,
        texts: Vec<String>,
        metadata: Vec<ProseMeta>,
    ) -> Result<Self, CtxError> {
        if texts.len() != metadata.len() {
            return Err(CtxError::Embedding(format!(
                "{} texts but {} metadata records",
                texts.len(),
                metadata.len()
            )));
        }
        let dimension = check_parallel(&embeddings, texts.len())?;
        Ok(Self {
            model: model.to_string(),
            dimension,
            embeddings,
            texts,
            metadata,
        })
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Write the index to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::Database`] or [`CtxError::Io`] on write failure.
    pub fn save(&self, path: &Path) -> Result<(), CtxError> {
        let metadata = to_json_rows(&self.metadata)?;
        write_index(
            path,
            &Manifest {
                kind: IndexKind::Prose,
                model: self.model.clone(),
                dimension: self.dimension,
                rows: self.texts.len(),
            },
            &self.embeddings,
            &[("texts", self.texts.as_slice()), ("metadata", metadata.as_slice())],
        )
    }

    /// Read an index written by [`ProseIndex::save`].
    ///
    /// # Errors
    ///
    /// Same as [`CodeIndex::load`].
    pub fn load(path: &Path) -> Result<Self, CtxError> {
        let mut stored = read_index(path, IndexKind::Prose, &["texts", "metadata"])?;
        let metadata = from_json_rows(path, "metadata", stored.columns.remove(1))?;
        let texts = stored.columns.remove(0);
        Ok(Self {
            model: stored.manifest.model,
            dimension: stored.manifest.dimension,
            embeddings: stored.embeddings,
            texts,
            metadata,
        })
    }
}

/// Dimension shared by `embeddings`, checking there is one per record.
fn check_parallel(embeddings: &[Vec<f32>], records: usize) -> Result<usize, CtxError> {
    if embeddings.len() != records {
        return Err(CtxError::Embedding(format!(
            "{} embeddings for {records} records",
            embeddings.len()
        )));
    }
    let dimension = embeddings.first().map_or(0, Vec::len);
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
        return Err(CtxError::DimensionMismatch {
            expected: dimension,
            found: bad.len(),
        });
    }
    Ok(dimension)
}

struct Manifest {
    kind: IndexKind,
    model: String,
    dimension: usize,
    rows: usize,
}

struct StoredIndex {
    manifest: Manifest,
    embeddings: Vec<Vec<f32>>,
    columns: Vec<Vec<String>>,
}

fn write_index(
    path: &Path,
    manifest: &Manifest,
    embeddings: &[Vec<f32>],
    columns: &[(&str, &[String])],
) -> Result<(), CtxError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let tmp = tempfile::NamedTempFile::new_in(&parent)?;
    {
        let mut conn = Connection::open(tmp.path())
            .map_err(|e| CtxError::Database(format!("failed to create index: {e}")))?;
        let tx = conn
            .transaction()
            .map_err(|e| CtxError::Database(format!("failed to begin transaction: {e}")))?;

        let mut schema = String::from(
            "CREATE TABLE manifest (key TEXT PRIMARY KEY, value TEXT NOT NULL);
             CREATE TABLE embeddings (row INTEGER PRIMARY KEY, vector BLOB NOT NULL);",
        );
        for (name, _) in columns {
            schema.push_str(&format!(
                "CREATE TABLE {name} (row INTEGER PRIMARY KEY, value TEXT NOT NULL);"
            ));
        }
        tx.execute_batch(&schema)
            .map_err(|e| CtxError::Database(format!("failed to create schema: {e}")))?;

        let entries = [
            ("kind", manifest.kind.as_str().to_string()),
            ("model", manifest.model.clone()),
            ("dimension", manifest.dimension.to_string()),
            ("rows", manifest.rows.to_string()),
        ];
        for (key, value) in &entries {
            tx.execute(
                "INSERT INTO manifest (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| CtxError::Database(format!("failed to write manifest: {e}")))?;
        }

        {
            let mut stmt = tx
                .prepare("INSERT INTO embeddings (row, vector) VALUES (?1, ?2)")
                .map_err(|e| CtxError::Database(format!("failed to prepare insert: {e}")))?;
            for (row, vector) in embeddings.iter().enumerate() {
                stmt.execute(params![row as i64, floats_to_bytes(vector)])
                    .map_err(|e| CtxError::Database(format!("failed to insert embedding: {e}")))?;
            }
        }

        for (name, values) in columns {
            let mut stmt = tx
                .prepare(&format!("INSERT INTO {name} (row, value) VALUES (?1, ?2)"))
                .map_err(|e| CtxError::Database(format!("failed to prepare insert: {e}")))?;
            for (row, value) in values.iter().enumerate() {
                stmt.execute(params![row as i64, value])
                    .map_err(|e| CtxError::Database(format!("failed to insert {name}: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| CtxError::Database(format!("failed to commit index: {e}")))?;
        conn.close()
            .map_err(|(_, e)| CtxError::Database(format!("failed to close index: {e}")))?;
    }

    tmp.persist(path).map_err(|e| CtxError::Io(e.error))?;
    tracing::debug!(path = %path.display(), rows = manifest.rows, "wrote index");
    Ok(())
}

fn read_index(path: &Path, kind: IndexKind, tables: &[&str]) -> Result<StoredIndex, CtxError> {
    if !path.is_file() {
        return Err(CtxError::IndexNotFound(path.to_path_buf()));
    }
    let malformed = |reason: String| CtxError::MalformedIndex {
        path: path.to_path_buf(),
        reason,
    };

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| malformed(format!("cannot open: {e}")))?;

    let manifest_value = |key: &str| -> Result<String, CtxError> {
        conn.query_row(
            "SELECT value FROM manifest WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => malformed(format!("manifest lacks '{key}'")),
            other => malformed(format!("cannot read manifest: {other}")),
        })
    };
    let parse_count = |key: &str| -> Result<usize, CtxError> {
        let raw = manifest_value(key)?;
        raw.parse()
            .map_err(|_| malformed(format!("manifest '{key}' is not a number: '{raw}'")))
    };

    let stored_kind = manifest_value("kind")?;
    if stored_kind != kind.as_str() {
        return Err(malformed(format!(
            "expected a {} index, found '{stored_kind}'",
            kind.as_str()
        )));
    }
    let manifest = Manifest {
        kind,
        model: manifest_value("model")?,
        dimension: parse_count("dimension")?,
        rows: parse_count("rows")?,
    };

    let mut embeddings = Vec::with_capacity(manifest.rows);
    {
        let mut stmt = conn
            .prepare("SELECT vector FROM embeddings ORDER BY row")
            .map_err(|e| malformed(format!("missing embeddings: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|e| malformed(format!("cannot read embeddings: {e}")))?;
        for bytes in rows {
            let bytes = bytes.map_err(|e| malformed(format!("cannot read embedding: {e}")))?;
            if bytes.len() != manifest.dimension * 4 {
                return Err(malformed(format!(
                    "embedding has {} bytes, expected {}",
                    bytes.len(),
                    manifest.dimension * 4
                )));
            }
            embeddings.push(bytes_to_floats(&bytes));
        }
    }
    if embeddings.len() != manifest.rows {
        return Err(malformed(format!(
            "{} embeddings for {} rows",
            embeddings.len(),
            manifest.rows
        )));
    }

    let mut columns = Vec::with_capacity(tables.len());
    for table in tables {
        let mut stmt = conn
            .prepare(&format!("SELECT value FROM {table} ORDER BY row"))
            .map_err(|e| malformed(format!("missing '{table}': {e}")))?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| malformed(format!("cannot read '{table}': {e}")))?;
        if values.len() != manifest.rows {
            return Err(malformed(format!(
                "'{table}' has {} rows, expected {}",
                values.len(),
                manifest.rows
            )));
        }
        columns.push(values);
    }

    Ok(StoredIndex {
        manifest,
        embeddings,
        columns,
    })
}

fn to_json_rows<T: Serialize>(records: &[T]) -> Result<Vec<String>, CtxError> {
    records
        .iter()
        .map(|r| serde_json::to_string(r).map_err(CtxError::from))
        .collect()
}

fn from_json_rows<T: DeserializeOwned>(
    path: &Path,
    table: &str,
    rows: Vec<String>,
) -> Result<Vec<T>, CtxError> {
    rows.iter()
        .enumerate()
        .map(|(i, raw)| {
            serde_json::from_str(raw).map_err(|e| CtxError::MalformedIndex {
                path: path.to_path_buf(),
                reason: format!("'{table}' row {i}: {e}"),
            })
        })
        .collect()
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
