//! Embedding providers and the caching gateway in front of them.
//!
//! Documents are embedded in batches of [`DOCUMENT_BATCH_SIZE`] as-is;
//! queries are embedded one at a time with [`QUERY_PREFIX`] prepended. Every
//! vector leaving the gateway has unit length (or is all zeros).

use std::collections::HashMap;

use ctxstore_core::CtxError;
use sha2::{Digest, Sha256};

/// Tag prepended to queries for asymmetric query/passage models.
pub const QUERY_PREFIX: &str = "query: ";

/// Number of documents handed to a model per call.
pub const DOCUMENT_BATCH_SIZE: usize = 32;

/// Model identifier of the built-in [`HashEmbedder`].
pub const HASH_MODEL: &str = "hash";

/// Output size of the built-in [`HashEmbedder`].
pub const HASH_DIMENSION: usize = 256;

/// A text embedding model.
///
/// Implementations must be deterministic for a fixed model and input.
pub trait Embedder {
    /// Identifier the model was loaded under.
    fn model_id(&self) -> &str;

    /// Length of every vector the model produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, CtxError>;
}

/// Offline embedder based on signed feature hashing of word tokens.
///
/// Texts sharing vocabulary land close together, which is enough for
/// keyword-flavored retrieval and for tests that must not download a model.
///
/// # Examples
///
/// ```
/// use ctxstore_index::embedding::{Embedder, HashEmbedder, HASH_DIMENSION};
///
/// let mut embedder = HashEmbedder::default();
/// let vectors = embedder.embed(&["parse the config".to_string()]).unwrap();
/// assert_eq!(vectors[0].len(), HASH_DIMENSION);
/// ```
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_DIMENSION)
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        HASH_MODEL
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, CtxError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Local ONNX model served by fastembed.
#[cfg(feature = "fastembed")]
pub struct FastEmbedEmbedder {
    model_id: String,
    dimension: usize,
    model: fastembed::TextEmbedding,
}

#[cfg(feature = "fastembed")]
impl std::fmt::Debug for FastEmbedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedEmbedder")
            .field("model_id", &self.model_id)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "fastembed")]
impl FastEmbedEmbedder {
    /// Load a model by its fastembed model code, e.g.
    /// `"intfloat/multilingual-e5-base"`. Downloads on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::Embedding`] if the code is unknown or the model
    /// fails to initialize.
    pub fn load(model_id: &str) -> Result<Self, CtxError> {
        let info = fastembed::TextEmbedding::list_supported_models()
            .into_iter()
            .find(|m| m.model_code.eq_ignore_ascii_case(model_id))
            .ok_or_else(|| CtxError::Embedding(format!("unsupported embedding model: {model_id}")))?;

        tracing::info!("loading embedding model: {model_id}");
        let options = fastembed::InitOptions::new(info.model).with_show_download_progress(true);
        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| CtxError::Embedding(format!("failed to load {model_id}: {e}")))?;

        Ok(Self {
            model_id: model_id.to_string(),
            dimension: info.dim,
            model,
        })
    }
}

#[cfg(feature = "fastembed")]
impl Embedder for FastEmbedEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, CtxError> {
        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| CtxError::Embedding(format!("{}: {e}", self.model_id)))
    }
}

/// Resolve a model identifier to a provider.
///
/// # Errors
///
/// Returns [`CtxError::Embedding`] when the model cannot be loaded, or when
/// a non-hash model is requested in a build without the `fastembed` feature.
pub fn load_embedder(model_id: &str) -> Result<Box<dyn Embedder>, CtxError> {
    if model_id == HASH_MODEL {
        return Ok(Box::new(HashEmbedder::default()));
    }

    #[cfg(feature = "fastembed")]
    {
        Ok(Box::new(FastEmbedEmbedder::load(model_id)?))
    }

    #[cfg(not(feature = "fastembed"))]
    {
        Err(CtxError::Embedding(format!(
            "model '{model_id}' needs the fastembed feature; use '{HASH_MODEL}' instead"
        )))
    }
}

/// Scale `vector` to unit length in place. A zero vector stays zero.
///
/// # Examples
///
/// ```
/// use ctxstore_index::embedding::normalize;
///
/// let mut v = vec![3.0, 4.0];
/// normalize(&mut v);
/// assert!((v[0] - 0.6).abs() < 1e-6);
///
/// let mut zero = vec![0.0, 0.0];
/// normalize(&mut zero);
/// assert_eq!(zero, vec![0.0, 0.0]);
/// ```
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

type Loader = Box<dyn Fn(&str) -> Result<Box<dyn Embedder>, CtxError>>;

/// Front door to embedding models: loads each model once, applies the
/// query prefix, batches documents, and normalizes every output.
pub struct EmbeddingGateway {
    models: HashMap<String, Box<dyn Embedder>>,
    loader: Loader,
    show_progress: bool,
}

impl std::fmt::Debug for EmbeddingGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGateway")
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .field("show_progress", &self.show_progress)
            .finish_non_exhaustive()
    }
}

impl Default for EmbeddingGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingGateway {
    /// Gateway backed by [`load_embedder`].
    pub fn new() -> Self {
        Self::with_loader(load_embedder)
    }

    /// Gateway with a custom model loader.
    ///
    /// # Examples
    ///
    /// ```
    /// use ctxstore_index::embedding::{EmbeddingGateway, Embedder, HashEmbedder};
    ///
    /// let mut gateway = EmbeddingGateway::with_loader(|_| {
    ///     Ok(Box::new(HashEmbedder::new(8)) as Box<dyn Embedder>)
    /// });
    /// let v = gateway.embed_query("any", "find me").unwrap();
    /// assert_eq!(v.len(), 8);
    /// ```
    pub fn with_loader<F>(loader: F) -> Self
    where
        F: Fn(&str) -> Result<Box<dyn Embedder>, CtxError> + 'static,
    {
        Self {
            models: HashMap::new(),
            loader: Box::new(loader),
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr while embedding documents.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Whether `model_id` has been loaded.
    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    /// Number of models currently held.
    pub fn loaded_models(&self) -> usize {
        self.models.len()
    }

    /// Drop every loaded model.
    pub fn clear(&mut self) {
        self.models.clear();
    }

    fn model(&mut self, model_id: &str) -> Result<&mut Box<dyn Embedder>, CtxError> {
        if !self.models.contains_key(model_id) {
            let embedder = (self.loader)(model_id)?;
            tracing::debug!("loaded embedding model {}", embedder.model_id());
            self.models.insert(model_id.to_string(), embedder);
        }
        self.models
            .get_mut(model_id)
            .ok_or_else(|| CtxError::Embedding(format!("model {model_id} not loaded")))
    }

    /// Embed documents verbatim in batches.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::Embedding`] if the model fails to load, fails to
    /// embed, or returns the wrong number of vectors.
    pub fn embed_documents(
        &mut self,
        model_id: &str,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, CtxError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let show_progress = self.show_progress;
        let model = self.model(model_id)?;
        let progress = show_progress.then(|| {
            let pb = indicatif::ProgressBar::new(texts.len() as u64);
            if let Ok(style) = indicatif::ProgressStyle::with_template(
                "{spinner:.cyan} embedding [{bar:30}] {pos}/{len} ({elapsed})",
            ) {
                pb.set_style(style.progress_chars("=> "));
            }
            pb
        });

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(DOCUMENT_BATCH_SIZE) {
            let embedded = model.embed(batch)?;
            check_count(batch.len(), embedded.len())?;
            check_dimension(model.dimension(), &embedded)?;
            vectors.extend(embedded);
            if let Some(pb) = &progress {
                pb.inc(batch.len() as u64);
            }
        }
        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        for v in &mut vectors {
            normalize(v);
        }
        Ok(vectors)
    }

    /// Embed each query separately with [`QUERY_PREFIX`] prepended.
    ///
    /// # Errors
    ///
    /// Same as [`EmbeddingGateway::embed_documents`].
    pub fn embed_queries(
        &mut self,
        model_id: &str,
        queries: &[String],
    ) -> Result<Vec<Vec<f32>>, CtxError> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model(model_id)?;
        let mut vectors = Vec::with_capacity(queries.len());
        for query in queries {
            let prefixed = [format!("{QUERY_PREFIX}{query}")];
            let mut embedded = model.embed(&prefixed)?;
            check_count(1, embedded.len())?;
            check_dimension(model.dimension(), &embedded)?;
            let mut v = embedded.remove(0);
            normalize(&mut v);
            vectors.push(v);
        }
        Ok(vectors)
    }

    /// Embed a single query.
    ///
    /// # Errors
    ///
    /// Same as [`EmbeddingGateway::embed_documents`].
    pub fn embed_query(&mut self, model_id: &str, query: &str) -> Result<Vec<f32>, CtxError> {
        let mut vectors = self.embed_queries(model_id, &[query.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| CtxError::Embedding("model returned no vector".into()))
    }
}

fn check_count(expected: usize, found: usize) -> Result<(), CtxError> {
    if expected != found {
        return Err(CtxError::Embedding(format!(
            "model returned {found} vectors for {expected} inputs"
        )));
    }
    Ok(())
}

fn check_dimension(expected: usize, vectors: &[Vec<f32>]) -> Result<(), CtxError> {
    match vectors.iter().find(|v| v.len() != expected) {
        Some(v) => Err(CtxError::Embedding(format!(
            "model returned a {}-dimensional vector, expected {expected}",
            v.len()
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every batch it sees and returns [len, 1.0] per text.
    struct Recording {
        calls: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl Embedder for Recording {
        fn model_id(&self) -> &str {
            "recording"
        }

        fn dimension(&self) -> usize {
            2
        }

        fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, CtxError> {
            self.calls.borrow_mut().push(texts.to_vec());
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn recording_gateway() -> (EmbeddingGateway, Rc<RefCell<Vec<Vec<String>>>>, Rc<RefCell<usize>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let loads = Rc::new(RefCell::new(0));
        let (c, l) = (Rc::clone(&calls), Rc::clone(&loads));
        let gateway = EmbeddingGateway::with_loader(move |_| {
            *l.borrow_mut() += 1;
            Ok(Box::new(Recording {
                calls: Rc::clone(&c),
            }) as Box<dyn Embedder>)
        });
        (gateway, calls, loads)
    }

    #[test]
    fn documents_are_batched_and_unprefixed() {
        let (mut gateway, calls, _) = recording_gateway();
        let texts: Vec<String> = (0..70).map(|i| format!("doc {i}")).collect();
        let vectors = gateway.embed_documents("m", &texts).unwrap();

        assert_eq!(vectors.len(), 70);
        let sizes: Vec<usize> = calls.borrow().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![32, 32, 6]);
        assert_eq!(calls.borrow()[0][0], "doc 0");
    }

    #[test]
    fn queries_are_prefixed_one_at_a_time() {
        let (mut gateway, calls, _) = recording_gateway();
        let queries = vec!["a".to_string(), "b".to_string()];
        gateway.embed_queries("m", &queries).unwrap();

        let seen = calls.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], vec!["query: a".to_string()]);
        assert_eq!(seen[1], vec!["query: b".to_string()]);
    }

    #[test]
    fn outputs_are_unit_length() {
        let (mut gateway, _, _) = recording_gateway();
        let v = gateway.embed_query("m", "hello").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn model_loaded_once_per_id() {
        let (mut gateway, _, loads) = recording_gateway();
        gateway.embed_query("m", "one").unwrap();
        gateway.embed_query("m", "two").unwrap();
        gateway.embed_documents("m", &["three".to_string()]).unwrap();
        assert_eq!(*loads.borrow(), 1);

        gateway.embed_query("other", "four").unwrap();
        assert_eq!(*loads.borrow(), 2);
        assert_eq!(gateway.loaded_models(), 2);

        gateway.clear();
        gateway.embed_query("m", "five").unwrap();
        assert_eq!(*loads.borrow(), 3);
    }

    #[test]
    fn empty_input_does_not_load() {
        let (mut gateway, _, loads) = recording_gateway();
        assert!(gateway.embed_documents("m", &[]).unwrap().is_empty());
        assert!(gateway.embed_queries("m", &[]).unwrap().is_empty());
        assert_eq!(*loads.borrow(), 0);
        assert!(!gateway.is_loaded("m"));
    }

    #[test]
    fn load_failure_propagates() {
        let mut gateway = EmbeddingGateway::with_loader(|id| {
            Err(CtxError::Embedding(format!("no such model {id}")))
        });
        let err = gateway.embed_query("ghost", "q").unwrap_err();
        assert!(err.to_string().contains("no such model ghost"));
    }

    #[test]
    fn hash_embedder_is_deterministic_and_lexical() {
        let mut embedder = HashEmbedder::default();
        let texts = vec![
            "load config file".to_string(),
            "load config file".to_string(),
            "render html template".to_string(),
        ];
        let mut vectors = embedder.embed(&texts).unwrap();
        assert_eq!(vectors[0], vectors[1]);
        for v in &mut vectors {
            normalize(v);
        }
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!((dot(&vectors[0], &vectors[1]) - 1.0).abs() < 1e-5);
        assert!(dot(&vectors[0], &vectors[2]) < 0.9);
    }

    #[test]
    fn hash_model_resolves_without_fastembed() {
        let embedder = load_embedder(HASH_MODEL).unwrap();
        assert_eq!(embedder.model_id(), "hash");
        assert_eq!(embedder.dimension(), HASH_DIMENSION);
    }

    #[test]
    fn vectors_of_the_wrong_length_are_rejected() {
        struct Liar;
        impl Embedder for Liar {
            fn model_id(&self) -> &str {
                "liar"
            }
            fn dimension(&self) -> usize {
                4
            }
            fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, CtxError> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        }

        let mut gateway = EmbeddingGateway::with_loader(|_| Ok(Box::new(Liar) as Box<dyn Embedder>));
        let err = gateway.embed_documents("liar", &["x".to_string()]).unwrap_err();
        assert!(err.to_string().contains("expected 4"));
    }
}
