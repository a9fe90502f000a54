//! Similarity ranking, token-budget truncation, and result records.

use std::cmp::Ordering;

use ctxstore_core::{CtxError, ElementType};
use serde::{Deserialize, Serialize};

use crate::embedding::normalize;
use crate::store::{CodeIndex, ProseIndex};

/// A structural chunk returned by a dense query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeHit {
    pub file: String,
    /// `start-end`, 1-based inclusive.
    pub lines: String,
    pub snippet: String,
    pub element_name: String,
    pub element_type: ElementType,
    pub docstring: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// A prose section returned by a dense query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProseHit {
    pub file: String,
    pub heading_path: String,
    pub element_type: ElementType,
    pub lines: String,
    pub snippet: String,
    pub score: f32,
}

/// Rank rows of `embeddings` by dot product with the normalized `query`.
///
/// Returns `(row, similarity)` pairs for the best `min(k, N)` rows, highest
/// first; equal scores keep row order. A zero query scores every row 0.
///
/// # Errors
///
/// Returns [`CtxError::DimensionMismatch`] if the query length differs from
/// the stored vectors.
///
/// # Examples
///
/// ```
/// use ctxstore_index::search::rank;
///
/// let rows = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]];
/// let ranked = rank(&rows, &[0.0, 2.0], 2).unwrap();
/// assert_eq!(ranked[0].0, 1);
/// assert_eq!(ranked[1].0, 2);
/// ```
pub fn rank(embeddings: &[Vec<f32>], query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, CtxError> {
    if embeddings.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let mut q = query.to_vec();
    normalize(&mut q);

    let mut scored = Vec::with_capacity(embeddings.len());
    for (row, vector) in embeddings.iter().enumerate() {
        if vector.len() != q.len() {
            return Err(CtxError::DimensionMismatch {
                expected: vector.len(),
                found: q.len(),
            });
        }
        let score: f32 = vector.iter().zip(&q).map(|(a, b)| a * b).sum();
        scored.push((row, score));
    }

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(k.min(embeddings.len()));
    Ok(scored)
}

/// Approximate token cost: whitespace-delimited word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Greedily keep ranked candidates whose cumulative cost fits `max_tokens`.
///
/// The first candidate is always kept. A candidate that would overflow the
/// budget is skipped and scanning continues; scanning stops once `k` are
/// kept.
///
/// # Examples
///
/// ```
/// use ctxstore_index::search::apply_token_budget;
///
/// let costs = vec![1000, 1000, 1000];
/// let kept = apply_token_budget(costs, |c| *c, 3, 1500);
/// assert_eq!(kept, vec![1000]);
///
/// let kept = apply_token_budget(vec![900, 800, 500], |c| *c, 3, 1500);
/// assert_eq!(kept, vec![900, 500]);
/// ```
pub fn apply_token_budget<T>(
    ranked: Vec<T>,
    cost: impl Fn(&T) -> usize,
    k: usize,
    max_tokens: usize,
) -> Vec<T> {
    let mut kept = Vec::new();
    let mut used = 0;
    for candidate in ranked {
        if kept.len() >= k {
            break;
        }
        let c = cost(&candidate);
        if used + c > max_tokens && !kept.is_empty() {
            continue;
        }
        used += c;
        kept.push(candidate);
    }
    kept
}

/// Top `k` structural hits for an already-embedded query, optionally
/// truncated to a word budget.
///
/// # Errors
///
/// Returns [`CtxError::DimensionMismatch`] as [`rank`] does.
pub fn search_code(
    index: &CodeIndex,
    query: &[f32],
    k: usize,
    max_tokens: Option<usize>,
) -> Result<Vec<CodeHit>, CtxError> {
    let hits: Vec<CodeHit> = rank(&index.embeddings, query, k)?
        .into_iter()
        .map(|(row, score)| {
            let chunk = &index.meta[row];
            CodeHit {
                file: chunk.file_path.to_string_lossy().into_owned(),
                lines: chunk.lines(),
                snippet: chunk.source_code.clone(),
                element_name: chunk.element_name.clone(),
                element_type: chunk.element_type,
                docstring: chunk.docstring.clone(),
                score,
            }
        })
        .collect();

    Ok(match max_tokens {
        Some(budget) => apply_token_budget(hits, |h| word_count(&h.snippet), k, budget),
        None => hits,
    })
}

/// Top `k` prose hits for an already-embedded query.
///
/// # Errors
///
/// Returns [`CtxError::DimensionMismatch`] as [`rank`] does.
pub fn search_prose(index: &ProseIndex, query: &[f32], k: usize) -> Result<Vec<ProseHit>, CtxError> {
    Ok(rank(&index.embeddings, query, k)?
        .into_iter()
        .map(|(row, score)| {
            let meta = &index.metadata[row];
            ProseHit {
                file: meta.file_path.to_string_lossy().into_owned(),
                heading_path: meta.heading_path.clone(),
                element_type: meta.element_type,
                lines: meta.lines(),
                snippet: index.texts[row].clone(),
                score,
            }
        })
        .collect())
}
