//! Embedding, storage, and retrieval for ctxstore.
//!
//! - [`embedding`] loads models once, prefixes queries, batches documents,
//!   and normalizes every vector.
//! - [`store`] persists dense code and prose indices as single SQLite files.
//! - [`search`] ranks by cosine similarity and applies the word budget.
//! - [`lexical`] writes and queries the embedding-free JSON indices.
//! - [`session`] ties them together behind explicit model and index caches.

pub mod embedding;
pub mod lexical;
pub mod search;
pub mod session;
pub mod store;

pub use embedding::{Embedder, EmbeddingGateway, HashEmbedder, HASH_MODEL};
pub use lexical::{build_json_indices, query_json_index, LexicalHit, LexicalRecord};
pub use search::{CodeHit, ProseHit};
pub use session::{BuildReport, Session};
pub use store::{CodeIndex, ProseIndex};
