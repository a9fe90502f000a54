//! Chunk extraction for ctxstore.
//!
//! Two chunkers turn files into retrievable units:
//! - [`structural`] parses Python with tree-sitter and emits one chunk per
//!   function, async function, and class (nested definitions included).
//! - [`heading`] splits Markdown, plain text, and flattened notebooks into
//!   heading-scoped sections tracked with a heading stack.
//!
//! [`corpus`] walks a repository with [`walker`], runs the right chunker per
//! file, and folds skipped files into statistics instead of failing the build.

pub mod corpus;
pub mod heading;
pub mod notebook;
pub mod structural;
pub mod walker;

pub use corpus::{
    collect_code_corpus, collect_prose_corpus, CodeCorpus, CorpusStats, FileOutcome, SkipReason,
};
pub use heading::ProseCorpus;
pub use structural::{chunk_python, ChunkOptions};
