//! Core types, configuration, and error handling for ctxstore.
//!
//! This crate provides the shared foundation used by the other ctxstore crates:
//! - [`CtxError`]: unified error type using `thiserror` and `miette`
//! - [`CtxConfig`]: configuration loaded from `.ctxstore.toml`
//! - Shared types: [`CodeChunk`], [`ProseMeta`], [`ElementType`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{CtxConfig, EmbeddingConfig, IndexConfig, QueryConfig, DEFAULT_CONFIG};
pub use error::CtxError;
pub use types::{line_range, CodeChunk, ElementType, OutputFormat, ProseMeta};

/// A convenience `Result` type for ctxstore operations.
pub type Result<T> = std::result::Result<T, CtxError>;
