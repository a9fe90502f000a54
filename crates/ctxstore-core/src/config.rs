use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CtxError;

/// Commented default configuration written by `ctxstore init`.
pub const DEFAULT_CONFIG: &str = r#"# ctxstore configuration

[embedding]
# Model identifier used for builds and queries. "hash" selects the offline
# feature-hashing embedder; any fastembed model code works otherwise.
# model = "intfloat/multilingual-e5-base"

[index]
# Directory names skipped while walking the repository.
# exclude_dirs = [".git", "__pycache__", "node_modules", "build", "dist", "venv"]
# Glob patterns matched against paths relative to the repository root.
# exclude_patterns = ["tests/**"]
# max_file_size = 1048576

[query]
# k = 3
# max_tokens = 2000
"#;

/// Top-level configuration loaded from `.ctxstore.toml`.
///
/// Resolution order: CLI flags > config file > defaults.
///
/// # Examples
///
/// ```
/// use ctxstore_core::CtxConfig;
///
/// let config = CtxConfig::default();
/// assert_eq!(config.query.k, 3);
/// assert_eq!(config.query.max_tokens, 2000);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CtxConfig {
    /// Embedding model settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Repository walking settings.
    #[serde(default)]
    pub index: IndexConfig,
    /// Query defaults.
    #[serde(default)]
    pub query: QueryConfig,
}

impl CtxConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::Io`] if the file cannot be read, or
    /// [`CtxError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ctxstore_core::CtxConfig;
    /// use std::path::Path;
    ///
    /// let config = CtxConfig::from_file(Path::new(".ctxstore.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, CtxError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`CtxError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use ctxstore_core::CtxConfig;
    ///
    /// let toml = r#"
    /// [query]
    /// k = 10
    /// "#;
    /// let config = CtxConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.query.k, 10);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, CtxError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }
}

/// Embedding model configuration.
///
/// # Examples
///
/// ```
/// use ctxstore_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.model, "intfloat/multilingual-e5-base");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identifier (default: `"intfloat/multilingual-e5-base"`).
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "intfloat/multilingual-e5-base".into()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
        }
    }
}

/// Repository walking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory names that are never descended into.
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    /// Glob patterns matched against root-relative paths.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Files larger than this many bytes are skipped (default: 1 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_exclude_dirs() -> Vec<String> {
    [
        ".git",
        ".vscode",
        ".idea",
        "__pycache__",
        "node_modules",
        "build",
        "dist",
        "venv",
        "env",
        ".env",
        "site-packages",
        ".ipynb_checkpoints",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_file_size() -> u64 {
    1_048_576
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            exclude_dirs: default_exclude_dirs(),
            exclude_patterns: Vec::new(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Query defaults.
///
/// # Examples
///
/// ```
/// use ctxstore_core::QueryConfig;
///
/// let config = QueryConfig::default();
/// assert_eq!(config.k, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Number of results to return (default: 3).
    #[serde(default = "default_k")]
    pub k: usize,
    /// Word budget across structural results (default: 2000).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_k() -> usize {
    3
}

fn default_max_tokens() -> usize {
    2000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = CtxConfig::default();
        assert_eq!(config.embedding.model, "intfloat/multilingual-e5-base");
        assert_eq!(config.query.k, 3);
        assert_eq!(config.query.max_tokens, 2000);
        assert_eq!(config.index.max_file_size, 1_048_576);
        assert!(config.index.exclude_dirs.iter().any(|d| d == "__pycache__"));
        assert!(config.index.exclude_patterns.is_empty());
    }

    #[test]
    fn parse_partial_toml() {
        let toml = r#"
[embedding]
model = "hash"

[index]
exclude_patterns = ["tests/**"]
"#;
        let config = CtxConfig::from_toml(toml).unwrap();
        assert_eq!(config.embedding.model, "hash");
        assert_eq!(config.index.exclude_patterns, vec!["tests/**"]);
        // Untouched sections keep their defaults.
        assert!(!config.index.exclude_dirs.is_empty());
        assert_eq!(config.query.k, 3);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = CtxConfig::from_toml("").unwrap();
        assert_eq!(config.query.max_tokens, 2000);
    }

    #[test]
    fn default_config_template_parses() {
        let config = CtxConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.query.k, 3);
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = CtxConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }
}
