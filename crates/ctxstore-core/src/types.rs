use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of a retrievable chunk.
///
/// The first three come from the structural chunker, the rest from the
/// heading chunker.
///
/// # Examples
///
/// ```
/// use ctxstore_core::ElementType;
///
/// assert_eq!(ElementType::AsyncFunction.to_string(), "AsyncFunction");
/// assert!(ElementType::Notebook.is_prose());
/// assert!(!ElementType::Class.is_prose());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// `def` definition.
    Function,
    /// `async def` definition.
    AsyncFunction,
    /// `class` definition.
    Class,
    /// Section of a Markdown document.
    Markdown,
    /// Section of a plain-text document.
    ProseText,
    /// Section of a notebook's concatenated markdown cells.
    Notebook,
}

impl ElementType {
    /// Whether the tag belongs to the heading chunker.
    pub fn is_prose(self) -> bool {
        matches!(
            self,
            ElementType::Markdown | ElementType::ProseText | ElementType::Notebook
        )
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Function => "Function",
            ElementType::AsyncFunction => "AsyncFunction",
            ElementType::Class => "Class",
            ElementType::Markdown => "Markdown",
            ElementType::ProseText => "ProseText",
            ElementType::Notebook => "Notebook",
        };
        f.write_str(name)
    }
}

/// A function, async function, or class extracted from a source file.
///
/// `start_line`/`end_line` are 1-based and inclusive, measured in the
/// original file, and cover the definition itself (decorators are included
/// in `source_code` but not in the range).
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use ctxstore_core::{CodeChunk, ElementType};
///
/// let chunk = CodeChunk {
///     file_path: PathBuf::from("pkg/util.py"),
///     element_name: "slugify".into(),
///     element_type: ElementType::Function,
///     start_line: 3,
///     end_line: 5,
///     docstring: "Make a slug.".into(),
///     source_code: "def slugify(s):\n    \"\"\"Make a slug.\"\"\"\n    return s\n".into(),
///     signature: None,
/// };
/// assert_eq!(chunk.lines(), "3-5");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    /// Path relative to the indexed root.
    pub file_path: PathBuf,
    /// Symbol name.
    pub element_name: String,
    /// Function, AsyncFunction, or Class.
    pub element_type: ElementType,
    /// Line of the `def`/`class` keyword (1-indexed).
    pub start_line: u32,
    /// Last line of the definition (1-indexed, inclusive).
    pub end_line: u32,
    /// Leading string-literal docstring, or empty.
    #[serde(default)]
    pub docstring: String,
    /// Dedented definition text including decorators.
    pub source_code: String,
    /// Decorator lines plus the declaration line, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl CodeChunk {
    /// Line range formatted as `start-end`.
    pub fn lines(&self) -> String {
        line_range(self.start_line, self.end_line)
    }
}

/// Metadata for one heading-scoped section of a prose document.
///
/// `start_line` is 1-based; `end_line` is the 0-based exclusive end of the
/// section, which is the same number as the 1-based last line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProseMeta {
    /// Path relative to the indexed root.
    pub file_path: PathBuf,
    /// Title of the section's own heading.
    #[serde(default)]
    pub element_name: String,
    /// Ancestor heading titles joined by `" > "`, ending with this section's own.
    pub heading_path: String,
    /// Markdown, ProseText, or Notebook.
    pub element_type: ElementType,
    /// First line of the section (1-indexed).
    pub start_line: u32,
    /// Last line of the section (1-indexed, inclusive).
    pub end_line: u32,
}

impl ProseMeta {
    /// Line range formatted as `start-end`.
    pub fn lines(&self) -> String {
        line_range(self.start_line, self.end_line)
    }
}

/// Format a line range as `start-end`.
pub fn line_range(start: u32, end: u32) -> String {
    format!("{start}-{end}")
}

/// Output format for query results.
///
/// # Examples
///
/// ```
/// use ctxstore_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable listing.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
