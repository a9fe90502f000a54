//! Flatten Jupyter notebooks into prose for the heading chunker.

use serde::Deserialize;

use ctxstore_core::CtxError;

/// Cells tagged with this are left out entirely.
const IGNORE_TAG: &str = "ignore";

#[derive(Debug, Deserialize)]
struct Notebook {
    cells: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    cell_type: String,
    #[serde(default)]
    metadata: CellMetadata,
    #[serde(default)]
    source: CellSource,
}

#[derive(Debug, Default, Deserialize)]
struct CellMetadata {
    #[serde(default)]
    tags: Vec<String>,
}

/// nbformat stores source either as one string or as a list of lines.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CellSource {
    Joined(String),
    Lines(Vec<String>),
}

impl Default for CellSource {
    fn default() -> Self {
        CellSource::Joined(String::new())
    }
}

impl CellSource {
    fn text(&self) -> String {
        match self {
            CellSource::Joined(s) => s.clone(),
            CellSource::Lines(lines) => lines.concat(),
        }
    }
}

/// Markdown text of a notebook plus a count of the code-cell lines that
/// were recognized as shell escapes or magics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenedNotebook {
    /// Markdown cells joined with a blank line between them.
    pub markdown: String,
    /// Lines starting with `!` or `%` seen in code cells.
    pub magic_lines: usize,
}

/// Parse notebook JSON and concatenate its markdown cells.
///
/// Code cell content never reaches the output.
///
/// # Errors
///
/// Returns [`CtxError::Serialization`] if `json` is not a notebook document.
///
/// # Examples
///
/// ```
/// use ctxstore_chunk::notebook::flatten_notebook;
///
/// let nb = r##"{"cells": [
///     {"cell_type": "markdown", "metadata": {}, "source": ["# Title\n", "body"]},
///     {"cell_type": "code", "metadata": {}, "source": "%timeit f()"}
/// ]}"##;
/// let flat = flatten_notebook(nb).unwrap();
/// assert_eq!(flat.markdown, "# Title\nbody");
/// assert_eq!(flat.magic_lines, 1);
/// ```
pub fn flatten_notebook(json: &str) -> Result<FlattenedNotebook, CtxError> {
    let notebook: Notebook = serde_json::from_str(json)?;

    let mut sections = Vec::new();
    let mut magic_lines = 0;

    for cell in &notebook.cells {
        if cell.metadata.tags.iter().any(|t| t == IGNORE_TAG) {
            continue;
        }
        match cell.cell_type.as_str() {
            "markdown" => sections.push(cell.source.text()),
            "code" => {
                magic_lines += cell
                    .source
                    .text()
                    .lines()
                    .filter(|l| {
                        let l = l.trim_start();
                        l.starts_with('!') || l.starts_with('%')
                    })
                    .count();
            }
            _ => {}
        }
    }

    Ok(FlattenedNotebook {
        markdown: sections.join("\n\n"),
        magic_lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_cells_and_code_are_dropped() {
        let nb = r###"{
            "cells": [
                {"cell_type": "markdown", "metadata": {}, "source": "# One"},
                {"cell_type": "markdown", "metadata": {"tags": ["ignore"]}, "source": "secret"},
                {"cell_type": "code", "metadata": {}, "source": ["!echo hi\n", "x = 1\n", "%timeit x"]},
                {"cell_type": "raw", "metadata": {}, "source": "raw text"},
                {"cell_type": "markdown", "metadata": {}, "source": ["## Two\n", "more"]}
            ],
            "metadata": {},
            "nbformat": 4
        }"###;
        let flat = flatten_notebook(nb).unwrap();
        assert_eq!(flat.markdown, "# One\n\n## Two\nmore");
        assert_eq!(flat.magic_lines, 2);
        assert!(!flat.markdown.contains("secret"));
        assert!(!flat.markdown.contains("x = 1"));
    }

    #[test]
    fn missing_metadata_and_source_default() {
        let nb = r#"{"cells": [{"cell_type": "markdown"}]}"#;
        let flat = flatten_notebook(nb).unwrap();
        assert_eq!(flat.markdown, "");
    }

    #[test]
    fn empty_notebook_is_empty() {
        let flat = flatten_notebook(r#"{"cells": []}"#).unwrap();
        assert_eq!(flat, FlattenedNotebook::default());
    }

    #[test]
    fn malformed_notebook_is_an_error() {
        assert!(flatten_notebook("not json").is_err());
        assert!(flatten_notebook(r#"{"worksheets": []}"#).is_err());
        assert!(flatten_notebook(r#"{"cells": [{"source": "no type"}]}"#).is_err());
    }
}
