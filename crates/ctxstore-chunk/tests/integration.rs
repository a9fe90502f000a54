//! Integration tests: walk a temporary repository and chunk it end to end.

use std::fs;
use std::path::Path;

use ctxstore_chunk::{collect_code_corpus, collect_prose_corpus, ChunkOptions};
use ctxstore_core::{ElementType, IndexConfig};

fn heading_cell(source: &str) -> serde_json::Value {
    serde_json::json!({"cell_type": "markdown", "metadata": {}, "source": source})
}

#[test]
fn notebook_with_nested_headings_ignored_cell_and_magics() {
    let dir = tempfile::tempdir().unwrap();
    let notebooks = dir.path().join("notebooks");
    fs::create_dir_all(&notebooks).unwrap();

    let notebook = serde_json::json!({
        "cells": [
            heading_cell("# Top Level\nIntro line one.\nIntro line two.\nIntro line three.\nIntro line four."),
            {
                "cell_type": "markdown",
                "metadata": {"tags": ["ignore"]},
                "source": "This ignored cell must never be indexed."
            },
            heading_cell("## Subsection\nDetail one.\nDetail two.\nDetail three.\nDetail four."),
            {
                "cell_type": "code",
                "metadata": {},
                "source": ["%timeit sum(range(10))\n", "!echo hello\n", "print('code')"]
            },
            heading_cell("### Deep Section\nDeep one.\nDeep two.\nDeep three.\nDeep four.")
        ],
        "metadata": {},
        "nbformat": 4,
        "nbformat_minor": 2
    });
    fs::write(
        notebooks.join("fixture_notebook.ipynb"),
        serde_json::to_string_pretty(&notebook).unwrap(),
    )
    .unwrap();

    let (corpus, stats) = collect_prose_corpus(dir.path(), &IndexConfig::default()).unwrap();
    assert_eq!(stats.files_scanned, 1);
    assert_eq!(stats.files_skipped, 0);
    assert_eq!(corpus.len(), 3);

    let paths: Vec<&str> = corpus
        .metadata
        .iter()
        .map(|m| m.heading_path.as_str())
        .collect();
    assert_eq!(
        paths,
        vec![
            "Top Level",
            "Top Level > Subsection",
            "Top Level > Subsection > Deep Section"
        ]
    );
    assert!(corpus
        .metadata
        .iter()
        .all(|m| m.element_type == ElementType::Notebook));
    assert!(corpus
        .metadata
        .iter()
        .all(|m| m.file_path == Path::new("notebooks/fixture_notebook.ipynb")));

    let combined = corpus.texts.join("\n");
    assert!(!combined.contains("%timeit"));
    assert!(!combined.contains("!echo"));
    assert!(!combined.to_lowercase().contains("ignored cell"));
    assert!(!combined.contains("print('code')"));
}

#[test]
fn structural_ranges_stay_inside_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("pkg")).unwrap();
    fs::write(
        root.join("pkg/service.py"),
        r#"import asyncio


class Service:
    """Coordinates workers."""

    @property
    def name(self):
        return "svc"

    async def run(self):
        def inner():
            return 1
        await asyncio.sleep(0)
        return inner()


def main():
    Service()
"#,
    )
    .unwrap();
    fs::write(root.join("pkg/empty.py"), "").unwrap();

    let corpus = collect_code_corpus(root, &IndexConfig::default(), ChunkOptions::DENSE).unwrap();
    assert_eq!(corpus.stats.files_scanned, 2);

    let content = fs::read_to_string(root.join("pkg/service.py")).unwrap();
    let total = content.lines().count() as u32;
    for chunk in &corpus.chunks {
        assert!(chunk.start_line >= 1 && chunk.start_line <= chunk.end_line);
        assert!(chunk.end_line <= total);
        assert!(!chunk.element_name.is_empty());

        // Dedented: the first non-decorator line starts at column zero.
        let first = chunk
            .source_code
            .lines()
            .find(|l| !l.trim_start().starts_with('@'))
            .unwrap();
        assert!(!first.starts_with(char::is_whitespace), "{}", chunk.element_name);
    }

    let names: Vec<&str> = corpus
        .chunks
        .iter()
        .map(|c| c.element_name.as_str())
        .collect();
    // Breadth-first in source order; decorated `name` stays ahead of `run`.
    assert_eq!(names, vec!["Service", "main", "name", "run", "inner"]);

    let name = corpus.chunks.iter().find(|c| c.element_name == "name").unwrap();
    assert!(name.source_code.starts_with("@property\ndef name(self):"));
    assert_eq!(name.start_line, 8);
}

#[test]
fn lexical_options_fill_signatures() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("api.py"),
        "@app.route('/')\ndef index():\n    '''Home page.'''\n    return 'ok'\n",
    )
    .unwrap();

    let corpus =
        collect_code_corpus(dir.path(), &IndexConfig::default(), ChunkOptions::LEXICAL).unwrap();
    assert_eq!(corpus.chunks.len(), 1);
    let chunk = &corpus.chunks[0];
    assert_eq!(chunk.signature.as_deref(), Some("@app.route('/')\ndef index():"));
    assert_eq!(chunk.docstring, "Home page.");
}
