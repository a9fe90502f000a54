//! Structural chunking of Python source using tree-sitter.
//!
//! Every `def`, `async def`, and `class` in a file becomes a [`CodeChunk`],
//! nested definitions included: a method is emitted alongside the class that
//! contains it and the two overlap in line range.

use std::collections::VecDeque;
use std::path::Path;

use ctxstore_core::{CodeChunk, CtxError, ElementType};
use tree_sitter::{Node, Parser};

/// Knobs that differ between the dense and the lexical builds.
///
/// # Examples
///
/// ```
/// use ctxstore_chunk::ChunkOptions;
///
/// assert!(!ChunkOptions::DENSE.signatures);
/// assert!(ChunkOptions::LEXICAL.signatures);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Fill [`CodeChunk::signature`] by scanning the dedented text.
    pub signatures: bool,
    /// Normalize docstring indentation and strip blank edges.
    pub clean_docstrings: bool,
}

impl ChunkOptions {
    /// Options for the embedding index.
    pub const DENSE: Self = Self {
        signatures: false,
        clean_docstrings: true,
    };

    /// Options for the JSON signature/full-source export.
    pub const LEXICAL: Self = Self {
        signatures: true,
        clean_docstrings: false,
    };
}

const ERROR_PREFIX: &str = "# Error:";

/// Extract function, async function, and class chunks from Python source.
///
/// Nodes are visited breadth-first, so top-level definitions come before
/// the ones nested in them.
///
/// # Errors
///
/// Returns [`CtxError::Parse`] if the grammar cannot be loaded or the source
/// contains a syntax error. Callers treat this as a skippable file.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use ctxstore_chunk::{chunk_python, ChunkOptions};
///
/// let chunks = chunk_python(
///     Path::new("greet.py"),
///     "def hello():\n    return 'hi'\n",
///     ChunkOptions::DENSE,
/// ).unwrap();
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].element_name, "hello");
/// ```
pub fn chunk_python(
    path: &Path,
    content: &str,
    options: ChunkOptions,
) -> Result<Vec<CodeChunk>, CtxError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| CtxError::Parse(format!("failed to set language: {e}")))?;

    let Some(tree) = parser.parse(content, None) else {
        return Err(CtxError::Parse("parser produced no tree".into()));
    };

    let root = tree.root_node();
    if root.has_error() {
        let line = first_error_line(root).unwrap_or(0);
        return Err(CtxError::Parse(format!("syntax error near line {line}")));
    }

    let source = content.as_bytes();
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let mut chunks = Vec::new();

    let mut queue = VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        if let Some(element_type) = definition_type(&node) {
            if let Some(chunk) = make_chunk(path, &node, element_type, source, &lines, options) {
                chunks.push(chunk);
            }
        }
        let mut cursor = node.walk();
        queue.extend(node.named_children(&mut cursor).map(unwrap_decorated));
    }

    Ok(chunks)
}

/// The definition inside a `decorated_definition`, so decorated and plain
/// siblings are visited at the same depth and in source order.
fn unwrap_decorated<'t>(node: Node<'t>) -> Node<'t> {
    if node.kind() == "decorated_definition" {
        node.child_by_field_name("definition").unwrap_or(node)
    } else {
        node
    }
}

fn definition_type(node: &Node) -> Option<ElementType> {
    match node.kind() {
        "function_definition" if has_child_kind(node, "async") => Some(ElementType::AsyncFunction),
        "function_definition" => Some(ElementType::Function),
        "class_definition" => Some(ElementType::Class),
        _ => None,
    }
}

fn make_chunk(
    path: &Path,
    node: &Node,
    element_type: ElementType,
    source: &[u8],
    lines: &[&str],
    options: ChunkOptions,
) -> Option<CodeChunk> {
    let name = node
        .child_by_field_name("name")
        .and_then(|n| n.utf8_text(source).ok())
        .filter(|n| !n.is_empty())?;

    let source_code = source_segment(node, name, source, lines);
    if options.signatures && source_code.starts_with(ERROR_PREFIX) {
        return None;
    }

    let signature = options.signatures.then(|| scan_signature(&source_code));

    Some(CodeChunk {
        file_path: path.to_path_buf(),
        element_name: name.to_string(),
        element_type,
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        docstring: docstring(node, source, options.clean_docstrings),
        source_code,
        signature,
    })
}

/// Literal text of a definition, decorators included, dedented to the
/// indentation of its `def`/`class` line.
fn source_segment(node: &Node, name: &str, source: &[u8], lines: &[&str]) -> String {
    let def_row = node.start_position().row;
    let end_row = node.end_position().row;
    let start_row = first_decorator_row(node).map_or(def_row, |row| row.min(def_row));

    if end_row >= lines.len() || start_row > end_row {
        return node
            .utf8_text(source)
            .map(str::to_string)
            .unwrap_or_else(|_| format!("{ERROR_PREFIX} could not extract source for {name}"));
    }

    dedent_segment(&lines[start_row..=end_row], def_row - start_row)
}

/// Row of the first decorator when `node` is wrapped in a
/// `decorated_definition`.
fn first_decorator_row(node: &Node) -> Option<usize> {
    let parent = node.parent().filter(|p| p.kind() == "decorated_definition")?;
    let mut cursor = parent.walk();
    let first = parent
        .named_children(&mut cursor)
        .find(|c| c.kind() == "decorator")?;
    Some(first.start_position().row)
}

/// Strip the definition line's indentation from every line, but only when
/// every non-blank line carries at least that many leading spaces.
fn dedent_segment(segment: &[&str], def_offset: usize) -> String {
    let Some(def_line) = segment.get(def_offset) else {
        return segment.concat();
    };
    let indent = def_line.chars().take_while(|c| c.is_whitespace()).count();
    if indent == 0 {
        return segment.concat();
    }

    let prefix = " ".repeat(indent);
    let can_dedent = segment
        .iter()
        .all(|line| line.trim().is_empty() || line.starts_with(&prefix));
    if !can_dedent {
        return segment.concat();
    }

    segment
        .iter()
        .map(|line| {
            let spaces = line.bytes().take(indent).take_while(|b| *b == b' ').count();
            &line[spaces..]
        })
        .collect()
}

/// Decorator lines plus the first `def`/`async def`/`class` line.
///
/// Done by scanning text rather than the tree so that output matches what
/// a reader sees at the top of the snippet.
fn scan_signature(snippet: &str) -> String {
    let mut sig_lines: Vec<&str> = Vec::new();
    for line in snippet.split_inclusive('\n') {
        let stripped = line.trim_start();
        if stripped.starts_with('@') {
            sig_lines.push(line);
        } else if ["def ", "async def ", "class "]
            .iter()
            .any(|kw| stripped.starts_with(kw))
        {
            sig_lines.push(line);
            break;
        }
    }

    let Some((first, rest)) = sig_lines.split_first() else {
        return String::new();
    };
    let mut signature = first.trim_start().to_string();
    for line in rest {
        signature.push_str(line);
    }
    signature.trim().to_string()
}

fn docstring(node: &Node, source: &[u8], clean: bool) -> String {
    let Some(body) = node.child_by_field_name("body") else {
        return String::new();
    };
    let mut cursor = body.walk();
    let Some(first) = body
        .named_children(&mut cursor)
        .find(|c| c.kind() != "comment")
    else {
        return String::new();
    };
    if first.kind() != "expression_statement" || first.named_child_count() != 1 {
        return String::new();
    }
    let Some(literal) = first.named_child(0) else {
        return String::new();
    };
    let Some(body) = docstring_body(&literal, source) else {
        return String::new();
    };

    if clean {
        clean_docstring(&body)
    } else {
        body
    }
}

/// Text of a plain or implicitly concatenated string literal.
fn docstring_body(literal: &Node, source: &[u8]) -> Option<String> {
    match literal.kind() {
        "string" => string_literal_body(literal.utf8_text(source).ok()?).map(str::to_string),
        "concatenated_string" => {
            let mut cursor = literal.walk();
            let parts = literal
                .named_children(&mut cursor)
                .filter(|c| c.kind() == "string")
                .map(|c| string_literal_body(c.utf8_text(source).ok()?))
                .collect::<Option<Vec<&str>>>()?;
            Some(parts.concat())
        }
        _ => None,
    }
}

/// Contents of a string literal without prefix and quotes. Byte and
/// f-strings are not docstrings.
fn string_literal_body(raw: &str) -> Option<&str> {
    let prefix_len = raw
        .chars()
        .take_while(|c| matches!(c, 'r' | 'R' | 'u' | 'U' | 'b' | 'B' | 'f' | 'F'))
        .count();
    let prefix = &raw[..prefix_len];
    if prefix.contains(['b', 'B', 'f', 'F']) {
        return None;
    }
    let quoted = &raw[prefix_len..];

    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if quoted.len() >= 2 * quote.len() && quoted.starts_with(quote) && quoted.ends_with(quote)
        {
            return Some(&quoted[quote.len()..quoted.len() - quote.len()]);
        }
    }
    None
}

/// Remove the common indentation of continuation lines and drop blank
/// leading and trailing lines.
fn clean_docstring(doc: &str) -> String {
    let lines: Vec<&str> = doc.split('\n').collect();
    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<&str> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            cleaned.push(line.trim_start());
        } else if line.trim().is_empty() {
            cleaned.push("");
        } else {
            cleaned.push(strip_leading_whitespace(line, margin));
        }
    }

    while cleaned.last().is_some_and(|l| l.trim().is_empty()) {
        cleaned.pop();
    }
    let leading = cleaned.iter().take_while(|l| l.trim().is_empty()).count();
    cleaned[leading..].join("\n")
}

/// Drop up to `count` leading whitespace characters.
fn strip_leading_whitespace(line: &str, count: usize) -> &str {
    let cut = line
        .char_indices()
        .take(count)
        .take_while(|(_, c)| c.is_whitespace())
        .last()
        .map_or(0, |(i, c)| i + c.len_utf8());
    &line[cut..]
}

fn has_child_kind(node: &Node, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == kind);
    found
}

fn first_error_line(root: Node) -> Option<usize> {
    let mut queue = VecDeque::from([root]);
    while let Some(node) = queue.pop_front() {
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row + 1);
        }
        let mut cursor = node.walk();
        queue.extend(node.children(&mut cursor).filter(|c| c.has_error()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"import functools


def top_level(x):
    """Return x doubled."""
    return x * 2


@functools.lru_cache(maxsize=None)
@staticmethod
def cached(n):
    return n


class Greeter:
    """Says hello.

    More detail here.
    """

    def greet(self, name):
        # comment before body
        return f"hi {name}"

    async def fetch(self):
        return await self.load()
"#;

    fn find<'a>(chunks: &'a [CodeChunk], name: &str) -> &'a CodeChunk {
        chunks
            .iter()
            .find(|c| c.element_name == name)
            .unwrap_or_else(|| panic!("missing {name}"))
    }

    #[test]
    fn extracts_all_definitions_including_nested() {
        let chunks = chunk_python(Path::new("pkg/mod.py"), SAMPLE, ChunkOptions::DENSE).unwrap();
        let names: Vec<&str> = chunks.iter().map(|c| c.element_name.as_str()).collect();
        assert_eq!(names, vec!["top_level", "cached", "Greeter", "greet", "fetch"]);

        assert_eq!(find(&chunks, "top_level").element_type, ElementType::Function);
        assert_eq!(find(&chunks, "Greeter").element_type, ElementType::Class);
        assert_eq!(find(&chunks, "fetch").element_type, ElementType::AsyncFunction);
        assert!(chunks.iter().all(|c| c.file_path == Path::new("pkg/mod.py")));
    }

    #[test]
    fn line_ranges_are_one_based_and_within_file() {
        let chunks = chunk_python(Path::new("m.py"), SAMPLE, ChunkOptions::DENSE).unwrap();
        let total = SAMPLE.lines().count() as u32;
        for c in &chunks {
            assert!(c.start_line >= 1);
            assert!(c.start_line <= c.end_line, "{}", c.element_name);
            assert!(c.end_line <= total, "{}", c.element_name);
        }

        let top = find(&chunks, "top_level");
        assert_eq!((top.start_line, top.end_line), (4, 6));

        // Range starts at the def line, not the decorator.
        let cached = find(&chunks, "cached");
        assert_eq!(cached.start_line, 11);
    }

    #[test]
    fn decorators_are_included_in_source() {
        let chunks = chunk_python(Path::new("m.py"), SAMPLE, ChunkOptions::DENSE).unwrap();
        let cached = find(&chunks, "cached");
        assert!(cached
            .source_code
            .starts_with("@functools.lru_cache(maxsize=None)\n@staticmethod\ndef cached(n):"));
    }

    #[test]
    fn methods_are_dedented() {
        let chunks = chunk_python(Path::new("m.py"), SAMPLE, ChunkOptions::DENSE).unwrap();
        let greet = find(&chunks, "greet");
        assert!(greet.source_code.starts_with("def greet(self, name):\n"));
        assert!(greet.source_code.contains("\n    return f\"hi {name}\""));

        let fetch = find(&chunks, "fetch");
        assert!(fetch.source_code.starts_with("async def fetch(self):"));
    }

    #[test]
    fn mixed_indentation_is_left_alone() {
        let content = "class A:\n    def m(self):\n        x = (1,\n2)\n        return x\n";
        let chunks = chunk_python(Path::new("m.py"), content, ChunkOptions::DENSE).unwrap();
        let m = find(&chunks, "m");
        assert!(m.source_code.starts_with("    def m(self):"));
    }

    #[test]
    fn blank_lines_inside_bodies_survive_dedent() {
        let content = "class A:\n    def m(self):\n        a = 1\n\n        return a\n";
        let chunks = chunk_python(Path::new("m.py"), content, ChunkOptions::DENSE).unwrap();
        let m = find(&chunks, "m");
        assert_eq!(m.source_code, "def m(self):\n    a = 1\n\n    return a\n");
    }

    #[test]
    fn docstrings_are_extracted() {
        let dense = chunk_python(Path::new("m.py"), SAMPLE, ChunkOptions::DENSE).unwrap();
        assert_eq!(find(&dense, "top_level").docstring, "Return x doubled.");
        assert_eq!(find(&dense, "Greeter").docstring, "Says hello.\n\nMore detail here.");
        assert_eq!(find(&dense, "greet").docstring, "");
        assert_eq!(find(&dense, "cached").docstring, "");

        let raw = chunk_python(Path::new("m.py"), SAMPLE, ChunkOptions::LEXICAL).unwrap();
        assert_eq!(
            find(&raw, "Greeter").docstring,
            "Says hello.\n\n    More detail here.\n    "
        );
    }

    #[test]
    fn signatures_only_when_requested() {
        let dense = chunk_python(Path::new("m.py"), SAMPLE, ChunkOptions::DENSE).unwrap();
        assert!(dense.iter().all(|c| c.signature.is_none()));

        let lexical = chunk_python(Path::new("m.py"), SAMPLE, ChunkOptions::LEXICAL).unwrap();
        assert_eq!(
            find(&lexical, "cached").signature.as_deref(),
            Some("@functools.lru_cache(maxsize=None)\n@staticmethod\ndef cached(n):")
        );
        assert_eq!(
            find(&lexical, "Greeter").signature.as_deref(),
            Some("class Greeter:")
        );
        assert_eq!(
            find(&lexical, "fetch").signature.as_deref(),
            Some("async def fetch(self):")
        );
    }

    #[test]
    fn syntax_error_is_a_parse_error() {
        let result = chunk_python(Path::new("bad.py"), "def broken(:\n  pass\n", ChunkOptions::DENSE);
        assert!(matches!(result, Err(CtxError::Parse(_))));
    }

    #[test]
    fn empty_file_produces_no_chunks() {
        let chunks = chunk_python(Path::new("empty.py"), "", ChunkOptions::DENSE).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn string_literal_body_handles_prefixes() {
        assert_eq!(string_literal_body(r#""""doc""""#), Some("doc"));
        assert_eq!(string_literal_body("r'raw'"), Some("raw"));
        assert_eq!(string_literal_body("b'bytes'"), None);
        assert_eq!(string_literal_body("f\"{x}\""), None);
    }

    #[test]
    fn decorated_definitions_keep_source_order() {
        let content = "def a():\n    pass\n\n@d\ndef b():\n    pass\n\nclass C:\n    def m(self):\n        pass\n";
        let chunks = chunk_python(Path::new("m.py"), content, ChunkOptions::DENSE).unwrap();
        let names: Vec<&str> = chunks.iter().map(|c| c.element_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "C", "m"]);
        assert!(find(&chunks, "b").source_code.starts_with("@d\ndef b():"));
    }

    #[test]
    fn multibyte_indentation_in_docstring_does_not_panic() {
        let content = "def f():\n    \"\"\"Title.\n  two-space line\n\u{3000}ideographic indent\n    \"\"\"\n    return 1\n";
        let chunks = chunk_python(Path::new("m.py"), content, ChunkOptions::DENSE).unwrap();
        assert_eq!(
            find(&chunks, "f").docstring,
            "Title.\n two-space line\nideographic indent"
        );
    }

    #[test]
    fn clean_docstring_counts_characters_not_bytes() {
        assert_eq!(clean_docstring("T\n\u{a0}\u{a0}x\n  y"), "T\nx\ny");
    }

    #[test]
    fn concatenated_docstring_is_joined() {
        let content = "def f():\n    \"first \" 'second'\n    return 1\n";
        let chunks = chunk_python(Path::new("m.py"), content, ChunkOptions::DENSE).unwrap();
        assert_eq!(find(&chunks, "f").docstring, "first second");

        let formatted = "def g():\n    \"a\" f\"b\"\n    return 1\n";
        let chunks = chunk_python(Path::new("m.py"), formatted, ChunkOptions::DENSE).unwrap();
        assert_eq!(find(&chunks, "g").docstring, "");
    }
}
