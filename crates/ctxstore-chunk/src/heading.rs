//! Heading-scoped chunking for Markdown, plain text, and notebooks.
//!
//! Lines are scanned for `#` headings and a stack of open headings tracks
//! the ancestry of each section. The scan is line based: a `#` comment
//! inside a fenced code block opens a section like any other heading.

use std::path::Path;

use ctxstore_core::{ElementType, ProseMeta};

/// Sections with fewer non-blank lines than this are dropped.
pub const MIN_SECTION_LINES: usize = 5;

/// Separator between titles in a heading path.
pub const HEADING_SEPARATOR: &str = " > ";

/// Parallel section texts and metadata accumulated across files.
///
/// `texts[i]` is the verbatim text of the section described by
/// `metadata[i]`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use ctxstore_core::ElementType;
/// use ctxstore_chunk::ProseCorpus;
///
/// let doc = "# Setup\none\ntwo\nthree\nfour\n";
/// let mut corpus = ProseCorpus::default();
/// let added = corpus.process_source(Path::new("README.md"), doc, ElementType::Markdown);
/// assert_eq!(added, 1);
/// assert_eq!(corpus.metadata[0].heading_path, "Setup");
/// assert_eq!(corpus.texts[0], doc);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProseCorpus {
    pub texts: Vec<String>,
    pub metadata: Vec<ProseMeta>,
}

struct Boundary {
    line: usize,
    path: Vec<String>,
}

impl ProseCorpus {
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Split `text` into heading-scoped sections and append the ones that
    /// carry enough content. Returns the number of sections added.
    ///
    /// Text before the first heading is never captured, so a file without
    /// headings contributes nothing.
    pub fn process_source(
        &mut self,
        rel_path: &Path,
        text: &str,
        element_type: ElementType,
    ) -> usize {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();

        let mut stack: Vec<(usize, String)> = Vec::new();
        let mut boundaries: Vec<Boundary> = Vec::new();

        for (idx, line) in lines.iter().enumerate() {
            let Some((level, title)) = parse_heading(line) else {
                continue;
            };
            while stack.last().is_some_and(|(top, _)| *top >= level) {
                stack.pop();
            }
            stack.push((level, title.to_string()));
            boundaries.push(Boundary {
                line: idx,
                path: stack.iter().map(|(_, t)| t.clone()).collect(),
            });
        }
        boundaries.push(Boundary {
            line: lines.len(),
            path: Vec::new(),
        });

        let mut added = 0;
        for pair in boundaries.windows(2) {
            let (start, end) = (pair[0].line, pair[1].line);
            let section = &lines[start..end];
            let non_blank = section.iter().filter(|l| !l.trim().is_empty()).count();
            if non_blank < MIN_SECTION_LINES {
                continue;
            }

            let path = &pair[0].path;
            self.texts.push(section.concat());
            self.metadata.push(ProseMeta {
                file_path: rel_path.to_path_buf(),
                element_name: path.last().cloned().unwrap_or_default(),
                heading_path: path.join(HEADING_SEPARATOR),
                element_type,
                start_line: start as u32 + 1,
                end_line: end as u32,
            });
            added += 1;
        }

        tracing::trace!(path = %rel_path.display(), sections = added, "chunked prose");
        added
    }

    /// Append another corpus, preserving order.
    pub fn extend(&mut self, other: ProseCorpus) {
        self.texts.extend(other.texts);
        self.metadata.extend(other.metadata);
    }
}

/// Level and title of a heading line, or `None` for ordinary text.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let stripped = line.trim_start();
    let level = stripped.bytes().take_while(|b| *b == b'#').count();
    if level == 0 {
        return None;
    }
    Some((level, stripped[level..].trim()))
}
