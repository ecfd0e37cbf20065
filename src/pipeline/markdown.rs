//! Document converter: rich-text tree → Markdown.
//!
//! A single depth-first pass over [`Node`]. Every block element becomes one
//! line and lines are joined by a blank line. Embedded media are looked up
//! in a [`ResolvedMedia`] map filled by the upload step, so the converter
//! itself performs no I/O.
//!
//! ## Why diagnostics instead of errors?
//!
//! Source documents routinely contain node kinds the target cannot express
//! (tables, entry embeds) and media that failed to upload. None of that is
//! worth losing the rest of a record over, so conversion never fails: the
//! affected piece is left out and a [`Diagnostic`] is returned alongside the
//! text (and logged at `warn`).
//!
//! ## Inline rules
//!
//! 1. A run made only of whitespace becomes a single space.
//! 2. Marks wrap the *trimmed* run, bold innermost, then italic, then code;
//!    the run's leading/trailing whitespace stays outside the delimiters.
//! 3. Runs are concatenated as-is.
//! 4. Only then is every run of 2+ whitespace characters collapsed to one
//!    space and the line trimmed.
//!
//! ## Known limitation
//!
//! List items render their first paragraph only. Nested lists and further
//! paragraphs inside an item are dropped with an
//! [`Diagnostic::UnsupportedListContent`].

use crate::document::{Marks, Node, TextRun};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Deepest heading level the target renders; 5 and 6 clamp to this.
pub const MAX_HEADING_LEVEL: u8 = 4;

/// What the upload step produced for one embedded asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMedia {
    pub file_name: String,
    /// Destination URL; `None` when the upload failed.
    pub url: Option<String>,
}

/// Source asset id → uploaded media, consumed by [`convert`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMedia {
    entries: HashMap<String, RenderedMedia>,
}

impl ResolvedMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        asset_id: impl Into<String>,
        file_name: impl Into<String>,
        url: Option<String>,
    ) {
        self.entries.insert(
            asset_id.into(),
            RenderedMedia {
                file_name: file_name.into(),
                url,
            },
        );
    }

    pub fn get(&self, asset_id: &str) -> Option<&RenderedMedia> {
        self.entries.get(asset_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Something the converter left out, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Embedded asset id absent from the media map.
    UnresolvedMedia { asset_id: String },
    /// Asset known but without a destination URL.
    MissingMediaUrl { asset_id: String },
    /// Node kind the converter does not render.
    UnhandledNode { node_kind: String },
    /// List item content beyond its first paragraph.
    UnsupportedListContent { node_kind: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnresolvedMedia { asset_id } => {
                write!(f, "embedded asset '{asset_id}' is not resolved; omitted")
            }
            Diagnostic::MissingMediaUrl { asset_id } => {
                write!(f, "embedded asset '{asset_id}' has no destination URL; omitted")
            }
            Diagnostic::UnhandledNode { node_kind } => {
                write!(f, "unhandled node kind '{node_kind}'; ignored")
            }
            Diagnostic::UnsupportedListContent { node_kind } => {
                write!(f, "'{node_kind}' inside a list item is not supported; dropped")
            }
        }
    }
}

/// Markdown plus everything that was left out of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversion {
    pub markdown: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Render `root` to Markdown.
pub fn convert(root: &Node, media: &ResolvedMedia) -> String {
    convert_with_diagnostics(root, media).markdown
}

/// Render `root` to Markdown and report what was omitted.
///
/// Deterministic: the same tree and media map always give the same output.
pub fn convert_with_diagnostics(root: &Node, media: &ResolvedMedia) -> Conversion {
    let rendered = render_block(root, media);
    for d in &rendered.diagnostics {
        warn!("Rich text: {}", d);
    }
    Conversion {
        markdown: rendered.blocks.join("\n\n"),
        diagnostics: rendered.diagnostics,
    }
}

// ── Blocks ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Blocks {
    blocks: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl Blocks {
    fn line(text: String, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            blocks: if text.is_empty() { vec![] } else { vec![text] },
            diagnostics,
        }
    }

    fn diagnostic(d: Diagnostic) -> Self {
        Self {
            blocks: vec![],
            diagnostics: vec![d],
        }
    }

    fn append(mut self, other: Blocks) -> Self {
        self.blocks.extend(other.blocks);
        self.diagnostics.extend(other.diagnostics);
        self
    }
}

fn render_block(node: &Node, media: &ResolvedMedia) -> Blocks {
    match node {
        Node::Document(children) => children
            .iter()
            .fold(Blocks::default(), |acc, child| acc.append(render_block(child, media))),

        Node::Paragraph(children) => {
            let inline = render_inline(children);
            Blocks::line(inline.text, inline.diagnostics)
        }

        Node::Heading { level, children } => {
            let inline = render_inline(children);
            if inline.text.is_empty() {
                return Blocks::line(String::new(), inline.diagnostics);
            }
            let hashes = "#".repeat((*level).clamp(1, MAX_HEADING_LEVEL) as usize);
            Blocks::line(format!("{hashes} {}", inline.text), inline.diagnostics)
        }

        Node::EmbeddedAsset { asset_id } => match media.get(asset_id) {
            Some(RenderedMedia {
                file_name,
                url: Some(url),
            }) if !url.is_empty() => Blocks::line(format!("![{file_name}]({url})"), vec![]),
            Some(_) => Blocks::diagnostic(Diagnostic::MissingMediaUrl {
                asset_id: asset_id.clone(),
            }),
            None => Blocks::diagnostic(Diagnostic::UnresolvedMedia {
                asset_id: asset_id.clone(),
            }),
        },

        Node::UnorderedList(items) => render_list(items, false),
        Node::OrderedList(items) => render_list(items, true),

        Node::Blockquote(children) => {
            let mut parts = Vec::new();
            let mut diagnostics = Vec::new();
            collect_quote_paragraphs(children, &mut parts, &mut diagnostics);
            if parts.is_empty() {
                return Blocks::line(String::new(), diagnostics);
            }
            Blocks::line(format!("> {}", parts.join(" ")), diagnostics)
        }

        Node::Hyperlink { uri, children } => {
            let inline = render_link(uri, children);
            Blocks::line(inline.text, inline.diagnostics)
        }

        Node::ListItem(_) | Node::Text(_) | Node::Unsupported { .. } => {
            Blocks::diagnostic(Diagnostic::UnhandledNode {
                node_kind: node.kind().to_string(),
            })
        }
    }
}

fn render_list(items: &[Node], ordered: bool) -> Blocks {
    let mut out = Blocks::default();
    let mut counter = 0usize;

    for item in items {
        let Node::ListItem(children) = item else {
            out.diagnostics.push(Diagnostic::UnsupportedListContent {
                node_kind: item.kind().to_string(),
            });
            continue;
        };

        let mut text = None;
        for child in children {
            match child {
                Node::Paragraph(runs) if text.is_none() => {
                    let inline = render_inline(runs);
                    out.diagnostics.extend(inline.diagnostics);
                    text = Some(inline.text);
                }
                other => out.diagnostics.push(Diagnostic::UnsupportedListContent {
                    node_kind: other.kind().to_string(),
                }),
            }
        }

        match text {
            Some(text) if !text.is_empty() => {
                counter += 1;
                let line = if ordered {
                    format!("{counter}. {text}")
                } else {
                    format!("- {text}")
                };
                out.blocks.push(line);
            }
            _ => {}
        }
    }
    out
}

/// Every paragraph below a blockquote, in document order.
fn collect_quote_paragraphs(
    children: &[Node],
    parts: &mut Vec<String>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for child in children {
        match child {
            Node::Paragraph(runs) => {
                let inline = render_inline(runs);
                diagnostics.extend(inline.diagnostics);
                if !inline.text.is_empty() {
                    parts.push(inline.text);
                }
            }
            Node::Text(_) | Node::EmbeddedAsset { .. } | Node::Hyperlink { .. } => {
                diagnostics.push(Diagnostic::UnhandledNode {
                    node_kind: child.kind().to_string(),
                })
            }
            other => collect_quote_paragraphs(other.children(), parts, diagnostics),
        }
    }
}

// ── Inline ───────────────────────────────────────────────────────────────

static RE_WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

struct Inline {
    text: String,
    diagnostics: Vec<Diagnostic>,
}

/// Render inline children (text runs and hyperlinks) into one line.
fn render_inline(children: &[Node]) -> Inline {
    let mut raw = String::new();
    let mut diagnostics = Vec::new();

    for child in children {
        match child {
            Node::Text(run) => raw.push_str(&render_run(run)),
            Node::Hyperlink { uri, children } => {
                let link = render_link(uri, children);
                diagnostics.extend(link.diagnostics);
                raw.push_str(&link.text);
            }
            other => diagnostics.push(Diagnostic::UnhandledNode {
                node_kind: other.kind().to_string(),
            }),
        }
    }

    Inline {
        text: collapse_whitespace(&raw),
        diagnostics,
    }
}

/// `[text](uri)`, falling back to `[uri](uri)` when the text is empty.
fn render_link(uri: &str, children: &[Node]) -> Inline {
    let label = render_inline(children);
    let text = match (label.text.is_empty(), uri.is_empty()) {
        (_, true) => label.text,
        (true, false) => format!("[{uri}]({uri})"),
        (false, false) => format!("[{}]({uri})", label.text),
    };
    Inline {
        text,
        diagnostics: label.diagnostics,
    }
}

fn render_run(run: &TextRun) -> String {
    let value = run.value.as_str();
    if value.is_empty() {
        return String::new();
    }
    let core = value.trim();
    if core.is_empty() {
        return " ".to_string();
    }
    if run.marks.is_empty() {
        return value.to_string();
    }

    let start = value.len() - value.trim_start().len();
    let end = value.trim_end().len();
    format!(
        "{}{}{}",
        &value[..start],
        wrap_marks(core, run.marks),
        &value[end..]
    )
}

fn wrap_marks(core: &str, marks: Marks) -> String {
    let mut s = core.to_string();
    if marks.bold {
        s = format!("**{s}**");
    }
    if marks.italic {
        s = format!("*{s}*");
    }
    if marks.code {
        s = format!("`{s}`");
    }
    s
}

fn collapse_whitespace(s: &str) -> String {
    RE_WHITESPACE_RUN.replace_all(s, " ").trim().to_string()
}
