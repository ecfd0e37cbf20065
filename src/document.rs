//! Rich-text document tree.
//!
//! The source API serialises rich text as a recursive JSON tree where every
//! node carries a `nodeType` string, block nodes carry `content`, and text
//! nodes carry `value` + `marks`. We deserialise that once into [`Node`], a
//! closed sum type, so the converter can match exhaustively and every kind it
//! does not render ends up in the explicit [`Node::Unsupported`] arm.
//!
//! ```json
//! { "nodeType": "paragraph", "data": {}, "content": [
//!     { "nodeType": "text", "value": "Hello ", "marks": [], "data": {} },
//!     { "nodeType": "text", "value": "world", "marks": [{ "type": "bold" }], "data": {} }
//! ] }
//! ```

use serde::Deserialize;
use serde_json::Value;

/// Inline formatting applied to a text run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Marks {
    pub bold: bool,
    pub italic: bool,
    pub code: bool,
}

impl Marks {
    pub fn is_empty(&self) -> bool {
        !(self.bold || self.italic || self.code)
    }
}

/// A leaf run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRun {
    pub value: String,
    pub marks: Marks,
}

/// One node of a rich-text document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawNode")]
pub enum Node {
    Document(Vec<Node>),
    Paragraph(Vec<Node>),
    /// Source levels 1–6, stored as-is; clamping is a rendering concern.
    Heading { level: u8, children: Vec<Node> },
    UnorderedList(Vec<Node>),
    OrderedList(Vec<Node>),
    ListItem(Vec<Node>),
    Blockquote(Vec<Node>),
    /// Block-level reference to an asset in the inclusion side-table.
    EmbeddedAsset { asset_id: String },
    Hyperlink { uri: String, children: Vec<Node> },
    Text(TextRun),
    /// Any node kind the converter does not render (tables, rules, entry
    /// embeds, entry hyperlinks, …). Children are kept for traversal.
    Unsupported { kind: String, children: Vec<Node> },
}

impl Node {
    /// Source `nodeType` name of this node.
    pub fn kind(&self) -> &str {
        match self {
            Node::Document(_) => "document",
            Node::Paragraph(_) => "paragraph",
            Node::Heading { level, .. } => match level {
                1 => "heading-1",
                2 => "heading-2",
                3 => "heading-3",
                4 => "heading-4",
                5 => "heading-5",
                _ => "heading-6",
            },
            Node::UnorderedList(_) => "unordered-list",
            Node::OrderedList(_) => "ordered-list",
            Node::ListItem(_) => "list-item",
            Node::Blockquote(_) => "blockquote",
            Node::EmbeddedAsset { .. } => "embedded-asset-block",
            Node::Hyperlink { .. } => "hyperlink",
            Node::Text(_) => "text",
            Node::Unsupported { kind, .. } => kind,
        }
    }

    /// Child nodes; always empty for text and embedded assets.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Document(c)
            | Node::Paragraph(c)
            | Node::UnorderedList(c)
            | Node::OrderedList(c)
            | Node::ListItem(c)
            | Node::Blockquote(c) => c,
            Node::Heading { children, .. }
            | Node::Hyperlink { children, .. }
            | Node::Unsupported { children, .. } => children,
            Node::EmbeddedAsset { .. } | Node::Text(_) => &[],
        }
    }

    /// Convenience constructor used heavily in tests.
    pub fn text(value: impl Into<String>) -> Node {
        Node::Text(TextRun {
            value: value.into(),
            marks: Marks::default(),
        })
    }

    pub fn marked(value: impl Into<String>, marks: Marks) -> Node {
        Node::Text(TextRun {
            value: value.into(),
            marks,
        })
    }

    pub fn bold(value: impl Into<String>) -> Node {
        Node::marked(
            value,
            Marks {
                bold: true,
                ..Marks::default()
            },
        )
    }

    pub fn italic(value: impl Into<String>) -> Node {
        Node::marked(
            value,
            Marks {
                italic: true,
                ..Marks::default()
            },
        )
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    node_type: String,
    #[serde(default)]
    content: Vec<RawNode>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    marks: Vec<RawMark>,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct RawMark {
    #[serde(rename = "type")]
    kind: String,
}

impl From<RawNode> for Node {
    fn from(raw: RawNode) -> Self {
        let RawNode {
            node_type,
            content,
            value,
            marks,
            data,
        } = raw;

        // Text nodes never have children, so their `content` is dropped.
        if node_type == "text" {
            let mut m = Marks::default();
            for mark in &marks {
                match mark.kind.as_str() {
                    "bold" => m.bold = true,
                    "italic" => m.italic = true,
                    "code" => m.code = true,
                    _ => {}
                }
            }
            return Node::Text(TextRun {
                value: value.unwrap_or_default(),
                marks: m,
            });
        }

        let children: Vec<Node> = content.into_iter().map(Node::from).collect();

        match node_type.as_str() {
            "document" => Node::Document(children),
            "paragraph" => Node::Paragraph(children),
            "unordered-list" => Node::UnorderedList(children),
            "ordered-list" => Node::OrderedList(children),
            "list-item" => Node::ListItem(children),
            "blockquote" => Node::Blockquote(children),
            "hyperlink" => Node::Hyperlink {
                uri: data
                    .get("uri")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                children,
            },
            "embedded-asset-block" => match target_id(&data) {
                Some(asset_id) => Node::EmbeddedAsset { asset_id },
                None => Node::Unsupported {
                    kind: node_type,
                    children,
                },
            },
            other => match other
                .strip_prefix("heading-")
                .and_then(|n| n.parse::<u8>().ok())
            {
                Some(level @ 1..=6) => Node::Heading { level, children },
                _ => Node::Unsupported {
                    kind: node_type,
                    children,
                },
            },
        }
    }
}

/// `data.target.sys.id` of a link-bearing node.
fn target_id(data: &Value) -> Option<String> {
    data.pointer("/target/sys/id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
