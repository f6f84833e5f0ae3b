//! Loader for the JSON the host's editor emits (`doc.toJSON()` shape).
//!
//! Both snake_case (`bullet_list`) and camelCase (`bulletList`) schema names
//! are accepted.

use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{AtomicInline, Attrs, Content, DocTree, Inline, Node, NodeKind};
use crate::error::TreeError;

#[derive(Debug, Deserialize)]
struct JsonNode {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attrs: Option<Map<String, Value>>,
    #[serde(default)]
    content: Vec<JsonNode>,
    #[serde(default)]
    text: Option<String>,
}

impl JsonNode {
    fn attr_string(&self, key: &str) -> Option<String> {
        match self.attrs.as_ref()?.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn attr_i64(&self, key: &str) -> Option<i64> {
        let value = self.attrs.as_ref()?.get(key)?;
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }

    fn is_inline_like(&self) -> bool {
        matches!(canonical_name(&self.kind).as_str(), "text" | "hard_break")
    }
}

impl DocTree {
    /// Parse the host editor's JSON document.
    pub fn from_json(json: &str) -> Result<Self, TreeError> {
        let root: JsonNode = serde_json::from_str(json)?;
        if root.kind != "doc" {
            return Err(TreeError::UnexpectedRoot(root.kind));
        }

        Ok(DocTree::new(blocks_from_json(root.content)))
    }
}

/// `bulletList` -> `bullet_list`; snake_case input passes through.
fn canonical_name(kind: &str) -> String {
    let mut out = String::with_capacity(kind.len() + 4);
    for ch in kind.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn kind_from_json(node: &JsonNode) -> Result<NodeKind, TreeError> {
    let name = canonical_name(&node.kind);
    let kind = match name.as_str() {
        "paragraph" => NodeKind::Paragraph,
        "heading" => {
            let level = node.attr_i64("level").unwrap_or(1);
            if !(1..=6).contains(&level) {
                return Err(TreeError::InvalidHeadingLevel(level));
            }
            NodeKind::Heading { level: level as u8 }
        }
        "bullet_list" => NodeKind::BulletList,
        "ordered_list" => NodeKind::OrderedList {
            start: node
                .attr_i64("order")
                .or_else(|| node.attr_i64("start"))
                .unwrap_or(1)
                .max(0) as u64,
        },
        "list_item" => NodeKind::ListItem,
        "blockquote" => NodeKind::Blockquote,
        "code_block" => NodeKind::CodeBlock {
            language: node
                .attr_string("language")
                .or_else(|| node.attr_string("params"))
                .filter(|lang| !lang.is_empty()),
        },
        "horizontal_rule" => NodeKind::HorizontalRule,
        "table" => NodeKind::Table,
        "table_row" => NodeKind::TableRow,
        "table_cell" => NodeKind::TableCell { header: false },
        "table_header" => NodeKind::TableCell { header: true },
        "image" => NodeKind::Image {
            src: node.attr_string("src").unwrap_or_default(),
            alt: node.attr_string("alt").unwrap_or_default(),
            title: node.attr_string("title").filter(|t| !t.is_empty()),
        },
        "section_marker" => NodeKind::SectionMarker {
            title: node
                .attr_string("title")
                .or_else(|| node.attr_string("name"))
                .unwrap_or_default(),
        },
        _ => NodeKind::Other(name),
    };
    Ok(kind)
}

fn block_from_json(node: JsonNode) -> Result<Node, TreeError> {
    let kind = kind_from_json(&node)?;
    if kind.is_leaf() {
        return Ok(Node::leaf(kind));
    }

    let holds_inline = match &kind {
        NodeKind::Paragraph | NodeKind::Heading { .. } | NodeKind::CodeBlock { .. } => true,
        NodeKind::TableCell { .. } | NodeKind::Other(_) => {
            node.content.iter().any(JsonNode::is_inline_like)
        }
        _ => false,
    };

    let content = if holds_inline {
        Content::Inline(node.content.into_iter().map(inline_from_json).collect())
    } else if node.content.is_empty() && matches!(kind, NodeKind::Other(_)) {
        Content::Empty
    } else {
        Content::Blocks(blocks_from_json(node.content))
    };
    Ok(Node::new(kind, content))
}

/// Convert sibling nodes, dropping any that cannot be understood so the rest
/// of the document still loads.
fn blocks_from_json(nodes: Vec<JsonNode>) -> Vec<Node> {
    nodes
        .into_iter()
        .filter_map(|node| {
            let kind = node.kind.clone();
            block_from_json(node)
                .inspect_err(|e| warn!("Skipping `{kind}` node: {e}"))
                .ok()
        })
        .collect()
}

fn inline_from_json(node: JsonNode) -> Inline {
    let name = canonical_name(&node.kind);
    match name.as_str() {
        "text" => Inline::Text(node.text.unwrap_or_default()),
        "hard_break" => Inline::HardBreak,
        _ => {
            let attrs: Attrs = node
                .attrs
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(key, value)| match value {
                    Value::Null => None,
                    Value::String(s) => Some((key, s)),
                    other => Some((key, other.to_string())),
                })
                .collect();
            Inline::Atom(AtomicInline { kind: name, attrs })
        }
    }
}
