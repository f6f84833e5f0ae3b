//! Read-only model of the host editor's document tree.
//!
//! The editing framework owns the real document; the engine only ever sees a
//! `DocTree` value describing it at one instant. Positions and sizes follow
//! ProseMirror's counting rules so that values computed here line up with the
//! offsets the host reports:
//!
//! - a text run counts its UTF-16 length
//! - a leaf node (image, rule, atomic inline, hard break) counts 1
//! - any other node counts its content plus 2 (opening and closing token)
//!
//! Trees can be built directly, loaded from the host's JSON (`json`), or
//! loaded from markdown (`markdown`).

mod json;
mod markdown;

use std::collections::BTreeMap;

/// Attribute bag carried by atomic inline elements.
pub type Attrs = BTreeMap<String, String>;

/// Node type tag with the attributes the engine cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Paragraph,
    Heading { level: u8 },
    BulletList,
    OrderedList { start: u64 },
    ListItem,
    Blockquote,
    CodeBlock { language: Option<String> },
    HorizontalRule,
    Table,
    TableRow,
    TableCell { header: bool },
    Image {
        src: String,
        alt: String,
        title: Option<String>,
    },
    /// Custom section divider inserted by the host.
    SectionMarker { title: String },
    /// Anything the engine has no dedicated handling for.
    Other(String),
}

impl NodeKind {
    /// Canonical type name reported to the host as `blockType`.
    pub fn name(&self) -> &str {
        match self {
            NodeKind::Paragraph => "paragraph",
            NodeKind::Heading { .. } => "heading",
            NodeKind::BulletList => "bullet_list",
            NodeKind::OrderedList { .. } => "ordered_list",
            NodeKind::ListItem => "list_item",
            NodeKind::Blockquote => "blockquote",
            NodeKind::CodeBlock { .. } => "code_block",
            NodeKind::HorizontalRule => "horizontal_rule",
            NodeKind::Table => "table",
            NodeKind::TableRow => "table_row",
            NodeKind::TableCell { .. } => "table_cell",
            NodeKind::Image { .. } => "image",
            NodeKind::SectionMarker { .. } => "section_marker",
            NodeKind::Other(name) => name,
        }
    }

    /// Leaf nodes have no content and a size of exactly 1.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            NodeKind::HorizontalRule | NodeKind::Image { .. } | NodeKind::SectionMarker { .. }
        )
    }

    pub fn heading_level(&self) -> Option<u8> {
        match self {
            NodeKind::Heading { level } => Some(*level),
            _ => None,
        }
    }
}

/// A non-text inline element (citation, annotation, footnote marker, ...).
///
/// `kind` is an open string so new element kinds can appear without touching
/// the tree model; rendering is looked up by kind in a `RendererRegistry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicInline {
    pub kind: String,
    pub attrs: Attrs,
}

impl AtomicInline {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attrs: Attrs::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }
}

/// One child of a text-bearing block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    HardBreak,
    Atom(AtomicInline),
}

impl Inline {
    pub fn text(text: impl Into<String>) -> Self {
        Inline::Text(text.into())
    }

    fn size(&self) -> usize {
        match self {
            Inline::Text(text) => text.encode_utf16().count(),
            Inline::HardBreak | Inline::Atom(_) => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Content {
    #[default]
    Empty,
    Inline(Vec<Inline>),
    Blocks(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub content: Content,
}

impl Node {
    pub fn new(kind: NodeKind, content: Content) -> Self {
        Self { kind, content }
    }

    pub fn leaf(kind: NodeKind) -> Self {
        Self::new(kind, Content::Empty)
    }

    pub fn with_inline(kind: NodeKind, inlines: Vec<Inline>) -> Self {
        Self::new(kind, Content::Inline(inlines))
    }

    pub fn container(kind: NodeKind, children: Vec<Node>) -> Self {
        Self::new(kind, Content::Blocks(children))
    }

    /// Paragraph holding a single text run (no run at all when `text` is empty).
    pub fn paragraph(text: &str) -> Self {
        Self::with_inline(NodeKind::Paragraph, text_runs(text))
    }

    pub fn heading(level: u8, text: &str) -> Self {
        Self::with_inline(NodeKind::Heading { level }, text_runs(text))
    }

    /// ProseMirror node size.
    pub fn size(&self) -> usize {
        if self.kind.is_leaf() {
            return 1;
        }
        let content = match &self.content {
            Content::Empty => 0,
            Content::Inline(inlines) => inlines.iter().map(Inline::size).sum(),
            Content::Blocks(children) => children.iter().map(Node::size).sum(),
        };
        content + 2
    }

    /// Concatenated text runs, depth first.
    ///
    /// Atomic inline elements contribute nothing here, which is exactly why
    /// records also carry the serialized markdown fragment.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match &self.content {
            Content::Empty => {}
            Content::Inline(inlines) => {
                for inline in inlines {
                    match inline {
                        Inline::Text(text) => out.push_str(text),
                        Inline::HardBreak => out.push('\n'),
                        Inline::Atom(_) => {}
                    }
                }
            }
            Content::Blocks(children) => {
                for child in children {
                    child.collect_text(out);
                }
            }
        }
    }
}

fn text_runs(text: &str) -> Vec<Inline> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![Inline::text(text)]
    }
}

/// A top-level node together with where the host says it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedNode {
    pub position: usize,
    pub size: usize,
    pub node: Node,
}

/// Snapshot of the host document's top-level structure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocTree {
    nodes: Vec<PositionedNode>,
    content_size: usize,
}

impl DocTree {
    /// Lay the given top-level nodes out back to back, computing positions.
    pub fn new(nodes: Vec<Node>) -> Self {
        let mut position = 0;
        let nodes = nodes
            .into_iter()
            .map(|node| {
                let size = node.size();
                let positioned = PositionedNode {
                    position,
                    size,
                    node,
                };
                position += size;
                positioned
            })
            .collect();

        Self {
            nodes,
            content_size: position,
        }
    }

    /// Trust host-computed positions verbatim.
    ///
    /// Nothing is validated here; nodes whose positions turn out to be
    /// inconsistent are skipped when a snapshot is taken.
    pub fn from_positioned(nodes: Vec<PositionedNode>, content_size: usize) -> Self {
        Self {
            nodes,
            content_size,
        }
    }

    pub fn nodes(&self) -> &[PositionedNode] {
        &self.nodes
    }

    /// Size of the document's content (positions run from 0 to this value).
    pub fn content_size(&self) -> usize {
        self.content_size
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
