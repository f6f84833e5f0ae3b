//! Block → canonical markdown fragment.
//!
//! Generic text flattening loses atomic inline elements entirely (a citation
//! has no text content), so each atom kind is rendered through a
//! `RendererRegistry`. Subsystems owning an atom kind register their renderer
//! under that kind; the traversal here never needs to change for new kinds.

use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::tree::{AtomicInline, Content, Inline, Node, NodeKind};

/// Renders one kind of atomic inline element to its canonical text form.
pub trait InlineRenderer: Send + Sync {
    fn render(&self, atom: &AtomicInline) -> String;
}

impl<F> InlineRenderer for F
where
    F: Fn(&AtomicInline) -> String + Send + Sync,
{
    fn render(&self, atom: &AtomicInline) -> String {
        self(atom)
    }
}

/// Dispatch table from atom kind to renderer.
pub struct RendererRegistry {
    renderers: HashMap<String, Box<dyn InlineRenderer>>,
}

impl RendererRegistry {
    /// Registry without any renderers; every atom uses the fallback.
    pub fn empty() -> Self {
        Self {
            renderers: HashMap::new(),
        }
    }

    /// Registry preloaded with citation, annotation, footnote and image renderers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("citation", render_citation);
        registry.register("annotation", render_annotation);
        registry.register("footnote_ref", render_footnote_ref);
        registry.register("footnote_def", render_footnote_def);
        registry.register("image", render_inline_image);
        registry
    }

    /// Add or replace the renderer for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, renderer: impl InlineRenderer + 'static) {
        self.renderers.insert(kind.into(), Box::new(renderer));
    }

    pub fn handles(&self, kind: &str) -> bool {
        self.renderers.contains_key(kind)
    }

    /// Render an atom; kinds without a renderer fall back to their `text`
    /// attribute, or nothing.
    pub fn render(&self, atom: &AtomicInline) -> String {
        match self.renderers.get(&atom.kind) {
            Some(renderer) => renderer.render(atom),
            None => {
                debug!("No renderer for inline atom kind '{}'", atom.kind);
                atom.attr("text").unwrap_or_default().to_string()
            }
        }
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.renderers.keys().collect();
        kinds.sort();
        f.debug_struct("RendererRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

fn render_citation(atom: &AtomicInline) -> String {
    let key = atom.attr("key").or(atom.attr("id")).unwrap_or_default();
    match atom.attr("locator").filter(|l| !l.is_empty()) {
        Some(locator) => format!("[@{key}, {locator}]"),
        None => format!("[@{key}]"),
    }
}

fn render_annotation(atom: &AtomicInline) -> String {
    format!("{{>>{}<<}}", atom.attr("text").unwrap_or_default())
}

fn footnote_label(atom: &AtomicInline) -> &str {
    atom.attr("label").or(atom.attr("id")).unwrap_or_default()
}

fn render_footnote_ref(atom: &AtomicInline) -> String {
    format!("[^{}]", footnote_label(atom))
}

fn render_footnote_def(atom: &AtomicInline) -> String {
    format!("[^{}]: ", footnote_label(atom))
}

fn render_inline_image(atom: &AtomicInline) -> String {
    image_markdown(
        atom.attr("src").unwrap_or_default(),
        atom.attr("alt").unwrap_or_default(),
        atom.attr("title"),
    )
}

fn image_markdown(src: &str, alt: &str, title: Option<&str>) -> String {
    match title {
        Some(title) => format!("![{alt}]({src} \"{title}\")"),
        None => format!("![{alt}]({src})"),
    }
}

/// Serializes blocks into the `markdownFragment` reported to the host.
#[derive(Debug, Default)]
pub struct FragmentSerializer {
    registry: RendererRegistry,
}

impl FragmentSerializer {
    pub fn new(registry: RendererRegistry) -> Self {
        Self { registry }
    }

    pub fn registry_mut(&mut self) -> &mut RendererRegistry {
        &mut self.registry
    }

    pub fn serialize_block(&self, node: &Node) -> String {
        match &node.kind {
            NodeKind::Paragraph | NodeKind::TableCell { .. } => self.inline_content(node),
            NodeKind::Heading { level } => {
                format!("{} {}", "#".repeat(*level as usize), self.inline_content(node))
            }
            NodeKind::CodeBlock { language } => format!(
                "```{}\n{}\n```",
                language.as_deref().unwrap_or_default(),
                node.plain_text()
            ),
            NodeKind::Blockquote => {
                let body = self.children(node).join("\n\n");
                prefix_lines(&body)
            }
            NodeKind::BulletList => self
                .child_nodes(node)
                .iter()
                .map(|item| self.list_item(item, "- "))
                .collect::<Vec<_>>()
                .join("\n"),
            NodeKind::OrderedList { start } => self
                .child_nodes(node)
                .iter()
                .enumerate()
                .map(|(i, item)| self.list_item(item, &format!("{}. ", start + i as u64)))
                .collect::<Vec<_>>()
                .join("\n"),
            NodeKind::ListItem => self.list_item(node, "- "),
            NodeKind::HorizontalRule => "---".to_string(),
            NodeKind::Table => self.table(node),
            NodeKind::TableRow => self.table_row(node),
            NodeKind::Image { src, alt, title } => image_markdown(src, alt, title.as_deref()),
            NodeKind::SectionMarker { title } => format!("<!-- section: {title} -->"),
            NodeKind::Other(_) => match &node.content {
                Content::Empty => String::new(),
                Content::Inline(inlines) => self.serialize_inline(inlines),
                Content::Blocks(_) => self.children(node).join("\n\n"),
            },
        }
    }

    fn serialize_inline(&self, inlines: &[Inline]) -> String {
        let mut out = String::new();
        for inline in inlines {
            match inline {
                Inline::Text(text) => out.push_str(text),
                Inline::HardBreak => out.push_str("  \n"),
                Inline::Atom(atom) => out.push_str(&self.registry.render(atom)),
            }
        }
        out
    }

    /// Inline content of a text block, or its child blocks on one line.
    fn inline_content(&self, node: &Node) -> String {
        match &node.content {
            Content::Inline(inlines) => self.serialize_inline(inlines),
            Content::Blocks(_) => self.children(node).join(" "),
            Content::Empty => String::new(),
        }
    }

    fn child_nodes<'n>(&self, node: &'n Node) -> &'n [Node] {
        match &node.content {
            Content::Blocks(children) => children,
            _ => &[],
        }
    }

    fn children(&self, node: &Node) -> Vec<String> {
        self.child_nodes(node)
            .iter()
            .map(|child| self.serialize_block(child))
            .collect()
    }

    fn list_item(&self, item: &Node, marker: &str) -> String {
        let body = match &item.content {
            Content::Blocks(_) => self.children(item).join("\n"),
            Content::Inline(inlines) => self.serialize_inline(inlines),
            Content::Empty => String::new(),
        };
        if body.is_empty() {
            return marker.trim_end().to_string();
        }

        let indent = " ".repeat(marker.len());
        let mut out = String::new();
        for (i, line) in body.lines().enumerate() {
            if i == 0 {
                out.push_str(marker);
                out.push_str(line);
                continue;
            }
            out.push('\n');
            if !line.is_empty() {
                out.push_str(&indent);
                out.push_str(line);
            }
        }
        out
    }

    fn table(&self, node: &Node) -> String {
        let rows = self.child_nodes(node);
        let mut lines = Vec::with_capacity(rows.len() + 1);
        for (i, row) in rows.iter().enumerate() {
            lines.push(self.table_row(row));
            if i == 0 && is_header_row(row) {
                let columns = self.child_nodes(row).len().max(1);
                lines.push(format!("| {} |", vec!["---"; columns].join(" | ")));
            }
        }
        lines.join("\n")
    }

    fn table_row(&self, row: &Node) -> String {
        let cells: Vec<String> = self
            .child_nodes(row)
            .iter()
            .map(|cell| self.inline_content(cell).replace('|', "\\|"))
            .collect();
        format!("| {} |", cells.join(" | "))
    }
}

fn is_header_row(row: &Node) -> bool {
    match &row.content {
        Content::Blocks(cells) => cells
            .first()
            .is_some_and(|cell| cell.kind == NodeKind::TableCell { header: true }),
        _ => false,
    }
}

fn prefix_lines(body: &str) -> String {
    if body.is_empty() {
        return ">".to_string();
    }
    body.lines()
        .map(|line| {
            if line.is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
