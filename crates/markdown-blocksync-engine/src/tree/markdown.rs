//! Markdown loader used to bootstrap a `DocTree` from file content.
//!
//! pulldown-cmark emits a flat, well-nested event stream; every `Start` pushes
//! exactly one frame and every `End` pops one, so the builder never needs to
//! inspect which tag is closing. Tight list items deliver their text without a
//! surrounding paragraph, so such text opens an *implicit* paragraph frame
//! that is closed by the next block-level event.
//!
//! Inline formatting (emphasis, links, ...) is kept as its literal markdown
//! delimiters inside text runs. Citations (`[@key]`, `[@key, locator]`),
//! annotations (`{>>note<<}`) and footnote markers become atomic inlines.

use std::sync::OnceLock;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};
use regex::Regex;

use super::{AtomicInline, Content, DocTree, Inline, Node, NodeKind};

impl DocTree {
    /// Build a tree from markdown text.
    pub fn from_markdown(markdown: &str) -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);

        let mut builder = TreeBuilder::default();
        for event in Parser::new_ext(markdown, options) {
            builder.process_event(event);
        }
        DocTree::new(builder.finish())
    }
}

enum Frame {
    Container {
        kind: NodeKind,
        children: Vec<Node>,
    },
    Text {
        kind: NodeKind,
        inlines: Vec<Inline>,
        implicit: bool,
    },
    /// Inline formatting; `close` is emitted as text when the tag ends.
    Mark {
        close: String,
    },
    Image {
        src: String,
        title: String,
        alt: String,
    },
    Footnote {
        label: String,
        children: Vec<Node>,
    },
    Html {
        text: String,
    },
}

impl Frame {
    fn container(kind: NodeKind) -> Self {
        Frame::Container {
            kind,
            children: Vec::new(),
        }
    }

    fn text(kind: NodeKind) -> Self {
        Frame::Text {
            kind,
            inlines: Vec::new(),
            implicit: false,
        }
    }

    fn is_inline(&self) -> bool {
        matches!(self, Frame::Mark { .. } | Frame::Image { .. })
    }
}

#[derive(Default)]
struct TreeBuilder {
    stack: Vec<Frame>,
    roots: Vec<Node>,
    in_table_head: bool,
}

impl TreeBuilder {
    fn process_event(&mut self, event: Event) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(_) => self.end(),
            Event::Text(text) => self.push_text(&text),
            Event::Code(code) => self.push_text(&format!("`{code}`")),
            Event::Html(html) | Event::InlineHtml(html) => self.push_text(&html),
            Event::FootnoteReference(label) => self.push_inline(Inline::Atom(
                AtomicInline::new("footnote_ref").with_attr("label", label.as_ref()),
            )),
            Event::SoftBreak => self.push_text(" "),
            Event::HardBreak => self.push_inline(Inline::HardBreak),
            Event::Rule => {
                self.close_implicit();
                self.attach(Node::leaf(NodeKind::HorizontalRule));
            }
            Event::TaskListMarker(checked) => {
                self.push_text(if checked { "[x] " } else { "[ ] " })
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag) {
        let frame = match tag {
            Tag::Paragraph => Frame::text(NodeKind::Paragraph),
            Tag::Heading { level, .. } => Frame::text(NodeKind::Heading {
                level: level as u8,
            }),
            Tag::BlockQuote(_) => Frame::container(NodeKind::Blockquote),
            Tag::CodeBlock(kind) => Frame::text(NodeKind::CodeBlock {
                language: match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().map(str::to_string)
                    }
                    CodeBlockKind::Indented => None,
                },
            }),
            Tag::HtmlBlock => Frame::Html {
                text: String::new(),
            },
            Tag::List(Some(start)) => Frame::container(NodeKind::OrderedList { start }),
            Tag::List(None) => Frame::container(NodeKind::BulletList),
            Tag::Item => Frame::container(NodeKind::ListItem),
            Tag::FootnoteDefinition(label) => Frame::Footnote {
                label: label.to_string(),
                children: Vec::new(),
            },
            Tag::Table(_) => Frame::container(NodeKind::Table),
            Tag::TableHead => {
                self.in_table_head = true;
                Frame::container(NodeKind::TableRow)
            }
            Tag::TableRow => Frame::container(NodeKind::TableRow),
            Tag::TableCell => Frame::text(NodeKind::TableCell {
                header: self.in_table_head,
            }),
            Tag::Emphasis => self.open_mark("*", "*".to_string()),
            Tag::Strong => self.open_mark("**", "**".to_string()),
            Tag::Strikethrough => self.open_mark("~~", "~~".to_string()),
            Tag::Link { dest_url, .. } => self.open_mark("[", format!("]({dest_url})")),
            Tag::Image {
                dest_url, title, ..
            } => Frame::Image {
                src: dest_url.to_string(),
                title: title.to_string(),
                alt: String::new(),
            },
            _ => Frame::Mark {
                close: String::new(),
            },
        };

        if !frame.is_inline() {
            self.close_implicit();
        }
        self.stack.push(frame);
    }

    fn open_mark(&mut self, open: &str, close: String) -> Frame {
        self.push_text(open);
        Frame::Mark { close }
    }

    fn end(&mut self) {
        self.close_implicit();
        let Some(frame) = self.stack.pop() else {
            return;
        };

        match frame {
            Frame::Container { kind, children } => {
                if kind == NodeKind::TableRow {
                    self.in_table_head = false;
                }
                self.attach(Node::container(kind, children));
            }
            Frame::Text { kind, inlines, .. } => {
                let node = finish_text(kind, inlines);
                self.attach(node);
            }
            Frame::Mark { close } => {
                if !close.is_empty() {
                    self.push_text(&close);
                }
            }
            Frame::Image { src, title, alt } => {
                let mut atom = AtomicInline::new("image")
                    .with_attr("src", src)
                    .with_attr("alt", alt);
                if !title.is_empty() {
                    atom = atom.with_attr("title", title);
                }
                self.push_inline(Inline::Atom(atom));
            }
            Frame::Footnote { label, children } => {
                for node in with_footnote_marker(&label, children) {
                    self.attach(node);
                }
            }
            Frame::Html { text } => self.attach(html_block(&text)),
        }
    }

    fn push_text(&mut self, text: &str) {
        match self.stack.last_mut() {
            Some(Frame::Image { alt, .. }) => alt.push_str(text),
            Some(Frame::Html { text: html }) => html.push_str(text),
            _ => self.push_inline(Inline::text(text)),
        }
    }

    fn push_inline(&mut self, inline: Inline) {
        match self.current_inlines() {
            Some(inlines) => match (inlines.last_mut(), inline) {
                (Some(Inline::Text(prev)), Inline::Text(next)) => prev.push_str(&next),
                (_, inline) => inlines.push(inline),
            },
            None => self.stack.push(Frame::Text {
                kind: NodeKind::Paragraph,
                inlines: vec![inline],
                implicit: true,
            }),
        }
    }

    /// Inline buffer of the innermost text frame, looking through inline marks.
    fn current_inlines(&mut self) -> Option<&mut Vec<Inline>> {
        for frame in self.stack.iter_mut().rev() {
            match frame {
                Frame::Text { inlines, .. } => return Some(inlines),
                Frame::Mark { .. } | Frame::Image { .. } => continue,
                _ => return None,
            }
        }
        None
    }

    fn close_implicit(&mut self) {
        if !matches!(self.stack.last(), Some(Frame::Text { implicit: true, .. })) {
            return;
        }
        if let Some(Frame::Text { kind, inlines, .. }) = self.stack.pop() {
            let node = finish_text(kind, inlines);
            self.attach(node);
        }
    }

    fn attach(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(Frame::Container { children, .. }) | Some(Frame::Footnote { children, .. }) => {
                children.push(node)
            }
            _ => self.roots.push(node),
        }
    }

    fn finish(mut self) -> Vec<Node> {
        while !self.stack.is_empty() {
            self.end();
        }
        self.roots
    }
}

fn finish_text(kind: NodeKind, inlines: Vec<Inline>) -> Node {
    if let NodeKind::CodeBlock { .. } = kind {
        let mut code: String = inlines
            .into_iter()
            .filter_map(|inline| match inline {
                Inline::Text(text) => Some(text),
                _ => None,
            })
            .collect();
        if code.ends_with('\n') {
            code.pop();
        }
        let runs = if code.is_empty() {
            Vec::new()
        } else {
            vec![Inline::Text(code)]
        };
        return Node::with_inline(kind, runs);
    }

    let inlines = split_atoms(inlines);

    // A paragraph holding nothing but an image is an image block.
    if kind == NodeKind::Paragraph {
        if let [Inline::Atom(atom)] = inlines.as_slice() {
            if atom.kind == "image" {
                return Node::leaf(NodeKind::Image {
                    src: atom.attr("src").unwrap_or_default().to_string(),
                    alt: atom.attr("alt").unwrap_or_default().to_string(),
                    title: atom.attr("title").map(str::to_string),
                });
            }
        }
    }

    Node::with_inline(kind, inlines)
}

fn inline_atom_regex() -> &'static Regex {
    static ATOM_REGEX: OnceLock<Regex> = OnceLock::new();
    ATOM_REGEX.get_or_init(|| {
        Regex::new(
            r"\[@(?P<key>[^\]\s,;]+)(?:,\s*(?P<locator>[^\]]+))?\]|\{>>(?P<note>.*?)<<\}",
        )
        .expect("Invalid inline atom regex")
    })
}

/// Lift citations and annotations out of text runs.
fn split_atoms(inlines: Vec<Inline>) -> Vec<Inline> {
    let regex = inline_atom_regex();
    let mut out = Vec::with_capacity(inlines.len());

    for inline in inlines {
        let Inline::Text(text) = inline else {
            out.push(inline);
            continue;
        };

        let mut last = 0;
        for caps in regex.captures_iter(&text) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                out.push(Inline::text(&text[last..whole.start()]));
            }
            let atom = match caps.name("key") {
                Some(key) => {
                    let mut atom = AtomicInline::new("citation").with_attr("key", key.as_str());
                    if let Some(locator) = caps.name("locator") {
                        atom = atom.with_attr("locator", locator.as_str().trim());
                    }
                    atom
                }
                None => AtomicInline::new("annotation").with_attr(
                    "text",
                    caps.name("note").map(|m| m.as_str()).unwrap_or_default(),
                ),
            };
            out.push(Inline::Atom(atom));
            last = whole.end();
        }
        if last < text.len() {
            out.push(Inline::text(&text[last..]));
        }
    }
    out
}

/// Footnote definitions become their content blocks, the first of which is
/// prefixed with a `footnote_def` marker.
fn with_footnote_marker(label: &str, mut children: Vec<Node>) -> Vec<Node> {
    let marker = Inline::Atom(AtomicInline::new("footnote_def").with_attr("label", label));
    match children.first_mut() {
        Some(Node {
            kind: NodeKind::Paragraph,
            content: Content::Inline(inlines),
        }) => inlines.insert(0, marker),
        _ => children.insert(0, Node::with_inline(NodeKind::Paragraph, vec![marker])),
    }
    children
}

fn section_marker_regex() -> &'static Regex {
    static SECTION_REGEX: OnceLock<Regex> = OnceLock::new();
    SECTION_REGEX.get_or_init(|| {
        Regex::new(r"^<!--\s*section:\s*(?P<title>.*?)\s*-->\s*$")
            .expect("Invalid section marker regex")
    })
}

fn html_block(html: &str) -> Node {
    let html = html.trim_end();
    match section_marker_regex().captures(html) {
        Some(caps) => Node::leaf(NodeKind::SectionMarker {
            title: caps["title"].to_string(),
        }),
        None => Node::with_inline(
            NodeKind::Other("html_block".to_string()),
            vec![Inline::text(html)],
        ),
    }
}
