// Benchmark helper functions - Rust's dead code analysis doesn't understand
// that these are used by benchmark files in the same directory
// See: https://users.rust-lang.org/t/cargo-rustc-benches-awarnings/110111/2
use markdown_blocksync_engine::{AtomicInline, DocTree, Inline, Node, NodeKind};

#[allow(dead_code)]
pub fn generate_document(blocks: usize) -> DocTree {
    DocTree::new((0..blocks).map(generate_block).collect())
}

/// Same document with one block in the middle edited.
#[allow(dead_code)]
pub fn generate_edited_document(blocks: usize) -> DocTree {
    let middle = blocks / 2;
    DocTree::new(
        (0..blocks)
            .map(|index| {
                if index == middle {
                    Node::paragraph("Edited paragraph with noticeably longer content than before.")
                } else {
                    generate_block(index)
                }
            })
            .collect(),
    )
}

#[allow(dead_code)]
fn generate_block(index: usize) -> Node {
    match index % 4 {
        0 => Node::heading(2, &format!("Section {index}")),
        1 => Node::with_inline(
            NodeKind::Paragraph,
            vec![
                Inline::text("Paragraph citing "),
                Inline::Atom(AtomicInline::new("citation").with_attr("key", format!("ref{index}"))),
                Inline::text(" with some content."),
            ],
        ),
        2 => Node::container(
            NodeKind::BulletList,
            vec![
                Node::container(NodeKind::ListItem, vec![Node::paragraph("Bullet point")]),
                Node::container(NodeKind::ListItem, vec![Node::paragraph("Another item")]),
            ],
        ),
        _ => Node::paragraph(&format!("Plain paragraph number {index}.")),
    }
}
