use crate::tree::NodeKind;

/// Whether a top-level node of this kind gets a stable id and change tracking.
///
/// List items, table rows and cells are tracked through their parent
/// container; anything unrecognised (raw html, host-specific nodes) is not
/// tracked at all.
pub fn is_block(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Paragraph
            | NodeKind::Heading { .. }
            | NodeKind::BulletList
            | NodeKind::OrderedList { .. }
            | NodeKind::Blockquote
            | NodeKind::CodeBlock { .. }
            | NodeKind::HorizontalRule
            | NodeKind::Table
            | NodeKind::Image { .. }
            | NodeKind::SectionMarker { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(NodeKind::Paragraph, true)]
    #[case(NodeKind::Heading { level: 3 }, true)]
    #[case(NodeKind::BulletList, true)]
    #[case(NodeKind::OrderedList { start: 1 }, true)]
    #[case(NodeKind::Blockquote, true)]
    #[case(NodeKind::CodeBlock { language: None }, true)]
    #[case(NodeKind::HorizontalRule, true)]
    #[case(NodeKind::Table, true)]
    #[case(NodeKind::SectionMarker { title: "Intro".to_string() }, true)]
    #[case(NodeKind::ListItem, false)]
    #[case(NodeKind::TableRow, false)]
    #[case(NodeKind::TableCell { header: true }, false)]
    #[case(NodeKind::Other("html_block".to_string()), false)]
    fn test_block_classification(#[case] kind: NodeKind, #[case] expected: bool) {
        assert_eq!(is_block(&kind), expected, "{kind:?}");
    }

    #[test]
    fn test_images_are_blocks() {
        let kind = NodeKind::Image {
            src: "a.png".to_string(),
            alt: String::new(),
            title: None,
        };
        assert!(is_block(&kind));
    }
}
