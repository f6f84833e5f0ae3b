use std::collections::HashMap;

use log::warn;
use serde::Serialize;

use super::classify::is_block;
use super::confirm::{IdMapping, rekey_id};
use super::identity::{BlockId, BlockSlot, Fingerprint};
use super::serialize::FragmentSerializer;
use crate::tree::{DocTree, PositionedNode};

/// Everything the host learns about one block.
///
/// `tree_size` and `markdown_fragment` catch changes that leave the plain
/// text untouched, such as a citation's key being edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub id: BlockId,
    pub position: usize,
    pub block_type: String,
    pub plain_text: String,
    pub markdown_fragment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_level: Option<u8>,
    pub tree_size: usize,
}

impl BlockRecord {
    /// True when the host-visible content differs (position alone does not count).
    pub fn content_differs(&self, other: &BlockRecord) -> bool {
        self.plain_text != other.plain_text
            || self.tree_size != other.tree_size
            || self.markdown_fragment != other.markdown_fragment
            || self.heading_level != other.heading_level
    }
}

/// Immutable id → record map for one instant, plus document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    records: HashMap<BlockId, BlockRecord>,
    order: Vec<BlockId>,
}

impl Snapshot {
    /// Build from records already in document order.
    pub fn from_records(records: Vec<BlockRecord>) -> Self {
        let order = records.iter().map(|record| record.id.clone()).collect();
        let records = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self { records, order }
    }

    pub fn get(&self, id: &BlockId) -> Option<&BlockRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.records.contains_key(id)
    }

    /// Ids in document order.
    pub fn ids(&self) -> &[BlockId] {
        &self.order
    }

    /// Records in document order.
    pub fn iter(&self) -> impl Iterator<Item = &BlockRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Index of `id` in document order.
    pub fn index_of(&self, id: &BlockId) -> Option<usize> {
        self.order.iter().position(|candidate| candidate == id)
    }

    /// The block immediately before `id`, if any.
    pub fn preceding(&self, id: &BlockId) -> Option<&BlockId> {
        match self.index_of(id)? {
            0 => None,
            index => self.order.get(index - 1),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Copy of this snapshot with ids replaced according to `mapping`.
    pub fn rekeyed(&self, mapping: &IdMapping) -> Snapshot {
        Snapshot::from_records(
            self.iter()
                .map(|record| BlockRecord {
                    id: rekey_id(&record.id, mapping),
                    ..record.clone()
                })
                .collect(),
        )
    }
}

/// A block found in the tree, measured but not yet identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScannedBlock {
    pub position: usize,
    pub tree_size: usize,
    pub block_type: String,
    pub plain_text: String,
    pub markdown_fragment: String,
    pub heading_level: Option<u8>,
}

impl ScannedBlock {
    pub fn slot(&self) -> BlockSlot {
        BlockSlot {
            position: self.position,
            fingerprint: Some(Fingerprint::of(
                &self.block_type,
                &self.plain_text,
                &self.markdown_fragment,
            )),
        }
    }

    pub fn into_record(self, id: BlockId) -> BlockRecord {
        BlockRecord {
            id,
            position: self.position,
            block_type: self.block_type,
            plain_text: self.plain_text,
            markdown_fragment: self.markdown_fragment,
            heading_level: self.heading_level,
            tree_size: self.tree_size,
        }
    }
}

/// Measure every top-level block, skipping nodes whose reported position is
/// inconsistent with the rest of the tree.
pub(crate) fn scan_blocks(tree: &DocTree, serializer: &FragmentSerializer) -> Vec<ScannedBlock> {
    let mut blocks = Vec::with_capacity(tree.len());
    let mut previous_end = 0;

    for positioned in tree.nodes() {
        if let Err(reason) = check_position(positioned, previous_end, tree.content_size()) {
            if is_block(&positioned.node.kind) {
                warn!(
                    "Skipping {} block at {}: {reason}",
                    positioned.node.kind.name(),
                    positioned.position
                );
            }
            continue;
        }
        previous_end = positioned.position + positioned.size;

        if !is_block(&positioned.node.kind) {
            continue;
        }

        let node = &positioned.node;
        blocks.push(ScannedBlock {
            position: positioned.position,
            tree_size: positioned.size,
            block_type: node.kind.name().to_string(),
            plain_text: node.plain_text(),
            markdown_fragment: serializer.serialize_block(node),
            heading_level: node.kind.heading_level(),
        });
    }

    blocks
}

fn check_position(
    positioned: &PositionedNode,
    previous_end: usize,
    content_size: usize,
) -> Result<(), String> {
    if positioned.size == 0 {
        return Err("node has zero size".to_string());
    }
    if positioned.position < previous_end {
        return Err(format!("overlaps previous node ending at {previous_end}"));
    }
    match positioned.position.checked_add(positioned.size) {
        Some(end) if end <= content_size => Ok(()),
        _ => Err(format!("extends beyond document end {content_size}")),
    }
}
