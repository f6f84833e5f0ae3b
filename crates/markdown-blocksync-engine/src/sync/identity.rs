//! Stable block identifiers.
//!
//! Tree nodes carry no identity of their own, so ids are carried from one
//! generation to the next through a `PositionMap` (position → id). Each pass
//! walks the current top-level blocks in document order and, for each one:
//!
//! 1. keeps the id recorded at exactly its position, if still unclaimed;
//! 2. otherwise takes the nearest unclaimed id recorded within the proximity
//!    window (ties go to the lower previous position);
//! 3. otherwise mints a fresh provisional id.
//!
//! Before that walk a relocation pre-pass looks at content fingerprints: a
//! previous block whose content appears exactly once before and exactly once
//! now, at a different position, is reserved for its new position.
//! This covers splitting a paragraph at its end and deleting a block in the
//! middle, where pure position matching would hand the old id to the wrong
//! neighbour. Without fingerprints the pre-pass finds nothing.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::confirm::{IdMapping, PendingConfirmations, Rekey};

/// Prefix marking locally minted ids.
pub const DEFAULT_PROVISIONAL_PREFIX: &str = "temp-";

/// Opaque block identifier, either provisional (minted here) or confirmed
/// (issued by the host).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a provisional id; v4 UUIDs make collisions negligible.
    pub fn mint(prefix: &str) -> Self {
        Self(format!("{prefix}{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_provisional(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for BlockId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Hash of a block's externally visible content.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn of(block_type: &str, plain_text: &str, markdown_fragment: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        block_type.hash(&mut hasher);
        plain_text.hash(&mut hasher);
        markdown_fragment.hash(&mut hasher);
        Fingerprint(hasher.finish())
    }
}

/// What a position map remembers about the block at one position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedBlock {
    pub id: BlockId,
    pub fingerprint: Option<Fingerprint>,
}

/// Position → id map produced by one assignment pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PositionMap {
    entries: BTreeMap<usize, TrackedBlock>,
}

impl PositionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, position: usize, id: BlockId, fingerprint: Option<Fingerprint>) {
        self.entries
            .insert(position, TrackedBlock { id, fingerprint });
    }

    pub fn get(&self, position: usize) -> Option<&TrackedBlock> {
        self.entries.get(&position)
    }

    pub fn id_at(&self, position: usize) -> Option<&BlockId> {
        self.get(position).map(|tracked| &tracked.id)
    }

    pub fn position_of(&self, id: &BlockId) -> Option<usize> {
        self.entries
            .iter()
            .find(|(_, tracked)| &tracked.id == id)
            .map(|(position, _)| *position)
    }

    pub fn contains_id(&self, id: &BlockId) -> bool {
        self.position_of(id).is_some()
    }

    /// Entries in position order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &TrackedBlock)> {
        self.entries.iter().map(|(position, tracked)| (*position, tracked))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn window(&self, center: usize, radius: usize) -> impl Iterator<Item = (usize, &TrackedBlock)> {
        let low = center.saturating_sub(radius);
        let high = center.saturating_add(radius);
        self.entries
            .range(low..=high)
            .map(|(position, tracked)| (*position, tracked))
    }
}

impl Rekey for PositionMap {
    fn rekey(&mut self, mapping: &IdMapping) {
        for tracked in self.entries.values_mut() {
            if let Some(new_id) = mapping.get(&tracked.id) {
                tracked.id = new_id.clone();
            }
        }
    }
}

/// One block awaiting an id.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockSlot {
    pub position: usize,
    pub fingerprint: Option<Fingerprint>,
}

/// Result of one assignment pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Assignment {
    /// Ids in the same order as the slots passed in.
    pub ids: Vec<BlockId>,
    pub position_map: PositionMap,
    /// Confirmations consumed during the pass (provisional → confirmed).
    pub applied_confirmations: IdMapping,
    pub minted: usize,
}

/// Assigns ids to the current generation of blocks.
#[derive(Clone, Debug)]
pub struct IdentityTracker {
    proximity_window: usize,
    provisional_prefix: String,
}

impl IdentityTracker {
    pub fn new(proximity_window: usize, provisional_prefix: impl Into<String>) -> Self {
        Self {
            proximity_window,
            provisional_prefix: provisional_prefix.into(),
        }
    }

    pub fn provisional_prefix(&self) -> &str {
        &self.provisional_prefix
    }

    /// Assign ids to `slots` (document order) given the previous generation.
    ///
    /// Pending confirmations for inherited ids are substituted and consumed.
    pub fn assign_ids(
        &self,
        slots: &[BlockSlot],
        previous: &PositionMap,
        confirmations: &mut PendingConfirmations,
    ) -> Assignment {
        let relocations = self.find_relocations(slots, previous);
        let reserved: HashSet<usize> = relocations.values().copied().collect();

        let mut claimed: HashSet<BlockId> = HashSet::new();
        let mut assignment = Assignment::default();

        for (index, slot) in slots.iter().enumerate() {
            let inherited = match relocations.get(&index) {
                Some(&old_position) => previous
                    .get(old_position)
                    .filter(|tracked| !claimed.contains(&tracked.id))
                    .map(|tracked| tracked.id.clone()),
                None => self
                    .position_hit(slot, previous, &claimed, &reserved)
                    .or_else(|| self.nearest_unclaimed(slot, previous, &claimed, &reserved)),
            };

            let id = match inherited {
                Some(id) => {
                    claimed.insert(id.clone());
                    match confirmations.take(&id) {
                        Some(confirmed) => {
                            debug!("Applying confirmation {id} -> {confirmed}");
                            assignment
                                .applied_confirmations
                                .insert(id, confirmed.clone());
                            confirmed
                        }
                        None => id,
                    }
                }
                None => {
                    let id = BlockId::mint(&self.provisional_prefix);
                    trace!("Minted {id} for block at {}", slot.position);
                    assignment.minted += 1;
                    id
                }
            };

            claimed.insert(id.clone());
            assignment
                .position_map
                .insert(slot.position, id.clone(), slot.fingerprint);
            assignment.ids.push(id);
        }

        assignment
    }

    fn position_hit(
        &self,
        slot: &BlockSlot,
        previous: &PositionMap,
        claimed: &HashSet<BlockId>,
        reserved: &HashSet<usize>,
    ) -> Option<BlockId> {
        if reserved.contains(&slot.position) {
            return None;
        }
        previous
            .get(slot.position)
            .filter(|tracked| !claimed.contains(&tracked.id))
            .map(|tracked| tracked.id.clone())
    }

    fn nearest_unclaimed(
        &self,
        slot: &BlockSlot,
        previous: &PositionMap,
        claimed: &HashSet<BlockId>,
        reserved: &HashSet<usize>,
    ) -> Option<BlockId> {
        let found = previous
            .window(slot.position, self.proximity_window)
            .filter(|(position, tracked)| {
                !reserved.contains(position) && !claimed.contains(&tracked.id)
            })
            .min_by_key(|(position, _)| position.abs_diff(slot.position))
            .map(|(position, tracked)| (position, tracked.id.clone()));

        if let Some((position, id)) = &found {
            trace!(
                "Block at {} recovered {id} from {position} by proximity",
                slot.position
            );
        }
        found.map(|(_, id)| id)
    }

    /// Slot index → previous position whose id moved with its content.
    ///
    /// Only content that is unique on both sides can be followed; repeated
    /// fingerprints (empty paragraphs, copied lines) say nothing about which
    /// block went where.
    fn find_relocations(&self, slots: &[BlockSlot], previous: &PositionMap) -> HashMap<usize, usize> {
        let mut before: HashMap<Fingerprint, (usize, usize)> = HashMap::new();
        for (position, tracked) in previous.iter() {
            if let Some(fingerprint) = tracked.fingerprint {
                before.entry(fingerprint).or_insert((0, position)).0 += 1;
            }
        }
        let mut after: HashMap<Fingerprint, usize> = HashMap::new();
        for fingerprint in slots.iter().filter_map(|slot| slot.fingerprint) {
            *after.entry(fingerprint).or_default() += 1;
        }

        let mut relocations = HashMap::new();
        for (index, slot) in slots.iter().enumerate() {
            let Some(fingerprint) = slot.fingerprint else {
                continue;
            };
            if after.get(&fingerprint) != Some(&1) {
                continue;
            }
            let Some(&(1, old_position)) = before.get(&fingerprint) else {
                continue;
            };
            if old_position == slot.position
                || old_position.abs_diff(slot.position) > self.proximity_window
            {
                continue;
            }

            debug!(
                "Block content moved from {old_position} to {}",
                slot.position
            );
            relocations.insert(index, old_position);
        }

        relocations
    }
}

impl Default for IdentityTracker {
    fn default() -> Self {
        Self::new(500, DEFAULT_PROVISIONAL_PREFIX)
    }
}
