//! Provisional → confirmed id bookkeeping.
//!
//! The host persists newly inserted blocks and answers with permanent ids.
//! Confirmations are either parked here until the next assignment pass picks
//! them up, or applied immediately by re-keying every structure that mentions
//! the provisional id (see `SyncEngine::rekey_snapshot`).

use std::collections::HashMap;

use super::identity::BlockId;

/// Provisional id → confirmed id.
pub type IdMapping = HashMap<BlockId, BlockId>;

/// Structures holding block ids that must follow a confirmation.
pub trait Rekey {
    fn rekey(&mut self, mapping: &IdMapping);
}

/// The new id for `id`, or `id` itself when unmapped.
pub fn rekey_id(id: &BlockId, mapping: &IdMapping) -> BlockId {
    mapping.get(id).cloned().unwrap_or_else(|| id.clone())
}

/// Confirmations received but not yet applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingConfirmations {
    pending: IdMapping,
}

impl PendingConfirmations {
    /// Park a confirmation. Returns false when the identical mapping was
    /// already pending.
    pub fn record(&mut self, provisional: BlockId, confirmed: BlockId) -> bool {
        self.pending.insert(provisional, confirmed.clone()) != Some(confirmed)
    }

    pub fn get(&self, provisional: &BlockId) -> Option<&BlockId> {
        self.pending.get(provisional)
    }

    /// Remove and return the confirmation for `provisional`.
    pub fn take(&mut self, provisional: &BlockId) -> Option<BlockId> {
        self.pending.remove(provisional)
    }

    /// Remove every pending confirmation accepted by `keep`, returning those.
    pub fn take_where(&mut self, mut keep: impl FnMut(&BlockId) -> bool) -> IdMapping {
        let (taken, rest): (IdMapping, IdMapping) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(provisional, _)| keep(provisional));
        self.pending = rest;
        taken
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
