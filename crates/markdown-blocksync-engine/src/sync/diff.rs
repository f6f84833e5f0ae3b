//! Snapshot diffing and the buffer of changes awaiting the host.

use std::collections::HashMap;

use log::debug;
use serde::Serialize;

use super::confirm::{IdMapping, Rekey, rekey_id};
use super::identity::BlockId;
use super::snapshot::{BlockRecord, Snapshot};

/// A newly created block and the block it follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertRecord {
    #[serde(flatten)]
    pub record: BlockRecord,
    /// `None` when the block is first in the document.
    pub after_block_id: Option<BlockId>,
}

/// Deltas delivered to the host in one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub updates: Vec<BlockRecord>,
    pub inserts: Vec<InsertRecord>,
    pub deletes: Vec<BlockId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty() && self.deletes.is_empty()
    }

    /// JSON form with camelCase field names, for WebView bridges.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Compare a burst baseline against the latest snapshot.
///
/// New ids only count as inserts while provisional; a confirmed id the
/// baseline doesn't know about is something the host already has.
pub fn diff_snapshots(before: &Snapshot, after: &Snapshot, provisional_prefix: &str) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for id in before.ids() {
        if !after.contains(id) {
            changes.deletes.push(id.clone());
        }
    }

    for record in after.iter() {
        match before.get(&record.id) {
            Some(old) if old.content_differs(record) => changes.updates.push(record.clone()),
            Some(_) => {}
            None if record.id.is_provisional(provisional_prefix) => {
                changes.inserts.push(InsertRecord {
                    record: record.clone(),
                    after_block_id: after.preceding(&record.id).cloned(),
                });
            }
            None => debug!("Not reporting confirmed block {} as an insert", record.id),
        }
    }

    changes
}

/// Changes accumulated since the last drain.
///
/// Successive diffs are merged so the host sees each block at most once:
/// deleting a block that was never delivered cancels its insert, and updates
/// to an undelivered insert are folded into it. Records always reflect the
/// most recent snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChanges {
    updates: Vec<BlockRecord>,
    inserts: Vec<InsertRecord>,
    deletes: Vec<BlockId>,
}

impl PendingChanges {
    pub fn absorb(&mut self, diff: ChangeSet, latest: &Snapshot) {
        for id in diff.deletes {
            if let Some(index) = self.inserts.iter().position(|i| i.record.id == id) {
                self.inserts.remove(index);
                continue;
            }
            self.updates.retain(|record| record.id != id);
            if !self.deletes.contains(&id) {
                self.deletes.push(id);
            }
        }

        for record in diff.updates {
            if let Some(insert) = self.inserts.iter_mut().find(|i| i.record.id == record.id) {
                insert.record = record;
            } else if let Some(existing) = self.updates.iter_mut().find(|r| r.id == record.id) {
                *existing = record;
            } else {
                self.updates.push(record);
            }
        }

        for insert in diff.inserts {
            match self
                .inserts
                .iter_mut()
                .find(|i| i.record.id == insert.record.id)
            {
                Some(existing) => *existing = insert,
                None => self.inserts.push(insert),
            }
        }

        self.refresh(latest);
    }

    /// Bring every buffered record and anchor in line with `latest`.
    fn refresh(&mut self, latest: &Snapshot) {
        for record in &mut self.updates {
            if let Some(current) = latest.get(&record.id) {
                *record = current.clone();
            }
        }
        for insert in &mut self.inserts {
            if let Some(current) = latest.get(&insert.record.id) {
                insert.record = current.clone();
            }
            insert.after_block_id = latest.preceding(&insert.record.id).cloned();
        }

        let order: HashMap<&BlockId, usize> = latest
            .ids()
            .iter()
            .enumerate()
            .map(|(index, id)| (id, index))
            .collect();
        let rank = |id: &BlockId| order.get(id).copied().unwrap_or(usize::MAX);
        self.updates.sort_by_key(|record| rank(&record.id));
        self.inserts.sort_by_key(|insert| rank(&insert.record.id));
    }

    /// Hand over everything buffered, leaving the buffer empty.
    pub fn take(&mut self) -> ChangeSet {
        let taken = std::mem::take(self);
        ChangeSet {
            updates: taken.updates,
            inserts: taken.inserts,
            deletes: taken.deletes,
        }
    }

    /// Copy of everything buffered; the buffer is left as is.
    pub fn peek(&self) -> ChangeSet {
        ChangeSet {
            updates: self.updates.clone(),
            inserts: self.inserts.clone(),
            deletes: self.deletes.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty() && self.deletes.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl Rekey for PendingChanges {
    fn rekey(&mut self, mapping: &IdMapping) {
        // The host created these blocks itself when it confirmed them.
        self.inserts
            .retain(|insert| !mapping.contains_key(&insert.record.id));
        for insert in &mut self.inserts {
            insert.after_block_id = insert
                .after_block_id
                .as_ref()
                .map(|anchor| rekey_id(anchor, mapping));
        }
        for record in &mut self.updates {
            record.id = rekey_id(&record.id, mapping);
        }
        for id in &mut self.deletes {
            *id = rekey_id(id, mapping);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::identity::DEFAULT_PROVISIONAL_PREFIX;
    use pretty_assertions::assert_eq;

    fn record(id: &str, position: usize, text: &str) -> BlockRecord {
        BlockRecord {
            id: id.into(),
            position,
            block_type: "paragraph".to_string(),
            plain_text: text.to_string(),
            markdown_fragment: text.to_string(),
            heading_level: None,
            tree_size: text.len() + 2,
        }
    }

    fn snapshot(records: &[(&str, &str)]) -> Snapshot {
        let mut position = 0;
        let mut built = Vec::new();
        for (id, text) in records {
            let record = record(id, position, text);
            position += record.tree_size;
            built.push(record);
        }
        Snapshot::from_records(built)
    }

    fn diff(before: &Snapshot, after: &Snapshot) -> ChangeSet {
        diff_snapshots(before, after, DEFAULT_PROVISIONAL_PREFIX)
    }

    fn update_ids(changes: &ChangeSet) -> Vec<&str> {
        changes.updates.iter().map(|r| r.id.as_str()).collect()
    }

    fn insert_ids(changes: &ChangeSet) -> Vec<&str> {
        changes.inserts.iter().map(|i| i.record.id.as_str()).collect()
    }

    #[test]
    fn test_identical_snapshots_produce_nothing() {
        let before = snapshot(&[("a1", "Hello"), ("a2", "World")]);
        assert!(diff(&before, &before.clone()).is_empty());
    }

    #[test]
    fn test_diff_classifies_changes() {
        let before = snapshot(&[("a1", "Hello"), ("a2", "World"), ("a3", "Gone")]);
        let after = snapshot(&[("a1", "Hello"), ("temp-1", ""), ("a2", "World!")]);
        let changes = diff(&before, &after);

        assert_eq!(update_ids(&changes), vec!["a2"]);
        assert_eq!(insert_ids(&changes), vec!["temp-1"]);
        assert_eq!(changes.inserts[0].after_block_id, Some("a1".into()));
        assert_eq!(changes.deletes, vec![BlockId::from("a3")]);
    }

    #[test]
    fn test_position_shift_alone_is_not_an_update() {
        let before = snapshot(&[("a1", "Hi"), ("a2", "World")]);
        let after = snapshot(&[("a1", "Hi there"), ("a2", "World")]);

        assert_eq!(update_ids(&diff(&before, &after)), vec!["a1"]);
    }

    #[test]
    fn test_first_block_insert_has_no_anchor() {
        let before = snapshot(&[("a1", "Hello")]);
        let after = snapshot(&[("temp-1", "New"), ("a1", "Hello")]);
        let changes = diff(&before, &after);

        assert_eq!(changes.inserts[0].after_block_id, None);
    }

    #[test]
    fn test_new_confirmed_id_is_not_an_insert() {
        let before = snapshot(&[]);
        let after = snapshot(&[("block-42", "Hello")]);

        assert!(diff(&before, &after).is_empty());
    }

    #[test]
    fn test_delete_cancels_undelivered_insert() {
        let mut pending = PendingChanges::default();
        let base = snapshot(&[("a1", "Hello")]);
        let with_new = snapshot(&[("a1", "Hello"), ("temp-1", "x")]);
        pending.absorb(diff(&base, &with_new), &with_new);
        pending.absorb(diff(&with_new, &base), &base);

        assert!(pending.is_empty());
    }

    #[test]
    fn test_delete_supersedes_update() {
        let mut pending = PendingChanges::default();
        let base = snapshot(&[("a1", "Hello"), ("a2", "World")]);
        let edited = snapshot(&[("a1", "Hello"), ("a2", "World!")]);
        let removed = snapshot(&[("a1", "Hello")]);
        pending.absorb(diff(&base, &edited), &edited);
        pending.absorb(diff(&edited, &removed), &removed);

        let changes = pending.take();
        assert!(changes.updates.is_empty());
        assert_eq!(changes.deletes, vec![BlockId::from("a2")]);
    }

    #[test]
    fn test_update_folds_into_pending_insert() {
        let mut pending = PendingChanges::default();
        let base = snapshot(&[("a1", "Hello")]);
        let inserted = snapshot(&[("a1", "Hello"), ("temp-1", "")]);
        let typed = snapshot(&[("a1", "Hello"), ("temp-1", "Typed")]);
        pending.absorb(diff(&base, &inserted), &inserted);
        pending.absorb(diff(&inserted, &typed), &typed);

        let changes = pending.take();
        assert!(changes.updates.is_empty());
        assert_eq!(changes.inserts.len(), 1);
        assert_eq!(changes.inserts[0].record.plain_text, "Typed");
    }

    #[test]
    fn test_anchor_follows_latest_order() {
        let mut pending = PendingChanges::default();
        let base = snapshot(&[("a1", "Hello"), ("a2", "World")]);
        let inserted = snapshot(&[("a1", "Hello"), ("a2", "World"), ("temp-1", "x")]);
        pending.absorb(diff(&base, &inserted), &inserted);

        // a2 is removed in a later burst; temp-1 now follows a1
        let removed = snapshot(&[("a1", "Hello"), ("temp-1", "x")]);
        pending.absorb(diff(&inserted, &removed), &removed);

        let changes = pending.take();
        assert_eq!(changes.inserts[0].after_block_id, Some("a1".into()));
        assert_eq!(changes.deletes, vec![BlockId::from("a2")]);
    }

    #[test]
    fn test_take_empties_buffer() {
        let mut pending = PendingChanges::default();
        let base = snapshot(&[("a1", "Hello")]);
        let edited = snapshot(&[("a1", "Hello!")]);
        pending.absorb(diff(&base, &edited), &edited);

        assert_eq!(update_ids(&pending.take()), vec!["a1"]);
        assert!(pending.take().is_empty());
    }

    #[test]
    fn test_peek_leaves_buffer_intact() {
        let mut pending = PendingChanges::default();
        let base = snapshot(&[("a1", "Hello")]);
        let edited = snapshot(&[("a1", "Hello!")]);
        pending.absorb(diff(&base, &edited), &edited);

        assert_eq!(update_ids(&pending.peek()), vec!["a1"]);
        assert_eq!(update_ids(&pending.take()), vec!["a1"]);
    }

    #[test]
    fn test_rekey_drops_confirmed_inserts() {
        let mut pending = PendingChanges::default();
        let base = snapshot(&[("a1", "Hello")]);
        let next = snapshot(&[("a1", "Hello"), ("temp-1", "x"), ("temp-2", "y")]);
        pending.absorb(diff(&base, &next), &next);

        pending.rekey(&IdMapping::from([(
            BlockId::from("temp-1"),
            BlockId::from("block-1"),
        )]));

        let changes = pending.take();
        assert_eq!(insert_ids(&changes), vec!["temp-2"]);
        assert_eq!(changes.inserts[0].after_block_id, Some("block-1".into()));
    }

    #[test]
    fn test_change_set_json_shape() {
        let changes = ChangeSet {
            updates: vec![],
            inserts: vec![InsertRecord {
                record: record("temp-1", 7, "x"),
                after_block_id: Some("a1".into()),
            }],
            deletes: vec!["a3".into()],
        };
        let json: serde_json::Value =
            serde_json::from_str(&changes.to_json().expect("serializes")).expect("valid json");

        assert_eq!(json["inserts"][0]["id"], "temp-1");
        assert_eq!(json["inserts"][0]["afterBlockId"], "a1");
        assert_eq!(json["inserts"][0]["plainText"], "x");
        assert_eq!(json["inserts"][0]["treeSize"], 3);
        assert!(json["inserts"][0].get("headingLevel").is_none());
        assert_eq!(json["deletes"][0], "a3");
    }
}
