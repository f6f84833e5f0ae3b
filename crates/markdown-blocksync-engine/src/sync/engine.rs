//! The change detector: ties identity tracking, snapshots, debouncing and
//! confirmations together behind one struct per editor instance.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};

use super::confirm::{IdMapping, PendingConfirmations, Rekey};
use super::debounce::{Clock, DiffTimer, SystemClock};
use super::diff::{ChangeSet, PendingChanges, diff_snapshots};
use super::identity::{BlockId, DEFAULT_PROVISIONAL_PREFIX, IdentityTracker, PositionMap};
use super::serialize::{FragmentSerializer, InlineRenderer};
use super::snapshot::{Snapshot, scan_blocks};
use crate::tree::DocTree;

/// Tunables for one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Largest distance, in position units, across which an id follows its block.
    pub proximity_window: usize,
    /// Quiet period after the last mutation before a burst is diffed.
    pub debounce: Duration,
    pub provisional_prefix: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            proximity_window: 500,
            debounce: Duration::from_millis(100),
            provisional_prefix: DEFAULT_PROVISIONAL_PREFIX.to_string(),
        }
    }
}

/// Block identity and change tracking for one document.
///
/// Every mutation is snapshotted immediately so ids stay current; only the
/// diff against the host's view is debounced. Changes accumulate until the
/// host drains them.
pub struct SyncEngine {
    tracker: IdentityTracker,
    debounce: Duration,
    serializer: FragmentSerializer,
    clock: Arc<dyn Clock>,
    baseline: Arc<Snapshot>,
    position_map: PositionMap,
    timer: Option<DiffTimer>,
    pending: PendingChanges,
    confirmations: PendingConfirmations,
    paused: bool,
}

impl SyncEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: EngineOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracker: IdentityTracker::new(options.proximity_window, options.provisional_prefix),
            debounce: options.debounce,
            serializer: FragmentSerializer::default(),
            clock,
            baseline: Arc::default(),
            position_map: PositionMap::new(),
            timer: None,
            pending: PendingChanges::default(),
            confirmations: PendingConfirmations::default(),
            paused: false,
        }
    }

    /// Route atoms of `kind` through `renderer` when building markdown fragments.
    pub fn register_renderer(&mut self, kind: impl Into<String>, renderer: impl InlineRenderer + 'static) {
        self.serializer.registry_mut().register(kind, renderer);
    }

    /// Record a new version of the document.
    pub fn on_mutation(&mut self, tree: &DocTree) {
        // A burst that went quiet before this mutation ends here.
        self.fire_if_due();

        let snapshot = self.snapshot_tree(tree);
        let previous = std::mem::replace(&mut self.baseline, Arc::new(snapshot));

        if self.paused {
            return;
        }

        let now = self.clock.now();
        match &mut self.timer {
            Some(timer) => timer.extend(now, self.debounce),
            None => {
                trace!("Starting diff burst");
                self.timer = Some(DiffTimer::start(now, self.debounce, previous));
            }
        }
    }

    /// Host tick: run the diff if the quiet period has elapsed. Returns
    /// whether a diff ran.
    pub fn poll_timer(&mut self) -> bool {
        self.fire_if_due()
    }

    /// Everything changed since the previous drain, including any burst
    /// still waiting out its quiet period.
    pub fn drain_changes(&mut self) -> ChangeSet {
        self.flush();
        self.pending.take()
    }

    /// `drain_changes` as camelCase JSON. The buffer is only emptied once
    /// serialization succeeded.
    pub fn drain_changes_json(&mut self) -> Result<String, serde_json::Error> {
        self.flush();
        let json = self.pending.peek().to_json()?;
        self.pending.clear();
        Ok(json)
    }

    /// Park a host-issued id for a provisional one. It takes effect on the
    /// next assignment pass or `apply_pending_confirmations_now`.
    pub fn confirm(&mut self, provisional: BlockId, confirmed: BlockId) {
        if !self.is_known(&provisional) {
            debug!("Dropping stale confirmation {provisional} -> {confirmed}");
            return;
        }
        if !self.confirmations.record(provisional.clone(), confirmed) {
            trace!("Confirmation for {provisional} already pending");
        }
    }

    /// Re-key immediately for every known id in `mapping`; returns what was
    /// applied.
    pub fn confirm_ids(&mut self, mapping: &IdMapping) -> IdMapping {
        let (applied, stale): (IdMapping, IdMapping) = mapping
            .iter()
            .map(|(provisional, confirmed)| (provisional.clone(), confirmed.clone()))
            .partition(|(provisional, _)| self.is_known(provisional));
        for (provisional, confirmed) in &stale {
            debug!("Dropping stale confirmation {provisional} -> {confirmed}");
        }
        self.rekey_snapshot(&applied);
        applied
    }

    /// Apply every parked confirmation now instead of waiting for the next
    /// mutation.
    pub fn apply_pending_confirmations_now(&mut self) -> IdMapping {
        let applied = self.confirmations.take_where(|provisional| {
            self.baseline.contains(provisional)
                || self
                    .timer
                    .as_ref()
                    .is_some_and(|timer| timer.burst_baseline().contains(provisional))
        });
        for (provisional, confirmed) in self.confirmations.take_where(|_| true) {
            debug!("Dropping stale confirmation {provisional} -> {confirmed}");
        }
        self.rekey_snapshot(&applied);
        applied
    }

    /// Rewrite ids everywhere they are held: baseline, position map, the
    /// running burst and undelivered changes. Undelivered inserts of the
    /// confirmed blocks are dropped.
    pub fn rekey_snapshot(&mut self, mapping: &IdMapping) {
        if mapping.is_empty() {
            return;
        }
        debug!("Re-keying {} block id(s)", mapping.len());

        self.baseline = Arc::new(self.baseline.rekeyed(mapping));
        self.position_map.rekey(mapping);
        if let Some(timer) = &mut self.timer {
            timer.rekey(mapping);
        }
        self.pending.rekey(mapping);
        self.confirmations
            .take_where(|provisional| mapping.contains_key(provisional));
    }

    /// While paused, ids are still tracked but no changes are reported.
    /// Pausing flushes a running burst first.
    pub fn set_sync_paused(&mut self, paused: bool) {
        if paused && !self.paused {
            self.flush();
        }
        if paused != self.paused {
            debug!("Sync {}", if paused { "paused" } else { "resumed" });
        }
        self.paused = paused;
    }

    /// Take `tree` as the new baseline without reporting anything.
    ///
    /// Ids continue from the previous generation where blocks still match.
    pub fn reset_and_snapshot(&mut self, tree: &DocTree) {
        self.timer = None;
        self.pending.clear();
        let snapshot = self.snapshot_tree(tree);
        self.baseline = Arc::new(snapshot);
    }

    /// Adopt ids the host already knows, in document order, bypassing
    /// proximity matching. Blocks without an id (or with a repeated one) get
    /// a provisional id. Returns the ids now in use.
    pub fn assign_ids_for_flat_list(&mut self, ids: &[BlockId], tree: &DocTree) -> Vec<BlockId> {
        self.timer = None;
        self.pending.clear();
        self.confirmations.clear();

        let scanned = scan_blocks(tree, &self.serializer);
        if ids.len() > scanned.len() {
            debug!(
                "Ignoring {} id(s) beyond the {} block(s) in the document",
                ids.len() - scanned.len(),
                scanned.len()
            );
        }

        let mut used = HashSet::new();
        let mut position_map = PositionMap::new();
        let mut records = Vec::with_capacity(scanned.len());
        for (index, block) in scanned.into_iter().enumerate() {
            let id = match ids.get(index) {
                Some(id) if used.insert(id.clone()) => id.clone(),
                _ => BlockId::mint(self.tracker.provisional_prefix()),
            };
            position_map.insert(block.position, id.clone(), block.slot().fingerprint);
            records.push(block.into_record(id));
        }

        self.position_map = position_map;
        self.baseline = Arc::new(Snapshot::from_records(records));
        self.baseline.ids().to_vec()
    }

    /// Cancel the timer and forget all state.
    pub fn teardown(&mut self) {
        self.timer = None;
        self.pending.clear();
        self.confirmations.clear();
        self.position_map.clear();
        self.baseline = Arc::default();
        self.paused = false;
    }

    pub fn block_id_at(&self, position: usize) -> Option<&BlockId> {
        self.position_map.id_at(position)
    }

    /// Ids of the current baseline in document order.
    pub fn block_ids(&self) -> &[BlockId] {
        self.baseline.ids()
    }

    pub fn baseline(&self) -> &Snapshot {
        &self.baseline
    }

    /// Whether a burst is waiting out its quiet period.
    pub fn has_pending_diff(&self) -> bool {
        self.timer.is_some()
    }

    /// Whether changes are buffered for the next drain.
    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_confirmation_count(&self) -> usize {
        self.confirmations.len()
    }

    pub fn is_sync_paused(&self) -> bool {
        self.paused
    }

    fn is_known(&self, id: &BlockId) -> bool {
        self.baseline.contains(id)
            || self
                .timer
                .as_ref()
                .is_some_and(|timer| timer.burst_baseline().contains(id))
    }

    /// Assign ids for `tree` and build its snapshot. Updates the position map;
    /// confirmations consumed by the pass are applied everywhere else.
    fn snapshot_tree(&mut self, tree: &DocTree) -> Snapshot {
        let scanned = scan_blocks(tree, &self.serializer);
        let slots: Vec<_> = scanned.iter().map(|block| block.slot()).collect();
        let assignment = self
            .tracker
            .assign_ids(&slots, &self.position_map, &mut self.confirmations);

        if assignment.minted > 0 {
            debug!("Minted {} provisional id(s)", assignment.minted);
        }
        self.rekey_snapshot(&assignment.applied_confirmations);
        self.position_map = assignment.position_map;

        Snapshot::from_records(
            scanned
                .into_iter()
                .zip(assignment.ids)
                .map(|(block, id)| block.into_record(id))
                .collect(),
        )
    }

    fn fire_if_due(&mut self) -> bool {
        let now = self.clock.now();
        if self.timer.as_ref().is_some_and(|timer| timer.is_due(now)) {
            self.flush();
            true
        } else {
            false
        }
    }

    fn flush(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        let changes = diff_snapshots(
            timer.burst_baseline(),
            &self.baseline,
            self.tracker.provisional_prefix(),
        );
        debug!(
            "Burst diff: {} update(s), {} insert(s), {} delete(s)",
            changes.updates.len(),
            changes.inserts.len(),
            changes.deletes.len()
        );
        self.pending.absorb(changes, &self.baseline);
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}
