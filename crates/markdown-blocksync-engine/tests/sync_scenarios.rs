use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use markdown_blocksync_engine::{
    BlockId, ChangeSet, DEFAULT_PROVISIONAL_PREFIX, DocTree, EngineOptions, IdMapping,
    ManualClock, Node, PositionedNode, SyncEngine,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

const QUIET: Duration = Duration::from_millis(100);

fn engine() -> (SyncEngine, ManualClock) {
    let clock = ManualClock::new();
    let engine = SyncEngine::with_clock(EngineOptions::default(), Arc::new(clock.clone()));
    (engine, clock)
}

fn doc(texts: &[&str]) -> DocTree {
    DocTree::new(texts.iter().map(|text| Node::paragraph(text)).collect())
}

fn ids(list: &[&str]) -> Vec<BlockId> {
    list.iter().map(|id| BlockId::from(*id)).collect()
}

/// Mutate, let the quiet period pass, and fire the timer.
fn settle(engine: &mut SyncEngine, clock: &ManualClock, tree: &DocTree) {
    engine.on_mutation(tree);
    clock.advance(QUIET);
    assert!(engine.poll_timer(), "timer should fire after the quiet period");
}

fn update_ids(changes: &ChangeSet) -> Vec<&str> {
    changes.updates.iter().map(|r| r.id.as_str()).collect()
}

fn is_provisional(id: &BlockId) -> bool {
    id.is_provisional(DEFAULT_PROVISIONAL_PREFIX)
}

#[test]
fn update_then_enter_insert_after_first_block() {
    let (mut engine, clock) = engine();
    engine.assign_ids_for_flat_list(&ids(&["a1", "a2"]), &doc(&["Hello", "World"]));

    settle(&mut engine, &clock, &doc(&["Hello", "World!"]));
    let changes = engine.drain_changes();
    assert_eq!(update_ids(&changes), vec!["a2"]);
    assert_eq!(changes.updates[0].plain_text, "World!");
    assert!(changes.inserts.is_empty());
    assert!(changes.deletes.is_empty());

    // Enter at the end of "Hello"
    settle(&mut engine, &clock, &doc(&["Hello", "", "World!"]));
    let changes = engine.drain_changes();
    assert!(changes.updates.is_empty(), "shifted block is not an update");
    assert!(changes.deletes.is_empty());
    assert_eq!(changes.inserts.len(), 1);
    assert!(is_provisional(&changes.inserts[0].record.id));
    assert_eq!(changes.inserts[0].after_block_id, Some("a1".into()));
    assert_eq!(engine.block_ids()[0].as_str(), "a1");
    assert_eq!(engine.block_ids()[2].as_str(), "a2");
}

#[test]
fn confirmed_id_replaces_provisional_without_delete_or_insert() {
    let (mut engine, clock) = engine();
    engine.assign_ids_for_flat_list(&ids(&["a1"]), &doc(&["Hello"]));

    settle(&mut engine, &clock, &doc(&["Hello", "New"]));
    let changes = engine.drain_changes();
    let provisional = changes.inserts[0].record.id.clone();
    assert!(is_provisional(&provisional));

    engine.confirm(provisional.clone(), "block-42".into());
    settle(&mut engine, &clock, &doc(&["Hello", "New text"]));
    let changes = engine.drain_changes();

    assert_eq!(update_ids(&changes), vec!["block-42"]);
    assert!(changes.inserts.is_empty());
    assert!(changes.deletes.is_empty());
    assert!(!engine.baseline().contains(&provisional));
    assert_eq!(engine.block_ids(), &ids(&["a1", "block-42"])[..]);
}

#[test]
fn immediate_confirmation_rekeys_everything() {
    let (mut engine, clock) = engine();
    engine.assign_ids_for_flat_list(&ids(&["a1"]), &doc(&["Hello"]));

    settle(&mut engine, &clock, &doc(&["Hello", "New"]));
    let provisional = engine.drain_changes().inserts[0].record.id.clone();

    let applied = engine.confirm_ids(&IdMapping::from([(
        provisional.clone(),
        BlockId::from("block-42"),
    )]));
    assert_eq!(applied.len(), 1);
    assert_eq!(engine.block_id_at(7), Some(&BlockId::from("block-42")));

    settle(&mut engine, &clock, &doc(&["Hello"]));
    assert_eq!(engine.drain_changes().deletes, ids(&["block-42"]));
}

#[test]
fn confirmation_is_idempotent() {
    let (mut engine, clock) = engine();
    engine.assign_ids_for_flat_list(&ids(&["a1"]), &doc(&["Hello"]));
    settle(&mut engine, &clock, &doc(&["Hello", "New"]));
    let provisional = engine.drain_changes().inserts[0].record.id.clone();

    engine.confirm(provisional.clone(), "block-42".into());
    engine.confirm(provisional.clone(), "block-42".into());
    assert_eq!(engine.pending_confirmation_count(), 1);

    let applied = engine.apply_pending_confirmations_now();
    assert_eq!(applied.len(), 1);
    let after_first = engine.baseline().clone();

    // Replaying the same confirmation changes nothing
    engine.confirm(provisional.clone(), "block-42".into());
    assert!(engine.apply_pending_confirmations_now().is_empty());
    let mapping = IdMapping::from([(provisional, BlockId::from("block-42"))]);
    assert!(engine.confirm_ids(&mapping).is_empty());

    assert_eq!(engine.baseline(), &after_first);
    assert!(engine.drain_changes().is_empty());
}

#[test]
fn ids_are_stable_across_edits() {
    let (mut engine, clock) = engine();
    engine.reset_and_snapshot(&doc(&["One", "Two", "Three"]));
    let original = engine.block_ids().to_vec();

    for tree in [
        doc(&["One", "Two", "Three"]),
        doc(&["One!", "Two", "Three"]),
        doc(&["One!", "Two, longer now", "Three"]),
        doc(&["One!", "Two, longer now", "Three", "Four"]),
    ] {
        settle(&mut engine, &clock, &tree);
        assert_eq!(&engine.block_ids()[..3], &original[..]);
    }
}

#[test]
fn clearing_first_block_keeps_ids_of_empty_blocks() {
    let (mut engine, clock) = engine();
    engine.reset_and_snapshot(&doc(&["abc", "", ""]));
    let before = engine.block_ids().to_vec();

    settle(&mut engine, &clock, &doc(&["", "", ""]));
    assert_eq!(engine.block_ids(), before.as_slice());
    let changes = engine.drain_changes();
    assert_eq!(update_ids(&changes), vec![before[0].as_str()]);
    assert!(changes.inserts.is_empty());
    assert!(changes.deletes.is_empty());

    settle(&mut engine, &clock, &doc(&["x", "", ""]));
    assert_eq!(engine.block_ids(), before.as_slice());
    let changes = engine.drain_changes();
    assert_eq!(update_ids(&changes), vec![before[0].as_str()]);
    assert_eq!(changes.updates[0].plain_text, "x");
}

#[test]
fn emptying_one_of_two_identical_blocks_keeps_its_id() {
    let (mut engine, clock) = engine();
    engine.reset_and_snapshot(&doc(&["Test", "Test"]));
    let before = engine.block_ids().to_vec();

    settle(&mut engine, &clock, &doc(&["", "Test"]));
    assert_eq!(engine.block_ids(), before.as_slice());
    let changes = engine.drain_changes();
    assert_eq!(update_ids(&changes), vec![before[0].as_str()]);
    assert!(changes.inserts.is_empty());
    assert!(changes.deletes.is_empty());
}

#[test]
fn unchanged_tree_reports_nothing() {
    let (mut engine, clock) = engine();
    engine.reset_and_snapshot(&doc(&["One", "Two"]));

    settle(&mut engine, &clock, &doc(&["One", "Two"]));
    assert!(engine.drain_changes().is_empty());
}

#[rstest]
#[case(&["x"], &["x", "x", "x", "x"])]
#[case(&["a", "b", "c"], &["c", "b", "a", "", ""])]
#[case(&["a", "b", "c", "d"], &["a"])]
fn no_id_is_claimed_twice(#[case] before: &[&str], #[case] after: &[&str]) {
    let (mut engine, clock) = engine();
    engine.reset_and_snapshot(&doc(before));

    settle(&mut engine, &clock, &doc(after));
    let unique: HashSet<_> = engine.block_ids().iter().collect();
    assert_eq!(unique.len(), after.len());
}

#[test]
fn burst_diff_covers_every_mutation_in_the_burst() {
    let (mut engine, clock) = engine();
    engine.assign_ids_for_flat_list(&ids(&["a1", "a2", "a3"]), &doc(&["One", "Two", "Three"]));

    engine.on_mutation(&doc(&["One!", "Two", "Three"]));
    clock.advance(Duration::from_millis(50));
    engine.on_mutation(&doc(&["One!", "Two!", "Three"]));
    clock.advance(Duration::from_millis(50));
    engine.on_mutation(&doc(&["One!", "Two!"]));
    clock.advance(Duration::from_millis(50));

    // the deadline keeps moving while typing continues
    assert!(!engine.poll_timer());
    clock.advance(Duration::from_millis(50));
    assert!(engine.poll_timer());

    let changes = engine.drain_changes();
    assert_eq!(update_ids(&changes), vec!["a1", "a2"]);
    assert_eq!(changes.deletes, ids(&["a3"]));
}

#[test]
fn overdue_burst_is_diffed_before_next_mutation() {
    let (mut engine, clock) = engine();
    engine.assign_ids_for_flat_list(&ids(&["a1", "a2"]), &doc(&["One", "Two"]));

    engine.on_mutation(&doc(&["One!", "Two"]));
    clock.advance(QUIET * 2);
    // no poll happened; the next mutation must not swallow the first burst
    engine.on_mutation(&doc(&["One!", "Two!"]));
    clock.advance(QUIET);
    engine.poll_timer();

    assert_eq!(update_ids(&engine.drain_changes()), vec!["a1", "a2"]);
}

#[test]
fn drain_includes_unsettled_burst() {
    let (mut engine, _clock) = engine();
    engine.assign_ids_for_flat_list(&ids(&["a1"]), &doc(&["One"]));

    engine.on_mutation(&doc(&["One!"]));
    let changes = engine.drain_changes();

    assert_eq!(update_ids(&changes), vec!["a1"]);
    assert!(!engine.has_pending_diff());
    assert!(engine.drain_changes().is_empty(), "drained records never reappear");
}

#[test]
fn insert_then_delete_within_burst_reports_nothing() {
    let (mut engine, _clock) = engine();
    engine.assign_ids_for_flat_list(&ids(&["a1"]), &doc(&["One"]));

    engine.on_mutation(&doc(&["One", "Two"]));
    engine.on_mutation(&doc(&["One"]));

    assert!(engine.drain_changes().is_empty());
}

#[test]
fn paused_mutations_are_not_reported() {
    let (mut engine, clock) = engine();
    engine.assign_ids_for_flat_list(&ids(&["a1", "a2"]), &doc(&["One", "Two"]));

    engine.on_mutation(&doc(&["One!", "Two"]));
    engine.set_sync_paused(true);
    assert!(engine.is_sync_paused());
    assert!(!engine.has_pending_diff());

    engine.on_mutation(&doc(&["Replaced", "Entirely", "New"]));
    clock.advance(QUIET);
    assert!(!engine.poll_timer());

    // only the burst that was running before the pause is reported
    let changes = engine.drain_changes();
    assert_eq!(update_ids(&changes), vec!["a1"]);
    assert!(changes.inserts.is_empty());

    // identity tracking continued while paused
    assert_eq!(engine.block_ids().len(), 3);
    assert_eq!(engine.block_ids()[0].as_str(), "a1");

    engine.set_sync_paused(false);
    engine.reset_and_snapshot(&doc(&["Replaced", "Entirely", "New"]));
    assert!(engine.drain_changes().is_empty());

    settle(&mut engine, &clock, &doc(&["Replaced", "Entirely", "New!"]));
    let changes = engine.drain_changes();
    assert_eq!(changes.updates.len(), 1);
    assert_eq!(changes.updates[0].plain_text, "New!");
}

#[test]
fn reset_while_paused_reports_nothing_after_resume() {
    let (mut engine, clock) = engine();
    engine.reset_and_snapshot(&doc(&["Hello"]));

    engine.set_sync_paused(true);
    engine.on_mutation(&doc(&["Hello", "World"]));
    engine.reset_and_snapshot(&doc(&["Hello", "World", "Again"]));
    engine.set_sync_paused(false);

    assert!(engine.drain_changes().is_empty());

    let second = engine.block_ids()[1].clone();
    settle(&mut engine, &clock, &doc(&["Hello", "World!", "Again"]));
    let changes = engine.drain_changes();
    assert_eq!(update_ids(&changes), vec![second.as_str()]);
    assert!(changes.inserts.is_empty());
    assert!(changes.deletes.is_empty());
}

#[test]
fn confirmed_delete_within_burst_reports_confirmed_id() {
    let (mut engine, clock) = engine();
    engine.assign_ids_for_flat_list(&ids(&["a1"]), &doc(&["Hello"]));

    settle(&mut engine, &clock, &doc(&["Hello", "New"]));
    let provisional = engine.drain_changes().inserts[0].record.id.clone();

    // The inserted block is removed again before the host confirms it.
    engine.on_mutation(&doc(&["Hello"]));
    assert!(engine.has_pending_diff());
    engine.confirm(provisional.clone(), "block-42".into());
    let mapping = IdMapping::from([(provisional.clone(), BlockId::from("block-42"))]);
    assert_eq!(engine.confirm_ids(&mapping), mapping);
    assert_eq!(engine.pending_confirmation_count(), 0);

    let changes = engine.drain_changes();
    assert_eq!(changes.deletes, ids(&["block-42"]));
    assert!(changes.updates.is_empty());
    assert!(changes.inserts.is_empty());
    assert!(!changes.to_json().unwrap().contains(provisional.as_str()));

    assert!(engine.confirm_ids(&mapping).is_empty());
}

#[test]
fn reset_cancels_timer() {
    let (mut engine, clock) = engine();
    engine.reset_and_snapshot(&doc(&["One"]));
    engine.on_mutation(&doc(&["One!"]));
    assert!(engine.has_pending_diff());

    engine.reset_and_snapshot(&doc(&["One!"]));
    assert!(!engine.has_pending_diff());
    clock.advance(QUIET);
    assert!(!engine.poll_timer());
    assert!(engine.drain_changes().is_empty());
}

#[test]
fn teardown_cancels_timer() {
    let (mut engine, clock) = engine();
    engine.on_mutation(&doc(&["One"]));
    assert!(engine.has_pending_diff());

    engine.teardown();
    clock.advance(QUIET);
    assert!(!engine.poll_timer());
    assert!(engine.drain_changes().is_empty());
    assert!(engine.baseline().is_empty());
}

#[test]
fn flat_list_assignment_bypasses_proximity() {
    let (mut engine, clock) = engine();
    engine.reset_and_snapshot(&doc(&["One", "Two"]));

    let assigned = engine.assign_ids_for_flat_list(&ids(&["b1", "b2"]), &doc(&["One", "Two"]));
    assert_eq!(assigned, ids(&["b1", "b2"]));
    assert!(engine.drain_changes().is_empty());

    settle(&mut engine, &clock, &doc(&["One", "Two!"]));
    assert_eq!(update_ids(&engine.drain_changes()), vec!["b2"]);
}

#[test]
fn malformed_positions_are_skipped() {
    let (mut engine, _clock) = engine();
    let tree = DocTree::from_positioned(
        vec![
            PositionedNode {
                position: 0,
                size: 5,
                node: Node::paragraph("One"),
            },
            PositionedNode {
                position: 3,
                size: 5,
                node: Node::paragraph("Two"),
            },
            PositionedNode {
                position: 5,
                size: 7,
                node: Node::paragraph("Three"),
            },
        ],
        12,
    );

    engine.on_mutation(&tree);
    let changes = engine.drain_changes();
    let texts: Vec<_> = changes
        .inserts
        .iter()
        .map(|insert| insert.record.plain_text.as_str())
        .collect();
    assert_eq!(texts, vec!["One", "Three"]);
}

#[test]
fn markdown_documents_are_tracked() {
    let (mut engine, clock) = engine();
    engine.reset_and_snapshot(&DocTree::from_markdown(
        "# Title\n\nSee [@smith2020, p. 4] here.\n\n- one\n- two\n",
    ));
    let original = engine.block_ids().to_vec();
    assert_eq!(original.len(), 3);

    settle(
        &mut engine,
        &clock,
        &DocTree::from_markdown("# Title\n\nSee [@jones1999] here.\n\n- one\n- two\n"),
    );
    let changes = engine.drain_changes();

    assert_eq!(changes.updates.len(), 1);
    assert_eq!(changes.updates[0].id, original[1]);
    assert_eq!(changes.updates[0].markdown_fragment, "See [@jones1999] here.");
    assert_eq!(engine.block_ids(), &original[..]);
}

#[test]
fn engines_are_independent() {
    let (mut first, _) = engine();
    let (mut second, _) = engine();

    first.on_mutation(&doc(&["One"]));
    assert!(second.drain_changes().is_empty());
    assert_eq!(first.drain_changes().inserts.len(), 1);
}
