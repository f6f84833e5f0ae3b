//! Block identity and change synchronization.
//!
//! Data flows one way: a tree mutation is scanned into blocks, the
//! `IdentityTracker` carries ids over from the previous generation, the
//! result becomes the new baseline `Snapshot`, and a debounced diff against
//! the snapshot taken when the burst began feeds `PendingChanges` until the
//! host drains them. Host-issued ids flow back through the confirmation
//! protocol in `confirm`.

pub mod classify;
pub mod confirm;
pub mod debounce;
pub mod diff;
pub mod engine;
pub mod identity;
pub mod serialize;
pub mod snapshot;
