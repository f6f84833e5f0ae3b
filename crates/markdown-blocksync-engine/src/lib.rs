pub mod error;
pub mod sync;
pub mod tree;

// Re-export key types for easier usage
pub use error::TreeError;
pub use sync::{
    classify::is_block,
    confirm::{IdMapping, PendingConfirmations},
    debounce::{Clock, ManualClock, SystemClock},
    diff::{ChangeSet, InsertRecord},
    engine::{EngineOptions, SyncEngine},
    identity::{BlockId, DEFAULT_PROVISIONAL_PREFIX, IdentityTracker, PositionMap},
    serialize::{FragmentSerializer, InlineRenderer, RendererRegistry},
    snapshot::{BlockRecord, Snapshot},
};
pub use tree::{AtomicInline, Content, DocTree, Inline, Node, NodeKind, PositionedNode};
