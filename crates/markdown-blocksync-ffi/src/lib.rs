//! UniFFI bindings for native host shells
//!
//! The editor runs inside a WebView the host cannot inspect. The bridge
//! forwards each document mutation here as the editor's JSON, and the host
//! polls `drain_change_set` for block-level deltas to persist.

use markdown_blocksync_config::{Config, SyncConfig};
use markdown_blocksync_engine::{
    BlockId, BlockRecord, ChangeSet, DocTree, EngineOptions, IdMapping, InsertRecord, SyncEngine,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

uniffi::setup_scaffolding!();

// ============ Errors ============

/// Errors that can cross the FFI boundary
/// Note: Field is named `reason` not `message` to avoid conflict with Throwable.message in Kotlin
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum FfiError {
    #[error("Invalid document: {reason}")]
    InvalidDocument { reason: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },
}

fn parse_tree(doc_json: &str) -> Result<DocTree, FfiError> {
    DocTree::from_json(doc_json).map_err(|e| FfiError::InvalidDocument {
        reason: e.to_string(),
    })
}

// ============ Logging ============

/// Install a stderr logger filtered by `level` (e.g. "debug" or
/// "markdown_blocksync_engine=trace"). Later calls are ignored.
#[uniffi::export]
pub fn init_logging(level: String) {
    let _ = env_logger::Builder::new().parse_filters(&level).try_init();
}

// ============ Options ============

/// Engine tunables as the host sees them.
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct SyncOptions {
    pub proximity_window: u64,
    pub debounce_ms: u64,
    pub provisional_prefix: String,
}

impl SyncOptions {
    fn from_config(sync: &SyncConfig) -> Self {
        Self {
            proximity_window: sync.proximity_window as u64,
            debounce_ms: sync.debounce_ms,
            provisional_prefix: sync.provisional_prefix.clone(),
        }
    }

    fn into_engine(self) -> Result<EngineOptions, FfiError> {
        if self.provisional_prefix.is_empty() {
            return Err(FfiError::Configuration {
                reason: "provisional_prefix must not be empty".to_string(),
            });
        }
        Ok(EngineOptions {
            proximity_window: usize::try_from(self.proximity_window).unwrap_or(usize::MAX),
            debounce: std::time::Duration::from_millis(self.debounce_ms),
            provisional_prefix: self.provisional_prefix,
        })
    }
}

/// Built-in defaults, ignoring any config file.
#[uniffi::export]
pub fn default_sync_options() -> SyncOptions {
    SyncOptions::from_config(&SyncConfig::default())
}

/// Options from `~/.config/markdown-blocksync/config.toml`, or the defaults
/// when that file does not exist.
#[uniffi::export]
pub fn load_sync_options() -> Result<SyncOptions, FfiError> {
    let config = Config::load_or_default().map_err(|e| FfiError::Configuration {
        reason: e.to_string(),
    })?;
    Ok(SyncOptions::from_config(&config.sync))
}

// ============ Engine Handle ============

/// One engine per editor instance.
#[derive(uniffi::Object)]
pub struct SyncEngineHandle {
    inner: Mutex<SyncEngine>,
}

impl SyncEngineHandle {
    fn engine(&self) -> MutexGuard<'_, SyncEngine> {
        // Recover from poisoned mutex (another thread panicked while holding lock)
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[uniffi::export]
impl SyncEngineHandle {
    /// Engine with default options.
    #[uniffi::constructor]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SyncEngine::default()),
        }
    }

    #[uniffi::constructor]
    pub fn with_options(options: SyncOptions) -> Result<Self, FfiError> {
        Ok(Self {
            inner: Mutex::new(SyncEngine::new(options.into_engine()?)),
        })
    }

    /// Engine configured from the user's config file.
    #[uniffi::constructor]
    pub fn from_config() -> Result<Self, FfiError> {
        Self::with_options(load_sync_options()?)
    }

    pub fn on_document_mutated(&self, doc_json: String) -> Result<(), FfiError> {
        let tree = parse_tree(&doc_json)?;
        self.engine().on_mutation(&tree);
        Ok(())
    }

    /// Host tick; returns true when a debounced diff ran.
    pub fn poll_timer(&self) -> bool {
        self.engine().poll_timer()
    }

    pub fn drain_change_set(&self) -> ChangeSetDto {
        ChangeSetDto::from_engine(self.engine().drain_changes())
    }

    /// Same as `drain_change_set`, as camelCase JSON for WebView bridges.
    /// Nothing is drained when serialization fails.
    pub fn drain_change_set_json(&self) -> Result<String, FfiError> {
        self.engine()
            .drain_changes_json()
            .map_err(|e| FfiError::Serialization {
                reason: e.to_string(),
            })
    }

    pub fn confirm(&self, provisional_id: String, confirmed_id: String) {
        self.engine()
            .confirm(BlockId::from(provisional_id), BlockId::from(confirmed_id));
    }

    /// Apply confirmations immediately; returns those that matched a known block.
    pub fn confirm_ids(&self, mapping: HashMap<String, String>) -> HashMap<String, String> {
        let mapping: IdMapping = mapping
            .into_iter()
            .map(|(provisional, confirmed)| (provisional.into(), confirmed.into()))
            .collect();
        mapping_to_ffi(self.engine().confirm_ids(&mapping))
    }

    pub fn apply_pending_confirmations_now(&self) -> HashMap<String, String> {
        mapping_to_ffi(self.engine().apply_pending_confirmations_now())
    }

    pub fn set_sync_paused(&self, paused: bool) {
        self.engine().set_sync_paused(paused);
    }

    pub fn is_sync_paused(&self) -> bool {
        self.engine().is_sync_paused()
    }

    pub fn reset_and_snapshot(&self, doc_json: String) -> Result<(), FfiError> {
        let tree = parse_tree(&doc_json)?;
        self.engine().reset_and_snapshot(&tree);
        Ok(())
    }

    /// Adopt the host's ids for a freshly loaded document, in block order.
    pub fn assign_ids_for_flat_list(
        &self,
        ordered_ids: Vec<String>,
        doc_json: String,
    ) -> Result<Vec<String>, FfiError> {
        let tree = parse_tree(&doc_json)?;
        let ids: Vec<BlockId> = ordered_ids.into_iter().map(BlockId::from).collect();
        let assigned = self.engine().assign_ids_for_flat_list(&ids, &tree);
        Ok(assigned.into_iter().map(|id| id.to_string()).collect())
    }

    pub fn block_id_at(&self, position: u64) -> Option<String> {
        let position = usize::try_from(position).ok()?;
        self.engine().block_id_at(position).map(BlockId::to_string)
    }

    pub fn block_ids(&self) -> Vec<String> {
        self.engine()
            .block_ids()
            .iter()
            .map(BlockId::to_string)
            .collect()
    }

    pub fn has_pending_diff(&self) -> bool {
        self.engine().has_pending_diff()
    }

    pub fn teardown(&self) {
        self.engine().teardown();
    }
}

impl Default for SyncEngineHandle {
    fn default() -> Self {
        Self::new()
    }
}

fn mapping_to_ffi(mapping: IdMapping) -> HashMap<String, String> {
    mapping
        .into_iter()
        .map(|(provisional, confirmed)| (provisional.to_string(), confirmed.to_string()))
        .collect()
}

// ============ DTOs ============

/// Deltas since the previous drain.
#[derive(Debug, uniffi::Record)]
pub struct ChangeSetDto {
    pub updates: Vec<BlockRecordDto>,
    pub inserts: Vec<InsertRecordDto>,
    pub deletes: Vec<String>,
}

impl ChangeSetDto {
    fn from_engine(changes: ChangeSet) -> Self {
        Self {
            updates: changes
                .updates
                .into_iter()
                .map(BlockRecordDto::from_engine)
                .collect(),
            inserts: changes
                .inserts
                .into_iter()
                .map(InsertRecordDto::from_engine)
                .collect(),
            deletes: changes.deletes.into_iter().map(|id| id.to_string()).collect(),
        }
    }
}

#[derive(Debug, uniffi::Record)]
pub struct BlockRecordDto {
    /// Provisional (`temp-…` by default) or host-confirmed id
    pub id: String,
    pub position: u64,
    /// e.g. "paragraph", "heading", "bullet_list"
    pub block_type: String,
    pub plain_text: String,
    pub markdown_fragment: String,
    pub heading_level: Option<u8>,
    pub tree_size: u64,
}

impl BlockRecordDto {
    fn from_engine(record: BlockRecord) -> Self {
        Self {
            id: record.id.to_string(),
            position: record.position as u64,
            block_type: record.block_type,
            plain_text: record.plain_text,
            markdown_fragment: record.markdown_fragment,
            heading_level: record.heading_level,
            tree_size: record.tree_size as u64,
        }
    }
}

#[derive(Debug, uniffi::Record)]
pub struct InsertRecordDto {
    pub record: BlockRecordDto,
    /// None when inserted at the top of the document
    pub after_block_id: Option<String>,
}

impl InsertRecordDto {
    fn from_engine(insert: InsertRecord) -> Self {
        Self {
            record: BlockRecordDto::from_engine(insert.record),
            after_block_id: insert.after_block_id.map(|id| id.to_string()),
        }
    }
}
