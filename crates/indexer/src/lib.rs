//! # Doctrail Indexer
//!
//! Incremental change traversal over a hierarchical document repository.
//!
//! ## Pipeline
//!
//! ```text
//! Checkpoint "ts,id,dts,deid"
//!     │
//!     ├──> Candidates (DTree / DAuditNew, strictly after the checkpoint)
//!     │      └─> ids + delete events
//!     │
//!     ├──> Item filters (types, hidden items, volumes, locations)
//!     │      └─> closure-table subqueries or the Genealogist
//!     │
//!     └──> DocumentList
//!            └─> upserts and deletes in time order + next checkpoint
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use doctrail_indexer::{MemoryRepository, TraversalConfig, TraversalManager, TraversalOutcome};
//! use std::sync::Arc;
//!
//! fn main() -> doctrail_indexer::Result<()> {
//!     let repository = Arc::new(MemoryRepository::load_fixture("repo.json".as_ref())?);
//!     let mut manager = TraversalManager::new(repository, TraversalConfig::default());
//!
//!     if let TraversalOutcome::Batch(mut list) = manager.start()? {
//!         while let Some(item) = list.next_item() {
//!             println!("{item:?}");
//!         }
//!         println!("resume from {:?}", list.checkpoint());
//!     }
//!     Ok(())
//! }
//! ```

mod checkpoint;
mod config;
mod date_format;
mod diagnostics;
mod document_list;
mod error;
mod filters;
mod genealogist;
mod locations;
mod memory;
mod query;
mod repository;
mod traversal;

pub use checkpoint::{Checkpoint, Position};
pub use config::{
    clamp_batch_size, parse_id_list, GenealogistKind, HiddenItems, TraversalConfig,
    VolumeTypeFilter, DEFAULT_BATCH_SIZE, DEFAULT_EXCLUDED_TYPES, DEFAULT_EXCLUDED_VOLUME_TYPES,
    DEFAULT_TIME_BUDGET_SECS, MAX_BATCH_SIZE,
};
pub use date_format::{format_timestamp, parse_timestamp, TIMESTAMP_FORMAT};
pub use diagnostics::{Diagnostics, LogDiagnostics};
pub use document_list::{ChangedItem, Deletion, DocumentList, Upsert};
pub use error::{IndexerError, RepositoryError, Result};
pub use filters::ItemFilters;
pub use genealogist::{Candidate, Genealogist, GenealogistStatistics, HYBRID_BATCH_THRESHOLD};
pub use locations::LocationSets;
pub use memory::{AuditEvent, Fixture, Item, MemoryRepository};
pub use query::{
    Column, CompareOp, Dialect, Operand, Predicate, Query, Row, SortOrder, Value, View,
};
pub use repository::{Repository, DELETE_EVENT, HIDDEN_CATALOG, ROOT_ID};
pub use traversal::{TraversalManager, TraversalOutcome, ITEM_COLUMNS};
