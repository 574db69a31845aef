//! Incremental traversal driver.
//!
//! Each call produces at most one batch. Candidates are read from the insert
//! stream (`DTree`) and the delete stream (`DAuditNew`) strictly after the
//! checkpoint, filtered, and handed back with the advanced checkpoint. A batch
//! whose candidates are all filtered out advances the checkpoint and retries
//! with a larger batch until the deadline (half the time budget) passes.

use crate::checkpoint::Checkpoint;
use crate::config::{clamp_batch_size, TraversalConfig, MAX_BATCH_SIZE};
use crate::diagnostics::{Diagnostics, LogDiagnostics};
use crate::document_list::DocumentList;
use crate::error::{IndexerError, RepositoryError, Result};
use crate::filters::ItemFilters;
use crate::genealogist::{Candidate, Genealogist, GenealogistStatistics};
use crate::locations::LocationSets;
use crate::query::{Column, CompareOp, Predicate, Query, Row, SortOrder, Value, View};
use crate::repository::{Repository, DELETE_EVENT};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Projection returned for every emitted item
pub const ITEM_COLUMNS: &[Column] = &[
    Column::DataId,
    Column::ParentId,
    Column::OwnerId,
    Column::SubType,
    Column::Name,
    Column::Catalog,
    Column::ModifyDate,
    Column::MimeType,
    Column::DataSize,
];

const BACKOFF_FACTOR: usize = 10;

/// Result of one `start` or `resume` call
#[derive(Debug)]
pub enum TraversalOutcome {
    /// Nothing new past the checkpoint
    UpToDate,
    /// Repository unreachable; try again later with the same checkpoint
    Unavailable,
    Batch(DocumentList),
    /// Time ran out before anything passed the filters; the list carries the
    /// progress made so far
    Deferred(DocumentList),
}

impl TraversalOutcome {
    #[must_use]
    pub fn documents(&self) -> Option<&DocumentList> {
        match self {
            Self::Batch(list) | Self::Deferred(list) => Some(list),
            Self::UpToDate | Self::Unavailable => None,
        }
    }

    #[must_use]
    pub fn into_documents(self) -> Option<DocumentList> {
        match self {
            Self::Batch(list) | Self::Deferred(list) => Some(list),
            Self::UpToDate | Self::Unavailable => None,
        }
    }
}

#[derive(Debug)]
enum Step {
    Exhausted(Checkpoint),
    BatchReady(DocumentList),
    Retry {
        checkpoint: Checkpoint,
        batch_size: usize,
    },
}

pub struct TraversalManager {
    repository: Arc<dyn Repository>,
    config: TraversalConfig,
    diagnostics: Arc<dyn Diagnostics>,
    filters: ItemFilters,
    genealogist: Option<Genealogist>,
    closure_available: bool,
    batch_size: usize,
    time_budget: Duration,
}

impl TraversalManager {
    /// Create a manager reporting through the `log` facade
    #[must_use]
    pub fn new(repository: Arc<dyn Repository>, config: TraversalConfig) -> Self {
        Self::with_diagnostics(repository, config, Arc::new(LogDiagnostics))
    }

    #[must_use]
    pub fn with_diagnostics(
        repository: Arc<dyn Repository>,
        config: TraversalConfig,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        let closure_available = config.use_ancestor_closure && probe_closure(repository.as_ref());
        let filters = ItemFilters::new(&config, closure_available);
        let genealogist = filters.needs_genealogist().then(|| {
            Genealogist::new(
                Arc::clone(&repository),
                config.genealogist,
                LocationSets::new(&config.included_locations, &config.excluded_locations),
                config.cache_min_capacity,
                config.cache_max_capacity,
            )
        });

        log::debug!(
            "Traversal manager ready: closure table {}, genealogist {:?}",
            if closure_available { "available" } else { "unavailable" },
            genealogist.as_ref().map(Genealogist::kind)
        );

        Self {
            batch_size: clamp_batch_size(config.batch_size),
            time_budget: config.time_budget(),
            repository,
            config,
            diagnostics,
            filters,
            genealogist,
            closure_available,
        }
    }

    pub fn set_batch_size_hint(&mut self, hint: usize) {
        self.batch_size = clamp_batch_size(hint);
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn set_time_budget(&mut self, budget: Duration) {
        self.time_budget = budget;
    }

    #[must_use]
    pub fn has_ancestor_closure(&self) -> bool {
        self.closure_available
    }

    #[must_use]
    pub fn genealogist_statistics(&self) -> Option<GenealogistStatistics> {
        self.genealogist.as_ref().map(Genealogist::statistics)
    }

    /// First traversal, from before every item
    pub fn start(&mut self) -> Result<TraversalOutcome> {
        let deadline = self.deadline();
        let mut checkpoint = Checkpoint::new();
        if self.config.track_deletes && !self.config.replay_historical_deletes {
            self.seed_delete_axis(&mut checkpoint);
        }
        self.traverse(checkpoint, deadline)
    }

    /// Continue from a checkpoint string returned by an earlier batch
    pub fn resume(&mut self, checkpoint: &str) -> Result<TraversalOutcome> {
        let deadline = self.deadline();
        let checkpoint = Checkpoint::parse(checkpoint)?;

        match self.keep_alive() {
            Ok(()) => {}
            Err(IndexerError::TransientRepository(reason)) => {
                log::warn!("Repository unavailable, deferring traversal: {reason}");
                return Ok(TraversalOutcome::Unavailable);
            }
            Err(e) => return Err(e),
        }

        self.traverse(checkpoint, deadline)
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.time_budget / 2
    }

    fn keep_alive(&self) -> Result<()> {
        self.repository.ping().map_err(|e| match e {
            RepositoryError::Transient(reason) => IndexerError::TransientRepository(reason),
            other => IndexerError::Query {
                sql: "keep-alive".to_string(),
                source: other,
            },
        })
    }

    /// Skip deletes recorded before the first traversal
    fn seed_delete_axis(&self, checkpoint: &mut Checkpoint) {
        let query = Query::select(View::DAuditNew, &[Column::AuditDate, Column::EventId])
            .filter(delete_events())
            .order_by(Column::AuditDate, SortOrder::Descending)
            .order_by(Column::EventId, SortOrder::Descending)
            .limit(1);

        let Some(rows) = self.repository.query_no_throw(&query) else {
            log::warn!("Could not read the newest delete event; replaying historical deletes");
            return;
        };
        let Some(row) = rows.first() else {
            return;
        };
        match (row.timestamp(Column::AuditDate), row.int(Column::EventId)) {
            (Ok(audited), Ok(event_id)) => checkpoint.set_delete(audited, event_id),
            _ => log::warn!("Ignoring malformed delete event row {row:?}"),
        }
    }

    fn traverse(
        &mut self,
        mut checkpoint: Checkpoint,
        deadline: Instant,
    ) -> Result<TraversalOutcome> {
        let mut batch_size = self.batch_size;

        while Instant::now() < deadline {
            match self.step(checkpoint, batch_size)? {
                Step::Exhausted(last) => {
                    return Ok(if last.has_changed() {
                        TraversalOutcome::Batch(DocumentList::empty(last))
                    } else {
                        TraversalOutcome::UpToDate
                    });
                }
                Step::BatchReady(list) => return Ok(TraversalOutcome::Batch(list)),
                Step::Retry {
                    checkpoint: advanced,
                    batch_size: next,
                } => {
                    checkpoint = advanced;
                    batch_size = next;
                }
            }
        }

        self.diagnostics.deadline_reached(&checkpoint.to_string());
        Ok(TraversalOutcome::Deferred(DocumentList::empty(checkpoint)))
    }

    fn step(&mut self, mut checkpoint: Checkpoint, batch_size: usize) -> Result<Step> {
        let inserts = self.insert_candidates(&checkpoint, batch_size)?;
        let deletes = if self.config.track_deletes {
            self.delete_candidates(&checkpoint, batch_size)?
        } else {
            Vec::new()
        };
        self.diagnostics.candidates_fetched(inserts.len(), deletes.len(), batch_size);

        let Some(last) = inserts.last() else {
            if deletes.is_empty() {
                return Ok(Step::Exhausted(checkpoint));
            }
            let list = DocumentList::from_rows(Vec::new(), deletes, checkpoint)?;
            self.report_ready(&list);
            return Ok(Step::BatchReady(list));
        };
        checkpoint.record_insert_end(
            last.timestamp(Column::ModifyDate)?,
            last.int(Column::DataId)?,
        );

        let ids = inserts
            .iter()
            .map(|row| row.int(Column::DataId))
            .collect::<Result<Vec<_>>>()?;
        let items = self.filtered_items(ids)?;

        if items.is_empty() && deletes.is_empty() {
            checkpoint.advance_to_end();
            let next = (batch_size * BACKOFF_FACTOR).min(MAX_BATCH_SIZE);
            self.diagnostics.backoff(next, &checkpoint.to_string());
            return Ok(Step::Retry {
                checkpoint,
                batch_size: next,
            });
        }

        let list = DocumentList::from_rows(items, deletes, checkpoint)?;
        self.report_ready(&list);
        Ok(Step::BatchReady(list))
    }

    fn report_ready(&self, list: &DocumentList) {
        self.diagnostics.batch_ready(
            list.upsert_count(),
            list.deletion_count(),
            &list.current_checkpoint().to_string(),
        );
    }

    fn insert_candidates(&self, checkpoint: &Checkpoint, batch_size: usize) -> Result<Vec<Row>> {
        let filter = checkpoint.insert().map_or(Predicate::True, |p| {
            Predicate::after(Column::ModifyDate, Column::DataId, p.timestamp, p.id)
        });
        let query = Query::select(View::DTree, &[Column::ModifyDate, Column::DataId])
            .filter(filter)
            .order_by(Column::ModifyDate, SortOrder::Ascending)
            .order_by(Column::DataId, SortOrder::Ascending)
            .limit(batch_size);
        self.run(&query)
    }

    fn delete_candidates(&self, checkpoint: &Checkpoint, batch_size: usize) -> Result<Vec<Row>> {
        let after = checkpoint.delete().map_or(Predicate::True, |p| {
            Predicate::after(Column::AuditDate, Column::EventId, p.timestamp, p.id)
        });
        let query = Query::select(
            View::DAuditNew,
            &[Column::AuditDate, Column::EventId, Column::DataId],
        )
        .filter(Predicate::and([delete_events(), after]))
        .order_by(Column::AuditDate, SortOrder::Ascending)
        .order_by(Column::EventId, SortOrder::Ascending)
        .limit(batch_size);
        self.run(&query)
    }

    /// Full rows of the candidates that pass every filter, in stream order
    fn filtered_items(&mut self, ids: Vec<i64>) -> Result<Vec<Row>> {
        let repository = self.repository.as_ref();
        let diagnostics = self.diagnostics.as_ref();
        let Some(genealogist) = self.genealogist.as_mut() else {
            let query = items_query(self.filters.for_candidates(ids));
            return execute(repository, diagnostics, &query);
        };

        let links = Query::select(View::DTree, &[Column::DataId, Column::ParentId])
            .filter(self.filters.for_candidates(ids));
        let candidates = execute(repository, diagnostics, &links)?
            .iter()
            .map(Candidate::from_row)
            .collect::<Result<Vec<_>>>()?;

        let matching = genealogist.matching_descendants(&candidates)?;
        self.diagnostics.genealogy_resolved(
            candidates.len(),
            matching.as_ref().map_or(0, Vec::len),
            &genealogist.statistics(),
        );

        match matching {
            Some(ids) => execute(
                repository,
                diagnostics,
                &items_query(Predicate::in_list(Column::DataId, ids)),
            ),
            None => Ok(Vec::new()),
        }
    }

    fn run(&self, query: &Query) -> Result<Vec<Row>> {
        execute(self.repository.as_ref(), self.diagnostics.as_ref(), query)
    }
}

impl std::fmt::Debug for TraversalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraversalManager")
            .field("batch_size", &self.batch_size)
            .field("time_budget", &self.time_budget)
            .field("closure_available", &self.closure_available)
            .field("genealogist", &self.genealogist.as_ref().map(Genealogist::kind))
            .finish_non_exhaustive()
    }
}

/// Run `query`, reporting a failure together with its SQL
fn execute(
    repository: &dyn Repository,
    diagnostics: &dyn Diagnostics,
    query: &Query,
) -> Result<Vec<Row>> {
    repository.query(query).map_err(|source| {
        let sql = query.to_sql(repository.dialect());
        diagnostics.query_failed(&sql, &source);
        IndexerError::Query { sql, source }
    })
}

fn probe_closure(repository: &dyn Repository) -> bool {
    let probe = Query::select(View::DTreeAncestors, &[Column::DataId]).limit(1);
    repository
        .query_no_throw(&probe)
        .is_some_and(|rows| !rows.is_empty())
}

fn delete_events() -> Predicate {
    Predicate::compare(Column::AuditId, CompareOp::Eq, Value::Int(DELETE_EVENT))
}

fn items_query(filter: Predicate) -> Query {
    Query::select(View::DTree, ITEM_COLUMNS)
        .filter(filter)
        .order_by(Column::ModifyDate, SortOrder::Ascending)
        .order_by(Column::DataId, SortOrder::Ascending)
}
