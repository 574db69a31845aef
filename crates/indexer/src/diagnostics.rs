use crate::error::RepositoryError;
use crate::genealogist::GenealogistStatistics;

/// Observer for traversal progress.
///
/// Every callback has an empty default so implementations pick what they need.
pub trait Diagnostics: Send + Sync {
    fn candidates_fetched(&self, _inserts: usize, _deletes: usize, _batch_size: usize) {}

    /// A batch produced candidates but nothing survived filtering
    fn backoff(&self, _next_batch_size: usize, _checkpoint: &str) {}

    fn batch_ready(&self, _inserts: usize, _deletes: usize, _checkpoint: &str) {}

    fn deadline_reached(&self, _checkpoint: &str) {}

    fn genealogy_resolved(
        &self,
        _candidates: usize,
        _matches: usize,
        _stats: &GenealogistStatistics,
    ) {
    }

    fn query_failed(&self, _sql: &str, _error: &RepositoryError) {}
}

/// Forwards every event to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn candidates_fetched(&self, inserts: usize, deletes: usize, batch_size: usize) {
        log::debug!(
            "Fetched {} insert and {} delete candidates (batch size {})",
            inserts,
            deletes,
            batch_size
        );
    }

    fn backoff(&self, next_batch_size: usize, checkpoint: &str) {
        log::debug!(
            "No candidates passed filtering; advancing to {} with batch size {}",
            checkpoint,
            next_batch_size
        );
    }

    fn batch_ready(&self, inserts: usize, deletes: usize, checkpoint: &str) {
        log::info!(
            "Traversal batch ready: {} items, {} deletes, checkpoint {}",
            inserts,
            deletes,
            checkpoint
        );
    }

    fn deadline_reached(&self, checkpoint: &str) {
        log::info!("Traversal time budget exhausted at checkpoint {checkpoint}");
    }

    fn genealogy_resolved(&self, candidates: usize, matches: usize, stats: &GenealogistStatistics) {
        log::debug!("Genealogist matched {matches} of {candidates} candidates; {stats}");
    }

    fn query_failed(&self, sql: &str, error: &RepositoryError) {
        log::debug!("Query failed: {error}; sql: {sql}");
    }
}
