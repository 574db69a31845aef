use crate::error::RepositoryError;
use crate::query::{Dialect, Query, Row};

/// Audit event type recorded for deletions
pub const DELETE_EVENT: i64 = 2;
/// Catalog value marking a hidden item
pub const HIDDEN_CATALOG: i64 = 2;
/// `ParentID` of top-level items, and the sentinel for "anywhere"
pub const ROOT_ID: i64 = -1;

/// Bounded, non-cursoring query facade over the document repository.
///
/// Implementations execute one query at a time and return every matching row,
/// honoring `ORDER BY` and the row limit for their [`Dialect`].
pub trait Repository: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn query(&self, query: &Query) -> Result<Vec<Row>, RepositoryError>;

    /// Like [`Repository::query`], but failures come back as `None`
    fn query_no_throw(&self, query: &Query) -> Option<Vec<Row>> {
        match self.query(query) {
            Ok(rows) => Some(rows),
            Err(e) => {
                log::debug!("Ignoring failed query {}: {e}", query.to_sql(self.dialect()));
                None
            }
        }
    }

    /// Cheap keep-alive probe used before resuming a traversal
    fn ping(&self) -> Result<(), RepositoryError>;
}
