//! In-memory repository.
//!
//! Evaluates typed queries against a small item tree and audit log. Used by the
//! test-suite and by the CLI to replay JSON fixtures; it also counts queries
//! per view and can inject failures.

use crate::date_format::truncate_to_seconds;
use crate::error::{RepositoryError, Result};
use crate::query::{Column, Dialect, Operand, Predicate, Query, Row, SortOrder, Value, View};
use crate::repository::{Repository, DELETE_EVENT, HIDDEN_CATALOG, ROOT_ID};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock};

const DOCUMENT_SUBTYPE: i64 = 144;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Item {
    pub id: i64,
    #[serde(default = "root_parent")]
    pub parent_id: i64,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default = "document_subtype")]
    pub subtype: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub catalog: i64,
    #[serde(with = "timestamp_format")]
    pub modified: NaiveDateTime,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: i64,
}

impl Item {
    #[must_use]
    pub fn new(id: i64, parent_id: i64, modified: NaiveDateTime) -> Self {
        Self {
            id,
            parent_id,
            owner_id: 0,
            subtype: DOCUMENT_SUBTYPE,
            name: format!("item-{id}"),
            catalog: 0,
            modified,
            mime_type: None,
            size: 0,
        }
    }

    #[must_use]
    pub fn subtype(mut self, subtype: i64) -> Self {
        self.subtype = subtype;
        self
    }

    #[must_use]
    pub fn owner(mut self, owner_id: i64) -> Self {
        self.owner_id = owner_id;
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.catalog = HIDDEN_CATALOG;
        self
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            (Column::DataId, Value::Int(self.id)),
            (Column::ParentId, Value::Int(self.parent_id)),
            (Column::OwnerId, Value::Int(self.owner_id)),
            (Column::SubType, Value::Int(self.subtype)),
            (Column::Name, Value::Text(self.name.clone())),
            (Column::Catalog, Value::Int(self.catalog)),
            (
                Column::ModifyDate,
                Value::Timestamp(truncate_to_seconds(self.modified)),
            ),
            (
                Column::MimeType,
                self.mime_type.clone().map_or(Value::Null, Value::Text),
            ),
            (Column::DataSize, Value::Int(self.size)),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuditEvent {
    pub event_id: i64,
    #[serde(default = "delete_event")]
    pub audit_id: i64,
    #[serde(with = "timestamp_format")]
    pub audited: NaiveDateTime,
    pub data_id: i64,
}

impl AuditEvent {
    #[must_use]
    pub fn delete(event_id: i64, data_id: i64, audited: NaiveDateTime) -> Self {
        Self {
            event_id,
            audit_id: DELETE_EVENT,
            audited,
            data_id,
        }
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            (Column::EventId, Value::Int(self.event_id)),
            (Column::AuditId, Value::Int(self.audit_id)),
            (
                Column::AuditDate,
                Value::Timestamp(truncate_to_seconds(self.audited)),
            ),
            (Column::DataId, Value::Int(self.data_id)),
        ])
    }
}

/// Serialized repository contents
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    #[serde(default = "default_dialect")]
    pub dialect: Dialect,
    #[serde(default)]
    pub closure: bool,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub events: Vec<AuditEvent>,
}

fn root_parent() -> i64 {
    ROOT_ID
}

fn document_subtype() -> i64 {
    DOCUMENT_SUBTYPE
}

fn delete_event() -> i64 {
    DELETE_EVENT
}

fn default_dialect() -> Dialect {
    Dialect::TopN
}

mod timestamp_format {
    use crate::date_format::parse_timestamp;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(d)?;
        parse_timestamp(&text).map_err(serde::de::Error::custom)
    }
}

#[derive(Default)]
struct State {
    items: Vec<Item>,
    events: Vec<AuditEvent>,
}

#[derive(Default)]
struct Faults {
    ping: Option<RepositoryError>,
    view: Option<View>,
}

pub struct MemoryRepository {
    dialect: Dialect,
    closure: bool,
    state: RwLock<State>,
    faults: Mutex<Faults>,
    counts: Mutex<HashMap<View, usize>>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            closure: false,
            state: RwLock::new(State::default()),
            faults: Mutex::new(Faults::default()),
            counts: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_fixture(fixture: Fixture) -> Self {
        let repo = Self::new(fixture.dialect).with_closure(fixture.closure);
        {
            let mut state = repo.state.write().unwrap_or_else(PoisonError::into_inner);
            state.items = fixture.items;
            state.events = fixture.events;
        }
        repo
    }

    pub fn load_fixture(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let fixture: Fixture = serde_json::from_slice(&bytes)?;
        Ok(Self::from_fixture(fixture))
    }

    /// Expose a `DTreeAncestors` closure derived from the parent links
    #[must_use]
    pub fn with_closure(mut self, closure: bool) -> Self {
        self.closure = closure;
        self
    }

    pub fn add_item(&self, item: Item) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.items.retain(|existing| existing.id != item.id);
        state.items.push(item);
    }

    pub fn add_event(&self, event: AuditEvent) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.events.push(event);
    }

    /// Make every `ping` fail with `error` until cleared with `None`
    pub fn set_ping_failure(&self, error: Option<RepositoryError>) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).ping = error;
    }

    /// Make every query touching `view` fail until cleared with `None`
    pub fn set_failing_view(&self, view: Option<View>) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).view = view;
    }

    #[must_use]
    pub fn query_count(&self, view: View) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&view)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn total_query_count(&self) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    pub fn reset_counts(&self) {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn table(&self, state: &State, view: View) -> std::result::Result<Vec<Row>, RepositoryError> {
        match view {
            View::DTree => Ok(state.items.iter().map(Item::to_row).collect()),
            View::DAuditNew => Ok(state.events.iter().map(AuditEvent::to_row).collect()),
            View::DTreeAncestors if self.closure => Ok(closure_rows(&state.items)),
            View::DTreeAncestors => Err(RepositoryError::Query(
                "DTreeAncestors is not available".to_string(),
            )),
        }
    }

    fn run(&self, state: &State, query: &Query) -> std::result::Result<Vec<Row>, RepositoryError> {
        *self
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(query.view)
            .or_insert(0) += 1;

        let failing = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .view;
        if failing == Some(query.view) {
            return Err(RepositoryError::Query(format!(
                "injected failure on {}",
                query.view.name()
            )));
        }

        let filter = self.resolve(state, &query.filter)?;
        let mut rows: Vec<Row> = self
            .table(state, query.view)?
            .into_iter()
            .filter(|row| matches(&filter, row))
            .collect();

        rows.sort_by(|a, b| {
            for (column, order) in &query.order_by {
                let ordering = match (a.get(*column), b.get(*column)) {
                    (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                let ordering = match order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                Row::new(
                    query
                        .columns
                        .iter()
                        .map(|c| (*c, row.get(*c).cloned().unwrap_or(Value::Null)))
                        .collect(),
                )
            })
            .collect())
    }

    /// Replace subqueries with the id lists they produce
    fn resolve(
        &self,
        state: &State,
        predicate: &Predicate,
    ) -> std::result::Result<Predicate, RepositoryError> {
        Ok(match predicate {
            Predicate::InQuery {
                operand,
                query,
                negated,
            } => {
                let column = query.columns.first().copied().ok_or_else(|| {
                    RepositoryError::Query("subquery selects no columns".to_string())
                })?;
                let values = self
                    .run(state, query)?
                    .iter()
                    .filter_map(|row| row.get(column).and_then(Value::as_int))
                    .collect();
                Predicate::InList {
                    operand: *operand,
                    values,
                    negated: *negated,
                }
            }
            Predicate::And(parts) => Predicate::And(
                parts
                    .iter()
                    .map(|p| self.resolve(state, p))
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Predicate::Or(parts) => Predicate::Or(
                parts
                    .iter()
                    .map(|p| self.resolve(state, p))
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Predicate::Not(inner) => Predicate::Not(Box::new(self.resolve(state, inner)?)),
            Predicate::Raw(sql) => {
                return Err(RepositoryError::Query(format!(
                    "raw SQL is not supported in memory: {sql}"
                )))
            }
            other => other.clone(),
        })
    }
}

impl Repository for MemoryRepository {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(&self, query: &Query) -> std::result::Result<Vec<Row>, RepositoryError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        self.run(&state, query)
    }

    fn ping(&self) -> std::result::Result<(), RepositoryError> {
        match &self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ping
        {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn closure_rows(items: &[Item]) -> Vec<Row> {
    let parents: HashMap<i64, i64> = items.iter().map(|i| (i.id, i.parent_id)).collect();
    let mut rows = Vec::new();
    for item in items {
        let mut seen = HashSet::new();
        let mut current = item.parent_id;
        while current != ROOT_ID && seen.insert(current) {
            rows.push(Row::new(vec![
                (Column::DataId, Value::Int(item.id)),
                (Column::AncestorId, Value::Int(current)),
            ]));
            // Children listed under a negated container continue from the container.
            let key = if current < ROOT_ID { -current } else { current };
            match parents.get(&key) {
                Some(parent) => current = *parent,
                None => break,
            }
        }
    }
    rows
}

fn operand_value(operand: Operand, row: &Row) -> Option<Value> {
    let value = row.get(operand.column())?.clone();
    match operand {
        Operand::Column(_) => Some(value),
        Operand::Negated(_) => value.as_int().map(|v| Value::Int(-v)),
    }
}

fn matches(predicate: &Predicate, row: &Row) -> bool {
    match predicate {
        Predicate::True => true,
        Predicate::Compare { lhs, op, value } => operand_value(*lhs, row)
            .and_then(|v| v.compare(value))
            .is_some_and(|ordering| op.accepts(ordering)),
        Predicate::InList {
            operand,
            values,
            negated,
        } => operand_value(*operand, row)
            .and_then(|v| v.as_int())
            .is_some_and(|v| values.contains(&v) != *negated),
        Predicate::And(parts) => parts.iter().all(|p| matches(p, row)),
        Predicate::Or(parts) => parts.iter().any(|p| matches(p, row)),
        Predicate::Not(inner) => !matches(inner, row),
        // Resolved before evaluation.
        Predicate::InQuery { .. } | Predicate::Raw(_) => false,
    }
}

impl std::fmt::Debug for MemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("MemoryRepository")
            .field("dialect", &self.dialect)
            .field("closure", &self.closure)
            .field("items", &state.items.len())
            .field("events", &state.events.len())
            .finish()
    }
}
