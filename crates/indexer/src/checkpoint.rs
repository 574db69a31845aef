//! Dual-axis traversal cursor.
//!
//! A checkpoint remembers the last emitted position on the insert stream
//! (`ModifyDate`, `DataID`) and on the delete stream (`AuditDate`, `EventID`).
//! It travels to the caller as `"<ts>,<id>,<ts>,<id>"`, with empty fields for an
//! axis that has not produced anything yet.

use crate::date_format::{format_timestamp, parse_timestamp};
use crate::error::{IndexerError, Result};
use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

/// A point on one change stream, ordered by `(timestamp, id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub timestamp: NaiveDateTime,
    pub id: i64,
}

impl Position {
    #[must_use]
    pub fn new(timestamp: NaiveDateTime, id: i64) -> Self {
        Self { timestamp, id }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    insert: Option<Position>,
    delete: Option<Position>,
    /// Last insert candidate of the batch in flight, not yet committed
    insert_end: Option<Position>,
    changed: bool,
}

impl Checkpoint {
    /// Checkpoint positioned before every item
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let fields: Vec<&str> = text.split(',').collect();
        if !(3..=4).contains(&fields.len()) {
            return Err(IndexerError::malformed(
                text,
                format!("expected 4 comma-separated fields, found {}", fields.len()),
            ));
        }

        let insert = parse_axis(text, fields[0], fields[1])?;
        let delete = parse_axis(text, fields[2], fields.get(3).copied().unwrap_or(""))?;

        Ok(Self {
            insert,
            delete,
            insert_end: None,
            changed: false,
        })
    }

    #[must_use]
    pub fn insert(&self) -> Option<Position> {
        self.insert
    }

    #[must_use]
    pub fn delete(&self) -> Option<Position> {
        self.delete
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insert.is_none() && self.delete.is_none()
    }

    pub fn set_insert(&mut self, timestamp: NaiveDateTime, id: i64) {
        self.move_insert(Position::new(timestamp, id));
    }

    pub fn set_delete(&mut self, timestamp: NaiveDateTime, event_id: i64) {
        let position = Position::new(timestamp, event_id);
        if self.delete != Some(position) {
            self.delete = Some(position);
            self.changed = true;
        }
    }

    /// Remember the last insert candidate of the batch being processed
    pub fn record_insert_end(&mut self, timestamp: NaiveDateTime, id: i64) {
        self.insert_end = Some(Position::new(timestamp, id));
    }

    #[must_use]
    pub fn insert_end(&self) -> Option<Position> {
        self.insert_end
    }

    /// Move the insert axis past every candidate of the batch in flight
    pub fn advance_to_end(&mut self) {
        if let Some(end) = self.insert_end.take() {
            self.move_insert(end);
        }
    }

    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.changed
    }

    fn move_insert(&mut self, position: Position) {
        if self.insert != Some(position) {
            self.insert = Some(position);
            self.changed = true;
        }
    }
}

fn parse_axis(text: &str, timestamp: &str, id: &str) -> Result<Option<Position>> {
    let timestamp = timestamp.trim();
    let id = id.trim();
    match (timestamp.is_empty(), id.is_empty()) {
        (true, true) => Ok(None),
        (false, false) => {
            let timestamp = parse_timestamp(timestamp).map_err(|e| {
                IndexerError::malformed(text, format!("bad timestamp {timestamp:?}: {e}"))
            })?;
            let id = id
                .parse::<i64>()
                .map_err(|e| IndexerError::malformed(text, format!("bad id {id:?}: {e}")))?;
            Ok(Some(Position::new(timestamp, id)))
        }
        _ => Err(IndexerError::malformed(
            text,
            "timestamp and id must both be present or both be empty",
        )),
    }
}

impl PartialEq for Checkpoint {
    fn eq(&self, other: &Self) -> bool {
        self.insert == other.insert && self.delete == other.delete
    }
}

impl Eq for Checkpoint {}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_axis(f, self.insert)?;
        f.write_str(",")?;
        write_axis(f, self.delete)
    }
}

fn write_axis(f: &mut fmt::Formatter<'_>, position: Option<Position>) -> fmt::Result {
    match position {
        Some(p) => write!(f, "{},{}", format_timestamp(&p.timestamp), p.id),
        None => f.write_str(","),
    }
}

impl FromStr for Checkpoint {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
