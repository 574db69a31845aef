use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::query::{Column, Row};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::VecDeque;

/// An inserted or updated item with its full row projection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Upsert {
    pub id: i64,
    pub modified: NaiveDateTime,
    pub row: Row,
}

/// A delete event from the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Deletion {
    pub event_id: i64,
    pub audited: NaiveDateTime,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangedItem {
    Upsert(Upsert),
    Delete(Deletion),
}

/// Cursor over one traversal batch.
///
/// Items come out in timestamp order across both streams. The checkpoint
/// follows consumption: it covers what has been handed out so far and, once
/// the list is drained, every candidate the batch examined.
#[derive(Debug, Clone)]
pub struct DocumentList {
    upserts: VecDeque<Upsert>,
    deletions: VecDeque<Deletion>,
    checkpoint: Checkpoint,
}

impl DocumentList {
    /// Wrap filtered item rows and delete candidate rows
    pub fn from_rows(items: Vec<Row>, deletes: Vec<Row>, checkpoint: Checkpoint) -> Result<Self> {
        let upserts = items
            .into_iter()
            .map(|row| {
                Ok(Upsert {
                    id: row.int(Column::DataId)?,
                    modified: row.timestamp(Column::ModifyDate)?,
                    row,
                })
            })
            .collect::<Result<VecDeque<_>>>()?;
        let deletions = deletes
            .iter()
            .map(|row| {
                Ok(Deletion {
                    event_id: row.int(Column::EventId)?,
                    audited: row.timestamp(Column::AuditDate)?,
                    id: row.int(Column::DataId)?,
                })
            })
            .collect::<Result<VecDeque<_>>>()?;
        Ok(Self {
            upserts,
            deletions,
            checkpoint,
        })
    }

    /// A list carrying progress but no items
    #[must_use]
    pub fn empty(checkpoint: Checkpoint) -> Self {
        Self {
            upserts: VecDeque::new(),
            deletions: VecDeque::new(),
            checkpoint,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.upserts.len() + self.deletions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn upsert_count(&self) -> usize {
        self.upserts.len()
    }

    #[must_use]
    pub fn deletion_count(&self) -> usize {
        self.deletions.len()
    }

    /// Next item in timestamp order; deletes win ties
    pub fn next_item(&mut self) -> Option<ChangedItem> {
        let take_delete = match (self.upserts.front(), self.deletions.front()) {
            (None, None) => return None,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (Some(upsert), Some(deletion)) => deletion.audited <= upsert.modified,
        };

        if take_delete {
            let deletion = self.deletions.pop_front()?;
            self.checkpoint.set_delete(deletion.audited, deletion.event_id);
            Some(ChangedItem::Delete(deletion))
        } else {
            let upsert = self.upserts.pop_front()?;
            self.checkpoint.set_insert(upsert.modified, upsert.id);
            Some(ChangedItem::Upsert(upsert))
        }
    }

    /// Serialized checkpoint covering everything consumed so far, or `None`
    /// when nothing has moved
    #[must_use]
    pub fn checkpoint(&self) -> Option<String> {
        let checkpoint = self.current_checkpoint();
        checkpoint
            .has_changed()
            .then(|| checkpoint.to_string())
    }

    #[must_use]
    pub fn current_checkpoint(&self) -> Checkpoint {
        let mut checkpoint = self.checkpoint.clone();
        if self.is_empty() {
            checkpoint.advance_to_end();
        }
        checkpoint
    }
}

impl Iterator for DocumentList {
    type Item = ChangedItem;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date_format::parse_timestamp;
    use crate::query::Value;
    use pretty_assertions::assert_eq;

    fn ts(text: &str) -> NaiveDateTime {
        parse_timestamp(text).expect("timestamp")
    }

    fn item(id: i64, modified: &str) -> Row {
        Row::new(vec![
            (Column::DataId, Value::Int(id)),
            (Column::ModifyDate, Value::Timestamp(ts(modified))),
        ])
    }

    fn delete(event_id: i64, audited: &str, id: i64) -> Row {
        Row::new(vec![
            (Column::EventId, Value::Int(event_id)),
            (Column::AuditDate, Value::Timestamp(ts(audited))),
            (Column::DataId, Value::Int(id)),
        ])
    }

    fn batch_checkpoint() -> Checkpoint {
        let mut cp = Checkpoint::new();
        cp.record_insert_end(ts("2020-01-05 00:00:00"), 50);
        cp
    }

    #[test]
    fn interleaves_streams_by_time() {
        let mut list = DocumentList::from_rows(
            vec![
                item(1, "2020-01-01 00:00:00"),
                item(2, "2020-01-03 00:00:00"),
            ],
            vec![
                delete(7, "2020-01-02 00:00:00", 9),
                delete(8, "2020-01-03 00:00:00", 10),
            ],
            batch_checkpoint(),
        )
        .expect("list");

        let order: Vec<String> = list
            .by_ref()
            .map(|item| match item {
                ChangedItem::Upsert(u) => format!("u{}", u.id),
                ChangedItem::Delete(d) => format!("d{}", d.event_id),
            })
            .collect();
        assert_eq!(order, vec!["u1", "d7", "d8", "u2"]);
    }

    #[test]
    fn checkpoint_tracks_consumption() {
        let mut list = DocumentList::from_rows(
            vec![
                item(1, "2020-01-01 00:00:00"),
                item(2, "2020-01-03 00:00:00"),
            ],
            vec![delete(7, "2020-01-02 00:00:00", 9)],
            batch_checkpoint(),
        )
        .expect("list");

        assert_eq!(list.checkpoint(), None);

        list.next_item();
        assert_eq!(
            list.checkpoint().as_deref(),
            Some("2020-01-01 00:00:00,1,,")
        );

        list.next_item();
        assert_eq!(
            list.checkpoint().as_deref(),
            Some("2020-01-01 00:00:00,1,2020-01-02 00:00:00,7")
        );

        list.next_item();
        assert!(list.is_empty());
        assert_eq!(
            list.checkpoint().as_deref(),
            Some("2020-01-05 00:00:00,50,2020-01-02 00:00:00,7")
        );
        assert_eq!(list.next_item(), None);
    }

    #[test]
    fn empty_list_reports_recorded_progress() {
        let list = DocumentList::empty(batch_checkpoint());
        assert_eq!(
            list.checkpoint().as_deref(),
            Some("2020-01-05 00:00:00,50,,")
        );
        assert_eq!(DocumentList::empty(Checkpoint::new()).checkpoint(), None);
    }

    #[test]
    fn rejects_rows_without_keys() {
        let bad = Row::new(vec![(Column::DataId, Value::Int(1))]);
        assert!(DocumentList::from_rows(vec![bad], Vec::new(), Checkpoint::new()).is_err());
    }
}
