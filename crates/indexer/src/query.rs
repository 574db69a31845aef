//! Typed query model for the repository facade.
//!
//! Queries are built as values and rendered to SQL text per [`Dialect`]. The
//! rendered text is what a database binding executes and what gets logged or
//! attached to errors; the in-memory repository evaluates the typed form
//! directly.

use crate::date_format;
use crate::error::{IndexerError, Result};
use chrono::NaiveDateTime;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Row-limiting flavour of the backing database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `SELECT TOP n ...`
    TopN,
    /// `SELECT * FROM (...) WHERE ROWNUM <= n`
    RowNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    /// Item tree
    DTree,
    /// Audit events
    DAuditNew,
    /// Ancestor closure
    DTreeAncestors,
}

impl View {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::DTree => "DTree",
            Self::DAuditNew => "DAuditNew",
            Self::DTreeAncestors => "DTreeAncestors",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    DataId,
    ParentId,
    OwnerId,
    SubType,
    Name,
    Catalog,
    ModifyDate,
    MimeType,
    DataSize,
    EventId,
    AuditId,
    AuditDate,
    AncestorId,
}

impl Column {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::DataId => "DataID",
            Self::ParentId => "ParentID",
            Self::OwnerId => "OwnerID",
            Self::SubType => "SubType",
            Self::Name => "Name",
            Self::Catalog => "Catalog",
            Self::ModifyDate => "ModifyDate",
            Self::MimeType => "MimeType",
            Self::DataSize => "DataSize",
            Self::EventId => "EventID",
            Self::AuditId => "AuditID",
            Self::AuditDate => "AuditDate",
            Self::AncestorId => "AncestorID",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Text(String),
    Timestamp(NaiveDateTime),
    Null,
}

impl Value {
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Ordering between values of the same kind; `None` across kinds or with null
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn to_sql(&self, dialect: Dialect) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Text(v) => format!("'{}'", v.replace('\'', "''")),
            Self::Timestamp(v) => date_format::sql_literal(v, dialect),
            Self::Null => "NULL".to_string(),
        }
    }
}

/// Left-hand side of a comparison: a column, optionally arithmetically negated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Column(Column),
    Negated(Column),
}

impl Operand {
    #[must_use]
    pub fn column(self) -> Column {
        match self {
            Self::Column(c) | Self::Negated(c) => c,
        }
    }

    fn to_sql(self) -> String {
        match self {
            Self::Column(c) => c.name().to_string(),
            Self::Negated(c) => format!("-{}", c.name()),
        }
    }
}

impl From<Column> for Operand {
    fn from(column: Column) -> Self {
        Self::Column(column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    #[must_use]
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    Compare {
        lhs: Operand,
        op: CompareOp,
        value: Value,
    },
    InList {
        operand: Operand,
        values: Vec<i64>,
        negated: bool,
    },
    InQuery {
        operand: Operand,
        query: Box<Query>,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Free-form SQL supplied by configuration
    Raw(String),
}

impl Predicate {
    #[must_use]
    pub fn compare(lhs: impl Into<Operand>, op: CompareOp, value: Value) -> Self {
        Self::Compare {
            lhs: lhs.into(),
            op,
            value,
        }
    }

    #[must_use]
    pub fn in_list(operand: impl Into<Operand>, values: Vec<i64>) -> Self {
        Self::InList {
            operand: operand.into(),
            values,
            negated: false,
        }
    }

    #[must_use]
    pub fn not_in_list(operand: impl Into<Operand>, values: Vec<i64>) -> Self {
        Self::InList {
            operand: operand.into(),
            values,
            negated: true,
        }
    }

    #[must_use]
    pub fn in_query(operand: impl Into<Operand>, query: Query) -> Self {
        Self::InQuery {
            operand: operand.into(),
            query: Box::new(query),
            negated: false,
        }
    }

    #[must_use]
    pub fn not_in_query(operand: impl Into<Operand>, query: Query) -> Self {
        Self::InQuery {
            operand: operand.into(),
            query: Box::new(query),
            negated: true,
        }
    }

    /// Conjunction that drops `True` terms and flattens nested conjunctions
    #[must_use]
    pub fn and(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut terms = Vec::new();
        for part in parts {
            match part {
                Self::True => {}
                Self::And(inner) => terms.extend(inner),
                other => terms.push(other),
            }
        }
        match terms.len() {
            0 => Self::True,
            1 => terms.remove(0),
            _ => Self::And(terms),
        }
    }

    #[must_use]
    pub fn or(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut terms: Vec<Predicate> = parts.into_iter().collect();
        if terms.iter().any(|t| matches!(t, Self::True)) {
            return Self::True;
        }
        match terms.len() {
            1 => terms.remove(0),
            _ => Self::Or(terms),
        }
    }

    /// Rows strictly after `(time, id)` in `(time_column, id_column)` order
    #[must_use]
    pub fn after(
        time_column: Column,
        id_column: Column,
        time: NaiveDateTime,
        id: i64,
    ) -> Self {
        Self::Or(vec![
            Self::compare(time_column, CompareOp::Gt, Value::Timestamp(time)),
            Self::and([
                Self::compare(time_column, CompareOp::Eq, Value::Timestamp(time)),
                Self::compare(id_column, CompareOp::Gt, Value::Int(id)),
            ]),
        ])
    }

    #[must_use]
    pub fn to_sql(&self, dialect: Dialect) -> String {
        match self {
            Self::True => "1=1".to_string(),
            Self::Compare { lhs, op, value } => {
                format!("{} {} {}", lhs.to_sql(), op.symbol(), value.to_sql(dialect))
            }
            Self::InList {
                operand,
                values,
                negated,
            } => {
                if values.is_empty() {
                    return if *negated { "1=1" } else { "1=0" }.to_string();
                }
                let list = values
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                let keyword = if *negated { "NOT IN" } else { "IN" };
                format!("{} {keyword} ({list})", operand.to_sql())
            }
            Self::InQuery {
                operand,
                query,
                negated,
            } => {
                let keyword = if *negated { "NOT IN" } else { "IN" };
                format!("{} {keyword} ({})", operand.to_sql(), query.to_sql(dialect))
            }
            Self::And(parts) => join_sql(parts, " AND ", dialect, "1=1"),
            Self::Or(parts) => join_sql(parts, " OR ", dialect, "1=0"),
            Self::Not(inner) => format!("NOT ({})", inner.to_sql(dialect)),
            Self::Raw(sql) => format!("({sql})"),
        }
    }
}

fn join_sql(parts: &[Predicate], separator: &str, dialect: Dialect, empty: &str) -> String {
    if parts.is_empty() {
        return empty.to_string();
    }
    parts
        .iter()
        .map(|p| match p {
            Predicate::And(_) | Predicate::Or(_) => format!("({})", p.to_sql(dialect)),
            other => other.to_sql(dialect),
        })
        .collect::<Vec<_>>()
        .join(separator)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub view: View,
    pub columns: Vec<Column>,
    pub filter: Predicate,
    pub order_by: Vec<(Column, SortOrder)>,
    pub limit: Option<usize>,
}

impl Query {
    #[must_use]
    pub fn select(view: View, columns: &[Column]) -> Self {
        Self {
            view,
            columns: columns.to_vec(),
            filter: Predicate::True,
            order_by: Vec::new(),
            limit: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: Column, order: SortOrder) -> Self {
        self.order_by.push((column, order));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ");
        let mut body = String::new();
        body.push_str(&columns);
        body.push_str(" FROM ");
        body.push_str(self.view.name());
        if self.filter != Predicate::True {
            body.push_str(" WHERE ");
            body.push_str(&self.filter.to_sql(dialect));
        }
        if !self.order_by.is_empty() {
            let order = self
                .order_by
                .iter()
                .map(|(c, o)| match o {
                    SortOrder::Ascending => c.name().to_string(),
                    SortOrder::Descending => format!("{} DESC", c.name()),
                })
                .collect::<Vec<_>>()
                .join(", ");
            body.push_str(" ORDER BY ");
            body.push_str(&order);
        }

        match (self.limit, dialect) {
            (None, _) => format!("SELECT {body}"),
            (Some(n), Dialect::TopN) => format!("SELECT TOP {n} {body}"),
            (Some(n), Dialect::RowNumber) => {
                format!("SELECT * FROM (SELECT {body}) WHERE ROWNUM <= {n}")
            }
        }
    }
}

/// One result row: projected columns with their values
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    cells: Vec<(Column, Value)>,
}

impl Row {
    #[must_use]
    pub fn new(cells: Vec<(Column, Value)>) -> Self {
        Self { cells }
    }

    #[must_use]
    pub fn get(&self, column: Column) -> Option<&Value> {
        self.cells
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }

    pub fn int(&self, column: Column) -> Result<i64> {
        self.get(column)
            .and_then(Value::as_int)
            .ok_or_else(|| IndexerError::RowShape(format!("missing integer column {column}")))
    }

    pub fn timestamp(&self, column: Column) -> Result<NaiveDateTime> {
        self.get(column)
            .and_then(Value::as_timestamp)
            .ok_or_else(|| IndexerError::RowShape(format!("missing timestamp column {column}")))
    }

    pub fn cells(&self) -> impl Iterator<Item = &(Column, Value)> {
        self.cells.iter()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column.name(), value)?;
        }
        map.end()
    }
}
