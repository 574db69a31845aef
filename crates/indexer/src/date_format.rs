//! Timestamp formatting shared by checkpoints and SQL rendering.
//!
//! Every function here is pure; callers on any thread can use them without
//! coordination.

use crate::query::Dialect;
use chrono::{NaiveDateTime, Timelike};

/// Canonical timestamp layout used in checkpoint strings
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SQL_SERVER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[must_use]
pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
}

/// Drop sub-second precision; repository timestamps compare at second granularity
#[must_use]
pub fn truncate_to_seconds(value: NaiveDateTime) -> NaiveDateTime {
    value.with_nanosecond(0).unwrap_or(value)
}

/// Render a timestamp as a SQL literal for the given dialect
#[must_use]
pub fn sql_literal(value: &NaiveDateTime, dialect: Dialect) -> String {
    match dialect {
        Dialect::TopN => format!("'{}'", value.format(SQL_SERVER_FORMAT)),
        Dialect::RowNumber => format!(
            "TO_DATE('{}', 'YYYY-MM-DD HH24:MI:SS')",
            value.format(TIMESTAMP_FORMAT)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn sample() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2007, 5, 2)
            .and_then(|d| d.and_hms_opt(13, 45, 9))
            .expect("valid date")
    }

    #[test]
    fn formats_and_parses_canonical_layout() {
        let text = format_timestamp(&sample());
        assert_eq!(text, "2007-05-02 13:45:09");
        assert_eq!(parse_timestamp(&text).expect("parse"), sample());
    }

    #[test]
    fn rejects_other_layouts() {
        assert!(parse_timestamp("2007/05/02 13:45:09").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn renders_dialect_literals() {
        assert_eq!(sql_literal(&sample(), Dialect::TopN), "'2007-05-02T13:45:09'");
        assert_eq!(
            sql_literal(&sample(), Dialect::RowNumber),
            "TO_DATE('2007-05-02 13:45:09', 'YYYY-MM-DD HH24:MI:SS')"
        );
    }

    #[test]
    fn truncation_drops_fraction() {
        let precise = sample()
            .with_nanosecond(250_000_000)
            .expect("valid nanos");
        assert_eq!(truncate_to_seconds(precise), sample());
    }

    #[test]
    fn formatting_is_safe_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|offset| {
                std::thread::spawn(move || {
                    let value = sample() + chrono::Duration::seconds(offset);
                    parse_timestamp(&format_timestamp(&value)).expect("parse") == value
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().expect("thread"));
        }
    }
}
