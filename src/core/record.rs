//! Purpose: Define the record, stream identity, and parse-context types of the merge.
//! Exports: `Symbol`, `Record`, `RecordType`, `ParseContext`, `MIN_END_TIME`.
//! Role: Plain data shared by parsers, cursors, and the frontier merger.
//! Invariants: A record whose end-time equals `MIN_END_TIME` is invalid and never surfaces.
//! Invariants: Records are immutable once produced.
use std::borrow::Borrow;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime};

/// Sentinel end-time produced by malformed lines; treated as "no record".
pub const MIN_END_TIME: OffsetDateTime = PrimitiveDateTime::MIN.assume_utc();

pub fn is_valid_end_time(end_time: OffsetDateTime) -> bool {
    end_time != MIN_END_TIME
}

/// Identity of one sub-stream inside a container.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a symbol from a container entry name: last path segment, final extension
    /// stripped. Dotted tickers such as `BRK.B.csv` keep their inner dots.
    pub fn from_entry_name(name: &str) -> Self {
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let stem = match base.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => base,
        };
        Self(stem.to_string())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub symbol: Symbol,
    pub end_time: OffsetDateTime,
    pub data: Value,
}

impl Record {
    pub fn new(symbol: Symbol, end_time: OffsetDateTime, data: Value) -> Self {
        Self {
            symbol,
            end_time,
            data,
        }
    }
}

/// Record-type descriptor carried by a read request; `tag` selects the parser.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordType {
    pub tag: String,
    pub period: Option<Duration>,
}

impl RecordType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            period: None,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }
}

/// Everything a parser may consult besides the raw line.
#[derive(Clone, Debug)]
pub struct ParseContext {
    pub symbol: Symbol,
    pub record_type: RecordType,
    pub date: Date,
    pub live: bool,
}

impl ParseContext {
    pub fn new(symbol: Symbol, record_type: RecordType, date: Date, live: bool) -> Self {
        Self {
            symbol,
            record_type,
            date,
            live,
        }
    }

    /// Midnight UTC of the reference date.
    pub fn day_start(&self) -> OffsetDateTime {
        self.date.midnight().assume_utc()
    }
}
