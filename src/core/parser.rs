//! Purpose: Record parsers and the tag-keyed registry that selects one per read.
//! Exports: `RecordParser`, `ParserRegistry`, `TickParser`, `BarParser`, `JsonlParser`.
//! Role: Boundary between opaque line encodings and typed `Record`s.
//! Invariants: Parsers are pure per line; they never read ahead or keep state.
//! Invariants: Unknown tags are a usage error reported before any streaming begins.
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Value, json};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::core::error::{Error, ErrorKind};
use crate::core::record::{ParseContext, Record};

pub trait RecordParser: Send + Sync {
    fn parse(&self, line: &str, ctx: &ParseContext) -> Result<Record, Error>;
}

impl<F> RecordParser for F
where
    F: Fn(&str, &ParseContext) -> Result<Record, Error> + Send + Sync,
{
    fn parse(&self, line: &str, ctx: &ParseContext) -> Result<Record, Error> {
        self(line, ctx)
    }
}

pub const DEFAULT_BAR_PERIOD: Duration = Duration::minutes(1);

/// `<ms>,<price>,<quantity>`
#[derive(Clone, Copy, Debug, Default)]
pub struct TickParser;

impl RecordParser for TickParser {
    fn parse(&self, line: &str, ctx: &ParseContext) -> Result<Record, Error> {
        let fields = split_fields(line, 3)?;
        let end_time = line_time(fields[0], ctx)?;
        let price: f64 = parse_field(fields[1], "price")?;
        let quantity: f64 = parse_field(fields[2], "quantity")?;
        Ok(Record::new(
            ctx.symbol.clone(),
            end_time,
            json!({ "price": price, "quantity": quantity }),
        ))
    }
}

/// `<ms>,<open>,<high>,<low>,<close>,<volume>`; the bar closes one period after it opens.
#[derive(Clone, Copy, Debug, Default)]
pub struct BarParser;

impl RecordParser for BarParser {
    fn parse(&self, line: &str, ctx: &ParseContext) -> Result<Record, Error> {
        let fields = split_fields(line, 6)?;
        let start = line_time(fields[0], ctx)?;
        let period = ctx.record_type.period.unwrap_or(DEFAULT_BAR_PERIOD);
        let end_time = start.checked_add(period).ok_or_else(|| {
            Error::new(ErrorKind::Corrupt).with_message("bar end time out of range")
        })?;
        let open: f64 = parse_field(fields[1], "open")?;
        let high: f64 = parse_field(fields[2], "high")?;
        let low: f64 = parse_field(fields[3], "low")?;
        let close: f64 = parse_field(fields[4], "close")?;
        let volume: f64 = parse_field(fields[5], "volume")?;
        let start_text = start.format(&Rfc3339).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("bar start time is not representable")
                .with_source(err)
        })?;
        Ok(Record::new(
            ctx.symbol.clone(),
            end_time,
            json!({
                "start": start_text,
                "open": open,
                "high": high,
                "low": low,
                "close": close,
                "volume": volume,
            }),
        ))
    }
}

/// One JSON object per line carrying an RFC 3339 `end_time` (or `time`) field.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonlParser;

impl RecordParser for JsonlParser {
    fn parse(&self, line: &str, ctx: &ParseContext) -> Result<Record, Error> {
        let value: Value = serde_json::from_str(line).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("invalid json")
                .with_source(err)
        })?;
        let Some(object) = value.as_object() else {
            return Err(Error::new(ErrorKind::Corrupt).with_message("expected a json object"));
        };
        let stamp = object
            .get("end_time")
            .or_else(|| object.get("time"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::new(ErrorKind::Corrupt).with_message("missing end_time string field")
            })?;
        let end_time = OffsetDateTime::parse(stamp, &Rfc3339).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message(format!("invalid RFC 3339 time: {stamp}"))
                .with_source(err)
        })?;
        Ok(Record::new(ctx.symbol.clone(), end_time, value))
    }
}

/// Parsers keyed by record-type tag.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn RecordParser>>,
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("tick", Arc::new(TickParser));
        registry.register("bar", Arc::new(BarParser));
        registry.register("jsonl", Arc::new(JsonlParser));
        registry
    }

    pub fn register(&mut self, tag: impl Into<String>, parser: Arc<dyn RecordParser>) {
        self.parsers.insert(tag.into(), parser);
    }

    pub fn with_parser(mut self, tag: impl Into<String>, parser: Arc<dyn RecordParser>) -> Self {
        self.register(tag, parser);
        self
    }

    pub fn get(&self, tag: &str) -> Result<Arc<dyn RecordParser>, Error> {
        self.parsers.get(tag).cloned().ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("unknown record type: {tag}"))
                .with_hint(format!("Known record types: {}.", self.tags().join(", ")))
        })
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags = self.parsers.keys().map(String::as_str).collect::<Vec<_>>();
        tags.sort_unstable();
        tags
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn split_fields(line: &str, expected: usize) -> Result<Vec<&str>, Error> {
    let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
    if fields.len() != expected {
        return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
            "expected {expected} fields, found {}",
            fields.len()
        )));
    }
    Ok(fields)
}

fn parse_field<T: FromStr>(field: &str, name: &str) -> Result<T, Error> {
    field.parse().map_err(|_| {
        Error::new(ErrorKind::Corrupt).with_message(format!("invalid {name}: {field:?}"))
    })
}

// Live lines carry absolute epoch millis; archived lines are offsets from the reference day.
fn line_time(field: &str, ctx: &ParseContext) -> Result<OffsetDateTime, Error> {
    let ms: i64 = parse_field(field, "time")?;
    let out_of_range =
        || Error::new(ErrorKind::Corrupt).with_message(format!("time out of range: {ms}"));
    if ctx.live {
        return OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
            .map_err(|_| out_of_range());
    }
    ctx.day_start()
        .checked_add(Duration::milliseconds(ms))
        .ok_or_else(out_of_range)
}

#[cfg(test)]
mod tests {
    use super::{BarParser, JsonlParser, ParserRegistry, RecordParser, TickParser};
    use crate::core::error::ErrorKind;
    use crate::core::record::{ParseContext, RecordType, Symbol};
    use time::Duration;
    use time::macros::{date, datetime};

    fn ctx(tag: &str) -> ParseContext {
        ParseContext::new(
            Symbol::from("spy"),
            RecordType::new(tag),
            date!(2024 - 01 - 02),
            false,
        )
    }

    #[test]
    fn tick_offsets_from_reference_day() {
        let record = TickParser
            .parse("34200000,472.5,100", &ctx("tick"))
            .expect("parse");
        assert_eq!(record.end_time, datetime!(2024-01-02 9:30 UTC));
        assert_eq!(record.data["price"], 472.5);
        assert_eq!(record.symbol.as_str(), "spy");
    }

    #[test]
    fn tick_live_mode_uses_epoch_millis() {
        let mut live = ctx("tick");
        live.live = true;
        let record = TickParser.parse("1704187800000,1,1", &live).expect("parse");
        assert_eq!(record.end_time, datetime!(2024-01-02 9:30 UTC));
    }

    #[test]
    fn bar_end_time_adds_period() {
        let mut context = ctx("bar");
        context.record_type = RecordType::new("bar").with_period(Duration::minutes(5));
        let record = BarParser
            .parse("34200000,1,2,0.5,1.5,900", &context)
            .expect("parse");
        assert_eq!(record.end_time, datetime!(2024-01-02 9:35 UTC));
        assert_eq!(record.data["start"], "2024-01-02T09:30:00Z");
    }

    #[test]
    fn malformed_lines_are_corrupt() {
        let err = TickParser.parse("abc,1,1", &ctx("tick")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        let err = TickParser.parse("1,2", &ctx("tick")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn jsonl_reads_end_time_field() {
        let record = JsonlParser
            .parse(r#"{"end_time":"2024-01-02T10:00:00Z","v":3}"#, &ctx("jsonl"))
            .expect("parse");
        assert_eq!(record.end_time, datetime!(2024-01-02 10:00 UTC));
        assert_eq!(record.data["v"], 3);
        assert!(JsonlParser.parse("[1,2]", &ctx("jsonl")).is_err());
    }

    #[test]
    fn registry_rejects_unknown_tag_with_hint() {
        let registry = ParserRegistry::with_builtins();
        assert_eq!(registry.tags(), vec!["bar", "jsonl", "tick"]);
        let err = registry.get("quote").err().expect("unknown tag");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.hint().unwrap_or_default().contains("tick"));
    }
}
