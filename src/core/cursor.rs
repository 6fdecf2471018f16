// Forward-only per-stream cursor: one line source, one parser, one buffered record.
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{trace, warn};

use crate::core::error::Error;
use crate::core::lines::LineSource;
use crate::core::parser::RecordParser;
use crate::core::record::{ParseContext, Record, Symbol, is_valid_end_time};

pub struct StreamCursor {
    source: Option<Box<dyn LineSource>>,
    parser: Arc<dyn RecordParser>,
    context: ParseContext,
    current: Option<Record>,
    requires_fast_forward: bool,
    line_no: u64,
    skipped_lines: u64,
    failure: Option<Error>,
}

impl StreamCursor {
    /// Build a cursor and prime it with the stream's first valid record.
    pub fn new(
        source: Box<dyn LineSource>,
        parser: Arc<dyn RecordParser>,
        context: ParseContext,
    ) -> Self {
        let mut cursor = Self {
            source: Some(source),
            parser,
            context,
            current: None,
            requires_fast_forward: false,
            line_no: 0,
            skipped_lines: 0,
            failure: None,
        };
        cursor.advance();
        cursor
    }

    pub fn symbol(&self) -> &Symbol {
        &self.context.symbol
    }

    pub fn current(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    pub fn current_end_time(&self) -> Option<OffsetDateTime> {
        self.current.as_ref().map(|record| record.end_time)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }

    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }

    pub(crate) fn requires_fast_forward(&self) -> bool {
        self.requires_fast_forward
    }

    pub(crate) fn set_requires_fast_forward(&mut self, value: bool) {
        self.requires_fast_forward = value;
    }

    /// Read failure that ended the stream early, if any. Returned at most once.
    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }

    pub(crate) fn take_current(&mut self) -> Option<Record> {
        self.current.take()
    }

    /// Drop the current record and load the next valid one.
    /// Returns false (and releases the line source) once the stream is exhausted.
    pub fn advance(&mut self) -> bool {
        self.current = None;
        loop {
            let Some(source) = self.source.as_mut() else {
                return false;
            };
            let line = match source.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.release();
                    return false;
                }
                Err(err) => {
                    let err = err
                        .with_entry(self.context.symbol.as_str())
                        .with_line(self.line_no + 1);
                    warn!(symbol = %self.context.symbol, error = %err, "stream read failed");
                    self.failure = Some(err);
                    self.release();
                    return false;
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match self.parser.parse(&line, &self.context) {
                Ok(record) if is_valid_end_time(record.end_time) => {
                    self.current = Some(record);
                    return true;
                }
                Ok(_) => {
                    self.skipped_lines += 1;
                    trace!(
                        symbol = %self.context.symbol,
                        line = self.line_no,
                        "record without end time skipped"
                    );
                }
                Err(err) => {
                    self.skipped_lines += 1;
                    warn!(
                        symbol = %self.context.symbol,
                        line = self.line_no,
                        error = %err,
                        "unparseable line skipped"
                    );
                }
            }
        }
    }

    /// Skip records until one ends strictly after `bound`. Nothing is consumed when the
    /// current record already does. Returns false when the stream runs out first.
    pub fn fast_forward_past(&mut self, bound: OffsetDateTime) -> bool {
        loop {
            match self.current_end_time() {
                Some(end_time) if end_time > bound => return true,
                Some(_) => {
                    if !self.advance() {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }

    fn release(&mut self) {
        self.source = None;
    }
}

#[cfg(test)]
mod tests {
    use super::StreamCursor;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::lines::{BufLines, LineSource};
    use crate::core::parser::RecordParser;
    use crate::core::record::{MIN_END_TIME, ParseContext, Record, RecordType, Symbol};
    use serde_json::Value;
    use std::io::Cursor;
    use std::sync::Arc;
    use time::OffsetDateTime;
    use time::macros::date;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).expect("timestamp")
    }

    // "<secs>" lines; "min" yields the sentinel end-time.
    fn seconds_parser() -> Arc<dyn RecordParser> {
        Arc::new(|line: &str, ctx: &ParseContext| -> Result<Record, Error> {
            if line == "min" {
                return Ok(Record::new(ctx.symbol.clone(), MIN_END_TIME, Value::Null));
            }
            let secs: i64 = line
                .parse()
                .map_err(|_| Error::new(ErrorKind::Corrupt).with_message("not a number"))?;
            Ok(Record::new(ctx.symbol.clone(), at(secs), Value::from(line)))
        })
    }

    fn cursor(body: &str) -> StreamCursor {
        let source = BufLines::new(Cursor::new(body.as_bytes().to_vec()));
        let context = ParseContext::new(
            Symbol::from("s1"),
            RecordType::new("secs"),
            date!(2024 - 01 - 02),
            false,
        );
        StreamCursor::new(Box::new(source), seconds_parser(), context)
    }

    struct FailingSource {
        lines: Vec<&'static str>,
    }

    impl LineSource for FailingSource {
        fn next_line(&mut self) -> Result<Option<String>, Error> {
            if self.lines.is_empty() {
                return Err(Error::new(ErrorKind::Io).with_message("truncated entry"));
            }
            Ok(Some(self.lines.remove(0).to_string()))
        }
    }

    #[test]
    fn construction_primes_first_record() {
        let cursor = cursor("1\n2\n");
        assert_eq!(cursor.current_end_time(), Some(at(1)));
        assert!(!cursor.is_exhausted());
    }

    #[test]
    fn empty_stream_is_exhausted_after_priming() {
        let cursor = cursor("");
        assert!(cursor.is_exhausted());
        assert!(cursor.source.is_none());
    }

    #[test]
    fn corrupt_and_sentinel_lines_are_skipped() {
        let mut cursor = cursor("1\nbogus\nmin\n\n3\n");
        assert_eq!(cursor.current_end_time(), Some(at(1)));
        assert!(cursor.advance());
        assert_eq!(cursor.current_end_time(), Some(at(3)));
        assert_eq!(cursor.skipped_lines(), 2);
        assert!(!cursor.advance());
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn fast_forward_is_noop_when_already_past_bound() {
        let mut cursor = cursor("5\n6\n");
        assert!(cursor.fast_forward_past(at(4)));
        assert_eq!(cursor.current_end_time(), Some(at(5)));
    }

    #[test]
    fn fast_forward_skips_records_at_or_before_bound() {
        let mut cursor = cursor("1\n2\n2\n4\n");
        assert!(cursor.fast_forward_past(at(2)));
        assert_eq!(cursor.current_end_time(), Some(at(4)));
    }

    #[test]
    fn fast_forward_reports_exhaustion() {
        let mut cursor = cursor("1\n2\n");
        assert!(!cursor.fast_forward_past(at(2)));
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn read_failure_ends_stream_and_is_retained() {
        let source = FailingSource { lines: vec!["1"] };
        let context = ParseContext::new(
            Symbol::from("s1"),
            RecordType::new("secs"),
            date!(2024 - 01 - 02),
            false,
        );
        let mut cursor = StreamCursor::new(Box::new(source), seconds_parser(), context);
        assert_eq!(cursor.current_end_time(), Some(at(1)));
        assert!(!cursor.advance());
        let failure = cursor.take_failure().expect("failure");
        assert_eq!(failure.kind(), ErrorKind::Io);
        assert_eq!(failure.entry(), Some("s1"));
        assert_eq!(failure.line(), Some(2));
        assert!(cursor.take_failure().is_none());
    }
}
