//! Purpose: Wire resolution, container opening, cursors, and the merger for one read.
//! Exports: `ArchiveReader`, `ReadRequest`, `InvalidSource`, `InvalidSourceReason`,
//! `InvalidSourceSink`.
//! Role: Public entry point; turns a request into a lazy `FrontierMerger`.
//! Invariants: Only programmer errors (unknown record type, unsupported format) return `Err`.
//! Invariants: Source problems go to the sink and degrade to "no data" for the affected part.
//! Invariants: The sink is fixed at construction; there is no subscriber list.
#![allow(clippy::result_large_err)]

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use time::Date;
use tracing::{debug, warn};

use super::resolver::{CachingResolver, SourceResolver};
use super::source::SourceDescriptor;
use crate::core::container::Container;
use crate::core::cursor::StreamCursor;
use crate::core::error::{Error, ErrorKind};
use crate::core::filter::SymbolFilter;
use crate::core::format::{ContainerFormat, FormatTag, format_mismatch_error};
use crate::core::merge::{FrontierMerger, StreamFailureHook};
use crate::core::parser::ParserRegistry;
use crate::core::record::{ParseContext, RecordType, Symbol};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidSourceReason {
    NotFound,
    Empty,
    Unreadable,
    MalformedFormat,
    Transport,
}

impl InvalidSourceReason {
    fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => InvalidSourceReason::NotFound,
            ErrorKind::Empty => InvalidSourceReason::Empty,
            ErrorKind::Transport => InvalidSourceReason::Transport,
            _ => InvalidSourceReason::Unreadable,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvalidSourceReason::NotFound => "not_found",
            InvalidSourceReason::Empty => "empty",
            InvalidSourceReason::Unreadable => "unreadable",
            InvalidSourceReason::MalformedFormat => "malformed_format",
            InvalidSourceReason::Transport => "transport",
        }
    }
}

/// Side notification: a source, or one entry of it, produced no (further) data.
#[derive(Debug)]
pub struct InvalidSource {
    pub source: SourceDescriptor,
    pub entry: Option<Symbol>,
    pub reason: InvalidSourceReason,
    pub cause: Option<Error>,
}

impl fmt::Display for InvalidSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid source {} ({})", self.source, self.reason.as_str())?;
        if let Some(entry) = &self.entry {
            write!(f, " entry {entry}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

pub trait InvalidSourceSink: Send + Sync {
    fn invalid_source(&self, event: InvalidSource);
}

impl<F> InvalidSourceSink for F
where
    F: Fn(InvalidSource) + Send + Sync,
{
    fn invalid_source(&self, event: InvalidSource) {
        self(event)
    }
}

/// Sink that only logs; used when the caller does not care about notifications.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl InvalidSourceSink for LogSink {
    fn invalid_source(&self, event: InvalidSource) {
        warn!(%event, "invalid source");
    }
}

pub struct ReadRequest {
    pub source: SourceDescriptor,
    pub record_type: RecordType,
    pub date: Date,
    pub live: bool,
    pub filter: Option<Box<dyn SymbolFilter>>,
}

impl ReadRequest {
    pub fn new(source: SourceDescriptor, record_type: RecordType, date: Date) -> Self {
        Self {
            source,
            record_type,
            date,
            live: false,
            filter: None,
        }
    }

    pub fn live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    pub fn with_filter(mut self, filter: impl SymbolFilter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

pub struct ArchiveReader<R = CachingResolver> {
    resolver: R,
    parsers: ParserRegistry,
    sink: Arc<dyn InvalidSourceSink>,
}

impl<R: SourceResolver> ArchiveReader<R> {
    pub fn new(resolver: R, sink: impl InvalidSourceSink + 'static) -> Self {
        Self {
            resolver,
            parsers: ParserRegistry::with_builtins(),
            sink: Arc::new(sink),
        }
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn parsers_mut(&mut self) -> &mut ParserRegistry {
        &mut self.parsers
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Resolve, open, and prime one cursor per entry. Returns a lazy snapshot sequence.
    pub fn read(&self, request: ReadRequest) -> Result<FrontierMerger, Error> {
        let ReadRequest {
            source,
            record_type,
            date,
            live,
            filter,
        } = request;
        let parser = self.parsers.get(&record_type.tag)?;
        if let Some(tag) = source.format_tag() {
            if let FormatTag::Unsupported(tag) = FormatTag::parse(tag) {
                return Err(format_mismatch_error(&tag));
            }
        }

        let Some(container) = self.open_container(&source) else {
            return Ok(FrontierMerger::empty());
        };

        let mut cursors = Vec::with_capacity(container.entries().len());
        for entry in container.entries() {
            match container.open_entry(entry) {
                Ok(lines) => {
                    let context =
                        ParseContext::new(entry.symbol().clone(), record_type.clone(), date, live);
                    cursors.push(StreamCursor::new(lines, Arc::clone(&parser), context));
                }
                Err(err) => self.notify(&source, Some(entry.symbol().clone()), Some(err)),
            }
        }
        debug!(source = %source, streams = cursors.len(), "container opened");

        let sink = Arc::clone(&self.sink);
        let failed_source = source.clone();
        let hook: StreamFailureHook = Box::new(move |symbol: &Symbol, err: Error| {
            sink.invalid_source(InvalidSource {
                source: failed_source.clone(),
                entry: Some(symbol.clone()),
                reason: InvalidSourceReason::from_kind(err.kind()),
                cause: Some(err),
            });
        });
        let mut merger = FrontierMerger::with_failure_hook(cursors, Some(hook));
        merger.set_filter(filter);
        Ok(merger)
    }

    /// List the streams of a source without reading them.
    pub fn entries(&self, source: &SourceDescriptor) -> Result<Vec<Symbol>, Error> {
        if let Some(tag) = source.format_tag() {
            checked_format(FormatTag::parse(tag))?;
        }
        let path = self.resolver.resolve(source)?;
        let container = Container::open(&path, checked_format(source.format_for(&path))?)?;
        Ok(container
            .entries()
            .iter()
            .map(|entry| entry.symbol().clone())
            .collect())
    }

    fn open_container(&self, source: &SourceDescriptor) -> Option<Container> {
        // Explicit tags are checked before resolving, which may fetch.
        if let Some(tag) = source.format_tag() {
            if !matches!(FormatTag::parse(tag), FormatTag::Supported(_)) {
                self.notify_malformed(source);
                return None;
            }
        }
        let path = match self.resolver.resolve(source) {
            Ok(path) => path,
            Err(err) => {
                self.notify(source, None, Some(err));
                return None;
            }
        };
        let format = match source.format_for(&path) {
            FormatTag::Supported(format) => format,
            FormatTag::Unsupported(_) | FormatTag::Malformed(_) => {
                self.notify_malformed(source);
                return None;
            }
        };
        match Container::open(&path, format) {
            Ok(container) => Some(container),
            Err(err) => {
                self.notify(source, None, Some(err));
                None
            }
        }
    }

    fn notify_malformed(&self, source: &SourceDescriptor) {
        self.sink.invalid_source(InvalidSource {
            source: source.clone(),
            entry: None,
            reason: InvalidSourceReason::MalformedFormat,
            cause: None,
        });
    }

    fn notify(&self, source: &SourceDescriptor, entry: Option<Symbol>, cause: Option<Error>) {
        let reason = cause
            .as_ref()
            .map_or(InvalidSourceReason::Unreadable, |err| {
                InvalidSourceReason::from_kind(err.kind())
            });
        self.sink.invalid_source(InvalidSource {
            source: source.clone(),
            entry,
            reason,
            cause,
        });
    }
}

fn checked_format(tag: FormatTag) -> Result<ContainerFormat, Error> {
    match tag {
        FormatTag::Supported(format) => Ok(format),
        FormatTag::Unsupported(tag) => Err(format_mismatch_error(&tag)),
        FormatTag::Malformed(tag) => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("malformed container format tag: {tag:?}"))),
    }
}
