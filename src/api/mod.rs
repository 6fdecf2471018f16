//! Purpose: Define the stable public Rust API boundary for tickmerge.
//! Exports: Reader, request, resolver, cache, and source types plus the core data types.
//! Role: Public, additive-only surface for callers that read archives.
//! Invariants: Callers reach cursors, filters, and merger types through this module.
//! Invariants: Network access happens only inside resolvers.

mod cache;
mod reader;
mod resolver;
mod source;

pub use crate::core::cursor::StreamCursor;
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::filter::{AllowList, DenyList, SymbolFilter};
pub use crate::core::format::{ContainerFormat, FormatTag};
pub use crate::core::lines::{BufLines, LineSource};
pub use crate::core::merge::{FrontierMerger, Snapshot};
pub use crate::core::parser::{ParserRegistry, RecordParser};
pub use crate::core::record::{ParseContext, Record, RecordType, Symbol};
pub use cache::{CacheLock, DEFAULT_RETENTION, LocalCache};
pub use reader::{
    ArchiveReader, InvalidSource, InvalidSourceReason, InvalidSourceSink, LogSink, ReadRequest,
};
pub use resolver::{
    CachingResolver, DEFAULT_FETCH_TIMEOUT, Fetch, HttpFetcher, ResolverOptions, SourceResolver,
};
pub use source::{SourceDescriptor, SourceLocation};
