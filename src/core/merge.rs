//! Purpose: Merge many independently paced stream cursors into frontier snapshots.
//! Exports: `FrontierMerger`, `Snapshot`, `StreamFailureHook`.
//! Role: Lazy orchestrator; each `next()` runs exactly one tick.
//! Invariants: Frontier values strictly increase from one snapshot to the next.
//! Invariants: A record is emitted at most once and only when its end-time <= the tick frontier.
//! Invariants: Re-admitted streams skip everything at or before the previous tick's frontier.
//! Invariants: The merger owns every cursor; dropping it releases all line sources.
use std::fmt;
use std::iter::FusedIterator;

use time::OffsetDateTime;
use tracing::debug;

use crate::core::cursor::StreamCursor;
use crate::core::error::Error;
use crate::core::filter::SymbolFilter;
use crate::core::record::{MIN_END_TIME, Record, Symbol};

/// Called once for every stream that ended because of a read failure.
pub type StreamFailureHook = Box<dyn FnMut(&Symbol, Error)>;

/// One tick: the frontier and every record released by it.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    frontier: OffsetDateTime,
    records: Vec<Record>,
}

impl Snapshot {
    fn new(frontier: OffsetDateTime) -> Self {
        Self {
            frontier,
            records: Vec::new(),
        }
    }

    pub fn frontier(&self) -> OffsetDateTime {
        self.frontier
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

pub struct FrontierMerger {
    cursors: Vec<StreamCursor>,
    filter: Option<Box<dyn SymbolFilter>>,
    frontier: Option<OffsetDateTime>,
    previous_frontier: OffsetDateTime,
    ticks: u64,
    on_failure: Option<StreamFailureHook>,
}

impl FrontierMerger {
    /// Take ownership of primed cursors; streams that are already exhausted are dropped.
    pub fn new(cursors: Vec<StreamCursor>) -> Self {
        Self::with_failure_hook(cursors, None)
    }

    pub fn with_failure_hook(
        cursors: Vec<StreamCursor>,
        on_failure: Option<StreamFailureHook>,
    ) -> Self {
        let mut merger = Self {
            cursors,
            filter: None,
            frontier: None,
            previous_frontier: MIN_END_TIME,
            ticks: 0,
            on_failure,
        };
        merger.drop_exhausted();
        merger.frontier = merger
            .cursors
            .iter()
            .filter_map(StreamCursor::current_end_time)
            .min();
        if merger.frontier.is_none() {
            merger.cursors.clear();
        }
        merger
    }

    /// A merger that yields nothing.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Install or clear the symbol filter; takes effect on the next tick.
    pub fn set_filter(&mut self, filter: Option<Box<dyn SymbolFilter>>) {
        self.filter = filter;
    }

    pub fn with_filter(mut self, filter: impl SymbolFilter + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Frontier of the next snapshot, or `None` once the merge has terminated.
    pub fn frontier(&self) -> Option<OffsetDateTime> {
        self.frontier
    }

    pub fn active_streams(&self) -> Vec<&Symbol> {
        self.cursors.iter().map(StreamCursor::symbol).collect()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    fn admits(&self, symbol: &Symbol) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| filter.admits(symbol))
    }

    fn drop_exhausted(&mut self) {
        for cursor in self.cursors.iter_mut() {
            if let Some(err) = cursor.take_failure() {
                if let Some(hook) = self.on_failure.as_mut() {
                    hook(cursor.symbol(), err);
                }
            }
        }
        self.cursors.retain(|cursor| !cursor.is_exhausted());
    }

    fn tick(&mut self, frontier: OffsetDateTime) -> Snapshot {
        let mut snapshot = Snapshot::new(frontier);
        let mut next_frontier: Option<OffsetDateTime> = None;
        let previous = self.previous_frontier;

        for index in 0..self.cursors.len() {
            if !self.admits(self.cursors[index].symbol()) {
                self.cursors[index].set_requires_fast_forward(true);
                continue;
            }
            let cursor = &mut self.cursors[index];
            if cursor.requires_fast_forward() {
                if !cursor.fast_forward_past(previous) {
                    continue;
                }
                cursor.set_requires_fast_forward(false);
            }
            while cursor
                .current_end_time()
                .is_some_and(|end_time| end_time <= frontier)
            {
                if let Some(record) = cursor.take_current() {
                    snapshot.records.push(record);
                }
                if !cursor.advance() {
                    break;
                }
            }
            if let Some(end_time) = cursor.current_end_time() {
                next_frontier = Some(next_frontier.map_or(end_time, |cur| cur.min(end_time)));
            }
        }

        self.ticks += 1;
        match next_frontier {
            Some(next) => {
                self.previous_frontier = frontier;
                self.frontier = Some(next);
                self.drop_exhausted();
            }
            None => {
                self.frontier = None;
                self.drop_exhausted();
                self.cursors.clear();
            }
        }
        debug!(
            tick = self.ticks,
            frontier = %frontier,
            records = snapshot.len(),
            active = self.cursors.len(),
            "frontier tick"
        );
        snapshot
    }
}

impl Iterator for FrontierMerger {
    type Item = Snapshot;

    fn next(&mut self) -> Option<Snapshot> {
        let frontier = self.frontier?;
        Some(self.tick(frontier))
    }
}

impl FusedIterator for FrontierMerger {}

impl fmt::Debug for FrontierMerger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrontierMerger")
            .field("frontier", &self.frontier)
            .field("previous_frontier", &self.previous_frontier)
            .field("active_streams", &self.active_streams())
            .field("ticks", &self.ticks)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}
