//! Purpose: Decide per tick which streams take part in the merge.
//! Exports: `SymbolFilter`, `AllowList`, `DenyList`.
//! Role: Pure predicate consulted by the frontier merger for every active stream.
//! Invariants: Filters hold no per-tick state; results are never cached by the merger.
use std::collections::HashSet;

use crate::core::record::Symbol;

pub trait SymbolFilter {
    fn admits(&self, symbol: &Symbol) -> bool;
}

impl<F> SymbolFilter for F
where
    F: Fn(&Symbol) -> bool,
{
    fn admits(&self, symbol: &Symbol) -> bool {
        self(symbol)
    }
}

/// Admits only the listed symbols.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    symbols: HashSet<Symbol>,
}

impl AllowList {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }
}

impl SymbolFilter for AllowList {
    fn admits(&self, symbol: &Symbol) -> bool {
        self.symbols.contains(symbol)
    }
}

/// Admits everything except the listed symbols.
#[derive(Clone, Debug, Default)]
pub struct DenyList {
    symbols: HashSet<Symbol>,
}

impl DenyList {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }
}

impl SymbolFilter for DenyList {
    fn admits(&self, symbol: &Symbol) -> bool {
        !self.symbols.contains(symbol)
    }
}
