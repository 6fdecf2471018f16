// Core modules: records, parsing, cursors, filtering, merging, containers, errors.
pub mod container;
pub mod cursor;
pub mod error;
pub mod filter;
pub mod format;
pub mod lines;
pub mod merge;
pub mod parser;
pub mod record;
