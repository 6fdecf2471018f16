//! Purpose: Library crate behind the `tickmerge` CLI: frontier merge over multi-symbol archives.
//! Exports: `core` (records, parsers, cursors, merger, containers, errors), `api` (reader,
//! source resolution, cache), `notice` (stderr notice schema).
//! Role: The merge core is pure and pull-driven; `api` adds resolution and notifications.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
mod cache_paths;
pub mod core;
pub mod notice;
