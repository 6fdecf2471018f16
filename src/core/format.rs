//! Purpose: Centralize container format tags and which of them this reader implements.
//! Exports: `ContainerFormat`, `FormatTag`, `SUPPORTED_FORMAT_TAGS`, `format_mismatch_error`.
//! Role: Shared policy for gating container formats before any streaming begins.
//! Invariants: Recognized-but-unimplemented tags are a usage error, never a silent fallback.
//! Invariants: Unrecognized tags are malformed and reported as an invalid source.

use std::fmt;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerFormat {
    Zip,
    Directory,
}

pub const SUPPORTED_FORMAT_TAGS: &[&str] = &["zip", "dir"];
const KNOWN_UNSUPPORTED_TAGS: &[&str] = &["tar", "tgz", "gz", "7z"];

/// Outcome of interpreting a format tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FormatTag {
    Supported(ContainerFormat),
    Unsupported(String),
    Malformed(String),
}

impl FormatTag {
    pub fn parse(tag: &str) -> Self {
        let normalized = tag.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "zip" => FormatTag::Supported(ContainerFormat::Zip),
            "dir" | "directory" => FormatTag::Supported(ContainerFormat::Directory),
            other if KNOWN_UNSUPPORTED_TAGS.contains(&other) => {
                FormatTag::Unsupported(other.to_string())
            }
            _ => FormatTag::Malformed(tag.to_string()),
        }
    }
}

impl ContainerFormat {
    pub fn tag(self) -> &'static str {
        match self {
            ContainerFormat::Zip => "zip",
            ContainerFormat::Directory => "dir",
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

pub fn format_mismatch_error(tag: &str) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(format!("container format {tag:?} is not supported by this reader"))
        .with_hint(format!(
            "Supported formats: {}. Repack the archive or pick a matching source.",
            SUPPORTED_FORMAT_TAGS.join(", ")
        ))
}
