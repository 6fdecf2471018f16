//! Purpose: Describe where a container lives and which format tag it carries.
//! Exports: `SourceDescriptor`, `SourceLocation`.
//! Role: Value type shared by resolvers, the archive reader, and invalid-source events.
//! Invariants: Text form is `[<format>:]<path-or-url>`; `http(s)://` always means remote.
//! Invariants: Single-letter prefixes are never tags, so `C:\data` stays a local path.
use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

use crate::core::error::{Error, ErrorKind};
use crate::core::format::{ContainerFormat, FormatTag};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SourceLocation {
    Local(PathBuf),
    Remote(Url),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceDescriptor {
    location: SourceLocation,
    format_tag: Option<String>,
}

impl SourceDescriptor {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            location: SourceLocation::Local(path.into()),
            format_tag: None,
        }
    }

    pub fn remote(url: Url) -> Self {
        Self {
            location: SourceLocation::Remote(url),
            format_tag: None,
        }
    }

    pub fn with_format(mut self, tag: impl Into<String>) -> Self {
        self.format_tag = Some(tag.into());
        self
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("source is empty")
                .with_hint(
                    "Pass a container path or an http(s) URL, optionally prefixed with `zip:` or `dir:`.",
                ));
        }
        if let Some((prefix, rest)) = text.split_once(':') {
            if is_remote_scheme(prefix) {
                return Ok(Self::remote(parse_url(text)?));
            }
            if prefix.len() > 1 && prefix.chars().all(|ch| ch.is_ascii_alphanumeric()) {
                let inner = if rest
                    .split_once(':')
                    .is_some_and(|(scheme, _)| is_remote_scheme(scheme))
                {
                    Self::remote(parse_url(rest)?)
                } else {
                    Self::local(rest)
                };
                return Ok(inner.with_format(prefix));
            }
        }
        Ok(Self::local(text))
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    pub fn format_tag(&self) -> Option<&str> {
        self.format_tag.as_deref()
    }

    /// Explicit tag when present, otherwise inferred from the resolved local path.
    pub fn format_for(&self, resolved: &Path) -> FormatTag {
        if let Some(tag) = &self.format_tag {
            return FormatTag::parse(tag);
        }
        if resolved.is_dir() {
            FormatTag::Supported(ContainerFormat::Directory)
        } else {
            FormatTag::Supported(ContainerFormat::Zip)
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tag) = &self.format_tag {
            write!(f, "{tag}:")?;
        }
        match &self.location {
            SourceLocation::Local(path) => write!(f, "{}", path.display()),
            SourceLocation::Remote(url) => write!(f, "{url}"),
        }
    }
}

fn is_remote_scheme(prefix: &str) -> bool {
    prefix.eq_ignore_ascii_case("http") || prefix.eq_ignore_ascii_case("https")
}

fn parse_url(text: &str) -> Result<Url, Error> {
    Url::parse(text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid source url: {text}"))
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::{SourceDescriptor, SourceLocation};
    use crate::core::format::{ContainerFormat, FormatTag};
    use std::path::PathBuf;

    #[test]
    fn parses_local_remote_and_tagged_forms() {
        let local = SourceDescriptor::parse("/data/20240102.zip").expect("local");
        assert_eq!(
            local.location(),
            &SourceLocation::Local(PathBuf::from("/data/20240102.zip"))
        );
        assert_eq!(local.format_tag(), None);

        let remote = SourceDescriptor::parse("https://cdn.example.com/a.zip").expect("remote");
        assert!(matches!(
            remote.location(),
            SourceLocation::Remote(url) if url.host_str() == Some("cdn.example.com")
        ));

        let tagged = SourceDescriptor::parse("dir:/data/day").expect("tagged");
        assert_eq!(tagged.format_tag(), Some("dir"));
        assert_eq!(tagged.to_string(), "dir:/data/day");

        let tagged_remote =
            SourceDescriptor::parse("zip:https://cdn.example.com/x").expect("tagged");
        assert!(matches!(tagged_remote.location(), SourceLocation::Remote(_)));
        assert_eq!(tagged_remote.format_tag(), Some("zip"));
    }

    #[test]
    fn drive_letters_are_not_tags() {
        let source = SourceDescriptor::parse(r"C:\data\a.zip").expect("path");
        assert_eq!(source.format_tag(), None);
    }

    #[test]
    fn format_is_inferred_from_resolved_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let source = SourceDescriptor::local(temp.path());
        assert_eq!(
            source.format_for(temp.path()),
            FormatTag::Supported(ContainerFormat::Directory)
        );
        let zipped = SourceDescriptor::local("x.zip");
        assert_eq!(
            zipped.format_for(&temp.path().join("x.zip")),
            FormatTag::Supported(ContainerFormat::Zip)
        );
        let tagged = SourceDescriptor::local("x").with_format("rar!");
        assert_eq!(
            tagged.format_for(temp.path()),
            FormatTag::Malformed("rar!".to_string())
        );
    }

    #[test]
    fn empty_source_is_usage_error() {
        assert!(SourceDescriptor::parse("  ").is_err());
    }
}
