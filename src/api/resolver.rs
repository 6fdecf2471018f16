//! Purpose: Resolve source descriptors to locally readable containers.
//! Exports: `SourceResolver`, `CachingResolver`, `ResolverOptions`, `Fetch`, `HttpFetcher`.
//! Role: Only place that touches the network; the merge core only ever sees local paths.
//! Invariants: No retries; a failed fetch is reported once and retry policy is the caller's.
//! Invariants: Expired cache entries are evicted opportunistically before each remote fetch.
//! Invariants: HTTP 404 maps to NotFound, other failures to Transport, empty bodies to Empty.
#![allow(clippy::result_large_err)]

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use super::cache::{DEFAULT_RETENTION, LocalCache};
use super::source::{SourceDescriptor, SourceLocation};
use crate::cache_paths::default_cache_dir;
use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

pub trait SourceResolver {
    fn resolve(&self, source: &SourceDescriptor) -> Result<PathBuf, Error>;
}

/// Transport step for remote sources: stream the body of `url` into `out`.
pub trait Fetch {
    fn fetch(&self, url: &Url, out: &mut dyn io::Write) -> Result<u64, Error>;
}

#[derive(Clone, Debug)]
pub struct ResolverOptions {
    pub cache_dir: PathBuf,
    pub retention: Duration,
    pub fetch_timeout: Duration,
}

impl ResolverOptions {
    pub fn new() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            retention: DEFAULT_RETENTION,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &Url, out: &mut dyn io::Write) -> Result<u64, Error> {
        let response = match self.agent.get(url.as_str()).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => {
                return Err(Error::new(ErrorKind::NotFound)
                    .with_message(format!("remote source not found: {url}")));
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(Error::new(ErrorKind::Transport)
                    .with_message(format!("remote source returned http {code}: {url}")));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Transport)
                    .with_message(format!("failed to fetch {url}"))
                    .with_hint("Check network access, or retry later.")
                    .with_source(err));
            }
        };
        let mut reader = response.into_reader();
        io::copy(&mut reader, out).map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message(format!("download interrupted: {url}"))
                .with_source(err)
        })
    }
}

/// Local paths pass through after a readability check; remote URLs go through the cache.
pub struct CachingResolver<F = HttpFetcher> {
    cache: LocalCache,
    fetcher: F,
}

impl CachingResolver<HttpFetcher> {
    pub fn new(options: ResolverOptions) -> Self {
        let fetcher = HttpFetcher::new(options.fetch_timeout);
        Self::with_fetcher(options, fetcher)
    }
}

impl<F: Fetch> CachingResolver<F> {
    pub fn with_fetcher(options: ResolverOptions, fetcher: F) -> Self {
        Self {
            cache: LocalCache::new(options.cache_dir, options.retention),
            fetcher,
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Run eviction on its own; returns how many cached files were removed.
    pub fn prune(&self) -> Result<usize, Error> {
        let lock = self.cache.lock()?;
        self.cache.evict_expired(&lock)
    }

    fn resolve_remote(&self, url: &Url) -> Result<PathBuf, Error> {
        let lock = self.cache.lock()?;
        if let Err(err) = self.cache.evict_expired(&lock) {
            warn!(error = %err, "cache eviction skipped");
        }
        if let Some(path) = self.cache.lookup(url) {
            return Ok(path);
        }
        info!(url = %url, "fetching remote source");
        self.cache
            .store(&lock, url, |file: &mut File| self.fetcher.fetch(url, file))
    }
}

impl<F: Fetch> SourceResolver for CachingResolver<F> {
    fn resolve(&self, source: &SourceDescriptor) -> Result<PathBuf, Error> {
        match source.location() {
            SourceLocation::Local(path) => check_local(path),
            SourceLocation::Remote(url) => self.resolve_remote(url),
        }
    }
}

fn check_local(path: &Path) -> Result<PathBuf, Error> {
    let metadata = fs::metadata(path).map_err(|err| {
        Error::from(err)
            .with_message("source is not readable")
            .with_path(path)
    })?;
    let empty = if metadata.is_dir() {
        fs::read_dir(path)
            .map_err(|err| Error::from(err).with_path(path))?
            .next()
            .is_none()
    } else {
        metadata.len() == 0
    };
    if empty {
        return Err(Error::new(ErrorKind::Empty)
            .with_message("source is empty")
            .with_path(path));
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::{CachingResolver, Fetch, ResolverOptions, SourceResolver};
    use crate::api::source::SourceDescriptor;
    use crate::core::error::{Error, ErrorKind};
    use std::cell::Cell;
    use std::io::Write;
    use std::time::Duration;
    use url::Url;

    struct FakeFetcher {
        body: Option<&'static [u8]>,
        calls: Cell<usize>,
    }

    impl Fetch for FakeFetcher {
        fn fetch(&self, url: &Url, out: &mut dyn Write) -> Result<u64, Error> {
            self.calls.set(self.calls.get() + 1);
            match self.body {
                Some(body) => {
                    out.write_all(body).expect("write");
                    Ok(body.len() as u64)
                }
                None => Err(Error::new(ErrorKind::NotFound).with_message(url.to_string())),
            }
        }
    }

    fn resolver(
        dir: &std::path::Path,
        body: Option<&'static [u8]>,
    ) -> CachingResolver<FakeFetcher> {
        let options = ResolverOptions::new()
            .with_cache_dir(dir)
            .with_retention(Duration::from_secs(3600));
        CachingResolver::with_fetcher(
            options,
            FakeFetcher {
                body,
                calls: Cell::new(0),
            },
        )
    }

    #[test]
    fn local_sources_are_checked_not_copied() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolver = resolver(&temp.path().join("cache"), None);

        let missing = SourceDescriptor::local(temp.path().join("missing.zip"));
        assert_eq!(resolver.resolve(&missing).unwrap_err().kind(), ErrorKind::NotFound);

        let empty_path = temp.path().join("empty.zip");
        std::fs::write(&empty_path, "").expect("write");
        let empty = SourceDescriptor::local(&empty_path);
        assert_eq!(resolver.resolve(&empty).unwrap_err().kind(), ErrorKind::Empty);

        let empty_dir = temp.path().join("day");
        std::fs::create_dir(&empty_dir).expect("mkdir");
        let dir = SourceDescriptor::local(&empty_dir);
        assert_eq!(resolver.resolve(&dir).unwrap_err().kind(), ErrorKind::Empty);

        let ok_path = temp.path().join("ok.zip");
        std::fs::write(&ok_path, "PK").expect("write");
        assert_eq!(
            resolver.resolve(&SourceDescriptor::local(&ok_path)).expect("ok"),
            ok_path
        );
    }

    #[test]
    fn remote_sources_are_fetched_once_then_served_from_cache() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolver = resolver(temp.path(), Some(b"PK\x03\x04"));
        let url = Url::parse("https://example.com/day.zip").expect("url");
        let source = SourceDescriptor::remote(url);

        let first = resolver.resolve(&source).expect("first");
        let second = resolver.resolve(&source).expect("second");
        assert_eq!(first, second);
        assert!(first.starts_with(temp.path()));
        assert_eq!(resolver.fetcher.calls.get(), 1);
    }

    #[test]
    fn remote_failures_surface_without_retry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolver = resolver(temp.path(), None);
        let source =
            SourceDescriptor::remote(Url::parse("https://example.com/x.zip").expect("url"));
        let err = resolver.resolve(&source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(resolver.fetcher.calls.get(), 1);
    }

    #[test]
    fn empty_remote_body_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolver = resolver(temp.path(), Some(b""));
        let source =
            SourceDescriptor::remote(Url::parse("https://example.com/e.zip").expect("url"));
        assert_eq!(resolver.resolve(&source).unwrap_err().kind(), ErrorKind::Empty);
    }
}
