//! Purpose: Local cache directory for remotely fetched containers with age-based eviction.
//! Exports: `LocalCache`, `CacheLock`, `DEFAULT_RETENTION`.
//! Role: Swappable collaborator of the caching resolver; knows nothing about merging.
//! Invariants: Cache mutations (store, evict) happen under an exclusive lock file.
//! Invariants: Stored files appear atomically (temp file + rename); readers never see partials.
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs2::FileExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache_paths::cache_file_name;
use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const LOCK_FILE: &str = ".lock";
const PARTIAL_SUFFIX: &str = ".part";

#[derive(Clone, Debug)]
pub struct LocalCache {
    dir: PathBuf,
    retention: Duration,
}

pub struct CacheLock {
    file: File,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl LocalCache {
    pub fn new(dir: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            dir: dir.into(),
            retention,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn path_for(&self, url: &Url) -> PathBuf {
        self.dir.join(cache_file_name(url))
    }

    pub fn lock(&self) -> Result<CacheLock, Error> {
        fs::create_dir_all(&self.dir).map_err(|err| {
            Error::from(err)
                .with_message("failed to create cache directory")
                .with_path(&self.dir)
        })?;
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| Error::from(err).with_path(&path))?;
        file.lock_exclusive().map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("failed to lock cache directory")
                .with_path(&path)
                .with_source(err)
        })?;
        Ok(CacheLock { file })
    }

    /// Fresh, non-empty cached copy of `url`, if any.
    pub fn lookup(&self, url: &Url) -> Option<PathBuf> {
        let path = self.path_for(url);
        let metadata = fs::metadata(&path).ok()?;
        if !metadata.is_file() || metadata.len() == 0 {
            return None;
        }
        if self.is_expired(metadata.modified().ok()?, SystemTime::now()) {
            return None;
        }
        debug!(url = %url, path = %path.display(), "cache hit");
        Some(path)
    }

    /// Write `url`'s content through `fill` into the cache. Caller holds the lock.
    pub fn store<F>(&self, _lock: &CacheLock, url: &Url, fill: F) -> Result<PathBuf, Error>
    where
        F: FnOnce(&mut File) -> Result<u64, Error>,
    {
        let path = self.path_for(url);
        let partial = path.with_file_name(format!("{}{PARTIAL_SUFFIX}", cache_file_name(url)));
        let mut file = File::create(&partial).map_err(|err| Error::from(err).with_path(&partial))?;
        let written = match fill(&mut file).and_then(|written| {
            file.sync_all()
                .map_err(|err| Error::from(err).with_path(&partial))?;
            Ok(written)
        }) {
            Ok(written) => written,
            Err(err) => {
                drop(file);
                let _ = fs::remove_file(&partial);
                return Err(err);
            }
        };
        drop(file);
        if written == 0 {
            let _ = fs::remove_file(&partial);
            return Err(Error::new(ErrorKind::Empty)
                .with_message(format!("remote source is empty: {url}")));
        }
        fs::rename(&partial, &path).map_err(|err| Error::from(err).with_path(&path))?;
        info!(url = %url, bytes = written, path = %path.display(), "cached remote source");
        Ok(path)
    }

    /// Remove cached files older than the retention window. Caller holds the lock.
    pub fn evict_expired(&self, _lock: &CacheLock) -> Result<usize, Error> {
        self.evict_older_than(SystemTime::now())
    }

    fn evict_older_than(&self, now: SystemTime) -> Result<usize, Error> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(Error::from(err).with_path(&self.dir)),
        };
        let mut removed = 0;
        for item in read_dir {
            let item = item.map_err(|err| Error::from(err).with_path(&self.dir))?;
            if item.file_name() == LOCK_FILE {
                continue;
            }
            let path = item.path();
            let Ok(metadata) = item.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if !self.is_expired(modified, now) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => warn!(path = %path.display(), error = %err, "cache eviction failed"),
            }
        }
        if removed > 0 {
            info!(dir = %self.dir.display(), removed, "evicted expired cache entries");
        }
        Ok(removed)
    }

    fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        now.duration_since(modified)
            .is_ok_and(|age| age > self.retention)
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::LocalCache;
    use crate::core::error::ErrorKind;
    use std::fs::{self, File};
    use std::io::Write;
    use std::time::{Duration, SystemTime};
    use url::Url;

    fn age_file(path: &std::path::Path, age: Duration) {
        let file = File::options().write(true).open(path).expect("open");
        file.set_modified(SystemTime::now() - age).expect("set mtime");
    }

    #[test]
    fn store_then_lookup_round_trips_through_rename() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = LocalCache::new(temp.path().join("cache"), Duration::from_secs(3600));
        let url = Url::parse("https://example.com/a.zip").expect("url");
        assert!(cache.lookup(&url).is_none());

        let lock = cache.lock().expect("lock");
        let path = cache
            .store(&lock, &url, |file| {
                file.write_all(b"PK").expect("write");
                Ok(2)
            })
            .expect("store");
        assert_eq!(cache.lookup(&url), Some(path.clone()));
        assert_eq!(fs::read(&path).expect("read"), b"PK");
        let leftovers = fs::read_dir(cache.dir())
            .expect("list")
            .filter_map(Result::ok)
            .filter(|item| item.file_name().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn empty_download_is_rejected_and_not_cached() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = LocalCache::new(temp.path(), Duration::from_secs(3600));
        let url = Url::parse("https://example.com/empty.zip").expect("url");
        let lock = cache.lock().expect("lock");
        let err = cache.store(&lock, &url, |_| Ok(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Empty);
        assert!(!cache.path_for(&url).exists());
    }

    #[test]
    fn eviction_removes_only_expired_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = LocalCache::new(temp.path(), Duration::from_secs(3600));
        let old = temp.path().join("old.zip");
        let fresh = temp.path().join("fresh.zip");
        fs::write(&old, "x").expect("old");
        fs::write(&fresh, "y").expect("fresh");
        age_file(&old, Duration::from_secs(7200));

        let lock = cache.lock().expect("lock");
        assert_eq!(cache.evict_expired(&lock).expect("evict"), 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(temp.path().join(".lock").exists());
    }

    #[test]
    fn expired_entries_miss_on_lookup() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = LocalCache::new(temp.path(), Duration::from_secs(60));
        let url = Url::parse("https://example.com/b.zip").expect("url");
        fs::write(cache.path_for(&url), "PK").expect("write");
        assert!(cache.lookup(&url).is_some());
        age_file(&cache.path_for(&url), Duration::from_secs(120));
        assert!(cache.lookup(&url).is_none());
    }
}
