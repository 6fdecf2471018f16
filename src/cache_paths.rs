//! Purpose: Shared local cache-directory and cache-file naming helpers.
//! Exports: `default_cache_dir` and `cache_file_name`.
//! Role: Keep CLI and resolver cache semantics aligned from one source.
//! Invariants: Default cache directory remains `~/.tickmerge/cache`.
//! Invariants: Cache file names are a pure function of the remote URL.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use url::Url;

pub(crate) fn default_cache_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".tickmerge").join("cache")
}

/// `<sha256(url) hex>[.<ext>]`; the extension of the URL path is kept so format inference works.
pub(crate) fn cache_file_name(url: &Url) -> String {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let mut name = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    let extension = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|ch| ch.is_ascii_alphanumeric()));
    if let Some(ext) = extension {
        name.push('.');
        name.push_str(&ext.to_ascii_lowercase());
    }
    name
}

#[cfg(test)]
mod tests {
    use super::cache_file_name;
    use url::Url;

    #[test]
    fn cache_names_are_stable_and_keep_extension() {
        let url =
            Url::parse("https://data.example.com/equity/20240102_trade.ZIP?sig=1").expect("url");
        let name = cache_file_name(&url);
        assert_eq!(name.len(), 64 + 4);
        assert!(name.ends_with(".zip"));
        assert_eq!(name, cache_file_name(&url));

        let other = Url::parse("https://data.example.com/equity/20240103_trade.zip").expect("url");
        assert_ne!(cache_file_name(&other), name);
    }

    #[test]
    fn extensionless_urls_get_bare_digest() {
        let url = Url::parse("https://data.example.com/archive").expect("url");
        assert_eq!(cache_file_name(&url).len(), 64);
    }
}
