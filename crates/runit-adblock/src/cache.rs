//! Blocklist Cache
//!
//! One JSON file holding the last build:
//! `{"last_update": "<RFC 3339 UTC>", "hosts": [...], "paths": [...]}`.
//! The file is always replaced wholesale through a temp file + rename.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info};

/// Cache read/write errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed cache {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Persisted blocklist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCache {
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub hosts: Vec<String>,
    /// `None` when the file predates path hints; callers substitute defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
}

impl BlockCache {
    /// Snapshot of a build: sorted hosts, smallest `max_paths` fragments
    pub fn new(
        hosts: &BTreeSet<String>,
        paths: &BTreeSet<String>,
        max_paths: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            last_update: now,
            hosts: hosts.iter().cloned().collect(),
            paths: Some(paths.iter().take(max_paths).cloned().collect()),
        }
    }

    /// Age relative to `now`; a timestamp in the future counts as zero
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_update).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) < max_age
    }
}

/// Read the cache. `Ok(None)` when the file does not exist.
pub fn load(path: &Path) -> Result<Option<BlockCache>, CacheError> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::io(path, e)),
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|source| CacheError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Whether a rebuild is due: forced, missing, unreadable or stale
pub fn should_refresh(path: &Path, force: bool, max_age: Duration) -> bool {
    should_refresh_at(path, force, Utc::now(), max_age)
}

pub fn should_refresh_at(path: &Path, force: bool, now: DateTime<Utc>, max_age: Duration) -> bool {
    if force {
        return true;
    }
    match load(path) {
        Ok(Some(cache)) => {
            let fresh = cache.is_fresh(now, max_age);
            debug!("Cache {} age {:?} (fresh: {})", path.display(), cache.age(now), fresh);
            !fresh
        }
        Ok(None) => true,
        Err(e) => {
            debug!("Cache unreadable, rebuilding: {}", e);
            true
        }
    }
}

/// Write the cache atomically, creating the parent directory if needed
pub fn persist(cache: &BlockCache, path: &Path) -> Result<(), CacheError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
    }

    let json = serde_json::to_vec(cache).map_err(|source| CacheError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = temp_path(path);
    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(CacheError::io(path, e));
    }

    info!(
        "[Adblock] Cache saved: hosts={}, paths={}",
        cache.hosts.len(),
        cache.paths.as_ref().map_or(0, Vec::len)
    );
    Ok(())
}

/// Modification time, used to notice a finished background build
pub fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "blockcache.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("blockcache.json");

        let cache = BlockCache::new(
            &set(&["b.com", "a.com"]),
            &set(&["/track", "/ads"]),
            1024,
            now(),
        );
        persist(&cache, &path).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded, cache);
        assert_eq!(loaded.hosts, vec!["a.com", "b.com"]);
        assert_eq!(loaded.paths.unwrap(), vec!["/ads", "/track"]);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_path_cap_keeps_smallest() {
        let paths: BTreeSet<String> = (0..1500).map(|i| format!("/p{i:04}")).collect();
        let cache = BlockCache::new(&BTreeSet::new(), &paths, 1024, now());

        let kept = cache.paths.unwrap();
        assert_eq!(kept.len(), 1024);
        assert_eq!(kept.first().unwrap(), "/p0000");
        assert_eq!(kept.last().unwrap(), "/p1023");
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockcache.json");
        assert!(load(&path).unwrap().is_none());

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load(&path), Err(CacheError::Json { .. })));
    }

    #[test]
    fn test_load_accepts_offset_timestamps_and_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockcache.json");
        fs::write(
            &path,
            r#"{"last_update": "2024-06-10T08:30:00.123456+00:00", "hosts": ["ads.example.com"]}"#,
        )
        .unwrap();

        let cache = load(&path).unwrap().unwrap();
        assert_eq!(cache.hosts, vec!["ads.example.com"]);
        assert!(cache.paths.is_none());
        assert_eq!(
            cache.last_update,
            Utc.with_ymd_and_hms(2024, 6, 10, 8, 30, 0).unwrap()
                + chrono::Duration::microseconds(123_456)
        );
    }

    #[test]
    fn test_freshness_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockcache.json");

        let stale = BlockCache::new(
            &set(&["a.com"]),
            &set(&[]),
            1024,
            now() - chrono::Duration::days(7) - chrono::Duration::seconds(1),
        );
        persist(&stale, &path).unwrap();
        assert!(should_refresh_at(&path, false, now(), WEEK));

        let fresh = BlockCache::new(
            &set(&["a.com"]),
            &set(&[]),
            1024,
            now() - chrono::Duration::days(6) - chrono::Duration::hours(23),
        );
        persist(&fresh, &path).unwrap();
        assert!(!should_refresh_at(&path, false, now(), WEEK));
        assert!(should_refresh_at(&path, true, now(), WEEK));
    }

    #[test]
    fn test_should_refresh_when_missing_or_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockcache.json");
        assert!(should_refresh_at(&path, false, now(), WEEK));

        fs::write(&path, "[]").unwrap();
        assert!(should_refresh_at(&path, false, now(), WEEK));
    }

    #[test]
    fn test_write_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // Parent "directory" is a regular file
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let path = blocker.join("blockcache.json");

        let cache = BlockCache::new(&set(&["a.com"]), &set(&[]), 1024, now());
        assert!(matches!(persist(&cache, &path), Err(CacheError::Io { .. })));
    }

    #[test]
    fn test_modified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockcache.json");
        assert!(modified(&path).is_none());
        fs::write(&path, "{}").unwrap();
        assert!(modified(&path).is_some());
    }
}
