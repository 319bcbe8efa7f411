//! Adblocker
//!
//! The browser shell's handle on the blocking subsystem:
//! - `refresh_async`: rebuild in the background when stale (or forced)
//! - `load_cached`: always-usable lists from disk, defaults on failure
//! - `decide`: per-request verdict
//! - `toggle_enabled` / `toggle_site_allow`: UI switches
//!
//! Refreshes run on the tokio runtime and publish their result into the
//! interceptor with a single atomic swap.

use crate::builder::BlocklistBuilder;
use crate::cache::{self, BlockCache};
use crate::config::AdblockConfig;
use crate::fetcher::{HttpListFetcher, ListFetcher};
use crate::interceptor::{Blocklist, InterceptResult, RequestInterceptor, ResourceType, SiteToggle};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What a forced update achieved within the wait window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// The cache file changed before the wait ran out
    pub cache_changed: bool,
    /// Active host count after the reload
    pub hosts: usize,
    /// Active path hint count after the reload
    pub paths: usize,
}

/// On-disk cache summary for status displays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    pub path: PathBuf,
    pub last_update: Option<DateTime<Utc>>,
    pub hosts: usize,
    pub paths: usize,
    pub fresh: bool,
}

/// Clears the in-flight flag when the refresh task ends, however it ends
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Adblocker {
    config: Arc<AdblockConfig>,
    interceptor: Arc<RequestInterceptor>,
    builder: Arc<BlocklistBuilder>,
    runtime: Handle,
    refreshing: Arc<AtomicBool>,
}

impl Adblocker {
    /// Adblocker downloading over HTTP(S)
    pub fn new(config: AdblockConfig, runtime: Handle) -> Self {
        let fetcher = Arc::new(HttpListFetcher::from_config(&config));
        Self::with_fetcher(config, fetcher, runtime)
    }

    pub fn with_fetcher(
        config: AdblockConfig,
        fetcher: Arc<dyn ListFetcher>,
        runtime: Handle,
    ) -> Self {
        let interceptor = RequestInterceptor::new(
            Blocklist::new(Vec::new(), config.default_path_hints.iter().cloned()),
            config.allow_suffixes.iter().cloned(),
        );
        interceptor.set_enabled(config.enabled);

        Self {
            config: Arc::new(config),
            interceptor: Arc::new(interceptor),
            builder: Arc::new(BlocklistBuilder::new(fetcher)),
            runtime,
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &AdblockConfig {
        &self.config
    }

    /// Shared interceptor for the engine's request hook
    pub fn interceptor(&self) -> Arc<RequestInterceptor> {
        Arc::clone(&self.interceptor)
    }

    /// Startup: install whatever is cached, then kick off a refresh if due.
    /// The refresh swaps after the cached lists, never before.
    pub fn start(&self) {
        self.reload_from_cache();
        self.refresh_async(false);
    }

    /// Whether a background refresh is running
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Rebuild in the background. Returns `None` when the cache is fresh
    /// (and `force` is false) or another refresh is already running.
    pub fn refresh_async(&self, force: bool) -> Option<JoinHandle<()>> {
        let cache_path = self.config.cache_file();
        if !cache::should_refresh(&cache_path, force, self.config.max_age()) {
            debug!("[Adblock] cache fresh, skipping update");
            return None;
        }
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[Adblock] update already running");
            return None;
        }

        let guard = InFlight(Arc::clone(&self.refreshing));
        let config = Arc::clone(&self.config);
        let builder = Arc::clone(&self.builder);
        let interceptor = Arc::clone(&self.interceptor);

        Some(self.runtime.spawn(async move {
            let _guard = guard;
            run_refresh(&config, &builder, &interceptor, force).await;
        }))
    }

    /// Lists from the cache file. Missing file: forced rebuild in the
    /// background and defaults now. Unreadable file: defaults.
    pub fn load_cached(&self) -> Blocklist {
        let path = self.config.cache_file();
        match cache::load(&path) {
            Ok(Some(cache)) => self.blocklist_from_cache(cache),
            Ok(None) => {
                info!("[Adblock] no cache at {}, building", path.display());
                self.refresh_async(true);
                self.defaults()
            }
            Err(e) => {
                warn!("[Adblock] {}", e);
                self.defaults()
            }
        }
    }

    /// Load from disk and swap into the interceptor; returns (hosts, paths)
    pub fn reload_from_cache(&self) -> (usize, usize) {
        let blocklist = self.load_cached();
        self.interceptor.replace_lists(blocklist);
        let (hosts, paths) = self.interceptor.list_sizes();
        info!("[Adblock] reloaded: hosts={} paths={}", hosts, paths);
        (hosts, paths)
    }

    /// Forced refresh with a time-boxed wait for the cache to change.
    /// The build keeps running if the wait ends first.
    pub async fn force_update(&self) -> UpdateOutcome {
        let cache_path = self.config.cache_file();
        let before = cache::modified(&cache_path);
        info!("[Adblock] forced update requested");

        self.refresh_async(true);

        let changed = || {
            let now_modified = cache::modified(&cache_path);
            now_modified.is_some() && now_modified != before
        };
        let started = Instant::now();
        let deadline = started + self.config.update_wait();
        while Instant::now() < deadline {
            tokio::time::sleep(self.config.update_poll()).await;
            if changed() {
                debug!("[Adblock] cache changed after {:?}", started.elapsed());
                break;
            }
            if !self.is_refreshing() {
                break;
            }
        }
        // The build may have finished between the two checks above
        let cache_changed = changed();
        if !cache_changed {
            debug!("[Adblock] update ended without a new cache");
        }

        let (hosts, paths) = self.reload_from_cache();
        UpdateOutcome {
            cache_changed,
            hosts,
            paths,
        }
    }

    /// Cache file summary; reads the file
    pub fn cache_status(&self) -> CacheStatus {
        let path = self.config.cache_file();
        let cache = cache::load(&path).ok().flatten();
        let now = Utc::now();
        CacheStatus {
            last_update: cache.as_ref().map(|c| c.last_update),
            hosts: cache.as_ref().map_or(0, |c| c.hosts.len()),
            paths: cache
                .as_ref()
                .and_then(|c| c.paths.as_ref())
                .map_or(0, Vec::len),
            fresh: cache
                .as_ref()
                .is_some_and(|c| c.is_fresh(now, self.config.max_age())),
            path,
        }
    }

    pub fn decide(&self, url: &str, resource_type: ResourceType) -> InterceptResult {
        self.interceptor.decide(url, resource_type)
    }

    pub fn toggle_enabled(&self) -> bool {
        let enabled = self.interceptor.toggle_enabled();
        info!("[Adblock] {}", if enabled { "ENABLED" } else { "DISABLED" });
        enabled
    }

    pub fn toggle_site_allow(&self, host: &str) -> Option<SiteToggle> {
        let toggle = self.interceptor.toggle_site_allow(host);
        match &toggle {
            Some(SiteToggle::Allowed(s)) => info!("[Adblock] allowed site: {}", s),
            Some(SiteToggle::Removed(s)) => info!("[Adblock] removed site allow: {}", s),
            None => {}
        }
        toggle
    }

    fn defaults(&self) -> Blocklist {
        Blocklist::new(Vec::new(), self.config.default_path_hints.iter().cloned())
    }

    fn blocklist_from_cache(&self, cache: BlockCache) -> Blocklist {
        let paths = cache
            .paths
            .unwrap_or_else(|| self.config.default_path_hints.clone());
        Blocklist::new(cache.hosts, paths)
    }
}

/// Build → persist → swap. A run with no reachable source changes nothing.
async fn run_refresh(
    config: &AdblockConfig,
    builder: &BlocklistBuilder,
    interceptor: &RequestInterceptor,
    force: bool,
) {
    info!("[Adblock] update start{}", if force { " (force)" } else { "" });

    let output = builder.build(&config.sources, &config.default_path_hints).await;
    if !output.is_usable() {
        warn!(
            "[Adblock] all {} sources failed, keeping previous lists",
            output.sources_failed
        );
        return;
    }

    let snapshot = BlockCache::new(&output.hosts, &output.paths, config.max_path_hints, Utc::now());
    let cache_path = config.cache_file();
    let to_write = snapshot.clone();
    let written = tokio::task::spawn_blocking(move || cache::persist(&to_write, &cache_path)).await;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("[Adblock] cache save error: {}", e),
        Err(e) => warn!("[Adblock] cache save task failed: {}", e),
    }

    // In-memory lists match what was persisted, cap included
    interceptor.replace_lists(Blocklist::new(
        snapshot.hosts,
        snapshot.paths.unwrap_or_default(),
    ));
    info!(
        "[Adblock] update done: {} ok, {} failed",
        output.sources_ok, output.sources_failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::fake::FakeFetcher;
    use crate::config::FilterSource;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn config(dir: &tempfile::TempDir) -> AdblockConfig {
        AdblockConfig {
            cache_path: Some(dir.path().join("blockcache.json")),
            sources: vec![
                FilterSource::new("ABP", "http://lists/abp.txt"),
                FilterSource::new("Hosts", "http://lists/hosts"),
            ],
            default_path_hints: vec!["/ads".to_string()],
            allow_suffixes: vec!["cdn.example.net".to_string()],
            update_wait_secs: 5,
            update_poll_millis: 20,
            ..AdblockConfig::default()
        }
    }

    fn fetcher() -> Arc<FakeFetcher> {
        Arc::new(
            FakeFetcher::default()
                .with("http://lists/abp.txt", "||doubleclick.net^\n/banner/\n")
                .with("http://lists/hosts", "0.0.0.0 tracker.example.org\n"),
        )
    }

    #[tokio::test]
    async fn test_refresh_persists_and_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let adblocker = Adblocker::with_fetcher(config(&dir), fetcher(), Handle::current());

        let handle = adblocker.refresh_async(false).expect("no cache yet, refresh due");
        handle.await.unwrap();

        let status = adblocker.cache_status();
        assert!(status.fresh);
        assert_eq!(status.hosts, 2);
        assert_eq!(status.paths, 2);
        assert_eq!(adblocker.interceptor().list_sizes(), (2, 2));
        assert!(adblocker
            .decide("https://ads.doubleclick.net/x.js", ResourceType::Script)
            .is_blocked());

        // Fresh cache: a non-forced refresh is a no-op
        assert!(adblocker.refresh_async(false).is_none());
    }

    #[tokio::test]
    async fn test_refresh_is_single_flight() {
        let dir = tempfile::tempdir().unwrap();
        let adblocker = Adblocker::with_fetcher(config(&dir), fetcher(), Handle::current());

        let first = adblocker.refresh_async(true);
        assert!(first.is_some());
        assert!(adblocker.refresh_async(true).is_none());
        first.unwrap().await.unwrap();
        assert!(!adblocker.is_refreshing());
        assert!(adblocker.refresh_async(true).is_some());
    }

    #[tokio::test]
    async fn test_all_sources_failing_keeps_previous_cache() {
        let dir = tempfile::tempdir().unwrap();
        let good = Adblocker::with_fetcher(config(&dir), fetcher(), Handle::current());
        good.refresh_async(true).unwrap().await.unwrap();
        let before = good.cache_status();

        let broken = Adblocker::with_fetcher(
            config(&dir),
            Arc::new(FakeFetcher::default()),
            Handle::current(),
        );
        broken.reload_from_cache();
        broken.refresh_async(true).unwrap().await.unwrap();

        assert_eq!(broken.cache_status(), before);
        assert_eq!(broken.interceptor().list_sizes(), (2, 2));
    }

    #[tokio::test]
    async fn test_load_cached_without_file_returns_defaults_and_builds() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fetcher();
        let adblocker = Adblocker::with_fetcher(config(&dir), fake.clone(), Handle::current());

        let lists = adblocker.load_cached();
        assert!(lists.hosts.is_empty());
        assert_eq!(lists.paths.into_iter().collect::<Vec<_>>(), vec!["/ads"]);
        assert!(adblocker.is_refreshing());

        // The forced build lands on disk shortly after
        let deadline = Instant::now() + Duration::from_secs(5);
        while adblocker.is_refreshing() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(adblocker.cache_status().hosts, 2);
        assert_eq!(fake.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_load_cached_corrupt_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        std::fs::write(config.cache_file(), "garbage").unwrap();
        let adblocker = Adblocker::with_fetcher(config, fetcher(), Handle::current());

        let lists = adblocker.load_cached();
        assert!(lists.hosts.is_empty());
        assert_eq!(lists.paths.len(), 1);
        assert!(!adblocker.is_refreshing());
    }

    #[tokio::test]
    async fn test_force_update_waits_for_cache() {
        let dir = tempfile::tempdir().unwrap();
        let adblocker = Adblocker::with_fetcher(config(&dir), fetcher(), Handle::current());

        let outcome = adblocker.force_update().await;
        assert_eq!(
            outcome,
            UpdateOutcome {
                cache_changed: true,
                hosts: 2,
                paths: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_force_update_gives_up_when_nothing_changes() {
        let dir = tempfile::tempdir().unwrap();
        let adblocker = Adblocker::with_fetcher(
            config(&dir),
            Arc::new(FakeFetcher::default()),
            Handle::current(),
        );

        let outcome = adblocker.force_update().await;
        assert!(!outcome.cache_changed);
        assert_eq!(outcome.hosts, 0);
        assert_eq!(outcome.paths, 1);
    }

    #[tokio::test]
    async fn test_refresh_caps_path_hints() {
        let dir = tempfile::tempdir().unwrap();
        let list: String = (0..1100).map(|i| format!("/frag{i:04}/\n")).collect();
        let fake = Arc::new(FakeFetcher::default().with("http://lists/abp.txt", &list));
        let adblocker = Adblocker::with_fetcher(config(&dir), fake, Handle::current());

        adblocker.refresh_async(true).unwrap().await.unwrap();

        let on_disk = cache::load(&adblocker.config().cache_file()).unwrap().unwrap();
        let paths = on_disk.paths.unwrap();
        assert_eq!(paths.len(), 1024);
        // "/ads" sorts first, so the default hint survives the cap
        assert_eq!(paths.first().unwrap(), "/ads");
        assert_eq!(paths.last().unwrap(), "/frag1022/");
        assert_eq!(adblocker.interceptor().list_sizes().1, 1024);
        assert!(!adblocker
            .decide("https://x.test/frag1099/a.js", ResourceType::Script)
            .is_blocked());
    }

    #[tokio::test]
    async fn test_start_installs_cache_before_refreshing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let stale = BlockCache::new(
            &BTreeSet::from(["old.example".to_string()]),
            &BTreeSet::from(["/ads".to_string()]),
            1024,
            Utc::now() - chrono::Duration::days(8),
        );
        cache::persist(&stale, &config.cache_file()).unwrap();
        let adblocker = Adblocker::with_fetcher(config, fetcher(), Handle::current());

        adblocker.start();
        // Stale lists are active until the refresh lands
        assert!(adblocker.is_refreshing());
        assert!(adblocker
            .decide("https://old.example/x.js", ResourceType::Script)
            .is_blocked());

        let deadline = Instant::now() + Duration::from_secs(5);
        while adblocker.is_refreshing() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(adblocker.interceptor().list_sizes(), (2, 2));
        assert!(!adblocker
            .decide("https://old.example/x.js", ResourceType::Script)
            .is_blocked());
    }

    #[tokio::test]
    async fn test_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let adblocker = Adblocker::with_fetcher(config(&dir), fetcher(), Handle::current());
        adblocker.refresh_async(true).unwrap().await.unwrap();

        let url = "https://pixel.tracker.example.org/p.gif";
        assert!(adblocker.decide(url, ResourceType::Image).is_blocked());

        assert!(!adblocker.toggle_enabled());
        assert!(!adblocker.decide(url, ResourceType::Image).is_blocked());
        assert!(adblocker.toggle_enabled());

        assert_eq!(
            adblocker.toggle_site_allow("pixel.tracker.example.org"),
            Some(SiteToggle::Allowed("example.org".to_string()))
        );
        assert!(!adblocker.decide(url, ResourceType::Image).is_blocked());
    }

    #[tokio::test]
    async fn test_static_allow_suffix_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let adblocker = Adblocker::with_fetcher(config(&dir), fetcher(), Handle::current());
        adblocker.refresh_async(true).unwrap().await.unwrap();

        assert!(!adblocker
            .decide("https://cdn.example.net/ads/x.js", ResourceType::Script)
            .is_blocked());
        assert!(adblocker
            .decide("https://static.example.net/ads/x.js", ResourceType::Script)
            .is_blocked());
    }
}
