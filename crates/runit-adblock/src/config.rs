//! Adblock Configuration
//!
//! Built-in filter sources, default path hints and trusted CDN suffixes,
//! plus an optional TOML overlay. Every field has a default, so a partial
//! file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A remote filter list or hosts list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSource {
    /// Human-readable name, used in log lines
    pub name: String,
    /// Plain HTTP(S) location of the list
    pub url: String,
}

impl FilterSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Public lists aggregated into the blocklist
const DEFAULT_SOURCES: &[(&str, &str)] = &[
    // EasyList family
    ("EasyList", "https://easylist.to/easylist/easylist.txt"),
    ("EasyPrivacy", "https://easylist.to/easylist/easyprivacy.txt"),
    ("Fanboy Annoyances", "https://easylist.to/easylist/fanboy-annoyance.txt"),
    ("Fanboy Social", "https://easylist-downloads.adblockplus.org/fanboy-social.txt"),
    // uBlock Origin
    (
        "uBO Privacy",
        "https://raw.githubusercontent.com/uBlockOrigin/uAssets/master/filters/privacy.txt",
    ),
    (
        "uBO Badware",
        "https://raw.githubusercontent.com/uBlockOrigin/uAssets/master/filters/badware.txt",
    ),
    (
        "uBO Resource abuse",
        "https://raw.githubusercontent.com/uBlockOrigin/uAssets/master/filters/resource-abuse.txt",
    ),
    (
        "uBO Annoyances",
        "https://raw.githubusercontent.com/uBlockOrigin/uAssets/master/filters/annoyances.txt",
    ),
    (
        "uBO Quick fixes",
        "https://raw.githubusercontent.com/uBlockOrigin/uAssets/master/filters/quick-fixes.txt",
    ),
    // AdGuard
    ("AdGuard Base", "https://filters.adtidy.org/extension/ublock/filters/2.txt"),
    ("AdGuard Tracking", "https://filters.adtidy.org/extension/ublock/filters/3.txt"),
    ("AdGuard URL Tracking", "https://filters.adtidy.org/extension/ublock/filters/17.txt"),
    ("AdGuard Annoyances", "https://filters.adtidy.org/extension/ublock/filters/14.txt"),
    // OISD
    ("OISD Basic", "https://abp.oisd.nl/basic/"),
    // Security
    (
        "NoCoin (anti-mining)",
        "https://raw.githubusercontent.com/hoshsadiq/adblock-nocoin-list/master/hosts.txt",
    ),
    ("Phishing Army ext", "https://phishing.army/download/phishing_army_blocklist_extended.txt"),
    // Hosts / domain-only
    (
        "Peter Lowe",
        "https://pgl.yoyo.org/adservers/serverlist.php?hostformat=hosts&showintro=0&mimetype=plaintext",
    ),
    ("StevenBlack", "https://raw.githubusercontent.com/StevenBlack/hosts/master/hosts"),
    ("URLHaus Hosts", "https://urlhaus.abuse.ch/downloads/hostfile/"),
    // HaGeZi
    (
        "HaGeZi TIF (ABP)",
        "https://raw.githubusercontent.com/hagezi/dns-blocklists/main/adblock/tif.txt",
    ),
    (
        "HaGeZi Multi Light",
        "https://raw.githubusercontent.com/hagezi/dns-blocklists/main/domains/light.txt",
    ),
    (
        "HaGeZi Multi Pro",
        "https://raw.githubusercontent.com/hagezi/dns-blocklists/main/domains/pro.txt",
    ),
];

/// Path fragments that are usually ad/tracking endpoints
const DEFAULT_PATH_HINTS: &[&str] = &[
    "/ads",
    "/adserver",
    "/advert",
    "/banner",
    "/track",
    "/pixel",
    "/analytics",
    "/promotions",
    "/promo",
];

/// Never block these (video platforms, CDNs, WordPress assets, fonts)
const DEFAULT_ALLOW_SUFFIXES: &[&str] = &[
    // YouTube / Google media
    "youtube.com",
    "youtu.be",
    "googlevideo.com",
    "ytimg.com",
    "gstatic.com",
    "googleapis.com",
    "googleusercontent.com",
    "ggpht.com",
    "youtube-nocookie.com",
    // WordPress ecosystem
    "wp.com",
    "wordpress.com",
    "gravatar.com",
    "grvcdn.com",
    "jetpack.com",
    "s.w.org",
    // CDNs, fonts, AMP
    "cdn.jsdelivr.net",
    "cdnjs.cloudflare.com",
    "cloudflare.com",
    "cloudfront.net",
    "bootstrapcdn.com",
    "akamaihd.net",
    "akamaized.net",
    "fonts.googleapis.com",
    "fonts.gstatic.com",
    "ajax.googleapis.com",
    "cdn.ampproject.org",
    "ampproject.org",
];

/// Adblock subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdblockConfig {
    /// Initial state of the global toggle
    pub enabled: bool,
    /// Cache file location; `None` means the per-user default
    pub cache_path: Option<PathBuf>,
    /// Cache age after which a non-forced refresh rebuilds
    pub max_age_days: u64,
    /// Cap on persisted path fragments
    pub max_path_hints: usize,
    /// Per-list fetch timeout
    pub fetch_timeout_secs: u64,
    /// Largest list body accepted
    pub max_list_bytes: usize,
    /// Redirect hops followed per fetch
    pub max_redirects: usize,
    /// User-Agent sent with list downloads
    pub user_agent: String,
    /// Hosts where a 404 retries with `/main/` and `/master/` swapped
    pub branch_fallback_hosts: Vec<String>,
    /// How long a forced update waits for the cache to change
    pub update_wait_secs: u64,
    /// Poll interval while waiting
    pub update_poll_millis: u64,
    /// Path hints active even without a cache
    pub default_path_hints: Vec<String>,
    /// Trusted suffixes that are never blocked
    pub allow_suffixes: Vec<String>,
    /// Lists to aggregate
    pub sources: Vec<FilterSource>,
}

impl Default for AdblockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_path: None,
            max_age_days: 7,
            max_path_hints: 1024,
            fetch_timeout_secs: 30,
            max_list_bytes: 32 * 1024 * 1024,
            max_redirects: 5,
            user_agent: "RunIT/0.9 (+local)".to_string(),
            branch_fallback_hosts: vec!["raw.githubusercontent.com".to_string()],
            update_wait_secs: 20,
            update_poll_millis: 250,
            default_path_hints: DEFAULT_PATH_HINTS.iter().map(|s| s.to_string()).collect(),
            allow_suffixes: DEFAULT_ALLOW_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            sources: DEFAULT_SOURCES
                .iter()
                .map(|(name, url)| FilterSource::new(*name, *url))
                .collect(),
        }
    }
}

impl AdblockConfig {
    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Resolved cache file location
    pub fn cache_file(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(default_cache_path)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days * 24 * 60 * 60)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn update_wait(&self) -> Duration {
        Duration::from_secs(self.update_wait_secs)
    }

    pub fn update_poll(&self) -> Duration {
        // A zero interval would spin the poll loop
        Duration::from_millis(self.update_poll_millis.max(10))
    }
}

/// Per-user data directory for the browser
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("runit")
}

/// Default cache file: `<data dir>/runit/blockcache.json`
pub fn default_cache_path() -> PathBuf {
    data_dir().join("blockcache.json")
}
