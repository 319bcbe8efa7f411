//! Request Interceptor
//!
//! Consulted synchronously by the engine before every resource load.
//! The decision never blocks on I/O and never takes a lock: working sets
//! are an immutable snapshot behind an atomic pointer, replaced wholesale
//! when a refresh finishes.
//!
//! Decision order (first match wins):
//! 1. Disabled → allow
//! 2. Host on a trusted or per-site allow suffix → allow
//! 3. Stylesheet / font (by type or extension) → allow
//! 4. Main-frame navigation → allow
//! 5. Host or any parent domain blocked → block
//! 6. Path contains a known fragment → block
//! 7. Otherwise → allow
//!
//! Any error or panic in between fails open.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use arc_swap::ArcSwap;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, trace, warn};
use url::Url;

/// Extensions that are always treated as stylesheet/font loads
const STYLE_FONT_EXTENSIONS: &[&str] = &[".css", ".woff", ".woff2", ".ttf", ".otf", ".eot", ".svg"];

/// Internal evaluation failures; never escape [`RequestInterceptor::decide`]
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("Invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Result of interception check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptResult {
    /// Request is allowed to proceed
    Allow,
    /// Request is blocked
    Blocked { reason: BlockReason },
}

impl InterceptResult {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Reason why a request was blocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockReason {
    /// The host or one of its parents is on the host list (the matched entry)
    HostList(String),
    /// The path contains a known ad/tracking fragment
    PathHint(String),
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostList(d) => write!(f, "Blocked host: {}", d),
            Self::PathHint(p) => write!(f, "Path hint: {}", p),
        }
    }
}

/// Type of resource being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    /// Top-level navigation (main frame)
    Document,
    /// Iframe document
    SubFrame,
    /// CSS stylesheet
    Stylesheet,
    /// JavaScript
    Script,
    /// Image
    Image,
    /// Font
    Font,
    /// XHR/Fetch request
    XmlHttpRequest,
    /// WebSocket
    WebSocket,
    /// Media (video/audio)
    Media,
    /// Beacon / ping
    Ping,
    /// Other/Unknown
    Other,
}

impl ResourceType {
    fn is_style_or_font(self) -> bool {
        matches!(self, Self::Stylesheet | Self::Font)
    }
}

impl std::str::FromStr for ResourceType {
    type Err = std::convert::Infallible;

    /// Accepts the common engine spellings; anything unknown is `Other`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Ok(match normalized.as_str() {
            "document" | "main_frame" | "mainframe" | "navigation" => Self::Document,
            "sub_frame" | "subframe" | "iframe" => Self::SubFrame,
            "stylesheet" | "style" | "css" => Self::Stylesheet,
            "script" | "js" => Self::Script,
            "image" | "img" | "favicon" => Self::Image,
            "font" | "font_resource" => Self::Font,
            "xhr" | "xmlhttprequest" | "fetch" => Self::XmlHttpRequest,
            "websocket" | "ws" => Self::WebSocket,
            "media" | "video" | "audio" => Self::Media,
            "ping" | "beacon" => Self::Ping,
            _ => Self::Other,
        })
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Document => "document",
            Self::SubFrame => "sub_frame",
            Self::Stylesheet => "stylesheet",
            Self::Script => "script",
            Self::Image => "image",
            Self::Font => "font",
            Self::XmlHttpRequest => "xhr",
            Self::WebSocket => "websocket",
            Self::Media => "media",
            Self::Ping => "ping",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Plain blocklist data: what the cache holds and a refresh produces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blocklist {
    pub hosts: HashSet<String>,
    pub paths: BTreeSet<String>,
}

impl Blocklist {
    pub fn new(
        hosts: impl IntoIterator<Item = String>,
        paths: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            hosts: hosts.into_iter().collect(),
            paths: paths.into_iter().collect(),
        }
    }
}

/// Multi-pattern substring matcher over path fragments
struct PathMatcher {
    fragments: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl PathMatcher {
    fn new(paths: &BTreeSet<String>) -> Self {
        let fragments: Vec<String> = paths.iter().filter(|p| !p.is_empty()).cloned().collect();
        let automaton = if fragments.is_empty() {
            None
        } else {
            match AhoCorasickBuilder::new()
                .match_kind(MatchKind::LeftmostFirst)
                .build(&fragments)
            {
                Ok(ac) => Some(ac),
                Err(e) => {
                    // Linear scan below still honors every fragment
                    warn!("Path hint automaton unavailable: {}", e);
                    None
                }
            }
        };
        Self { fragments, automaton }
    }

    fn find(&self, path: &str) -> Option<&str> {
        match &self.automaton {
            Some(ac) => ac
                .find(path)
                .map(|m| self.fragments[m.pattern().as_usize()].as_str()),
            None => self
                .fragments
                .iter()
                .find(|f| path.contains(f.as_str()))
                .map(String::as_str),
        }
    }
}

/// Working sets swapped in as one unit
struct ActiveLists {
    hosts: HashSet<String>,
    paths: PathMatcher,
    path_count: usize,
}

impl ActiveLists {
    fn compile(list: Blocklist) -> Self {
        let paths = PathMatcher::new(&list.paths);
        Self {
            path_count: paths.fragments.len(),
            hosts: list.hosts,
            paths,
        }
    }
}

/// Outcome of a per-site allow toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteToggle {
    /// The suffix is now allowed
    Allowed(String),
    /// The suffix was allowed and no longer is
    Removed(String),
}

/// Host list + path-hint blocker with allow-list overrides
pub struct RequestInterceptor {
    /// Global toggle
    enabled: AtomicBool,
    /// Current blocked hosts and path hints
    lists: ArcSwap<ActiveLists>,
    /// Trusted suffixes, fixed for the process lifetime
    allow_suffixes: HashSet<String>,
    /// Session-only per-site allow-list
    site_allow_suffixes: ArcSwap<HashSet<String>>,
}

impl RequestInterceptor {
    pub fn new(blocklist: Blocklist, allow_suffixes: impl IntoIterator<Item = String>) -> Self {
        let allow_suffixes = allow_suffixes
            .into_iter()
            .map(|s| normalize_host(&s))
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            enabled: AtomicBool::new(true),
            lists: ArcSwap::from_pointee(ActiveLists::compile(blocklist)),
            allow_suffixes,
            site_allow_suffixes: ArcSwap::from_pointee(HashSet::new()),
        }
    }

    /// The per-request decision. Always returns; fails open.
    pub fn decide(&self, url: &str, resource_type: ResourceType) -> InterceptResult {
        fail_open(url, || self.evaluate(url, resource_type))
    }

    fn evaluate(
        &self,
        url: &str,
        resource_type: ResourceType,
    ) -> Result<InterceptResult, InterceptError> {
        if !self.is_enabled() {
            return Ok(InterceptResult::Allow);
        }

        let parsed = Url::parse(url)?;
        let host = normalize_host(parsed.host_str().unwrap_or(""));
        // No host: data:, blob:, about: ... nothing goes over the network
        if host.is_empty() {
            return Ok(InterceptResult::Allow);
        }
        // Match what the server sees: `/%61ds/` is `/ads/`
        let path = percent_decode_str(parsed.path())
            .decode_utf8_lossy()
            .to_lowercase();

        if self.is_allowed_by_suffix(&host) {
            trace!("Allow-listed: {}", url);
            return Ok(InterceptResult::Allow);
        }

        // Type detection differs across engine versions; extensions back it up
        if resource_type.is_style_or_font()
            || STYLE_FONT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        {
            return Ok(InterceptResult::Allow);
        }

        if resource_type == ResourceType::Document {
            return Ok(InterceptResult::Allow);
        }

        let lists = self.lists.load();

        if let Some(matched) = host_blocked(&lists.hosts, &host) {
            trace!("Host list blocked: {} ({})", url, matched);
            return Ok(InterceptResult::Blocked {
                reason: BlockReason::HostList(matched.to_string()),
            });
        }

        if let Some(fragment) = lists.paths.find(&path) {
            trace!("Path hint blocked: {} ({})", url, fragment);
            return Ok(InterceptResult::Blocked {
                reason: BlockReason::PathHint(fragment.to_string()),
            });
        }

        Ok(InterceptResult::Allow)
    }

    /// True if the host matches a trusted or per-site allow suffix
    pub fn is_allowed_by_suffix(&self, host: &str) -> bool {
        let host = normalize_host(host);
        let site = self.site_allow_suffixes.load();
        self.allow_suffixes
            .iter()
            .chain(site.iter())
            .any(|suffix| suffix_matches(&host, suffix))
    }

    /// Publish new working sets in one atomic step
    pub fn replace_lists(&self, blocklist: Blocklist) {
        let lists = ActiveLists::compile(blocklist);
        debug!(
            "Interceptor lists replaced: hosts={} paths={}",
            lists.hosts.len(),
            lists.path_count
        );
        self.lists.store(Arc::new(lists));
    }

    /// (hosts, path hints) currently active
    pub fn list_sizes(&self) -> (usize, usize) {
        let lists = self.lists.load();
        (lists.hosts.len(), lists.path_count)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Flip the global toggle, returning the new state
    pub fn toggle_enabled(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::Relaxed)
    }

    /// Add or remove the host's registrable suffix from the per-site allow-list
    pub fn toggle_site_allow(&self, host: &str) -> Option<SiteToggle> {
        let host = normalize_host(host);
        if host.is_empty() {
            return None;
        }
        let suffix = registrable_suffix(&host).to_string();

        // rcu may rerun the closure on contention; the last run wins
        let mut toggle = SiteToggle::Allowed(suffix.clone());
        self.site_allow_suffixes.rcu(|current| {
            let mut next = HashSet::clone(current);
            toggle = if next.remove(&suffix) {
                SiteToggle::Removed(suffix.clone())
            } else {
                next.insert(suffix.clone());
                SiteToggle::Allowed(suffix.clone())
            };
            next
        });
        Some(toggle)
    }

    /// Per-site suffixes allowed this session
    pub fn site_allow_suffixes(&self) -> Vec<String> {
        let mut suffixes: Vec<String> = self.site_allow_suffixes.load().iter().cloned().collect();
        suffixes.sort();
        suffixes
    }
}

/// Run one evaluation, turning errors and panics into `Allow`
fn fail_open<F>(url: &str, evaluate: F) -> InterceptResult
where
    F: FnOnce() -> Result<InterceptResult, InterceptError>,
{
    match panic::catch_unwind(AssertUnwindSafe(evaluate)) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            trace!("Fail open for {}: {}", url, e);
            InterceptResult::Allow
        }
        Err(_) => {
            warn!("Fail open for {}: panic during evaluation", url);
            InterceptResult::Allow
        }
    }
}

/// Return the entry matching `host` or any of its parent domains.
/// `ads.example.com` checks `ads.example.com`, `example.com`, `com`.
pub fn host_blocked<'a>(blocked: &'a HashSet<String>, host: &str) -> Option<&'a str> {
    let mut part = host.trim_matches('.');
    if part.is_empty() {
        return None;
    }
    loop {
        if let Some(entry) = blocked.get(part) {
            return Some(entry.as_str());
        }
        // Strip leading label
        match part.find('.') {
            Some(idx) => part = &part[idx + 1..],
            None => return None,
        }
        if part.is_empty() {
            return None;
        }
    }
}

/// Last two labels of a host (the host itself when it has fewer)
pub fn registrable_suffix(host: &str) -> &str {
    match host.rmatch_indices('.').nth(1) {
        Some((idx, _)) => &host[idx + 1..],
        None => host,
    }
}

fn suffix_matches(host: &str, suffix: &str) -> bool {
    host == suffix
        || (host.len() > suffix.len()
            && host.ends_with(suffix)
            && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_matches('.').to_lowercase()
}
