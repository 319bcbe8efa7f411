//! Blocklist Builder
//!
//! Downloads every configured source and folds the extracted rules into
//! one domain set and one path-fragment set. A failing source is logged
//! and skipped; it never aborts the build.

use crate::config::FilterSource;
use crate::fetcher::ListFetcher;
use crate::filter_list;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one build run
#[derive(Debug, Default, Clone)]
pub struct BuildOutput {
    /// Every domain seen, normalized and deduplicated
    pub hosts: BTreeSet<String>,
    /// Default hints plus every fragment seen (not yet capped)
    pub paths: BTreeSet<String>,
    /// Sources fetched successfully
    pub sources_ok: usize,
    /// Sources that failed to fetch
    pub sources_failed: usize,
}

impl BuildOutput {
    /// True when at least one source was fetched. A run where every source
    /// failed carries nothing worth replacing a cache with.
    pub fn is_usable(&self) -> bool {
        self.sources_ok > 0
    }
}

pub struct BlocklistBuilder {
    fetcher: Arc<dyn ListFetcher>,
}

impl BlocklistBuilder {
    pub fn new(fetcher: Arc<dyn ListFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch and parse every source in order
    pub async fn build(&self, sources: &[FilterSource], default_paths: &[String]) -> BuildOutput {
        let mut output = BuildOutput {
            paths: default_paths.iter().map(|p| p.to_lowercase()).collect(),
            ..BuildOutput::default()
        };

        for source in sources {
            let text = match self.fetcher.fetch(&source.url).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("[Adblock] Failed {}: {}", source.name, e);
                    output.sources_failed += 1;
                    continue;
                }
            };

            let before = output.hosts.len();
            let rules = filter_list::extract(&text);
            output.hosts.extend(rules.domains);
            output.paths.extend(rules.path_hints);
            output.sources_ok += 1;

            info!(
                "[Adblock] {}: +{} hosts (total {})",
                source.name,
                output.hosts.len() - before,
                output.hosts.len()
            );
        }

        output
    }
}
