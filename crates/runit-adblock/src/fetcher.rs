//! List Fetcher
//!
//! Retrieves raw filter-list text. Some code hosts serve lists from a
//! branch path (`/master/...` or `/main/...`); when upstream renames the
//! branch the old URL turns into a 404, so those hosts get one retry with
//! the branch segment swapped.

use crate::client::{FetchError, HttpClient, HttpClientConfig};
use crate::config::AdblockConfig;
use async_trait::async_trait;
use hyper::StatusCode;
use tracing::debug;
use url::Url;

/// Source of raw list text, one fetch per configured source.
#[async_trait]
pub trait ListFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Fetcher backed by [`HttpClient`]
pub struct HttpListFetcher {
    client: HttpClient,
    fallback_hosts: Vec<String>,
}

impl HttpListFetcher {
    pub fn new(client: HttpClient, fallback_hosts: Vec<String>) -> Self {
        Self {
            client,
            fallback_hosts,
        }
    }

    pub fn from_config(config: &AdblockConfig) -> Self {
        let client = HttpClient::new(HttpClientConfig {
            timeout: config.fetch_timeout(),
            user_agent: config.user_agent.clone(),
            max_body_size: config.max_list_bytes,
            max_redirects: config.max_redirects,
        });
        Self::new(client, config.branch_fallback_hosts.clone())
    }

    fn has_branch_fallback(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .is_some_and(|host| self.fallback_hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)))
    }
}

#[async_trait]
impl ListFetcher for HttpListFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        match self.client.get(url).await {
            Ok(response) => Ok(response.text()),
            Err(err)
                if err.status() == Some(StatusCode::NOT_FOUND) && self.has_branch_fallback(url) =>
            {
                let Some(swapped) = swap_branch(url) else {
                    return Err(err);
                };
                debug!("404 from {}, retrying as {}", url, swapped);
                Ok(self.client.get(&swapped).await?.text())
            }
            Err(err) => Err(err),
        }
    }
}

/// Swap `/main/` for `/master/` (or the reverse). `None` when the URL
/// carries neither segment.
pub fn swap_branch(url: &str) -> Option<String> {
    if url.contains("/main/") {
        Some(url.replace("/main/", "/master/"))
    } else if url.contains("/master/") {
        Some(url.replace("/master/", "/main/"))
    } else {
        None
    }
}
