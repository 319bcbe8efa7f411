//! HTTP Client for Filter List Downloads
//!
//! Uses hyper over tokio for plain HTTP/1.1 GET requests.
//! Features:
//! - HTTPS with rustls (memory-safe TLS) and webpki roots
//! - Redirect following with a hop limit
//! - Whole-request timeout and body size limit

use http_body_util::{BodyExt, Empty, Limited};
use hyper::body::Bytes;
use hyper::header::{ACCEPT, HOST, LOCATION, USER_AGENT};
use hyper::{Method, Request, StatusCode};
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};
use url::Url;

/// List download errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status} from {url}")]
    Status { status: StatusCode, url: String },

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Body read error: {0}")]
    BodyError(String),

    #[error("Too many redirects ({0})")]
    TooManyRedirects(usize),
}

impl FetchError {
    /// HTTP status carried by this error, if it is a status error
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Timeout for the whole request, redirects included
    pub timeout: Duration,
    /// User-Agent string
    pub user_agent: String,
    /// Maximum response body size
    pub max_body_size: usize,
    /// Maximum redirect hops
    pub max_redirects: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "RunIT/0.9 (+local)".to_string(),
            max_body_size: 32 * 1024 * 1024, // 32 MB
            max_redirects: 5,
        }
    }
}

/// Successful response
#[derive(Debug)]
pub struct Response {
    /// Status code
    pub status: StatusCode,
    /// Response body
    pub body: Bytes,
    /// Total download time
    pub total_time: Duration,
    /// Final URL (after redirects)
    pub final_url: String,
}

impl Response {
    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Minimal GET client
#[derive(Clone)]
pub struct HttpClient {
    config: HttpClientConfig,
    tls: TlsConnector,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Self {
            config,
            tls: TlsConnector::from(Arc::new(tls_config)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(HttpClientConfig::default())
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// GET a URL, following redirects. Non-2xx final statuses are errors.
    pub async fn get(&self, url: &str) -> Result<Response, FetchError> {
        let timeout = self.config.timeout;
        tokio::time::timeout(timeout, self.get_following(url))
            .await
            .map_err(|_| FetchError::Timeout(timeout))?
    }

    async fn get_following(&self, url: &str) -> Result<Response, FetchError> {
        let start = Instant::now();
        let mut current =
            Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

        for _ in 0..=self.config.max_redirects {
            let (status, location, body) = self.send_once(&current).await?;

            if status.is_redirection() {
                if let Some(location) = location {
                    let next = current
                        .join(&location)
                        .map_err(|e| FetchError::InvalidUrl(format!("{location}: {e}")))?;
                    debug!("Redirect {} -> {}", current, next);
                    current = next;
                    continue;
                }
            }

            if !status.is_success() {
                return Err(FetchError::Status {
                    status,
                    url: current.to_string(),
                });
            }

            let total_time = start.elapsed();
            debug!(
                "HTTP GET {} -> {} ({} bytes, {:?})",
                current,
                status,
                body.len(),
                total_time
            );

            return Ok(Response {
                status,
                body,
                total_time,
                final_url: current.to_string(),
            });
        }

        Err(FetchError::TooManyRedirects(self.config.max_redirects))
    }

    /// One request/response exchange on a fresh connection
    async fn send_once(
        &self,
        url: &Url,
    ) -> Result<(StatusCode, Option<String>, Bytes), FetchError> {
        let is_https = match url.scheme() {
            "https" => true,
            "http" => false,
            other => return Err(FetchError::InvalidUrl(format!("unsupported scheme '{other}'"))),
        };
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl("No host in URL".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| FetchError::InvalidUrl("No port for URL".to_string()))?;

        // IPv6 literals come bracketed from the url crate
        let bare_host = host.trim_start_matches('[').trim_end_matches(']');
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };

        let request = Request::builder()
            .method(Method::GET)
            .uri(target)
            .header(HOST, authority)
            .header(USER_AGENT, &self.config.user_agent)
            .header(ACCEPT, "text/plain, */*")
            .body(Empty::<Bytes>::new())
            .map_err(|e| FetchError::HttpError(e.to_string()))?;

        let stream = TcpStream::connect((bare_host, port))
            .await
            .map_err(|e| FetchError::ConnectionFailed(format!("{bare_host}:{port}: {e}")))?;

        if is_https {
            let server_name = rustls::pki_types::ServerName::try_from(bare_host.to_string())
                .map_err(|_| FetchError::TlsError(format!("Invalid server name '{bare_host}'")))?;
            let tls_stream = self
                .tls
                .connect(server_name, stream)
                .await
                .map_err(|e| FetchError::TlsError(e.to_string()))?;
            self.exchange(tls_stream, request).await
        } else {
            self.exchange(stream, request).await
        }
    }

    async fn exchange<S>(
        &self,
        stream: S,
        request: Request<Empty<Bytes>>,
    ) -> Result<(StatusCode, Option<String>, Bytes), FetchError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| FetchError::HttpError(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                warn!("Connection error: {}", e);
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| FetchError::HttpError(e.to_string()))?;

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = Limited::new(response.into_body(), self.config.max_body_size)
            .collect()
            .await
            .map_err(|e| FetchError::BodyError(e.to_string()))?
            .to_bytes();

        Ok((status, location, body))
    }
}
