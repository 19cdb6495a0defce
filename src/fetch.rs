use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = concat!("page_pulse/", env!("CARGO_PKG_VERSION"));
const BASE_BACKOFF_MS: u64 = 2000;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-request policy handed to the fetcher as-is.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Opaque proxy configuration. `HttpFetcher::new` reads it once to build
    /// its clients; `fetch` does not look at it.
    pub proxy: Option<serde_json::Value>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            proxy: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("timed out after {secs}s fetching {url}")]
    Timeout { url: String, secs: u64 },
    #[error("HTTP error for {url}: {message}")]
    Http { url: String, message: String },
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("bad proxy configuration: {0}")]
    Proxy(String),
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Http { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A fetched response body, ready to be parsed.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedPage {
    /// Missing content type is treated as HTML.
    pub fn is_html(&self) -> bool {
        match &self.content_type {
            None => true,
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml")
            }
        }
    }

    pub fn parse(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

/// Network retrieval, retry and proxying, as seen by the crawler.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage, FetchError>;
}

pub fn validate_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxySettings {
    #[serde(default)]
    proxy_urls: Vec<String>,
    #[serde(default)]
    use_apify_proxy: bool,
}

/// reqwest-backed fetcher. Proxies are bound when the fetcher is built and
/// rotated round-robin per attempt.
pub struct HttpFetcher {
    clients: Vec<Client>,
    next: AtomicUsize,
    backoff: Duration,
}

impl HttpFetcher {
    pub fn new(options: &FetchOptions) -> Result<Self, FetchError> {
        let settings = match &options.proxy {
            Some(value) => ProxySettings::deserialize(value)
                .map_err(|e| FetchError::Proxy(e.to_string()))?,
            None => ProxySettings::default(),
        };
        if settings.use_apify_proxy {
            warn!("useApifyProxy is not supported here, only proxyUrls are used");
        }

        let clients = if settings.proxy_urls.is_empty() {
            vec![build_client(None)?]
        } else {
            settings
                .proxy_urls
                .iter()
                .map(|p| build_client(Some(p)))
                .collect::<Result<Vec<_>, _>>()?
        };
        debug!(clients = clients.len(), "HTTP fetcher ready");

        Ok(HttpFetcher {
            clients,
            next: AtomicUsize::new(0),
            backoff: Duration::from_millis(BASE_BACKOFF_MS),
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn client(&self) -> &Client {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        &self.clients[n % self.clients.len()]
    }

    async fn fetch_once(&self, url: &Url, timeout_secs: u64) -> Result<FetchedPage, FetchError> {
        let response = self
            .client()
            .get(url.as_str())
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(|e| classify(url, timeout_secs, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .text()
            .await
            .map_err(|e| classify(url, timeout_secs, e))?;

        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

fn build_client(proxy: Option<&String>) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(10));
    if let Some(p) = proxy {
        let proxy = reqwest::Proxy::all(p.as_str())
            .map_err(|e| FetchError::Proxy(format!("{}: {}", p, e)))?;
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(|e| FetchError::Proxy(e.to_string()))
}

fn classify(url: &Url, timeout_secs: u64, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            secs: timeout_secs,
        }
    } else if let Some(status) = e.status() {
        FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        FetchError::Http {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage, FetchError> {
        let parsed = validate_url(url)?;

        let mut attempt = 0;
        loop {
            match self.fetch_once(&parsed, options.timeout_secs).await {
                Ok(page) => return Ok(page),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= options.max_retries => {
                    return Err(if options.max_retries == 0 {
                        e
                    } else {
                        FetchError::RetriesExhausted {
                            attempts: attempt + 1,
                            last: Box::new(e),
                        }
                    });
                }
                Err(e) => {
                    let backoff = self.backoff * 2u32.pow(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}, backing off {:.1}s",
                        url,
                        attempt + 1,
                        options.max_retries,
                        e,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast(retries: u32) -> (HttpFetcher, FetchOptions) {
        let options = FetchOptions {
            timeout_secs: 5,
            max_retries: retries,
            proxy: None,
        };
        let fetcher = HttpFetcher::new(&options)
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        (fetcher, options)
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(validate_url("https://example.com/").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com/file"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_url("not a url"),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn content_type_detection() {
        let mut page = FetchedPage {
            url: "https://example.com/".into(),
            status: 200,
            content_type: Some("text/html; charset=utf-8".into()),
            body: String::new(),
        };
        assert!(page.is_html());
        page.content_type = Some("application/pdf".into());
        assert!(!page.is_html());
        page.content_type = None;
        assert!(page.is_html());
    }

    #[test]
    fn bad_proxy_config_is_reported() {
        let options = FetchOptions {
            proxy: Some(serde_json::json!({ "proxyUrls": "not-a-list" })),
            ..FetchOptions::default()
        };
        assert!(matches!(HttpFetcher::new(&options), Err(FetchError::Proxy(_))));
    }

    #[test]
    fn proxy_urls_build_one_client_each() {
        let options = FetchOptions {
            proxy: Some(serde_json::json!({
                "proxyUrls": ["http://127.0.0.1:8001", "http://127.0.0.1:8002"],
                "useApifyProxy": true
            })),
            ..FetchOptions::default()
        };
        let fetcher = HttpFetcher::new(&options).unwrap();
        assert_eq!(fetcher.clients.len(), 2);
    }

    #[tokio::test]
    async fn fetches_html_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("<html><title>Hi</title></html>", "text/html"),
            )
            .mount(&server)
            .await;

        let (fetcher, options) = fast(0);
        let page = fetcher
            .fetch(&format!("{}/page", server.uri()), &options)
            .await
            .unwrap();
        assert_eq!(page.status, 200);
        assert!(page.is_html());
        assert!(page.body.contains("<title>Hi</title>"));
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (fetcher, options) = fast(3);
        let err = fetcher
            .fetch(&format!("{}/missing", server.uri()), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn server_errors_retry_then_give_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let (fetcher, options) = fast(2);
        let err = fetcher
            .fetch(&format!("{}/flaky", server.uri()), &options)
            .await
            .unwrap_err();
        match err {
            FetchError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::Status { status: 503, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<p>ok</p>"),
            )
            .mount(&server)
            .await;

        let (fetcher, options) = fast(3);
        let page = fetcher
            .fetch(&format!("{}/busy", server.uri()), &options)
            .await
            .unwrap();
        assert_eq!(page.body, "<p>ok</p>");
    }

    #[tokio::test]
    async fn request_proxy_option_does_not_rebind_clients() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/direct"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<p>direct</p>"),
            )
            .mount(&server)
            .await;

        let (fetcher, mut options) = fast(0);
        // unreachable proxy; only honoured at construction time
        options.proxy = Some(serde_json::json!({ "proxyUrls": ["http://127.0.0.1:9"] }));
        let page = fetcher
            .fetch(&format!("{}/direct", server.uri()), &options)
            .await
            .unwrap();
        assert_eq!(page.body, "<p>direct</p>");
        assert_eq!(fetcher.clients.len(), 1);
    }
}
