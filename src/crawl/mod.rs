//! Web crawling with robots.txt support and politeness delays
//!
//! This module provides:
//! - The [`UrlFrontier`] enforcing depth/page budgets for one job
//! - A [`PageFetcher`] seam with an HTTP implementation
//! - robots.txt parsing and respect
//! - Per-host politeness delays
//! - Crawl scope rules (same origin, seed path prefix, non-document URLs)
//! - SPA detection and optional JavaScript rendering

mod detection;
mod frontier;
mod rate_limit;
mod renderer;
mod robots;

pub use detection::*;
pub use frontier::*;
pub use rate_limit::*;
pub use renderer::*;
pub use robots::*;

use crate::config::{CrawlConfig, IngestOptions};
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub html: String,
    /// URL after redirects
    pub final_url: String,
    pub http_status: u16,
    /// Whether the HTML came from the headless renderer
    pub rendered: bool,
}

/// Why a single page could not be fetched
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("disallowed by robots.txt")]
    RobotsDisallowed,

    #[error("unsupported content type: {0}")]
    UnsupportedContent(String),
}

impl FetchError {
    /// Stable machine-readable reason code
    pub fn reason_code(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl(_) => "invalid_url",
            FetchError::Network(_) => "network",
            FetchError::Timeout(_) => "timeout",
            FetchError::HttpStatus(_) => "http_status",
            FetchError::RobotsDisallowed => "robots_disallowed",
            FetchError::UnsupportedContent(_) => "unsupported_content",
        }
    }
}

/// Retrieves single pages for the crawl orchestrator
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, FetchError>;

    /// Release resources held by the fetcher (e.g. a browser)
    async fn close(&self) {}
}

/// Creates a fresh fetcher per crawl job so politeness and robots state
/// never leak between jobs
pub trait FetcherFactory: Send + Sync {
    fn create(&self, options: &IngestOptions) -> Result<Arc<dyn PageFetcher>>;
}

/// Factory for [`HttpFetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcherFactory {
    config: CrawlConfig,
}

impl HttpFetcherFactory {
    pub fn new(config: CrawlConfig) -> Self {
        Self { config }
    }
}

impl FetcherFactory for HttpFetcherFactory {
    fn create(&self, options: &IngestOptions) -> Result<Arc<dyn PageFetcher>> {
        Ok(Arc::new(HttpFetcher::new(&self.config, options)?))
    }
}

/// HTTP page fetcher with robots.txt and per-host delays
pub struct HttpFetcher {
    client: Client,
    timeout_secs: u64,
    robots_agent: String,
    respect_robots_txt: bool,
    delay_ms: u64,
    auto_js_rendering: bool,
    robots_cache: RwLock<HashMap<String, RobotsRules>>,
    rate_limiters: RwLock<HashMap<String, HostRateLimiter>>,
    renderer: Option<HeadlessRenderer>,
}

impl HttpFetcher {
    pub fn new(config: &CrawlConfig, options: &IngestOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Crawl(format!("Failed to create HTTP client: {}", e)))?;

        let renderer = if config.auto_js_rendering && is_js_rendering_available() {
            Some(HeadlessRenderer::new(RendererConfig::from_crawl_config(
                config,
            )))
        } else {
            None
        };

        Ok(Self {
            client,
            timeout_secs: config.timeout_secs,
            robots_agent: robots_agent_token(&config.user_agent),
            respect_robots_txt: options.respect_robots_txt,
            delay_ms: options.delay_ms,
            auto_js_rendering: config.auto_js_rendering,
            robots_cache: RwLock::new(HashMap::new()),
            rate_limiters: RwLock::new(HashMap::new()),
            renderer,
        })
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout_secs)
        } else {
            FetchError::Network(err.to_string())
        }
    }

    async fn robots_for(&self, origin: &str) -> RobotsRules {
        {
            let cache = self.robots_cache.read().await;
            if let Some(rules) = cache.get(origin) {
                return rules.clone();
            }
        }

        let robots_url = format!("{}/robots.txt", origin);
        debug!("Fetching robots.txt from {}", robots_url);

        let rules = match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => {
                let text = response.text().await.unwrap_or_default();
                RobotsRules::parse(&text)
            }
            // No robots.txt or error - allow all
            _ => RobotsRules::allow_all(),
        };

        let mut cache = self.robots_cache.write().await;
        cache.entry(origin.to_string()).or_insert(rules).clone()
    }

    async fn limiter_for(&self, origin: &str, crawl_delay: Option<f64>) -> HostRateLimiter {
        let mut limiters = self.rate_limiters.write().await;
        limiters
            .entry(origin.to_string())
            .or_insert_with(|| HostRateLimiter::with_crawl_delay(self.delay_ms, crawl_delay))
            .clone()
    }

    async fn maybe_render(&self, page: FetchedPage) -> FetchedPage {
        if !self.auto_js_rendering {
            return page;
        }
        let analysis = analyze_page(&page.html, &page.final_url);
        if !analysis.needs_js_rendering {
            return page;
        }

        let Some(renderer) = &self.renderer else {
            warn!(
                "SPA detected but JS rendering not available. \
                 Compile with --features js-rendering or disable auto_js_rendering. URL: {}",
                page.final_url
            );
            return page;
        };

        match renderer.render(&page.final_url).await {
            Ok(rendered) if !self.rendered_allowed(&page.final_url, &rendered).await => page,
            Ok(rendered) => {
                info!(
                    "Rendered in {}ms: {} ({} bytes)",
                    rendered.render_time_ms,
                    rendered.url,
                    rendered.html.len()
                );
                FetchedPage {
                    html: rendered.html,
                    final_url: rendered.url,
                    http_status: page.http_status,
                    rendered: true,
                }
            }
            Err(e) => {
                warn!("JS rendering failed, using static content: {}", e);
                page
            }
        }
    }
}

impl HttpFetcher {
    /// Hold a rendered page to the same origin and robots rules as the fetch
    async fn rendered_allowed(&self, requested: &str, rendered: &RenderedPage) -> bool {
        if let Err(reason) = accept_rendered(requested, rendered) {
            warn!("Discarding rendered page, using static content: {}", reason);
            return false;
        }
        if self.respect_robots_txt {
            let origin = match Url::parse(&rendered.url) {
                Ok(url) => url.origin().ascii_serialization(),
                Err(_) => return false,
            };
            if !self.robots_for(&origin).await.is_allowed(&rendered.url, &self.robots_agent) {
                warn!(
                    "Rendered page {} is disallowed by robots.txt, using static content",
                    rendered.url
                );
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, FetchError> {
        let parsed =
            Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        let origin = parsed.origin().ascii_serialization();

        let crawl_delay = if self.respect_robots_txt {
            let rules = self.robots_for(&origin).await;
            if !rules.is_allowed(url, &self.robots_agent) {
                return Err(FetchError::RobotsDisallowed);
            }
            rules.crawl_delay(&self.robots_agent)
        } else {
            None
        };

        self.limiter_for(&origin, crawl_delay).await.wait().await;

        debug!("Fetching: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_html_content_type(content_type) {
                return Err(FetchError::UnsupportedContent(content_type.to_string()));
            }
        }

        let html = response.text().await.map_err(|e| self.classify(e))?;

        let page = FetchedPage {
            html,
            final_url,
            http_status: status.as_u16(),
            rendered: false,
        };
        Ok(self.maybe_render(page).await)
    }

    async fn close(&self) {
        if let Some(renderer) = &self.renderer {
            if let Err(e) = renderer.close().await {
                warn!("Failed to close renderer: {}", e);
            }
        }
    }
}

fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_lowercase();
    lower.contains("text/html") || lower.contains("application/xhtml")
}

/// Product token of a user agent string, as matched by robots.txt groups
fn robots_agent_token(user_agent: &str) -> String {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or(user_agent)
        .to_string()
}

/// Which discovered URLs belong to a crawl
#[derive(Debug, Clone)]
pub struct CrawlScope {
    origin: String,
    path_prefix: String,
}

impl CrawlScope {
    /// Scope of a seed URL: its origin and the directory part of its path
    /// (e.g. `/docs/intro` → `/docs/`)
    pub fn from_seed(seed_url: &str) -> Result<Self> {
        let seed = Url::parse(seed_url)?;
        if seed.host_str().is_none() {
            return Err(Error::Crawl(format!("Seed URL has no host: {}", seed_url)));
        }

        let seed_path = seed.path();
        let path_prefix = if seed_path.ends_with('/') {
            seed_path.to_string()
        } else {
            match seed_path.rfind('/') {
                Some(idx) => seed_path[..=idx].to_string(),
                None => "/".to_string(),
            }
        };

        Ok(Self {
            origin: seed.origin().ascii_serialization(),
            path_prefix,
        })
    }

    pub fn allows(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if parsed.origin().ascii_serialization() != self.origin {
            return false;
        }
        let path = parsed.path();
        // `/docs` is in scope of `/docs/`
        if !path.starts_with(&self.path_prefix)
            && format!("{}/", path) != self.path_prefix
        {
            return false;
        }
        should_crawl_url(url)
    }
}

/// Check if a URL is worth crawling for page content
pub fn should_crawl_url(url: &str) -> bool {
    let lower = url.to_lowercase();

    let skip_patterns = [
        "/login",
        "/logout",
        "/signin",
        "/signout",
        "/register",
        "/admin",
        "/wp-admin",
        "/api/",
        "/cgi-bin/",
        "javascript:",
        "mailto:",
        "tel:",
        "?page=",
        "?sort=",
        "?filter=",
    ];

    if skip_patterns.iter().any(|p| lower.contains(p)) {
        return false;
    }

    static ASSET_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let asset_re = ASSET_RE.get_or_init(|| {
        Regex::new(
            r"\.(xml|json|rss|atom|pdf|zip|gz|tar|png|jpe?g|gif|svg|webp|ico|css|js|mp4|mp3|woff2?)(\?|#|$)",
        )
        .ok()
    });
    if let Some(re) = asset_re {
        if re.is_match(&lower) {
            return false;
        }
    }

    true
}
