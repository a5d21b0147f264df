//! Headless browser rendering for client-rendered pages
//!
//! Only functional with the `js-rendering` feature; otherwise a stub that
//! always reports rendering as unavailable. A rendered page replaces the
//! static fetch only if it passes [`accept_rendered`].

use crate::config::CrawlConfig;
use crate::error::{Error, Result};
use std::time::Duration;
use url::Url;

/// Limits for one headless render
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub page_load_timeout: Duration,
    /// Settle time after load for client-side content
    pub render_wait: Duration,
    /// Budget for a whole render including browser launch, at least the fetch timeout
    pub deadline: Duration,
    pub sandbox: bool,
}

impl RendererConfig {
    pub fn from_crawl_config(config: &CrawlConfig) -> Self {
        let page_load_timeout = Duration::from_millis(config.js_page_load_timeout_ms);
        let render_wait = Duration::from_millis(config.js_render_wait_ms);
        let fetch_timeout = Duration::from_secs(config.timeout_secs);

        Self {
            page_load_timeout,
            render_wait,
            deadline: (page_load_timeout + render_wait).max(fetch_timeout),
            sandbox: !config.js_no_sandbox,
        }
    }
}

/// DOM of a rendered page
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// URL the browser ended on
    pub url: String,
    pub html: String,
    pub render_time_ms: u64,
}

/// Check a rendered page against the request that produced it.
///
/// Client-side navigation may leave the requested origin, and a script may
/// wipe the document; both fall back to the static HTML.
pub fn accept_rendered(requested: &str, page: &RenderedPage) -> std::result::Result<(), String> {
    let requested_url = Url::parse(requested).map_err(|e| e.to_string())?;
    let rendered_url = Url::parse(&page.url).map_err(|e| e.to_string())?;

    if requested_url.origin() != rendered_url.origin() {
        return Err(format!(
            "rendering navigated from {} to another origin: {}",
            requested, page.url
        ));
    }
    if page.html.trim().is_empty() {
        return Err(format!("rendered document of {} is empty", requested));
    }
    Ok(())
}

#[cfg(feature = "js-rendering")]
mod browser_impl {
    use super::*;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use chromiumoxide::Page;
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;
    use tokio::time::{timeout, Instant};
    use tracing::{debug, info, warn};

    struct RunningBrowser {
        browser: Browser,
        events: JoinHandle<()>,
    }

    /// Headless Chrome, launched on first render and shared by the run
    pub struct HeadlessRenderer {
        config: RendererConfig,
        running: Mutex<Option<RunningBrowser>>,
    }

    impl HeadlessRenderer {
        pub fn new(config: RendererConfig) -> Self {
            Self {
                config,
                running: Mutex::new(None),
            }
        }

        async fn launch(&self) -> Result<RunningBrowser> {
            info!("Launching headless browser for JS rendering");

            let mut builder = BrowserConfig::builder()
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--disable-extensions");
            if !self.config.sandbox {
                builder = builder.no_sandbox();
            }
            let browser_config = builder.build().map_err(Error::Crawl)?;

            let (browser, mut handler) = Browser::launch(browser_config)
                .await
                .map_err(|e| Error::Crawl(format!("browser launch failed: {}", e)))?;

            let events = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            Ok(RunningBrowser { browser, events })
        }

        /// Render `url` within the configured deadline
        pub async fn render(&self, url: &str) -> Result<RenderedPage> {
            let start = Instant::now();
            let (html, final_url) = timeout(self.config.deadline, self.render_page(url))
                .await
                .map_err(|_| {
                    Error::Crawl(format!(
                        "rendering {} exceeded {:?}",
                        url, self.config.deadline
                    ))
                })??;

            Ok(RenderedPage {
                url: final_url,
                html,
                render_time_ms: start.elapsed().as_millis() as u64,
            })
        }

        async fn render_page(&self, url: &str) -> Result<(String, String)> {
            let mut running = self.running.lock().await;
            if running.is_none() {
                *running = Some(self.launch().await?);
            }
            let Some(browser) = running.as_ref().map(|r| &r.browser) else {
                return Err(Error::Crawl("browser is not running".to_string()));
            };

            debug!("Rendering {}", url);
            let page = browser
                .new_page(url)
                .await
                .map_err(|e| Error::Crawl(format!("opening {} failed: {}", url, e)))?;

            let result = self.read_page(&page, url).await;
            if let Err(e) = page.close().await {
                warn!("Failed to close page {}: {}", url, e);
            }
            result
        }

        async fn read_page(&self, page: &Page, url: &str) -> Result<(String, String)> {
            timeout(self.config.page_load_timeout, page.wait_for_navigation())
                .await
                .map_err(|_| Error::Crawl(format!("page load timed out: {}", url)))?
                .map_err(|e| Error::Crawl(format!("navigation to {} failed: {}", url, e)))?;

            if !self.config.render_wait.is_zero() {
                tokio::time::sleep(self.config.render_wait).await;
            }

            let final_url = page
                .url()
                .await
                .map_err(|e| Error::Crawl(format!("reading URL of {} failed: {}", url, e)))?
                .unwrap_or_else(|| url.to_string());
            let html = page
                .content()
                .await
                .map_err(|e| Error::Crawl(format!("reading DOM of {} failed: {}", url, e)))?;

            Ok((html, final_url))
        }

        pub async fn close(&self) -> Result<()> {
            if let Some(mut running) = self.running.lock().await.take() {
                let closed = running.browser.close().await;
                running.events.abort();
                closed.map_err(|e| Error::Crawl(format!("browser close failed: {}", e)))?;
            }
            Ok(())
        }
    }
}

#[cfg(feature = "js-rendering")]
pub use browser_impl::HeadlessRenderer;

/// Stand-in used when the `js-rendering` feature is off
#[cfg(not(feature = "js-rendering"))]
pub struct HeadlessRenderer {
    _config: RendererConfig,
}

#[cfg(not(feature = "js-rendering"))]
impl HeadlessRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { _config: config }
    }

    pub async fn render(&self, url: &str) -> Result<RenderedPage> {
        Err(Error::Crawl(format!(
            "cannot render {}: built without the js-rendering feature",
            url
        )))
    }

    pub async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub fn is_js_rendering_available() -> bool {
    cfg!(feature = "js-rendering")
}
