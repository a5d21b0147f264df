//! Knowledge source ingestion
//!
//! This module exposes the operations collaborators call:
//! - Creating, listing and removing knowledge sources
//! - Starting a crawl in the background or running it inline
//! - Reading processing logs with statistics
//! - Administrative status resets and stuck-run diagnostics

mod processor;
mod stats;

pub use processor::*;
pub use stats::*;

use crate::config::{Config, DiagnosticsConfig, IngestOptions};
use crate::crawl::{FetcherFactory, HttpFetcherFactory};
use crate::embed::{create_embedder, Embedder};
use crate::error::{Error, Result};
use crate::meta::{KnowledgeSource, LogEntry, MetaDb, SourceStatus};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

/// Entry point for everything that happens to knowledge sources
#[derive(Clone)]
pub struct IngestService {
    db: MetaDb,
    processor: KnowledgeProcessor,
    diagnostics: DiagnosticsConfig,
    default_options: IngestOptions,
    api_key_env: String,
}

impl IngestService {
    pub fn new(
        db: MetaDb,
        fetchers: Arc<dyn FetcherFactory>,
        embedder: Option<Arc<dyn Embedder>>,
        config: &Config,
    ) -> Self {
        let processor = KnowledgeProcessor::new(
            db.clone(),
            fetchers,
            embedder,
            config.chunk.clone(),
            config.embedding.batch_size,
        );

        Self {
            db,
            processor,
            diagnostics: config.diagnostics.clone(),
            default_options: config.crawl.ingest_options(),
            api_key_env: config.embedding.api_key_env.clone(),
        }
    }

    /// Build the service with the HTTP fetcher and configured embedding backend
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = MetaDb::connect(config).await?;
        let fetchers = Arc::new(HttpFetcherFactory::new(config.crawl.clone()));
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self::new(db, fetchers, embedder, config))
    }

    /// Draw progress bars while crawling
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.processor = self.processor.with_progress(show_progress);
        self
    }

    /// Run options from the `[crawl]` config section
    pub fn default_options(&self) -> IngestOptions {
        self.default_options
    }

    pub fn db(&self) -> &MetaDb {
        &self.db
    }

    /// Register a website for an agent; the new source is `pending`
    pub async fn create_knowledge_source(
        &self,
        agent_id: &str,
        name: &str,
        url: &str,
    ) -> Result<KnowledgeSource> {
        if agent_id.trim().is_empty() {
            return Err(Error::InvalidInput("agent id must not be empty".to_string()));
        }
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("name must not be empty".to_string()));
        }

        let parsed = Url::parse(url.trim())?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(Error::InvalidInput(format!(
                "source URL must be an http(s) URL with a host: {}",
                url
            )));
        }

        let source = KnowledgeSource::new(
            agent_id.trim().to_string(),
            name.trim().to_string(),
            parsed.to_string(),
        );
        self.db.insert_source(&source).await?;
        info!("Created knowledge source {} for {}", source.id, source.url);
        Ok(source)
    }

    pub async fn get_source(&self, id: &str) -> Result<KnowledgeSource> {
        self.db
            .get_source(id)
            .await?
            .ok_or_else(|| Error::SourceNotFound(id.to_string()))
    }

    pub async fn list_sources(&self, agent_id: Option<&str>) -> Result<Vec<KnowledgeSource>> {
        self.db.list_sources(agent_id).await
    }

    /// Remove a source with its documents and logs; a running crawl stops
    /// at its next page
    pub async fn delete_source(&self, id: &str) -> Result<()> {
        if !self.db.delete_source(id).await? {
            return Err(Error::SourceNotFound(id.to_string()));
        }
        info!("Deleted knowledge source {}", id);
        Ok(())
    }

    /// Claim the source and crawl it in a background task.
    ///
    /// Fails with [`Error::AlreadyProcessing`] if another run owns the
    /// source. The returned handle can be awaited for the result.
    pub async fn start_processing(
        &self,
        id: &str,
        options: IngestOptions,
    ) -> Result<JoinHandle<ProcessingResult>> {
        let (source, run_id) = self.claim(id, &options).await?;
        Ok(self.spawn_run(source, run_id, options))
    }

    /// Claim the source and crawl it, waiting for the result
    pub async fn process(&self, id: &str, options: IngestOptions) -> Result<ProcessingResult> {
        let (source, run_id) = self.claim(id, &options).await?;
        let source_id = source.id.clone();
        let fallback_run_id = run_id.clone();

        self.spawn_run(source, run_id, options)
            .await
            .map_err(|e| {
                Error::Other(format!(
                    "processing task for {} (run {}) did not finish: {}",
                    source_id, fallback_run_id, e
                ))
            })
    }

    async fn claim(&self, id: &str, options: &IngestOptions) -> Result<(KnowledgeSource, String)> {
        options.validate()?;
        let source = self.get_source(id).await?;
        let run_id = Uuid::new_v4().to_string();

        let entry = LogEntry::info(
            steps::PROCESSING_STARTED,
            format!("Started processing {}", source.url),
        )
        .with_url(&source.url)
        .with_progress(0)
        .with_details(json!({
            "runId": run_id,
            "options": options,
        }));

        if !self.db.claim_source(id, &run_id, &entry).await? {
            return Err(Error::AlreadyProcessing(id.to_string()));
        }

        Ok((source, run_id))
    }

    /// Run in a task whose panic still leaves the source `failed`
    fn spawn_run(
        &self,
        source: KnowledgeSource,
        run_id: String,
        options: IngestOptions,
    ) -> JoinHandle<ProcessingResult> {
        let processor = self.processor.clone();

        tokio::spawn(async move {
            let source_id = source.id.clone();
            let job_run_id = run_id.clone();
            let job_processor = processor.clone();

            let job = tokio::spawn(async move { job_processor.run(source, job_run_id, options).await });

            match job.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Processing task for {} aborted: {}", source_id, e);
                    processor
                        .fail_run(&source_id, &run_id, &format!("processing task aborted: {}", e))
                        .await
                }
            }
        })
    }

    /// Logs of a source with crawl statistics
    pub async fn get_logs(&self, id: &str) -> Result<LogsReport> {
        let source = self.get_source(id).await?;
        let status = source.get_status()?;

        let logs = self.db.get_logs(id).await?;
        let counts = self.db.count_logs_by_step(id, steps::PROCESSING_STARTED).await?;
        let total_documents = self.db.count_documents(id).await?;

        Ok(LogsReport {
            source_id: source.id,
            status,
            logs,
            statistics: LogStatistics::from_step_counts(&counts, total_documents, status),
        })
    }

    /// Administrative override of the status, bypassing the state machine.
    ///
    /// A running crawl loses ownership and stops at its next page.
    pub async fn reset_status(&self, id: &str, status: SourceStatus) -> Result<KnowledgeSource> {
        let source = self.get_source(id).await?;

        let entry = LogEntry::warn(
            steps::STATUS_RESET,
            format!("Status manually reset from {} to {}", source.status, status),
        )
        .with_details(json!({ "from": source.status, "to": status }));

        if !self.db.set_status(id, status, &entry).await? {
            return Err(Error::SourceNotFound(id.to_string()));
        }
        self.get_source(id).await
    }

    /// `processing` with no progress for longer than the stuck threshold
    pub async fn is_stuck(&self, id: &str) -> Result<bool> {
        self.is_stuck_at(id, Utc::now()).await
    }

    pub async fn is_stuck_at(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let source = self.get_source(id).await?;
        source.is_stuck_at(now, self.diagnostics.stuck_threshold_minutes)
    }

    /// Health report with likely causes of a stalled or empty source
    pub async fn diagnose(&self, id: &str) -> Result<DiagnosticReport> {
        self.diagnose_at(id, Utc::now()).await
    }

    pub async fn diagnose_at(&self, id: &str, now: DateTime<Utc>) -> Result<DiagnosticReport> {
        let source = self.get_source(id).await?;
        let status = source.get_status()?;
        let is_stuck = source.is_stuck_at(now, self.diagnostics.stuck_threshold_minutes)?;
        let minutes_since_update = source.minutes_since_update(now)?;

        let total_documents = self.db.count_documents(id).await?;
        let documents_with_embeddings = self.db.count_embedded_documents(id).await?;
        let recent_errors = self
            .db
            .recent_errors(id, self.diagnostics.recent_error_limit)
            .await?;

        let possible_issues = possible_issues(&IssueContext {
            source: &source,
            status,
            is_stuck,
            minutes_since_update,
            total_documents,
            recent_errors: recent_errors.len(),
            embedding_key_env: if self.processor.has_embedder() {
                None
            } else {
                Some(&self.api_key_env)
            },
        });

        Ok(DiagnosticReport {
            source_id: source.id.clone(),
            status,
            is_stuck,
            minutes_since_update,
            total_documents,
            documents_with_embeddings,
            recent_errors,
            possible_issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::{FetchError, FetchedPage, PageFetcher};
    use crate::embed::tests::FakeEmbedder;
    use crate::meta::{test_db, LogLevel};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.crawl.timeout_secs = 5;
        config.crawl.auto_js_rendering = false;
        config.embedding.api_key_env = "KNOWLEDGE_CRAWLER_TEST_UNSET_KEY".to_string();
        config
    }

    async fn service(embedder: Option<Arc<dyn Embedder>>) -> (IngestService, TempDir) {
        let (db, dir) = test_db().await;
        let config = test_config();
        let fetchers = Arc::new(HttpFetcherFactory::new(config.crawl.clone()));
        (IngestService::new(db, fetchers, embedder, &config), dir)
    }

    fn options() -> IngestOptions {
        IngestOptions {
            max_pages: 50,
            max_depth: 2,
            generate_embeddings: false,
            respect_robots_txt: true,
            delay_ms: 0,
        }
    }

    fn html_page(title: &str, text: &str, links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|l| format!(r#"<a href="{}">{}</a>"#, l, l))
            .collect();
        format!(
            "<html><head><title>{}</title></head><body><nav>{}</nav><main><h1>{}</h1><p>{}</p></main></body></html>",
            title, anchors, title, text
        )
    }

    async fn mount_page(server: &MockServer, route: &str, html: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
            .mount(server)
            .await;
    }

    /// `/docs/` links to a, b, c (missing) and an out-of-scope page;
    /// `/docs/a` leads two levels deeper. Only the slashed index exists.
    async fn docs_site() -> MockServer {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/docs/",
            html_page(
                "Docs",
                "Welcome to the product documentation.",
                &["/docs/a", "/docs/b", "/docs/c", "/pricing", "mailto:help@example.com"],
            ),
        )
        .await;
        mount_page(
            &server,
            "/docs/a",
            html_page("Alpha", "Alpha explains account setup.", &["/docs/a/deep", "/docs"]),
        )
        .await;
        mount_page(
            &server,
            "/docs/b",
            html_page("Beta", "Beta explains billing cycles.", &[]),
        )
        .await;
        mount_page(
            &server,
            "/docs/a/deep",
            html_page("Deep", "Deep dives into SSO.", &["/docs/a/deep/deeper"]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/docs/a/deep/deeper"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pricing"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        server
    }

    fn steps_of(report: &LogsReport, step: &str) -> usize {
        report.logs.iter().filter(|l| l.step == step).count()
    }

    #[tokio::test]
    async fn test_process_crawls_site_within_depth() {
        let server = docs_site().await;
        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Docs", &format!("{}/docs/", server.uri()))
            .await
            .unwrap();
        assert_eq!(source.status, "pending");

        let result = svc.process(&source.id, options()).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.pages_crawled, 4);
        assert_eq!(result.pages_failed, 1);
        assert_eq!(result.links_found, 4);
        assert!(result.documents_created >= 4);

        let source = svc.get_source(&source.id).await.unwrap();
        assert_eq!(source.get_status().unwrap(), SourceStatus::Completed);

        let report = svc.get_logs(&source.id).await.unwrap();
        assert_eq!(report.statistics.total_pages, 5);
        assert_eq!(report.statistics.failed_pages, 1);
        assert_eq!(report.statistics.total_links, 4);
        assert_eq!(report.statistics.success_rate, "80.0");
        assert!(!report.statistics.in_progress);
        assert_eq!(report.logs.first().unwrap().step, steps::PROCESSING_STARTED);
        assert_eq!(report.logs.last().unwrap().step, steps::PROCESSING_COMPLETED);
        assert!(report
            .logs
            .iter()
            .all(|l| !l.url.as_deref().unwrap_or_default().contains("deeper")));
    }

    #[tokio::test]
    async fn test_embeddings_disabled_stores_null_vectors() {
        let server = docs_site().await;
        let (svc, _dir) = service(Some(Arc::new(FakeEmbedder::new()))).await;
        let source = svc
            .create_knowledge_source("agent-1", "Docs", &format!("{}/docs/", server.uri()))
            .await
            .unwrap();

        svc.process(&source.id, options()).await.unwrap();

        let docs = svc.db().get_documents(&source.id).await.unwrap();
        assert!(!docs.is_empty());
        assert!(docs.iter().all(|d| d.embedding.is_none()));
    }

    #[tokio::test]
    async fn test_embeddings_generated_with_per_chunk_failures() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            html_page("Home", "Home page text.", &["/bad"]),
        )
        .await;
        mount_page(
            &server,
            "/bad",
            html_page("Bad", "This text contains poison for the embedder.", &[]),
        )
        .await;

        let (svc, _dir) = service(Some(Arc::new(FakeEmbedder::new()))).await;
        let source = svc
            .create_knowledge_source("agent-1", "Site", &format!("{}/", server.uri()))
            .await
            .unwrap();

        let opts = IngestOptions {
            generate_embeddings: true,
            ..options()
        };
        let result = svc.process(&source.id, opts).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.documents_created, 2);
        assert_eq!(result.documents_embedded, 1);

        let docs = svc.db().get_documents(&source.id).await.unwrap();
        let bad = docs.iter().find(|d| d.url.ends_with("/bad")).unwrap();
        assert!(bad.embedding.is_none());
        let home = docs.iter().find(|d| !d.url.ends_with("/bad")).unwrap();
        assert_eq!(home.embedding_vector().unwrap().len(), 2);

        let report = svc.get_logs(&source.id).await.unwrap();
        let failure = report
            .logs
            .iter()
            .find(|l| l.step == steps::EMBEDDING_FAILED)
            .unwrap();
        assert_eq!(failure.get_level().unwrap(), LogLevel::Warn);
    }

    #[tokio::test]
    async fn test_missing_embedder_warns_and_completes() {
        let server = docs_site().await;
        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Docs", &format!("{}/docs/", server.uri()))
            .await
            .unwrap();

        let opts = IngestOptions {
            generate_embeddings: true,
            ..options()
        };
        let result = svc.process(&source.id, opts).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.documents_embedded, 0);

        let report = svc.get_logs(&source.id).await.unwrap();
        assert_eq!(steps_of(&report, steps::EMBEDDING_UNAVAILABLE), 1);

        let diagnosis = svc.diagnose(&source.id).await.unwrap();
        assert_eq!(diagnosis.documents_with_embeddings, 0);
        assert!(diagnosis
            .possible_issues
            .iter()
            .any(|i| i.contains("KNOWLEDGE_CRAWLER_TEST_UNSET_KEY")));
    }

    #[tokio::test]
    async fn test_page_budget_limits_crawled_pages() {
        let server = docs_site().await;
        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Docs", &format!("{}/docs/", server.uri()))
            .await
            .unwrap();

        let opts = IngestOptions {
            max_pages: 2,
            ..options()
        };
        let result = svc.process(&source.id, opts).await.unwrap();
        assert_eq!(result.pages_crawled + result.pages_failed, 2);

        let report = svc.get_logs(&source.id).await.unwrap();
        assert!(steps_of(&report, steps::PAGE_CRAWLED) <= 2);
    }

    #[tokio::test]
    async fn test_depth_zero_fetches_only_seed() {
        let server = docs_site().await;
        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Docs", &format!("{}/docs/", server.uri()))
            .await
            .unwrap();

        let opts = IngestOptions {
            max_depth: 0,
            ..options()
        };
        let result = svc.process(&source.id, opts).await.unwrap();
        assert_eq!(result.pages_crawled, 1);
        assert_eq!(result.links_found, 0);
    }

    #[tokio::test]
    async fn test_unreachable_seed_fails_with_single_error() {
        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Gone", "http://127.0.0.1:1/docs/")
            .await
            .unwrap();

        let result = svc.process(&source.id, options()).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Failed);

        let source = svc.get_source(&source.id).await.unwrap();
        assert_eq!(source.get_status().unwrap(), SourceStatus::Failed);

        let report = svc.get_logs(&source.id).await.unwrap();
        let errors: Vec<_> = report
            .logs
            .iter()
            .filter(|l| l.get_level().unwrap() == LogLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].step, steps::SEED_CRAWL_FAILED);
        assert_eq!(report.statistics.total_documents, 0);
        assert_eq!(svc.db().count_documents(&source.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_seed_http_error_reason_code() {
        let server = MockServer::start().await;
        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Missing", &format!("{}/missing", server.uri()))
            .await
            .unwrap();

        svc.process(&source.id, options()).await.unwrap();

        let report = svc.get_logs(&source.id).await.unwrap();
        let seed = report
            .logs
            .iter()
            .find(|l| l.step == steps::SEED_CRAWL_FAILED)
            .unwrap();
        assert!(seed.details.as_deref().unwrap().contains("http_status"));
    }

    #[tokio::test]
    async fn test_empty_seed_still_follows_links() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            r#"<html><body><nav><a href="/guide">Guide</a></nav><script>app()</script></body></html>"#
                .to_string(),
        )
        .await;
        mount_page(
            &server,
            "/guide",
            html_page("Guide", "The guide has real text.", &[]),
        )
        .await;

        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Site", &format!("{}/", server.uri()))
            .await
            .unwrap();

        let result = svc.process(&source.id, options()).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.pages_crawled, 2);

        let report = svc.get_logs(&source.id).await.unwrap();
        let extraction = report
            .logs
            .iter()
            .find(|l| l.step == steps::EXTRACTION_FAILED)
            .unwrap();
        assert_eq!(extraction.get_level().unwrap(), LogLevel::Warn);
    }

    #[tokio::test]
    async fn test_no_documents_marks_failed() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            "<html><body><script>app()</script></body></html>".to_string(),
        )
        .await;

        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Shell", &format!("{}/", server.uri()))
            .await
            .unwrap();

        let result = svc.process(&source.id, options()).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Failed);

        let report = svc.get_logs(&source.id).await.unwrap();
        let last = report.logs.last().unwrap();
        assert_eq!(last.step, steps::NO_DOCUMENTS_CREATED);
        assert_eq!(last.get_level().unwrap(), LogLevel::Error);
        assert_eq!(report.status, SourceStatus::Failed);
    }

    #[tokio::test]
    async fn test_concurrent_process_runs_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(html_page("Slow", "Slow page text.", &[]), "text/html")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Slow", &format!("{}/", server.uri()))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            svc.process(&source.id, options()),
            svc.process(&source.id, options())
        );

        let results = [first, second];
        let ran = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(Error::AlreadyProcessing(_))))
            .count();
        assert_eq!(ran, 1);
        assert_eq!(rejected, 1);

        let report = svc.get_logs(&source.id).await.unwrap();
        assert_eq!(steps_of(&report, steps::PROCESSING_STARTED), 1);
    }

    #[tokio::test]
    async fn test_start_processing_rejects_second_start() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(html_page("Slow", "Slow page text.", &[]), "text/html")
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;

        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Slow", &format!("{}/", server.uri()))
            .await
            .unwrap();

        let handle = svc.start_processing(&source.id, options()).await.unwrap();
        let second = svc.start_processing(&source.id, options()).await;
        assert!(matches!(second, Err(Error::AlreadyProcessing(_))));

        let stats = svc.get_logs(&source.id).await.unwrap().statistics;
        assert!(stats.in_progress);

        let result = handle.await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_reset_during_crawl_cancels_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(html_page("Home", "Home text.", &["/next"]), "text/html")
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/next"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Site", &format!("{}/", server.uri()))
            .await
            .unwrap();

        let handle = svc.start_processing(&source.id, options()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let reset = svc.reset_status(&source.id, SourceStatus::Failed).await.unwrap();
        assert_eq!(reset.get_status().unwrap(), SourceStatus::Failed);

        let result = handle.await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Cancelled);

        let report = svc.get_logs(&source.id).await.unwrap();
        assert_eq!(report.status, SourceStatus::Failed);
        assert_eq!(steps_of(&report, steps::STATUS_RESET), 1);
        assert_eq!(steps_of(&report, steps::PROCESSING_COMPLETED), 0);
    }

    #[tokio::test]
    async fn test_delete_during_crawl_leaves_nothing_behind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(html_page("Home", "Home text.", &[]), "text/html")
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&server)
            .await;

        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Site", &format!("{}/", server.uri()))
            .await
            .unwrap();

        let handle = svc.start_processing(&source.id, options()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        svc.delete_source(&source.id).await.unwrap();

        let result = handle.await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Cancelled);
        assert_eq!(svc.db().count_documents(&source.id).await.unwrap(), 0);
        assert!(svc.db().get_logs(&source.id).await.unwrap().is_empty());
        assert!(matches!(
            svc.get_source(&source.id).await,
            Err(Error::SourceNotFound(_))
        ));
    }

    struct PanickingFetcher;

    #[async_trait]
    impl PageFetcher for PanickingFetcher {
        async fn fetch(&self, _url: &str) -> std::result::Result<FetchedPage, FetchError> {
            panic!("fetcher exploded");
        }
    }

    struct PanickingFactory;

    impl FetcherFactory for PanickingFactory {
        fn create(&self, _options: &IngestOptions) -> Result<Arc<dyn PageFetcher>> {
            Ok(Arc::new(PanickingFetcher))
        }
    }

    #[tokio::test]
    async fn test_panic_in_job_marks_source_failed() {
        let (db, _dir) = test_db().await;
        let svc = IngestService::new(db, Arc::new(PanickingFactory), None, &test_config());
        let source = svc
            .create_knowledge_source("agent-1", "Site", "https://example.com/")
            .await
            .unwrap();

        let result = svc.process(&source.id, options()).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Failed);
        assert!(result.error.is_some());

        let report = svc.get_logs(&source.id).await.unwrap();
        assert_eq!(report.status, SourceStatus::Failed);
        assert_eq!(report.logs.last().unwrap().step, steps::PROCESSING_FAILED);
    }

    #[tokio::test]
    async fn test_stuck_after_threshold() {
        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Site", "https://example.com/")
            .await
            .unwrap();
        let started = LogEntry::info(steps::PROCESSING_STARTED, "started");
        assert!(svc.db().claim_source(&source.id, "run-1", &started).await.unwrap());

        let now = Utc::now();
        assert!(!svc.is_stuck_at(&source.id, now + ChronoDuration::minutes(5)).await.unwrap());
        assert!(svc.is_stuck_at(&source.id, now + ChronoDuration::minutes(11)).await.unwrap());

        let report = svc
            .diagnose_at(&source.id, now + ChronoDuration::minutes(11))
            .await
            .unwrap();
        assert!(report.is_stuck);
        assert!(report.minutes_since_update >= 10);
        assert!(report.possible_issues.iter().any(|i| i.contains("progress")));
    }

    #[tokio::test]
    async fn test_reset_status_allows_reprocessing() {
        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Gone", "http://127.0.0.1:1/")
            .await
            .unwrap();
        svc.process(&source.id, options()).await.unwrap();

        let reset = svc.reset_status(&source.id, SourceStatus::Pending).await.unwrap();
        assert_eq!(reset.get_status().unwrap(), SourceStatus::Pending);

        let report = svc.get_logs(&source.id).await.unwrap();
        let last = report.logs.last().unwrap();
        assert_eq!(last.step, steps::STATUS_RESET);
        assert_eq!(last.get_level().unwrap(), LogLevel::Warn);

        let again = svc.process(&source.id, options()).await.unwrap();
        assert_eq!(again.outcome, RunOutcome::Failed);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (svc, _dir) = service(None).await;

        assert!(svc
            .create_knowledge_source("agent-1", "Docs", "not a url")
            .await
            .is_err());
        assert!(matches!(
            svc.create_knowledge_source("agent-1", "Docs", "ftp://example.com/").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            svc.create_knowledge_source("", "Docs", "https://example.com/").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_options_leave_source_pending() {
        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Docs", "https://example.com/")
            .await
            .unwrap();

        let opts = IngestOptions {
            max_pages: 0,
            ..options()
        };
        assert!(matches!(
            svc.process(&source.id, opts).await,
            Err(Error::Config(_))
        ));
        assert_eq!(
            svc.get_source(&source.id).await.unwrap().get_status().unwrap(),
            SourceStatus::Pending
        );
        assert!(matches!(
            svc.process("missing", options()).await,
            Err(Error::SourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete_sources() {
        let (svc, _dir) = service(None).await;
        svc.create_knowledge_source("agent-1", "One", "https://one.example.com/")
            .await
            .unwrap();
        let two = svc
            .create_knowledge_source("agent-2", "Two", "https://two.example.com/")
            .await
            .unwrap();

        assert_eq!(svc.list_sources(None).await.unwrap().len(), 2);
        assert_eq!(svc.list_sources(Some("agent-2")).await.unwrap().len(), 1);

        svc.delete_source(&two.id).await.unwrap();
        assert!(matches!(
            svc.delete_source(&two.id).await,
            Err(Error::SourceNotFound(_))
        ));
        assert_eq!(svc.list_sources(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trailing_slash_seed_is_fetched_as_given() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/handbook/",
            html_page("Handbook", "The handbook index lives under a slash.", &[]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/handbook"))
            .respond_with(ResponseTemplate::new(404))
            .expect(0)
            .mount(&server)
            .await;

        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Handbook", &format!("{}/handbook/", server.uri()))
            .await
            .unwrap();

        let result = svc.process(&source.id, options()).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.pages_crawled, 1);

        let docs = svc.db().get_documents(&source.id).await.unwrap();
        assert!(docs.iter().all(|d| d.url.ends_with("/handbook/")));
    }

    #[tokio::test]
    async fn test_redirect_to_crawled_page_is_skipped() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            html_page("Home", "Home page text.", &["/a", "/old"]),
        )
        .await;
        mount_page(&server, "/a", html_page("Alpha", "Alpha page text.", &[])).await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("location", format!("{}/a", server.uri())),
            )
            .mount(&server)
            .await;

        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Site", &format!("{}/", server.uri()))
            .await
            .unwrap();

        let result = svc.process(&source.id, options()).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.pages_crawled, 2);

        let docs = svc.db().get_documents(&source.id).await.unwrap();
        let mut alpha_chunks: Vec<i64> = docs
            .iter()
            .filter(|d| d.url.ends_with("/a"))
            .map(|d| d.chunk_index)
            .collect();
        let stored = alpha_chunks.len();
        alpha_chunks.sort_unstable();
        alpha_chunks.dedup();
        assert!(stored > 0);
        assert_eq!(alpha_chunks.len(), stored);

        let report = svc.get_logs(&source.id).await.unwrap();
        assert_eq!(steps_of(&report, steps::PAGE_CRAWLED), 2);
        assert_eq!(steps_of(&report, steps::DUPLICATE_PAGE), 1);
        assert_eq!(report.statistics.total_pages, 2);
    }

    #[tokio::test]
    async fn test_reprocessing_replaces_documents() {
        let server = docs_site().await;
        let (svc, _dir) = service(None).await;
        let source = svc
            .create_knowledge_source("agent-1", "Docs", &format!("{}/docs/", server.uri()))
            .await
            .unwrap();

        let first = svc.process(&source.id, options()).await.unwrap();
        let first_count = svc.db().count_documents(&source.id).await.unwrap();
        let first_stats = svc.get_logs(&source.id).await.unwrap().statistics;

        let second = svc.process(&source.id, options()).await.unwrap();
        assert_eq!(first.outcome, RunOutcome::Completed);
        assert_eq!(second.outcome, RunOutcome::Completed);

        assert_eq!(svc.db().count_documents(&source.id).await.unwrap(), first_count);
        let report = svc.get_logs(&source.id).await.unwrap();
        assert_eq!(report.statistics, first_stats);
        assert_eq!(steps_of(&report, steps::PROCESSING_STARTED), 2);
    }
}
