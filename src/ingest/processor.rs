//! Crawl orchestration for a single knowledge source run

use super::stats::steps;
use crate::chunk::chunk_text;
use crate::config::{ChunkConfig, IngestOptions};
use crate::crawl::{canonicalize_url, CrawlScope, FetcherFactory, PageFetcher, UrlFrontier};
use crate::embed::{embed_with_fallback, Embedder};
use crate::error::Result;
use crate::meta::{Document, KnowledgeSource, LogEntry, MetaDb, SourceStatus};
use crate::parse::{extract, ExtractedLink};
use crate::progress::crawl_progress_bar;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a processing run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Failed,
    /// The source was reset or deleted while the run was going
    Cancelled,
}

/// Summary of one processing run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub source_id: String,
    pub run_id: String,
    pub outcome: RunOutcome,
    pub pages_crawled: u32,
    pub pages_failed: u32,
    pub links_found: u32,
    pub documents_created: u32,
    pub documents_embedded: u32,
    /// Message of the terminal error, if the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingResult {
    fn new(source_id: &str, run_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            run_id: run_id.to_string(),
            outcome: RunOutcome::Failed,
            pages_crawled: 0,
            pages_failed: 0,
            links_found: 0,
            documents_created: 0,
            documents_embedded: 0,
            error: None,
        }
    }

    /// Result for a run that died before it could report anything
    pub(crate) fn aborted(source_id: &str, run_id: &str, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(source_id, run_id)
        }
    }
}

/// Drives fetch, extract, chunk, embed and persist for claimed sources
#[derive(Clone)]
pub struct KnowledgeProcessor {
    db: MetaDb,
    fetchers: Arc<dyn FetcherFactory>,
    embedder: Option<Arc<dyn Embedder>>,
    chunk: ChunkConfig,
    embedding_batch_size: usize,
    show_progress: bool,
}

impl KnowledgeProcessor {
    pub fn new(
        db: MetaDb,
        fetchers: Arc<dyn FetcherFactory>,
        embedder: Option<Arc<dyn Embedder>>,
        chunk: ChunkConfig,
        embedding_batch_size: usize,
    ) -> Self {
        Self {
            db,
            fetchers,
            embedder,
            chunk,
            embedding_batch_size,
            show_progress: false,
        }
    }

    /// Draw a progress bar per run
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Run a claimed source to completion.
    ///
    /// Any error escaping the crawl marks the source failed; the returned
    /// result always describes how the run ended.
    pub async fn run(
        &self,
        source: KnowledgeSource,
        run_id: String,
        options: IngestOptions,
    ) -> ProcessingResult {
        match self.crawl(&source, &run_id, &options).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Processing of {} failed: {}", source.id, e);
                self.fail_run(&source.id, &run_id, &e.to_string()).await
            }
        }
    }

    /// Mark a run failed after an unrecoverable fault
    pub(crate) async fn fail_run(&self, source_id: &str, run_id: &str, error: &str) -> ProcessingResult {
        let entry = LogEntry::error(
            steps::PROCESSING_FAILED,
            format!("Processing failed: {}", error),
        );

        let mut result = ProcessingResult::aborted(source_id, run_id, error.to_string());
        match self
            .db
            .finish_run(source_id, run_id, SourceStatus::Failed, &entry)
            .await
        {
            Ok(true) => {}
            Ok(false) => result.outcome = RunOutcome::Cancelled,
            Err(e) => warn!("Could not record failure of {}: {}", source_id, e),
        }
        result
    }

    async fn crawl(
        &self,
        source: &KnowledgeSource,
        run_id: &str,
        options: &IngestOptions,
    ) -> Result<ProcessingResult> {
        let mut result = ProcessingResult::new(&source.id, run_id);
        info!("Processing {} ({})", source.name, source.url);

        let embedder = if options.generate_embeddings {
            if self.embedder.is_none() {
                self.db
                    .append_log(
                        &source.id,
                        &LogEntry::warn(
                            steps::EMBEDDING_UNAVAILABLE,
                            "Embeddings requested but no embedding API key is configured; \
                             documents will be stored without embeddings",
                        ),
                    )
                    .await?;
            }
            self.embedder.clone()
        } else {
            None
        };

        let scope = CrawlScope::from_seed(&source.url)?;
        let fetcher = self.fetchers.create(options)?;
        let mut frontier = UrlFrontier::new(options.max_depth, options.max_pages);
        frontier.enqueue(&source.url, 0);

        let progress = self.start_progress_bar(options.max_pages, &source.name);
        let mut cancelled = false;
        let mut is_seed = true;

        while let Some(entry) = frontier.next() {
            if !self.db.touch_run(&source.id, run_id).await? {
                cancelled = true;
                break;
            }
            let progress_pct = (frontier.dequeued() * 100 / options.max_pages.max(1)) as i64;

            let page = match fetcher.fetch(&entry.url).await {
                Ok(page) => page,
                Err(e) if is_seed => {
                    let entry = LogEntry::error(
                        steps::SEED_CRAWL_FAILED,
                        format!("Failed to crawl seed URL: {}", e),
                    )
                    .with_url(&entry.url)
                    .with_details(json!({ "reason": e.reason_code() }));

                    close_fetcher(fetcher.as_ref()).await;
                    finish_progress(progress, "Seed failed");

                    result.pages_failed += 1;
                    result.error = Some(e.to_string());
                    result.outcome = if self
                        .db
                        .finish_run(&source.id, run_id, SourceStatus::Failed, &entry)
                        .await?
                    {
                        RunOutcome::Failed
                    } else {
                        RunOutcome::Cancelled
                    };
                    return Ok(result);
                }
                Err(e) => {
                    debug!("Fetch failed for {}: {}", entry.url, e);
                    result.pages_failed += 1;
                    self.db
                        .append_log(
                            &source.id,
                            &LogEntry::error(
                                steps::PAGE_CRAWL_FAILED,
                                format!("Failed to crawl page: {}", e),
                            )
                            .with_url(&entry.url)
                            .with_details(json!({ "reason": e.reason_code(), "depth": entry.depth }))
                            .with_progress(progress_pct),
                        )
                        .await?;
                    advance_progress(&progress);
                    continue;
                }
            };
            is_seed = false;

            // A redirect onto a page this run already crawled adds nothing
            if canonicalize_url(&page.final_url) != entry.key
                && !frontier.mark_visited(&page.final_url)
            {
                debug!("{} redirected to already crawled {}", entry.url, page.final_url);
                self.db
                    .append_log(
                        &source.id,
                        &LogEntry::info(
                            steps::DUPLICATE_PAGE,
                            format!("Skipped {}: redirects to an already crawled page", entry.url),
                        )
                        .with_url(&entry.url)
                        .with_details(json!({ "finalUrl": page.final_url }))
                        .with_progress(progress_pct),
                    )
                    .await?;
                advance_progress(&progress);
                continue;
            }

            result.pages_crawled += 1;
            self.db
                .append_log(
                    &source.id,
                    &LogEntry::info(steps::PAGE_CRAWLED, format!("Crawled {}", page.final_url))
                        .with_url(&page.final_url)
                        .with_details(json!({
                            "httpStatus": page.http_status,
                            "depth": entry.depth,
                            "rendered": page.rendered,
                        }))
                        .with_progress(progress_pct),
                )
                .await?;

            let links = match extract(&page.html, &page.final_url) {
                Ok(content) => {
                    let docs = self
                        .build_documents(
                            &source.id,
                            &page.final_url,
                            &content.title,
                            &content.content,
                            embedder.as_deref(),
                        )
                        .await?;

                    let embedded = docs.iter().filter(|d| d.embedding.is_some()).count() as u32;
                    if let Err(e) = self.db.insert_documents(&docs).await {
                        if !self.db.touch_run(&source.id, run_id).await.unwrap_or(false) {
                            cancelled = true;
                            break;
                        }
                        return Err(e);
                    }
                    result.documents_created += docs.len() as u32;
                    result.documents_embedded += embedded;
                    content.links
                }
                Err(e) => {
                    self.db
                        .append_log(
                            &source.id,
                            &LogEntry::warn(
                                steps::EXTRACTION_FAILED,
                                format!("No content extracted: {}", e),
                            )
                            .with_url(&page.final_url)
                            .with_details(json!({ "reason": e.reason_code() })),
                        )
                        .await?;
                    e.links().to_vec()
                }
            };

            if entry.depth < options.max_depth {
                result.links_found += self
                    .enqueue_links(&source.id, &mut frontier, &scope, &links, entry.depth + 1)
                    .await?;
            }

            advance_progress(&progress);
        }

        close_fetcher(fetcher.as_ref()).await;

        if cancelled {
            finish_progress(progress, "Cancelled");
            info!("Processing of {} cancelled", source.id);
            let entry = LogEntry::info(
                steps::PROCESSING_CANCELLED,
                "Processing stopped because the source was reset or removed",
            );
            // The source may be gone, in which case there is nowhere to log
            if let Err(e) = self.db.append_log(&source.id, &entry).await {
                debug!("Cancellation not logged for {}: {}", source.id, e);
            }
            result.outcome = RunOutcome::Cancelled;
            return Ok(result);
        }

        let (status, entry) = if result.documents_created == 0 {
            let message = format!(
                "No documents created from {} crawled page(s)",
                result.pages_crawled
            );
            result.error = Some(message.clone());
            (
                SourceStatus::Failed,
                LogEntry::error(steps::NO_DOCUMENTS_CREATED, message),
            )
        } else {
            (
                SourceStatus::Completed,
                LogEntry::info(
                    steps::PROCESSING_COMPLETED,
                    format!(
                        "Processed {} page(s) into {} document(s)",
                        result.pages_crawled, result.documents_created
                    ),
                )
                .with_progress(100)
                .with_details(json!({
                    "pagesCrawled": result.pages_crawled,
                    "pagesFailed": result.pages_failed,
                    "linksFound": result.links_found,
                    "documentsCreated": result.documents_created,
                    "documentsEmbedded": result.documents_embedded,
                })),
            )
        };

        let owned = self.db.finish_run(&source.id, run_id, status, &entry).await?;
        result.outcome = match (owned, status) {
            (false, _) => RunOutcome::Cancelled,
            (true, SourceStatus::Completed) => RunOutcome::Completed,
            (true, _) => RunOutcome::Failed,
        };

        finish_progress(progress, &format!("{}", status));
        info!(
            "Processing of {} finished as {}: {} pages, {} documents",
            source.id, status, result.pages_crawled, result.documents_created
        );
        Ok(result)
    }

    /// Chunk page text and attach embeddings where requested
    async fn build_documents(
        &self,
        source_id: &str,
        url: &str,
        title: &str,
        content: &str,
        embedder: Option<&dyn Embedder>,
    ) -> Result<Vec<Document>> {
        let chunks = chunk_text(content, &self.chunk);

        let vectors = match embedder {
            Some(embedder) if !chunks.is_empty() => {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                let outcome = embed_with_fallback(embedder, &texts, self.embedding_batch_size).await;

                for (index, error) in &outcome.failures {
                    self.db
                        .append_log(
                            source_id,
                            &LogEntry::warn(
                                steps::EMBEDDING_FAILED,
                                format!("Embedding failed for chunk {}: {}", index, error),
                            )
                            .with_url(url)
                            .with_details(json!({ "chunkIndex": index })),
                        )
                        .await?;
                }
                outcome.vectors
            }
            _ => vec![None; chunks.len()],
        };

        Ok(chunks
            .iter()
            .zip(vectors.iter())
            .map(|(chunk, vector)| {
                Document::new(
                    source_id.to_string(),
                    url.to_string(),
                    title.to_string(),
                    chunk.text.clone(),
                    chunk.index as i64,
                    chunk.hash.clone(),
                    vector.as_deref(),
                )
            })
            .collect())
    }

    /// Push in-scope links into the frontier, logging each newly queued one
    async fn enqueue_links(
        &self,
        source_id: &str,
        frontier: &mut UrlFrontier,
        scope: &CrawlScope,
        links: &[ExtractedLink],
        depth: u32,
    ) -> Result<u32> {
        let mut queued = 0;
        for link in links {
            let url = canonicalize_url(&link.url);
            if !scope.allows(&url) || !frontier.enqueue(&url, depth) {
                continue;
            }
            queued += 1;
            self.db
                .append_log(
                    source_id,
                    &LogEntry::info(steps::LINK_FOUND, format!("Queued {}", url))
                        .with_url(&url)
                        .with_details(json!({ "depth": depth })),
                )
                .await?;
        }
        Ok(queued)
    }

    fn start_progress_bar(&self, max_pages: u32, name: &str) -> Option<ProgressBar> {
        self.show_progress
            .then(|| crawl_progress_bar(max_pages, name))
    }
}

async fn close_fetcher(fetcher: &dyn PageFetcher) {
    fetcher.close().await;
}

fn advance_progress(pb: &Option<ProgressBar>) {
    if let Some(pb) = pb {
        pb.inc(1);
    }
}

fn finish_progress(pb: Option<ProgressBar>, message: &str) {
    if let Some(pb) = pb {
        pb.finish_with_message(message.to_string());
    }
}
