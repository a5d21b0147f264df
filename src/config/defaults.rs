//! Default values for configuration

/// Default maximum pages per crawl
pub fn default_crawl_max_pages() -> u32 {
    50
}

/// Default maximum crawl depth from the seed URL
pub fn default_crawl_max_depth() -> u32 {
    2
}

/// Default: generate embeddings for extracted chunks
pub fn default_generate_embeddings() -> bool {
    true
}

/// Default: respect robots.txt
pub fn default_respect_robots() -> bool {
    true
}

/// Default delay between requests to the same host (milliseconds)
pub fn default_crawl_delay_ms() -> u64 {
    1000
}

/// Default request timeout in seconds
pub fn default_crawl_timeout() -> u64 {
    30
}

/// Default user agent
pub fn default_crawl_user_agent() -> String {
    format!(
        "knowledge-crawler/{} (Knowledge Source Indexer)",
        env!("CARGO_PKG_VERSION")
    )
}

/// Default: auto-detect SPAs and render them (only with the js-rendering feature)
pub fn default_auto_js_rendering() -> bool {
    true
}

/// Default JS page load timeout (milliseconds)
pub fn default_js_page_load_timeout() -> u64 {
    30000
}

/// Default wait after load for dynamic content (milliseconds)
pub fn default_js_render_wait() -> u64 {
    2000
}

/// Default maximum characters per chunk
pub fn default_chunk_max_chars() -> usize {
    1500
}

/// Default minimum characters per chunk
pub fn default_chunk_min_chars() -> usize {
    100
}

/// Default overlap characters between chunks
pub fn default_chunk_overlap() -> usize {
    200
}

/// Default: prefer heading boundaries
pub fn default_prefer_heading_boundaries() -> bool {
    true
}

/// Default embedding endpoint base URL (OpenAI-compatible)
pub fn default_embedding_base_url() -> String {
    std::env::var("KNOWLEDGE_CRAWLER_EMBEDDING_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Default environment variable holding the embedding API key
pub fn default_embedding_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default embedding request timeout in seconds
pub fn default_embedding_timeout() -> u64 {
    60
}

/// Minutes in `processing` after which a source is reported as stuck
pub fn default_stuck_threshold_minutes() -> i64 {
    10
}

/// Number of recent error logs included in a diagnostic report
pub fn default_recent_error_limit() -> usize {
    5
}
