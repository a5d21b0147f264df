//! Configuration management for knowledge-crawler
//!
//! Handles loading, saving, and validating configuration from TOML files,
//! plus the per-run [`IngestOptions`] and their bounds.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Allowed range for `max_pages`
pub const MAX_PAGES_RANGE: (u32, u32) = (1, 1000);

/// Allowed range for `max_depth`
pub const MAX_DEPTH_RANGE: (u32, u32) = (0, 10);

/// Upper bound for `delay_ms`
pub const MAX_DELAY_MS: u64 = 60_000;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Web crawling configuration
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Stuck-crawl diagnostics
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Web crawling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Maximum pages fetched per run
    #[serde(default = "default_crawl_max_pages")]
    pub max_pages: u32,

    /// Maximum crawl depth from seed URL
    #[serde(default = "default_crawl_max_depth")]
    pub max_depth: u32,

    /// Generate embeddings for extracted chunks
    #[serde(default = "default_generate_embeddings")]
    pub generate_embeddings: bool,

    /// Whether to respect robots.txt
    #[serde(default = "default_respect_robots")]
    pub respect_robots_txt: bool,

    /// Delay between requests to the same host (milliseconds)
    #[serde(default = "default_crawl_delay_ms")]
    pub delay_ms: u64,

    /// Request timeout in seconds
    #[serde(default = "default_crawl_timeout")]
    pub timeout_secs: u64,

    /// User agent string
    #[serde(default = "default_crawl_user_agent")]
    pub user_agent: String,

    /// Auto-detect SPAs and use JavaScript rendering when needed
    #[serde(default = "default_auto_js_rendering")]
    pub auto_js_rendering: bool,

    /// Time to wait for page load when JS rendering (milliseconds)
    #[serde(default = "default_js_page_load_timeout")]
    pub js_page_load_timeout_ms: u64,

    /// Time to wait after load for dynamic content (milliseconds)
    #[serde(default = "default_js_render_wait")]
    pub js_render_wait_ms: u64,

    /// Disable browser sandbox (required in some Docker/CI environments)
    #[serde(default)]
    pub js_no_sandbox: bool,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum characters per chunk
    #[serde(default = "default_chunk_max_chars")]
    pub max_chars: usize,

    /// Overlap characters between chunks
    #[serde(default = "default_chunk_overlap")]
    pub overlap_chars: usize,

    /// Prefer breaking at heading boundaries
    #[serde(default = "default_prefer_heading_boundaries")]
    pub prefer_heading_boundaries: bool,

    /// Minimum chunk size (don't create tiny chunks)
    #[serde(default = "default_chunk_min_chars")]
    pub min_chars: usize,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings API
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Environment variable name holding the API key
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

/// Diagnostics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Minutes without progress before a processing source counts as stuck
    #[serde(default = "default_stuck_threshold_minutes")]
    pub stuck_threshold_minutes: i64,

    /// Number of recent error logs to surface
    #[serde(default = "default_recent_error_limit")]
    pub recent_error_limit: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for knowledge-crawler data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

/// Options for a single processing run of a knowledge source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOptions {
    /// Pages fetched at most (1..=1000, default 50)
    pub max_pages: u32,

    /// Link depth from the seed URL (0..=10, default 2)
    pub max_depth: u32,

    /// Request embeddings for every chunk (default true)
    pub generate_embeddings: bool,

    /// Skip URLs disallowed by robots.txt (default true)
    pub respect_robots_txt: bool,

    /// Politeness delay between requests to one host (0..=60000 ms, default 1000)
    pub delay_ms: u64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_pages: default_crawl_max_pages(),
            max_depth: default_crawl_max_depth(),
            generate_embeddings: default_generate_embeddings(),
            respect_robots_txt: default_respect_robots(),
            delay_ms: default_crawl_delay_ms(),
        }
    }
}

impl IngestOptions {
    /// Check every field against its documented bounds
    pub fn validate(&self) -> Result<()> {
        if self.max_pages < MAX_PAGES_RANGE.0 || self.max_pages > MAX_PAGES_RANGE.1 {
            return Err(Error::Config(format!(
                "max_pages must be between {} and {}, got {}",
                MAX_PAGES_RANGE.0, MAX_PAGES_RANGE.1, self.max_pages
            )));
        }
        if self.max_depth > MAX_DEPTH_RANGE.1 {
            return Err(Error::Config(format!(
                "max_depth must be between {} and {}, got {}",
                MAX_DEPTH_RANGE.0, MAX_DEPTH_RANGE.1, self.max_depth
            )));
        }
        if self.delay_ms > MAX_DELAY_MS {
            return Err(Error::Config(format!(
                "delay_ms must be at most {}, got {}",
                MAX_DELAY_MS, self.delay_ms
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crawl: CrawlConfig::default(),
            chunk: ChunkConfig::default(),
            embedding: EmbeddingConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: default_crawl_max_pages(),
            max_depth: default_crawl_max_depth(),
            generate_embeddings: default_generate_embeddings(),
            respect_robots_txt: default_respect_robots(),
            delay_ms: default_crawl_delay_ms(),
            timeout_secs: default_crawl_timeout(),
            user_agent: default_crawl_user_agent(),
            auto_js_rendering: default_auto_js_rendering(),
            js_page_load_timeout_ms: default_js_page_load_timeout(),
            js_render_wait_ms: default_js_render_wait(),
            js_no_sandbox: false,
        }
    }
}

impl CrawlConfig {
    /// Default run options taken from the `[crawl]` section
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            max_pages: self.max_pages,
            max_depth: self.max_depth,
            generate_embeddings: self.generate_embeddings,
            respect_robots_txt: self.respect_robots_txt,
            delay_ms: self.delay_ms,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: default_chunk_max_chars(),
            overlap_chars: default_chunk_overlap(),
            prefer_heading_boundaries: default_prefer_heading_boundaries(),
            min_chars: default_chunk_min_chars(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key_env: default_embedding_api_key_env(),
            batch_size: default_embedding_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            stuck_threshold_minutes: default_stuck_threshold_minutes(),
            recent_error_limit: default_recent_error_limit(),
        }
    }
}

impl Config {
    /// Get the default base directory (~/.knowledge-crawler)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".knowledge-crawler")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("knowledge.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("knowledge.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_config_path())
    }

    /// Build a default configuration rooted at `base_dir` without touching disk
    pub fn with_base_dir(base_dir: Option<PathBuf>) -> Self {
        let mut config = Config::default();
        config.init_paths(base_dir);
        config
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.crawl.ingest_options().validate()?;

        if self.crawl.timeout_secs == 0 {
            return Err(Error::Config("crawl.timeout_secs must be > 0".to_string()));
        }

        if self.chunk.max_chars == 0 {
            return Err(Error::Config("chunk.max_chars must be > 0".to_string()));
        }

        if self.chunk.overlap_chars >= self.chunk.max_chars {
            return Err(Error::Config(
                "chunk.overlap_chars must be less than chunk.max_chars".to_string(),
            ));
        }

        if self.chunk.min_chars > self.chunk.max_chars {
            return Err(Error::Config(
                "chunk.min_chars must not exceed chunk.max_chars".to_string(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be > 0".to_string(),
            ));
        }

        if self.diagnostics.stuck_threshold_minutes <= 0 {
            return Err(Error::Config(
                "diagnostics.stuck_threshold_minutes must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
