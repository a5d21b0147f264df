//! Init command implementation

use crate::config::{Config, PathsConfig};
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub config_path: PathBuf,
    pub force: bool,
}

/// Write a default config file and create the metadata database next to it
pub async fn cmd_init(options: InitOptions) -> Result<Config> {
    let InitOptions { config_path, force } = options;

    if config_path.exists() && !force {
        return Err(Error::AlreadyInitialized(config_path.display().to_string()));
    }

    let base_dir = config_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_base_dir);

    let mut config = Config::default();
    config.paths = PathsConfig {
        db_file: base_dir.join("knowledge.db"),
        config_file: config_path,
        base_dir,
    };
    config.validate()?;
    config.save()?;

    MetaDb::connect(&config).await?;
    info!("Created database at {:?}", config.paths.db_file);

    Ok(config)
}

/// Resolve `--config` into a config file path; a directory gets `config.toml`
pub fn resolve_config_path(path: Option<PathBuf>) -> PathBuf {
    match path {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => path,
        Some(dir) => dir.join("config.toml"),
        None => Config::default_config_path(),
    }
}

pub fn print_init(config: &Config) {
    println!("✓ Initialized knowledge-crawler at {:?}", config.paths.base_dir);
    println!("\nConfiguration: {:?}", config.paths.config_file);
    println!("Database: {:?}", config.paths.db_file);
    println!("\nNext steps:");
    println!(
        "  export {}=...                                    # Enable embeddings",
        config.embedding.api_key_env
    );
    println!("  knowledge-crawler add <agent> <name> https://docs.example.com/");
    println!("  knowledge-crawler process <source-id>");
}
