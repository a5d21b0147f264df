//! knowledge-crawler - website ingestion for agent knowledge bases
//!
//! This crate provides:
//! - A bounded, polite crawler that stays inside a seed URL's scope
//! - Main-content extraction, deterministic chunking and optional embeddings
//! - A SQLite-backed status tracker with a per-source processing log
//! - CLI commands that drive the ingestion service

pub mod chunk;
pub mod commands;
pub mod config;
pub mod crawl;
pub mod embed;
pub mod error;
pub mod ingest;
pub mod meta;
pub mod parse;
pub mod progress;

pub use config::Config;
pub use error::{Error, Result};
