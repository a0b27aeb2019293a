//! Browser-rendered product scraping: human-like page visits, structured
//! data extraction with a selector fallback, and canonical product records.

pub mod assembler;
pub mod behavior;
pub mod browser;
pub mod config;
pub mod database;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod scrapers;
pub mod storage;
pub mod traits;
pub mod trajectory;

pub use config::ScraperConfig;
pub use error::ScrapeError;
pub use models::{CanonicalProduct, ScrapeOutcome};
pub use orchestrator::ScraperOrchestrator;
