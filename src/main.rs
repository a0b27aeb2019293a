use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use product_scout::browser::chrome::ChromeLauncher;
use product_scout::database::Database;
use product_scout::scrapers::SiteKind;
use product_scout::storage::{FsArchive, save_products};
use product_scout::{CanonicalProduct, ScrapeOutcome, ScraperConfig, ScraperOrchestrator};

#[derive(Debug, Parser)]
#[command(name = "product-scout", version, about = "Scrape product pages through a real browser")]
struct Cli {
    /// Product page URLs to scrape
    urls: Vec<String>,

    /// File with one URL per line; blank lines and `#` comments are ignored
    #[arg(long)]
    urls_file: Option<PathBuf>,

    /// Which site adapter to use
    #[arg(long, default_value = "farfetch")]
    site: SiteKind,

    /// SQLite URL to upsert products into, e.g. sqlite://products.db
    #[arg(long)]
    database: Option<String>,

    /// Write scraped products to this JSON file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Keep the raw markup of every fetched page under this directory
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Chrome or Chromium executable to launch
    #[arg(long, env = "CHROME_PATH")]
    chrome: Option<PathBuf>,
}

impl Cli {
    async fn collect_urls(&self) -> Result<Vec<String>> {
        let mut urls = self.urls.clone();
        if let Some(path) = &self.urls_file {
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            urls.extend(parse_url_list(&contents));
        }
        Ok(urls)
    }
}

fn parse_url_list(contents: &str) -> impl Iterator<Item = String> + '_ {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let urls = cli.collect_urls().await?;
    if urls.is_empty() {
        bail!("no URLs given; pass them as arguments or with --urls-file");
    }

    let config = Arc::new(ScraperConfig::from_env()?);
    let adapter = cli.site.adapter(&config.base_url)?;
    let launcher = ChromeLauncher {
        headless: !cli.headed,
        executable: cli.chrome.clone(),
        ..ChromeLauncher::default()
    };

    let database = match &cli.database {
        Some(url) => Some(Database::new(url).await?),
        None => None,
    };

    let mut orchestrator = ScraperOrchestrator::new(adapter, Arc::new(launcher), Arc::clone(&config))?;
    if let Some(dir) = &cli.archive_dir {
        orchestrator = orchestrator.with_archive(Arc::new(FsArchive::new(dir)));
    }

    info!(site = ?cli.site, urls = urls.len(), "Starting product scout");
    let outcomes = orchestrator.scrape_batch(&urls).await;

    if let Some(database) = &database {
        let source = orchestrator.adapter().name();
        let known = database.existing_ids(source).await?;
        let fresh = outcomes
            .iter()
            .filter_map(ScrapeOutcome::product)
            .filter(|product| !known.contains(&product.external_id()))
            .count();
        info!(source, known = known.len(), fresh, "comparing with stored products");

        let summary = orchestrator.persist(database, &outcomes).await;
        info!(
            created = summary.created,
            updated = summary.updated,
            failed = summary.failed,
            "products stored"
        );
    }

    let products: Vec<CanonicalProduct> = outcomes
        .iter()
        .filter_map(ScrapeOutcome::product)
        .cloned()
        .collect();
    if let Some(path) = &cli.output {
        save_products(&products, path).await?;
    }

    report(&outcomes);
    Ok(())
}

fn report(outcomes: &[ScrapeOutcome]) {
    for outcome in outcomes {
        match outcome {
            ScrapeOutcome::Success { url, product } => {
                let (min, max) = product.price_range();
                println!(
                    "OK      {url}\n        {} | {} | {} variants | {:?}..{:?}",
                    product.brand,
                    product.name,
                    product.variants.len(),
                    min,
                    max
                );
            }
            ScrapeOutcome::Skipped { url, reason } => println!("SKIPPED {url}\n        {reason}"),
            ScrapeOutcome::Failed { url, error } => {
                warn!(url = %url, %error, "no product");
                println!("FAILED  {url}\n        {error}");
            }
        }
    }

    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    println!("\n{succeeded}/{} pages produced a product", outcomes.len());
}
