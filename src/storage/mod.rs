//! Raw markup archive on disk and JSON export of scraped products

use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ScrapeError;
use crate::models::CanonicalProduct;
use crate::traits::ArchiveStore;

/// Stores archived payloads as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `source/<md5(url)>-<unix-ts>.html`
    pub fn key_for(source: &str, url: &str, at: DateTime<Utc>) -> String {
        format!("{source}/{:x}-{}.html", md5::compute(url), at.timestamp())
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            bail!("archive key {key:?} must be a relative path without '..'");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArchiveStore for FsArchive {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(key, bytes = bytes.len(), "payload archived");
        Ok(key.to_string())
    }
}

/// Shape of the JSON export file
#[derive(Debug, Serialize, Deserialize)]
pub struct ProductExport {
    pub products: Vec<CanonicalProduct>,
    pub scraped_at: DateTime<Utc>,
    pub total_products: usize,
}

pub async fn save_products(products: &[CanonicalProduct], path: &Path) -> Result<(), ScrapeError> {
    let storage_error = |reason: String| ScrapeError::Storage {
        target: path.display().to_string(),
        reason,
    };

    let export = ProductExport {
        products: products.to_vec(),
        scraped_at: Utc::now(),
        total_products: products.len(),
    };
    let json = serde_json::to_string_pretty(&export).map_err(|e| storage_error(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| storage_error(e.to_string()))?;
    }
    tokio::fs::write(path, json)
        .await
        .map_err(|e| storage_error(e.to_string()))?;

    info!(path = %path.display(), total = products.len(), "products exported");
    Ok(())
}

/// Reads an export back. A missing file is an empty list.
pub async fn load_products(path: &Path) -> Result<Vec<CanonicalProduct>, ScrapeError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(ScrapeError::Storage {
                target: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    };

    let export: ProductExport = serde_json::from_str(&raw).map_err(|e| ScrapeError::Storage {
        target: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(export.products)
}
