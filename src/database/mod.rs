use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::models::CanonicalProduct;
use crate::traits::{PersistenceGateway, UpsertStatus};

/// SQLite-backed [`PersistenceGateway`]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_url` and runs
    /// migrations. `sqlite::memory:` gives a private in-memory database.
    pub async fn new(db_url: &str) -> Result<Self> {
        let in_memory = db_url.contains(":memory:");

        if !in_memory && !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!(db_url, "creating database file");
            Sqlite::create_database(db_url).await?;
        }

        // Every in-memory connection is its own database
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .with_context(|| format!("failed to open {db_url}"))?;

        info!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database initialized successfully");
        Ok(Self { pool })
    }

    pub async fn existing_ids(&self, source: &str) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT external_id FROM products WHERE source = ?")
            .bind(source)
            .fetch_all(&self.pool)
            .await?;

        let ids = rows
            .into_iter()
            .map(|row| row.get::<String, _>("external_id"))
            .collect();

        Ok(ids)
    }

    /// The product as last stored, decoded from its JSON payload.
    pub async fn find(&self, source: &str, external_id: &str) -> Result<Option<CanonicalProduct>> {
        let row = sqlx::query("SELECT payload FROM products WHERE source = ? AND external_id = ?")
            .bind(source)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let payload: String = row.get("payload");
            serde_json::from_str(&payload).context("stored payload is not a product")
        })
        .transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("total"))
    }
}

#[async_trait]
impl PersistenceGateway for Database {
    async fn upsert(
        &self,
        source: &str,
        external_id: &str,
        product: &CanonicalProduct,
    ) -> Result<UpsertStatus> {
        let (min_price, max_price) = product.price_range();
        let payload = serde_json::to_string(product)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let existed = sqlx::query("SELECT 1 FROM products WHERE source = ? AND external_id = ?")
            .bind(source)
            .bind(external_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        sqlx::query(
            r"
            INSERT INTO products
                (source, external_id, name, brand, description, url,
                 min_price, max_price, payload, first_seen_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (source, external_id) DO UPDATE SET
                name = excluded.name,
                brand = excluded.brand,
                description = excluded.description,
                url = excluded.url,
                min_price = excluded.min_price,
                max_price = excluded.max_price,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            ",
        )
        .bind(source)
        .bind(external_id)
        .bind(&product.name)
        .bind(&product.brand)
        .bind(&product.description)
        .bind(&product.url)
        .bind(min_price)
        .bind(max_price)
        .bind(&payload)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let status = if existed {
            UpsertStatus::Updated
        } else {
            UpsertStatus::Created
        };
        debug!(source, external_id, ?status, "product stored");
        Ok(status)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}
