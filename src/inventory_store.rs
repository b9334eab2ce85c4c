//! Inventory persistence and merge semantics.

use crate::config::DatabaseConfig;
use crate::product_parser::ProductCandidate;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// How extracted products combine with a shop's existing inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Add extracted products on top of whatever is already stored
    #[default]
    Append,
    /// Clear the shop's inventory first, then insert the extracted products
    Replace,
}

impl FromStr for MergeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(MergeMode::Append),
            "replace" => Ok(MergeMode::Replace),
            other => Err(format!("Unknown merge mode: {}", other)),
        }
    }
}

/// A stored inventory row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryItem {
    /// Unique row ID
    pub id: Uuid,
    /// Shop the item belongs to
    pub shop_id: Uuid,
    /// Product name as extracted
    pub name: String,
    /// Stock count
    pub quantity: i32,
    /// When the product was extracted
    pub added_at: DateTime<Utc>,
    /// When the row was written
    pub created_at: DateTime<Utc>,
}

/// PostgreSQL-backed inventory store.
pub struct InventoryStore {
    pool: PgPool,
}

impl InventoryStore {
    /// Create a new store with a connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Merge extracted products into a shop's inventory.
    ///
    /// In `Replace` mode the shop's existing rows are cleared first; either
    /// way every candidate becomes its own row, duplicates included. The
    /// whole merge is one transaction. Returns the number of rows inserted.
    #[instrument(skip(self, products), fields(shop_id = %shop_id, product_count = products.len(), mode = ?mode))]
    pub async fn merge_products(
        &self,
        shop_id: Uuid,
        products: &[ProductCandidate],
        mode: MergeMode,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        if mode == MergeMode::Replace {
            let cleared = sqlx::query("DELETE FROM inventory_items WHERE shop_id = $1")
                .bind(shop_id)
                .execute(&mut *tx)
                .await
                .context("Failed to clear existing inventory")?;

            debug!(
                cleared = cleared.rows_affected(),
                "Cleared inventory for replace merge"
            );
        }

        for product in products {
            sqlx::query(
                r#"
                INSERT INTO inventory_items (id, shop_id, name, quantity, added_at, created_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(shop_id)
            .bind(&product.name)
            .bind(product.quantity as i32)
            .bind(product.added_at)
            .execute(&mut *tx)
            .await
            .context("Failed to insert inventory item")?;
        }

        tx.commit().await.context("Failed to commit merge transaction")?;

        let inserted = products.len() as u64;
        metrics::counter!("shelfscan.inventory.items_inserted").increment(inserted);

        debug!(inserted, "Merged products into inventory");

        Ok(inserted)
    }

    /// List a shop's inventory, most recently added first.
    pub async fn list_items(
        &self,
        shop_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InventoryItem>> {
        let items = sqlx::query_as::<_, InventoryItem>(
            r#"
            SELECT id, shop_id, name, quantity, added_at, created_at
            FROM inventory_items
            WHERE shop_id = $1
            ORDER BY added_at DESC, created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(shop_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query inventory items")?;

        Ok(items)
    }

    /// Count a shop's inventory rows.
    pub async fn item_count(&self, shop_id: Uuid) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM inventory_items WHERE shop_id = $1")
                .bind(shop_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count inventory items")?;

        Ok(count.0)
    }

    /// Get the connection pool (for readiness checks).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_mode_parsing() {
        assert_eq!("append".parse::<MergeMode>().unwrap(), MergeMode::Append);
        assert_eq!("replace".parse::<MergeMode>().unwrap(), MergeMode::Replace);
        assert_eq!(" Replace ".parse::<MergeMode>().unwrap(), MergeMode::Replace);
        assert_eq!("APPEND".parse::<MergeMode>().unwrap(), MergeMode::Append);
    }

    #[test]
    fn test_unknown_merge_mode_is_rejected() {
        let result = "upsert".parse::<MergeMode>();

        assert!(result.is_err());
        assert!(result.unwrap_err().contains("upsert"));
    }

    #[test]
    fn test_merge_mode_defaults_to_append() {
        assert_eq!(MergeMode::default(), MergeMode::Append);
    }

    #[test]
    fn test_merge_mode_deserializes_lowercase() {
        let append: MergeMode = serde_json::from_str("\"append\"").unwrap();
        let replace: MergeMode = serde_json::from_str("\"replace\"").unwrap();

        assert_eq!(append, MergeMode::Append);
        assert_eq!(replace, MergeMode::Replace);
    }
}
