use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use tracing::debug;

use shared::{
    domain::{ProductId, WishlistId},
    protocol::WishlistItem,
};

const MEMORY_URL: &str = "sqlite::memory:";

/// Device-local application state: key-value rows, the demo-catalog cart and
/// the wishlist mirror.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredWishlistItem {
    pub item: WishlistItem,
    /// Server row id, known once the item has been mirrored to the backend.
    pub wishlist_id: Option<WishlistId>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url '{database_url}'"))?
            .create_if_missing(true);
        // Every pooled connection to an in-memory url opens its own database.
        let max_connections = if database_url.starts_with(MEMORY_URL) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("storage: opened database_url={database_url}");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM app_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read app_state key '{key}'"))?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn put_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO app_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write app_state key '{key}'"))?;
        Ok(())
    }

    pub async fn delete_value(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM app_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn local_cart(&self) -> Result<BTreeMap<ProductId, u32>> {
        let rows = sqlx::query("SELECT product_id, quantity FROM local_cart")
            .fetch_all(&self.pool)
            .await
            .context("failed to load local cart")?;

        let mut cart = BTreeMap::new();
        for row in rows {
            let product_id = ProductId(row.try_get::<i64, _>("product_id")?);
            let quantity: i64 = row.try_get("quantity")?;
            let quantity = u32::try_from(quantity)
                .with_context(|| format!("corrupt quantity {quantity} for product {product_id}"))?;
            cart.insert(product_id, quantity);
        }
        Ok(cart)
    }

    /// Stores the quantity for a product. Zero removes the row.
    pub async fn set_local_quantity(&self, product_id: ProductId, quantity: u32) -> Result<()> {
        if quantity == 0 {
            sqlx::query("DELETE FROM local_cart WHERE product_id = ?")
                .bind(product_id.0)
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO local_cart (product_id, quantity) VALUES (?1, ?2)
             ON CONFLICT(product_id) DO UPDATE SET
                quantity = excluded.quantity,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(product_id.0)
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store local quantity for product {product_id}"))?;
        Ok(())
    }

    pub async fn clear_local_cart(&self) -> Result<()> {
        sqlx::query("DELETE FROM local_cart")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn wishlist_items(&self) -> Result<Vec<StoredWishlistItem>> {
        let rows = sqlx::query(
            "SELECT product_id, wishlist_id, name, price, image, seller
             FROM wishlist_items ORDER BY created_at, product_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load wishlist")?;

        rows.into_iter().map(|row| wishlist_from_row(&row)).collect()
    }

    pub async fn upsert_wishlist_item(&self, stored: &StoredWishlistItem) -> Result<()> {
        let item = &stored.item;
        sqlx::query(
            r#"
            INSERT INTO wishlist_items (product_id, wishlist_id, name, price, image, seller)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(product_id) DO UPDATE SET
                wishlist_id = COALESCE(excluded.wishlist_id, wishlist_items.wishlist_id),
                name = excluded.name,
                price = excluded.price,
                image = excluded.image,
                seller = excluded.seller
            "#,
        )
        .bind(item.product_id.0)
        .bind(stored.wishlist_id.map(|id| id.0))
        .bind(&item.name)
        .bind(item.price.to_string())
        .bind(&item.image)
        .bind(&item.seller)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store wishlist product {}", item.product_id))?;
        Ok(())
    }

    /// Returns the removed row, if the product was wishlisted.
    pub async fn remove_wishlist_item(
        &self,
        product_id: ProductId,
    ) -> Result<Option<StoredWishlistItem>> {
        let row = sqlx::query(
            "DELETE FROM wishlist_items WHERE product_id = ?
             RETURNING product_id, wishlist_id, name, price, image, seller",
        )
        .bind(product_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(wishlist_from_row).transpose()
    }

    /// Replaces the whole wishlist in one transaction.
    pub async fn replace_wishlist(&self, items: &[StoredWishlistItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM wishlist_items")
            .execute(&mut *tx)
            .await?;
        for stored in items {
            let item = &stored.item;
            sqlx::query(
                "INSERT OR REPLACE INTO wishlist_items
                    (product_id, wishlist_id, name, price, image, seller)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(item.product_id.0)
            .bind(stored.wishlist_id.map(|id| id.0))
            .bind(&item.name)
            .bind(item.price.to_string())
            .bind(&item.image)
            .bind(&item.seller)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await.context("failed to commit wishlist replace")?;
        Ok(())
    }

    /// Drops everything tied to the signed-in customer.
    pub async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in [
            "DELETE FROM app_state",
            "DELETE FROM local_cart",
            "DELETE FROM wishlist_items",
        ] {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to run '{statement}'"))?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn wishlist_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredWishlistItem> {
    let price: String = row.try_get("price")?;
    let product_id = ProductId(row.try_get::<i64, _>("product_id")?);
    let price = Decimal::from_str(&price)
        .with_context(|| format!("corrupt price '{price}' for wishlist product {product_id}"))?;
    Ok(StoredWishlistItem {
        item: WishlistItem {
            product_id,
            name: row.try_get("name")?,
            price,
            image: row.try_get("image")?,
            seller: row.try_get("seller")?,
        },
        wishlist_id: row
            .try_get::<Option<i64>, _>("wishlist_id")?
            .map(WishlistId),
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with(MEMORY_URL) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
