//! `PostgreSQL` projection store for the product read model.
//!
//! # Architecture
//!
//! ```text
//! Write Side (writer)               Read Side (reader)
//! ┌─────────────────────┐          ┌─────────────────────┐
//! │  PostgreSQL DB #1   │          │  PostgreSQL DB #2   │
//! │                     │   →→→    │                     │
//! │  products           │  Events  │  product_views      │
//! └─────────────────────┘          └─────────────────────┘
//! ```
//!
//! Create and update are conditional upserts: a row is only overwritten by a
//! state whose `updated_at` is not older than the stored one. Redelivered or
//! reordered events therefore never roll a product back.
//!
//! # Example
//!
//! ```ignore
//! use catalog_projections::postgres::PostgresReadRepository;
//!
//! let store = PostgresReadRepository::new_with_separate_db(
//!     "postgres://localhost/catalog_read",
//!     10,
//! ).await?;
//! store.migrate().await?;
//! ```

use catalog_core::product::{Price, Product, ProductId};
use catalog_core::repository::{
    Pagination, ProductReadRepository, ProductsList, RepositoryError, WriteOutcome,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::FromRow;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

const COLUMNS: &str = "id, name, description, price_cents, created_at, updated_at";

#[derive(Debug, FromRow)]
struct ProductViewRow {
    id: Uuid,
    name: String,
    description: String,
    price_cents: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductViewRow> for Product {
    fn from(row: ProductViewRow) -> Self {
        Self {
            id: ProductId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            price: Price::from_cents(row.price_cents),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL-backed [`ProductReadRepository`].
#[derive(Clone)]
pub struct PostgresReadRepository {
    pool: PgPool,
}

impl PostgresReadRepository {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store with its own connection pool.
    ///
    /// The read model normally lives in a database separate from the
    /// transactional store.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if the connection fails.
    pub async fn new_with_separate_db(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Run the projection migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Migration failed: {e}")))?;

        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn upsert_if_newer(&self, product: Product) -> Result<WriteOutcome, RepositoryError> {
        let query = format!(
            "INSERT INTO product_views ({COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 description = EXCLUDED.description,
                 price_cents = EXCLUDED.price_cents,
                 created_at = EXCLUDED.created_at,
                 updated_at = EXCLUDED.updated_at
             WHERE product_views.updated_at <= EXCLUDED.updated_at
             RETURNING {COLUMNS}"
        );

        let row: Option<ProductViewRow> = sqlx::query_as(&query)
            .bind(product.id.as_uuid())
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price.cents())
            .bind(product.created_at)
            .bind(product.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Failed to upsert: {e}")))?;

        Ok(row.map_or(WriteOutcome::Stale, |row| WriteOutcome::Applied(row.into())))
    }
}

/// Escape `LIKE` wildcards so user text matches literally.
fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl ProductReadRepository for PostgresReadRepository {
    fn create(&self, product: Product) -> BoxFuture<'_, Result<WriteOutcome, RepositoryError>> {
        Box::pin(self.upsert_if_newer(product))
    }

    fn update(&self, product: Product) -> BoxFuture<'_, Result<WriteOutcome, RepositoryError>> {
        Box::pin(self.upsert_if_newer(product))
    }

    fn delete(&self, id: ProductId) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM product_views WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Storage(format!("Failed to delete: {e}")))?;
            Ok(())
        })
    }

    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Result<Product, RepositoryError>> {
        Box::pin(async move {
            let query = format!("SELECT {COLUMNS} FROM product_views WHERE id = $1");

            let row: Option<ProductViewRow> = sqlx::query_as(&query)
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RepositoryError::Storage(format!("Failed to get: {e}")))?;

            row.map(Product::from).ok_or(RepositoryError::NotFound(id))
        })
    }

    fn search(
        &self,
        text: String,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<ProductsList, RepositoryError>> {
        Box::pin(async move {
            let pattern = like_pattern(text.trim());
            let filter = "name ILIKE $1 OR description ILIKE $1";

            let (total,): (i64,) =
                sqlx::query_as(&format!("SELECT COUNT(*) FROM product_views WHERE {filter}"))
                    .bind(&pattern)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| RepositoryError::Storage(format!("Failed to count: {e}")))?;

            let offset = i64::try_from(pagination.offset())
                .map_err(|_| RepositoryError::Storage("page offset out of range".to_string()))?;

            let query = format!(
                "SELECT {COLUMNS} FROM product_views
                 WHERE {filter}
                 ORDER BY updated_at DESC, id
                 LIMIT $2 OFFSET $3"
            );

            let rows: Vec<ProductViewRow> = sqlx::query_as(&query)
                .bind(&pattern)
                .bind(i64::from(pagination.size()))
                .bind(offset)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RepositoryError::Storage(format!("Failed to search: {e}")))?;

            let products = rows.into_iter().map(Product::from).collect();
            Ok(ProductsList::new(
                products,
                u64::try_from(total).unwrap_or_default(),
                pagination,
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_wraps_and_escapes() {
        assert_eq!(like_pattern("widget"), "%widget%");
        assert_eq!(like_pattern(""), "%%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
