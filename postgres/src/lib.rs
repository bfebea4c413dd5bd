//! `PostgreSQL` transactional store for products.
//!
//! This is the authoritative, command-side store. Every successful mutation
//! here is followed by an event on the broker; the projection store and cache
//! are rebuilt from those events.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE products (
//!     id UUID PRIMARY KEY,
//!     name VARCHAR(255) NOT NULL,
//!     description TEXT NOT NULL DEFAULT '',
//!     price_cents BIGINT NOT NULL CHECK (price_cents > 0),
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```
//!
//! # Example
//!
//! ```ignore
//! use catalog_postgres::PostgresProductRepository;
//!
//! let repository = PostgresProductRepository::connect("postgres://localhost/catalog", 10).await?;
//! repository.migrate().await?;
//! ```

use catalog_core::command::{CreateProduct, UpdateProduct};
use catalog_core::product::{Price, Product, ProductId};
use catalog_core::repository::{ProductRepository, RepositoryError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::FromRow;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

const RETURNING: &str = "id, name, description, price_cents, created_at, updated_at";

/// A row of the `products` table.
#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    description: String,
    price_cents: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
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

/// PostgreSQL-backed [`ProductRepository`].
///
/// Timestamps are assigned by the database (`now()`), so `created_at` and
/// `updated_at` share one clock across writer instances.
#[derive(Clone)]
pub struct PostgresProductRepository {
    pool: PgPool,
}

impl PostgresProductRepository {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a dedicated pool.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Apply the bundled migrations.
    ///
    /// Migrations owned by other components sharing the database are ignored.
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

        tracing::info!("Product store migrations applied");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn storage_error(operation: &'static str, error: &sqlx::Error) -> RepositoryError {
    metrics::counter!("catalog_store_errors_total", "operation" => operation).increment(1);
    tracing::warn!(operation, error = %error, "Product store query failed");
    RepositoryError::Storage(format!("{operation}: {error}"))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl ProductRepository for PostgresProductRepository {
    fn create(&self, command: CreateProduct) -> BoxFuture<'_, Result<Product, RepositoryError>> {
        Box::pin(async move {
            let query = format!(
                "INSERT INTO products (id, name, description, price_cents, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, now(), now())
                 RETURNING {RETURNING}"
            );

            let row: ProductRow = sqlx::query_as(&query)
                .bind(command.id.as_uuid())
                .bind(&command.name)
                .bind(&command.description)
                .bind(command.price.cents())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        RepositoryError::Conflict(command.id)
                    } else {
                        storage_error("create", &e)
                    }
                })?;

            tracing::debug!(product_id = %command.id, "Product inserted");
            Ok(row.into())
        })
    }

    fn update(&self, command: UpdateProduct) -> BoxFuture<'_, Result<Product, RepositoryError>> {
        Box::pin(async move {
            // GREATEST keeps updated_at monotonic if the database clock steps back.
            let query = format!(
                "UPDATE products
                 SET name = $2, description = $3, price_cents = $4,
                     updated_at = GREATEST(now(), updated_at)
                 WHERE id = $1
                 RETURNING {RETURNING}"
            );

            let row: Option<ProductRow> = sqlx::query_as(&query)
                .bind(command.id.as_uuid())
                .bind(&command.name)
                .bind(&command.description)
                .bind(command.price.cents())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| storage_error("update", &e))?;

            row.map(Product::from)
                .ok_or(RepositoryError::NotFound(command.id))
        })
    }

    fn delete(&self, id: ProductId) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM products WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| storage_error("delete", &e))?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound(id));
            }
            Ok(())
        })
    }

    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Result<Product, RepositoryError>> {
        Box::pin(async move {
            let query = format!("SELECT {RETURNING} FROM products WHERE id = $1");

            let row: Option<ProductRow> = sqlx::query_as(&query)
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| storage_error("get_by_id", &e))?;

            row.map(Product::from).ok_or(RepositoryError::NotFound(id))
        })
    }
}
