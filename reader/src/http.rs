//! Query API of the reader service.
//!
//! - `GET /api/v1/products/{id}`
//! - `GET /api/v1/products/search?search=&page=&size=`

use crate::queries::{ProductQueries, QueryError};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use catalog_web::dto::{ProductResponse, ProductsListResponse, SearchParams, parse_product_id};
use catalog_web::{AppError, WebResult, correlation_id};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NotFound(id) => Self::not_found("product", id),
            QueryError::Invalid(e) => e.into(),
            QueryError::Store(e) => Self::internal("failed to read products").with_source(e),
        }
    }
}

/// Query routes, without the ops endpoints.
pub fn router(queries: Arc<ProductQueries>) -> Router {
    Router::new()
        .route("/api/v1/products/search", get(search_products))
        .route("/api/v1/products/:id", get(get_product))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(correlation_id))
        .with_state(queries)
}

#[tracing::instrument(skip(queries))]
async fn get_product(
    State(queries): State<Arc<ProductQueries>>,
    Path(id): Path<String>,
) -> WebResult<Json<ProductResponse>> {
    let id = parse_product_id(&id)?;
    let product = queries.get_by_id(id).await?;
    Ok(Json(ProductResponse::from(&product)))
}

#[tracing::instrument(skip(queries))]
async fn search_products(
    State(queries): State<Arc<ProductQueries>>,
    Query(params): Query<SearchParams>,
) -> WebResult<Json<ProductsListResponse>> {
    let pagination = params.pagination()?;
    let page = queries.search(&params.search, pagination).await?;
    Ok(Json(ProductsListResponse::from(&page)))
}
