//! API gateway.
//!
//! Writes are validated here and published as command messages onto the
//! command topics, keyed by product id; the writer service consumes them.
//! Reads are delegated to the reader service through a [`ReaderClient`].
//!
//! | Method   | Path                          | Result                    |
//! |----------|-------------------------------|---------------------------|
//! | `POST`   | `/api/v1/products`            | 201 `{"productId": ..}`   |
//! | `PUT`    | `/api/v1/products/{id}`       | 200                       |
//! | `DELETE` | `/api/v1/products/{id}`       | 200                       |
//! | `GET`    | `/api/v1/products/{id}`       | 200 product               |
//! | `GET`    | `/api/v1/products/search`     | 200 page of products      |

pub mod client;

use crate::dto::{
    CreateProductRequest, ProductCreatedResponse, ProductResponse, ProductsListResponse,
    SearchParams, UpdateProductRequest, parse_product_id,
};
use crate::error::AppError;
use crate::middleware::correlation_id;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use catalog_core::command::{DeleteProduct, ProductCommand};
use catalog_core::event::{CommandMessage, CommandTopics};
use catalog_core::event_bus::{EventPublisher, OutgoingMessage};
use catalog_core::product::ProductId;
use catalog_core::trace_context::inject_trace_headers;
use catalog_runtime::metrics::CommandMetrics;
use client::{ReaderClient, ReaderError};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::Span;

pub use client::{HttpReaderClient, RetryingReaderClient};

/// Shared state of the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    publisher: Arc<dyn EventPublisher>,
    topics: CommandTopics,
    reader: Arc<dyn ReaderClient>,
}

impl GatewayState {
    /// State publishing to `topics` and reading through `reader`.
    #[must_use]
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        topics: CommandTopics,
        reader: Arc<dyn ReaderClient>,
    ) -> Self {
        Self {
            publisher,
            topics,
            reader,
        }
    }

    /// Encode and publish `command` on its command topic.
    async fn send(&self, command: &ProductCommand) -> Result<(), AppError> {
        let message = CommandMessage::from(command);
        let payload = message
            .encode()
            .map_err(|e| AppError::internal("failed to encode command").with_source(e))?;
        let outgoing = OutgoingMessage::new(
            self.topics.topic(message.kind()),
            command.product_id().to_string(),
            payload,
        )
        .with_headers(inject_trace_headers(&Span::current()));

        match self.publisher.publish(outgoing).await {
            Ok(()) => {
                CommandMetrics::record(command.name(), "accepted");
                tracing::info!(
                    command = command.name(),
                    product_id = %command.product_id(),
                    "Command published"
                );
                Ok(())
            }
            Err(e) => {
                CommandMetrics::record(command.name(), "publish_failed");
                Err(AppError::unavailable("failed to queue command").with_source(e))
            }
        }
    }
}

impl From<ReaderError> for AppError {
    fn from(err: ReaderError) -> Self {
        match err {
            ReaderError::NotFound(message) => {
                Self::new(StatusCode::NOT_FOUND, message, "NOT_FOUND")
            }
            ReaderError::BadRequest(message) => Self::bad_request(message),
            other @ (ReaderError::Aborted(_)
            | ReaderError::Unavailable(_)
            | ReaderError::Decode(_)) => {
                Self::internal("reader request failed").with_source(other)
            }
        }
    }
}

/// Gateway routes, without the ops endpoints.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/v1/products", post(create_product))
        .route("/api/v1/products/search", get(search_products))
        .route(
            "/api/v1/products/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(correlation_id))
        .with_state(state)
}

#[tracing::instrument(skip_all)]
async fn create_product(
    State(state): State<GatewayState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductCreatedResponse>), AppError> {
    let id = ProductId::new();
    let command = request.into_command(id)?;
    state.send(&ProductCommand::Create(command)).await?;

    Ok((
        StatusCode::CREATED,
        Json(ProductCreatedResponse {
            product_id: id.to_string(),
        }),
    ))
}

#[tracing::instrument(skip(state, request))]
async fn update_product(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<StatusCode, AppError> {
    let command = request.into_command(parse_product_id(&id)?)?;
    state.send(&ProductCommand::Update(command)).await?;
    Ok(StatusCode::OK)
}

#[tracing::instrument(skip(state))]
async fn delete_product(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_product_id(&id)?;
    state
        .send(&ProductCommand::Delete(DeleteProduct { id }))
        .await?;
    Ok(StatusCode::OK)
}

#[tracing::instrument(skip(state))]
async fn get_product(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, AppError> {
    let id = parse_product_id(&id)?;
    Ok(Json(state.reader.get_by_id(id).await?))
}

#[tracing::instrument(skip(state))]
async fn search_products(
    State(state): State<GatewayState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ProductsListResponse>, AppError> {
    params.pagination()?;
    Ok(Json(state.reader.search(params).await?))
}
