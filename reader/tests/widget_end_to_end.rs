//! Gateway → command log → writer → event log → reader, all in process.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::http::StatusCode;
use axum_test::TestServer;
use catalog_core::event::{CommandTopics, EventTopics};
use catalog_core::product::ProductId;
use catalog_reader::{ProductProjection, ProductQueries, ProjectionRouter, QueryError};
use catalog_runtime::consumer::ConsumerPool;
use catalog_runtime::retry::RetryPolicy;
use catalog_runtime::shutdown;
use catalog_testing::helpers::eventually;
use catalog_testing::{
    InMemoryBroker, InMemoryProductCache, InMemoryProductRepository, InMemoryReadRepository,
};
use catalog_web::dto::{ProductResponse, ProductsListResponse, SearchParams};
use catalog_web::gateway::client::{ReaderClient, ReaderError};
use catalog_web::gateway::{self, GatewayState, RetryingReaderClient};
use catalog_writer::{CommandRouter, ProductCommandService};
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// Reader client calling the query resolver directly instead of over HTTP.
struct InProcessReader(Arc<ProductQueries>);

impl ReaderClient for InProcessReader {
    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Result<ProductResponse, ReaderError>> {
        Box::pin(async move {
            match self.0.get_by_id(id).await {
                Ok(product) => Ok(ProductResponse::from(&product)),
                Err(QueryError::NotFound(id)) => Err(ReaderError::NotFound(id.to_string())),
                Err(e) => Err(ReaderError::Unavailable(e.to_string())),
            }
        })
    }

    fn search(
        &self,
        params: SearchParams,
    ) -> BoxFuture<'_, Result<ProductsListResponse, ReaderError>> {
        Box::pin(async move {
            let pagination = params
                .pagination()
                .map_err(|e| ReaderError::BadRequest(e.to_string()))?;
            self.0
                .search(&params.search, pagination)
                .await
                .map(|page| ProductsListResponse::from(&page))
                .map_err(|e| ReaderError::Unavailable(e.to_string()))
        })
    }
}

fn policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(3)
        .delay(Duration::from_millis(1))
        .build()
}

#[tokio::test]
async fn widget_is_created_read_and_cached() {
    let broker = InMemoryBroker::new();
    let product_store = Arc::new(InMemoryProductRepository::new());
    let projection_store = InMemoryReadRepository::new();
    let cache = InMemoryProductCache::new();
    let (trigger, observer) = shutdown::channel();

    let service = ProductCommandService::new(
        product_store.clone(),
        Arc::new(broker.clone()),
        EventTopics::default(),
    );
    let writer = ConsumerPool::new(
        "writer",
        Arc::new(broker.consumer_group("catalog-writer", CommandTopics::default().all(), 2)),
        Arc::new(CommandRouter::new(service, CommandTopics::default(), policy())),
    )
    .with_pool_size(2);
    let writer = tokio::spawn(writer.run(observer.clone()));

    let projection = ProductProjection::new(
        Arc::new(projection_store.clone()),
        Arc::new(cache.clone()),
    );
    let reader = ConsumerPool::new(
        "reader",
        Arc::new(broker.consumer_group("catalog-reader", EventTopics::default().all(), 2)),
        Arc::new(ProjectionRouter::new(projection, EventTopics::default(), policy())),
    )
    .with_pool_size(2);
    let reader = tokio::spawn(reader.run(observer));

    let queries = Arc::new(ProductQueries::new(
        Arc::new(projection_store.clone()),
        Arc::new(cache.clone()),
    ));
    let client = RetryingReaderClient::linear(
        InProcessReader(queries),
        3,
        Duration::from_millis(100),
    );
    let state = GatewayState::new(
        Arc::new(broker.clone()),
        CommandTopics::default(),
        Arc::new(client),
    );
    let server = TestServer::new(gateway::router(state)).unwrap();

    let created = server
        .post("/api/v1/products")
        .json(&json!({ "name": "Widget", "description": "A widget", "price": 9.99 }))
        .await;
    assert_eq!(created.status_code(), StatusCode::CREATED);
    let id = created.json::<Value>()["productId"]
        .as_str()
        .unwrap()
        .to_string();
    let product_id: ProductId = id.parse().unwrap();

    assert!(eventually(WAIT, || cache.snapshot(product_id).is_some()).await);
    assert!(product_store.snapshot(product_id).is_some());

    let first = server.get(&format!("/api/v1/products/{id}")).await;
    first.assert_status_ok();
    let body: Value = first.json();
    assert_eq!(body["name"], "Widget");
    assert_eq!(body["price"], 9.99);
    let reads_after_first = projection_store.reads();

    let second = server.get(&format!("/api/v1/products/{id}")).await;
    second.assert_status_ok();
    assert_eq!(second.json::<Value>(), body);
    assert_eq!(projection_store.reads(), reads_after_first);
    assert!(cache.hits() >= 2);

    let search = server
        .get("/api/v1/products/search")
        .add_query_param("search", "widg")
        .await;
    search.assert_status_ok();
    assert_eq!(search.json::<Value>()["totalCount"], 1);

    let deleted = server.delete(&format!("/api/v1/products/{id}")).await;
    deleted.assert_status_ok();
    assert!(eventually(WAIT, || projection_store.snapshot(product_id).is_none()).await);
    assert!(cache.snapshot(product_id).is_none());

    trigger.trigger();
    tokio::time::timeout(WAIT, writer).await.unwrap().unwrap().unwrap();
    tokio::time::timeout(WAIT, reader).await.unwrap().unwrap().unwrap();
}
