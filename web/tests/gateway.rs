//! Gateway routes against the in-memory broker and a fake reader.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::http::StatusCode;
use axum_test::TestServer;
use catalog_core::event::{CommandKind, CommandMessage, CommandTopics};
use catalog_core::product::ProductId;
use catalog_testing::InMemoryBroker;
use catalog_testing::fixtures::product;
use catalog_web::CORRELATION_ID_HEADER;
use catalog_web::dto::{ProductResponse, ProductsListResponse, SearchParams};
use catalog_web::gateway::client::{ReaderClient, ReaderError};
use catalog_web::gateway::{self, GatewayState};
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

/// Reader returning one known product and recording search requests.
#[derive(Default)]
struct FakeReader {
    known: Mutex<Option<ProductResponse>>,
    failing: Mutex<bool>,
    searches: Mutex<Vec<SearchParams>>,
}

impl ReaderClient for FakeReader {
    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Result<ProductResponse, ReaderError>> {
        Box::pin(async move {
            if *self.failing.lock().unwrap() {
                return Err(ReaderError::Unavailable("reader down".to_string()));
            }
            self.known
                .lock()
                .unwrap()
                .clone()
                .filter(|p| p.product_id == id.to_string())
                .ok_or_else(|| ReaderError::NotFound(format!("product {id}")))
        })
    }

    fn search(
        &self,
        params: SearchParams,
    ) -> BoxFuture<'_, Result<ProductsListResponse, ReaderError>> {
        Box::pin(async move {
            self.searches.lock().unwrap().push(params);
            Ok(ProductsListResponse {
                total_count: 0,
                total_pages: 0,
                page: 1,
                size: 10,
                has_more: false,
                products: Vec::new(),
            })
        })
    }
}

struct Gateway {
    server: TestServer,
    broker: InMemoryBroker,
    reader: Arc<FakeReader>,
}

fn setup() -> Gateway {
    let broker = InMemoryBroker::new();
    let reader = Arc::new(FakeReader::default());
    let state = GatewayState::new(
        Arc::new(broker.clone()),
        CommandTopics::default(),
        reader.clone(),
    );
    Gateway {
        server: TestServer::new(gateway::router(state)).unwrap(),
        broker,
        reader,
    }
}

#[tokio::test]
async fn create_publishes_a_command_keyed_by_the_new_id() {
    let g = setup();

    let response = g
        .server
        .post("/api/v1/products")
        .json(&json!({ "name": "Widget", "description": "A widget", "price": 9.99 }))
        .await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    let id = response.json::<Value>()["productId"]
        .as_str()
        .unwrap()
        .to_string();
    let published = g.broker.published(&CommandTopics::default().create);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key.as_deref(), Some(id.as_str()));
    let CommandMessage::Create(body) =
        CommandMessage::decode(CommandKind::Create, &published[0].payload).unwrap()
    else {
        panic!("expected a create command");
    };
    assert_eq!(body.product_id, id);
    assert_eq!(body.price_cents, 999);
}

#[tokio::test]
async fn invalid_input_is_rejected_without_publishing() {
    let g = setup();

    let blank = g
        .server
        .post("/api/v1/products")
        .json(&json!({ "name": " ", "price": 9.99 }))
        .await;
    let negative = g
        .server
        .put(&format!("/api/v1/products/{}", ProductId::new()))
        .json(&json!({ "name": "Widget", "price": -1.0 }))
        .await;
    let bad_id = g.server.delete("/api/v1/products/not-a-uuid").await;

    assert_eq!(blank.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(negative.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(bad_id.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(g.broker.total_published(), 0);
}

#[tokio::test]
async fn update_and_delete_go_to_their_topics() {
    let g = setup();
    let id = ProductId::new();
    let topics = CommandTopics::default();

    let updated = g
        .server
        .put(&format!("/api/v1/products/{id}"))
        .json(&json!({ "name": "Widget", "price": 12.5 }))
        .await;
    let deleted = g.server.delete(&format!("/api/v1/products/{id}")).await;

    updated.assert_status_ok();
    deleted.assert_status_ok();
    assert_eq!(g.broker.published(&topics.update).len(), 1);
    let delete = &g.broker.published(&topics.delete)[0];
    assert_eq!(delete.key.as_deref(), Some(id.to_string().as_str()));
}

#[tokio::test]
async fn publish_failure_is_service_unavailable() {
    let g = setup();
    g.broker.set_publish_failing(true);

    let response = g
        .server
        .post("/api/v1/products")
        .json(&json!({ "name": "Widget", "price": 9.99 }))
        .await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn reads_are_delegated_to_the_reader() {
    let g = setup();
    let known = ProductResponse::from(&product("Widget", 999));
    *g.reader.known.lock().unwrap() = Some(known.clone());

    let found = g
        .server
        .get(&format!("/api/v1/products/{}", known.product_id))
        .await;
    let missing = g
        .server
        .get(&format!("/api/v1/products/{}", ProductId::new()))
        .await;

    found.assert_status_ok();
    assert_eq!(found.json::<ProductResponse>(), known);
    assert!(found.headers().contains_key(CORRELATION_ID_HEADER));
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

    *g.reader.failing.lock().unwrap() = true;
    let failing = g
        .server
        .get(&format!("/api/v1/products/{}", known.product_id))
        .await;
    assert_eq!(failing.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn search_validates_pagination_before_calling_the_reader() {
    let g = setup();

    let ok = g
        .server
        .get("/api/v1/products/search")
        .add_query_param("search", "widget")
        .add_query_param("page", 2)
        .await;
    let bad = g
        .server
        .get("/api/v1/products/search")
        .add_query_param("size", 1000)
        .await;

    ok.assert_status_ok();
    assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);
    let searches = g.reader.searches.lock().unwrap();
    assert_eq!(searches.len(), 1);
    assert_eq!(searches[0].search, "widget");
    assert_eq!(searches[0].page, Some(2));
}
