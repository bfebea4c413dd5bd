//! Request correlation.
//!
//! Every request gets a correlation id, taken from the `X-Correlation-ID`
//! header when it holds a UUID and generated otherwise. The id is stored in
//! the request extensions, recorded on an `http_request` span and echoed on
//! the response.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/api/v1/products/:id", get(get_product))
//!     .layer(axum::middleware::from_fn(correlation_id));
//! ```

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the correlation id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Correlation id of the current request, available as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

/// Middleware assigning a [`CorrelationId`] to each request.
pub async fn correlation_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    request.extensions_mut().insert(CorrelationId(id));

    let span = tracing::info_span!(
        "http_request",
        correlation_id = %id,
        method = %request.method(),
        uri = %request.uri(),
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use axum::{Extension, Router, routing::get};
    use axum_test::TestServer;

    fn app() -> Router {
        Router::new()
            .route(
                "/id",
                get(|Extension(CorrelationId(id)): Extension<CorrelationId>| async move {
                    id.to_string()
                }),
            )
            .layer(axum::middleware::from_fn(correlation_id))
    }

    #[tokio::test]
    async fn generates_an_id_when_missing() {
        let server = TestServer::new(app()).unwrap();

        let response = server.get("/id").await;

        let echoed = response.header(CORRELATION_ID_HEADER);
        assert_eq!(echoed.to_str().unwrap(), response.text());
        assert!(Uuid::parse_str(&response.text()).is_ok());
    }

    #[tokio::test]
    async fn keeps_a_valid_incoming_id() {
        let server = TestServer::new(app()).unwrap();
        let id = Uuid::new_v4();

        let response = server
            .get("/id")
            .add_header(
                axum::http::HeaderName::from_static(CORRELATION_ID_HEADER),
                HeaderValue::from_str(&id.to_string()).unwrap(),
            )
            .await;

        assert_eq!(response.text(), id.to_string());
    }
}
