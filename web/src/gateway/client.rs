//! Client for the reader service's query API.
//!
//! [`HttpReaderClient`] maps HTTP statuses onto [`ReaderError`].
//! [`RetryingReaderClient`] wraps any client and retries the two statuses
//! that mean "try again shortly": not found (the projection may lag the write)
//! and conflict (aborted), with a linear backoff.

use crate::dto::{ProductResponse, ProductsListResponse, SearchParams};
use catalog_core::product::ProductId;
use catalog_runtime::retry::{Backoff, RetryPolicy, retry_with_predicate};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by the reader service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    /// 404 from the reader.
    #[error("not found: {0}")]
    NotFound(String),

    /// 409 from the reader; the request was aborted and may be retried.
    #[error("aborted: {0}")]
    Aborted(String),

    /// 400 from the reader.
    #[error("rejected by reader: {0}")]
    BadRequest(String),

    /// Transport failure or any other status.
    #[error("reader unavailable: {0}")]
    Unavailable(String),

    /// The response body did not decode.
    #[error("invalid reader response: {0}")]
    Decode(String),
}

impl ReaderError {
    /// Whether the call is worth repeating.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Aborted(_))
    }
}

/// Read access to the product projection.
pub trait ReaderClient: Send + Sync {
    /// Fetch one product.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError`] mapped from the reader's response.
    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Result<ProductResponse, ReaderError>>;

    /// Search products.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError`] mapped from the reader's response.
    fn search(
        &self,
        params: SearchParams,
    ) -> BoxFuture<'_, Result<ProductsListResponse, ReaderError>>;
}

/// HTTP implementation of [`ReaderClient`].
#[derive(Clone)]
pub struct HttpReaderClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpReaderClient {
    /// Client for the reader at `base_url` (e.g. `http://reader:8081`).
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ReaderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReaderError::Unavailable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ReaderError> {
        let response = request
            .send()
            .await
            .map_err(|e| ReaderError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ReaderError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ReaderError::NotFound(body),
            StatusCode::CONFLICT => ReaderError::Aborted(body),
            StatusCode::BAD_REQUEST => ReaderError::BadRequest(body),
            other => ReaderError::Unavailable(format!("status {other}: {body}")),
        })
    }
}

impl ReaderClient for HttpReaderClient {
    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Result<ProductResponse, ReaderError>> {
        Box::pin(async move {
            let url = format!("{}/api/v1/products/{id}", self.base_url);
            self.get_json(self.http.get(url)).await
        })
    }

    fn search(
        &self,
        params: SearchParams,
    ) -> BoxFuture<'_, Result<ProductsListResponse, ReaderError>> {
        Box::pin(async move {
            let url = format!("{}/api/v1/products/search", self.base_url);
            self.get_json(self.http.get(url).query(&params)).await
        })
    }
}

/// Retries [`ReaderError::is_retryable`] failures of an inner client.
pub struct RetryingReaderClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ReaderClient> RetryingReaderClient<C> {
    /// Wrap `inner` with an explicit policy.
    #[must_use]
    pub const fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Wrap `inner` with `attempts` attempts and a linear `backoff` step.
    #[must_use]
    pub fn linear(inner: C, attempts: u32, backoff: Duration) -> Self {
        let policy = RetryPolicy::builder()
            .max_attempts(attempts)
            .delay(backoff)
            .backoff(Backoff::Linear)
            .build();
        Self::new(inner, policy)
    }
}

impl<C: ReaderClient> ReaderClient for RetryingReaderClient<C> {
    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Result<ProductResponse, ReaderError>> {
        Box::pin(retry_with_predicate(
            &self.policy,
            move || self.inner.get_by_id(id),
            ReaderError::is_retryable,
        ))
    }

    fn search(
        &self,
        params: SearchParams,
    ) -> BoxFuture<'_, Result<ProductsListResponse, ReaderError>> {
        Box::pin(retry_with_predicate(
            &self.policy,
            move || self.inner.search(params.clone()),
            ReaderError::is_retryable,
        ))
    }
}
