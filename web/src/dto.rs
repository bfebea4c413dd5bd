//! JSON shapes of the product HTTP API.
//!
//! Prices cross the HTTP boundary as decimal amounts (`9.99`) and are held as
//! integer cents everywhere else.

use catalog_core::command::{CreateProduct, UpdateProduct, Validate, ValidationError};
use catalog_core::product::{Price, Product, ProductId};
use catalog_core::repository::{Pagination, ProductsList};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A product as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub product_id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Product> for ProductResponse {
    fn from(product: &Product) -> Self {
        Self {
            product_id: product.id.to_string(),
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price.as_decimal(),
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductsListResponse {
    pub total_count: u64,
    pub total_pages: u64,
    pub page: u32,
    pub size: u32,
    pub has_more: bool,
    pub products: Vec<ProductResponse>,
}

impl From<&ProductsList> for ProductsListResponse {
    fn from(list: &ProductsList) -> Self {
        Self {
            total_count: list.total_count,
            total_pages: list.total_pages,
            page: list.page,
            size: list.size,
            has_more: list.has_more,
            products: list.products.iter().map(ProductResponse::from).collect(),
        }
    }
}

/// Body of `POST /api/v1/products`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
}

impl CreateProductRequest {
    /// Validated create command for a freshly assigned `id`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn into_command(self, id: ProductId) -> Result<CreateProduct, ValidationError> {
        let command = CreateProduct {
            id,
            name: self.name,
            description: self.description,
            price: Price::from_decimal(self.price).ok_or(ValidationError::InvalidPrice)?,
        };
        command.validate()?;
        Ok(command)
    }
}

/// Body of `PUT /api/v1/products/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
}

impl UpdateProductRequest {
    /// Validated update command for `id`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn into_command(self, id: ProductId) -> Result<UpdateProduct, ValidationError> {
        let command = UpdateProduct {
            id,
            name: self.name,
            description: self.description,
            price: Price::from_decimal(self.price).ok_or(ValidationError::InvalidPrice)?,
        };
        command.validate()?;
        Ok(command)
    }
}

/// Response of a successful create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreatedResponse {
    pub product_id: String,
}

/// Query string of the search endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub search: String,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl SearchParams {
    /// Pagination with defaults applied.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPagination`] for a zero page or an
    /// out-of-range size.
    pub fn pagination(&self) -> Result<Pagination, ValidationError> {
        Pagination::from_query(self.page, self.size)
    }
}

/// Parse a product id from a path segment.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidId`] if the segment is not a UUID, or
/// [`ValidationError::NilId`] for the nil UUID.
pub fn parse_product_id(raw: &str) -> Result<ProductId, ValidationError> {
    let id: ProductId = raw
        .parse()
        .map_err(|_| ValidationError::InvalidId(raw.to_string()))?;
    if id.is_nil() {
        return Err(ValidationError::NilId);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn create_request_converts_price_to_cents() {
        let request = CreateProductRequest {
            name: "Widget".to_string(),
            description: String::new(),
            price: 9.99,
        };

        let command = request.into_command(ProductId::new()).unwrap();

        assert_eq!(command.price.cents(), 999);
    }

    #[test]
    fn create_request_rejects_bad_fields() {
        let empty_name = CreateProductRequest {
            name: "  ".to_string(),
            description: String::new(),
            price: 1.0,
        };
        assert!(empty_name.into_command(ProductId::new()).is_err());

        let free = CreateProductRequest {
            name: "Widget".to_string(),
            description: String::new(),
            price: 0.0,
        };
        assert!(matches!(
            free.into_command(ProductId::new()),
            Err(ValidationError::NonPositivePrice(_))
        ));

        let nan = CreateProductRequest {
            name: "Widget".to_string(),
            description: String::new(),
            price: f64::NAN,
        };
        assert_eq!(
            nan.into_command(ProductId::new()),
            Err(ValidationError::InvalidPrice)
        );
    }

    #[test]
    fn product_ids_are_parsed_strictly() {
        assert!(parse_product_id("not-a-uuid").is_err());
        assert_eq!(
            parse_product_id("00000000-0000-0000-0000-000000000000"),
            Err(ValidationError::NilId)
        );
        let id = ProductId::new();
        assert_eq!(parse_product_id(&id.to_string()), Ok(id));
    }

    #[test]
    fn response_uses_camel_case_and_decimal_price() {
        let product = catalog_testing::fixtures::product("Widget", 999);
        let json = serde_json::to_value(ProductResponse::from(&product)).unwrap();

        assert_eq!(json["productId"], product.id.to_string());
        assert_eq!(json["price"], 9.99);
        assert!(json.get("createdAt").is_some());
    }
}
