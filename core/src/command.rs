//! Commands and their structural validation.
//!
//! Commands are transient input values. They are validated before they reach a
//! handler on the write side, and the consumer side re-runs the same
//! validation after reconstructing a command from an event payload.

use crate::product::{Price, Product, ProductId};
use thiserror::Error;

/// Maximum length of a product name, in characters.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of a product description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 5000;

/// Structural validation failure.
///
/// Never retried. On the write side the command fails outright; on the
/// consume side the message is classified as poison.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The product id is the nil UUID.
    #[error("product id must not be nil")]
    NilId,

    /// The product id could not be parsed.
    #[error("invalid product id '{0}'")]
    InvalidId(String),

    /// The name is empty or whitespace.
    #[error("name must not be empty")]
    EmptyName,

    /// The name is too long.
    #[error("name must be at most {max} characters")]
    NameTooLong {
        /// Limit that was exceeded
        max: usize,
    },

    /// The description is too long.
    #[error("description must be at most {max} characters")]
    DescriptionTooLong {
        /// Limit that was exceeded
        max: usize,
    },

    /// The price is zero or negative.
    #[error("price must be greater than zero, got {0}")]
    NonPositivePrice(Price),

    /// The price could not be represented.
    #[error("price is not a valid amount")]
    InvalidPrice,

    /// `updated_at` precedes `created_at`.
    #[error("updated_at must not precede created_at")]
    TimestampsOutOfOrder,

    /// Page or size out of range.
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),
}

/// Structural validation of an input value.
pub trait Validate {
    /// Check the value, returning the first violated rule.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] describing the first rule that failed.
    fn validate(&self) -> Result<(), ValidationError>;
}

fn validate_fields(
    id: ProductId,
    name: &str,
    description: &str,
    price: Price,
) -> Result<(), ValidationError> {
    if id.is_nil() {
        return Err(ValidationError::NilId);
    }
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong { max: MAX_NAME_LEN });
    }
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::DescriptionTooLong {
            max: MAX_DESCRIPTION_LEN,
        });
    }
    if !price.is_positive() {
        return Err(ValidationError::NonPositivePrice(price));
    }
    Ok(())
}

/// Create a new product.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateProduct {
    /// Id chosen by the caller
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Unit price
    pub price: Price,
}

impl Validate for CreateProduct {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(self.id, &self.name, &self.description, self.price)
    }
}

/// Replace the mutable fields of an existing product.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateProduct {
    /// Product to update
    pub id: ProductId,
    /// New name
    pub name: String,
    /// New description
    pub description: String,
    /// New price
    pub price: Price,
}

impl Validate for UpdateProduct {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(self.id, &self.name, &self.description, self.price)
    }
}

/// Delete a product.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeleteProduct {
    /// Product to delete
    pub id: ProductId,
}

impl Validate for DeleteProduct {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_nil() {
            return Err(ValidationError::NilId);
        }
        Ok(())
    }
}

/// Any write-side command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProductCommand {
    /// See [`CreateProduct`]
    Create(CreateProduct),
    /// See [`UpdateProduct`]
    Update(UpdateProduct),
    /// See [`DeleteProduct`]
    Delete(DeleteProduct),
}

impl ProductCommand {
    /// Id of the product the command targets.
    #[must_use]
    pub const fn product_id(&self) -> ProductId {
        match self {
            Self::Create(c) => c.id,
            Self::Update(c) => c.id,
            Self::Delete(c) => c.id,
        }
    }

    /// Short name used in logs and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
        }
    }
}

impl Validate for ProductCommand {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Create(c) => c.validate(),
            Self::Update(c) => c.validate(),
            Self::Delete(c) => c.validate(),
        }
    }
}

/// Command applied to the read side, reconstructed from an event.
///
/// Create and Update carry the full terminal state of the product, Delete the
/// identity only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProjectionCommand {
    /// Upsert a newly created product
    Create(Product),
    /// Overwrite a product with its new terminal state
    Update(Product),
    /// Remove a product
    Delete(ProductId),
}

impl ProjectionCommand {
    /// Id of the product the command targets.
    #[must_use]
    pub const fn product_id(&self) -> ProductId {
        match self {
            Self::Create(p) | Self::Update(p) => p.id,
            Self::Delete(id) => *id,
        }
    }
}

impl Validate for Product {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(self.id, &self.name, &self.description, self.price)?;
        if self.updated_at < self.created_at {
            return Err(ValidationError::TimestampsOutOfOrder);
        }
        Ok(())
    }
}

impl Validate for ProjectionCommand {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Create(product) | Self::Update(product) => product.validate(),
            Self::Delete(id) => DeleteProduct { id: *id }.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn create(name: &str, cents: i64) -> CreateProduct {
        CreateProduct {
            id: ProductId::new(),
            name: name.to_string(),
            description: "A thing".to_string(),
            price: Price::from_cents(cents),
        }
    }

    #[test]
    fn valid_create_passes() {
        assert_eq!(create("Widget", 999).validate(), Ok(()));
    }

    #[test]
    fn blank_name_is_rejected() {
        assert_eq!(create("   ", 999).validate(), Err(ValidationError::EmptyName));
    }

    #[test]
    fn long_name_is_rejected() {
        let name = "x".repeat(MAX_NAME_LEN + 1);
        assert_eq!(
            create(&name, 999).validate(),
            Err(ValidationError::NameTooLong { max: MAX_NAME_LEN })
        );
    }

    #[test]
    fn non_positive_price_is_rejected() {
        assert!(matches!(
            create("Widget", 0).validate(),
            Err(ValidationError::NonPositivePrice(_))
        ));
    }

    #[test]
    fn nil_id_is_rejected_for_every_command() {
        let nil = ProductId::from_uuid(Uuid::nil());
        let delete = ProductCommand::Delete(DeleteProduct { id: nil });
        assert_eq!(delete.validate(), Err(ValidationError::NilId));

        let mut update = create("Widget", 100);
        update.id = nil;
        assert_eq!(update.validate(), Err(ValidationError::NilId));
    }

    #[test]
    fn projected_product_requires_ordered_timestamps() {
        let now = Utc::now();
        let product = Product {
            id: ProductId::new(),
            name: "Widget".to_string(),
            description: String::new(),
            price: Price::from_cents(999),
            created_at: now,
            updated_at: now - Duration::seconds(1),
        };
        assert_eq!(
            ProjectionCommand::Create(product).validate(),
            Err(ValidationError::TimestampsOutOfOrder)
        );
    }
}
