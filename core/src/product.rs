//! Canonical product model.
//!
//! [`Product`] is the single entity of the catalog. The transactional store owns
//! the canonical copy; the projection store and cache hold derived copies that
//! are always overwritten wholesale from event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of a product.
///
/// Also used as the partition key of every event about the product, which is
/// what gives per-entity ordering on the event log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(Uuid);

impl ProductId {
    /// Generate a new random product id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Whether this is the nil UUID (never a valid product id).
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for ProductId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ProductId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for ProductId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Fixed-point price in minor units (cents).
///
/// Stored and transported as an integer so that a round trip through any store
/// never loses precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(i64);

impl Price {
    /// Create a price from cents.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Create a price from a decimal amount (e.g. `9.99`), rounded to the cent.
    ///
    /// Returns `None` for non-finite amounts or amounts that overflow.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // range checked before the cast
    pub fn from_decimal(amount: f64) -> Option<Self> {
        let cents = (amount * 100.0).round();
        if !cents.is_finite() || cents.abs() >= 9.0e15 {
            return None;
        }
        Some(Self(cents as i64))
    }

    /// Value in cents.
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Value as a decimal amount, for display and JSON boundaries.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // cents fit comfortably in an f64 mantissa
    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Whether the price is strictly positive.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// A catalog product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Unit price
    pub price: Price,
    /// When the product was first committed
    pub created_at: DateTime<Utc>,
    /// When the product was last committed
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Whether `self` carries state at least as recent as `other`.
    ///
    /// Used by the projection to apply terminal-state events only when they
    /// do not move the record backwards in time.
    #[must_use]
    pub fn is_not_older_than(&self, other: &Self) -> bool {
        self.updated_at >= other.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_from_decimal_rounds_to_cents() {
        assert_eq!(Price::from_decimal(9.99), Some(Price::from_cents(999)));
        assert_eq!(Price::from_decimal(0.005), Some(Price::from_cents(1)));
        assert_eq!(Price::from_decimal(f64::NAN), None);
        assert_eq!(Price::from_decimal(f64::INFINITY), None);
    }

    #[test]
    fn price_display_uses_two_decimals() {
        assert_eq!(Price::from_cents(999).to_string(), "9.99");
        assert_eq!(Price::from_cents(5).to_string(), "0.05");
        assert_eq!(Price::from_cents(-150).to_string(), "-1.50");
    }

    #[test]
    fn product_id_parses_and_displays() {
        let id = ProductId::new();
        let parsed: ProductId = id.to_string().parse().unwrap_or_default();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<ProductId>().is_err());
    }
}
