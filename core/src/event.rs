//! Wire messages exchanged over the event log.
//!
//! Two families of messages travel on the log:
//!
//! - **command messages** (`ProductCreate`, `ProductUpdate`, `ProductDelete`),
//!   published by the gateway and consumed by the writer;
//! - **events** (`ProductCreated`, `ProductUpdated`, `ProductDeleted`),
//!   published by the writer after a durable commit and consumed by the reader.
//!
//! Payloads are JSON-encoded serde structs wrapped in a versioned
//! [`Envelope`]. Fields are matched by name, not position, so the format is
//! compatible in both directions:
//!
//! - a reader ignores fields it does not know (payloads from newer writers);
//! - fields added later are `Option` or `#[serde(default)]`, so payloads from
//!   older writers still decode.
//!
//! The envelope version is informational above [`MIN_WIRE_VERSION`]; a newer
//! version is decoded with the fields this build knows. Ids travel as strings,
//! so a malformed id is detected when the consumer reconstructs a domain
//! value, not while decoding bytes.
//!
//! Topic names are configuration, so routing goes through [`EventTopics`] and
//! [`CommandTopics`], which map a topic name to a closed [`EventKind`] /
//! [`CommandKind`] that callers match exhaustively.

use crate::command::{
    CreateProduct, DeleteProduct, ProductCommand, ProjectionCommand, UpdateProduct,
    ValidationError,
};
use crate::product::{Price, Product, ProductId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Current envelope version written by this build.
pub const WIRE_VERSION: u16 = 1;

/// Oldest envelope version this build can read.
pub const MIN_WIRE_VERSION: u16 = 1;

/// Failure to turn a message payload into a typed value.
///
/// Always terminal for the message: a decode error is poison.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are not a valid envelope or body.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The envelope predates the oldest schema this build reads.
    #[error("unsupported payload version {found} (oldest readable is {minimum})")]
    UnsupportedVersion {
        /// Version found on the wire
        found: u16,
        /// Oldest version this build reads
        minimum: u16,
    },

    /// The topic is not one this consumer routes.
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
}

/// Failure to serialize an outgoing message.
#[derive(Error, Debug, Clone)]
#[error("failed to encode payload: {0}")]
pub struct EncodeError(pub String);

/// Versioned wrapper around every payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Envelope<T> {
    /// Schema version of `body`
    pub version: u16,
    /// The message itself
    pub body: T,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    version: u16,
}

/// Encode a message body into an envelope at [`WIRE_VERSION`].
///
/// # Errors
///
/// Returns [`EncodeError`] if `serde_json` rejects the value.
pub fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, EncodeError> {
    let envelope = Envelope {
        version: WIRE_VERSION,
        body,
    };
    serde_json::to_vec(&envelope).map_err(|e| EncodeError(e.to_string()))
}

/// Decode an envelope written at [`MIN_WIRE_VERSION`] or later.
///
/// Unknown fields are ignored and missing optional fields take their default.
///
/// # Errors
///
/// Returns [`DecodeError::UnsupportedVersion`] for a version older than
/// [`MIN_WIRE_VERSION`] and [`DecodeError::Malformed`] if the bytes are not an
/// envelope or lack a required field.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    let header: EnvelopeHeader =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if header.version < MIN_WIRE_VERSION {
        return Err(DecodeError::UnsupportedVersion {
            found: header.version,
            minimum: MIN_WIRE_VERSION,
        });
    }
    if header.version > WIRE_VERSION {
        tracing::debug!(
            version = header.version,
            "Decoding payload from a newer schema, unknown fields ignored"
        );
    }
    let envelope: Envelope<T> =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    Ok(envelope.body)
}

fn parse_id(raw: &str) -> Result<ProductId, ValidationError> {
    raw.parse()
        .map_err(|_| ValidationError::InvalidId(raw.to_string()))
}

// ---------------------------------------------------------------------------
// Command messages
// ---------------------------------------------------------------------------

/// Request to create a product.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProductCreate {
    /// Product id (UUID string)
    pub product_id: String,
    /// Name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Price in cents
    pub price_cents: i64,
}

/// Request to update a product.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProductUpdate {
    /// Product id (UUID string)
    pub product_id: String,
    /// Name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Price in cents
    pub price_cents: i64,
}

/// Request to delete a product.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProductDelete {
    /// Product id (UUID string)
    pub product_id: String,
}

impl From<&ProductCommand> for CommandMessage {
    fn from(command: &ProductCommand) -> Self {
        match command {
            ProductCommand::Create(c) => Self::Create(ProductCreate {
                product_id: c.id.to_string(),
                name: c.name.clone(),
                description: c.description.clone(),
                price_cents: c.price.cents(),
            }),
            ProductCommand::Update(c) => Self::Update(ProductUpdate {
                product_id: c.id.to_string(),
                name: c.name.clone(),
                description: c.description.clone(),
                price_cents: c.price.cents(),
            }),
            ProductCommand::Delete(c) => Self::Delete(ProductDelete {
                product_id: c.id.to_string(),
            }),
        }
    }
}

/// Decoded command message, tagged by the topic it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandMessage {
    /// From the create topic
    Create(ProductCreate),
    /// From the update topic
    Update(ProductUpdate),
    /// From the delete topic
    Delete(ProductDelete),
}

impl CommandMessage {
    /// Decode a payload according to the topic kind it arrived on.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload does not decode.
    pub fn decode(kind: CommandKind, payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(match kind {
            CommandKind::Create => Self::Create(decode(payload)?),
            CommandKind::Update => Self::Update(decode(payload)?),
            CommandKind::Delete => Self::Delete(decode(payload)?),
        })
    }

    /// Encode the body of this message.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            Self::Create(m) => encode(m),
            Self::Update(m) => encode(m),
            Self::Delete(m) => encode(m),
        }
    }

    /// Topic kind this message belongs on.
    #[must_use]
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Create(_) => CommandKind::Create,
            Self::Update(_) => CommandKind::Update,
            Self::Delete(_) => CommandKind::Delete,
        }
    }

    /// Rebuild the domain command. The result still has to be validated.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidId`] if the id is not a UUID.
    pub fn into_command(self) -> Result<ProductCommand, ValidationError> {
        Ok(match self {
            Self::Create(m) => ProductCommand::Create(CreateProduct {
                id: parse_id(&m.product_id)?,
                name: m.name,
                description: m.description,
                price: Price::from_cents(m.price_cents),
            }),
            Self::Update(m) => ProductCommand::Update(UpdateProduct {
                id: parse_id(&m.product_id)?,
                name: m.name,
                description: m.description,
                price: Price::from_cents(m.price_cents),
            }),
            Self::Delete(m) => ProductCommand::Delete(DeleteProduct {
                id: parse_id(&m.product_id)?,
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Product state as carried by Created/Updated events.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    /// Product id (UUID string)
    pub product_id: String,
    /// Name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Price in cents
    pub price_cents: i64,
    /// First commit time
    pub created_at: DateTime<Utc>,
    /// Last commit time
    pub updated_at: DateTime<Utc>,
}

impl From<&Product> for ProductRecord {
    fn from(product: &Product) -> Self {
        Self {
            product_id: product.id.to_string(),
            name: product.name.clone(),
            description: product.description.clone(),
            price_cents: product.price.cents(),
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

impl TryFrom<ProductRecord> for Product {
    type Error = ValidationError;

    fn try_from(record: ProductRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_id(&record.product_id)?,
            name: record.name,
            description: record.description,
            price: Price::from_cents(record.price_cents),
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// A product was created.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProductCreated {
    /// State after creation
    pub product: ProductRecord,
}

/// A product was updated.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProductUpdated {
    /// State after the update
    pub product: ProductRecord,
}

/// A product was deleted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProductDeleted {
    /// Product id (UUID string)
    pub product_id: String,
}

/// Decoded event, tagged by the topic it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductEvent {
    /// From the created topic
    Created(ProductCreated),
    /// From the updated topic
    Updated(ProductUpdated),
    /// From the deleted topic
    Deleted(ProductDeleted),
}

impl ProductEvent {
    /// Event for a freshly created product.
    #[must_use]
    pub fn created(product: &Product) -> Self {
        Self::Created(ProductCreated {
            product: product.into(),
        })
    }

    /// Event for an updated product.
    #[must_use]
    pub fn updated(product: &Product) -> Self {
        Self::Updated(ProductUpdated {
            product: product.into(),
        })
    }

    /// Event for a deleted product.
    #[must_use]
    pub fn deleted(id: ProductId) -> Self {
        Self::Deleted(ProductDeleted {
            product_id: id.to_string(),
        })
    }

    /// Decode a payload according to the topic kind it arrived on.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload does not decode.
    pub fn decode(kind: EventKind, payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(match kind {
            EventKind::Created => Self::Created(decode(payload)?),
            EventKind::Updated => Self::Updated(decode(payload)?),
            EventKind::Deleted => Self::Deleted(decode(payload)?),
        })
    }

    /// Encode the body of this event.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            Self::Created(e) => encode(e),
            Self::Updated(e) => encode(e),
            Self::Deleted(e) => encode(e),
        }
    }

    /// Topic kind this event belongs on.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Created(_) => EventKind::Created,
            Self::Updated(_) => EventKind::Updated,
            Self::Deleted(_) => EventKind::Deleted,
        }
    }

    /// Partition key: the entity id as carried on the wire.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Created(e) => &e.product.product_id,
            Self::Updated(e) => &e.product.product_id,
            Self::Deleted(e) => &e.product_id,
        }
    }

    /// Rebuild the read-side command. The result still has to be validated.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidId`] if the id is not a UUID.
    pub fn into_projection_command(self) -> Result<ProjectionCommand, ValidationError> {
        Ok(match self {
            Self::Created(e) => ProjectionCommand::Create(e.product.try_into()?),
            Self::Updated(e) => ProjectionCommand::Update(e.product.try_into()?),
            Self::Deleted(e) => ProjectionCommand::Delete(parse_id(&e.product_id)?),
        })
    }
}

// ---------------------------------------------------------------------------
// Topic routing
// ---------------------------------------------------------------------------

/// Closed set of event topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Product created
    Created,
    /// Product updated
    Updated,
    /// Product deleted
    Deleted,
}

impl EventKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

/// Closed set of command topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Create a product
    Create,
    /// Update a product
    Update,
    /// Delete a product
    Delete,
}

impl CommandKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Configured names of the event topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventTopics {
    /// Topic for [`EventKind::Created`]
    pub created: String,
    /// Topic for [`EventKind::Updated`]
    pub updated: String,
    /// Topic for [`EventKind::Deleted`]
    pub deleted: String,
}

impl Default for EventTopics {
    fn default() -> Self {
        Self {
            created: "product_created".to_string(),
            updated: "product_updated".to_string(),
            deleted: "product_deleted".to_string(),
        }
    }
}

impl EventTopics {
    /// Resolve a topic name.
    #[must_use]
    pub fn kind_of(&self, topic: &str) -> Option<EventKind> {
        if topic == self.created {
            Some(EventKind::Created)
        } else if topic == self.updated {
            Some(EventKind::Updated)
        } else if topic == self.deleted {
            Some(EventKind::Deleted)
        } else {
            None
        }
    }

    /// Topic name for a kind.
    #[must_use]
    pub fn topic(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::Created => &self.created,
            EventKind::Updated => &self.updated,
            EventKind::Deleted => &self.deleted,
        }
    }

    /// All topic names, for subscribing.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        vec![
            self.created.clone(),
            self.updated.clone(),
            self.deleted.clone(),
        ]
    }
}

/// Configured names of the command topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTopics {
    /// Topic for [`CommandKind::Create`]
    pub create: String,
    /// Topic for [`CommandKind::Update`]
    pub update: String,
    /// Topic for [`CommandKind::Delete`]
    pub delete: String,
}

impl Default for CommandTopics {
    fn default() -> Self {
        Self {
            create: "product_create".to_string(),
            update: "product_update".to_string(),
            delete: "product_delete".to_string(),
        }
    }
}

impl CommandTopics {
    /// Resolve a topic name.
    #[must_use]
    pub fn kind_of(&self, topic: &str) -> Option<CommandKind> {
        if topic == self.create {
            Some(CommandKind::Create)
        } else if topic == self.update {
            Some(CommandKind::Update)
        } else if topic == self.delete {
            Some(CommandKind::Delete)
        } else {
            None
        }
    }

    /// Topic name for a kind.
    #[must_use]
    pub fn topic(&self, kind: CommandKind) -> &str {
        match kind {
            CommandKind::Create => &self.create,
            CommandKind::Update => &self.update,
            CommandKind::Delete => &self.delete,
        }
    }

    /// All topic names, for subscribing.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        vec![
            self.create.clone(),
            self.update.clone(),
            self.delete.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn widget() -> Product {
        let now = Utc::now();
        Product {
            id: ProductId::new(),
            name: "Widget".to_string(),
            description: "A widget".to_string(),
            price: Price::from_cents(999),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn event_survives_the_wire() {
        let product = widget();
        let event = ProductEvent::updated(&product);
        let bytes = event.encode().unwrap();

        let decoded = ProductEvent::decode(EventKind::Updated, &bytes).unwrap();
        assert_eq!(decoded.key(), product.id.to_string());
        assert_eq!(
            decoded.into_projection_command().unwrap(),
            ProjectionCommand::Update(product)
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let result = ProductEvent::decode(EventKind::Created, b"\x01");
        assert!(matches!(result, Err(DecodeError::Malformed(_))));
    }

    /// `ProductDeleted` as a later schema might define it.
    #[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
    struct ProductDeletedWithReason {
        product_id: String,
        #[serde(default)]
        reason: Option<String>,
    }

    #[test]
    fn newer_schema_reads_older_payloads() {
        let id = ProductId::new();
        let bytes = ProductEvent::deleted(id).encode().unwrap();

        let decoded: ProductDeletedWithReason = decode(&bytes).unwrap();
        assert_eq!(
            decoded,
            ProductDeletedWithReason {
                product_id: id.to_string(),
                reason: None,
            }
        );
    }

    #[test]
    fn older_schema_reads_newer_payloads() {
        let id = ProductId::new();
        let body = ProductDeletedWithReason {
            product_id: id.to_string(),
            reason: Some("discontinued".to_string()),
        };
        let bytes = serde_json::to_vec(&Envelope {
            version: WIRE_VERSION + 1,
            body,
        })
        .unwrap();

        assert_eq!(
            ProductEvent::decode(EventKind::Deleted, &bytes),
            Ok(ProductEvent::deleted(id))
        );
    }

    #[test]
    fn missing_description_defaults_to_empty() {
        let id = ProductId::new();
        let bytes = serde_json::to_vec(&serde_json::json!({
            "version": 1,
            "body": { "product_id": id.to_string(), "name": "Widget", "price_cents": 999 }
        }))
        .unwrap();

        let CommandMessage::Create(body) =
            CommandMessage::decode(CommandKind::Create, &bytes).unwrap()
        else {
            unreachable!("decoded by kind");
        };
        assert_eq!(body.description, "");
        assert_eq!(body.price_cents, 999);
    }

    #[test]
    fn version_below_minimum_is_rejected() {
        let body = ProductDeleted {
            product_id: ProductId::new().to_string(),
        };
        let bytes = serde_json::to_vec(&Envelope { version: 0, body }).unwrap();
        assert_eq!(
            ProductEvent::decode(EventKind::Deleted, &bytes),
            Err(DecodeError::UnsupportedVersion {
                found: 0,
                minimum: MIN_WIRE_VERSION
            })
        );
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let bytes = br#"{"version":1,"body":{"name":"Widget"}}"#;
        assert!(matches!(
            CommandMessage::decode(CommandKind::Create, bytes),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn bad_id_surfaces_when_rebuilding_the_command() {
        let message = CommandMessage::Delete(ProductDelete {
            product_id: "nope".to_string(),
        });
        let bytes = message.encode().unwrap();
        let decoded = CommandMessage::decode(CommandKind::Delete, &bytes).unwrap();
        assert_eq!(
            decoded.into_command(),
            Err(ValidationError::InvalidId("nope".to_string()))
        );
    }

    #[test]
    fn topics_resolve_to_kinds() {
        let topics = EventTopics::default();
        assert_eq!(topics.kind_of("product_deleted"), Some(EventKind::Deleted));
        assert_eq!(topics.kind_of("something_else"), None);
        assert_eq!(topics.topic(EventKind::Created), "product_created");

        let commands = CommandTopics::default();
        assert_eq!(commands.kind_of("product_update"), Some(CommandKind::Update));
    }
}
