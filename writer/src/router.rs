//! Routes command messages from the command topics to the service.
//!
//! The store write and the event publish are retried separately, so a
//! transient publish failure does not replay a create that already committed
//! (which would come back as a conflict).
//!
//! A command whose write committed but whose event could not be published is
//! retained, and its event is kept against the message position. The
//! redelivery publishes that event without touching the store again, so the
//! offset only moves once the event is out. After a restart the pending event
//! is gone; a redelivered create then finds its own committed record and
//! republishes it.
//!
//! | Outcome | Disposition |
//! |---|---|
//! | applied and published | `Commit` |
//! | unknown topic, bad payload, invalid command | `Skip` |
//! | conflict with a different record, not found | `Skip` |
//! | transient failure, retries exhausted | `Retain` |
//! | shutdown during a retry delay | `Abandon` |

use crate::handlers::{CommandError, ProductCommandService};
use catalog_core::command::{CreateProduct, ProductCommand};
use catalog_core::event::{CommandMessage, CommandTopics, ProductEvent};
use catalog_core::event_bus::EventMessage;
use catalog_core::repository::RepositoryError;
use catalog_runtime::consumer::{Disposition, MessageHandler};
use catalog_runtime::retry::{RetryError, RetryPolicy, retry_until_shutdown};
use catalog_runtime::shutdown::Shutdown;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Topic, partition and offset of a message.
type Position = (String, i32, i64);

/// [`MessageHandler`] for the writer's consumer pool.
pub struct CommandRouter {
    service: ProductCommandService,
    topics: CommandTopics,
    policy: RetryPolicy,
    pending: Mutex<HashMap<Position, ProductEvent>>,
}

impl CommandRouter {
    /// Router dispatching messages from `topics` to `service`.
    #[must_use]
    pub fn new(service: ProductCommandService, topics: CommandTopics, policy: RetryPolicy) -> Self {
        Self {
            service,
            topics,
            policy,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn decode(&self, message: &EventMessage) -> Option<ProductCommand> {
        let Some(kind) = self.topics.kind_of(&message.topic) else {
            tracing::warn!(topic = %message.topic, "Message on an unrouted topic");
            return None;
        };

        let decoded = match CommandMessage::decode(kind, &message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "Undecodable command payload");
                return None;
            }
        };

        match decoded.into_command() {
            Ok(command) => Some(command),
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "Command carries an invalid id");
                None
            }
        }
    }

    async fn route(&self, message: &EventMessage, shutdown: &Shutdown) -> Disposition {
        let Some(command) = self.decode(message) else {
            return Disposition::Skip;
        };

        let position = (message.topic.clone(), message.partition, message.offset);
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&position);
        let event = match pending {
            Some(event) => {
                tracing::info!(
                    product_id = %command.product_id(),
                    "Change already committed, publishing its event"
                );
                event
            }
            None => match self.apply(&command, shutdown).await {
                Ok(event) => event,
                Err(disposition) => return disposition,
            },
        };

        match retry_until_shutdown(
            &self.policy,
            shutdown,
            || self.service.publish(&command, &event),
            CommandError::is_transient,
        )
        .await
        {
            Ok(()) => Disposition::Commit,
            Err(e) => {
                if matches!(e, RetryError::Exhausted { .. }) {
                    self.pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(position, event);
                }
                disposition_for(&e)
            }
        }
    }

    async fn apply(
        &self,
        command: &ProductCommand,
        shutdown: &Shutdown,
    ) -> Result<ProductEvent, Disposition> {
        let result = retry_until_shutdown(
            &self.policy,
            shutdown,
            || self.service.apply(command),
            CommandError::is_transient,
        )
        .await;

        match (result, command) {
            (Ok(event), _) => Ok(event),
            (
                Err(RetryError::Rejected(CommandError::Repository(RepositoryError::Conflict(_)))),
                ProductCommand::Create(create),
            ) => self.recover_create(create, shutdown).await,
            (Err(e), _) => Err(disposition_for(&e)),
        }
    }

    /// A create that conflicts with its own earlier commit is republished.
    async fn recover_create(
        &self,
        command: &CreateProduct,
        shutdown: &Shutdown,
    ) -> Result<ProductEvent, Disposition> {
        match retry_until_shutdown(
            &self.policy,
            shutdown,
            || self.service.committed_create(command),
            CommandError::is_transient,
        )
        .await
        {
            Ok(Some(event)) => {
                tracing::info!(product_id = %command.id, "Create already committed, republishing");
                Ok(event)
            }
            Ok(None) => Err(Disposition::Skip),
            Err(e) => Err(disposition_for(&e)),
        }
    }
}

impl MessageHandler for CommandRouter {
    fn handle<'a>(
        &'a self,
        message: &'a EventMessage,
        shutdown: &'a Shutdown,
    ) -> BoxFuture<'a, Disposition> {
        Box::pin(self.route(message, shutdown))
    }
}

fn disposition_for(error: &RetryError<CommandError>) -> Disposition {
    match error {
        RetryError::Rejected(_) => Disposition::Skip,
        RetryError::Exhausted { .. } => Disposition::Retain,
        RetryError::Cancelled => Disposition::Abandon,
    }
}
