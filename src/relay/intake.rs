//! Intake: classify, filter and enqueue each received message.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mail::{MailHandler, decode};
use crate::relay::queue::{QueueItem, QueueSet};
use crate::routing::{DestinationId, DestinationRegistry, classify, normalize_recipient};

/// Phrase an upstream camera uses for "nothing to see" notifications.
pub const DEFAULT_SUPPRESS_PHRASE: &str = "Face Recognition Clear";

/// Why a message was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    InvalidSender,
    Undecodable,
    Suppressed,
    NoContent,
    QueueUnavailable,
}

/// What happened to one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    Queued(DestinationId),
    Dropped(DropReason),
}

/// Turns received mail into queue items.
pub struct IntakeHandler {
    registry: Arc<DestinationRegistry>,
    queues: QueueSet,
    suppress_phrase: String,
}

impl IntakeHandler {
    pub fn new(registry: Arc<DestinationRegistry>, queues: QueueSet, suppress_phrase: String) -> Self {
        Self {
            registry,
            queues,
            suppress_phrase,
        }
    }

    /// Process one message. Waits while the destination queue is full.
    pub async fn accept(&self, from: &str, mut recipients: Vec<String>, raw: Vec<u8>) -> IntakeOutcome {
        let sender = match classify(from) {
            Ok(sender) => sender,
            Err(e) => {
                warn!("Invalid sender, dropping message: {e}");
                return IntakeOutcome::Dropped(DropReason::InvalidSender);
            }
        };

        if let Some(first) = recipients.first_mut() {
            *first = normalize_recipient(first);
        }

        let message = match decode(&raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(from, "Undecodable message, dropping: {e}");
                return IntakeOutcome::Dropped(DropReason::Undecodable);
            }
        };

        info!(
            from,
            to = recipients.first().map(String::as_str).unwrap_or_default(),
            subject = %message.subject,
            "Received mail"
        );

        if !self.suppress_phrase.is_empty() && message.text_contains(&self.suppress_phrase) {
            info!(phrase = %self.suppress_phrase, "Message matches suppress phrase, dropping");
            return IntakeOutcome::Dropped(DropReason::Suppressed);
        }

        if message.is_empty() {
            info!("Mail doesn't contain text or image, dropping");
            return IntakeOutcome::Dropped(DropReason::NoContent);
        }

        let destination = self.registry.resolve(&sender.canonical);
        let item = QueueItem {
            id: Uuid::new_v4(),
            is_pinned: sender.wants_pin(),
            from: sender.canonical,
            recipients,
            message,
            raw,
        };

        info!(item_id = %item.id, %destination, pinned = item.is_pinned, "Relaying message");
        match self.queues.enqueue(destination, item).await {
            Ok(()) => IntakeOutcome::Queued(destination),
            Err(e) => {
                warn!("Failed to enqueue message: {e}");
                IntakeOutcome::Dropped(DropReason::QueueUnavailable)
            }
        }
    }
}

#[async_trait]
impl MailHandler for IntakeHandler {
    async fn handle(&self, origin: SocketAddr, from: String, recipients: Vec<String>, raw: Vec<u8>) {
        let outcome = self.accept(&from, recipients, raw).await;
        debug!(%origin, ?outcome, "Intake finished");
    }
}
