//! Rate-limited dispatch loop.
//!
//! A single task drains the per-destination queues round-robin: at most one
//! item per destination per cycle, then a fixed sleep. The cycle cadence is
//! what keeps the bot under the platform's send-rate ceiling, independent of
//! how many destinations are configured.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channels::ChatClient;
use crate::mail::FallbackRelay;
use crate::relay::queue::{QueueDrain, QueueItem};
use crate::routing::DestinationId;

/// Default pause between cycles. Telegram allows ~20 messages per minute
/// into the same group.
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(3);

/// Terminal state of one dequeued item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Text (if any) was sent; images were attempted individually.
    Delivered {
        pinned: bool,
        images_sent: usize,
        images_failed: usize,
    },
    /// The text send failed and the item was handed to the fallback relay.
    FellBack,
}

/// Summary of one round over all destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Items taken off the queues this cycle.
    pub dispatched: Vec<(DestinationId, Delivery)>,
    /// Items still buffered after the cycle.
    pub pending: usize,
}

/// The single consumer of every destination queue.
pub struct Dispatcher {
    queues: QueueDrain,
    chat: Arc<dyn ChatClient>,
    fallback: FallbackRelay,
    interval: Duration,
    last_pending: usize,
}

impl Dispatcher {
    pub fn new(
        queues: QueueDrain,
        chat: Arc<dyn ChatClient>,
        fallback: FallbackRelay,
        interval: Duration,
    ) -> Self {
        Self {
            queues,
            chat,
            fallback,
            interval,
            last_pending: 0,
        }
    }

    /// Run forever: one cycle, then sleep the configured interval.
    pub async fn run(mut self) {
        if self.queues.is_empty() {
            warn!("No destination queues, queue handler not started");
            return;
        }

        let destinations: Vec<_> = self.queues.destinations().collect();
        info!(
            destinations = ?destinations,
            interval_ms = self.interval.as_millis() as u64,
            fallback = self.fallback.is_enabled(),
            "Started queue handler"
        );

        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One round-robin pass: at most one item per destination, never waiting
    /// on an empty queue.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        for index in 0..self.queues.len() {
            let Some((destination, item)) = self.queues.try_dequeue(index) else {
                continue;
            };
            let delivery = self.deliver(destination, item).await;
            report.dispatched.push((destination, delivery));
        }

        report.pending = self.queues.pending();
        if report.pending != self.last_pending {
            info!(pending = report.pending, "Pending messages");
            self.last_pending = report.pending;
        }

        report
    }

    async fn deliver(&self, destination: DestinationId, item: QueueItem) -> Delivery {
        let mut pinned = false;

        if let Some(text) = item.message.text_parts.first() {
            let body = compose_text(&item.message.subject, &text.body);
            match self.chat.send_text(destination, &body).await {
                Ok(message_id) => {
                    debug!(item_id = %item.id, %destination, message_id, "Text message sent");
                    if item.is_pinned {
                        match self.chat.pin(destination, message_id).await {
                            Ok(()) => pinned = true,
                            Err(e) => error!(item_id = %item.id, %destination, "Telegram pin message failed: {e}"),
                        }
                    }
                }
                Err(e) => {
                    error!(item_id = %item.id, %destination, "Telegram message send failed: {e}");
                    self.fallback
                        .relay(&item.from, &item.recipients, &item.raw)
                        .await;
                    return Delivery::FellBack;
                }
            }
        }

        let mut images_sent = 0;
        let mut images_failed = 0;
        for image in &item.message.image_parts {
            match self
                .chat
                .send_photo(destination, image.body.clone(), &image.filename, &image.filename)
                .await
            {
                Ok(()) => images_sent += 1,
                Err(e) => {
                    warn!(item_id = %item.id, %destination, filename = %image.filename, "Telegram photo send failed: {e}");
                    images_failed += 1;
                }
            }
        }

        Delivery::Delivered {
            pinned,
            images_sent,
            images_failed,
        }
    }
}

/// Markdown message body: bold subject, blank line, first text part.
pub fn compose_text(subject: &str, body: &str) -> String {
    format!("*{subject}*\n\n{body}")
}
