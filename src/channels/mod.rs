//! Chat platform abstraction for outbound delivery.

pub mod telegram;

use async_trait::async_trait;

use crate::error::ChatError;
use crate::routing::DestinationId;

pub use telegram::TelegramClient;

/// Identifier of a message the platform accepted.
pub type MessageId = i64;

/// Outbound side of a chat platform.
///
/// Each call is a single request that either completes or fails; callers
/// decide how a failure is handled.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a formatted text message and return the id of the (first) message.
    async fn send_text(&self, chat: DestinationId, text: &str) -> Result<MessageId, ChatError>;

    /// Upload a photo without notifying chat members.
    async fn send_photo(
        &self,
        chat: DestinationId,
        photo: Vec<u8>,
        filename: &str,
        caption: &str,
    ) -> Result<(), ChatError>;

    /// Pin a message without notifying chat members.
    async fn pin(&self, chat: DestinationId, message_id: MessageId) -> Result<(), ChatError>;
}
