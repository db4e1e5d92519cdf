//! Telegram Bot API client used for outbound delivery.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::channels::{ChatClient, MessageId};
use crate::error::ChatError;
use crate::routing::DestinationId;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// The bot account behind a token, as returned by `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

/// Telegram client: sendMessage, sendPhoto, pinChatMessage.
pub struct TelegramClient {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(bot_token: SecretString) -> Self {
        Self::with_base_url(bot_token, TELEGRAM_API_BASE.to_string())
    }

    /// Point the client at another Bot API server (local bot API, tests).
    pub fn with_base_url(bot_token: SecretString, api_base: String) -> Self {
        Self {
            bot_token,
            api_base: api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Verify the token and return the bot account.
    pub async fn get_me(&self) -> Result<BotUser, ChatError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| request_failed("getMe", e))?;
        read_result("getMe", resp).await
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(
        &self,
        chat: DestinationId,
        text: &str,
    ) -> Result<MessageId, ChatError> {
        let markdown_body = serde_json::json!({
            "chat_id": chat.0,
            "text": text,
            "parse_mode": "Markdown"
        });

        match self.post_json::<SentMessage>("sendMessage", &markdown_body).await {
            Ok(sent) => return Ok(sent.message_id),
            Err(ChatError::Rejected { description, .. }) if is_markdown_error(&description) => {
                tracing::warn!(
                    destination = %chat,
                    %description,
                    "Telegram sendMessage with Markdown failed; retrying without parse_mode"
                );
            }
            Err(e) => return Err(e),
        }

        let plain_body = serde_json::json!({
            "chat_id": chat.0,
            "text": text,
        });
        let sent: SentMessage = self.post_json("sendMessage", &plain_body).await?;
        Ok(sent.message_id)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, ChatError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| request_failed(method, e))?;
        read_result(method, resp).await
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    /// Long text is split into consecutive messages; the first one's id is returned.
    ///
    /// Once the first chunk is delivered the text counts as sent: a later
    /// chunk failing is logged and the remaining chunks are skipped.
    async fn send_text(&self, chat: DestinationId, text: &str) -> Result<MessageId, ChatError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let Some((head, tail)) = chunks.split_first() else {
            return Err(ChatError::MissingResult {
                method: "sendMessage".into(),
            });
        };

        let first = self.send_message_chunk(chat, head).await?;
        for (index, chunk) in tail.iter().enumerate() {
            if let Err(e) = self.send_message_chunk(chat, chunk).await {
                tracing::warn!(
                    destination = %chat,
                    chunk = index + 2,
                    chunks = chunks.len(),
                    "Telegram message only partially sent: {e}"
                );
                break;
            }
        }

        Ok(first)
    }

    async fn send_photo(
        &self,
        chat: DestinationId,
        photo: Vec<u8>,
        filename: &str,
        caption: &str,
    ) -> Result<(), ChatError> {
        let part = Part::bytes(photo).file_name(filename.to_string());

        let mut form = Form::new()
            .text("chat_id", chat.to_string())
            .text("disable_notification", "true")
            .part("photo", part);

        if !caption.is_empty() {
            form = form.text("caption", caption.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_failed("sendPhoto", e))?;

        let _sent: SentMessage = read_result("sendPhoto", resp).await?;
        tracing::debug!(destination = %chat, filename, "Telegram photo sent");
        Ok(())
    }

    async fn pin(&self, chat: DestinationId, message_id: MessageId) -> Result<(), ChatError> {
        let body = serde_json::json!({
            "chat_id": chat.0,
            "message_id": message_id,
            "disable_notification": true
        });
        let _pinned: bool = self.post_json("pinChatMessage", &body).await?;
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// The request URL carries the bot token, so it is stripped from errors.
fn request_failed(method: &str, e: reqwest::Error) -> ChatError {
    ChatError::RequestFailed {
        method: method.to_string(),
        reason: e.without_url().to_string(),
    }
}

async fn read_result<T: DeserializeOwned>(
    method: &str,
    resp: reqwest::Response,
) -> Result<T, ChatError> {
    let status = resp.status();
    let body: ApiResponse<T> = resp.json().await.map_err(|e| ChatError::RequestFailed {
        method: method.to_string(),
        reason: format!("unreadable response (HTTP {status}): {}", e.without_url()),
    })?;

    if !body.ok {
        return Err(ChatError::Rejected {
            method: method.to_string(),
            description: body
                .description
                .unwrap_or_else(|| format!("HTTP {status}")),
        });
    }

    body.result.ok_or_else(|| ChatError::MissingResult {
        method: method.to_string(),
    })
}

/// Whether a rejection is Telegram refusing the Markdown entities, which a
/// plain-text resend can fix. Rate limits and chat errors are not.
fn is_markdown_error(description: &str) -> bool {
    description.contains("can't parse entities")
}

/// Split a message into chunks of at most `max_chars` characters.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let Some((limit, _)) = remaining.char_indices().nth(max_chars) else {
            chunks.push(remaining.to_string());
            break;
        };

        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            // Don't split at position 0 (infinite loop guard)
            .filter(|&at| at > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
