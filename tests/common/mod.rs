//! Recording doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;

use mail2chat::channels::{ChatClient, MessageId};
use mail2chat::error::{ChatError, RelayError};
use mail2chat::mail::SecondaryRelay;
use mail2chat::routing::DestinationId;

/// One outbound call seen by [`RecordingChat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    Text { chat: DestinationId, text: String },
    Photo { chat: DestinationId, filename: String },
    Pin { chat: DestinationId, message_id: MessageId },
}

/// Chat client that records every call. Message ids start at 100.
pub struct RecordingChat {
    pub calls: Mutex<Vec<ChatCall>>,
    next_id: AtomicI64,
    fail_text: bool,
    fail_pin: bool,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(100),
            fail_text: false,
            fail_pin: false,
        }
    }

    /// Every `send_text` fails as if the platform were unreachable.
    pub fn failing_text() -> Self {
        Self {
            fail_text: true,
            ..Self::new()
        }
    }

    /// Every `pin` fails as if the bot lacked the pin permission.
    pub fn failing_pin() -> Self {
        Self {
            fail_pin: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for RecordingChat {
    async fn send_text(&self, chat: DestinationId, text: &str) -> Result<MessageId, ChatError> {
        self.calls.lock().unwrap().push(ChatCall::Text {
            chat,
            text: text.to_string(),
        });
        if self.fail_text {
            return Err(ChatError::RequestFailed {
                method: "sendMessage".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_photo(
        &self,
        chat: DestinationId,
        _photo: Vec<u8>,
        filename: &str,
        _caption: &str,
    ) -> Result<(), ChatError> {
        self.calls.lock().unwrap().push(ChatCall::Photo {
            chat,
            filename: filename.to_string(),
        });
        Ok(())
    }

    async fn pin(&self, chat: DestinationId, message_id: MessageId) -> Result<(), ChatError> {
        self.calls
            .lock()
            .unwrap()
            .push(ChatCall::Pin { chat, message_id });
        if self.fail_pin {
            return Err(ChatError::Rejected {
                method: "pinChatMessage".into(),
                description: "Bad Request: not enough rights to manage pinned messages in the chat".into(),
            });
        }
        Ok(())
    }
}

/// One envelope handed to [`RecordingRelay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relayed {
    pub from: String,
    pub recipients: Vec<String>,
    pub raw: Vec<u8>,
}

#[derive(Default)]
pub struct RecordingRelay {
    pub sent: Mutex<Vec<Relayed>>,
}

impl RecordingRelay {
    pub fn sent(&self) -> Vec<Relayed> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecondaryRelay for RecordingRelay {
    async fn send(&self, from: &str, recipients: &[String], raw: &[u8]) -> Result<(), RelayError> {
        self.sent.lock().unwrap().push(Relayed {
            from: from.to_string(),
            recipients: recipients.to_vec(),
            raw: raw.to_vec(),
        });
        Ok(())
    }
}

pub const TEXT_MAIL: &[u8] = b"From: sender@x.com\r\n\
    Subject: Front door\r\n\
    \r\n\
    Motion detected\r\n";

/// One text part plus two JPEG attachments.
pub const MIXED_MAIL: &[u8] = b"From: cam@x.com\r\n\
    Subject: Snapshot\r\n\
    MIME-Version: 1.0\r\n\
    Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
    \r\n\
    --XYZ\r\n\
    Content-Type: text/plain; charset=utf-8\r\n\
    \r\n\
    Person at gate\r\n\
    --XYZ\r\n\
    Content-Type: image/jpeg\r\n\
    Content-Disposition: attachment; filename=\"one.jpg\"\r\n\
    Content-Transfer-Encoding: base64\r\n\
    \r\n\
    /9j/4AAQSkZJRg==\r\n\
    --XYZ\r\n\
    Content-Type: image/jpeg\r\n\
    Content-Disposition: attachment; filename=\"two.jpg\"\r\n\
    Content-Transfer-Encoding: base64\r\n\
    \r\n\
    /9j/4AAQSkZJRg==\r\n\
    --XYZ--\r\n";

/// A multipart message with no text and no image parts.
pub const EMPTY_MAIL: &[u8] = b"Subject: Nothing\r\n\
    MIME-Version: 1.0\r\n\
    Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
    \r\n\
    --XYZ\r\n\
    Content-Type: application/pdf\r\n\
    Content-Transfer-Encoding: base64\r\n\
    \r\n\
    JVBERi0=\r\n\
    --XYZ--\r\n";
