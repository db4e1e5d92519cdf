//! Raw message decoding: subject, textual parts and image parts.

use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};

use crate::error::DecodeError;

/// A `text/*` leaf part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPart {
    /// Decoded body.
    pub body: String,
}

/// An `image/*` leaf part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    pub filename: String,
    pub body: Vec<u8>,
}

/// Structured view of an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedMessage {
    pub subject: String,
    /// Textual parts in document order.
    pub text_parts: Vec<TextPart>,
    /// Image parts in document order.
    pub image_parts: Vec<ImagePart>,
}

impl DecodedMessage {
    /// True when there is nothing to forward.
    pub fn is_empty(&self) -> bool {
        self.text_parts.is_empty() && self.image_parts.is_empty()
    }

    /// Whether any textual part contains `phrase`.
    pub fn text_contains(&self, phrase: &str) -> bool {
        self.text_parts.iter().any(|p| p.body.contains(phrase))
    }
}

/// Decode raw RFC 5322 bytes into a [`DecodedMessage`].
pub fn decode(raw: &[u8]) -> Result<DecodedMessage, DecodeError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }

    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| DecodeError::Malformed("no header section found".into()))?;

    let mut decoded = DecodedMessage {
        subject: parsed.subject().unwrap_or_default().to_string(),
        ..Default::default()
    };

    for part in &parsed.parts {
        match classify_part(part) {
            Some(Leaf::Text(text)) => decoded.text_parts.push(text),
            Some(Leaf::Image(image)) => decoded.image_parts.push(image),
            None => {}
        }
    }

    Ok(decoded)
}

enum Leaf {
    Text(TextPart),
    Image(ImagePart),
}

fn classify_part(part: &MessagePart<'_>) -> Option<Leaf> {
    if matches!(part.body, PartType::Multipart(_) | PartType::Message(_)) {
        return None;
    }

    let (ctype, subtype) = match MimeHeaders::content_type(part) {
        Some(ct) => (
            ct.ctype().to_ascii_lowercase(),
            ct.subtype().unwrap_or_default().to_ascii_lowercase(),
        ),
        // RFC 2045 default
        None => ("text".to_string(), "plain".to_string()),
    };

    match ctype.as_str() {
        "text" => {
            let body = match &part.body {
                PartType::Text(text) | PartType::Html(text) => text.to_string(),
                _ => String::from_utf8_lossy(part.contents()).into_owned(),
            };
            Some(Leaf::Text(TextPart { body }))
        }
        "image" => {
            let filename = MimeHeaders::attachment_name(part)
                .map(str::to_string)
                .unwrap_or_else(|| format!("image.{subtype}"));
            Some(Leaf::Image(ImagePart {
                filename,
                body: part.contents().to_vec(),
            }))
        }
        _ => None,
    }
}
