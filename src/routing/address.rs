//! Sender address classification: `+tag` extraction and canonical form.

use std::sync::LazyLock;

use lettre::message::Mailbox;
use regex::Regex;

use crate::error::AddressError;

/// Routing tag that asks for the delivered message to be pinned.
pub const PIN_TAG: &str = "pin";

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+(.+)@").expect("tag pattern is valid"));

/// A classified sender address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Lowercase `local@domain` with any `+tag` removed. Registry lookup key.
    pub canonical: String,
    /// Tag taken from a `local+tag@domain` suffix.
    pub tag: Option<String>,
}

impl Address {
    /// Whether the sender asked for the delivered message to be pinned.
    pub fn wants_pin(&self) -> bool {
        self.tag.as_deref() == Some(PIN_TAG)
    }
}

/// Parse a sender string and split off its routing tag.
///
/// Accepts `addr`, `<addr>` and `Name <addr>`. Only the first `+tag`
/// occurrence in front of the `@` is honored.
pub fn classify(raw: &str) -> Result<Address, AddressError> {
    let trimmed = raw.trim();
    let bare = trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed);

    let mailbox: Mailbox = bare.parse().map_err(|e| AddressError::Invalid {
        address: raw.to_string(),
        reason: format!("{e}"),
    })?;

    let address = mailbox.email.to_string().to_lowercase();

    let Some(caps) = TAG_RE.captures(&address) else {
        return Ok(Address {
            canonical: address,
            tag: None,
        });
    };

    let tag = caps[1].to_string();
    let canonical = address.replacen(&format!("+{tag}"), "", 1);
    Ok(Address {
        canonical,
        tag: Some(tag),
    })
}

/// Trim the envelope formatting (`<`, `>` and spaces) around a recipient.
pub fn normalize_recipient(raw: &str) -> String {
    raw.trim_matches(|c| c == ' ' || c == '<' || c == '>').to_string()
}
