//! Mail plumbing: inbound SMTP, message decoding, fallback relay.

pub mod decode;
pub mod fallback;
pub mod smtp;

pub use decode::{DecodedMessage, ImagePart, TextPart, decode};
pub use fallback::{FallbackConfig, FallbackRelay, SecondaryRelay, SmtpRelay};
pub use smtp::{MailHandler, SmtpConfig, SmtpServer};
