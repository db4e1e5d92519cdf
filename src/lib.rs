//! mail2chat: an SMTP-to-Telegram relay.
//!
//! Mail arrives on a small SMTP listener, is classified by sender, filtered,
//! and parked on a bounded per-chat queue. A single dispatcher drains those
//! queues round-robin at a fixed cadence and posts to Telegram, handing
//! anything Telegram refuses to an optional secondary SMTP server.

pub mod channels;
pub mod config;
pub mod error;
pub mod mail;
pub mod relay;
pub mod routing;
