//! Error types for the relay.

use crate::routing::DestinationId;

/// Configuration-related errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No wildcard receiver (*) found in {key}")]
    MissingWildcard { key: String },

    #[error("Invalid destination id for {address}: {value:?} is not an integer chat id")]
    InvalidDestination { address: String, value: String },
}

/// Sender address classification errors.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid address '{address}': {reason}")]
    Invalid { address: String, reason: String },
}

/// Raw message decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message is empty")]
    Empty,

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Chat platform errors.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{method} failed: {reason}")]
    RequestFailed { method: String, reason: String },

    #[error("{method} rejected by the API: {description}")]
    Rejected { method: String, description: String },

    #[error("{method} returned no result")]
    MissingResult { method: String },
}

/// Per-destination queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("No queue exists for destination {0}")]
    UnknownDestination(DestinationId),

    #[error("Queue for destination {0} is closed")]
    Closed(DestinationId),
}

/// Secondary relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid envelope address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build envelope: {0}")]
    Envelope(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),

    #[error("Relay task failed: {0}")]
    Task(String),
}
