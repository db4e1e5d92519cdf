//! Sender classification and destination lookup.

pub mod address;
pub mod registry;

pub use address::{Address, PIN_TAG, classify, normalize_recipient};
pub use registry::{DestinationId, DestinationRegistry, WILDCARD};
