//! The relay core: intake, per-destination queues, dispatch loop.

pub mod dispatch;
pub mod intake;
pub mod queue;

pub use dispatch::{CycleReport, DEFAULT_SEND_INTERVAL, Delivery, Dispatcher, compose_text};
pub use intake::{DEFAULT_SUPPRESS_PHRASE, DropReason, IntakeHandler, IntakeOutcome};
pub use queue::{DEFAULT_QUEUE_CAPACITY, QueueDrain, QueueItem, QueueSet, per_destination};
