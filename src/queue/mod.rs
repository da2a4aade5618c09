//! Batch queue: items, their ordering, and URL intake.

pub mod intake;
pub mod item;
pub mod store;

pub use intake::{IntakeReport, enqueue_text, extract_urls};
pub use item::{ItemStatus, QueueItem, Transition, TransitionError};
pub use store::{QueueCounts, QueueStore};
