//! Dead-letter queue for skipped records.
//!
//! Elements that cannot be loaded (malformed JSON, non-object values, name
//! collisions, missing merge keys) are skipped and written as NDJSON to a
//! configurable location for later inspection.

mod queue;
mod tracker;
mod types;

pub use queue::DeadLetterQueue;
pub use tracker::SkipTracker;
pub use types::{SkipStats, SkippedRecord};
