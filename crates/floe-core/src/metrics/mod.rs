//! Metrics and observability infrastructure.
//!
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `server`: Prometheus exporter and its HTTP endpoint

pub mod events;
pub mod server;

pub use server::{DEFAULT_METRICS_ADDR, init};

/// Macro for emitting metric events.
///
/// Calls [`events::InternalEvent::emit`] on the given event, which records the
/// corresponding metric on whatever recorder is installed. Without a recorder
/// the call is a no-op.
///
/// # Example
///
/// ```ignore
/// use floe_core::metrics::events::{StorageOperation, StorageRequest, RequestStatus};
///
/// emit!(StorageRequest { operation: StorageOperation::Get, status: RequestStatus::Success });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
