//! Loader metrics.

pub mod events;

/// Emit a loader metric event.
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        <_ as $crate::metrics::events::InternalEvent>::emit($event)
    };
}
