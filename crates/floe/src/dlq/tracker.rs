//! Skip tracking with DLQ integration.

use std::sync::Arc;

use tracing::{error, warn};

use crate::emit;
use crate::error::{PipelineError, SkipCeilingExceededSnafu};
use crate::metrics::events::RecordSkipped;

use super::{DeadLetterQueue, SkippedRecord};

/// Counts skipped records, forwards them to the DLQ and enforces the
/// configured ceiling.
pub struct SkipTracker {
    count: usize,
    max_skipped: usize,
    dlq: Option<Arc<DeadLetterQueue>>,
    unit: String,
}

impl SkipTracker {
    /// `max_skipped` of 0 means unlimited.
    pub fn new(max_skipped: usize, dlq: Option<Arc<DeadLetterQueue>>, unit: String) -> Self {
        Self {
            count: 0,
            max_skipped,
            dlq,
            unit,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Record a skip. Fails once the count exceeds the ceiling.
    pub async fn record(&mut self, skipped: SkippedRecord) -> Result<(), PipelineError> {
        self.count += 1;
        warn!(
            target = %self.unit,
            index = skipped.index,
            offset = skipped.offset,
            stage = skipped.stage.as_str(),
            error = %skipped.error,
            "Skipping record"
        );
        emit!(RecordSkipped {
            stage: skipped.stage,
            unit: self.unit.clone(),
        });

        if let Some(dlq) = &self.dlq {
            dlq.record(skipped).await;
        }

        if self.max_skipped > 0 && self.count > self.max_skipped {
            error!(
                target = %self.unit,
                "Skipped record limit ({}) exceeded, failing batch",
                self.max_skipped
            );
            return SkipCeilingExceededSnafu {
                count: self.count,
                limit: self.max_skipped,
            }
            .fail();
        }
        Ok(())
    }

    /// Flush the DLQ, logging any error.
    pub async fn finalize_dlq(&self) {
        if let Some(dlq) = &self.dlq
            && let Err(e) = dlq.finalize().await
        {
            error!(target = %self.unit, "Failed to finalize DLQ: {}", e);
        }
    }
}
