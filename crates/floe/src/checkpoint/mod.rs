//! Per-run checkpoint.
//!
//! A [`RunCheckpoint`] lives exactly as long as one batch run. It clears any
//! staging artifact a previous failed run left behind for the same
//! unit and (tenant, table), counts consumed records, emits progress at a fixed
//! interval and releases the artifact when the run ends.

mod artifact;

pub use artifact::{StagedReader, StagedRecord, StagingArtifact};

use std::path::Path;

use tracing::{info, warn};

use crate::emit;
use crate::error::{ArtifactError, ArtifactIoSnafu};
use crate::metrics::events::ProgressReported;
use snafu::prelude::*;

pub struct RunCheckpoint {
    unit: String,
    progress_interval: u64,
    consumed: u64,
    since_progress: u64,
    progress_reports: u64,
    artifact: StagingArtifact,
}

impl RunCheckpoint {
    /// Start a run, replacing any stale artifact for the batch identity.
    pub async fn begin(
        work_dir: &Path,
        tenant: &str,
        table: &str,
        unit: &str,
        progress_interval: u64,
    ) -> Result<Self, ArtifactError> {
        let path = StagingArtifact::path_for(work_dir, unit, tenant, table);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => warn!(
                target = %unit,
                path = %path.display(),
                "Removed stale staging artifact from a previous run"
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(source).context(ArtifactIoSnafu { path }),
        }

        let artifact = StagingArtifact::create(path).await?;
        Ok(Self {
            unit: unit.to_string(),
            progress_interval: progress_interval.max(1),
            consumed: 0,
            since_progress: 0,
            progress_reports: 0,
            artifact,
        })
    }

    /// Count one consumed source element.
    ///
    /// Returns `true` when this element triggered a progress report.
    pub fn record_consumed(&mut self) -> bool {
        self.consumed += 1;
        self.since_progress += 1;
        if self.since_progress < self.progress_interval {
            return false;
        }
        self.since_progress = 0;
        self.progress_reports += 1;
        info!(target = %self.unit, records = self.consumed, "Progress");
        emit!(ProgressReported {
            records: self.consumed,
            unit: self.unit.clone(),
        });
        true
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn progress_reports(&self) -> u64 {
        self.progress_reports
    }

    pub fn artifact(&self) -> &StagingArtifact {
        &self.artifact
    }

    pub fn artifact_mut(&mut self) -> &mut StagingArtifact {
        &mut self.artifact
    }

    /// End the run and delete the artifact.
    pub async fn release(mut self) -> Result<(), ArtifactError> {
        self.artifact.release().await
    }
}
