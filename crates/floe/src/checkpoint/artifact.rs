//! Local NDJSON staging artifact.
//!
//! Normalized records are appended while the source is read and streamed
//! back once the schema has been reconciled. The file never outlives its
//! run: it is removed on release or when the handle is dropped.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tracing::{debug, warn};

use crate::error::{ArtifactError, ArtifactIoSnafu, DecodeStagedSnafu, EncodeStagedSnafu};
use crate::record::Record;

/// One normalized record as written to the staging artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    /// Position of the element in the source document.
    pub index: u64,
    /// Byte offset of the element in the source document.
    pub offset: u64,
    pub record: Record,
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Staging file for one (tenant, table) batch.
pub struct StagingArtifact {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    records: u64,
    released: bool,
}

impl StagingArtifact {
    /// Location of a unit's artifact for a batch identity under `work_dir`.
    pub fn path_for(work_dir: &Path, unit: &str, tenant: &str, table: &str) -> PathBuf {
        work_dir.join(format!(
            "{}__{}__{}.staging.ndjson",
            sanitize(unit),
            sanitize(tenant),
            sanitize(table)
        ))
    }

    /// Create a fresh, empty artifact at `path`, truncating any existing file.
    pub async fn create(path: PathBuf) -> Result<Self, ArtifactError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(ArtifactIoSnafu { path: &path })?;
        }
        let file = File::create(&path)
            .await
            .context(ArtifactIoSnafu { path: &path })?;
        debug!(path = %path.display(), "Created staging artifact");
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            records: 0,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records appended so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub async fn append(&mut self, staged: &StagedRecord) -> Result<(), ArtifactError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(ArtifactError::ArtifactIo {
                path: self.path.clone(),
                source: std::io::Error::other("artifact is sealed"),
            });
        };
        let mut line = serde_json::to_vec(staged).context(EncodeStagedSnafu)?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .context(ArtifactIoSnafu { path: &self.path })?;
        self.records += 1;
        Ok(())
    }

    /// Flush and close the writer. Further appends fail.
    pub async fn seal(&mut self) -> Result<(), ArtifactError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .shutdown()
                .await
                .context(ArtifactIoSnafu { path: &self.path })?;
        }
        Ok(())
    }

    /// Open the sealed artifact for reading from the start.
    pub async fn reader(&self) -> Result<StagedReader, ArtifactError> {
        ensure!(
            self.writer.is_none(),
            crate::error::NotSealedSnafu { path: &self.path }
        );
        let file = File::open(&self.path)
            .await
            .context(ArtifactIoSnafu { path: &self.path })?;
        Ok(StagedReader {
            path: self.path.clone(),
            lines: BufReader::new(file).lines(),
            line: 0,
        })
    }

    /// Delete the artifact. Safe to call more than once.
    pub async fn release(&mut self) -> Result<(), ArtifactError> {
        self.writer.take();
        if self.released {
            return Ok(());
        }
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Released staging artifact");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ArtifactError::ArtifactIo {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for StagingArtifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.writer.take();
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed staging artifact on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove staging artifact"),
        }
    }
}

/// Sequential reader over a sealed artifact.
pub struct StagedReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl StagedReader {
    pub async fn next(&mut self) -> Result<Option<StagedRecord>, ArtifactError> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .context(ArtifactIoSnafu { path: &self.path })?
            else {
                return Ok(None);
            };
            self.line += 1;
            if line.trim().is_empty() {
                continue;
            }
            let staged = serde_json::from_str(&line).context(DecodeStagedSnafu { line: self.line })?;
            return Ok(Some(staged));
        }
    }
}
