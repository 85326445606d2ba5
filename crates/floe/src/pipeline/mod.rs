//! Unit runs.
//!
//! A run moves one source document into one tenant partition in three
//! phases:
//!
//! 1. Read: elements are decoded, normalized, typed and appended to the
//!    staging artifact. Skipped elements go to the dead-letter queue.
//! 2. Reconcile: under the table lock, the batch types are reconciled with
//!    the destination schema and any widenings are applied.
//! 3. Merge: under the partition lock, staged records are conformed and
//!    merged into the last committed partition state, which is then
//!    replaced in a single write.
//!
//! A summary is produced for every run, including failed ones.

mod summary;

pub use summary::{ConflictSummary, RunStatus, RunSummary};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use snafu::prelude::*;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use floe_core::{Environment, ErrorHandlingConfig, StorageProvider};

use crate::checkpoint::{RunCheckpoint, StagedRecord};
use crate::config::{Config, TruncationPolicy, UnitConfig, UnitKey};
use crate::destination::{Destination, TableStore};
use crate::dlq::{DeadLetterQueue, SkipTracker, SkippedRecord};
use crate::emit;
use crate::error::{
    CancelledSnafu, ConfigError, FailedRun, LoadPartitionSnafu, MergeCommitSnafu, PipelineError,
    ReaderError, RunLogSnafu,
};
use crate::merge::{CommitLocks, MergeEngine, Operation, record_key};
use crate::metrics::events::{
    BatchCompleted, RecordsConflicting, RecordsMerged, RecordsRead, RecordsUnchanged,
    SchemaWidened, SkipStage,
};
use crate::normalize::normalize_record;
use crate::run_log::{RunLogEvent, RunLogWriter};
use crate::schema::{BatchTypes, FieldPlan, ReconciliationPlan, TableSchema, conform_record, reconcile};
use crate::source::{RecordStream, SourceItem};

use summary::ConflictCounter;

/// Shared state for every unit run in a process.
#[derive(Clone)]
pub struct RunContext {
    pub destination: Arc<dyn Destination>,
    pub staging_dir: PathBuf,
    pub error_handling: ErrorHandlingConfig,
    pub run_log: Option<RunLogWriter>,
    pub environment: Environment,
    pub locks: CommitLocks,
    pub shutdown: CancellationToken,
}

impl RunContext {
    /// Build the context from a validated configuration.
    pub async fn from_config(
        config: &Config,
        shutdown: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let Some(destination) = &config.destination else {
            return Err(ConfigError::EmptyTableUri.into());
        };
        let destination =
            TableStore::new(&destination.table_uri, destination.storage_options.clone()).await?;

        let run_log = match &config.run_log {
            Some(run_log) => Some(
                RunLogWriter::from_config(run_log)
                    .await
                    .context(RunLogSnafu)?,
            ),
            None => None,
        };

        Ok(Self {
            destination: Arc::new(destination),
            staging_dir: config.staging.work_dir(),
            error_handling: config.error_handling.clone(),
            run_log,
            environment: config.global.environment,
            locks: CommitLocks::new(),
            shutdown,
        })
    }
}

/// Everything the read phase learned about a batch.
struct StagedBatch {
    types: BatchTypes,
    /// Source index of the last occurrence of each key.
    latest: HashMap<String, u64>,
}

/// Run one unit to completion.
///
/// The returned summary (or the one carried by [`FailedRun`]) is also
/// written to the run log when one is configured.
pub async fn run_unit(
    ctx: &RunContext,
    key: &UnitKey,
    unit: &UnitConfig,
) -> Result<RunSummary, FailedRun> {
    let start = Instant::now();
    let table = unit.table();
    let mut summary = RunSummary::new(key.id(), &unit.tenant_id, &table);
    info!(
        target = %key,
        tenant = %unit.tenant_id,
        table = %table,
        source = %unit.source_location,
        "Starting unit run"
    );

    let result = run_phases(ctx, key, unit, &table, &mut summary).await;

    summary.duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(()) => summary.status = RunStatus::Succeeded,
        Err(e) => {
            summary.status = match e {
                PipelineError::Cancelled { .. } => RunStatus::Cancelled,
                _ => RunStatus::Failed,
            };
            summary.error = Some(e.to_string());
        }
    }

    emit!(BatchCompleted {
        status: summary.status.as_str(),
        duration: start.elapsed(),
        unit: key.to_string(),
    });

    if let Some(run_log) = &ctx.run_log {
        let event = RunLogEvent::from_summary(&summary, ctx.environment);
        if let Err(e) = run_log.write(&event).await {
            warn!(target = %key, error = %e, "Failed to write run log event");
        }
    }

    match result {
        Ok(()) => {
            info!(
                target = %key,
                read = summary.records_read,
                inserted = summary.records_inserted,
                updated = summary.records_updated,
                unchanged = summary.records_unchanged,
                soft_deleted = summary.records_soft_deleted,
                skipped = summary.records_skipped,
                conflicting = summary.records_conflicting,
                duration_ms = summary.duration_ms,
                "Unit run succeeded"
            );
            Ok(summary)
        }
        Err(error) => {
            error!(target = %key, error = %error, "Unit run failed");
            Err(FailedRun { summary, error })
        }
    }
}

async fn run_phases(
    ctx: &RunContext,
    key: &UnitKey,
    unit: &UnitConfig,
    table: &str,
    summary: &mut RunSummary,
) -> Result<(), PipelineError> {
    let dlq = DeadLetterQueue::from_config(&ctx.error_handling, key.id())
        .await?
        .map(Arc::new);
    let mut skips = SkipTracker::new(
        ctx.error_handling.max_skipped_records,
        dlq,
        key.to_string(),
    );
    let mut checkpoint = RunCheckpoint::begin(
        &ctx.staging_dir,
        &unit.tenant_id,
        table,
        key.id(),
        unit.progress_interval,
    )
    .await?;

    let result = async {
        let batch = read_source(ctx, key, unit, summary, &mut skips, &mut checkpoint).await?;
        let (schema, plan) = reconcile_schema(ctx, key, table, &batch, summary).await?;
        merge_partition(
            ctx,
            key,
            unit,
            table,
            schema,
            &plan,
            &batch,
            &checkpoint,
            &mut skips,
            summary,
        )
        .await
    }
    .await;

    summary.records_skipped = skips.count() as u64;
    summary.progress_reports = checkpoint.progress_reports();
    skips.finalize_dlq().await;
    let released = checkpoint.release().await;
    result?;
    released?;
    Ok(())
}

async fn read_source(
    ctx: &RunContext,
    key: &UnitKey,
    unit: &UnitConfig,
    summary: &mut RunSummary,
    skips: &mut SkipTracker,
    checkpoint: &mut RunCheckpoint,
) -> Result<StagedBatch, PipelineError> {
    let storage =
        StorageProvider::for_object_url(&unit.source_location, unit.source_storage_options.clone())
            .await?;
    let mut stream = RecordStream::open(
        &storage,
        &StorageProvider::object_path(),
        unit.streaming_threshold_bytes,
        unit.chunk_size_bytes,
    )
    .await?;

    let mut batch = StagedBatch {
        types: BatchTypes::new(),
        latest: HashMap::new(),
    };

    loop {
        if ctx.shutdown.is_cancelled() {
            return CancelledSnafu {
                consumed: checkpoint.consumed(),
            }
            .fail();
        }

        let item = match stream.next().await {
            None => break,
            Some(Ok(item)) => item,
            Some(Err(ReaderError::TruncatedInput { offset, complete }))
                if unit.on_truncated == TruncationPolicy::CommitWithoutDeletes =>
            {
                warn!(
                    target = %key,
                    offset,
                    complete,
                    "Source truncated, committing complete elements without soft deletes"
                );
                summary.truncated = true;
                break;
            }
            Some(Err(e)) => return Err(e.into()),
        };

        checkpoint.record_consumed();
        summary.records_read += 1;

        let (index, offset, record) = match item {
            SourceItem::Record {
                index,
                offset,
                record,
            } => (index, offset, record),
            SourceItem::Malformed {
                index,
                offset,
                reason,
                snippet,
            } => {
                skips
                    .record(SkippedRecord::new(
                        index,
                        offset,
                        SkipStage::Parse,
                        reason,
                        Some(snippet),
                    ))
                    .await?;
                continue;
            }
        };

        let record = match normalize_record(record) {
            Ok(record) => record,
            Err(e) => {
                skips
                    .record(SkippedRecord::new(
                        index,
                        offset,
                        SkipStage::Normalize,
                        e.to_string(),
                        None,
                    ))
                    .await?;
                continue;
            }
        };

        let record_id = match record_key(&record, &unit.merge_key_columns) {
            Ok(record_id) => record_id,
            Err(e) => {
                skips
                    .record(SkippedRecord::new(
                        index,
                        offset,
                        SkipStage::MissingKey,
                        e.to_string(),
                        None,
                    ))
                    .await?;
                continue;
            }
        };

        batch.types.observe(&record);
        if let Some(previous) = batch.latest.insert(record_id.clone(), index) {
            summary.records_duplicated += 1;
            warn!(
                target = %key,
                key = %record_id,
                previous_index = previous,
                index,
                "Duplicate key in batch, the later record wins"
            );
        }
        checkpoint
            .artifact_mut()
            .append(&StagedRecord {
                index,
                offset,
                record,
            })
            .await?;
    }

    checkpoint.artifact_mut().seal().await?;
    emit!(RecordsRead {
        count: summary.records_read,
        unit: key.to_string(),
    });
    info!(
        target = %key,
        records = summary.records_read,
        staged = checkpoint.artifact().records(),
        format = ?stream.format(),
        "Finished reading source"
    );
    Ok(batch)
}

async fn reconcile_schema(
    ctx: &RunContext,
    key: &UnitKey,
    table: &str,
    batch: &StagedBatch,
    summary: &mut RunSummary,
) -> Result<(TableSchema, ReconciliationPlan), PipelineError> {
    let _guard = ctx.locks.lock(table).await;

    let declared = ctx.destination.load_schema(table).await?;
    let current = declared.clone().unwrap_or_default();
    let plan = reconcile(&batch.types, &current);
    let changes = plan.changes();

    for (field, reason) in plan.conflicts() {
        warn!(target = %key, field, reason, "Schema conflict, field will not be persisted");
    }

    let schema = if changes.is_empty() && declared.is_some() {
        current
    } else {
        let target = plan.apply_to(&current);
        // Persisted ahead of the merge. Widen-only, so stored rows still conform.
        ctx.destination.apply_schema_changes(table, &target).await?;
        if !changes.is_empty() {
            for change in &changes {
                match &change.from {
                    Some(from) => {
                        info!(target = %key, field = %change.field, from = %from, to = %change.to, "Widened column")
                    }
                    None => info!(target = %key, field = %change.field, to = %change.to, "Added column"),
                }
            }
            emit!(SchemaWidened {
                columns: changes.len() as u64,
                table: table.to_string(),
            });
        }
        target
    };

    summary.schema_changes = changes;
    Ok((schema, plan))
}

#[allow(clippy::too_many_arguments)]
async fn merge_partition(
    ctx: &RunContext,
    key: &UnitKey,
    unit: &UnitConfig,
    table: &str,
    schema: TableSchema,
    plan: &ReconciliationPlan,
    batch: &StagedBatch,
    checkpoint: &RunCheckpoint,
    skips: &mut SkipTracker,
    summary: &mut RunSummary,
) -> Result<(), PipelineError> {
    let _guard = ctx
        .locks
        .lock(&CommitLocks::partition_key(table, &unit.tenant_id))
        .await;

    let existing = ctx
        .destination
        .load_partition(table, &unit.tenant_id)
        .await
        .context(LoadPartitionSnafu)?;
    let mut engine = MergeEngine::new(
        schema,
        unit.merge_key_columns.clone(),
        existing,
        Utc::now(),
    )?;

    let mut conflicts = ConflictCounter::default();
    let mut reader = checkpoint.artifact().reader().await?;
    while let Some(StagedRecord {
        index,
        offset,
        record,
    }) = reader.next().await?
    {
        let record_id = record_key(&record, &unit.merge_key_columns)?;
        if batch.latest.get(&record_id) != Some(&index) {
            continue;
        }

        let (conformed, violations) = conform_record(engine.schema(), record);
        if !violations.is_empty() {
            summary.records_conflicting += 1;
            for violation in &violations {
                let reason = match plan.get(&violation.field) {
                    Some(FieldPlan::Conflict { reason }) => reason.as_str(),
                    _ => violation.reason.as_str(),
                };
                conflicts.record(&violation.field, reason);
            }
        }

        // A conflicting key column is dropped by conformance.
        if let Err(e) = record_key(&conformed, &unit.merge_key_columns) {
            skips
                .record(SkippedRecord::new(
                    index,
                    offset,
                    SkipStage::Conflict,
                    e.to_string(),
                    None,
                ))
                .await?;
            continue;
        }
        engine.upsert(conformed)?;
    }
    summary.conflicts = conflicts.into_summaries();

    if ctx.shutdown.is_cancelled() {
        return CancelledSnafu {
            consumed: checkpoint.consumed(),
        }
        .fail();
    }

    if summary.truncated {
        info!(target = %key, "Skipping soft deletes for truncated source");
    } else {
        engine.soft_delete_absent();
    }

    let (rows, stats) = engine.finish();
    ctx.destination
        .commit_partition(table, &unit.tenant_id, &rows)
        .await
        .context(MergeCommitSnafu)?;

    summary.records_inserted = stats.inserted;
    summary.records_updated = stats.updated;
    summary.records_unchanged = stats.unchanged;
    summary.records_soft_deleted = stats.soft_deleted;

    for (operation, count) in [
        (Operation::Insert, stats.inserted),
        (Operation::Update, stats.updated),
        (Operation::Delete, stats.soft_deleted),
    ] {
        emit!(RecordsMerged {
            operation,
            count,
            unit: key.to_string(),
        });
    }
    emit!(RecordsUnchanged {
        count: stats.unchanged,
        unit: key.to_string(),
    });
    emit!(RecordsConflicting {
        count: summary.records_conflicting,
        unit: key.to_string(),
    });
    Ok(())
}

/// Run every configured unit, at most `global.total_concurrency` at a time.
///
/// Results are returned in configuration order.
pub async fn run_units(
    config: &Config,
    ctx: Arc<RunContext>,
) -> Vec<Result<RunSummary, FailedRun>> {
    let semaphore = Arc::new(Semaphore::new(config.global.total_concurrency.max(1)));

    let handles: Vec<_> = config
        .units
        .iter()
        .map(|(key, unit)| {
            let ctx = ctx.clone();
            let key = key.clone();
            let unit = unit.clone();
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                run_unit(&ctx, &key, &unit).await
            })
        })
        .collect();

    info!("Spawned {} unit tasks", handles.len());

    let mut results = Vec::with_capacity(handles.len());
    for ((key, unit), handle) in config.units.iter().zip(handles) {
        let result = match handle.await {
            Ok(result) => result,
            Err(source) => {
                error!(target = %key, error = %source, "Unit task panicked");
                let mut summary = RunSummary::new(key.id(), &unit.tenant_id, &unit.table());
                summary.error = Some(source.to_string());
                Err(FailedRun {
                    summary,
                    error: PipelineError::TaskJoin { source },
                })
            }
        };
        results.push(result);
    }

    info!("All units complete");
    results
}
