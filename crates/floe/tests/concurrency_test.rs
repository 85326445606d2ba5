//! Concurrent unit scheduling against a local destination.
//!
//! Run with: cargo test -p floe --test concurrency_test

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use floe::config::{Environment, ErrorHandlingConfig, GlobalConfig, KB, MB, UnitKey};
use floe::error::DestinationError;
use floe::merge::CommitLocks;
use floe::record::OPERATION_COLUMN;
use floe::schema::TableSchema;
use floe::{
    Config, Destination, FailedRun, PipelineError, Record, RunContext, TableStore,
    TruncationPolicy, UnitConfig, run_unit, run_units,
};

const TABLE: &str = "customers";

/// Wraps a table store, holding each partition read open for a while and
/// recording how many reads overlap.
struct SlowStore {
    inner: TableStore,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    failing_tenant: Option<String>,
}

#[async_trait]
impl Destination for SlowStore {
    async fn load_schema(&self, table: &str) -> Result<Option<TableSchema>, DestinationError> {
        self.inner.load_schema(table).await
    }

    async fn apply_schema_changes(
        &self,
        table: &str,
        schema: &TableSchema,
    ) -> Result<(), DestinationError> {
        self.inner.apply_schema_changes(table, schema).await
    }

    async fn load_partition(
        &self,
        table: &str,
        tenant: &str,
    ) -> Result<Vec<Record>, DestinationError> {
        if self.failing_tenant.as_deref() == Some(tenant) {
            panic!("partition read for {tenant} crashed");
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let rows = self.inner.load_partition(table, tenant).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        rows
    }

    async fn commit_partition(
        &self,
        table: &str,
        tenant: &str,
        rows: &[Record],
    ) -> Result<(), DestinationError> {
        self.inner.commit_partition(table, tenant, rows).await
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<SlowStore>,
    ctx: Arc<RunContext>,
}

impl Harness {
    async fn new(failing_tenant: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap();
        let warehouse = dir.path().join("warehouse");
        std::fs::create_dir_all(&warehouse).unwrap();
        let inner = TableStore::new(warehouse.to_str().unwrap(), HashMap::new())
            .await
            .unwrap();
        let store = Arc::new(SlowStore {
            inner,
            delay: Duration::from_millis(25),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            failing_tenant: failing_tenant.map(str::to_string),
        });

        let ctx = Arc::new(RunContext {
            destination: store.clone(),
            staging_dir: dir.path().join("staging"),
            error_handling: ErrorHandlingConfig::default(),
            run_log: None,
            environment: Environment::Dev,
            locks: CommitLocks::new(),
            shutdown: CancellationToken::new(),
        });
        Self { dir, store, ctx }
    }

    fn unit(&self, name: &str, tenant: &str, ids: &[i64]) -> UnitConfig {
        let rows: Vec<Value> = ids
            .iter()
            .map(|id| json!({"id": id, "name": format!("customer {id}")}))
            .collect();
        let path = self.dir.path().join("sources").join(format!("{name}.json"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string(&rows).unwrap()).unwrap();

        UnitConfig {
            tenant_id: tenant.to_string(),
            destination_table: TABLE.to_string(),
            source_location: path.to_str().unwrap().to_string(),
            merge_key_columns: vec!["id".to_string()],
            streaming_threshold_bytes: 100 * MB as u64,
            progress_interval: 10_000,
            chunk_size_bytes: 64 * KB,
            source_storage_options: HashMap::new(),
            on_truncated: TruncationPolicy::Abort,
        }
    }

    fn config(&self, total_concurrency: usize, units: &[(&str, &str)]) -> Config {
        let units: IndexMap<UnitKey, UnitConfig> = units
            .iter()
            .map(|(name, tenant)| (UnitKey::new(*name).unwrap(), self.unit(name, tenant, &[1, 2])))
            .collect();
        Config {
            units,
            global: GlobalConfig {
                environment: Environment::Dev,
                total_concurrency,
            },
            ..Default::default()
        }
    }

    async fn rows(&self, tenant: &str) -> Vec<Record> {
        self.store.inner.load_partition(TABLE, tenant).await.unwrap()
    }
}

fn operations_by_id(rows: &[Record]) -> HashMap<i64, String> {
    rows.iter()
        .map(|row| {
            (
                row["id"].as_i64().unwrap(),
                row[OPERATION_COLUMN].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

/// With a concurrency of one, no two units touch the destination at once.
#[tokio::test]
async fn test_total_concurrency_serializes_units() {
    let harness = Harness::new(None).await;
    let config = harness.config(1, &[("load-a", "a"), ("load-b", "b"), ("load-c", "c")]);

    let results = run_units(&config, harness.ctx.clone()).await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(harness.store.peak.load(Ordering::SeqCst), 1);
}

/// The permit count caps how many units overlap.
#[tokio::test]
async fn test_total_concurrency_caps_overlap() {
    let harness = Harness::new(None).await;
    let config = harness.config(
        2,
        &[("load-a", "a"), ("load-b", "b"), ("load-c", "c"), ("load-d", "d")],
    );

    let results = run_units(&config, harness.ctx.clone()).await;
    assert!(results.iter().all(Result::is_ok));
    let peak = harness.store.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak overlap was {peak}");
    for tenant in ["a", "b", "c", "d"] {
        assert_eq!(harness.rows(tenant).await.len(), 2, "tenant {tenant}");
    }
}

/// Results follow configuration order, not completion order.
#[tokio::test]
async fn test_results_follow_config_order() {
    let harness = Harness::new(None).await;
    let config = harness.config(3, &[("zeta", "z"), ("alpha", "a"), ("mid", "m")]);

    let results = run_units(&config, harness.ctx.clone()).await;
    let order: Vec<(String, String)> = results
        .into_iter()
        .map(|result| {
            let summary = result.unwrap();
            (summary.unit, summary.tenant_id)
        })
        .collect();
    assert_eq!(
        order,
        vec![
            ("zeta".to_string(), "z".to_string()),
            ("alpha".to_string(), "a".to_string()),
            ("mid".to_string(), "m".to_string()),
        ]
    );
}

/// A panicking unit task still yields a failed summary; the others complete.
#[tokio::test]
async fn test_panicked_unit_yields_failed_summary() {
    let harness = Harness::new(Some("boom")).await;
    let config = harness.config(2, &[("ok-load", "fine"), ("bad-load", "boom")]);

    let mut results = run_units(&config, harness.ctx.clone()).await;
    assert_eq!(results.len(), 2);

    let failed = results.pop().unwrap();
    let FailedRun { summary, error } = failed.unwrap_err();
    assert!(matches!(error, PipelineError::TaskJoin { .. }));
    assert_eq!(summary.unit, "bad-load");
    assert_eq!(summary.tenant_id, "boom");
    assert_eq!(summary.table, TABLE);
    assert!(summary.error.is_some());

    let ok = results.pop().unwrap().unwrap();
    assert_eq!(ok.records_inserted, 2);
    assert_eq!(harness.rows("fine").await.len(), 2);
}

/// Two units merging into one partition at once leave the result of one
/// complete merge applied after the other.
#[tokio::test]
async fn test_racing_units_on_one_partition_stay_consistent() {
    let harness = Harness::new(None).await;
    let first = harness.unit("first", "acme", &[1, 2]);
    let second = harness.unit("second", "acme", &[3]);
    let first_key = UnitKey::new("first").unwrap();
    let second_key = UnitKey::new("second").unwrap();

    let (a, b) = tokio::join!(
        run_unit(&harness.ctx, &first_key, &first),
        run_unit(&harness.ctx, &second_key, &second),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.records_inserted + b.records_inserted, 3);

    let ops = operations_by_id(&harness.rows("acme").await);
    assert_eq!(ops.len(), 3);
    let first_then_second = HashMap::from([
        (1, "DELETE".to_string()),
        (2, "DELETE".to_string()),
        (3, "INSERT".to_string()),
    ]);
    let second_then_first = HashMap::from([
        (1, "INSERT".to_string()),
        (2, "INSERT".to_string()),
        (3, "DELETE".to_string()),
    ]);
    let soft_deleted = a.records_soft_deleted + b.records_soft_deleted;
    assert!(
        (ops == first_then_second && soft_deleted == 2)
            || (ops == second_then_first && soft_deleted == 1),
        "partition holds {ops:?} after {soft_deleted} soft deletes"
    );
    assert_eq!(harness.store.peak.load(Ordering::SeqCst), 1);
}
