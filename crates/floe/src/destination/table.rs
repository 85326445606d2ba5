//! Object-store backed destination tables.
//!
//! Layout under the table root:
//!
//! ```text
//! {table}/_schema.json
//! {table}/tenant={tenant}/rows.ndjson
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use object_store::path::Path;
use snafu::prelude::*;
use tracing::{debug, info};

use floe_core::{StorageProvider, StorageProviderRef};

use crate::error::{
    DecodeRowSnafu, DecodeSchemaSnafu, DestinationError, DestinationStorageSnafu, EncodeSnafu,
    SchemaChangeSnafu, StorageError,
};
use crate::record::Record;
use crate::schema::TableSchema;

use super::Destination;

const SCHEMA_FILE: &str = "_schema.json";
const ROWS_FILE: &str = "rows.ndjson";

/// Destination tables stored as one schema document and one NDJSON file per
/// tenant partition.
#[derive(Clone)]
pub struct TableStore {
    storage: StorageProviderRef,
}

impl TableStore {
    /// Create a store rooted at `table_uri`.
    pub async fn new(
        table_uri: &str,
        storage_options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let storage = StorageProvider::for_url_with_options(table_uri, storage_options).await?;
        debug!(table_uri = %storage.canonical_url(), "Opened destination table store");
        Ok(Self::from_storage(storage.into()))
    }

    pub fn from_storage(storage: StorageProviderRef) -> Self {
        Self { storage }
    }

    fn schema_path(table: &str) -> Path {
        Path::from(format!("{table}/{SCHEMA_FILE}"))
    }

    fn partition_path(table: &str, tenant: &str) -> Path {
        Path::from(format!("{table}/tenant={tenant}/{ROWS_FILE}"))
    }
}

#[async_trait]
impl Destination for TableStore {
    async fn load_schema(&self, table: &str) -> Result<Option<TableSchema>, DestinationError> {
        let path = Self::schema_path(table);
        let bytes = match self.storage.get(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(source) => return Err(DestinationError::DestinationStorage { source }),
        };
        let mut schema: TableSchema = serde_json::from_slice(&bytes).context(DecodeSchemaSnafu {
            path: path.to_string(),
        })?;
        schema.ensure_audit_columns();
        Ok(Some(schema))
    }

    async fn apply_schema_changes(
        &self,
        table: &str,
        schema: &TableSchema,
    ) -> Result<(), DestinationError> {
        if let Some(current) = self.load_schema(table).await? {
            current.check_evolution(schema).context(SchemaChangeSnafu)?;
        }
        let bytes = serde_json::to_vec_pretty(schema).context(EncodeSnafu)?;
        self.storage
            .put(&Self::schema_path(table), bytes)
            .await
            .context(DestinationStorageSnafu)?;
        info!(table, columns = schema.len(), "Applied schema changes");
        Ok(())
    }

    async fn load_partition(
        &self,
        table: &str,
        tenant: &str,
    ) -> Result<Vec<Record>, DestinationError> {
        let path = Self::partition_path(table, tenant);
        let bytes = match self.storage.get(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(source) => return Err(DestinationError::DestinationStorage { source }),
        };
        let mut rows = Vec::new();
        for (i, line) in bytes.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let row: Record = serde_json::from_slice(line).context(DecodeRowSnafu {
                path: path.to_string(),
                line: i + 1,
            })?;
            rows.push(row);
        }
        debug!(table, tenant, rows = rows.len(), "Loaded partition");
        Ok(rows)
    }

    async fn commit_partition(
        &self,
        table: &str,
        tenant: &str,
        rows: &[Record],
    ) -> Result<(), DestinationError> {
        let mut buf = Vec::new();
        for row in rows {
            serde_json::to_writer(&mut buf, row).context(EncodeSnafu)?;
            buf.push(b'\n');
        }
        self.storage
            .put(&Self::partition_path(table, tenant), buf)
            .await
            .context(DestinationStorageSnafu)?;
        info!(table, tenant, rows = rows.len(), "Committed partition");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> TableStore {
        TableStore::new(dir.path().to_str().unwrap(), HashMap::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_table_has_no_schema_or_rows() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        assert!(store.load_schema("orders").await.unwrap().is_none());
        assert!(store.load_partition("orders", "t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schema_round_trip_and_narrowing_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let wide = TableSchema::with_columns([("code".to_string(), FieldType::String)]);
        store.apply_schema_changes("orders", &wide).await.unwrap();
        assert_eq!(store.load_schema("orders").await.unwrap(), Some(wide));

        let narrow = TableSchema::with_columns([("code".to_string(), FieldType::Integer)]);
        let err = store.apply_schema_changes("orders", &narrow).await.unwrap_err();
        assert!(matches!(err, DestinationError::SchemaChange { .. }));
    }

    #[tokio::test]
    async fn test_partitions_are_isolated_per_tenant() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let row = json!({"id": 1, "_etl_operation": "INSERT"})
            .as_object()
            .unwrap()
            .clone();
        store.commit_partition("orders", "t1", &[row.clone()]).await.unwrap();

        assert_eq!(store.load_partition("orders", "t1").await.unwrap(), vec![row]);
        assert!(store.load_partition("orders", "t2").await.unwrap().is_empty());
        assert!(
            dir.path()
                .join("orders/tenant=t1/rows.ndjson")
                .exists()
        );
    }
}
