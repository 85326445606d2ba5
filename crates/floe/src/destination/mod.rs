//! Destination table abstraction.
//!
//! The merge engine reads committed partition state and writes a replacement
//! through the [`Destination`] trait. A partition is every row of one table
//! belonging to one tenant; committing replaces it in a single write so that
//! a failed merge leaves the previous state visible.

mod table;

pub use table::TableStore;

use async_trait::async_trait;

use crate::error::DestinationError;
use crate::record::Record;
use crate::schema::TableSchema;

/// Storage backend for destination tables.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Load the declared schema of `table`, or `None` if the table does not exist.
    async fn load_schema(&self, table: &str) -> Result<Option<TableSchema>, DestinationError>;

    /// Replace the schema of `table` with `schema`.
    ///
    /// Rejects changes that would drop or narrow an existing column.
    async fn apply_schema_changes(
        &self,
        table: &str,
        schema: &TableSchema,
    ) -> Result<(), DestinationError>;

    /// Load every committed row of one tenant's partition.
    async fn load_partition(&self, table: &str, tenant: &str)
    -> Result<Vec<Record>, DestinationError>;

    /// Atomically replace one tenant's partition with `rows`.
    async fn commit_partition(
        &self,
        table: &str,
        tenant: &str,
        rows: &[Record],
    ) -> Result<(), DestinationError>;
}
