//! Async lock registry serializing commits per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// Keyed async locks shared by every unit in a process.
///
/// Schema updates lock on the table name and partition merges lock on
/// `table/tenant`, so units touching different partitions never wait on
/// each other.
#[derive(Debug, Clone, Default)]
pub struct CommitLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl CommitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn partition_key(table: &str, tenant: &str) -> String {
        format!("{table}/{tenant}")
    }
}
