//! Resource conflict detection.
//!
//! Resources are things that cannot be shared between units running in the
//! same process. Declaring them lets configuration validation reject two units
//! that would race on the same destination partition.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A resource that cannot be shared between units.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// One tenant's partition of a destination table.
    Partition { table: String, tenant: String },
    /// A local file path (staging artifact, lock file, etc.)
    File(String),
}

impl Resource {
    /// Create a partition resource.
    ///
    /// Table names compare case-insensitively, matching how warehouse
    /// identifiers resolve.
    pub fn partition(table: &str, tenant: &str) -> Self {
        Self::Partition {
            table: table.to_ascii_lowercase(),
            tenant: tenant.to_string(),
        }
    }

    /// Create a file resource with normalized path.
    pub fn file(path: &str) -> Self {
        Self::File(path.trim_end_matches('/').to_string())
    }

    /// Detect resource conflicts from a set of unit declarations.
    ///
    /// Returns each resource claimed by more than one unit together with the
    /// claiming keys. Empty map means no conflicts.
    pub fn conflicts<K>(
        components: impl IntoIterator<Item = (K, Vec<Resource>)>,
    ) -> HashMap<Resource, BTreeSet<K>>
    where
        K: Ord + Clone,
    {
        let mut resource_to_keys: HashMap<Resource, BTreeSet<K>> = HashMap::new();

        for (key, resources) in components {
            for resource in resources {
                resource_to_keys
                    .entry(resource)
                    .or_default()
                    .insert(key.clone());
            }
        }

        resource_to_keys.retain(|_, keys| keys.len() > 1);
        resource_to_keys
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partition { table, tenant } => write!(f, "partition:{table}/tenant={tenant}"),
            Self::File(path) => write!(f, "file:{path}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_conflicts() {
        let conflicts = Resource::conflicts(vec![
            ("a", vec![Resource::partition("jobs", "1")]),
            ("b", vec![Resource::partition("jobs", "2")]),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_same_partition_conflicts() {
        let conflicts = Resource::conflicts(vec![
            ("a", vec![Resource::partition("Jobs", "1")]),
            ("b", vec![Resource::partition("jobs", "1")]),
            ("c", vec![Resource::partition("invoices", "1")]),
        ]);
        assert_eq!(conflicts.len(), 1);
        let keys = &conflicts[&Resource::partition("jobs", "1")];
        assert_eq!(keys.iter().copied().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_file_paths_normalized() {
        assert_eq!(Resource::file("/tmp/stage/"), Resource::file("/tmp/stage"));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Resource::partition("jobs", "42").to_string(),
            "partition:jobs/tenant=42"
        );
    }
}
