//! The route oracle.
//!
//! [`Router`] holds the registered [`TableConfig`]s and answers the two
//! questions the planner asks: what is a table's shard key, and which
//! partition index holds a given key value.

use std::collections::HashMap;

use tracing::trace;

use crate::config::{Partition, SchemaConfig, Segment, TableConfig};
use crate::error::{RouterError, RouterResult};

/// A sharding-key value extracted from a query literal.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    /// An integer key.
    Integer(i64),
    /// A floating-point key.
    Float(f64),
    /// A string key.
    String(String),
}

impl KeyValue {
    /// Canonical byte representation fed to the hash.
    fn canonical(&self) -> Vec<u8> {
        match self {
            Self::Integer(i) => i.to_string().into_bytes(),
            Self::Float(f) => f.to_string().into_bytes(),
            Self::String(s) => s.clone().into_bytes(),
        }
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(fl) => write!(f, "{fl}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// The route oracle: partition rules keyed by `(database, table)`.
#[derive(Debug, Clone, Default)]
pub struct Router {
    tables: HashMap<(String, String), TableConfig>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a router from a schema config document.
    #[must_use]
    pub fn from_config(config: SchemaConfig) -> Self {
        let mut router = Self::new();
        for table in config.tables {
            router.add_table(table);
        }
        router
    }

    /// Registers a table config, replacing any previous rule for the table.
    pub fn add_table(&mut self, config: TableConfig) {
        self.tables.insert((config.database.clone(), config.table.clone()), config);
    }

    /// Returns whether the table has a registered rule.
    #[must_use]
    pub fn contains(&self, database: &str, table: &str) -> bool {
        self.tables.contains_key(&(database.to_string(), table.to_string()))
    }

    fn table(&self, database: &str, table: &str) -> RouterResult<&TableConfig> {
        self.tables.get(&(database.to_string(), table.to_string())).ok_or_else(|| {
            RouterError::TableNotFound { database: database.to_string(), table: table.to_string() }
        })
    }

    /// Returns the table's shard key, or `None` for global tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the table has no registered rule.
    pub fn shard_key(&self, database: &str, table: &str) -> RouterResult<Option<&str>> {
        Ok(self.table(database, table)?.partition.shard_key())
    }

    /// Returns the table's segments, in partition-index order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or lists no segments.
    pub fn segments(&self, database: &str, table: &str) -> RouterResult<&[Segment]> {
        let config = self.table(database, table)?;
        let segments = config.partition.segments();
        if segments.is_empty() {
            return Err(RouterError::EmptySegments {
                database: database.to_string(),
                table: table.to_string(),
            });
        }
        Ok(segments)
    }

    /// Returns the number of hash partitions, `0` for global tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the table has no registered rule.
    pub fn shard_count(&self, database: &str, table: &str) -> RouterResult<usize> {
        let config = self.table(database, table)?;
        Ok(match &config.partition {
            Partition::Hash { segments, .. } => segments.len(),
            Partition::Global { .. } => 0,
        })
    }

    /// Resolves a shard-key value to the partition index holding it.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown, has no shard key, or lists
    /// no segments.
    pub fn get_index(&self, database: &str, table: &str, key: &KeyValue) -> RouterResult<usize> {
        let config = self.table(database, table)?;
        let Partition::Hash { segments, .. } = &config.partition else {
            return Err(RouterError::NoShardKey {
                database: database.to_string(),
                table: table.to_string(),
            });
        };
        if segments.is_empty() {
            return Err(RouterError::EmptySegments {
                database: database.to_string(),
                table: table.to_string(),
            });
        }
        let index = crc32fast::hash(&key.canonical()) as usize % segments.len();
        trace!(database, table, key = %key, index, "resolved shard index");
        Ok(index)
    }
}

/// Builds `count` segments named `{table}_{index:04}`, spread round-robin
/// across the given backends.
#[must_use]
pub fn hash_segments(table: &str, backends: &[&str], count: usize) -> Vec<Segment> {
    (0..count)
        .map(|i| Segment::new(format!("{table}_{i:04}"), backends[i % backends.len()]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Router {
        let mut router = Router::new();
        router.add_table(TableConfig::hash(
            "sbtest",
            "t1",
            "id",
            hash_segments("t1", &["backend0", "backend1"], 4),
        ));
        router.add_table(TableConfig::global("sbtest", "g", &["backend0", "backend1"]));
        router
    }

    #[test]
    fn index_is_stable_and_in_range() {
        let router = fixture();
        let a = router.get_index("sbtest", "t1", &KeyValue::Integer(42)).unwrap();
        let b = router.get_index("sbtest", "t1", &KeyValue::Integer(42)).unwrap();
        assert_eq!(a, b);
        assert!(a < 4);
    }

    #[test]
    fn distinct_key_kinds_hash() {
        let router = fixture();
        for key in [
            KeyValue::Integer(1),
            KeyValue::Float(0.3333),
            KeyValue::String("xx".to_string()),
        ] {
            assert!(router.get_index("sbtest", "t1", &key).unwrap() < 4);
        }
    }

    #[test]
    fn global_table_has_no_shard_key() {
        let router = fixture();
        assert_eq!(router.shard_key("sbtest", "g").unwrap(), None);
        assert_eq!(router.shard_count("sbtest", "g").unwrap(), 0);
        assert!(matches!(
            router.get_index("sbtest", "g", &KeyValue::Integer(1)),
            Err(RouterError::NoShardKey { .. })
        ));
    }

    #[test]
    fn unknown_table_errors() {
        let router = fixture();
        assert!(matches!(
            router.get_index("sbtest", "t9", &KeyValue::Integer(1)),
            Err(RouterError::TableNotFound { .. })
        ));
    }

    #[test]
    fn segments_are_round_robin() {
        let segments = hash_segments("t1", &["backend0", "backend1"], 4);
        assert_eq!(segments[0].table, "t1_0000");
        assert_eq!(segments[0].backend, "backend0");
        assert_eq!(segments[1].backend, "backend1");
        assert_eq!(segments[2].backend, "backend0");
        assert_eq!(segments[3].table, "t1_0003");
    }
}
