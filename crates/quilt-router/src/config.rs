//! Partition rules and the schema config document.
//!
//! A [`TableConfig`] describes how one logical table is laid out across
//! backends; a [`SchemaConfig`] is the serde document listing them, loaded by
//! the CLI and by tests.

use serde::{Deserialize, Serialize};

/// One physical partition of a logical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// The partition table name on the backend (e.g. `t1_0002`).
    pub table: String,
    /// The backend hosting this partition.
    pub backend: String,
}

impl Segment {
    /// Creates a new segment.
    pub fn new(table: impl Into<String>, backend: impl Into<String>) -> Self {
        Self { table: table.into(), backend: backend.into() }
    }
}

/// How a logical table is partitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Partition {
    /// Rows are placed by hashing the shard-key value over the segment list.
    Hash {
        /// The sharding column.
        shard_key: String,
        /// The partitions, in index order.
        segments: Vec<Segment>,
    },
    /// The table is replicated to every backend; no shard key.
    Global {
        /// One segment per backend, all with the original table name.
        segments: Vec<Segment>,
    },
}

impl Partition {
    /// Returns the shard key, or `None` for global tables.
    #[must_use]
    pub fn shard_key(&self) -> Option<&str> {
        match self {
            Self::Hash { shard_key, .. } => Some(shard_key),
            Self::Global { .. } => None,
        }
    }

    /// Returns the segment list.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        match self {
            Self::Hash { segments, .. } | Self::Global { segments } => segments,
        }
    }
}

/// The partition rule for one logical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// The logical database name.
    pub database: String,
    /// The logical table name.
    pub table: String,
    /// The partition rule.
    #[serde(flatten)]
    pub partition: Partition,
}

impl TableConfig {
    /// Creates a hash-partitioned table config.
    pub fn hash(
        database: impl Into<String>,
        table: impl Into<String>,
        shard_key: impl Into<String>,
        segments: Vec<Segment>,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            partition: Partition::Hash { shard_key: shard_key.into(), segments },
        }
    }

    /// Creates a global (replicated) table config.
    pub fn global(
        database: impl Into<String>,
        table: impl Into<String>,
        backends: &[&str],
    ) -> Self {
        let table = table.into();
        let segments = backends.iter().map(|b| Segment::new(table.clone(), *b)).collect();
        Self { database: database.into(), table, partition: Partition::Global { segments } }
    }
}

/// A schema document: the partition rules for every routed table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// The table configs.
    pub tables: Vec<TableConfig>,
}

impl SchemaConfig {
    /// Parses a schema config from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON for this schema.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Renders the schema config as pretty-printed JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trip() {
        let cfg = SchemaConfig {
            tables: vec![
                TableConfig::hash(
                    "sbtest",
                    "t1",
                    "id",
                    vec![Segment::new("t1_0000", "backend0"), Segment::new("t1_0001", "backend1")],
                ),
                TableConfig::global("sbtest", "g", &["backend0", "backend1"]),
            ],
        };
        let parsed = SchemaConfig::from_json(&cfg.to_json()).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn parse_hash_table_json() {
        let json = r#"{
            "tables": [{
                "database": "sbtest",
                "table": "t1",
                "method": "hash",
                "shard_key": "id",
                "segments": [{"table": "t1_0000", "backend": "backend0"}]
            }]
        }"#;
        let cfg = SchemaConfig::from_json(json).unwrap();
        assert_eq!(cfg.tables.len(), 1);
        assert_eq!(cfg.tables[0].partition.shard_key(), Some("id"));
    }
}
