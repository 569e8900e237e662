//! Error types for route resolution.

use thiserror::Error;

/// Errors that can occur while resolving routes.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The table has no registered partition rule.
    #[error("router: table '{database}.{table}' not found")]
    TableNotFound {
        /// The logical database name.
        database: String,
        /// The logical table name.
        table: String,
    },

    /// The table's partition rule lists no segments.
    #[error("router: table '{database}.{table}' has no segments")]
    EmptySegments {
        /// The logical database name.
        database: String,
        /// The logical table name.
        table: String,
    },

    /// A shard index was requested for a table without a shard key.
    #[error("router: table '{database}.{table}' has no shard key")]
    NoShardKey {
        /// The logical database name.
        database: String,
        /// The logical table name.
        table: String,
    },

    /// The literal cannot be hashed into a shard index.
    #[error("router: cannot compute shard index from value '{0}'")]
    UnhashableKey(String),

    /// A schema config document failed to deserialize.
    #[error("router: config: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_not_found_display() {
        let err = RouterError::TableNotFound {
            database: "sbtest".to_string(),
            table: "t9".to_string(),
        };
        assert_eq!(err.to_string(), "router: table 'sbtest.t9' not found");
    }
}
