//! Quilt Router
//!
//! This crate is the route oracle of the Quilt proxy: it knows, for every
//! logical table, how that table is partitioned across backends, and it
//! resolves a sharding-key literal to the index of the partition holding it.
//!
//! # Overview
//!
//! - [`config`] - Partition rules and the serde schema document
//! - [`router`] - The [`Router`] lookup API consumed by the planner
//! - [`error`] - Error types
//!
//! # Quick Start
//!
//! ```
//! use quilt_router::{hash_segments, KeyValue, Router, TableConfig};
//!
//! let mut router = Router::new();
//! router.add_table(TableConfig::hash(
//!     "sbtest",
//!     "t1",
//!     "id",
//!     hash_segments("t1", &["backend0", "backend1"], 4),
//! ));
//!
//! let index = router.get_index("sbtest", "t1", &KeyValue::Integer(42)).unwrap();
//! assert!(index < 4);
//! ```

pub mod config;
pub mod error;
pub mod router;

pub use config::{Partition, SchemaConfig, Segment, TableConfig};
pub use error::{RouterError, RouterResult};
pub use router::{hash_segments, KeyValue, Router};
