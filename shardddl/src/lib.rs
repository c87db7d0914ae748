//! Coordination layer for sharded DDL migration.
//!
//! Workers record each source's pending DDL as an [`optimism::Operation`] in a revisioned
//! key-value store, read the full set back to rebuild state, follow subsequent writes through a
//! filtered watch and delete operations once a round completes. The [`ha`] module binds workers
//! to upstream sources and their configuration.

pub mod concurrency;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod ha;
pub mod keys;
mod macros;
pub mod metrics;
pub mod optimism;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
