//! Shared configuration types for shard DDL coordination processes.

mod base;
mod coordination;
mod source;

pub use base::ValidationError;
pub use coordination::{CoordinationConfig, TxnRetryConfig};
pub use source::{SourceConfig, SourceFlavor, UpstreamDbConfig};
