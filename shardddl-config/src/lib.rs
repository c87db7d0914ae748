//! Configuration for processes taking part in shard DDL coordination.
//!
//! Holds the serde types shared between the coordination core and the processes hosting it,
//! plus a layered loader reading `configuration/` files and `APP_`-prefixed environment
//! variables.

pub mod environment;
pub mod load;
pub mod shared;

pub use load::{Config, LoadConfigError, load_config, load_config_from};
