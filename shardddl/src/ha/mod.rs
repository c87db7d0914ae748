//! Binding of workers to upstream sources.
//!
//! A source's full configuration is stored under its id. A worker that relays for a source is
//! bound to it by storing the source id under the worker's name. Looking up the relay
//! configuration of a worker follows both keys.

pub mod relay;
pub mod source;

pub use relay::{delete_relay_config, get_relay_config, put_relay_config};
pub use source::{delete_source_cfg, get_source_cfg, put_source_cfg};
