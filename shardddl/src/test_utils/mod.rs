//! Utilities for testing coordination code.

pub mod fault;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod notify;
pub mod operation;
pub mod source;
