//! Concurrency utilities for coordination workers.
//!
//! The [`shutdown`] module provides the cancellation signal that bounds long running calls such
//! as watches. A fired signal stops every subscriber at its next await point.

pub mod shutdown;
