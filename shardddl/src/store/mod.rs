//! Coordination store abstraction.
//!
//! [`KvStore`] models a linearizable, revisioned key-value store with compare-and-swap
//! transactions and watches that can start at any retained historical revision.
//! [`MemoryStore`] implements it in process and [`StoreClient`] wraps any implementation with
//! request deadlines and retries.

mod base;
mod client;
mod memory;
mod txn;

pub use base::{EventType, GetResponse, KeyValue, KvStore, WatchEvent, WatchStream};
pub use client::{StoreClient, calculate_backoff};
pub use memory::MemoryStore;
pub use txn::{Compare, CompareOp, CompareTarget, Txn, TxnOp, TxnOpResponse, TxnResponse};
