use std::future::Future;

use futures::stream::BoxStream;

use crate::error::CoordResult;
use crate::store::txn::{Txn, TxnResponse};

/// A stored entry together with its revision metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    /// Revision at which the key was created. Reset when the key is deleted and put again.
    pub create_revision: i64,
    /// Revision of the last write to the key.
    pub mod_revision: i64,
    /// Number of writes since the key was created.
    pub version: i64,
}

/// Entries returned by a point or prefix read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    /// Matching entries in key order.
    pub kvs: Vec<KeyValue>,
    /// Store revision at which the read was served.
    pub revision: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Put,
    Delete,
}

/// A change observed by a watch.
///
/// For deletes, `kv` carries the key and the deletion revision in `mod_revision` with an empty
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub kv: KeyValue,
}

/// Stream of watch events grouped by store revision.
///
/// Each item holds every matching event of one revision. An error item is terminal.
pub type WatchStream = BoxStream<'static, CoordResult<Vec<WatchEvent>>>;

/// A linearizable, revisioned key-value store with atomic transactions and historical watches.
///
/// Every mutation advances a single global revision, and all writes of one transaction share
/// the revision they were committed at.
pub trait KvStore: Clone + Send + Sync + 'static {
    /// Reads a single key.
    fn get(&self, key: &str) -> impl Future<Output = CoordResult<GetResponse>> + Send;

    /// Reads every key starting with `prefix` from one consistent snapshot.
    fn get_prefix(&self, prefix: &str) -> impl Future<Output = CoordResult<GetResponse>> + Send;

    /// Runs a transaction atomically.
    fn txn(&self, txn: Txn) -> impl Future<Output = CoordResult<TxnResponse>> + Send;

    /// Opens a watch over every key starting with `prefix`.
    ///
    /// Events are delivered from `start_revision` inclusive. A `start_revision` of `0` starts
    /// after the current revision.
    fn watch(
        &self,
        prefix: &str,
        start_revision: i64,
    ) -> impl Future<Output = CoordResult<WatchStream>> + Send;

    /// Discards history below `revision`.
    fn compact(&self, revision: i64) -> impl Future<Output = CoordResult<()>> + Send;
}
