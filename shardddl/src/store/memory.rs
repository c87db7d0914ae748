use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound::{Included, Unbounded};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use shardddl_config::shared::CoordinationConfig;
use tokio::sync::{Mutex, watch};
use tracing::debug;

use crate::bail;
use crate::coord_error;
use crate::error::{CoordResult, ErrorKind};
use crate::store::base::{EventType, GetResponse, KeyValue, KvStore, WatchEvent, WatchStream};
use crate::store::txn::{Txn, TxnOp, TxnOpResponse, TxnResponse};

/// Inner state of [`MemoryStore`].
#[derive(Debug)]
struct Inner {
    /// Current store revision. Starts at `1` for an empty store.
    revision: i64,
    /// Lowest revision still present in `history`. Watches below it fail.
    compact_revision: i64,
    /// Live entries in key order.
    kvs: BTreeMap<String, KeyValue>,
    /// Every change since `compact_revision`, ordered by revision.
    history: VecDeque<WatchEvent>,
    /// Maximum number of events kept in `history`; `0` keeps everything.
    history_retention: usize,
}

impl Inner {
    fn range(&self, key: &str, prefix: bool) -> Vec<KeyValue> {
        if !prefix {
            return self.kvs.get(key).cloned().into_iter().collect();
        }

        self.kvs
            .range::<str, _>((Included(key), Unbounded))
            .take_while(|(k, _)| k.starts_with(key))
            .map(|(_, kv)| kv.clone())
            .collect()
    }

    fn keys_in(&self, key: &str, prefix: bool) -> Vec<String> {
        if !prefix {
            return self.kvs.get_key_value(key).map(|(k, _)| k.clone()).into_iter().collect();
        }

        self.kvs
            .range::<str, _>((Included(key), Unbounded))
            .take_while(|(k, _)| k.starts_with(key))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drops whole revisions from the front of the history until it fits the retention.
    fn enforce_retention(&mut self) {
        if self.history_retention == 0 {
            return;
        }

        while self.history.len() > self.history_retention {
            let Some(oldest) = self.history.front().map(|e| e.kv.mod_revision) else {
                break;
            };

            while self
                .history
                .front()
                .is_some_and(|e| e.kv.mod_revision == oldest)
            {
                self.history.pop_front();
            }

            self.compact_revision = oldest + 1;
        }
    }
}

/// In-memory coordination store.
///
/// [`MemoryStore`] implements [`KvStore`] with the same revision, compare and watch semantics
/// as the external store, which makes it suitable for tests and single-process deployments.
/// All clones share the same data. Data is lost on process restart.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    /// Signals the latest committed revision to open watches.
    revision_tx: Arc<watch::Sender<i64>>,
}

impl MemoryStore {
    /// Creates a new empty store at revision `1` keeping the whole history.
    ///
    /// The history is never compacted automatically; use [`MemoryStore::from_config`] to bound it.
    pub fn new() -> Self {
        Self::with_history_retention(0)
    }

    /// Creates a new empty store retaining `config.history_retention` events.
    pub fn from_config(config: &CoordinationConfig) -> Self {
        Self::with_history_retention(config.history_retention)
    }

    /// Creates a new empty store that keeps at most `history_retention` events for watches.
    pub fn with_history_retention(history_retention: usize) -> Self {
        let inner = Inner {
            revision: 1,
            compact_revision: 0,
            kvs: BTreeMap::new(),
            history: VecDeque::new(),
            history_retention,
        };
        let (revision_tx, _) = watch::channel(1);

        Self {
            inner: Arc::new(Mutex::new(inner)),
            revision_tx: Arc::new(revision_tx),
        }
    }

    /// Returns the current store revision.
    pub async fn revision(&self) -> i64 {
        self.inner.lock().await.revision
    }

    /// Returns the revision below which history has been discarded.
    pub async fn compact_revision(&self) -> i64 {
        self.inner.lock().await.compact_revision
    }

    fn watch_stream(&self, prefix: String, start_revision: i64) -> WatchStream {
        struct State {
            store: MemoryStore,
            prefix: String,
            next_revision: i64,
            revision_rx: watch::Receiver<i64>,
            finished: bool,
        }

        let state = State {
            store: self.clone(),
            prefix,
            next_revision: start_revision,
            revision_rx: self.revision_tx.subscribe(),
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if state.finished {
                    return None;
                }

                // Marks the current revision as seen before scanning, so that a commit racing
                // with the scan still wakes the wait below.
                let _ = state.revision_rx.borrow_and_update();

                let item = {
                    let inner = state.store.inner.lock().await;

                    if state.next_revision < inner.compact_revision {
                        Some(Err(coord_error!(
                            ErrorKind::WatchCompacted,
                            "Watch start revision has been compacted",
                            format!(
                                "requested revision {} is below compact revision {}",
                                state.next_revision, inner.compact_revision
                            )
                        )))
                    } else {
                        let start = inner
                            .history
                            .partition_point(|e| e.kv.mod_revision < state.next_revision);

                        let mut batch: Vec<WatchEvent> = Vec::new();
                        for event in inner.history.range(start..) {
                            if let Some(first) = batch.first() {
                                if event.kv.mod_revision != first.kv.mod_revision {
                                    break;
                                }
                            }

                            if event.kv.key.starts_with(&state.prefix) {
                                batch.push(event.clone());
                            }
                        }

                        match batch.first().map(|e| e.kv.mod_revision) {
                            Some(revision) => {
                                state.next_revision = revision + 1;
                                Some(Ok(batch))
                            }
                            None => {
                                state.next_revision = state.next_revision.max(inner.revision + 1);
                                None
                            }
                        }
                    }
                };

                if let Some(item) = item {
                    state.finished = item.is_err();
                    return Some((item, state));
                }

                if state.revision_rx.changed().await.is_err() {
                    state.finished = true;
                    let err = coord_error!(ErrorKind::WatchClosed, "Store closed the watch");
                    return Some((Err(err), state));
                }
            }
        })
        .boxed()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> CoordResult<GetResponse> {
        let inner = self.inner.lock().await;

        Ok(GetResponse {
            kvs: inner.range(key, false),
            revision: inner.revision,
        })
    }

    async fn get_prefix(&self, prefix: &str) -> CoordResult<GetResponse> {
        let inner = self.inner.lock().await;

        Ok(GetResponse {
            kvs: inner.range(prefix, true),
            revision: inner.revision,
        })
    }

    async fn txn(&self, txn: Txn) -> CoordResult<TxnResponse> {
        let mut inner = self.inner.lock().await;

        let succeeded = txn
            .compares
            .iter()
            .all(|compare| compare.evaluate(inner.kvs.get(&compare.key)));
        let ops = if succeeded { txn.success } else { txn.failure };

        let commit_revision = inner.revision + 1;
        let mut events = Vec::new();
        let mut responses = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                TxnOp::Put { key, value } => {
                    let kv = match inner.kvs.get(&key) {
                        Some(existing) => KeyValue {
                            key: key.clone(),
                            value,
                            create_revision: existing.create_revision,
                            mod_revision: commit_revision,
                            version: existing.version + 1,
                        },
                        None => KeyValue {
                            key: key.clone(),
                            value,
                            create_revision: commit_revision,
                            mod_revision: commit_revision,
                            version: 1,
                        },
                    };

                    inner.kvs.insert(key, kv.clone());
                    events.push(WatchEvent {
                        event_type: EventType::Put,
                        kv,
                    });
                    responses.push(TxnOpResponse::Put);
                }
                TxnOp::Get { key, prefix } => {
                    responses.push(TxnOpResponse::Get(inner.range(&key, prefix)));
                }
                TxnOp::Delete { key, prefix } => {
                    let keys = inner.keys_in(&key, prefix);
                    for key in &keys {
                        inner.kvs.remove(key);
                        events.push(WatchEvent {
                            event_type: EventType::Delete,
                            kv: KeyValue {
                                key: key.clone(),
                                value: String::new(),
                                create_revision: 0,
                                mod_revision: commit_revision,
                                version: 0,
                            },
                        });
                    }
                    responses.push(TxnOpResponse::Delete {
                        deleted: keys.len(),
                    });
                }
            }
        }

        if !events.is_empty() {
            inner.revision = commit_revision;
            inner.history.extend(events);
            inner.enforce_retention();
            self.revision_tx.send_replace(commit_revision);

            debug!(revision = commit_revision, succeeded, "committed transaction");
        }

        Ok(TxnResponse {
            succeeded,
            revision: inner.revision,
            responses,
        })
    }

    async fn watch(&self, prefix: &str, start_revision: i64) -> CoordResult<WatchStream> {
        let start_revision = if start_revision <= 0 {
            self.inner.lock().await.revision + 1
        } else {
            start_revision
        };

        debug!(prefix, start_revision, "opening watch");

        Ok(self.watch_stream(prefix.to_string(), start_revision))
    }

    async fn compact(&self, revision: i64) -> CoordResult<()> {
        let mut inner = self.inner.lock().await;

        if revision > inner.revision {
            bail!(
                ErrorKind::InvalidState,
                "Cannot compact a future revision",
                format!(
                    "requested revision {revision} is above current revision {}",
                    inner.revision
                )
            );
        }

        if revision <= inner.compact_revision {
            return Ok(());
        }

        while inner
            .history
            .front()
            .is_some_and(|e| e.kv.mod_revision < revision)
        {
            inner.history.pop_front();
        }
        inner.compact_revision = revision;

        debug!(revision, "compacted history");

        Ok(())
    }
}
