use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::coord_error;
use crate::error::{CoordResult, ErrorKind};
use crate::store::{GetResponse, KvStore, Txn, TxnResponse, WatchStream};

/// A [`KvStore`] wrapper failing the first requests with a chosen error kind.
///
/// Every request counts, whatever its type. Once `failures` requests have failed, requests are
/// passed to the wrapped store.
#[derive(Debug, Clone)]
pub struct FaultInjectingStore<S> {
    inner: S,
    kind: ErrorKind,
    failures: usize,
    injected: Arc<AtomicUsize>,
}

impl<S> FaultInjectingStore<S>
where
    S: KvStore,
{
    pub fn new(inner: S, kind: ErrorKind, failures: usize) -> Self {
        Self {
            inner,
            kind,
            failures,
            injected: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns how many requests have been failed so far.
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, request: &'static str) -> CoordResult<()> {
        let failures = self.failures;
        let injected = self
            .injected
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |injected| {
                (injected < failures).then_some(injected + 1)
            });

        match injected {
            Ok(previous) => Err(coord_error!(
                self.kind,
                "Injected store failure",
                format!("{request} request failed on purpose ({} of {failures})", previous + 1)
            )),
            Err(_) => Ok(()),
        }
    }
}

impl<S> KvStore for FaultInjectingStore<S>
where
    S: KvStore,
{
    async fn get(&self, key: &str) -> CoordResult<GetResponse> {
        self.maybe_fail("get")?;
        self.inner.get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> CoordResult<GetResponse> {
        self.maybe_fail("get_prefix")?;
        self.inner.get_prefix(prefix).await
    }

    async fn txn(&self, txn: Txn) -> CoordResult<TxnResponse> {
        self.maybe_fail("txn")?;
        self.inner.txn(txn).await
    }

    async fn watch(&self, prefix: &str, start_revision: i64) -> CoordResult<WatchStream> {
        self.maybe_fail("watch")?;
        self.inner.watch(prefix, start_revision).await
    }

    async fn compact(&self, revision: i64) -> CoordResult<()> {
        self.maybe_fail("compact")?;
        self.inner.compact(revision).await
    }
}
