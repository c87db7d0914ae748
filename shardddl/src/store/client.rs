use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use shardddl_config::shared::{CoordinationConfig, TxnRetryConfig};
use tracing::{debug, warn};

use crate::error::{CoordError, CoordResult, ErrorKind};
#[cfg(feature = "failpoints")]
use crate::failpoints::{STORE_CLIENT__BEFORE_REQUEST, coord_fail_point};
use crate::metrics::{ERROR_KIND_LABEL, REQUEST_LABEL, SHARDDDL_STORE_RETRIES_TOTAL};
use crate::store::base::{GetResponse, KvStore, WatchStream};
use crate::store::txn::{Txn, TxnResponse};

/// Calculates the delay before retry number `attempt` (1-based) with exponential backoff.
///
/// delay = initial_delay * multiplier^(attempt - 1), capped at the maximum delay, plus random
/// jitter of up to 30% so that workers losing the same race do not retry in lockstep.
pub fn calculate_backoff(config: &TxnRetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let multiplier = config.backoff_multiplier.powi(exponent);
    let base_delay_ms = config.initial_retry_delay_ms as f64 * multiplier;

    let capped_delay_ms = base_delay_ms.min(config.max_retry_delay_ms as f64);

    let jitter_factor = rand::thread_rng().gen_range(0.0..0.3);
    let jittered_delay_ms = capped_delay_ms * (1.0 + jitter_factor);

    Duration::from_millis(jittered_delay_ms as u64)
}

/// Handle to a [`KvStore`] applying the configured deadline and retry policy to every request.
///
/// Transient failures ([`ErrorKind::StoreUnavailable`], [`ErrorKind::StoreTimeout`]) are retried
/// with backoff up to `txn_retry.max_attempts`. [`ErrorKind::TxnConflict`] is returned as is,
/// since only the owner of a compare-and-swap loop can decide how to re-evaluate the write.
#[derive(Debug, Clone)]
pub struct StoreClient<S> {
    store: S,
    config: Arc<CoordinationConfig>,
}

impl<S> StoreClient<S>
where
    S: KvStore,
{
    /// Creates a new client after validating `config`.
    pub fn new(store: S, config: CoordinationConfig) -> CoordResult<Self> {
        config.validate()?;

        Ok(Self {
            store,
            config: Arc::new(config),
        })
    }

    /// Returns the configuration the client was created with.
    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    /// Returns the root prefix of every coordination key.
    pub fn root(&self) -> &str {
        &self.config.key_prefix
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn get(&self, key: &str) -> CoordResult<GetResponse> {
        self.request("get", || self.store.get(key)).await
    }

    pub async fn get_prefix(&self, prefix: &str) -> CoordResult<GetResponse> {
        self.request("get_prefix", || self.store.get_prefix(prefix))
            .await
    }

    pub async fn txn(&self, txn: Txn) -> CoordResult<TxnResponse> {
        self.request("txn", || self.store.txn(txn.clone())).await
    }

    /// Runs `txn` like [`StoreClient::txn`], also reporting whether an earlier attempt timed out.
    ///
    /// A timed-out attempt may still have committed, so a guarded transaction that fails after
    /// one can have failed against its own earlier write.
    pub async fn txn_after_timeouts(&self, txn: Txn) -> CoordResult<(TxnResponse, bool)> {
        self.request_tracking_timeouts("txn", || self.store.txn(txn.clone()))
            .await
    }

    pub async fn watch(&self, prefix: &str, start_revision: i64) -> CoordResult<WatchStream> {
        self.request("watch", || self.store.watch(prefix, start_revision))
            .await
    }

    pub async fn compact(&self, revision: i64) -> CoordResult<()> {
        self.request("compact", || self.store.compact(revision))
            .await
    }

    async fn request<T, F, Fut>(&self, request: &'static str, f: F) -> CoordResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CoordResult<T>>,
    {
        let (value, _) = self.request_tracking_timeouts(request, f).await?;
        Ok(value)
    }

    async fn request_tracking_timeouts<T, F, Fut>(
        &self,
        request: &'static str,
        f: F,
    ) -> CoordResult<(T, bool)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CoordResult<T>>,
    {
        let retry = &self.config.txn_retry;
        let mut attempt = 1;
        let mut timed_out = false;

        loop {
            let err = match self.attempt(&f).await {
                Ok(value) => return Ok((value, timed_out)),
                Err(err) => err,
            };
            timed_out |= err.kind() == ErrorKind::StoreTimeout;

            let retryable = err.kind().is_retryable() && err.kind() != ErrorKind::TxnConflict;
            if !retryable || attempt >= retry.max_attempts {
                debug!(request, attempt, error = %err, "store request failed");
                return Err(err);
            }

            let delay = calculate_backoff(retry, attempt);
            warn!(
                request,
                attempt,
                max_attempts = retry.max_attempts,
                ?delay,
                error_kind = ?err.kind(),
                "store request failed, retrying after backoff"
            );
            metrics::counter!(
                SHARDDDL_STORE_RETRIES_TOTAL,
                REQUEST_LABEL => request,
                ERROR_KIND_LABEL => format!("{:?}", err.kind())
            )
            .increment(1);

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt<T, F, Fut>(&self, f: &F) -> CoordResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CoordResult<T>>,
    {
        #[cfg(feature = "failpoints")]
        coord_fail_point(STORE_CLIENT__BEFORE_REQUEST)?;

        match tokio::time::timeout(self.config.request_timeout(), f()).await {
            Ok(result) => result,
            Err(elapsed) => Err(CoordError::from(elapsed)),
        }
    }
}
