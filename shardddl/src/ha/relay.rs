use shardddl_config::shared::SourceConfig;
use tracing::{debug, warn};

use crate::bail;
use crate::error::{CoordResult, ErrorKind};
use crate::keys::{RELAY_CONFIG, UPSTREAM_CONFIG};
use crate::store::{Compare, CompareOp, KvStore, StoreClient, Txn, TxnOp, calculate_backoff};

/// Binds `worker` to relay for `source`, returning the revision of the write.
pub async fn put_relay_config<S>(
    client: &StoreClient<S>,
    source: &str,
    worker: &str,
) -> CoordResult<i64>
where
    S: KvStore,
{
    let key = RELAY_CONFIG.encode(client.root(), &[worker])?;

    let response = client
        .txn(Txn::new().and_then([TxnOp::put(key, source)]))
        .await?;

    debug!(worker, source, revision = response.revision, "bound worker to relay source");

    Ok(response.revision)
}

/// Removes the relay binding of `worker`, returning the store revision afterwards.
pub async fn delete_relay_config<S>(client: &StoreClient<S>, worker: &str) -> CoordResult<i64>
where
    S: KvStore,
{
    let key = RELAY_CONFIG.encode(client.root(), &[worker])?;

    let response = client.txn(Txn::new().and_then([TxnOp::delete(key)])).await?;

    debug!(worker, revision = response.revision, "removed relay binding");

    Ok(response.revision)
}

/// Returns the configuration of the source `worker` relays for.
///
/// - An unbound worker yields no configuration together with the current store revision.
/// - A bound worker whose source has no stored configuration is an
///   [`ErrorKind::SourceConfigNotFound`] error, since the two keys disagree.
/// - Otherwise the configuration is returned with the revision of its own last write.
///
/// The configuration is read in a transaction guarded on the binding being unchanged since it
/// was read, so the result never mixes a stale binding with a newer configuration. A binding
/// that changes in between is read again, up to `txn_retry.max_attempts` times.
pub async fn get_relay_config<S>(
    client: &StoreClient<S>,
    worker: &str,
) -> CoordResult<(Option<SourceConfig>, i64)>
where
    S: KvStore,
{
    let relay_key = RELAY_CONFIG.encode(client.root(), &[worker])?;
    let retry = &client.config().txn_retry;

    for attempt in 1..=retry.max_attempts {
        let binding = client.get(&relay_key).await?;
        let Some(relay_kv) = binding.kvs.first() else {
            return Ok((None, binding.revision));
        };

        let source = relay_kv.value.as_str();
        let config_key = UPSTREAM_CONFIG.encode(client.root(), &[source])?;

        let txn = Txn::new()
            .when([Compare::mod_revision(
                &relay_key,
                CompareOp::Equal,
                relay_kv.mod_revision,
            )])
            .and_then([TxnOp::get(config_key)]);
        let response = client.txn(txn).await?;

        if !response.succeeded {
            if attempt < retry.max_attempts {
                let delay = calculate_backoff(retry, attempt);
                warn!(worker, attempt, ?delay, "relay binding changed while reading, retrying");
                tokio::time::sleep(delay).await;
            }
            continue;
        }

        let Some(config_kv) = response.get_response(0).and_then(|kvs| kvs.first()) else {
            bail!(
                ErrorKind::SourceConfigNotFound,
                "Relay source has no stored configuration",
                format!(
                    "worker {worker} has relay source {source}, but doesn't have related source config in etcd"
                )
            );
        };

        let config: SourceConfig = serde_json::from_str(&config_kv.value)?;

        return Ok((Some(config), config_kv.mod_revision));
    }

    bail!(
        ErrorKind::TxnConflict,
        "Relay binding kept changing concurrently",
        format!(
            "gave up reading relay config of worker {worker} after {} attempts",
            retry.max_attempts
        )
    );
}
