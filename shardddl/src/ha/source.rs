use shardddl_config::shared::SourceConfig;
use tracing::debug;

use crate::error::CoordResult;
use crate::keys::UPSTREAM_CONFIG;
use crate::store::{KvStore, StoreClient, Txn, TxnOp};

/// Stores the configuration of a source, returning the revision of the write.
pub async fn put_source_cfg<S>(client: &StoreClient<S>, config: &SourceConfig) -> CoordResult<i64>
where
    S: KvStore,
{
    config.validate()?;

    let key = UPSTREAM_CONFIG.encode(client.root(), &[&config.source_id])?;
    let value = serde_json::to_string(config)?;

    let response = client
        .txn(Txn::new().and_then([TxnOp::put(key, value)]))
        .await?;

    debug!(source = %config.source_id, revision = response.revision, "put source config");

    Ok(response.revision)
}

/// Reads the configuration of a source, returning it with the store revision of the read.
pub async fn get_source_cfg<S>(
    client: &StoreClient<S>,
    source: &str,
) -> CoordResult<(Option<SourceConfig>, i64)>
where
    S: KvStore,
{
    let key = UPSTREAM_CONFIG.encode(client.root(), &[source])?;
    let response = client.get(&key).await?;

    let config = match response.kvs.first() {
        Some(kv) => Some(serde_json::from_str(&kv.value)?),
        None => None,
    };

    Ok((config, response.revision))
}

/// Deletes the configuration of a source, returning the store revision afterwards.
pub async fn delete_source_cfg<S>(client: &StoreClient<S>, source: &str) -> CoordResult<i64>
where
    S: KvStore,
{
    let key = UPSTREAM_CONFIG.encode(client.root(), &[source])?;

    let response = client.txn(Txn::new().and_then([TxnOp::delete(key)])).await?;

    debug!(source, revision = response.revision, "deleted source config");

    Ok(response.revision)
}
