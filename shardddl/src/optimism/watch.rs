use futures::StreamExt;
use shardddl_config::shared::CoordinationConfig;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{CoordError, CoordResult};
use crate::keys::SHARD_DDL_OPTIMISM_OPERATION;
use crate::metrics::{
    ERROR_KIND_LABEL, SHARDDDL_WATCH_ERRORS_TOTAL, SHARDDDL_WATCH_EVENTS_TOTAL, TASK_LABEL,
};
use crate::optimism::operation::{Operation, OperationFilter};
use crate::store::{EventType, KvStore, StoreClient, WatchEvent};

/// Channel pair receiving the operations of a watch.
pub type OperationChannel = (mpsc::Sender<Operation>, mpsc::Receiver<Operation>);

/// Channel pair receiving the errors of a watch.
pub type ErrorChannel = (mpsc::Sender<CoordError>, mpsc::Receiver<CoordError>);

/// Creates the bounded result and error channels for a watch, sized by `watch_buffer_size`.
pub fn watch_channels(config: &CoordinationConfig) -> (OperationChannel, ErrorChannel) {
    let capacity = config.watch_buffer_size.max(1);
    (mpsc::channel(capacity), mpsc::channel(capacity))
}

/// Streams every put of an operation matching `filter` from `revision` onwards.
///
/// Operations are sent to `out_tx` in revision order with [`Operation::revision`] set to the
/// revision of their write. Deletes are not delivered.
///
/// Delivery applies backpressure: each send waits for room in the channel, so a slow consumer
/// slows the watch down instead of losing events. The wait is raced against `shutdown_rx`, which
/// always stops the watch promptly.
///
/// Failures are sent to `err_tx` instead of being returned. A payload that cannot be decoded
/// only affects its own event and the watch continues. Compaction of `revision` or a failure
/// of the underlying stream ends the watch; resubscribing is up to the caller.
///
/// Returns when `shutdown_rx` fires, when the stream ends or fails, or when a receiver has been
/// dropped. The channels are never closed here: the caller owns them.
pub async fn watch_operation_put<S>(
    client: &StoreClient<S>,
    filter: &OperationFilter,
    revision: i64,
    out_tx: mpsc::Sender<Operation>,
    err_tx: mpsc::Sender<CoordError>,
    mut shutdown_rx: ShutdownRx,
) where
    S: KvStore,
{
    let prefix = match filter.prefix(client.root()) {
        Ok(prefix) => prefix,
        Err(err) => {
            deliver_error(&err_tx, err, &mut shutdown_rx).await;
            return;
        }
    };

    let mut stream = tokio::select! {
        biased;
        _ = shutdown_rx.wait() => return,
        result = client.watch(&prefix, revision) => match result {
            Ok(stream) => stream,
            Err(err) => {
                deliver_error(&err_tx, err, &mut shutdown_rx).await;
                return;
            }
        },
    };

    info!(?filter, revision, "started watching operations");

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown_rx.wait() => {
                info!(?filter, "operation watch shut down");
                return;
            }
            next = stream.next() => next,
        };

        let events = match next {
            Some(Ok(events)) => events,
            Some(Err(err)) => {
                error!(?filter, error = %err, "operation watch failed");
                deliver_error(&err_tx, err, &mut shutdown_rx).await;
                return;
            }
            None => {
                info!(?filter, "operation watch stream ended");
                return;
            }
        };

        for event in events {
            let delivered = match decode_event(client.root(), filter, &event) {
                Ok(Some(op)) => deliver_operation(&out_tx, op, &mut shutdown_rx).await,
                Ok(None) => true,
                Err(err) => {
                    error!(key = %event.kv.key, error = %err, "failed to decode watched operation");
                    deliver_error(&err_tx, err, &mut shutdown_rx).await
                }
            };

            if !delivered {
                debug!(?filter, "operation watch stopped during delivery");
                return;
            }
        }
    }
}

/// Turns a watch event into an operation, or `None` if the event is not a matching put.
fn decode_event(
    root: &str,
    filter: &OperationFilter,
    event: &WatchEvent,
) -> CoordResult<Option<Operation>> {
    if event.event_type != EventType::Put {
        return Ok(None);
    }

    let segments = SHARD_DDL_OPTIMISM_OPERATION.decode(root, &event.kv.key)?;
    if !filter.matches(&segments) {
        return Ok(None);
    }

    let mut op = Operation::from_json(&event.kv.value)?;
    op.revision = event.kv.mod_revision;

    Ok(Some(op))
}

/// Sends `op`, returning `false` if the watch has to stop.
async fn deliver_operation(
    out_tx: &mpsc::Sender<Operation>,
    op: Operation,
    shutdown_rx: &mut ShutdownRx,
) -> bool {
    let task = op.task.clone();

    let sent = tokio::select! {
        biased;
        _ = shutdown_rx.wait() => false,
        result = out_tx.send(op) => result.is_ok(),
    };

    if sent {
        metrics::counter!(SHARDDDL_WATCH_EVENTS_TOTAL, TASK_LABEL => task).increment(1);
    }

    sent
}

/// Sends `err`, returning `false` if the watch has to stop.
async fn deliver_error(
    err_tx: &mpsc::Sender<CoordError>,
    err: CoordError,
    shutdown_rx: &mut ShutdownRx,
) -> bool {
    metrics::counter!(
        SHARDDDL_WATCH_ERRORS_TOTAL,
        ERROR_KIND_LABEL => format!("{:?}", err.kind())
    )
    .increment(1);

    tokio::select! {
        biased;
        _ = shutdown_rx.wait() => false,
        result = err_tx.send(err) => result.is_ok(),
    }
}
