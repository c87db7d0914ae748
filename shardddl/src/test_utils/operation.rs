use std::time::Duration;

use crate::concurrency::shutdown::create_shutdown_channel;
use crate::error::CoordError;
use crate::optimism::{ConflictStage, Operation, OperationFilter, watch_channels, watch_operation_put};
use crate::store::{KvStore, StoreClient};

/// Returns an operation with one pending DDL and no conflict.
pub fn pending_operation(
    id: &str,
    task: &str,
    source: &str,
    up_schema: &str,
    up_table: &str,
) -> Operation {
    Operation::new(
        id,
        task,
        source,
        up_schema,
        up_table,
        vec![format!("ALTER TABLE {up_table} ADD COLUMN c1 INT")],
        ConflictStage::None,
        "",
        false,
        Vec::new(),
    )
}

/// Returns the same operation marked as done.
pub fn done_operation(op: &Operation) -> Operation {
    Operation {
        done: true,
        revision: 0,
        ..op.clone()
    }
}

/// Runs a watch for `deadline` and returns everything it delivered.
///
/// Results are drained while the watch runs, so the deadline rather than the channel capacity
/// bounds what is collected.
pub async fn collect_watch<S>(
    client: &StoreClient<S>,
    filter: &OperationFilter,
    revision: i64,
    deadline: Duration,
) -> (Vec<Operation>, Vec<CoordError>)
where
    S: KvStore,
{
    let ((out_tx, mut out_rx), (err_tx, mut err_rx)) = watch_channels(client.config());
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let deadline = shutdown_tx.shutdown_after(deadline);

    let watch = watch_operation_put(client, filter, revision, out_tx, err_tx, shutdown_rx);
    let collect = async {
        let mut ops = Vec::new();
        while let Some(op) = out_rx.recv().await {
            ops.push(op);
        }
        ops
    };

    let ((), ops) = tokio::join!(watch, collect);
    deadline.abort();

    let mut errors = Vec::new();
    while let Ok(err) = err_rx.try_recv() {
        errors.push(err);
    }

    (ops, errors)
}
