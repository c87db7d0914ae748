use std::sync::Arc;
use std::time::Duration;

use shardddl::concurrency::shutdown::create_shutdown_channel;
use shardddl::error::ErrorKind;
use shardddl::optimism::{
    OperationFilter, delete_operations, put_operation, watch_channels, watch_operation_put,
};
use shardddl::store::{MemoryStore, StoreClient};
use shardddl::test_utils::notify::TimedNotify;
use shardddl::test_utils::operation::{collect_watch, pending_operation};
use shardddl_config::shared::CoordinationConfig;
use shardddl_telemetry::init_test_tracing;
use tokio::sync::Notify;

const WATCH_DEADLINE: Duration = Duration::from_millis(500);

fn new_client() -> StoreClient<MemoryStore> {
    StoreClient::new(MemoryStore::new(), CoordinationConfig::default()).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_delivers_live_puts_in_revision_order() {
    init_test_tracing();

    let client = new_client();
    let ((out_tx, mut out_rx), (err_tx, _err_rx)) = watch_channels(client.config());
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let start_revision = client.store().revision().await + 1;

    let watch = tokio::spawn({
        let client = client.clone();
        async move {
            watch_operation_put(
                &client,
                &OperationFilter::new("task", "", "", ""),
                start_revision,
                out_tx,
                err_tx,
                shutdown_rx,
            )
            .await
        }
    });

    let notify = TimedNotify::new(Arc::new(Notify::new()));
    let consumer = tokio::spawn({
        let notify = notify.clone();
        async move {
            let mut received = Vec::new();
            while let Some(op) = out_rx.recv().await {
                received.push(op);
                if received.len() == 3 {
                    notify.inner().notify_one();
                }
            }
            received
        }
    });

    let mut revisions = Vec::new();
    for table in ["t1", "t2", "t3"] {
        let op = pending_operation("id", "task", "source", "db", table);
        let (rev, _) = put_operation(&client, false, &op, 0).await.unwrap();
        revisions.push(rev);

        // Writes of other tasks and deletes are not delivered.
        let other = pending_operation("id", "other", "source", "db", table);
        put_operation(&client, false, &other, 0).await.unwrap();
        delete_operations(&client, &[other]).await.unwrap();
    }

    notify.notified().await;
    shutdown_tx.shutdown();
    watch.await.unwrap();

    let received = consumer.await.unwrap();
    let tables: Vec<_> = received.iter().map(|op| op.up_table.as_str()).collect();
    let received_revisions: Vec<_> = received.iter().map(|op| op.revision).collect();
    assert_eq!(tables, vec!["t1", "t2", "t3"]);
    assert_eq!(received_revisions, revisions);
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_from_snapshot_revision_continues_without_gaps() {
    init_test_tracing();

    let client = new_client();
    let first = pending_operation("id", "task", "s1", "db", "tbl");
    let second = pending_operation("id", "task", "s2", "db", "tbl");

    put_operation(&client, false, &first, 0).await.unwrap();
    let (_, snapshot_rev) = shardddl::optimism::get_all_operations(&client)
        .await
        .unwrap();
    let (second_rev, _) = put_operation(&client, false, &second, 0).await.unwrap();

    let (ops, errors) = collect_watch(
        &client,
        &OperationFilter::all(),
        snapshot_rev + 1,
        WATCH_DEADLINE,
    )
    .await;

    assert!(errors.is_empty());
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].source, "s2");
    assert_eq!(ops[0].revision, second_rev);
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_of_compacted_revision_reports_error() {
    init_test_tracing();

    let mut config = CoordinationConfig::default();
    config.history_retention = 1;
    let client = StoreClient::new(
        MemoryStore::with_history_retention(config.history_retention),
        config,
    )
    .unwrap();

    for table in ["t1", "t2", "t3"] {
        let op = pending_operation("id", "task", "source", "db", table);
        put_operation(&client, false, &op, 0).await.unwrap();
    }

    let (ops, errors) = collect_watch(&client, &OperationFilter::all(), 2, WATCH_DEADLINE).await;

    assert!(ops.is_empty());
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::WatchCompacted);
}
