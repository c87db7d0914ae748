use shardddl::error::ErrorKind;
use shardddl::failpoints::{PUT_OPERATION__BEFORE_TXN, STORE_CLIENT__BEFORE_REQUEST};
use shardddl::optimism::{get_operation, put_operation};
use shardddl::store::{MemoryStore, StoreClient};
use shardddl::test_utils::failpoints::{FailAction, FailpointScenario};
use shardddl::test_utils::operation::{done_operation, pending_operation};
use shardddl_config::shared::CoordinationConfig;
use shardddl_telemetry::init_test_tracing;

fn new_client() -> StoreClient<MemoryStore> {
    let mut config = CoordinationConfig::default();
    config.txn_retry.initial_retry_delay_ms = 1;
    config.txn_retry.max_retry_delay_ms = 10;
    config.txn_retry.max_attempts = 3;
    StoreClient::new(MemoryStore::new(), config).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn retryable_store_failures_are_retried() {
    init_test_tracing();
    let _scenario =
        FailpointScenario::with(STORE_CLIENT__BEFORE_REQUEST, FailAction::RetryTimes(2));

    let client = new_client();
    let op = pending_operation("id", "task", "source", "db", "tbl");

    let (rev, applied) = put_operation(&client, false, &op, 0).await.unwrap();

    assert!(applied);
    assert_eq!(rev, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_give_up_after_max_attempts() {
    init_test_tracing();
    let _scenario = FailpointScenario::with(STORE_CLIENT__BEFORE_REQUEST, FailAction::Retry);

    let client = new_client();
    let op = pending_operation("id", "task", "source", "db", "tbl");

    let err = put_operation(&client, true, &op, 0).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WithRetry);
    assert_eq!(client.store().revision().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn non_retryable_store_failures_surface_immediately() {
    init_test_tracing();
    let _scenario =
        FailpointScenario::with(STORE_CLIENT__BEFORE_REQUEST, FailAction::NoRetryTimes(1));

    let client = new_client();
    let op = pending_operation("id", "task", "source", "db", "tbl");

    let err = put_operation(&client, false, &op, 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WithNoRetry);

    // The failpoint fired once, so the next call goes through.
    let (rev, applied) = put_operation(&client, false, &op, 0).await.unwrap();
    assert!(applied);
    assert_eq!(rev, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_before_skip_done_write_leaves_store_unchanged() {
    init_test_tracing();
    let mut scenario = FailpointScenario::setup();

    let client = new_client();
    let op = pending_operation("id", "task", "source", "db", "tbl");
    let (rev, _) = put_operation(&client, false, &op, 0).await.unwrap();

    scenario.set(PUT_OPERATION__BEFORE_TXN, FailAction::NoRetry);
    let err = put_operation(&client, true, &done_operation(&op), 0)
        .await
        .unwrap_err();
    scenario.set(PUT_OPERATION__BEFORE_TXN, FailAction::Off);

    assert_eq!(err.kind(), ErrorKind::WithNoRetry);

    let (stored, current) = get_operation(&client, "task", "source", "db", "tbl")
        .await
        .unwrap();
    let stored = stored.unwrap();
    assert!(!stored.done);
    assert_eq!(stored.revision, rev);
    assert_eq!(current, rev);
}
