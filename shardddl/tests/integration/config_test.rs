use std::path::Path;

use shardddl::optimism::put_operation;
use shardddl::store::{MemoryStore, StoreClient};
use shardddl::test_utils::operation::pending_operation;
use shardddl_config::environment::Environment;
use shardddl_config::load_config_from;
use shardddl_config::shared::CoordinationConfig;
use shardddl_telemetry::init_test_tracing;
use shardddl_telemetry::metrics::init_metrics_handle;

fn configuration_dir() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../configuration")
}

#[test]
fn shipped_configuration_layers_load() {
    init_test_tracing();

    let dev: CoordinationConfig = load_config_from(&configuration_dir(), Environment::Dev).unwrap();
    assert_eq!(dev.key_prefix, "/dm-master");
    assert_eq!(dev.request_timeout_ms, 5_000);
    assert_eq!(dev.history_retention, 1_000);
    assert!(dev.validate().is_ok());

    let prod: CoordinationConfig =
        load_config_from(&configuration_dir(), Environment::Prod).unwrap();
    assert_eq!(prod.txn_retry.max_attempts, 20);
    assert_eq!(prod.txn_retry.initial_retry_delay_ms, 50);
    assert_eq!(prod.watch_buffer_size, 256);
}

#[tokio::test(flavor = "multi_thread")]
async fn operation_puts_are_counted() {
    init_test_tracing();

    let handle = init_metrics_handle(&[("service", "shardddl")]).unwrap();
    let config: CoordinationConfig =
        load_config_from(&configuration_dir(), Environment::Dev).unwrap();
    let client = StoreClient::new(MemoryStore::from_config(&config), config).unwrap();

    let op = pending_operation("id", "metrics-task", "source", "db", "tbl");
    put_operation(&client, false, &op, 0).await.unwrap();

    let rendered = handle.render();
    assert!(rendered.contains("shardddl_operation_puts_total"));
    assert!(rendered.contains("metrics-task"));
}
