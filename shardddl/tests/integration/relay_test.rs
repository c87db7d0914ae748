use shardddl::error::ErrorKind;
use shardddl::ha::{delete_relay_config, get_relay_config, put_relay_config, put_source_cfg};
use shardddl::store::{MemoryStore, StoreClient};
use shardddl::test_utils::source::source_config;
use shardddl_config::shared::CoordinationConfig;
use shardddl_telemetry::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn relay_config_follows_worker_binding() {
    init_test_tracing();

    let client = StoreClient::new(MemoryStore::new(), CoordinationConfig::default()).unwrap();
    let worker = "dm-worker-1";
    let source = "mysql-replica-1";
    let config = source_config(source);

    // No binding and no config.
    let (cfg1, rev1) = get_relay_config(&client, worker).await.unwrap();
    assert!(rev1 > 0);
    assert!(cfg1.is_none());

    let rev2 = put_relay_config(&client, source, worker).await.unwrap();
    assert!(rev2 > rev1);

    // Bound, but the source has no config.
    let err = get_relay_config(&client, worker).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceConfigNotFound);
    assert!(
        err.to_string()
            .contains("doesn't have related source config in etcd")
    );

    let rev3 = put_source_cfg(&client, &config).await.unwrap();
    assert!(rev3 > rev2);

    // Bound with config: the revision is the config's own.
    let (cfg2, rev4) = get_relay_config(&client, worker).await.unwrap();
    assert_eq!(rev4, rev3);
    assert_eq!(cfg2, Some(config));

    let rev5 = delete_relay_config(&client, worker).await.unwrap();
    assert!(rev5 > rev4);

    // The config is still stored, but the worker is no longer bound.
    let (cfg3, rev6) = get_relay_config(&client, worker).await.unwrap();
    assert_eq!(rev6, rev5);
    assert!(cfg3.is_none());
}
