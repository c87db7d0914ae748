use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shardddl::error::CoordResult;
use shardddl::keys::gen_ddl_lock_id;
use shardddl::optimism::{
    ConflictStage, Operation, OperationFilter, delete_operation_op, get_all_operations,
    put_operation,
};
use shardddl::store::{
    GetResponse, KvStore, MemoryStore, StoreClient, Txn, TxnOp, TxnResponse, WatchStream,
};
use shardddl::test_utils::operation::{collect_watch, done_operation, pending_operation};
use shardddl_config::shared::CoordinationConfig;
use shardddl_telemetry::init_test_tracing;

const WATCH_DEADLINE: Duration = Duration::from_millis(500);

fn new_client<S: KvStore>(store: S) -> StoreClient<S> {
    let mut config = CoordinationConfig::default();
    config.txn_retry.initial_retry_delay_ms = 1;
    config.txn_retry.max_retry_delay_ms = 10;
    StoreClient::new(store, config).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn operation_lifecycle_through_the_store() {
    init_test_tracing();

    let client = new_client(MemoryStore::new());
    let (task1, task2) = ("test1", "test2");
    let (up_schema, up_table) = ("foo_1", "bar_1");
    let source1 = "mysql-replica-1";
    let ddls = vec!["ALTER TABLE bar ADD COLUMN c1 INT".to_string()];

    let mut op11 = Operation::new(
        gen_ddl_lock_id(task1, "foo", "bar"),
        task1,
        source1,
        up_schema,
        up_table,
        ddls.clone(),
        ConflictStage::None,
        "",
        false,
        Vec::new(),
    );
    let mut op21 = Operation::new(
        gen_ddl_lock_id(task2, "foo", "bar"),
        task2,
        source1,
        up_schema,
        up_table,
        ddls,
        ConflictStage::Resolved,
        "",
        true,
        Vec::new(),
    );

    // Putting the same operation twice applies both writes.
    let (rev1, applied) = put_operation(&client, false, &op11, 0).await.unwrap();
    assert!(applied);
    let (rev2, applied) = put_operation(&client, false, &op11, 0).await.unwrap();
    assert!(applied);
    assert!(rev2 > rev1);

    // A watch from the last put of one table only sees that put.
    let filter = OperationFilter::new(task1, source1, up_schema, up_table);
    let (ops, errors) = collect_watch(&client, &filter, rev2, WATCH_DEADLINE).await;
    assert!(errors.is_empty());
    op11.revision = rev2;
    assert_eq!(ops, vec![op11.clone()]);

    let (rev3, applied) = put_operation(&client, false, &op21, 0).await.unwrap();
    assert!(applied);

    // A watch without filters sees every task.
    let (ops, errors) = collect_watch(&client, &OperationFilter::all(), rev2, WATCH_DEADLINE).await;
    assert!(errors.is_empty());
    op21.revision = rev3;
    assert_eq!(ops, vec![op11.clone(), op21.clone()]);

    let (index, rev4) = get_all_operations(&client).await.unwrap();
    assert_eq!(rev4, rev3);
    assert_eq!(index.len(), 2);
    assert_eq!(index[task1].len(), 1);
    assert_eq!(index[task1][source1][up_schema][up_table], op11);
    assert_eq!(index[task2].len(), 1);
    assert_eq!(index[task2][source1][up_schema][up_table], op21);

    // The stored operation is not done, so the write is not skipped.
    let (rev5, applied) = put_operation(&client, true, &op11, 0).await.unwrap();
    assert!(applied);
    assert!(rev5 > rev4);

    let delete = delete_operation_op(client.root(), &op11).unwrap();
    client.txn(Txn::new().and_then([delete])).await.unwrap();

    let (index, _) = get_all_operations(&client).await.unwrap();
    assert!(!index.contains_key(task1));
    assert!(index.contains_key(task2));

    // The key is absent, so the write is not skipped.
    let (rev6, applied) = put_operation(&client, true, &op11, 0).await.unwrap();
    assert!(applied);

    let (index, _) = get_all_operations(&client).await.unwrap();
    op11.revision = rev6;
    assert_eq!(index[task1][source1][up_schema][up_table], op11);

    let op11_done = done_operation(&op11);
    let (rev7, applied) = put_operation(&client, true, &op11_done, 0).await.unwrap();
    assert!(applied);
    assert!(rev7 > rev6);

    // The done operation was written before the reference revision.
    let (rev8, applied) = put_operation(&client, true, &op11_done, rev7 + 10)
        .await
        .unwrap();
    assert!(applied);
    assert!(rev8 > rev7);

    // The done operation was written at or after the reference revision.
    let (rev9, applied) = put_operation(&client, true, &op11, rev6).await.unwrap();
    assert!(!applied);
    assert_eq!(rev9, rev8);
}

#[tokio::test(flavor = "multi_thread")]
async fn skip_done_decisions() {
    init_test_tracing();

    let client = new_client(MemoryStore::new());
    let op = pending_operation("id", "task", "source", "db", "tbl");
    let done = done_operation(&op);

    // Absent key.
    let (rev, applied) = put_operation(&client, true, &done, 100).await.unwrap();
    assert!(applied);

    // Stored done at `rev`, reference equal to it.
    let (same, applied) = put_operation(&client, true, &op, rev).await.unwrap();
    assert!(!applied);
    assert_eq!(same, rev);

    // Stored done at `rev`, reference below it.
    let (same, applied) = put_operation(&client, true, &op, rev - 1).await.unwrap();
    assert!(!applied);
    assert_eq!(same, rev);

    // Stored done at `rev`, reference above it.
    let (reopened, applied) = put_operation(&client, true, &op, rev + 1).await.unwrap();
    assert!(applied);
    assert!(reopened > rev);

    // Stored not done, any reference.
    let (next, applied) = put_operation(&client, true, &done, 0).await.unwrap();
    assert!(applied);
    assert!(next > reopened);

    // Unconditional writes ignore the stored state.
    let (last, applied) = put_operation(&client, false, &op, 0).await.unwrap();
    assert!(applied);
    assert!(last > next);
}

/// Store running one extra transaction right before the next transaction of the caller,
/// simulating a concurrent writer winning the race.
#[derive(Debug, Clone)]
struct InterferingStore {
    inner: MemoryStore,
    interference: Arc<Mutex<Option<Txn>>>,
}

impl InterferingStore {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            interference: Arc::new(Mutex::new(None)),
        }
    }

    fn interfere_with(&self, txn: Txn) {
        *self.interference.lock().unwrap() = Some(txn);
    }
}

impl KvStore for InterferingStore {
    async fn get(&self, key: &str) -> CoordResult<GetResponse> {
        self.inner.get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> CoordResult<GetResponse> {
        self.inner.get_prefix(prefix).await
    }

    async fn txn(&self, txn: Txn) -> CoordResult<TxnResponse> {
        let interference = self.interference.lock().unwrap().take();
        if let Some(interference) = interference {
            self.inner.txn(interference).await?;
        }

        self.inner.txn(txn).await
    }

    async fn watch(&self, prefix: &str, start_revision: i64) -> CoordResult<WatchStream> {
        self.inner.watch(prefix, start_revision).await
    }

    async fn compact(&self, revision: i64) -> CoordResult<()> {
        self.inner.compact(revision).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_race_reevaluates_against_the_winner() {
    init_test_tracing();

    let store = InterferingStore::new(MemoryStore::new());
    let client = new_client(store.clone());
    let op = pending_operation("id", "task", "source", "db", "tbl");

    let (rev, _) = put_operation(&client, false, &op, 0).await.unwrap();

    // A concurrent writer marks the operation done between our read and our write.
    let done = done_operation(&op);
    store.interfere_with(
        Txn::new().and_then([TxnOp::put(op.key(client.root()).unwrap(), done.to_json().unwrap())]),
    );

    let (skipped_rev, applied) = put_operation(&client, true, &op, rev).await.unwrap();
    assert!(!applied);
    assert_eq!(skipped_rev, rev + 1);

    let (index, _) = get_all_operations(&client).await.unwrap();
    assert!(index["task"]["source"]["db"]["tbl"].done);
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_race_from_an_older_round_still_applies() {
    init_test_tracing();

    let store = InterferingStore::new(MemoryStore::new());
    let client = new_client(store.clone());
    let op = pending_operation("id", "task", "source", "db", "tbl");

    let (rev, _) = put_operation(&client, false, &op, 0).await.unwrap();

    let done = done_operation(&op);
    store.interfere_with(
        Txn::new().and_then([TxnOp::put(op.key(client.root()).unwrap(), done.to_json().unwrap())]),
    );

    let (applied_rev, applied) = put_operation(&client, true, &op, rev + 100).await.unwrap();
    assert!(applied);
    assert_eq!(applied_rev, rev + 2);

    let (index, _) = get_all_operations(&client).await.unwrap();
    assert!(!index["task"]["source"]["db"]["tbl"].done);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_writers_never_lose_a_done_state() {
    init_test_tracing();

    let client = new_client(MemoryStore::new());
    let op = pending_operation("id", "task", "source", "db", "tbl");
    let done = done_operation(&op);

    let (rev, _) = put_operation(&client, false, &done, 0).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        let op = op.clone();
        handles.push(tokio::spawn(async move {
            put_operation(&client, true, &op, rev).await.unwrap()
        }));
    }

    for handle in handles {
        let (returned_rev, applied) = handle.await.unwrap();
        assert!(!applied);
        assert_eq!(returned_rev, rev);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_composes_with_other_mutations() {
    init_test_tracing();

    let client = new_client(MemoryStore::new());
    let op = pending_operation("id", "task", "source", "db", "tbl");
    let other = pending_operation("id", "other-task", "source", "db", "tbl");
    put_operation(&client, false, &op, 0).await.unwrap();
    put_operation(&client, false, &other, 0).await.unwrap();

    let unrelated_key = format!("{}/lock/info", client.root());
    let delete = delete_operation_op(client.root(), &op).unwrap();
    let response = client
        .txn(Txn::new().and_then([delete, TxnOp::put(unrelated_key.as_str(), "released")]))
        .await
        .unwrap();
    assert!(response.succeeded);

    let unrelated = client.get(&unrelated_key).await.unwrap();
    assert_eq!(unrelated.kvs[0].mod_revision, response.revision);
    assert_eq!(client.store().revision().await, response.revision);

    let (index, rev) = get_all_operations(&client).await.unwrap();
    assert_eq!(rev, response.revision);
    assert!(!index.contains_key("task"));
    assert!(index.contains_key("other-task"));
}

/// Store whose next transaction commits and then stalls past the request timeout, as a
/// write whose response got lost would.
#[derive(Debug, Clone)]
struct StallingCommitStore {
    inner: MemoryStore,
    stall: Duration,
    armed: Arc<AtomicBool>,
}

impl StallingCommitStore {
    fn new(inner: MemoryStore, stall: Duration) -> Self {
        Self {
            inner,
            stall,
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn stall_next_commit(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl KvStore for StallingCommitStore {
    async fn get(&self, key: &str) -> CoordResult<GetResponse> {
        self.inner.get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> CoordResult<GetResponse> {
        self.inner.get_prefix(prefix).await
    }

    async fn txn(&self, txn: Txn) -> CoordResult<TxnResponse> {
        let response = self.inner.txn(txn).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(self.stall).await;
        }

        Ok(response)
    }

    async fn watch(&self, prefix: &str, start_revision: i64) -> CoordResult<WatchStream> {
        self.inner.watch(prefix, start_revision).await
    }

    async fn compact(&self, revision: i64) -> CoordResult<()> {
        self.inner.compact(revision).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_out_commit_is_reported_as_applied() {
    init_test_tracing();

    let store = StallingCommitStore::new(MemoryStore::new(), Duration::from_millis(200));
    let mut config = CoordinationConfig::default();
    config.request_timeout_ms = 50;
    config.txn_retry.initial_retry_delay_ms = 1;
    config.txn_retry.max_retry_delay_ms = 10;
    let client = StoreClient::new(store.clone(), config).unwrap();

    let op = pending_operation("id", "task", "source", "db", "tbl");
    let (rev, _) = put_operation(&client, false, &op, 0).await.unwrap();

    store.stall_next_commit();
    let (done_rev, applied) = put_operation(&client, true, &done_operation(&op), 0)
        .await
        .unwrap();

    assert!(applied);
    assert_eq!(done_rev, rev + 1);
    assert_eq!(store.inner.revision().await, rev + 1);

    let (index, _) = get_all_operations(&client).await.unwrap();
    let stored = &index["task"]["source"]["db"]["tbl"];
    assert!(stored.done);
    assert_eq!(stored.revision, done_rev);
}
