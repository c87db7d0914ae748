use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::bail;
use crate::error::{CoordResult, ErrorKind};
#[cfg(feature = "failpoints")]
use crate::failpoints::{PUT_OPERATION__BEFORE_TXN, coord_fail_point};
use crate::keys::SHARD_DDL_OPTIMISM_OPERATION;
use crate::metrics::{
    OUTCOME_LABEL, SHARDDDL_OPERATION_PUT_CONFLICTS_TOTAL, SHARDDDL_OPERATION_PUTS_TOTAL,
    TASK_LABEL,
};
use crate::store::{Compare, CompareOp, KvStore, StoreClient, Txn, TxnOp, calculate_backoff};

/// Lifecycle of conflict detection for one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStage {
    /// No conflict has been detected.
    #[default]
    None,
    /// The DDL disagrees with the DDL of other sources of the same lock.
    Detected,
    /// A previously detected conflict has been resolved.
    Resolved,
}

impl fmt::Display for ConflictStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ConflictStage::None => "none",
            ConflictStage::Detected => "detected",
            ConflictStage::Resolved => "resolved",
        };
        f.write_str(stage)
    }
}

/// The DDL work pending for one upstream table of one source.
///
/// Serializes to a JSON object whose fields appear in declaration order. Other processes parse
/// this payload, so the names and order are part of the wire format. `revision` is not part of
/// the payload: it is filled in with the store revision of the write when an operation is read
/// back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Operation {
    pub id: String,
    pub task: String,
    pub source: String,
    pub up_schema: String,
    pub up_table: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ddls: Vec<String>,
    pub conflict_stage: ConflictStage,
    pub conflict_message: String,
    pub done: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub cols: BTreeSet<String>,
    #[serde(skip)]
    pub revision: i64,
}

impl Operation {
    /// Creates an operation that has not been written yet.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        task: impl Into<String>,
        source: impl Into<String>,
        up_schema: impl Into<String>,
        up_table: impl Into<String>,
        ddls: Vec<String>,
        conflict_stage: ConflictStage,
        conflict_message: impl Into<String>,
        done: bool,
        cols: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            source: source.into(),
            up_schema: up_schema.into(),
            up_table: up_table.into(),
            ddls,
            conflict_stage,
            conflict_message: conflict_message.into(),
            done,
            cols: cols.into_iter().collect(),
            revision: 0,
        }
    }

    pub fn to_json(&self) -> CoordResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> CoordResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks that a conflict message only accompanies a detected or resolved conflict.
    pub fn validate(&self) -> CoordResult<()> {
        if self.conflict_stage == ConflictStage::None && !self.conflict_message.is_empty() {
            bail!(
                ErrorKind::InvalidData,
                "Conflict message set without a conflict",
                format!(
                    "operation {} of source {} has message {:?} but no conflict stage",
                    self.id, self.source, self.conflict_message
                )
            );
        }

        Ok(())
    }

    /// Returns the store key of this operation below `root`.
    ///
    /// The key is derived from task, source, upstream schema and upstream table, so at most one
    /// operation exists per upstream table of a source.
    pub fn key(&self, root: &str) -> CoordResult<String> {
        SHARD_DDL_OPTIMISM_OPERATION.encode(
            root,
            &[&self.task, &self.source, &self.up_schema, &self.up_table],
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Live operations nested by task, source, upstream schema and upstream table.
pub type OperationIndex =
    BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeMap<String, Operation>>>>;

/// Selects operations by task, source, upstream schema and upstream table.
///
/// An empty field matches every value at its level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationFilter {
    pub task: String,
    pub source: String,
    pub up_schema: String,
    pub up_table: String,
}

impl OperationFilter {
    pub fn new(
        task: impl Into<String>,
        source: impl Into<String>,
        up_schema: impl Into<String>,
        up_table: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            source: source.into(),
            up_schema: up_schema.into(),
            up_table: up_table.into(),
        }
    }

    /// Returns a filter matching every operation.
    pub fn all() -> Self {
        Self::default()
    }

    fn fields(&self) -> [&str; 4] {
        [&self.task, &self.source, &self.up_schema, &self.up_table]
    }

    /// Returns the narrowest key prefix covering every matching operation.
    ///
    /// Built from the leading run of non-empty fields. Fields after the first wildcard are
    /// checked by [`OperationFilter::matches`] instead.
    pub fn prefix(&self, root: &str) -> CoordResult<String> {
        let fields = self.fields();
        let leading = fields.iter().take_while(|field| !field.is_empty()).count();

        SHARD_DDL_OPTIMISM_OPERATION.encode(root, &fields[..leading])
    }

    /// Returns `true` if the decoded key segments of an operation match every non-empty field.
    pub fn matches<S: AsRef<str>>(&self, segments: &[S]) -> bool {
        self.fields()
            .iter()
            .zip(segments)
            .all(|(field, segment)| field.is_empty() || *field == segment.as_ref())
    }
}

/// Writes `op` to the store.
///
/// With `skip_done` unset the write is unconditional. With `skip_done` set the write is decided
/// against the currently stored operation:
///
/// - no stored operation, or a stored operation that is not done: the write is applied;
/// - a done operation last written below `ref_revision`: the write is applied, since the done
///   state belongs to an earlier round;
/// - a done operation last written at or above `ref_revision`: nothing is written.
///
/// The decision and the write form one compare-and-swap on the key's mod revision. If another
/// writer changes the key in between, the stored value is read again and the decision is made
/// anew, up to `txn_retry.max_attempts` times before failing with [`ErrorKind::TxnConflict`].
///
/// Returns the store revision after the call and whether the write was applied. A skipped write
/// is not an error.
pub async fn put_operation<S>(
    client: &StoreClient<S>,
    skip_done: bool,
    op: &Operation,
    ref_revision: i64,
) -> CoordResult<(i64, bool)>
where
    S: KvStore,
{
    op.validate()?;

    let key = op.key(client.root())?;
    let value = op.to_json()?;

    if !skip_done {
        #[cfg(feature = "failpoints")]
        coord_fail_point(PUT_OPERATION__BEFORE_TXN)?;

        let response = client
            .txn(Txn::new().and_then([TxnOp::put(key, value)]))
            .await?;
        record_put(op, "applied");

        debug!(task = %op.task, source = %op.source, revision = response.revision, "put operation");

        return Ok((response.revision, true));
    }

    let retry = &client.config().txn_retry;
    for attempt in 1..=retry.max_attempts {
        let current = client.get(&key).await?;

        let observed = current.kvs.first().map_or(0, |kv| kv.mod_revision);
        let guard = match current.kvs.first() {
            None => Compare::create_revision(&key, CompareOp::Equal, 0),
            Some(kv) => {
                let stored = Operation::from_json(&kv.value)?;
                if stored.done && kv.mod_revision >= ref_revision {
                    record_put(op, "skipped");
                    info!(
                        task = %op.task,
                        source = %op.source,
                        up_schema = %op.up_schema,
                        up_table = %op.up_table,
                        stored_revision = kv.mod_revision,
                        ref_revision,
                        "skipped put of operation already done"
                    );

                    return Ok((current.revision, false));
                }

                Compare::mod_revision(&key, CompareOp::Equal, kv.mod_revision)
            }
        };

        #[cfg(feature = "failpoints")]
        coord_fail_point(PUT_OPERATION__BEFORE_TXN)?;

        let txn = Txn::new()
            .when([guard])
            .and_then([TxnOp::put(&key, value.as_str())])
            .or_else([TxnOp::get(&key)]);
        let (response, timed_out) = client.txn_after_timeouts(txn).await?;

        if !response.succeeded && timed_out {
            // A timed-out attempt that committed fails its own retry's guard.
            let own_write = response
                .get_response(0)
                .and_then(|kvs| kvs.first())
                .filter(|kv| kv.value == value && kv.mod_revision > observed);

            if let Some(kv) = own_write {
                record_put(op, "applied");
                debug!(
                    task = %op.task,
                    source = %op.source,
                    revision = kv.mod_revision,
                    attempt,
                    "put operation committed by a timed-out attempt"
                );

                return Ok((kv.mod_revision, true));
            }
        }

        if response.succeeded {
            record_put(op, "applied");
            debug!(
                task = %op.task,
                source = %op.source,
                revision = response.revision,
                attempt,
                "put operation"
            );

            return Ok((response.revision, true));
        }

        metrics::counter!(SHARDDDL_OPERATION_PUT_CONFLICTS_TOTAL, TASK_LABEL => op.task.clone())
            .increment(1);

        if attempt < retry.max_attempts {
            let delay = calculate_backoff(retry, attempt);
            warn!(
                task = %op.task,
                source = %op.source,
                attempt,
                ?delay,
                "operation changed concurrently, re-evaluating put"
            );
            tokio::time::sleep(delay).await;
        }
    }

    bail!(
        ErrorKind::TxnConflict,
        "Operation kept changing concurrently",
        format!(
            "gave up putting operation {} of source {} after {} attempts",
            op.id, op.source, retry.max_attempts
        )
    );
}

fn record_put(op: &Operation, outcome: &'static str) {
    metrics::counter!(
        SHARDDDL_OPERATION_PUTS_TOTAL,
        TASK_LABEL => op.task.clone(),
        OUTCOME_LABEL => outcome
    )
    .increment(1);
}

/// Reads the operation of one upstream table, returning it with the store revision of the read.
pub async fn get_operation<S>(
    client: &StoreClient<S>,
    task: &str,
    source: &str,
    up_schema: &str,
    up_table: &str,
) -> CoordResult<(Option<Operation>, i64)>
where
    S: KvStore,
{
    let key =
        SHARD_DDL_OPTIMISM_OPERATION.encode(client.root(), &[task, source, up_schema, up_table])?;
    let response = client.get(&key).await?;

    let op = match response.kvs.first() {
        Some(kv) => {
            let mut op = Operation::from_json(&kv.value)?;
            op.revision = kv.mod_revision;
            Some(op)
        }
        None => None,
    };

    Ok((op, response.revision))
}

/// Reads every live operation from one consistent snapshot.
///
/// Returns the operations nested by task, source, upstream schema and upstream table together
/// with the store revision of the snapshot. Watching from the next revision continues without
/// gaps.
pub async fn get_all_operations<S>(client: &StoreClient<S>) -> CoordResult<(OperationIndex, i64)>
where
    S: KvStore,
{
    let prefix = SHARD_DDL_OPTIMISM_OPERATION.encode::<&str>(client.root(), &[])?;
    let response = client.get_prefix(&prefix).await?;

    let mut index = OperationIndex::new();
    for kv in &response.kvs {
        let mut op = Operation::from_json(&kv.value)?;
        op.revision = kv.mod_revision;

        index
            .entry(op.task.clone())
            .or_default()
            .entry(op.source.clone())
            .or_default()
            .entry(op.up_schema.clone())
            .or_default()
            .insert(op.up_table.clone(), op);
    }

    debug!(
        operations = response.kvs.len(),
        revision = response.revision,
        "read all operations"
    );

    Ok((index, response.revision))
}

/// Returns the request deleting `op`, for use in a larger transaction.
///
/// Deleting an operation that does not exist is a no-op.
pub fn delete_operation_op(root: &str, op: &Operation) -> CoordResult<TxnOp> {
    Ok(TxnOp::delete(op.key(root)?))
}

/// Deletes `ops` in one transaction, returning the store revision afterwards.
pub async fn delete_operations<S>(client: &StoreClient<S>, ops: &[Operation]) -> CoordResult<i64>
where
    S: KvStore,
{
    let deletes = ops
        .iter()
        .map(|op| delete_operation_op(client.root(), op))
        .collect::<CoordResult<Vec<_>>>()?;

    let response = client.txn(Txn::new().and_then(deletes)).await?;

    debug!(
        operations = ops.len(),
        revision = response.revision,
        "deleted operations"
    );

    Ok(response.revision)
}
