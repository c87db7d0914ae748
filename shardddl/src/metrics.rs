//! Metrics definitions for coordination monitoring.

/// Label for the task name in metrics.
pub const TASK_LABEL: &str = "task";

/// Label for the outcome of a write in metrics.
pub const OUTCOME_LABEL: &str = "outcome";

/// Label for error kind in metrics.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Label for the store request type in metrics.
pub const REQUEST_LABEL: &str = "request";

// Operation metrics

/// Counter for operation writes, labelled with `applied` or `skipped`.
pub const SHARDDDL_OPERATION_PUTS_TOTAL: &str = "shardddl_operation_puts_total";

/// Counter for compare-and-swap rounds lost to a concurrent writer.
pub const SHARDDDL_OPERATION_PUT_CONFLICTS_TOTAL: &str = "shardddl_operation_put_conflicts_total";

// Store metrics

/// Counter for store requests retried after a transient failure.
pub const SHARDDDL_STORE_RETRIES_TOTAL: &str = "shardddl_store_retries_total";

// Watch metrics

/// Counter for operations delivered by watchers.
pub const SHARDDDL_WATCH_EVENTS_TOTAL: &str = "shardddl_watch_events_total";

/// Counter for errors delivered by watchers.
pub const SHARDDDL_WATCH_ERRORS_TOTAL: &str = "shardddl_watch_errors_total";
