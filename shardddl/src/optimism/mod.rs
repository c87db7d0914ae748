//! Optimistic shard DDL coordination.
//!
//! Each source records the DDL pending for one of its upstream tables as an [`Operation`].
//! Operations are written with [`put_operation`], read back in bulk with
//! [`get_all_operations`], followed with [`watch_operation_put`] and removed with
//! [`delete_operation_op`] once their round is over.

pub mod operation;
pub mod watch;

pub use operation::{
    ConflictStage, Operation, OperationFilter, OperationIndex, delete_operation_op,
    delete_operations, get_all_operations, get_operation, put_operation,
};
pub use watch::{ErrorChannel, OperationChannel, watch_channels, watch_operation_put};
