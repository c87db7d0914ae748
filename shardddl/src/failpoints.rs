use fail::fail_point;

use crate::bail;
use crate::error::{CoordResult, ErrorKind};

pub const PUT_OPERATION__BEFORE_TXN: &str = "put_operation.before_txn";
pub const STORE_CLIENT__BEFORE_REQUEST: &str = "store_client.before_request";

/// Evaluates the named failpoint, returning an error when it is configured with `return`.
///
/// The optional parameter selects whether the error is retryable: `retry` or `no_retry`.
pub fn coord_fail_point(name: &str) -> CoordResult<()> {
    fail_point!(name, |parameter| {
        let mut error_kind = ErrorKind::WithNoRetry;
        if let Some(parameter) = parameter {
            error_kind = match parameter.as_str() {
                "no_retry" => ErrorKind::WithNoRetry,
                "retry" => ErrorKind::WithRetry,
                _ => ErrorKind::WithNoRetry,
            }
        }

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
