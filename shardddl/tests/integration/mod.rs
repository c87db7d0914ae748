#![cfg(feature = "test-utils")]

mod config_test;
mod operation_test;
mod relay_test;
mod watch_test;
