#![cfg(all(feature = "failpoints", feature = "test-utils"))]

mod store_test;
