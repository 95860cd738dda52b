//! Tests that require a live Docker daemon. Run with:
//!     cargo test -p localtrack_daemon --features docker-tests
#![cfg(feature = "docker-tests")]

use localtrack_daemon::{ContainerRuntime, CONTAINER_NAME_PREFIX};

#[tokio::test]
async fn runtime_answers_ping() {
    let runtime = ContainerRuntime::connect().unwrap();
    runtime.ping().await.unwrap();
}

#[tokio::test]
async fn removing_a_missing_container_is_not_an_error() {
    let runtime = ContainerRuntime::connect().unwrap();
    runtime
        .stop_and_remove("strongsort-00000000T000000Z")
        .await
        .unwrap();
}

#[tokio::test]
async fn unused_prefix_counts_zero() {
    let runtime = ContainerRuntime::connect().unwrap();
    let count = runtime
        .count_running_prefixed("localtrack-test-no-such-prefix")
        .await
        .unwrap();
    assert_eq!(count, 0);

    // The reserved prefix may have live workers, but listing must succeed.
    runtime.list_prefixed(CONTAINER_NAME_PREFIX).await.unwrap();
}
