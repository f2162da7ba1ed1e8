use std::{sync::Arc, time::Duration};

use assert_matches2::assert_matches;
use matrix_sdk_keys::{
    config::RequestConfig,
    ruma::{device_id, user_id},
    BackoffScheduler, DeviceMap, Error, HttpError, QueuedRetryScheduler, UnexpectedError,
};
use matrix_sdk_keys_test::{KeysMockServer, DEFAULT_ACCESS_TOKEN};

use crate::{client_with_server, client_with_server_and_config};

#[tokio::test]
async fn test_transient_failure_is_retried_with_the_same_request() {
    let (client, server) = client_with_server().await;
    server.mock_send_to_device().error500().mock_once().mount().await;
    server.mock_send_to_device().ok().mock_once().mount().await;

    client.send_to_device("m.test", DeviceMap::new(), None).await.unwrap();

    let requests = server.received_requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, requests[1].url);
    assert_eq!(requests[0].body, requests[1].body);
}

#[tokio::test]
async fn test_retries_are_capped_without_a_scheduler() {
    let (client, server) = client_with_server().await;
    server.mock_devices().error500().expect(4).mount().await;

    let error = client.get_devices().await.unwrap_err();

    assert_matches!(error, Error::Network(HttpError::Server(status)));
    assert_eq!(status, 500);
}

#[tokio::test]
async fn test_disabled_retries() {
    let (client, server) =
        client_with_server_and_config(RequestConfig::new().disable_retry()).await;
    server.mock_devices().error500().mock_once().mount().await;

    client.get_devices().await.unwrap_err();
}

#[tokio::test]
async fn test_rate_limited_request_is_retried() {
    let (client, server) = client_with_server().await;
    server.mock_key_changes().error_limit_exceeded().mock_once().mount().await;
    server.mock_key_changes().ok().mock_once().mount().await;

    let changes = client.get_key_changes("s1", "s2").await.unwrap();
    assert_eq!(changes.changed.len(), 2);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let (client, server) = client_with_server().await;
    server.mock_devices().error_forbidden().mock_once().mount().await;

    let error = client.get_devices().await.unwrap_err();
    assert_eq!(error.errcode(), Some("M_FORBIDDEN"));
}

#[tokio::test]
async fn test_claim_is_not_retried_by_default() {
    let (client, server) = client_with_server().await;
    server.mock_claim_keys().error500().mock_once().mount().await;

    let mut request = DeviceMap::new();
    request.insert(
        user_id!("@b:x").to_owned(),
        device_id!("BOBDEVICE1").to_owned(),
        "signed_curve25519".to_owned(),
    );

    client.claim_one_time_keys(request).await.unwrap_err();
}

#[tokio::test]
async fn test_backoff_scheduler() {
    let server = KeysMockServer::new().await;
    let client = matrix_sdk_keys::KeysClient::builder()
        .homeserver_url(server.uri())
        .access_token(DEFAULT_ACCESS_TOKEN)
        .retry_scheduler(Arc::new(BackoffScheduler::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
        )))
        .request_config(RequestConfig::new().retry_limit(5))
        .build()
        .unwrap();

    server.mock_devices().error500().up_to_n_times(2).expect(2).mount().await;
    server.mock_devices().ok().mock_once().mount().await;

    let devices = client.get_devices().await.unwrap();
    assert_eq!(devices.len(), 2);
}

#[tokio::test]
async fn test_queued_scheduler_waits_for_flush() {
    let scheduler = Arc::new(QueuedRetryScheduler::new());
    let server = KeysMockServer::new().await;
    let client = matrix_sdk_keys::KeysClient::builder()
        .homeserver_url(server.uri())
        .access_token(DEFAULT_ACCESS_TOKEN)
        .retry_scheduler(scheduler.clone())
        .build()
        .unwrap();

    server.mock_devices().error500().mock_once().mount().await;
    server.mock_devices().ok().mock_once().mount().await;

    let handle = client.get_devices();

    while scheduler.pending_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(server.received_requests().await.len(), 1);

    scheduler.flush().await;

    let devices = handle.await.unwrap();
    assert_eq!(devices.len(), 2);
}

#[tokio::test]
async fn test_discarded_operation_is_abandoned() {
    let scheduler = Arc::new(QueuedRetryScheduler::new());
    let server = KeysMockServer::new().await;
    let client = matrix_sdk_keys::KeysClient::builder()
        .homeserver_url(server.uri())
        .access_token(DEFAULT_ACCESS_TOKEN)
        .retry_scheduler(scheduler.clone())
        .build()
        .unwrap();

    server.mock_devices().error500().mount().await;

    let handle = client.get_devices();

    while scheduler.pending_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    scheduler.discard();

    assert_matches!(handle.await, Err(Error::Unexpected(UnexpectedError::Abandoned)));
}
