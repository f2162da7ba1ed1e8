use std::collections::BTreeMap;

use assert_matches2::assert_matches;
use matrix_sdk_keys::{
    ruma::{device_id, user_id},
    DeviceMap, Error, KeyUploadRequest, UnexpectedError,
};
use serde_json::{json, Value as JsonValue};

use crate::client_with_server;

#[tokio::test]
async fn test_upload_keys_without_device_id() {
    let (client, server) = client_with_server().await;
    server.mock_upload_keys().ok().mock_once().mount().await;

    let mut one_time_keys = BTreeMap::new();
    one_time_keys.insert("signed_curve25519:AAAAHg".to_owned(), json!({ "key": "abc" }));

    let counts =
        client.upload_keys(KeyUploadRequest::new().one_time_keys(one_time_keys)).await.unwrap();

    assert_eq!(counts.get("curve25519"), Some(&10));
    assert_eq!(counts.get("signed_curve25519"), Some(&20));

    let bodies = server.received_bodies().await;
    assert_eq!(
        bodies[0],
        json!({ "one_time_keys": { "signed_curve25519:AAAAHg": { "key": "abc" } } })
    );
}

#[tokio::test]
async fn test_upload_keys_with_device_id() {
    let (client, server) = client_with_server().await;
    server.mock_upload_keys_for_device("JLAFKJWSCS").ok().mock_once().mount().await;
    server.mock_upload_keys().ok().never().mount().await;

    let device_keys = json!({ "device_id": "JLAFKJWSCS", "user_id": "@a:x" });
    let JsonValue::Object(device_keys) = device_keys else { unreachable!() };

    let request = KeyUploadRequest::new()
        .device_id(device_id!("JLAFKJWSCS").to_owned())
        .device_keys(device_keys);

    client.upload_keys(request).await.unwrap();
}

#[tokio::test]
async fn test_upload_keys_without_keys_sends_nothing() {
    let (client, server) = client_with_server().await;
    server.mock_upload_keys().ok().never().mount().await;

    let result = client.upload_keys(KeyUploadRequest::new()).await;

    assert_matches!(result, Err(Error::Unexpected(UnexpectedError::InvalidParameter(_))));
}

#[tokio::test]
async fn test_download_keys() {
    let (client, server) = client_with_server().await;
    server
        .mock_query_keys()
        .with_body(json!({ "device_keys": { "@a:x": {}, "@b:x": {} } }))
        .ok()
        .mock_once()
        .mount()
        .await;

    let result = client
        .download_keys([user_id!("@a:x").to_owned(), user_id!("@b:x").to_owned()], None)
        .await
        .unwrap();

    assert_eq!(result.device_keys.user_count(), 2);
    assert_eq!(result.device_keys.len(), 3);
    assert!(result.failures.is_empty());

    let keys = result.device_keys.get(user_id!("@a:x"), device_id!("JLAFKJWSCS")).unwrap();
    assert_eq!(keys["user_id"], "@a:x");

    let bob_devices: Vec<_> = result.device_keys.device_ids(user_id!("@b:x")).collect();
    assert_eq!(bob_devices, [device_id!("BOBDEVICE1"), device_id!("BOBDEVICE2")]);
}

#[tokio::test]
async fn test_download_keys_with_token() {
    let (client, server) = client_with_server().await;
    server
        .mock_query_keys()
        .with_body(json!({ "device_keys": { "@a:x": {} }, "token": "s72594_4483_1934" }))
        .ok()
        .mock_once()
        .mount()
        .await;

    client
        .download_keys([user_id!("@a:x").to_owned()], Some("s72594_4483_1934".to_owned()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_download_keys_with_failures() {
    let (client, server) = client_with_server().await;
    server.mock_query_keys().ok_with_failures().mock_once().mount().await;

    let result = client.download_keys([user_id!("@a:x").to_owned()], None).await.unwrap();

    // The malformed entry is skipped, the well-formed one is kept.
    assert_eq!(result.device_keys.len(), 1);
    assert!(result.device_keys.get(user_id!("@a:x"), device_id!("BROKEN")).is_none());
    assert!(result.failures.contains_key("other.server"));
}

#[tokio::test]
async fn test_claim_one_time_keys() {
    let (client, server) = client_with_server().await;
    server
        .mock_claim_keys()
        .with_body(json!({
            "one_time_keys": { "@b:x": { "BOBDEVICE1": "signed_curve25519" } }
        }))
        .ok()
        .mock_once()
        .mount()
        .await;

    let mut request = DeviceMap::new();
    request.insert(
        user_id!("@b:x").to_owned(),
        device_id!("BOBDEVICE1").to_owned(),
        "signed_curve25519".to_owned(),
    );

    let result = client.claim_one_time_keys(request).await.unwrap();

    let key = result.one_time_keys.get(user_id!("@b:x"), device_id!("BOBDEVICE1")).unwrap();
    assert_eq!(key.algorithm, "signed_curve25519");
    assert_eq!(key.key_id, "AAAAHg");
    assert_eq!(key.full_key_id(), "signed_curve25519:AAAAHg");
    assert_eq!(key.key(), Some("zKbLg+NrIjpnagy+pIY6uPL4ZwEG2v+8F9lmgsnlZzs"));
    assert!(key.signatures().unwrap().contains_key("@b:x"));
}

#[tokio::test]
async fn test_claim_without_keys_left_is_empty() {
    let (client, server) = client_with_server().await;
    server.mock_claim_keys().ok_empty().mock_once().mount().await;

    let mut request = DeviceMap::new();
    request.insert(
        user_id!("@b:x").to_owned(),
        device_id!("BOBDEVICE1").to_owned(),
        "signed_curve25519".to_owned(),
    );

    let result = client.claim_one_time_keys(request).await.unwrap();

    assert!(result.one_time_keys.is_empty());
    assert!(!result.one_time_keys.contains_user(user_id!("@b:x")));
}

#[tokio::test]
async fn test_get_key_changes() {
    let (client, server) = client_with_server().await;
    server.mock_key_changes().between("s1", "s2").ok().mock_once().mount().await;

    let changes = client.get_key_changes("s1", "s2").await.unwrap();

    assert_eq!(changes.from, "s1");
    assert_eq!(changes.to, "s2");
    assert_eq!(
        changes.changed.into_iter().collect::<Vec<_>>(),
        [user_id!("@a:x").to_owned(), user_id!("@b:x").to_owned()]
    );
    assert_eq!(changes.left.into_iter().collect::<Vec<_>>(), [user_id!("@c:x").to_owned()]);
}
