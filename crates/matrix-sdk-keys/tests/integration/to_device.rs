use matrix_sdk_keys::{
    ruma::{device_id, user_id, OwnedTransactionId},
    DeviceMap, JsonObject,
};
use serde_json::json;

use crate::client_with_server;

fn messages() -> DeviceMap<JsonObject> {
    let mut content = JsonObject::new();
    content.insert("body".to_owned(), json!("ping"));

    let mut messages = DeviceMap::new();
    messages.insert(user_id!("@b:x").to_owned(), device_id!("BOBDEVICE1").to_owned(), content);
    messages
}

#[tokio::test]
async fn test_send_to_device() {
    let (client, server) = client_with_server().await;
    server
        .mock_send_to_device()
        .with_body(json!({
            "messages": { "@b:x": { "BOBDEVICE1": { "body": "ping" } } }
        }))
        .ok()
        .mock_once()
        .mount()
        .await;

    let txn_id = OwnedTransactionId::from("1957372");
    client.send_to_device("m.test", messages(), Some(txn_id)).await.unwrap();

    let requests = server.received_requests().await;
    assert_eq!(requests[0].url.path(), "/_matrix/client/v3/sendToDevice/m.test/1957372");
}

#[tokio::test]
async fn test_send_to_device_generated_transaction_ids() {
    let (client, server) = client_with_server().await;
    server.mock_send_to_device().ok().expect(2).mount().await;

    client.send_to_device("m.test", messages(), None).await.unwrap();
    client.send_to_device("m.test", messages(), None).await.unwrap();

    let txn_ids: Vec<i64> = server
        .received_requests()
        .await
        .iter()
        .map(|request| request.url.path().rsplit('/').next().unwrap().parse().unwrap())
        .collect();

    assert_eq!(txn_ids.len(), 2);
    assert!(txn_ids.iter().all(|txn_id| *txn_id >= 0));
    assert_ne!(txn_ids[0], txn_ids[1]);
}

#[tokio::test]
async fn test_send_to_device_event_type_is_encoded() {
    let (client, server) = client_with_server().await;
    server.mock_send_to_device().ok().mock_once().mount().await;

    client
        .send_to_device("m.test/evil", messages(), Some(OwnedTransactionId::from("1")))
        .await
        .unwrap();

    let requests = server.received_requests().await;
    assert_eq!(requests[0].url.path(), "/_matrix/client/v3/sendToDevice/m.test%2Fevil/1");
}
