use assert_matches2::assert_matches;
use matrix_sdk_keys::{ruma::device_id, AuthData, Error};
use serde_json::json;

use crate::client_with_server;

#[tokio::test]
async fn test_get_devices() {
    let (client, server) = client_with_server().await;
    server.mock_devices().ok().mock_once().mount().await;

    let devices = client.get_devices().await.unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].device_id.as_str(), "BNYQQWUMXO");
    assert_eq!(devices[0].display_name.as_deref(), Some("Client 1"));
    assert_eq!(devices[1].last_seen_ts, Some(1599057006985));
}

#[tokio::test]
async fn test_set_device_name() {
    let (client, server) = client_with_server().await;
    server
        .mock_set_device_name()
        .with_body(json!({ "display_name": "My phone" }))
        .ok()
        .mock_once()
        .mount()
        .await;

    client
        .set_device_name(device_id!("BNYQQWUMXO").to_owned(), Some("My phone".to_owned()))
        .await
        .unwrap();

    let requests = server.received_requests().await;
    assert_eq!(requests[0].url.path(), "/_matrix/client/v3/devices/BNYQQWUMXO");
}

#[tokio::test]
async fn test_clear_device_name() {
    let (client, server) = client_with_server().await;
    server
        .mock_set_device_name()
        .with_body(json!({ "display_name": "" }))
        .ok()
        .expect(2)
        .mount()
        .await;

    client.set_device_name(device_id!("BNYQQWUMXO").to_owned(), None).await.unwrap();
    client
        .set_device_name(device_id!("BNYQQWUMXO").to_owned(), Some(String::new()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_device_with_interactive_auth() {
    let (client, server) = client_with_server().await;
    server.mock_delete_device().with_body(json!({})).uiaa_password().mock_once().mount().await;
    server
        .mock_delete_device()
        .with_body(json!({
            "auth": {
                "type": "m.login.password",
                "session": "xxxxxxyz",
                "identifier": { "type": "m.id.user", "user": "example" },
                "password": "wordpass",
            }
        }))
        .ok()
        .mock_once()
        .mount()
        .await;

    let device_id = device_id!("BNYQQWUMXO");

    let error = client.delete_device(device_id.to_owned(), None).await.unwrap_err();
    assert_matches!(&error, Error::Protocol(protocol_error));
    assert_eq!(protocol_error.status, 401);

    let info = error.as_uiaa_response().unwrap();
    assert_eq!(info.flows[0].stages, ["m.login.password"]);

    let auth = AuthData::password("example", "wordpass", info.session);
    client.delete_device(device_id.to_owned(), Some(auth)).await.unwrap();
}
