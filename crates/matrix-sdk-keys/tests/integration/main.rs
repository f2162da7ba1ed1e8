// The http mocking library is not supported for wasm32
#![cfg(not(target_arch = "wasm32"))]

use matrix_sdk_keys::{config::RequestConfig, KeysClient};
use matrix_sdk_keys_test::{KeysMockServer, DEFAULT_ACCESS_TOKEN};

mod devices;
mod keys;
mod retry;
mod to_device;

#[ctor::ctor]
fn init_logging() {
    matrix_sdk_keys_test::init_tracing_for_tests();
}

/// Start a mock server and a client logged in to it.
async fn client_with_server() -> (KeysClient, KeysMockServer) {
    client_with_server_and_config(RequestConfig::new()).await
}

async fn client_with_server_and_config(config: RequestConfig) -> (KeysClient, KeysMockServer) {
    let server = KeysMockServer::new().await;
    let client = KeysClient::builder()
        .homeserver_url(server.uri())
        .access_token(DEFAULT_ACCESS_TOKEN)
        .request_config(config)
        .build()
        .unwrap();

    (client, server)
}
