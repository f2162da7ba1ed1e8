// Copyright 2024 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Helpers to mock the key-exchange endpoints of a homeserver with
//! [`wiremock`].

use std::marker::PhantomData;

use serde_json::{json, Value as JsonValue};
use wiremock::{
    matchers::{body_json, method, path, path_regex, query_param},
    Mock, MockBuilder, MockGuard, MockServer, Request, Respond, ResponseTemplate, Times,
};

use crate::{test_json, DEFAULT_ACCESS_TOKEN};

/// A [`wiremock`] [`MockServer`] along with useful methods to help mocking
/// the key-exchange endpoints of the client-server API.
///
/// It works like this:
///
/// * start by saying which endpoint you'd like to mock, e.g.
///   [`Self::mock_query_keys()`]. This returns a specialized [`MockEndpoint`]
///   for that endpoint.
/// * configure the response on the endpoint, e.g. [`MockEndpoint::ok()`] or
///   [`MockEndpoint::error500()`], or use [`MockEndpoint::respond_with()`]
///   for anything the helpers don't cover.
/// * you get a [`KeysMock`], a [`wiremock::Mock`] with the server curried so
///   that [`KeysMock::mount()`] doesn't need it.
pub struct KeysMockServer {
    server: MockServer,
}

impl KeysMockServer {
    /// Start a new mock server.
    pub async fn new() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Return the underlying [`wiremock`] server.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Return the URI of this server, to be used as the homeserver URL.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// The requests the server received so far.
    pub async fn received_requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// The JSON bodies of the requests the server received so far.
    pub async fn received_bodies(&self) -> Vec<JsonValue> {
        self.received_requests()
            .await
            .iter()
            .map(|request| request.body_json().unwrap_or(JsonValue::Null))
            .collect()
    }

    fn mock_endpoint<T>(&self, mock: MockBuilder) -> MockEndpoint<'_, T> {
        MockEndpoint::new(&self.server, mock)
    }

    /// Create a prebuilt mock for `POST /keys/upload`, without a device ID.
    pub fn mock_upload_keys(&self) -> MockEndpoint<'_, UploadKeysEndpoint> {
        let mock = Mock::given(method("POST")).and(path("/_matrix/client/v3/keys/upload"));
        self.mock_endpoint(mock)
    }

    /// Create a prebuilt mock for `POST /keys/upload/{deviceId}`.
    pub fn mock_upload_keys_for_device(
        &self,
        device_id: &str,
    ) -> MockEndpoint<'_, UploadKeysEndpoint> {
        let mock = Mock::given(method("POST"))
            .and(path(format!("/_matrix/client/v3/keys/upload/{device_id}")));
        self.mock_endpoint(mock)
    }

    /// Create a prebuilt mock for `POST /keys/query`.
    pub fn mock_query_keys(&self) -> MockEndpoint<'_, QueryKeysEndpoint> {
        let mock = Mock::given(method("POST")).and(path("/_matrix/client/v3/keys/query"));
        self.mock_endpoint(mock)
    }

    /// Create a prebuilt mock for `POST /keys/claim`.
    pub fn mock_claim_keys(&self) -> MockEndpoint<'_, ClaimKeysEndpoint> {
        let mock = Mock::given(method("POST")).and(path("/_matrix/client/v3/keys/claim"));
        self.mock_endpoint(mock)
    }

    /// Create a prebuilt mock for `PUT /sendToDevice/{eventType}/{txnId}`.
    pub fn mock_send_to_device(&self) -> MockEndpoint<'_, SendToDeviceEndpoint> {
        let mock = Mock::given(method("PUT"))
            .and(path_regex(r"^/_matrix/client/v3/sendToDevice/[^/]+/[^/]+$"));
        self.mock_endpoint(mock)
    }

    /// Create a prebuilt mock for `GET /devices`.
    pub fn mock_devices(&self) -> MockEndpoint<'_, DevicesEndpoint> {
        let mock = Mock::given(method("GET")).and(path("/_matrix/client/v3/devices"));
        self.mock_endpoint(mock)
    }

    /// Create a prebuilt mock for `DELETE /devices/{deviceId}`.
    pub fn mock_delete_device(&self) -> MockEndpoint<'_, DeleteDeviceEndpoint> {
        let mock = Mock::given(method("DELETE")).and(path_regex(r"^/_matrix/client/v3/devices/.+"));
        self.mock_endpoint(mock)
    }

    /// Create a prebuilt mock for `PUT /devices/{deviceId}`.
    pub fn mock_set_device_name(&self) -> MockEndpoint<'_, SetDeviceNameEndpoint> {
        let mock = Mock::given(method("PUT")).and(path_regex(r"^/_matrix/client/v3/devices/.+"));
        self.mock_endpoint(mock)
    }

    /// Create a prebuilt mock for `GET /keys/changes`.
    pub fn mock_key_changes(&self) -> MockEndpoint<'_, KeyChangesEndpoint> {
        let mock = Mock::given(method("GET")).and(path("/_matrix/client/v3/keys/changes"));
        self.mock_endpoint(mock)
    }
}

/// A wrapper for a [`Mock`] as well as a [`MockServer`], allowing us to call
/// [`Mock::mount`] or [`Mock::mount_as_scoped`] without having to pass the
/// [`MockServer`] reference.
pub struct KeysMock<'a> {
    mock: Mock,
    server: &'a MockServer,
}

impl KeysMock<'_> {
    /// Set an expectation on the number of times this [`KeysMock`] should
    /// match in the current test case.
    ///
    /// Expectations are verified when the server is shutting down.
    pub fn expect<T: Into<Times>>(self, num_calls: T) -> Self {
        Self { mock: self.mock.expect(num_calls), ..self }
    }

    /// Assign a name to your mock, used in error messages.
    pub fn named(self, name: impl Into<String>) -> Self {
        Self { mock: self.mock.named(name), ..self }
    }

    /// Respond to a request of this endpoint exactly once.
    ///
    /// After it's been called, subsequent requests will hit the next handler
    /// or a 404. Also verifies that it's been called once.
    pub fn mock_once(self) -> Self {
        Self { mock: self.mock.up_to_n_times(1).expect(1), ..self }
    }

    /// Makes sure the endpoint is never reached.
    pub fn never(self) -> Self {
        Self { mock: self.mock.expect(0), ..self }
    }

    /// Specify an upper limit to the number of times this mock responds.
    pub fn up_to_n_times(self, num: u64) -> Self {
        Self { mock: self.mock.up_to_n_times(num), ..self }
    }

    /// Mount the mock on the attached server until the server shuts down.
    pub async fn mount(self) {
        self.mock.mount(self.server).await;
    }

    /// Mount the mock as long as the returned [`MockGuard`] is alive.
    pub async fn mount_as_scoped(self) -> MockGuard {
        self.mock.mount_as_scoped(self.server).await
    }
}

/// Generic mocked endpoint, with useful common helpers.
pub struct MockEndpoint<'a, T> {
    server: &'a MockServer,
    mock: MockBuilder,
    expected_access_token: ExpectedAccessToken,
    _endpoint: PhantomData<T>,
}

impl<'a, T> MockEndpoint<'a, T> {
    fn new(server: &'a MockServer, mock: MockBuilder) -> Self {
        Self {
            server,
            mock,
            expected_access_token: ExpectedAccessToken::Default,
            _endpoint: PhantomData,
        }
    }

    /// Expect authentication with the given access token on this endpoint.
    pub fn expect_access_token(mut self, access_token: &'static str) -> Self {
        self.expected_access_token = ExpectedAccessToken::Custom(access_token);
        self
    }

    /// Expect no authentication on this endpoint.
    pub fn expect_missing_access_token(mut self) -> Self {
        self.expected_access_token = ExpectedAccessToken::Missing;
        self
    }

    /// Only match requests with the given JSON body.
    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.mock = self.mock.and(body_json(body));
        self
    }

    /// Specify how to respond to a query, when the predefined responses
    /// aren't sufficient.
    pub fn respond_with<R: Respond + 'static>(self, func: R) -> KeysMock<'a> {
        let mock = self.mock.and(self.expected_access_token).respond_with(func);
        KeysMock { mock, server: self.server }
    }

    /// Emulate a transient failure, i.e. respond with error 500.
    pub fn error500(self) -> KeysMock<'a> {
        self.respond_with(ResponseTemplate::new(500))
    }

    /// Emulate a rate-limited request.
    pub fn error_limit_exceeded(self) -> KeysMock<'a> {
        self.respond_with(
            ResponseTemplate::new(429).set_body_json(&*test_json::LIMIT_EXCEEDED),
        )
    }

    /// Emulate a permanent failure.
    pub fn error_forbidden(self) -> KeysMock<'a> {
        self.respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "errcode": "M_FORBIDDEN",
            "error": "Forbidden",
        })))
    }

    fn ok_json(self, body: &JsonValue) -> KeysMock<'a> {
        self.respond_with(ResponseTemplate::new(200).set_body_json(body))
    }
}

enum ExpectedAccessToken {
    Default,
    Custom(&'static str),
    Missing,
}

impl ExpectedAccessToken {
    fn access_token(request: &Request) -> Option<&str> {
        request
            .headers
            .get(&http::header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")
            .filter(|token| !token.is_empty())
    }
}

impl wiremock::Match for ExpectedAccessToken {
    fn matches(&self, request: &Request) -> bool {
        match self {
            Self::Default => Self::access_token(request) == Some(DEFAULT_ACCESS_TOKEN),
            Self::Custom(token) => Self::access_token(request) == Some(token),
            Self::Missing => request.headers.get(&http::header::AUTHORIZATION).is_none(),
        }
    }
}

/// A prebuilt mock for `POST /keys/upload` requests.
pub struct UploadKeysEndpoint;

impl<'a> MockEndpoint<'a, UploadKeysEndpoint> {
    /// Returns a successful response with counts of 10 curve25519 keys and 20
    /// signed curve25519 keys.
    pub fn ok(self) -> KeysMock<'a> {
        self.ok_json(&test_json::KEYS_UPLOAD)
    }
}

/// A prebuilt mock for `POST /keys/query` requests.
pub struct QueryKeysEndpoint;

impl<'a> MockEndpoint<'a, QueryKeysEndpoint> {
    /// Returns the keys of one device of `@a:x` and two devices of `@b:x`.
    pub fn ok(self) -> KeysMock<'a> {
        self.ok_json(&test_json::KEYS_QUERY)
    }

    /// Returns a response with a failed server and a malformed device entry.
    pub fn ok_with_failures(self) -> KeysMock<'a> {
        self.ok_json(&test_json::KEYS_QUERY_WITH_FAILURES)
    }
}

/// A prebuilt mock for `POST /keys/claim` requests.
pub struct ClaimKeysEndpoint;

impl<'a> MockEndpoint<'a, ClaimKeysEndpoint> {
    /// Returns one signed curve25519 key for a device of `@b:x`.
    pub fn ok(self) -> KeysMock<'a> {
        self.ok_json(&test_json::KEYS_CLAIM)
    }

    /// Returns a response where no keys are left.
    pub fn ok_empty(self) -> KeysMock<'a> {
        self.ok_json(&test_json::KEYS_CLAIM_EMPTY)
    }
}

/// A prebuilt mock for `PUT /sendToDevice` requests.
pub struct SendToDeviceEndpoint;

impl<'a> MockEndpoint<'a, SendToDeviceEndpoint> {
    /// Returns a successful response.
    pub fn ok(self) -> KeysMock<'a> {
        self.ok_json(&test_json::EMPTY)
    }
}

/// A prebuilt mock for `GET /devices` requests.
pub struct DevicesEndpoint;

impl<'a> MockEndpoint<'a, DevicesEndpoint> {
    /// Returns a successful response with two devices.
    pub fn ok(self) -> KeysMock<'a> {
        self.ok_json(&test_json::DEVICES)
    }
}

/// A prebuilt mock for `DELETE /devices/{deviceId}` requests.
pub struct DeleteDeviceEndpoint;

impl<'a> MockEndpoint<'a, DeleteDeviceEndpoint> {
    /// Returns a successful response.
    pub fn ok(self) -> KeysMock<'a> {
        self.ok_json(&test_json::EMPTY)
    }

    /// Returns a 401 response asking for password authentication.
    pub fn uiaa_password(self) -> KeysMock<'a> {
        self.respond_with(ResponseTemplate::new(401).set_body_json(&*test_json::UIAA_PASSWORD))
    }
}

/// A prebuilt mock for `PUT /devices/{deviceId}` requests.
pub struct SetDeviceNameEndpoint;

impl<'a> MockEndpoint<'a, SetDeviceNameEndpoint> {
    /// Returns a successful response.
    pub fn ok(self) -> KeysMock<'a> {
        self.ok_json(&test_json::EMPTY)
    }
}

/// A prebuilt mock for `GET /keys/changes` requests.
pub struct KeyChangesEndpoint;

impl<'a> MockEndpoint<'a, KeyChangesEndpoint> {
    /// Only match requests between the given tokens.
    pub fn between(mut self, from: &str, to: &str) -> Self {
        self.mock = self.mock.and(query_param("from", from)).and(query_param("to", to));
        self
    }

    /// Returns `@a:x` and `@b:x` as changed and `@c:x` as left.
    pub fn ok(self) -> KeysMock<'a> {
        self.ok_json(&test_json::KEY_CHANGES)
    }
}
