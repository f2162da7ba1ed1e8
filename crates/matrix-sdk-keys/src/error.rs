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

//! Error conditions.
//!
//! Every logical operation resolves with at most one [`Error`], and the error
//! is always one of three kinds: a [`Network`](Error::Network) failure, a
//! [`Protocol`](Error::Protocol) error returned by the homeserver, or an
//! [`Unexpected`](Error::Unexpected) error raised on the client side.

use std::time::Duration;

use as_variant::as_variant;
use http::StatusCode;
use reqwest::Error as ReqwestError;
use serde::Deserialize;
use serde_json::Error as JsonError;
use thiserror::Error;
use url::ParseError as UrlParseError;

use crate::{api::devices::UiaaInfo, JsonObject};

/// Result type of the key-exchange operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The terminal error of a logical operation.
#[derive(Error, Debug)]
pub enum Error {
    /// The request never produced a usable response: the homeserver couldn't
    /// be reached, the request timed out, or the server kept failing with
    /// transient errors until the retries were exhausted.
    #[error("network error: {0}")]
    Network(#[source] HttpError),

    /// The homeserver rejected the request with a structured error.
    #[error(transparent)]
    Protocol(ProtocolError),

    /// Something went wrong on the client side while building the request,
    /// decoding the response or driving the operation.
    #[error("unexpected error: {0}")]
    Unexpected(#[source] UnexpectedError),
}

impl Error {
    /// If `self` is `Network(e)`, returns `Some(e)`.
    pub fn as_network_error(&self) -> Option<&HttpError> {
        as_variant!(self, Self::Network)
    }

    /// If `self` is `Protocol(e)`, returns `Some(e)`.
    pub fn as_protocol_error(&self) -> Option<&ProtocolError> {
        as_variant!(self, Self::Protocol)
    }

    /// If `self` is `Unexpected(e)`, returns `Some(e)`.
    pub fn as_unexpected_error(&self) -> Option<&UnexpectedError> {
        as_variant!(self, Self::Unexpected)
    }

    /// Shorthand for the `errcode` of a protocol error.
    pub fn errcode(&self) -> Option<&str> {
        self.as_protocol_error().map(|e| e.errcode.as_str())
    }

    /// Try to destructure the error into an user-interactive auth info.
    ///
    /// Some requests, e.g. deleting a device, require user-interactive auth.
    /// Doing such a request will fail the first time with a 401 status code,
    /// the response body will contain info how the client can authenticate.
    pub fn as_uiaa_response(&self) -> Option<UiaaInfo> {
        self.as_protocol_error().and_then(ProtocolError::uiaa_info)
    }
}

impl From<UnexpectedError> for Error {
    fn from(e: UnexpectedError) -> Self {
        Self::Unexpected(e)
    }
}

/// An error at the transport layer.
#[derive(Error, Debug)]
pub enum HttpError {
    /// An error reported by `reqwest`.
    #[error(transparent)]
    Reqwest(#[from] ReqwestError),

    /// The request didn't complete within the configured timeout.
    #[error("the request timed out")]
    Timeout,

    /// The homeserver couldn't be reached.
    #[error("the homeserver is unreachable: {0}")]
    Unreachable(String),

    /// The homeserver answered with a server error status and no structured
    /// error body.
    #[error("the homeserver responded with {0}")]
    Server(StatusCode),
}

impl HttpError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout | Self::Unreachable(_) => true,
            Self::Server(status) => status.is_server_error(),
        }
    }
}

/// A structured error returned by the homeserver, in the `errcode` + `error`
/// format of the client-server API.
#[derive(Error, Debug, Clone)]
#[error("[{status}] {errcode}: {error}")]
pub struct ProtocolError {
    /// The HTTP status code of the response.
    pub status: StatusCode,
    /// The Matrix error code, e.g. `M_FORBIDDEN`.
    pub errcode: String,
    /// The human-readable error message.
    pub error: String,
    /// How long the server asked us to wait before retrying, if it did.
    pub retry_after: Option<Duration>,
    /// The complete error body, if it was a JSON object.
    pub body: Option<JsonObject>,
}

/// The standard error body of the client-server API.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default = "unknown_errcode")]
    errcode: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

fn unknown_errcode() -> String {
    ProtocolError::UNKNOWN.to_owned()
}

impl ProtocolError {
    /// The error code used when the server didn't send one.
    pub const UNKNOWN: &'static str = "M_UNKNOWN";

    /// The error code of rate-limited requests.
    pub const LIMIT_EXCEEDED: &'static str = "M_LIMIT_EXCEEDED";

    /// Parse a non-successful response body.
    ///
    /// Returns `None` if the body isn't a JSON object.
    pub(crate) fn from_response(
        status: StatusCode,
        retry_after_header: Option<Duration>,
        body: &[u8],
    ) -> Option<Self> {
        let object: JsonObject = serde_json::from_slice(body).ok()?;
        let parsed: ErrorBody = serde_json::from_value(object.clone().into()).ok()?;

        let retry_after =
            parsed.retry_after_ms.map(Duration::from_millis).or(retry_after_header);

        Some(Self {
            status,
            errcode: parsed.errcode,
            error: parsed.error,
            retry_after,
            body: Some(object),
        })
    }

    /// Build an error for a response whose body couldn't be parsed.
    pub(crate) fn unstructured(status: StatusCode, retry_after: Option<Duration>) -> Self {
        Self {
            status,
            errcode: Self::UNKNOWN.to_owned(),
            error: status.canonical_reason().unwrap_or_default().to_owned(),
            retry_after,
            body: None,
        }
    }

    /// Whether the request was rate-limited.
    pub fn is_limit_exceeded(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS || self.errcode == Self::LIMIT_EXCEEDED
    }

    /// The user-interactive auth info contained in a 401 response, if any.
    pub fn uiaa_info(&self) -> Option<UiaaInfo> {
        if self.status != StatusCode::UNAUTHORIZED {
            return None;
        }

        let body = self.body.as_ref()?;
        if !body.contains_key("flows") {
            return None;
        }

        serde_json::from_value(body.clone().into()).ok()
    }
}

/// An error raised on the client side while driving a logical operation.
#[derive(Error, Debug)]
pub enum UnexpectedError {
    /// An argument violated the constraints of the operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The request body couldn't be serialized.
    #[error("failed to serialize the request: {0}")]
    Serialization(#[source] JsonError),

    /// The response body couldn't be deserialized.
    #[error("failed to deserialize the response: {0}")]
    Deserialization(#[source] JsonError),

    /// The request URL couldn't be built.
    #[error(transparent)]
    Url(#[from] UrlParseError),

    /// The HTTP request couldn't be built.
    #[error(transparent)]
    InvalidRequest(#[from] http::Error),

    /// The operation panicked.
    #[error("the operation panicked: {0}")]
    Panicked(String),

    /// The operation was dropped before reaching a terminal outcome, e.g. a
    /// retry scheduler discarded its retry job.
    #[error("the operation was abandoned before it completed")]
    Abandoned,
}

/// Errors that can happen while building a [`KeysClient`].
///
/// [`KeysClient`]: crate::KeysClient
#[derive(Error, Debug)]
pub enum ClientBuildError {
    /// No homeserver URL was given to the builder.
    #[error("no homeserver URL was configured")]
    MissingHomeserver,

    /// The homeserver URL couldn't be parsed.
    #[error(transparent)]
    Url(#[from] UrlParseError),

    /// The HTTP client couldn't be built.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The client was built outside of a tokio runtime and no runtime handle
    /// was given.
    #[error("no tokio runtime is available to spawn operations on")]
    NoRuntime,
}
