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

//! The endpoints of the key-exchange request layer.
//!
//! Every logical operation is described by an [`Endpoint`] value, which owns
//! the parameters of the call and knows how to build the HTTP request from
//! them and how to decode the response. The retry machinery re-drives the same
//! value on every attempt, so all the attempts of an operation send the same
//! request.

use http::Method;
use percent_encoding::{AsciiSet, CONTROLS};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::UnexpectedError;

pub mod devices;
pub mod keys;
pub mod to_device;

/// Whether an operation can be sent again after an ambiguous failure without
/// changing its effect on the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetrySafety {
    /// Sending the request twice has the same effect as sending it once.
    Idempotent,
    /// Sending the request twice may have a different effect than sending it
    /// once, e.g. claiming a one-time key consumes a key on every attempt.
    NonIdempotent,
}

/// A logical operation against the client-server API.
pub trait Endpoint: Send + Sync + 'static {
    /// The deserialized body of a successful response.
    type Response: DeserializeOwned + Send;

    /// The value the operation resolves with.
    type Output: Send + 'static;

    /// The HTTP method of the endpoint.
    const METHOD: Method;

    /// A short description of the operation, used in logs.
    fn description(&self) -> String;

    /// The path of the endpoint, relative to the client API prefix, with every
    /// segment already percent-encoded.
    fn path(&self) -> String;

    /// The query string parameters.
    fn query(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// The JSON body of the request, if the endpoint has one.
    fn body(&self) -> Result<Option<Vec<u8>>, serde_json::Error> {
        Ok(None)
    }

    /// Whether the operation may be retried automatically.
    fn retry_safety(&self) -> RetrySafety {
        RetrySafety::Idempotent
    }

    /// Whether the offline queue should be told when the operation succeeds.
    fn tracks_unsent(&self) -> bool {
        false
    }

    /// Check the parameters of the operation before anything is sent.
    fn validate(&self) -> Result<(), UnexpectedError> {
        Ok(())
    }

    /// Reshape the response into the output of the operation.
    fn decode(&self, response: Self::Response) -> Result<Self::Output, UnexpectedError>;
}

/// The response of endpoints that answer with an empty JSON object.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct EmptyResponse {}

/// The [path percent-encode set] as defined in the WHATWG URL standard + `/`
/// and `%`, since we always encode single segments of the path.
///
/// [path percent-encode set]: https://url.spec.whatwg.org/#path-percent-encode-set
const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

pub(crate) fn encode_path_segment(segment: &str) -> String {
    percent_encoding::utf8_percent_encode(segment, PATH_SEGMENT_ENCODE_SET).to_string()
}
