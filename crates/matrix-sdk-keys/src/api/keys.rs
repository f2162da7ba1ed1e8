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

//! Uploading, querying and claiming keys, and polling the device list
//! changes.

use std::collections::{BTreeMap, BTreeSet};

use http::Method;
use ruma::{OwnedDeviceId, OwnedUserId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use super::{encode_path_segment, Endpoint, RetrySafety};
use crate::{
    device_map::{DeviceMap, WireDeviceMap},
    error::UnexpectedError,
    JsonObject,
};

/// The keys of the own device to publish on the homeserver.
///
/// At least one of the device keys or the one-time keys must be set.
#[derive(Clone, Debug, Default)]
pub struct KeyUploadRequest {
    /// The device to upload the keys for. When this is `None` or empty, the
    /// keys are uploaded for the device of the authenticated session.
    pub device_id: Option<OwnedDeviceId>,
    /// The signed identity keys of the device.
    pub device_keys: Option<JsonObject>,
    /// The one-time keys, keyed by `<algorithm>:<key_id>`.
    pub one_time_keys: Option<BTreeMap<String, JsonValue>>,
}

impl KeyUploadRequest {
    /// Create an empty upload request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upload the keys for the given device.
    pub fn device_id(mut self, device_id: OwnedDeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Set the identity keys to upload.
    pub fn device_keys(mut self, device_keys: JsonObject) -> Self {
        self.device_keys = Some(device_keys);
        self
    }

    /// Set the one-time keys to upload.
    pub fn one_time_keys(mut self, one_time_keys: BTreeMap<String, JsonValue>) -> Self {
        self.one_time_keys = Some(one_time_keys);
        self
    }
}

/// `POST /keys/upload[/{deviceId}]`
#[derive(Clone, Debug)]
pub struct UploadKeys {
    request: KeyUploadRequest,
}

impl UploadKeys {
    /// Create the endpoint for the given upload request.
    pub fn new(request: KeyUploadRequest) -> Self {
        Self { request }
    }

    /// The explicit device ID the keys are uploaded for, if any.
    fn target_device(&self) -> Option<&str> {
        self.request.device_id.as_deref().map(|d| d.as_str()).filter(|d| !d.is_empty())
    }
}

#[derive(Serialize)]
struct UploadKeysBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    device_keys: Option<&'a JsonObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    one_time_keys: Option<&'a BTreeMap<String, JsonValue>>,
}

/// The response to a key upload.
#[derive(Debug, Deserialize)]
pub struct UploadKeysResponse {
    #[serde(default)]
    one_time_key_counts: BTreeMap<String, u64>,
}

impl Endpoint for UploadKeys {
    type Response = UploadKeysResponse;
    /// The number of unclaimed one-time keys left on the server, per algorithm.
    type Output = BTreeMap<String, u64>;

    const METHOD: Method = Method::POST;

    fn description(&self) -> String {
        "uploadKeys".to_owned()
    }

    fn path(&self) -> String {
        match self.target_device() {
            Some(device_id) => format!("keys/upload/{}", encode_path_segment(device_id)),
            None => "keys/upload".to_owned(),
        }
    }

    fn body(&self) -> Result<Option<Vec<u8>>, serde_json::Error> {
        let body = UploadKeysBody {
            device_keys: self.request.device_keys.as_ref(),
            one_time_keys: self.request.one_time_keys.as_ref(),
        };

        serde_json::to_vec(&body).map(Some)
    }

    fn validate(&self) -> Result<(), UnexpectedError> {
        if self.request.device_keys.is_none() && self.request.one_time_keys.is_none() {
            return Err(UnexpectedError::InvalidParameter(
                "at least one of the device keys or the one-time keys must be set",
            ));
        }

        Ok(())
    }

    fn decode(&self, response: Self::Response) -> Result<Self::Output, UnexpectedError> {
        Ok(response.one_time_key_counts)
    }
}

/// `POST /keys/query`
#[derive(Clone, Debug)]
pub struct QueryKeys {
    user_ids: Vec<OwnedUserId>,
    token: Option<String>,
}

impl QueryKeys {
    /// Query the full device key set of every given user.
    ///
    /// When a `token` is given the server may restrict the response to the
    /// changes since that sync token.
    pub fn new(user_ids: Vec<OwnedUserId>, token: Option<String>) -> Self {
        Self { user_ids, token }
    }
}

#[derive(Serialize)]
struct QueryKeysBody<'a> {
    device_keys: BTreeMap<&'a str, JsonObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

/// The raw response to a key query.
#[derive(Debug, Deserialize)]
pub struct QueryKeysResponse {
    #[serde(default)]
    device_keys: WireDeviceMap<JsonValue>,
    #[serde(default)]
    failures: BTreeMap<String, JsonValue>,
}

/// The keys returned by a key query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeysQueryResult {
    /// The signed identity keys of every device of the queried users.
    pub device_keys: DeviceMap<JsonObject>,
    /// The remote servers that couldn't be reached, with the error each one
    /// returned.
    pub failures: BTreeMap<String, JsonValue>,
}

impl Endpoint for QueryKeys {
    type Response = QueryKeysResponse;
    type Output = KeysQueryResult;

    const METHOD: Method = Method::POST;

    fn description(&self) -> String {
        "downloadKeysForUsers".to_owned()
    }

    fn path(&self) -> String {
        "keys/query".to_owned()
    }

    fn body(&self) -> Result<Option<Vec<u8>>, serde_json::Error> {
        // An empty filter asks for all the devices of the user.
        let device_keys =
            self.user_ids.iter().map(|user_id| (user_id.as_str(), JsonObject::new())).collect();
        let token = self.token.as_deref().filter(|t| !t.is_empty());

        serde_json::to_vec(&QueryKeysBody { device_keys, token }).map(Some)
    }

    fn tracks_unsent(&self) -> bool {
        true
    }

    fn decode(&self, response: Self::Response) -> Result<Self::Output, UnexpectedError> {
        let device_keys =
            DeviceMap::from_wire_with(response.device_keys, |user_id, device_id, keys| {
                match keys {
                    JsonValue::Object(keys) => Some(keys),
                    _ => {
                        warn!(%user_id, %device_id, "Skipping device keys that aren't an object");
                        None
                    }
                }
            });

        Ok(KeysQueryResult { device_keys, failures: response.failures })
    }
}

/// A claimed one-time key.
#[derive(Clone, Debug, PartialEq)]
pub struct OneTimeKey {
    /// The algorithm of the key, e.g. `signed_curve25519`.
    pub algorithm: String,
    /// The ID of the key, unique for the device and algorithm.
    pub key_id: String,
    /// The key itself: a string for unsigned keys, or an object holding the
    /// key and its signatures for signed keys.
    pub key: JsonValue,
}

impl OneTimeKey {
    /// Create a key from its full `<algorithm>:<key_id>` identifier.
    ///
    /// Returns `None` if the identifier doesn't contain a `:` separator.
    pub fn parse(full_key_id: &str, key: JsonValue) -> Option<Self> {
        let (algorithm, key_id) = full_key_id.split_once(':')?;

        if algorithm.is_empty() {
            return None;
        }

        Some(Self { algorithm: algorithm.to_owned(), key_id: key_id.to_owned(), key })
    }

    /// The full identifier of the key, `<algorithm>:<key_id>`.
    pub fn full_key_id(&self) -> String {
        format!("{}:{}", self.algorithm, self.key_id)
    }

    /// The base64-encoded public key.
    pub fn key(&self) -> Option<&str> {
        match &self.key {
            JsonValue::String(key) => Some(key),
            JsonValue::Object(object) => object.get("key")?.as_str(),
            _ => None,
        }
    }

    /// The signatures of a signed key.
    pub fn signatures(&self) -> Option<&JsonObject> {
        self.key.as_object()?.get("signatures")?.as_object()
    }

    /// Pick the claimed key out of the `{<algorithm>:<key_id>: key}` object
    /// the server returns for a device.
    ///
    /// Returns `None` if the entry isn't an object holding a key.
    fn from_claimed(keys: JsonValue) -> Option<Self> {
        let JsonValue::Object(keys) = keys else {
            return None;
        };

        let (full_key_id, key) = keys.into_iter().next()?;
        Self::parse(&full_key_id, key)
    }
}

/// `POST /keys/claim`
///
/// Claiming a key consumes it on the server, this endpoint is never retried
/// automatically unless [`RequestConfig::retry_non_idempotent`] is set.
///
/// [`RequestConfig::retry_non_idempotent`]: crate::config::RequestConfig::retry_non_idempotent
#[derive(Clone, Debug)]
pub struct ClaimKeys {
    one_time_keys: DeviceMap<String>,
}

impl ClaimKeys {
    /// Claim one key of the given algorithm for every user and device of the
    /// map.
    pub fn new(one_time_keys: DeviceMap<String>) -> Self {
        Self { one_time_keys }
    }
}

#[derive(Serialize)]
struct ClaimKeysBody<'a> {
    one_time_keys: &'a DeviceMap<String>,
}

/// The raw response to a key claim.
#[derive(Debug, Deserialize)]
pub struct ClaimKeysResponse {
    #[serde(default)]
    one_time_keys: WireDeviceMap<JsonValue>,
    #[serde(default)]
    failures: BTreeMap<String, JsonValue>,
}

/// The keys returned by a key claim.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeysClaimResult {
    /// The claimed keys. Users for whom no key could be claimed have no entry.
    pub one_time_keys: DeviceMap<OneTimeKey>,
    /// The remote servers that couldn't be reached, with the error each one
    /// returned.
    pub failures: BTreeMap<String, JsonValue>,
}

impl Endpoint for ClaimKeys {
    type Response = ClaimKeysResponse;
    type Output = KeysClaimResult;

    const METHOD: Method = Method::POST;

    fn description(&self) -> String {
        "claimOneTimeKeysForUsersDevices".to_owned()
    }

    fn path(&self) -> String {
        "keys/claim".to_owned()
    }

    fn body(&self) -> Result<Option<Vec<u8>>, serde_json::Error> {
        serde_json::to_vec(&ClaimKeysBody { one_time_keys: &self.one_time_keys }).map(Some)
    }

    fn retry_safety(&self) -> RetrySafety {
        RetrySafety::NonIdempotent
    }

    fn tracks_unsent(&self) -> bool {
        true
    }

    fn decode(&self, response: Self::Response) -> Result<Self::Output, UnexpectedError> {
        let one_time_keys =
            DeviceMap::from_wire_with(response.one_time_keys, |user_id, device_id, keys| {
                let key = OneTimeKey::from_claimed(keys);

                if key.is_none() {
                    warn!(%user_id, %device_id, "Failed to parse a claimed one-time key");
                }

                key
            });

        Ok(KeysClaimResult { one_time_keys, failures: response.failures })
    }
}

/// `GET /keys/changes`
#[derive(Clone, Debug)]
pub struct GetKeyChanges {
    from: String,
    to: String,
}

impl GetKeyChanges {
    /// Get the device list changes between two sync tokens.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into() }
    }
}

/// The raw response to a key changes request.
#[derive(Debug, Deserialize)]
pub struct KeyChangesResponse {
    #[serde(default)]
    changed: Vec<String>,
    #[serde(default)]
    left: Vec<String>,
}

/// The device list changes between two sync tokens.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyChanges {
    /// The sync token the changes start at.
    pub from: String,
    /// The sync token the changes end at.
    pub to: String,
    /// The users whose device list changed, their keys need to be queried
    /// again.
    pub changed: BTreeSet<OwnedUserId>,
    /// The users that don't share an encrypted room with us anymore.
    pub left: BTreeSet<OwnedUserId>,
}

fn parse_user_ids(user_ids: Vec<String>) -> BTreeSet<OwnedUserId> {
    user_ids
        .into_iter()
        .filter_map(|user_id| match UserId::parse(user_id.as_str()) {
            Ok(user_id) => Some(user_id),
            Err(e) => {
                warn!(%user_id, "Skipping a malformed user ID in the key changes: {e}");
                None
            }
        })
        .collect()
}

impl Endpoint for GetKeyChanges {
    type Response = KeyChangesResponse;
    type Output = KeyChanges;

    const METHOD: Method = Method::GET;

    fn description(&self) -> String {
        "getKeyChanges".to_owned()
    }

    fn path(&self) -> String {
        "keys/changes".to_owned()
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        vec![("from", self.from.clone()), ("to", self.to.clone())]
    }

    fn tracks_unsent(&self) -> bool {
        true
    }

    fn validate(&self) -> Result<(), UnexpectedError> {
        if self.from.is_empty() || self.to.is_empty() {
            return Err(UnexpectedError::InvalidParameter(
                "both the from and to tokens must be non-empty",
            ));
        }

        Ok(())
    }

    fn decode(&self, response: Self::Response) -> Result<Self::Output, UnexpectedError> {
        Ok(KeyChanges {
            from: self.from.clone(),
            to: self.to.clone(),
            changed: parse_user_ids(response.changed),
            left: parse_user_ids(response.left),
        })
    }
}
