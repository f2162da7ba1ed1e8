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

//! Managing the devices of the account.

use http::Method;
use ruma::OwnedDeviceId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{encode_path_segment, EmptyResponse, Endpoint, RetrySafety};
use crate::{error::UnexpectedError, JsonObject};

/// A device registered to the account.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Device {
    /// The ID of the device.
    pub device_id: OwnedDeviceId,
    /// The display name the user gave the device.
    #[serde(default)]
    pub display_name: Option<String>,
    /// The IP address the device was last seen from.
    #[serde(default)]
    pub last_seen_ip: Option<String>,
    /// When the device was last seen, in milliseconds since the unix epoch.
    #[serde(default)]
    pub last_seen_ts: Option<u64>,
    /// Any other field the server sent.
    #[serde(flatten)]
    pub extra: JsonObject,
}

/// `GET /devices`
#[derive(Clone, Copy, Debug, Default)]
pub struct GetDevices;

/// The raw response to a device list request.
#[derive(Debug, Deserialize)]
pub struct DevicesResponse {
    #[serde(default)]
    devices: Vec<Device>,
}

impl Endpoint for GetDevices {
    type Response = DevicesResponse;
    type Output = Vec<Device>;

    const METHOD: Method = Method::GET;

    fn description(&self) -> String {
        "getDevicesListInfo".to_owned()
    }

    fn path(&self) -> String {
        "devices".to_owned()
    }

    fn tracks_unsent(&self) -> bool {
        true
    }

    fn decode(&self, response: Self::Response) -> Result<Self::Output, UnexpectedError> {
        Ok(response.devices)
    }
}

/// The data of one stage of a user-interactive auth flow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthData {
    /// The type of the stage, e.g. `m.login.password`.
    #[serde(rename = "type")]
    pub auth_type: String,
    /// The session ID the server handed out in its first 401 response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// The stage-specific fields, e.g. the identifier and password.
    #[serde(flatten)]
    pub extra: JsonObject,
}

impl AuthData {
    /// Authenticate with a user ID and a password.
    pub fn password(user: &str, password: &str, session: Option<String>) -> Self {
        let mut extra = JsonObject::new();
        extra.insert(
            "identifier".to_owned(),
            serde_json::json!({ "type": "m.id.user", "user": user }),
        );
        extra.insert("password".to_owned(), JsonValue::from(password));

        Self { auth_type: "m.login.password".to_owned(), session, extra }
    }

    /// Complete a stage that needs no data.
    pub fn dummy(session: Option<String>) -> Self {
        Self { auth_type: "m.login.dummy".to_owned(), session, extra: JsonObject::new() }
    }
}

/// A list of stages that together authenticate the user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AuthFlow {
    /// The types of the stages, in order.
    #[serde(default)]
    pub stages: Vec<String>,
}

/// The information a server returns when a request needs user-interactive
/// auth.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct UiaaInfo {
    /// The flows the user can go through.
    #[serde(default)]
    pub flows: Vec<AuthFlow>,
    /// The stages already completed in this session.
    #[serde(default)]
    pub completed: Vec<String>,
    /// Per-stage parameters, e.g. the terms of service to accept.
    #[serde(default)]
    pub params: JsonObject,
    /// The session to pass back in the [`AuthData`] of the next attempt.
    #[serde(default)]
    pub session: Option<String>,
}

/// `DELETE /devices/{deviceId}`
///
/// Deleting a device requires user-interactive auth: a first request without
/// auth data fails with a 401 [`ProtocolError`] carrying a [`UiaaInfo`], and
/// the caller then deletes again with the auth data of the completed stage.
///
/// [`ProtocolError`]: crate::ProtocolError
#[derive(Clone, Debug)]
pub struct DeleteDevice {
    device_id: OwnedDeviceId,
    auth: Option<AuthData>,
}

impl DeleteDevice {
    /// Delete the given device, optionally continuing an auth session.
    pub fn new(device_id: OwnedDeviceId, auth: Option<AuthData>) -> Self {
        Self { device_id, auth }
    }
}

#[derive(Serialize)]
struct DeleteDeviceBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<&'a AuthData>,
}

impl Endpoint for DeleteDevice {
    type Response = EmptyResponse;
    type Output = ();

    const METHOD: Method = Method::DELETE;

    fn description(&self) -> String {
        "deleteDevice".to_owned()
    }

    fn path(&self) -> String {
        format!("devices/{}", encode_path_segment(self.device_id.as_str()))
    }

    fn body(&self) -> Result<Option<Vec<u8>>, serde_json::Error> {
        serde_json::to_vec(&DeleteDeviceBody { auth: self.auth.as_ref() }).map(Some)
    }

    fn retry_safety(&self) -> RetrySafety {
        // A stage may be consumed by the first attempt, the caller has to
        // restart the auth flow instead.
        if self.auth.is_some() {
            RetrySafety::NonIdempotent
        } else {
            RetrySafety::Idempotent
        }
    }

    fn tracks_unsent(&self) -> bool {
        true
    }

    fn validate(&self) -> Result<(), UnexpectedError> {
        if self.device_id.as_str().is_empty() {
            return Err(UnexpectedError::InvalidParameter("the device ID must not be empty"));
        }

        Ok(())
    }

    fn decode(&self, _: Self::Response) -> Result<Self::Output, UnexpectedError> {
        Ok(())
    }
}

/// `PUT /devices/{deviceId}`
#[derive(Clone, Debug)]
pub struct SetDeviceName {
    device_id: OwnedDeviceId,
    display_name: String,
}

impl SetDeviceName {
    /// Rename the given device. A missing name clears the display name.
    pub fn new(device_id: OwnedDeviceId, display_name: Option<String>) -> Self {
        Self { device_id, display_name: display_name.unwrap_or_default() }
    }
}

#[derive(Serialize)]
struct SetDeviceNameBody<'a> {
    display_name: &'a str,
}

impl Endpoint for SetDeviceName {
    type Response = EmptyResponse;
    type Output = ();

    const METHOD: Method = Method::PUT;

    fn description(&self) -> String {
        "setDeviceName".to_owned()
    }

    fn path(&self) -> String {
        format!("devices/{}", encode_path_segment(self.device_id.as_str()))
    }

    fn body(&self) -> Result<Option<Vec<u8>>, serde_json::Error> {
        serde_json::to_vec(&SetDeviceNameBody { display_name: &self.display_name }).map(Some)
    }

    fn tracks_unsent(&self) -> bool {
        true
    }

    fn validate(&self) -> Result<(), UnexpectedError> {
        if self.device_id.as_str().is_empty() {
            return Err(UnexpectedError::InvalidParameter("the device ID must not be empty"));
        }

        Ok(())
    }

    fn decode(&self, _: Self::Response) -> Result<Self::Output, UnexpectedError> {
        Ok(())
    }
}
