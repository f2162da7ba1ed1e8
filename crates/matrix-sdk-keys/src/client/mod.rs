// Copyright 2020 Damir Jelić
// Copyright 2020 The Matrix.org Foundation C.I.C.
// Copyright 2022 Famedly GmbH
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

use std::{
    collections::BTreeMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use ruma::{OwnedDeviceId, OwnedTransactionId, OwnedUserId};
use tokio::runtime::Handle;
use tracing::error;
use url::Url;

use crate::{
    api::{
        devices::{AuthData, DeleteDevice, Device, GetDevices, SetDeviceName},
        keys::{
            ClaimKeys, GetKeyChanges, KeyChanges, KeyUploadRequest, KeysClaimResult,
            KeysQueryResult, QueryKeys, UploadKeys,
        },
        to_device::{SendToDevice, TransactionIdGenerator},
        Endpoint,
    },
    config::RequestConfig,
    device_map::DeviceMap,
    error::UnexpectedError,
    futures::OperationHandle,
    retry::{panic_message, spawn_operation, RetryContext},
    JsonObject,
};

mod builder;

pub use self::builder::KeysClientBuilder;

/// The client issuing the key-exchange requests of an end-to-end encrypted
/// Matrix client.
///
/// Every operation returns an [`OperationHandle`] right away and runs on its
/// own task. Transient failures are retried with the same request until the
/// operation succeeds, fails permanently or runs out of retries, and the
/// handle resolves exactly once with the outcome.
///
/// All of the state is held in an `Arc` so the `KeysClient` can be cloned
/// freely.
#[derive(Clone)]
pub struct KeysClient {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) context: RetryContext,
    pub(crate) transaction_ids: Arc<dyn TransactionIdGenerator>,
    pub(crate) runtime: Handle,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for KeysClient {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "KeysClient")
    }
}

impl KeysClient {
    /// Create a new [`KeysClient`] that will use the given homeserver and
    /// access token.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `homeserver_url` - The homeserver that the client should connect to.
    /// * `access_token` - The access token of the session.
    pub fn new(
        homeserver_url: Url,
        access_token: impl Into<String>,
    ) -> Result<Self, crate::ClientBuildError> {
        Self::builder().homeserver_url(homeserver_url).access_token(access_token).build()
    }

    /// Create a new [`KeysClientBuilder`].
    pub fn builder() -> KeysClientBuilder {
        KeysClientBuilder::new()
    }

    /// The homeserver of the client.
    pub fn homeserver(&self) -> &Url {
        self.inner.context.http_client.homeserver()
    }

    /// The default request config of the client.
    pub fn request_config(&self) -> RequestConfig {
        self.inner.context.http_client.request_config
    }

    /// Send an arbitrary endpoint with the default request config.
    pub fn send<E: Endpoint>(&self, endpoint: E) -> OperationHandle<E::Output> {
        self.send_with_config(endpoint, self.request_config())
    }

    /// Send an arbitrary endpoint with the given request config.
    pub fn send_with_config<E: Endpoint>(
        &self,
        endpoint: E,
        config: RequestConfig,
    ) -> OperationHandle<E::Output> {
        spawn_operation(self.inner.context.clone(), &self.inner.runtime, endpoint, config)
    }

    /// Upload the identity keys and/or one-time keys of a device.
    ///
    /// Resolves with the number of one-time keys left on the server, per
    /// algorithm.
    pub fn upload_keys(&self, request: KeyUploadRequest) -> OperationHandle<BTreeMap<String, u64>> {
        self.send(UploadKeys::new(request))
    }

    /// Download the device keys of the given users.
    ///
    /// # Arguments
    ///
    /// * `user_ids` - The users to get the keys of, every device of each of
    ///   them is returned.
    /// * `token` - The sync token the server may use to only return the
    ///   changes since that point. Ignored when empty.
    pub fn download_keys(
        &self,
        user_ids: impl IntoIterator<Item = OwnedUserId>,
        token: Option<String>,
    ) -> OperationHandle<KeysQueryResult> {
        self.send(QueryKeys::new(user_ids.into_iter().collect(), token))
    }

    /// Claim one-time keys to establish sessions with the given devices.
    ///
    /// `one_time_keys` maps every user and device to the algorithm of the key
    /// to claim, e.g. `signed_curve25519`.
    ///
    /// This operation consumes keys on the server and isn't retried unless
    /// [`RequestConfig::retry_non_idempotent`] is set.
    pub fn claim_one_time_keys(
        &self,
        one_time_keys: DeviceMap<String>,
    ) -> OperationHandle<KeysClaimResult> {
        self.send(ClaimKeys::new(one_time_keys))
    }

    /// Send an event to specific devices.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of the event.
    /// * `messages` - The content of the event for every user and device.
    /// * `txn_id` - The transaction ID the server deduplicates the send with.
    ///   A random one is generated if none is given, and reused by every
    ///   automatic retry. Callers that may issue the send again themselves
    ///   should pass an explicit one.
    pub fn send_to_device(
        &self,
        event_type: &str,
        messages: DeviceMap<JsonObject>,
        txn_id: Option<OwnedTransactionId>,
    ) -> OperationHandle<()> {
        let txn_id = match txn_id {
            Some(txn_id) => txn_id,
            None => match self.generate_transaction_id() {
                Ok(txn_id) => txn_id,
                Err(e) => {
                    error!(event_type, "Failed to generate a transaction ID: {e}");
                    return OperationHandle::ready(
                        format!("sendToDevice {event_type}"),
                        Err(e.into()),
                        self.inner.runtime.clone(),
                    );
                }
            },
        };

        self.send(SendToDevice::new(event_type, txn_id, messages))
    }

    fn generate_transaction_id(&self) -> Result<OwnedTransactionId, UnexpectedError> {
        let generator = &self.inner.transaction_ids;

        panic::catch_unwind(AssertUnwindSafe(|| generator.generate()))
            .map_err(|panic| UnexpectedError::Panicked(panic_message(panic)))
    }

    /// Get the devices registered to the account.
    pub fn get_devices(&self) -> OperationHandle<Vec<Device>> {
        self.send(GetDevices)
    }

    /// Delete a device of the account.
    ///
    /// Without `auth`, the server usually answers with a 401 error holding
    /// the auth flows to go through, see [`Error::as_uiaa_response()`].
    ///
    /// [`Error::as_uiaa_response()`]: crate::Error::as_uiaa_response
    pub fn delete_device(
        &self,
        device_id: OwnedDeviceId,
        auth: Option<AuthData>,
    ) -> OperationHandle<()> {
        self.send(DeleteDevice::new(device_id, auth))
    }

    /// Set the display name of a device. `None` clears it.
    pub fn set_device_name(
        &self,
        device_id: OwnedDeviceId,
        display_name: Option<String>,
    ) -> OperationHandle<()> {
        self.send(SetDeviceName::new(device_id, display_name))
    }

    /// Get the users whose devices changed between two sync tokens.
    pub fn get_key_changes(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> OperationHandle<KeyChanges> {
        self.send(GetKeyChanges::new(from, to))
    }
}
