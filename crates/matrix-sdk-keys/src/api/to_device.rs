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

//! Sending messages directly to devices.

use std::{fmt, sync::Mutex};

use http::Method;
use rand::{rngs::StdRng, Rng, SeedableRng};
use ruma::OwnedTransactionId;
use serde::Serialize;

use super::{encode_path_segment, EmptyResponse, Endpoint};
use crate::{device_map::DeviceMap, error::UnexpectedError, AsyncTraitDeps, JsonObject};

/// A source of transaction IDs for to-device messages.
///
/// The homeserver deduplicates messages sent with the same transaction ID, so
/// the ID has to stay the same for all the attempts of a single send.
pub trait TransactionIdGenerator: AsyncTraitDeps {
    /// Create a new transaction ID.
    fn generate(&self) -> OwnedTransactionId;
}

/// Generates transaction IDs from the thread-local random number generator.
///
/// The IDs are random non-negative integers below `i32::MAX`, they are unique
/// in the practical sense only.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTransactionIds;

impl TransactionIdGenerator for RandomTransactionIds {
    fn generate(&self) -> OwnedTransactionId {
        rand::thread_rng().gen_range(0..i32::MAX).to_string().into()
    }
}

/// Generates a reproducible sequence of transaction IDs from a seed.
pub struct SeededTransactionIds {
    rng: Mutex<StdRng>,
}

impl SeededTransactionIds {
    /// Create a generator from the given seed.
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for SeededTransactionIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeededTransactionIds").finish_non_exhaustive()
    }
}

impl TransactionIdGenerator for SeededTransactionIds {
    fn generate(&self) -> OwnedTransactionId {
        let value = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..i32::MAX),
            Err(poisoned) => poisoned.into_inner().gen_range(0..i32::MAX),
        };

        value.to_string().into()
    }
}

/// `PUT /sendToDevice/{eventType}/{txnId}`
///
/// The transaction ID is fixed when the endpoint is created, every attempt of
/// the send reuses it.
#[derive(Clone, Debug)]
pub struct SendToDevice {
    event_type: String,
    txn_id: OwnedTransactionId,
    messages: DeviceMap<JsonObject>,
}

impl SendToDevice {
    /// Send the given per-device contents as events of type `event_type`.
    pub fn new(
        event_type: impl Into<String>,
        txn_id: OwnedTransactionId,
        messages: DeviceMap<JsonObject>,
    ) -> Self {
        Self { event_type: event_type.into(), txn_id, messages }
    }

    /// The transaction ID of the send.
    pub fn txn_id(&self) -> &OwnedTransactionId {
        &self.txn_id
    }
}

#[derive(Serialize)]
struct SendToDeviceBody<'a> {
    messages: &'a DeviceMap<JsonObject>,
}

impl Endpoint for SendToDevice {
    type Response = EmptyResponse;
    type Output = ();

    const METHOD: Method = Method::PUT;

    fn description(&self) -> String {
        format!("sendToDevice {}", self.event_type)
    }

    fn path(&self) -> String {
        format!(
            "sendToDevice/{}/{}",
            encode_path_segment(&self.event_type),
            encode_path_segment(self.txn_id.as_str())
        )
    }

    fn body(&self) -> Result<Option<Vec<u8>>, serde_json::Error> {
        serde_json::to_vec(&SendToDeviceBody { messages: &self.messages }).map(Some)
    }

    fn validate(&self) -> Result<(), UnexpectedError> {
        if self.event_type.is_empty() {
            return Err(UnexpectedError::InvalidParameter("the event type must not be empty"));
        }

        Ok(())
    }

    fn decode(&self, _: Self::Response) -> Result<Self::Output, UnexpectedError> {
        Ok(())
    }
}
