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

#![doc = include_str!("../README.md")]
#![warn(missing_debug_implementations, missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use async_trait::async_trait;
pub use bytes;
pub use reqwest;
pub use ruma;

pub mod api;
mod client;
pub mod config;
pub mod device_map;
mod error;
mod futures;
mod http_client;
mod offline_queue;
pub mod retry;

pub use api::{
    devices::{AuthData, AuthFlow, Device, UiaaInfo},
    keys::{KeyChanges, KeyUploadRequest, KeysClaimResult, KeysQueryResult, OneTimeKey},
    to_device::{RandomTransactionIds, SeededTransactionIds, TransactionIdGenerator},
    Endpoint, RetrySafety,
};
pub use client::{KeysClient, KeysClientBuilder};
pub use device_map::DeviceMap;
pub use error::{ClientBuildError, Error, HttpError, ProtocolError, Result, UnexpectedError};
pub use futures::OperationHandle;
pub use http_client::HttpSend;
pub use offline_queue::OfflineQueue;
pub use retry::{BackoffScheduler, QueuedRetryScheduler, RetryJob, RetryScheduler};

/// A JSON object, as sent and received for the opaque key and message
/// payloads.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Super trait that is used for the collaborator traits of the client.
pub trait AsyncTraitDeps: std::fmt::Debug + Send + Sync {}
impl<T: std::fmt::Debug + Send + Sync + ?Sized> AsyncTraitDeps for T {}
