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

#![deny(unreachable_pub)]

use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle};

use crate::error::{Error, Result, UnexpectedError};

/// The pending outcome of a logical operation, returned by the
/// [`KeysClient`] operations.
///
/// The operation runs on its own task whether or not the handle is polled;
/// awaiting the handle yields its single terminal outcome. Dropping the
/// handle doesn't abort the operation, the outcome is then discarded.
///
/// [`KeysClient`]: crate::KeysClient
#[must_use = "the outcome of the operation is lost if the handle is dropped"]
pub struct OperationHandle<T> {
    description: String,
    receiver: oneshot::Receiver<Result<T>>,
    runtime: Handle,
}

impl<T> OperationHandle<T> {
    pub(crate) fn new(
        description: String,
        receiver: oneshot::Receiver<Result<T>>,
        runtime: Handle,
    ) -> Self {
        Self { description, receiver, runtime }
    }

    /// A handle for an operation that reached its outcome before being
    /// spawned.
    pub(crate) fn ready(description: String, result: Result<T>, runtime: Handle) -> Self {
        let (sender, receiver) = oneshot::channel();
        // The receiver is alive, the send can't fail.
        let _ = sender.send(result);

        Self::new(description, receiver, runtime)
    }

    /// The description of the operation, e.g. `uploadKeys`.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run `f` with the outcome of the operation once it's available, instead
    /// of awaiting the handle.
    pub fn on_complete<F>(self, f: F) -> JoinHandle<()>
    where
        T: Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let runtime = self.runtime.clone();
        runtime.spawn(async move { f(self.await) })
    }
}

impl<T> Future for OperationHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| match result {
            Ok(outcome) => outcome,
            // The sender only goes away without sending when the operation
            // was dropped, e.g. by a retry scheduler discarding it.
            Err(_) => Err(Error::Unexpected(UnexpectedError::Abandoned)),
        })
    }
}

impl<T> fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
