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

use crate::AsyncTraitDeps;

/// The manager of the events that couldn't be sent while offline.
///
/// The client tells it whenever an operation that goes through the queue
/// succeeds, which is a sign that the homeserver can be reached again and
/// that the pending events can be retried.
pub trait OfflineQueue: AsyncTraitDeps {
    /// An operation that goes through the queue succeeded.
    ///
    /// `description` is the description of the operation, e.g. `getKeyChanges`.
    fn on_request_completed(&self, description: &str);
}
