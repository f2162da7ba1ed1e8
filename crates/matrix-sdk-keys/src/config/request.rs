// Copyright 2021 The Matrix.org Foundation C.I.C.
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
    fmt::{self, Debug},
    time::Duration,
};

use crate::http_client::DEFAULT_REQUEST_TIMEOUT;

/// The number of immediate retries a logical operation gets when no retry
/// scheduler is configured and no explicit retry limit was set.
pub(crate) const DEFAULT_IMMEDIATE_RETRY_LIMIT: u64 = 3;

/// Configuration for the requests the [`KeysClient`] makes.
///
/// This sets how often and for how long a logical operation should be
/// retried, as well as how long a single attempt is allowed to take.
///
/// By default the number of retries is left to the retry scheduler. Without a
/// scheduler, retries happen immediately and are capped at three.
///
/// # Examples
///
/// ```
/// use matrix_sdk_keys::config::RequestConfig;
/// use std::time::Duration;
///
/// // This makes requests fail after a single attempt and sets the timeout to 30s
/// let request_config = RequestConfig::new()
///     .disable_retry()
///     .timeout(Duration::from_secs(30));
/// ```
///
/// [`KeysClient`]: crate::KeysClient
#[derive(Copy, Clone)]
pub struct RequestConfig {
    pub(crate) timeout: Duration,
    pub(crate) retry_limit: Option<u64>,
    pub(crate) retry_timeout: Option<Duration>,
    pub(crate) retry_non_idempotent: bool,
}

#[cfg(not(tarpaulin_include))]
impl Debug for RequestConfig {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { timeout, retry_limit, retry_timeout, retry_non_idempotent } = self;

        let mut res = fmt.debug_struct("RequestConfig");
        res.field("timeout", timeout);

        if let Some(retry_limit) = retry_limit {
            res.field("retry_limit", retry_limit);
        }
        if let Some(retry_timeout) = retry_timeout {
            res.field("retry_timeout", retry_timeout);
        }
        if *retry_non_idempotent {
            res.field("retry_non_idempotent", &true);
        }

        res.finish()
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_limit: Default::default(),
            retry_timeout: Default::default(),
            retry_non_idempotent: false,
        }
    }
}

impl RequestConfig {
    /// Create a new default `RequestConfig`.
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// Create a new `RequestConfig` with default values, except the retry limit
    /// which is set to 3.
    #[must_use]
    pub fn short_retry() -> Self {
        Self::default().retry_limit(3)
    }

    /// This is a convenience method to disable the retries of a request.
    /// Setting the `retry_limit` to `0` has the same effect.
    #[must_use]
    pub fn disable_retry(mut self) -> Self {
        self.retry_limit = Some(0);
        self
    }

    /// The number of times a request should be retried. The default is to
    /// leave the limit to the retry scheduler.
    #[must_use]
    pub fn retry_limit(mut self, retry_limit: u64) -> Self {
        self.retry_limit = Some(retry_limit);
        self
    }

    /// Set the timeout duration for a single attempt of a request.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a timeout for how long a logical operation should be retried,
    /// counted from its first attempt.
    #[must_use]
    pub fn retry_timeout(mut self, retry_timeout: Duration) -> Self {
        self.retry_timeout = Some(retry_timeout);
        self
    }

    /// Allow retrying operations that aren't idempotent, such as claiming
    /// one-time keys.
    ///
    /// A claim that failed ambiguously, e.g. the response was lost after the
    /// server processed it, already consumed a one-time key. Retrying it will
    /// consume another one.
    #[must_use]
    pub fn retry_non_idempotent(mut self) -> Self {
        self.retry_non_idempotent = true;
        self
    }

    /// The retry limit that applies to an operation, given whether a retry
    /// scheduler is available.
    pub(crate) fn effective_retry_limit(&self, has_scheduler: bool) -> Option<u64> {
        match self.retry_limit {
            Some(limit) => Some(limit),
            None if has_scheduler => None,
            None => Some(DEFAULT_IMMEDIATE_RETRY_LIMIT),
        }
    }
}
