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

//! Driving logical operations to their terminal outcome.
//!
//! A logical operation is an [`Endpoint`] value plus the sending half of a
//! single-shot channel. It is sent, and on transient failures sent again,
//! until it reaches exactly one terminal outcome: a success, a network error,
//! a protocol error or an unexpected error.
//!
//! Without a [`RetryScheduler`], retries happen right away on the task of the
//! operation and are capped. With a scheduler, every retry is handed to it as
//! a [`RetryJob`] which the scheduler runs whenever it sees fit.

use std::{
    any::Any,
    fmt,
    mem,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};

use backoff::{
    backoff::Backoff, Error as RetryError, ExponentialBackoff, ExponentialBackoffBuilder,
};
use bytes::Bytes;
use futures_util::{
    future::{join_all, BoxFuture},
    FutureExt,
};
use http::{header::RETRY_AFTER, StatusCode};
use serde::de::DeserializeOwned;
use tokio::{runtime::Handle, sync::oneshot, time::Instant};
use tracing::{debug, error, trace, warn};

use crate::{
    api::{Endpoint, RetrySafety},
    config::RequestConfig,
    error::{Error, HttpError, ProtocolError, Result, UnexpectedError},
    futures::OperationHandle,
    http_client::HttpClient,
    offline_queue::OfflineQueue,
    AsyncTraitDeps,
};

/// A retry of a logical operation, waiting to be run.
///
/// Running the job sends the operation again. Dropping the job without
/// running it resolves the operation with
/// [`UnexpectedError::Abandoned`].
pub struct RetryJob {
    description: String,
    attempt: u64,
    retry_after: Option<Duration>,
    task: BoxFuture<'static, ()>,
}

impl RetryJob {
    /// The description of the operation to retry.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The number of the attempt this job makes, the first retry is attempt
    /// `2`.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// How long the server asked us to wait before retrying, if it did.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Send the operation again.
    ///
    /// The returned future completes once the attempt, and any further
    /// immediate retry of it, is done. Retries handed over to the scheduler
    /// again are not waited for.
    pub async fn run(self) {
        self.task.await
    }
}

impl fmt::Debug for RetryJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryJob")
            .field("description", &self.description)
            .field("attempt", &self.attempt)
            .field("retry_after", &self.retry_after)
            .finish_non_exhaustive()
    }
}

/// Decides when the retries of logical operations run.
pub trait RetryScheduler: AsyncTraitDeps {
    /// Take care of a retry.
    ///
    /// The scheduler may run the job at any later point, from any task, or
    /// drop it to give up on the operation.
    fn schedule(&self, job: RetryJob);
}

/// A [`RetryScheduler`] running every retry after an exponentially growing
/// delay.
///
/// The delay honors the `retry_after` hint of rate-limited responses when it's
/// longer than the computed backoff.
#[derive(Clone, Debug)]
pub struct BackoffScheduler {
    backoff: ExponentialBackoff,
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(60))
    }
}

impl BackoffScheduler {
    /// Create a scheduler whose first retry waits around `initial_interval`,
    /// doubling on every further attempt up to `max_interval`.
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(initial_interval)
            .with_max_interval(max_interval)
            .with_max_elapsed_time(None)
            .build();

        Self { backoff }
    }

    /// Use the given backoff policy.
    pub fn with_backoff(backoff: ExponentialBackoff) -> Self {
        Self { backoff }
    }

    /// The delay before the given attempt.
    fn delay(&self, attempt: u64, retry_after: Option<Duration>) -> Duration {
        let mut backoff = self.backoff.clone();
        backoff.reset();

        let mut delay = Duration::ZERO;
        for _ in 1..attempt {
            match backoff.next_backoff() {
                Some(next) => delay = next,
                None => break,
            }
        }

        retry_after.map_or(delay, |retry_after| retry_after.max(delay))
    }
}

impl RetryScheduler for BackoffScheduler {
    fn schedule(&self, job: RetryJob) {
        let delay = self.delay(job.attempt, job.retry_after);
        debug!(description = job.description, attempt = job.attempt, ?delay, "Scheduling a retry");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.run().await;
        });
    }
}

/// A [`RetryScheduler`] holding the retries until it's told to run them, e.g.
/// once the connectivity is back.
#[derive(Debug, Default)]
pub struct QueuedRetryScheduler {
    jobs: Mutex<Vec<RetryJob>>,
}

impl QueuedRetryScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of retries waiting to be run.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Run all the retries waiting in the queue, concurrently.
    ///
    /// Retries that fail transiently again are queued again.
    pub async fn flush(&self) {
        let jobs = mem::take(&mut *self.lock());
        debug!(count = jobs.len(), "Flushing the queued retries");

        join_all(jobs.into_iter().map(RetryJob::run)).await;
    }

    /// Give up on all the queued retries, their operations resolve with
    /// [`UnexpectedError::Abandoned`].
    pub fn discard(&self) {
        let jobs = mem::take(&mut *self.lock());
        debug!(count = jobs.len(), "Discarding the queued retries");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RetryJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RetryScheduler for QueuedRetryScheduler {
    fn schedule(&self, job: RetryJob) {
        trace!(description = job.description, attempt = job.attempt, "Queuing a retry");
        self.lock().push(job);
    }
}

/// The collaborators shared by all the logical operations of a client.
#[derive(Clone, Debug)]
pub(crate) struct RetryContext {
    pub(crate) http_client: Arc<HttpClient>,
    pub(crate) scheduler: Option<Arc<dyn RetryScheduler>>,
    pub(crate) offline_queue: Option<Arc<dyn OfflineQueue>>,
}

/// Start a logical operation on the given runtime.
///
/// This never blocks: the operation runs on its own task and the returned
/// handle resolves with its terminal outcome.
pub(crate) fn spawn_operation<E: Endpoint>(
    context: RetryContext,
    runtime: &Handle,
    endpoint: E,
    config: RequestConfig,
) -> OperationHandle<E::Output> {
    let description = endpoint.description();
    let (sender, receiver) = oneshot::channel();

    let operation = Operation {
        description: description.clone(),
        endpoint: Arc::new(endpoint),
        context,
        config,
        attempt: 1,
        started: None,
        sender,
    };

    runtime.spawn(drive(operation));

    OperationHandle::new(description, receiver, runtime.clone())
}

struct Operation<E: Endpoint> {
    description: String,
    endpoint: Arc<E>,
    context: RetryContext,
    config: RequestConfig,
    attempt: u64,
    started: Option<Instant>,
    sender: oneshot::Sender<Result<E::Output>>,
}

impl<E: Endpoint> Operation<E> {
    async fn send_once(&self) -> Result<E::Output, RetryError<Error>> {
        self.endpoint.validate().map_err(|e| RetryError::Permanent(e.into()))?;

        let http_client = &self.context.http_client;
        let request = http_client
            .serialize_request(&*self.endpoint)
            .map_err(|e| RetryError::Permanent(e.into()))?;

        let response = http_client.send(request, self.config).await.map_err(|e| {
            if e.is_transient() {
                RetryError::Transient { err: Error::Network(e), retry_after: None }
            } else {
                RetryError::Permanent(Error::Network(e))
            }
        })?;

        let response = classify_response::<E::Response>(response)?;

        self.endpoint.decode(response).map_err(|e| RetryError::Permanent(e.into()))
    }

    fn can_retry(&self) -> bool {
        if self.endpoint.retry_safety() == RetrySafety::NonIdempotent
            && !self.config.retry_non_idempotent
        {
            debug!(description = self.description, "Not retrying a non-idempotent operation");
            return false;
        }

        let has_scheduler = self.context.scheduler.is_some();
        if let Some(retry_limit) = self.config.effective_retry_limit(has_scheduler) {
            // `attempt - 1` retries were made so far.
            if self.attempt > retry_limit {
                return false;
            }
        }

        if let (Some(retry_timeout), Some(started)) = (self.config.retry_timeout, self.started) {
            if started.elapsed() >= retry_timeout {
                return false;
            }
        }

        true
    }

    fn complete(self, result: Result<E::Output>) {
        match &result {
            Ok(_) => {
                debug!(
                    description = self.description,
                    attempt = self.attempt,
                    "Operation succeeded"
                );

                if self.endpoint.tracks_unsent() {
                    if let Some(offline_queue) = &self.context.offline_queue {
                        offline_queue.on_request_completed(&self.description);
                    }
                }
            }
            Err(Error::Unexpected(e)) => {
                error!(description = self.description, "Operation failed unexpectedly: {e}");
            }
            Err(e) => {
                debug!(
                    description = self.description,
                    attempt = self.attempt,
                    "Operation failed: {e}"
                );
            }
        }

        if self.sender.send(result).is_err() {
            trace!("The handle of the operation was dropped, discarding the outcome");
        }
    }
}

/// Drive the operation until it reaches its terminal outcome, or until a
/// retry is handed over to the scheduler.
fn drive<E: Endpoint>(mut operation: Operation<E>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        loop {
            operation.started.get_or_insert_with(Instant::now);

            let outcome = AssertUnwindSafe(operation.send_once())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(RetryError::Permanent(Error::Unexpected(UnexpectedError::Panicked(
                        panic_message(panic),
                    ))))
                });

            let (error, retry_after) = match outcome {
                Ok(output) => return operation.complete(Ok(output)),
                Err(RetryError::Permanent(error)) => return operation.complete(Err(error)),
                Err(RetryError::Transient { err, retry_after }) => (err, retry_after),
            };

            if !operation.can_retry() {
                return operation.complete(Err(error));
            }

            operation.attempt += 1;
            warn!(
                description = operation.description,
                attempt = operation.attempt,
                "Transient failure, retrying: {error}"
            );

            match operation.context.scheduler.clone() {
                Some(scheduler) => {
                    let job = RetryJob {
                        description: operation.description.clone(),
                        attempt: operation.attempt,
                        retry_after,
                        task: drive(operation),
                    };

                    return scheduler.schedule(job);
                }
                None => {
                    if let Some(retry_after) = retry_after {
                        tokio::time::sleep(retry_after).await;
                    }
                }
            }
        }
    })
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn retry_after_header(response: &http::Response<Bytes>) -> Option<Duration> {
    let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse().ok().map(Duration::from_secs)
}

/// Turn a response into the deserialized body of a success, or into an error
/// tagged as transient or permanent.
pub(crate) fn classify_response<R: DeserializeOwned>(
    response: http::Response<Bytes>,
) -> Result<R, RetryError<Error>> {
    let status = response.status();
    let body = response.body();

    if status.is_success() {
        let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) { b"{}" } else { body };

        return serde_json::from_slice(body).map_err(|e| {
            RetryError::Permanent(Error::Unexpected(UnexpectedError::Deserialization(e)))
        });
    }

    let retry_after = retry_after_header(&response);
    let protocol_error = ProtocolError::from_response(status, retry_after, body);

    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || protocol_error.as_ref().is_some_and(ProtocolError::is_limit_exceeded);

    if rate_limited {
        let error =
            protocol_error.unwrap_or_else(|| ProtocolError::unstructured(status, retry_after));
        let retry_after = error.retry_after;

        return Err(RetryError::Transient { err: Error::Protocol(error), retry_after });
    }

    if status.is_server_error() {
        let err = match protocol_error {
            Some(error) => Error::Protocol(error),
            None => Error::Network(HttpError::Server(status)),
        };

        return Err(RetryError::Transient { err, retry_after: None });
    }

    let error = protocol_error.unwrap_or_else(|| ProtocolError::unstructured(status, retry_after));
    Err(RetryError::Permanent(Error::Protocol(error)))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use assert_matches2::{assert_let, assert_matches};
    use async_trait::async_trait;
    use backoff::Error as RetryError;
    use bytes::Bytes;
    use http::StatusCode;
    use ruma::{device_id, user_id};
    use serde_json::json;
    use tokio::runtime::Handle;
    use url::Url;

    use super::{
        classify_response, spawn_operation, BackoffScheduler, QueuedRetryScheduler, RetryContext,
        RetryScheduler,
    };
    use crate::{
        api::{
            devices::GetDevices,
            keys::{ClaimKeys, GetKeyChanges, QueryKeys},
            Endpoint,
        },
        config::RequestConfig,
        device_map::DeviceMap,
        error::{Error, HttpError, UnexpectedError},
        http_client::{HttpClient, HttpSend},
        offline_queue::OfflineQueue,
    };

    /// A request as seen by the transport.
    #[derive(Clone, Debug, PartialEq, Eq)]
    struct SentRequest {
        method: http::Method,
        uri: String,
        body: Bytes,
    }

    #[derive(Debug)]
    enum Reply {
        Status(u16, serde_json::Value),
        Unreachable,
        Panic,
    }

    #[derive(Debug, Default)]
    struct FakeTransport {
        replies: Mutex<VecDeque<Reply>>,
        sent: Mutex<Vec<SentRequest>>,
    }

    impl FakeTransport {
        fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
            let replies = Mutex::new(replies.into_iter().collect());
            Arc::new(Self { replies, ..Default::default() })
        }

        fn sent(&self) -> Vec<SentRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpSend for FakeTransport {
        async fn send_request(
            &self,
            request: http::Request<Bytes>,
            _timeout: Duration,
        ) -> Result<http::Response<Bytes>, HttpError> {
            self.sent.lock().unwrap().push(SentRequest {
                method: request.method().clone(),
                uri: request.uri().to_string(),
                body: request.body().clone(),
            });

            let reply = self.replies.lock().unwrap().pop_front();

            match reply.unwrap_or(Reply::Status(200, json!({}))) {
                Reply::Status(status, body) => Ok(http::Response::builder()
                    .status(status)
                    .body(Bytes::from(body.to_string()))
                    .unwrap()),
                Reply::Unreachable => Err(HttpError::Unreachable("offline".to_owned())),
                Reply::Panic => panic!("the transport exploded"),
            }
        }
    }

    #[derive(Debug, Default)]
    struct CountingQueue {
        completed: Mutex<Vec<String>>,
    }

    impl OfflineQueue for CountingQueue {
        fn on_request_completed(&self, description: &str) {
            self.completed.lock().unwrap().push(description.to_owned());
        }
    }

    fn context(
        transport: Arc<FakeTransport>,
        scheduler: Option<Arc<dyn RetryScheduler>>,
        offline_queue: Option<Arc<dyn OfflineQueue>>,
    ) -> RetryContext {
        let http_client = HttpClient::new(
            transport,
            RequestConfig::new(),
            Url::parse("https://example.org").unwrap(),
            Some("1234".to_owned()),
        );

        RetryContext { http_client: Arc::new(http_client), scheduler, offline_queue }
    }

    fn server_error() -> Reply {
        Reply::Status(503, json!({ "errcode": "M_UNKNOWN", "error": "Service unavailable" }))
    }

    fn query_keys() -> QueryKeys {
        QueryKeys::new(vec![user_id!("@a:x").to_owned(), user_id!("@b:x").to_owned()], None)
    }

    fn claim_keys() -> ClaimKeys {
        let mut map = DeviceMap::new();
        map.insert(
            user_id!("@a:x").to_owned(),
            device_id!("DEV1").to_owned(),
            "signed_curve25519".to_owned(),
        );
        ClaimKeys::new(map)
    }

    #[tokio::test]
    async fn test_retries_send_identical_requests() {
        let transport = FakeTransport::new([server_error(), Reply::Unreachable]);
        let context = context(transport.clone(), None, None);

        let result =
            spawn_operation(context, &Handle::current(), query_keys(), RequestConfig::new()).await;

        assert_matches!(result, Ok(_));

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(sent[1], sent[2]);
        assert_eq!(sent[0].uri, "https://example.org/_matrix/client/v3/keys/query");
    }

    #[tokio::test]
    async fn test_exactly_one_outcome_per_operation() {
        for failures in [0, 1, 5] {
            let transport = FakeTransport::new((0..failures).map(|_| server_error()));
            let context = context(transport.clone(), None, None);
            let outcomes = Arc::new(AtomicUsize::new(0));
            let (sender, receiver) = tokio::sync::oneshot::channel();

            let config = RequestConfig::new().retry_limit(5);
            let handle = spawn_operation(context, &Handle::current(), GetDevices, config);

            let counter = outcomes.clone();
            handle
                .on_complete(move |result| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    sender.send(result).unwrap();
                })
                .await
                .unwrap();

            assert_matches!(receiver.await.unwrap(), Ok(_));
            assert_eq!(outcomes.load(Ordering::SeqCst), 1);
            assert_eq!(transport.sent().len(), failures + 1);
        }
    }

    #[tokio::test]
    async fn test_immediate_retries_are_capped() {
        let transport = FakeTransport::new((0..10).map(|_| Reply::Unreachable));
        let context = context(transport.clone(), None, None);

        let result =
            spawn_operation(context, &Handle::current(), GetDevices, RequestConfig::new()).await;

        assert_let!(Err(Error::Network(HttpError::Unreachable(_))) = result);
        // The first attempt and three retries.
        assert_eq!(transport.sent().len(), 4);
    }

    #[tokio::test]
    async fn test_server_errors_without_body_are_network_errors() {
        let transport = FakeTransport::new((0..10).map(|_| Reply::Status(502, json!(null))));
        let context = context(transport.clone(), None, None);

        let config = RequestConfig::new().retry_limit(1);
        let result = spawn_operation(context, &Handle::current(), GetDevices, config).await;

        assert_let!(Err(Error::Network(HttpError::Server(status))) = result);
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_protocol_errors_are_not_retried() {
        let transport = FakeTransport::new([Reply::Status(
            403,
            json!({ "errcode": "M_FORBIDDEN", "error": "You shall not pass" }),
        )]);
        let context = context(transport.clone(), None, None);

        let result =
            spawn_operation(context, &Handle::current(), GetDevices, RequestConfig::new()).await;

        assert_let!(Err(Error::Protocol(error)) = result);
        assert_eq!(error.errcode, "M_FORBIDDEN");
        assert_eq!(error.status, StatusCode::FORBIDDEN);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_claims_are_not_retried_by_default() {
        let transport = FakeTransport::new([server_error()]);
        let context = context(transport.clone(), None, None);

        let result =
            spawn_operation(context, &Handle::current(), claim_keys(), RequestConfig::new()).await;

        assert_let!(Err(Error::Protocol(error)) = result);
        assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_claims_can_opt_into_retries() {
        let transport = FakeTransport::new([server_error()]);
        let context = context(transport.clone(), None, None);

        let config = RequestConfig::new().retry_non_idempotent();
        let result = spawn_operation(context, &Handle::current(), claim_keys(), config).await;

        assert_let!(Ok(claimed) = result);
        assert!(claimed.one_time_keys.is_empty());
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_parameters_are_reported_without_sending() {
        let transport = FakeTransport::new([]);
        let context = context(transport.clone(), None, None);

        let result = spawn_operation(
            context,
            &Handle::current(),
            GetKeyChanges::new("", "s2"),
            RequestConfig::new(),
        )
        .await;

        assert_matches!(result, Err(Error::Unexpected(UnexpectedError::InvalidParameter(_))));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_panics_are_reported_as_unexpected_errors() {
        let transport = FakeTransport::new([Reply::Panic]);
        let context = context(transport.clone(), None, None);

        let result =
            spawn_operation(context, &Handle::current(), GetDevices, RequestConfig::new()).await;

        assert_let!(Err(Error::Unexpected(UnexpectedError::Panicked(message))) = result);
        assert_eq!(message, "the transport exploded");
    }

    #[tokio::test]
    async fn test_undecodable_responses_are_unexpected_errors() {
        let transport = FakeTransport::new([Reply::Status(200, json!({ "devices": "nope" }))]);
        let context = context(transport.clone(), None, None);

        let result =
            spawn_operation(context, &Handle::current(), GetDevices, RequestConfig::new()).await;

        assert_matches!(result, Err(Error::Unexpected(UnexpectedError::Deserialization(_))));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_queued_retries() {
        let transport = FakeTransport::new([server_error(), server_error()]);
        let scheduler = Arc::new(QueuedRetryScheduler::new());
        let context = context(transport.clone(), Some(scheduler.clone()), None);

        let handle =
            spawn_operation(context, &Handle::current(), query_keys(), RequestConfig::new());

        // Wait for the first attempt to be queued.
        while scheduler.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.sent().len(), 1);

        scheduler.flush().await;
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(transport.sent().len(), 2);

        scheduler.flush().await;
        assert_eq!(scheduler.pending_count(), 0);

        assert_matches!(handle.await, Ok(_));
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_discarded_retries_resolve_as_abandoned() {
        let transport = FakeTransport::new([Reply::Unreachable]);
        let scheduler = Arc::new(QueuedRetryScheduler::new());
        let context = context(transport.clone(), Some(scheduler.clone()), None);

        let handle = spawn_operation(context, &Handle::current(), GetDevices, RequestConfig::new());

        while scheduler.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        scheduler.discard();

        assert_matches!(handle.await, Err(Error::Unexpected(UnexpectedError::Abandoned)));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_scheduler_honors_retry_after() {
        let transport = FakeTransport::new([Reply::Status(
            429,
            json!({ "errcode": "M_LIMIT_EXCEEDED", "error": "Slow down", "retry_after_ms": 5000 }),
        )]);
        let scheduler = Arc::new(BackoffScheduler::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
        ));
        let context = context(transport.clone(), Some(scheduler), None);

        let start = tokio::time::Instant::now();
        let result =
            spawn_operation(context, &Handle::current(), GetDevices, RequestConfig::new()).await;

        assert_matches!(result, Ok(_));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(transport.sent().len(), 2);
    }

    #[test]
    fn test_backoff_delay_grows() {
        let backoff = backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(None)
            .build();
        let scheduler = BackoffScheduler::with_backoff(backoff);

        assert_eq!(scheduler.delay(2, None), Duration::from_secs(1));
        assert_eq!(scheduler.delay(3, None), Duration::from_secs(2));
        assert_eq!(scheduler.delay(4, None), Duration::from_secs(4));
        assert_eq!(scheduler.delay(10, None), Duration::from_secs(10));
        assert_eq!(scheduler.delay(2, Some(Duration::from_secs(3))), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_offline_queue_is_told_about_tracked_operations() {
        let transport = FakeTransport::new([]);
        let queue = Arc::new(CountingQueue::default());
        let context = context(transport.clone(), None, Some(queue.clone()));

        spawn_operation(context.clone(), &Handle::current(), GetDevices, RequestConfig::new())
            .await
            .unwrap();
        assert_eq!(*queue.completed.lock().unwrap(), ["getDevicesListInfo"]);

        let send = crate::api::to_device::SendToDevice::new(
            "m.room.encrypted",
            "1".into(),
            DeviceMap::new(),
        );
        spawn_operation(context, &Handle::current(), send, RequestConfig::new()).await.unwrap();
        assert_eq!(queue.completed.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_timeout() {
        #[derive(Debug)]
        struct SlowTransport(AtomicUsize);

        #[async_trait]
        impl HttpSend for SlowTransport {
            async fn send_request(
                &self,
                _request: http::Request<Bytes>,
                _timeout: Duration,
            ) -> Result<http::Response<Bytes>, HttpError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                Err(HttpError::Timeout)
            }
        }

        let transport = Arc::new(SlowTransport(AtomicUsize::new(0)));
        let http_client = HttpClient::new(
            transport.clone(),
            RequestConfig::new(),
            Url::parse("https://example.org").unwrap(),
            None,
        );
        let context = RetryContext {
            http_client: Arc::new(http_client),
            scheduler: None,
            offline_queue: None,
        };

        let config = RequestConfig::new().retry_limit(10).retry_timeout(Duration::from_secs(15));
        let result = spawn_operation(context, &Handle::current(), GetDevices, config).await;

        assert_matches!(result, Err(Error::Network(HttpError::Timeout)));
        assert_eq!(transport.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_response_classification() {
        let response = |status: u16, body: &str| {
            http::Response::builder().status(status).body(Bytes::from(body.to_owned())).unwrap()
        };

        assert_matches!(
            classify_response::<serde_json::Value>(response(200, "")),
            Ok(serde_json::Value::Object(_))
        );
        assert_matches!(
            classify_response::<serde_json::Value>(response(404, "<html></html>")),
            Err(RetryError::Permanent(Error::Protocol(_)))
        );

        let rate_limited = http::Response::builder()
            .status(429)
            .header(http::header::RETRY_AFTER, "7")
            .body(Bytes::new())
            .unwrap();
        assert_let!(
            Err(RetryError::Transient { err: Error::Protocol(error), retry_after }) =
                classify_response::<serde_json::Value>(rate_limited)
        );
        assert_eq!(retry_after, Some(Duration::from_secs(7)));
        assert!(error.is_limit_exceeded());
    }

    #[test]
    fn test_endpoint_descriptions() {
        assert_eq!(query_keys().description(), "downloadKeysForUsers");
        assert_eq!(claim_keys().description(), "claimOneTimeKeysForUsersDevices");
    }
}
