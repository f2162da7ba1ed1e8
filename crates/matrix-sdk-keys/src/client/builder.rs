// Copyright 2022 The Matrix.org Foundation C.I.C.
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

use std::{fmt, sync::Arc};

use tokio::runtime::Handle;
use tracing::{debug, field::debug, instrument, Span};
use url::Url;

use super::{ClientInner, KeysClient};
use crate::{
    api::to_device::{RandomTransactionIds, TransactionIdGenerator},
    config::{HttpSettings, RequestConfig},
    error::ClientBuildError,
    http_client::{HttpClient, HttpSend},
    offline_queue::OfflineQueue,
    retry::{RetryContext, RetryScheduler},
};

/// Builder that allows creating and configuring various parts of a
/// [`KeysClient`].
///
/// The client spawns its operations on a tokio runtime, `build()` has to be
/// called from within one unless a runtime handle is given.
///
/// # Examples
///
/// ```
/// use matrix_sdk_keys::KeysClient;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// let client = KeysClient::builder()
///     .homeserver_url("https://example.org")
///     .access_token("syt_YWxpY2U_secret")
///     .user_agent("MyApp/v3.0")
///     .build()?;
/// # Ok(())
/// # }
/// ```
///
/// # Example for using a custom http client
///
/// Note: setting a custom http client will ignore `user_agent`, `proxy`, and
/// `disable_ssl_verification` - you'd need to set these yourself if you want
/// them.
///
/// ```
/// use matrix_sdk_keys::KeysClient;
///
/// // setting up a custom http client
/// let reqwest_builder = reqwest::ClientBuilder::new()
///     .https_only(true)
///     .no_proxy()
///     .user_agent("MyApp/v3.0");
///
/// let client_builder = KeysClient::builder().http_client(reqwest_builder.build()?);
/// # anyhow::Ok(())
/// ```
#[must_use]
#[derive(Clone)]
pub struct KeysClientBuilder {
    homeserver_url: Option<String>,
    access_token: Option<String>,
    http_cfg: Option<HttpConfig>,
    request_config: RequestConfig,
    retry_scheduler: Option<Arc<dyn RetryScheduler>>,
    offline_queue: Option<Arc<dyn OfflineQueue>>,
    transaction_ids: Arc<dyn TransactionIdGenerator>,
    runtime: Option<Handle>,
}

impl KeysClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            homeserver_url: None,
            access_token: None,
            http_cfg: None,
            request_config: Default::default(),
            retry_scheduler: None,
            offline_queue: None,
            transaction_ids: Arc::new(RandomTransactionIds),
            runtime: None,
        }
    }

    /// Set the homeserver URL to use.
    pub fn homeserver_url(mut self, url: impl AsRef<str>) -> Self {
        self.homeserver_url = Some(url.as_ref().to_owned());
        self
    }

    /// Set the access token every request is authenticated with.
    pub fn access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    /// Set the default timeout and retry policy of the requests.
    pub fn request_config(mut self, request_config: RequestConfig) -> Self {
        self.request_config = request_config;
        self
    }

    fn http_settings(&mut self) -> &mut HttpSettings {
        self.http_cfg.get_or_insert_with(Default::default).settings()
    }

    /// Set the proxy through which all the HTTP requests should go.
    ///
    /// Note, only HTTP proxies are supported.
    ///
    /// # Arguments
    ///
    /// * `proxy` - The HTTP URL of the proxy.
    pub fn proxy(mut self, proxy: impl AsRef<str>) -> Self {
        self.http_settings().proxy = Some(proxy.as_ref().to_owned());
        self
    }

    /// Disable SSL verification for the HTTP requests.
    pub fn disable_ssl_verification(mut self) -> Self {
        self.http_settings().disable_ssl_verification = true;
        self
    }

    /// Set a custom HTTP user agent for the client.
    pub fn user_agent(mut self, user_agent: impl AsRef<str>) -> Self {
        self.http_settings().user_agent = Some(user_agent.as_ref().to_owned());
        self
    }

    /// Use all the given [`HttpSettings`] at once.
    pub fn http_settings_from(mut self, settings: HttpSettings) -> Self {
        self.http_cfg = Some(HttpConfig::Settings(settings));
        self
    }

    /// Specify a [`reqwest::Client`] instance to handle sending requests and
    /// receiving responses.
    ///
    /// This method is mutually exclusive with
    /// [`proxy()`][Self::proxy],
    /// [`disable_ssl_verification`][Self::disable_ssl_verification] and
    /// [`user_agent()`][Self::user_agent].
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_cfg = Some(HttpConfig::Custom(Arc::new(client)));
        self
    }

    /// Use a custom [`HttpSend`] implementation as the transport.
    ///
    /// Like [`http_client()`][Self::http_client], this is mutually exclusive
    /// with the other HTTP settings.
    pub fn http_send(mut self, transport: Arc<dyn HttpSend>) -> Self {
        self.http_cfg = Some(HttpConfig::Custom(transport));
        self
    }

    /// Hand the retries of transiently failed operations to the given
    /// scheduler.
    ///
    /// Without a scheduler, retries happen right away and are capped.
    pub fn retry_scheduler(mut self, scheduler: Arc<dyn RetryScheduler>) -> Self {
        self.retry_scheduler = Some(scheduler);
        self
    }

    /// Tell the given offline queue whenever an operation that goes through
    /// it succeeds.
    pub fn offline_queue(mut self, offline_queue: Arc<dyn OfflineQueue>) -> Self {
        self.offline_queue = Some(offline_queue);
        self
    }

    /// Use a custom source for the transaction IDs of to-device messages.
    pub fn transaction_id_generator(mut self, generator: Arc<dyn TransactionIdGenerator>) -> Self {
        self.transaction_ids = generator;
        self
    }

    /// Spawn the operations on the given runtime, instead of the one the
    /// client is built in.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Create a [`KeysClient`] with the options set on this builder.
    ///
    /// # Errors
    ///
    /// This method can fail for two general reasons:
    ///
    /// * Invalid configuration: The homeserver URL is missing or malformed,
    ///   or the HTTP client couldn't be created.
    /// * No runtime: No runtime handle was given and the builder isn't called
    ///   from within a tokio runtime.
    #[instrument(skip_all, fields(homeserver))]
    pub fn build(self) -> Result<KeysClient, ClientBuildError> {
        debug!("Starting to build the KeysClient");

        let homeserver_url = self.homeserver_url.ok_or(ClientBuildError::MissingHomeserver)?;
        Span::current().record("homeserver", debug(&homeserver_url));

        let homeserver = Url::parse(&homeserver_url)?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ClientBuildError::NoRuntime)?,
        };

        let transport: Arc<dyn HttpSend> = match self.http_cfg.unwrap_or_default() {
            HttpConfig::Settings(mut settings) => {
                settings.timeout = self.request_config.timeout;
                Arc::new(settings.make_client()?)
            }
            HttpConfig::Custom(transport) => transport,
        };

        let http_client =
            HttpClient::new(transport, self.request_config, homeserver, self.access_token);

        let context = RetryContext {
            http_client: Arc::new(http_client),
            scheduler: self.retry_scheduler,
            offline_queue: self.offline_queue,
        };

        let inner = ClientInner { context, transaction_ids: self.transaction_ids, runtime };

        debug!("Done building the KeysClient");

        Ok(KeysClient { inner: Arc::new(inner) })
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for KeysClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeysClientBuilder")
            .field("homeserver_url", &self.homeserver_url)
            .field("http_cfg", &self.http_cfg)
            .field("request_config", &self.request_config)
            .field("retry_scheduler", &self.retry_scheduler)
            .field("offline_queue", &self.offline_queue)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
enum HttpConfig {
    Settings(HttpSettings),
    Custom(Arc<dyn HttpSend>),
}

impl HttpConfig {
    fn settings(&mut self) -> &mut HttpSettings {
        if let Self::Custom(_) = self {
            *self = Self::default();
        }

        match self {
            Self::Settings(s) => s,
            Self::Custom(_) => unreachable!(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::Settings(HttpSettings::default())
    }
}
