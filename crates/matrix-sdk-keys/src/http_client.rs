// Copyright 2020 The Matrix.org Foundation C.I.C.
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
    any::type_name,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use bytesize::ByteSize;
use http::{header, Method};
use tracing::{debug, field::debug, instrument, trace};
use url::Url;

use crate::{
    api::Endpoint,
    config::RequestConfig,
    error::{HttpError, UnexpectedError},
    AsyncTraitDeps,
};

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The path prefix of the client-server API endpoints.
pub(crate) const CLIENT_API_PREFIX: &str = "_matrix/client/v3";

/// Abstraction around the http layer. The allows implementors to use different
/// http libraries.
#[async_trait]
pub trait HttpSend: AsyncTraitDeps {
    /// The method abstracting sending request types and receiving response
    /// types.
    ///
    /// This is called by the client every time it wants to send anything to a
    /// homeserver. Responses with a non-successful status code must be
    /// returned as `Ok`, the client inspects them itself; `Err` is reserved
    /// for failures where no response was received.
    ///
    /// # Arguments
    ///
    /// * `request` - The http request that has been built from an
    ///   [`Endpoint`].
    ///
    /// * `timeout` - A timeout for the full request > response cycle.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use matrix_sdk_keys::{async_trait, bytes::Bytes, HttpError, HttpSend};
    ///
    /// #[derive(Debug)]
    /// struct Client(reqwest::Client);
    ///
    /// impl Client {
    ///     async fn response_to_http_response(
    ///         &self,
    ///         mut response: reqwest::Response,
    ///     ) -> Result<http::Response<Bytes>, HttpError> {
    ///         // Convert the reqwest response to a http one.
    ///         todo!()
    ///     }
    /// }
    ///
    /// #[async_trait]
    /// impl HttpSend for Client {
    ///     async fn send_request(
    ///         &self,
    ///         request: http::Request<Bytes>,
    ///         timeout: Duration,
    ///     ) -> Result<http::Response<Bytes>, HttpError> {
    ///         Ok(self
    ///             .response_to_http_response(
    ///                 self.0
    ///                     .execute(reqwest::Request::try_from(request)?)
    ///                     .await?,
    ///             )
    ///             .await?)
    ///     }
    /// }
    /// ```
    async fn send_request(
        &self,
        request: http::Request<Bytes>,
        timeout: Duration,
    ) -> Result<http::Response<Bytes>, HttpError>;
}

#[derive(Debug)]
pub(crate) struct HttpClient {
    pub(crate) inner: Arc<dyn HttpSend>,
    pub(crate) request_config: RequestConfig,
    homeserver: Url,
    access_token: Option<String>,
    next_request_id: Arc<AtomicU64>,
}

impl HttpClient {
    pub(crate) fn new(
        inner: Arc<dyn HttpSend>,
        request_config: RequestConfig,
        homeserver: Url,
        access_token: Option<String>,
    ) -> Self {
        HttpClient {
            inner,
            request_config,
            homeserver,
            access_token,
            next_request_id: AtomicU64::new(0).into(),
        }
    }

    pub(crate) fn homeserver(&self) -> &Url {
        &self.homeserver
    }

    fn get_request_id(&self) -> String {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        format!("REQ-{request_id}")
    }

    /// Build the full URL of an endpoint.
    fn endpoint_url<E: Endpoint>(&self, endpoint: &E) -> Result<Url, UnexpectedError> {
        let path = endpoint.path();

        // URL parsing resolves `.` and `..` segments, which would send the request
        // to a different endpoint.
        if path.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(UnexpectedError::InvalidParameter("path segments must not be `.` or `..`"));
        }

        let base = self.homeserver.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{CLIENT_API_PREFIX}/{path}"))?;

        let query = endpoint.query();
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        Ok(url)
    }

    /// Turn an endpoint value into an http request.
    ///
    /// This is called for every attempt of a logical operation, the same
    /// endpoint value always produces the same request.
    pub(crate) fn serialize_request<E: Endpoint>(
        &self,
        endpoint: &E,
    ) -> Result<http::Request<Bytes>, UnexpectedError> {
        trace!(request_type = type_name::<E>(), "Serializing request");

        let url = self.endpoint_url(endpoint)?;
        let body = endpoint.body().map_err(UnexpectedError::Serialization)?;

        let mut builder = http::Request::builder().method(E::METHOD).uri(url.as_str());

        if let Some(access_token) = &self.access_token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {access_token}"));
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Bytes::from(body))?,
            None => builder.body(Bytes::new())?,
        };

        Ok(request)
    }

    /// Send a single attempt of a request.
    #[instrument(
        skip(self, request, config),
        fields(config, uri, method, request_size, request_id, status, response_size)
    )]
    pub(crate) async fn send(
        &self,
        request: http::Request<Bytes>,
        config: RequestConfig,
    ) -> Result<http::Response<Bytes>, HttpError> {
        // Keep some local variables in a separate scope so the compiler doesn't include
        // them in the future type. https://github.com/rust-lang/rust/issues/57478
        {
            let request_id = self.get_request_id();
            let span = tracing::Span::current();

            span.record("config", debug(config)).record("request_id", request_id);

            let method = request.method();
            span.record("method", debug(method)).record("uri", request.uri().path());

            // POST, PUT, PATCH are the only methods that are reasonably used
            // in conjunction with request bodies
            if [Method::POST, Method::PUT, Method::PATCH].contains(method) {
                let request_size = request.body().len().try_into().unwrap_or(u64::MAX);
                span.record("request_size", ByteSize(request_size).to_string_as(true));
            }
        }

        debug!("Sending request");

        match self.inner.send_request(request, config.timeout).await {
            Ok(response) => {
                let response_size = response.body().len().try_into().unwrap_or(u64::MAX);
                tracing::Span::current()
                    .record("status", response.status().as_u16())
                    .record("response_size", ByteSize(response_size).to_string_as(true));

                debug!("Got response");
                Ok(response)
            }
            Err(e) => {
                debug!("Error while sending request: {e:?}");
                Err(e)
            }
        }
    }
}

/// Settings of the default `reqwest` based [`HttpSend`] implementation.
#[derive(Clone, Debug)]
pub struct HttpSettings {
    pub(crate) disable_ssl_verification: bool,
    pub(crate) proxy: Option<String>,
    pub(crate) user_agent: Option<String>,
    pub(crate) timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            disable_ssl_verification: false,
            proxy: None,
            user_agent: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl HttpSettings {
    /// Create the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route all the requests through the given proxy.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Set the user agent of the requests.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the connection-level timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Accept invalid TLS certificates. Only useful for development, e.g.
    /// behind mitmproxy.
    pub fn disable_ssl_verification(mut self) -> Self {
        self.disable_ssl_verification = true;
        self
    }

    /// Build a client with the specified configuration.
    pub(crate) fn make_client(&self) -> Result<reqwest::Client, HttpError> {
        let mut http_client = reqwest::Client::builder();

        if self.disable_ssl_verification {
            http_client = http_client.danger_accept_invalid_certs(true)
        }

        if let Some(p) = &self.proxy {
            http_client = http_client.proxy(reqwest::Proxy::all(p.as_str())?);
        }

        let user_agent = self.user_agent.clone().unwrap_or_else(|| "matrix-sdk-keys".to_owned());

        http_client = http_client.user_agent(user_agent).timeout(self.timeout);

        Ok(http_client.build()?)
    }
}

async fn response_to_http_response(
    mut response: reqwest::Response,
) -> Result<http::Response<Bytes>, HttpError> {
    let status = response.status();

    let mut http_builder = http::Response::builder().status(status);

    if let Some(headers) = http_builder.headers_mut() {
        for (k, v) in response.headers_mut().drain() {
            if let Some(key) = k {
                headers.insert(key, v);
            }
        }
    }

    let body = response.bytes().await?;

    http_builder.body(body).map_err(|e| HttpError::Unreachable(e.to_string()))
}

#[async_trait]
impl HttpSend for reqwest::Client {
    async fn send_request(
        &self,
        request: http::Request<Bytes>,
        timeout: Duration,
    ) -> Result<http::Response<Bytes>, HttpError> {
        let mut request = reqwest::Request::try_from(request)?;
        *request.timeout_mut() = Some(timeout);

        let response = self.execute(request).await?;

        response_to_http_response(response).await
    }
}
