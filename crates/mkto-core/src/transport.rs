//! HTTP abstraction and the retrying REST transport.
//!
//! The [`HttpClient`] trait keeps one wire call behind a seam so tests can
//! script transports without a network; [`RestTransport`] owns the retry
//! loop, bearer-token injection, request pacing, and envelope decoding.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::model::MarketoResponse;
use crate::rate_limit::RequestPacer;
use crate::retry::{classify, RetryDecision};
use crate::token::TokenManager;

/// HTTP method set the client needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: 60_000,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_json_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.headers.insert(
            String::from("content-type"),
            String::from("application/json"),
        );
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// URL with the query string appended, values percent-encoded.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, separator, query)
    }
}

/// One wire response; non-2xx statuses are data, not errors, so the retry
/// loop can classify them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into().into_bytes(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Connection-level failure (the request never completed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    message: String,
    retryable: bool,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

impl From<HttpError> for ClientError {
    fn from(error: HttpError) -> Self {
        Self::Transport {
            message: error.message,
            status: None,
            retryable: error.retryable,
        }
    }
}

/// Single-request transport contract.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Production transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mkto/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::connection(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(request.full_url()),
                HttpMethod::Post => self.client.post(request.full_url()),
            };

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            builder = builder.timeout(std::time::Duration::from_millis(request.timeout_ms));
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::new(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    HttpError::new(format!("connection failed: {e}"))
                } else {
                    HttpError::non_retryable(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| HttpError::new(format!("failed to read response body: {e}")))?;

            Ok(HttpResponse {
                status,
                body: body.to_vec(),
            })
        })
    }
}

/// Deterministic transport for offline tests: responses are played back in
/// FIFO order and every outbound request is recorded for inspection.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    script: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, response: HttpResponse) {
        self.script
            .lock()
            .expect("script queue is not poisoned")
            .push_back(Ok(response));
    }

    pub fn enqueue_json(&self, body: impl Into<String>) {
        self.enqueue(HttpResponse::ok_json(body));
    }

    pub fn enqueue_error(&self, error: HttpError) {
        self.script
            .lock()
            .expect("script queue is not poisoned")
            .push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("request store is not poisoned")
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .expect("script queue is not poisoned")
            .len()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        self.requests
            .lock()
            .expect("request store is not poisoned")
            .push(request);
        let next = self
            .script
            .lock()
            .expect("script queue is not poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(HttpError::non_retryable("scripted responses exhausted")));
        Box::pin(async move { next })
    }
}

/// Retrying REST transport: paces every request, injects the bearer token,
/// decodes vendor envelopes, and classifies failures until the retry budget
/// runs out.
pub struct RestTransport {
    http: Arc<dyn HttpClient>,
    config: Arc<ClientConfig>,
    tokens: TokenManager,
    pacer: RequestPacer,
}

impl RestTransport {
    pub fn new(http: Arc<dyn HttpClient>, config: Arc<ClientConfig>) -> Self {
        let pacer = RequestPacer::new(config.request_interval);
        let tokens = TokenManager::new(Arc::clone(&http), Arc::clone(&config), pacer.clone());
        Self {
            http,
            config,
            tokens,
            pacer,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// GET returning a decoded vendor envelope.
    pub async fn get_envelope<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        query: Vec<(String, String)>,
    ) -> Result<MarketoResponse<T>, ClientError> {
        self.request_envelope(HttpMethod::Get, endpoint, query, None)
            .await
    }

    /// POST returning a decoded vendor envelope; `body` is sent as JSON.
    pub async fn post_envelope<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        query: Vec<(String, String)>,
        body: Option<serde_json::Value>,
    ) -> Result<MarketoResponse<T>, ClientError> {
        self.request_envelope(HttpMethod::Post, endpoint, query, body)
            .await
    }

    /// GET returning the raw body bytes; used for bulk result files.
    pub async fn get_bytes(
        &self,
        endpoint: Endpoint,
        headers: Vec<(String, String)>,
    ) -> Result<Vec<u8>, ClientError> {
        let url = endpoint.url(&self.config);
        let mut attempt = 0;
        loop {
            let mut request = HttpRequest::get(&url);
            for (name, value) in &headers {
                request = request.with_header(name.clone(), value.clone());
            }
            match self.send_authenticated(request).await {
                Ok(response) => return Ok(response.body),
                Err(error) => self.absorb_or_surface(error, &mut attempt).await?,
            }
        }
    }

    async fn request_envelope<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        endpoint: Endpoint,
        query: Vec<(String, String)>,
        body: Option<serde_json::Value>,
    ) -> Result<MarketoResponse<T>, ClientError> {
        let url = endpoint.url(&self.config);
        let mut attempt = 0;
        loop {
            match self.attempt_envelope(method, &url, &query, body.as_ref()).await {
                Ok(envelope) => return Ok(envelope),
                Err(error) => self.absorb_or_surface(error, &mut attempt).await?,
            }
        }
    }

    async fn attempt_envelope<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        url: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<MarketoResponse<T>, ClientError> {
        let mut request = HttpRequest::new(method, url);
        for (name, value) in query {
            request = request.with_param(name.clone(), value.clone());
        }
        if let Some(body) = body {
            request = request.with_json_body(body.to_string());
        }

        let response = self.send_authenticated(request).await?;
        let envelope: MarketoResponse<T> = serde_json::from_slice(&response.body)?;
        // A 2xx envelope that reports errors is a vendor failure in its own
        // right and goes through the same classification as transport ones.
        if !envelope.success {
            return Err(ClientError::Api(envelope.errors));
        }
        Ok(envelope)
    }

    /// One paced, authenticated wire call. Non-2xx statuses come back as
    /// transport errors carrying the status for classification.
    async fn send_authenticated(
        &self,
        mut request: HttpRequest,
    ) -> Result<HttpResponse, ClientError> {
        self.pacer.acquire().await;
        let token = self.tokens.get_token().await?;
        request = request
            .with_header("Authorization", format!("Bearer {token}"))
            .with_timeout_ms(self.config.idle_timeout.as_millis() as u64);

        let response = self.http.execute(request).await?;
        if !response.is_success() {
            return Err(ClientError::transport(
                format!("request returned status {}", response.status),
                Some(response.status),
            ));
        }
        Ok(response)
    }

    /// Applies the retry policy to a failed attempt: sleeps and returns
    /// `Ok(())` when the failure is absorbed, surfaces it otherwise.
    async fn absorb_or_surface(
        &self,
        error: ClientError,
        attempt: &mut u32,
    ) -> Result<(), ClientError> {
        let decision = classify(&error);
        if decision == RetryDecision::Fail || *attempt >= self.config.retry.max_retries {
            return Err(error);
        }
        if decision == RetryDecision::RetryAfterReauth {
            tracing::debug!("stale access token reported, re-authenticating");
            self.tokens.invalidate().await;
        }
        let delay = self.config.retry.backoff.delay(*attempt);
        tracing::warn!(
            attempt = *attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "request failed, backing off"
        );
        tokio::time::sleep(delay).await;
        *attempt += 1;
        Ok(())
    }
}

impl std::fmt::Debug for RestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
