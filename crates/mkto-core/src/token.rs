//! OAuth token lifecycle.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::model::AccessToken;
use crate::rate_limit::RequestPacer;
use crate::retry::{classify, RetryDecision};
use crate::transport::{HttpClient, HttpRequest};

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    access_token: Option<String>,
    #[allow(dead_code)]
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Owns the single access token for the instance.
///
/// The token is fetched on demand via the client-credentials grant and cached
/// until [`invalidate`](TokenManager::invalidate) clears it. No expiry timer
/// runs locally; staleness is discovered reactively when the vendor answers
/// with its stale-token code and the retry layer forces a refresh.
pub struct TokenManager {
    http: Arc<dyn HttpClient>,
    config: Arc<ClientConfig>,
    pacer: RequestPacer,
    // Held across the fetch so concurrent callers refresh exactly once.
    cached: Mutex<Option<AccessToken>>,
}

impl TokenManager {
    pub fn new(http: Arc<dyn HttpClient>, config: Arc<ClientConfig>, pacer: RequestPacer) -> Self {
        Self {
            http,
            config,
            pacer,
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached token, fetching a fresh one if none is held.
    pub async fn get_token(&self) -> Result<String, ClientError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.value.clone());
        }
        let token = self.fetch().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Drops the cached token so the next [`get_token`](Self::get_token)
    /// performs a fresh fetch.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn fetch(&self) -> Result<AccessToken, ClientError> {
        let url = Endpoint::AccessToken.url(&self.config);
        let mut attempt = 0;
        loop {
            match self.attempt_fetch(&url).await {
                Ok(token) => {
                    tracing::debug!("obtained fresh access token");
                    return Ok(token);
                }
                Err(error) => {
                    if classify(&error) != RetryDecision::Retry
                        || attempt >= self.config.retry.max_retries
                    {
                        return Err(error);
                    }
                    let delay = self.config.retry.backoff.delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "token fetch failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One unauthenticated identity call. A vendor `error`/`error_description`
    /// pair is fatal and surfaces the description verbatim.
    async fn attempt_fetch(&self, url: &str) -> Result<AccessToken, ClientError> {
        self.pacer.acquire().await;
        let request = HttpRequest::get(url)
            .with_param("client_id", self.config.client_id.clone())
            .with_param("client_secret", self.config.client_secret.clone())
            .with_param("grant_type", "client_credentials")
            .with_timeout_ms(self.config.idle_timeout.as_millis() as u64);

        let response = self.http.execute(request).await?;
        if !response.is_success() {
            return Err(ClientError::transport(
                format!("identity endpoint returned status {}", response.status),
                Some(response.status),
            ));
        }

        let envelope: TokenEnvelope = serde_json::from_slice(&response.body)?;
        if envelope.error.is_some() || envelope.error_description.is_some() {
            let message = envelope
                .error_description
                .or(envelope.error)
                .unwrap_or_default();
            return Err(ClientError::Auth { message });
        }
        envelope
            .access_token
            .map(AccessToken::new)
            .ok_or_else(|| ClientError::Payload(String::from("identity response missing access_token")))
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager").finish_non_exhaustive()
    }
}
