use std::time::Duration;

use crate::retry::Backoff;

/// Number of records a preview run is allowed to produce. Preview also
/// overrides the page size requested from the vendor.
pub const PREVIEW_RECORD_LIMIT: usize = 15;

/// Connection and account settings for one Marketo instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST endpoint, e.g. `https://NNN-XXX-NNN.mktorest.com`.
    pub endpoint: String,
    /// Base URL of the identity service, usually `<endpoint>/identity`.
    pub identity_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    /// Page size requested from paginated endpoints.
    pub batch_size: u32,
    /// When set, record production is capped at [`PREVIEW_RECORD_LIMIT`] and
    /// the vendor page size is lowered to match.
    pub preview: bool,
    /// Minimum spacing between outbound requests, shared across all calls
    /// against this instance's rate budget.
    pub request_interval: Duration,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub retry: RetryPolicy,
    /// Fixed `Range` chunk size for bulk result downloads. `None` fetches
    /// the whole remainder in one open-ended range.
    pub download_chunk_size: Option<u64>,
}

impl ClientConfig {
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into();
        let identity_endpoint = format!("{}/identity", endpoint.trim_end_matches('/'));
        Self {
            endpoint,
            identity_endpoint,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            batch_size: 300,
            preview: false,
            request_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            download_chunk_size: None,
        }
    }

    /// Effective page size, accounting for preview mode.
    pub fn effective_batch_size(&self) -> u32 {
        if self.preview {
            PREVIEW_RECORD_LIMIT as u32
        } else {
            self.batch_size
        }
    }
}

/// Bounded-attempt retry policy applied to every request issued through the
/// transport.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(20),
                factor: 2.0,
                max: Duration::from_secs(120),
                jitter: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_endpoint_derives_from_rest_endpoint() {
        let config = ClientConfig::new("https://064-CCJ-768.mktorest.com/", "id", "secret");
        assert_eq!(
            config.identity_endpoint,
            "https://064-CCJ-768.mktorest.com/identity"
        );
    }

    #[test]
    fn preview_caps_batch_size() {
        let mut config = ClientConfig::new("https://example.mktorest.com", "id", "secret");
        assert_eq!(config.effective_batch_size(), 300);
        config.preview = true;
        assert_eq!(config.effective_batch_size(), 15);
    }
}
