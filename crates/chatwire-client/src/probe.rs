//! Health and reachability probes.
//!
//! Before dialing the transport, the supervisor checks the backend's health
//! endpoint; while the retry budget is exhausted, the driver watches general
//! network reachability to know when a reconnect is worth attempting. The
//! reachability check is deliberately independent of any OS "online" flag -
//! captive portals and flaky links report online while nothing actually
//! routes.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::TransportError;

/// Header carrying the fixed health-probe auth token.
pub const HEALTH_TOKEN_HEADER: &str = "x-auth-token";

/// Probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Health endpoint (`POST`, 2xx = healthy).
    pub healthz_url: String,
    /// Fixed auth token sent with every probe.
    pub auth_token: String,
    /// Known-good external endpoint for reachability checks.
    pub reachability_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Minimum spacing between probes; violations are rate-limited.
    pub min_interval: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            healthz_url: String::new(),
            auth_token: String::new(),
            reachability_url: String::new(),
            timeout: Duration::from_secs(3),
            min_interval: Duration::from_millis(500),
        }
    }
}

/// Backend health prober with a built-in rate-limit guard.
pub struct HealthProbe {
    client: reqwest::Client,
    config: ProbeConfig,
    last_probe: Option<Instant>,
}

impl HealthProbe {
    /// Build a prober.
    ///
    /// # Errors
    ///
    /// - `TransportError::Connection` if the HTTP client cannot be built.
    pub fn new(config: ProbeConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Connection(format!("http client: {e}")))?;

        Ok(Self { client, config, last_probe: None })
    }

    /// Check backend health: `POST` to the health endpoint with the fixed
    /// auth token. 2xx means healthy; any transport-level failure means
    /// unhealthy, not an error.
    ///
    /// # Errors
    ///
    /// - `TransportError::RateLimited` when called again before
    ///   `min_interval` elapsed. Callers log and drop, never retry
    ///   immediately.
    pub async fn check(&mut self, now: Instant) -> Result<bool, TransportError> {
        if let Some(last) = self.last_probe {
            if now - last < self.config.min_interval {
                return Err(TransportError::RateLimited {
                    min_interval_ms: self.config.min_interval.as_millis() as u64,
                });
            }
        }
        self.last_probe = Some(now);

        let response = self
            .client
            .post(&self.config.healthz_url)
            .header(HEALTH_TOKEN_HEADER, &self.config.auth_token)
            .send()
            .await;

        match response {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!("health probe request failed: {e}");
                Ok(false)
            },
        }
    }

    /// Active reachability check against a known external endpoint. Any
    /// HTTP response at all - even an error status - proves the network
    /// routes; only a transport-level failure means offline.
    pub async fn is_network_reachable(&self) -> bool {
        self.client.head(&self.config.reachability_url).send().await.is_ok()
    }
}
