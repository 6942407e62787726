//! # Cluster Readiness
//!
//! Polls the API server health endpoint at a fixed interval until it answers
//! with a success status or the attempt budget runs out.

use crate::constants::HEALTH_PATH;
use crate::error::{EnvtestError, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Fixed-interval readiness probe for `<base_url>/healthz`
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    url: String,
    max_attempts: u32,
    interval: Duration,
}

impl HealthProbe {
    #[must_use]
    pub fn new(base_url: &str, max_attempts: u32, interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}{HEALTH_PATH}", base_url.trim_end_matches('/')),
            max_attempts,
            interval,
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Single probe; any 2xx counts as ready
    pub async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(url = %self.url, status = %response.status(), "Cluster not ready yet");
                false
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "Cluster not reachable yet");
                false
            }
        }
    }

    /// Probe until ready, returning the attempt (1-based) that succeeded
    ///
    /// No probe is issued after the first success, and no sleep follows the final attempt.
    ///
    /// # Errors
    ///
    /// Returns [`EnvtestError::ClusterNotReady`] once `max_attempts` probes have failed.
    pub async fn wait_until_ready(&self) -> Result<u32> {
        info!(
            url = %self.url,
            max_attempts = self.max_attempts,
            interval_secs = self.interval.as_secs_f64(),
            "Waiting for cluster to become available"
        );

        for attempt in 1..=self.max_attempts {
            if self.probe().await {
                info!(url = %self.url, attempt, "Cluster is available");
                return Ok(attempt);
            }
            if attempt < self.max_attempts {
                sleep(self.interval).await;
            }
        }

        warn!(url = %self.url, attempts = self.max_attempts, "Cluster did not become available");
        Err(EnvtestError::ClusterNotReady {
            url: self.url.clone(),
            attempts: self.max_attempts,
        })
    }
}

/// Whether the cluster at `base_url` became available within `attempts` probes
pub async fn wait_for_cluster(base_url: &str, attempts: u32, interval: Duration) -> bool {
    HealthProbe::new(base_url, attempts, interval)
        .wait_until_ready()
        .await
        .is_ok()
}
