/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Decides when a freshly started service can take traffic.
//!
//! Readiness means a plain GET answers with 200. Three targets are tried in order, each one
//! with whatever is left of the overall budget:
//!
//! 1. the dedicated readiness endpoint
//! 2. the generic health endpoint
//! 3. the workload path itself, polled until it answers 200
//!
//! A 401, 403 or 404 means the endpoint is missing or protected, so that step is abandoned at
//! once. Connection errors, timeouts and any other status mean "not up yet" and keep polling.

use crate::config::RunnerSettings;
use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::{
    error::Error,
    fmt,
    time::{Duration, Instant},
};
use tracing::{debug, info};

/// The mechanism that proved the service ready, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadinessMechanism {
    DedicatedReadiness,
    GenericHealth,
    WorkloadUntilSuccess,
}
impl fmt::Display for ReadinessMechanism {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadinessMechanism::DedicatedReadiness => write!(f, "DEDICATED_READINESS"),
            ReadinessMechanism::GenericHealth => write!(f, "GENERIC_HEALTH"),
            ReadinessMechanism::WorkloadUntilSuccess => write!(f, "WORKLOAD_UNTIL_SUCCESS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadinessOutcome {
    pub mechanism: ReadinessMechanism,
    pub elapsed_ms: u64,
}

/// No step of the chain succeeded within the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessTimeout {
    pub timeout: Duration,
}
impl fmt::Display for ReadinessTimeout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Readiness timeout after {:?}", self.timeout)
    }
}
impl Error for ReadinessTimeout {}

/// Result of polling a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Ready,
    /// 401/403/404, no point in waiting for this target.
    Unusable(StatusCode),
    Expired,
}

#[derive(Debug, Clone)]
pub struct ReadinessProber {
    client: Client,
    readiness_path: String,
    health_path: String,
    poll_interval: Duration,
    probe_timeout: Duration,
}
impl ReadinessProber {
    pub fn new(
        readiness_path: impl Into<String>,
        health_path: impl Into<String>,
        poll_interval: Duration,
        probe_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(probe_timeout)
            .build()
            .context("Failed to build HTTP client for readiness probes")?;

        Ok(Self {
            client,
            readiness_path: readiness_path.into(),
            health_path: health_path.into(),
            poll_interval,
            probe_timeout,
        })
    }

    pub fn from_settings(settings: &RunnerSettings) -> anyhow::Result<Self> {
        Self::new(
            settings.readiness_path.clone(),
            settings.health_path.clone(),
            settings.poll_interval(),
            settings.probe_timeout(),
        )
    }

    /// Waits until the service behind `base_url` is ready or `timeout` has elapsed.
    ///
    /// # Arguments
    ///
    /// * base_url - e.g. `http://localhost:8080`
    /// * timeout - The budget for the whole chain
    /// * fallback_path - Workload path (`/json?n=10`) or absolute URL probed last
    ///
    /// # Returns
    ///
    /// Which mechanism succeeded and how long it took, or a [`ReadinessTimeout`] error.
    pub async fn wait_until_ready(
        &self,
        base_url: &str,
        timeout: Duration,
        fallback_path: &str,
    ) -> anyhow::Result<ReadinessOutcome> {
        let start = Instant::now();
        let deadline = start + timeout;

        let chain = [
            (
                ReadinessMechanism::DedicatedReadiness,
                to_url(base_url, &self.readiness_path),
            ),
            (
                ReadinessMechanism::GenericHealth,
                to_url(base_url, &self.health_path),
            ),
            (
                ReadinessMechanism::WorkloadUntilSuccess,
                to_url(base_url, fallback_path),
            ),
        ];

        for (mechanism, url) in chain {
            if Instant::now() >= deadline {
                break;
            }

            match self.poll_until_ok(&url, deadline).await {
                PollOutcome::Ready => {
                    let outcome = ReadinessOutcome {
                        mechanism,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                    };
                    info!(
                        "Ready after {}ms via {} ({})",
                        outcome.elapsed_ms, mechanism, url
                    );
                    return Ok(outcome);
                }
                PollOutcome::Unusable(status) => {
                    debug!("{} answered {}, trying next readiness check", url, status);
                }
                PollOutcome::Expired => {
                    debug!("{} did not become ready in time", url);
                }
            }
        }

        Err(ReadinessTimeout { timeout }.into())
    }

    async fn poll_until_ok(&self, url: &str, deadline: Instant) -> PollOutcome {
        while Instant::now() < deadline {
            // a single probe never outlives the overall budget
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.try_status(url, remaining.min(self.probe_timeout)).await {
                Some(StatusCode::OK) => return PollOutcome::Ready,
                Some(
                    status @ (StatusCode::UNAUTHORIZED
                    | StatusCode::FORBIDDEN
                    | StatusCode::NOT_FOUND),
                ) => return PollOutcome::Unusable(status),
                _ => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
        PollOutcome::Expired
    }

    /// GET that only cares about the status code. `None` for connection errors and timeouts.
    async fn try_status(&self, url: &str, timeout: Duration) -> Option<StatusCode> {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => Some(response.status()),
            Err(e) => {
                debug!("Readiness probe {} failed: {}", url, e);
                None
            }
        }
    }
}

/// Turns a bare path into an absolute URL below `base_url`, absolute URLs are used as given.
fn to_url(base_url: &str, path: &str) -> String {
    let path = path.trim();
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
