/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Timed GET requests against the workload endpoint.

use anyhow::Context;
use reqwest::{Client, StatusCode};
use std::{
    error::Error,
    fmt,
    time::{Duration, Instant},
};

/// How much of an error body ends up in the error message.
const ERROR_BODY_CHARS: usize = 500;

/// The workload answered with something other than 200.
#[derive(Debug)]
pub struct RequestError {
    pub url: String,
    pub status: StatusCode,
    pub body: String,
}
impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GET {} failed: {} body={}",
            self.url, self.status, self.body
        )
    }
}
impl Error for RequestError {}

/// Issues workload requests one at a time so that each latency is a clean wall-clock
/// measurement of a single request including the full body transfer.
#[derive(Debug, Clone)]
pub struct WorkloadClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}
impl WorkloadClient {
    pub fn new(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            request_timeout,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends one GET and returns how long it took until the last byte of the body arrived.
    pub async fn measure(&self, path: &str) -> anyhow::Result<Duration> {
        let url = self.url(path);

        let start = Instant::now();
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .context(format!("GET {} failed", url))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .context(format!("Failed to read response body of GET {}", url))?;
        let elapsed = start.elapsed();

        if status != StatusCode::OK {
            let body = String::from_utf8_lossy(&body);
            return Err(RequestError {
                url,
                status,
                body: body.chars().take(ERROR_BODY_CHARS).collect(),
            }
            .into());
        }

        Ok(elapsed)
    }

    /// Runs `times` requests and discards the results. Any failure aborts the warmup.
    pub async fn warmup(&self, path: &str, times: usize) -> anyhow::Result<()> {
        for _ in 0..times {
            self.measure(path).await?;
        }
        Ok(())
    }

    /// Runs `times` requests strictly in sequence and returns their latencies in seconds, in
    /// issue order.
    pub async fn measure_many(&self, path: &str, times: usize) -> anyhow::Result<Vec<f64>> {
        let mut latencies = Vec::with_capacity(times);
        for i in 0..times {
            let elapsed = self
                .measure(path)
                .await
                .context(format!("Measurement request {}/{} failed", i + 1, times))?;
            latencies.push(elapsed.as_secs_f64());
        }
        Ok(latencies)
    }
}
