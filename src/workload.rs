/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use serde::Serialize;
use std::{fmt, str::FromStr};

/// The synthetic endpoint a benchmark drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Scenario {
    /// `/json`: builds `n` objects and serializes them, the response is large.
    #[serde(rename = "PAYLOAD_HEAVY_JSON")]
    PayloadHeavy,
    /// `/alloc`: allocates `n` short lived buffers, the response is tiny.
    #[serde(rename = "ALLOC_HEAVY_OK")]
    AllocHeavy,
}
impl Scenario {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Scenario::PayloadHeavy => "/json",
            Scenario::AllocHeavy => "/alloc",
        }
    }

    pub fn default_n(&self) -> u64 {
        match self {
            Scenario::PayloadHeavy => 200_000,
            Scenario::AllocHeavy => 10_000_000,
        }
    }
}
impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scenario::PayloadHeavy => write!(f, "PAYLOAD_HEAVY_JSON"),
            Scenario::AllocHeavy => write!(f, "ALLOC_HEAVY_OK"),
        }
    }
}
impl FromStr for Scenario {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "payload" | "payload-heavy" | "payload-heavy-json" | "json" | "/json" => {
                Ok(Scenario::PayloadHeavy)
            }
            "alloc" | "alloc-heavy" | "alloc-heavy-ok" | "ok" | "/alloc" => {
                Ok(Scenario::AllocHeavy)
            }
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (use: json|alloc)",
                s
            )),
        }
    }
}

/// Which endpoint to exercise and how hard. Resolved once and shared by every configuration in
/// a run set so they are compared under the same load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkloadSpec {
    pub scenario: Scenario,
    pub n: u64,
}
impl WorkloadSpec {
    pub fn new(scenario: Scenario, n: u64) -> Self {
        Self { scenario, n }
    }

    pub fn with_default_n(scenario: Scenario) -> Self {
        Self::new(scenario, scenario.default_n())
    }

    /// Path including the query string, e.g. `/json?n=200000`.
    pub fn path(&self) -> String {
        format!("{}?n={}", self.scenario.endpoint(), self.n)
    }
}
