/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod summary;

use crate::{
    metrics::sample::ResourceSample,
    readiness::ReadinessOutcome,
    workload::{Scenario, WorkloadSpec},
};
use serde::Serialize;
use std::fmt;
use summary::{LatencySummary, PhaseSummary};

/// Time window, relative to the load generating requests, a resource sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Load,
    Post,
}
impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "IDLE"),
            Phase::Load => write!(f, "LOAD"),
            Phase::Post => write!(f, "POST"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseSamples {
    pub idle: Vec<ResourceSample>,
    pub load: Vec<ResourceSample>,
    pub post: Vec<ResourceSample>,
}
impl PhaseSamples {
    pub fn get(&self, phase: Phase) -> &[ResourceSample] {
        match phase {
            Phase::Idle => &self.idle,
            Phase::Load => &self.load,
            Phase::Post => &self.post,
        }
    }
}

/// One successful run of one configuration. Failed runs never produce a `RunResult`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub name: String,
    pub image: String,
    /// `None` for precompiled variants, where runtime flags do not apply. An empty string means
    /// a flag based variant with no flags set.
    pub effective_flags: Option<String>,
    pub scenario: Scenario,
    pub n: u64,
    pub workload_path: String,
    pub readiness: ReadinessOutcome,
    pub first_request_secs: f64,
    /// Measurement latencies in issue order.
    pub latencies_secs: Vec<f64>,
    pub samples: PhaseSamples,
    pub startup_log: Option<String>,
}
impl RunResult {
    pub fn workload(&self) -> WorkloadSpec {
        WorkloadSpec::new(self.scenario, self.n)
    }

    pub fn is_precompiled(&self) -> bool {
        self.effective_flags.is_none()
    }

    pub fn kind(&self) -> &'static str {
        if self.is_precompiled() {
            "PRECOMPILED"
        } else {
            "FLAGS"
        }
    }

    /// Flags as shown to a human: `(precompiled)` when they do not apply, `(none)` when blank.
    pub fn flags_display(&self) -> &str {
        match self.effective_flags.as_deref() {
            None => "(precompiled)",
            Some(flags) if flags.trim().is_empty() => "(none)",
            Some(flags) => flags,
        }
    }

    pub fn latency_summary(&self) -> Option<LatencySummary> {
        LatencySummary::from_values(&self.latencies_secs)
    }

    pub fn phase_summary(&self, phase: Phase) -> Option<PhaseSummary> {
        PhaseSummary::from_samples(self.samples.get(phase))
    }
}
