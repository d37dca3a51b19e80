/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Pure aggregation over run results. Every function returns `None` for empty input since a
//! phase may legitimately end up with no samples.

use crate::metrics::sample::ResourceSample;
use serde::Serialize;

/// Nearest-rank percentile of an ascending sorted slice: the element at
/// `clamp(ceil(p * k) - 1, 0, k - 1)`. No interpolation.
///
/// # Arguments
///
/// * sorted - Values sorted in ascending order
/// * p - Quantile in `[0, 1]`, values outside are clamped
///
/// # Returns
///
/// `None` if `sorted` is empty.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let k = sorted.len();
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
    let rank = (p * k as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, k as i64 - 1) as usize;

    sorted.get(idx).copied()
}

/// Copy of `values` in ascending order.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut values = values.to_vec();
    values.sort_by(f64::total_cmp);
    values
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Minimum, mean and maximum of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Spread {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}
impl Spread {
    pub fn of(values: &[f64]) -> Option<Self> {
        let avg = mean(values)?;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self { min, avg, max })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}
impl LatencySummary {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let sorted = sorted(values);
        Some(Self {
            count: sorted.len(),
            mean: mean(&sorted)?,
            p50: percentile(&sorted, 0.50)?,
            p95: percentile(&sorted, 0.95)?,
            p99: percentile(&sorted, 0.99)?,
            max: percentile(&sorted, 1.0)?,
        })
    }
}

/// Resource usage of one phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub cpu_avg: f64,
    pub mem_percent_avg: f64,
    pub mem_percent_max: f64,
    /// `usage / limit` of the sample with the highest memory percentage.
    pub mem_usage_at_max: String,
}
impl PhaseSummary {
    pub fn from_samples(samples: &[ResourceSample]) -> Option<Self> {
        let peak = samples
            .iter()
            .max_by(|a, b| a.mem_percent.total_cmp(&b.mem_percent))?;

        let cpu: Vec<f64> = samples.iter().map(|s| s.cpu_percent).collect();
        let mem: Vec<f64> = samples.iter().map(|s| s.mem_percent).collect();

        Some(Self {
            cpu_avg: mean(&cpu)?,
            mem_percent_avg: mean(&mem)?,
            mem_percent_max: peak.mem_percent,
            mem_usage_at_max: peak.mem_usage_display(),
        })
    }
}
