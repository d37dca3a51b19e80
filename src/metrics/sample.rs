/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use serde::Serialize;
use std::{error::Error, fmt, str::FromStr};

/// Number of pipe delimited fields produced by the stats format string.
pub const FIELD_COUNT: usize = 6;

/// The `--format` argument handed to `docker stats`. Every snapshot line must match the
/// layout expected by [`ResourceSample::parse`].
pub const STATS_FORMAT: &str =
    "{{.CPUPerc}}|{{.MemUsage}}|{{.MemPerc}}|{{.NetIO}}|{{.BlockIO}}|{{.PIDs}}";

/// A single resource usage snapshot of a running container.
///
/// Raw strings (memory usage, network and block I/O) are kept exactly as the container runtime
/// reported them, including their units, because they are only ever displayed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub mem_usage: String,
    pub mem_limit: String,
    pub mem_percent: f64,
    pub net_in: String,
    pub net_out: String,
    pub block_in: String,
    pub block_out: String,
    pub pids: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleParseError {
    FieldCount { expected: usize, found: usize, line: String },
    Percent { field: &'static str, value: String },
    Compound { field: &'static str, value: String },
    Pids(String),
}
impl fmt::Display for SampleParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SampleParseError::FieldCount {
                expected,
                found,
                line,
            } => write!(
                f,
                "Unexpected stats format, expected {} fields but found {}: {}",
                expected, found, line
            ),
            SampleParseError::Percent { field, value } => {
                write!(f, "Unable to parse {} percentage: {}", field, value)
            }
            SampleParseError::Compound { field, value } => {
                write!(f, "Expected {} as two values separated by '/': {}", field, value)
            }
            SampleParseError::Pids(value) => write!(f, "Unable to parse pid count: {}", value),
        }
    }
}
impl Error for SampleParseError {}

impl ResourceSample {
    /// Parses one line of `docker stats --no-stream --format <STATS_FORMAT>` output.
    ///
    /// # Arguments
    ///
    /// * line - e.g. `0.12%|151.9MiB / 768MiB|19.78%|4.9kB / 2.93kB|40.9MB / 0B|29`
    ///
    /// # Returns
    ///
    /// The parsed sample, or an error if the line does not contain exactly six fields, a
    /// compound field is not split by `/`, or a numeric field can't be read. Nothing is
    /// defaulted.
    pub fn parse(line: &str) -> Result<Self, SampleParseError> {
        let parts = line.trim().split('|').collect::<Vec<_>>();
        if parts.len() != FIELD_COUNT {
            return Err(SampleParseError::FieldCount {
                expected: FIELD_COUNT,
                found: parts.len(),
                line: line.to_string(),
            });
        }

        let cpu_percent = parse_percent("cpu", parts[0])?;
        let (mem_usage, mem_limit) = split_pair("memory usage", parts[1])?;
        let mem_percent = parse_percent("memory", parts[2])?;
        let (net_in, net_out) = split_pair("network I/O", parts[3])?;
        let (block_in, block_out) = split_pair("block I/O", parts[4])?;

        let pids = parts[5]
            .trim()
            .parse::<u32>()
            .map_err(|_| SampleParseError::Pids(parts[5].to_string()))?;

        Ok(ResourceSample {
            cpu_percent,
            mem_usage,
            mem_limit,
            mem_percent,
            net_in,
            net_out,
            block_in,
            block_out,
            pids,
        })
    }

    /// Memory as it is displayed by the runtime, e.g. `151.9MiB / 768MiB`.
    pub fn mem_usage_display(&self) -> String {
        format!("{} / {}", self.mem_usage, self.mem_limit)
    }
}

impl FromStr for ResourceSample {
    type Err = SampleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceSample::parse(s)
    }
}

fn parse_percent(field: &'static str, raw: &str) -> Result<f64, SampleParseError> {
    let value = raw.trim();
    value
        .strip_suffix('%')
        .unwrap_or(value)
        .trim()
        .parse::<f64>()
        .map_err(|_| SampleParseError::Percent {
            field,
            value: raw.to_string(),
        })
}

// "usage / limit" and "in / out" share the same layout
fn split_pair(field: &'static str, raw: &str) -> Result<(String, String), SampleParseError> {
    match raw.split_once('/') {
        Some((left, right)) if !left.trim().is_empty() && !right.trim().is_empty() => {
            Ok((left.trim().to_string(), right.trim().to_string()))
        }
        _ => Err(SampleParseError::Compound {
            field,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_line() -> anyhow::Result<()> {
        let sample =
            ResourceSample::parse("0.12%|151.9MiB / 768MiB|19.78%|4.9kB / 2.93kB|40.9MB / 0B|29")?;

        assert_eq!(sample.cpu_percent, 0.12);
        assert_eq!(sample.mem_usage, "151.9MiB");
        assert_eq!(sample.mem_limit, "768MiB");
        assert_eq!(sample.mem_percent, 19.78);
        assert_eq!(sample.net_in, "4.9kB");
        assert_eq!(sample.net_out, "2.93kB");
        assert_eq!(sample.block_in, "40.9MB");
        assert_eq!(sample.block_out, "0B");
        assert_eq!(sample.pids, 29);
        assert_eq!(sample.mem_usage_display(), "151.9MiB / 768MiB");

        Ok(())
    }

    #[test]
    fn tolerates_trailing_newline_from_cli_output() -> anyhow::Result<()> {
        let sample: ResourceSample =
            "105.30%|300MiB / 768MiB|39.06%|1.2MB / 80MB|0B / 0B|41\n".parse()?;
        assert_eq!(sample.cpu_percent, 105.3);
        assert_eq!(sample.pids, 41);
        Ok(())
    }

    #[test]
    fn rejects_wrong_field_count() {
        let too_few = ResourceSample::parse("0.12%|151.9MiB / 768MiB|19.78%|4.9kB / 2.93kB|29");
        assert!(matches!(
            too_few,
            Err(SampleParseError::FieldCount {
                expected: 6,
                found: 5,
                ..
            })
        ));

        let too_many = ResourceSample::parse("1%|1MiB / 2MiB|1%|1B / 1B|1B / 1B|1|extra");
        assert!(matches!(
            too_many,
            Err(SampleParseError::FieldCount { found: 7, .. })
        ));

        assert!(ResourceSample::parse("").is_err());
    }

    #[test]
    fn rejects_garbage_numbers() {
        let bad_cpu = ResourceSample::parse("--|1MiB / 2MiB|1%|1B / 1B|1B / 1B|1");
        assert!(matches!(
            bad_cpu,
            Err(SampleParseError::Percent { field: "cpu", .. })
        ));

        let bad_pids = ResourceSample::parse("1%|1MiB / 2MiB|1%|1B / 1B|1B / 1B|many");
        assert!(matches!(bad_pids, Err(SampleParseError::Pids(_))));
    }

    #[test]
    fn rejects_compound_fields_without_a_separator() {
        let no_limit = ResourceSample::parse("1%|151.9MiB|1%|1B / 1B|1B / 1B|1");
        assert!(matches!(
            no_limit,
            Err(SampleParseError::Compound {
                field: "memory usage",
                ..
            })
        ));

        let half_io = ResourceSample::parse("1%|1MiB / 2MiB|1%|1B / |1B / 1B|1");
        assert!(matches!(
            half_io,
            Err(SampleParseError::Compound {
                field: "network I/O",
                ..
            })
        ));
    }
}
