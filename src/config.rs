/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::Context;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{Read, Write},
    path::Path,
    time::Duration,
};

static EXAMPLE_PLAN: &str = include_str!("templates/flagbench.toml");

// ******** ******** ********
// **         PLAN         **
// ******** ******** ********
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Plan {
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(rename(serialize = "config", deserialize = "config"))]
    pub configs: Vec<RunConfig>,
}
impl Plan {
    pub fn new(configs: Vec<RunConfig>, runner: RunnerSettings) -> anyhow::Result<Self> {
        let plan = Plan { runner, configs };
        plan.validate()?;
        Ok(plan)
    }

    /// The standard comparison: three flag variants of the same JVM image plus the
    /// ahead-of-time compiled image.
    pub fn default_plan() -> Self {
        let jvm_image = "jvm-optim-demo:jvm";
        let native_image = "jvm-optim-demo:native";

        Plan {
            runner: RunnerSettings::default(),
            configs: vec![
                RunConfig::new("baseline", jvm_image, Vec::<String>::new()),
                RunConfig::new("coops-off", jvm_image, ["-XX:-UseCompressedOops"]),
                RunConfig::new(
                    "coh-on",
                    jvm_image,
                    [
                        "-XX:+UnlockExperimentalVMOptions",
                        "-XX:+UseCompactObjectHeaders",
                    ],
                ),
                RunConfig::new("native", native_image, Vec::<String>::new()),
            ],
        }
    }

    pub fn write_example_to_file(path: &Path) -> anyhow::Result<File> {
        let mut file = File::create_new(path)
            .context(format!("Unable to create {}", path.to_string_lossy()))?;
        file.write_all(EXAMPLE_PLAN.as_bytes())?;
        Ok(file)
    }

    pub fn try_from_path(path: &Path) -> anyhow::Result<Plan> {
        let mut plan_str = String::new();
        fs::File::open(path)
            .context(format!("Unable to open plan {}", path.to_string_lossy()))?
            .read_to_string(&mut plan_str)?;
        Plan::try_from_str(&plan_str)
    }

    pub fn try_from_str(plan_str: &str) -> anyhow::Result<Plan> {
        let plan = toml::from_str::<Plan>(plan_str)
            .map_err(|e| anyhow::anyhow!("TOML parsing error: {}", e))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Names must be unique within a plan because they identify rows in the output.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.configs.is_empty() {
            return Err(anyhow::anyhow!("Plan does not contain any configurations"));
        }

        let duplicates = self
            .configs
            .iter()
            .map(|cfg| cfg.name.as_str())
            .duplicates()
            .collect_vec();
        if !duplicates.is_empty() {
            return Err(anyhow::anyhow!(
                "Configuration names must be unique, duplicated: {}",
                duplicates.join(", ")
            ));
        }

        if let Some(cfg) = self.configs.iter().find(|cfg| cfg.image.trim().is_empty()) {
            return Err(anyhow::anyhow!(
                "Configuration {} does not name an image",
                cfg.name
            ));
        }

        Ok(())
    }

    pub fn find_config(&self, name: &str) -> anyhow::Result<&RunConfig> {
        self.configs
            .iter()
            .find(|cfg| cfg.name == name)
            .context(format!("Unable to find configuration with name {}", name))
    }

    /// Keeps only the named configurations, in plan order.
    pub fn select(&self, names: &[String]) -> anyhow::Result<Vec<RunConfig>> {
        if names.is_empty() {
            return Ok(self.configs.clone());
        }
        for name in names {
            self.find_config(name)?;
        }
        Ok(self
            .configs
            .iter()
            .filter(|cfg| names.contains(&cfg.name))
            .cloned()
            .collect())
    }
}

// ******** ******** ********
// **    CONFIGURATION     **
// ******** ******** ********

/// One named variant under test.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RunConfig {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub flags: Vec<String>,
    /// Ahead-of-time compiled variants never receive runtime flags. When unset the image tag
    /// decides (`:native`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precompiled: Option<bool>,
}
impl RunConfig {
    pub fn new<S: Into<String>>(
        name: &str,
        image: &str,
        flags: impl IntoIterator<Item = S>,
    ) -> Self {
        RunConfig {
            name: name.to_string(),
            image: image.to_string(),
            flags: flags.into_iter().map(Into::into).collect(),
            precompiled: None,
        }
    }

    pub fn is_precompiled(&self) -> bool {
        self.precompiled
            .unwrap_or_else(|| self.image.ends_with(":native"))
    }

    /// The flags as they are handed to the container. `None` means flags do not apply to this
    /// variant, `Some("")` means a flag-based variant without any flags.
    pub fn effective_flags(&self) -> Option<String> {
        if self.is_precompiled() {
            return None;
        }

        Some(
            self.flags
                .iter()
                .map(|flag| flag.trim())
                .filter(|flag| !flag.is_empty())
                .join(" "),
        )
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the failure and carry on with the remaining configurations.
    #[default]
    Continue,
    /// Stop at the first failed configuration.
    Abort,
}

/// Timing constants, counts and container limits shared by every run in a plan.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RunnerSettings {
    pub runtime_bin: String,
    pub host: String,
    pub host_port: u16,
    pub container_port: u16,
    pub cpus: String,
    pub memory: String,
    pub flags_env: String,

    pub readiness_timeout_ms: u64,
    pub readiness_path: String,
    pub health_path: String,
    pub poll_interval_ms: u64,
    pub probe_timeout_ms: u64,

    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub warmup_requests: usize,
    pub measure_requests: usize,

    pub idle_samples: usize,
    pub load_samples: usize,
    pub post_samples: usize,
    pub sample_delay_ms: u64,
    pub sampler_join_timeout_ms: u64,

    pub run_timeout_ms: u64,
    pub stats_timeout_ms: u64,
    pub logs_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub log_tail_lines: u32,
    pub log_snippet_chars: usize,

    pub retain_failed: bool,
    pub failure_policy: FailurePolicy,
}
impl Default for RunnerSettings {
    fn default() -> Self {
        RunnerSettings {
            runtime_bin: "docker".to_string(),
            host: "localhost".to_string(),
            host_port: 8080,
            container_port: 8080,
            cpus: "1".to_string(),
            memory: "768m".to_string(),
            flags_env: "JAVA_TOOL_OPTIONS".to_string(),

            readiness_timeout_ms: 120_000,
            readiness_path: "/actuator/health/readiness".to_string(),
            health_path: "/actuator/health".to_string(),
            poll_interval_ms: 50,
            probe_timeout_ms: 2_000,

            connect_timeout_ms: 2_000,
            request_timeout_ms: 5_000,
            warmup_requests: 20,
            measure_requests: 100,

            idle_samples: 3,
            load_samples: 10,
            post_samples: 3,
            sample_delay_ms: 1_000,
            sampler_join_timeout_ms: 15_000,

            run_timeout_ms: 30_000,
            stats_timeout_ms: 10_000,
            logs_timeout_ms: 10_000,
            stop_timeout_ms: 10_000,
            log_tail_lines: 200,
            log_snippet_chars: 2_000,

            retain_failed: true,
            failure_policy: FailurePolicy::Continue,
        }
    }
}
impl RunnerSettings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.host_port)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn sample_delay(&self) -> Duration {
        Duration::from_millis(self.sample_delay_ms)
    }

    pub fn sampler_join_timeout(&self) -> Duration {
        Duration::from_millis(self.sampler_join_timeout_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_millis(self.stats_timeout_ms)
    }

    pub fn logs_timeout(&self) -> Duration {
        Duration::from_millis(self.logs_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
