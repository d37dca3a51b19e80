/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    config::{FailurePolicy, Plan, RunConfig},
    container::ContainerRuntime,
    data::RunResult,
    runner::single_run::RunExecutor,
    workload::WorkloadSpec,
};
use colored::Colorize;
use std::sync::Arc;
use tracing::{error, info};

/// A configuration whose run did not produce a result.
#[derive(Debug)]
pub struct RunFailure {
    pub name: String,
    pub error: anyhow::Error,
}

#[derive(Debug, Default)]
pub struct RunSetOutcome {
    /// One entry per successful configuration, in plan order.
    pub results: Vec<RunResult>,
    pub failures: Vec<RunFailure>,
    /// Configurations never attempted because an earlier one failed under
    /// [`FailurePolicy::Abort`].
    pub skipped: Vec<String>,
}
impl RunSetOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

/// Runs a list of configurations one after the other against the same workload. Two containers
/// never run at the same time.
pub struct RunSet {
    executor: RunExecutor,
    configs: Vec<RunConfig>,
    policy: FailurePolicy,
}
impl RunSet {
    pub fn new(executor: RunExecutor, configs: Vec<RunConfig>, policy: FailurePolicy) -> Self {
        Self {
            executor,
            configs,
            policy,
        }
    }

    pub fn from_plan(runtime: Arc<dyn ContainerRuntime>, plan: &Plan) -> anyhow::Result<Self> {
        let executor = RunExecutor::new(runtime, plan.runner.clone())?;
        Ok(Self::new(
            executor,
            plan.configs.clone(),
            plan.runner.failure_policy,
        ))
    }

    pub fn configs(&self) -> &[RunConfig] {
        &self.configs
    }

    /// Runs every configuration in order.
    ///
    /// # Arguments
    ///
    /// * workload - The endpoint and size every configuration is measured with
    ///
    /// # Returns
    ///
    /// The collected results and failures. A failed configuration never has a result.
    pub async fn run(&self, workload: &WorkloadSpec) -> RunSetOutcome {
        let mut outcome = RunSetOutcome::default();
        let total = self.configs.len();

        for (i, config) in self.configs.iter().enumerate() {
            println!(
                "> running {} [{}/{}] {}",
                config.name.green(),
                i + 1,
                total,
                config.image.dimmed()
            );

            match self.executor.execute(config, workload).await {
                Ok(result) => {
                    info!(
                        "{} done, {} requests measured",
                        config.name,
                        result.latencies_secs.len()
                    );
                    outcome.results.push(result);
                }

                Err(e) => {
                    error!("{:#}", e);
                    println!("{} {}", "\u{2717}".red(), config.name.red());
                    outcome.failures.push(RunFailure {
                        name: config.name.clone(),
                        error: e,
                    });

                    if self.policy == FailurePolicy::Abort {
                        outcome.skipped = self.configs[i + 1..]
                            .iter()
                            .map(|c| c.name.clone())
                            .collect();
                        break;
                    }
                }
            }
        }

        outcome
    }
}
