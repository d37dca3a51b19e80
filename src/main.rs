/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::Context;
use colored::Colorize;
use flagbench::{
    clap_args::{self, Commands},
    config::Plan,
    container::DockerCli,
    export, report,
    runner::RunSet,
    workload::{Scenario, WorkloadSpec},
};
use std::{io::IsTerminal, path::Path, sync::Arc};
use tracing::{info, subscriber::set_global_default, Subscriber};
use tracing_subscriber::EnvFilter;

fn get_subscriber(env_filter: String) -> impl Subscriber + Sync + Send {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .finish()
}

fn init_subscriber(subscriber: impl Subscriber + Sync + Send) -> anyhow::Result<()> {
    set_global_default(subscriber).context("Failed to set subscriber")
}

fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    if path.exists() {
        Plan::try_from_path(path)
    } else {
        info!(
            "No plan at {}, using the built-in plan",
            path.to_string_lossy()
        );
        Ok(Plan::default_plan())
    }
}

fn choose_scenario() -> Scenario {
    if std::io::stdin().is_terminal() {
        clap_args::ask_for_scenario()
    } else {
        Scenario::PayloadHeavy
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = clap_args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    init_subscriber(get_subscriber(level.to_string()))?;

    match args.command {
        Commands::Init { plan } => {
            Plan::write_example_to_file(&plan)?;
            println!("> wrote example plan to {}", plan.to_string_lossy().green());
        }

        Commands::Run {
            plan,
            scenario,
            n,
            only,
            out,
            no_export,
            plot,
        } => {
            let mut plan = load_plan(&plan)?;
            plan.configs = plan.select(&only)?;

            let scenario = scenario.unwrap_or_else(choose_scenario);
            let workload = WorkloadSpec::new(scenario, n.unwrap_or(scenario.default_n()));
            println!(
                "> benchmarking {} configurations with {} ({})",
                plan.configs.len(),
                scenario.to_string().green(),
                workload.path()
            );

            let runtime = Arc::new(DockerCli::from_settings(&plan.runner));
            let run_set = RunSet::from_plan(runtime, &plan)?;
            let outcome = run_set.run(&workload).await;

            report::print_summary(&outcome, plot);

            if !no_export {
                let paths = export::write_exports(&outcome, &out)?;
                println!(
                    "> results written to {} and {}",
                    paths.json.to_string_lossy().green(),
                    paths.csv.to_string_lossy().green()
                );
            }

            if outcome.results.is_empty() {
                return Err(anyhow::anyhow!("No configuration completed successfully"));
            }
        }
    }

    Ok(())
}
