/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::workload::Scenario;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::{io::Write, path::PathBuf};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Verbose mode (-v, --verbose)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Benchmark every configuration of a plan
    Run {
        /// Plan file, the built-in plan is used when it does not exist
        #[arg(short, long, default_value = "./flagbench.toml")]
        plan: PathBuf,

        /// Workload scenario (json|alloc), asked for interactively when omitted
        #[arg(short, long)]
        scenario: Option<Scenario>,

        /// Workload size, defaults to 200000 for json and 10000000 for alloc
        #[arg(short, long)]
        n: Option<u64>,

        /// Only run the named configurations
        #[arg(long, value_name = "NAME")]
        only: Vec<String>,

        /// Directory the exports are written to
        #[arg(short, long, default_value = "./bench-results")]
        out: PathBuf,

        /// Do not write JSON and CSV exports
        #[arg(long)]
        no_export: bool,

        /// Plot the latency series of every run
        #[arg(long)]
        plot: bool,
    },

    /// Write an example plan file
    Init {
        #[arg(short, long, default_value = "./flagbench.toml")]
        plan: PathBuf,
    },
}

pub fn parse() -> Args {
    Args::parse()
}

/// Maps the answer to the scenario prompt. Anything but `2` means payload-heavy.
pub fn scenario_from_choice(choice: &str) -> Scenario {
    match choice.trim() {
        "2" => Scenario::AllocHeavy,
        _ => Scenario::PayloadHeavy,
    }
}

pub fn ask_for_scenario() -> Scenario {
    println!("Choose a scenario:");
    println!("  1) {} (/json, large response)", Scenario::PayloadHeavy);
    println!("  2) {} (/alloc, tiny response)", Scenario::AllocHeavy);
    print!("Enter 1 or 2 [{}]: ", "1".bold());
    let _ = std::io::stdout().flush();

    let mut input = String::new();
    match std::io::stdin().read_line(&mut input) {
        Ok(_) => scenario_from_choice(&input),
        Err(_) => Scenario::PayloadHeavy,
    }
}
