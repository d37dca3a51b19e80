/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod clap_args;
pub mod config;
pub mod container;
pub mod data;
pub mod export;
pub mod http;
pub mod metrics;
pub mod metrics_logger;
pub mod readiness;
pub mod report;
pub mod runner;
pub mod workload;
