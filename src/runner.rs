/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod diagnostics;
pub mod run_set;
pub mod single_run;

pub use run_set::{RunFailure, RunSet, RunSetOutcome};
pub use single_run::{RunExecutor, RunPhase};
