/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Best-effort log capture. Nothing in here can fail a run.

use crate::container::{ContainerId, ContainerRuntime};
use tracing::{error, warn};

const TRUNCATION_MARKER: &str = "\n... (truncated)";

/// Keeps the first `max_chars` characters of `text`, marking the cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Tail of the container logs right after start, or `None` if they could not be read.
pub async fn capture_startup_log(
    runtime: &dyn ContainerRuntime,
    id: &ContainerId,
    lines: u32,
    max_chars: usize,
) -> Option<String> {
    match runtime.logs_tail(id, lines).await {
        Ok(logs) => Some(truncate(&logs, max_chars)),
        Err(e) => {
            warn!("Unable to capture startup logs of {}: {:#}", id.short(), e);
            None
        }
    }
}

/// Writes the tail of the container logs to the error log.
pub async fn dump_failure_logs(
    runtime: &dyn ContainerRuntime,
    id: &ContainerId,
    name: &str,
    lines: u32,
) {
    match runtime.logs_tail(id, lines).await {
        Ok(logs) => error!(
            "Last {} log lines of {} ({}):\n{}",
            lines,
            name,
            id.short(),
            logs
        ),
        Err(e) => warn!("Unable to fetch logs of {} ({}): {:#}", name, id.short(), e),
    }
}
