/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    container::{ContainerId, ContainerRuntime},
    metrics::sample::ResourceSample,
};
use anyhow::Context;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Takes one stats snapshot and parses it.
pub async fn take_sample(
    runtime: &dyn ContainerRuntime,
    id: &ContainerId,
) -> anyhow::Result<ResourceSample> {
    let line = runtime.stats_line(id).await?;
    let sample = ResourceSample::parse(&line)
        .context(format!("Unable to parse stats of container {}", id.short()))?;
    Ok(sample)
}

/// Collects `count` samples spaced by `delay`, with no delay after the last one. Any failed
/// sample fails the whole burst.
///
/// # Arguments
///
/// * runtime - The container runtime to query
/// * id - The container to observe
/// * count - Number of samples
/// * delay - Pause between two samples
pub async fn sample_burst(
    runtime: &dyn ContainerRuntime,
    id: &ContainerId,
    count: usize,
    delay: Duration,
) -> anyhow::Result<Vec<ResourceSample>> {
    let mut samples = Vec::with_capacity(count);
    for i in 0..count {
        samples.push(take_sample(runtime, id).await?);
        if i + 1 < count {
            tokio::time::sleep(delay).await;
        }
    }
    Ok(samples)
}

/// What [`SamplerHandle::join_within`] does with a sampler that misses the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDeadline {
    /// Stop waiting and leave the task to finish on its own sample count.
    #[default]
    Detach,
    /// Stop waiting and cancel the task.
    Cancel,
}

/// Samples collected by a background sampler once it has been joined or given up on.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerJoin {
    pub samples: Vec<ResourceSample>,
    /// `false` if the deadline expired before the sampler was done.
    pub completed: bool,
}

/// Handle to a background sampler. The task is the only writer of the shared buffer, the
/// handle only reads it after joining or giving up.
#[derive(Debug)]
pub struct SamplerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
    shared_samples: Arc<Mutex<Vec<ResourceSample>>>,
}
impl SamplerHandle {
    /// Waits at most `bound` for the sampler to finish and returns what it has collected.
    pub async fn join_within(mut self, bound: Duration, on_deadline: OnDeadline) -> SamplerJoin {
        let completed = match tokio::time::timeout(bound, &mut self.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Background sampler terminated abnormally: {}", e);
                true
            }
            Err(_) => {
                warn!(
                    "Background sampler still running after {:?}, continuing without it",
                    bound
                );
                if on_deadline == OnDeadline::Cancel {
                    self.token.cancel();
                }
                false
            }
        };

        SamplerJoin {
            samples: self.snapshot(),
            completed,
        }
    }

    /// Cancels the sampler and waits for it to stop.
    pub async fn stop(mut self) -> Vec<ResourceSample> {
        self.token.cancel();
        if let Err(e) = (&mut self.handle).await {
            warn!("Background sampler terminated abnormally: {}", e);
        }
        self.snapshot()
    }

    fn snapshot(&self) -> Vec<ResourceSample> {
        self.shared_samples
            .lock()
            .map(|samples| samples.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

/// Starts a task that takes `count` samples spaced by `delay`, appending each one to a shared
/// buffer as soon as it is taken. Failed samples are skipped, the task always ends after
/// `count` attempts or when cancelled.
///
/// # Arguments
///
/// * runtime - The container runtime to query
/// * id - The container to observe
/// * count - Number of sample attempts
/// * delay - Pause between two attempts
///
/// # Returns
///
/// A handle used to collect the samples with a bounded wait.
pub fn start_sampling(
    runtime: Arc<dyn ContainerRuntime>,
    id: ContainerId,
    count: usize,
    delay: Duration,
) -> SamplerHandle {
    let shared_samples = Arc::new(Mutex::new(Vec::with_capacity(count)));
    let token = CancellationToken::new();

    let handle = {
        let token = token.clone();
        let shared_samples = shared_samples.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Background sampler cancelled");
                }
                _ = keep_sampling(runtime, id, count, delay, shared_samples) => {}
            }
        })
    };

    SamplerHandle {
        token,
        handle,
        shared_samples,
    }
}

async fn keep_sampling(
    runtime: Arc<dyn ContainerRuntime>,
    id: ContainerId,
    count: usize,
    delay: Duration,
    shared_samples: Arc<Mutex<Vec<ResourceSample>>>,
) {
    for i in 0..count {
        match take_sample(runtime.as_ref(), &id).await {
            Ok(sample) => match shared_samples.lock() {
                Ok(mut samples) => samples.push(sample),
                Err(poisoned) => poisoned.into_inner().push(sample),
            },
            Err(e) => debug!("Skipping load sample {}/{}: {:#}", i + 1, count, e),
        }

        if i + 1 < count {
            tokio::time::sleep(delay).await;
        }
    }
}
