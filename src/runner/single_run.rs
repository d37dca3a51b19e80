/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    config::{RunConfig, RunnerSettings},
    container::{ContainerId, ContainerRuntime, ContainerSpec},
    data::{PhaseSamples, RunResult},
    http::WorkloadClient,
    metrics_logger::{self, OnDeadline},
    readiness::ReadinessProber,
    runner::diagnostics,
    workload::WorkloadSpec,
};
use anyhow::Context;
use std::{fmt, sync::Arc};
use tracing::{debug, info, warn};

/// Steps of a single run, in the order they are entered. Any step after `Starting` may end the
/// run with an error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Starting,
    LogSnapshot,
    AwaitingReady,
    IdleSampling,
    LoadSampling,
    FirstRequest,
    Warmup,
    Measure,
    JoinSampler,
    PostSampling,
    Teardown,
    Done,
}
impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RunPhase::Starting => "starting the container",
            RunPhase::LogSnapshot => "capturing startup logs",
            RunPhase::AwaitingReady => "waiting for readiness",
            RunPhase::IdleSampling => "sampling idle resources",
            RunPhase::LoadSampling => "starting the load sampler",
            RunPhase::FirstRequest => "sending the first request",
            RunPhase::Warmup => "warming up",
            RunPhase::Measure => "measuring",
            RunPhase::JoinSampler => "collecting load samples",
            RunPhase::PostSampling => "sampling post-load resources",
            RunPhase::Teardown => "tearing down",
            RunPhase::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// Runs one configuration from container start to teardown. The executor is the only thing
/// that ever stops or removes the container it started.
pub struct RunExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    prober: ReadinessProber,
    client: WorkloadClient,
    settings: RunnerSettings,
}
impl RunExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: RunnerSettings) -> anyhow::Result<Self> {
        let prober = ReadinessProber::from_settings(&settings)?;
        let client = WorkloadClient::new(
            settings.base_url(),
            settings.connect_timeout(),
            settings.request_timeout(),
        )?;

        Ok(Self {
            runtime,
            prober,
            client,
            settings,
        })
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Same limits for every configuration. Flags are only passed on when there are any.
    pub fn container_spec(&self, config: &RunConfig) -> ContainerSpec {
        let env = config
            .effective_flags()
            .filter(|flags| !flags.trim().is_empty())
            .map(|flags| vec![(self.settings.flags_env.clone(), flags)])
            .unwrap_or_default();

        ContainerSpec {
            image: config.image.clone(),
            host_port: self.settings.host_port,
            container_port: self.settings.container_port,
            cpus: self.settings.cpus.clone(),
            memory: self.settings.memory.clone(),
            env,
        }
    }

    /// Benchmarks one configuration.
    ///
    /// # Arguments
    ///
    /// * config - The variant to run
    /// * workload - The endpoint and size shared by the whole run set
    ///
    /// # Returns
    ///
    /// The result of a successful run. Any failure after the container was started dumps the
    /// container logs and stops the container. It is only removed when `retain_failed` is off.
    pub async fn execute(
        &self,
        config: &RunConfig,
        workload: &WorkloadSpec,
    ) -> anyhow::Result<RunResult> {
        debug!("{}: {}", config.name, RunPhase::Starting);
        let spec = self.container_spec(config);
        let id = self
            .runtime
            .run(&spec)
            .await
            .context(format!("Failed to start container for {}", config.name))?;
        info!("Started {} as container {}", config.name, id.short());

        let mut run = Run {
            executor: self,
            config,
            workload,
            id: &id,
            phase: RunPhase::Starting,
        };

        match run.drive().await {
            Ok(result) => {
                run.enter(RunPhase::Teardown);
                self.teardown(&id).await;
                run.enter(RunPhase::Done);
                Ok(result)
            }

            Err(e) => {
                let phase = run.phase;
                self.handle_failure(config, &id).await;
                Err(e.context(format!("Run {} failed while {}", config.name, phase)))
            }
        }
    }

    async fn stop(&self, id: &ContainerId) {
        if let Err(e) = self.runtime.stop(id).await {
            warn!("Unable to stop container {}: {:#}", id.short(), e);
        }
    }

    async fn teardown(&self, id: &ContainerId) {
        self.stop(id).await;
        if let Err(e) = self.runtime.remove(id).await {
            warn!("Unable to remove container {}: {:#}", id.short(), e);
        }
    }

    async fn handle_failure(&self, config: &RunConfig, id: &ContainerId) {
        diagnostics::dump_failure_logs(
            self.runtime.as_ref(),
            id,
            &config.name,
            self.settings.log_tail_lines,
        )
        .await;

        // a retained container is still stopped so the host port is free for the next run
        if self.settings.retain_failed {
            self.stop(id).await;
            warn!(
                "Keeping stopped container {} of failed run {} for inspection",
                id, config.name
            );
        } else {
            self.teardown(id).await;
        }
    }
}

/// State of one run in progress.
struct Run<'a> {
    executor: &'a RunExecutor,
    config: &'a RunConfig,
    workload: &'a WorkloadSpec,
    id: &'a ContainerId,
    phase: RunPhase,
}
impl Run<'_> {
    fn enter(&mut self, phase: RunPhase) {
        debug!("{}: {} -> {}", self.config.name, self.phase, phase);
        self.phase = phase;
    }

    async fn drive(&mut self) -> anyhow::Result<RunResult> {
        let executor = self.executor;
        let settings = &executor.settings;
        let path = self.workload.path();

        self.enter(RunPhase::LogSnapshot);
        let startup_log = diagnostics::capture_startup_log(
            executor.runtime.as_ref(),
            self.id,
            settings.log_tail_lines,
            settings.log_snippet_chars,
        )
        .await;

        self.enter(RunPhase::AwaitingReady);
        let readiness = executor
            .prober
            .wait_until_ready(&settings.base_url(), settings.readiness_timeout(), &path)
            .await?;

        self.enter(RunPhase::IdleSampling);
        let idle = metrics_logger::sample_burst(
            executor.runtime.as_ref(),
            self.id,
            settings.idle_samples,
            settings.sample_delay(),
        )
        .await
        .context("Idle sampling failed")?;

        // covers the first request, warmup and measurement
        self.enter(RunPhase::LoadSampling);
        let sampler = metrics_logger::start_sampling(
            executor.runtime.clone(),
            self.id.clone(),
            settings.load_samples,
            settings.sample_delay(),
        );

        let (first_request_secs, latencies_secs) = match self.drive_load(&path).await {
            Ok(measured) => measured,
            Err(e) => {
                sampler.stop().await;
                return Err(e);
            }
        };

        self.enter(RunPhase::JoinSampler);
        let load = sampler
            .join_within(settings.sampler_join_timeout(), OnDeadline::Detach)
            .await
            .samples;

        self.enter(RunPhase::PostSampling);
        let post = metrics_logger::sample_burst(
            executor.runtime.as_ref(),
            self.id,
            settings.post_samples,
            settings.sample_delay(),
        )
        .await
        .context("Post-load sampling failed")?;

        Ok(RunResult {
            name: self.config.name.clone(),
            image: self.config.image.clone(),
            effective_flags: self.config.effective_flags(),
            scenario: self.workload.scenario,
            n: self.workload.n,
            workload_path: path,
            readiness,
            first_request_secs,
            latencies_secs,
            samples: PhaseSamples { idle, load, post },
            startup_log,
        })
    }

    async fn drive_load(&mut self, path: &str) -> anyhow::Result<(f64, Vec<f64>)> {
        let executor = self.executor;
        let client = &executor.client;

        self.enter(RunPhase::FirstRequest);
        let first = client
            .measure(path)
            .await
            .context("First request failed")?;
        info!(
            "{}: first request took {:.3}s",
            self.config.name,
            first.as_secs_f64()
        );

        self.enter(RunPhase::Warmup);
        client
            .warmup(path, executor.settings.warmup_requests)
            .await
            .context("Warmup failed")?;

        self.enter(RunPhase::Measure);
        let latencies = client
            .measure_many(path, executor.settings.measure_requests)
            .await?;

        Ok((first.as_secs_f64(), latencies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{readiness::ReadinessMechanism, workload::Scenario};
    use async_trait::async_trait;
    use axum::{http::StatusCode, routing::get, Router};
    use std::{sync::Mutex, time::Duration};

    const LINE: &str = "0.50%|100MiB / 768MiB|13.02%|1kB / 2kB|0B / 0B|20";

    /// Calls to the runtime and hits on the workload double, in the order they happened.
    type Events = Arc<Mutex<Vec<String>>>;

    fn record(events: &Events, event: &str) {
        if let Ok(mut events) = events.lock() {
            events.push(event.to_string());
        }
    }

    #[derive(Default)]
    struct FakeRuntime {
        fail_start: bool,
        events: Events,
    }
    impl FakeRuntime {
        fn record(&self, call: &str) {
            record(&self.events, call);
        }

        fn count(&self, call: &str) -> usize {
            self.events
                .lock()
                .map(|events| events.iter().filter(|e| *e == call).count())
                .unwrap_or_default()
        }

        fn events(&self) -> Vec<String> {
            self.events
                .lock()
                .map(|events| events.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn run(&self, _spec: &ContainerSpec) -> anyhow::Result<ContainerId> {
            self.record("run");
            if self.fail_start {
                return Err(anyhow::anyhow!("docker run exited with 1"));
            }
            Ok(ContainerId::new("0123456789abcdef"))
        }

        async fn stats_line(&self, _id: &ContainerId) -> anyhow::Result<String> {
            self.record("stats");
            Ok(LINE.to_string())
        }

        async fn logs_tail(&self, _id: &ContainerId, _lines: u32) -> anyhow::Result<String> {
            self.record("logs");
            Ok("Started Application in 1.234 seconds".to_string())
        }

        async fn stop(&self, _id: &ContainerId) -> anyhow::Result<()> {
            self.record("stop");
            Ok(())
        }

        async fn remove(&self, _id: &ContainerId) -> anyhow::Result<()> {
            self.record("rm");
            Ok(())
        }
    }

    async fn serve(app: Router) -> anyhow::Result<u16> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(port)
    }

    fn settings(port: u16) -> RunnerSettings {
        RunnerSettings {
            host: "127.0.0.1".to_string(),
            host_port: port,
            readiness_timeout_ms: 2_000,
            poll_interval_ms: 10,
            warmup_requests: 2,
            measure_requests: 5,
            idle_samples: 2,
            load_samples: 3,
            post_samples: 2,
            sample_delay_ms: 10,
            sampler_join_timeout_ms: 2_000,
            ..RunnerSettings::default()
        }
    }

    fn workload() -> WorkloadSpec {
        WorkloadSpec::new(Scenario::PayloadHeavy, 1000)
    }

    #[test]
    fn injects_flags_only_when_there_are_some() -> anyhow::Result<()> {
        let executor = RunExecutor::new(Arc::new(FakeRuntime::default()), settings(8080))?;

        let spec = executor.container_spec(&RunConfig::new(
            "coops-off",
            "demo:jvm",
            ["-XX:-UseCompressedOops", " -Xshare:off "],
        ));
        assert_eq!(
            spec.env,
            vec![(
                "JAVA_TOOL_OPTIONS".to_string(),
                "-XX:-UseCompressedOops -Xshare:off".to_string()
            )]
        );

        let blank = executor.container_spec(&RunConfig::new("baseline", "demo:jvm", [" "]));
        assert!(blank.env.is_empty());

        let native = executor.container_spec(&RunConfig::new(
            "native",
            "demo:native",
            ["-XX:+UseZGC"],
        ));
        assert!(native.env.is_empty());
        assert_eq!(native.memory, "768m");
        assert_eq!(native.cpus, "1");
        Ok(())
    }

    #[tokio::test]
    async fn successful_run_records_everything_and_cleans_up() -> anyhow::Result<()> {
        let app = Router::new()
            .route("/actuator/health/readiness", get(|| async { "UP" }))
            .route("/json", get(|| async { "[{\"id\":1}]" }));
        let port = serve(app).await?;
        let runtime = Arc::new(FakeRuntime::default());
        let executor = RunExecutor::new(runtime.clone(), settings(port))?;

        let res = executor
            .execute(&RunConfig::new("baseline", "demo:jvm", Vec::<String>::new()), &workload())
            .await?;

        assert_eq!(res.name, "baseline");
        assert_eq!(res.effective_flags.as_deref(), Some(""));
        assert_eq!(res.workload_path, "/json?n=1000");
        assert_eq!(
            res.readiness.mechanism,
            ReadinessMechanism::DedicatedReadiness
        );
        assert_eq!(res.latencies_secs.len(), 5);
        assert!(res.first_request_secs > 0.0);
        assert_eq!(res.samples.idle.len(), 2);
        assert_eq!(res.samples.load.len(), 3);
        assert_eq!(res.samples.post.len(), 2);
        assert_eq!(
            res.startup_log.as_deref(),
            Some("Started Application in 1.234 seconds")
        );

        assert_eq!(runtime.count("stop"), 1);
        assert_eq!(runtime.count("rm"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_run_keeps_its_container() -> anyhow::Result<()> {
        let app = Router::new()
            .route("/actuator/health/readiness", get(|| async { "UP" }))
            .route(
                "/json",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            );
        let port = serve(app).await?;
        let runtime = Arc::new(FakeRuntime::default());
        let executor = RunExecutor::new(runtime.clone(), settings(port))?;

        let res = executor
            .execute(&RunConfig::new("baseline", "demo:jvm", Vec::<String>::new()), &workload())
            .await;

        let err = res.expect_err("the workload never answers 200");
        assert!(format!("{:#}", err).contains("sending the first request"));
        // startup snapshot plus the failure dump
        assert_eq!(runtime.count("logs"), 2);
        // stopped to free the host port, but kept for inspection
        assert_eq!(runtime.count("stop"), 1);
        assert_eq!(runtime.count("rm"), 0);

        // the load sampler died with the run
        let stats = runtime.count("stats");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runtime.count("stats"), stats);
        Ok(())
    }

    #[tokio::test]
    async fn load_sampling_starts_before_the_first_request() -> anyhow::Result<()> {
        let runtime = Arc::new(FakeRuntime::default());
        let events = runtime.events.clone();
        let app = Router::new()
            .route("/actuator/health/readiness", get(|| async { "UP" }))
            .route(
                "/json",
                get(move || {
                    record(&events, "GET /json");
                    async { "[{\"id\":1}]" }
                }),
            );
        let port = serve(app).await?;
        let settings = settings(port);
        let idle_samples = settings.idle_samples;
        let executor = RunExecutor::new(runtime.clone(), settings)?;

        executor
            .execute(&RunConfig::new("baseline", "demo:jvm", Vec::<String>::new()), &workload())
            .await?;

        let events = runtime.events();
        let first_load_sample = events
            .iter()
            .enumerate()
            .filter(|(_, e)| *e == "stats")
            .nth(idle_samples)
            .map(|(i, _)| i);
        let first_get = events.iter().position(|e| e == "GET /json");
        assert!(first_load_sample.is_some());
        assert!(first_get.is_some());
        assert!(first_load_sample < first_get);

        // first request, warmup and measurement all hit the workload path
        assert_eq!(events.iter().filter(|e| *e == "GET /json").count(), 1 + 2 + 5);
        Ok(())
    }

    #[tokio::test]
    async fn failed_run_is_removed_when_not_retained() -> anyhow::Result<()> {
        let app = Router::new().fallback(|| async { StatusCode::NOT_FOUND });
        let port = serve(app).await?;
        let runtime = Arc::new(FakeRuntime::default());
        let executor = RunExecutor::new(
            runtime.clone(),
            RunnerSettings {
                retain_failed: false,
                ..settings(port)
            },
        )?;

        let err = executor
            .execute(&RunConfig::new("baseline", "demo:jvm", Vec::<String>::new()), &workload())
            .await
            .expect_err("nothing ever gets ready");

        assert!(format!("{:#}", err).contains("waiting for readiness"));
        assert_eq!(runtime.count("stats"), 0);
        assert_eq!(runtime.count("stop"), 1);
        assert_eq!(runtime.count("rm"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn start_failure_touches_nothing_else() -> anyhow::Result<()> {
        let runtime = Arc::new(FakeRuntime {
            fail_start: true,
            ..FakeRuntime::default()
        });
        let executor = RunExecutor::new(runtime.clone(), settings(1))?;

        let res = executor
            .execute(&RunConfig::new("baseline", "demo:jvm", Vec::<String>::new()), &workload())
            .await;

        assert!(res.is_err());
        assert_eq!(runtime.count("run"), 1);
        assert_eq!(runtime.count("logs"), 0);
        assert_eq!(runtime.count("stop"), 0);
        Ok(())
    }
}
