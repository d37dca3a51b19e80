/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{config::RunnerSettings, metrics::sample::STATS_FORMAT};
use async_trait::async_trait;
use std::{error::Error, fmt, time::Duration};
use tokio::process::Command;
use tracing::{debug, trace};

/// Identifier printed by `docker run -d`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);
impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first 12 characters, the way `docker ps` shows ids.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(12).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}
impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to start one detached container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub host_port: u16,
    pub container_port: u16,
    pub cpus: String,
    pub memory: String,
    pub env: Vec<(String, String)>,
}
impl ContainerSpec {
    /// Arguments for `<runtime> run`, in the order the runtime expects them.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "-p".to_string(),
            format!("{}:{}", self.host_port, self.container_port),
            "--cpus".to_string(),
            self.cpus.clone(),
            "--memory".to_string(),
            self.memory.clone(),
        ];
        for (key, value) in self.env.iter() {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.image.clone());
        args
    }
}

/// Failure of a single container runtime CLI invocation.
#[derive(Debug)]
pub enum CommandError {
    Spawn {
        command: String,
        source: std::io::Error,
    },
    TimedOut {
        command: String,
        timeout: Duration,
    },
    Failed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    EmptyContainerId {
        stdout: String,
        stderr: String,
    },
}
impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommandError::Spawn { command, source } => {
                write!(f, "Failed to spawn command `{}`: {}", command, source)
            }
            CommandError::TimedOut { command, timeout } => {
                write!(f, "Command timed out after {:?}: {}", timeout, command)
            }
            CommandError::Failed {
                command,
                exit_code,
                stdout,
                stderr,
            } => write!(
                f,
                "Command failed (exit {}): {}\nstderr: {}\nstdout: {}",
                exit_code.map_or("signal".to_string(), |code| code.to_string()),
                command,
                stderr.trim(),
                stdout.trim()
            ),
            CommandError::EmptyContainerId { stdout, stderr } => write!(
                f,
                "Container runtime returned an empty container id. stdout={} stderr={}",
                stdout.trim(),
                stderr.trim()
            ),
        }
    }
}
impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommandError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// The lifecycle and observation commands a benchmark run issues against a container runtime.
///
/// Only the run executor that started a container may call `stop` or `remove` on it.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(&self, spec: &ContainerSpec) -> anyhow::Result<ContainerId>;

    /// Returns exactly one raw stats line formatted with [`STATS_FORMAT`].
    async fn stats_line(&self, id: &ContainerId) -> anyhow::Result<String>;

    async fn logs_tail(&self, id: &ContainerId, lines: u32) -> anyhow::Result<String>;

    async fn stop(&self, id: &ContainerId) -> anyhow::Result<()>;

    async fn remove(&self, id: &ContainerId) -> anyhow::Result<()>;
}

/// Drives the `docker` (or a compatible, e.g. `podman`) command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    bin: String,
    run_timeout: Duration,
    stats_timeout: Duration,
    logs_timeout: Duration,
    stop_timeout: Duration,
}
impl DockerCli {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            run_timeout: Duration::from_secs(30),
            stats_timeout: Duration::from_secs(10),
            logs_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_settings(settings: &RunnerSettings) -> Self {
        Self {
            bin: settings.runtime_bin.clone(),
            run_timeout: settings.run_timeout(),
            stats_timeout: settings.stats_timeout(),
            logs_timeout: settings.logs_timeout(),
            stop_timeout: settings.stop_timeout(),
        }
    }

    async fn exec(&self, args: &[String], timeout: Duration) -> Result<String, CommandError> {
        let output = exec(&self.bin, args, timeout).await?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self, spec: &ContainerSpec) -> anyhow::Result<ContainerId> {
        let output = exec(&self.bin, &spec.run_args(), self.run_timeout).await?;

        let id = output.stdout.trim();
        if id.is_empty() {
            return Err(CommandError::EmptyContainerId {
                stdout: output.stdout,
                stderr: output.stderr,
            }
            .into());
        }
        Ok(ContainerId::new(id))
    }

    async fn stats_line(&self, id: &ContainerId) -> anyhow::Result<String> {
        let args = [
            "stats".to_string(),
            "--no-stream".to_string(),
            "--format".to_string(),
            STATS_FORMAT.to_string(),
            id.to_string(),
        ];
        let stdout = self.exec(&args, self.stats_timeout).await?;
        Ok(stdout.trim().to_string())
    }

    async fn logs_tail(&self, id: &ContainerId, lines: u32) -> anyhow::Result<String> {
        let args = [
            "logs".to_string(),
            "--tail".to_string(),
            lines.to_string(),
            id.to_string(),
        ];
        // docker writes the container's stderr stream to our stderr, keep both
        let output = exec(&self.bin, &args, self.logs_timeout).await?;
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    async fn stop(&self, id: &ContainerId) -> anyhow::Result<()> {
        self.exec(&["stop".to_string(), id.to_string()], self.stop_timeout)
            .await?;
        Ok(())
    }

    async fn remove(&self, id: &ContainerId) -> anyhow::Result<()> {
        self.exec(
            &["rm".to_string(), "-f".to_string(), id.to_string()],
            self.stop_timeout,
        )
        .await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a command to completion with a hard wall-clock timeout. The child is killed if the
/// timeout expires because dropping the future drops the child (`kill_on_drop`).
///
/// # Arguments
///
/// * bin - The executable to run
/// * args - Its arguments
/// * timeout - Maximum time the command may take
///
/// # Returns
///
/// The captured output if the command exited with status 0.
pub async fn exec(
    bin: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    let command_str = render_command(bin, args);
    debug!("Running command {}", command_str);

    let child = Command::new(bin).args(args).kill_on_drop(true).output();
    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(CommandError::Spawn {
                command: command_str,
                source,
            })
        }
        Err(_) => {
            return Err(CommandError::TimedOut {
                command: command_str,
                timeout,
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    trace!("stdout: {}", stdout);

    if output.status.success() {
        Ok(CommandOutput { stdout, stderr })
    } else {
        Err(CommandError::Failed {
            command: command_str,
            exit_code: output.status.code(),
            stdout,
            stderr,
        })
    }
}

fn render_command(bin: &str, args: &[String]) -> String {
    let words = std::iter::once(bin).chain(args.iter().map(|arg| arg.as_str()));
    shlex::try_join(words).unwrap_or_else(|_| format!("{} {}", bin, args.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(env: Vec<(String, String)>) -> ContainerSpec {
        ContainerSpec {
            image: "demo:jvm".to_string(),
            host_port: 8081,
            container_port: 8080,
            cpus: "1".to_string(),
            memory: "768m".to_string(),
            env,
        }
    }

    #[test]
    fn run_args_apply_resource_limits_and_image_last() {
        let args = spec(vec![]).run_args();
        assert_eq!(
            args,
            ["run", "-d", "-p", "8081:8080", "--cpus", "1", "--memory", "768m", "demo:jvm"]
        );
    }

    #[test]
    fn run_args_inject_env_before_image() {
        let args = spec(vec![(
            "JAVA_TOOL_OPTIONS".to_string(),
            "-XX:-UseCompressedOops -Xss512k".to_string(),
        )])
        .run_args();

        assert_eq!(args[8], "-e");
        assert_eq!(args[9], "JAVA_TOOL_OPTIONS=-XX:-UseCompressedOops -Xss512k");
        assert_eq!(args.last().map(String::as_str), Some("demo:jvm"));
    }

    #[test]
    fn short_id_is_twelve_chars() {
        let id = ContainerId::new("4f1c2b3a5d6e7f8091a2b3c4d5e6f708");
        assert_eq!(id.short(), "4f1c2b3a5d6e");
        assert_eq!(ContainerId::new("abc").short(), "abc");
    }

    #[test]
    fn rendered_command_quotes_arguments_with_spaces() {
        let rendered = render_command("docker", &["logs".to_string(), "a b".to_string()]);
        assert!(rendered.starts_with("docker logs "));
        assert_ne!(rendered, "docker logs a b");
    }

    #[cfg(target_family = "unix")]
    mod unix {
        use super::*;

        #[tokio::test]
        async fn exec_captures_stdout() -> anyhow::Result<()> {
            let output = exec("echo", &["hello".to_string()], Duration::from_secs(5)).await?;
            assert_eq!(output.stdout.trim(), "hello");
            Ok(())
        }

        #[tokio::test]
        async fn exec_reports_nonzero_exit() {
            let res = exec("false", &[], Duration::from_secs(5)).await;
            assert!(matches!(
                res,
                Err(CommandError::Failed {
                    exit_code: Some(1),
                    ..
                })
            ));
        }

        #[tokio::test]
        async fn exec_kills_commands_that_overrun() {
            let start = std::time::Instant::now();
            let res = exec("sleep", &["5".to_string()], Duration::from_millis(200)).await;

            assert!(matches!(res, Err(CommandError::TimedOut { .. })));
            assert!(start.elapsed() < Duration::from_secs(4));
        }

        #[tokio::test]
        async fn run_fails_when_runtime_exits_with_error() {
            // `false` ignores its arguments and exits with 1, standing in for a failing runtime
            let runtime = DockerCli::new("false");
            let res = runtime.run(&spec(vec![])).await;
            let err = res.expect_err("run should fail");
            assert!(err.downcast_ref::<CommandError>().is_some());
        }

        #[tokio::test]
        async fn run_rejects_an_empty_container_id() {
            // `true` prints nothing and exits with 0
            let runtime = DockerCli::new("true");
            let err = runtime.run(&spec(vec![])).await.expect_err("empty id");
            assert!(matches!(
                err.downcast_ref::<CommandError>(),
                Some(CommandError::EmptyContainerId { .. })
            ));
        }
    }
}
