//! Docker CLI backend.
//!
//! Shells out to `docker` / `docker compose`. The merged compose definition
//! is written to `<work_dir>/<project>/docker-compose.yml` and every
//! compose call runs with the project's container directory as the project
//! directory, so relative bind mounts resolve as they would for a plain
//! `docker compose up`.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::time::{Duration, Instant};

use stevedore_common::error::{ConfigError, DispatchError, RuntimeError, StevedoreError};
use stevedore_common::types::{ContainerName, ExitOutcome};
use stevedore_compose::plan::ComposePlan;

use super::{ContainerRuntime, ContainerStatusReport, ExecIo, ExecRequest, Health, StopOutcome};
use crate::interrupt::{InterruptForwarder, Tier};
use crate::ports::PortMap;

const DAEMON_DOWN_MARKERS: [&str; 3] = [
    "Cannot connect to the Docker daemon",
    "Is the docker daemon running",
    "error during connect",
];
const NO_SUCH_CONTAINER: &str = "No such container";
const LAUNCH_FAILURE_MARKERS: [&str; 3] = [
    "Error response from daemon",
    NO_SUCH_CONTAINER,
    "OCI runtime exec failed",
];
/// Exit codes `docker exec` uses for its own failures rather than the command's.
const EXEC_RESERVED_CODES: [i32; 3] = [125, 126, 127];
const STDERR_CAPTURE_LIMIT: usize = 4096;
const WAIT_POLL: Duration = Duration::from_millis(20);
const STATE_FORMAT: &str = "{{.State.Running}}|{{if .State.Health}}{{.State.Health.Status}}{{end}}";
const PORTS_FORMAT: &str = "{{json .NetworkSettings.Ports}}";

/// [`ContainerRuntime`] backed by the Docker command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
    work_dir: PathBuf,
}

impl DockerCli {
    /// Locates `binary` on `PATH`; merged compose files go under `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::BinaryNotFound`] if the binary is missing.
    pub fn new(binary: &str, work_dir: impl Into<PathBuf>) -> Result<Self, RuntimeError> {
        let binary = which::which(binary).map_err(|_| RuntimeError::BinaryNotFound {
            binary: binary.to_string(),
        })?;
        Ok(Self {
            binary,
            work_dir: work_dir.into(),
        })
    }

    /// Where the merged compose file of `project` is written.
    #[must_use]
    pub fn compose_file(&self, project: &str) -> PathBuf {
        self.work_dir.join(project).join("docker-compose.yml")
    }

    fn compose_args(&self, plan: &ComposePlan) -> Vec<String> {
        let config = &plan.config;
        vec![
            "compose".into(),
            "-p".into(),
            config.project_name.clone(),
            "--project-directory".into(),
            config.container_dir.to_string_lossy().into_owned(),
            "-f".into(),
            self.compose_file(&config.project_name)
                .to_string_lossy()
                .into_owned(),
        ]
    }

    /// Runs a short-lived runtime invocation and captures its output.
    fn run(&self, args: &[String], env: Option<&BTreeMap<String, String>>) -> Result<Output, RuntimeError> {
        let rendered = render(args);
        let mut cmd = Command::new(&self.binary);
        let _ = cmd
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(env) = env {
            let _ = cmd.envs(env);
        }
        own_process_group(&mut cmd);
        tracing::debug!(command = %rendered, "running runtime command");
        let child = cmd.spawn().map_err(|source| RuntimeError::Io {
            command: rendered.clone(),
            source,
        })?;
        let _tracked = InterruptForwarder::global().track(child.id(), Tier::Runtime);
        child
            .wait_with_output()
            .map_err(|source| RuntimeError::Io {
                command: rendered,
                source,
            })
    }

    /// Like [`Self::run`], but turns unsuccessful exits into errors.
    fn run_checked(&self, args: &[String], env: Option<&BTreeMap<String, String>>) -> Result<String, RuntimeError> {
        let output = self.run(args, env)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_failure(args, &output))
        }
    }
}

impl ContainerRuntime for DockerCli {
    fn ping(&self) -> Result<(), RuntimeError> {
        let args = ["version", "--format", "{{.Server.Version}}"].map(String::from);
        let version = self.run_checked(&args, None)?;
        tracing::debug!(server = %version.trim(), "runtime reachable");
        Ok(())
    }

    fn prepare(&self, plan: &ComposePlan) -> Result<(), StevedoreError> {
        let path = self.compose_file(&plan.config.project_name);
        let yaml = plan.merged.to_yaml()?;
        let io_err = |source: io::Error| ConfigError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, yaml).map_err(io_err)?;
        tracing::debug!(project = %plan.config.project_name, path = %path.display(), "merged compose file written");
        Ok(())
    }

    fn start_service(&self, plan: &ComposePlan, service: &str) -> Result<(), RuntimeError> {
        let mut args = self.compose_args(plan);
        args.extend(["up", "-d", "--no-deps", service].map(String::from));
        let _ = self.run_checked(&args, Some(&plan.config.env))?;
        Ok(())
    }

    fn inspect(&self, container: &ContainerName) -> Result<ContainerStatusReport, RuntimeError> {
        let args = inspect_args(container, STATE_FORMAT);
        let output = self.run(&args, None)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains(NO_SUCH_CONTAINER) || stderr.contains("No such object") {
                return Ok(ContainerStatusReport::missing());
            }
            return Err(classify_failure(&args, &output));
        }
        parse_state(container, &String::from_utf8_lossy(&output.stdout))
    }

    fn stop(&self, container: &ContainerName) -> Result<StopOutcome, RuntimeError> {
        if !self.inspect(container)?.running {
            return Ok(StopOutcome::AlreadyStopped);
        }
        let args = ["stop".to_string(), container.to_string()];
        match self.run_checked(&args, None) {
            Ok(_) => Ok(StopOutcome::Stopped),
            Err(RuntimeError::CommandFailed { ref stderr, .. }) if stderr.contains(NO_SUCH_CONTAINER) => {
                Ok(StopOutcome::AlreadyStopped)
            }
            Err(e) => Err(e),
        }
    }

    fn exec(
        &self,
        container: &ContainerName,
        request: &ExecRequest,
        io: ExecIo,
    ) -> Result<ExitOutcome, DispatchError> {
        let launch_failed = |reason: String| DispatchError::LaunchFailed {
            container: container.to_string(),
            reason,
        };
        let mut cmd = Command::new(&self.binary);
        let _ = cmd.arg("exec");
        if request.interactive {
            // The terminal's own interrupt reaches `docker exec` directly, so
            // interactive sessions stay in the foreground process group.
            let _ = cmd
                .arg("-it")
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            let _ = cmd
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            own_process_group(&mut cmd);
        }
        let _ = cmd.arg(container.as_str()).args(&request.argv);

        let mut child = cmd.spawn().map_err(|e| launch_failed(e.to_string()))?;
        if request.interactive {
            let status = child.wait().map_err(|e| launch_failed(e.to_string()))?;
            return Ok(ExitOutcome {
                code: exit_code(status),
            });
        }

        let _tracked = InterruptForwarder::global().track(child.id(), Tier::Command);
        let (status, stderr_head) = stream_until_exit(&mut child, io, request.timeout)
            .map_err(|e| launch_failed(e.to_string()))?;
        let Some(status) = status else {
            return Err(DispatchError::TimedOut {
                container: container.to_string(),
                after: request.timeout.unwrap_or_default(),
            });
        };
        let code = exit_code(status);
        if let Some(reason) = launch_failure(code, &stderr_head) {
            return Err(launch_failed(reason));
        }
        Ok(ExitOutcome { code })
    }

    fn port_mappings(&self, container: &ContainerName) -> Result<PortMap, RuntimeError> {
        let stdout = self.run_checked(&inspect_args(container, PORTS_FORMAT), None)?;
        PortMap::from_inspect_json(container.as_str(), &stdout)
    }
}

/// Pumps the child's output into `io` until it exits or `timeout` elapses.
///
/// Returns `None` as status when the child was killed on timeout, along
/// with the beginning of its standard error.
fn stream_until_exit(
    child: &mut Child,
    io: ExecIo,
    timeout: Option<Duration>,
) -> io::Result<(Option<ExitStatus>, String)> {
    let ExecIo {
        stdout: mut out_sink,
        stderr: mut err_sink,
    } = io;
    let child_out = child.stdout.take();
    let child_err = child.stderr.take();
    let deadline = timeout.map(|t| Instant::now() + t);

    std::thread::scope(|scope| {
        let out_pump = scope.spawn(move || {
            if let Some(mut src) = child_out {
                pump(&mut src, &mut out_sink, None);
            }
        });
        let err_pump = scope.spawn(move || {
            let mut head = Vec::new();
            if let Some(mut src) = child_err {
                pump(&mut src, &mut err_sink, Some(&mut head));
            }
            String::from_utf8_lossy(&head).into_owned()
        });

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(pid = child.id(), "command timed out, killing");
                child.kill()?;
                let _ = child.wait()?;
                break None;
            }
            std::thread::sleep(WAIT_POLL);
        };
        let _ = out_pump.join();
        let head = err_pump.join().unwrap_or_default();
        Ok((status, head))
    })
}

/// Copies `src` to `sink` chunk by chunk, keeping the first bytes in `head`.
fn pump(src: &mut impl Read, sink: &mut dyn Write, mut head: Option<&mut Vec<u8>>) {
    let mut buf = [0_u8; 8192];
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        if let Some(head) = head.as_deref_mut() {
            let room = STDERR_CAPTURE_LIMIT.saturating_sub(head.len());
            head.extend_from_slice(&buf[..n.min(room)]);
        }
        // A failing sink must not stop the drain, or the child blocks on a full pipe.
        let _ = sink.write_all(&buf[..n]).and_then(|()| sink.flush());
    }
}

fn inspect_args(container: &ContainerName, format: &str) -> Vec<String> {
    vec![
        "inspect".into(),
        "--type".into(),
        "container".into(),
        "--format".into(),
        format.into(),
        container.to_string(),
    ]
}

fn parse_state(container: &ContainerName, raw: &str) -> Result<ContainerStatusReport, RuntimeError> {
    let unexpected = || RuntimeError::UnexpectedOutput {
        query: format!("state of {container}"),
        output: raw.to_string(),
    };
    let (running, health) = raw.trim().split_once('|').ok_or_else(unexpected)?;
    let running = match running {
        "true" => true,
        "false" => false,
        _ => return Err(unexpected()),
    };
    let health = match health {
        "" => None,
        "starting" => Some(Health::Starting),
        "healthy" => Some(Health::Healthy),
        "unhealthy" => Some(Health::Unhealthy),
        _ => return Err(unexpected()),
    };
    Ok(ContainerStatusReport {
        exists: true,
        running,
        health,
    })
}

fn classify_failure(args: &[String], output: &Output) -> RuntimeError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if DAEMON_DOWN_MARKERS.iter().any(|m| stderr.contains(m)) {
        return RuntimeError::DaemonUnavailable { message: stderr };
    }
    RuntimeError::CommandFailed {
        command: render(args),
        code: exit_code(output.status),
        stderr,
    }
}

/// Reason the runtime could not launch the command, if `code` is one of the
/// runtime's own exit codes and stderr says so.
fn launch_failure(code: i32, stderr_head: &str) -> Option<String> {
    let reserved = EXEC_RESERVED_CODES.contains(&code);
    (reserved && LAUNCH_FAILURE_MARKERS.iter().any(|m| stderr_head.contains(m)))
        .then(|| stderr_head.trim().to_string())
}

fn render(args: &[String]) -> String {
    let mut rendered = String::from("docker");
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}

/// Exit code of a finished process; death by signal maps to `128 + signal`.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    let _ = cmd.process_group(0);
}

#[cfg(not(unix))]
const fn own_process_group(_cmd: &mut Command) {}
