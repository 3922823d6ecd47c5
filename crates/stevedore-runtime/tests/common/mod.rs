//! Shared fixtures: a scripted in-memory runtime and a sample project.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stevedore_common::config::BackoffPolicy;
use stevedore_common::error::{DispatchError, RuntimeError};
use stevedore_common::types::{ContainerName, ExitOutcome, MountMode};
use stevedore_compose::plan::ComposePlan;
use stevedore_compose::project::{ConfigResolver, ProjectConfig};
use stevedore_runtime::backend::{
    ContainerRuntime, ContainerStatusReport, ExecIo, ExecRequest, StopOutcome,
};
use stevedore_runtime::dispatch::CommandDispatcher;
use stevedore_runtime::launcher::{ComposeLauncher, LaunchOptions};
use stevedore_runtime::ports::{ContainerPort, PortMap};
use stevedore_runtime::registry::ProjectRegistry;

pub const PROJECT: &str = "viewiemedia";

const ENV: &str = "\
# viewiemedia local stack
COMPOSE_PROJECT_NAME=viewiemedia
LOCAL_PACKAGES_PATH=/home/dev/packages
FORWARD_DB_PORT=33060
";

const BASE: &str = r"
services:
  db:
    image: mysql:8
    ports:
      - '33060:3306'
  mailhog:
    image: mailhog/mailhog
  web:
    image: viewiemedia/web
    depends_on:
      - db
    volumes:
      - ./packages:/var/www/packages
  worker:
    image: viewiemedia/web
    depends_on:
      web:
        condition: service_started
";

const LOCAL_PACKAGES: &str = r"
services:
  web:
    volumes:
      - ${LOCAL_PACKAGES_PATH}:/var/www/packages
";

/// Every call the fake runtime received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Ping,
    Prepare(String),
    Start(String),
    Stop(String),
    Exec(String, Vec<String>),
}

/// Scripted behaviour of `exec` for one container.
#[derive(Debug, Clone)]
pub enum ExecScript {
    Exit {
        code: i32,
        stdout: String,
        delay: Duration,
    },
    LaunchFails {
        reason: String,
        delay: Duration,
    },
}

/// In-memory [`ContainerRuntime`] driven by per-container scripts.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<Call>>,
    running: Mutex<HashSet<String>>,
    never_ready: Mutex<HashSet<String>>,
    failing_stops: Mutex<HashSet<String>>,
    scripts: Mutex<HashMap<String, ExecScript>>,
    ping_failures: AtomicU32,
    slow_starts: Mutex<HashMap<String, Duration>>,
    starts_in_flight: AtomicU32,
    peak_starts_in_flight: AtomicU32,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn never_ready(&self, service: &str) {
        let _ = self.never_ready.lock().unwrap().insert(container_of(service));
    }

    pub fn fail_stop(&self, service: &str) {
        let _ = self.failing_stops.lock().unwrap().insert(container_of(service));
    }

    pub fn script(&self, service: &str, script: ExecScript) {
        let _ = self.scripts.lock().unwrap().insert(container_of(service), script);
    }

    /// Makes starting `service` take `delay`.
    pub fn slow_start(&self, service: &str, delay: Duration) {
        let _ = self.slow_starts.lock().unwrap().insert(service.to_string(), delay);
    }

    /// Most `start_service` calls that were in progress at the same time.
    pub fn peak_concurrent_starts(&self) -> u32 {
        self.peak_starts_in_flight.load(Ordering::SeqCst)
    }

    pub fn fail_pings(&self, n: u32) {
        self.ping_failures.store(n, Ordering::SeqCst);
    }

    /// Simulates a container dying behind the orchestrator's back.
    pub fn kill(&self, service: &str) {
        let _ = self.running.lock().unwrap().remove(&container_of(service));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Start(service) => Some(service),
                _ => None,
            })
            .collect()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Stop(container) => Some(container),
                _ => None,
            })
            .collect()
    }

    pub fn execs(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Exec(..)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ContainerRuntime for FakeRuntime {
    fn ping(&self) -> Result<(), RuntimeError> {
        self.record(Call::Ping);
        let remaining = self.ping_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.ping_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RuntimeError::DaemonUnavailable {
                message: "Cannot connect to the Docker daemon".into(),
            });
        }
        Ok(())
    }

    fn prepare(&self, plan: &ComposePlan) -> Result<(), stevedore_common::error::StevedoreError> {
        self.record(Call::Prepare(plan.config.project_name.clone()));
        Ok(())
    }

    fn start_service(&self, plan: &ComposePlan, service: &str) -> Result<(), RuntimeError> {
        self.record(Call::Start(service.to_string()));
        let in_flight = self.starts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.peak_starts_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let delay = self.slow_starts.lock().unwrap().get(service).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let _ = self.starts_in_flight.fetch_sub(1, Ordering::SeqCst);
        let name = plan.names.resolve(service).unwrap().to_string();
        if !self.never_ready.lock().unwrap().contains(&name) {
            let _ = self.running.lock().unwrap().insert(name);
        }
        Ok(())
    }

    fn inspect(&self, container: &ContainerName) -> Result<ContainerStatusReport, RuntimeError> {
        if self.running.lock().unwrap().contains(container.as_str()) {
            Ok(ContainerStatusReport::running())
        } else {
            Ok(ContainerStatusReport {
                exists: true,
                running: false,
                health: None,
            })
        }
    }

    fn stop(&self, container: &ContainerName) -> Result<StopOutcome, RuntimeError> {
        self.record(Call::Stop(container.to_string()));
        if self.failing_stops.lock().unwrap().contains(container.as_str()) {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker stop {container}"),
                code: 1,
                stderr: "permission denied".into(),
            });
        }
        if self.running.lock().unwrap().remove(container.as_str()) {
            Ok(StopOutcome::Stopped)
        } else {
            Ok(StopOutcome::AlreadyStopped)
        }
    }

    fn exec(
        &self,
        container: &ContainerName,
        request: &ExecRequest,
        mut io: ExecIo,
    ) -> Result<ExitOutcome, DispatchError> {
        self.record(Call::Exec(container.to_string(), request.argv.clone()));
        let script = self.scripts.lock().unwrap().get(container.as_str()).cloned();
        match script {
            None => Ok(ExitOutcome { code: 0 }),
            Some(ExecScript::Exit {
                code,
                stdout,
                delay,
            }) => {
                std::thread::sleep(delay);
                io.stdout.write_all(stdout.as_bytes()).unwrap();
                Ok(ExitOutcome { code })
            }
            Some(ExecScript::LaunchFails { reason, delay }) => {
                std::thread::sleep(delay);
                Err(DispatchError::LaunchFailed {
                    container: container.to_string(),
                    reason,
                })
            }
        }
    }

    fn port_mappings(&self, container: &ContainerName) -> Result<PortMap, RuntimeError> {
        let mut map = PortMap::new();
        if container.as_str() == container_of("db") {
            map.bind(
                ContainerPort {
                    port: 3306,
                    protocol: "tcp".into(),
                },
                33060,
            );
        }
        Ok(map)
    }
}

/// `Write` sink whose contents can be read back after the writer is moved.
#[derive(Debug, Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Launcher, dispatcher and registry wired to one fake runtime.
pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub registry: Arc<ProjectRegistry>,
    pub launcher: ComposeLauncher,
    pub dispatcher: CommandDispatcher,
}

impl Harness {
    pub fn new(root: &Path, runtime: Arc<FakeRuntime>) -> Self {
        Self::with_options(root, runtime, false)
    }

    pub fn with_options(root: &Path, runtime: Arc<FakeRuntime>, keep_partial: bool) -> Self {
        let registry = Arc::new(ProjectRegistry::new(&root.join("state"), &root.join("locks")));
        let options = LaunchOptions {
            readiness: quick_policy(),
            daemon_retry: quick_policy(),
            keep_partial,
        };
        let launcher = ComposeLauncher::new(runtime.clone(), registry.clone(), options);
        let dispatcher = CommandDispatcher::new(runtime.clone(), registry.clone());
        Self {
            runtime,
            registry,
            launcher,
            dispatcher,
        }
    }
}

pub fn quick_policy() -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(1),
        factor: 2,
        max_interval: Duration::from_millis(5),
        ceiling: Duration::from_millis(60),
    }
}

/// Writes the sample project into `dir/container` and returns that directory.
pub fn write_project(dir: &Path) -> std::path::PathBuf {
    let container = dir.join("container");
    std::fs::create_dir_all(&container).unwrap();
    std::fs::write(container.join(".env"), ENV).unwrap();
    std::fs::write(container.join("docker-compose.yml"), BASE).unwrap();
    std::fs::write(container.join("docker-compose.local-packages.yml"), LOCAL_PACKAGES).unwrap();
    container
}

pub fn config(container_dir: &Path, mode: MountMode) -> ProjectConfig {
    ConfigResolver::new(mode).resolve(container_dir).unwrap()
}

pub fn container_of(service: &str) -> String {
    format!("{PROJECT}_{service}")
}
