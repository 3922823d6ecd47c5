//! Integration tests for dispatching commands into project containers.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use std::time::Duration;

use common::{
    Call, ExecScript, FakeRuntime, Harness, PROJECT, SharedBuf, config, container_of,
    write_project,
};
use stevedore_common::error::{DispatchError, NamingError, ProjectError, StevedoreError};
use stevedore_common::types::{MountMode, ServiceStatus};
use stevedore_runtime::backend::{ExecIo, ExecRequest};

fn running_harness(dir: &std::path::Path) -> Harness {
    let container_dir = write_project(dir);
    let h = Harness::new(dir, FakeRuntime::new());
    let _ = h
        .launcher
        .start(&config(&container_dir, MountMode::Standard))
        .expect("start");
    h
}

fn request(argv: &[&str]) -> ExecRequest {
    ExecRequest {
        argv: argv.iter().map(|a| (*a).to_string()).collect(),
        interactive: false,
        timeout: None,
    }
}

fn captured() -> (ExecIo, SharedBuf) {
    let out = SharedBuf::default();
    let io = ExecIo {
        stdout: Box::new(out.clone()),
        stderr: Box::new(std::io::sink()),
    };
    (io, out)
}

#[test]
fn exec_streams_output_and_returns_exit_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = running_harness(dir.path());
    h.runtime.script(
        "web",
        ExecScript::Exit {
            code: 0,
            stdout: "Migrated: 2024_01_01_create_users\n".into(),
            delay: Duration::ZERO,
        },
    );
    let (io, out) = captured();

    let outcome = h
        .dispatcher
        .exec_with(PROJECT, "web", request(&["php", "artisan", "migrate"]), io)
        .expect("exec");

    assert!(outcome.success());
    assert_eq!(out.contents(), "Migrated: 2024_01_01_create_users\n");
    assert!(h.runtime.calls().contains(&Call::Exec(
        container_of("web"),
        vec!["php".into(), "artisan".into(), "migrate".into()]
    )));
}

#[test]
fn nonzero_exit_is_an_outcome_not_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = running_harness(dir.path());
    h.runtime.script(
        "web",
        ExecScript::Exit {
            code: 3,
            stdout: String::new(),
            delay: Duration::ZERO,
        },
    );

    let outcome = h
        .dispatcher
        .exec_with(PROJECT, "web", request(&["phpunit"]), ExecIo::null())
        .expect("exec");
    assert_eq!(outcome.code, 3);
    assert!(!outcome.success());
}

#[test]
fn exec_on_stopped_service_never_calls_runtime() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = running_harness(dir.path());
    let _ = h
        .registry
        .update(PROJECT, |p| p.set_status("worker", ServiceStatus::Stopped))
        .expect("update");

    let err = h
        .dispatcher
        .exec_with(PROJECT, "worker", request(&["true"]), ExecIo::null())
        .unwrap_err();

    assert!(matches!(
        err,
        StevedoreError::Dispatch(DispatchError::ContainerNotRunning {
            status: ServiceStatus::Stopped,
            ..
        })
    ));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(h.runtime.execs(), 0);
}

#[test]
fn concurrent_execs_complete_independently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = running_harness(dir.path());
    h.runtime.script(
        "web",
        ExecScript::LaunchFails {
            reason: "container vanished".into(),
            delay: Duration::from_millis(20),
        },
    );
    h.runtime.script(
        "worker",
        ExecScript::Exit {
            code: 0,
            stdout: "processed 12 jobs\n".into(),
            delay: Duration::from_millis(60),
        },
    );

    let (web, worker) = std::thread::scope(|scope| {
        let web = scope.spawn(|| {
            h.dispatcher
                .exec_with(PROJECT, "web", request(&["ls"]), ExecIo::null())
        });
        let worker = scope.spawn(|| {
            let (io, out) = captured();
            h.dispatcher
                .exec_with(PROJECT, "worker", request(&["php", "artisan", "queue:work", "--once"]), io)
                .map(|outcome| (outcome, out.contents()))
        });
        (web.join().expect("web thread"), worker.join().expect("worker thread"))
    });

    assert!(matches!(
        web,
        Err(StevedoreError::Dispatch(DispatchError::LaunchFailed { .. }))
    ));
    let (outcome, output) = worker.expect("worker exec");
    assert!(outcome.success());
    assert_eq!(output, "processed 12 jobs\n");
}

#[test]
fn launch_failure_marks_service_unknown_without_retry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = running_harness(dir.path());
    h.runtime.script(
        "web",
        ExecScript::LaunchFails {
            reason: "No such container".into(),
            delay: Duration::ZERO,
        },
    );

    let err = h
        .dispatcher
        .exec_with(PROJECT, "web", request(&["ls"]), ExecIo::null())
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert_eq!(h.runtime.execs(), 1);

    let project = h.registry.lookup(PROJECT).expect("lookup");
    assert_eq!(project.service("web").expect("web").status, ServiceStatus::Unknown);
}

#[test]
fn unknown_service_is_a_naming_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = running_harness(dir.path());
    let err = h
        .dispatcher
        .exec_with(PROJECT, "redis", request(&["redis-cli"]), ExecIo::null())
        .unwrap_err();
    assert!(matches!(
        err,
        StevedoreError::Naming(NamingError::UnknownService { ref service, .. }) if service == "redis"
    ));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn empty_command_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = running_harness(dir.path());
    let err = h
        .dispatcher
        .exec_with(PROJECT, "web", request(&[]), ExecIo::null())
        .unwrap_err();
    assert!(matches!(err, StevedoreError::Dispatch(DispatchError::EmptyCommand)));
}

#[test]
fn exec_into_inactive_project_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let h = Harness::new(dir.path(), FakeRuntime::new());
    let err = h
        .dispatcher
        .exec_with(PROJECT, "web", request(&["ls"]), ExecIo::null())
        .unwrap_err();
    assert!(matches!(
        err,
        StevedoreError::Project(ProjectError::NotActive { .. })
    ));
}

#[test]
fn exec_works_from_a_later_invocation_without_the_lock() {
    let dir = tempfile::tempdir().expect("tempdir");
    let owner = running_harness(dir.path());
    let other = Harness::new(dir.path(), owner.runtime.clone());

    let outcome = other
        .dispatcher
        .exec_with(PROJECT, "db", request(&["mysql", "-e", "select 1"]), ExecIo::null())
        .expect("exec");
    assert!(outcome.success());
}

#[test]
fn stop_during_exec_is_not_undone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container_dir = write_project(dir.path());
    let cfg = config(&container_dir, MountMode::Standard);
    let runtime = FakeRuntime::new();
    {
        let owner = Harness::new(dir.path(), runtime.clone());
        let _ = owner.launcher.start(&cfg).expect("start");
    }
    runtime.script(
        "web",
        ExecScript::LaunchFails {
            reason: "No such container: viewiemedia_web".into(),
            delay: Duration::from_millis(300),
        },
    );
    let exec = Harness::new(dir.path(), runtime.clone());
    let stopper = Harness::new(dir.path(), runtime.clone());

    let result = std::thread::scope(|scope| {
        let running = scope.spawn(|| {
            exec.dispatcher
                .exec_with(PROJECT, "web", request(&["ls"]), ExecIo::null())
        });
        std::thread::sleep(Duration::from_millis(50));
        let _ = stopper.launcher.stop(PROJECT).expect("stop");
        running.join().expect("exec thread")
    });

    assert!(matches!(
        result,
        Err(StevedoreError::Dispatch(DispatchError::LaunchFailed { .. }))
    ));
    assert!(matches!(
        exec.registry.lookup(PROJECT),
        Err(ProjectError::NotActive { .. })
    ));

    let starts = runtime.started().len();
    let again = Harness::new(dir.path(), runtime.clone());
    let active = again.launcher.start(&cfg).expect("start after stop");
    assert!(active.all_running());
    assert_eq!(runtime.started().len(), starts + 4);
}

#[test]
fn launch_failure_while_project_is_locked_leaves_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let owner = running_harness(dir.path());
    owner.runtime.script(
        "web",
        ExecScript::LaunchFails {
            reason: "container vanished".into(),
            delay: Duration::ZERO,
        },
    );
    let other = Harness::new(dir.path(), owner.runtime.clone());

    let err = other
        .dispatcher
        .exec_with(PROJECT, "web", request(&["ls"]), ExecIo::null())
        .unwrap_err();

    assert!(matches!(
        err,
        StevedoreError::Dispatch(DispatchError::LaunchFailed { .. })
    ));
    let project = other.registry.lookup(PROJECT).expect("lookup");
    assert_eq!(project.service("web").expect("web").status, ServiceStatus::Running);
}
