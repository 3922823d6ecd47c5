//! Formatted output helpers for CLI commands.
//!
//! Tables are rendered to strings so they can be tested; the `print_*`
//! wrappers are the only place the binary writes to stdout.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use stevedore_compose::plan::ComposePlan;
use stevedore_runtime::launcher::StopReport;
use stevedore_runtime::ports::PortMap;
use stevedore_runtime::registry::ActiveProject;

/// Formats the time elapsed since `since` (e.g., "2h 05m").
#[must_use]
pub fn format_uptime(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - since).num_seconds().max(0);
    let (days, hours, mins) = (secs / 86_400, (secs / 3600) % 24, (secs / 60) % 60);
    if days > 0 {
        format!("{days}d {hours:02}h")
    } else if hours > 0 {
        format!("{hours}h {mins:02}m")
    } else if mins > 0 {
        format!("{mins}m {:02}s", secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Renders one project and its services.
#[must_use]
pub fn render_project(project: &ActiveProject, now: DateTime<Utc>) -> String {
    let mut out = format!(
        "{} ({}, {}, up {})\n",
        project.name(),
        project.state,
        project.config.mount_mode,
        format_uptime(project.started_at, now)
    );
    let _ = writeln!(out, "  {:<16} {:<32} STATUS", "SERVICE", "CONTAINER");
    for service in &project.services {
        let _ = writeln!(
            out,
            "  {:<16} {:<32} {}",
            service.logical_name, service.container_name, service.status
        );
    }
    out
}

/// Renders the published ports of one service.
#[must_use]
pub fn render_ports(service: &str, ports: &PortMap) -> String {
    if ports.is_empty() {
        return format!("{service} publishes no ports\n");
    }
    let mut out = format!("{:<12} HOST\n", "CONTAINER");
    for (container, hosts) in ports.iter() {
        let hosts: Vec<String> = hosts.iter().map(u16::to_string).collect();
        let _ = writeln!(out, "{:<12} {}", container.to_string(), hosts.join(", "));
    }
    out
}

/// Renders a launch plan: layers, then start levels with container names.
#[must_use]
pub fn render_plan(plan: &ComposePlan) -> String {
    let mut out = format!(
        "project {} ({} mode)\n",
        plan.config.project_name, plan.config.mount_mode
    );
    out.push_str("layers:\n");
    for layer in &plan.config.layer_paths {
        let _ = writeln!(out, "  {}", layer.display());
    }
    out.push_str("start order:\n");
    for (depth, level) in plan.levels.iter().enumerate() {
        let entries: Vec<String> = level
            .iter()
            .map(|service| match plan.names.resolve(service) {
                Ok(container) => format!("{service} ({container})"),
                Err(_) => service.clone(),
            })
            .collect();
        let _ = writeln!(out, "  {depth}: {}", entries.join(", "));
    }
    out
}

/// Renders the result of a stop.
#[must_use]
pub fn render_stop(project: &str, report: &StopReport) -> String {
    let mut out = String::new();
    for container in &report.stopped {
        let _ = writeln!(out, "stopped {container}");
    }
    for container in &report.already_stopped {
        let _ = writeln!(out, "{container} was not running");
    }
    let _ = writeln!(out, "project {project} is down");
    out
}

/// Prints a rendered block to stdout.
pub fn print(block: &str) {
    print!("{block}");
}

/// Prints an error and its causes to stderr.
pub fn error(err: &anyhow::Error) {
    eprintln!("error: {err:#}");
}
