//! Interrupt forwarding to runtime child processes.
//!
//! Children spawned by the runtime backend run in their own process group,
//! so a terminal interrupt reaches only the orchestrator. The forwarder
//! then relays it tier by tier: dispatched commands first, then runtime
//! invocations, then a kill for anything still alive after the grace
//! period.
//!
//! An interrupt also trips the forwarder's [`CancelToken`], which the
//! launcher polls while it waits so that a start in progress gives up and
//! rolls back.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use stevedore_common::constants::INTERRUPT_GRACE;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Class of tracked child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// A command dispatched into a container.
    Command,
    /// A runtime invocation such as `compose up` or `stop`.
    Runtime,
}

/// Signal relayed to a tracked child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relay {
    /// Polite interrupt (`SIGINT`).
    Interrupt,
    /// Forced termination (`SIGKILL`).
    Kill,
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    id: u64,
    pid: u32,
    tier: Tier,
}

/// Shared flag telling long-running work to give up.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token for every clone.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`CancelToken::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps for `delay`, waking early on cancellation.
    ///
    /// Returns `false` if the token was cancelled.
    pub fn sleep(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }
}

/// Registry of live child processes that should receive interrupts.
#[derive(Debug)]
pub struct InterruptForwarder {
    children: Mutex<Vec<Tracked>>,
    next_id: AtomicU64,
    cancel: CancelToken,
}

/// Keeps a child registered until dropped.
#[derive(Debug)]
pub struct TrackedChild<'a> {
    forwarder: &'a InterruptForwarder,
    id: u64,
}

impl Drop for TrackedChild<'_> {
    fn drop(&mut self) {
        self.forwarder.lock().retain(|t| t.id != self.id);
    }
}

impl InterruptForwarder {
    /// Creates an empty forwarder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            children: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            cancel: CancelToken::new(),
        }
    }

    /// Process-wide forwarder used by the runtime backend and the CLI.
    #[must_use]
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<InterruptForwarder> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Token tripped by the first interrupt.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Registers `pid` until the returned guard is dropped.
    pub fn track(&self, pid: u32, tier: Tier) -> TrackedChild<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Tracked { id, pid, tier });
        TrackedChild { forwarder: self, id }
    }

    /// PIDs currently registered under `tier`.
    #[must_use]
    pub fn tracked(&self, tier: Tier) -> Vec<u32> {
        self.lock()
            .iter()
            .filter(|t| t.tier == tier)
            .map(|t| t.pid)
            .collect()
    }

    /// Relays an interrupt to every tracked child using OS signals.
    pub fn interrupt(&self) {
        self.interrupt_with(INTERRUPT_GRACE, send_signal);
    }

    /// Relays an interrupt through `send`, waiting up to `grace` per tier.
    pub fn interrupt_with(&self, grace: Duration, mut send: impl FnMut(u32, Relay)) {
        self.cancel.cancel();
        for tier in [Tier::Command, Tier::Runtime] {
            let pids = self.tracked(tier);
            if pids.is_empty() {
                continue;
            }
            tracing::info!(?tier, children = pids.len(), "forwarding interrupt");
            for pid in pids {
                send(pid, Relay::Interrupt);
            }
            self.wait_for_tier(tier, grace);
        }
        let survivors: Vec<u32> = self.lock().iter().map(|t| t.pid).collect();
        for pid in survivors {
            tracing::warn!(pid, "child ignored interrupt, killing");
            send(pid, Relay::Kill);
        }
    }

    fn wait_for_tier(&self, tier: Tier, grace: Duration) {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && !self.tracked(tier).is_empty() {
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Tracked>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InterruptForwarder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, relay: Relay) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let signal = match relay {
        Relay::Interrupt => Signal::SIGINT,
        Relay::Kill => Signal::SIGKILL,
    };
    if let Err(errno) = kill(Pid::from_raw(raw), signal) {
        tracing::debug!(pid, %errno, "signal not delivered");
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, relay: Relay) {
    tracing::debug!(pid, ?relay, "signal forwarding unsupported on this platform");
}
