//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Default base directory for stevedore data when no home directory is usable.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/stevedore";

/// Returns the data directory, preferring `$HOME/.stevedore`,
/// falling back to `/var/lib/stevedore`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".stevedore");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Returns the default directory holding persisted project snapshots.
pub fn default_state_dir() -> PathBuf {
    data_dir().join("state")
}

/// Returns the default directory holding per-project advisory locks.
pub fn default_lock_dir() -> PathBuf {
    data_dir().join("locks")
}

/// Environment file read from a project's container directory.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Base compose layer, always present.
pub const BASE_LAYER: &str = "docker-compose.yml";

/// Override layer applied in local-packages mount mode.
pub const LOCAL_PACKAGES_LAYER: &str = "docker-compose.local-packages.yml";

/// Required key naming the project.
pub const PROJECT_NAME_KEY: &str = "COMPOSE_PROJECT_NAME";

/// Key selecting the environment-specific layer.
pub const APP_ENV_KEY: &str = "APP_ENV";

/// Host path bound into containers in local-packages mode.
pub const LOCAL_PACKAGES_PATH_KEY: &str = "LOCAL_PACKAGES_PATH";

/// Expected database host port.
pub const FORWARD_DB_PORT_KEY: &str = "FORWARD_DB_PORT";

/// Logical service name treated as the project database.
pub const DATABASE_SERVICE: &str = "db";

/// Separator between project name and logical service in container names.
pub const CONTAINER_NAME_SEPARATOR: char = '_';

/// Extension of advisory lock files.
pub const LOCK_EXTENSION: &str = "lock";

/// Container runtime binary invoked by the Docker backend.
pub const DEFAULT_RUNTIME_BINARY: &str = "docker";

/// First delay between readiness polls.
pub const READINESS_INITIAL_DELAY: Duration = Duration::from_millis(250);

/// Longest single delay between readiness polls.
pub const READINESS_MAX_INTERVAL: Duration = Duration::from_secs(5);

/// Total time a service may take to report ready.
pub const READINESS_CEILING: Duration = Duration::from_secs(120);

/// First delay before retrying an unreachable runtime daemon.
pub const DAEMON_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Total time spent retrying an unreachable runtime daemon.
pub const DAEMON_RETRY_CEILING: Duration = Duration::from_secs(15);

/// Grace period between forwarded interrupt tiers.
pub const INTERRUPT_GRACE: Duration = Duration::from_secs(3);

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "stevedore";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "stv";
