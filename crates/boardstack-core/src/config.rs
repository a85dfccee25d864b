//! Stack configuration.
//!
//! Configuration is loaded from environment variables with defaults that
//! reproduce a stock install: three public registry mirrors, three retry
//! cycles and the MyBB database credentials used by the stack images.

use crate::error::StackError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default registry mirrors, tried in random order.
pub const DEFAULT_MIRRORS: &[&str] = &["docker.io", "registry-1.docker.io", "mirror.gcr.io"];

/// Static docker release unpacked next to the compose file.
pub const DEFAULT_RUNTIME_URL: &str =
    "https://download.docker.com/linux/static/stable/x86_64/docker-20.10.24.tgz";

/// Standalone compose binary.
pub const DEFAULT_ORCHESTRATOR_URL: &str =
    "https://github.com/docker/compose/releases/download/v2.20.2/docker-compose-linux-x86_64";

/// Every path the installer reads or writes, relative to one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackLayout {
    root: PathBuf,
}

impl StackLayout {
    /// Create a layout rooted at `root`.
    ///
    /// A relative root is resolved against the current directory. The
    /// orchestrator runs inside the root, so every path handed to it must
    /// already be absolute.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    /// Root directory; the orchestrator runs with this as its working directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Container runtime binary.
    pub fn runtime_bin(&self) -> PathBuf {
        self.root.join("docker")
    }

    /// Orchestrator binary.
    pub fn orchestrator_bin(&self) -> PathBuf {
        self.root.join("docker-compose")
    }

    /// Generated composition document.
    pub fn compose_file(&self) -> PathBuf {
        self.root.join("docker-compose.yml")
    }

    /// MyBB application files, shared by the PHP and nginx containers.
    pub fn forum_dir(&self) -> PathBuf {
        self.root.join(FORUM_DIR)
    }

    /// nginx `conf.d` directory.
    pub fn proxy_dir(&self) -> PathBuf {
        self.root.join(PROXY_DIR)
    }

    /// Generated nginx server block.
    pub fn proxy_config(&self) -> PathBuf {
        self.proxy_dir().join("default.conf")
    }

    /// MySQL data directory.
    pub fn database_dir(&self) -> PathBuf {
        self.root.join(DATABASE_DIR)
    }

    /// JSON receipt written after a successful launch.
    pub fn receipt_file(&self) -> PathBuf {
        self.root.join("boardstack.json")
    }
}

impl Default for StackLayout {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Directory names relative to the root. The composition document mounts
/// them with `./` prefixes so compose resolves them against its own file.
pub(crate) const FORUM_DIR: &str = "mybb";
pub(crate) const PROXY_DIR: &str = "nginx";
pub(crate) const DATABASE_DIR: &str = "mysql/data";

/// MySQL credentials baked into the composition document.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DatabaseCredentials {
    /// Hostname of the database service inside the compose network.
    pub host: String,
    /// Database created on first start.
    pub database: String,
    /// Application user.
    pub user: String,
    /// Application user password.
    pub password: String,
    /// MySQL root password.
    pub root_password: String,
}

impl Default for DatabaseCredentials {
    fn default() -> Self {
        Self {
            host: "mysql".to_string(),
            database: "mybb_db".to_string(),
            user: "mybb_user".to_string(),
            password: "mybb_password123".to_string(),
            root_password: "rootpassword123".to_string(),
        }
    }
}

/// Mirror rotation and back-off settings for the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPolicy {
    /// Registry mirrors in configuration order.
    pub mirrors: Vec<String>,
    /// Number of full mirror cycles before giving up (default: 3).
    pub max_retries: u32,
    /// Wait after every mirror in a cycle has failed (default: 60s).
    pub cycle_backoff: Duration,
    /// Wait after a single failed mirror (default: 5s).
    pub mirror_backoff: Duration,
    /// Wait after a successful `up` before reporting (default: 10s).
    pub settle_interval: Duration,
}

impl Default for LaunchPolicy {
    fn default() -> Self {
        Self {
            mirrors: DEFAULT_MIRRORS.iter().map(|m| m.to_string()).collect(),
            max_retries: 3,
            cycle_backoff: Duration::from_secs(60),
            mirror_backoff: Duration::from_secs(5),
            settle_interval: Duration::from_secs(10),
        }
    }
}

impl LaunchPolicy {
    /// Validate the mirror set.
    pub fn validate(&self) -> Result<(), StackError> {
        if self.mirrors.is_empty() {
            return Err(StackError::Config("at least one mirror is required".into()));
        }
        let mut seen = HashSet::new();
        for mirror in &self.mirrors {
            if mirror.trim().is_empty() {
                return Err(StackError::Config("mirror names must not be empty".into()));
            }
            if !seen.insert(mirror.as_str()) {
                return Err(StackError::Config(format!("duplicate mirror: {mirror}")));
            }
        }
        Ok(())
    }
}

/// Full configuration for one bootstrap run.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Filesystem layout.
    pub layout: StackLayout,
    /// Launcher settings.
    pub launch: LaunchPolicy,
    /// Database credentials.
    pub credentials: DatabaseCredentials,
    /// Download URL for the runtime tarball.
    pub runtime_url: String,
    /// Download URL for the orchestrator binary.
    pub orchestrator_url: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            layout: StackLayout::default(),
            launch: LaunchPolicy::default(),
            credentials: DatabaseCredentials::default(),
            runtime_url: DEFAULT_RUNTIME_URL.to_string(),
            orchestrator_url: DEFAULT_ORCHESTRATOR_URL.to_string(),
        }
    }
}

impl StackConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `BOARDSTACK_ROOT` | `.` |
    /// | `BOARDSTACK_MIRRORS` | `docker.io,registry-1.docker.io,mirror.gcr.io` |
    /// | `BOARDSTACK_MAX_RETRIES` | `3` |
    /// | `BOARDSTACK_CYCLE_BACKOFF_SECS` | `60` |
    /// | `BOARDSTACK_MIRROR_BACKOFF_SECS` | `5` |
    /// | `BOARDSTACK_SETTLE_SECS` | `10` |
    /// | `BOARDSTACK_RUNTIME_URL` | docker 20.10.24 static tarball |
    /// | `BOARDSTACK_ORCHESTRATOR_URL` | compose v2.20.2 |
    /// | `BOARDSTACK_DB_NAME` | `mybb_db` |
    /// | `BOARDSTACK_DB_USER` | `mybb_user` |
    /// | `BOARDSTACK_DB_PASSWORD` | `mybb_password123` |
    /// | `BOARDSTACK_DB_ROOT_PASSWORD` | `rootpassword123` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Unparseable numbers fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let secs = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        let mirrors = lookup("BOARDSTACK_MIRRORS")
            .map(|v| {
                v.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or(default.launch.mirrors);

        let launch = LaunchPolicy {
            mirrors,
            max_retries: lookup("BOARDSTACK_MAX_RETRIES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default.launch.max_retries),
            cycle_backoff: secs("BOARDSTACK_CYCLE_BACKOFF_SECS", default.launch.cycle_backoff),
            mirror_backoff: secs("BOARDSTACK_MIRROR_BACKOFF_SECS", default.launch.mirror_backoff),
            settle_interval: secs("BOARDSTACK_SETTLE_SECS", default.launch.settle_interval),
        };

        let credentials = DatabaseCredentials {
            host: default.credentials.host,
            database: lookup("BOARDSTACK_DB_NAME").unwrap_or(default.credentials.database),
            user: lookup("BOARDSTACK_DB_USER").unwrap_or(default.credentials.user),
            password: lookup("BOARDSTACK_DB_PASSWORD").unwrap_or(default.credentials.password),
            root_password: lookup("BOARDSTACK_DB_ROOT_PASSWORD")
                .unwrap_or(default.credentials.root_password),
        };

        Self {
            layout: lookup("BOARDSTACK_ROOT")
                .map(StackLayout::new)
                .unwrap_or(default.layout),
            launch,
            credentials,
            runtime_url: lookup("BOARDSTACK_RUNTIME_URL").unwrap_or(default.runtime_url),
            orchestrator_url: lookup("BOARDSTACK_ORCHESTRATOR_URL")
                .unwrap_or(default.orchestrator_url),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), StackError> {
        self.launch.validate()?;
        if self.credentials.password.is_empty() || self.credentials.root_password.is_empty() {
            return Err(StackError::Config("database passwords must not be empty".into()));
        }
        Ok(())
    }
}
