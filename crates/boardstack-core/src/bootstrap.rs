//! Top-level install sequence.
//!
//! ```text
//! ensure docker ─▶ ensure compose ─▶ --version checks ─▶ dirs + nginx conf
//!      ─▶ pick port ─▶ launch (mirror rotation) ─▶ report + receipt
//! ```
//!
//! Any error along the way runs [`Bootstrap::clean_up`] before it is
//! returned. Running out of mirrors is an outcome, not an error, and leaves
//! the generated files in place.

use crate::compose::Compose;
use crate::config::StackConfig;
use crate::error::Result;
use crate::installer::Installer;
use crate::launcher::{LaunchOutcome, StackLauncher};
use crate::ports::allocate_ephemeral_port;
use crate::process::CommandRunner;
use crate::report::{detect_public_ip, write_receipt, ConnectionReport};
use crate::templates::{create_directories, write_proxy_config};

/// How a bootstrap run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The stack is up.
    Running(ConnectionReport),
    /// Every mirror failed in every cycle.
    Exhausted {
        /// Port the stack would have been published on.
        port: u16,
        /// Completed retry cycles.
        cycles: u32,
        /// Total `up` invocations.
        attempts: u32,
    },
}

/// Runs the install sequence for one configuration.
pub struct Bootstrap<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    config: &'a StackConfig,
    http: Option<reqwest::Client>,
    seed: Option<u64>,
}

impl<'a, R: CommandRunner + ?Sized> Bootstrap<'a, R> {
    /// Create a bootstrap run.
    pub fn new(runner: &'a R, config: &'a StackConfig) -> Self {
        Self {
            runner,
            config,
            http: None,
            seed: None,
        }
    }

    /// Download with a custom HTTP client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Seed mirror selection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Run the full sequence.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error after best-effort cleanup. An invalid
    /// configuration is rejected before anything touches the filesystem.
    pub async fn run(&self) -> Result<BootstrapOutcome> {
        self.config.validate()?;
        tracing::info!(root = %self.config.layout.root().display(), "Starting MyBB setup");

        match self.sequence().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(error = %e, "Setup failed");
                self.clean_up().await;
                Err(e)
            }
        }
    }

    async fn sequence(&self) -> Result<BootstrapOutcome> {
        let layout = &self.config.layout;

        let mut installer = Installer::new(self.runner, self.config)?;
        if let Some(http) = &self.http {
            installer = installer.with_http_client(http.clone());
        }
        installer.ensure_runtime_binary().await?;
        installer.ensure_orchestrator_binary().await?;
        installer.verify_versions().await?;

        create_directories(layout).await?;
        write_proxy_config(layout).await?;

        let port = allocate_ephemeral_port()?;
        tracing::info!(port, "Selected host port");

        let mut launcher = StackLauncher::new(
            self.runner,
            layout,
            &self.config.launch,
            &self.config.credentials,
        );
        if let Some(seed) = self.seed {
            launcher = launcher.with_seed(seed);
        }

        match launcher.launch(port).await? {
            LaunchOutcome::Started { mirror, .. } => {
                let report = ConnectionReport {
                    public_ip: detect_public_ip(self.runner).await,
                    port,
                    mirror,
                    credentials: self.config.credentials.clone(),
                };
                write_receipt(layout, &report.receipt()).await?;
                Ok(BootstrapOutcome::Running(report))
            }
            LaunchOutcome::Exhausted { cycles, attempts } => {
                tracing::warn!("All mirrors failed, please try again later");
                Ok(BootstrapOutcome::Exhausted {
                    port,
                    cycles,
                    attempts,
                })
            }
        }
    }

    /// Tear down whatever a failed run may have left behind.
    ///
    /// Stops the stack while the composition document still exists, then
    /// removes the document and the receipt. Failures are logged only.
    pub async fn clean_up(&self) {
        tracing::info!("Cleaning up");
        let layout = &self.config.layout;
        let compose_file = layout.compose_file();

        if compose_file.is_file() {
            match Compose::new(self.runner, layout).down().await {
                Ok(output) if output.success() => tracing::info!("Stack stopped"),
                Ok(output) => tracing::warn!(
                    exit_code = output.exit_code,
                    error = output.summary(),
                    "docker-compose down failed"
                ),
                Err(e) => tracing::warn!(error = %e, "docker-compose down failed"),
            }
        }

        for path in [compose_file, layout.receipt_file()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove"),
            }
        }
    }
}
