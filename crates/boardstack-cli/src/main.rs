//! boardstack entry point.
//!
//! Installs docker and docker-compose next to the working directory if
//! needed, then brings up the MyBB + nginx + MySQL stack. Configuration
//! comes from `BOARDSTACK_*` environment variables; there are no flags.
//!
//! Logs go to stderr. The connection report goes to stdout.
//!
//! ## Exit codes
//!
//! - **0**: the stack is running
//! - **1**: setup failed (cleanup has already run)
//! - **2**: every registry mirror failed

use boardstack_core::{Bootstrap, BootstrapOutcome, StackConfig, SystemRunner};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status when every mirror failed in every cycle.
const EXIT_MIRRORS_EXHAUSTED: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("boardstack=info".parse()?)
                .add_directive("boardstack_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = StackConfig::from_env();
    tracing::info!(
        root = %config.layout.root().display(),
        mirrors = ?config.launch.mirrors,
        max_retries = config.launch.max_retries,
        "Configuration loaded"
    );

    let outcome = Bootstrap::new(&SystemRunner, &config).run().await?;

    match outcome {
        BootstrapOutcome::Running(report) => {
            println!("\n{report}");
            Ok(ExitCode::SUCCESS)
        }
        BootstrapOutcome::Exhausted {
            port,
            cycles,
            attempts,
        } => {
            tracing::error!(port, cycles, attempts, "Stack did not start");
            println!("All mirrors failed. Please try again later.");
            Ok(ExitCode::from(EXIT_MIRRORS_EXHAUSTED))
        }
    }
}
