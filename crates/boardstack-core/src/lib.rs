//! # boardstack-core
//!
//! Install and launch layer for a single-host MyBB forum stack
//! (nginx + PHP-FPM + MySQL) driven by a local `docker-compose` binary.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Bootstrap::run                      │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │   Installer     │────▶│  reqwest download,       │   │
//! │  │ - runtime       │     │  flate2 + tar extract    │   │
//! │  │ - orchestrator  │     └──────────────────────────┘   │
//! │  │ - --version     │                                    │
//! │  └─────────────────┘                                    │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │  templates      │────▶│  nginx/default.conf      │   │
//! │  │  ports          │     │  docker-compose.yml      │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │           │                           ▲                  │
//! │           ▼                           │ per attempt      │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │ StackLauncher   │────▶│  Compose (up -d / down)  │   │
//! │  │ MirrorRotation  │     │  via CommandRunner       │   │
//! │  └─────────────────┘     └──────────────────────────┘   │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌─────────────────┐                                    │
//! │  │ ConnectionReport│  + boardstack.json receipt         │
//! │  └─────────────────┘                                    │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use boardstack_core::{Bootstrap, BootstrapOutcome, StackConfig, SystemRunner};
//!
//! # async fn example() -> boardstack_core::Result<()> {
//! let config = StackConfig::from_env();
//! match Bootstrap::new(&SystemRunner, &config).run().await? {
//!     BootstrapOutcome::Running(report) => println!("{report}"),
//!     BootstrapOutcome::Exhausted { .. } => println!("All mirrors failed."),
//! }
//! # Ok(())
//! # }
//! ```

mod bootstrap;
mod compose;
mod config;
mod error;
mod installer;
mod launcher;
mod ports;
mod process;
mod report;
mod templates;

pub use bootstrap::{Bootstrap, BootstrapOutcome};
pub use compose::Compose;
pub use config::{
    DatabaseCredentials, LaunchPolicy, StackConfig, StackLayout, DEFAULT_MIRRORS,
    DEFAULT_ORCHESTRATOR_URL, DEFAULT_RUNTIME_URL,
};
pub use error::{Result, StackError};
pub use installer::{extract_runtime_archive, Installer};
pub use launcher::{
    classify_failure, LaunchFailure, LaunchOutcome, MirrorRotation, Selection, StackLauncher,
};
pub use ports::{allocate_ephemeral_port, MIN_EPHEMERAL_PORT};
pub use process::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use report::{
    detect_public_ip, parse_global_ipv4, write_receipt, ConnectionReport, InstallReceipt,
    FALLBACK_HOST,
};
pub use templates::{
    create_directories, render_composition, render_proxy_config, write_composition,
    write_proxy_config, CompositionParams,
};
