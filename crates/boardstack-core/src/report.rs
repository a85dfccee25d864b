//! Connection report and install receipt.

use crate::config::{DatabaseCredentials, StackLayout};
use crate::error::Result;
use crate::process::{CommandRunner, CommandSpec};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Host shown when no global IPv4 address can be found.
pub const FALLBACK_HOST: &str = "localhost";

/// First global-scope IPv4 address in `ip -4 addr show` output.
pub fn parse_global_ipv4(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        while let Some(word) = words.next() {
            if word == "inet" {
                let cidr = words.next()?;
                return cidr.split('/').next()?.parse().ok();
            }
        }
        None
    })
}

/// Best-effort lookup of the host's address for the printed URLs.
///
/// Falls back to [`FALLBACK_HOST`] if `ip` is missing, fails, or reports no
/// global address.
pub async fn detect_public_ip<R: CommandRunner + ?Sized>(runner: &R) -> String {
    let spec = CommandSpec::new("ip").args(["-4", "addr", "show", "scope", "global"]);
    match runner.run(&spec).await {
        Ok(output) if output.success() => match parse_global_ipv4(&output.stdout) {
            Some(ip) => ip.to_string(),
            None => {
                tracing::debug!("No global IPv4 address found");
                FALLBACK_HOST.to_string()
            }
        },
        Ok(output) => {
            tracing::debug!(exit_code = output.exit_code, "ip command failed");
            FALLBACK_HOST.to_string()
        }
        Err(e) => {
            tracing::debug!(error = %e, "ip command unavailable");
            FALLBACK_HOST.to_string()
        }
    }
}

/// What an operator needs to reach a running stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    /// Address the host is reachable on.
    pub public_ip: String,
    /// Published nginx port.
    pub port: u16,
    /// Mirror the images were pulled from.
    pub mirror: String,
    /// Database credentials.
    pub credentials: DatabaseCredentials,
}

impl ConnectionReport {
    /// Forum URLs, public address first.
    pub fn urls(&self) -> Vec<String> {
        vec![
            format!("http://{}:{}/", self.public_ip, self.port),
            format!("http://{}:{}/", FALLBACK_HOST, self.port),
        ]
    }

    /// Receipt describing this install.
    pub fn receipt(&self) -> InstallReceipt {
        InstallReceipt {
            installed_at: Utc::now(),
            port: self.port,
            mirror: self.mirror.clone(),
            urls: self.urls(),
            credentials: self.credentials.clone(),
        }
    }
}

impl fmt::Display for ConnectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.credentials;
        writeln!(f, "MyBB is now running!")?;
        writeln!(f, "Access it via:")?;
        for url in self.urls() {
            writeln!(f, "- {url}")?;
        }
        writeln!(f)?;
        writeln!(f, "MySQL Database Credentials:")?;
        writeln!(f, "Host: {}", c.host)?;
        writeln!(f, "Database: {}", c.database)?;
        writeln!(f, "Username: {}", c.user)?;
        writeln!(f, "Password: {}", c.password)?;
        writeln!(f)?;
        write!(f, "Root Password: {}", c.root_password)
    }
}

/// JSON record of a successful install.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReceipt {
    /// When the stack came up.
    pub installed_at: DateTime<Utc>,
    /// Published nginx port.
    pub port: u16,
    /// Mirror the images were pulled from.
    pub mirror: String,
    /// Forum URLs.
    pub urls: Vec<String>,
    /// Database credentials.
    pub credentials: DatabaseCredentials,
}

/// Write `receipt` as pretty JSON to the layout's receipt file.
///
/// The receipt holds database passwords, so on Unix it is readable by the
/// owner only.
pub async fn write_receipt(layout: &StackLayout, receipt: &InstallReceipt) -> Result<PathBuf> {
    let path = layout.receipt_file();
    let json = serde_json::to_vec_pretty(receipt)?;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(&path).await?;
    #[cfg(unix)]
    {
        // `mode` only applies on creation.
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
    }
    file.write_all(&json).await?;
    file.flush().await?;
    tracing::info!(path = %path.display(), "Wrote install receipt");
    Ok(path)
}
