//! Runtime and orchestrator installation.
//!
//! Both binaries live in the layout root. A binary that is already present
//! is left alone; otherwise it is downloaded (and, for the runtime,
//! unpacked from the static release tarball) and marked executable.
//! Downloads stream to a `.part` file that is renamed into place only when
//! complete.

use crate::config::{StackConfig, StackLayout};
use crate::error::{Result, StackError};
use crate::process::{CommandRunner, CommandSpec};
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn download_failure_reason(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else if let Some(status) = error.status() {
        format!("server returned {status}")
    } else {
        error.to_string()
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Unpack a gzipped tarball into `dest`, dropping the top-level directory.
///
/// Only regular files are extracted and each one is marked executable.
/// Entries whose stripped path is not a plain relative path are rejected.
/// Each file is unpacked to a `.part` sibling and renamed into place, so an
/// interrupted extraction never leaves a truncated binary behind.
pub fn extract_runtime_archive(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let extract_err = |reason: String| StackError::Extract {
        archive: archive.to_path_buf(),
        reason,
    };

    let file = std::fs::File::open(archive)?;
    let mut tarball = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let mut extracted = Vec::new();

    for entry in tarball.entries().map_err(|e| extract_err(e.to_string()))? {
        let mut entry = entry.map_err(|e| extract_err(e.to_string()))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| extract_err(e.to_string()))?
            .into_owned();
        let stripped: PathBuf = path.components().skip(1).collect();
        if stripped.as_os_str().is_empty() {
            continue;
        }
        if !stripped
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(extract_err(format!("unsafe entry path: {}", path.display())));
        }

        let target = dest.join(&stripped);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let part = partial_path(&target);
        if let Err(e) = entry.unpack(&part) {
            let _ = std::fs::remove_file(&part);
            return Err(extract_err(format!("{}: {e}", stripped.display())));
        }
        set_executable(&part)?;
        std::fs::rename(&part, &target)?;
        tracing::debug!(path = %target.display(), "Extracted");
        extracted.push(target);
    }

    Ok(extracted)
}

/// Ensures the runtime and orchestrator binaries exist and run.
pub struct Installer<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    layout: &'a StackLayout,
    runtime_url: &'a str,
    orchestrator_url: &'a str,
    http: reqwest::Client,
}

impl<'a, R: CommandRunner + ?Sized> Installer<'a, R> {
    /// Create an installer for `config`.
    pub fn new(runner: &'a R, config: &'a StackConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("boardstack/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| StackError::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            runner,
            layout: &config.layout,
            runtime_url: &config.runtime_url,
            orchestrator_url: &config.orchestrator_url,
            http,
        })
    }

    /// Replace the HTTP client used for downloads.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Make sure the container runtime is installed, returning its path.
    pub async fn ensure_runtime_binary(&self) -> Result<PathBuf> {
        let bin = self.layout.runtime_bin();
        if bin.is_file() {
            tracing::info!(path = %bin.display(), "Docker is available locally");
            return Ok(bin);
        }

        tracing::info!(url = self.runtime_url, "Docker not found locally, downloading");
        let archive = self.layout.root().join("docker.tgz");
        self.download(self.runtime_url, &archive).await?;

        let dest = self.layout.root().to_path_buf();
        let archive_path = archive.clone();
        let extracted =
            tokio::task::spawn_blocking(move || extract_runtime_archive(&archive_path, &dest))
                .await
                .map_err(|e| StackError::Extract {
                    archive: archive.clone(),
                    reason: e.to_string(),
                })?;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            tracing::warn!(path = %archive.display(), error = %e, "Failed to remove archive");
        }
        let extracted = extracted?;

        if !bin.is_file() {
            return Err(StackError::BinaryMissing(bin));
        }
        tracing::info!(
            path = %bin.display(),
            files = extracted.len(),
            "Docker downloaded and set up locally"
        );
        Ok(bin)
    }

    /// Make sure the orchestrator is installed, returning its path.
    pub async fn ensure_orchestrator_binary(&self) -> Result<PathBuf> {
        let bin = self.layout.orchestrator_bin();
        if bin.is_file() {
            tracing::info!(path = %bin.display(), "Docker Compose is available locally");
            return Ok(bin);
        }

        tracing::info!(
            url = self.orchestrator_url,
            "Docker Compose not found locally, downloading"
        );
        self.download(self.orchestrator_url, &bin).await?;
        set_executable(&bin)?;
        tracing::info!(path = %bin.display(), "Docker Compose downloaded and set up locally");
        Ok(bin)
    }

    /// Run `--version` on both binaries.
    pub async fn verify_versions(&self) -> Result<()> {
        for bin in [self.layout.runtime_bin(), self.layout.orchestrator_bin()] {
            let output = self
                .runner
                .run(&CommandSpec::new(&bin).arg("--version"))
                .await?;
            if !output.success() {
                return Err(StackError::VersionCheck {
                    binary: bin,
                    exit_code: output.exit_code,
                    stderr: output.stderr.trim().to_string(),
                });
            }
            tracing::info!(
                binary = %bin.display(),
                version = output.stdout.trim(),
                "Version check passed"
            );
        }
        Ok(())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let part = partial_path(dest);
        let result = self.download_to(url, &part).await;
        match result {
            Ok(bytes) => {
                tokio::fs::rename(&part, dest).await?;
                tracing::debug!(url, path = %dest.display(), bytes, "Download complete");
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn download_to(&self, url: &str, path: &Path) -> Result<u64> {
        let download_err = |e: reqwest::Error| StackError::Download {
            url: url.to_string(),
            reason: download_failure_reason(&e),
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download_err)?;

        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(download_err)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}
