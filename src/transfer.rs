use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;

use crate::domain::{DecompressStrategy, DownloadStrategy};
use crate::error::AfDataError;
use crate::fs_util;

/// Moves bytes for a source. Implementations write to exactly the path they
/// are given; staging and the final rename are done by the caller, so a
/// backend never has to clean up after itself on failure.
pub trait TransferBackend: Send + Sync {
    /// `previous` is the currently published copy, if any. A backend may reuse
    /// its unchanged content but must never modify it.
    fn download(
        &self,
        strategy: DownloadStrategy,
        url: &str,
        destination: &Path,
        previous: Option<&Path>,
    ) -> Result<(), AfDataError>;

    fn decompress(
        &self,
        strategy: DecompressStrategy,
        archive: &Path,
        destination: &Path,
    ) -> Result<(), AfDataError>;
}

/// Single-file downloader picked once per process.
#[derive(Clone)]
pub enum DownloadTool {
    /// `aria2c` with several connections per file.
    Aria2c(PathBuf),
    Curl(PathBuf),
    /// Built-in blocking HTTP client, used when no executable is available.
    Http(Client),
}

impl DownloadTool {
    pub fn name(&self) -> &'static str {
        match self {
            DownloadTool::Aria2c(_) => "aria2c",
            DownloadTool::Curl(_) => "curl",
            DownloadTool::Http(_) => "http",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub downloader: String,
    pub tar: Option<String>,
    pub rsync: Option<String>,
}

#[derive(Clone)]
pub struct SystemTransfer {
    downloader: DownloadTool,
    tar: Option<PathBuf>,
    rsync: Option<PathBuf>,
}

impl SystemTransfer {
    /// Probes `PATH` for the preferred tools. Meant to run once at startup;
    /// the result is handed to the manager rather than cached globally.
    pub fn detect() -> Result<Self, AfDataError> {
        let downloader = if let Some(path) = find_in_path("aria2c") {
            DownloadTool::Aria2c(path)
        } else if let Some(path) = find_in_path("curl") {
            DownloadTool::Curl(path)
        } else {
            DownloadTool::Http(http_client()?)
        };
        Ok(Self::with_tool(downloader))
    }

    pub fn with_tool(downloader: DownloadTool) -> Self {
        tracing::debug!(downloader = downloader.name(), "selected download tool");
        Self {
            downloader,
            tar: find_in_path("tar"),
            rsync: find_in_path("rsync"),
        }
    }

    pub fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            downloader: self.downloader.name().to_string(),
            tar: self.tar.as_ref().map(|path| path.display().to_string()),
            rsync: self.rsync.as_ref().map(|path| path.display().to_string()),
        }
    }

    fn download_file(&self, url: &str, destination: &Path) -> Result<(), AfDataError> {
        match &self.downloader {
            DownloadTool::Aria2c(program) => {
                let dir = destination
                    .parent()
                    .ok_or_else(|| AfDataError::Filesystem("invalid destination path".to_string()))?;
                let name = destination
                    .file_name()
                    .ok_or_else(|| AfDataError::Filesystem("invalid destination path".to_string()))?;
                let args = vec![
                    "--max-connection-per-server=16".to_string(),
                    "--split=16".to_string(),
                    "--allow-overwrite=true".to_string(),
                    "--auto-file-renaming=false".to_string(),
                    "--console-log-level=warn".to_string(),
                    "--dir".to_string(),
                    dir.to_string_lossy().to_string(),
                    "--out".to_string(),
                    name.to_string_lossy().to_string(),
                    url.to_string(),
                ];
                let result = run_cmd("aria2c", program, &args);
                // aria2c keeps a resume file next to the output on failure.
                let mut control = destination.as_os_str().to_owned();
                control.push(".aria2");
                let _ = fs::remove_file(PathBuf::from(control));
                result
            }
            DownloadTool::Curl(program) => {
                let args = vec![
                    "--location".to_string(),
                    "--fail".to_string(),
                    "--silent".to_string(),
                    "--show-error".to_string(),
                    "--output".to_string(),
                    destination.to_string_lossy().to_string(),
                    url.to_string(),
                ];
                run_cmd("curl", program, &args)
            }
            DownloadTool::Http(client) => http_download(client, url, destination),
        }
    }

    fn mirror(
        &self,
        url: &str,
        destination: &Path,
        previous: Option<&Path>,
    ) -> Result<(), AfDataError> {
        let rsync = self
            .rsync
            .as_ref()
            .ok_or_else(|| AfDataError::MissingTool("rsync".to_string()))?;
        run_cmd("rsync", rsync, &rsync_args(url, destination, previous)?)
    }

    fn untar(&self, archive: &Path, destination: &Path, gzip: bool) -> Result<(), AfDataError> {
        let tar = self
            .tar
            .as_ref()
            .ok_or_else(|| AfDataError::MissingTool("tar".to_string()))?;
        let mode = if gzip { "-xzpf" } else { "-xpf" };
        let args = vec![
            mode.to_string(),
            archive.to_string_lossy().to_string(),
            "-C".to_string(),
            destination.to_string_lossy().to_string(),
        ];
        run_cmd("tar", tar, &args)
    }
}

impl TransferBackend for SystemTransfer {
    fn download(
        &self,
        strategy: DownloadStrategy,
        url: &str,
        destination: &Path,
        previous: Option<&Path>,
    ) -> Result<(), AfDataError> {
        match strategy {
            DownloadStrategy::File => self.download_file(url, destination),
            DownloadStrategy::Mirror => self.mirror(url, destination, previous),
        }
    }

    fn decompress(
        &self,
        strategy: DecompressStrategy,
        archive: &Path,
        destination: &Path,
    ) -> Result<(), AfDataError> {
        match strategy {
            DecompressStrategy::Tar => self.untar(archive, destination, false),
            DecompressStrategy::TarGz => self.untar(archive, destination, true),
            DecompressStrategy::Gunzip => fs_util::gunzip(archive, destination),
        }
    }
}

// The staging directory starts empty; files unchanged since `previous` was
// synced are hard-linked from it instead of fetched again.
fn rsync_args(
    url: &str,
    destination: &Path,
    previous: Option<&Path>,
) -> Result<Vec<String>, AfDataError> {
    let mut args = vec![
        "--recursive".to_string(),
        "--links".to_string(),
        "--perms".to_string(),
        "--times".to_string(),
        "--compress".to_string(),
    ];
    if let Some(previous) = previous {
        // rsync resolves a relative --link-dest against the destination.
        let previous = std::path::absolute(previous)
            .map_err(|err| AfDataError::Filesystem(err.to_string()))?;
        args.push(format!("--link-dest={}", previous.display()));
    }
    args.push(url.to_string());
    args.push(format!("{}/", destination.display()));
    Ok(args)
}

fn http_client() -> Result<Client, AfDataError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("afdata/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| AfDataError::Filesystem(err.to_string()))?,
    );
    // Archives run to hundreds of gigabytes; no overall deadline.
    Client::builder()
        .default_headers(headers)
        .timeout(None)
        .build()
        .map_err(|err| AfDataError::Transfer {
            tool: "http".to_string(),
            message: err.to_string(),
        })
}

fn http_download(client: &Client, url: &str, destination: &Path) -> Result<(), AfDataError> {
    let transfer_err = |message: String| AfDataError::Transfer {
        tool: "http".to_string(),
        message,
    };
    let mut response = client
        .get(url)
        .send()
        .map_err(|err| transfer_err(err.to_string()))?;
    if !response.status().is_success() {
        return Err(transfer_err(format!("{url} returned status {}", response.status())));
    }
    let mut file =
        File::create(destination).map_err(|err| AfDataError::Filesystem(err.to_string()))?;
    std::io::copy(&mut response, &mut file).map_err(|err| transfer_err(err.to_string()))?;
    Ok(())
}

fn run_cmd(tool: &str, program: &Path, args: &[String]) -> Result<(), AfDataError> {
    tracing::debug!(program = %program.display(), ?args, "running");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| AfDataError::Transfer {
            tool: tool.to_string(),
            message: err.to_string(),
        })?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("command failed: {} ({})", program.display(), output.status)
    } else {
        stderr
    };
    Err(AfDataError::Transfer {
        tool: tool.to_string(),
        message,
    })
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}
