// src/tool/mod.rs

//! External package-manager tools
//!
//! The restore engine only talks to tools through the [`PackageTool`] and
//! [`LegacyInstaller`] traits, so tests can script their behavior and the
//! real adapters stay thin wrappers around process invocations.

mod dotnet;
mod nuget;

pub use dotnet::DotnetCli;
pub use nuget::{NoLegacyInstaller, NugetCli};

use crate::error::{Error, Result};
use crate::model::RestoreResult;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Parameters of one restore invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSettings {
    /// Solution, project or scaffold directory to restore
    pub target: PathBuf,
    /// Directory packages are restored into
    pub output_dir: PathBuf,
    /// Fetch reference assemblies for the target framework as packages
    pub force_ref_assembly_fetch: bool,
    /// Explicit package sources; these replace config-file sources
    pub extra_sources: Option<Vec<String>>,
    /// nuget.config to restore with
    pub config_path: Option<PathBuf>,
    /// Re-evaluate all dependencies even if a previous restore succeeded
    pub force_reevaluation: bool,
    /// Allow restoring Windows-only frameworks on any host
    pub target_windows: bool,
}

impl RestoreSettings {
    pub fn new(target: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            output_dir: output_dir.into(),
            force_ref_assembly_fetch: false,
            extra_sources: None,
            config_path: None,
            force_reevaluation: false,
            target_windows: false,
        }
    }
}

/// The project-reference based package manager (`dotnet`)
pub trait PackageTool: Send + Sync {
    /// Restore `settings.target`; failures are reported in the result
    fn restore(&self, settings: &RestoreSettings) -> RestoreResult;

    /// Create a minimal project in `dir`
    fn new_project(&self, dir: &Path) -> Result<()>;

    /// Add an unversioned reference to `package` to the project in `dir`
    fn add_package(&self, dir: &Path, package: &str) -> Result<()>;

    /// Raw feed listing for a configuration file
    fn list_feeds(&self, config: &Path) -> Result<Vec<String>>;

    /// Raw effective feed listing for a folder, including inherited feeds
    fn list_feeds_in_folder(&self, folder: &Path) -> Result<Vec<String>>;
}

/// Outcome of running the legacy installer over packages.config files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyInstallSummary {
    pub package_config_count: usize,
    pub success_count: usize,
}

/// The path-based legacy package installer (`nuget install`)
pub trait LegacyInstaller: Send + Sync {
    fn install_all(&self, package_configs: &[PathBuf], output_dir: &Path)
    -> Result<LegacyInstallSummary>;
}

/// Captured output of an external command
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    /// All output lines, stdout first
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.iter().chain(self.stderr.iter()).map(String::as_str)
    }

    /// Log stderr at warn level if the command failed
    ///
    /// Returns the number of lines forwarded.
    pub fn forward_stderr_on_failure(&self, tag: &str) -> usize {
        if self.success {
            return 0;
        }
        for line in &self.stderr {
            warn!("[{}] {}", tag, line);
        }
        self.stderr.len()
    }
}

fn collect_lines<R: Read + Send + 'static>(reader: R) -> thread::JoinHandle<Vec<String>> {
    thread::spawn(move || {
        BufReader::new(reader)
            .lines()
            .map_while(|line| line.ok())
            .collect()
    })
}

/// Run a command to completion or until `timeout`, capturing its output
///
/// Output pipes are drained on separate threads so a chatty child cannot
/// block on a full pipe while we wait for it.
pub(crate) fn run_command(mut command: Command, tag: &str, timeout: Duration) -> Result<CommandOutput> {
    debug!("Running {:?}", command);

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::CommandFailed(format!("Failed to spawn '{}': {}", tag, e)))?;

    let stdout = child.stdout.take().map(collect_lines);
    let stderr = child.stderr.take().map(collect_lines);

    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::CommandTimeout {
                command: tag.to_string(),
                seconds: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

    for line in &stdout {
        debug!("[{}] {}", tag, line);
    }
    for line in &stderr {
        debug!("[{}] {}", tag, line);
    }

    Ok(CommandOutput {
        success: status.success(),
        code: status.code(),
        stdout,
        stderr,
    })
}
