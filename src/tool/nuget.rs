// src/tool/nuget.rs

//! `nuget install` adapter for packages.config based projects

use super::{run_command, LegacyInstallSummary, LegacyInstaller};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

/// Installs legacy packages with the `nuget` executable
#[derive(Debug, Clone)]
pub struct NugetCli {
    executable: PathBuf,
    timeout: Duration,
}

impl NugetCli {
    /// Locate the installer on `PATH` (or accept an explicit path)
    pub fn locate(executable: &Path, timeout: Duration) -> Result<Self> {
        let resolved = which::which(executable).map_err(|e| {
            Error::ToolNotFound(format!("{}: {}", executable.display(), e))
        })?;
        info!("Using legacy package installer {}", resolved.display());
        Ok(Self {
            executable: resolved,
            timeout,
        })
    }

    fn install(&self, package_config: &Path, output_dir: &Path) -> Result<()> {
        let mut command = Command::new(&self.executable);
        command
            .arg("install")
            .arg(package_config)
            .arg("-OutputDirectory")
            .arg(output_dir)
            .arg("-NonInteractive");

        let output = run_command(command, "nuget", self.timeout)?;
        if !output.success {
            output.forward_stderr_on_failure("nuget");
            return Err(Error::CommandFailed(format!(
                "nuget install {} failed with exit code {}",
                package_config.display(),
                output.code.unwrap_or(-1)
            )));
        }
        Ok(())
    }
}

impl LegacyInstaller for NugetCli {
    fn install_all(
        &self,
        package_configs: &[PathBuf],
        output_dir: &Path,
    ) -> Result<LegacyInstallSummary> {
        let mut summary = LegacyInstallSummary {
            package_config_count: package_configs.len(),
            success_count: 0,
        };

        for package_config in package_configs {
            info!("Restoring packages from {}...", package_config.display());
            match self.install(package_config, output_dir) {
                Ok(()) => summary.success_count += 1,
                Err(e) => warn!("Failed to restore {}: {}", package_config.display(), e),
            }
        }
        Ok(summary)
    }
}

/// Installer used when no legacy installer is available
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLegacyInstaller;

impl LegacyInstaller for NoLegacyInstaller {
    fn install_all(
        &self,
        package_configs: &[PathBuf],
        _output_dir: &Path,
    ) -> Result<LegacyInstallSummary> {
        if !package_configs.is_empty() {
            warn!(
                "Skipping {} packages.config file(s): no legacy package installer available",
                package_configs.len()
            );
        }
        Ok(LegacyInstallSummary {
            package_config_count: package_configs.len(),
            success_count: 0,
        })
    }
}
