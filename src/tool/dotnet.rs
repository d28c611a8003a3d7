// src/tool/dotnet.rs

//! `dotnet` CLI adapter
//!
//! Restore outcomes are classified from the tool's output: `NU1301` marks an
//! unreachable package source and `NU1103` a package with no stable version.

use super::{run_command, CommandOutput, PackageTool, RestoreSettings};
use crate::error::{Error, Result};
use crate::model::RestoreResult;
use crate::proxy::ProxyDescriptor;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

const FEED_SOURCE_ERROR: &str = "NU1301";
const NO_STABLE_VERSION_ERROR: &str = "NU1103";

static RESTORED_PROJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*Restored\s+(.+\.(?:cs|vb|fs)proj)\b").expect("valid regex")
});

static ASSETS_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Path:\s+(.*project\.assets\.json)\s*$").expect("valid regex")
});

/// Runs restore, scaffold and feed listing commands through `dotnet`
#[derive(Debug, Clone)]
pub struct DotnetCli {
    executable: PathBuf,
    timeout: Duration,
    env: Vec<(String, String)>,
}

impl DotnetCli {
    pub fn new(executable: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            timeout,
            env: Vec::new(),
        }
    }

    /// Pass the proxy address and certificate through to every invocation
    pub fn with_proxy(mut self, proxy: &ProxyDescriptor, certificate: Option<&Path>) -> Self {
        let address = proxy.address();
        self.env.push(("HTTP_PROXY".to_string(), address.clone()));
        self.env.push(("HTTPS_PROXY".to_string(), address));
        if let Some(cert) = certificate {
            self.env.push((
                "SSL_CERT_FILE".to_string(),
                cert.to_string_lossy().to_string(),
            ));
        }
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .env("DOTNET_NOLOGO", "1")
            .env("DOTNET_CLI_TELEMETRY_OPTOUT", "1")
            .env("DOTNET_SKIP_FIRST_TIME_EXPERIENCE", "1");
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }

    fn run(&self, command: Command) -> Result<CommandOutput> {
        run_command(command, "dotnet", self.timeout)
    }

    fn run_checked(&self, command: Command, what: &str) -> Result<CommandOutput> {
        let output = self.run(command)?;
        if !output.success {
            output.forward_stderr_on_failure("dotnet");
            return Err(Error::CommandFailed(format!(
                "dotnet {} failed with exit code {}",
                what,
                output.code.unwrap_or(-1)
            )));
        }
        Ok(output)
    }

    /// Build the argument list for a restore invocation
    pub fn restore_args(settings: &RestoreSettings) -> Vec<String> {
        let mut args = vec![
            "restore".to_string(),
            "--no-dependencies".to_string(),
            settings.target.to_string_lossy().to_string(),
            "--packages".to_string(),
            settings.output_dir.to_string_lossy().to_string(),
            "/p:DisableImplicitNuGetFallbackFolder=true".to_string(),
            "--verbosity".to_string(),
            "normal".to_string(),
        ];

        if settings.force_ref_assembly_fetch {
            args.push("/p:AutomaticallyUseReferenceAssemblyPackages=true".to_string());
        }
        if settings.target_windows {
            args.push("/p:EnableWindowsTargeting=true".to_string());
        }
        if let Some(sources) = &settings.extra_sources {
            for source in sources {
                args.push("-s".to_string());
                args.push(source.clone());
            }
        }
        if let Some(config) = &settings.config_path {
            args.push("--configfile".to_string());
            args.push(config.to_string_lossy().to_string());
        }
        if settings.force_reevaluation {
            args.push("--force".to_string());
        }
        args
    }
}

/// Classify restore output into a [`RestoreResult`]
pub(crate) fn parse_restore_output<'a, I>(success: bool, lines: I) -> RestoreResult
where
    I: IntoIterator<Item = &'a str>,
{
    let mut result = RestoreResult {
        success,
        ..RestoreResult::default()
    };

    for line in lines {
        if line.contains(FEED_SOURCE_ERROR) {
            result.has_feed_source_error = true;
        }
        if line.contains(NO_STABLE_VERSION_ERROR) {
            result.has_no_stable_version_error = true;
        }
        if let Some(caps) = RESTORED_PROJECT.captures(line) {
            let project = caps[1].trim().to_string();
            if !result.restored_projects.contains(&project) {
                result.restored_projects.push(project);
            }
        }
        if let Some(caps) = ASSETS_FILE.captures(line) {
            let assets = caps[1].trim().to_string();
            if !result.asset_manifests.contains(&assets) {
                result.asset_manifests.push(assets);
            }
        }
    }
    result
}

impl PackageTool for DotnetCli {
    fn restore(&self, settings: &RestoreSettings) -> RestoreResult {
        let mut command = self.command();
        command.args(Self::restore_args(settings));

        match self.run(command) {
            Ok(output) => {
                if !output.success {
                    info!(
                        "dotnet restore of {} exited with code {}",
                        settings.target.display(),
                        output.code.unwrap_or(-1)
                    );
                    output.forward_stderr_on_failure("dotnet");
                }
                parse_restore_output(output.success, output.lines())
            }
            Err(e) => {
                warn!("Failed to restore {}: {}", settings.target.display(), e);
                RestoreResult::failed()
            }
        }
    }

    fn new_project(&self, dir: &Path) -> Result<()> {
        let mut command = self.command();
        command
            .args(["new", "console", "--no-restore", "--output"])
            .arg(dir);
        self.run_checked(command, "new").map(|_| ())
    }

    fn add_package(&self, dir: &Path, package: &str) -> Result<()> {
        let mut command = self.command();
        command
            .arg("add")
            .arg(dir)
            .args(["package", package, "--no-restore"]);
        self.run_checked(command, "add package").map(|_| ())
    }

    fn list_feeds(&self, config: &Path) -> Result<Vec<String>> {
        let mut command = self.command();
        command
            .args(["nuget", "list", "source", "--format", "Short", "--configfile"])
            .arg(config);
        Ok(self.run_checked(command, "nuget list source")?.stdout)
    }

    fn list_feeds_in_folder(&self, folder: &Path) -> Result<Vec<String>> {
        let mut command = self.command();
        command
            .args(["nuget", "list", "source", "--format", "Short"])
            .current_dir(folder);
        Ok(self.run_checked(command, "nuget list source")?.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_args() {
        let mut settings = RestoreSettings::new("/src/app.sln", "/tmp/packages");
        settings.force_ref_assembly_fetch = true;
        settings.target_windows = true;
        settings.extra_sources = Some(vec![
            "https://a.example/index.json".to_string(),
            "https://b.example/index.json".to_string(),
        ]);
        settings.config_path = Some(PathBuf::from("/tmp/nuget.config"));
        settings.force_reevaluation = true;

        let args = DotnetCli::restore_args(&settings);
        assert_eq!(&args[..3], ["restore", "--no-dependencies", "/src/app.sln"]);
        assert!(args.contains(&"/p:AutomaticallyUseReferenceAssemblyPackages=true".to_string()));
        assert!(args.contains(&"/p:EnableWindowsTargeting=true".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "-s").count(), 2);
        assert!(args.windows(2).any(|w| w[0] == "--configfile" && w[1] == "/tmp/nuget.config"));
        assert_eq!(args.last().map(String::as_str), Some("--force"));
    }

    #[test]
    fn test_minimal_restore_args() {
        let settings = RestoreSettings::new("/work/scaffold", "/tmp/missing");
        let args = DotnetCli::restore_args(&settings);
        assert!(!args.contains(&"--force".to_string()));
        assert!(!args.contains(&"--configfile".to_string()));
        assert!(!args.contains(&"-s".to_string()));
    }

    #[test]
    fn test_parse_restore_output() {
        let lines = [
            "  Determining projects to restore...",
            "  Writing assets file to disk. Path: /src/app/obj/project.assets.json",
            "  Restored /src/app/app.csproj (in 1.2 sec).",
            "  Assets file has not changed. Skipping assets file writing. Path: /src/lib/obj/project.assets.json",
            "  Restored /src/lib/lib.csproj (in 10 ms).",
            "/src/app/app.csproj : error NU1301: Unable to load the service index for source https://x.example/index.json.",
        ];

        let result = parse_restore_output(false, lines);
        assert!(!result.success);
        assert!(result.has_feed_source_error);
        assert!(!result.has_no_stable_version_error);
        assert_eq!(
            result.restored_projects,
            vec!["/src/app/app.csproj".to_string(), "/src/lib/lib.csproj".to_string()]
        );
        assert_eq!(result.asset_manifests.len(), 2);
        assert_eq!(result.asset_manifests[0], "/src/app/obj/project.assets.json");
    }

    #[test]
    fn test_parse_no_stable_version() {
        let lines = ["error NU1103: Unable to find a stable package Foo with version (>= 0.0.0)"];
        let result = parse_restore_output(false, lines);
        assert!(result.has_no_stable_version_error);
        assert!(!result.has_feed_source_error);
    }

    #[test]
    fn test_proxy_environment() {
        let proxy = ProxyDescriptor {
            host: "127.0.0.1".to_string(),
            port: 3128,
            certificate_pem: None,
            registry_urls: Vec::new(),
        };
        let cli = DotnetCli::new("dotnet", Duration::from_secs(1))
            .with_proxy(&proxy, Some(Path::new("/tmp/proxy.crt")));

        assert!(cli.env.contains(&("HTTPS_PROXY".to_string(), "http://127.0.0.1:3128".to_string())));
        assert!(cli.env.contains(&("SSL_CERT_FILE".to_string(), "/tmp/proxy.crt".to_string())));
    }
}
