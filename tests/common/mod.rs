// tests/common/mod.rs

//! Shared test utilities for integration tests.
//!
//! `FakeTool` stands in for `dotnet`: it writes package directories and
//! asset manifests the way a real restore would, and records every call.

#![allow(dead_code)]

use depfetch::feeds::{FeedProber, FeedRequester, ProbeFailure};
use depfetch::{
    Error, LegacyInstallSummary, LegacyInstaller, PackageTool, RestoreConfig, RestoreResult,
    RestoreSettings, Result,
};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// How a package behaves when restored through a scaffold project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Resolves with an unversioned reference
    Stable,
    /// Only prerelease versions exist; needs `*-*` or `*`
    Prerelease,
    /// Only resolves with the unconstrained `*` wildcard
    WildcardOnly,
    /// The configured feed is down; resolves once no config is passed
    ConfigFeedDown,
    /// Never resolves
    Missing,
    /// Creating the scaffold project fails
    NewProjectFails,
    /// The scaffold is created but adding the reference fails
    AddPackageFails,
    /// The scaffold is created without a project file
    ProjectFileMissing,
}

/// One restore of a scaffold project as seen by the tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldRestore {
    pub package: String,
    pub version: Option<String>,
    pub target_framework: String,
    pub config: Option<PathBuf>,
    pub success: bool,
}

#[derive(Default)]
pub struct FakeTool {
    /// Packages each project restores in the primary pass
    pub project_packages: HashMap<PathBuf, Vec<(String, String)>>,
    /// Behavior of packages restored through scaffolds
    pub availability: HashMap<String, Availability>,
    /// Raw `nuget list source` lines per config file
    pub feeds_by_config: HashMap<PathBuf, Vec<String>>,
    pub primary_restores: Mutex<Vec<RestoreSettings>>,
    pub scaffold_restores: Mutex<Vec<ScaffoldRestore>>,
    /// Every directory a scaffold project was requested in
    pub scaffold_dirs: Mutex<Vec<PathBuf>>,
}

const SCAFFOLD_PROJECT: &str = "scaffold.csproj";

impl FakeTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project: &Path, packages: &[(&str, &str)]) -> Self {
        self.project_packages.insert(
            project.to_path_buf(),
            packages
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn with_package(mut self, name: &str, availability: Availability) -> Self {
        self.availability.insert(name.to_lowercase(), availability);
        self
    }

    pub fn with_feeds(mut self, config: &Path, lines: &[&str]) -> Self {
        self.feeds_by_config.insert(
            config.to_path_buf(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    /// Scaffold restores in call order
    pub fn scaffold_restores(&self) -> Vec<ScaffoldRestore> {
        self.scaffold_restores.lock().unwrap().clone()
    }

    /// Distinct packages that went through a scaffold
    pub fn scaffold_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self
            .scaffold_restores()
            .into_iter()
            .map(|r| r.package)
            .collect();
        packages.sort();
        packages.dedup();
        packages
    }

    /// Behavior of the package whose scaffold lives in `dir`
    ///
    /// Scaffold directories are named `scaffold-<package>-<random>`.
    fn scaffold_availability(&self, dir: &Path) -> Availability {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.availability
            .iter()
            .find(|(package, _)| name.starts_with(&format!("scaffold-{package}-")))
            .map(|(_, availability)| *availability)
            .unwrap_or(Availability::Missing)
    }

    fn write_package(output_dir: &Path, name: &str, version: &str) {
        let dir = output_dir
            .join(name.to_lowercase())
            .join(version)
            .join("lib/net8.0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{name}.dll")), "").unwrap();
    }

    fn restore_project(&self, settings: &RestoreSettings) -> RestoreResult {
        self.primary_restores.lock().unwrap().push(settings.clone());
        let Some(packages) = self.project_packages.get(&settings.target) else {
            return RestoreResult::failed();
        };

        let mut libraries = Vec::new();
        for (name, version) in packages {
            Self::write_package(&settings.output_dir, name, version);
            libraries.push(format!(
                r#""{name}/{version}": {{ "type": "package", "compile": {{ "lib/net8.0/{name}.dll": {{}} }} }}"#
            ));
        }

        let obj = settings.target.parent().unwrap().join("obj");
        fs::create_dir_all(&obj).unwrap();
        let manifest = obj.join("project.assets.json");
        fs::write(
            &manifest,
            format!(r#"{{ "targets": {{ "net8.0": {{ {} }} }} }}"#, libraries.join(", ")),
        )
        .unwrap();

        RestoreResult {
            success: true,
            restored_projects: vec![settings.target.to_string_lossy().to_string()],
            asset_manifests: vec![manifest.to_string_lossy().to_string()],
            ..RestoreResult::default()
        }
    }

    fn restore_scaffold(&self, settings: &RestoreSettings) -> RestoreResult {
        let content = fs::read_to_string(settings.target.join(SCAFFOLD_PROJECT)).unwrap();
        let reference = Regex::new(r#"<PackageReference Include="([^"]+)"(?: Version="([^"]*)")?"#).unwrap();
        let framework = Regex::new(r"<TargetFramework>([^<]*)</TargetFramework>").unwrap();

        let caps = reference.captures(&content).expect("scaffold has a package reference");
        let package = caps[1].to_string();
        let version = caps.get(2).map(|m| m.as_str().to_string());
        let target_framework = framework
            .captures(&content)
            .map(|c| c[1].to_string())
            .unwrap_or_default();

        let availability = self
            .availability
            .get(&package.to_lowercase())
            .copied()
            .unwrap_or(Availability::Missing);

        let mut result = RestoreResult::default();
        match availability {
            Availability::Stable => result.success = true,
            Availability::Prerelease => {
                result.success = version.is_some();
                result.has_no_stable_version_error = !result.success;
            }
            Availability::WildcardOnly => {
                result.success = version.as_deref() == Some("*");
                result.has_no_stable_version_error = !result.success;
            }
            Availability::ConfigFeedDown => {
                result.success = settings.config_path.is_none();
                result.has_feed_source_error = !result.success;
            }
            Availability::Missing
            | Availability::NewProjectFails
            | Availability::AddPackageFails
            | Availability::ProjectFileMissing => {}
        }

        if result.success {
            let resolved = if version.is_some() { "2.0.0-beta" } else { "1.0.0" };
            Self::write_package(&settings.output_dir, &package, resolved);
        }

        self.scaffold_restores.lock().unwrap().push(ScaffoldRestore {
            package: package.to_lowercase(),
            version,
            target_framework,
            config: settings.config_path.clone(),
            success: result.success,
        });
        result
    }
}

impl PackageTool for FakeTool {
    fn restore(&self, settings: &RestoreSettings) -> RestoreResult {
        if settings.target.is_dir() {
            self.restore_scaffold(settings)
        } else {
            self.restore_project(settings)
        }
    }

    fn new_project(&self, dir: &Path) -> Result<()> {
        self.scaffold_dirs.lock().unwrap().push(dir.to_path_buf());
        match self.scaffold_availability(dir) {
            Availability::NewProjectFails => {
                return Err(Error::CommandFailed("dotnet new failed with exit code 1".to_string()));
            }
            Availability::ProjectFileMissing => return Ok(()),
            _ => {}
        }
        fs::write(
            dir.join(SCAFFOLD_PROJECT),
            "<Project Sdk=\"Microsoft.NET.Sdk\">\n  <PropertyGroup>\n    <TargetFramework>net8.0</TargetFramework>\n  </PropertyGroup>\n</Project>\n",
        )?;
        Ok(())
    }

    fn add_package(&self, dir: &Path, package: &str) -> Result<()> {
        if self.availability.get(&package.to_lowercase()) == Some(&Availability::AddPackageFails) {
            return Err(Error::CommandFailed(format!(
                "dotnet add package {package} failed with exit code 1"
            )));
        }
        let path = dir.join(SCAFFOLD_PROJECT);
        let content = fs::read_to_string(&path)?;
        let item = format!(
            "  <ItemGroup>\n    <PackageReference Include=\"{package}\" />\n  </ItemGroup>\n</Project>"
        );
        fs::write(&path, content.replace("</Project>", &item))?;
        Ok(())
    }

    fn list_feeds(&self, config: &Path) -> Result<Vec<String>> {
        Ok(self.feeds_by_config.get(config).cloned().unwrap_or_default())
    }

    fn list_feeds_in_folder(&self, folder: &Path) -> Result<Vec<String>> {
        Ok(self
            .feeds_by_config
            .iter()
            .filter(|(config, _)| config.parent() == Some(folder))
            .flat_map(|(_, lines)| lines.clone())
            .collect())
    }
}

/// Installs fixed legacy packages, including a build-time tools folder
#[derive(Default)]
pub struct FakeLegacy {
    pub packages: Vec<(String, String)>,
    pub calls: Mutex<usize>,
}

impl FakeLegacy {
    pub fn with_packages(packages: &[(&str, &str)]) -> Self {
        Self {
            packages: packages
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            calls: Mutex::new(0),
        }
    }
}

impl LegacyInstaller for FakeLegacy {
    fn install_all(&self, package_configs: &[PathBuf], output_dir: &Path) -> Result<LegacyInstallSummary> {
        *self.calls.lock().unwrap() += 1;
        for (name, version) in &self.packages {
            let root = output_dir.join(format!("{name}.{version}"));
            fs::create_dir_all(root.join("lib/net45"))?;
            fs::create_dir_all(root.join("tools"))?;
            fs::write(root.join(format!("lib/net45/{name}.dll")), "")?;
            fs::write(root.join(format!("tools/{name}.Tasks.dll")), "")?;
        }
        Ok(LegacyInstallSummary {
            package_config_count: package_configs.len(),
            success_count: package_configs.len(),
        })
    }
}

/// Feeds whose URL contains "down" never answer; all others do
pub struct HostRequester;

impl FeedRequester for HostRequester {
    fn request(&self, feed: &str, _timeout: Duration) -> std::result::Result<(), ProbeFailure> {
        if feed.contains("down") {
            Err(ProbeFailure::TimedOut)
        } else {
            Ok(())
        }
    }
}

pub fn offline_prober() -> FeedProber {
    FeedProber::new(Box::new(HostRequester))
}

/// Restore options rooted in `scratch`, with a fast probe schedule
pub fn test_config(scratch: &Path) -> RestoreConfig {
    let mut config = RestoreConfig::default()
        .with_scratch_dir(scratch.to_path_buf())
        .with_threads(2);
    config.probe.initial_timeout = Duration::from_millis(10);
    config.probe.try_count = 2;
    config.fallback_probe = config.probe;
    config
}

/// A source tree on disk plus a separate scratch root
pub struct Workspace {
    pub source: TempDir,
    pub scratch: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            source: tempfile::tempdir().unwrap(),
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.source.path()
    }

    /// Write an SDK-style project referencing `packages`
    pub fn project(&self, relative: &str, packages: &[&str]) -> PathBuf {
        let references: String = packages
            .iter()
            .map(|p| format!("    <PackageReference Include=\"{p}\" Version=\"1.0.0\" />\n"))
            .collect();
        let content = format!(
            "<Project Sdk=\"Microsoft.NET.Sdk\">\n  <ItemGroup>\n{references}  </ItemGroup>\n</Project>\n"
        );
        self.write(relative, &content)
    }

    /// Write a packages.config listing `packages`
    pub fn packages_config(&self, relative: &str, packages: &[(&str, &str)]) -> PathBuf {
        let entries: String = packages
            .iter()
            .map(|(id, v)| format!("  <package id=\"{id}\" version=\"{v}\" targetFramework=\"net48\" />\n"))
            .collect();
        self.write(
            relative,
            &format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<packages>\n{entries}</packages>\n"),
        )
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }
}
