// src/restore/recovery.rs

//! Missing package recovery
//!
//! Every package the tree references but the primary pass did not bring
//! in is restored on its own through a throwaway scaffold project. Each
//! package walks the same path:
//!
//! ```text
//! scaffold -> add reference -> restore
//!                                 |- ok ------------------------------> done
//!                                 |- no stable version -> "*-*" -> "*" -> done / failed
//!                                 `- feed unreachable  -> no config ---> done / failed
//! ```
//!
//! Failures stay with their package; the pass never aborts.

use crate::diagnostics::RestoreStats;
use crate::error::{Error, Result};
use crate::model::{PackageReference, PackageSource, RestoreResult};
use crate::temp_dir::TemporaryDirectory;
use crate::tool::{PackageTool, RestoreSettings};
use rayon::prelude::*;
use rayon::ThreadPool;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, error, info, warn};

/// Framework moniker legacy packages are restored against
pub const LATEST_NET_FRAMEWORK_MONIKER: &str = "net481";

static TARGET_FRAMEWORK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<TargetFramework>.*?</TargetFramework>").expect("valid regex")
});

static PACKAGE_REFERENCE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(<PackageReference\s+Include="[^"]+"\s+)Version="[^"]*""#).expect("valid regex")
});

static PACKAGE_REFERENCE_UNVERSIONED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(<PackageReference\s+Include="[^"]+")(\s*/?>)"#).expect("valid regex")
});

/// Referenced packages that neither restore location provides
///
/// When a name is pending under both sources only the SDK-style entry is kept.
pub fn pending_packages(
    referenced: &BTreeSet<PackageReference>,
    restored: &BTreeSet<String>,
    restored_legacy: &BTreeSet<String>,
) -> BTreeSet<PackageReference> {
    let mut pending: BTreeSet<PackageReference> = referenced
        .iter()
        .filter(|package| {
            let done = match package.source() {
                PackageSource::SdkStyle => restored,
                PackageSource::LegacyConfig => restored_legacy,
            };
            !done.contains(package.name())
        })
        .cloned()
        .collect();

    let mut by_name: BTreeMap<&str, usize> = BTreeMap::new();
    for package in &pending {
        *by_name.entry(package.name()).or_default() += 1;
    }
    let duplicates: Vec<String> = by_name
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_string())
        .collect();

    for name in duplicates {
        warn!("Found multiple not yet restored packages with name '{}'.", name);
        pending.remove(&PackageReference::new(&name, PackageSource::LegacyConfig));
    }
    pending
}

/// Pick the nuget.config recovery restores with
///
/// A single config is used as is; with several, only the one in the
/// source root qualifies.
pub fn choose_nuget_config(configs: &[PathBuf], root_config: Option<&Path>) -> Option<PathBuf> {
    let chosen = if configs.len() > 1 {
        info!(
            "Found multiple nuget.config files: {}.",
            configs
                .iter()
                .map(|c| c.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if root_config.is_none() {
            info!("Could not find a top-level nuget.config file.");
        }
        root_config.map(Path::to_path_buf)
    } else {
        configs.first().cloned()
    };

    if let Some(config) = &chosen {
        info!("Using nuget.config file {}.", config.display());
    }
    chosen
}

/// Replace the scaffold's target framework
pub fn rewrite_target_framework(content: &str, moniker: &str) -> Option<String> {
    if !TARGET_FRAMEWORK.is_match(content) {
        return None;
    }
    let replacement = format!("<TargetFramework>{moniker}</TargetFramework>");
    Some(
        TARGET_FRAMEWORK
            .replacen(content, 1, regex::NoExpand(&replacement))
            .into_owned(),
    )
}

/// Set the version constraint of the scaffold's package reference
pub fn rewrite_package_version(content: &str, version: &str) -> Option<String> {
    if PACKAGE_REFERENCE_VERSION.is_match(content) {
        let replacement = format!("${{1}}Version=\"{version}\"");
        return Some(
            PACKAGE_REFERENCE_VERSION
                .replacen(content, 1, replacement.as_str())
                .into_owned(),
        );
    }
    if PACKAGE_REFERENCE_UNVERSIONED.is_match(content) {
        let replacement = format!("${{1}} Version=\"{version}\"${{2}}");
        return Some(
            PACKAGE_REFERENCE_UNVERSIONED
                .replacen(content, 1, replacement.as_str())
                .into_owned(),
        );
    }
    None
}

/// The only project file in a scaffold directory
fn scaffold_project(dir: &Path) -> Result<PathBuf> {
    let projects: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::ScaffoldError(format!("Cannot list {}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("csproj"))
        })
        .collect();

    match projects.as_slice() {
        [project] => Ok(project.clone()),
        _ => Err(Error::ScaffoldError(format!(
            "Could not find the .csproj file in {}, count = {}",
            dir.display(),
            projects.len()
        ))),
    }
}

fn change_scaffold<F>(dir: &Path, what: &str, rewrite: F) -> Result<()>
where
    F: FnOnce(&str) -> Option<String>,
{
    debug!("Changing the {} in {}...", what, dir.display());
    let project = scaffold_project(dir)?;
    let content = fs::read_to_string(&project)
        .map_err(|e| Error::ScaffoldError(format!("Cannot read {}: {}", project.display(), e)))?;
    let updated = rewrite(&content).ok_or_else(|| {
        Error::ScaffoldError(format!("Could not find the {} in {}", what, project.display()))
    })?;
    fs::write(&project, updated)
        .map_err(|e| Error::ScaffoldError(format!("Cannot write {}: {}", project.display(), e)))
}

/// Write a nuget.config in `dir` listing exactly `feeds`
///
/// Ambient sources are cleared so only the given feeds are consulted.
pub fn write_fallback_config(feeds: &[String], dir: &Path) -> Result<PathBuf> {
    let mut sources = String::new();
    for (index, feed) in feeds.iter().enumerate() {
        sources.push_str(&format!(
            "    <add key=\"feed{}\" value=\"{}\" />\n",
            index,
            quick_xml::escape::escape(feed.as_str())
        ));
    }

    let path = dir.join("nuget.config");
    info!("Creating fallback nuget.config file {}.", path.display());
    let content = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<configuration>\n  <packageSources>\n    <clear />\n{sources}  </packageSources>\n</configuration>\n"
    );
    fs::write(&path, content).map_err(|e| {
        Error::IoError(format!("Failed to write {}: {}", path.display(), e))
    })?;
    Ok(path)
}

/// How a single package recovery ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Restored,
    Failed,
}

/// Recovers packages into a shared output directory
pub struct MissingPackageRecovery<'a> {
    tool: &'a dyn PackageTool,
    pool: &'a ThreadPool,
    output_dir: &'a Path,
    scratch_dir: &'a Path,
    stats: &'a RestoreStats,
}

impl<'a> MissingPackageRecovery<'a> {
    pub fn new(
        tool: &'a dyn PackageTool,
        pool: &'a ThreadPool,
        output_dir: &'a Path,
        scratch_dir: &'a Path,
        stats: &'a RestoreStats,
    ) -> Self {
        Self {
            tool,
            pool,
            output_dir,
            scratch_dir,
            stats,
        }
    }

    /// Recover every pending package; returns the output directory if any succeeded
    pub fn recover(
        &self,
        pending: &BTreeSet<PackageReference>,
        nuget_config: Option<&Path>,
        allow_bare_retry: bool,
    ) -> Option<PathBuf> {
        if pending.is_empty() {
            info!("No missing packages to restore.");
            return None;
        }

        info!("Found {} packages that are not yet restored", pending.len());
        self.stats.record("Fallback nuget restore", pending.len());

        let packages: Vec<&PackageReference> = pending.iter().collect();
        let outcomes: Vec<RecoveryOutcome> = self.pool.install(|| {
            packages
                .par_iter()
                .map(|package| {
                    self.restore_package(package.name(), package.source(), nuget_config, allow_bare_retry)
                })
                .collect()
        });

        let success_count = outcomes
            .iter()
            .filter(|o| **o == RecoveryOutcome::Restored)
            .count();
        self.stats
            .record("Successfully ran fallback nuget restore", success_count);
        info!(
            "Restored {} of {} missing packages",
            success_count,
            packages.len()
        );

        (success_count > 0).then(|| self.output_dir.to_path_buf())
    }

    /// Recover one package through its own scaffold project
    pub fn restore_package(
        &self,
        package: &str,
        source: PackageSource,
        nuget_config: Option<&Path>,
        allow_bare_retry: bool,
    ) -> RecoveryOutcome {
        info!("Restoring package {}...", package);
        match self.try_restore_package(package, source, nuget_config, allow_bare_retry) {
            Ok(true) => RecoveryOutcome::Restored,
            Ok(false) => {
                warn!("Failed to restore nuget package {}", package);
                RecoveryOutcome::Failed
            }
            Err(e) => {
                error!("Failed to restore nuget package {}: {}", package, e);
                RecoveryOutcome::Failed
            }
        }
    }

    fn try_restore_package(
        &self,
        package: &str,
        source: PackageSource,
        nuget_config: Option<&Path>,
        allow_bare_retry: bool,
    ) -> Result<bool> {
        let scaffold = TemporaryDirectory::new_in(
            self.scratch_dir,
            &format!("scaffold-{package}"),
            "missing package working",
        )?;
        let dir = scaffold.path();

        self.tool.new_project(dir)?;
        if source == PackageSource::LegacyConfig {
            change_scaffold(dir, "target framework moniker", |content| {
                rewrite_target_framework(content, LATEST_NET_FRAMEWORK_MONIKER)
            })?;
        }
        self.tool.add_package(dir, package)?;

        let result = self.restore_with_relaxation(package, dir, nuget_config)?;
        if result.success {
            return Ok(true);
        }

        if allow_bare_retry && result.has_feed_source_error && nuget_config.is_some() {
            debug!("Trying to restore '{}' without nuget.config.", package);
            let retry = self.tool.restore(&self.settings(dir, None));
            return Ok(retry.success);
        }

        Ok(false)
    }

    fn settings(&self, scaffold: &Path, nuget_config: Option<&Path>) -> RestoreSettings {
        let mut settings = RestoreSettings::new(scaffold, self.output_dir);
        settings.config_path = nuget_config.map(Path::to_path_buf);
        settings.force_reevaluation = true;
        settings
    }

    /// Stable restore, then `*-*`, then `*` while no stable version exists
    fn restore_with_relaxation(
        &self,
        package: &str,
        scaffold: &Path,
        nuget_config: Option<&Path>,
    ) -> Result<RestoreResult> {
        let result = self.tool.restore(&self.settings(scaffold, nuget_config));
        if result.success || !result.has_no_stable_version_error {
            return Ok(result);
        }

        debug!(
            "Failed to restore nuget package {} because no stable version was found.",
            package
        );
        for version in ["*-*", "*"] {
            change_scaffold(scaffold, "package reference version", |content| {
                rewrite_package_version(content, version)
            })?;
            let result = self.tool.restore(&self.settings(scaffold, nuget_config));
            if result.success {
                return Ok(result);
            }
        }

        Ok(RestoreResult::failed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sdk(name: &str) -> PackageReference {
        PackageReference::new(name, PackageSource::SdkStyle)
    }

    fn legacy(name: &str) -> PackageReference {
        PackageReference::new(name, PackageSource::LegacyConfig)
    }

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pending_packages_difference_by_source() {
        let referenced = BTreeSet::from([sdk("A"), sdk("B"), legacy("C"), legacy("D")]);

        let pending = pending_packages(&referenced, &names(&["a", "c"]), &names(&["d"]));

        assert_eq!(pending, BTreeSet::from([sdk("b"), legacy("c")]));
    }

    #[test]
    fn test_pending_packages_prefer_sdk_style_duplicates() {
        let referenced = BTreeSet::from([sdk("Moq"), legacy("moq"), legacy("NUnit")]);

        let pending = pending_packages(&referenced, &BTreeSet::new(), &BTreeSet::new());

        assert_eq!(pending.len(), 2);
        assert!(pending.contains(&sdk("moq")));
        assert!(!pending.contains(&legacy("moq")));
        assert!(pending.contains(&legacy("nunit")));
        let moq: Vec<_> = pending.iter().filter(|p| p.name() == "moq").collect();
        assert_eq!(moq.len(), 1);
    }

    #[test]
    fn test_nothing_pending_when_all_restored() {
        let referenced = BTreeSet::from([sdk("a"), legacy("b")]);
        let pending = pending_packages(&referenced, &names(&["a"]), &names(&["b"]));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_choose_nuget_config() {
        let one = vec![PathBuf::from("/src/sub/nuget.config")];
        assert_eq!(choose_nuget_config(&one, None), Some(one[0].clone()));

        let many = vec![
            PathBuf::from("/src/nuget.config"),
            PathBuf::from("/src/sub/nuget.config"),
        ];
        assert_eq!(
            choose_nuget_config(&many, Some(Path::new("/src/nuget.config"))),
            Some(PathBuf::from("/src/nuget.config"))
        );
        assert_eq!(choose_nuget_config(&many, None), None);
        assert_eq!(choose_nuget_config(&[], None), None);
    }

    #[test]
    fn test_rewrite_target_framework() {
        let content = "<Project><PropertyGroup><TargetFramework>net8.0</TargetFramework></PropertyGroup></Project>";
        let updated = rewrite_target_framework(content, "net481").unwrap();
        assert!(updated.contains("<TargetFramework>net481</TargetFramework>"));
        assert!(!updated.contains("net8.0"));
        assert_eq!(rewrite_target_framework("<Project />", "net481"), None);
    }

    #[test]
    fn test_rewrite_package_version() {
        let versioned = r#"<PackageReference Include="Foo" Version="1.2.3" />"#;
        assert_eq!(
            rewrite_package_version(versioned, "*-*").as_deref(),
            Some(r#"<PackageReference Include="Foo" Version="*-*" />"#)
        );

        let unversioned = r#"<PackageReference Include="Foo" />"#;
        assert_eq!(
            rewrite_package_version(unversioned, "*").as_deref(),
            Some(r#"<PackageReference Include="Foo" Version="*" />"#)
        );

        assert_eq!(rewrite_package_version("<Project />", "*"), None);
    }

    #[test]
    fn test_scaffold_project_requires_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(scaffold_project(dir.path()), Err(Error::ScaffoldError(_))));

        fs::write(dir.path().join("a.csproj"), "<Project />").unwrap();
        assert_eq!(scaffold_project(dir.path()).unwrap(), dir.path().join("a.csproj"));

        fs::write(dir.path().join("b.csproj"), "<Project />").unwrap();
        assert!(matches!(scaffold_project(dir.path()), Err(Error::ScaffoldError(_))));
    }

    #[test]
    fn test_fallback_config_lists_exactly_the_given_feeds() {
        let dir = tempfile::tempdir().unwrap();
        let feeds = vec![
            "https://a.example/v3/index.json".to_string(),
            "https://b.example/nuget?x=1&y=2".to_string(),
        ];

        let path = write_fallback_config(&feeds, dir.path()).unwrap();
        let content = fs::read_to_string(&path).unwrap();

        assert_eq!(path, dir.path().join("nuget.config"));
        assert_eq!(content.matches("<add ").count(), 2);
        assert_eq!(content.matches("<clear />").count(), 1);
        assert!(content.contains(r#"<add key="feed0" value="https://a.example/v3/index.json" />"#));
        assert!(content.contains(r#"<add key="feed1" value="https://b.example/nuget?x=1&amp;y=2" />"#));
        assert!(content.find("<clear />").unwrap() < content.find("<add ").unwrap());
    }
}
