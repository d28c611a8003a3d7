// src/restore/layout.rs

//! On-disk package layouts
//!
//! `dotnet restore` writes `name/version/` directories; `nuget install`
//! writes flat `name.version/` directories. Helpers here read both.

use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// `<name>.<major>.<minor>.<patch>[-<prerelease>]`; the name match is greedy
static LEGACY_PACKAGE_DIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)\.(\d+\.\d+\.\d+)(-.*)?$").expect("valid regex")
});

/// Immediate sub-directories of `root`
fn sub_directories(root: &Path) -> Vec<PathBuf> {
    match fs::read_dir(root) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect(),
        Err(e) => {
            debug!("Cannot list {}: {}", root.display(), e);
            Vec::new()
        }
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Lowercased names of the package directories under `root`
pub fn package_dir_names(root: &Path) -> BTreeSet<String> {
    sub_directories(root)
        .iter()
        .map(|dir| dir_name(dir).to_lowercase())
        .collect()
}

/// Version folders of a package, by name descending
///
/// The order is plain string order, so `2.0.0` sorts above `10.0.0` and
/// prerelease folders are not ranked below their release.
pub fn version_folders(package_dir: &Path) -> Vec<PathBuf> {
    let mut folders = sub_directories(package_dir);
    folders.sort_by_key(|dir| std::cmp::Reverse(dir_name(dir)));
    folders
}

/// The newest version folder of a package, or the package directory itself
pub fn newest_version_folder(package_dir: &Path) -> PathBuf {
    let folders = version_folders(package_dir);
    if folders.len() > 1 {
        debug!(
            "Found multiple versions in {}. Using the latest one ({}) from: {}",
            package_dir.display(),
            dir_name(&folders[0]),
            folders.iter().map(|d| dir_name(d)).collect::<Vec<_>>().join(", ")
        );
    }

    match folders.into_iter().next() {
        Some(folder) => folder,
        None => {
            debug!("No version folder found in {}", package_dir.display());
            package_dir.to_path_buf()
        }
    }
}

/// The directory of `package` under `root`, matched case-insensitively
pub fn package_directory(package: &str, root: &Path) -> Option<PathBuf> {
    sub_directories(root)
        .into_iter()
        .find(|dir| dir_name(dir).eq_ignore_ascii_case(package))
}

/// Package name of a flat legacy directory such as `newtonsoft.json.13.0.3`
pub fn parse_legacy_package_dir(dir_name: &str) -> Option<String> {
    LEGACY_PACKAGE_DIR
        .captures(dir_name)
        .map(|caps| caps[1].to_lowercase())
}

/// Package names recovered from the legacy install directory
///
/// Names that may themselves contain digits and dots make this a heuristic;
/// directories that do not match are logged and skipped.
pub fn restored_legacy_package_names(legacy_root: &Path) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for dir in package_dir_names(legacy_root) {
        match parse_legacy_package_dir(&dir) {
            Some(name) => {
                names.insert(name);
            }
            None => warn!(
                "Package directory '{}' doesn't match the expected pattern.",
                dir
            ),
        }
    }
    names
}

fn is_under_tools(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root)
        .map(|relative| {
            relative.parent().is_some_and(|parent| {
                parent.components().any(|c| match c {
                    Component::Normal(name) => name.to_string_lossy().eq_ignore_ascii_case("tools"),
                    _ => false,
                })
            })
        })
        .unwrap_or(false)
}

/// All DLLs under the legacy install directory, minus build-time tools
pub fn legacy_dlls(legacy_root: &Path) -> Vec<PathBuf> {
    let mut dlls = Vec::new();
    let mut excluded = Vec::new();

    for entry in WalkDir::new(legacy_root).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_dll = entry.file_type().is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("dll"));
        if !is_dll {
            continue;
        }
        if is_under_tools(path, legacy_root) {
            excluded.push(path.to_path_buf());
        } else {
            dlls.push(path.to_path_buf());
        }
    }

    if !dlls.is_empty() || !excluded.is_empty() {
        info!("Restored {} NuGet DLLs.", dlls.len() + excluded.len());
    }
    if !excluded.is_empty() {
        info!("Excluding {} NuGet DLLs.", excluded.len());
        for path in &excluded {
            info!("Excluded NuGet DLL: {}", path.display());
        }
    }

    dlls.sort();
    dlls
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mkdirs(root: &Path, dirs: &[&str]) {
        for dir in dirs {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
    }

    #[test]
    fn test_newest_version_folder_is_lexicographic() {
        let tmp = TempDir::new().unwrap();
        let package = tmp.path().join("a");
        mkdirs(&package, &["1.0.0", "2.0.0", "1.5.0-beta"]);

        assert_eq!(newest_version_folder(&package), package.join("2.0.0"));

        let names: Vec<String> = version_folders(&package).iter().map(|d| dir_name(d)).collect();
        assert_eq!(names, vec!["2.0.0", "1.5.0-beta", "1.0.0"]);
    }

    #[test]
    fn test_string_order_ranks_ten_below_two() {
        let tmp = TempDir::new().unwrap();
        let package = tmp.path().join("b");
        mkdirs(&package, &["2.0.0", "10.0.0"]);

        assert_eq!(newest_version_folder(&package), package.join("2.0.0"));
    }

    #[test]
    fn test_newest_version_folder_without_versions() {
        let tmp = TempDir::new().unwrap();
        let package = tmp.path().join("empty");
        fs::create_dir_all(&package).unwrap();
        fs::write(package.join("readme.txt"), "x").unwrap();

        assert_eq!(newest_version_folder(&package), package);
    }

    #[test]
    fn test_package_directory_ignores_case() {
        let tmp = TempDir::new().unwrap();
        mkdirs(tmp.path(), &["newtonsoft.json/13.0.3"]);

        assert_eq!(
            package_directory("Newtonsoft.Json", tmp.path()),
            Some(tmp.path().join("newtonsoft.json"))
        );
        assert_eq!(package_directory("serilog", tmp.path()), None);
    }

    #[test]
    fn test_parse_legacy_package_dir() {
        assert_eq!(
            parse_legacy_package_dir("newtonsoft.json.13.0.3").as_deref(),
            Some("newtonsoft.json")
        );
        assert_eq!(
            parse_legacy_package_dir("NUnit.3.13.3-beta1").as_deref(),
            Some("nunit")
        );
        assert_eq!(
            parse_legacy_package_dir(
                "runtime.tizen.4.0.0-armel.Microsoft.NETCore.DotNetHostResolver.2.0.0-preview2-25407-01"
            )
            .as_deref(),
            Some("runtime.tizen.4.0.0-armel.microsoft.netcore.dotnethostresolver")
        );
        assert_eq!(parse_legacy_package_dir("not-a-package"), None);
    }

    #[test]
    fn test_restored_legacy_names_skip_unparseable() {
        let tmp = TempDir::new().unwrap();
        mkdirs(tmp.path(), &["moq.4.18.4", "nunit.3.13.3", "scratch"]);

        let names: Vec<String> = restored_legacy_package_names(tmp.path()).into_iter().collect();
        assert_eq!(names, vec!["moq", "nunit"]);
    }

    #[test]
    fn test_legacy_dlls_exclude_tools() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        mkdirs(root, &["nunit.3.13.3/lib/net45", "nunit.console.3.16.0/tools"]);
        fs::write(root.join("nunit.3.13.3/lib/net45/nunit.framework.dll"), "").unwrap();
        fs::write(root.join("nunit.3.13.3/lib/net45/nunit.framework.xml"), "").unwrap();
        fs::write(root.join("nunit.console.3.16.0/tools/nunit3-console.DLL"), "").unwrap();

        let dlls = legacy_dlls(root);
        assert_eq!(dlls, vec![root.join("nunit.3.13.3/lib/net45/nunit.framework.dll")]);
    }
}
