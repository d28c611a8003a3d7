// src/restore/assets.rs

//! project.assets.json reading
//!
//! Each restore unit owns one [`Assets`] collector. Collectors are turned
//! into [`DependencyContainer`]s and merged once the parallel phase is over.

use crate::error::{Error, Result};
use crate::model::DependencyContainer;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Placeholder file NuGet uses for "no assets for this framework"
const EMPTY_FOLDER_MARKER: &str = "_._";

#[derive(Debug, Default, Deserialize)]
struct AssetsFile {
    #[serde(default)]
    targets: BTreeMap<String, BTreeMap<String, TargetLibrary>>,
    #[serde(default)]
    project: Option<ProjectSection>,
}

#[derive(Debug, Default, Deserialize)]
struct TargetLibrary {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    compile: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectSection {
    #[serde(default)]
    frameworks: BTreeMap<String, FrameworkSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameworkSection {
    #[serde(default)]
    download_dependencies: Vec<DownloadDependency>,
}

#[derive(Debug, Deserialize)]
struct DownloadDependency {
    name: String,
    version: String,
}

/// `[8.0.0]` or `[8.0.0, 8.0.0]` to `8.0.0`
fn strip_version_range(version: &str) -> &str {
    version
        .trim_matches(|c| c == '[' || c == ']' || c == '(' || c == ')')
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
}

/// Collects dependencies from asset manifests
#[derive(Debug, Default)]
pub struct Assets {
    dependencies: DependencyContainer,
}

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one manifest's content into the collector
    pub fn add_json(&mut self, content: &str) -> Result<()> {
        let file: AssetsFile = serde_json::from_str(content)?;

        for (framework, libraries) in &file.targets {
            for (id, library) in libraries {
                if library.kind != "package" {
                    continue;
                }
                let Some((name, version)) = id.split_once('/') else {
                    debug!("Skipping malformed library id '{}' in {}", id, framework);
                    continue;
                };

                let compile: Vec<&String> = library
                    .compile
                    .iter()
                    .flat_map(|entries| entries.keys())
                    .collect();

                if compile.is_empty() {
                    self.dependencies.add_package_dir(name, version);
                    continue;
                }

                let mut used = false;
                for path in compile {
                    if path.ends_with(EMPTY_FOLDER_MARKER) {
                        continue;
                    }
                    self.dependencies.add_asset(name, version, path);
                    used = true;
                }
                if !used {
                    // Only placeholders: the package is referenced but ships nothing to compile against
                    self.dependencies.packages.insert(name.to_lowercase());
                }
            }
        }

        if let Some(project) = &file.project {
            for framework in project.frameworks.values() {
                for dependency in &framework.download_dependencies {
                    self.dependencies
                        .add_package_dir(&dependency.name, strip_version_range(&dependency.version));
                }
            }
        }

        Ok(())
    }

    /// Read a manifest from disk; failures are logged and skipped
    pub fn add_manifest(&mut self, path: &Path) -> bool {
        let result = fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|content| self.add_json(&content));
        match result {
            Ok(()) => {
                debug!("Read dependencies from {}", path.display());
                true
            }
            Err(e) => {
                warn!("Failed to read assets file {}: {}", path.display(), e);
                false
            }
        }
    }

    pub fn add_manifests<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            self.add_manifest(path.as_ref());
        }
    }

    pub fn dependencies(&self) -> &DependencyContainer {
        &self.dependencies
    }

    pub fn into_dependencies(self) -> DependencyContainer {
        self.dependencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
  "version": 3,
  "targets": {
    "net8.0": {
      "Newtonsoft.Json/13.0.3": {
        "type": "package",
        "compile": { "lib/net6.0/Newtonsoft.Json.dll": { "related": ".xml" } },
        "runtime": { "lib/net6.0/Newtonsoft.Json.dll": {} }
      },
      "Microsoft.CSharp/4.7.0": {
        "type": "package",
        "compile": { "ref/netstandard2.0/_._": {} }
      },
      "Humanizer.Core/2.14.1": {
        "type": "package"
      },
      "Shared.Lib/1.0.0": {
        "type": "project",
        "compile": { "bin/placeholder/Shared.Lib.dll": {} }
      }
    }
  },
  "project": {
    "frameworks": {
      "net8.0": {
        "downloadDependencies": [
          { "name": "Microsoft.AspNetCore.App.Ref", "version": "[8.0.4]" }
        ]
      }
    }
  }
}"#;

    #[test]
    fn test_manifest_packages_and_paths() {
        let mut assets = Assets::new();
        assets.add_json(MANIFEST).unwrap();
        let deps = assets.into_dependencies();

        let packages: Vec<&str> = deps.packages.iter().map(String::as_str).collect();
        assert_eq!(
            packages,
            vec![
                "humanizer.core",
                "microsoft.aspnetcore.app.ref",
                "microsoft.csharp",
                "newtonsoft.json"
            ]
        );
        assert!(deps.paths.contains("newtonsoft.json/13.0.3/lib/net6.0/Newtonsoft.Json.dll"));
        assert!(deps.paths.contains("humanizer.core/2.14.1"));
        assert!(deps.paths.contains("microsoft.aspnetcore.app.ref/8.0.4"));
        assert!(!deps.paths.iter().any(|p| p.starts_with("microsoft.csharp")));
        assert!(!deps.packages.contains("shared.lib"));
    }

    #[test]
    fn test_strip_version_range() {
        assert_eq!(strip_version_range("[8.0.4]"), "8.0.4");
        assert_eq!(strip_version_range("[8.0.4, 8.0.4]"), "8.0.4");
        assert_eq!(strip_version_range("1.2.3"), "1.2.3");
    }

    #[test]
    fn test_bad_manifest_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        std::fs::write(&good, MANIFEST).unwrap();
        std::fs::write(&bad, "{ not json").unwrap();

        let mut assets = Assets::new();
        assert!(!assets.add_manifest(&bad));
        assert!(!assets.add_manifest(&dir.path().join("missing.json")));
        assets.add_manifests([&good]);

        assert_eq!(assets.dependencies().packages.len(), 4);
    }
}
