// src/model.rs

//! Core data types shared by the restore components
//!
//! Package names are normalized to lowercase on construction so that every
//! set and map in the crate compares them case-insensitively.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Where a package reference was declared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageSource {
    /// `<PackageReference>` in an SDK-style project file
    SdkStyle,
    /// `<package>` entry in a legacy `packages.config`
    LegacyConfig,
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSource::SdkStyle => write!(f, "sdk"),
            PackageSource::LegacyConfig => write!(f, "packages.config"),
        }
    }
}

/// A package referenced somewhere in the source tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageReference {
    name: String,
    source: PackageSource,
}

impl PackageReference {
    pub fn new(name: impl AsRef<str>, source: PackageSource) -> Self {
        Self {
            name: name.as_ref().to_lowercase(),
            source,
        }
    }

    /// Lowercased package name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> PackageSource {
        self.source
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.source)
    }
}

/// Package names and asset paths resolved by one or more restore invocations
///
/// Paths are relative to the package output directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyContainer {
    pub packages: BTreeSet<String>,
    pub paths: BTreeSet<String>,
}

impl DependencyContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a whole package directory (`name/version`)
    pub fn add_package_dir(&mut self, name: &str, version: &str) {
        let name = name.to_lowercase();
        self.paths.insert(format!("{}/{}", name, version.to_lowercase()));
        self.packages.insert(name);
    }

    /// Record a single asset inside a package (`name/version/relative`)
    pub fn add_asset(&mut self, name: &str, version: &str, relative: &str) {
        let name = name.to_lowercase();
        // Files inside a package keep their on-disk case
        self.paths.insert(format!(
            "{}/{}/{}",
            name,
            version.to_lowercase(),
            relative.trim_start_matches('/')
        ));
        self.packages.insert(name);
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.paths.is_empty()
    }

    /// Union another container into this one
    pub fn extend(&mut self, other: DependencyContainer) {
        self.packages.extend(other.packages);
        self.paths.extend(other.paths);
    }

    /// Union many containers into one
    pub fn merge<I>(containers: I) -> DependencyContainer
    where
        I: IntoIterator<Item = DependencyContainer>,
    {
        containers
            .into_iter()
            .fold(DependencyContainer::new(), |mut acc, c| {
                acc.extend(c);
                acc
            })
    }
}

/// Outcome of one invocation of the external restore tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreResult {
    pub success: bool,
    pub has_feed_source_error: bool,
    pub has_no_stable_version_error: bool,
    pub restored_projects: Vec<String>,
    pub asset_manifests: Vec<String>,
}

impl RestoreResult {
    /// A failed invocation that produced nothing
    pub fn failed() -> Self {
        Self::default()
    }
}

/// A path the downstream compilation stage searches for binaries
///
/// Equality and ordering ignore case.
#[derive(Debug, Clone)]
pub struct AssemblyLookupLocation {
    path: PathBuf,
    key: String,
}

impl AssemblyLookupLocation {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = path.to_string_lossy().to_lowercase();
        Self { path, key }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PartialEq for AssemblyLookupLocation {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for AssemblyLookupLocation {}

impl Hash for AssemblyLookupLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for AssemblyLookupLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AssemblyLookupLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for AssemblyLookupLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// The deduplicated set of lookup locations produced by a restore pass
pub type LookupLocations = BTreeSet<AssemblyLookupLocation>;
