// src/restore/mod.rs

//! Package restore engine
//!
//! [`PackageRestorer`] turns a [`SourceInventory`] into the set of
//! directories the compilation stage searches for binaries:
//!
//! 1. Optionally gate on feed reachability; when the gate fails, skip
//!    straight to recovering every referenced package from fallback feeds.
//! 2. Install packages.config packages with the legacy installer.
//! 3. Restore solutions, then the remaining projects.
//! 4. Recover referenced packages the previous steps did not produce.
//!
//! No step aborts the run. Failures are logged, counted in
//! [`RestoreStats`], and reduce what ends up in the result.

mod assets;
pub mod layout;
mod primary;
pub mod recovery;

pub use assets::Assets;
pub use primary::{PrimaryOutcome, PrimaryRestore};
pub use recovery::{MissingPackageRecovery, RecoveryOutcome};

use crate::config::RestoreConfig;
use crate::diagnostics::{DiagnosticsSink, RestoreStats};
use crate::error::{Error, Result};
use crate::feeds::{FeedDiscovery, FeedProber};
use crate::inventory::SourceInventory;
use crate::model::{AssemblyLookupLocation, DependencyContainer, LookupLocations, PackageSource};
use crate::proxy::ProxyDescriptor;
use crate::temp_dir::TemporaryDirectory;
use crate::tool::{LegacyInstaller, PackageTool};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Directories kept by [`PackageRestorer::persist`]
#[derive(Debug, Clone)]
pub struct PersistedDirectories {
    pub packages: PathBuf,
    pub legacy_packages: PathBuf,
    pub missing_packages: PathBuf,
}

/// Restores every package a source tree references
pub struct PackageRestorer {
    config: RestoreConfig,
    tool: Arc<dyn PackageTool>,
    legacy: Arc<dyn LegacyInstaller>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    proxy: Option<ProxyDescriptor>,
    prober: FeedProber,
    pool: ThreadPool,
    stats: RestoreStats,
    packages_dir: TemporaryDirectory,
    legacy_dir: TemporaryDirectory,
    missing_dir: TemporaryDirectory,
}

impl PackageRestorer {
    /// Create the restorer and its package directories under the scratch root
    pub fn new(
        config: RestoreConfig,
        tool: Arc<dyn PackageTool>,
        legacy: Arc<dyn LegacyInstaller>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        proxy: Option<ProxyDescriptor>,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("depfetch-worker-{i}"))
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create worker pool: {e}")))?;
        let prober = FeedProber::http(proxy.as_ref())?;

        let root = config.scratch_dir.as_path();
        let packages_dir = TemporaryDirectory::new_in(root, "packages", "package")?;
        let legacy_dir = TemporaryDirectory::new_in(root, "legacypackages", "legacy package")?;
        let missing_dir = TemporaryDirectory::new_in(root, "missingpackages", "missing package")?;

        info!(
            "Restoring with {} worker thread(s) into {}",
            config.threads,
            packages_dir.path().display()
        );

        Ok(Self {
            config,
            tool,
            legacy,
            diagnostics,
            proxy,
            prober,
            pool,
            stats: RestoreStats::new(),
            packages_dir,
            legacy_dir,
            missing_dir,
        })
    }

    /// Replace the feed prober, e.g. to avoid network access
    pub fn with_prober(mut self, prober: FeedProber) -> Self {
        self.prober = prober;
        self
    }

    pub fn stats(&self) -> &RestoreStats {
        &self.stats
    }

    pub fn packages_dir(&self) -> &Path {
        self.packages_dir.path()
    }

    pub fn legacy_packages_dir(&self) -> &Path {
        self.legacy_dir.path()
    }

    pub fn missing_packages_dir(&self) -> &Path {
        self.missing_dir.path()
    }

    /// Keep the package directories on disk after the restorer is gone
    pub fn persist(self) -> PersistedDirectories {
        PersistedDirectories {
            packages: self.packages_dir.persist(),
            legacy_packages: self.legacy_dir.persist(),
            missing_packages: self.missing_dir.persist(),
        }
    }

    fn discovery(&self) -> FeedDiscovery<'_> {
        FeedDiscovery::new(
            self.tool.as_ref(),
            &self.prober,
            &self.config,
            self.proxy.as_ref(),
            &self.pool,
        )
    }

    fn recovery(&self) -> MissingPackageRecovery<'_> {
        MissingPackageRecovery::new(
            self.tool.as_ref(),
            &self.pool,
            self.missing_dir.path(),
            &self.config.scratch_dir,
            &self.stats,
        )
    }

    /// Restore everything `inventory` references
    ///
    /// Never fails; the returned set holds whatever could be produced.
    pub fn restore(&self, inventory: &SourceInventory) -> LookupLocations {
        let mut locations = LookupLocations::new();
        let check = self.config.check_feed_responsiveness;
        info!("Checking NuGet feed responsiveness: {}", check);
        self.stats.record_flag("NuGet feed responsiveness checked", check);

        let mut configured_feeds: Option<BTreeSet<String>> = None;
        if check {
            let feed_check = self
                .discovery()
                .check_feeds(inventory, self.diagnostics.as_ref(), &self.stats);
            if !feed_check.all_reachable {
                if let Some(location) =
                    self.recover_from_fallback_feeds(inventory, &feed_check.feeds.explicit)
                {
                    locations.insert(location);
                }
                return locations;
            }
            configured_feeds = Some(feed_check.feeds.all);
        }

        locations.extend(self.install_legacy_packages(inventory));

        let extra_sources = self.proxy.as_ref().map(|proxy| {
            let mut sources = configured_feeds.clone().unwrap_or_default();
            sources.extend(proxy.registry_urls.iter().cloned());
            sources.into_iter().collect::<Vec<_>>()
        });
        let primary = PrimaryRestore::new(
            self.tool.as_ref(),
            &self.pool,
            self.packages_dir.path(),
            inventory.targets_windows(),
            &self.stats,
        );
        let outcome = primary.run(
            &inventory.solutions,
            &inventory.projects,
            extra_sources.as_deref(),
        );

        locations.extend(
            outcome
                .dependencies
                .paths
                .iter()
                .map(|relative| AssemblyLookupLocation::new(self.packages_dir.path().join(relative))),
        );

        let used = self.used_package_dir_names(&outcome.dependencies);
        let restored_legacy = layout::restored_legacy_package_names(self.legacy_dir.path());
        let pending = recovery::pending_packages(&inventory.packages, &used, &restored_legacy);
        let nuget_config = recovery::choose_nuget_config(
            &inventory.nuget_configs,
            inventory.root_nuget_config.as_deref(),
        );
        if let Some(location) = self
            .recovery()
            .recover(&pending, nuget_config.as_deref(), true)
        {
            locations.insert(AssemblyLookupLocation::new(location));
        }

        info!("Restore produced {} assembly lookup location(s)", locations.len());
        locations
    }

    /// Recover every referenced package from reachable fallback feeds
    fn recover_from_fallback_feeds(
        &self,
        inventory: &SourceInventory,
        configured_feeds: &BTreeSet<String>,
    ) -> Option<AssemblyLookupLocation> {
        let feeds = self
            .discovery()
            .reachable_fallback_feeds(Some(configured_feeds), &self.stats);
        if feeds.is_empty() {
            warn!("Skipping download of missing packages from specific feeds as no fallback NuGet feeds are reachable.");
            return None;
        }

        let pending = recovery::pending_packages(&inventory.packages, &BTreeSet::new(), &BTreeSet::new());
        if pending.is_empty() {
            info!("No missing packages to restore.");
            return None;
        }

        let config_dir = match TemporaryDirectory::new_in(
            &self.config.scratch_dir,
            "nugetconfig",
            "generated nuget config",
        ) {
            Ok(dir) => dir,
            Err(e) => {
                error!("Failed to create fallback nuget.config directory: {}", e);
                return None;
            }
        };
        let config = match recovery::write_fallback_config(&feeds, config_dir.path()) {
            Ok(path) => path,
            Err(e) => {
                error!("Failed to create fallback nuget.config: {}", e);
                return None;
            }
        };

        // config_dir stays alive until every package has been attempted
        self.recovery()
            .recover(&pending, Some(config.as_path()), false)
            .map(AssemblyLookupLocation::new)
    }

    fn install_legacy_packages(&self, inventory: &SourceInventory) -> Vec<AssemblyLookupLocation> {
        match self
            .legacy
            .install_all(&inventory.packages_configs, self.legacy_dir.path())
        {
            Ok(summary) => {
                if summary.package_config_count > 0 {
                    self.stats
                        .record("packages.config files", summary.package_config_count);
                    self.stats.record(
                        "Successfully restored packages.config files",
                        summary.success_count,
                    );
                }
            }
            Err(e) => {
                error!("Failed to restore NuGet packages with nuget.exe: {}", e);
                return Vec::new();
            }
        }

        layout::legacy_dlls(self.legacy_dir.path())
            .into_iter()
            .map(AssemblyLookupLocation::new)
            .collect()
    }

    /// Package directories on disk that some manifest references
    ///
    /// Unreferenced directories are only logged; nothing is deleted.
    fn used_package_dir_names(&self, dependencies: &DependencyContainer) -> BTreeSet<String> {
        let on_disk = layout::package_dir_names(self.packages_dir.path());
        info!("Restored {} packages", on_disk.len());
        info!(
            "Found {} packages in project.assets.json files",
            dependencies.packages.len()
        );

        let (used, unused): (BTreeSet<String>, BTreeSet<String>) = on_disk
            .into_iter()
            .partition(|name| dependencies.packages.contains(name));
        for name in &unused {
            debug!("Unused package: {}", name);
        }
        used
    }

    /// Restore a single package on demand and return its newest version folder
    pub fn try_restore(&self, package: &str) -> Option<PathBuf> {
        let outcome = self
            .recovery()
            .restore_package(package, PackageSource::SdkStyle, None, true);
        if outcome != RecoveryOutcome::Restored {
            return None;
        }

        let package_dir = layout::package_directory(package, self.missing_dir.path())?;
        Some(layout::newest_version_folder(&package_dir))
    }
}
