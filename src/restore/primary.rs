// src/restore/primary.rs

//! Primary restore pass
//!
//! Solutions are restored one after another since the tool already
//! parallelizes inside a solution. Projects not covered by a solution are
//! grouped by directory; groups run on the worker pool, projects inside a
//! group run in order because they share intermediate output folders.

use super::assets::Assets;
use crate::diagnostics::RestoreStats;
use crate::model::{DependencyContainer, RestoreResult};
use crate::tool::{PackageTool, RestoreSettings};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::info;

/// What one solution, or one group of projects, produced
#[derive(Debug, Default)]
struct UnitRecord {
    success_count: usize,
    feed_error_count: usize,
    restored_projects: Vec<String>,
    dependencies: DependencyContainer,
}

impl UnitRecord {
    fn count(&mut self, result: &RestoreResult) {
        if result.success {
            self.success_count += 1;
        }
        if result.has_feed_source_error {
            self.feed_error_count += 1;
        }
    }
}

/// Output of the primary pass
#[derive(Debug, Default)]
pub struct PrimaryOutcome {
    /// Projects the tool reported as restored through a solution
    pub restored_projects: BTreeSet<String>,
    pub dependencies: DependencyContainer,
}

/// Drives the package tool over solutions and loose projects
pub struct PrimaryRestore<'a> {
    tool: &'a dyn PackageTool,
    pool: &'a ThreadPool,
    packages_dir: &'a Path,
    target_windows: bool,
    stats: &'a RestoreStats,
}

impl<'a> PrimaryRestore<'a> {
    pub fn new(
        tool: &'a dyn PackageTool,
        pool: &'a ThreadPool,
        packages_dir: &'a Path,
        target_windows: bool,
        stats: &'a RestoreStats,
    ) -> Self {
        Self {
            tool,
            pool,
            packages_dir,
            target_windows,
            stats,
        }
    }

    fn settings(&self, target: &Path, extra_sources: Option<&[String]>) -> RestoreSettings {
        let mut settings = RestoreSettings::new(target, self.packages_dir);
        settings.force_ref_assembly_fetch = true;
        settings.target_windows = self.target_windows;
        settings.extra_sources = extra_sources.map(<[String]>::to_vec);
        settings
    }

    /// Restore solutions, then the projects no solution covered
    pub fn run(
        &self,
        solutions: &[PathBuf],
        projects: &[PathBuf],
        extra_sources: Option<&[String]>,
    ) -> PrimaryOutcome {
        let (restored_projects, solution_dependencies) = self.restore_solutions(solutions);

        let covered: BTreeSet<String> = restored_projects
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        let remaining: Vec<PathBuf> = projects
            .iter()
            .filter(|p| !covered.contains(&p.to_string_lossy().to_lowercase()))
            .cloned()
            .collect();

        let project_dependencies = self.restore_projects(&remaining, extra_sources);

        PrimaryOutcome {
            restored_projects,
            dependencies: DependencyContainer::merge([solution_dependencies, project_dependencies]),
        }
    }

    pub fn restore_solutions(&self, solutions: &[PathBuf]) -> (BTreeSet<String>, DependencyContainer) {
        let mut record = UnitRecord::default();
        let mut assets = Assets::new();

        for solution in solutions {
            info!("Restoring solution {}...", solution.display());
            let result = self.tool.restore(&self.settings(solution, None));
            record.count(&result);
            assets.add_manifests(&result.asset_manifests);
            record.restored_projects.extend(result.restored_projects);
        }

        let restored: BTreeSet<String> = record.restored_projects.into_iter().collect();
        self.stats
            .record("Successfully restored solution files", record.success_count);
        self.stats.record(
            "Failed solution restore with package source error",
            record.feed_error_count,
        );
        self.stats
            .record("Restored projects through solution files", restored.len());

        (restored, assets.into_dependencies())
    }

    pub fn restore_projects(
        &self,
        projects: &[PathBuf],
        extra_sources: Option<&[String]>,
    ) -> DependencyContainer {
        let mut groups: BTreeMap<PathBuf, Vec<&PathBuf>> = BTreeMap::new();
        for project in projects {
            let dir = project.parent().map(Path::to_path_buf).unwrap_or_default();
            groups.entry(dir).or_default().push(project);
        }
        let groups: Vec<Vec<&PathBuf>> = groups.into_values().collect();

        let records: Vec<UnitRecord> = self.pool.install(|| {
            groups
                .par_iter()
                .map(|group| {
                    let mut record = UnitRecord::default();
                    let mut assets = Assets::new();
                    for project in group {
                        info!("Restoring project {}...", project.display());
                        let result = self.tool.restore(&self.settings(project, extra_sources));
                        record.count(&result);
                        assets.add_manifests(&result.asset_manifests);
                    }
                    record.dependencies = assets.into_dependencies();
                    record
                })
                .collect()
        });

        let success_count: usize = records.iter().map(|r| r.success_count).sum();
        let feed_error_count: usize = records.iter().map(|r| r.feed_error_count).sum();
        self.stats
            .record("Successfully restored project files", success_count);
        self.stats.record(
            "Failed project restore with package source error",
            feed_error_count,
        );

        DependencyContainer::merge(records.into_iter().map(|r| r.dependencies))
    }
}
