// src/feeds/mod.rs

//! Feed discovery and reachability gating
//!
//! Explicit feeds come from the nuget.config files found in the tree.
//! Inherited feeds are the effective feeds of the folders holding those
//! files (machine and user level configuration included); they are logged
//! and counted but never probed.

mod probe;

pub use probe::{FeedProber, FeedRequester, HttpFeedRequester, ProbeFailure};

use crate::config::{RestoreConfig, PUBLIC_NUGET_FEED};
use crate::diagnostics::{Diagnostic, DiagnosticsSink, RestoreStats};
use crate::error::Result;
use crate::inventory::SourceInventory;
use crate::proxy::ProxyDescriptor;
use crate::tool::PackageTool;
use rayon::prelude::*;
use rayon::ThreadPool;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, error, info, warn};

static ENABLED_FEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^E\s(.*)$").expect("valid regex"));

/// Feeds found in the tree, split by how they were discovered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredFeeds {
    /// Declared in a nuget.config inside the tree
    pub explicit: BTreeSet<String>,
    /// Effective feeds, explicit and inherited
    pub all: BTreeSet<String>,
}

impl DiscoveredFeeds {
    /// Feeds effective for the tree but not declared in it
    pub fn inherited(&self) -> BTreeSet<String> {
        self.all.difference(&self.explicit).cloned().collect()
    }
}

/// Result of the reachability gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCheck {
    pub all_reachable: bool,
    pub feeds: DiscoveredFeeds,
}

/// Extract enabled http(s) feed URLs from `nuget list source --format Short` output
pub fn parse_feed_lines<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut feeds = Vec::new();
    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        let Some(caps) = ENABLED_FEED.captures(line) else {
            error!("Failed to parse feed from '{}'", line);
            continue;
        };

        let url = caps[1].trim();
        let lower = url.to_lowercase();
        if !lower.starts_with("https://") && !lower.starts_with("http://") {
            info!("Skipping feed '{}' as it is not a valid URL.", url);
            continue;
        }
        feeds.push(url.to_string());
    }
    feeds
}

fn sorted_list(feeds: &BTreeSet<String>) -> String {
    feeds.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Enumerates feeds and decides which of them are usable
pub struct FeedDiscovery<'a> {
    tool: &'a dyn PackageTool,
    prober: &'a FeedProber,
    config: &'a RestoreConfig,
    proxy: Option<&'a ProxyDescriptor>,
    pool: &'a ThreadPool,
}

impl<'a> FeedDiscovery<'a> {
    pub fn new(
        tool: &'a dyn PackageTool,
        prober: &'a FeedProber,
        config: &'a RestoreConfig,
        proxy: Option<&'a ProxyDescriptor>,
        pool: &'a ThreadPool,
    ) -> Self {
        Self {
            tool,
            prober,
            config,
            proxy,
            pool,
        }
    }

    fn feeds_from(&self, what: &Path, listing: Result<Vec<String>>) -> Vec<String> {
        match listing {
            Ok(lines) => parse_feed_lines(lines),
            Err(e) => {
                warn!("Failed to list NuGet feeds for {}: {}", what.display(), e);
                Vec::new()
            }
        }
    }

    /// Collect explicit feeds and all effective feeds for the tree
    pub fn discover_feeds(&self, inventory: &SourceInventory) -> DiscoveredFeeds {
        let explicit: BTreeSet<String> = inventory
            .nuget_configs
            .iter()
            .flat_map(|config| self.feeds_from(config, self.tool.list_feeds(config)))
            .collect();

        if explicit.is_empty() {
            debug!("No NuGet feeds found in nuget.config files.");
        } else {
            info!(
                "Found {} NuGet feeds in nuget.config files: {}",
                explicit.len(),
                sorted_list(&explicit)
            );
        }

        let all: BTreeSet<String> = if inventory.nuget_configs.is_empty() {
            self.feeds_from(
                &inventory.source_dir,
                self.tool.list_feeds_in_folder(&inventory.source_dir),
            )
            .into_iter()
            .collect()
        } else {
            let folders: BTreeSet<&Path> = inventory
                .nuget_configs
                .iter()
                .filter_map(|config| {
                    let folder = config.parent();
                    if folder.is_none() {
                        warn!("Failed to get directory of '{}'", config.display());
                    }
                    folder
                })
                .collect();
            folders
                .into_iter()
                .flat_map(|folder| self.feeds_from(folder, self.tool.list_feeds_in_folder(folder)))
                .collect()
        };

        info!(
            "Found {} NuGet feeds (with inherited ones) in nuget.config files: {}",
            all.len(),
            sorted_list(&all)
        );

        DiscoveredFeeds { explicit, all }
    }

    /// Probe explicit and proxy-registry feeds; inherited feeds are only counted
    pub fn check_feeds(
        &self,
        inventory: &SourceInventory,
        diagnostics: &dyn DiagnosticsSink,
        stats: &RestoreStats,
    ) -> FeedCheck {
        let feeds = self.discover_feeds(inventory);

        let mut to_check = feeds.explicit.clone();
        if let Some(proxy) = self.proxy {
            to_check.extend(proxy.registry_urls.iter().cloned());
        }

        let all_reachable = self.check_specified_feeds(&to_check, diagnostics, stats);

        let inherited = feeds.inherited();
        if !inherited.is_empty() {
            info!(
                "Inherited NuGet feeds (not checked for reachability): {}",
                sorted_list(&inherited)
            );
            stats.record("Inherited NuGet feed count", inherited.len());
        }

        FeedCheck {
            all_reachable,
            feeds,
        }
    }

    /// Probe every feed in `feeds`, skipping excluded ones
    ///
    /// All feeds are probed even after one fails, so every unreachable feed
    /// shows up in the log.
    pub fn check_specified_feeds(
        &self,
        feeds: &BTreeSet<String>,
        diagnostics: &dyn DiagnosticsSink,
        stats: &RestoreStats,
    ) -> bool {
        info!("Checking that NuGet feeds are reachable...");

        let excluded: BTreeSet<&String> = self.config.excluded_feeds.iter().collect();
        if !excluded.is_empty() {
            info!(
                "Excluded NuGet feeds from responsiveness check: {}",
                excluded.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", ")
            );
        }

        let candidates: Vec<&String> = feeds.iter().filter(|f| !excluded.contains(f)).collect();
        let settings = self.config.probe;
        let verdicts: Vec<bool> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|feed| self.prober.is_reachable(feed, settings, true))
                .collect()
        });
        let all_reachable = verdicts.iter().all(|reachable| *reachable);

        if !all_reachable {
            warn!(
                "Found unreachable NuGet feed during dependency restore. This may cause missing dependencies in the analysis."
            );
            diagnostics.add_entry(Diagnostic::unreachable_feed());
        }
        stats.record_flag("All NuGet feeds reachable", all_reachable);

        all_reachable
    }

    /// Reachable fallback feeds, in candidate order
    ///
    /// Candidates are the configured fallback feeds, or the public registry
    /// (plus `configured` feeds unless disabled) when none are configured.
    pub fn reachable_fallback_feeds(
        &self,
        configured: Option<&BTreeSet<String>>,
        stats: &RestoreStats,
    ) -> Vec<String> {
        let mut candidates = self.config.fallback_feeds.clone();
        if candidates.is_empty() {
            candidates.push(PUBLIC_NUGET_FEED.to_string());
            info!(
                "No fallback NuGet feeds specified. Adding default feed: {}",
                PUBLIC_NUGET_FEED
            );

            let add_configured = self.config.add_config_feeds_to_fallback;
            info!("Adding feeds from nuget.config to fallback restore: {}", add_configured);

            if let Some(configured) = configured.filter(|c| add_configured && !c.is_empty()) {
                // Probed again: the fallback probe settings may differ from the primary ones
                for feed in configured {
                    if !candidates.contains(feed) {
                        candidates.push(feed.clone());
                    }
                }
                info!(
                    "Using NuGet feeds from nuget.config files as fallback feeds: {}",
                    sorted_list(configured)
                );
            }
        }

        info!(
            "Checking fallback NuGet feed reachability on feeds: {}",
            candidates.join(", ")
        );
        let settings = self.config.fallback_probe;
        let verdicts: Vec<bool> = self.pool.install(|| {
            candidates
                .par_iter()
                .map(|feed| self.prober.is_reachable(feed, settings, false))
                .collect()
        });

        let reachable: Vec<String> = candidates
            .into_iter()
            .zip(verdicts)
            .filter_map(|(feed, ok)| ok.then_some(feed))
            .collect();

        if reachable.is_empty() {
            warn!("No fallback NuGet feeds are reachable.");
        } else {
            info!("Reachable fallback NuGet feeds: {}", reachable.join(", "));
        }
        stats.record("Reachable fallback NuGet feed count", reachable.len());

        reachable
    }
}
