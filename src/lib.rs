// src/lib.rs

//! depfetch: NuGet dependency restore for source analysis
//!
//! Materializes every package a .NET source tree references on local disk
//! so that a later compilation stage can resolve its references.
//!
//! # Architecture
//!
//! - Inventory: solutions, projects, nuget.config and packages.config files
//! - Feeds: explicit and inherited feed discovery with a reachability gate
//! - Primary restore: solutions in order, project groups on a worker pool
//! - Recovery: one scaffold project per missing package, with version and
//!   feed fallbacks
//! - Output: a deduplicated set of assembly lookup locations

pub mod config;
pub mod diagnostics;
mod error;
pub mod feeds;
pub mod inventory;
pub mod model;
pub mod proxy;
pub mod restore;
pub mod temp_dir;
pub mod tool;

pub use config::{ProbeSettings, RestoreConfig};
pub use diagnostics::{
    Diagnostic, DiagnosticsSink, JsonDiagnosticsWriter, NullDiagnostics, RestoreStats, Severity,
};
pub use error::{Error, Result};
pub use feeds::{DiscoveredFeeds, FeedDiscovery, FeedProber, FeedRequester, ProbeFailure};
pub use inventory::SourceInventory;
pub use model::{
    AssemblyLookupLocation, DependencyContainer, LookupLocations, PackageReference, PackageSource,
    RestoreResult,
};
pub use proxy::ProxyDescriptor;
pub use restore::{PackageRestorer, PersistedDirectories};
pub use temp_dir::TemporaryDirectory;
pub use tool::{
    DotnetCli, LegacyInstallSummary, LegacyInstaller, NoLegacyInstaller, NugetCli, PackageTool,
    RestoreSettings,
};
