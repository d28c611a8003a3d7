// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use depfetch::{
    DiagnosticsSink, DotnetCli, JsonDiagnosticsWriter, LegacyInstaller, NoLegacyInstaller,
    NugetCli, NullDiagnostics, PackageRestorer, ProxyDescriptor, RestoreConfig, SourceInventory,
    TemporaryDirectory,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "depfetch")]
#[command(author, version, about = "Restore every NuGet package a source tree references", long_about = None)]
struct Cli {
    /// Source tree to restore
    #[arg(short, long, default_value = ".")]
    source: PathBuf,

    /// Worker threads for project restore and package recovery
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Root directory for package output and scaffold projects
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Append diagnostics as JSON lines to this file
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    /// Path or name of the dotnet executable
    #[arg(long)]
    dotnet: Option<PathBuf>,

    /// Path or name of the nuget executable
    #[arg(long)]
    nuget: Option<PathBuf>,

    /// Remove the package directories before exiting
    ///
    /// By default they are kept so the printed locations stay valid.
    #[arg(long)]
    cleanup: bool,

    /// Skip the feed reachability check
    #[arg(long)]
    no_feed_check: bool,

    /// Additionally restore this package on its own (repeatable)
    #[arg(long = "package", value_name = "NAME")]
    packages: Vec<String>,
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = RestoreConfig::from_env();
    if let Some(threads) = cli.threads {
        config = config.with_threads(threads);
    }
    if let Some(dir) = cli.scratch_dir {
        config = config.with_scratch_dir(dir);
    }
    if let Some(dotnet) = cli.dotnet {
        config.dotnet = dotnet;
    }
    if let Some(nuget) = cli.nuget {
        config.nuget = nuget;
    }
    if cli.no_feed_check {
        config = config.with_feed_check(false);
    }

    let proxy = ProxyDescriptor::from_env().context("Failed to read proxy settings")?;

    let mut dotnet = DotnetCli::new(&config.dotnet, config.command_timeout);
    // Holds the proxy certificate for the lifetime of every tool invocation
    let _proxy_dir = match &proxy {
        Some(proxy) => {
            let dir = TemporaryDirectory::new_in(&config.scratch_dir, "proxy", "proxy certificate")?;
            let certificate = proxy.write_certificate(dir.path())?;
            dotnet = dotnet.with_proxy(proxy, certificate.as_deref());
            Some(dir)
        }
        None => None,
    };

    let legacy: Arc<dyn LegacyInstaller> = match NugetCli::locate(&config.nuget, config.command_timeout) {
        Ok(nuget) => Arc::new(nuget),
        Err(e) => {
            warn!("Legacy packages.config restore disabled: {}", e);
            Arc::new(NoLegacyInstaller)
        }
    };

    let diagnostics: Arc<dyn DiagnosticsSink> = match &cli.diagnostics {
        Some(path) => Arc::new(JsonDiagnosticsWriter::create(path)?),
        None => Arc::new(NullDiagnostics),
    };

    let source = cli
        .source
        .canonicalize()
        .with_context(|| format!("Cannot access source directory {}", cli.source.display()))?;
    info!("Scanning source tree {}", source.display());
    let inventory = SourceInventory::scan(&source)?;

    let restorer = PackageRestorer::new(config, Arc::new(dotnet), legacy, diagnostics, proxy)?;
    let locations = restorer.restore(&inventory);

    for package in &cli.packages {
        match restorer.try_restore(package) {
            Some(folder) => info!("Restored {} into {}", package, folder.display()),
            None => warn!("Could not restore {}", package),
        }
    }

    for (key, value) in restorer.stats().entries() {
        info!("{}: {}", key, value);
    }

    for location in &locations {
        println!("{}", location);
    }

    if cli.cleanup {
        info!("Removing package directories");
        drop(restorer);
    } else {
        let kept = restorer.persist();
        info!(
            "Kept package directories: {}, {}, {}",
            kept.packages.display(),
            kept.legacy_packages.display(),
            kept.missing_packages.display()
        );
    }

    Ok(())
}
