// src/config.rs

//! Environment-style restore options
//!
//! Every option can be read from the process environment or from any
//! lookup function, which keeps tests away from global state.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const CHECK_FEED_RESPONSIVENESS: &str = "DEPFETCH_CHECK_FEED_RESPONSIVENESS";
pub const FALLBACK_FEEDS: &str = "DEPFETCH_FALLBACK_FEEDS";
pub const ADD_CONFIG_FEEDS_TO_FALLBACK: &str = "DEPFETCH_ADD_CONFIG_FEEDS_TO_FALLBACK";
pub const EXCLUDED_FEEDS: &str = "DEPFETCH_EXCLUDED_FEEDS";
pub const FEED_TIMEOUT_MS: &str = "DEPFETCH_FEED_TIMEOUT_MS";
pub const FEED_TRY_COUNT: &str = "DEPFETCH_FEED_TRY_COUNT";
pub const FALLBACK_FEED_TIMEOUT_MS: &str = "DEPFETCH_FALLBACK_FEED_TIMEOUT_MS";
pub const FALLBACK_FEED_TRY_COUNT: &str = "DEPFETCH_FALLBACK_FEED_TRY_COUNT";
pub const THREADS: &str = "DEPFETCH_THREADS";
pub const SCRATCH_DIR: &str = "DEPFETCH_SCRATCH_DIR";
pub const DOTNET: &str = "DEPFETCH_DOTNET";
pub const NUGET: &str = "DEPFETCH_NUGET";
pub const COMMAND_TIMEOUT_SECS: &str = "DEPFETCH_COMMAND_TIMEOUT_SECS";

/// Public registry used when no fallback feeds are configured
pub const PUBLIC_NUGET_FEED: &str = "https://api.nuget.org/v3/index.json";

const DEFAULT_FEED_TIMEOUT_MS: u64 = 1000;
const DEFAULT_FEED_TRY_COUNT: u32 = 4;
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Initial deadline and attempt count for one reachability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub initial_timeout: Duration,
    pub try_count: u32,
}

/// Options controlling a restore pass
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Gate the restore on explicit feeds being reachable
    pub check_feed_responsiveness: bool,
    /// Fallback feeds from the environment (empty means "use the public registry")
    pub fallback_feeds: Vec<String>,
    /// Union feeds seen in nuget.config files into the default fallback list
    pub add_config_feeds_to_fallback: bool,
    /// Feeds skipped by the reachability check
    pub excluded_feeds: Vec<String>,
    pub probe: ProbeSettings,
    pub fallback_probe: ProbeSettings,
    /// Worker pool size for project restore and package recovery
    pub threads: usize,
    /// Root for temporary package directories and scaffolds
    pub scratch_dir: PathBuf,
    pub dotnet: PathBuf,
    pub nuget: PathBuf,
    /// Deadline for a single external tool invocation
    pub command_timeout: Duration,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        let probe = ProbeSettings {
            initial_timeout: Duration::from_millis(DEFAULT_FEED_TIMEOUT_MS),
            try_count: DEFAULT_FEED_TRY_COUNT,
        };
        Self {
            check_feed_responsiveness: true,
            fallback_feeds: Vec::new(),
            add_config_feeds_to_fallback: true,
            excluded_feeds: Vec::new(),
            probe,
            fallback_probe: probe,
            threads: default_threads(),
            scratch_dir: std::env::temp_dir(),
            dotnet: PathBuf::from("dotnet"),
            nuget: PathBuf::from("nuget"),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl RestoreConfig {
    /// Read options from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read options through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let probe = ProbeSettings {
            initial_timeout: Duration::from_millis(
                parse_number(&lookup, FEED_TIMEOUT_MS).unwrap_or(DEFAULT_FEED_TIMEOUT_MS),
            ),
            try_count: parse_number(&lookup, FEED_TRY_COUNT).unwrap_or(DEFAULT_FEED_TRY_COUNT),
        };
        let fallback_probe = ProbeSettings {
            initial_timeout: parse_number(&lookup, FALLBACK_FEED_TIMEOUT_MS)
                .map(Duration::from_millis)
                .unwrap_or(probe.initial_timeout),
            try_count: parse_number(&lookup, FALLBACK_FEED_TRY_COUNT).unwrap_or(probe.try_count),
        };
        debug!(
            "Feed probe settings: {:?} x{} (fallback {:?} x{})",
            probe.initial_timeout,
            probe.try_count,
            fallback_probe.initial_timeout,
            fallback_probe.try_count
        );

        Self {
            check_feed_responsiveness: parse_bool(&lookup, CHECK_FEED_RESPONSIVENESS)
                .unwrap_or(true),
            fallback_feeds: parse_urls(&lookup, FALLBACK_FEEDS),
            add_config_feeds_to_fallback: parse_bool(&lookup, ADD_CONFIG_FEEDS_TO_FALLBACK)
                .unwrap_or(true),
            excluded_feeds: parse_urls(&lookup, EXCLUDED_FEEDS),
            probe,
            fallback_probe,
            threads: parse_number::<usize, _>(&lookup, THREADS)
                .filter(|n| *n > 0)
                .unwrap_or(defaults.threads),
            scratch_dir: lookup(SCRATCH_DIR)
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            dotnet: lookup(DOTNET)
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.dotnet),
            nuget: lookup(NUGET)
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.nuget),
            command_timeout: parse_number(&lookup, COMMAND_TIMEOUT_SECS)
                .map(Duration::from_secs)
                .unwrap_or(defaults.command_timeout),
        }
    }

    /// Set the worker pool size
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Set the scratch directory root
    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Enable or disable the reachability gate
    pub fn with_feed_check(mut self, enabled: bool) -> Self {
        self.check_feed_responsiveness = enabled;
        self
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Parse a boolean option, warning on unrecognized values
fn parse_bool<F>(lookup: &F, name: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        "" => None,
        other => {
            warn!("Ignoring unrecognized boolean value '{}' for {}", other, name);
            None
        }
    }
}

/// Parse an unsigned option; out-of-range values are rejected, not truncated
fn parse_number<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Ignoring invalid numeric value '{}' for {}", raw, name);
            None
        }
    }
}

/// Parse a whitespace-separated URL list, dropping invalid entries
fn parse_urls<F>(lookup: &F, name: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Vec::new();
    };

    let mut urls = Vec::new();
    for candidate in raw.split_whitespace() {
        match url::Url::parse(candidate) {
            Ok(_) => {
                if !urls.iter().any(|u| u == candidate) {
                    urls.push(candidate.to_string());
                }
            }
            Err(e) => warn!("Ignoring invalid URL '{}' in {}: {}", candidate, name, e),
        }
    }
    urls
}
