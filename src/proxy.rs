// src/proxy.rs

//! Private registry proxy descriptor
//!
//! When a proxy is configured, feed probes are routed through it and the
//! package-manager tool inherits its address and trusted certificate. The
//! proxy's registry URLs are injected as explicit package sources.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const PROXY_HOST: &str = "DEPFETCH_PROXY_HOST";
pub const PROXY_PORT: &str = "DEPFETCH_PROXY_PORT";
pub const PROXY_CA_CERTIFICATE: &str = "DEPFETCH_PROXY_CA_CERTIFICATE";
pub const PROXY_URLS: &str = "DEPFETCH_PROXY_URLS";

/// Registry type that marks a NuGet feed in the proxy URL list
const NUGET_FEED_REGISTRY: &str = "nuget_feed";

#[derive(Debug, Deserialize)]
struct RegistryEntry {
    #[serde(rename = "type")]
    kind: String,
    url: String,
}

/// Address, certificate and registries of a package proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDescriptor {
    pub host: String,
    pub port: u16,
    /// PEM-encoded certificate the proxy presents
    pub certificate_pem: Option<String>,
    /// Private registry feeds served through the proxy
    pub registry_urls: Vec<String>,
}

impl ProxyDescriptor {
    /// Read the proxy descriptor from the process environment
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the proxy descriptor through a lookup function
    ///
    /// Returns `None` unless both host and port are set.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup(PROXY_HOST).filter(|h| !h.trim().is_empty());
        let port = lookup(PROXY_PORT).filter(|p| !p.trim().is_empty());
        let (Some(host), Some(port)) = (host, port) else {
            return Ok(None);
        };

        let port: u16 = port
            .trim()
            .parse()
            .map_err(|e| Error::ConfigError(format!("Invalid proxy port '{}': {}", port, e)))?;

        let certificate_pem = lookup(PROXY_CA_CERTIFICATE).filter(|c| !c.trim().is_empty());

        let registry_urls = match lookup(PROXY_URLS).filter(|u| !u.trim().is_empty()) {
            Some(raw) => parse_registry_urls(&raw)?,
            None => Vec::new(),
        };

        let proxy = Self {
            host: host.trim().to_string(),
            port,
            certificate_pem,
            registry_urls,
        };
        info!(
            "Using package proxy {} with {} private registr{}",
            proxy.address(),
            proxy.registry_urls.len(),
            if proxy.registry_urls.len() == 1 { "y" } else { "ies" }
        );
        Ok(Some(proxy))
    }

    /// Proxy address as an HTTP URL
    pub fn address(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Write the certificate to `dir` so child processes can trust it
    pub fn write_certificate(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let Some(pem) = &self.certificate_pem else {
            return Ok(None);
        };
        let path = dir.join("proxy.crt");
        fs::write(&path, pem).map_err(|e| {
            Error::IoError(format!(
                "Failed to write proxy certificate {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(path))
    }

    /// Configure an HTTP client builder to go through this proxy
    pub fn configure(
        &self,
        builder: reqwest::blocking::ClientBuilder,
    ) -> Result<reqwest::blocking::ClientBuilder> {
        let proxy = reqwest::Proxy::all(self.address())
            .map_err(|e| Error::InitError(format!("Invalid proxy address: {e}")))?;
        let mut builder = builder.proxy(proxy);

        if let Some(pem) = &self.certificate_pem {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| Error::InitError(format!("Failed to parse proxy certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        Ok(builder)
    }
}

fn parse_registry_urls(raw: &str) -> Result<Vec<String>> {
    let entries: Vec<RegistryEntry> = serde_json::from_str(raw)
        .map_err(|e| Error::ConfigError(format!("Invalid {} value: {}", PROXY_URLS, e)))?;

    let mut urls = Vec::new();
    for entry in entries {
        if entry.kind != NUGET_FEED_REGISTRY {
            continue;
        }
        let url = entry.url.trim().to_string();
        if url.is_empty() {
            warn!("Skipping empty proxy registry URL");
            continue;
        }
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    Ok(urls)
}
