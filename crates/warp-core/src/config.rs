//! vfs.toml configuration parser.
//!
//! Describes the loader limits and the handler chain. Handlers are listed as
//! `[[handlers]]` tables and appear in the chain in file order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::bail;

/// Default time a synchronous load waits for a deferred handler.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 5_000;
/// Default bound on concurrently pending requests per loader.
pub const DEFAULT_MAX_PENDING: usize = 1_024;
/// Default per-request timeout for network handlers.
pub const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VfsConfig {
    #[serde(default)]
    pub loader: LoaderSection,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pending: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HandlerConfig {
    /// In-memory blobs served under a scheme prefix.
    Memory {
        scheme: String,
        /// key → inline UTF-8 content
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        blobs: BTreeMap<String, String>,
        /// key → path of a file preloaded into memory when the chain is built
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        files: BTreeMap<String, String>,
    },
    /// Bundled assets resolved below a root directory.
    Asset {
        #[serde(skip_serializing_if = "Option::is_none")]
        scheme: Option<String>,
        root: String,
    },
    /// `file://` URIs, optionally sandboxed to a root directory.
    File {
        #[serde(skip_serializing_if = "Option::is_none")]
        root: Option<String>,
    },
    /// Network URIs, fetched through a caller-supplied transport.
    Network {
        #[serde(skip_serializing_if = "Option::is_none")]
        schemes: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
}

impl HandlerConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerConfig::Memory { .. } => "memory",
            HandlerConfig::Asset { .. } => "asset",
            HandlerConfig::File { .. } => "file",
            HandlerConfig::Network { .. } => "network",
        }
    }
}

impl LoaderSection {
    pub fn sync_timeout_ms(&self) -> u64 {
        self.sync_timeout_ms.unwrap_or(DEFAULT_SYNC_TIMEOUT_MS)
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending.unwrap_or(DEFAULT_MAX_PENDING)
    }

    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(0)
    }
}

impl VfsConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: VfsConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations that would build a chain with unusable handlers.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.loader.sync_timeout_ms == Some(0) {
            bail!("loader.sync_timeout_ms must be greater than zero");
        }
        if self.loader.max_pending == Some(0) {
            bail!("loader.max_pending must be greater than zero");
        }

        for (idx, handler) in self.handlers.iter().enumerate() {
            match handler {
                HandlerConfig::Memory { scheme, .. } => check_scheme(idx, scheme)?,
                HandlerConfig::Asset { scheme, root } => {
                    if let Some(scheme) = scheme {
                        check_scheme(idx, scheme)?;
                    }
                    if root.is_empty() {
                        bail!("handlers[{idx}] (asset): root must not be empty");
                    }
                }
                HandlerConfig::File { .. } => {}
                HandlerConfig::Network {
                    schemes,
                    timeout_ms,
                } => {
                    if let Some(schemes) = schemes {
                        if schemes.is_empty() {
                            bail!("handlers[{idx}] (network): schemes must not be empty");
                        }
                        for scheme in schemes {
                            check_scheme(idx, scheme)?;
                        }
                    }
                    if *timeout_ms == Some(0) {
                        bail!("handlers[{idx}] (network): timeout_ms must be greater than zero");
                    }
                }
            }
        }
        Ok(())
    }

    /// Scaffold a vfs.toml with one handler of each local kind.
    pub fn scaffold(asset_root: &str) -> Self {
        VfsConfig {
            loader: LoaderSection {
                sync_timeout_ms: Some(DEFAULT_SYNC_TIMEOUT_MS),
                max_pending: Some(DEFAULT_MAX_PENDING),
                retries: Some(0),
            },
            handlers: vec![
                HandlerConfig::Memory {
                    scheme: "mem://".to_string(),
                    blobs: BTreeMap::from([(
                        "hello.txt".to_string(),
                        "hello from warp\n".to_string(),
                    )]),
                    files: BTreeMap::new(),
                },
                HandlerConfig::Asset {
                    scheme: Some("asset://".to_string()),
                    root: asset_root.to_string(),
                },
                HandlerConfig::File { root: None },
            ],
        }
    }
}

fn check_scheme(idx: usize, scheme: &str) -> anyhow::Result<()> {
    match scheme.strip_suffix("://") {
        Some(name) if !name.is_empty() => Ok(()),
        _ => bail!("handlers[{idx}]: scheme {scheme:?} must look like \"name://\""),
    }
}
