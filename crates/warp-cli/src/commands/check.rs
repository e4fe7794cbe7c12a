use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use warp_core::{HandlerConfig, VfsConfig};
use warpgrid_vfs::config::build_loader;

use super::fetch::config_dir;
use crate::transport::HttpFetcher;

pub fn check(config: &str) -> anyhow::Result<()> {
    let config_path = Path::new(config);
    let parsed = VfsConfig::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    // Network handlers spawn onto the current runtime, so building needs one.
    let runtime = tokio::runtime::Runtime::new()?;
    let built = runtime.block_on(async {
        build_loader(&parsed, config_dir(config_path), Some(Arc::new(HttpFetcher)))
    })?;

    println!("✓ {} is valid", config_path.display());
    println!(
        "  Loader: sync timeout {}ms, max pending {}, retries {}",
        built.config.sync_timeout.as_millis(),
        built.config.max_pending,
        built.config.retries
    );
    println!("  Chain ({} handlers):", built.chain.len());
    for (idx, handler) in parsed.handlers.iter().enumerate() {
        println!("    {}. {}", idx + 1, describe(handler));
    }
    Ok(())
}

fn describe(handler: &HandlerConfig) -> String {
    match handler {
        HandlerConfig::Memory {
            scheme,
            blobs,
            files,
        } => format!(
            "memory  {scheme} ({} blobs)",
            blobs.len() + files.len()
        ),
        HandlerConfig::Asset { scheme, root } => format!(
            "asset   {} → {root}",
            scheme.as_deref().unwrap_or("asset://")
        ),
        HandlerConfig::File { root: Some(root) } => format!("file    file:// (sandboxed to {root})"),
        HandlerConfig::File { root: None } => "file    file://".to_string(),
        HandlerConfig::Network {
            schemes,
            timeout_ms,
        } => {
            let schemes = schemes
                .clone()
                .unwrap_or_else(|| vec!["http://".to_string(), "https://".to_string()]);
            let timeout = timeout_ms.unwrap_or(warp_core::config::DEFAULT_NETWORK_TIMEOUT_MS);
            format!("network {} (timeout {timeout}ms)", schemes.join(", "))
        }
    }
}
