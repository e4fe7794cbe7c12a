//! `warp fetch` — resolve one URI through the configured chain.
//!
//! The request travels the same way a host runtime would drive it: a holder
//! object is created in an [`InMemoryHost`], the loader reads the request
//! from it and the result is written back across the boundary. What gets
//! printed is what the host observed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;
use warp_core::{HandlerConfig, VfsConfig};
use warpgrid_vfs::boundary::{InMemoryHost, ResourceHolder, status_to_code};
use warpgrid_vfs::config::build_loader;
use warpgrid_vfs::{FailureCause, MetaMap, RetCode, UriLoader};

use crate::OutputFormat;
use crate::transport::HttpFetcher;

pub struct FetchArgs {
    pub uri: String,
    pub config: String,
    pub headers: MetaMap,
    pub id: u32,
    pub sync: bool,
    pub format: OutputFormat,
    pub output: Option<String>,
}

pub fn fetch(args: FetchArgs) -> Result<()> {
    let config_path = Path::new(&args.config);
    let config = VfsConfig::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let base_dir = config_dir(config_path).to_path_buf();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(args, config, &base_dir))
}

/// Directory relative paths in a config file are resolved against.
pub(crate) fn config_dir(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Longest an async load may take: every handler finishes within the sync
/// timeout or its own network timeout.
fn completion_wait(config: &VfsConfig) -> Duration {
    let network = config
        .handlers
        .iter()
        .filter_map(|handler| match handler {
            HandlerConfig::Network { timeout_ms, .. } => {
                Some(timeout_ms.unwrap_or(warp_core::config::DEFAULT_NETWORK_TIMEOUT_MS))
            }
            _ => None,
        })
        .max()
        .unwrap_or(0);
    let longest = network.max(config.loader.sync_timeout_ms());
    Duration::from_millis(longest) + Duration::from_secs(1)
}

async fn run(args: FetchArgs, config: VfsConfig, base_dir: &Path) -> Result<()> {
    let built = build_loader(&config, base_dir, Some(Arc::new(HttpFetcher)))?;
    let loader = Arc::new(UriLoader::start(built.chain, built.config)?);
    let wait = completion_wait(&config);

    let host = Arc::new(InMemoryHost::new());
    let handle = host.create_holder(args.id, &args.uri, args.headers.clone());
    let holder = ResourceHolder::new(host.clone(), handle);
    let reader = ResourceHolder::new(host.clone(), handle);

    info!(
        request_id = args.id,
        uri = %args.uri,
        sync = args.sync,
        "fetching"
    );

    // Both paths block on the loader or the host, so they run off the runtime
    // threads that drive deferred handlers.
    let sync = args.sync;
    let request_id = args.id;
    let reason = tokio::task::spawn_blocking(move || -> Result<Option<String>> {
        if sync {
            let mut response = loader.load_sync(holder.to_request()?)?;
            holder.apply(&mut response)?;
            Ok(response.failure().map(|cause| match cause {
                FailureCause::Handler(reason) => reason.clone(),
                other => other.to_error(response.uri()).to_string(),
            }))
        } else {
            holder.load(&loader, false)?;
            if !host.wait_completed(handle, wait) {
                loader.cancel(request_id);
                bail!("request {request_id} did not complete within {}ms", wait.as_millis());
            }
            Ok(None)
        }
    })
    .await??;

    let status = reader.result_code()?;
    let headers = reader.response_meta()?;
    let content = reader.content()?;

    report(&args, status, &headers, &content, reason.as_deref())?;

    if status != RetCode::Success {
        bail!(
            "request {} for {} failed: {}",
            args.id,
            args.uri,
            reason.unwrap_or_else(|| format!("host result {status}"))
        );
    }
    Ok(())
}

fn report(
    args: &FetchArgs,
    status: RetCode,
    headers: &MetaMap,
    content: &[u8],
    reason: Option<&str>,
) -> Result<()> {
    if let Some(output) = &args.output {
        std::fs::write(output, content)
            .with_context(|| format!("failed to write {output}"))?;
    }

    match args.format {
        OutputFormat::Json => {
            let mut body = serde_json::json!({
                "request_id": args.id,
                "uri": args.uri,
                "status": status.to_string(),
                "result_code": status_to_code(status).ok(),
                "response_headers": headers,
                "size": content.len(),
            });
            if let Some(reason) = reason {
                body["error"] = serde_json::Value::from(reason);
            }
            if args.output.is_none() {
                body["content"] = serde_json::Value::from(String::from_utf8_lossy(content));
            }
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => {
            if status == RetCode::Success {
                eprintln!("✓ {} ({} bytes)", args.uri, content.len());
                for (key, value) in headers {
                    eprintln!("  {key}: {value}");
                }
                match &args.output {
                    Some(output) => eprintln!("  Output: {output}"),
                    None => {
                        use std::io::Write;
                        let mut stdout = std::io::stdout().lock();
                        stdout.write_all(content)?;
                        stdout.flush()?;
                    }
                }
            } else {
                eprintln!("✗ {}: {}", args.uri, reason.unwrap_or("failed"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &Path, uri: &str, sync: bool) -> FetchArgs {
        FetchArgs {
            uri: uri.to_string(),
            config: dir.join("vfs.toml").display().to_string(),
            headers: MetaMap::new(),
            id: 1,
            sync,
            format: OutputFormat::Json,
            output: Some(dir.join("out.bin").display().to_string()),
        }
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let config = VfsConfig::scaffold("assets");
        std::fs::write(dir.path().join("vfs.toml"), config.to_toml_string().unwrap()).unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/logo.txt"), b"logo").unwrap();
        dir
    }

    #[test]
    fn config_dir_defaults_to_cwd() {
        assert_eq!(config_dir(Path::new("vfs.toml")), Path::new("."));
        assert_eq!(config_dir(Path::new("a/vfs.toml")), Path::new("a"));
    }

    #[test]
    fn sync_fetch_writes_content() {
        let dir = project();
        fetch(args(dir.path(), "mem://hello.txt", true)).unwrap();
        let written = std::fs::read(dir.path().join("out.bin")).unwrap();
        assert_eq!(written, b"hello from warp\n");
    }

    #[test]
    fn async_fetch_serves_assets() {
        let dir = project();
        fetch(args(dir.path(), "asset://logo.txt", false)).unwrap();
        let written = std::fs::read(dir.path().join("out.bin")).unwrap();
        assert_eq!(written, b"logo");
    }

    #[test]
    fn failed_request_is_an_error() {
        let dir = project();
        let err = fetch(args(dir.path(), "asset://missing.txt", true)).unwrap_err();
        assert!(err.to_string().contains("failed"), "{err}");
    }

    #[test]
    fn async_failure_reads_failed_from_host() {
        let dir = project();
        let err = fetch(args(dir.path(), "asset://missing.txt", false)).unwrap_err();
        assert!(err.to_string().contains("host result failed"), "{err}");
    }

    #[test]
    fn completion_wait_covers_slowest_handler() {
        let mut config = VfsConfig::scaffold("assets");
        assert_eq!(completion_wait(&config), Duration::from_millis(6_000));

        config.handlers.push(HandlerConfig::Network {
            schemes: None,
            timeout_ms: Some(30_000),
        });
        assert_eq!(completion_wait(&config), Duration::from_millis(31_000));
    }

    #[test]
    fn missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(fetch(args(dir.path(), "mem://hello.txt", true)).is_err());
    }
}
