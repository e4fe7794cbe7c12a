//! Build a handler chain from a parsed `vfs.toml`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use warp_core::{HandlerConfig, VfsConfig};

use crate::chain::HandlerChain;
use crate::error::{VfsError, VfsResult};
use crate::handlers::{
    AssetHandler, BlobMap, Fetcher, FileHandler, MemoryBlobHandler, NetworkHandler,
};
use crate::loader::LoaderConfig;

/// Chain and loader settings described by a config file.
pub struct BuiltLoader {
    pub chain: HandlerChain,
    pub config: LoaderConfig,
}

/// Turn `config` into a chain in file order.
///
/// `network` handlers need `fetcher` and a running tokio runtime; relative
/// roots are resolved against `base_dir`.
pub fn build_chain(
    config: &VfsConfig,
    base_dir: &Path,
    fetcher: Option<Arc<dyn Fetcher>>,
) -> VfsResult<HandlerChain> {
    let mut builder = HandlerChain::builder();

    for (idx, handler) in config.handlers.iter().enumerate() {
        builder = match handler {
            HandlerConfig::Memory {
                scheme,
                blobs,
                files,
            } => {
                let mut map = BlobMap::builder();
                for (key, text) in blobs {
                    map = map.with_text(key, text);
                }
                for (key, file) in files {
                    let path = base_dir.join(file);
                    let content = std::fs::read(&path).map_err(|e| {
                        VfsError::Config(format!(
                            "handlers[{idx}] (memory): cannot preload {}: {e}",
                            path.display()
                        ))
                    })?;
                    map = map.with_blob(key, &content);
                }
                builder.with_handler(MemoryBlobHandler::new(scheme.clone(), map.build()))
            }
            HandlerConfig::Asset { scheme, root } => {
                let root = base_dir.join(root);
                let handler = match scheme {
                    Some(scheme) => AssetHandler::with_scheme(scheme.clone(), root),
                    None => AssetHandler::new(root),
                };
                builder.with_handler(handler)
            }
            HandlerConfig::File { root } => match root {
                Some(root) => {
                    let root = std::path::absolute(base_dir.join(root)).map_err(|e| {
                        VfsError::Config(format!("handlers[{idx}] (file): bad root {root}: {e}"))
                    })?;
                    builder.with_handler(FileHandler::sandboxed(root))
                }
                None => builder.with_handler(FileHandler::new()),
            },
            HandlerConfig::Network {
                schemes,
                timeout_ms,
            } => {
                let fetcher = fetcher.clone().ok_or_else(|| {
                    VfsError::Config(format!("handlers[{idx}] (network): no fetcher available"))
                })?;
                let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                    VfsError::Config(format!("handlers[{idx}] (network): {e}"))
                })?;
                let mut handler = NetworkHandler::new(fetcher, runtime);
                if let Some(schemes) = schemes {
                    handler = handler.with_schemes(schemes.clone());
                }
                if let Some(ms) = timeout_ms {
                    handler = handler.with_timeout(Duration::from_millis(*ms));
                }
                builder.with_handler(handler)
            }
        };
    }

    let chain = builder.build();
    tracing::debug!(handlers = ?chain.names(), "handler chain built from config");
    Ok(chain)
}

/// Validate `config` and build both the chain and the loader settings.
pub fn build_loader(
    config: &VfsConfig,
    base_dir: &Path,
    fetcher: Option<Arc<dyn Fetcher>>,
) -> VfsResult<BuiltLoader> {
    config
        .validate()
        .map_err(|e| VfsError::Config(format!("{e:#}")))?;
    Ok(BuiltLoader {
        chain: build_chain(config, base_dir, fetcher)?,
        config: LoaderConfig::from_section(&config.loader),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{MetaMap, RetCode};
    use crate::handlers::{FetchFuture, FetchResponse};
    use crate::loader::{LoadRequest, UriLoader};

    struct Echo;

    impl Fetcher for Echo {
        fn fetch(&self, uri: String, _headers: MetaMap) -> FetchFuture {
            Box::pin(async move { Ok(FetchResponse::ok(uri.into_bytes())) })
        }
    }

    const CONFIG: &str = r#"
[loader]
sync_timeout_ms = 2000
retries = 1

[[handlers]]
kind = "memory"
scheme = "mem://"
[handlers.blobs]
"hello.txt" = "hello world"

[[handlers]]
kind = "memory"
scheme = "mem://"
[handlers.files]
"preloaded.txt" = "data/preloaded.txt"

[[handlers]]
kind = "asset"
root = "assets"

[[handlers]]
kind = "file"
"#;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/preloaded.txt"), b"preloaded").unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/logo.png"), b"png").unwrap();
        dir
    }

    #[test]
    fn config_builds_chain_in_file_order() {
        let dir = fixture();
        let config = VfsConfig::from_toml_str(CONFIG).unwrap();

        let built = build_loader(&config, dir.path(), None).unwrap();

        assert_eq!(built.chain.names(), vec!["memory", "memory", "asset", "file"]);
        assert_eq!(built.config.sync_timeout, Duration::from_millis(2000));
        assert_eq!(built.config.retries, 1);
    }

    #[test]
    fn built_chain_serves_each_kind() {
        let dir = fixture();
        let config = VfsConfig::from_toml_str(CONFIG).unwrap();
        let built = build_loader(&config, dir.path(), None).unwrap();
        let (loader, _pump) = UriLoader::new(built.chain, built.config);

        let hello = loader.load_sync(LoadRequest::new(1, "mem://hello.txt")).unwrap();
        assert_eq!(hello.content(), b"hello world");

        let preloaded = loader.load_sync(LoadRequest::new(2, "mem://preloaded.txt")).unwrap();
        assert_eq!(preloaded.content(), b"preloaded");

        let asset = loader.load_sync(LoadRequest::new(3, "asset://logo.png")).unwrap();
        assert_eq!(asset.content(), b"png");

        let missing = loader.load_sync(LoadRequest::new(4, "mem://nope")).unwrap();
        assert_eq!(missing.status(), RetCode::Failed);
    }

    #[test]
    fn file_root_relative_to_config_may_climb() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("cfg")).unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/a.txt"), b"data").unwrap();
        let config =
            VfsConfig::from_toml_str("[[handlers]]\nkind = \"file\"\nroot = \"../data\"\n").unwrap();

        let built = build_loader(&config, &dir.path().join("cfg"), None).unwrap();
        let (loader, _pump) = UriLoader::new(built.chain, built.config);

        let uri = format!("file://{}/data/a.txt", dir.path().display());
        let response = loader.load_sync(LoadRequest::new(1, uri)).unwrap();
        assert_eq!(response.status(), RetCode::Success, "{:?}", response.failure());
        assert_eq!(response.content(), b"data");
    }

    #[test]
    fn missing_preload_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = VfsConfig::from_toml_str(CONFIG).unwrap();
        let err = build_chain(&config, dir.path(), None).err().unwrap();
        assert!(matches!(err, VfsError::Config(_)));
    }

    #[test]
    fn network_requires_fetcher() {
        let config = VfsConfig::from_toml_str("[[handlers]]\nkind = \"network\"\n").unwrap();
        let err = build_chain(&config, Path::new("."), None).err().unwrap();
        assert!(matches!(err, VfsError::Config(_)));
    }

    #[tokio::test]
    async fn network_handler_uses_configured_schemes() {
        let config = VfsConfig::from_toml_str(
            "[[handlers]]\nkind = \"network\"\nschemes = [\"echo://\"]\ntimeout_ms = 500\n",
        )
        .unwrap();
        let chain = build_chain(&config, Path::new("."), Some(Arc::new(Echo))).unwrap();
        let loader = UriLoader::start(chain, LoaderConfig::default()).unwrap();

        let response = loader.fetch(LoadRequest::new(1, "echo://ping")).await.unwrap();
        assert_eq!(response.status(), RetCode::Success);
        assert_eq!(response.content(), b"echo://ping");

        let other = loader.fetch(LoadRequest::new(2, "http://x")).await.unwrap();
        assert_eq!(other.status(), RetCode::Failed);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = VfsConfig::from_toml_str("[loader]\nretries = 0\n").unwrap();
        assert!(build_loader(&config, Path::new("."), None).is_ok());

        let mut bad = config.clone();
        bad.loader.max_pending = Some(0);
        assert!(matches!(
            build_loader(&bad, Path::new("."), None),
            Err(VfsError::Config(_))
        ));
    }
}
