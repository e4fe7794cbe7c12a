//! Bundled asset handler.
//!
//! `asset://img/logo.png` resolves to `<root>/img/logo.png`. The handler
//! claims its scheme: missing assets and traversal outside the root are
//! terminal failures.

use std::path::{Path, PathBuf};

use super::file::serve_path;
use super::{confine_relative, strip_scheme, strip_suffixes};
use crate::carrier::ResourceRequestResponse;
use crate::handler::{DispatchContext, HandlerOutcome, UriHandler};

pub const DEFAULT_ASSET_SCHEME: &str = "asset://";

#[derive(Debug)]
pub struct AssetHandler {
    scheme: String,
    root: PathBuf,
}

impl AssetHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_scheme(DEFAULT_ASSET_SCHEME, root)
    }

    pub fn with_scheme(scheme: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            scheme: scheme.into(),
            root: root.into(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl UriHandler for AssetHandler {
    fn name(&self) -> &str {
        "asset"
    }

    fn try_handle(
        &self,
        request: &mut ResourceRequestResponse,
        _ctx: &DispatchContext,
    ) -> HandlerOutcome {
        let Some(rest) = strip_scheme(request.uri(), &self.scheme) else {
            return HandlerOutcome::Delegate;
        };

        match confine_relative(strip_suffixes(rest)) {
            Some(relative) if !relative.is_empty() => {
                let path = self.root.join(relative);
                serve_path(request, &path, Some(&self.root), "asset");
            }
            Some(_) => {
                request.fail("asset uri names no file");
            }
            None => {
                tracing::debug!(
                    request_id = request.request_id(),
                    uri = %request.uri(),
                    "asset path escapes root"
                );
                request.fail("asset path escapes root");
            }
        }
        HandlerOutcome::Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::RetCode;
    use tokio::sync::mpsc;

    fn handle(handler: &AssetHandler, uri: &str) -> (HandlerOutcome, ResourceRequestResponse) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = DispatchContext::new(1, 1, 0, tx);
        let mut request = ResourceRequestResponse::new(1, uri);
        let outcome = handler.try_handle(&mut request, &ctx);
        (outcome, request)
    }

    fn asset_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("img")).unwrap();
        std::fs::write(dir.path().join("img/logo.png"), b"\x89PNG").unwrap();
        dir
    }

    #[test]
    fn serves_asset_below_root() {
        let dir = asset_root();
        let (outcome, response) = handle(&AssetHandler::new(dir.path()), "asset://img/logo.png");

        assert_eq!(outcome, HandlerOutcome::Handled);
        assert_eq!(response.status(), RetCode::Success);
        assert_eq!(response.content(), b"\x89PNG");
        assert_eq!(response.response_meta()["x-vfs-source"], "asset");
        assert!(response.response_meta().contains_key("etag"));
    }

    #[test]
    fn traversal_is_rejected() {
        let dir = asset_root();
        let handler = AssetHandler::new(dir.path().join("img"));

        let (outcome, response) = handle(&handler, "asset://../../etc/passwd");
        assert_eq!(outcome, HandlerOutcome::Handled);
        assert_eq!(response.status(), RetCode::Failed);
    }

    #[test]
    fn missing_asset_fails() {
        let dir = asset_root();
        let (_, response) = handle(&AssetHandler::new(dir.path()), "asset://img/none.png");
        assert_eq!(response.status(), RetCode::Failed);
    }

    #[test]
    fn custom_scheme_and_delegation() {
        let dir = asset_root();
        let handler = AssetHandler::with_scheme("bundle://", dir.path());

        let (outcome, _) = handle(&handler, "asset://img/logo.png");
        assert_eq!(outcome, HandlerOutcome::Delegate);

        let (outcome, response) = handle(&handler, "BUNDLE://img/logo.png");
        assert_eq!(outcome, HandlerOutcome::Handled);
        assert_eq!(response.status(), RetCode::Success);
    }

    #[test]
    fn bare_scheme_fails() {
        let dir = asset_root();
        let (_, response) = handle(&AssetHandler::new(dir.path()), "asset://");
        assert_eq!(response.status(), RetCode::Failed);
    }
}
