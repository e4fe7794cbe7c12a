//! `file://` handler.
//!
//! Claims every `file://` URI: a missing or unreadable file is a terminal
//! `Failed`, not a delegation. With a root configured, paths must resolve
//! inside it (symlinks included).

use std::path::{Path, PathBuf};

use super::{confine_relative, normalize_dir, response_meta, strip_scheme, strip_suffixes};
use crate::carrier::ResourceRequestResponse;
use crate::handler::{DispatchContext, HandlerOutcome, UriHandler};

const SCHEME: &str = "file://";

#[derive(Debug, Default)]
pub struct FileHandler {
    root: Option<PathBuf>,
}

impl FileHandler {
    /// Serve any local path.
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Serve only paths below `root`. The root is made absolute and its
    /// `.`/`..` components resolved up front.
    pub fn sandboxed(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(normalize_dir(&root.into())),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn resolve(&self, rest: &str) -> Result<PathBuf, String> {
        // `file://localhost/a` and `file:///a` name the same path.
        let path = match rest.strip_prefix("localhost") {
            Some(stripped) if stripped.starts_with('/') => stripped,
            _ => rest,
        };
        if !path.starts_with('/') {
            return Err(format!("unsupported file URI authority in {rest:?}"));
        }

        let Some(relative) = confine_relative(path) else {
            return Err(format!("path escapes filesystem root: {path}"));
        };

        match &self.root {
            None => Ok(Path::new("/").join(relative)),
            Some(root) => {
                let absolute = Path::new("/").join(&relative);
                let inside = absolute
                    .strip_prefix(root)
                    .map_err(|_| format!("{} is outside {}", absolute.display(), root.display()))?;
                Ok(root.join(inside))
            }
        }
    }
}

impl UriHandler for FileHandler {
    fn name(&self) -> &str {
        "file"
    }

    fn try_handle(
        &self,
        request: &mut ResourceRequestResponse,
        _ctx: &DispatchContext,
    ) -> HandlerOutcome {
        let Some(rest) = strip_scheme(request.uri(), SCHEME) else {
            return HandlerOutcome::Delegate;
        };
        let rest = strip_suffixes(rest).to_string();

        match self.resolve(&rest) {
            Ok(path) => serve_path(request, &path, self.root.as_deref(), "file"),
            Err(reason) => {
                tracing::debug!(request_id = request.request_id(), reason = %reason, "file uri rejected");
                request.fail(reason);
            }
        }
        HandlerOutcome::Handled
    }
}

/// Read `path` into the carrier, finalizing it either way.
///
/// With `root` set, the resolved path (after following symlinks) must stay
/// under the resolved root.
pub(crate) fn serve_path(
    request: &mut ResourceRequestResponse,
    path: &Path,
    root: Option<&Path>,
    source: &str,
) {
    let request_id = request.request_id();

    if let Some(root) = root
        && let Err(reason) = check_confined(path, root)
    {
        tracing::debug!(request_id, path = %path.display(), reason = %reason, "path rejected");
        request.fail(reason);
        return;
    }

    match std::fs::read(path) {
        Ok(content) => {
            tracing::debug!(
                request_id,
                path = %path.display(),
                size = content.len(),
                "file read"
            );
            let meta = response_meta(source, &content, true);
            request.succeed(content, meta);
        }
        Err(e) => {
            tracing::debug!(request_id, path = %path.display(), error = %e, "file read failed");
            request.fail(format!("{}: {e}", path.display()));
        }
    }
}

fn check_confined(path: &Path, root: &Path) -> Result<(), String> {
    // A missing file cannot escape; let the read report it.
    let Ok(resolved) = std::fs::canonicalize(path) else {
        return Ok(());
    };
    let root = std::fs::canonicalize(root)
        .map_err(|e| format!("root {} unavailable: {e}", root.display()))?;
    if resolved.starts_with(&root) {
        Ok(())
    } else {
        Err(format!(
            "{} resolves outside {}",
            path.display(),
            root.display()
        ))
    }
}
