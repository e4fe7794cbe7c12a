//! Bundled handler variants.
//!
//! The pipeline does not depend on any of these; they cover the common
//! sources a deployment chains together:
//!
//! - [`MemoryBlobHandler`] — immutable in-memory blobs under a scheme prefix
//! - [`FileHandler`] — `file://` URIs read from the local filesystem
//! - [`AssetHandler`] — bundled assets resolved below a root directory
//! - [`NetworkHandler`] — deferred fetches through a [`Fetcher`]
//!
//! Every successful response carries `content-length` and `x-vfs-source`;
//! filesystem-backed handlers add a sha256 `etag`.

pub mod asset;
pub mod file;
pub mod memory;
pub mod network;

pub use asset::AssetHandler;
pub use file::FileHandler;
pub use memory::{BlobMap, BlobMapBuilder, MemoryBlobHandler};
pub use network::{FetchFuture, FetchResponse, Fetcher, NetworkHandler};

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::carrier::MetaMap;

pub const META_CONTENT_LENGTH: &str = "content-length";
pub const META_ETAG: &str = "etag";
pub const META_SOURCE: &str = "x-vfs-source";

/// The part of `uri` after `scheme`, or `None` if the scheme does not match.
pub(crate) fn strip_scheme<'a>(uri: &'a str, scheme: &str) -> Option<&'a str> {
    if warp_core::uri::has_scheme_prefix(uri, scheme) {
        Some(&uri[scheme.len()..])
    } else {
        None
    }
}

/// Drop `?query` and `#fragment` from a path-like URI remainder.
pub(crate) fn strip_suffixes(rest: &str) -> &str {
    match rest.find(['?', '#']) {
        Some(idx) => &rest[..idx],
        None => rest,
    }
}

/// Normalize `.` and `..` components; `..` never climbs above the root.
pub(crate) fn canonicalize_path(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            other => components.push(other),
        }
    }

    if components.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", components.join("/"))
    }
}

/// Relative form of `path` with `.`/`..` resolved, or `None` if `..` would
/// climb above the starting directory.
pub(crate) fn confine_relative(path: &str) -> Option<String> {
    let mut components: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop()?;
            }
            other => components.push(other),
        }
    }

    Some(components.join("/"))
}

/// Lexical form of a directory path: relative paths are made absolute
/// against the working directory, `.` is dropped and `..` pops a component.
/// The filesystem is not consulted.
pub(crate) fn normalize_dir(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

pub(crate) fn etag(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

pub(crate) fn response_meta(source: &str, content: &[u8], with_etag: bool) -> MetaMap {
    let mut meta = MetaMap::new();
    meta.insert(META_CONTENT_LENGTH.to_string(), content.len().to_string());
    meta.insert(META_SOURCE.to_string(), source.to_string());
    if with_etag {
        meta.insert(META_ETAG.to_string(), etag(content));
    }
    meta
}
