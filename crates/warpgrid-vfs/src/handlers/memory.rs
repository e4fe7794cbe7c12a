//! In-memory blob handler.
//!
//! The [`BlobMap`] holds an immutable set of key-to-content mappings
//! constructed via [`BlobMapBuilder`]. Keys are canonical paths, so
//! `mem://img/../logo.png` and `mem://logo.png` resolve to the same blob.

use std::collections::HashMap;
use std::sync::Arc;

use super::{canonicalize_path, response_meta, strip_scheme, strip_suffixes};
use crate::carrier::ResourceRequestResponse;
use crate::handler::{DispatchContext, HandlerOutcome, UriHandler};

/// An immutable map of blob keys to content.
///
/// Supports exact keys and prefix-mapped sub-trees.
#[derive(Clone, Debug, Default)]
pub struct BlobMap {
    /// Canonical key → content.
    exact: HashMap<String, Arc<[u8]>>,
    /// Prefix (ending with `/`) → sub-path table.
    prefixes: Vec<(String, Arc<HashMap<String, Arc<[u8]>>>)>,
}

/// Builder for constructing an immutable [`BlobMap`].
#[derive(Default)]
pub struct BlobMapBuilder {
    exact: HashMap<String, Arc<[u8]>>,
    prefixes: Vec<(String, Arc<HashMap<String, Arc<[u8]>>>)>,
}

impl BlobMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register content under an exact key.
    pub fn with_blob(mut self, key: &str, content: &[u8]) -> Self {
        self.exact.insert(canonicalize_path(key), Arc::from(content));
        self
    }

    pub fn with_text(self, key: &str, content: &str) -> Self {
        self.with_blob(key, content.as_bytes())
    }

    /// Register a sub-tree: every `entries` key is served below `prefix`.
    pub fn with_tree(mut self, prefix: &str, entries: HashMap<String, Vec<u8>>) -> Self {
        let mut prefix = canonicalize_path(prefix);
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        let table: HashMap<String, Arc<[u8]>> = entries
            .into_iter()
            .map(|(k, v)| (canonicalize_path(&k)[1..].to_string(), Arc::from(v)))
            .collect();
        self.prefixes.push((prefix, Arc::new(table)));
        self
    }

    pub fn build(self) -> BlobMap {
        BlobMap {
            exact: self.exact,
            prefixes: self.prefixes,
        }
    }
}

impl BlobMap {
    pub fn builder() -> BlobMapBuilder {
        BlobMapBuilder::new()
    }

    /// Look up a key; exact matches win over prefix matches.
    pub fn lookup(&self, key: &str) -> Option<Arc<[u8]>> {
        let canonical = canonicalize_path(key);

        if let Some(content) = self.exact.get(&canonical) {
            return Some(content.clone());
        }

        for (prefix, table) in &self.prefixes {
            if let Some(sub_path) = canonical.strip_prefix(prefix.as_str()) {
                return table.get(sub_path).cloned();
            }
        }

        None
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Number of blobs, counting every sub-tree entry.
    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.iter().map(|(_, t)| t.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Serves blobs for one scheme prefix. A miss delegates.
pub struct MemoryBlobHandler {
    scheme: String,
    blobs: Arc<BlobMap>,
}

impl MemoryBlobHandler {
    pub fn new(scheme: impl Into<String>, blobs: BlobMap) -> Self {
        Self::shared(scheme, Arc::new(blobs))
    }

    /// Use a map shared with other handlers.
    pub fn shared(scheme: impl Into<String>, blobs: Arc<BlobMap>) -> Self {
        Self {
            scheme: scheme.into(),
            blobs,
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }
}

impl UriHandler for MemoryBlobHandler {
    fn name(&self) -> &str {
        "memory"
    }

    fn try_handle(
        &self,
        request: &mut ResourceRequestResponse,
        _ctx: &DispatchContext,
    ) -> HandlerOutcome {
        let Some(rest) = strip_scheme(request.uri(), &self.scheme) else {
            return HandlerOutcome::Delegate;
        };
        let key = strip_suffixes(rest);

        match self.blobs.lookup(key) {
            Some(content) => {
                tracing::debug!(
                    request_id = request.request_id(),
                    key = %key,
                    size = content.len(),
                    "memory blob matched"
                );
                let meta = response_meta("memory", &content, false);
                request.succeed(content.to_vec(), meta);
                HandlerOutcome::Handled
            }
            None => {
                tracing::debug!(
                    request_id = request.request_id(),
                    key = %key,
                    "memory blob miss, delegating"
                );
                HandlerOutcome::Delegate
            }
        }
    }
}
