//! Network handler.
//!
//! Claims its schemes (by default `http://` and `https://`) and defers: the
//! fetch runs as a task on a tokio runtime and completes the request through
//! its [`Completer`](crate::handler::Completer). The transport is supplied by
//! the embedder through the [`Fetcher`] seam.
//!
//! ```text
//! try_handle(request)
//!   → completer = ctx.defer()
//!   → spawn: timeout(fetcher.fetch(uri, request_meta))
//!       → 2xx          → Completion::success(body, headers)
//!       → other status → Completion::failed("HTTP <status>")
//!       → error/timeout→ Completion::failed(reason)
//!   → Deferred
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use super::{META_CONTENT_LENGTH, META_SOURCE, strip_scheme};
use crate::carrier::{MetaMap, ResourceRequestResponse};
use crate::handler::{Completion, DispatchContext, HandlerOutcome, UriHandler};

/// Boxed future returned by [`Fetcher::fetch`].
pub type FetchFuture = Pin<Box<dyn Future<Output = Result<FetchResponse, String>> + Send>>;

/// Raw transport result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: MetaMap,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: MetaMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport used by [`NetworkHandler`].
///
/// `headers` are the request metadata of the carrier.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, uri: String, headers: MetaMap) -> FetchFuture;
}

pub struct NetworkHandler {
    schemes: Vec<String>,
    fetcher: Arc<dyn Fetcher>,
    runtime: tokio::runtime::Handle,
    timeout: Duration,
}

impl NetworkHandler {
    /// Handler for `http://` and `https://` spawning fetches on `runtime`.
    pub fn new(fetcher: Arc<dyn Fetcher>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            schemes: vec!["http://".to_string(), "https://".to_string()],
            fetcher,
            runtime,
            timeout: Duration::from_millis(warp_core::config::DEFAULT_NETWORK_TIMEOUT_MS),
        }
    }

    pub fn with_schemes(mut self, schemes: Vec<String>) -> Self {
        self.schemes = schemes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn schemes(&self) -> &[String] {
        &self.schemes
    }

    fn claims(&self, uri: &str) -> bool {
        self.schemes.iter().any(|s| strip_scheme(uri, s).is_some())
    }
}

impl UriHandler for NetworkHandler {
    fn name(&self) -> &str {
        "network"
    }

    fn try_handle(
        &self,
        request: &mut ResourceRequestResponse,
        ctx: &DispatchContext,
    ) -> HandlerOutcome {
        if !self.claims(request.uri()) {
            return HandlerOutcome::Delegate;
        }

        let completer = ctx.defer();
        let fetcher = self.fetcher.clone();
        let uri = request.uri().to_string();
        let headers = request.request_meta().clone();
        let timeout = self.timeout;
        let request_id = request.request_id();

        tracing::debug!(request_id, uri = %uri, "network fetch started");
        self.runtime.spawn(async move {
            let fetch = fetcher.fetch(uri.clone(), headers);
            let completion = match tokio::time::timeout(timeout, fetch).await {
                Ok(Ok(response)) if response.is_success() => {
                    tracing::debug!(
                        request_id,
                        uri = %uri,
                        status = response.status,
                        size = response.body.len(),
                        "network fetch completed"
                    );
                    let mut meta = response.headers;
                    meta.insert(
                        META_CONTENT_LENGTH.to_string(),
                        response.body.len().to_string(),
                    );
                    meta.insert(META_SOURCE.to_string(), "network".to_string());
                    Completion::success(response.body, meta)
                }
                Ok(Ok(response)) => {
                    tracing::debug!(
                        request_id,
                        uri = %uri,
                        status = response.status,
                        "network fetch rejected"
                    );
                    Completion::failed(format!("HTTP {}", response.status))
                }
                Ok(Err(e)) => {
                    tracing::debug!(request_id, uri = %uri, error = %e, "network fetch failed");
                    Completion::failed(e)
                }
                Err(_) => {
                    tracing::debug!(
                        request_id,
                        uri = %uri,
                        timeout_ms = timeout.as_millis() as u64,
                        "network fetch timed out"
                    );
                    Completion::failed(format!("timed out after {}ms", timeout.as_millis()))
                }
            };
            completer.complete(completion);
        });

        HandlerOutcome::Deferred
    }
}
