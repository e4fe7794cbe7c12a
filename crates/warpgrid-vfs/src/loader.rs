//! The URI loader — dispatches requests through the handler chain.
//!
//! # Dispatch flow
//!
//! ```text
//! load(request)
//!   → register request_id in the pending table (duplicate → DuplicateRequest)
//!   → walk the chain in order
//!     → Handled  → stop; remove entry; deliver
//!     → Delegate → next handler
//!     → Deferred → park carrier; the completion pump finishes it later
//!   → chain exhausted → Failed (NoHandlerMatched), empty response; deliver
//! ```
//!
//! The walk itself never suspends. Handlers that need to wait hand their
//! work to background tasks and complete through a [`Completer`], which
//! posts a message to the [`CompletionPump`].
//!
//! [`Completer`]: crate::handler::Completer

use std::sync::Arc;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::carrier::{FailureCause, MetaMap, ResourceRequestResponse};
use crate::chain::HandlerChain;
use crate::error::{VfsError, VfsResult};
use crate::handler::{CompletionEvent, DispatchContext, HandlerOutcome};
use crate::pending::{Delivery, Parked, PendingTable};
use crate::sink::{CompletionSink, OneshotSink};

/// Loader tuning knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderConfig {
    /// How long a synchronous load waits for a deferred handler (default: 5s).
    pub sync_timeout: Duration,
    /// Maximum concurrently pending requests (default: 1024).
    pub max_pending: usize,
    /// Extra passes through the chain after a handler failure that was
    /// finalized inline (default: 0). Deferred results are final.
    pub retries: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_millis(warp_core::config::DEFAULT_SYNC_TIMEOUT_MS),
            max_pending: warp_core::config::DEFAULT_MAX_PENDING,
            retries: 0,
        }
    }
}

impl LoaderConfig {
    /// Build from the `[loader]` section of a vfs.toml.
    pub fn from_section(section: &warp_core::LoaderSection) -> Self {
        Self {
            sync_timeout: Duration::from_millis(section.sync_timeout_ms()),
            max_pending: section.max_pending(),
            retries: section.retries(),
        }
    }
}

/// One inbound load call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadRequest {
    pub request_id: u32,
    pub uri: String,
    pub request_meta: MetaMap,
}

impl LoadRequest {
    pub fn new(request_id: u32, uri: impl Into<String>) -> Self {
        Self {
            request_id,
            uri: uri.into(),
            request_meta: MetaMap::new(),
        }
    }

    /// Builder method: set the caller-supplied request metadata.
    pub fn with_meta(self, request_meta: MetaMap) -> Self {
        Self {
            request_meta,
            ..self
        }
    }

    fn into_carrier(self) -> ResourceRequestResponse {
        ResourceRequestResponse::new(self.request_id, self.uri).with_request_meta(self.request_meta)
    }
}

/// How the caller wants the result.
pub enum LoadMode {
    /// Block the calling thread and return the carrier.
    Sync,
    /// Return immediately; deliver through the sink.
    Async(Box<dyn CompletionSink>),
}

enum Walk {
    /// The carrier holds a terminal status.
    Finished,
    /// A handler deferred; `slot` identifies it.
    Deferred { slot: u32 },
}

/// Dispatcher that owns the handler chain and the pending-request table.
///
/// The chain is shared read-only across concurrent loads. The pending table
/// is scoped to this loader instance.
pub struct UriLoader {
    chain: HandlerChain,
    pending: Arc<PendingTable>,
    events: mpsc::UnboundedSender<CompletionEvent>,
    config: LoaderConfig,
}

/// Drains completion events posted by deferred handlers.
///
/// Runs until every sender is gone: the loader and all outstanding
/// completers.
pub struct CompletionPump {
    pending: Arc<PendingTable>,
    events: mpsc::UnboundedReceiver<CompletionEvent>,
}

impl CompletionPump {
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.handle(event);
        }
        tracing::debug!("completion pump stopped");
    }

    fn handle(&self, event: CompletionEvent) {
        if let Some(finished) = self.pending.resolve(event) {
            finished.deliver();
        }
    }
}

impl UriLoader {
    /// Create a loader and the pump that must run for deferred handlers to
    /// complete.
    pub fn new(chain: HandlerChain, config: LoaderConfig) -> (Self, CompletionPump) {
        let pending = Arc::new(PendingTable::new(config.max_pending));
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(handlers = ?chain.names(), "uri loader configured");
        (
            Self {
                chain,
                pending: pending.clone(),
                events: tx,
                config,
            },
            CompletionPump {
                pending,
                events: rx,
            },
        )
    }

    /// Create a loader and spawn its pump on the current tokio runtime.
    pub fn start(chain: HandlerChain, config: LoaderConfig) -> VfsResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VfsError::Config(format!("completion pump needs a tokio runtime: {e}")))?;
        let (loader, pump) = Self::new(chain, config);
        runtime.spawn(pump.run());
        Ok(loader)
    }

    pub fn chain(&self) -> &HandlerChain {
        &self.chain
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn is_pending(&self, request_id: u32) -> bool {
        self.pending.contains(request_id)
    }

    pub fn pending_ids(&self) -> Vec<u32> {
        self.pending.pending_ids()
    }

    /// Inbound entry point: returns the carrier for `Sync`, `None` for `Async`.
    pub fn load(
        &self,
        request: LoadRequest,
        mode: LoadMode,
    ) -> VfsResult<Option<ResourceRequestResponse>> {
        match mode {
            LoadMode::Sync => self.load_sync(request).map(Some),
            LoadMode::Async(sink) => self.load_with_sink(request, sink).map(|()| None),
        }
    }

    /// Load on the calling thread.
    ///
    /// If a handler defers, the thread blocks until the completion arrives or
    /// `sync_timeout` elapses. Must not be called from inside an async task
    /// when the chain contains deferring handlers.
    pub fn load_sync(&self, request: LoadRequest) -> VfsResult<ResourceRequestResponse> {
        let request_id = request.request_id;
        let (tx, rx) = std_mpsc::sync_channel(1);
        let ticket = self.pending.register(request_id, Delivery::Blocking(tx))?;

        let uri = request.uri.clone();
        let mut response = request.into_carrier();

        match self.dispatch(&mut response, ticket) {
            Walk::Finished => {
                if self.pending.take(request_id, ticket).is_none() {
                    tracing::debug!(request_id, "request cancelled during dispatch");
                }
                Ok(response)
            }
            Walk::Deferred { slot } => match self.pending.park(request_id, ticket, slot, response) {
                Parked::Ready(finished) => Ok(finished.response),
                Parked::Gone(mut response) => {
                    response.fail_with(FailureCause::Cancelled);
                    Ok(response)
                }
                Parked::Waiting => Ok(self.wait_deferred(&rx, request_id, ticket, &uri)),
            },
        }
    }

    /// Load without blocking; the result goes to `sink`.
    ///
    /// Structural errors (`DuplicateRequest`, `PendingTableFull`) are returned
    /// before any handler runs, and the sink is dropped unused.
    pub fn load_async(
        &self,
        request: LoadRequest,
        sink: impl CompletionSink + 'static,
    ) -> VfsResult<()> {
        self.load_with_sink(request, Box::new(sink))
    }

    /// Load without blocking and await the result.
    pub async fn fetch(&self, request: LoadRequest) -> VfsResult<ResourceRequestResponse> {
        let request_id = request.request_id;
        let (sink, rx) = OneshotSink::new();
        self.load_async(request, sink)?;
        rx.await.map_err(|_| {
            VfsError::HandlerInternal(format!("request {request_id} was cancelled"))
        })
    }

    /// Cancel a pending request.
    ///
    /// The entry is removed and any later completion for it is ignored.
    /// Background work is not interrupted. An async sink is dropped without
    /// being called; a blocked synchronous caller is released with a
    /// `Failed` (cancelled) carrier. Returns `false` if the id was not pending.
    pub fn cancel(&self, request_id: u32) -> bool {
        match self.pending.cancel(request_id) {
            None => false,
            Some((Delivery::Blocking(tx), parked)) => {
                if let Some(mut response) = parked {
                    response.fail_with(FailureCause::Cancelled);
                    let _ = tx.send(response);
                }
                true
            }
            Some((Delivery::Sink(_), _)) => {
                tracing::debug!(request_id, "dropping sink of cancelled request");
                true
            }
        }
    }

    fn load_with_sink(
        &self,
        request: LoadRequest,
        sink: Box<dyn CompletionSink>,
    ) -> VfsResult<()> {
        let request_id = request.request_id;
        let ticket = self.pending.register(request_id, Delivery::Sink(sink))?;
        let mut response = request.into_carrier();

        match self.dispatch(&mut response, ticket) {
            Walk::Finished => match self.pending.take(request_id, ticket) {
                Some(delivery) => delivery.deliver(response),
                None => tracing::debug!(request_id, "request cancelled during dispatch, discarding"),
            },
            Walk::Deferred { slot } => match self.pending.park(request_id, ticket, slot, response) {
                Parked::Waiting => {}
                Parked::Ready(finished) => finished.deliver(),
                Parked::Gone(_) => {
                    tracing::debug!(request_id, "request cancelled during dispatch, discarding")
                }
            },
        }
        Ok(())
    }

    /// Walk the chain, re-walking after inline handler failures while
    /// retries remain.
    fn dispatch(&self, response: &mut ResourceRequestResponse, ticket: u64) -> Walk {
        let mut slot = 0;
        let mut retries_left = self.config.retries;
        loop {
            match self.walk(response, ticket, &mut slot) {
                Walk::Finished
                    if retries_left > 0
                        && matches!(response.failure(), Some(FailureCause::Handler(_))) =>
                {
                    retries_left -= 1;
                    tracing::debug!(
                        request_id = response.request_id(),
                        retries_left,
                        "handler failed, re-dispatching"
                    );
                    response.reset_for_redispatch();
                }
                walk => return walk,
            }
        }
    }

    fn walk(&self, response: &mut ResourceRequestResponse, ticket: u64, slot: &mut u32) -> Walk {
        let request_id = response.request_id();

        for handler in self.chain.iter() {
            let current = *slot;
            *slot += 1;
            let ctx = DispatchContext::new(request_id, ticket, current, self.events.clone());

            match handler.try_handle(response, &ctx) {
                HandlerOutcome::Handled => {
                    if !response.is_terminal() {
                        tracing::warn!(
                            request_id,
                            handler = handler.name(),
                            "handler reported handled without a status"
                        );
                        response.fail("handler reported handled without a status");
                    }
                    if ctx.was_deferred() {
                        tracing::warn!(
                            request_id,
                            handler = handler.name(),
                            "handler took a completer but finished inline, completion will be ignored"
                        );
                    }
                    tracing::debug!(
                        request_id,
                        uri = %response.uri(),
                        handler = handler.name(),
                        status = %response.status(),
                        "request handled"
                    );
                    return Walk::Finished;
                }
                HandlerOutcome::Delegate => {
                    if response.is_terminal() || response.has_content() {
                        tracing::warn!(
                            request_id,
                            handler = handler.name(),
                            "delegating handler modified status or content, rolling back"
                        );
                        response.reset_for_redispatch();
                    }
                    tracing::trace!(request_id, handler = handler.name(), "delegated");
                }
                HandlerOutcome::Deferred => {
                    if !ctx.was_deferred() {
                        tracing::warn!(
                            request_id,
                            handler = handler.name(),
                            "handler deferred without taking a completer"
                        );
                        if !response.is_terminal() {
                            response.fail("handler deferred without taking a completer");
                        }
                        return Walk::Finished;
                    }
                    if response.is_terminal() || response.has_content() {
                        tracing::warn!(
                            request_id,
                            handler = handler.name(),
                            "deferring handler modified status or content, rolling back"
                        );
                        response.reset_for_redispatch();
                    }
                    tracing::debug!(
                        request_id,
                        uri = %response.uri(),
                        handler = handler.name(),
                        "request deferred"
                    );
                    return Walk::Deferred { slot: current };
                }
            }
        }

        tracing::debug!(request_id, uri = %response.uri(), "no handler matched");
        response.set_response_meta(MetaMap::new());
        response.take_content();
        response.fail_with(FailureCause::NoHandlerMatched);
        Walk::Finished
    }

    fn wait_deferred(
        &self,
        rx: &std_mpsc::Receiver<ResourceRequestResponse>,
        request_id: u32,
        ticket: u64,
        uri: &str,
    ) -> ResourceRequestResponse {
        let cancelled = || {
            let mut response = ResourceRequestResponse::new(request_id, uri);
            response.fail_with(FailureCause::Cancelled);
            response
        };

        match rx.recv_timeout(self.config.sync_timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => match self.pending.cancel_ticket(request_id, ticket) {
                Some((_, Some(mut response))) => {
                    tracing::warn!(
                        request_id,
                        uri = %uri,
                        timeout_ms = self.config.sync_timeout.as_millis() as u64,
                        "synchronous load timed out waiting for deferred handler"
                    );
                    response.fail_with(FailureCause::TimedOut);
                    response
                }
                Some((_, None)) => cancelled(),
                // The completion won the race; it is already on its way.
                None => rx.recv().unwrap_or_else(|_| cancelled()),
            },
            Err(RecvTimeoutError::Disconnected) => cancelled(),
        }
    }
}
