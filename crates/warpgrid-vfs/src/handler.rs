//! The handler seam of the loading pipeline.
//!
//! A [`UriHandler`] looks at a request and either finalizes it
//! ([`HandlerOutcome::Handled`]), passes it on unchanged
//! ([`HandlerOutcome::Delegate`]), or takes it over and finishes it later
//! from background work ([`HandlerOutcome::Deferred`]).
//!
//! # Deferred completion
//!
//! ```text
//! try_handle(request, ctx)
//!   → completer = ctx.defer()
//!   → spawn background work owning `completer`
//!   → return Deferred
//! ...later, any thread...
//!   → completer.complete(Completion::success(bytes, meta))
//!     → CompletionEvent { request_id, ticket, slot, completion } sent to the loader
//! ```
//!
//! Completion is message passing: the background task never touches the
//! carrier. The loader applies the event to the parked carrier, so a
//! completion racing a cancellation is simply dropped.

use std::cell::Cell;

use tokio::sync::mpsc;

use crate::carrier::{FailureCause, MetaMap, ResourceRequestResponse};

/// Result of offering a request to one handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The handler set a terminal status; the chain walk stops.
    Handled,
    /// The handler did not claim the request; try the next one.
    Delegate,
    /// The handler claimed the request and will complete it through the
    /// [`Completer`] obtained from [`DispatchContext::defer`].
    Deferred,
}

/// A unit capable of resolving a subset of URIs.
///
/// Contract:
/// - `Handled` requires a terminal status (`Success` or `Failed`) on the carrier.
/// - `Delegate` must leave status and content untouched; adding request
///   metadata is allowed.
/// - `Deferred` requires a completer taken from `ctx.defer()`.
///
/// The loader enforces all three and logs violations.
pub trait UriHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn try_handle(
        &self,
        request: &mut ResourceRequestResponse,
        ctx: &DispatchContext,
    ) -> HandlerOutcome;
}

/// Final result produced by a deferred handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Success {
        content: Vec<u8>,
        response_meta: MetaMap,
    },
    Failed {
        reason: String,
    },
}

impl Completion {
    pub fn success(content: Vec<u8>, response_meta: MetaMap) -> Self {
        Completion::Success {
            content,
            response_meta,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Completion::Failed {
            reason: reason.into(),
        }
    }

    /// Finalize `carrier` with this result.
    pub(crate) fn apply_to(self, carrier: &mut ResourceRequestResponse) {
        match self {
            Completion::Success {
                content,
                response_meta,
            } => {
                carrier.succeed(content, response_meta);
            }
            Completion::Failed { reason } => {
                carrier.fail_with(FailureCause::Handler(reason));
            }
        }
    }
}

/// Message posted from background work back into the loader.
#[derive(Debug)]
pub(crate) struct CompletionEvent {
    pub(crate) request_id: u32,
    /// Distinguishes this dispatch from earlier requests that used the same id.
    pub(crate) ticket: u64,
    /// Which handler invocation within the dispatch produced the event.
    pub(crate) slot: u32,
    pub(crate) completion: Completion,
}

/// Per-dispatch context handed to every handler in the chain.
pub struct DispatchContext {
    request_id: u32,
    ticket: u64,
    slot: u32,
    events: mpsc::UnboundedSender<CompletionEvent>,
    deferred: Cell<bool>,
}

impl DispatchContext {
    pub(crate) fn new(
        request_id: u32,
        ticket: u64,
        slot: u32,
        events: mpsc::UnboundedSender<CompletionEvent>,
    ) -> Self {
        Self {
            request_id,
            ticket,
            slot,
            events,
            deferred: Cell::new(false),
        }
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Take the completer for this request. Call it only when about to
    /// return [`HandlerOutcome::Deferred`].
    pub fn defer(&self) -> Completer {
        self.deferred.set(true);
        Completer {
            request_id: self.request_id,
            ticket: self.ticket,
            slot: self.slot,
            events: Some(self.events.clone()),
        }
    }

    pub(crate) fn was_deferred(&self) -> bool {
        self.deferred.get()
    }
}

/// One-shot handle used by a deferred handler to finish its request.
///
/// Sending is non-blocking and works from any thread. A completer dropped
/// without calling [`complete`](Completer::complete) fails the request so
/// the caller is never left waiting.
#[derive(Debug)]
pub struct Completer {
    request_id: u32,
    ticket: u64,
    slot: u32,
    events: Option<mpsc::UnboundedSender<CompletionEvent>>,
}

impl Completer {
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn complete(mut self, completion: Completion) {
        self.send(completion);
    }

    fn send(&mut self, completion: Completion) {
        let Some(events) = self.events.take() else {
            return;
        };
        let event = CompletionEvent {
            request_id: self.request_id,
            ticket: self.ticket,
            slot: self.slot,
            completion,
        };
        if events.send(event).is_err() {
            tracing::debug!(
                request_id = self.request_id,
                "loader gone, dropping completion"
            );
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if self.events.is_some() {
            tracing::warn!(
                request_id = self.request_id,
                "completer dropped without completing, failing request"
            );
            self.send(Completion::failed("handler dropped its completer"));
        }
    }
}
