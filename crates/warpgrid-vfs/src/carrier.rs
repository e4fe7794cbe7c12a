//! The request/response carrier threaded through the handler chain.
//!
//! A [`ResourceRequestResponse`] is created once per load call, mutated in
//! place by exactly one terminal handler, and consumed by the caller or the
//! host boundary. It is never cloned between handlers.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::VfsError;

/// Ordered string map used for request and response metadata.
pub type MetaMap = BTreeMap<String, String>;

/// Terminal status of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RetCode {
    /// No handler has finalized the request yet.
    #[default]
    Unset,
    Success,
    Failed,
}

impl fmt::Display for RetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetCode::Unset => write!(f, "unset"),
            RetCode::Success => write!(f, "success"),
            RetCode::Failed => write!(f, "failed"),
        }
    }
}

/// Why a request ended up `Failed`.
///
/// Kept on the native side only; the host boundary sees a plain non-zero code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureCause {
    /// Every handler in the chain delegated.
    NoHandlerMatched,
    /// A handler failed the request for its own reasons.
    Handler(String),
    /// A synchronous load gave up waiting on a deferred handler.
    TimedOut,
    /// The request was cancelled while a handler was deferred.
    Cancelled,
}

impl FailureCause {
    /// Map the cause onto the crate error taxonomy.
    pub fn to_error(&self, uri: &str) -> VfsError {
        match self {
            FailureCause::NoHandlerMatched => VfsError::NoHandlerMatched(uri.to_string()),
            FailureCause::Handler(reason) => VfsError::HandlerInternal(reason.clone()),
            FailureCause::TimedOut => VfsError::HandlerInternal("timed out".to_string()),
            FailureCause::Cancelled => VfsError::HandlerInternal("cancelled".to_string()),
        }
    }
}

/// Mutable state for one resource request and its response.
#[derive(Debug)]
pub struct ResourceRequestResponse {
    request_id: u32,
    uri: String,
    status: RetCode,
    failure: Option<FailureCause>,
    request_meta: MetaMap,
    response_meta: MetaMap,
    content: Option<Vec<u8>>,
}

impl ResourceRequestResponse {
    /// Create a carrier for `uri`. The URI and id are fixed for its lifetime.
    pub fn new(request_id: u32, uri: impl Into<String>) -> Self {
        Self {
            request_id,
            uri: uri.into(),
            status: RetCode::Unset,
            failure: None,
            request_meta: MetaMap::new(),
            response_meta: MetaMap::new(),
            content: None,
        }
    }

    /// Builder method: attach the caller-supplied request metadata.
    pub fn with_request_meta(self, request_meta: MetaMap) -> Self {
        Self {
            request_meta,
            ..self
        }
    }

    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn status(&self) -> RetCode {
        self.status
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        self.failure.as_ref()
    }

    pub fn request_meta(&self) -> &MetaMap {
        &self.request_meta
    }

    /// Add a derived request entry (e.g. a computed auth header).
    ///
    /// Existing entries are never overwritten; returns `false` if `key` is
    /// already present.
    pub fn add_request_meta(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.request_meta.contains_key(&key) {
            return false;
        }
        self.request_meta.insert(key, value.into());
        true
    }

    pub fn response_meta(&self) -> &MetaMap {
        &self.response_meta
    }

    /// Replace the response metadata wholesale. Last writer wins.
    pub fn set_response_meta(&mut self, response_meta: MetaMap) {
        self.response_meta = response_meta;
    }

    /// View of the current content; empty when no buffer is installed.
    pub fn content(&self) -> &[u8] {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Install `content`, dropping any buffer the carrier held before.
    pub fn set_content(&mut self, content: Vec<u8>) {
        if let Some(previous) = self.content.replace(content) {
            tracing::trace!(
                request_id = self.request_id,
                released = previous.len(),
                "replaced carrier content"
            );
        }
    }

    /// Move the content out, leaving the slot empty.
    pub fn take_content(&mut self) -> Option<Vec<u8>> {
        self.content.take()
    }

    /// Perform the single `Unset → Success | Failed` transition.
    ///
    /// Returns `false` (and leaves the status untouched) if the carrier is
    /// already terminal or `status` is `Unset`.
    pub fn set_status(&mut self, status: RetCode) -> bool {
        if status == RetCode::Unset || self.status != RetCode::Unset {
            tracing::warn!(
                request_id = self.request_id,
                current = %self.status,
                requested = %status,
                "rejected status transition"
            );
            return false;
        }
        self.status = status;
        true
    }

    /// Finalize as `Success` with the given content and response metadata.
    pub fn succeed(&mut self, content: Vec<u8>, response_meta: MetaMap) -> bool {
        if self.status != RetCode::Unset {
            return self.set_status(RetCode::Success);
        }
        self.set_content(content);
        self.response_meta = response_meta;
        self.set_status(RetCode::Success)
    }

    /// Finalize as `Failed` for a handler-specific reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        self.fail_with(FailureCause::Handler(reason.into()))
    }

    pub(crate) fn fail_with(&mut self, cause: FailureCause) -> bool {
        if !self.set_status(RetCode::Failed) {
            return false;
        }
        self.failure = Some(cause);
        true
    }

    /// Return the carrier to `Unset` for another pass through the chain.
    ///
    /// Response state is cleared; request metadata (including entries added
    /// by handlers) is kept.
    pub fn reset_for_redispatch(&mut self) {
        self.status = RetCode::Unset;
        self.failure = None;
        self.response_meta.clear();
        self.content = None;
    }

    /// Status is `Success` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.status != RetCode::Unset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_carrier_is_unset_and_empty() {
        let carrier = ResourceRequestResponse::new(7, "asset://logo.png");
        assert_eq!(carrier.request_id(), 7);
        assert_eq!(carrier.uri(), "asset://logo.png");
        assert_eq!(carrier.status(), RetCode::Unset);
        assert!(carrier.failure().is_none());
        assert!(carrier.response_meta().is_empty());
        assert!(carrier.content().is_empty());
        assert!(!carrier.has_content());
    }

    #[test]
    fn status_transitions_exactly_once() {
        let mut carrier = ResourceRequestResponse::new(1, "mem://a");
        assert!(carrier.set_status(RetCode::Success));
        assert!(!carrier.set_status(RetCode::Failed));
        assert_eq!(carrier.status(), RetCode::Success);
    }

    #[test]
    fn unset_is_not_a_valid_target() {
        let mut carrier = ResourceRequestResponse::new(1, "mem://a");
        assert!(!carrier.set_status(RetCode::Unset));
        assert_eq!(carrier.status(), RetCode::Unset);
    }

    #[test]
    fn fail_records_cause() {
        let mut carrier = ResourceRequestResponse::new(1, "file:///missing");
        assert!(carrier.fail("not found"));
        assert_eq!(carrier.status(), RetCode::Failed);
        assert_eq!(
            carrier.failure(),
            Some(&FailureCause::Handler("not found".to_string()))
        );
        assert_eq!(
            carrier.failure().unwrap().to_error(carrier.uri()),
            VfsError::HandlerInternal("not found".to_string())
        );
    }

    #[test]
    fn fail_after_success_keeps_success() {
        let mut carrier = ResourceRequestResponse::new(1, "mem://a");
        assert!(carrier.succeed(b"ok".to_vec(), MetaMap::new()));
        assert!(!carrier.fail("late"));
        assert_eq!(carrier.status(), RetCode::Success);
        assert!(carrier.failure().is_none());
    }

    #[test]
    fn succeed_after_fail_does_not_touch_content() {
        let mut carrier = ResourceRequestResponse::new(1, "mem://a");
        carrier.fail("first");
        assert!(!carrier.succeed(b"late".to_vec(), MetaMap::new()));
        assert!(!carrier.has_content());
    }

    #[test]
    fn request_meta_entries_are_never_overwritten() {
        let meta = MetaMap::from([("accept".to_string(), "image/png".to_string())]);
        let mut carrier = ResourceRequestResponse::new(1, "http://x").with_request_meta(meta);

        assert!(!carrier.add_request_meta("accept", "*/*"));
        assert!(carrier.add_request_meta("authorization", "Bearer t"));
        assert_eq!(carrier.request_meta()["accept"], "image/png");
        assert_eq!(carrier.request_meta()["authorization"], "Bearer t");
    }

    #[test]
    fn response_meta_last_writer_wins() {
        let mut carrier = ResourceRequestResponse::new(1, "mem://a");
        carrier.set_response_meta(MetaMap::from([("a".to_string(), "1".to_string())]));
        carrier.set_response_meta(MetaMap::from([("b".to_string(), "2".to_string())]));
        assert_eq!(carrier.response_meta().len(), 1);
        assert_eq!(carrier.response_meta()["b"], "2");
    }

    #[test]
    fn set_content_replaces_previous_buffer() {
        let mut carrier = ResourceRequestResponse::new(1, "mem://a");
        carrier.set_content(b"first".to_vec());
        carrier.set_content(b"second".to_vec());
        assert_eq!(carrier.content(), b"second");
    }

    #[test]
    fn content_view_is_idempotent() {
        let mut carrier = ResourceRequestResponse::new(1, "mem://a");
        carrier.set_content(b"bytes".to_vec());
        assert_eq!(carrier.content(), b"bytes");
        assert_eq!(carrier.content(), b"bytes");
        assert!(carrier.has_content());
    }

    #[test]
    fn take_content_clears_slot() {
        let mut carrier = ResourceRequestResponse::new(1, "mem://a");
        carrier.set_content(b"bytes".to_vec());
        assert_eq!(carrier.take_content(), Some(b"bytes".to_vec()));
        assert_eq!(carrier.take_content(), None);
        assert!(carrier.content().is_empty());
    }

    #[test]
    fn reset_for_redispatch_clears_response_state() {
        let mut carrier = ResourceRequestResponse::new(3, "mem://a");
        carrier.add_request_meta("x-derived", "1");
        carrier.set_content(b"partial".to_vec());
        carrier.set_response_meta(MetaMap::from([("k".to_string(), "v".to_string())]));
        carrier.fail("flaky");

        carrier.reset_for_redispatch();

        assert_eq!(carrier.status(), RetCode::Unset);
        assert!(carrier.failure().is_none());
        assert!(carrier.response_meta().is_empty());
        assert!(!carrier.has_content());
        assert_eq!(carrier.request_meta()["x-derived"], "1");
        assert!(carrier.set_status(RetCode::Success));
    }

    #[test]
    fn ret_code_display() {
        assert_eq!(RetCode::Unset.to_string(), "unset");
        assert_eq!(RetCode::Success.to_string(), "success");
        assert_eq!(RetCode::Failed.to_string(), "failed");
    }
}
