//! Completion sinks — where asynchronous results are delivered.
//!
//! A sink is invoked exactly once per request, after the request's pending
//! entry is gone. Sinks must cope with the original caller having gone away
//! by discarding the result; they never fail back into the loader.

use tokio::sync::oneshot;

use crate::carrier::ResourceRequestResponse;

pub trait CompletionSink: Send {
    fn complete(self: Box<Self>, request_id: u32, response: ResourceRequestResponse);
}

impl<F> CompletionSink for F
where
    F: FnOnce(u32, ResourceRequestResponse) + Send,
{
    fn complete(self: Box<Self>, request_id: u32, response: ResourceRequestResponse) {
        (*self)(request_id, response)
    }
}

/// Sink backed by a tokio oneshot channel.
///
/// If the receiver was dropped (caller cancelled or torn down), the result
/// is discarded.
pub struct OneshotSink {
    tx: oneshot::Sender<ResourceRequestResponse>,
}

impl OneshotSink {
    pub fn new() -> (Self, oneshot::Receiver<ResourceRequestResponse>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }
}

impl CompletionSink for OneshotSink {
    fn complete(self: Box<Self>, request_id: u32, response: ResourceRequestResponse) {
        if self.tx.send(response).is_err() {
            tracing::debug!(request_id, "receiver dropped, discarding completion");
        }
    }
}
