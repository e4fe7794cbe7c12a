//! Pending-request table.
//!
//! Maps an in-flight `request_id` to its completion bookkeeping. An entry is
//! created when dispatch starts and removed exactly once, either when the
//! request completes or when it is cancelled. Removal happens under the
//! table lock, which makes it the check-and-set that guarantees a single
//! terminal delivery per request: whoever removes the entry delivers, every
//! later completion for that id finds nothing and is dropped.
//!
//! Each registration gets a fresh `ticket`, so a stale completion from an
//! earlier request that used the same id cannot finalize a newer one.
//!
//! # Concurrency
//!
//! A `std::sync::Mutex` guards the map. The lock is held only for map
//! operations; handlers and sinks always run outside it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;

use crate::carrier::ResourceRequestResponse;
use crate::error::{VfsError, VfsResult};
use crate::handler::{Completion, CompletionEvent};
use crate::sink::CompletionSink;

/// Where a finished request goes.
pub(crate) enum Delivery {
    /// A synchronous caller blocked on a channel.
    Blocking(SyncSender<ResourceRequestResponse>),
    /// An asynchronous caller's sink.
    Sink(Box<dyn CompletionSink>),
}

impl Delivery {
    pub(crate) fn deliver(self, response: ResourceRequestResponse) {
        let request_id = response.request_id();
        tracing::debug!(
            request_id,
            status = %response.status(),
            "delivering completion"
        );
        match self {
            Delivery::Blocking(tx) => {
                if tx.send(response).is_err() {
                    tracing::debug!(request_id, "blocking caller gone, discarding result");
                }
            }
            Delivery::Sink(sink) => sink.complete(request_id, response),
        }
    }
}

struct PendingEntry {
    ticket: u64,
    delivery: Delivery,
    /// Carrier parked while a deferred handler works, with that handler's slot.
    parked: Option<(u32, ResourceRequestResponse)>,
    /// Completion that arrived before the dispatcher parked the carrier.
    early: Option<(u32, Completion)>,
}

/// A request removed from the table and ready for delivery.
pub(crate) struct Finished {
    pub(crate) delivery: Delivery,
    pub(crate) response: ResourceRequestResponse,
}

impl Finished {
    pub(crate) fn deliver(self) {
        self.delivery.deliver(self.response);
    }
}

/// Outcome of parking a carrier behind a deferred handler.
pub(crate) enum Parked {
    /// Carrier stored; the completion pump will finish it.
    Waiting,
    /// The completion had already arrived; the request is finished.
    Ready(Finished),
    /// The entry was cancelled while the chain was being walked.
    Gone(ResourceRequestResponse),
}

pub struct PendingTable {
    entries: Mutex<HashMap<u32, PendingEntry>>,
    next_ticket: AtomicU64,
    max_pending: usize,
}

impl PendingTable {
    pub fn new(max_pending: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            max_pending,
        }
    }

    /// Register `request_id`, returning the ticket for this dispatch.
    pub(crate) fn register(&self, request_id: u32, delivery: Delivery) -> VfsResult<u64> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&request_id) {
            tracing::debug!(request_id, "rejecting duplicate request id");
            return Err(VfsError::DuplicateRequest(request_id));
        }
        if entries.len() >= self.max_pending {
            tracing::warn!(
                request_id,
                max_pending = self.max_pending,
                "pending table full, refusing request"
            );
            return Err(VfsError::PendingTableFull(self.max_pending));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            request_id,
            PendingEntry {
                ticket,
                delivery,
                parked: None,
                early: None,
            },
        );
        tracing::debug!(
            request_id,
            ticket,
            pending = entries.len(),
            "registered pending request"
        );
        Ok(ticket)
    }

    /// Remove the entry for a request the dispatcher finished inline.
    pub(crate) fn take(&self, request_id: u32, ticket: u64) -> Option<Delivery> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&request_id) {
            Some(entry) if entry.ticket == ticket => {
                entries.remove(&request_id).map(|entry| entry.delivery)
            }
            _ => None,
        }
    }

    /// Park `response` until its deferred handler completes.
    ///
    /// `slot` identifies the deferring handler; an early completion from any
    /// other handler invocation is discarded.
    pub(crate) fn park(
        &self,
        request_id: u32,
        ticket: u64,
        slot: u32,
        mut response: ResourceRequestResponse,
    ) -> Parked {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(&request_id).filter(|e| e.ticket == ticket) else {
            return Parked::Gone(response);
        };

        match entry.early.take() {
            Some((early_slot, completion)) if early_slot == slot => {
                let Some(entry) = entries.remove(&request_id) else {
                    return Parked::Gone(response);
                };
                completion.apply_to(&mut response);
                return Parked::Ready(Finished {
                    delivery: entry.delivery,
                    response,
                });
            }
            Some((early_slot, _)) => {
                tracing::debug!(
                    request_id,
                    early_slot,
                    slot,
                    "discarding completion from a handler that did not defer"
                );
            }
            None => {}
        }

        entry.parked = Some((slot, response));
        Parked::Waiting
    }

    /// Apply a completion event, removing the entry if its carrier is parked.
    pub(crate) fn resolve(&self, event: CompletionEvent) -> Option<Finished> {
        let CompletionEvent {
            request_id,
            ticket,
            slot,
            completion,
        } = event;

        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(&request_id) else {
            tracing::debug!(
                request_id,
                "no pending entry (completed or cancelled), dropping late completion"
            );
            return None;
        };
        if entry.ticket != ticket {
            tracing::debug!(
                request_id,
                ticket,
                current = entry.ticket,
                "stale completion for reused request id, dropping"
            );
            return None;
        }

        let Some(parked_slot) = entry.parked.as_ref().map(|(s, _)| *s) else {
            // Dispatcher has not parked the carrier yet; keep the newest event.
            let has_newer = matches!(entry.early, Some((early_slot, _)) if early_slot >= slot);
            if has_newer {
                tracing::debug!(request_id, slot, "request already has a completion, dropping");
            } else {
                entry.early = Some((slot, completion));
            }
            return None;
        };
        if parked_slot != slot {
            tracing::debug!(
                request_id,
                slot,
                parked_slot,
                "completion from a handler that did not defer, dropping"
            );
            return None;
        }

        let entry = entries.remove(&request_id)?;
        drop(entries);

        let (_, mut response) = entry.parked?;
        completion.apply_to(&mut response);
        Some(Finished {
            delivery: entry.delivery,
            response,
        })
    }

    /// Remove `request_id` regardless of its state.
    pub(crate) fn cancel(
        &self,
        request_id: u32,
    ) -> Option<(Delivery, Option<ResourceRequestResponse>)> {
        let entry = self.entries.lock().unwrap().remove(&request_id)?;
        tracing::debug!(request_id, "cancelled pending request");
        Some((entry.delivery, entry.parked.map(|(_, response)| response)))
    }

    /// Remove `request_id` only if it still belongs to the dispatch holding `ticket`.
    pub(crate) fn cancel_ticket(
        &self,
        request_id: u32,
        ticket: u64,
    ) -> Option<(Delivery, Option<ResourceRequestResponse>)> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&request_id) {
            Some(entry) if entry.ticket == ticket => {
                let entry = entries.remove(&request_id)?;
                Some((entry.delivery, entry.parked.map(|(_, response)| response)))
            }
            _ => None,
        }
    }

    pub fn contains(&self, request_id: u32) -> bool {
        self.entries.lock().unwrap().contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted ids of all pending requests (for diagnostics).
    pub fn pending_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.entries.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{MetaMap, RetCode};
    use std::sync::mpsc;

    fn sink_delivery() -> (Delivery, tokio::sync::oneshot::Receiver<ResourceRequestResponse>) {
        let (sink, rx) = crate::sink::OneshotSink::new();
        (Delivery::Sink(Box::new(sink)), rx)
    }

    fn event(request_id: u32, ticket: u64, completion: Completion) -> CompletionEvent {
        event_from(request_id, ticket, 0, completion)
    }

    fn event_from(
        request_id: u32,
        ticket: u64,
        slot: u32,
        completion: Completion,
    ) -> CompletionEvent {
        CompletionEvent {
            request_id,
            ticket,
            slot,
            completion,
        }
    }

    #[test]
    fn register_rejects_duplicates() {
        let table = PendingTable::new(8);
        let (d1, _rx1) = sink_delivery();
        let (d2, _rx2) = sink_delivery();

        table.register(1, d1).unwrap();
        assert!(matches!(
            table.register(1, d2),
            Err(VfsError::DuplicateRequest(1))
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn register_respects_capacity() {
        let table = PendingTable::new(1);
        let (d1, _rx1) = sink_delivery();
        let (d2, _rx2) = sink_delivery();

        table.register(1, d1).unwrap();
        assert!(matches!(
            table.register(2, d2),
            Err(VfsError::PendingTableFull(1))
        ));
    }

    #[test]
    fn tickets_are_unique() {
        let table = PendingTable::new(8);
        let (d1, _rx1) = sink_delivery();
        let (d2, _rx2) = sink_delivery();
        let t1 = table.register(1, d1).unwrap();
        let t2 = table.register(2, d2).unwrap();
        assert_ne!(t1, t2);
    }

    #[test]
    fn take_removes_entry_once() {
        let table = PendingTable::new(8);
        let (delivery, _rx) = sink_delivery();
        let ticket = table.register(4, delivery).unwrap();

        assert!(table.take(4, ticket).is_some());
        assert!(table.take(4, ticket).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn take_ignores_wrong_ticket() {
        let table = PendingTable::new(8);
        let (delivery, _rx) = sink_delivery();
        let ticket = table.register(4, delivery).unwrap();

        assert!(table.take(4, ticket + 100).is_none());
        assert!(table.contains(4));
    }

    #[test]
    fn resolve_finishes_parked_request() {
        let table = PendingTable::new(8);
        let (delivery, mut rx) = sink_delivery();
        let ticket = table.register(2, delivery).unwrap();

        assert!(matches!(
            table.park(2, ticket, 0, ResourceRequestResponse::new(2, "http://x")),
            Parked::Waiting
        ));

        let finished = table
            .resolve(event(2, ticket, Completion::success(b"ok".to_vec(), MetaMap::new())))
            .expect("parked request should finish");
        finished.deliver();

        let response = rx.try_recv().unwrap();
        assert_eq!(response.status(), RetCode::Success);
        assert_eq!(response.content(), b"ok");
        assert!(table.is_empty());
    }

    #[test]
    fn second_completion_is_dropped() {
        let table = PendingTable::new(8);
        let (delivery, _rx) = sink_delivery();
        let ticket = table.register(2, delivery).unwrap();
        let _ = table.park(2, ticket, 0, ResourceRequestResponse::new(2, "http://x"));

        assert!(table.resolve(event(2, ticket, Completion::failed("first"))).is_some());
        assert!(table.resolve(event(2, ticket, Completion::failed("second"))).is_none());
    }

    #[test]
    fn early_completion_is_applied_at_park_time() {
        let table = PendingTable::new(8);
        let (delivery, _rx) = sink_delivery();
        let ticket = table.register(6, delivery).unwrap();

        assert!(table
            .resolve(event(6, ticket, Completion::failed("fast failure")))
            .is_none());
        assert!(table.contains(6));

        match table.park(6, ticket, 0, ResourceRequestResponse::new(6, "http://x")) {
            Parked::Ready(finished) => {
                assert_eq!(finished.response.status(), RetCode::Failed);
            }
            _ => panic!("expected Ready"),
        }
        assert!(table.is_empty());
    }

    #[test]
    fn early_completion_from_other_slot_is_discarded() {
        let table = PendingTable::new(8);
        let (delivery, _rx) = sink_delivery();
        let ticket = table.register(6, delivery).unwrap();

        // A handler that took a completer but delegated.
        assert!(table
            .resolve(event_from(6, ticket, 0, Completion::failed("stray")))
            .is_none());

        assert!(matches!(
            table.park(6, ticket, 1, ResourceRequestResponse::new(6, "http://x")),
            Parked::Waiting
        ));
        assert!(table
            .resolve(event_from(6, ticket, 0, Completion::failed("stray again")))
            .is_none());

        let finished = table
            .resolve(event_from(6, ticket, 1, Completion::success(b"real".to_vec(), MetaMap::new())))
            .unwrap();
        assert_eq!(finished.response.content(), b"real");
    }

    #[test]
    fn completion_after_cancel_is_noop() {
        let table = PendingTable::new(8);
        let (delivery, _rx) = sink_delivery();
        let ticket = table.register(8, delivery).unwrap();
        let _ = table.park(8, ticket, 0, ResourceRequestResponse::new(8, "http://x"));

        let (_, parked) = table.cancel(8).unwrap();
        assert!(parked.is_some());
        assert!(table
            .resolve(event(8, ticket, Completion::failed("late")))
            .is_none());
    }

    #[test]
    fn stale_ticket_cannot_finish_reused_id() {
        let table = PendingTable::new(8);
        let (old, _rx_old) = sink_delivery();
        let old_ticket = table.register(9, old).unwrap();
        table.cancel(9);

        let (new, _rx_new) = sink_delivery();
        let new_ticket = table.register(9, new).unwrap();
        let _ = table.park(9, new_ticket, 0, ResourceRequestResponse::new(9, "http://x"));

        assert!(table
            .resolve(event(9, old_ticket, Completion::failed("stale")))
            .is_none());
        assert!(table.contains(9));
    }

    #[test]
    fn park_after_cancel_returns_carrier() {
        let table = PendingTable::new(8);
        let (delivery, _rx) = sink_delivery();
        let ticket = table.register(3, delivery).unwrap();
        table.cancel(3);

        match table.park(3, ticket, 0, ResourceRequestResponse::new(3, "http://x")) {
            Parked::Gone(response) => assert_eq!(response.request_id(), 3),
            _ => panic!("expected Gone"),
        }
    }

    #[test]
    fn cancel_ticket_checks_ownership() {
        let table = PendingTable::new(8);
        let (delivery, _rx) = sink_delivery();
        let ticket = table.register(5, delivery).unwrap();

        assert!(table.cancel_ticket(5, ticket + 1).is_none());
        assert!(table.cancel_ticket(5, ticket).is_some());
        assert!(!table.contains(5));
    }

    #[test]
    fn blocking_delivery_reaches_waiter() {
        let (tx, rx) = mpsc::sync_channel(1);
        Delivery::Blocking(tx).deliver(ResourceRequestResponse::new(1, "mem://a"));
        assert_eq!(rx.recv().unwrap().request_id(), 1);
    }

    #[test]
    fn pending_ids_are_sorted() {
        let table = PendingTable::new(8);
        for id in [5, 1, 3] {
            let (delivery, _rx) = sink_delivery();
            table.register(id, delivery).unwrap();
        }
        assert_eq!(table.pending_ids(), vec![1, 3, 5]);
    }
}
