//! Pending-Request Table
//!
//! Associates a correlation id with a one-shot result slot. Callers register
//! a slot and await the returned [`PendingResponse`]; the message pump later
//! resolves it by id.
//!
//! Resolution removes the entry before sending, so exactly one of
//! `complete`, `fail`, `fail_all` or `discard` ever takes a given slot. Later
//! attempts find nothing and return `false`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::oneshot;

use crate::application::error::GatewayError;
use crate::infrastructure::metrics::{self, RequestOutcome};

type Slot<T> = oneshot::Sender<Result<T, GatewayError>>;

#[derive(Debug)]
struct PendingSlot<T> {
    created_at: Instant,
    tx: Slot<T>,
}

/// Thread-safe table of unresolved correlation slots.
#[derive(Debug)]
pub struct PendingRequests<T> {
    name: &'static str,
    slots: DashMap<i32, PendingSlot<T>>,
}

impl<T> PendingRequests<T> {
    /// Create an empty table. `name` labels its metrics.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: DashMap::new(),
        }
    }

    /// Register an unresolved slot under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DuplicateCorrelation`] if `id` is already pending.
    pub fn register(&self, id: i32) -> Result<PendingResponse<T>, GatewayError> {
        let rx = match self.slots.entry(id) {
            Entry::Occupied(_) => return Err(GatewayError::DuplicateCorrelation(id)),
            Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                vacant.insert(PendingSlot {
                    created_at: Instant::now(),
                    tx,
                });
                rx
            }
        };
        metrics::set_pending_requests(self.name, self.slots.len());
        Ok(PendingResponse { id, rx })
    }

    /// Resolve `id` with a value. Returns `false` if nothing was pending.
    pub fn complete(&self, id: i32, value: T) -> bool {
        self.resolve(id, Ok(value))
    }

    /// Resolve `id` with an error. Returns `false` if nothing was pending.
    pub fn fail(&self, id: i32, error: GatewayError) -> bool {
        self.resolve(id, Err(error))
    }

    /// Remove `id` without resolving it.
    ///
    /// Used when the awaiting caller has already given up.
    pub fn discard(&self, id: i32) -> bool {
        let Some((_, slot)) = self.slots.remove(&id) else {
            return false;
        };
        metrics::record_request_resolved(
            self.name,
            RequestOutcome::TimedOut,
            slot.created_at.elapsed(),
        );
        metrics::set_pending_requests(self.name, self.slots.len());
        true
    }

    /// Resolve every pending slot with a copy of `error`.
    ///
    /// Returns the number of slots resolved.
    pub fn fail_all(&self, error: &GatewayError) -> usize {
        let ids: Vec<i32> = self.slots.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.fail(*id, error.clone()))
            .count()
    }

    /// Whether `id` is pending.
    #[must_use]
    pub fn contains(&self, id: i32) -> bool {
        self.slots.contains_key(&id)
    }

    /// Number of pending slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slots are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Metrics label of this table.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    fn resolve(&self, id: i32, result: Result<T, GatewayError>) -> bool {
        let Some((_, slot)) = self.slots.remove(&id) else {
            return false;
        };

        let outcome = if result.is_ok() {
            RequestOutcome::Completed
        } else {
            RequestOutcome::Failed
        };
        metrics::record_request_resolved(self.name, outcome, slot.created_at.elapsed());
        metrics::set_pending_requests(self.name, self.slots.len());

        // The awaiting side may have been dropped; the slot is resolved either way
        let _ = slot.tx.send(result);
        true
    }
}

// =============================================================================
// Pending Response
// =============================================================================

/// Future resolving with the outcome of a registered correlation.
///
/// Resolves with [`GatewayError::Cancelled`] if the slot is dropped without
/// being resolved.
#[derive(Debug)]
#[must_use = "a pending response does nothing unless awaited"]
pub struct PendingResponse<T> {
    id: i32,
    rx: oneshot::Receiver<Result<T, GatewayError>>,
}

impl<T> PendingResponse<T> {
    /// Correlation id of this response.
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }
}

impl<T> Future for PendingResponse<T> {
    type Output = Result<T, GatewayError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(GatewayError::Cancelled)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[test]
    fn register_then_complete_resolves() {
        let table = PendingRequests::<u32>::new("test");
        let mut response = task::spawn(table.register(7).unwrap());

        assert_pending!(response.poll());
        assert!(table.complete(7, 42));

        assert!(response.is_woken());
        assert_eq!(assert_ready!(response.poll()), Ok(42));
        assert!(table.is_empty());
    }

    #[test]
    fn second_resolution_is_noop() {
        let table = PendingRequests::<u32>::new("test");
        let mut response = task::spawn(table.register(1).unwrap());

        assert!(table.complete(1, 10));
        assert!(!table.complete(1, 20));
        assert!(!table.fail(1, GatewayError::Cancelled));

        assert_eq!(assert_ready!(response.poll()), Ok(10));
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let table = PendingRequests::<u32>::new("test");
        assert!(!table.complete(99, 1));
        assert!(!table.fail(99, GatewayError::ConnectionLost));
        assert!(!table.discard(99));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let table = PendingRequests::<u32>::new("test");
        let _first = table.register(5).unwrap();
        assert_eq!(
            table.register(5).unwrap_err(),
            GatewayError::DuplicateCorrelation(5)
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn fail_all_resolves_every_slot() {
        let table = PendingRequests::<u32>::new("test");
        let mut a = task::spawn(table.register(1).unwrap());
        let mut b = task::spawn(table.register(2).unwrap());

        assert_eq!(table.fail_all(&GatewayError::ConnectionLost), 2);
        assert!(table.is_empty());

        assert_eq!(assert_ready!(a.poll()), Err(GatewayError::ConnectionLost));
        assert_eq!(assert_ready!(b.poll()), Err(GatewayError::ConnectionLost));
    }

    #[test]
    fn discarded_slot_reads_as_cancelled() {
        let table = PendingRequests::<u32>::new("test");
        let mut response = task::spawn(table.register(3).unwrap());

        assert!(table.discard(3));
        assert_eq!(assert_ready!(response.poll()), Err(GatewayError::Cancelled));
    }

    #[test]
    fn completion_after_caller_dropped_still_removes() {
        let table = PendingRequests::<u32>::new("test");
        drop(table.register(4).unwrap());

        assert!(table.complete(4, 1));
        assert!(!table.contains(4));
    }

    #[tokio::test]
    async fn concurrent_register_and_complete() {
        let table = Arc::new(PendingRequests::<i32>::new("test"));
        let mut waiters = Vec::new();

        for id in 0..200 {
            let response = table.register(id).unwrap();
            waiters.push(tokio::spawn(response));
        }

        let resolver = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                for id in 0..200 {
                    assert!(table.complete(id, id * 2));
                }
            })
        };
        resolver.await.unwrap();

        for (id, waiter) in (0..).zip(waiters) {
            assert_eq!(waiter.await.unwrap(), Ok(id * 2));
        }
        assert!(table.is_empty());
    }
}
