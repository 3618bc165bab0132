//! Priority task queue bounding the number of concurrently running jobs.
//!
//! Up to `capacity` jobs hold a [`QueuePermit`] at a time. Everyone else waits
//! in a list ordered by priority (highest first), ties broken by arrival
//! order. A waiting job can be re-prioritized in place with
//! [`PriorityTaskQueue::change_priority`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Returned when the caller cancelled while waiting for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("canceled while waiting for a download slot")]
pub struct Canceled;

struct Waiter {
    job_id: String,
    priority: i32,
    seq: u64,
    wake: oneshot::Sender<()>,
}

impl Waiter {
    /// True when `self` is admitted before a waiter with the given key.
    fn precedes(&self, priority: i32, seq: u64) -> bool {
        self.priority > priority || (self.priority == priority && self.seq < seq)
    }
}

struct QueueState {
    capacity: usize,
    admitted: usize,
    waiters: Vec<Waiter>,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, waiter: Waiter) {
        let pos = self
            .waiters
            .iter()
            .position(|w| !w.precedes(waiter.priority, waiter.seq))
            .unwrap_or(self.waiters.len());
        self.waiters.insert(pos, waiter);
    }

    fn remove(&mut self, job_id: &str, seq: u64) -> Option<Waiter> {
        let pos = self
            .waiters
            .iter()
            .position(|w| w.seq == seq && w.job_id == job_id)?;
        Some(self.waiters.remove(pos))
    }

    /// Admits waiters while there is spare capacity.
    fn wake_waiters(&mut self) {
        while self.admitted < self.capacity && !self.waiters.is_empty() {
            let waiter = self.waiters.remove(0);
            if waiter.wake.send(()).is_ok() {
                self.admitted += 1;
                debug!(
                    job_id = %waiter.job_id,
                    priority = waiter.priority,
                    admitted = self.admitted,
                    "admitted waiting job"
                );
            } else {
                trace!(job_id = %waiter.job_id, "dropping abandoned waiter");
            }
        }
    }
}

/// Bounded-concurrency admission with priority ordering.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct PriorityTaskQueue {
    state: Arc<Mutex<QueueState>>,
}

impl std::fmt::Debug for PriorityTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PriorityTaskQueue")
            .field("capacity", &state.capacity)
            .field("admitted", &state.admitted)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

impl PriorityTaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                capacity,
                admitted: 0,
                waiters: Vec::new(),
                next_seq: 0,
            })),
        }
    }

    /// Registers `job_id` for admission.
    ///
    /// The job is admitted on the spot when a slot is free; otherwise it is
    /// parked and the returned ticket must be awaited with [`Ticket::wait`].
    pub fn enqueue(&self, job_id: &str, priority: i32) -> Ticket {
        let mut state = self.state.lock();
        if state.admitted < state.capacity {
            state.admitted += 1;
            debug!(job_id, admitted = state.admitted, "admitted job immediately");
            return Ticket {
                queue: self.clone(),
                job_id: job_id.to_string(),
                inner: Some(TicketState::Admitted),
            };
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let (wake, rx) = oneshot::channel();
        state.insert(Waiter {
            job_id: job_id.to_string(),
            priority,
            seq,
            wake,
        });
        debug!(job_id, priority, waiting = state.waiters.len(), "job queued");
        Ticket {
            queue: self.clone(),
            job_id: job_id.to_string(),
            inner: Some(TicketState::Waiting { seq, rx }),
        }
    }

    /// Waits until `job_id` is admitted or `token` is cancelled.
    pub async fn acquire(
        &self,
        job_id: &str,
        priority: i32,
        token: &CancellationToken,
    ) -> Result<QueuePermit, Canceled> {
        self.enqueue(job_id, priority).wait(token).await
    }

    /// Changes the priority of a waiting job, keeping its arrival order for
    /// ties. Returns `false` if the job is not waiting.
    pub fn change_priority(&self, job_id: &str, priority: i32) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state
            .waiters
            .iter()
            .position(|w| w.job_id == job_id)
        else {
            return false;
        };
        let mut waiter = state.waiters.remove(pos);
        debug!(job_id, from = waiter.priority, to = priority, "changing priority");
        waiter.priority = priority;
        state.insert(waiter);
        true
    }

    /// Sets the number of concurrently admitted jobs.
    ///
    /// Shrinking never evicts admitted jobs; growing admits waiters at once.
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.state.lock();
        debug!(from = state.capacity, to = capacity, "changing queue capacity");
        state.capacity = capacity;
        state.wake_waiters();
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn admitted_count(&self) -> usize {
        self.state.lock().admitted
    }

    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Job ids in admission order.
    pub fn waiting_jobs(&self) -> Vec<String> {
        self.state
            .lock()
            .waiters
            .iter()
            .map(|w| w.job_id.clone())
            .collect()
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.admitted = state.admitted.saturating_sub(1);
        state.wake_waiters();
    }
}

enum TicketState {
    Admitted,
    Waiting {
        seq: u64,
        rx: oneshot::Receiver<()>,
    },
}

/// A pending admission returned by [`PriorityTaskQueue::enqueue`].
///
/// Dropping a ticket withdraws it from the queue, or frees the slot if it
/// had already been admitted.
#[must_use = "a ticket does nothing unless waited on"]
pub struct Ticket {
    queue: PriorityTaskQueue,
    job_id: String,
    inner: Option<TicketState>,
}

impl Ticket {
    pub fn is_admitted(&self) -> bool {
        matches!(self.inner, Some(TicketState::Admitted))
    }

    pub async fn wait(mut self, token: &CancellationToken) -> Result<QueuePermit, Canceled> {
        let admitted = match &mut self.inner {
            Some(TicketState::Admitted) => !token.is_cancelled(),
            Some(TicketState::Waiting { rx, .. }) => {
                tokio::select! {
                    biased;
                    woken = rx => woken.is_ok(),
                    _ = token.cancelled() => false,
                }
            }
            None => false,
        };
        if !admitted {
            debug!(job_id = %self.job_id, "cancelled while waiting");
            return Err(Canceled);
        }

        self.inner = None;
        Ok(QueuePermit {
            queue: self.queue.clone(),
            job_id: self.job_id.clone(),
        })
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        let mut state = self.queue.state.lock();
        let holds_slot = match inner {
            TicketState::Admitted => true,
            TicketState::Waiting { seq, mut rx } => {
                state.remove(&self.job_id, seq).is_none() && rx.try_recv().is_ok()
            }
        };
        if holds_slot {
            trace!(job_id = %self.job_id, "returning slot of abandoned ticket");
            state.admitted = state.admitted.saturating_sub(1);
            state.wake_waiters();
        }
    }
}

/// An admission slot, released when dropped.
#[derive(Debug)]
pub struct QueuePermit {
    queue: PriorityTaskQueue,
    job_id: String,
}

impl QueuePermit {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for QueuePermit {
    fn drop(&mut self) {
        trace!(job_id = %self.job_id, "releasing queue slot");
        self.queue.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn admitted(queue: &PriorityTaskQueue, ids: &[&str]) -> Vec<QueuePermit> {
        let token = CancellationToken::new();
        let mut permits = Vec::new();
        for id in ids {
            permits.push(queue.acquire(id, 0, &token).await.unwrap());
        }
        permits
    }

    #[tokio::test]
    async fn test_admits_up_to_capacity_immediately() {
        let queue = PriorityTaskQueue::new(2);
        let _permits = admitted(&queue, &["a", "b"]).await;
        assert_eq!(queue.admitted_count(), 2);

        let ticket = queue.enqueue("c", 0);
        assert!(!ticket.is_admitted());
        assert_eq!(queue.waiting_count(), 1);
    }

    #[tokio::test]
    async fn test_priority_then_arrival_order() {
        let queue = PriorityTaskQueue::new(2);
        let mut permits = admitted(&queue, &["A", "B"]).await;

        let c = queue.enqueue("C", 0);
        let d = queue.enqueue("D", 5);
        let e = queue.enqueue("E", -3);
        assert_eq!(queue.waiting_jobs(), vec!["D", "C", "E"]);

        let token = CancellationToken::new();
        let d = tokio::spawn({
            let token = token.clone();
            async move { d.wait(&token).await }
        });
        let c = tokio::spawn({
            let token = token.clone();
            async move { c.wait(&token).await }
        });
        let e = tokio::spawn({
            let token = token.clone();
            async move { e.wait(&token).await }
        });

        drop(permits.pop());
        let d = d.await.unwrap().unwrap();
        assert_eq!(d.job_id(), "D");
        assert_eq!(queue.waiting_jobs(), vec!["C", "E"]);

        drop(permits.pop());
        let c = c.await.unwrap().unwrap();
        assert_eq!(c.job_id(), "C");

        drop(d);
        let e = e.await.unwrap().unwrap();
        assert_eq!(e.job_id(), "E");
        assert_eq!(queue.admitted_count(), 2);
    }

    #[tokio::test]
    async fn test_change_priority_reorders_waiters() {
        let queue = PriorityTaskQueue::new(1);
        let _a = admitted(&queue, &["a"]).await;
        let _b = queue.enqueue("b", 1);
        let _c = queue.enqueue("c", 1);
        let _d = queue.enqueue("d", 0);

        assert!(queue.change_priority("d", 2));
        assert_eq!(queue.waiting_jobs(), vec!["d", "b", "c"]);

        // Dropping to the same priority keeps arrival order among equals.
        assert!(queue.change_priority("b", 1));
        assert_eq!(queue.waiting_jobs(), vec!["d", "b", "c"]);

        assert!(!queue.change_priority("a", 9));
        assert!(!queue.change_priority("missing", 9));
    }

    #[tokio::test]
    async fn test_cancel_removes_waiter_without_admission() {
        let queue = PriorityTaskQueue::new(1);
        let permit = admitted(&queue, &["a"]).await.pop().unwrap();

        let token = CancellationToken::new();
        let waiting = tokio::spawn({
            let queue = queue.clone();
            let token = token.clone();
            async move { queue.acquire("b", 0, &token).await }
        });
        while queue.waiting_count() == 0 {
            tokio::task::yield_now().await;
        }

        token.cancel();
        assert_eq!(waiting.await.unwrap().unwrap_err(), Canceled);
        assert_eq!(queue.waiting_count(), 0);
        assert!(!queue.change_priority("b", 3));

        drop(permit);
        assert_eq!(queue.admitted_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_token_fails_immediate_admission() {
        let queue = PriorityTaskQueue::new(1);
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(queue.acquire("a", 0, &token).await.unwrap_err(), Canceled);
        assert_eq!(queue.admitted_count(), 0);
    }

    #[tokio::test]
    async fn test_capacity_changes() {
        let queue = PriorityTaskQueue::new(2);
        let mut permits = admitted(&queue, &["a", "b"]).await;
        let c = queue.enqueue("c", 0);
        let d = queue.enqueue("d", 0);

        queue.set_capacity(1);
        assert_eq!(queue.admitted_count(), 2);
        drop(permits.pop());
        assert_eq!(queue.admitted_count(), 1);
        assert_eq!(queue.waiting_count(), 2);

        queue.set_capacity(3);
        assert_eq!(queue.admitted_count(), 3);
        let token = CancellationToken::new();
        let c = tokio::time::timeout(Duration::from_secs(1), c.wait(&token))
            .await
            .unwrap()
            .unwrap();
        let d = tokio::time::timeout(Duration::from_secs(1), d.wait(&token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!((c.job_id(), d.job_id()), ("c", "d"));
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_take_a_slot() {
        let queue = PriorityTaskQueue::new(1);
        let permit = admitted(&queue, &["a"]).await.pop().unwrap();
        drop(queue.enqueue("gone", 10));
        let kept = queue.enqueue("kept", 0);
        assert_eq!(queue.waiting_count(), 1);

        drop(permit);
        let kept = kept.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(kept.job_id(), "kept");
        assert_eq!(queue.admitted_count(), 1);
    }
}
