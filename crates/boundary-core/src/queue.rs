//! Bounded request queue with fingerprint coalescing and the retry engine that drains it.
//!
//! ```text
//! enqueue ──▶ pending[fingerprint] ──(due)──▶ fallback chain
//!                 ▲                               │
//!                 └──── reschedule (backoff) ◀────┤ exhausted, attempts < max
//!                                                 ├─▶ success: cache put, resolve waiters
//!                                                 └─▶ exhausted, attempts = max: approximate or fail
//! ```
//!
//! Requests are processed FIFO by `enqueued_at` among those whose retry time has
//! arrived. Requests carry no priority of their own; only providers are prioritized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::BoundaryCache;
use crate::chain::{ChainExhausted, FallbackChain};
use crate::domain::{BoundaryOptions, BoundaryResult, Fingerprint};
use crate::error::{duration_ms, BoundaryError};
use crate::events::{BoundaryEvent, EventBus};
use crate::retry::{RetryDecision, RetryPolicy};

pub type ResolveReceiver = oneshot::Receiver<Result<BoundaryResult, BoundaryError>>;
type ResolveSender = oneshot::Sender<Result<BoundaryResult, BoundaryError>>;

#[derive(Debug)]
struct Waiter {
    id: u64,
    include_approximate: bool,
    sender: ResolveSender,
}

impl Waiter {
    fn settle(self, outcome: Result<BoundaryResult, BoundaryError>) {
        // receiver dropped: the caller stopped waiting
        let _ = self.sender.send(outcome);
    }
}

#[derive(Debug)]
struct QueueRequest {
    id: Uuid,
    seq: u64,
    query: String,
    options: BoundaryOptions,
    attempts: u32,
    enqueued_at: Instant,
    next_attempt_at: Instant,
    in_flight: bool,
    waiters: Vec<Waiter>,
}

/// Read-only view of one pending request.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub id: Uuid,
    pub fingerprint: Fingerprint,
    pub query: String,
    pub attempts: u32,
    pub enqueued_at: Instant,
    pub next_attempt_at: Instant,
    pub in_flight: bool,
    pub waiters: usize,
}

/// Ticket for a caller waiting on a queued request.
#[derive(Debug)]
pub struct Enqueued {
    pub fingerprint: Fingerprint,
    pub waiter_id: u64,
    /// True when the caller attached to a request already pending for the fingerprint.
    pub coalesced: bool,
    pub receiver: ResolveReceiver,
}

/// Request handed to the retry engine for one attempt.
#[derive(Debug, Clone)]
pub struct DueRequest {
    pub id: Uuid,
    pub fingerprint: Fingerprint,
    pub query: String,
    pub options: BoundaryOptions,
    pub attempts: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<Fingerprint, QueueRequest>,
    next_seq: u64,
    closed: bool,
}

/// Bounded map of pending requests keyed by fingerprint.
#[derive(Debug)]
pub struct RequestQueue {
    max_size: usize,
    state: Mutex<QueueState>,
    next_waiter: AtomicU64,
    wake: Notify,
}

impl RequestQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            state: Mutex::new(QueueState::default()),
            next_waiter: AtomicU64::new(0),
            wake: Notify::new(),
        }
    }

    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Adds a caller for `fingerprint`, attaching to a pending request when there is one.
    ///
    /// # Errors
    ///
    /// [`BoundaryError::QueueFull`] when a new request would exceed `max_size`;
    /// [`BoundaryError::ShutDown`] once the queue is closed.
    pub fn enqueue(
        &self,
        fingerprint: Fingerprint,
        query: &str,
        options: &BoundaryOptions,
    ) -> Result<Enqueued, BoundaryError> {
        let (sender, receiver) = oneshot::channel();
        let waiter = Waiter {
            id: self.next_waiter.fetch_add(1, Ordering::Relaxed),
            include_approximate: options.include_approximate,
            sender,
        };
        let waiter_id = waiter.id;

        let mut state = self.state.lock().expect("queue state lock is not poisoned");
        if state.closed {
            return Err(BoundaryError::ShutDown);
        }

        if let Some(request) = state.pending.get_mut(&fingerprint) {
            request.waiters.push(waiter);
            debug!(fingerprint = fingerprint.short(), waiters = request.waiters.len(), "coalesced onto pending request");
            return Ok(Enqueued {
                fingerprint,
                waiter_id,
                coalesced: true,
                receiver,
            });
        }

        if state.pending.len() >= self.max_size {
            warn!(max_size = self.max_size, "queue full, rejecting request");
            return Err(BoundaryError::QueueFull {
                max_size: self.max_size,
            });
        }

        let now = Instant::now();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.insert(
            fingerprint.clone(),
            QueueRequest {
                id: Uuid::new_v4(),
                seq,
                query: query.to_owned(),
                options: options.clone(),
                attempts: 0,
                enqueued_at: now,
                next_attempt_at: now,
                in_flight: false,
                waiters: vec![waiter],
            },
        );
        drop(state);

        self.wake.notify_one();
        Ok(Enqueued {
            fingerprint,
            waiter_id,
            coalesced: false,
            receiver,
        })
    }

    /// Removes one caller and rejects it with [`BoundaryError::Cancelled`].
    ///
    /// Other callers sharing the fingerprint keep waiting. A request left without callers
    /// is dropped, or discarded when its in-flight attempt ends.
    pub fn cancel(&self, fingerprint: &Fingerprint, waiter_id: u64) -> bool {
        let mut state = self.state.lock().expect("queue state lock is not poisoned");
        let Some(request) = state.pending.get_mut(fingerprint) else {
            return false;
        };
        let Some(position) = request.waiters.iter().position(|waiter| waiter.id == waiter_id) else {
            return false;
        };

        let waiter = request.waiters.remove(position);
        if request.waiters.is_empty() && !request.in_flight {
            state.pending.remove(fingerprint);
        }
        drop(state);

        debug!(fingerprint = fingerprint.short(), waiter = waiter_id, "request cancelled by caller");
        waiter.settle(Err(BoundaryError::Cancelled));
        true
    }

    /// Requests whose retry time has arrived and that are not in flight, FIFO by arrival.
    ///
    /// Nothing is marked here: each attempt claims its request with [`begin`](Self::begin),
    /// so a caller can still cancel a request waiting behind others.
    pub fn due(&self, now: Instant) -> Vec<DueRequest> {
        let state = self.state.lock().expect("queue state lock is not poisoned");
        let mut due = state
            .pending
            .iter()
            .filter(|(_, request)| !request.in_flight && request.next_attempt_at <= now)
            .map(|(fingerprint, request)| {
                (
                    (request.enqueued_at, request.seq),
                    DueRequest {
                        id: request.id,
                        fingerprint: fingerprint.clone(),
                        query: request.query.clone(),
                        options: request.options.clone(),
                        attempts: request.attempts,
                    },
                )
            })
            .collect::<Vec<_>>();
        due.sort_by_key(|(order, _)| *order);
        due.into_iter().map(|(_, request)| request).collect()
    }

    /// Marks `due` in flight right before its attempt.
    ///
    /// Returns false when it was cancelled or replaced since [`due`](Self::due) listed it.
    pub fn begin(&self, due: &DueRequest) -> bool {
        let mut state = self.state.lock().expect("queue state lock is not poisoned");
        let Some(request) = state
            .pending
            .get_mut(&due.fingerprint)
            .filter(|request| request.id == due.id && !request.in_flight)
        else {
            return false;
        };
        if request.waiters.is_empty() {
            state.pending.remove(&due.fingerprint);
            return false;
        }
        request.in_flight = true;
        true
    }

    /// Records a failed attempt and schedules the next one.
    ///
    /// Returns false when the request is gone or every caller cancelled; the request is
    /// then removed.
    pub fn reschedule(&self, due: &DueRequest, attempts: u32, next_attempt_at: Instant) -> bool {
        let mut state = self.state.lock().expect("queue state lock is not poisoned");
        let Some(request) = state
            .pending
            .get_mut(&due.fingerprint)
            .filter(|request| request.id == due.id)
        else {
            return false;
        };

        if request.waiters.is_empty() {
            state.pending.remove(&due.fingerprint);
            return false;
        }
        request.attempts = attempts;
        request.next_attempt_at = next_attempt_at;
        request.in_flight = false;
        drop(state);

        self.wake.notify_one();
        true
    }

    /// Removes the request and hands back its callers.
    fn finish(&self, due: &DueRequest) -> Vec<Waiter> {
        let mut state = self.state.lock().expect("queue state lock is not poisoned");
        let matches = state
            .pending
            .get(&due.fingerprint)
            .map(|request| request.id == due.id)
            .unwrap_or(false);
        if !matches {
            return Vec::new();
        }
        state
            .pending
            .remove(&due.fingerprint)
            .map(|request| request.waiters)
            .unwrap_or_default()
    }

    /// Earliest retry time among requests not in flight.
    pub fn next_due(&self) -> Option<Instant> {
        self.state
            .lock()
            .expect("queue state lock is not poisoned")
            .pending
            .values()
            .filter(|request| !request.in_flight)
            .map(|request| request.next_attempt_at)
            .min()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("queue state lock is not poisoned")
            .pending
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .expect("queue state lock is not poisoned")
            .closed
    }

    pub fn pending(&self) -> Vec<PendingRequest> {
        let state = self.state.lock().expect("queue state lock is not poisoned");
        let mut pending = state
            .pending
            .iter()
            .map(|(fingerprint, request)| {
                let view = PendingRequest {
                    id: request.id,
                    fingerprint: fingerprint.clone(),
                    query: request.query.clone(),
                    attempts: request.attempts,
                    enqueued_at: request.enqueued_at,
                    next_attempt_at: request.next_attempt_at,
                    in_flight: request.in_flight,
                    waiters: request.waiters.len(),
                };
                ((request.enqueued_at, request.seq), view)
            })
            .collect::<Vec<_>>();
        pending.sort_by_key(|(order, _)| *order);
        pending.into_iter().map(|(_, view)| view).collect()
    }

    /// Resolves once an enqueue or reschedule wants the worker's attention.
    pub async fn notified(&self) {
        self.wake.notified().await;
    }

    /// Refuses new work and rejects every outstanding caller with [`BoundaryError::ShutDown`].
    pub fn close(&self) -> usize {
        let drained = {
            let mut state = self.state.lock().expect("queue state lock is not poisoned");
            state.closed = true;
            state.pending.drain().collect::<Vec<_>>()
        };

        let mut rejected = 0;
        for (_, request) in drained {
            for waiter in request.waiters {
                waiter.settle(Err(BoundaryError::ShutDown));
                rejected += 1;
            }
        }
        rejected
    }
}

/// Drains due requests through the fallback chain and applies the retry policy.
#[derive(Debug, Clone)]
pub struct RetryEngine {
    queue: Arc<RequestQueue>,
    chain: Arc<FallbackChain>,
    cache: BoundaryCache,
    events: Arc<EventBus>,
    policy: RetryPolicy,
}

impl RetryEngine {
    pub fn new(
        queue: Arc<RequestQueue>,
        chain: Arc<FallbackChain>,
        cache: BoundaryCache,
        events: Arc<EventBus>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            chain,
            cache,
            events,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs one attempt for every due request, in FIFO order. Returns how many ran.
    pub async fn process_due(&self) -> usize {
        let mut count = 0;
        for request in self.queue.due(Instant::now()) {
            if !self.queue.begin(&request) {
                debug!(fingerprint = request.fingerprint.short(), "skipping cancelled request");
                continue;
            }
            self.attempt(request).await;
            count += 1;
        }
        count
    }

    async fn attempt(&self, due: DueRequest) {
        match self.chain.resolve(&due.query, &due.options).await {
            Ok(result) => self.succeed(&due, result).await,
            Err(exhausted) => self.fail(&due, exhausted).await,
        }
    }

    async fn succeed(&self, due: &DueRequest, result: BoundaryResult) {
        let attempts = due.attempts + 1;
        self.cache.put(due.fingerprint.clone(), result.clone()).await;

        let waiters = self.queue.finish(due);
        info!(
            fingerprint = due.fingerprint.short(),
            provider = %result.source_provider_id,
            attempts,
            waiters = waiters.len(),
            "boundary resolved"
        );
        let provider_id = result.source_provider_id.clone();
        for waiter in waiters {
            waiter.settle(Ok(result.clone()));
        }
        self.events.publish(&BoundaryEvent::Resolved {
            fingerprint: due.fingerprint.clone(),
            provider_id,
            attempts,
        });
    }

    async fn fail(&self, due: &DueRequest, exhausted: ChainExhausted) {
        let attempts = due.attempts + 1;

        if let RetryDecision::RetryAfter(delay) = self.policy.after_failure(attempts) {
            if self.queue.reschedule(due, attempts, Instant::now() + delay) {
                debug!(
                    fingerprint = due.fingerprint.short(),
                    attempts,
                    delay_ms = duration_ms(delay),
                    reason = %exhausted,
                    "retry scheduled"
                );
                self.events.publish(&BoundaryEvent::RetryScheduled {
                    fingerprint: due.fingerprint.clone(),
                    attempt: attempts,
                    delay_ms: duration_ms(delay),
                });
            }
            return;
        }

        let waiters = self.queue.finish(due);
        let stale = if waiters.iter().any(|waiter| waiter.include_approximate) {
            self.cache.get_stale(&due.fingerprint).await
        } else {
            None
        };

        let mut served_approximate = false;
        for waiter in waiters {
            match stale.as_ref().filter(|_| waiter.include_approximate) {
                Some(stale) => {
                    served_approximate = true;
                    waiter.settle(Ok(stale.approximate()));
                }
                None => waiter.settle(Err(BoundaryError::resolution_failed(
                    attempts,
                    exhausted.clone(),
                ))),
            }
        }

        warn!(
            fingerprint = due.fingerprint.short(),
            attempts,
            served_approximate,
            reason = %exhausted,
            "resolution failed"
        );
        self.events.publish(&BoundaryEvent::Failed {
            fingerprint: due.fingerprint.clone(),
            attempts,
            served_approximate,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AdminLevels;

    fn fingerprint(query: &str) -> Fingerprint {
        Fingerprint::compute(query, &AdminLevels::default(), None).expect("valid query")
    }

    #[test]
    fn full_queue_rejects_new_fingerprints_without_growing() {
        let queue = RequestQueue::new(1);
        let options = BoundaryOptions::default();

        let _first = queue
            .enqueue(fingerprint("athens"), "athens", &options)
            .expect("capacity");
        let rejected = queue.enqueue(fingerprint("sparta"), "sparta", &options);

        assert!(matches!(rejected, Err(BoundaryError::QueueFull { max_size: 1 })));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn same_fingerprint_coalesces_even_when_full() {
        let queue = RequestQueue::new(1);
        let options = BoundaryOptions::default();

        let first = queue
            .enqueue(fingerprint("athens"), "athens", &options)
            .expect("capacity");
        let second = queue
            .enqueue(fingerprint("athens"), "Athens", &options)
            .expect("coalesced");

        assert!(!first.coalesced);
        assert!(second.coalesced);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending()[0].waiters, 2);
    }

    #[tokio::test]
    async fn cancel_rejects_only_that_caller() {
        let queue = RequestQueue::new(10);
        let options = BoundaryOptions::default();
        let first = queue
            .enqueue(fingerprint("athens"), "athens", &options)
            .expect("capacity");
        let second = queue
            .enqueue(fingerprint("athens"), "athens", &options)
            .expect("coalesced");

        assert!(queue.cancel(&first.fingerprint, first.waiter_id));
        assert!(!queue.cancel(&first.fingerprint, first.waiter_id));

        assert!(matches!(first.receiver.await, Ok(Err(BoundaryError::Cancelled))));
        assert_eq!(queue.len(), 1);

        assert!(queue.cancel(&second.fingerprint, second.waiter_id));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn due_keeps_arrival_order_for_requests_enqueued_at_the_same_instant() {
        let queue = RequestQueue::new(10);
        let options = BoundaryOptions::default();
        let queries = ["a1", "b2", "c3", "d4", "e5", "f6", "g7", "h8"];
        let _tickets = queries
            .iter()
            .map(|query| queue.enqueue(fingerprint(query), query, &options).expect("capacity"))
            .collect::<Vec<_>>();

        let due = queue.due(Instant::now());

        assert_eq!(
            due.iter().map(|request| request.query.as_str()).collect::<Vec<_>>(),
            queries
        );
        assert_eq!(
            queue.pending().iter().map(|request| request.query.as_str()).collect::<Vec<_>>(),
            queries
        );
    }

    #[tokio::test(start_paused = true)]
    async fn begin_claims_requests_and_skips_future_ones() {
        let queue = RequestQueue::new(10);
        let options = BoundaryOptions::default();
        let _tickets = ["first", "second", "third"]
            .iter()
            .map(|query| queue.enqueue(fingerprint(query), query, &options).expect("capacity"))
            .collect::<Vec<_>>();

        let due = queue.due(Instant::now());
        assert!(due.iter().all(|request| queue.begin(request)));
        assert!(!queue.begin(&due[0]));
        assert!(queue.due(Instant::now()).is_empty());

        let later = Instant::now() + std::time::Duration::from_secs(5);
        assert!(queue.reschedule(&due[1], 1, later));
        assert_eq!(queue.next_due(), Some(later));
        assert!(queue.due(Instant::now()).is_empty());
        assert_eq!(queue.due(later).len(), 1);
    }

    #[tokio::test]
    async fn cancelled_request_waiting_its_turn_is_never_begun() {
        let queue = RequestQueue::new(10);
        let options = BoundaryOptions::default();
        let _first = queue
            .enqueue(fingerprint("athens"), "athens", &options)
            .expect("capacity");
        let second = queue
            .enqueue(fingerprint("sparta"), "sparta", &options)
            .expect("capacity");
        let due = queue.due(Instant::now());
        assert!(queue.begin(&due[0]));

        assert!(queue.cancel(&second.fingerprint, second.waiter_id));

        assert!(!queue.begin(&due[1]));
        assert_eq!(queue.len(), 1);
        assert!(matches!(second.receiver.await, Ok(Err(BoundaryError::Cancelled))));
    }

    #[tokio::test]
    async fn close_rejects_outstanding_and_refuses_new_work() {
        let queue = RequestQueue::new(10);
        let options = BoundaryOptions::default();
        let ticket = queue
            .enqueue(fingerprint("athens"), "athens", &options)
            .expect("capacity");

        assert_eq!(queue.close(), 1);

        assert!(matches!(ticket.receiver.await, Ok(Err(BoundaryError::ShutDown))));
        assert!(matches!(
            queue.enqueue(fingerprint("athens"), "athens", &options),
            Err(BoundaryError::ShutDown)
        ));
    }
}
