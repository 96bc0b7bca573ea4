//! Serial priority queue with per-task deadlines.
//!
//! Exactly one task runs at a time.  Pending tasks are ordered by descending
//! priority and, within a priority, by enqueue order: the heap key is
//! `(priority, Reverse(seq))` with `seq` strictly increasing.
//!
//! Each task gets an independent deadline timer armed at enqueue time.  When
//! it fires, a still-pending task is removed from the heap and a running
//! task's eventual result is discarded; either way the handle resolves with
//! `TASK_TIMEOUT`.  Whichever of the job or the timer finishes first claims
//! the task's result slot.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};

use super::retry::{with_retry, RetryPolicy};
use crate::config::QueueConfig;
use crate::error::AssistantError;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type ResultSlot<T> = Arc<Mutex<Option<oneshot::Sender<Result<T, AssistantError>>>>>;

/// Hand `result` to the waiting handle unless the slot was already claimed.
fn deliver<T>(slot: &ResultSlot<T>, result: Result<T, AssistantError>) -> bool {
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    match sender {
        // The caller may have dropped its handle; that is not an error.
        Some(tx) => {
            let _ = tx.send(result);
            true
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Pending
// ---------------------------------------------------------------------------

struct Pending {
    priority: i32,
    seq: u64,
    job: Job,
}

impl Pending {
    fn key(&self) -> (i32, Reverse<u64>) {
        (self.priority, Reverse(self.seq))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Pending>,
    processing: bool,
    next_seq: u64,
    drain: Option<JoinHandle<()>>,
    timers: HashMap<u64, AbortHandle>,
}

struct Inner {
    state: Mutex<QueueState>,
    policy: RetryPolicy,
    default_timeout: Duration,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deadline expiry: drop the task if it never started.
    fn expire(&self, id: u64) {
        let mut state = self.lock();
        state.timers.remove(&id);
        let before = state.heap.len();
        state.heap.retain(|p| p.seq != id);
        if state.heap.len() < before {
            log::debug!("queue: task {id} timed out while pending");
        } else {
            log::debug!("queue: task {id} timed out while running; result discarded");
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.lock();
                match state.heap.pop() {
                    Some(next) => next,
                    None => {
                        state.processing = false;
                        state.drain = None;
                        return;
                    }
                }
            };

            log::debug!("queue: running task {} (priority {})", next.seq, next.priority);
            (next.job)().await;

            if let Some(timer) = self.lock().timers.remove(&next.seq) {
                timer.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TaskQueue
// ---------------------------------------------------------------------------

/// Cloneable handle to a serial priority queue.
///
/// Processing runs on the tokio runtime; enqueueing requires a runtime
/// context.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    pub fn new(policy: RetryPolicy, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                policy,
                default_timeout,
            }),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(RetryPolicy::from(config), config.default_task_timeout())
    }

    /// Queue `task` and start processing if idle.
    ///
    /// `task` is called once per attempt; retryable failures are retried
    /// under the queue's [`RetryPolicy`].  `timeout` defaults to the queue's
    /// default task timeout and is measured from this call.
    pub fn enqueue<T, F, Fut>(&self, task: F, priority: i32, timeout: Option<Duration>) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AssistantError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let slot: ResultSlot<T> = Arc::new(Mutex::new(Some(tx)));
        let timeout = timeout.unwrap_or(self.inner.default_timeout);
        let policy = self.inner.policy;

        let mut state = self.inner.lock();
        let id = state.next_seq;
        state.next_seq += 1;

        let timer = {
            let inner: Weak<Inner> = Arc::downgrade(&self.inner);
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = inner.upgrade() {
                    inner.expire(id);
                }
                deliver(&slot, Err(AssistantError::timeout("Task timed out")));
            })
        };
        state.timers.insert(id, timer.abort_handle());

        let job: Job = Box::new(move || {
            Box::pin(async move {
                let context = format!("task {id}");
                let result = with_retry(|| task(), &context, policy).await;
                if !deliver(&slot, result) {
                    log::debug!("queue: {context} finished after its deadline");
                }
            })
        });

        state.heap.push(Pending { priority, seq: id, job });
        log::debug!(
            "queue: enqueued task {id} (priority {priority}, {} pending)",
            state.heap.len()
        );

        if !state.processing {
            state.processing = true;
            let inner = Arc::clone(&self.inner);
            state.drain = Some(tokio::spawn(inner.drain()));
        }

        TaskHandle { id, rx }
    }

    /// Discard every pending task.
    ///
    /// Discarded handles are neither resolved nor rejected by the discard
    /// itself; their deadline timers still fire and reject them with
    /// `TASK_TIMEOUT`.  The running task, if any, is unaffected.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        let dropped = state.heap.len();
        state.heap.clear();
        if dropped > 0 {
            log::info!("queue: cleared {dropped} pending task(s)");
        }
    }

    /// Number of tasks waiting to run.
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the processing loop is active.
    pub fn is_processing(&self) -> bool {
        self.inner.lock().processing
    }

    /// Abort the processing loop and every timer, dropping pending work.
    ///
    /// Outstanding handles resolve with a non-retryable `UNKNOWN_ERROR`.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        state.heap.clear();
        for (_, timer) in state.timers.drain() {
            timer.abort();
        }
        if let Some(drain) = state.drain.take() {
            drain.abort();
        }
        state.processing = false;
        log::debug!("queue: shut down");
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

// ---------------------------------------------------------------------------
// TaskHandle
// ---------------------------------------------------------------------------

/// Resolves with the task's result, its timeout, or a drop error.
pub struct TaskHandle<T> {
    id: u64,
    rx: oneshot::Receiver<Result<T, AssistantError>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, AssistantError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(AssistantError::unknown("Task was dropped before completing")
                .with_retryable(false)),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use tokio::sync::Notify;

    fn queue() -> TaskQueue {
        TaskQueue::new(
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(100),
            },
            Duration::from_secs(30),
        )
    }

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn record(log: &Log, name: &'static str) -> impl Fn() -> BoxFuture<'static, Result<(), AssistantError>> {
        let log = Arc::clone(log);
        move || {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().unwrap().push(name);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn higher_priority_runs_first() {
        let q = queue();
        let log: Log = Arc::default();

        let low = q.enqueue(record(&log, "low"), 0, None);
        let high = q.enqueue(record(&log, "high"), 5, None);

        high.await.unwrap();
        low.await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn equal_priority_is_fifo_behind_running_task() {
        let q = queue();
        let log: Log = Arc::default();
        let gate = Arc::new(Notify::new());

        let blocker = {
            let gate = Arc::clone(&gate);
            q.enqueue(
                move || {
                    let gate = Arc::clone(&gate);
                    async move {
                        gate.notified().await;
                        Ok(())
                    }
                },
                10,
                None,
            )
        };
        tokio::task::yield_now().await;
        assert!(q.is_processing());

        let handles = vec![
            q.enqueue(record(&log, "a"), 1, None),
            q.enqueue(record(&log, "b"), 3, None),
            q.enqueue(record(&log, "c"), 1, None),
            q.enqueue(record(&log, "d"), 3, None),
        ];
        assert_eq!(q.len(), 4);

        gate.notify_one();
        blocker.await.unwrap();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec!["b", "d", "a", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_task_times_out_behind_slow_work() {
        let q = queue();
        let slow = q.enqueue(
            || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(1)
            },
            5,
            None,
        );
        let starved = q.enqueue(|| async { Ok(2) }, 0, Some(Duration::from_secs(1)));

        let err = starved.await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskTimeout);
        assert!(!err.retryable);
        assert_eq!(q.len(), 0);

        assert_eq!(slow.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn running_task_result_is_discarded_after_deadline() {
        let q = queue();
        let handle = q.enqueue(
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late")
            },
            0,
            Some(Duration::from_secs(2)),
        );

        let err = handle.await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_are_retried() {
        let q = queue();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let handle = q.enqueue(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, AtomicOrdering::SeqCst) < 2 {
                        Err(AssistantError::network("flaky"))
                    } else {
                        Ok("ok")
                    }
                }
            },
            0,
            None,
        );

        assert_eq!(handle.await.unwrap(), "ok");
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_rejects_handle() {
        let q = queue();
        let handle = q.enqueue(
            || async { Err::<(), _>(AssistantError::rate_limited("slow down")) },
            0,
            None,
        );

        let err = handle.await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimitExceeded);
    }

    #[tokio::test]
    async fn processing_stops_when_drained() {
        let q = queue();
        assert!(!q.is_processing());

        q.enqueue(|| async { Ok(()) }, 0, None).await.unwrap();
        tokio::task::yield_now().await;

        assert!(!q.is_processing());
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_pending_and_timer_rejects_later() {
        let q = queue();
        let gate = Arc::new(Notify::new());
        let blocker = {
            let gate = Arc::clone(&gate);
            q.enqueue(
                move || {
                    let gate = Arc::clone(&gate);
                    async move {
                        gate.notified().await;
                        Ok(())
                    }
                },
                0,
                None,
            )
        };
        tokio::task::yield_now().await;

        let ran = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ran);
        let pending = q.enqueue(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(())
                }
            },
            0,
            Some(Duration::from_secs(3)),
        );

        q.clear();
        assert!(q.is_empty());
        gate.notify_one();
        blocker.await.unwrap();

        let err = pending.await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskTimeout);
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_rejects_outstanding_handles() {
        let q = queue();
        let handle = q.enqueue(
            || async {
                std::future::pending::<()>().await;
                Ok(())
            },
            0,
            None,
        );
        tokio::task::yield_now().await;

        q.shutdown();
        let err = handle.await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unknown);
        assert!(!q.is_processing());
    }
}
