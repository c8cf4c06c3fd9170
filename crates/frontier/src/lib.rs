use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use priority_queue::PriorityQueue;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::debug;

use wayscan_core::QueueItem;

/// Queue rank: lower `priority` first, FIFO within a priority class via the
/// admission sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rank {
    priority: i64,
    seq: u64,
}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        // PriorityQueue pops the greatest rank; invert so the smallest
        // (priority, seq) pair is served first.
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

struct Inner {
    queue: PriorityQueue<u64, Rank>,
    /// Payloads keyed by admission sequence; the bool records whether the
    /// push consumed a capacity permit.
    items: HashMap<u64, (QueueItem, bool)>,
    next_seq: u64,
}

/// Bounded priority queue feeding the worker pool. `push` awaits space when
/// the queue is at capacity; `pop` waits at most the given timeout so idle
/// workers can poll the shutdown flag.
pub struct Frontier {
    inner: Mutex<Inner>,
    space: Semaphore,
    ready: Notify,
    /// Admitted items not yet marked done; zero means the crawl is drained.
    unfinished: AtomicUsize,
}

impl Frontier {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: PriorityQueue::new(),
                items: HashMap::new(),
                next_seq: 0,
            }),
            space: Semaphore::new(capacity),
            ready: Notify::new(),
            unfinished: AtomicUsize::new(0),
        }
    }

    /// Add an item, waiting for capacity. Returns false only after
    /// `close()`, when pending pushes are abandoned so blocked workers can
    /// reach their poison pill.
    pub async fn push(&self, item: QueueItem) -> bool {
        self.unfinished.fetch_add(1, AtomicOrdering::SeqCst);
        match self.space.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => {
                self.unfinished.fetch_sub(1, AtomicOrdering::SeqCst);
                return false;
            }
        }
        self.enqueue(item, true).await;
        true
    }

    /// Add a shutdown sentinel, bypassing the capacity bound so pills land
    /// even on a full queue.
    pub async fn push_pill(&self, item: QueueItem) {
        self.unfinished.fetch_add(1, AtomicOrdering::SeqCst);
        self.enqueue(item, false).await;
    }

    async fn enqueue(&self, item: QueueItem, took_permit: bool) {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let rank = Rank {
            priority: item.priority,
            seq,
        };
        inner.items.insert(seq, (item, took_permit));
        inner.queue.push(seq, rank);
        drop(inner);
        self.ready.notify_one();
    }

    /// Pop the best-ranked item, waiting up to `timeout` for one to appear.
    pub async fn pop(&self, timeout: Duration) -> Option<QueueItem> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some((seq, _rank)) = inner.queue.pop() {
                    let (item, took_permit) = inner.items.remove(&seq)?;
                    drop(inner);
                    if took_permit {
                        self.space.add_permits(1);
                    }
                    return Some(item);
                }
            }
            let notified = self.ready.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Mark one previously popped item as fully processed.
    pub fn task_done(&self) {
        let before = self.unfinished.fetch_sub(1, AtomicOrdering::SeqCst);
        debug_assert!(before > 0, "task_done without matching push");
    }

    /// Admitted items that have not been marked done yet (queued plus
    /// in-flight).
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(AtomicOrdering::SeqCst)
    }

    /// Stop admission: pending and future `push` calls return false
    /// immediately. Pills and pops are unaffected.
    pub fn close(&self) {
        debug!("frontier closed to new admissions");
        self.space.close();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }
}
