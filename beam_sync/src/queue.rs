use std::collections::{HashMap, HashSet, VecDeque};

use ethereum_types::H256;
use parking_lot::Mutex;
use tokio::sync::Notify;

pub type BatchId = u64;

struct QueueInner {
    pending: VecDeque<H256>,
    pending_set: HashSet<H256>,
    in_progress: HashMap<BatchId, Vec<H256>>,
    in_progress_set: HashSet<H256>,
    next_batch_id: BatchId,
}

/// A bounded queue of node-hash requests, consumed in batches.
///
/// `get` hands out a batch under a fresh id; `complete` retires the batch
/// and requeues whatever was not retrieved, so abandoned work is retried
/// rather than lost. Producers block while the queue is at capacity.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    task_added: Notify,
    space_freed: Notify,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                pending_set: HashSet::new(),
                in_progress: HashMap::new(),
                in_progress_set: HashSet::new(),
                next_batch_id: 0,
            }),
            capacity,
            task_added: Notify::new(),
            space_freed: Notify::new(),
        }
    }

    /// True when the hash is queued or handed out and not yet completed.
    pub fn contains(&self, hash: &H256) -> bool {
        let inner = self.inner.lock();
        inner.pending_set.contains(hash) || inner.in_progress_set.contains(hash)
    }

    pub fn num_pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn num_in_progress(&self) -> usize {
        self.inner.lock().in_progress_set.len()
    }

    /// Enqueue every hash not already tracked, waiting whenever the queue
    /// is full.
    pub async fn add(&self, hashes: Vec<H256>) {
        let mut remaining = hashes.into_iter();
        let mut next = remaining.next();

        while let Some(hash) = next.take() {
            let notified = self.space_freed.notified();
            {
                let mut inner = self.inner.lock();
                if inner.pending_set.contains(&hash) || inner.in_progress_set.contains(&hash) {
                    next = remaining.next();
                    continue;
                }
                if inner.pending.len() < self.capacity {
                    inner.pending.push_back(hash);
                    inner.pending_set.insert(hash);
                    drop(inner);
                    self.task_added.notify_waiters();
                    next = remaining.next();
                    continue;
                }
            }
            // Queue is full; hold on to this hash until space opens up.
            next = Some(hash);
            notified.await;
        }
    }

    /// Take up to `max` hashes as a new batch, waiting until at least one
    /// is pending.
    pub async fn get(&self, max: usize) -> (BatchId, Vec<H256>) {
        loop {
            let notified = self.task_added.notified();
            {
                let mut inner = self.inner.lock();
                if !inner.pending.is_empty() {
                    let count = inner.pending.len().min(max);
                    let batch = inner.pending.drain(..count).collect::<Vec<_>>();
                    for hash in &batch {
                        inner.pending_set.remove(hash);
                        inner.in_progress_set.insert(*hash);
                    }
                    let batch_id = inner.next_batch_id;
                    inner.next_batch_id += 1;
                    inner.in_progress.insert(batch_id, batch.clone());
                    drop(inner);
                    self.space_freed.notify_waiters();
                    return (batch_id, batch);
                }
            }
            notified.await;
        }
    }

    /// Retire a batch. Hashes missing from `completed` return to the
    /// front of the queue for the next consumer.
    pub fn complete(&self, batch_id: BatchId, completed: &[H256]) {
        let completed = completed.iter().collect::<HashSet<_>>();
        let mut requeued = false;

        let mut inner = self.inner.lock();
        let batch = match inner.in_progress.remove(&batch_id) {
            Some(batch) => batch,
            None => return,
        };
        for hash in batch.into_iter().rev() {
            inner.in_progress_set.remove(&hash);
            if !completed.contains(&hash) && !inner.pending_set.contains(&hash) {
                inner.pending.push_front(hash);
                inner.pending_set.insert(hash);
                requeued = true;
            }
        }
        drop(inner);

        self.space_freed.notify_waiters();
        if requeued {
            self.task_added.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    fn hashes(range: std::ops::Range<u64>) -> Vec<H256> {
        range.map(H256::from_low_u64_be).collect()
    }

    #[tokio::test]
    async fn batches_come_out_in_insertion_order() {
        let queue = TaskQueue::new(16);
        queue.add(hashes(0..4)).await;

        let (batch_id, batch) = queue.get(3).await;
        assert_eq!(batch, hashes(0..3));
        assert_eq!(queue.num_pending(), 1);
        assert_eq!(queue.num_in_progress(), 3);

        queue.complete(batch_id, &batch);
        assert_eq!(queue.num_in_progress(), 0);
    }

    #[tokio::test]
    async fn duplicates_are_not_enqueued_twice() {
        let queue = TaskQueue::new(16);
        queue.add(hashes(0..2)).await;
        queue.add(hashes(0..2)).await;
        assert_eq!(queue.num_pending(), 2);
        assert!(queue.contains(&H256::from_low_u64_be(1)));
    }

    #[tokio::test]
    async fn incomplete_hashes_are_requeued_in_front() {
        let queue = TaskQueue::new(16);
        queue.add(hashes(0..3)).await;

        let (batch_id, batch) = queue.get(3).await;
        // Only the middle hash arrived.
        queue.complete(batch_id, &batch[1..2]);

        let (_, retry) = queue.get(3).await;
        assert_eq!(retry, vec![batch[0], batch[2]]);
    }

    #[tokio::test]
    async fn get_waits_for_tasks() {
        let queue = Arc::new(TaskQueue::new(16));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get(8).await.1 })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.add(hashes(5..6)).await;

        assert_eq!(waiter.await.unwrap(), hashes(5..6));
    }

    #[tokio::test]
    async fn add_blocks_while_the_queue_is_full() {
        let queue = Arc::new(TaskQueue::new(2));
        queue.add(hashes(0..2)).await;

        // A third hash cannot fit yet.
        let blocked = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.add(hashes(2..3)).await })
        };
        assert!(
            timeout(Duration::from_millis(50), {
                let queue = Arc::clone(&queue);
                async move { queue.add(hashes(3..4)).await }
            })
            .await
            .is_err(),
        );

        // Draining a batch frees capacity and unblocks the producer.
        let (batch_id, batch) = queue.get(2).await;
        queue.complete(batch_id, &batch);
        blocked.await.unwrap();
        assert!(queue.contains(&H256::from_low_u64_be(2)));
    }
}
