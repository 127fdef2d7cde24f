//! Bounded task queue bridging encoder callback threads and pipeline tasks.
//!
//! The hardware encoder notifies buffer availability from its own
//! platform thread. Those notifications are pushed here with
//! [`QueueProducer::blocking_push`] and drained by the pipeline task with
//! [`QueueConsumer::take`]. When the queue is full the producer blocks
//! until a slot is freed; nothing is ever dropped.

use tokio::sync::mpsc;

use crate::error::MirrorError;

/// Capacity of every encoder buffer queue.
pub const QUEUE_CAPACITY: usize = 64;

/// Create a bounded queue holding at most `capacity` items.
pub fn task_queue<T>(capacity: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueProducer { tx }, QueueConsumer { rx })
}

// ── Producer ─────────────────────────────────────────────────────

/// Pushing half. Cheap to clone.
#[derive(Debug)]
pub struct QueueProducer<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> QueueProducer<T> {
    /// Push from a plain OS thread, blocking while the queue is full.
    ///
    /// Must not be called from inside the async runtime. Fails once the
    /// consumer has been dropped, which also wakes a blocked producer.
    pub fn blocking_push(&self, item: T) -> Result<(), MirrorError> {
        self.tx.blocking_send(item)?;
        Ok(())
    }

    /// Push from async code, waiting while the queue is full.
    pub async fn push(&self, item: T) -> Result<(), MirrorError> {
        self.tx.send(item).await?;
        Ok(())
    }

    /// Whether the consuming side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── Consumer ─────────────────────────────────────────────────────

/// Draining half, owned by exactly one pipeline task.
#[derive(Debug)]
pub struct QueueConsumer<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueConsumer<T> {
    /// Wait for the next item in FIFO order.
    ///
    /// Returns `None` once every producer is gone and the queue is empty.
    pub async fn take(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Close the queue and discard everything still pending.
    ///
    /// Producers blocked in [`QueueProducer::blocking_push`] are released
    /// with an error.
    pub fn close(&mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_order() {
        let (tx, mut rx) = task_queue(4);
        for i in 0..4 {
            tx.push(i).await.unwrap();
        }
        for i in 0..4 {
            assert_eq!(rx.take().await, Some(i));
        }
    }

    #[tokio::test]
    async fn full_queue_blocks_producer_until_drained() {
        let (tx, mut rx) = task_queue(2);
        let pushed = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&pushed);
        let producer = tokio::task::spawn_blocking(move || {
            for i in 0..3 {
                tx.blocking_push(i).unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pushed.load(Ordering::SeqCst), 2, "third push must block");

        assert_eq!(rx.take().await, Some(0));
        producer.await.unwrap();
        assert_eq!(pushed.load(Ordering::SeqCst), 3);

        assert_eq!(rx.take().await, Some(1));
        assert_eq!(rx.take().await, Some(2));
        assert_eq!(rx.take().await, None);
    }

    #[tokio::test]
    async fn close_releases_blocked_producer() {
        let (tx, mut rx) = task_queue(1);
        tx.push(1u32).await.unwrap();

        let producer = tokio::task::spawn_blocking(move || tx.blocking_push(2));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(rx.close(), 1);
        let result = producer.await.unwrap();
        assert!(matches!(result, Err(MirrorError::ChannelClosed)));
    }
}
