//! Bounded request/response queues of capacity 1000 (`spec.md` §4.7.2) with
//! wait-on-full backpressure and an atomic depth counter that always
//! decrements via `Drop`, matching the "finally-equivalent block"
//! requirement of `spec.md` §5.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::WorkerError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Clone)]
pub struct BoundedQueue<T> {
    sender: mpsc::Sender<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> BoundedQueue<T> {
    pub fn channel(capacity: usize) -> (Self, BoundedQueueReceiver<T>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let depth = Arc::new(AtomicUsize::new(0));
        (
            Self {
                sender,
                depth: depth.clone(),
            },
            BoundedQueueReceiver { receiver, depth },
        )
    }

    /// Awaits on a full channel (backpressure); increments depth only once
    /// the item is actually accepted.
    pub async fn enqueue(&self, item: T) -> Result<(), WorkerError> {
        self.sender
            .send(item)
            .await
            .map_err(|_| WorkerError::QueueClosed("receiver dropped".to_string()))?;
        self.depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

pub struct BoundedQueueReceiver<T> {
    receiver: mpsc::Receiver<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> BoundedQueueReceiver<T> {
    /// Returns a `DepthGuard` that decrements the shared depth counter on
    /// `Drop`, regardless of how the caller's processing loop exits.
    pub async fn recv(&mut self) -> Option<DepthGuard<T>> {
        let item = self.receiver.recv().await?;
        Some(DepthGuard {
            item: Some(item),
            depth: self.depth.clone(),
        })
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

pub struct DepthGuard<T> {
    item: Option<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> DepthGuard<T> {
    pub fn into_inner(mut self) -> T {
        self.item.take().expect("DepthGuard item taken twice")
    }
}

impl<T> std::ops::Deref for DepthGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("DepthGuard item already taken")
    }
}

impl<T> Drop for DepthGuard<T> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_increments_depth_and_recv_guard_decrements_on_drop() {
        let (queue, mut receiver) = BoundedQueue::channel(4);
        queue.enqueue(1).await.unwrap();
        queue.enqueue(2).await.unwrap();
        assert_eq!(queue.depth(), 2);

        let guard = receiver.recv().await.unwrap();
        assert_eq!(*guard, 1);
        assert_eq!(queue.depth(), 2);
        drop(guard);
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn depth_decrements_even_when_processing_panics_are_avoided_via_guard() {
        let (queue, mut receiver) = BoundedQueue::channel(4);
        queue.enqueue("a").await.unwrap();
        {
            let guard = receiver.recv().await.unwrap();
            let _owned = guard.into_inner();
        }
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn enqueue_fails_once_receiver_dropped() {
        let (queue, receiver) = BoundedQueue::channel(1);
        drop(receiver);
        let result = queue.enqueue(1).await;
        assert!(result.is_err());
    }
}
