use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::messaging::envelope::Payload;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    /// position in the order of pushes, starting at 0
    pub seq: u64,
    pub payload: Payload,
}

/// Unbounded FIFO of telemetry waiting for delivery. The consumer looks at the head item and
///  removes it only once it was acknowledged, so a failed attempt is retried with the same item.
#[derive(Default)]
pub struct OutboundQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Default)]
struct Inner {
    items: VecDeque<QueueItem>,
    next_seq: u64,
}

impl OutboundQueue {
    pub fn new() -> OutboundQueue {
        Default::default()
    }

    pub async fn push(&self, payload: Payload) -> u64 {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.items.push_back(QueueItem { seq, payload });
        drop(inner);

        self.notify.notify_one();
        seq
    }

    pub async fn head(&self) -> Option<QueueItem> {
        self.inner.lock().await.items.front().cloned()
    }

    /// waits until the queue is non-empty and returns a copy of the head item
    pub async fn wait_for_head(&self) -> QueueItem {
        loop {
            if let Some(head) = self.head().await {
                return head;
            }
            self.notify.notified().await;
        }
    }

    /// Removes the head item if it is the one with the given sequence number.
    pub async fn remove_head(&self, seq: u64) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.items.front() {
            Some(head) if head.seq == seq => {
                inner.items.pop_front();
                true
            }
            _ => false,
        }
    }

    /// sequence number the next pushed item will get
    pub async fn next_seq(&self) -> u64 {
        self.inner.lock().await.next_seq
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
