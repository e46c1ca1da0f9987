//! In-process task queue with acknowledgement semantics
//!
//! A delivered message stays "unacked" until the consumer acks it. A nack, or
//! a consumer restart (`recover`), puts it back at the front of the ready list
//! so it is delivered again. Nothing is removed without an ack.
//!
//! `contents` copies out every message not yet acked, and `from_contents`
//! rebuilds a queue from that copy with the unacked ones first, so a snapshot
//! carries the hand-off across a restart.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::data::ReadingId;

/// Payload handed from the ingestion gateway to the queue consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub reading_id: ReadingId,
    pub value: i64,
}

/// A message on loan to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Handle for ack/nack, unique per delivery attempt
    pub tag: u64,
    pub message: TaskMessage,
    /// True if this message was delivered before
    pub redelivered: bool,
}

#[derive(Debug, Clone)]
struct Pending {
    message: TaskMessage,
    redelivered: bool,
}

/// Point-in-time copy of a queue, used by snapshot persistence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueContents {
    /// Delivered but not acked, oldest delivery first
    pub unacked: Vec<TaskMessage>,
    /// Waiting for delivery, in delivery order
    pub ready: Vec<TaskMessage>,
}

impl QueueContents {
    pub fn len(&self) -> usize {
        self.unacked.len() + self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unacked.is_empty() && self.ready.is_empty()
    }
}

/// Queue depth snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub ready: usize,
    pub unacked: usize,
}

pub struct TaskQueue {
    name: String,
    ready: Mutex<VecDeque<Pending>>,
    unacked: DashMap<u64, TaskMessage>,
    next_tag: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: Mutex::new(VecDeque::new()),
            unacked: DashMap::new(),
            next_tag: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Rebuild a queue from a snapshot. Messages that were on loan when the
    /// snapshot was taken come first and are flagged as redelivered.
    pub fn from_contents(name: impl Into<String>, contents: QueueContents) -> Self {
        let queue = Self::new(name);
        {
            let mut ready = queue.ready.lock();
            ready.extend(contents.unacked.into_iter().map(|message| Pending {
                message,
                redelivered: true,
            }));
            ready.extend(contents.ready.into_iter().map(|message| Pending {
                message,
                redelivered: false,
            }));
        }
        queue
    }

    /// Copy out every message that has not been acked
    pub fn contents(&self) -> QueueContents {
        // Holding the ready lock keeps messages from moving between the two
        // sets while they are copied
        let ready = self.ready.lock();

        let mut unacked: Vec<(u64, TaskMessage)> = self
            .unacked
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        unacked.sort_unstable_by_key(|(tag, _)| *tag);

        QueueContents {
            unacked: unacked.into_iter().map(|(_, m)| m).collect(),
            ready: ready.iter().map(|p| p.message.clone()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message for delivery
    pub fn enqueue(&self, message: TaskMessage) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        self.ready.lock().push_back(Pending {
            message,
            redelivered: false,
        });
        self.notify.notify_waiters();
        Ok(())
    }

    /// Take the next ready message without waiting
    pub fn try_receive(&self) -> Option<Delivery> {
        let mut ready = self.ready.lock();
        let pending = ready.pop_front()?;
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        self.unacked.insert(tag, pending.message.clone());
        drop(ready);

        Some(Delivery {
            tag,
            message: pending.message,
            redelivered: pending.redelivered,
        })
    }

    /// Wait for the next message. Returns `None` once the queue is closed
    /// and drained of ready messages.
    pub async fn receive(&self) -> Option<Delivery> {
        loop {
            // Register interest before checking so a concurrent enqueue
            // cannot slip between the check and the wait
            let notified = self.notify.notified();

            if let Some(delivery) = self.try_receive() {
                return Some(delivery);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }

            notified.await;
        }
    }

    /// Confirm a delivery; the message is gone for good
    pub fn ack(&self, tag: u64) -> Result<(), QueueError> {
        self.unacked
            .remove(&tag)
            .map(|_| ())
            .ok_or(QueueError::UnknownDelivery(tag))
    }

    /// Reject a delivery; the message goes back to the front for redelivery
    pub fn nack(&self, tag: u64) -> Result<(), QueueError> {
        let mut ready = self.ready.lock();
        let (_, message) = self
            .unacked
            .remove(&tag)
            .ok_or(QueueError::UnknownDelivery(tag))?;

        ready.push_front(Pending {
            message,
            redelivered: true,
        });
        drop(ready);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Return every unacked delivery to the ready list, as happens when a
    /// consumer goes away without settling its messages.
    pub fn recover(&self) -> usize {
        let mut ready = self.ready.lock();
        let mut tags: Vec<u64> = self.unacked.iter().map(|e| *e.key()).collect();
        // Oldest delivery first, so the original order is kept at the front
        tags.sort_unstable();

        let mut returned = Vec::with_capacity(tags.len());
        for tag in tags {
            if let Some((_, message)) = self.unacked.remove(&tag) {
                returned.push(message);
            }
        }

        let count = returned.len();
        for message in returned.into_iter().rev() {
            ready.push_front(Pending {
                message,
                redelivered: true,
            });
        }
        drop(ready);

        if count > 0 {
            self.notify.notify_waiters();
        }
        count
    }

    /// Stop accepting messages and wake any waiting consumer
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn depth(&self) -> QueueDepth {
        QueueDepth {
            ready: self.ready.lock().len(),
            unacked: self.unacked.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn msg(id: u64) -> TaskMessage {
        TaskMessage {
            reading_id: ReadingId(id),
            value: 70 + id as i64,
        }
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(msg(3)).unwrap();
        assert_eq!(json, serde_json::json!({"readingId": 3, "value": 73}));
    }

    #[test]
    fn test_fifo_and_ack() {
        let queue = TaskQueue::new("bpm_tasks");
        queue.enqueue(msg(1)).unwrap();
        queue.enqueue(msg(2)).unwrap();

        let first = queue.try_receive().unwrap();
        assert_eq!(first.message, msg(1));
        assert!(!first.redelivered);
        assert_eq!(queue.depth(), QueueDepth { ready: 1, unacked: 1 });

        queue.ack(first.tag).unwrap();
        assert_eq!(queue.depth(), QueueDepth { ready: 1, unacked: 0 });

        // Double ack is rejected
        assert_eq!(queue.ack(first.tag), Err(QueueError::UnknownDelivery(first.tag)));
    }

    #[test]
    fn test_nack_redelivers_first() {
        let queue = TaskQueue::new("bpm_tasks");
        queue.enqueue(msg(1)).unwrap();
        queue.enqueue(msg(2)).unwrap();

        let first = queue.try_receive().unwrap();
        queue.nack(first.tag).unwrap();

        let again = queue.try_receive().unwrap();
        assert_eq!(again.message, msg(1));
        assert!(again.redelivered);
        assert_ne!(again.tag, first.tag);
    }

    #[test]
    fn test_recover_returns_unacked_in_order() {
        let queue = TaskQueue::new("bpm_tasks");
        for i in 1..=3 {
            queue.enqueue(msg(i)).unwrap();
        }

        let a = queue.try_receive().unwrap();
        let _b = queue.try_receive().unwrap();
        queue.ack(a.tag).unwrap();

        // Consumer dies holding message 2
        assert_eq!(queue.recover(), 1);
        assert_eq!(queue.depth(), QueueDepth { ready: 2, unacked: 0 });

        let next = queue.try_receive().unwrap();
        assert_eq!(next.message, msg(2));
        assert!(next.redelivered);
        assert_eq!(queue.try_receive().unwrap().message, msg(3));
    }

    #[test]
    fn test_contents_keep_unsettled_messages_across_rebuild() {
        let queue = TaskQueue::new("bpm_tasks");
        for i in 1..=4 {
            queue.enqueue(msg(i)).unwrap();
        }

        let first = queue.try_receive().unwrap();
        let _second = queue.try_receive().unwrap();
        queue.ack(first.tag).unwrap();

        let contents = queue.contents();
        assert_eq!(contents.unacked, vec![msg(2)]);
        assert_eq!(contents.ready, vec![msg(3), msg(4)]);
        assert_eq!(contents.len(), 3);

        // The loaned message comes back first, marked as seen before
        let rebuilt = TaskQueue::from_contents("bpm_tasks", contents);
        assert_eq!(rebuilt.depth(), QueueDepth { ready: 3, unacked: 0 });

        let again = rebuilt.try_receive().unwrap();
        assert_eq!(again.message, msg(2));
        assert!(again.redelivered);

        let next = rebuilt.try_receive().unwrap();
        assert_eq!(next.message, msg(3));
        assert!(!next.redelivered);
    }

    #[test]
    fn test_contents_never_miss_a_message_in_flight() {
        let queue = Arc::new(TaskQueue::new("bpm_tasks"));
        for i in 1..=500 {
            queue.enqueue(msg(i)).unwrap();
        }

        // Deliver and nack without ever acking, so every message stays owed
        let churn = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for _ in 0..2_000 {
                    if let Some(d) = queue.try_receive() {
                        queue.nack(d.tag).unwrap();
                    }
                }
            })
        };

        for _ in 0..200 {
            assert_eq!(queue.contents().len(), 500);
        }
        churn.join().unwrap();
    }

    #[test]
    fn test_closed_queue_rejects() {
        let queue = TaskQueue::new("bpm_tasks");
        queue.close();
        assert_eq!(queue.enqueue(msg(1)), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_receive_waits_for_enqueue() {
        let queue = Arc::new(TaskQueue::new("bpm_tasks"));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(msg(9)).unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.message, msg(9));
    }

    #[tokio::test]
    async fn test_receive_returns_none_after_close() {
        let queue = Arc::new(TaskQueue::new("bpm_tasks"));

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_receive_is_pending_until_enqueue() {
        let queue = TaskQueue::new("bpm_tasks");
        let mut receive = tokio_test::task::spawn(queue.receive());

        tokio_test::assert_pending!(receive.poll());

        queue.enqueue(msg(9)).unwrap();
        assert!(receive.is_woken());

        let delivery = tokio_test::assert_ready!(receive.poll()).unwrap();
        assert_eq!(delivery.message, msg(9));
    }
}
