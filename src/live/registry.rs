use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Identifier of one live connection
pub type SubscriberId = u64;

/// Channel sender half for pushing serialized events to a connection
pub type SubscriberSender = mpsc::Sender<String>;

/// Default per-connection outbound buffer
pub const DEFAULT_BUFFER: usize = 64;

/// One registered connection. Only the sending half is held here; the
/// transport owns the socket and the receiving half.
#[derive(Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub sender: SubscriberSender,
}

/// Set of currently open live connections.
///
/// `register` and `deregister` are the only ways the set changes. Readers
/// take a snapshot, so iteration never races a concurrent removal.
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl SubscriberRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the id and the receiver half; the caller forwards whatever
    /// arrives on it to the connection.
    pub fn register(&self) -> (SubscriberId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let subscriber = Subscriber { id, sender: tx };
        self.subscribers.write().insert(id, subscriber);
        (id, rx)
    }

    /// Remove a connection. Dropping the sender ends the connection's
    /// receive loop.
    pub fn deregister(&self, id: SubscriberId) -> bool {
        self.subscribers.write().remove(&id).is_some()
    }

    /// Copy of the current set
    pub fn snapshot(&self) -> Vec<Subscriber> {
        self.subscribers.read().values().cloned().collect()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}
