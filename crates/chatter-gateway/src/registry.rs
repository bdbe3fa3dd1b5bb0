use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Frames a connection may have queued but not yet written. A recipient
/// that falls this far behind is dropped instead of buffered further.
pub const OUTBOUND_QUEUE: usize = 256;

/// Unique identity of one live connection. Two connections of the same user
/// have different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frames queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Send a close frame with this code and reason, then stop writing.
    Close(u16, String),
}

/// Why a frame could not be queued for a recipient.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The writer has gone away; nothing queued for it will be sent.
    #[error("connection {0} is no longer accepting frames")]
    Closed(ConnectionId),
    /// The writer is [`OUTBOUND_QUEUE`] frames behind.
    #[error("connection {0} outbound queue is full")]
    Lagging(ConnectionId),
}

impl DeliveryError {
    pub fn connection(&self) -> ConnectionId {
        match self {
            DeliveryError::Closed(id) | DeliveryError::Lagging(id) => *id,
        }
    }
}

/// Handle to one authenticated connection: its identity, the user it
/// speaks for, and the send half of its outbound queue.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    username: Arc<str>,
    tx: mpsc::Sender<Outbound>,
    lagged: CancellationToken,
}

impl Connection {
    /// Create a handle and the receiving end its writer task drains.
    pub fn new(username: &str) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let conn = Self {
            id: ConnectionId::new(),
            username: Arc::from(username),
            tx,
            lagged: CancellationToken::new(),
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Queue a frame. Never waits: a full queue fails the delivery and
    /// marks the connection as lagged so its handler can hang up.
    pub fn deliver(&self, frame: Outbound) -> Result<(), DeliveryError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.lagged.cancel();
                Err(DeliveryError::Lagging(self.id))
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed(self.id)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn is_lagged(&self) -> bool {
        self.lagged.is_cancelled()
    }

    /// Resolves once a delivery found the outbound queue full.
    pub fn lagged(&self) -> WaitForCancellationFuture<'_> {
        self.lagged.cancelled()
    }
}

/// The authoritative set of connections that receive broadcasts.
///
/// Cloning is cheap and every clone sees the same membership. All operations
/// take the lock for a bounded in-memory step only, so holding a snapshot
/// while writing to sockets never blocks `add` or `remove`.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Vec<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic elsewhere while holding the lock cannot leave the Vec half
    // updated, so poisoning is ignored.
    fn entries(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, conn: Connection) {
        self.entries().push(conn);
    }

    /// Remove by identity. Returns whether the connection was present;
    /// removing an absent connection is a no-op.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let mut entries = self.entries();
        match entries.iter().position(|c| c.id == id) {
            Some(idx) => {
                entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy of the membership in registration order.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.entries().clone()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries().iter().any(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop every entry, returning how many were still registered.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let n = entries.len();
        entries.clear();
        n
    }
}
