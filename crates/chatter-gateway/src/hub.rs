use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

use chatter_types::models::ChatMessage;

use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::message_log::MessageLog;
use crate::registry::{Connection, ConnectionId, Registry};

/// Process-wide chat state: the connection registry, the message log and
/// the shutdown signal every connection task listens to. Built once by the
/// server and cloned into each task.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    registry: Registry,
    log: MessageLog,
    broadcaster: Broadcaster,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Hub {
    pub fn new() -> Self {
        let registry = Registry::new();
        Self {
            inner: Arc::new(HubInner {
                broadcaster: Broadcaster::new(registry.clone()),
                registry,
                log: MessageLog::new(),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn messages(&self) -> &MessageLog {
        &self.inner.log
    }

    /// Add a connection to the broadcast set. It stays registered until the
    /// returned guard is dropped.
    pub fn register(&self, conn: Connection) -> Registration {
        let id = conn.id();
        self.inner.registry.add(conn);
        Registration {
            registry: self.inner.registry.clone(),
            id,
        }
    }

    /// Record one inbound line from `sender` and fan it out.
    pub fn publish(&self, sender: &Connection, text: String) -> BroadcastReport {
        let message = ChatMessage::new(sender.username(), text);
        self.inner.log.append(message.clone());
        self.inner.broadcaster.broadcast(sender, &message)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Wrap a connection task so `drain` waits for it.
    pub fn track<F: Future<Output = ()>>(&self, fut: F) -> TrackedFuture<F> {
        self.inner.tasks.track_future(fut)
    }

    /// Signal every connection task to close.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Close all connections and wait until each has run its cleanup.
    pub async fn drain(&self) {
        self.shutdown();
        self.inner.tasks.close();

        info!("Waiting for {} connection task(s) to finish", self.inner.tasks.len());
        self.inner.tasks.wait().await;

        let leaked = self.inner.registry.clear();
        if leaked > 0 {
            warn!("{} connection(s) still registered after drain, cleared", leaked);
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry membership of one connection. Dropping it removes the
/// connection, which also covers panics and aborted tasks.
#[must_use = "the connection is unregistered as soon as this is dropped"]
pub struct Registration {
    registry: Registry,
    id: ConnectionId,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
