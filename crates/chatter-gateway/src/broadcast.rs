use tracing::{debug, trace};

use chatter_types::models::ChatMessage;

use crate::registry::{Connection, ConnectionId, Outbound, Registry};

/// Outcome of one fan-out pass. Only used for logging and tests; the sender
/// is never told who missed the message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub evicted: Vec<ConnectionId>,
}

/// Delivers chat lines to everyone currently in the registry.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Registry,
}

impl Broadcaster {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Fan `message` out to every registered connection, the sender
    /// included. Recipients whose queue is closed or full are removed from
    /// the registry once the whole pass is done.
    pub fn broadcast(&self, sender: &Connection, message: &ChatMessage) -> BroadcastReport {
        let payload = message.render();
        let recipients = self.registry.snapshot();

        let mut report = BroadcastReport {
            attempted: recipients.len(),
            evicted: Vec::new(),
        };

        for conn in &recipients {
            if let Err(e) = conn.deliver(Outbound::Text(payload.clone())) {
                trace!("{}", e);
                report.evicted.push(e.connection());
            }
        }

        for id in &report.evicted {
            self.registry.remove(*id);
        }

        if !report.evicted.is_empty() {
            debug!(
                "Broadcast from {} ({}) evicted {} of {} recipients",
                sender.username(),
                sender.id(),
                report.evicted.len(),
                report.attempted
            );
        }

        report
    }
}
