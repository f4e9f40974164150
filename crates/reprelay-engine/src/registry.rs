//! Live control-channel sessions and fan-out delivery.

use reprelay_common::error::DeliveryError;
use reprelay_common::protocol::RelayMessage;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Outbound side of one session's control channel.
pub trait SessionSink: Send + Sync {
    fn deliver(&self, message: &RelayMessage) -> Result<(), DeliveryError>;
}

impl SessionSink for mpsc::UnboundedSender<RelayMessage> {
    fn deliver(&self, message: &RelayMessage) -> Result<(), DeliveryError> {
        self.send(message.clone()).map_err(|_| DeliveryError::Closed)
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Arc<dyn SessionSink>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn sink(&self, id: SessionId) -> Option<Arc<dyn SessionSink>> {
        self.sessions.get(&id).cloned()
    }

    /// Returns `false` if the session was already registered.
    pub fn register(&mut self, id: SessionId, sink: Arc<dyn SessionSink>) -> bool {
        if self.sessions.contains_key(&id) {
            return false;
        }
        self.sessions.insert(id, sink);
        info!(session = %id, sessions = self.sessions.len(), "session connected");
        true
    }

    /// Returns `false` if the session was not registered.
    pub fn unregister(&mut self, id: SessionId) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            info!(session = %id, sessions = self.sessions.len(), "session disconnected");
        }
        removed
    }

    /// Offer `message` to every session. A session whose channel rejects it is
    /// dropped; the rest still receive it. Returns the number of deliveries.
    pub fn broadcast(&mut self, message: &RelayMessage) -> usize {
        let mut failed = Vec::new();
        for (id, sink) in &self.sessions {
            if let Err(e) = sink.deliver(message) {
                error!(session = %id, error = %e, "failed to deliver to session");
                failed.push(*id);
            }
        }
        for id in &failed {
            self.unregister(*id);
        }
        let delivered = self.sessions.len();
        debug!(delivered, dropped = failed.len(), "broadcast complete");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reprelay_common::protocol::PermissionOp;

    struct ClosedSink;

    impl SessionSink for ClosedSink {
        fn deliver(&self, _message: &RelayMessage) -> Result<(), DeliveryError> {
            Err(DeliveryError::Closed)
        }
    }

    fn message() -> RelayMessage {
        RelayMessage::permissions_result(PermissionOp::Check, Ok(true))
    }

    #[test]
    fn register_and_unregister_are_idempotent() {
        let mut registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn SessionSink> = Arc::new(tx);

        assert!(registry.register(SessionId(1), sink.clone()));
        assert!(!registry.register(SessionId(1), sink));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(SessionId(1)));
        assert!(!registry.unregister(SessionId(1)));
        assert!(registry.is_empty());
    }

    #[test]
    fn failed_session_is_dropped_and_others_still_receive() {
        let mut registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(SessionId(1), Arc::new(ClosedSink));
        registry.register(SessionId(2), Arc::new(tx));

        let delivered = registry.broadcast(&message());

        assert_eq!(delivered, 1);
        assert!(!registry.contains(SessionId(1)));
        assert!(registry.contains(SessionId(2)));
        assert_eq!(rx.try_recv().unwrap(), message());
    }

    #[test]
    fn dropped_receiver_counts_as_delivery_failure() {
        let mut registry = SessionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(SessionId(7), Arc::new(tx));
        drop(rx);

        assert_eq!(registry.broadcast(&message()), 0);
        assert!(registry.is_empty());
    }
}
