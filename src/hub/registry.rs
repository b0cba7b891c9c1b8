//! Live connection bookkeeping: identity -> connection handle

use crate::protocol::ServerMessage;
use crate::types::{ConnectionId, Identity};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of each connection's outbound queue. Bounds the memory a slow
/// consumer can pin; a full queue drops updates rather than growing.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Items queued for a connection's writer task
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(ServerMessage),
    /// Transport-level liveness reply, echoing the ping body
    Pong(Vec<u8>),
    /// Tells the writer to send a close frame and shut down
    Close,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
}

/// Sending half of a live connection, safe to clone into the registry
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(conn_id: ConnectionId, outbound: mpsc::Sender<Outbound>) -> Self {
        Self { conn_id, outbound }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queue a message without blocking. Fire-and-forget: the caller decides
    /// what a full or closed queue means for this recipient.
    pub fn send(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        self.outbound
            .try_send(Outbound::Message(message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Ask the writer task to close the socket. Best-effort; a queue that is
    /// already full or gone means the connection is on its way out anyway.
    pub fn close(&self) {
        let _ = self.outbound.try_send(Outbound::Close);
    }
}

/// Maps each authenticated identity to its current live connection.
/// At most one connection per identity; registering a newer connection
/// supersedes the old entry.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<Identity, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Bind `identity` to `handle`, returning the superseded handle if a
    /// different live connection previously held the binding. Re-registering
    /// the same connection is a no-op.
    pub fn register(
        &mut self,
        identity: Identity,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let new_id = handle.conn_id().to_owned();
        self.connections
            .insert(identity, handle)
            .filter(|prev| prev.conn_id() != new_id)
    }

    /// The connection currently bound to `identity`, if any. Teardown updates
    /// the registry synchronously, so a returned handle is live unless its
    /// transport died without being observed yet -- sending on it then fails
    /// with [`DeliveryError::Closed`] and the sender tears it down.
    pub fn lookup(&self, identity: &str) -> Option<&ConnectionHandle> {
        self.connections.get(identity)
    }

    /// Remove the binding for `identity`, but only if it still points at
    /// `conn_id` -- a superseded socket closing late must not evict its
    /// successor. Idempotent. Returns whether an entry was removed.
    pub fn unregister(&mut self, identity: &str, conn_id: &str) -> bool {
        match self.connections.get(identity) {
            Some(current) if current.conn_id() == conn_id => {
                self.connections.remove(identity);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &ConnectionHandle)> {
        self.connections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(conn_id: &str) -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (ConnectionHandle::new(conn_id.to_string(), tx), rx)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ConnectionRegistry::default();
        let (h, _rx) = handle("c1");

        assert!(registry.register("u1".to_string(), h).is_none());
        assert_eq!(registry.lookup("u1").unwrap().conn_id(), "c1");
        assert!(registry.lookup("u2").is_none());
    }

    #[test]
    fn test_register_same_connection_is_idempotent() {
        let mut registry = ConnectionRegistry::default();
        let (h, _rx) = handle("c1");

        assert!(registry.register("u1".to_string(), h.clone()).is_none());
        // same pair again: no supersession reported
        assert!(registry.register("u1".to_string(), h).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_supersedes_previous_connection() {
        let mut registry = ConnectionRegistry::default();
        let (old, _rx_old) = handle("c1");
        let (new, _rx_new) = handle("c2");

        registry.register("u1".to_string(), old);
        let superseded = registry.register("u1".to_string(), new).unwrap();

        assert_eq!(superseded.conn_id(), "c1");
        assert_eq!(registry.lookup("u1").unwrap().conn_id(), "c2");
    }

    #[test]
    fn test_lookup_surfaces_dead_transport_via_send() {
        let mut registry = ConnectionRegistry::default();
        let (h, rx) = handle("c1");
        registry.register("u1".to_string(), h);

        // a transport that died unobserved still resolves, but sending fails
        // and the caller tears the connection down
        drop(rx);
        let stale = registry.lookup("u1").unwrap();
        assert_eq!(
            stale.send(ServerMessage::Pong { timestamp: 0 }),
            Err(DeliveryError::Closed)
        );
    }

    #[test]
    fn test_unregister_requires_matching_connection() {
        let mut registry = ConnectionRegistry::default();
        let (h, _rx) = handle("c2");
        registry.register("u1".to_string(), h);

        // the old connection's teardown must not evict the new binding
        assert!(!registry.unregister("u1", "c1"));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("u1", "c2"));
        assert!(registry.is_empty());

        // idempotent
        assert!(!registry.unregister("u1", "c2"));
    }

    #[test]
    fn test_send_reports_closed_channel() {
        let (h, rx) = handle("c1");
        drop(rx);

        let result = h.send(ServerMessage::Pong { timestamp: 0 });
        assert_eq!(result, Err(DeliveryError::Closed));
        assert!(!h.is_open());
    }

    #[test]
    fn test_send_reports_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let h = ConnectionHandle::new("c1".to_string(), tx);

        assert!(h.send(ServerMessage::Pong { timestamp: 0 }).is_ok());
        assert_eq!(
            h.send(ServerMessage::Pong { timestamp: 1 }),
            Err(DeliveryError::QueueFull)
        );
        // still open, just slow
        assert!(h.is_open());
    }
}
