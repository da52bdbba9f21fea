//! Outbound event port. The WebSocket hub is the production implementation;
//! tests plug in a recording fake.

use crate::protocol::ServerMsg;

/// Fire-and-forget emission to connected clients. Delivery to a socket that
/// has already gone away is silently dropped.
pub trait Notifier: Send + Sync {
    /// Emit to one socket.
    fn send_to(&self, socket_id: &str, msg: ServerMsg);
    /// Emit to every connected socket.
    fn broadcast(&self, msg: ServerMsg);
}
