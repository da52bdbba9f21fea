//! Live socket registry: the fan-out behind the [`Notifier`] port.

use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::notify::Notifier;
use crate::protocol::ServerMsg;

/// Maps socket id to the outbound channel of its connection task. Entries
/// live from handshake to disconnect.
#[derive(Default)]
pub struct WsHub {
    sockets: DashMap<String, UnboundedSender<ServerMsg>>,
}

impl WsHub {
    pub fn new() -> Self {
        WsHub {
            sockets: DashMap::new(),
        }
    }

    /// Register a freshly connected socket; the returned receiver feeds the
    /// write half of the connection.
    pub fn register(&self, socket_id: &str) -> UnboundedReceiver<ServerMsg> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sockets.insert(socket_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, socket_id: &str) {
        self.sockets.remove(socket_id);
    }

    pub fn connected(&self) -> usize {
        self.sockets.len()
    }
}

impl Notifier for WsHub {
    fn send_to(&self, socket_id: &str, msg: ServerMsg) {
        if let Some(tx) = self.sockets.get(socket_id) {
            let _ = tx.send(msg);
        }
    }

    fn broadcast(&self, msg: ServerMsg) {
        for entry in self.sockets.iter() {
            let _ = entry.value().send(msg.clone());
        }
    }
}
