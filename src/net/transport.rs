//! Transport abstraction
//!
//! The game loop only sees [`ServerTransport`] / [`ClientTransport`]. The
//! shipped implementation is an in-process channel pair: tests connect
//! clients straight to it, and the WebSocket handler bridges sockets onto it.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use super::protocol::{ClientMsg, ServerMsg};
use super::ConnectionId;

/// Connection events and messages arriving at the authority
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Connected(ConnectionId),
    Message(ConnectionId, ClientMsg),
    Disconnected(ConnectionId),
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),

    #[error("Server transport is gone")]
    ServerGone,
}

/// Authority side of a transport
pub trait ServerTransport: Send {
    /// Queue a message for one connection
    fn send_to(&mut self, connection: ConnectionId, msg: ServerMsg) -> Result<(), TransportError>;

    /// Next inbound event, if any is ready
    fn try_recv(&mut self) -> Option<Inbound>;

    /// Drop a connection. Further sends to it fail.
    fn disconnect(&mut self, connection: ConnectionId);

    /// Drain every ready inbound event into `handler`
    fn on_receive<F: FnMut(Inbound)>(&mut self, mut handler: F)
    where
        Self: Sized,
    {
        while let Some(inbound) = self.try_recv() {
            handler(inbound);
        }
    }
}

/// Observer side of a transport
pub trait ClientTransport: Send {
    fn send(&mut self, msg: ClientMsg) -> Result<(), TransportError>;

    fn try_recv(&mut self) -> Option<ServerMsg>;

    fn on_receive<F: FnMut(ServerMsg)>(&mut self, mut handler: F)
    where
        Self: Sized,
    {
        while let Some(msg) = self.try_recv() {
            handler(msg);
        }
    }
}

type PeerMap = Arc<DashMap<ConnectionId, mpsc::UnboundedSender<ServerMsg>>>;

/// Create a connected hub / server transport pair
pub fn channel_transport() -> (ChannelHub, ChannelServerTransport) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let peers: PeerMap = Arc::new(DashMap::new());

    let hub = ChannelHub {
        inbound_tx,
        peers: peers.clone(),
    };
    let server = ChannelServerTransport { inbound_rx, peers };

    (hub, server)
}

/// Accepts new connections onto the channel transport
#[derive(Clone)]
pub struct ChannelHub {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    peers: PeerMap,
}

impl ChannelHub {
    /// Open a new connection to the authority
    pub fn connect(&self) -> Result<ChannelClientTransport, TransportError> {
        let id = ConnectionId::new();
        let (tx, inbox) = mpsc::unbounded_channel();
        self.peers.insert(id, tx);

        if self.inbound_tx.send(Inbound::Connected(id)).is_err() {
            self.peers.remove(&id);
            return Err(TransportError::ServerGone);
        }

        debug!(connection_id = %id, "Channel connection opened");

        Ok(ChannelClientTransport {
            sender: ConnectionSender {
                id,
                tx: self.inbound_tx.clone(),
            },
            inbox,
        })
    }

    /// Connections the authority has not dropped yet
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }
}

/// Authority end of the channel transport
pub struct ChannelServerTransport {
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    peers: PeerMap,
}

impl ServerTransport for ChannelServerTransport {
    fn send_to(&mut self, connection: ConnectionId, msg: ServerMsg) -> Result<(), TransportError> {
        let peer = self
            .peers
            .get(&connection)
            .ok_or(TransportError::Closed(connection))?;
        peer.send(msg).map_err(|_| TransportError::Closed(connection))
    }

    fn try_recv(&mut self) -> Option<Inbound> {
        self.inbound_rx.try_recv().ok()
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        // Dropping the sender closes the client's inbox
        if self.peers.remove(&connection).is_some() {
            debug!(connection_id = %connection, "Channel connection closed by server");
        }
    }
}

/// Sending half of a client connection. Dropping it reports the disconnect.
pub struct ConnectionSender {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl ConnectionSender {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, msg: ClientMsg) -> Result<(), TransportError> {
        self.tx
            .send(Inbound::Message(self.id, msg))
            .map_err(|_| TransportError::ServerGone)
    }
}

impl Drop for ConnectionSender {
    fn drop(&mut self) {
        let _ = self.tx.send(Inbound::Disconnected(self.id));
    }
}

/// Client end of the channel transport
pub struct ChannelClientTransport {
    sender: ConnectionSender,
    inbox: mpsc::UnboundedReceiver<ServerMsg>,
}

impl ChannelClientTransport {
    pub fn id(&self) -> ConnectionId {
        self.sender.id()
    }

    /// Split into independently owned send and receive halves
    pub fn split(self) -> (ConnectionSender, mpsc::UnboundedReceiver<ServerMsg>) {
        (self.sender, self.inbox)
    }
}

impl ClientTransport for ChannelClientTransport {
    fn send(&mut self, msg: ClientMsg) -> Result<(), TransportError> {
        self.sender.send(msg)
    }

    fn try_recv(&mut self) -> Option<ServerMsg> {
        self.inbox.try_recv().ok()
    }
}
