pub mod endpoint;
pub mod loopback;
pub mod wire;

use std::net::SocketAddr;
use std::time::Instant;

pub type ConnectionId = usize;

/// Describes a change in the connectivity status of a connection slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionChange {
    Connected(ConnectionId, SocketAddr),
    Disconnected(ConnectionId),
}

/// The seam between the core and the reliable-UDP stack. The stack itself
/// (retransmission, ordering, encryption) lives behind this surface; the
/// core only frames datagrams and reacts to connectivity changes.
pub trait Transport {
    /// Queues a datagram for a connection. Failures are swallowed; the
    /// transport retries under its own reliability contract.
    fn queue(&self, conn: ConnectionId, datagram: Vec<u8>);

    /// Returns the inbound datagrams received since the last drain.
    fn drain_inbound(&self) -> Vec<(ConnectionId, Vec<u8>)>;

    /// Returns the connectivity changes since the last drain.
    fn drain_changes(&self) -> Vec<ConnectionChange>;

    /// Pumps the socket: receives, flushes outboxes, expires idle peers.
    fn sync(&self, now: Instant);

    /// Drops a connection slot.
    fn disconnect(&self, conn: ConnectionId);

    /// The remote address of a connection, when it is still open.
    fn address(&self, conn: ConnectionId) -> Option<SocketAddr>;
}
