use crate::net::{ConnectionChange, ConnectionId, Transport};
use std::cell::RefCell;
use std::net::SocketAddr;
use std::time::Instant;

/// In-memory transport with the same surface as the UDP endpoint. Tests
/// connect fake peers, inject inbound datagrams and inspect everything the
/// core sent.
pub struct LoopbackTransport {
    conns: RefCell<Vec<Option<SocketAddr>>>,
    inbound: RefCell<Vec<(ConnectionId, Vec<u8>)>>,
    changes: RefCell<Vec<ConnectionChange>>,
    sent: RefCell<Vec<(ConnectionId, Vec<u8>)>>,
}

impl LoopbackTransport {
    pub fn new() -> LoopbackTransport {
        LoopbackTransport {
            conns: RefCell::new(Vec::new()),
            inbound: RefCell::new(Vec::new()),
            changes: RefCell::new(Vec::new()),
            sent: RefCell::new(Vec::new()),
        }
    }

    /// Registers a fake peer and queues its connect change.
    pub fn connect(&self, addr: SocketAddr) -> ConnectionId {
        let mut conns = self.conns.borrow_mut();
        let id = match conns.iter().position(|slot| slot.is_none()) {
            Some(id) => id,
            None => {
                conns.push(None);
                conns.len() - 1
            }
        };
        conns[id] = Some(addr);
        self.changes
            .borrow_mut()
            .push(ConnectionChange::Connected(id, addr));
        id
    }

    /// Queues an inbound datagram from a fake peer.
    pub fn inject(&self, conn: ConnectionId, datagram: Vec<u8>) {
        self.inbound.borrow_mut().push((conn, datagram));
    }

    /// Everything queued to peers since the last take, in send order.
    pub fn take_sent(&self) -> Vec<(ConnectionId, Vec<u8>)> {
        self.sent.borrow_mut().drain(..).collect()
    }

    /// Datagrams sent to one peer since the last take.
    pub fn take_sent_to(&self, conn: ConnectionId) -> Vec<Vec<u8>> {
        let mut kept = Vec::new();
        let mut taken = Vec::new();
        for (to, datagram) in self.sent.borrow_mut().drain(..) {
            if to == conn {
                taken.push(datagram);
            } else {
                kept.push((to, datagram));
            }
        }
        *self.sent.borrow_mut() = kept;
        taken
    }
}

impl Default for LoopbackTransport {
    fn default() -> LoopbackTransport {
        LoopbackTransport::new()
    }
}

impl Transport for LoopbackTransport {
    fn queue(&self, conn: ConnectionId, datagram: Vec<u8>) {
        if self
            .conns
            .borrow()
            .get(conn)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
        {
            self.sent.borrow_mut().push((conn, datagram));
        }
    }

    fn drain_inbound(&self) -> Vec<(ConnectionId, Vec<u8>)> {
        self.inbound.borrow_mut().drain(..).collect()
    }

    fn drain_changes(&self) -> Vec<ConnectionChange> {
        self.changes.borrow_mut().drain(..).collect()
    }

    fn sync(&self, _now: Instant) {}

    fn disconnect(&self, conn: ConnectionId) {
        let mut conns = self.conns.borrow_mut();
        if let Some(slot) = conns.get_mut(conn) {
            if slot.take().is_some() {
                self.changes
                    .borrow_mut()
                    .push(ConnectionChange::Disconnected(conn));
            }
        }
    }

    fn address(&self, conn: ConnectionId) -> Option<SocketAddr> {
        self.conns.borrow().get(conn).and_then(|slot| *slot)
    }
}
