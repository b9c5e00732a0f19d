use crate::net::{ConnectionChange, ConnectionId, Transport};
use bedrock::logging;
use hashbrown::HashMap;
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use std::cell::{Cell, RefCell};
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const SOCKET_TOKEN: Token = Token(0);
const RECV_BUF_SIZE: usize = 2048;
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

struct Connection {
    addr: SocketAddr,
    outbox: Vec<Vec<u8>>,
    last_ingress: Instant,
}

/// Datagram endpoint for the tick thread. Owns the connection identity
/// table: the first datagram from an unknown address allocates the lowest
/// free connection slot; idle peers are expired after `timeout`.
///
/// Reliability, ordering and encryption are the outer stack's concern;
/// this endpoint only moves framed datagrams.
pub struct UdpEndpoint {
    socket: RefCell<UdpSocket>,
    poll: RefCell<Poll>,
    events: RefCell<Events>,

    conns: RefCell<Vec<Option<Connection>>>,
    free: RefCell<Vec<ConnectionId>>,
    by_addr: RefCell<HashMap<SocketAddr, ConnectionId>>,

    inbound: RefCell<Vec<(ConnectionId, Vec<u8>)>>,
    changes: RefCell<Vec<ConnectionChange>>,

    timeout: Duration,
    housekeeping_at: Cell<Instant>,

    log: logging::Logger,
}

impl UdpEndpoint {
    /// Binds the endpoint to `address` (`<ip>:<port>`). Peers idle for
    /// longer than `timeout` are disconnected.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        address: &str,
        timeout: Duration,
        log: L,
    ) -> io::Result<UdpEndpoint> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad bind address"))?;

        let mut socket = UdpSocket::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;

        Ok(UdpEndpoint {
            socket: RefCell::new(socket),
            poll: RefCell::new(poll),
            events: RefCell::new(Events::with_capacity(128)),
            conns: RefCell::new(Vec::new()),
            free: RefCell::new(Vec::new()),
            by_addr: RefCell::new(HashMap::new()),
            inbound: RefCell::new(Vec::new()),
            changes: RefCell::new(Vec::new()),
            timeout,
            housekeeping_at: Cell::new(Instant::now()),
            log: logging::child_or_discard(log),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.borrow().local_addr()
    }

    fn accept(&self, addr: SocketAddr, now: Instant) -> ConnectionId {
        let mut conns = self.conns.borrow_mut();

        // Retrieve an existing slot or grow the table.
        let id = match self.free.borrow_mut().pop() {
            Some(id) => id,
            None => {
                conns.push(None);
                conns.len() - 1
            }
        };

        conns[id] = Some(Connection {
            addr,
            outbox: Vec::new(),
            last_ingress: now,
        });
        self.by_addr.borrow_mut().insert(addr, id);
        self.changes
            .borrow_mut()
            .push(ConnectionChange::Connected(id, addr));

        logging::debug!(self.log, "peer connected"; "conn" => id, "addr" => %addr);
        id
    }

    fn close(&self, conn: ConnectionId) {
        let mut conns = self.conns.borrow_mut();
        if let Some(slot) = conns.get_mut(conn).and_then(|slot| slot.take()) {
            self.by_addr.borrow_mut().remove(&slot.addr);
            self.free.borrow_mut().push(conn);
            self.changes
                .borrow_mut()
                .push(ConnectionChange::Disconnected(conn));
            logging::debug!(self.log, "peer disconnected"; "conn" => conn);
        }
    }

    fn receive(&self, now: Instant) {
        let socket = self.socket.borrow();
        let mut buf = [0u8; RECV_BUF_SIZE];

        loop {
            match socket.recv_from(&mut buf) {
                Ok((len, addr)) => {
                    if len == 0 {
                        continue;
                    }
                    let conn = match self.by_addr.borrow().get(&addr) {
                        Some(&conn) => {
                            if let Some(slot) = self.conns.borrow_mut()[conn].as_mut() {
                                slot.last_ingress = now;
                            }
                            Some(conn)
                        }
                        None => None,
                    };
                    let conn = match conn {
                        Some(conn) => conn,
                        None => self.accept(addr, now),
                    };
                    self.inbound.borrow_mut().push((conn, buf[..len].to_vec()));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    // Transient ICMP-style errors; keep the socket alive.
                    logging::trace!(self.log, "recv error"; "error" => %err);
                    break;
                }
            }
        }
    }

    fn flush(&self) {
        let socket = self.socket.borrow();
        let mut conns = self.conns.borrow_mut();

        for slot in conns.iter_mut() {
            if let Some(conn) = slot.as_mut() {
                for datagram in conn.outbox.drain(..) {
                    // Failures are swallowed; retries are the reliability
                    // layer's job, not ours.
                    if let Err(err) = socket.send_to(&datagram, conn.addr) {
                        logging::trace!(self.log, "send error"; "error" => %err);
                    }
                }
            }
        }
    }

    fn housekeeping(&self, now: Instant) {
        if now.duration_since(self.housekeeping_at.get()) < HOUSEKEEPING_INTERVAL {
            return;
        }
        self.housekeeping_at.set(now);

        let expired: Vec<ConnectionId> = {
            let conns = self.conns.borrow();
            conns
                .iter()
                .enumerate()
                .filter_map(|(id, slot)| match slot {
                    Some(conn) if now.duration_since(conn.last_ingress) >= self.timeout => Some(id),
                    _ => None,
                })
                .collect()
        };

        for conn in expired {
            logging::debug!(self.log, "peer timed out"; "conn" => conn);
            self.close(conn);
        }
    }
}

impl Transport for UdpEndpoint {
    fn queue(&self, conn: ConnectionId, datagram: Vec<u8>) {
        let mut conns = self.conns.borrow_mut();
        if let Some(slot) = conns.get_mut(conn).and_then(|slot| slot.as_mut()) {
            slot.outbox.push(datagram);
        }
    }

    fn drain_inbound(&self) -> Vec<(ConnectionId, Vec<u8>)> {
        self.inbound.borrow_mut().drain(..).collect()
    }

    fn drain_changes(&self) -> Vec<ConnectionChange> {
        self.changes.borrow_mut().drain(..).collect()
    }

    fn sync(&self, now: Instant) {
        self.poll
            .borrow_mut()
            .poll(&mut self.events.borrow_mut(), Some(Duration::from_millis(0)))
            .unwrap_or_else(|err| logging::trace!(self.log, "poll failed"; "error" => %err));

        // Edge-polled readiness is advisory here: drain regardless so a
        // missed event can't stall inbound traffic for a full tick.
        self.receive(now);
        self.flush();
        self.housekeeping(now);
    }

    fn disconnect(&self, conn: ConnectionId) {
        self.close(conn);
    }

    fn address(&self, conn: ConnectionId) -> Option<SocketAddr> {
        let conns = self.conns.borrow();
        conns.get(conn).and_then(|slot| slot.as_ref()).map(|conn| conn.addr)
    }
}
