use crate::bans::BanList;
use crate::config::ServerConfig;
use bedrock::logging::{self, Logger};
use bedrock::math::Vec3;
use quarry::events::EventDispatcher;
use quarry::extensions::{ExtensionInfo, Extensions};
use quarry::net::{ConnectionId, Transport};
use quarry::pool::{Pool, PoolEventHandler};
use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub type PlayerId = usize;

pub const INVALID_PLAYER_ID: u16 = 0xFFFF;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlayerState {
    None,
    OnFoot,
    Driver,
    Passenger,
    Wasted,
    Spawned,
    Spectating,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClientVersion {
    Samp037,
    Samp03Dl,
}

/// Which inbound sync stream a packet belongs to, for rate shaping.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SyncKind {
    OnFoot,
    InCar,
    Weapon,
}

/// One connected client. All game state mutates through `&self`; the pool
/// hands out shared handles and components attach their state through the
/// extension table.
pub struct Player {
    id: PlayerId,
    conn: ConnectionId,
    addr: SocketAddr,
    transport: Rc<dyn Transport>,

    name: RefCell<String>,
    position: Cell<Vec3>,
    velocity: Cell<Vec3>,
    facing_angle: Cell<f32>,
    virtual_world: Cell<i32>,
    interior: Cell<u32>,
    state: Cell<PlayerState>,
    health: Cell<f32>,
    armour: Cell<f32>,
    version: Cell<ClientVersion>,
    rcon_admin: Cell<bool>,
    vehicle: Cell<Option<usize>>,

    extensions: Extensions,
}

impl Player {
    fn new(
        id: PlayerId,
        conn: ConnectionId,
        addr: SocketAddr,
        transport: Rc<dyn Transport>,
    ) -> Player {
        Player {
            id,
            conn,
            addr,
            transport,
            name: RefCell::new(format!("player_{}", id)),
            position: Cell::new(Vec3::ZERO),
            velocity: Cell::new(Vec3::ZERO),
            facing_angle: Cell::new(0.0),
            virtual_world: Cell::new(0),
            interior: Cell::new(0),
            state: Cell::new(PlayerState::None),
            health: Cell::new(100.0),
            armour: Cell::new(0.0),
            version: Cell::new(ClientVersion::Samp037),
            rcon_admin: Cell::new(false),
            vehicle: Cell::new(None),
            extensions: Extensions::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> PlayerId {
        self.id
    }

    #[inline]
    pub fn connection(&self) -> ConnectionId {
        self.conn
    }

    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.borrow_mut() = name.to_string();
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position.get()
    }

    #[inline]
    pub fn set_position(&self, position: Vec3) {
        self.position.set(position);
    }

    #[inline]
    pub fn velocity(&self) -> Vec3 {
        self.velocity.get()
    }

    #[inline]
    pub fn set_velocity(&self, velocity: Vec3) {
        self.velocity.set(velocity);
    }

    #[inline]
    pub fn facing_angle(&self) -> f32 {
        self.facing_angle.get()
    }

    #[inline]
    pub fn set_facing_angle(&self, angle: f32) {
        self.facing_angle.set(angle);
    }

    #[inline]
    pub fn virtual_world(&self) -> i32 {
        self.virtual_world.get()
    }

    #[inline]
    pub fn set_virtual_world(&self, world: i32) {
        self.virtual_world.set(world);
    }

    #[inline]
    pub fn interior(&self) -> u32 {
        self.interior.get()
    }

    #[inline]
    pub fn set_interior(&self, interior: u32) {
        self.interior.set(interior);
    }

    #[inline]
    pub fn state(&self) -> PlayerState {
        self.state.get()
    }

    #[inline]
    pub fn set_state(&self, state: PlayerState) {
        self.state.set(state);
    }

    #[inline]
    pub fn health(&self) -> f32 {
        self.health.get()
    }

    #[inline]
    pub fn set_health(&self, health: f32) {
        self.health.set(health);
    }

    #[inline]
    pub fn armour(&self) -> f32 {
        self.armour.get()
    }

    #[inline]
    pub fn set_armour(&self, armour: f32) {
        self.armour.set(armour);
    }

    #[inline]
    pub fn client_version(&self) -> ClientVersion {
        self.version.get()
    }

    #[inline]
    pub fn set_client_version(&self, version: ClientVersion) {
        self.version.set(version);
    }

    #[inline]
    pub fn is_rcon_admin(&self) -> bool {
        self.rcon_admin.get()
    }

    #[inline]
    pub fn set_rcon_admin(&self, admin: bool) {
        self.rcon_admin.set(admin);
    }

    #[inline]
    pub fn vehicle(&self) -> Option<usize> {
        self.vehicle.get()
    }

    #[inline]
    pub fn set_vehicle(&self, vehicle: Option<usize>) {
        self.vehicle.set(vehicle);
    }

    /// Queues a datagram for this client. Send failures are the
    /// transport's problem, not ours.
    #[inline]
    pub fn send_rpc(&self, datagram: Vec<u8>) {
        self.transport.queue(self.conn, datagram);
    }

    #[inline]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Typed extension lookup.
    #[inline]
    pub fn query_extension<E: ExtensionInfo>(&self) -> Option<Rc<E>> {
        self.extensions.query::<E>()
    }

    /// In-game respawn: per-round extension state resets, the id and the
    /// extension identities stay.
    pub fn reset_for_respawn(&self) {
        self.extensions.reset_all();
        self.state.set(PlayerState::Spawned);
        self.vehicle.set(None);
    }
}

/// Connect/disconnect notifications.
pub trait PlayerConnectEventHandler {
    fn on_player_connect(&self, _player: &Rc<Player>) {}
    fn on_player_disconnect(&self, _player: &Rc<Player>) {}
}

/// Fired once per due player per tick; streaming and per-player checks
/// hang off this. Returning `false` aborts the remaining handlers for
/// this update.
pub trait PlayerUpdateEventHandler {
    fn on_player_update(&self, _player: &Rc<Player>, _now: Instant) -> bool {
        true
    }
}

/// The player pool: connection bookkeeping, dispatchers and the inbound
/// sync rate shapers.
pub struct PlayerPool {
    pool: Pool<Player>,
    by_conn: RefCell<hashbrown::HashMap<ConnectionId, PlayerId>>,
    transport: Rc<dyn Transport>,

    connect_events: EventDispatcher<dyn PlayerConnectEventHandler>,
    update_events: EventDispatcher<dyn PlayerUpdateEventHandler>,

    sync_rates: [Cell<u64>; 3],
    sync_last: RefCell<Vec<[Option<Instant>; 3]>>,

    log: Logger,
}

impl PlayerPool {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(
        config: &ServerConfig,
        transport: Rc<dyn Transport>,
        log: L,
    ) -> Rc<PlayerPool> {
        let max_players = config.server.max_players;
        Rc::new(PlayerPool {
            pool: Pool::new(max_players),
            by_conn: RefCell::new(hashbrown::HashMap::new()),
            transport,
            connect_events: EventDispatcher::new(),
            update_events: EventDispatcher::new(),
            sync_rates: [
                Cell::new(config.game.on_foot_rate),
                Cell::new(config.game.in_car_rate),
                Cell::new(config.game.weapon_rate),
            ],
            sync_last: RefCell::new(vec![[None; 3]; max_players]),
            log: logging::child_or_discard(log),
        })
    }

    #[inline]
    pub fn pool(&self) -> &Pool<Player> {
        &self.pool
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.pool.len()
    }

    #[inline]
    pub fn connect_events(&self) -> &EventDispatcher<dyn PlayerConnectEventHandler> {
        &self.connect_events
    }

    #[inline]
    pub fn update_events(&self) -> &EventDispatcher<dyn PlayerUpdateEventHandler> {
        &self.update_events
    }

    /// Entity destruction observers; prune your streamed-for sets here.
    #[inline]
    pub fn pool_events(&self) -> &EventDispatcher<dyn PoolEventHandler<Player>> {
        self.pool.events()
    }

    #[inline]
    pub fn get(&self, pid: PlayerId) -> Option<Rc<Player>> {
        self.pool.get(pid)
    }

    pub fn by_connection(&self, conn: ConnectionId) -> Option<Rc<Player>> {
        let pid = *self.by_conn.borrow().get(&conn)?;
        self.pool.get(pid)
    }

    /// Snapshot of connected player handles in id order.
    pub fn entries(&self) -> Vec<Rc<Player>> {
        let mut players = Vec::with_capacity(self.pool.len());
        self.pool.for_each(|_, player| players.push(player.clone()));
        players
    }

    /// Accepts a transport connection as a player. Refuses banned
    /// addresses and a full pool; the transport connection is dropped in
    /// both cases.
    pub fn handle_connected(
        &self,
        conn: ConnectionId,
        addr: SocketAddr,
        bans: &BanList,
    ) -> Option<Rc<Player>> {
        if bans.is_banned(&addr.ip().to_string()) {
            logging::info!(self.log, "refusing banned address"; "addr" => %addr);
            self.transport.disconnect(conn);
            return None;
        }

        let transport = self.transport.clone();
        let pid = match self
            .pool
            .emplace_with(|id| Player::new(id, conn, addr, transport))
        {
            Some(pid) => pid,
            None => {
                logging::info!(self.log, "server full, refusing connection"; "addr" => %addr);
                self.transport.disconnect(conn);
                return None;
            }
        };

        self.by_conn.borrow_mut().insert(conn, pid);
        let player = self.pool.get(pid).expect("freshly emplaced player");

        logging::info!(self.log, "player connected";
                       "player" => pid, "addr" => %addr);
        self.connect_events
            .dispatch(|handler| handler.on_player_connect(&player));
        Some(player)
    }

    /// Tears a player down after its transport connection went away. The
    /// pool destruction event runs synchronously, so every streamed-for
    /// set is pruned before the id can be reused.
    pub fn handle_disconnected(&self, conn: ConnectionId) {
        let pid = match self.by_conn.borrow_mut().remove(&conn) {
            Some(pid) => pid,
            None => return,
        };

        if let Some(player) = self.pool.get(pid) {
            logging::info!(self.log, "player disconnected"; "player" => pid);
            self.connect_events
                .dispatch(|handler| handler.on_player_disconnect(&player));
        }

        self.pool.release(pid, false);
        self.sync_last.borrow_mut()[pid] = [None; 3];
    }

    /// Kicks a player server-side.
    pub fn kick(&self, pid: PlayerId) {
        if let Some(player) = self.pool.get(pid) {
            let conn = player.connection();
            self.transport.disconnect(conn);
            self.handle_disconnected(conn);
        }
    }

    /// Fires the per-player update dispatch for every connected player.
    pub fn update_all(&self, now: Instant) {
        for player in self.entries() {
            self.update_events
                .stop_at_false(|handler| handler.on_player_update(&player, now));
        }
    }

    /// Gate for inbound sync packets. The configured rate is a floor on
    /// the interval between two processed packets of one kind; packets
    /// arriving faster are dropped, not queued.
    pub fn should_process_sync(&self, pid: PlayerId, kind: SyncKind, now: Instant) -> bool {
        let slot = kind as usize;
        let rate = Duration::from_millis(self.sync_rates[slot].get());

        let mut sync_last = self.sync_last.borrow_mut();
        if pid >= sync_last.len() {
            sync_last.resize(pid + 1, [None; 3]);
        }

        let due = match sync_last[pid][slot] {
            Some(last) => now.duration_since(last) >= rate,
            None => true,
        };
        if due {
            sync_last[pid][slot] = Some(now);
        }
        due
    }

    /// Applies reloaded sync rates.
    pub fn reconfigure(&self, config: &ServerConfig) {
        self.sync_rates[0].set(config.game.on_foot_rate);
        self.sync_rates[1].set(config.game.in_car_rate);
        self.sync_rates[2].set(config.game.weapon_rate);
    }
}
