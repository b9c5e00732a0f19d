use crate::bans::BanList;
use crate::component::{ComponentInfo, ComponentList};
use crate::config::ServerConfig;
use crate::player::{Player, PlayerPool, SyncKind};
use crate::rpcs::{self, id};
use bedrock::logging::{self, Logger};
use bedrock::time::TickRate;
use hashbrown::HashMap;
use quarry::events::EventDispatcher;
use quarry::net::wire::PacketReader;
use quarry::net::{ConnectionChange, Transport};
use quarry::timers::Timers;
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

/// Per-tick observers (vehicle respawn passes and the like).
pub trait CoreEventHandler {
    fn on_tick(&self, _elapsed: Duration, _now: Instant) {}
}

/// Observers of live config reloads (`exec` on the console).
pub trait ConfigEventHandler {
    fn on_config_reloaded(&self, _config: &ServerConfig) {}
}

/// Receiver for numbered inbound RPCs. `rpc` names the id the payload
/// arrived under, for handlers registered on more than one. Returning
/// `false` reports a malformed payload; the packet is dropped either way.
pub trait RpcInHandler {
    fn on_receive(&self, rpc: u8, player: &Rc<Player>, reader: &mut PacketReader) -> bool;
}

/// Inbound RPC routing table: rpc id -> ordered handler list.
pub struct RpcRegistry {
    handlers: RefCell<HashMap<u8, Rc<EventDispatcher<dyn RpcInHandler>>>>,
}

impl RpcRegistry {
    fn new() -> RpcRegistry {
        RpcRegistry {
            handlers: RefCell::new(HashMap::new()),
        }
    }

    pub fn add_handler(&self, rpc: u8, handler: &Rc<dyn RpcInHandler>) {
        let dispatcher = self
            .handlers
            .borrow_mut()
            .entry(rpc)
            .or_insert_with(|| Rc::new(EventDispatcher::new()))
            .clone();
        dispatcher.add(handler);
    }

    pub fn remove_handler(&self, rpc: u8, handler: &Rc<dyn RpcInHandler>) {
        if let Some(dispatcher) = self.handlers.borrow().get(&rpc) {
            dispatcher.remove(handler);
        }
    }

    fn dispatch(&self, rpc: u8, player: &Rc<Player>, payload: &[u8]) {
        let dispatcher = match self.handlers.borrow().get(&rpc) {
            Some(dispatcher) => dispatcher.clone(),
            None => return,
        };

        // Stop at the first handler reporting a malformed payload.
        dispatcher.stop_at_false(|handler| {
            let mut reader = PacketReader::new(payload);
            handler.on_receive(rpc, player, &mut reader)
        });
    }
}

/// Process-wide state. Owned by `main`; components receive a shared handle
/// at `on_load` and keep the subset they need. The reference cycle between
/// the core and its components is deliberate, these objects live for the
/// whole process.
pub struct Core {
    config: RefCell<ServerConfig>,
    legacy_config_path: RefCell<Option<PathBuf>>,

    players: Rc<PlayerPool>,
    components: ComponentList,
    timers: Rc<Timers>,
    transport: Rc<dyn Transport>,
    bans: BanList,

    rpcs: RpcRegistry,
    tick_events: EventDispatcher<dyn CoreEventHandler>,
    config_events: EventDispatcher<dyn ConfigEventHandler>,

    tick_rate: TickRate,
    running: Cell<bool>,

    log: Logger,
}

impl Core {
    pub fn new(
        config: ServerConfig,
        transport: Rc<dyn Transport>,
        bans: BanList,
        log: Logger,
    ) -> Rc<Core> {
        let players = PlayerPool::new(&config, transport.clone(), &log);

        Rc::new(Core {
            config: RefCell::new(config),
            legacy_config_path: RefCell::new(None),
            players,
            components: ComponentList::new(&log),
            timers: Rc::new(Timers::new()),
            transport,
            bans,
            rpcs: RpcRegistry::new(),
            tick_events: EventDispatcher::new(),
            config_events: EventDispatcher::new(),
            tick_rate: TickRate::from_hz(100),
            running: Cell::new(false),
            log,
        })
    }

    #[inline]
    pub fn log(&self) -> &Logger {
        &self.log
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> ServerConfig {
        self.config.borrow().clone()
    }

    pub fn with_config<R, F: FnOnce(&ServerConfig) -> R>(&self, f: F) -> R {
        f(&self.config.borrow())
    }

    #[inline]
    pub fn players(&self) -> &Rc<PlayerPool> {
        &self.players
    }

    #[inline]
    pub fn components(&self) -> &ComponentList {
        &self.components
    }

    #[inline]
    pub fn timers(&self) -> &Rc<Timers> {
        &self.timers
    }

    #[inline]
    pub fn transport(&self) -> &Rc<dyn Transport> {
        &self.transport
    }

    #[inline]
    pub fn bans(&self) -> &BanList {
        &self.bans
    }

    #[inline]
    pub fn rpcs(&self) -> &RpcRegistry {
        &self.rpcs
    }

    #[inline]
    pub fn tick_events(&self) -> &EventDispatcher<dyn CoreEventHandler> {
        &self.tick_events
    }

    #[inline]
    pub fn config_events(&self) -> &EventDispatcher<dyn ConfigEventHandler> {
        &self.config_events
    }

    /// Typed component lookup.
    pub fn query_component<C: ComponentInfo>(&self) -> Option<Rc<C>> {
        self.components.query::<C>()
    }

    /// Remembers where the legacy config lives so `exec` can reload it.
    pub fn set_legacy_config_path(&self, path: PathBuf) {
        *self.legacy_config_path.borrow_mut() = Some(path);
    }

    /// Runs the component load sequence.
    pub fn load_components(self: &Rc<Core>) {
        self.components.load_all(self);
        self.components.ready_all();
        logging::info!(self.log, "components loaded"; "count" => self.components.len());
    }

    /// One scheduler tick: drain the transport, route inbound packets,
    /// fire timers, run the per-player update dispatch, flush outbound.
    pub fn run_once(&self, elapsed: Duration, now: Instant) {
        self.transport.sync(now);

        for change in self.transport.drain_changes() {
            match change {
                ConnectionChange::Connected(conn, addr) => {
                    self.players.handle_connected(conn, addr, &self.bans);
                }
                ConnectionChange::Disconnected(conn) => {
                    self.players.handle_disconnected(conn);
                }
            }
        }

        for (conn, datagram) in self.transport.drain_inbound() {
            if datagram.is_empty() {
                continue;
            }
            let player = match self.players.by_connection(conn) {
                Some(player) => player,
                None => continue,
            };

            let rpc = datagram[0];
            let payload = &datagram[1..];

            // Sync streams are rate-shaped before any handler runs.
            let kind = match rpc {
                id::PLAYER_SYNC => Some(SyncKind::OnFoot),
                id::UNOCCUPIED_SYNC => Some(SyncKind::InCar),
                id::WEAPONS_UPDATE => Some(SyncKind::Weapon),
                _ => None,
            };
            if let Some(kind) = kind {
                if !self.players.should_process_sync(player.id(), kind, now) {
                    continue;
                }
            }

            if rpc == id::PLAYER_SYNC {
                self.apply_player_sync(&player, payload);
            }
            self.rpcs.dispatch(rpc, &player, payload);
        }

        self.timers.tick(now);
        self.players.update_all(now);
        self.tick_events.dispatch(|handler| handler.on_tick(elapsed, now));

        self.transport.sync(now);
    }

    /// The blocking main loop at the configured tick rate.
    pub fn run(&self) {
        self.running.set(true);
        logging::info!(self.log, "entering main loop";
                       "tick" => ?self.tick_rate.frame());

        let frame = self.tick_rate.frame();
        let mut previous = Instant::now();

        while self.running.get() {
            let now = Instant::now();
            let elapsed = now.duration_since(previous);
            previous = now;

            self.run_once(elapsed, now);

            let spent = Instant::now().duration_since(now);
            if spent < frame {
                thread::sleep(frame - spent);
            }
        }

        logging::info!(self.log, "main loop stopped");
        self.components.free_all();
    }

    pub fn stop(&self) {
        self.running.set(false);
    }

    /// Re-reads the legacy config file and applies the updatable keys.
    /// Components watching config changes re-shape their helpers.
    pub fn reload_legacy_config(&self) -> bool {
        let path = match self.legacy_config_path.borrow().clone() {
            Some(path) => path,
            None => {
                logging::warn!(self.log, "no legacy config path set, exec ignored");
                return false;
            }
        };

        let mut loader = crate::legacyconfig::LegacyConfigLoader::new(&self.log);
        let loaded = {
            let mut config = self.config.borrow_mut();
            loader.load_file(&path, &mut config)
        };

        if loaded {
            let config = self.config();
            self.players.reconfigure(&config);
            self.config_events
                .dispatch(|handler| handler.on_config_reloaded(&config));
            logging::info!(self.log, "legacy config reloaded"; "path" => %path.display());
        }
        loaded
    }

    fn apply_player_sync(&self, player: &Rc<Player>, payload: &[u8]) {
        use crate::player::PlayerState;

        let mut reader = PacketReader::new(payload);
        let sync = match rpcs::PlayerSync::read(&mut reader) {
            Ok(sync) => sync,
            Err(_) => return,
        };

        player.set_position(sync.position);
        player.set_facing_angle(sync.angle);
        player.set_velocity(sync.velocity);
        player.set_health(sync.health);
        player.set_armour(sync.armour);
        if player.state() == PlayerState::None {
            // First sync promotes the connection to a live on-foot player.
            player.set_state(PlayerState::OnFoot);
        }
    }
}
