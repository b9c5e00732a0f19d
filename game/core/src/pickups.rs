use crate::component::{Component, ComponentInfo, ComponentUid, SemanticVersion};
use crate::core::{ConfigEventHandler, Core, RpcInHandler};
use crate::player::{Player, PlayerId, PlayerPool, PlayerUpdateEventHandler};
use crate::rpcs::{self, id};
use crate::stream::{scan_pool, StreamConfigHelper, Streamable, StreamedSet};
use bedrock::math::Vec3;
use quarry::events::EventDispatcher;
use quarry::net::wire::PacketReader;
use quarry::pool::{Pool, PoolEventHandler, ScopedLock};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Instant;

pub const PICKUP_POOL_SIZE: usize = 4096;

pub type PickupType = u8;

/// A pickable world item.
pub struct Pickup {
    id: usize,
    model: Cell<i32>,
    pickup_type: Cell<PickupType>,
    position: Cell<Vec3>,
    virtual_world: Cell<i32>,
    streamed_for: StreamedSet,
    /// Players the pickup is explicitly hidden from (picked up, waiting on
    /// respawn logic in gameplay code).
    hidden_for: StreamedSet,
    players: Rc<PlayerPool>,
}

impl Pickup {
    fn new(
        id: usize,
        model: i32,
        pickup_type: PickupType,
        position: Vec3,
        virtual_world: i32,
        players: Rc<PlayerPool>,
    ) -> Pickup {
        Pickup {
            id,
            model: Cell::new(model),
            pickup_type: Cell::new(pickup_type),
            position: Cell::new(position),
            virtual_world: Cell::new(virtual_world),
            streamed_for: StreamedSet::new(),
            hidden_for: StreamedSet::new(),
            players,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn model(&self) -> i32 {
        self.model.get()
    }

    #[inline]
    pub fn pickup_type(&self) -> PickupType {
        self.pickup_type.get()
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position.get()
    }

    #[inline]
    pub fn virtual_world_id(&self) -> i32 {
        self.virtual_world.get()
    }

    #[inline]
    pub fn is_streamed_in(&self, pid: PlayerId) -> bool {
        self.streamed_for.contains(pid)
    }

    pub fn set_model(&self, model: i32) {
        self.model.set(model);
        self.restream();
    }

    pub fn set_pickup_type(&self, pickup_type: PickupType) {
        self.pickup_type.set(pickup_type);
        self.restream();
    }

    pub fn set_position(&self, position: Vec3) {
        self.position.set(position);
        self.restream();
    }

    /// Position update without a client refresh (legacy surface).
    pub fn set_position_no_update(&self, position: Vec3) {
        self.position.set(position);
    }

    pub fn set_virtual_world(&self, world: i32) {
        self.virtual_world.set(world);
    }

    /// Hides or reveals the pickup for one player without touching the
    /// streaming state machine's eligibility inputs.
    pub fn set_hidden_for_player(&self, player: &Rc<Player>, hidden: bool) {
        if hidden {
            if self.hidden_for.add(player.id()) && self.streamed_for.remove(player.id()) {
                self.stream_out_for_client(player);
            }
        } else {
            self.hidden_for.remove(player.id());
        }
    }

    pub fn is_hidden_for_player(&self, pid: PlayerId) -> bool {
        self.hidden_for.contains(pid)
    }

    pub fn stream_in_for_player(&self, player: &Rc<Player>) -> bool {
        if !self.streamed_for.add(player.id()) {
            return false;
        }
        self.stream_in_for_client(player);
        true
    }

    pub fn stream_out_for_player(&self, player: &Rc<Player>) -> bool {
        if !self.streamed_for.remove(player.id()) {
            return false;
        }
        self.stream_out_for_client(player);
        true
    }

    fn remove_for(&self, pid: PlayerId) {
        self.streamed_for.remove(pid);
        self.hidden_for.remove(pid);
    }

    fn restream(&self) {
        for pid in self.streamed_for.ids() {
            if let Some(player) = self.players.get(pid) {
                self.stream_out_for_client(&player);
                self.stream_in_for_client(&player);
            }
        }
    }

    fn destream(&self) {
        for pid in self.streamed_for.ids() {
            if let Some(player) = self.players.get(pid) {
                self.stream_out_for_client(&player);
            }
        }
        self.streamed_for.clear();
    }

    fn stream_in_for_client(&self, player: &Rc<Player>) {
        player.send_rpc(
            rpcs::CreatePickup {
                pickup_id: self.id as u16,
                model: self.model.get(),
                pickup_type: self.pickup_type.get(),
                position: self.position.get(),
            }
            .datagram(),
        );
    }

    fn stream_out_for_client(&self, player: &Rc<Player>) {
        player.send_rpc(
            rpcs::DestroyPickup {
                pickup_id: self.id as u16,
            }
            .datagram(),
        );
    }
}

impl Streamable for Pickup {
    fn stream_position(&self, player: &Player) -> Option<Vec3> {
        if self.hidden_for.contains(player.id()) {
            return None;
        }
        Some(self.position.get())
    }

    fn virtual_world(&self) -> i32 {
        self.virtual_world.get()
    }

    fn is_streamed_for(&self, pid: PlayerId) -> bool {
        self.streamed_for.contains(pid)
    }
}

pub trait PickupEventHandler {
    fn on_player_pick_up_pickup(&self, _player: &Rc<Player>, _pickup: &Rc<Pickup>) {}
    fn on_pickup_stream_in(&self, _pickup: &Rc<Pickup>, _player: &Rc<Player>) {}
    fn on_pickup_stream_out(&self, _pickup: &Rc<Pickup>, _player: &Rc<Player>) {}
}

pub struct PickupsComponent {
    weak: Weak<PickupsComponent>,
    storage: Pool<Pickup>,
    events: EventDispatcher<dyn PickupEventHandler>,
    helper: StreamConfigHelper,
    players: RefCell<Option<Rc<PlayerPool>>>,
}

impl PickupsComponent {
    pub fn new() -> Rc<PickupsComponent> {
        Rc::new_cyclic(|weak| PickupsComponent {
            weak: weak.clone(),
            storage: Pool::new(PICKUP_POOL_SIZE),
            events: EventDispatcher::new(),
            helper: StreamConfigHelper::new(200.0, 1000, 0),
            players: RefCell::new(None),
        })
    }

    fn handle(&self) -> Rc<PickupsComponent> {
        self.weak.upgrade().expect("component outlives its handle")
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn PickupEventHandler> {
        &self.events
    }

    #[inline]
    pub fn pool(&self) -> &Pool<Pickup> {
        &self.storage
    }

    pub fn create(
        &self,
        model: i32,
        pickup_type: PickupType,
        position: Vec3,
        virtual_world: i32,
    ) -> Option<Rc<Pickup>> {
        let players = self.players.borrow().clone()?;
        let id = self
            .storage
            .emplace_with(|id| Pickup::new(id, model, pickup_type, position, virtual_world, players))?;
        self.storage.get(id)
    }

    pub fn get(&self, id: usize) -> Option<Rc<Pickup>> {
        self.storage.get(id)
    }

    pub fn release(&self, id: usize) {
        if let Some(pickup) = self.storage.get(id) {
            pickup.destream();
            self.storage.release(id, false);
        }
    }

    pub fn count(&self) -> usize {
        self.storage.len()
    }
}

impl Component for PickupsComponent {
    fn uid(&self) -> ComponentUid {
        Self::UID
    }

    fn name(&self) -> &'static str {
        "Pickups"
    }

    fn version(&self) -> SemanticVersion {
        SemanticVersion::new(0, 1, 0)
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn on_load(&self, core: &Rc<Core>) {
        *self.players.borrow_mut() = Some(core.players().clone());
        core.with_config(|config| {
            self.helper
                .reconfigure(config.game.stream_distance, config.game.stream_rate);
        });

        let this = self.handle();
        core.players()
            .update_events()
            .add(&(this.clone() as Rc<dyn PlayerUpdateEventHandler>));
        core.players()
            .pool_events()
            .add(&(this.clone() as Rc<dyn PoolEventHandler<Player>>));
        core.config_events()
            .add(&(this.clone() as Rc<dyn ConfigEventHandler>));
        core.rpcs()
            .add_handler(id::ON_PICK_UP_PICKUP, &(this as Rc<dyn RpcInHandler>));
    }

    fn reset(&self) {
        self.storage.clear();
    }

    fn free(&self) {
        self.storage.clear();
    }
}

impl ComponentInfo for PickupsComponent {
    const UID: ComponentUid = 0xcf304faa363dd971;
}

impl ConfigEventHandler for PickupsComponent {
    fn on_config_reloaded(&self, config: &crate::config::ServerConfig) {
        self.helper
            .reconfigure(config.game.stream_distance, config.game.stream_rate);
    }
}

impl PoolEventHandler<Player> for PickupsComponent {
    fn on_destroyed(&self, pid: usize, _player: &Rc<Player>) {
        self.storage.for_each(|_, pickup| pickup.remove_for(pid));
        self.helper.forget(pid);
    }
}

impl PlayerUpdateEventHandler for PickupsComponent {
    fn on_player_update(&self, player: &Rc<Player>, now: Instant) -> bool {
        if !self.helper.should_stream(player.id(), now) {
            return true;
        }

        scan_pool(
            &self.storage,
            player,
            self.helper.distance_sqr(),
            |id, pickup| {
                if pickup.stream_in_for_player(player) {
                    if let Some(lock) = ScopedLock::new(&self.storage, id) {
                        self.events
                            .dispatch(|handler| handler.on_pickup_stream_in(&lock.entry, player));
                    }
                }
            },
            |id, pickup| {
                if pickup.stream_out_for_player(player) {
                    if let Some(lock) = ScopedLock::new(&self.storage, id) {
                        self.events
                            .dispatch(|handler| handler.on_pickup_stream_out(&lock.entry, player));
                    }
                }
            },
        );
        true
    }
}

impl RpcInHandler for PickupsComponent {
    fn on_receive(&self, _rpc: u8, player: &Rc<Player>, reader: &mut PacketReader) -> bool {
        let report = match rpcs::OnPlayerPickUpPickup::read(reader) {
            Ok(report) => report,
            Err(_) => return false,
        };

        let pickup_id = report.pickup_id as usize;
        if let Some(pickup) = self.storage.get(pickup_id) {
            // A pickup the sender cannot even see is a stale or forged
            // report.
            if pickup.is_streamed_in(player.id()) {
                if let Some(lock) = ScopedLock::new(&self.storage, pickup_id) {
                    self.events
                        .dispatch(|handler| handler.on_player_pick_up_pickup(player, &lock.entry));
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bans::BanList;
    use crate::config::ServerConfig;
    use crate::core::Core;
    use crate::player::PlayerState;
    use bedrock::logging;
    use quarry::net::loopback::LoopbackTransport;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    struct Fixture {
        core: Rc<Core>,
        transport: Rc<LoopbackTransport>,
        pickups: Rc<PickupsComponent>,
    }

    fn fixture() -> Fixture {
        let transport = Rc::new(LoopbackTransport::new());
        let core = Core::new(
            ServerConfig::default(),
            transport.clone(),
            BanList::in_memory(),
            logging::child_or_discard(None),
        );
        let pickups = PickupsComponent::new();
        core.components().register(pickups.clone());
        core.load_components();
        Fixture {
            core,
            transport,
            pickups,
        }
    }

    fn connect(fixture: &Fixture, port: u16) -> Rc<Player> {
        let conn = fixture.transport.connect(addr(port));
        fixture
            .core
            .run_once(Duration::from_millis(10), Instant::now());
        let player = fixture.core.players().by_connection(conn).unwrap();
        player.set_state(PlayerState::Spawned);
        player
    }

    #[test]
    fn test_pickup_streams_in_range() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let pickup = fixture
            .pickups
            .create(1240, 2, Vec3::new(5.0, 0.0, 0.0), 0)
            .unwrap();

        fixture
            .core
            .players()
            .update_all(Instant::now() + Duration::from_secs(2));
        assert!(pickup.is_streamed_in(player.id()));
    }

    #[test]
    fn test_pick_up_requires_streamed_in() {
        struct Collector {
            picked: Cell<u32>,
        }

        impl PickupEventHandler for Collector {
            fn on_player_pick_up_pickup(&self, _player: &Rc<Player>, _pickup: &Rc<Pickup>) {
                self.picked.set(self.picked.get() + 1);
            }
        }

        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let far = fixture
            .pickups
            .create(1240, 2, Vec3::new(5000.0, 0.0, 0.0), 0)
            .unwrap();
        let near = fixture
            .pickups
            .create(1240, 2, Vec3::new(5.0, 0.0, 0.0), 0)
            .unwrap();
        fixture
            .core
            .players()
            .update_all(Instant::now() + Duration::from_secs(2));

        let collector = Rc::new(Collector { picked: Cell::new(0) });
        let handler: Rc<dyn PickupEventHandler> = collector.clone();
        fixture.pickups.events().add(&handler);

        // Forged report for a pickup that was never streamed in.
        fixture.transport.inject(
            player.connection(),
            rpcs::OnPlayerPickUpPickup {
                pickup_id: far.id() as u16,
            }
            .datagram(),
        );
        fixture
            .core
            .run_once(Duration::from_millis(10), Instant::now());
        assert_eq!(collector.picked.get(), 0);

        fixture.transport.inject(
            player.connection(),
            rpcs::OnPlayerPickUpPickup {
                pickup_id: near.id() as u16,
            }
            .datagram(),
        );
        fixture
            .core
            .run_once(Duration::from_millis(10), Instant::now());
        assert_eq!(collector.picked.get(), 1);
    }

    #[test]
    fn test_hidden_pickup_streams_out() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let pickup = fixture
            .pickups
            .create(1240, 2, Vec3::new(5.0, 0.0, 0.0), 0)
            .unwrap();

        fixture
            .core
            .players()
            .update_all(Instant::now() + Duration::from_secs(2));
        assert!(pickup.is_streamed_in(player.id()));

        pickup.set_hidden_for_player(&player, true);
        assert!(!pickup.is_streamed_in(player.id()));

        // While hidden, scans must not bring it back.
        fixture
            .core
            .players()
            .update_all(Instant::now() + Duration::from_secs(4));
        assert!(!pickup.is_streamed_in(player.id()));

        pickup.set_hidden_for_player(&player, false);
        fixture
            .core
            .players()
            .update_all(Instant::now() + Duration::from_secs(6));
        assert!(pickup.is_streamed_in(player.id()));
    }
}
