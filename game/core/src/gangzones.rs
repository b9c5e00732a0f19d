use crate::component::{Component, ComponentInfo, ComponentUid, SemanticVersion};
use crate::core::Core;
use crate::player::{Player, PlayerConnectEventHandler, PlayerId, PlayerPool, PlayerUpdateEventHandler};
use crate::rpcs;
use bedrock::colour::Colour;
use bedrock::math::Vec2;
use hashbrown::HashMap;
use indexmap::IndexSet;
use quarry::events::EventDispatcher;
use quarry::extensions::{Extension, ExtensionId, ExtensionInfo};
use quarry::legacy::FiniteIdMapper;
use quarry::pool::{Pool, PoolEventHandler, ScopedLock};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Instant;

pub const GANG_ZONE_POOL_SIZE: usize = 1024;

/// Axis-aligned zone rectangle on the world map.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GangZonePos {
    pub min: Vec2,
    pub max: Vec2,
}

impl GangZonePos {
    pub fn new(min: Vec2, max: Vec2) -> GangZonePos {
        // Normalise so the AABB test can assume ordered corners.
        GangZonePos {
            min: Vec2::new(min.x.min(max.x), min.y.min(max.y)),
            max: Vec2::new(min.x.max(max.x), min.y.max(max.y)),
        }
    }

    #[inline]
    fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.min.x && x <= self.max.x && y >= self.min.y && y <= self.max.y
    }
}

/// A map rectangle with per-player colour and flash state. Zones are not
/// distance-streamed; visibility is explicit per player.
pub struct GangZone {
    id: usize,
    pos: Cell<GangZonePos>,
    colour: Cell<Colour>,
    shown_for: RefCell<IndexSet<PlayerId>>,
    colour_for: RefCell<HashMap<PlayerId, Colour>>,
    flash_colour_for: RefCell<HashMap<PlayerId, Colour>>,
    flashing_for: RefCell<IndexSet<PlayerId>>,
    inside: RefCell<IndexSet<PlayerId>>,
    players: Rc<PlayerPool>,
}

impl GangZone {
    fn new(id: usize, pos: GangZonePos, players: Rc<PlayerPool>) -> GangZone {
        GangZone {
            id,
            pos: Cell::new(pos),
            colour: Cell::new(Colour::none()),
            shown_for: RefCell::new(IndexSet::new()),
            colour_for: RefCell::new(HashMap::new()),
            flash_colour_for: RefCell::new(HashMap::new()),
            flashing_for: RefCell::new(IndexSet::new()),
            inside: RefCell::new(IndexSet::new()),
            players,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn position(&self) -> GangZonePos {
        self.pos.get()
    }

    pub fn set_position(&self, pos: GangZonePos) {
        self.pos.set(pos);
        self.restream();
    }

    pub fn is_shown_for(&self, pid: PlayerId) -> bool {
        self.shown_for.borrow().contains(&pid)
    }

    pub fn is_flashing_for(&self, pid: PlayerId) -> bool {
        self.flashing_for.borrow().contains(&pid)
    }

    pub fn is_player_inside(&self, pid: PlayerId) -> bool {
        self.inside.borrow().contains(&pid)
    }

    pub fn colour_for(&self, pid: PlayerId) -> Colour {
        self.colour_for
            .borrow()
            .get(&pid)
            .copied()
            .unwrap_or_else(Colour::none)
    }

    pub fn flash_colour_for(&self, pid: PlayerId) -> Colour {
        self.flash_colour_for
            .borrow()
            .get(&pid)
            .copied()
            .unwrap_or_else(Colour::none)
    }

    /// Shows the zone to one player, installing that player's colour.
    pub fn show_for_player(&self, player: &Rc<Player>, colour: Colour) {
        let pid = player.id();
        self.colour.set(colour);
        self.shown_for.borrow_mut().insert(pid);
        self.flashing_for.borrow_mut().shift_remove(&pid);
        self.colour_for.borrow_mut().insert(pid, colour);
        self.flash_colour_for.borrow_mut().remove(&pid);
        self.show_for_client(player, colour);
    }

    pub fn hide_for_player(&self, player: &Rc<Player>) {
        self.remove_for(player.id());
        self.hide_for_client(player);
    }

    /// Starts flashing between the installed and the flash colour.
    pub fn flash_for_player(&self, player: &Rc<Player>, colour: Colour) {
        let pid = player.id();
        player.send_rpc(
            rpcs::FlashGangZone {
                zone_id: self.id as u16,
                colour,
            }
            .datagram(),
        );
        self.flash_colour_for.borrow_mut().insert(pid, colour);
        self.flashing_for.borrow_mut().insert(pid);
    }

    pub fn stop_flash_for_player(&self, player: &Rc<Player>) {
        let pid = player.id();
        player.send_rpc(
            rpcs::StopFlashGangZone {
                zone_id: self.id as u16,
            }
            .datagram(),
        );
        self.flash_colour_for.borrow_mut().remove(&pid);
        self.flashing_for.borrow_mut().shift_remove(&pid);
    }

    pub fn shown_for(&self) -> Vec<PlayerId> {
        self.shown_for.borrow().iter().copied().collect()
    }

    fn set_player_inside(&self, pid: PlayerId, status: bool) {
        let mut inside = self.inside.borrow_mut();
        if status {
            inside.insert(pid);
        } else {
            inside.shift_remove(&pid);
        }
    }

    fn remove_for(&self, pid: PlayerId) {
        self.shown_for.borrow_mut().shift_remove(&pid);
        self.inside.borrow_mut().shift_remove(&pid);
        self.flashing_for.borrow_mut().shift_remove(&pid);
        self.colour_for.borrow_mut().remove(&pid);
        self.flash_colour_for.borrow_mut().remove(&pid);
    }

    fn restream(&self) {
        for pid in self.shown_for() {
            if let Some(player) = self.players.get(pid) {
                let colour = self.colour_for(pid);
                self.hide_for_client(&player);
                self.show_for_client(&player, colour);
            }
        }
    }

    fn destream(&self) {
        for pid in self.shown_for() {
            if let Some(player) = self.players.get(pid) {
                self.hide_for_client(&player);
            }
        }
        self.shown_for.borrow_mut().clear();
    }

    fn show_for_client(&self, player: &Rc<Player>, colour: Colour) {
        let pos = self.pos.get();
        player.send_rpc(
            rpcs::ShowGangZone {
                zone_id: self.id as u16,
                min: pos.min,
                max: pos.max,
                colour,
            }
            .datagram(),
        );
    }

    fn hide_for_client(&self, player: &Rc<Player>) {
        player.send_rpc(
            rpcs::HideGangZone {
                zone_id: self.id as u16,
            }
            .datagram(),
        );
    }
}

/// Per-player compact id windows for scripting surfaces.
pub struct PlayerGangZoneData {
    legacy_ids: FiniteIdMapper,
    client_ids: FiniteIdMapper,
}

impl PlayerGangZoneData {
    fn new() -> PlayerGangZoneData {
        PlayerGangZoneData {
            legacy_ids: FiniteIdMapper::new(0, GANG_ZONE_POOL_SIZE as i32),
            client_ids: FiniteIdMapper::new(0, GANG_ZONE_POOL_SIZE as i32),
        }
    }

    #[inline]
    pub fn legacy_ids(&self) -> &FiniteIdMapper {
        &self.legacy_ids
    }

    #[inline]
    pub fn client_ids(&self) -> &FiniteIdMapper {
        &self.client_ids
    }
}

impl Extension for PlayerGangZoneData {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn reset(&self) {
        self.legacy_ids.clear();
        self.client_ids.clear();
    }
}

impl ExtensionInfo for PlayerGangZoneData {
    const EXTENSION_ID: ExtensionId = ExtensionId(0x9f2ba81c63f0e5a7);
}

pub trait GangZoneEventHandler {
    fn on_player_enter_gang_zone(&self, _player: &Rc<Player>, _zone: &Rc<GangZone>) {}
    fn on_player_leave_gang_zone(&self, _player: &Rc<Player>, _zone: &Rc<GangZone>) {}
}

pub struct GangZonesComponent {
    weak: Weak<GangZonesComponent>,
    storage: Pool<GangZone>,
    /// Zones opted into enter/leave checking.
    checking: RefCell<IndexSet<usize>>,
    events: EventDispatcher<dyn GangZoneEventHandler>,
    legacy_ids: FiniteIdMapper,
    players: RefCell<Option<Rc<PlayerPool>>>,
}

impl GangZonesComponent {
    pub fn new() -> Rc<GangZonesComponent> {
        Rc::new_cyclic(|weak| GangZonesComponent {
            weak: weak.clone(),
            storage: Pool::new(GANG_ZONE_POOL_SIZE),
            checking: RefCell::new(IndexSet::new()),
            events: EventDispatcher::new(),
            legacy_ids: FiniteIdMapper::new(0, GANG_ZONE_POOL_SIZE as i32),
            players: RefCell::new(None),
        })
    }

    fn handle(&self) -> Rc<GangZonesComponent> {
        self.weak.upgrade().expect("component outlives its handle")
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn GangZoneEventHandler> {
        &self.events
    }

    #[inline]
    pub fn legacy_ids(&self) -> &FiniteIdMapper {
        &self.legacy_ids
    }

    pub fn create(&self, pos: GangZonePos) -> Option<Rc<GangZone>> {
        let players = self.players.borrow().clone()?;
        let id = self
            .storage
            .emplace_with(|id| GangZone::new(id, pos, players))?;
        self.storage.get(id)
    }

    pub fn get(&self, id: usize) -> Option<Rc<GangZone>> {
        self.storage.get(id)
    }

    pub fn release(&self, id: usize) {
        if let Some(zone) = self.storage.get(id) {
            zone.destream();
            self.checking.borrow_mut().shift_remove(&id);
            self.storage.release(id, false);
        }
    }

    pub fn count(&self) -> usize {
        self.storage.len()
    }

    /// Opts a zone in or out of the per-update enter/leave check.
    pub fn use_check(&self, id: usize, enable: bool) {
        let mut checking = self.checking.borrow_mut();
        if enable {
            if self.storage.get(id).is_some() {
                checking.insert(id);
            }
        } else {
            checking.shift_remove(&id);
        }
    }
}

impl Component for GangZonesComponent {
    fn uid(&self) -> ComponentUid {
        Self::UID
    }

    fn name(&self) -> &'static str {
        "GangZones"
    }

    fn version(&self) -> SemanticVersion {
        SemanticVersion::new(0, 1, 0)
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn on_load(&self, core: &Rc<Core>) {
        *self.players.borrow_mut() = Some(core.players().clone());

        let this = self.handle();
        core.players()
            .connect_events()
            .add(&(this.clone() as Rc<dyn PlayerConnectEventHandler>));
        core.players()
            .update_events()
            .add(&(this.clone() as Rc<dyn PlayerUpdateEventHandler>));
        core.players()
            .pool_events()
            .add(&(this as Rc<dyn PoolEventHandler<Player>>));
    }

    fn reset(&self) {
        self.storage.clear();
        self.checking.borrow_mut().clear();
        self.legacy_ids.clear();
    }

    fn free(&self) {
        self.storage.clear();
    }
}

impl ComponentInfo for GangZonesComponent {
    const UID: ComponentUid = 0xb3351d11ee8d8056;
}

impl PlayerConnectEventHandler for GangZonesComponent {
    fn on_player_connect(&self, player: &Rc<Player>) {
        player.extensions().add(Rc::new(PlayerGangZoneData::new()));
    }
}

impl PoolEventHandler<Player> for GangZonesComponent {
    fn on_destroyed(&self, pid: usize, _player: &Rc<Player>) {
        self.storage.for_each(|_, zone| zone.remove_for(pid));
    }
}

impl PlayerUpdateEventHandler for GangZonesComponent {
    /// AABB enter/leave detection, only for zones on the checking list and
    /// only while the zone is shown to the player.
    fn on_player_update(&self, player: &Rc<Player>, _now: Instant) -> bool {
        let position = player.position();
        let pid = player.id();
        let checking: Vec<usize> = self.checking.borrow().iter().copied().collect();

        for id in checking {
            let zone = match self.storage.get(id) {
                Some(zone) => zone,
                None => continue,
            };
            if !zone.is_shown_for(pid) {
                continue;
            }

            let inside_area = zone.position().contains(position.x, position.y);
            let inside_list = zone.is_player_inside(pid);

            if inside_area && !inside_list {
                zone.set_player_inside(pid, true);
                if let Some(lock) = ScopedLock::new(&self.storage, id) {
                    self.events
                        .dispatch(|handler| handler.on_player_enter_gang_zone(player, &lock.entry));
                }
            } else if !inside_area && inside_list {
                zone.set_player_inside(pid, false);
                if let Some(lock) = ScopedLock::new(&self.storage, id) {
                    self.events
                        .dispatch(|handler| handler.on_player_leave_gang_zone(player, &lock.entry));
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
    use crate::rpcs::id;
    use bedrock::logging;
    use bedrock::math::Vec3;
    use quarry::net::loopback::LoopbackTransport;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    struct Fixture {
        core: Rc<Core>,
        transport: Rc<LoopbackTransport>,
        zones: Rc<GangZonesComponent>,
    }

    fn fixture() -> Fixture {
        let transport = Rc::new(LoopbackTransport::new());
        let core = Core::new(
            ServerConfig::default(),
            transport.clone(),
            BanList::in_memory(),
            logging::child_or_discard(None),
        );
        let zones = GangZonesComponent::new();
        core.components().register(zones.clone());
        core.load_components();
        Fixture {
            core,
            transport,
            zones,
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

    fn zone(fixture: &Fixture) -> Rc<GangZone> {
        fixture
            .zones
            .create(GangZonePos::new(Vec2::new(0.0, 0.0), Vec2::new(100.0, 100.0)))
            .unwrap()
    }

    #[test]
    fn test_per_player_colours() {
        let fixture = fixture();
        let alice = connect(&fixture, 3000);
        let bob = connect(&fixture, 3001);
        let zone = zone(&fixture);

        let red = Colour::from_rgba(0xFF0000AA);
        let blue = Colour::from_rgba(0x0000FFAA);
        zone.show_for_player(&alice, red);
        zone.show_for_player(&bob, blue);

        assert_eq!(zone.colour_for(alice.id()), red);
        assert_eq!(zone.colour_for(bob.id()), blue);
        assert!(zone.is_shown_for(alice.id()));
        assert!(zone.is_shown_for(bob.id()));
    }

    #[test]
    fn test_flash_and_stop() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let zone = zone(&fixture);

        zone.show_for_player(&player, Colour::from_rgba(0xFF0000AA));
        fixture.transport.take_sent();

        let flash = Colour::from_rgba(0x00FF00AA);
        zone.flash_for_player(&player, flash);
        assert!(zone.is_flashing_for(player.id()));
        assert_eq!(zone.flash_colour_for(player.id()), flash);

        zone.stop_flash_for_player(&player);
        assert!(!zone.is_flashing_for(player.id()));
        assert_eq!(zone.flash_colour_for(player.id()), Colour::none());

        let sent = fixture.transport.take_sent_to(player.connection());
        let ids: Vec<u8> = sent.iter().map(|datagram| datagram[0]).collect();
        assert_eq!(ids, vec![id::FLASH_GANG_ZONE, id::STOP_FLASH_GANG_ZONE]);
    }

    #[test]
    fn test_show_resets_flash_state() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let zone = zone(&fixture);

        zone.show_for_player(&player, Colour::from_rgba(0xFF0000AA));
        zone.flash_for_player(&player, Colour::from_rgba(0x00FF00AA));
        zone.show_for_player(&player, Colour::from_rgba(0x0000FFAA));

        assert!(!zone.is_flashing_for(player.id()));
    }

    #[test]
    fn test_enter_leave_events() {
        struct Tracker {
            enters: Cell<u32>,
            leaves: Cell<u32>,
        }

        impl GangZoneEventHandler for Tracker {
            fn on_player_enter_gang_zone(&self, _player: &Rc<Player>, _zone: &Rc<GangZone>) {
                self.enters.set(self.enters.get() + 1);
            }

            fn on_player_leave_gang_zone(&self, _player: &Rc<Player>, _zone: &Rc<GangZone>) {
                self.leaves.set(self.leaves.get() + 1);
            }
        }

        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let zone = zone(&fixture);
        zone.show_for_player(&player, Colour::from_rgba(0xFF0000AA));
        fixture.zones.use_check(zone.id(), true);

        let tracker = Rc::new(Tracker {
            enters: Cell::new(0),
            leaves: Cell::new(0),
        });
        let handler: Rc<dyn GangZoneEventHandler> = tracker.clone();
        fixture.zones.events().add(&handler);

        // Outside, then cross in, dwell, and cross back out.
        player.set_position(Vec3::new(-50.0, -50.0, 0.0));
        fixture.core.players().update_all(Instant::now());
        player.set_position(Vec3::new(50.0, 50.0, 0.0));
        fixture.core.players().update_all(Instant::now());
        fixture.core.players().update_all(Instant::now());
        player.set_position(Vec3::new(200.0, 200.0, 0.0));
        fixture.core.players().update_all(Instant::now());

        assert_eq!(tracker.enters.get(), 1);
        assert_eq!(tracker.leaves.get(), 1);
        assert!(!zone.is_player_inside(player.id()));
    }

    #[test]
    fn test_hidden_zone_not_checked() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let zone = zone(&fixture);
        fixture.zones.use_check(zone.id(), true);

        player.set_position(Vec3::new(50.0, 50.0, 0.0));
        fixture.core.players().update_all(Instant::now());
        assert!(!zone.is_player_inside(player.id()));
    }

    #[test]
    fn test_per_player_id_windows() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);
        // Zone id 0 is ambiguous with the mapper's NOT_FOUND sentinel, so
        // map a later zone.
        let _zone0 = zone(&fixture);
        let zone = zone(&fixture);

        let data = player.query_extension::<PlayerGangZoneData>().unwrap();
        let legacy = data.legacy_ids().reserve();
        data.legacy_ids().set(legacy, zone.id() as i32);

        assert_eq!(data.legacy_ids().from_legacy(legacy), zone.id() as i32);
        assert_eq!(data.legacy_ids().to_legacy(zone.id() as i32), legacy);

        // Respawn wipes the windows.
        player.reset_for_respawn();
        assert_eq!(
            data.legacy_ids().from_legacy(legacy),
            FiniteIdMapper::NOT_FOUND
        );
    }
}
