use crate::component::{Component, ComponentInfo, ComponentUid, SemanticVersion};
use crate::core::{ConfigEventHandler, Core, CoreEventHandler, RpcInHandler};
use crate::player::{
    Player, PlayerConnectEventHandler, PlayerId, PlayerPool, PlayerState, PlayerUpdateEventHandler,
};
use crate::rpcs::{self, id};
use crate::stream::{scan_pool, StreamConfigHelper, Streamable, StreamedSet};
use bedrock::math::Vec3;
use quarry::events::EventDispatcher;
use quarry::extensions::{Extension, ExtensionId, ExtensionInfo};
use quarry::net::wire::PacketReader;
use quarry::pool::{Pool, PoolEventHandler, ScopedLock};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

pub const VEHICLE_POOL_SIZE: usize = 2000;
/// Client-enforced cap on simultaneously visible vehicles.
pub const MAX_STREAMED_VEHICLES: u16 = 700;

/// Per-player streaming counter, attached to every player on connect.
pub struct PlayerVehicleData {
    num_streamed: Cell<u16>,
}

impl PlayerVehicleData {
    fn new() -> PlayerVehicleData {
        PlayerVehicleData {
            num_streamed: Cell::new(0),
        }
    }

    #[inline]
    pub fn num_streamed(&self) -> u16 {
        self.num_streamed.get()
    }
}

impl Extension for PlayerVehicleData {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn reset(&self) {
        self.num_streamed.set(0);
    }
}

impl ExtensionInfo for PlayerVehicleData {
    const EXTENSION_ID: ExtensionId = ExtensionId(0xa960485be6c70fb2);
}

/// Panel/door/light/tyre bitfields as the client reports them.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DamageStatus {
    pub panels: u32,
    pub doors: u32,
    pub lights: u8,
    pub tyres: u8,
}

/// Parameters a vehicle respawns with.
#[derive(Clone, Debug)]
pub struct VehicleSpawnData {
    pub model: i32,
    pub position: Vec3,
    pub z_rotation: f32,
    pub colours: (u8, u8),
    pub respawn_delay: Duration,
    pub siren: bool,
}

pub struct Vehicle {
    id: usize,
    spawn_data: VehicleSpawnData,
    model: Cell<i32>,
    position: Cell<Vec3>,
    z_rotation: Cell<f32>,
    virtual_world: Cell<i32>,
    interior: Cell<i32>,
    colours: Cell<(u8, u8)>,
    paintjob: Cell<Option<u8>>,
    mods: RefCell<Vec<i32>>,
    health: Cell<f32>,
    damage: Cell<DamageStatus>,
    siren: Cell<bool>,

    driver: Cell<Option<PlayerId>>,
    passengers: StreamedSet,

    // Back-edges across the vehicle graph are ids, never handles.
    trailer: Cell<Option<usize>>,
    tower: Cell<Option<usize>>,

    dead: Cell<bool>,
    dead_since: Cell<Option<Instant>>,
    empty_since: Cell<Option<Instant>>,

    streamed_for: StreamedSet,
    players: Rc<PlayerPool>,
}

impl Vehicle {
    fn new(id: usize, spawn_data: VehicleSpawnData, players: Rc<PlayerPool>) -> Vehicle {
        Vehicle {
            id,
            model: Cell::new(spawn_data.model),
            position: Cell::new(spawn_data.position),
            z_rotation: Cell::new(spawn_data.z_rotation),
            virtual_world: Cell::new(0),
            interior: Cell::new(0),
            colours: Cell::new(spawn_data.colours),
            paintjob: Cell::new(None),
            mods: RefCell::new(Vec::new()),
            health: Cell::new(1000.0),
            damage: Cell::new(DamageStatus::default()),
            siren: Cell::new(spawn_data.siren),
            driver: Cell::new(None),
            passengers: StreamedSet::new(),
            trailer: Cell::new(None),
            tower: Cell::new(None),
            dead: Cell::new(false),
            dead_since: Cell::new(None),
            empty_since: Cell::new(None),
            streamed_for: StreamedSet::new(),
            players,
            spawn_data,
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
    pub fn position(&self) -> Vec3 {
        self.position.get()
    }

    pub fn set_position(&self, position: Vec3) {
        self.position.set(position);
    }

    #[inline]
    pub fn z_rotation(&self) -> f32 {
        self.z_rotation.get()
    }

    pub fn set_z_rotation(&self, rotation: f32) {
        self.z_rotation.set(rotation);
    }

    #[inline]
    pub fn virtual_world_id(&self) -> i32 {
        self.virtual_world.get()
    }

    pub fn set_virtual_world(&self, world: i32) {
        self.virtual_world.set(world);
    }

    #[inline]
    pub fn interior(&self) -> i32 {
        self.interior.get()
    }

    pub fn set_interior(&self, interior: i32) {
        self.interior.set(interior);
    }

    #[inline]
    pub fn health(&self) -> f32 {
        self.health.get()
    }

    pub fn set_health(&self, health: f32) {
        self.health.set(health);
    }

    #[inline]
    pub fn colours(&self) -> (u8, u8) {
        self.colours.get()
    }

    pub fn set_colours(&self, primary: u8, secondary: u8) {
        self.colours.set((primary, secondary));
        self.restream();
    }

    #[inline]
    pub fn paintjob(&self) -> Option<u8> {
        self.paintjob.get()
    }

    pub fn set_paintjob(&self, paintjob: Option<u8>) {
        self.paintjob.set(paintjob);
        self.restream();
    }

    pub fn mods(&self) -> Vec<i32> {
        self.mods.borrow().clone()
    }

    pub fn add_mod(&self, component: i32) {
        let mut mods = self.mods.borrow_mut();
        if !mods.contains(&component) {
            mods.push(component);
        }
    }

    #[inline]
    pub fn damage_status(&self) -> DamageStatus {
        self.damage.get()
    }

    /// Installs a new damage bitfield set and pushes it to every watcher.
    pub fn set_damage_status(&self, status: DamageStatus) {
        self.damage.set(status);
        self.broadcast_damage();
    }

    #[inline]
    pub fn driver(&self) -> Option<PlayerId> {
        self.driver.get()
    }

    pub fn set_driver(&self, driver: Option<PlayerId>) {
        self.driver.set(driver);
        if driver.is_some() {
            self.empty_since.set(None);
        } else if self.passengers.is_empty() {
            self.empty_since.set(Some(Instant::now()));
        }
    }

    pub fn passengers(&self) -> Vec<PlayerId> {
        self.passengers.ids()
    }

    pub fn add_passenger(&self, pid: PlayerId) {
        self.passengers.add(pid);
        self.empty_since.set(None);
    }

    pub fn remove_passenger(&self, pid: PlayerId) {
        self.passengers.remove(pid);
        if self.driver.get().is_none() && self.passengers.is_empty() {
            self.empty_since.set(Some(Instant::now()));
        }
    }

    #[inline]
    pub fn trailer(&self) -> Option<usize> {
        self.trailer.get()
    }

    #[inline]
    pub fn tower(&self) -> Option<usize> {
        self.tower.get()
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.dead.get()
    }

    #[inline]
    pub fn is_streamed_in(&self, pid: PlayerId) -> bool {
        self.streamed_for.contains(pid)
    }

    #[inline]
    pub fn spawn_data(&self) -> &VehicleSpawnData {
        &self.spawn_data
    }

    /// Marks the vehicle destroyed; the per-tick pass respawns it after
    /// the configured delay.
    pub fn mark_dead(&self, now: Instant) {
        if !self.dead.get() {
            self.dead.set(true);
            self.dead_since.set(Some(now));
        }
    }

    fn respawn_due(&self, now: Instant) -> bool {
        let delay = self.spawn_data.respawn_delay;
        if self.dead.get() {
            if let Some(since) = self.dead_since.get() {
                return now.duration_since(since) >= delay;
            }
        }
        if self.driver.get().is_none() && self.passengers.is_empty() {
            if let Some(since) = self.empty_since.get() {
                return now.duration_since(since) >= delay;
            }
        }
        false
    }

    /// Restores spawn state and refreshes every watching client.
    fn respawn(&self) {
        self.model.set(self.spawn_data.model);
        self.position.set(self.spawn_data.position);
        self.z_rotation.set(self.spawn_data.z_rotation);
        self.colours.set(self.spawn_data.colours);
        self.health.set(1000.0);
        self.damage.set(DamageStatus::default());
        self.paintjob.set(None);
        self.mods.borrow_mut().clear();
        self.dead.set(false);
        self.dead_since.set(None);
        self.empty_since.set(None);
        self.trailer.set(None);
        self.tower.set(None);
        self.restream();
    }

    /// Streams the vehicle in for a player, honouring the per-player cap.
    /// Returns whether a show packet went out.
    pub fn stream_in_for_player(&self, player: &Rc<Player>) -> bool {
        let pid = player.id();
        if self.streamed_for.contains(pid) {
            return false;
        }

        let data = match player.query_extension::<PlayerVehicleData>() {
            Some(data) => data,
            None => return false,
        };
        if data.num_streamed.get() >= MAX_STREAMED_VEHICLES {
            // Over the cap the entity just waits; the next scan retries.
            return false;
        }

        data.num_streamed.set(data.num_streamed.get() + 1);
        self.streamed_for.add(pid);
        self.stream_in_for_client(player);
        true
    }

    /// Streams the vehicle out for a player. Returns whether a hide packet
    /// went out.
    pub fn stream_out_for_player(&self, player: &Rc<Player>) -> bool {
        if !self.streamed_for.remove(player.id()) {
            return false;
        }
        if let Some(data) = player.query_extension::<PlayerVehicleData>() {
            data.num_streamed
                .set(data.num_streamed.get().saturating_sub(1));
        }
        self.stream_out_for_client(player);
        true
    }

    fn remove_for(&self, pid: PlayerId) {
        self.streamed_for.remove(pid);
        self.passengers.remove(pid);
        if self.driver.get() == Some(pid) {
            self.driver.set(None);
            if self.passengers.is_empty() {
                self.empty_since.set(Some(Instant::now()));
            }
        }
    }

    fn restream(&self) {
        for pid in self.streamed_for.ids() {
            if let Some(player) = self.players.get(pid) {
                self.stream_out_for_client(&player);
                self.stream_in_for_client(&player);
            }
        }
    }

    /// Hides from every watcher and fixes up their counters; the pool slot
    /// is released right after.
    fn destream(&self) {
        for pid in self.streamed_for.ids() {
            if let Some(player) = self.players.get(pid) {
                if let Some(data) = player.query_extension::<PlayerVehicleData>() {
                    data.num_streamed
                        .set(data.num_streamed.get().saturating_sub(1));
                }
                self.stream_out_for_client(&player);
            }
        }
        self.streamed_for.clear();
    }

    fn stream_in_for_client(&self, player: &Rc<Player>) {
        let damage = self.damage.get();
        player.send_rpc(
            rpcs::AddVehicleForPlayer {
                vehicle_id: self.id as u16,
                model: self.model.get(),
                position: self.position.get(),
                angle: self.z_rotation.get(),
                colours: self.colours.get(),
                health: self.health.get(),
                panels: damage.panels,
                doors: damage.doors,
                lights: damage.lights,
                tyres: damage.tyres,
                siren: self.siren.get(),
            }
            .datagram(),
        );
    }

    fn stream_out_for_client(&self, player: &Rc<Player>) {
        player.send_rpc(
            rpcs::RemoveVehicleForPlayer {
                vehicle_id: self.id as u16,
            }
            .datagram(),
        );
    }

    fn broadcast_damage(&self) {
        let damage = self.damage.get();
        let datagram = rpcs::VehicleDamageStatus {
            vehicle_id: self.id as u16,
            panels: damage.panels,
            doors: damage.doors,
            lights: damage.lights,
            tyres: damage.tyres,
        }
        .datagram();

        for pid in self.streamed_for.ids() {
            if let Some(player) = self.players.get(pid) {
                player.send_rpc(datagram.clone());
            }
        }
    }
}

impl Streamable for Vehicle {
    fn stream_position(&self, _player: &Player) -> Option<Vec3> {
        Some(self.position.get())
    }

    fn virtual_world(&self) -> i32 {
        self.virtual_world.get()
    }

    fn is_streamed_for(&self, pid: PlayerId) -> bool {
        self.streamed_for.contains(pid)
    }
}

pub trait VehicleEventHandler {
    fn on_vehicle_stream_in(&self, _vehicle: &Rc<Vehicle>, _player: &Rc<Player>) {}
    fn on_vehicle_stream_out(&self, _vehicle: &Rc<Vehicle>, _player: &Rc<Player>) {}
    fn on_vehicle_death(&self, _vehicle: &Rc<Vehicle>) {}
    fn on_vehicle_spawn(&self, _vehicle: &Rc<Vehicle>) {}
    fn on_vehicle_damage_status_update(&self, _vehicle: &Rc<Vehicle>, _player: &Rc<Player>) {}
}

pub struct VehiclesComponent {
    weak: Weak<VehiclesComponent>,
    storage: Pool<Vehicle>,
    events: EventDispatcher<dyn VehicleEventHandler>,
    helper: StreamConfigHelper,
    players: RefCell<Option<Rc<PlayerPool>>>,
}

impl VehiclesComponent {
    pub fn new() -> Rc<VehiclesComponent> {
        Rc::new_cyclic(|weak| VehiclesComponent {
            weak: weak.clone(),
            storage: Pool::new(VEHICLE_POOL_SIZE),
            events: EventDispatcher::new(),
            helper: StreamConfigHelper::new(200.0, 1000, 0),
            players: RefCell::new(None),
        })
    }

    fn handle(&self) -> Rc<VehiclesComponent> {
        self.weak.upgrade().expect("component outlives its handle")
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn VehicleEventHandler> {
        &self.events
    }

    #[inline]
    pub fn pool(&self) -> &Pool<Vehicle> {
        &self.storage
    }

    pub fn create(
        &self,
        model: i32,
        position: Vec3,
        z_rotation: f32,
        colours: (u8, u8),
        respawn_delay: Duration,
    ) -> Option<Rc<Vehicle>> {
        let players = self.players.borrow().clone()?;
        let spawn_data = VehicleSpawnData {
            model,
            position,
            z_rotation,
            colours,
            respawn_delay,
            siren: false,
        };
        let id = self
            .storage
            .emplace_with(|id| Vehicle::new(id, spawn_data, players))?;
        self.storage.get(id)
    }

    pub fn get(&self, id: usize) -> Option<Rc<Vehicle>> {
        self.storage.get(id)
    }

    pub fn release(&self, id: usize) {
        if let Some(vehicle) = self.storage.get(id) {
            // Unhitch anything pointing at the goner first.
            if let Some(trailer_id) = vehicle.trailer() {
                if let Some(trailer) = self.storage.get(trailer_id) {
                    trailer.tower.set(None);
                }
            }
            if let Some(tower_id) = vehicle.tower() {
                if let Some(tower) = self.storage.get(tower_id) {
                    tower.trailer.set(None);
                }
            }
            vehicle.destream();
            self.storage.release(id, false);
        }
    }

    pub fn count(&self) -> usize {
        self.storage.len()
    }

    /// Hitches `trailer` behind `tower`; ids only across the back-edge.
    pub fn attach_trailer(&self, tower_id: usize, trailer_id: usize) -> bool {
        let tower = match self.storage.get(tower_id) {
            Some(tower) => tower,
            None => return false,
        };
        let trailer = match self.storage.get(trailer_id) {
            Some(trailer) => trailer,
            None => return false,
        };
        if tower_id == trailer_id {
            return false;
        }

        if let Some(previous) = tower.trailer.get() {
            if let Some(previous) = self.storage.get(previous) {
                previous.tower.set(None);
            }
        }

        tower.trailer.set(Some(trailer_id));
        trailer.tower.set(Some(tower_id));
        true
    }

    pub fn detach_trailer(&self, tower_id: usize) {
        if let Some(tower) = self.storage.get(tower_id) {
            if let Some(trailer_id) = tower.trailer.get() {
                if let Some(trailer) = self.storage.get(trailer_id) {
                    trailer.tower.set(None);
                }
            }
            tower.trailer.set(None);
        }
    }

    pub fn mark_dead(&self, id: usize, now: Instant) {
        if let Some(vehicle) = self.storage.get(id) {
            vehicle.mark_dead(now);
            if let Some(lock) = ScopedLock::new(&self.storage, id) {
                self.events
                    .dispatch(|handler| handler.on_vehicle_death(&lock.entry));
            }
        }
    }

    /// Whether an unoccupied-sync sender holds authority over a vehicle:
    /// the driver, or for trailers the towing vehicle's driver, or for a
    /// fully unoccupied vehicle any player it is streamed in for.
    fn sync_authority(&self, vehicle: &Vehicle, pid: PlayerId) -> bool {
        if let Some(tower_id) = vehicle.tower() {
            return match self.storage.get(tower_id) {
                Some(tower) => tower.driver() == Some(pid),
                None => false,
            };
        }
        match vehicle.driver() {
            Some(driver) => driver == pid,
            None => vehicle.is_streamed_in(pid),
        }
    }
}

impl Component for VehiclesComponent {
    fn uid(&self) -> ComponentUid {
        Self::UID
    }

    fn name(&self) -> &'static str {
        "Vehicles"
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
            .connect_events()
            .add(&(this.clone() as Rc<dyn PlayerConnectEventHandler>));
        core.players()
            .update_events()
            .add(&(this.clone() as Rc<dyn PlayerUpdateEventHandler>));
        core.players()
            .pool_events()
            .add(&(this.clone() as Rc<dyn PoolEventHandler<Player>>));
        core.tick_events()
            .add(&(this.clone() as Rc<dyn CoreEventHandler>));
        core.config_events()
            .add(&(this.clone() as Rc<dyn ConfigEventHandler>));
        core.rpcs()
            .add_handler(id::UNOCCUPIED_SYNC, &(this.clone() as Rc<dyn RpcInHandler>));
        core.rpcs()
            .add_handler(id::VEHICLE_DAMAGE_STATUS, &(this as Rc<dyn RpcInHandler>));
    }

    fn reset(&self) {
        self.storage.clear();
    }

    fn free(&self) {
        self.storage.clear();
    }
}

impl ComponentInfo for VehiclesComponent {
    const UID: ComponentUid = 0x3f1f62ee9e22ab19;
}

impl PlayerConnectEventHandler for VehiclesComponent {
    fn on_player_connect(&self, player: &Rc<Player>) {
        player.extensions().add(Rc::new(PlayerVehicleData::new()));
    }
}

impl PoolEventHandler<Player> for VehiclesComponent {
    fn on_destroyed(&self, pid: usize, _player: &Rc<Player>) {
        self.storage.for_each(|_, vehicle| vehicle.remove_for(pid));
        self.helper.forget(pid);
    }
}

impl PlayerUpdateEventHandler for VehiclesComponent {
    fn on_player_update(&self, player: &Rc<Player>, now: Instant) -> bool {
        if !self.helper.should_stream(player.id(), now) {
            return true;
        }

        scan_pool(
            &self.storage,
            player,
            self.helper.distance_sqr(),
            |id, vehicle| {
                if vehicle.stream_in_for_player(player) {
                    if let Some(lock) = ScopedLock::new(&self.storage, id) {
                        self.events
                            .dispatch(|handler| handler.on_vehicle_stream_in(&lock.entry, player));
                    }
                }
            },
            |id, vehicle| {
                if vehicle.stream_out_for_player(player) {
                    if let Some(lock) = ScopedLock::new(&self.storage, id) {
                        self.events
                            .dispatch(|handler| handler.on_vehicle_stream_out(&lock.entry, player));
                    }
                }
            },
        );
        true
    }
}

impl CoreEventHandler for VehiclesComponent {
    /// The respawn pass: dead or long-empty vehicles go back to spawn.
    fn on_tick(&self, _elapsed: Duration, now: Instant) {
        let due: Vec<usize> = {
            let mut due = Vec::new();
            self.storage.for_each(|id, vehicle| {
                if vehicle.respawn_due(now) {
                    due.push(id);
                }
            });
            due
        };

        for id in due {
            if let Some(vehicle) = self.storage.get(id) {
                vehicle.respawn();
                if let Some(lock) = ScopedLock::new(&self.storage, id) {
                    self.events
                        .dispatch(|handler| handler.on_vehicle_spawn(&lock.entry));
                }
            }
        }
    }
}

impl ConfigEventHandler for VehiclesComponent {
    fn on_config_reloaded(&self, config: &crate::config::ServerConfig) {
        self.helper
            .reconfigure(config.game.stream_distance, config.game.stream_rate);
    }
}

impl RpcInHandler for VehiclesComponent {
    fn on_receive(&self, rpc: u8, player: &Rc<Player>, reader: &mut PacketReader) -> bool {
        if player.state() == PlayerState::None {
            return true;
        }

        match rpc {
            id::UNOCCUPIED_SYNC => {
                let sync = match rpcs::UnoccupiedSync::read(reader) {
                    Ok(sync) => sync,
                    Err(_) => return false,
                };

                let vehicle = match self.storage.get(sync.vehicle_id as usize) {
                    Some(vehicle) => vehicle,
                    None => return true,
                };
                if !self.sync_authority(&vehicle, player.id()) {
                    // Not this player's vehicle to report on.
                    return true;
                }

                vehicle.set_position(sync.position);
                vehicle.set_z_rotation(sync.angle);
                vehicle.set_health(sync.health);
                true
            }
            id::VEHICLE_DAMAGE_STATUS => {
                let mut read = || -> Result<(u16, DamageStatus), quarry::net::wire::WireError> {
                    Ok((
                        reader.read_u16()?,
                        DamageStatus {
                            panels: reader.read_u32()?,
                            doors: reader.read_u32()?,
                            lights: reader.read_u8()?,
                            tyres: reader.read_u8()?,
                        },
                    ))
                };
                let (vehicle_id, status) = match read() {
                    Ok(update) => update,
                    Err(_) => return false,
                };

                let vehicle = match self.storage.get(vehicle_id as usize) {
                    Some(vehicle) => vehicle,
                    None => return true,
                };
                // Only the driver reports wear and tear.
                if vehicle.driver() != Some(player.id()) {
                    return true;
                }

                vehicle.set_damage_status(status);
                let id = vehicle.id();
                if let Some(lock) = ScopedLock::new(&self.storage, id) {
                    self.events.dispatch(|handler| {
                        handler.on_vehicle_damage_status_update(&lock.entry, player)
                    });
                }
                true
            }
            _ => true,
        }
    }
}
