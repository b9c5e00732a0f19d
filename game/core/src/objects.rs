use crate::component::{Component, ComponentInfo, ComponentList, ComponentUid, SemanticVersion};
use crate::core::{ConfigEventHandler, Core};
use crate::player::{Player, PlayerId, PlayerPool, PlayerUpdateEventHandler};
use crate::rpcs;
use crate::stream::{scan_pool, StreamConfigHelper, Streamable, StreamedSet, ANY_VIRTUAL_WORLD};
use crate::vehicles::{Vehicle, VehiclesComponent};
use bedrock::math::Vec3;
use quarry::events::EventDispatcher;
use quarry::pool::{Pool, PoolEventHandler, ScopedLock};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Instant;

pub const OBJECT_POOL_SIZE: usize = 2000;
const INVALID_ATTACH_ID: u16 = 0xFFFF;

/// What an object is welded to.
#[derive(Clone)]
pub enum ObjectAttachment {
    Free,
    ToPlayer(PlayerId, Vec3),
    ToVehicle(usize, Weak<Vehicle>, Vec3),
}

/// A static world model.
pub struct Object {
    id: usize,
    model: Cell<i32>,
    position: Cell<Vec3>,
    rotation: Cell<Vec3>,
    draw_distance: Cell<f32>,
    virtual_world: Cell<i32>,
    attachment: RefCell<ObjectAttachment>,
    streamed_for: StreamedSet,
    players: Rc<PlayerPool>,
}

impl Object {
    fn new(
        id: usize,
        model: i32,
        position: Vec3,
        rotation: Vec3,
        draw_distance: f32,
        virtual_world: i32,
        players: Rc<PlayerPool>,
    ) -> Object {
        Object {
            id,
            model: Cell::new(model),
            position: Cell::new(position),
            rotation: Cell::new(rotation),
            draw_distance: Cell::new(draw_distance),
            virtual_world: Cell::new(virtual_world),
            attachment: RefCell::new(ObjectAttachment::Free),
            streamed_for: StreamedSet::new(),
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
    pub fn position(&self) -> Vec3 {
        self.position.get()
    }

    #[inline]
    pub fn rotation(&self) -> Vec3 {
        self.rotation.get()
    }

    #[inline]
    pub fn draw_distance(&self) -> f32 {
        self.draw_distance.get()
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

    pub fn set_position(&self, position: Vec3) {
        self.position.set(position);
        self.restream();
    }

    pub fn set_rotation(&self, rotation: Vec3) {
        self.rotation.set(rotation);
        self.restream();
    }

    pub fn set_draw_distance(&self, distance: f32) {
        self.draw_distance.set(distance);
        self.restream();
    }

    pub fn set_virtual_world(&self, world: i32) {
        self.virtual_world.set(world);
    }

    pub fn attach_to_player(&self, pid: PlayerId, offset: Vec3) {
        *self.attachment.borrow_mut() = ObjectAttachment::ToPlayer(pid, offset);
        self.restream();
    }

    pub fn attach_to_vehicle(&self, vehicle: &Rc<Vehicle>, offset: Vec3) {
        *self.attachment.borrow_mut() =
            ObjectAttachment::ToVehicle(vehicle.id(), Rc::downgrade(vehicle), offset);
        self.restream();
    }

    pub fn detach(&self) {
        *self.attachment.borrow_mut() = ObjectAttachment::Free;
        self.restream();
    }

    pub fn attachment(&self) -> ObjectAttachment {
        self.attachment.borrow().clone()
    }

    fn attach_ids(&self) -> (u16, u16) {
        match &*self.attachment.borrow() {
            ObjectAttachment::Free => (INVALID_ATTACH_ID, INVALID_ATTACH_ID),
            ObjectAttachment::ToPlayer(pid, _) => (*pid as u16, INVALID_ATTACH_ID),
            ObjectAttachment::ToVehicle(id, _, _) => (INVALID_ATTACH_ID, *id as u16),
        }
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
        let (attached_player, attached_vehicle) = self.attach_ids();
        player.send_rpc(
            rpcs::CreateObject {
                object_id: self.id as u16,
                model: self.model.get(),
                position: self.position.get(),
                rotation: self.rotation.get(),
                draw_distance: self.draw_distance.get(),
                attached_player,
                attached_vehicle,
            }
            .datagram(),
        );
    }

    fn stream_out_for_client(&self, player: &Rc<Player>) {
        player.send_rpc(
            rpcs::DestroyObject {
                object_id: self.id as u16,
            }
            .datagram(),
        );
    }
}

impl Streamable for Object {
    fn stream_position(&self, player: &Player) -> Option<Vec3> {
        match &*self.attachment.borrow() {
            ObjectAttachment::Free => Some(self.position.get()),
            ObjectAttachment::ToPlayer(pid, _) => {
                self.players.get(*pid).map(|target| target.position())
            }
            ObjectAttachment::ToVehicle(_, vehicle, _) => {
                let vehicle = vehicle.upgrade()?;
                if vehicle.is_streamed_in(player.id()) {
                    Some(vehicle.position())
                } else {
                    None
                }
            }
        }
    }

    fn virtual_world(&self) -> i32 {
        match &*self.attachment.borrow() {
            ObjectAttachment::Free => self.virtual_world.get(),
            _ => ANY_VIRTUAL_WORLD,
        }
    }

    fn is_streamed_for(&self, pid: PlayerId) -> bool {
        self.streamed_for.contains(pid)
    }

    /// Objects with a draw distance stream by it; the global radius is the
    /// fallback.
    fn stream_radius_sqr(&self, global_sqr: f32) -> f32 {
        let draw = self.draw_distance.get();
        if draw > 0.0 {
            draw * draw
        } else {
            global_sqr
        }
    }
}

pub trait ObjectEventHandler {
    fn on_object_stream_in(&self, _object: &Rc<Object>, _player: &Rc<Player>) {}
    fn on_object_stream_out(&self, _object: &Rc<Object>, _player: &Rc<Player>) {}
}

pub struct ObjectsComponent {
    weak: Weak<ObjectsComponent>,
    storage: Pool<Object>,
    events: EventDispatcher<dyn ObjectEventHandler>,
    helper: StreamConfigHelper,
    players: RefCell<Option<Rc<PlayerPool>>>,
    vehicles: RefCell<Weak<VehiclesComponent>>,
}

impl ObjectsComponent {
    pub fn new() -> Rc<ObjectsComponent> {
        Rc::new_cyclic(|weak| ObjectsComponent {
            weak: weak.clone(),
            storage: Pool::new(OBJECT_POOL_SIZE),
            events: EventDispatcher::new(),
            helper: StreamConfigHelper::new(200.0, 1000, 0),
            players: RefCell::new(None),
            vehicles: RefCell::new(Weak::new()),
        })
    }

    fn handle(&self) -> Rc<ObjectsComponent> {
        self.weak.upgrade().expect("component outlives its handle")
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn ObjectEventHandler> {
        &self.events
    }

    #[inline]
    pub fn pool(&self) -> &Pool<Object> {
        &self.storage
    }

    pub fn create(
        &self,
        model: i32,
        position: Vec3,
        rotation: Vec3,
        draw_distance: f32,
        virtual_world: i32,
    ) -> Option<Rc<Object>> {
        let players = self.players.borrow().clone()?;
        let id = self.storage.emplace_with(|id| {
            Object::new(id, model, position, rotation, draw_distance, virtual_world, players)
        })?;
        self.storage.get(id)
    }

    pub fn get(&self, id: usize) -> Option<Rc<Object>> {
        self.storage.get(id)
    }

    pub fn release(&self, id: usize) {
        if let Some(object) = self.storage.get(id) {
            object.destream();
            self.storage.release(id, false);
        }
    }

    pub fn count(&self) -> usize {
        self.storage.len()
    }

    /// Id-based attachment for surfaces that only carry a vehicle id.
    pub fn attach_to_vehicle_id(&self, object_id: usize, vehicle_id: usize, offset: Vec3) -> bool {
        let object = match self.storage.get(object_id) {
            Some(object) => object,
            None => return false,
        };
        let vehicles = match self.vehicles.borrow().upgrade() {
            Some(vehicles) => vehicles,
            None => return false,
        };
        match vehicles.get(vehicle_id) {
            Some(vehicle) => {
                object.attach_to_vehicle(&vehicle, offset);
                true
            }
            None => false,
        }
    }
}

impl Component for ObjectsComponent {
    fn uid(&self) -> ComponentUid {
        Self::UID
    }

    fn name(&self) -> &'static str {
        "Objects"
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
            .add(&(this as Rc<dyn ConfigEventHandler>));
    }

    fn on_init(&self, components: &ComponentList) {
        if let Some(vehicles) = components.query::<VehiclesComponent>() {
            *self.vehicles.borrow_mut() = Rc::downgrade(&vehicles);
        }
    }

    fn on_free(&self, uid: ComponentUid) {
        if uid == VehiclesComponent::UID {
            *self.vehicles.borrow_mut() = Weak::new();
        }
    }

    fn reset(&self) {
        self.storage.clear();
    }

    fn free(&self) {
        self.storage.clear();
    }
}

impl ComponentInfo for ObjectsComponent {
    const UID: ComponentUid = 0x59f8415f72da6160;
}

impl PoolEventHandler<Player> for ObjectsComponent {
    fn on_destroyed(&self, pid: usize, _player: &Rc<Player>) {
        self.storage.for_each(|_, object| object.remove_for(pid));
        self.helper.forget(pid);
    }
}

impl PlayerUpdateEventHandler for ObjectsComponent {
    fn on_player_update(&self, player: &Rc<Player>, now: Instant) -> bool {
        if !self.helper.should_stream(player.id(), now) {
            return true;
        }

        scan_pool(
            &self.storage,
            player,
            self.helper.distance_sqr(),
            |id, object| {
                if object.stream_in_for_player(player) {
                    if let Some(lock) = ScopedLock::new(&self.storage, id) {
                        self.events
                            .dispatch(|handler| handler.on_object_stream_in(&lock.entry, player));
                    }
                }
            },
            |id, object| {
                if object.stream_out_for_player(player) {
                    if let Some(lock) = ScopedLock::new(&self.storage, id) {
                        self.events
                            .dispatch(|handler| handler.on_object_stream_out(&lock.entry, player));
                    }
                }
            },
        );
        true
    }
}

impl ConfigEventHandler for ObjectsComponent {
    fn on_config_reloaded(&self, config: &crate::config::ServerConfig) {
        self.helper
            .reconfigure(config.game.stream_distance, config.game.stream_rate);
    }
}
