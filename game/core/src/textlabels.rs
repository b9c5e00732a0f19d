use crate::component::{Component, ComponentInfo, ComponentList, ComponentUid, SemanticVersion};
use crate::core::{ConfigEventHandler, Core};
use crate::player::{Player, PlayerConnectEventHandler, PlayerId, PlayerPool, PlayerUpdateEventHandler};
use crate::rpcs;
use crate::stream::{scan_pool, StreamConfigHelper, Streamable, StreamedSet, ANY_VIRTUAL_WORLD};
use crate::vehicles::{Vehicle, VehiclesComponent};
use bedrock::colour::Colour;
use bedrock::math::Vec3;
use quarry::events::EventDispatcher;
use quarry::extensions::{Extension, ExtensionId, ExtensionInfo};
use quarry::pool::{Pool, PoolEventHandler, ScopedLock};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Instant;

pub const TEXT_LABEL_POOL_SIZE: usize = 1024;
pub const PLAYER_TEXT_LABEL_POOL_SIZE: usize = 1024;

const INVALID_ATTACH_ID: u16 = 0xFFFF;

/// What a label is pinned to. The label's own position becomes an offset
/// relative to the target; eligibility follows the target.
#[derive(Clone)]
pub enum LabelAttachment {
    Free,
    ToPlayer(PlayerId),
    ToVehicle(usize, Weak<Vehicle>),
}

/// A floating world text label.
pub struct TextLabel {
    id: usize,
    text: RefCell<String>,
    colour: Cell<Colour>,
    position: Cell<Vec3>,
    draw_distance: Cell<f32>,
    test_los: Cell<bool>,
    virtual_world: Cell<i32>,
    attachment: RefCell<LabelAttachment>,
    streamed_for: StreamedSet,
    players: Rc<PlayerPool>,
}

impl TextLabel {
    fn new(
        id: usize,
        text: &str,
        colour: Colour,
        position: Vec3,
        draw_distance: f32,
        virtual_world: i32,
        test_los: bool,
        players: Rc<PlayerPool>,
    ) -> TextLabel {
        TextLabel {
            id,
            text: RefCell::new(text.to_string()),
            colour: Cell::new(colour),
            position: Cell::new(position),
            draw_distance: Cell::new(draw_distance),
            test_los: Cell::new(test_los),
            virtual_world: Cell::new(virtual_world),
            attachment: RefCell::new(LabelAttachment::Free),
            streamed_for: StreamedSet::new(),
            players,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }

    #[inline]
    pub fn colour(&self) -> Colour {
        self.colour.get()
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position.get()
    }

    #[inline]
    pub fn draw_distance(&self) -> f32 {
        self.draw_distance.get()
    }

    #[inline]
    pub fn test_los(&self) -> bool {
        self.test_los.get()
    }

    #[inline]
    pub fn virtual_world_id(&self) -> i32 {
        self.virtual_world.get()
    }

    #[inline]
    pub fn is_streamed_in(&self, pid: PlayerId) -> bool {
        self.streamed_for.contains(pid)
    }

    pub fn set_text(&self, text: &str) {
        *self.text.borrow_mut() = text.to_string();
        self.restream();
    }

    pub fn set_colour(&self, colour: Colour) {
        self.colour.set(colour);
        self.restream();
    }

    pub fn set_colour_and_text(&self, colour: Colour, text: &str) {
        self.colour.set(colour);
        *self.text.borrow_mut() = text.to_string();
        self.restream();
    }

    pub fn set_position(&self, position: Vec3) {
        self.position.set(position);
        self.restream();
    }

    pub fn set_draw_distance(&self, distance: f32) {
        self.draw_distance.set(distance);
        self.restream();
    }

    pub fn set_test_los(&self, test_los: bool) {
        self.test_los.set(test_los);
        self.restream();
    }

    pub fn set_virtual_world(&self, world: i32) {
        self.virtual_world.set(world);
        self.restream();
    }

    /// Pins the label to a player; `offset` replaces the position.
    pub fn attach_to_player(&self, pid: PlayerId, offset: Vec3) {
        self.position.set(offset);
        *self.attachment.borrow_mut() = LabelAttachment::ToPlayer(pid);
        self.restream();
    }

    /// Pins the label to a vehicle; `offset` replaces the position.
    pub fn attach_to_vehicle(&self, vehicle: &Rc<Vehicle>, offset: Vec3) {
        self.position.set(offset);
        *self.attachment.borrow_mut() =
            LabelAttachment::ToVehicle(vehicle.id(), Rc::downgrade(vehicle));
        self.restream();
    }

    pub fn detach(&self, position: Vec3) {
        self.position.set(position);
        *self.attachment.borrow_mut() = LabelAttachment::Free;
        self.restream();
    }

    pub fn attachment(&self) -> LabelAttachment {
        self.attachment.borrow().clone()
    }

    fn attach_ids(&self) -> (u16, u16) {
        match &*self.attachment.borrow() {
            LabelAttachment::Free => (INVALID_ATTACH_ID, INVALID_ATTACH_ID),
            LabelAttachment::ToPlayer(pid) => (*pid as u16, INVALID_ATTACH_ID),
            LabelAttachment::ToVehicle(id, _) => (INVALID_ATTACH_ID, *id as u16),
        }
    }

    pub fn stream_in_for_player(&self, player: &Rc<Player>) -> bool {
        if !self.streamed_for.add(player.id()) {
            return false;
        }
        self.stream_in_for_client(player, false);
        true
    }

    pub fn stream_out_for_player(&self, player: &Rc<Player>) -> bool {
        if !self.streamed_for.remove(player.id()) {
            return false;
        }
        self.stream_out_for_client(player, false);
        true
    }

    fn remove_for(&self, pid: PlayerId) {
        self.streamed_for.remove(pid);
    }

    fn restream(&self) {
        for pid in self.streamed_for.ids() {
            if let Some(player) = self.players.get(pid) {
                self.stream_out_for_client(&player, false);
                self.stream_in_for_client(&player, false);
            }
        }
    }

    fn destream(&self) {
        for pid in self.streamed_for.ids() {
            if let Some(player) = self.players.get(pid) {
                self.stream_out_for_client(&player, false);
            }
        }
        self.streamed_for.clear();
    }

    fn stream_in_for_client(&self, player: &Rc<Player>, player_label: bool) {
        let (attached_player, attached_vehicle) = self.attach_ids();
        player.send_rpc(
            rpcs::PlayerShowTextLabel {
                player_label,
                label_id: self.id as u16,
                colour: self.colour.get(),
                position: self.position.get(),
                draw_distance: self.draw_distance.get(),
                test_los: self.test_los.get(),
                attached_player,
                attached_vehicle,
                text: &self.text.borrow(),
            }
            .datagram(),
        );
    }

    fn stream_out_for_client(&self, player: &Rc<Player>, player_label: bool) {
        player.send_rpc(
            rpcs::PlayerHideTextLabel {
                player_label,
                label_id: self.id as u16,
            }
            .datagram(),
        );
    }
}

impl Streamable for TextLabel {
    fn stream_position(&self, player: &Player) -> Option<Vec3> {
        match &*self.attachment.borrow() {
            LabelAttachment::Free => Some(self.position.get()),
            // Position falls through to the target; a vanished target
            // vetoes streaming.
            LabelAttachment::ToPlayer(pid) => {
                self.players.get(*pid).map(|target| target.position())
            }
            LabelAttachment::ToVehicle(_, vehicle) => {
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
        // Attached labels follow their target's visibility instead of the
        // world partition.
        match &*self.attachment.borrow() {
            LabelAttachment::Free => self.virtual_world.get(),
            _ => ANY_VIRTUAL_WORLD,
        }
    }

    fn is_streamed_for(&self, pid: PlayerId) -> bool {
        self.streamed_for.contains(pid)
    }
}

/// A label private to one player, held in that player's extension pool.
pub struct PlayerTextLabel {
    inner: TextLabel,
}

impl PlayerTextLabel {
    #[inline]
    pub fn id(&self) -> usize {
        self.inner.id()
    }

    #[inline]
    pub fn label(&self) -> &TextLabel {
        &self.inner
    }
}

/// Per-player private label pool.
pub struct PlayerTextLabelData {
    labels: Pool<PlayerTextLabel>,
}

impl PlayerTextLabelData {
    fn new() -> PlayerTextLabelData {
        PlayerTextLabelData {
            labels: Pool::new(PLAYER_TEXT_LABEL_POOL_SIZE),
        }
    }

    #[inline]
    pub fn pool(&self) -> &Pool<PlayerTextLabel> {
        &self.labels
    }

    pub fn create(
        &self,
        owner: &Rc<Player>,
        players: Rc<PlayerPool>,
        text: &str,
        colour: Colour,
        position: Vec3,
        draw_distance: f32,
        test_los: bool,
    ) -> Option<Rc<PlayerTextLabel>> {
        let world = owner.virtual_world();
        let id = self.labels.emplace_with(|id| PlayerTextLabel {
            inner: TextLabel::new(id, text, colour, position, draw_distance, world, test_los, players),
        })?;
        self.labels.get(id)
    }

    pub fn release(&self, owner: &Rc<Player>, id: usize) {
        if let Some(label) = self.labels.get(id) {
            if label.inner.streamed_for.remove(owner.id()) {
                label.inner.stream_out_for_client(owner, true);
            }
            self.labels.release(id, false);
        }
    }
}

impl Extension for PlayerTextLabelData {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn reset(&self) {
        // Respawn drops the private labels outright.
        self.labels.clear();
    }
}

impl ExtensionInfo for PlayerTextLabelData {
    const EXTENSION_ID: ExtensionId = ExtensionId(0xb9e2bd0dc5148c3c);
}

pub trait TextLabelEventHandler {
    fn on_label_stream_in(&self, _label: &Rc<TextLabel>, _player: &Rc<Player>) {}
    fn on_label_stream_out(&self, _label: &Rc<TextLabel>, _player: &Rc<Player>) {}
}

pub struct TextLabelsComponent {
    weak: Weak<TextLabelsComponent>,
    storage: Pool<TextLabel>,
    events: EventDispatcher<dyn TextLabelEventHandler>,
    helper: StreamConfigHelper,
    players: RefCell<Option<Rc<PlayerPool>>>,
    vehicles: RefCell<Weak<VehiclesComponent>>,
}

impl TextLabelsComponent {
    pub fn new() -> Rc<TextLabelsComponent> {
        Rc::new_cyclic(|weak| TextLabelsComponent {
            weak: weak.clone(),
            storage: Pool::new(TEXT_LABEL_POOL_SIZE),
            events: EventDispatcher::new(),
            helper: StreamConfigHelper::new(200.0, 1000, 0),
            players: RefCell::new(None),
            vehicles: RefCell::new(Weak::new()),
        })
    }

    fn handle(&self) -> Rc<TextLabelsComponent> {
        self.weak.upgrade().expect("component outlives its handle")
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn TextLabelEventHandler> {
        &self.events
    }

    #[inline]
    pub fn pool(&self) -> &Pool<TextLabel> {
        &self.storage
    }

    pub fn create(
        &self,
        text: &str,
        colour: Colour,
        position: Vec3,
        draw_distance: f32,
        virtual_world: i32,
        test_los: bool,
    ) -> Option<Rc<TextLabel>> {
        let players = self.players.borrow().clone()?;
        let id = self.storage.emplace_with(|id| {
            TextLabel::new(id, text, colour, position, draw_distance, virtual_world, test_los, players)
        })?;
        self.storage.get(id)
    }

    pub fn get(&self, id: usize) -> Option<Rc<TextLabel>> {
        self.storage.get(id)
    }

    pub fn release(&self, id: usize) {
        if let Some(label) = self.storage.get(id) {
            label.destream();
            self.storage.release(id, false);
        }
    }

    pub fn count(&self) -> usize {
        self.storage.len()
    }

    /// Id-based attachment for surfaces that only carry a vehicle id.
    pub fn attach_to_vehicle_id(&self, label_id: usize, vehicle_id: usize, offset: Vec3) -> bool {
        let label = match self.storage.get(label_id) {
            Some(label) => label,
            None => return false,
        };
        let vehicles = match self.vehicles.borrow().upgrade() {
            Some(vehicles) => vehicles,
            None => return false,
        };
        match vehicles.get(vehicle_id) {
            Some(vehicle) => {
                label.attach_to_vehicle(&vehicle, offset);
                true
            }
            None => false,
        }
    }

    /// Creates a label only its owner ever sees.
    pub fn create_for_player(
        &self,
        owner: &Rc<Player>,
        text: &str,
        colour: Colour,
        position: Vec3,
        draw_distance: f32,
        test_los: bool,
    ) -> Option<Rc<PlayerTextLabel>> {
        let players = self.players.borrow().clone()?;
        let data = owner.query_extension::<PlayerTextLabelData>()?;
        data.create(owner, players, text, colour, position, draw_distance, test_los)
    }
}

impl Component for TextLabelsComponent {
    fn uid(&self) -> ComponentUid {
        Self::UID
    }

    fn name(&self) -> &'static str {
        "TextLabels"
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

impl ComponentInfo for TextLabelsComponent {
    const UID: ComponentUid = 0xa0c57ea80a009742;
}

impl PlayerConnectEventHandler for TextLabelsComponent {
    fn on_player_connect(&self, player: &Rc<Player>) {
        player.extensions().add(Rc::new(PlayerTextLabelData::new()));
    }
}

impl PoolEventHandler<Player> for TextLabelsComponent {
    fn on_destroyed(&self, pid: usize, _player: &Rc<Player>) {
        self.storage.for_each(|_, label| label.remove_for(pid));
        self.helper.forget(pid);
    }
}

impl PlayerUpdateEventHandler for TextLabelsComponent {
    fn on_player_update(&self, player: &Rc<Player>, now: Instant) -> bool {
        if !self.helper.should_stream(player.id(), now) {
            return true;
        }
        let distance_sqr = self.helper.distance_sqr();

        scan_pool(
            &self.storage,
            player,
            distance_sqr,
            |id, label| {
                if label.stream_in_for_player(player) {
                    if let Some(lock) = ScopedLock::new(&self.storage, id) {
                        self.events
                            .dispatch(|handler| handler.on_label_stream_in(&lock.entry, player));
                    }
                }
            },
            |id, label| {
                if label.stream_out_for_player(player) {
                    if let Some(lock) = ScopedLock::new(&self.storage, id) {
                        self.events
                            .dispatch(|handler| handler.on_label_stream_out(&lock.entry, player));
                    }
                }
            },
        );

        // Private labels stream against their owner only.
        if let Some(data) = player.query_extension::<PlayerTextLabelData>() {
            scan_pool(
                data.pool(),
                player,
                distance_sqr,
                |_, label| {
                    if label.inner.streamed_for.add(player.id()) {
                        label.inner.stream_in_for_client(player, true);
                    }
                },
                |_, label| {
                    if label.inner.streamed_for.remove(player.id()) {
                        label.inner.stream_out_for_client(player, true);
                    }
                },
            );
        }
        true
    }
}

impl Streamable for PlayerTextLabel {
    fn stream_position(&self, player: &Player) -> Option<Vec3> {
        self.inner.stream_position(player)
    }

    fn virtual_world(&self) -> i32 {
        self.inner.virtual_world()
    }

    fn is_streamed_for(&self, pid: PlayerId) -> bool {
        self.inner.is_streamed_for(pid)
    }
}

impl ConfigEventHandler for TextLabelsComponent {
    fn on_config_reloaded(&self, config: &crate::config::ServerConfig) {
        self.helper
            .reconfigure(config.game.stream_distance, config.game.stream_rate);
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
    use quarry::net::loopback::LoopbackTransport;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    struct Fixture {
        core: Rc<Core>,
        transport: Rc<LoopbackTransport>,
        labels: Rc<TextLabelsComponent>,
        vehicles: Rc<VehiclesComponent>,
    }

    fn fixture() -> Fixture {
        let transport = Rc::new(LoopbackTransport::new());
        let core = Core::new(
            ServerConfig::default(),
            transport.clone(),
            BanList::in_memory(),
            logging::child_or_discard(None),
        );
        let labels = TextLabelsComponent::new();
        let vehicles = VehiclesComponent::new();
        core.components().register(vehicles.clone());
        core.components().register(labels.clone());
        core.load_components();
        Fixture {
            core,
            transport,
            labels,
            vehicles,
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

    fn scan(fixture: &Fixture, offset_secs: u64) {
        fixture
            .core
            .players()
            .update_all(Instant::now() + Duration::from_secs(offset_secs));
    }

    #[test]
    fn test_label_streams_by_3d_distance() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);

        let near = fixture
            .labels
            .create("near", Colour::from_rgba(0xFF0000FF), Vec3::new(10.0, 0.0, 0.0), 50.0, 0, false)
            .unwrap();
        let above = fixture
            .labels
            .create("above", Colour::from_rgba(0xFF0000FF), Vec3::new(0.0, 0.0, 250.0), 50.0, 0, false)
            .unwrap();

        scan(&fixture, 2);
        assert!(near.is_streamed_in(player.id()));
        assert!(!above.is_streamed_in(player.id()));
    }

    #[test]
    fn test_vehicle_attachment_follows_target() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);

        // A vehicle far away, with a label riding on it.
        let vehicle = fixture
            .vehicles
            .create(400, Vec3::new(1000.0, 0.0, 0.0), 0.0, (0, 0), Duration::from_secs(60))
            .unwrap();
        let label = fixture
            .labels
            .create("plate", Colour::from_rgba(0xFFFFFFFF), Vec3::ZERO, 50.0, 0, false)
            .unwrap();
        label.attach_to_vehicle(&vehicle, Vec3::new(0.0, 0.0, 1.0));

        scan(&fixture, 2);
        // The vehicle is out of range, so the dependent label must wait.
        assert!(!vehicle.is_streamed_in(player.id()));
        assert!(!label.is_streamed_in(player.id()));

        // Bring the vehicle into range: both stream in.
        vehicle.set_position(Vec3::new(10.0, 0.0, 0.0));
        scan(&fixture, 4);
        assert!(vehicle.is_streamed_in(player.id()));
        assert!(label.is_streamed_in(player.id()));
    }

    #[test]
    fn test_restream_is_hide_then_show() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let label = fixture
            .labels
            .create("v1", Colour::from_rgba(0xFF0000FF), Vec3::ZERO, 50.0, 0, false)
            .unwrap();

        scan(&fixture, 2);
        assert!(label.is_streamed_in(player.id()));
        fixture.transport.take_sent();

        label.set_text("v2");

        let sent = fixture.transport.take_sent_to(player.connection());
        let ids: Vec<u8> = sent.iter().map(|datagram| datagram[0]).collect();
        assert_eq!(ids, vec![id::HIDE_TEXT_LABEL, id::SHOW_TEXT_LABEL]);
        // Still streamed; restream never crosses the eligibility boundary.
        assert!(label.is_streamed_in(player.id()));
    }

    #[test]
    fn test_player_label_only_reaches_owner() {
        let fixture = fixture();
        let owner = connect(&fixture, 3000);
        let other = connect(&fixture, 3001);

        let label = fixture
            .labels
            .create_for_player(&owner, "private", Colour::from_rgba(0x00FF00FF), Vec3::ZERO, 50.0, false)
            .unwrap();

        fixture.transport.take_sent();
        scan(&fixture, 2);

        assert!(label.label().is_streamed_in(owner.id()));
        assert!(!label.label().is_streamed_in(other.id()));
        assert!(fixture.transport.take_sent_to(other.connection()).is_empty());
    }

    #[test]
    fn test_player_labels_drop_on_respawn() {
        let fixture = fixture();
        let owner = connect(&fixture, 3000);
        let label = fixture
            .labels
            .create_for_player(&owner, "round", Colour::from_rgba(0x00FF00FF), Vec3::ZERO, 50.0, false)
            .unwrap();

        owner.reset_for_respawn();

        let data = owner.query_extension::<PlayerTextLabelData>().unwrap();
        assert_eq!(data.pool().len(), 0);
        assert!(data.pool().get(label.id()).is_none());
    }
}
