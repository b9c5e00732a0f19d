use crate::component::{Component, ComponentInfo, ComponentList, ComponentUid, SemanticVersion};
use crate::core::{ConfigEventHandler, Core, RpcInHandler};
use crate::models::CustomModelsComponent;
use crate::player::{Player, PlayerConnectEventHandler, PlayerId, PlayerPool, PlayerUpdateEventHandler};
use crate::rpcs::{self, id, AnimationData};
use crate::stream::{scan_pool, StreamConfigHelper, Streamable, StreamedSet};
use bedrock::math::Vec3;
use quarry::events::EventDispatcher;
use quarry::extensions::{Extension, ExtensionId, ExtensionInfo};
use quarry::net::wire::PacketReader;
use quarry::pool::{Pool, PoolEventHandler, ScopedLock};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Instant;

pub const ACTOR_POOL_SIZE: usize = 1000;
/// Client-enforced cap on simultaneously visible actors.
pub const MAX_STREAMED_ACTORS: u8 = 50;

/// Animation libraries the client ships. `game.use_all_animations` lifts
/// the check for servers with custom animation packs.
const ANIMATION_LIBRARIES: &[&str] = &[
    "AIRPORT", "ATTRACTORS", "BAR", "BASEBALL", "BD_FIRE", "BEACH", "BENCHPRESS", "BF_INJECTION",
    "BIKED", "BIKELEAP", "BIKES", "BIKE_DBZ", "BMX", "BOMBER", "BOX", "BSKTBALL", "BUDDY", "CAMERA",
    "CAR", "CARRY", "CASINO", "CHAINSAW", "CHOPPA", "CLOTHES", "COACH", "COP_AMBIENT", "CRACK",
    "DANCING", "DEALER", "DILDO", "DODGE", "DOZER", "FAT", "FIGHT_B", "FIGHT_C", "FIGHT_D",
    "FINALE", "FLAME", "FLOWERS", "FOOD", "GANGS", "GHANDS", "GOGGLES", "GRAVEYARD", "GRENADE",
    "GYMNASIUM", "HAIRCUTS", "HEIST9", "INT_HOUSE", "JST_BUISNESS", "KART", "KISSING", "KNIFE",
    "LOWRIDER", "MD_CHASE", "MEDIC", "MISC", "MTB", "MUSCULAR", "NEVADA", "ON_LOOKERS", "OTB",
    "PARACHUTE", "PARK", "PAULNMAC", "PED", "PLAYER_DVBYS", "POLICE", "POOL", "POOR", "QUAD",
    "RAPPING", "RIFLE", "ROB_BANK", "ROCKET", "RUNNINGMAN", "RUSTLER", "RYDER", "SCRATCHING",
    "SHAMAL", "SHOP", "SILENCED", "SKATE", "SMOKING", "SPRAYCAN", "STRIP", "SUNBATHE", "SWAT",
    "SWEET", "SWIM", "SWORD", "TANK", "TATTOOS", "TEC", "TRAIN", "TRUCK", "UZI", "VAN", "VENDING",
    "VORTEX", "WAYFARER", "WEAPONS", "WUZI",
];

fn animation_library_valid(library: &str, use_all: bool) -> bool {
    if use_all {
        return true;
    }
    ANIMATION_LIBRARIES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(library))
}

/// Hit locations a damage report may name.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BodyPart {
    Torso,
    Groin,
    LeftArm,
    RightArm,
    LeftLeg,
    RightLeg,
    Head,
}

impl BodyPart {
    fn from_wire(value: u32) -> Option<BodyPart> {
        match value {
            3 => Some(BodyPart::Torso),
            4 => Some(BodyPart::Groin),
            5 => Some(BodyPart::LeftArm),
            6 => Some(BodyPart::RightArm),
            7 => Some(BodyPart::LeftLeg),
            8 => Some(BodyPart::RightLeg),
            9 => Some(BodyPart::Head),
            _ => None,
        }
    }
}

const MAX_DAMAGE_WEAPON: u32 = 46;

/// Per-player streaming counter, attached to every player on connect.
pub struct PlayerActorData {
    num_streamed: Cell<u8>,
}

impl PlayerActorData {
    fn new() -> PlayerActorData {
        PlayerActorData {
            num_streamed: Cell::new(0),
        }
    }

    #[inline]
    pub fn num_streamed(&self) -> u8 {
        self.num_streamed.get()
    }
}

impl Extension for PlayerActorData {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn reset(&self) {
        self.num_streamed.set(0);
    }
}

impl ExtensionInfo for PlayerActorData {
    const EXTENSION_ID: ExtensionId = ExtensionId(0xd1bb1d1f96c7e572);
}

/// Spawn parameters, retained for scripted respawns.
#[derive(Copy, Clone, Debug)]
pub struct ActorSpawnData {
    pub position: Vec3,
    pub facing_angle: f32,
    pub skin: i32,
}

/// Shared animation validation switches, reloaded with the config.
struct AnimationConfig {
    use_all_animations: Cell<bool>,
    validate_animations: Cell<bool>,
}

/// A server-controlled pedestrian.
pub struct Actor {
    id: usize,
    skin: Cell<i32>,
    virtual_world: Cell<i32>,
    invulnerable: Cell<bool>,
    position: Cell<Vec3>,
    facing_angle: Cell<f32>,
    health: Cell<f32>,
    animation: RefCell<Option<AnimationData>>,
    animation_loop: Cell<bool>,
    spawn_data: ActorSpawnData,
    streamed_for: StreamedSet,

    players: Rc<PlayerPool>,
    models: RefCell<Weak<CustomModelsComponent>>,
    animation_config: Rc<AnimationConfig>,
}

impl Actor {
    fn new(
        id: usize,
        skin: i32,
        position: Vec3,
        facing_angle: f32,
        players: Rc<PlayerPool>,
        models: Weak<CustomModelsComponent>,
        animation_config: Rc<AnimationConfig>,
    ) -> Actor {
        Actor {
            id,
            skin: Cell::new(skin),
            virtual_world: Cell::new(0),
            invulnerable: Cell::new(true),
            position: Cell::new(position),
            facing_angle: Cell::new(facing_angle),
            health: Cell::new(100.0),
            animation: RefCell::new(None),
            animation_loop: Cell::new(false),
            spawn_data: ActorSpawnData {
                position,
                facing_angle,
                skin,
            },
            streamed_for: StreamedSet::new(),
            players,
            models: RefCell::new(models),
            animation_config,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position.get()
    }

    #[inline]
    pub fn facing_angle(&self) -> f32 {
        self.facing_angle.get()
    }

    #[inline]
    pub fn skin(&self) -> i32 {
        self.skin.get()
    }

    #[inline]
    pub fn health(&self) -> f32 {
        self.health.get()
    }

    #[inline]
    pub fn is_invulnerable(&self) -> bool {
        self.invulnerable.get()
    }

    #[inline]
    pub fn virtual_world_id(&self) -> i32 {
        self.virtual_world.get()
    }

    #[inline]
    pub fn spawn_data(&self) -> ActorSpawnData {
        self.spawn_data
    }

    pub fn animation(&self) -> Option<AnimationData> {
        self.animation.borrow().clone()
    }

    #[inline]
    pub fn is_streamed_in(&self, pid: PlayerId) -> bool {
        self.streamed_for.contains(pid)
    }

    pub fn set_virtual_world(&self, world: i32) {
        self.virtual_world.set(world);
    }

    /// Moves the actor and pushes the new position to everyone watching.
    pub fn set_position(&self, position: Vec3) {
        self.position.set(position);
        self.broadcast(|| {
            rpcs::SetActorPosForPlayer {
                actor_id: self.id as u16,
                position,
            }
            .datagram()
        });
    }

    pub fn set_facing_angle(&self, angle: f32) {
        self.facing_angle.set(angle);
        self.broadcast(|| {
            rpcs::SetActorFacingAngleForPlayer {
                actor_id: self.id as u16,
                angle,
            }
            .datagram()
        });
    }

    pub fn set_health(&self, health: f32) {
        self.health.set(health);
        self.broadcast(|| {
            rpcs::SetActorHealthForPlayer {
                actor_id: self.id as u16,
                health,
            }
            .datagram()
        });
    }

    /// Skin swaps need a full hide/show cycle on the client.
    pub fn set_skin(&self, skin: i32) {
        self.skin.set(skin);
        self.restream();
    }

    pub fn set_invulnerable(&self, invulnerable: bool) {
        self.invulnerable.set(invulnerable);
        self.restream();
    }

    /// Plays an animation on every streamed-in client. Rejected when the
    /// library fails validation.
    pub fn apply_animation(&self, animation: AnimationData) {
        let config = &self.animation_config;
        if config.validate_animations.get()
            && !animation_library_valid(&animation.library, config.use_all_animations.get())
        {
            return;
        }

        let mut animation = animation;
        if animation.looping || animation.freeze {
            self.animation_loop.set(true);
        } else {
            self.animation_loop.set(false);
            animation.time = 0;
        }

        let datagram = rpcs::ApplyActorAnimationForPlayer {
            actor_id: self.id as u16,
            animation: &animation,
        }
        .datagram();
        *self.animation.borrow_mut() = Some(animation);

        for pid in self.streamed_for.ids() {
            if let Some(player) = self.players.get(pid) {
                player.send_rpc(datagram.clone());
            }
        }
    }

    pub fn clear_animations(&self) {
        *self.animation.borrow_mut() = None;
        self.animation_loop.set(false);
        self.broadcast(|| {
            rpcs::ClearActorAnimationsForPlayer {
                actor_id: self.id as u16,
            }
            .datagram()
        });
    }

    /// Streams the actor in for a player, honouring the per-player cap.
    /// Returns whether a show packet went out.
    pub fn stream_in_for_player(&self, player: &Rc<Player>) -> bool {
        let pid = player.id();
        if self.streamed_for.contains(pid) {
            return false;
        }

        let data = match player.query_extension::<PlayerActorData>() {
            Some(data) => data,
            None => return false,
        };
        if data.num_streamed.get() >= MAX_STREAMED_ACTORS {
            // Over the cap the entity just waits; the next scan retries.
            return false;
        }

        data.num_streamed.set(data.num_streamed.get() + 1);
        self.streamed_for.add(pid);
        self.stream_in_for_client(player);
        true
    }

    /// Streams the actor out for a player. Returns whether a hide packet
    /// went out.
    pub fn stream_out_for_player(&self, player: &Rc<Player>) -> bool {
        let pid = player.id();
        if !self.streamed_for.remove(pid) {
            return false;
        }

        if let Some(data) = player.query_extension::<PlayerActorData>() {
            data.num_streamed
                .set(data.num_streamed.get().saturating_sub(1));
        }
        self.stream_out_for_client(player);
        true
    }

    /// Drops a disconnected player's membership without sending anything.
    fn remove_for(&self, pid: PlayerId) {
        self.streamed_for.remove(pid);
    }

    /// Hide-then-show refresh for everyone currently watching.
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
                if let Some(data) = player.query_extension::<PlayerActorData>() {
                    data.num_streamed
                        .set(data.num_streamed.get().saturating_sub(1));
                }
                self.stream_out_for_client(&player);
            }
        }
        self.streamed_for.clear();
    }

    fn stream_in_for_client(&self, player: &Rc<Player>) {
        let (skin, custom_skin) = match self.models.borrow().upgrade() {
            Some(models) => models.resolve_base_model(self.skin.get()),
            None => (self.skin.get(), 0),
        };

        let dl_client = player.client_version() == crate::player::ClientVersion::Samp03Dl;
        player.send_rpc(
            rpcs::ShowActorForPlayer {
                actor_id: self.id as u16,
                skin,
                custom_skin,
                position: self.position.get(),
                angle: self.facing_angle.get(),
                health: self.health.get(),
                invulnerable: self.invulnerable.get(),
            }
            .datagram(dl_client),
        );

        if self.animation_loop.get() {
            if let Some(animation) = self.animation.borrow().as_ref() {
                player.send_rpc(
                    rpcs::ApplyActorAnimationForPlayer {
                        actor_id: self.id as u16,
                        animation,
                    }
                    .datagram(),
                );
            }
        }
    }

    fn stream_out_for_client(&self, player: &Rc<Player>) {
        player.send_rpc(
            rpcs::HideActorForPlayer {
                actor_id: self.id as u16,
            }
            .datagram(),
        );
    }

    fn broadcast<F: Fn() -> Vec<u8>>(&self, datagram: F) {
        let ids = self.streamed_for.ids();
        if ids.is_empty() {
            return;
        }
        let datagram = datagram();
        for pid in ids {
            if let Some(player) = self.players.get(pid) {
                player.send_rpc(datagram.clone());
            }
        }
    }
}

impl Streamable for Actor {
    fn stream_position(&self, _player: &Player) -> Option<Vec3> {
        Some(self.position.get())
    }

    fn virtual_world(&self) -> i32 {
        self.virtual_world.get()
    }

    fn is_streamed_for(&self, pid: PlayerId) -> bool {
        self.streamed_for.contains(pid)
    }

    fn planar_distance(&self) -> bool {
        true
    }
}

/// Stream-in/out and damage notifications for actors.
pub trait ActorEventHandler {
    fn on_player_give_damage_actor(
        &self,
        _player: &Rc<Player>,
        _actor: &Rc<Actor>,
        _damage: f32,
        _weapon: u32,
        _part: BodyPart,
    ) {
    }
    fn on_actor_stream_in(&self, _actor: &Rc<Actor>, _player: &Rc<Player>) {}
    fn on_actor_stream_out(&self, _actor: &Rc<Actor>, _player: &Rc<Player>) {}
}

pub struct ActorsComponent {
    weak: Weak<ActorsComponent>,
    storage: Pool<Actor>,
    events: EventDispatcher<dyn ActorEventHandler>,
    helper: StreamConfigHelper,
    players: RefCell<Option<Rc<PlayerPool>>>,
    models: RefCell<Weak<CustomModelsComponent>>,
    animation_config: Rc<AnimationConfig>,
}

impl ActorsComponent {
    pub fn new() -> Rc<ActorsComponent> {
        Rc::new_cyclic(|weak| ActorsComponent {
            weak: weak.clone(),
            storage: Pool::new(ACTOR_POOL_SIZE),
            events: EventDispatcher::new(),
            helper: StreamConfigHelper::new(200.0, 1000, 0),
            players: RefCell::new(None),
            models: RefCell::new(Weak::new()),
            animation_config: Rc::new(AnimationConfig {
                use_all_animations: Cell::new(false),
                validate_animations: Cell::new(true),
            }),
        })
    }

    fn handle(&self) -> Rc<ActorsComponent> {
        self.weak.upgrade().expect("component outlives its handle")
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn ActorEventHandler> {
        &self.events
    }

    #[inline]
    pub fn pool(&self) -> &Pool<Actor> {
        &self.storage
    }

    pub fn create(&self, skin: i32, position: Vec3, facing_angle: f32) -> Option<Rc<Actor>> {
        let players = self.players.borrow().clone()?;
        let models = self.models.borrow().clone();
        let animation_config = self.animation_config.clone();

        let id = self.storage.emplace_with(|id| {
            Actor::new(id, skin, position, facing_angle, players, models, animation_config)
        })?;
        self.storage.get(id)
    }

    pub fn get(&self, id: usize) -> Option<Rc<Actor>> {
        self.storage.get(id)
    }

    /// Destreams and releases an actor. Destruction defers while release
    /// locks are held.
    pub fn release(&self, id: usize) {
        if let Some(actor) = self.storage.get(id) {
            actor.destream();
            self.storage.release(id, false);
        }
    }

    pub fn count(&self) -> usize {
        self.storage.len()
    }
}

impl Component for ActorsComponent {
    fn uid(&self) -> ComponentUid {
        Self::UID
    }

    fn name(&self) -> &'static str {
        "Actors"
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
            self.animation_config
                .use_all_animations
                .set(config.game.use_all_animations);
            self.animation_config
                .validate_animations
                .set(config.game.validate_animations);
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
            .add(&(this.clone() as Rc<dyn ConfigEventHandler>));
        core.rpcs()
            .add_handler(id::ON_PLAYER_DAMAGE_ACTOR, &(this as Rc<dyn RpcInHandler>));
    }

    fn on_init(&self, components: &ComponentList) {
        if let Some(models) = components.query::<CustomModelsComponent>() {
            *self.models.borrow_mut() = Rc::downgrade(&models);
        }
    }

    fn on_free(&self, uid: ComponentUid) {
        if uid == CustomModelsComponent::UID {
            *self.models.borrow_mut() = Weak::new();
        }
    }

    fn reset(&self) {
        self.storage.clear();
    }

    fn free(&self) {
        self.storage.clear();
    }
}

impl ComponentInfo for ActorsComponent {
    const UID: ComponentUid = 0xc81ca021eae2ad5c;
}

impl PlayerConnectEventHandler for ActorsComponent {
    fn on_player_connect(&self, player: &Rc<Player>) {
        player.extensions().add(Rc::new(PlayerActorData::new()));
    }
}

impl PoolEventHandler<Player> for ActorsComponent {
    fn on_destroyed(&self, pid: usize, _player: &Rc<Player>) {
        self.storage.for_each(|_, actor| actor.remove_for(pid));
        self.helper.forget(pid);
    }
}

impl PlayerUpdateEventHandler for ActorsComponent {
    fn on_player_update(&self, player: &Rc<Player>, now: Instant) -> bool {
        if !self.helper.should_stream(player.id(), now) {
            return true;
        }

        let distance_sqr = self.helper.distance_sqr();
        scan_pool(
            &self.storage,
            player,
            distance_sqr,
            |id, actor| {
                if actor.stream_in_for_player(player) {
                    if let Some(lock) = ScopedLock::new(&self.storage, id) {
                        self.events
                            .dispatch(|handler| handler.on_actor_stream_in(&lock.entry, player));
                    }
                }
            },
            |id, actor| {
                if actor.stream_out_for_player(player) {
                    if let Some(lock) = ScopedLock::new(&self.storage, id) {
                        self.events
                            .dispatch(|handler| handler.on_actor_stream_out(&lock.entry, player));
                    }
                }
            },
        );
        true
    }
}

impl ConfigEventHandler for ActorsComponent {
    fn on_config_reloaded(&self, config: &crate::config::ServerConfig) {
        self.helper
            .reconfigure(config.game.stream_distance, config.game.stream_rate);
        self.animation_config
            .use_all_animations
            .set(config.game.use_all_animations);
        self.animation_config
            .validate_animations
            .set(config.game.validate_animations);
    }
}

impl RpcInHandler for ActorsComponent {
    fn on_receive(&self, _rpc: u8, player: &Rc<Player>, reader: &mut PacketReader) -> bool {
        let damage = match rpcs::OnPlayerDamageActor::read(reader) {
            Ok(damage) => damage,
            Err(_) => return false,
        };

        if damage.damage < 0.0 {
            return false;
        }
        if damage.weapon > MAX_DAMAGE_WEAPON {
            return false;
        }
        let part = match BodyPart::from_wire(damage.body_part) {
            Some(part) => part,
            None => return false,
        };

        let actor_id = damage.actor_id as usize;
        if let Some(actor) = self.storage.get(actor_id) {
            if actor.is_streamed_in(player.id()) && !actor.is_invulnerable() {
                // The handler may release the actor it is being told about;
                // the scoped lock keeps the slot alive until dispatch ends.
                if let Some(lock) = ScopedLock::new(&self.storage, actor_id) {
                    self.events.dispatch(|handler| {
                        handler.on_player_give_damage_actor(
                            player,
                            &lock.entry,
                            damage.damage,
                            damage.weapon,
                            part,
                        )
                    });
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
    use bedrock::logging;
    use bedrock::strings::small_name;
    use quarry::net::loopback::LoopbackTransport;
    use quarry::net::Transport;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    struct Fixture {
        core: Rc<Core>,
        transport: Rc<LoopbackTransport>,
        actors: Rc<ActorsComponent>,
    }

    fn fixture() -> Fixture {
        let transport = Rc::new(LoopbackTransport::new());
        let core = Core::new(
            ServerConfig::default(),
            transport.clone(),
            BanList::in_memory(),
            logging::child_or_discard(None),
        );
        let actors = ActorsComponent::new();
        core.components().register(actors.clone());
        core.load_components();
        Fixture {
            core,
            transport,
            actors,
        }
    }

    fn connect(fixture: &Fixture, port: u16) -> Rc<Player> {
        let conn = fixture.transport.connect(addr(port));
        fixture.core.run_once(Duration::from_millis(10), Instant::now());
        let player = fixture.core.players().by_connection(conn).unwrap();
        player.set_state(crate::player::PlayerState::Spawned);
        player
    }

    fn rpc_ids(datagrams: &[Vec<u8>]) -> Vec<u8> {
        datagrams.iter().map(|datagram| datagram[0]).collect()
    }

    #[test]
    fn test_stream_in_and_out_across_boundary() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let actor = fixture.actors.create(101, Vec3::ZERO, 0.0).unwrap();
        fixture.transport.take_sent();

        // The connect tick already consumed a scan slot; jump past the gate.
        let now = Instant::now() + Duration::from_secs(2);
        fixture.core.players().update_all(now);

        assert!(actor.is_streamed_in(player.id()));
        let data = player.query_extension::<PlayerActorData>().unwrap();
        assert_eq!(data.num_streamed(), 1);
        let sent = fixture.transport.take_sent_to(player.connection());
        assert_eq!(rpc_ids(&sent), vec![id::SHOW_ACTOR]);

        // Step out of range; the next due scan hides the actor.
        player.set_position(Vec3::new(300.0, 0.0, 0.0));
        fixture.core.players().update_all(now + Duration::from_millis(1100));

        assert!(!actor.is_streamed_in(player.id()));
        assert_eq!(data.num_streamed(), 0);
        let sent = fixture.transport.take_sent_to(player.connection());
        assert_eq!(rpc_ids(&sent), vec![id::HIDE_ACTOR]);
    }

    #[test]
    fn test_virtual_world_partitions() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);
        player.set_virtual_world(5);

        let matching = fixture.actors.create(1, Vec3::ZERO, 0.0).unwrap();
        matching.set_virtual_world(5);
        let other = fixture.actors.create(2, Vec3::ZERO, 0.0).unwrap();
        other.set_virtual_world(6);
        let anywhere = fixture.actors.create(3, Vec3::ZERO, 0.0).unwrap();
        anywhere.set_virtual_world(-1);

        fixture.core.players().update_all(Instant::now() + Duration::from_secs(2));

        assert!(matching.is_streamed_in(player.id()));
        assert!(!other.is_streamed_in(player.id()));
        assert!(anywhere.is_streamed_in(player.id()));
    }

    #[test]
    fn test_cap_prefers_lowest_ids() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);

        let mut actors = Vec::new();
        for index in 0..(MAX_STREAMED_ACTORS as usize + 2) {
            actors.push(
                fixture
                    .actors
                    .create(index as i32, Vec3::new(index as f32, 0.0, 0.0), 0.0)
                    .unwrap(),
            );
        }

        fixture.core.players().update_all(Instant::now() + Duration::from_secs(2));

        let data = player.query_extension::<PlayerActorData>().unwrap();
        assert_eq!(data.num_streamed(), MAX_STREAMED_ACTORS);
        for actor in &actors[..MAX_STREAMED_ACTORS as usize] {
            assert!(actor.is_streamed_in(player.id()));
        }
        for actor in &actors[MAX_STREAMED_ACTORS as usize..] {
            assert!(!actor.is_streamed_in(player.id()));
        }
    }

    #[test]
    fn test_damage_release_under_lock() {
        struct Avenger {
            actors: Rc<ActorsComponent>,
            saw_live_actor: Cell<bool>,
        }

        impl ActorEventHandler for Avenger {
            fn on_player_give_damage_actor(
                &self,
                _player: &Rc<Player>,
                actor: &Rc<Actor>,
                _damage: f32,
                _weapon: u32,
                _part: BodyPart,
            ) {
                self.saw_live_actor
                    .set(self.actors.get(actor.id()).is_some());
                self.actors.release(actor.id());
            }
        }

        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let actor = fixture.actors.create(7, Vec3::ZERO, 0.0).unwrap();
        actor.set_invulnerable(false);
        fixture.core.players().update_all(Instant::now() + Duration::from_secs(2));
        assert!(actor.is_streamed_in(player.id()));

        let avenger = Rc::new(Avenger {
            actors: fixture.actors.clone(),
            saw_live_actor: Cell::new(false),
        });
        let handler: Rc<dyn ActorEventHandler> = avenger.clone();
        fixture.actors.events().add(&handler);

        let conn = player.connection();
        fixture.transport.inject(
            conn,
            rpcs::OnPlayerDamageActor {
                actor_id: actor.id() as u16,
                damage: 10.0,
                weapon: 24,
                body_part: 3,
            }
            .datagram(),
        );
        fixture.core.run_once(Duration::from_millis(10), Instant::now());

        // The handler saw a live actor; after dispatch the slot is gone.
        assert!(avenger.saw_live_actor.get());
        assert!(fixture.actors.get(actor.id()).is_none());
    }

    #[test]
    fn test_invulnerable_actor_ignores_damage() {
        struct Watcher {
            hits: Cell<u32>,
        }

        impl ActorEventHandler for Watcher {
            fn on_player_give_damage_actor(
                &self,
                _player: &Rc<Player>,
                _actor: &Rc<Actor>,
                _damage: f32,
                _weapon: u32,
                _part: BodyPart,
            ) {
                self.hits.set(self.hits.get() + 1);
            }
        }

        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let actor = fixture.actors.create(7, Vec3::ZERO, 0.0).unwrap();
        fixture.core.players().update_all(Instant::now() + Duration::from_secs(2));

        let watcher = Rc::new(Watcher { hits: Cell::new(0) });
        let handler: Rc<dyn ActorEventHandler> = watcher.clone();
        fixture.actors.events().add(&handler);

        fixture.transport.inject(
            player.connection(),
            rpcs::OnPlayerDamageActor {
                actor_id: actor.id() as u16,
                damage: 10.0,
                weapon: 24,
                body_part: 3,
            }
            .datagram(),
        );
        fixture.core.run_once(Duration::from_millis(10), Instant::now());
        assert_eq!(watcher.hits.get(), 0);
    }

    #[test]
    fn test_animation_validation() {
        let fixture = fixture();
        let actor = fixture.actors.create(7, Vec3::ZERO, 0.0).unwrap();

        actor.apply_animation(AnimationData {
            library: small_name("NOSUCHLIB"),
            name: small_name("x"),
            delta: 4.1,
            looping: true,
            lock_x: false,
            lock_y: false,
            freeze: false,
            time: 0,
        });
        assert!(actor.animation().is_none());

        actor.apply_animation(AnimationData {
            library: small_name("DANCING"),
            name: small_name("dance_loop"),
            delta: 4.1,
            looping: true,
            lock_x: false,
            lock_y: false,
            freeze: false,
            time: 0,
        });
        assert!(actor.animation().is_some());
    }

    #[test]
    fn test_disconnect_prunes_streamed_sets() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let actor = fixture.actors.create(7, Vec3::ZERO, 0.0).unwrap();
        fixture.core.players().update_all(Instant::now() + Duration::from_secs(2));
        assert!(actor.is_streamed_in(player.id()));

        let pid = player.id();
        fixture.transport.disconnect(player.connection());
        fixture.core.run_once(Duration::from_millis(10), Instant::now());
        assert!(!actor.is_streamed_in(pid));
    }

    #[test]
    fn test_release_destreams() {
        let fixture = fixture();
        let player = connect(&fixture, 3000);
        let actor = fixture.actors.create(7, Vec3::ZERO, 0.0).unwrap();
        fixture.core.players().update_all(Instant::now() + Duration::from_secs(2));
        fixture.transport.take_sent();

        fixture.actors.release(actor.id());

        let data = player.query_extension::<PlayerActorData>().unwrap();
        assert_eq!(data.num_streamed(), 0);
        let sent = fixture.transport.take_sent_to(player.connection());
        assert_eq!(rpc_ids(&sent), vec![id::HIDE_ACTOR]);
        assert!(fixture.actors.get(actor.id()).is_none());
    }
}
