//! End-to-end behaviour of the assembled server core over an in-memory
//! transport: a full component manifest, fake clients injecting datagrams,
//! and assertions on the exact packets that come back out.

use bedrock::logging;
use bedrock::math::Vec3;
use servercore::actors::{ActorEventHandler, ActorsComponent, MAX_STREAMED_ACTORS, PlayerActorData};
use servercore::bans::BanList;
use servercore::checkpoints::CheckpointsComponent;
use servercore::classes::ClassesComponent;
use servercore::config::ServerConfig;
use servercore::console::ConsoleComponent;
use servercore::core::Core;
use servercore::dialogs::DialogsComponent;
use servercore::gangzones::GangZonesComponent;
use servercore::models::CustomModelsComponent;
use servercore::objects::ObjectsComponent;
use servercore::pickups::PickupsComponent;
use servercore::player::{Player, PlayerState};
use servercore::rpcs::{self, id};
use servercore::textlabels::TextLabelsComponent;
use servercore::vehicles::{PlayerVehicleData, VehiclesComponent};
use quarry::net::loopback::LoopbackTransport;
use quarry::net::Transport;
use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

struct Server {
    core: Rc<Core>,
    transport: Rc<LoopbackTransport>,
    actors: Rc<ActorsComponent>,
    vehicles: Rc<VehiclesComponent>,
    checkpoints: Rc<CheckpointsComponent>,
    dialogs: Rc<DialogsComponent>,
    classes: Rc<ClassesComponent>,
}

fn server() -> Server {
    server_with(|_| {})
}

fn server_with(mut mutate: impl FnMut(&mut ServerConfig)) -> Server {
    let mut config = ServerConfig::default();
    mutate(&mut config);

    let transport = Rc::new(LoopbackTransport::new());
    let core = Core::new(
        config,
        transport.clone(),
        BanList::in_memory(),
        logging::child_or_discard(None),
    );

    let actors = ActorsComponent::new();
    let vehicles = VehiclesComponent::new();
    let checkpoints = CheckpointsComponent::new();
    let dialogs = DialogsComponent::new();
    let classes = ClassesComponent::new();

    core.components().register(CustomModelsComponent::new());
    core.components().register(actors.clone());
    core.components().register(vehicles.clone());
    core.components().register(PickupsComponent::new());
    core.components().register(TextLabelsComponent::new());
    core.components().register(ObjectsComponent::new());
    core.components().register(GangZonesComponent::new());
    core.components().register(checkpoints.clone());
    core.components().register(classes.clone());
    core.components().register(dialogs.clone());
    core.components().register(ConsoleComponent::new());
    core.load_components();

    Server {
        core,
        transport,
        actors,
        vehicles,
        checkpoints,
        dialogs,
        classes,
    }
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

impl Server {
    fn tick_at(&self, now: Instant) {
        self.core.run_once(Duration::from_millis(10), now);
    }

    fn connect(&self, port: u16) -> Rc<Player> {
        let conn = self.transport.connect(addr(port));
        self.tick_at(Instant::now());
        let player = self.core.players().by_connection(conn).unwrap();
        player.set_state(PlayerState::Spawned);
        player
    }

    fn rpc_ids_to(&self, player: &Player) -> Vec<u8> {
        self.transport
            .take_sent_to(player.connection())
            .iter()
            .map(|datagram| datagram[0])
            .collect()
    }
}

#[test]
fn s1_stream_in_across_boundary() {
    let server = server();
    let player = server.connect(4000);
    let actor = server.actors.create(0, Vec3::new(0.0, 0.0, 0.0), 0.0).unwrap();
    server.transport.take_sent();

    let now = Instant::now() + Duration::from_secs(2);
    server.core.players().update_all(now);

    assert!(actor.is_streamed_in(player.id()));
    let data = player.query_extension::<PlayerActorData>().unwrap();
    assert_eq!(data.num_streamed(), 1);
    assert_eq!(server.rpc_ids_to(&player), vec![id::SHOW_ACTOR]);

    // Teleport beyond the 200 unit radius; the next due scan hides it.
    player.set_position(Vec3::new(300.0, 0.0, 0.0));
    server.core.players().update_all(now + Duration::from_millis(1100));

    assert!(!actor.is_streamed_in(player.id()));
    assert_eq!(data.num_streamed(), 0);
    assert_eq!(server.rpc_ids_to(&player), vec![id::HIDE_ACTOR]);
}

#[test]
fn s2_per_player_cap_prefers_lowest_ids() {
    let server = server();
    let player = server.connect(4000);

    let total = MAX_STREAMED_ACTORS as usize + 1;
    let mut actors = Vec::new();
    for index in 0..total {
        actors.push(
            server
                .actors
                .create(0, Vec3::new(index as f32, 0.0, 0.0), 0.0)
                .unwrap(),
        );
    }

    server.core.players().update_all(Instant::now() + Duration::from_secs(2));

    let data = player.query_extension::<PlayerActorData>().unwrap();
    assert_eq!(data.num_streamed(), MAX_STREAMED_ACTORS);
    assert!(actors[total - 2].is_streamed_in(player.id()));
    // The one actor over the cap is exactly the highest id.
    assert!(!actors[total - 1].is_streamed_in(player.id()));

    // Counter conservation: the set sizes match the player counter.
    let streamed = actors
        .iter()
        .filter(|actor| actor.is_streamed_in(player.id()))
        .count();
    assert_eq!(streamed, MAX_STREAMED_ACTORS as usize);
}

#[test]
fn s3_class_request_veto() {
    struct Veto;

    impl servercore::classes::ClassEventHandler for Veto {
        fn on_player_request_class(&self, _player: &Rc<Player>, _class_id: usize) -> bool {
            false
        }
    }

    let server = server();
    let player = server.connect(4000);
    server.classes.add_class(servercore::classes::PlayerClass::default());

    let veto = Rc::new(Veto);
    let handler: Rc<dyn servercore::classes::ClassEventHandler> = veto.clone();
    server.classes.events().add(&handler);
    server.transport.take_sent();

    server.transport.inject(
        player.connection(),
        rpcs::PlayerRequestClass { class_id: 0 }.datagram(),
    );
    server.tick_at(Instant::now());

    let sent = server.transport.take_sent_to(player.connection());
    assert_eq!(sent.len(), 1);

    let mut reader = quarry::net::wire::PacketReader::new(&sent[0][1..]);
    let selectable = reader.read_bool().unwrap();
    assert!(!selectable);
    // Everything else in the denied response is zeroed.
    let _team = reader.read_u8().unwrap();
    let _skin = reader.read_i32().unwrap();
    let _pos = reader.read_vec3().unwrap();
    let _angle = reader.read_f32().unwrap();
    for _ in 0..3 {
        assert_eq!(reader.read_u32().unwrap(), 0);
    }
}

#[test]
fn s4_release_during_damage_dispatch() {
    struct Retaliator {
        actors: Rc<ActorsComponent>,
        observed_live: Cell<bool>,
    }

    impl ActorEventHandler for Retaliator {
        fn on_player_give_damage_actor(
            &self,
            _player: &Rc<Player>,
            actor: &Rc<servercore::actors::Actor>,
            _damage: f32,
            _weapon: u32,
            _part: servercore::actors::BodyPart,
        ) {
            self.observed_live.set(self.actors.get(actor.id()).is_some());
            self.actors.release(actor.id());
        }
    }

    let server = server();
    let player = server.connect(4000);
    let actor = server.actors.create(0, Vec3::ZERO, 0.0).unwrap();
    actor.set_invulnerable(false);
    server.core.players().update_all(Instant::now() + Duration::from_secs(2));
    assert!(actor.is_streamed_in(player.id()));

    let retaliator = Rc::new(Retaliator {
        actors: server.actors.clone(),
        observed_live: Cell::new(false),
    });
    let handler: Rc<dyn ActorEventHandler> = retaliator.clone();
    server.actors.events().add(&handler);

    server.transport.inject(
        player.connection(),
        rpcs::OnPlayerDamageActor {
            actor_id: actor.id() as u16,
            damage: 25.0,
            weapon: 24,
            body_part: 3,
        }
        .datagram(),
    );
    server.tick_at(Instant::now());

    assert!(retaliator.observed_live.get());
    assert!(server.actors.get(actor.id()).is_none());
}

#[test]
fn s5_checkpoint_enter_leave_once() {
    struct Tracker {
        enters: Cell<u32>,
        leaves: Cell<u32>,
    }

    impl servercore::checkpoints::CheckpointEventHandler for Tracker {
        fn on_player_enter_checkpoint(&self, _player: &Rc<Player>) {
            self.enters.set(self.enters.get() + 1);
        }

        fn on_player_leave_checkpoint(&self, _player: &Rc<Player>) {
            self.leaves.set(self.leaves.get() + 1);
        }
    }

    let server = server();
    let player = server.connect(4000);

    let tracker = Rc::new(Tracker {
        enters: Cell::new(0),
        leaves: Cell::new(0),
    });
    let handler: Rc<dyn servercore::checkpoints::CheckpointEventHandler> = tracker.clone();
    server.checkpoints.events().add(&handler);

    server
        .checkpoints
        .set_checkpoint(&player, Vec3::new(10.0, 10.0, 0.0), 3.0);

    let base = Instant::now();
    player.set_position(Vec3::new(0.0, 0.0, 0.0));
    server.tick_at(base);
    player.set_position(Vec3::new(10.0, 10.0, 0.0));
    server.tick_at(base + Duration::from_millis(10));
    server.tick_at(base + Duration::from_millis(20));
    player.set_position(Vec3::new(30.0, 30.0, 0.0));
    server.tick_at(base + Duration::from_millis(30));
    server.tick_at(base + Duration::from_millis(40));

    assert_eq!(tracker.enters.get(), 1);
    assert_eq!(tracker.leaves.get(), 1);
}

#[test]
fn s6_dialog_id_agreement() {
    use servercore::dialogs::{DialogStyle, PlayerDialogData, INVALID_DIALOG_ID};

    let server = server();
    let player = server.connect(4000);

    let fired = Rc::new(Cell::new(0u32));

    struct Listener {
        fired: Rc<Cell<u32>>,
    }

    impl servercore::dialogs::PlayerDialogEventHandler for Listener {
        fn on_dialog_response(
            &self,
            _player: &Rc<Player>,
            _dialog_id: u16,
            _response: servercore::dialogs::DialogResponse,
            _list_item: i32,
            _text: &str,
        ) {
            self.fired.set(self.fired.get() + 1);
        }
    }

    let listener = Rc::new(Listener {
        fired: fired.clone(),
    });
    let handler: Rc<dyn servercore::dialogs::PlayerDialogEventHandler> = listener.clone();
    server.dialogs.events().add(&handler);

    server
        .dialogs
        .show(&player, 7, DialogStyle::MessageBox, "title", "body", "ok", "cancel");

    let respond = |dialog_id: u16| {
        server.transport.inject(
            player.connection(),
            rpcs::OnPlayerDialogResponse {
                dialog_id,
                response: 1,
                list_item: 0,
                text: String::new(),
            }
            .datagram(),
        );
        server.tick_at(Instant::now());
    };

    // Mismatched id: dropped without dispatch.
    respond(8);
    assert_eq!(fired.get(), 0);

    // Matching id: dispatched once, active dialog cleared.
    respond(7);
    assert_eq!(fired.get(), 1);
    let data = player.query_extension::<PlayerDialogData>().unwrap();
    assert_eq!(data.active_id(), INVALID_DIALOG_ID);
}

#[test]
fn s7_timer_killed_mid_callback() {
    use quarry::timers::{Timer, TimerHandler};

    struct SelfStopper {
        fires: Cell<u32>,
        freed: Cell<bool>,
    }

    impl TimerHandler for SelfStopper {
        fn timeout(&self, timer: &Timer) {
            self.fires.set(self.fires.get() + 1);
            if self.fires.get() == 3 {
                timer.kill();
            }
        }

        fn free(&self, _timer: &Timer) {
            self.freed.set(true);
        }
    }

    let server = server();
    let start = Instant::now();
    let handler = Rc::new(SelfStopper {
        fires: Cell::new(0),
        freed: Cell::new(false),
    });
    server
        .core
        .timers()
        .create_repeating(handler.clone(), Duration::from_millis(100), start);

    for step in 1..=6 {
        server.tick_at(start + Duration::from_millis(step * 100));
    }

    assert_eq!(handler.fires.get(), 3);
    assert!(handler.freed.get());
    assert_eq!(server.core.timers().running_count(), 0);
}

#[test]
fn disconnect_prunes_every_streamed_set() {
    let server = server();
    let player = server.connect(4000);
    let keeper = server.connect(4001);

    let actor = server.actors.create(0, Vec3::ZERO, 0.0).unwrap();
    let vehicle = server
        .vehicles
        .create(400, Vec3::new(5.0, 0.0, 0.0), 0.0, (0, 0), Duration::from_secs(60))
        .unwrap();

    server.core.players().update_all(Instant::now() + Duration::from_secs(2));
    assert!(actor.is_streamed_in(player.id()));
    assert!(vehicle.is_streamed_in(player.id()));
    assert!(actor.is_streamed_in(keeper.id()));

    // Counter conservation holds per type while streamed in.
    let vehicle_data = player.query_extension::<PlayerVehicleData>().unwrap();
    assert_eq!(vehicle_data.num_streamed(), 1);

    let pid = player.id();
    server.transport.disconnect(player.connection());
    server.tick_at(Instant::now());

    // Every entity forgot the disconnected player, nobody else.
    assert!(!actor.is_streamed_in(pid));
    assert!(!vehicle.is_streamed_in(pid));
    assert!(actor.is_streamed_in(keeper.id()));

    // The freed id is reusable and starts clean.
    let replacement = server.connect(4002);
    assert_eq!(replacement.id(), pid);
    let data = replacement.query_extension::<PlayerActorData>().unwrap();
    assert_eq!(data.num_streamed(), 0);
    let vehicle_data = replacement.query_extension::<PlayerVehicleData>().unwrap();
    assert_eq!(vehicle_data.num_streamed(), 0);
}

#[test]
fn legacy_config_reload_reshapes_streaming() {
    use std::io::Write;

    let mut path = std::env::temp_dir();
    path.push(format!("scenario_reload_{}.cfg", std::process::id()));
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"stream_distance 50.0\n").unwrap();
    }

    let server = server();
    let player = server.connect(4000);
    let actor = server.actors.create(0, Vec3::new(100.0, 0.0, 0.0), 0.0).unwrap();

    server.core.players().update_all(Instant::now() + Duration::from_secs(2));
    assert!(actor.is_streamed_in(player.id()));

    // Shrink the radius to 50 via a live legacy reload; the actor at 100
    // units must stream out on the next scan.
    server.core.set_legacy_config_path(path.clone());
    assert!(server.core.reload_legacy_config());
    server.core.players().update_all(Instant::now() + Duration::from_secs(4));

    assert!(!actor.is_streamed_in(player.id()));
    let _ = std::fs::remove_file(&path);
}
