use bedrock::logging;
use bedrock::math::Vec3;
use criterion::{criterion_group, criterion_main, Criterion};
use servercore::actors::ActorsComponent;
use servercore::bans::BanList;
use servercore::config::ServerConfig;
use servercore::core::Core;
use servercore::player::PlayerState;
use quarry::net::loopback::LoopbackTransport;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// One full actor scan for a pool of 1000 and 50 connected players, the
/// worst case a single tick has to absorb.
fn bench_actor_scan(c: &mut Criterion) {
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

    for index in 0..50u16 {
        let conn = transport.connect(format!("127.0.0.1:{}", 5000 + index).parse().unwrap());
        core.run_once(Duration::from_millis(10), Instant::now());
        let player = core.players().by_connection(conn).unwrap();
        player.set_state(PlayerState::Spawned);
        player.set_position(Vec3::new((index as f32) * 15.0, 0.0, 0.0));
    }

    for index in 0..1000 {
        let x = (index % 100) as f32 * 10.0;
        let y = (index / 100) as f32 * 10.0;
        actors.create(0, Vec3::new(x, y, 0.0), 0.0).unwrap();
    }

    let mut offset = Duration::from_secs(2);
    c.bench_function("actor_scan_50_players_1000_actors", |b| {
        b.iter(|| {
            // Step past the stream-rate gate each iteration so every scan
            // actually runs.
            offset += Duration::from_secs(2);
            core.players().update_all(Instant::now() + offset);
            transport.take_sent();
        })
    });
}

criterion_group!(benches, bench_actor_scan);
criterion_main!(benches);
