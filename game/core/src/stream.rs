//! The shared streaming protocol. Each streamable pool runs the same
//! per-player scan: evaluate the eligibility predicate for every entity,
//! then emit the show/hide transitions. Pools differ only in the
//! capability surface exposed through [`Streamable`] and in the packets
//! their transition callbacks send.

use crate::player::{Player, PlayerId, PlayerState};
use bedrock::math::{distance_sqr_2d, distance_sqr_3d, Vec3};
use indexmap::IndexSet;
use quarry::pool::Pool;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Entities visible in every virtual world use this world id.
pub const ANY_VIRTUAL_WORLD: i32 = -1;

/// Capability surface the generic scan drives.
pub trait Streamable {
    /// Effective position for the range check. Returns `None` when an
    /// attachment target is not streamed for the player, which vetoes
    /// streaming outright (dependent entities never outlive their base).
    fn stream_position(&self, player: &Player) -> Option<Vec3>;

    fn virtual_world(&self) -> i32;

    fn is_streamed_for(&self, pid: PlayerId) -> bool;

    /// Range check on the ground plane instead of full 3D.
    fn planar_distance(&self) -> bool {
        false
    }

    /// Per-entity radius override (draw distance); defaults to the global
    /// streaming radius.
    fn stream_radius_sqr(&self, global_sqr: f32) -> f32 {
        global_sqr
    }
}

/// Per-player gate and distance snapshot for one streamable pool.
///
/// `should_stream` throttles the scan to at most once per `stream_rate`
/// milliseconds per player; the distance is squared once at configuration
/// time so the hot loop compares squared norms only.
pub struct StreamConfigHelper {
    distance_sqr: Cell<f32>,
    rate: Cell<u64>,
    last_scan: RefCell<Vec<Option<Instant>>>,
}

impl StreamConfigHelper {
    pub fn new(stream_distance: f32, stream_rate_ms: u64, max_players: usize) -> StreamConfigHelper {
        StreamConfigHelper {
            distance_sqr: Cell::new(stream_distance * stream_distance),
            rate: Cell::new(stream_rate_ms),
            last_scan: RefCell::new(vec![None; max_players]),
        }
    }

    #[inline]
    pub fn distance_sqr(&self) -> f32 {
        self.distance_sqr.get()
    }

    /// Applies reloaded config values.
    pub fn reconfigure(&self, stream_distance: f32, stream_rate_ms: u64) {
        self.distance_sqr.set(stream_distance * stream_distance);
        self.rate.set(stream_rate_ms);
    }

    /// Whether this player is due a scan. Advances the per-player clock on
    /// a positive answer.
    pub fn should_stream(&self, pid: PlayerId, now: Instant) -> bool {
        let mut last_scan = self.last_scan.borrow_mut();
        if pid >= last_scan.len() {
            last_scan.resize(pid + 1, None);
        }

        let due = match last_scan[pid] {
            Some(last) => now.duration_since(last) >= Duration::from_millis(self.rate.get()),
            None => true,
        };
        if due {
            last_scan[pid] = Some(now);
        }
        due
    }

    /// Clears the per-player clock so a reused id starts fresh.
    pub fn forget(&self, pid: PlayerId) {
        let mut last_scan = self.last_scan.borrow_mut();
        if pid < last_scan.len() {
            last_scan[pid] = None;
        }
    }
}

/// The eligibility predicate shared by every streamable type.
fn eligible<T: Streamable>(entity: &T, player: &Player, distance_sqr: f32) -> bool {
    if player.state() == PlayerState::None {
        return false;
    }

    let world = entity.virtual_world();
    if world != ANY_VIRTUAL_WORLD && world != player.virtual_world() {
        return false;
    }

    let position = match entity.stream_position(player) {
        Some(position) => position,
        None => return false,
    };

    let dist = if entity.planar_distance() {
        distance_sqr_2d(position, player.position())
    } else {
        distance_sqr_3d(position, player.position())
    };
    dist < entity.stream_radius_sqr(distance_sqr)
}

/// Scans a pool for one player and fires the transition callbacks.
///
/// Entities walk in pool id order, which fixes the tie-break when a
/// per-player cap is about to saturate: lowest id wins. Cap enforcement
/// lives in the `stream_in` callback (it skips silently when full), so a
/// capped-out entity is simply retried on the next scan.
pub fn scan_pool<T, FIn, FOut>(
    pool: &Pool<T>,
    player: &Rc<Player>,
    distance_sqr: f32,
    mut stream_in: FIn,
    mut stream_out: FOut,
) where
    T: Streamable,
    FIn: FnMut(usize, &Rc<T>),
    FOut: FnMut(usize, &Rc<T>),
{
    let pid = player.id();

    for id in pool.ids() {
        // Handlers fired from an earlier transition may have released this
        // entry mid-scan.
        if !pool.is_live(id) {
            continue;
        }
        let entity = match pool.get(id) {
            Some(entity) => entity,
            None => continue,
        };

        let should_be = eligible(&*entity, player, distance_sqr);
        let is = entity.is_streamed_for(pid);

        if !is && should_be {
            stream_in(id, &entity);
        } else if is && !should_be {
            stream_out(id, &entity);
        }
    }
}

/// The players an entity is currently streamed in for. Insertion order is
/// kept so restreams hit clients deterministically.
#[derive(Default)]
pub struct StreamedSet {
    players: RefCell<IndexSet<PlayerId>>,
}

impl StreamedSet {
    pub fn new() -> StreamedSet {
        StreamedSet::default()
    }

    #[inline]
    pub fn contains(&self, pid: PlayerId) -> bool {
        self.players.borrow().contains(&pid)
    }

    pub fn add(&self, pid: PlayerId) -> bool {
        self.players.borrow_mut().insert(pid)
    }

    pub fn remove(&self, pid: PlayerId) -> bool {
        self.players.borrow_mut().shift_remove(&pid)
    }

    pub fn len(&self) -> usize {
        self.players.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.borrow().is_empty()
    }

    /// Snapshot of member ids in insertion order.
    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.borrow().iter().copied().collect()
    }

    pub fn clear(&self) {
        self.players.borrow_mut().clear();
    }
}
