use crate::component::{Component, ComponentInfo, ComponentUid, SemanticVersion};
use crate::core::Core;
use crate::player::{Player, PlayerConnectEventHandler, PlayerUpdateEventHandler};
use crate::rpcs;
use bedrock::math::{distance_sqr_3d, Vec3};
use quarry::events::EventDispatcher;
use quarry::extensions::{Extension, ExtensionId, ExtensionInfo};
use std::any::Any;
use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Instant;

/// Race checkpoint marker shapes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RaceCheckpointType {
    Normal = 0,
    Finish = 1,
    Nothing = 2,
    AirNormal = 3,
    AirFinish = 4,
}

/// The standard single checkpoint a player may have active.
pub struct CheckpointData {
    position: Cell<Vec3>,
    radius: Cell<f32>,
    inside: Cell<bool>,
    enabled: Cell<bool>,
}

impl CheckpointData {
    fn new() -> CheckpointData {
        CheckpointData {
            position: Cell::new(Vec3::ZERO),
            radius: Cell::new(0.0),
            inside: Cell::new(false),
            enabled: Cell::new(false),
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position.get()
    }

    #[inline]
    pub fn set_position(&self, position: Vec3) {
        self.position.set(position);
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.radius.get()
    }

    #[inline]
    pub fn set_radius(&self, radius: f32) {
        self.radius.set(radius);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    #[inline]
    pub fn is_player_inside(&self) -> bool {
        self.inside.get()
    }

    /// Shows the checkpoint. Enabling over a live checkpoint first sends
    /// the disable so the client replaces rather than stacks markers.
    pub fn enable(&self, player: &Player) {
        if self.enabled.get() {
            self.disable(player);
        }

        self.enabled.set(true);
        self.inside.set(false);
        player.send_rpc(
            rpcs::SetCheckpoint {
                position: self.position.get(),
                radius: self.radius.get(),
            }
            .datagram(),
        );
    }

    pub fn disable(&self, player: &Player) {
        if self.enabled.get() {
            self.enabled.set(false);
            self.inside.set(false);
            player.send_rpc(rpcs::DisableCheckpoint.datagram());
        }
    }

    fn reset(&self) {
        self.enabled.set(false);
        self.inside.set(false);
    }
}

/// The race checkpoint variant: typed, and aware of the next one.
pub struct RaceCheckpointData {
    position: Cell<Vec3>,
    next_position: Cell<Vec3>,
    radius: Cell<f32>,
    kind: Cell<RaceCheckpointType>,
    inside: Cell<bool>,
    enabled: Cell<bool>,
}

impl RaceCheckpointData {
    fn new() -> RaceCheckpointData {
        RaceCheckpointData {
            position: Cell::new(Vec3::ZERO),
            next_position: Cell::new(Vec3::ZERO),
            radius: Cell::new(0.0),
            kind: Cell::new(RaceCheckpointType::Nothing),
            inside: Cell::new(false),
            enabled: Cell::new(false),
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position.get()
    }

    #[inline]
    pub fn set_position(&self, position: Vec3) {
        self.position.set(position);
    }

    #[inline]
    pub fn next_position(&self) -> Vec3 {
        self.next_position.get()
    }

    #[inline]
    pub fn set_next_position(&self, position: Vec3) {
        self.next_position.set(position);
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.radius.get()
    }

    #[inline]
    pub fn set_radius(&self, radius: f32) {
        self.radius.set(radius);
    }

    #[inline]
    pub fn kind(&self) -> RaceCheckpointType {
        self.kind.get()
    }

    #[inline]
    pub fn set_kind(&self, kind: RaceCheckpointType) {
        self.kind.set(kind);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    #[inline]
    pub fn is_player_inside(&self) -> bool {
        self.inside.get()
    }

    pub fn enable(&self, player: &Player) {
        if self.enabled.get() {
            self.disable(player);
        }

        self.inside.set(false);
        self.enabled.set(true);
        player.send_rpc(
            rpcs::SetRaceCheckpoint {
                kind: self.kind.get() as u8,
                position: self.position.get(),
                next_position: self.next_position.get(),
                radius: self.radius.get(),
            }
            .datagram(),
        );
    }

    pub fn disable(&self, player: &Player) {
        if self.enabled.get() {
            self.inside.set(false);
            self.enabled.set(false);
            player.send_rpc(rpcs::DisableRaceCheckpoint.datagram());
        }
    }

    fn reset(&self) {
        self.enabled.set(false);
        self.inside.set(false);
    }
}

/// Per-player checkpoint pair; each player has at most one of each kind.
pub struct PlayerCheckpointData {
    checkpoint: CheckpointData,
    race_checkpoint: RaceCheckpointData,
}

impl PlayerCheckpointData {
    fn new() -> PlayerCheckpointData {
        PlayerCheckpointData {
            checkpoint: CheckpointData::new(),
            race_checkpoint: RaceCheckpointData::new(),
        }
    }

    #[inline]
    pub fn checkpoint(&self) -> &CheckpointData {
        &self.checkpoint
    }

    #[inline]
    pub fn race_checkpoint(&self) -> &RaceCheckpointData {
        &self.race_checkpoint
    }
}

impl Extension for PlayerCheckpointData {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn reset(&self) {
        self.checkpoint.reset();
        self.race_checkpoint.reset();
    }
}

impl ExtensionInfo for PlayerCheckpointData {
    const EXTENSION_ID: ExtensionId = ExtensionId(0xbc07576aa3591a66);
}

pub trait CheckpointEventHandler {
    fn on_player_enter_checkpoint(&self, _player: &Rc<Player>) {}
    fn on_player_leave_checkpoint(&self, _player: &Rc<Player>) {}
    fn on_player_enter_race_checkpoint(&self, _player: &Rc<Player>) {}
    fn on_player_leave_race_checkpoint(&self, _player: &Rc<Player>) {}
}

pub struct CheckpointsComponent {
    weak: Weak<CheckpointsComponent>,
    events: EventDispatcher<dyn CheckpointEventHandler>,
}

impl CheckpointsComponent {
    pub fn new() -> Rc<CheckpointsComponent> {
        Rc::new_cyclic(|weak| CheckpointsComponent {
            weak: weak.clone(),
            events: EventDispatcher::new(),
        })
    }

    fn handle(&self) -> Rc<CheckpointsComponent> {
        self.weak.upgrade().expect("component outlives its handle")
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn CheckpointEventHandler> {
        &self.events
    }

    /// Places and shows the standard checkpoint for a player.
    pub fn set_checkpoint(&self, player: &Rc<Player>, position: Vec3, radius: f32) {
        if let Some(data) = player.query_extension::<PlayerCheckpointData>() {
            data.checkpoint.set_position(position);
            data.checkpoint.set_radius(radius);
            data.checkpoint.enable(player);
        }
    }

    pub fn disable_checkpoint(&self, player: &Rc<Player>) {
        if let Some(data) = player.query_extension::<PlayerCheckpointData>() {
            data.checkpoint.disable(player);
        }
    }

    /// Places and shows the race checkpoint for a player.
    pub fn set_race_checkpoint(
        &self,
        player: &Rc<Player>,
        kind: RaceCheckpointType,
        position: Vec3,
        next_position: Vec3,
        radius: f32,
    ) {
        if let Some(data) = player.query_extension::<PlayerCheckpointData>() {
            data.race_checkpoint.set_kind(kind);
            data.race_checkpoint.set_position(position);
            data.race_checkpoint.set_next_position(next_position);
            data.race_checkpoint.set_radius(radius);
            data.race_checkpoint.enable(player);
        }
    }

    pub fn disable_race_checkpoint(&self, player: &Rc<Player>) {
        if let Some(data) = player.query_extension::<PlayerCheckpointData>() {
            data.race_checkpoint.disable(player);
        }
    }
}

impl Component for CheckpointsComponent {
    fn uid(&self) -> ComponentUid {
        Self::UID
    }

    fn name(&self) -> &'static str {
        "Checkpoints"
    }

    fn version(&self) -> SemanticVersion {
        SemanticVersion::new(0, 1, 0)
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn on_load(&self, core: &Rc<Core>) {
        let this = self.handle();
        core.players()
            .connect_events()
            .add(&(this.clone() as Rc<dyn PlayerConnectEventHandler>));
        core.players()
            .update_events()
            .add(&(this as Rc<dyn PlayerUpdateEventHandler>));
    }
}

impl ComponentInfo for CheckpointsComponent {
    const UID: ComponentUid = 0x44a937350d611dde;
}

impl PlayerConnectEventHandler for CheckpointsComponent {
    fn on_player_connect(&self, player: &Rc<Player>) {
        player.extensions().add(Rc::new(PlayerCheckpointData::new()));
    }
}

impl PlayerUpdateEventHandler for CheckpointsComponent {
    /// Radius test on every update; edge transitions fire the events.
    fn on_player_update(&self, player: &Rc<Player>, _now: Instant) -> bool {
        let data = match player.query_extension::<PlayerCheckpointData>() {
            Some(data) => data,
            None => return true,
        };
        let position = player.position();

        let cp = &data.checkpoint;
        if cp.is_enabled() {
            let radius = cp.radius.get();
            let inside_now = distance_sqr_3d(position, cp.position.get()) <= radius * radius;
            if inside_now && !cp.inside.get() {
                cp.inside.set(true);
                self.events
                    .dispatch(|handler| handler.on_player_enter_checkpoint(player));
            } else if !inside_now && cp.inside.get() {
                cp.inside.set(false);
                self.events
                    .dispatch(|handler| handler.on_player_leave_checkpoint(player));
            }
        }

        let race = &data.race_checkpoint;
        if race.is_enabled() {
            let radius = race.radius.get();
            let inside_now = distance_sqr_3d(position, race.position.get()) <= radius * radius;
            if inside_now && !race.inside.get() {
                race.inside.set(true);
                self.events
                    .dispatch(|handler| handler.on_player_enter_race_checkpoint(player));
            } else if !inside_now && race.inside.get() {
                race.inside.set(false);
                self.events
                    .dispatch(|handler| handler.on_player_leave_race_checkpoint(player));
            }
        }

        true
    }
}
