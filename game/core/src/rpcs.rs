//! Numbered RPC schemas. Every payload is a fixed little-endian layout
//! assembled by [`PacketWriter`]; inbound payloads parse with
//! [`PacketReader`] and a failed parse drops the packet.

use bedrock::colour::Colour;
use bedrock::math::{Vec2, Vec3};
use bedrock::strings::SmallName;
use quarry::net::wire::{PacketReader, PacketWriter, WireResult};

/// RPC id numbers, shared with legacy clients.
pub mod id {
    pub const SHOW_TEXT_LABEL: u8 = 36;
    pub const DISABLE_CHECKPOINT: u8 = 37;
    pub const SET_RACE_CHECKPOINT: u8 = 38;
    pub const DISABLE_RACE_CHECKPOINT: u8 = 39;
    pub const CREATE_OBJECT: u8 = 44;
    pub const DESTROY_OBJECT: u8 = 47;
    pub const HIDE_TEXT_LABEL: u8 = 58;
    pub const SHOW_DIALOG: u8 = 61;
    pub const ON_DIALOG_RESPONSE: u8 = 62;
    pub const DESTROY_PICKUP: u8 = 63;
    pub const SET_SPAWN_INFO: u8 = 68;
    pub const STOP_FLASH_GANG_ZONE: u8 = 85;
    pub const CREATE_PICKUP: u8 = 95;
    pub const VEHICLE_DAMAGE_STATUS: u8 = 106;
    pub const SET_CHECKPOINT: u8 = 107;
    pub const SHOW_GANG_ZONE: u8 = 108;
    pub const HIDE_GANG_ZONE: u8 = 120;
    pub const FLASH_GANG_ZONE: u8 = 121;
    pub const PLAYER_REQUEST_CLASS: u8 = 128;
    pub const ON_PICK_UP_PICKUP: u8 = 131;
    pub const ADD_VEHICLE: u8 = 164;
    pub const REMOVE_VEHICLE: u8 = 165;
    pub const SHOW_ACTOR: u8 = 171;
    pub const HIDE_ACTOR: u8 = 172;
    pub const APPLY_ACTOR_ANIMATION: u8 = 173;
    pub const CLEAR_ACTOR_ANIMATIONS: u8 = 174;
    pub const SET_ACTOR_FACING_ANGLE: u8 = 175;
    pub const SET_ACTOR_POS: u8 = 176;
    pub const ON_PLAYER_DAMAGE_ACTOR: u8 = 177;
    pub const SET_ACTOR_HEALTH: u8 = 178;
    pub const MODEL_REQUEST: u8 = 179;
    pub const REQUEST_DFF: u8 = 181;
    pub const REQUEST_TXD: u8 = 182;
    pub const MODEL_URL: u8 = 183;
    pub const FINISH_DOWNLOAD: u8 = 184;
    pub const DOWNLOAD_COMPLETED: u8 = 185;
    pub const WEAPONS_UPDATE: u8 = 204;
    pub const PLAYER_SYNC: u8 = 207;
    pub const UNOCCUPIED_SYNC: u8 = 209;
}

/// Shared animation payload for actors.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimationData {
    pub library: SmallName,
    pub name: SmallName,
    pub delta: f32,
    pub looping: bool,
    pub lock_x: bool,
    pub lock_y: bool,
    pub freeze: bool,
    pub time: u32,
}

impl AnimationData {
    fn write(&self, writer: &mut PacketWriter) {
        writer
            .write_str8(&self.library)
            .write_str8(&self.name)
            .write_f32(self.delta)
            .write_bool(self.looping)
            .write_bool(self.lock_x)
            .write_bool(self.lock_y)
            .write_bool(self.freeze)
            .write_u32(self.time);
    }
}

pub struct ShowActorForPlayer {
    pub actor_id: u16,
    pub skin: i32,
    pub custom_skin: i32,
    pub position: Vec3,
    pub angle: f32,
    pub health: f32,
    pub invulnerable: bool,
}

impl ShowActorForPlayer {
    pub fn datagram(&self, dl_client: bool) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::SHOW_ACTOR);
        writer.write_u16(self.actor_id).write_i32(self.skin);
        if dl_client {
            writer.write_i32(self.custom_skin);
        }
        writer
            .write_vec3(self.position)
            .write_f32(self.angle)
            .write_f32(self.health)
            .write_bool(self.invulnerable);
        writer.finish()
    }
}

pub struct HideActorForPlayer {
    pub actor_id: u16,
}

impl HideActorForPlayer {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::HIDE_ACTOR);
        writer.write_u16(self.actor_id);
        writer.finish()
    }
}

pub struct ApplyActorAnimationForPlayer<'a> {
    pub actor_id: u16,
    pub animation: &'a AnimationData,
}

impl<'a> ApplyActorAnimationForPlayer<'a> {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::APPLY_ACTOR_ANIMATION);
        writer.write_u16(self.actor_id);
        self.animation.write(&mut writer);
        writer.finish()
    }
}

pub struct ClearActorAnimationsForPlayer {
    pub actor_id: u16,
}

impl ClearActorAnimationsForPlayer {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::CLEAR_ACTOR_ANIMATIONS);
        writer.write_u16(self.actor_id);
        writer.finish()
    }
}

pub struct SetActorPosForPlayer {
    pub actor_id: u16,
    pub position: Vec3,
}

impl SetActorPosForPlayer {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::SET_ACTOR_POS);
        writer.write_u16(self.actor_id).write_vec3(self.position);
        writer.finish()
    }
}

pub struct SetActorFacingAngleForPlayer {
    pub actor_id: u16,
    pub angle: f32,
}

impl SetActorFacingAngleForPlayer {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::SET_ACTOR_FACING_ANGLE);
        writer.write_u16(self.actor_id).write_f32(self.angle);
        writer.finish()
    }
}

pub struct SetActorHealthForPlayer {
    pub actor_id: u16,
    pub health: f32,
}

impl SetActorHealthForPlayer {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::SET_ACTOR_HEALTH);
        writer.write_u16(self.actor_id).write_f32(self.health);
        writer.finish()
    }
}

/// Inbound: a client reports hitting an actor.
#[derive(Debug, PartialEq)]
pub struct OnPlayerDamageActor {
    pub actor_id: u16,
    pub damage: f32,
    pub weapon: u32,
    pub body_part: u32,
}

impl OnPlayerDamageActor {
    pub fn read(reader: &mut PacketReader) -> WireResult<OnPlayerDamageActor> {
        Ok(OnPlayerDamageActor {
            actor_id: reader.read_u16()?,
            damage: reader.read_f32()?,
            weapon: reader.read_u32()?,
            body_part: reader.read_u32()?,
        })
    }

    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::ON_PLAYER_DAMAGE_ACTOR);
        writer
            .write_u16(self.actor_id)
            .write_f32(self.damage)
            .write_u32(self.weapon)
            .write_u32(self.body_part);
        writer.finish()
    }
}

pub struct ShowGangZone {
    pub zone_id: u16,
    pub min: Vec2,
    pub max: Vec2,
    pub colour: Colour,
}

impl ShowGangZone {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::SHOW_GANG_ZONE);
        writer
            .write_u16(self.zone_id)
            .write_f32(self.min.x)
            .write_f32(self.min.y)
            .write_f32(self.max.x)
            .write_f32(self.max.y)
            .write_colour_argb(self.colour);
        writer.finish()
    }
}

pub struct HideGangZone {
    pub zone_id: u16,
}

impl HideGangZone {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::HIDE_GANG_ZONE);
        writer.write_u16(self.zone_id);
        writer.finish()
    }
}

pub struct FlashGangZone {
    pub zone_id: u16,
    pub colour: Colour,
}

impl FlashGangZone {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::FLASH_GANG_ZONE);
        writer.write_u16(self.zone_id).write_colour_argb(self.colour);
        writer.finish()
    }
}

pub struct StopFlashGangZone {
    pub zone_id: u16,
}

impl StopFlashGangZone {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::STOP_FLASH_GANG_ZONE);
        writer.write_u16(self.zone_id);
        writer.finish()
    }
}

pub struct PlayerShowTextLabel<'a> {
    pub player_label: bool,
    pub label_id: u16,
    pub colour: Colour,
    pub position: Vec3,
    pub draw_distance: f32,
    pub test_los: bool,
    pub attached_player: u16,
    pub attached_vehicle: u16,
    pub text: &'a str,
}

impl<'a> PlayerShowTextLabel<'a> {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::SHOW_TEXT_LABEL);
        writer
            .write_bool(self.player_label)
            .write_u16(self.label_id)
            .write_colour_argb(self.colour)
            .write_vec3(self.position)
            .write_f32(self.draw_distance)
            .write_bool(self.test_los)
            .write_u16(self.attached_player)
            .write_u16(self.attached_vehicle)
            .write_str16(self.text);
        writer.finish()
    }
}

pub struct PlayerHideTextLabel {
    pub player_label: bool,
    pub label_id: u16,
}

impl PlayerHideTextLabel {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::HIDE_TEXT_LABEL);
        writer.write_bool(self.player_label).write_u16(self.label_id);
        writer.finish()
    }
}

pub struct SetCheckpoint {
    pub position: Vec3,
    pub radius: f32,
}

impl SetCheckpoint {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::SET_CHECKPOINT);
        writer.write_vec3(self.position).write_f32(self.radius);
        writer.finish()
    }
}

pub struct DisableCheckpoint;

impl DisableCheckpoint {
    pub fn datagram(&self) -> Vec<u8> {
        PacketWriter::new(id::DISABLE_CHECKPOINT).finish()
    }
}

pub struct SetRaceCheckpoint {
    pub kind: u8,
    pub position: Vec3,
    pub next_position: Vec3,
    pub radius: f32,
}

impl SetRaceCheckpoint {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::SET_RACE_CHECKPOINT);
        writer
            .write_u8(self.kind)
            .write_vec3(self.position)
            .write_vec3(self.next_position)
            .write_f32(self.radius);
        writer.finish()
    }
}

pub struct DisableRaceCheckpoint;

impl DisableRaceCheckpoint {
    pub fn datagram(&self) -> Vec<u8> {
        PacketWriter::new(id::DISABLE_RACE_CHECKPOINT).finish()
    }
}

/// Inbound: the client picked a class in the selection screen.
#[derive(Debug, PartialEq)]
pub struct PlayerRequestClass {
    pub class_id: u16,
}

impl PlayerRequestClass {
    pub fn read(reader: &mut PacketReader) -> WireResult<PlayerRequestClass> {
        Ok(PlayerRequestClass {
            class_id: reader.read_u16()?,
        })
    }

    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::PLAYER_REQUEST_CLASS);
        writer.write_u16(self.class_id);
        writer.finish()
    }
}

pub struct PlayerRequestClassResponse {
    pub selectable: bool,
    pub team: u8,
    pub skin: i32,
    pub position: Vec3,
    pub angle: f32,
    pub weapons: [u32; 3],
    pub ammo: [u32; 3],
}

impl PlayerRequestClassResponse {
    pub fn denied() -> PlayerRequestClassResponse {
        PlayerRequestClassResponse {
            selectable: false,
            team: 0,
            skin: 0,
            position: Vec3::ZERO,
            angle: 0.0,
            weapons: [0; 3],
            ammo: [0; 3],
        }
    }

    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::PLAYER_REQUEST_CLASS);
        writer
            .write_bool(self.selectable)
            .write_u8(self.team)
            .write_i32(self.skin)
            .write_vec3(self.position)
            .write_f32(self.angle);
        for &weapon in self.weapons.iter() {
            writer.write_u32(weapon);
        }
        for &ammo in self.ammo.iter() {
            writer.write_u32(ammo);
        }
        writer.finish()
    }
}

pub struct SetSpawnInfo {
    pub team: u8,
    pub skin: i32,
    pub position: Vec3,
    pub angle: f32,
    pub weapons: [u32; 3],
    pub ammo: [u32; 3],
}

impl SetSpawnInfo {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::SET_SPAWN_INFO);
        writer
            .write_u8(self.team)
            .write_i32(self.skin)
            .write_vec3(self.position)
            .write_f32(self.angle);
        for &weapon in self.weapons.iter() {
            writer.write_u32(weapon);
        }
        for &ammo in self.ammo.iter() {
            writer.write_u32(ammo);
        }
        writer.finish()
    }
}

pub struct ShowDialog<'a> {
    pub dialog_id: u16,
    pub style: u8,
    pub title: &'a str,
    pub body: &'a str,
    pub button1: &'a str,
    pub button2: &'a str,
}

impl<'a> ShowDialog<'a> {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::SHOW_DIALOG);
        writer
            .write_u16(self.dialog_id)
            .write_u8(self.style)
            .write_str8(self.title)
            .write_str16(self.body)
            .write_str8(self.button1)
            .write_str8(self.button2);
        writer.finish()
    }
}

/// Inbound: the client answered a dialog.
#[derive(Debug, PartialEq)]
pub struct OnPlayerDialogResponse {
    pub dialog_id: u16,
    pub response: u8,
    pub list_item: i32,
    pub text: String,
}

impl OnPlayerDialogResponse {
    pub fn read(reader: &mut PacketReader) -> WireResult<OnPlayerDialogResponse> {
        Ok(OnPlayerDialogResponse {
            dialog_id: reader.read_u16()?,
            response: reader.read_u8()?,
            list_item: reader.read_i32()?,
            text: reader.read_str16()?,
        })
    }

    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::ON_DIALOG_RESPONSE);
        writer
            .write_u16(self.dialog_id)
            .write_u8(self.response)
            .write_i32(self.list_item)
            .write_str16(&self.text);
        writer.finish()
    }
}

pub struct CreatePickup {
    pub pickup_id: u16,
    pub model: i32,
    pub pickup_type: u8,
    pub position: Vec3,
}

impl CreatePickup {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::CREATE_PICKUP);
        writer
            .write_u16(self.pickup_id)
            .write_i32(self.model)
            .write_u8(self.pickup_type)
            .write_vec3(self.position);
        writer.finish()
    }
}

pub struct DestroyPickup {
    pub pickup_id: u16,
}

impl DestroyPickup {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::DESTROY_PICKUP);
        writer.write_u16(self.pickup_id);
        writer.finish()
    }
}

/// Inbound: the client walked into a pickup.
#[derive(Debug, PartialEq)]
pub struct OnPlayerPickUpPickup {
    pub pickup_id: u16,
}

impl OnPlayerPickUpPickup {
    pub fn read(reader: &mut PacketReader) -> WireResult<OnPlayerPickUpPickup> {
        Ok(OnPlayerPickUpPickup {
            pickup_id: reader.read_u16()?,
        })
    }

    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::ON_PICK_UP_PICKUP);
        writer.write_u16(self.pickup_id);
        writer.finish()
    }
}

pub struct CreateObject {
    pub object_id: u16,
    pub model: i32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub draw_distance: f32,
    pub attached_player: u16,
    pub attached_vehicle: u16,
}

impl CreateObject {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::CREATE_OBJECT);
        writer
            .write_u16(self.object_id)
            .write_i32(self.model)
            .write_vec3(self.position)
            .write_vec3(self.rotation)
            .write_f32(self.draw_distance)
            .write_u16(self.attached_player)
            .write_u16(self.attached_vehicle);
        writer.finish()
    }
}

pub struct DestroyObject {
    pub object_id: u16,
}

impl DestroyObject {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::DESTROY_OBJECT);
        writer.write_u16(self.object_id);
        writer.finish()
    }
}

pub struct AddVehicleForPlayer {
    pub vehicle_id: u16,
    pub model: i32,
    pub position: Vec3,
    pub angle: f32,
    pub colours: (u8, u8),
    pub health: f32,
    pub panels: u32,
    pub doors: u32,
    pub lights: u8,
    pub tyres: u8,
    pub siren: bool,
}

impl AddVehicleForPlayer {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::ADD_VEHICLE);
        writer
            .write_u16(self.vehicle_id)
            .write_i32(self.model)
            .write_vec3(self.position)
            .write_f32(self.angle)
            .write_u8(self.colours.0)
            .write_u8(self.colours.1)
            .write_f32(self.health)
            .write_u32(self.panels)
            .write_u32(self.doors)
            .write_u8(self.lights)
            .write_u8(self.tyres)
            .write_bool(self.siren);
        writer.finish()
    }
}

pub struct RemoveVehicleForPlayer {
    pub vehicle_id: u16,
}

impl RemoveVehicleForPlayer {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::REMOVE_VEHICLE);
        writer.write_u16(self.vehicle_id);
        writer.finish()
    }
}

pub struct VehicleDamageStatus {
    pub vehicle_id: u16,
    pub panels: u32,
    pub doors: u32,
    pub lights: u8,
    pub tyres: u8,
}

impl VehicleDamageStatus {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::VEHICLE_DAMAGE_STATUS);
        writer
            .write_u16(self.vehicle_id)
            .write_u32(self.panels)
            .write_u32(self.doors)
            .write_u8(self.lights)
            .write_u8(self.tyres);
        writer.finish()
    }
}

/// Announces one downloadable model to a joining client.
pub struct ModelRequest {
    pub pool_id: u32,
    pub count: u32,
    pub model_type: u8,
    pub virtual_world: i32,
    pub base_id: i32,
    pub new_id: i32,
    pub dff_checksum: u32,
    pub txd_checksum: u32,
    pub dff_size: u32,
    pub txd_size: u32,
    pub time_on: u8,
    pub time_off: u8,
}

impl ModelRequest {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::MODEL_REQUEST);
        writer
            .write_u32(self.pool_id)
            .write_u32(self.count)
            .write_u8(self.model_type)
            .write_i32(self.virtual_world)
            .write_i32(self.base_id)
            .write_i32(self.new_id)
            .write_u32(self.dff_checksum)
            .write_u32(self.txd_checksum)
            .write_u32(self.dff_size)
            .write_u32(self.txd_size)
            .write_u8(self.time_on)
            .write_u8(self.time_off);
        writer.finish()
    }
}

pub struct ModelUrl<'a> {
    pub url: &'a str,
    pub file_type: u8,
    pub checksum: u32,
}

impl<'a> ModelUrl<'a> {
    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::MODEL_URL);
        writer
            .write_u8(self.file_type)
            .write_u32(self.checksum)
            .write_str8(self.url);
        writer.finish()
    }
}

pub struct DownloadCompleted;

impl DownloadCompleted {
    pub fn datagram(&self) -> Vec<u8> {
        PacketWriter::new(id::DOWNLOAD_COMPLETED).finish()
    }
}

/// Inbound: the client asks for a model file by checksum.
#[derive(Debug, PartialEq)]
pub struct RequestModelFile {
    pub checksum: u32,
}

impl RequestModelFile {
    pub fn read(reader: &mut PacketReader) -> WireResult<RequestModelFile> {
        Ok(RequestModelFile {
            checksum: reader.read_u32()?,
        })
    }

    pub fn datagram(&self, rpc: u8) -> Vec<u8> {
        let mut writer = PacketWriter::new(rpc);
        writer.write_u32(self.checksum);
        writer.finish()
    }
}

/// Inbound on-foot sync from a client. Authoritative for the sender's own
/// position and state.
#[derive(Debug, PartialEq)]
pub struct PlayerSync {
    pub position: Vec3,
    pub angle: f32,
    pub velocity: Vec3,
    pub health: f32,
    pub armour: f32,
    pub weapon: u8,
    pub keys: u16,
}

impl PlayerSync {
    pub fn read(reader: &mut PacketReader) -> WireResult<PlayerSync> {
        Ok(PlayerSync {
            position: reader.read_vec3()?,
            angle: reader.read_f32()?,
            velocity: reader.read_vec3()?,
            health: reader.read_f32()?,
            armour: reader.read_f32()?,
            weapon: reader.read_u8()?,
            keys: reader.read_u16()?,
        })
    }

    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::PLAYER_SYNC);
        writer
            .write_vec3(self.position)
            .write_f32(self.angle)
            .write_vec3(self.velocity)
            .write_f32(self.health)
            .write_f32(self.armour)
            .write_u8(self.weapon)
            .write_u16(self.keys);
        writer.finish()
    }
}

/// Inbound sync for a vehicle without a driver (or a towed trailer).
#[derive(Debug, PartialEq)]
pub struct UnoccupiedSync {
    pub vehicle_id: u16,
    pub position: Vec3,
    pub angle: f32,
    pub velocity: Vec3,
    pub health: f32,
}

impl UnoccupiedSync {
    pub fn read(reader: &mut PacketReader) -> WireResult<UnoccupiedSync> {
        Ok(UnoccupiedSync {
            vehicle_id: reader.read_u16()?,
            position: reader.read_vec3()?,
            angle: reader.read_f32()?,
            velocity: reader.read_vec3()?,
            health: reader.read_f32()?,
        })
    }

    pub fn datagram(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new(id::UNOCCUPIED_SYNC);
        writer
            .write_u16(self.vehicle_id)
            .write_vec3(self.position)
            .write_f32(self.angle)
            .write_vec3(self.velocity)
            .write_f32(self.health);
        writer.finish()
    }
}
