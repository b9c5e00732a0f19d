use crate::component::{Component, ComponentInfo, ComponentUid, SemanticVersion};
use crate::core::{Core, RpcInHandler};
use crate::player::{Player, PlayerConnectEventHandler};
use crate::rpcs::{self, id};
use bedrock::math::Vec3;
use quarry::events::EventDispatcher;
use quarry::extensions::{Extension, ExtensionId, ExtensionInfo};
use quarry::net::wire::PacketReader;
use quarry::pool::Pool;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

pub const MAX_CLASSES: usize = 320;

/// One selection-screen weapon slot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WeaponSlot {
    pub weapon: u32,
    pub ammo: u32,
}

/// A spawnable class: skin, team, spawn point and starting weapons.
#[derive(Clone, Debug)]
pub struct PlayerClass {
    pub team: u8,
    pub skin: i32,
    pub spawn: Vec3,
    pub angle: f32,
    pub weapons: [WeaponSlot; 3],
}

impl Default for PlayerClass {
    fn default() -> PlayerClass {
        PlayerClass {
            team: 255,
            skin: 0,
            spawn: Vec3::new(0.0, 0.0, 3.1279),
            angle: 0.0,
            weapons: [WeaponSlot::default(); 3],
        }
    }
}

struct ClassEntry {
    class: RefCell<PlayerClass>,
}

/// The class a player last picked or was assigned.
pub struct PlayerClassData {
    class: RefCell<PlayerClass>,
}

impl PlayerClassData {
    pub fn class(&self) -> PlayerClass {
        self.class.borrow().clone()
    }
}

impl Extension for PlayerClassData {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl ExtensionInfo for PlayerClassData {
    const EXTENSION_ID: ExtensionId = ExtensionId(0x185655ded843788b);
}

pub trait ClassEventHandler {
    /// Veto point for the class selection screen; returning `false`
    /// refuses the request.
    fn on_player_request_class(&self, _player: &Rc<Player>, _class_id: usize) -> bool {
        true
    }
}

pub struct ClassesComponent {
    weak: Weak<ClassesComponent>,
    storage: Pool<ClassEntry>,
    events: EventDispatcher<dyn ClassEventHandler>,
    /// Set while a request is being answered, so `set_spawn_info` from a
    /// handler replaces the default response instead of sending its own
    /// RPC.
    in_class_request: Cell<bool>,
    skip_default_response: Cell<bool>,
}

impl ClassesComponent {
    pub fn new() -> Rc<ClassesComponent> {
        Rc::new_cyclic(|weak| ClassesComponent {
            weak: weak.clone(),
            storage: Pool::new(MAX_CLASSES),
            events: EventDispatcher::new(),
            in_class_request: Cell::new(false),
            skip_default_response: Cell::new(false),
        })
    }

    fn handle(&self) -> Rc<ClassesComponent> {
        self.weak.upgrade().expect("component outlives its handle")
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn ClassEventHandler> {
        &self.events
    }

    /// Registers a selectable class. Returns its id, or `None` once all
    /// slots are taken.
    pub fn add_class(&self, class: PlayerClass) -> Option<usize> {
        self.storage.emplace_with(|_| ClassEntry {
            class: RefCell::new(class),
        })
    }

    pub fn class(&self, id: usize) -> Option<PlayerClass> {
        self.storage.get(id).map(|entry| entry.class.borrow().clone())
    }

    pub fn count(&self) -> usize {
        self.storage.len()
    }

    /// Overrides a player's next spawn. Inside a class request the change
    /// folds into the pending response; outside it is pushed immediately.
    pub fn set_spawn_info(&self, player: &Rc<Player>, class: PlayerClass) {
        if let Some(data) = player.query_extension::<PlayerClassData>() {
            *data.class.borrow_mut() = class.clone();
        }

        if self.in_class_request.get() {
            self.skip_default_response.set(true);
            return;
        }

        let mut weapons = [0u32; 3];
        let mut ammo = [0u32; 3];
        for (slot, entry) in class.weapons.iter().enumerate() {
            weapons[slot] = entry.weapon;
            ammo[slot] = entry.ammo;
        }
        player.send_rpc(
            rpcs::SetSpawnInfo {
                team: class.team,
                skin: class.skin,
                position: class.spawn,
                angle: class.angle,
                weapons,
                ammo,
            }
            .datagram(),
        );
    }

    fn respond(&self, player: &Rc<Player>, class: &PlayerClass) {
        let mut weapons = [0u32; 3];
        let mut ammo = [0u32; 3];
        for (slot, entry) in class.weapons.iter().enumerate() {
            weapons[slot] = entry.weapon;
            ammo[slot] = entry.ammo;
        }
        player.send_rpc(
            rpcs::PlayerRequestClassResponse {
                selectable: true,
                team: class.team,
                skin: class.skin,
                position: class.spawn,
                angle: class.angle,
                weapons,
                ammo,
            }
            .datagram(),
        );
    }
}

impl Component for ClassesComponent {
    fn uid(&self) -> ComponentUid {
        Self::UID
    }

    fn name(&self) -> &'static str {
        "Classes"
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
        core.rpcs()
            .add_handler(id::PLAYER_REQUEST_CLASS, &(this as Rc<dyn RpcInHandler>));
    }

    fn reset(&self) {
        self.storage.clear();
    }
}

impl ComponentInfo for ClassesComponent {
    const UID: ComponentUid = 0x8cfb3183976da208;
}

impl PlayerConnectEventHandler for ClassesComponent {
    fn on_player_connect(&self, player: &Rc<Player>) {
        player.extensions().add(Rc::new(PlayerClassData {
            class: RefCell::new(PlayerClass::default()),
        }));
    }
}

impl RpcInHandler for ClassesComponent {
    fn on_receive(&self, _rpc: u8, player: &Rc<Player>, reader: &mut PacketReader) -> bool {
        let request = match rpcs::PlayerRequestClass::read(reader) {
            Ok(request) => request,
            Err(_) => return false,
        };
        let class_id = request.class_id as usize;

        self.in_class_request.set(true);
        self.skip_default_response.set(false);

        let allowed = self
            .events
            .stop_at_false(|handler| handler.on_player_request_class(player, class_id));

        if allowed {
            if self.skip_default_response.get() {
                // A handler installed its own spawn info; answer with that.
                if let Some(data) = player.query_extension::<PlayerClassData>() {
                    let class = data.class();
                    self.respond(player, &class);
                }
            } else if let Some(class) = self.class(class_id) {
                if let Some(data) = player.query_extension::<PlayerClassData>() {
                    *data.class.borrow_mut() = class.clone();
                }
                self.respond(player, &class);
            } else {
                // Unknown class id falls back to the default class.
                let class = PlayerClass::default();
                if let Some(data) = player.query_extension::<PlayerClassData>() {
                    *data.class.borrow_mut() = class.clone();
                }
                self.respond(player, &class);
            }
        } else {
            // Vetoed: not selectable, no weapons.
            player.send_rpc(rpcs::PlayerRequestClassResponse::denied().datagram());
        }

        self.in_class_request.set(false);
        true
    }
}
