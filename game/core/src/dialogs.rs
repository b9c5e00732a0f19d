use crate::component::{Component, ComponentInfo, ComponentUid, SemanticVersion};
use crate::core::{Core, RpcInHandler};
use crate::player::{Player, PlayerConnectEventHandler};
use crate::rpcs::{self, id};
use quarry::events::EventDispatcher;
use quarry::extensions::{Extension, ExtensionId, ExtensionInfo};
use quarry::net::wire::PacketReader;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Dialog ids live in `[0, MAX_DIALOG)`; the top value doubles as the
/// "no dialog" sentinel on the wire.
pub const MAX_DIALOG: u16 = 32767;
pub const INVALID_DIALOG_ID: u16 = 0xFFFF;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DialogStyle {
    MessageBox = 0,
    Input = 1,
    List = 2,
    Password = 3,
    Tablist = 4,
    TablistHeaders = 5,
}

/// How the player answered: which button, and for lists which row.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DialogResponse {
    Right = 0,
    Left = 1,
}

/// The dialog a player currently has on screen, if any. The id is the
/// agreement token: a response quoting any other id is discarded.
pub struct PlayerDialogData {
    active_id: Cell<u16>,
    style: Cell<DialogStyle>,
    title: RefCell<String>,
    body: RefCell<String>,
    button1: RefCell<String>,
    button2: RefCell<String>,
}

impl PlayerDialogData {
    fn new() -> PlayerDialogData {
        PlayerDialogData {
            active_id: Cell::new(INVALID_DIALOG_ID),
            style: Cell::new(DialogStyle::MessageBox),
            title: RefCell::new(String::new()),
            body: RefCell::new(String::new()),
            button1: RefCell::new(String::new()),
            button2: RefCell::new(String::new()),
        }
    }

    #[inline]
    pub fn active_id(&self) -> u16 {
        self.active_id.get()
    }

    #[inline]
    pub fn style(&self) -> DialogStyle {
        self.style.get()
    }

    pub fn title(&self) -> String {
        self.title.borrow().clone()
    }

    pub fn body(&self) -> String {
        self.body.borrow().clone()
    }

    /// Shows a dialog. Out-of-range ids are dropped (the legacy surface
    /// reserves them).
    pub fn show(
        &self,
        player: &Player,
        dialog_id: u16,
        style: DialogStyle,
        title: &str,
        body: &str,
        button1: &str,
        button2: &str,
    ) {
        if dialog_id >= MAX_DIALOG {
            return;
        }

        self.active_id.set(dialog_id);
        self.style.set(style);
        *self.title.borrow_mut() = title.to_string();
        *self.body.borrow_mut() = body.to_string();
        *self.button1.borrow_mut() = button1.to_string();
        *self.button2.borrow_mut() = button2.to_string();

        player.send_rpc(
            rpcs::ShowDialog {
                dialog_id,
                style: style as u8,
                title,
                body,
                button1,
                button2,
            }
            .datagram(),
        );
    }

    /// Takes the dialog off screen by showing the sentinel dialog.
    pub fn hide(&self, player: &Player) {
        if self.active_id.get() != INVALID_DIALOG_ID {
            self.active_id.set(INVALID_DIALOG_ID);
            player.send_rpc(
                rpcs::ShowDialog {
                    dialog_id: INVALID_DIALOG_ID,
                    style: DialogStyle::MessageBox as u8,
                    title: " ",
                    body: " ",
                    button1: " ",
                    button2: " ",
                }
                .datagram(),
            );
        }
    }
}

impl Extension for PlayerDialogData {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn reset(&self) {
        self.active_id.set(INVALID_DIALOG_ID);
    }
}

impl ExtensionInfo for PlayerDialogData {
    const EXTENSION_ID: ExtensionId = ExtensionId(0xbc03376aa3591a11);
}

pub trait PlayerDialogEventHandler {
    fn on_dialog_response(
        &self,
        _player: &Rc<Player>,
        _dialog_id: u16,
        _response: DialogResponse,
        _list_item: i32,
        _text: &str,
    ) {
    }
}

pub struct DialogsComponent {
    weak: Weak<DialogsComponent>,
    events: EventDispatcher<dyn PlayerDialogEventHandler>,
}

impl DialogsComponent {
    pub fn new() -> Rc<DialogsComponent> {
        Rc::new_cyclic(|weak| DialogsComponent {
            weak: weak.clone(),
            events: EventDispatcher::new(),
        })
    }

    fn handle(&self) -> Rc<DialogsComponent> {
        self.weak.upgrade().expect("component outlives its handle")
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn PlayerDialogEventHandler> {
        &self.events
    }

    pub fn show(
        &self,
        player: &Rc<Player>,
        dialog_id: u16,
        style: DialogStyle,
        title: &str,
        body: &str,
        button1: &str,
        button2: &str,
    ) {
        if let Some(data) = player.query_extension::<PlayerDialogData>() {
            data.show(player, dialog_id, style, title, body, button1, button2);
        }
    }

    pub fn hide(&self, player: &Rc<Player>) {
        if let Some(data) = player.query_extension::<PlayerDialogData>() {
            data.hide(player);
        }
    }
}

impl Component for DialogsComponent {
    fn uid(&self) -> ComponentUid {
        Self::UID
    }

    fn name(&self) -> &'static str {
        "Dialogs"
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
            .add_handler(id::ON_DIALOG_RESPONSE, &(this as Rc<dyn RpcInHandler>));
    }
}

impl ComponentInfo for DialogsComponent {
    const UID: ComponentUid = 0x44a111350d611dde;
}

impl PlayerConnectEventHandler for DialogsComponent {
    fn on_player_connect(&self, player: &Rc<Player>) {
        player.extensions().add(Rc::new(PlayerDialogData::new()));
    }
}

impl RpcInHandler for DialogsComponent {
    fn on_receive(&self, _rpc: u8, player: &Rc<Player>, reader: &mut PacketReader) -> bool {
        let response = match rpcs::OnPlayerDialogResponse::read(reader) {
            Ok(response) => response,
            Err(_) => return false,
        };

        let data = match player.query_extension::<PlayerDialogData>() {
            Some(data) => data,
            None => return false,
        };

        // Id agreement: the response must quote the dialog the server
        // believes is on screen. Anything else is stale or forged.
        if data.active_id() == INVALID_DIALOG_ID
            || data.active_id() != response.dialog_id
            || response.list_item < 0
        {
            return false;
        }

        let button = match response.response {
            0 => DialogResponse::Right,
            _ => DialogResponse::Left,
        };

        data.active_id.set(INVALID_DIALOG_ID);

        self.events.dispatch(|handler| {
            handler.on_dialog_response(
                player,
                response.dialog_id,
                button,
                response.list_item,
                &response.text,
            )
        });
        true
    }
}
