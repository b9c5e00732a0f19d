use crate::component::{Component, ComponentInfo, ComponentUid, SemanticVersion};
use crate::core::Core;
use crate::player::{Player, PlayerConnectEventHandler, PlayerId};
use bedrock::logging::{self, Logger};
use quarry::events::EventDispatcher;
use quarry::extensions::{Extension, ExtensionId, ExtensionInfo};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

/// Where a console line came from. Authority differs: the process console
/// is always trusted, remote admins authenticate per address, players
/// carry an rcon flag.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandSender {
    Console,
    Rcon(SocketAddr),
    Player(PlayerId),
}

/// Marks a player as rcon-authenticated across respawns.
pub struct PlayerConsoleData {
    has_access: Cell<bool>,
}

impl PlayerConsoleData {
    #[inline]
    pub fn has_console_access(&self) -> bool {
        self.has_access.get()
    }

    #[inline]
    pub fn set_console_access(&self, access: bool) {
        self.has_access.set(access);
    }
}

impl Extension for PlayerConsoleData {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
    // Access survives respawn on purpose; no reset.
}

impl ExtensionInfo for PlayerConsoleData {
    const EXTENSION_ID: ExtensionId = ExtensionId(0x9f8d20f2f471cbae);
}

pub trait ConsoleEventHandler {
    /// Returning `true` consumes the command.
    fn on_console_command(&self, _sender: CommandSender, _command: &str, _parameters: &str) -> bool {
        false
    }
}

/// The text command bus. Built-ins (`exec`, `echo`, `rcon_login`, `exit`)
/// run first; everything else is offered to handlers in order until one
/// claims it.
pub struct ConsoleComponent {
    weak: Weak<ConsoleComponent>,
    events: EventDispatcher<dyn ConsoleEventHandler>,
    core: RefCell<Option<Rc<Core>>>,
    log: RefCell<Logger>,
}

impl ConsoleComponent {
    pub fn new() -> Rc<ConsoleComponent> {
        Rc::new_cyclic(|weak| ConsoleComponent {
            weak: weak.clone(),
            events: EventDispatcher::new(),
            core: RefCell::new(None),
            log: RefCell::new(logging::child_or_discard(None)),
        })
    }

    fn handle(&self) -> Rc<ConsoleComponent> {
        self.weak.upgrade().expect("component outlives its handle")
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn ConsoleEventHandler> {
        &self.events
    }

    /// Feeds one line into the bus. Returns whether anything handled it.
    pub fn send(&self, sender: CommandSender, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }

        let (command, parameters) = match line.find(' ') {
            Some(idx) => (&line[..idx], line[idx + 1..].trim_start()),
            None => (line, ""),
        };

        if self.run_builtin(sender, command, parameters) {
            return true;
        }

        let consumed = self
            .events
            .stop_at_true(|handler| handler.on_console_command(sender, command, parameters));
        if !consumed {
            logging::warn!(self.log.borrow(), "unknown console command"; "command" => command);
        }
        consumed
    }

    fn run_builtin(&self, sender: CommandSender, command: &str, parameters: &str) -> bool {
        match command {
            "echo" => {
                logging::info!(self.log.borrow(), "{}", parameters);
                true
            }
            "exec" => {
                if !self.sender_trusted(sender) {
                    return true;
                }
                if let Some(core) = self.core.borrow().as_ref() {
                    if !parameters.is_empty() {
                        core.set_legacy_config_path(parameters.into());
                    }
                    core.reload_legacy_config();
                }
                true
            }
            "exit" => {
                if !self.sender_trusted(sender) {
                    return true;
                }
                if let Some(core) = self.core.borrow().as_ref() {
                    core.stop();
                }
                true
            }
            "rcon_login" => {
                self.try_login(sender, parameters);
                true
            }
            _ => false,
        }
    }

    /// Whether a sender may run operational commands.
    fn sender_trusted(&self, sender: CommandSender) -> bool {
        match sender {
            CommandSender::Console => true,
            CommandSender::Rcon(_) => true,
            CommandSender::Player(pid) => self
                .player(pid)
                .map(|player| player.is_rcon_admin())
                .unwrap_or(false),
        }
    }

    fn try_login(&self, sender: CommandSender, password: &str) {
        let pid = match sender {
            CommandSender::Player(pid) => pid,
            // The process console and authenticated rcon need no login.
            _ => return,
        };

        let core = match self.core.borrow().clone() {
            Some(core) => core,
            None => return,
        };

        let (enabled, expected) = core.with_config(|config| {
            (
                config.server.enable_rcon,
                config.server.rcon_password.clone(),
            )
        });

        let player = match self.player(pid) {
            Some(player) => player,
            None => return,
        };

        if !enabled || expected.is_empty() || password != expected {
            logging::warn!(self.log.borrow(), "failed rcon login";
                           "player" => pid, "addr" => %player.address());
            return;
        }

        player.set_rcon_admin(true);
        if let Some(data) = player.query_extension::<PlayerConsoleData>() {
            data.set_console_access(true);
        }
        logging::info!(self.log.borrow(), "rcon login"; "player" => pid);
    }

    fn player(&self, pid: PlayerId) -> Option<Rc<Player>> {
        self.core
            .borrow()
            .as_ref()
            .and_then(|core| core.players().get(pid))
    }
}

impl Component for ConsoleComponent {
    fn uid(&self) -> ComponentUid {
        Self::UID
    }

    fn name(&self) -> &'static str {
        "Console"
    }

    fn version(&self) -> SemanticVersion {
        SemanticVersion::new(0, 1, 0)
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn on_load(&self, core: &Rc<Core>) {
        *self.core.borrow_mut() = Some(core.clone());
        *self.log.borrow_mut() = core.log().new(logging::o!());

        let this = self.handle();
        core.players()
            .connect_events()
            .add(&(this as Rc<dyn PlayerConnectEventHandler>));
    }

    fn free(&self) {
        *self.core.borrow_mut() = None;
    }
}

impl ComponentInfo for ConsoleComponent {
    const UID: ComponentUid = 0xbfa24e49d0c95ee4;
}

impl PlayerConnectEventHandler for ConsoleComponent {
    fn on_player_connect(&self, player: &Rc<Player>) {
        player.extensions().add(Rc::new(PlayerConsoleData {
            has_access: Cell::new(false),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bans::BanList;
    use crate::config::ServerConfig;
    use bedrock::logging;
    use quarry::net::loopback::LoopbackTransport;
    use std::time::{Duration, Instant};

    struct Fixture {
        core: Rc<Core>,
        transport: Rc<LoopbackTransport>,
        console: Rc<ConsoleComponent>,
    }

    fn fixture_with(mut mutate: impl FnMut(&mut ServerConfig)) -> Fixture {
        let mut config = ServerConfig::default();
        mutate(&mut config);

        let transport = Rc::new(LoopbackTransport::new());
        let core = Core::new(
            config,
            transport.clone(),
            BanList::in_memory(),
            logging::child_or_discard(None),
        );
        let console = ConsoleComponent::new();
        core.components().register(console.clone());
        core.load_components();
        Fixture {
            core,
            transport,
            console,
        }
    }

    fn connect(fixture: &Fixture) -> Rc<Player> {
        let conn = fixture.transport.connect("127.0.0.1:9000".parse().unwrap());
        fixture
            .core
            .run_once(Duration::from_millis(10), Instant::now());
        fixture.core.players().by_connection(conn).unwrap()
    }

    struct Recorder {
        seen: RefCell<Vec<(String, String)>>,
        claim: bool,
    }

    impl ConsoleEventHandler for Recorder {
        fn on_console_command(&self, _sender: CommandSender, command: &str, parameters: &str) -> bool {
            self.seen
                .borrow_mut()
                .push((command.to_string(), parameters.to_string()));
            self.claim
        }
    }

    #[test]
    fn test_dispatch_stops_at_claim() {
        let fixture = fixture_with(|_| {});
        let first = Rc::new(Recorder {
            seen: RefCell::new(Vec::new()),
            claim: true,
        });
        let second = Rc::new(Recorder {
            seen: RefCell::new(Vec::new()),
            claim: true,
        });
        let first_dyn: Rc<dyn ConsoleEventHandler> = first.clone();
        let second_dyn: Rc<dyn ConsoleEventHandler> = second.clone();
        fixture.console.events().add(&first_dyn);
        fixture.console.events().add(&second_dyn);

        assert!(fixture.console.send(CommandSender::Console, "teleport 1 2 3"));
        assert_eq!(first.seen.borrow().len(), 1);
        assert_eq!(first.seen.borrow()[0], ("teleport".to_string(), "1 2 3".to_string()));
        assert!(second.seen.borrow().is_empty());
    }

    #[test]
    fn test_unknown_command_unclaimed() {
        let fixture = fixture_with(|_| {});
        assert!(!fixture.console.send(CommandSender::Console, "nonsense"));
        assert!(!fixture.console.send(CommandSender::Console, "   "));
    }

    #[test]
    fn test_rcon_login_grants_access() {
        let fixture = fixture_with(|config| {
            config.server.enable_rcon = true;
            config.server.rcon_password = "opensesame".to_string();
        });
        let player = connect(&fixture);
        assert!(!player.is_rcon_admin());

        // Wrong password first.
        fixture
            .console
            .send(CommandSender::Player(player.id()), "rcon_login wrong");
        assert!(!player.is_rcon_admin());

        fixture
            .console
            .send(CommandSender::Player(player.id()), "rcon_login opensesame");
        assert!(player.is_rcon_admin());
        let data = player.query_extension::<PlayerConsoleData>().unwrap();
        assert!(data.has_console_access());
    }

    #[test]
    fn test_rcon_disabled_refuses_login() {
        let fixture = fixture_with(|config| {
            config.server.enable_rcon = false;
            config.server.rcon_password = "opensesame".to_string();
        });
        let player = connect(&fixture);
        fixture
            .console
            .send(CommandSender::Player(player.id()), "rcon_login opensesame");
        assert!(!player.is_rcon_admin());
    }

    #[test]
    fn test_exec_requires_trust() {
        let fixture = fixture_with(|_| {});
        let player = connect(&fixture);

        // An unprivileged player cannot exec; the command is still
        // consumed (not leaked to handlers).
        assert!(fixture
            .console
            .send(CommandSender::Player(player.id()), "exec server.cfg"));

        // exit from the console stops the core.
        assert!(fixture.console.send(CommandSender::Console, "exit"));
    }

    #[test]
    fn test_exec_reloads_legacy_config() {
        use std::io::Write;

        let mut path = std::env::temp_dir();
        path.push(format!("exec_{}.cfg", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(b"stream_distance 321.0\n").unwrap();
        }

        let fixture = fixture_with(|_| {});
        let line = format!("exec {}", path.display());
        assert!(fixture.console.send(CommandSender::Console, &line));

        assert_eq!(
            fixture.core.with_config(|config| config.game.stream_distance),
            321.0
        );
        let _ = std::fs::remove_file(&path);
    }
}
