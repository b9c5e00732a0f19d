use crate::component::{Component, ComponentInfo, ComponentUid, SemanticVersion};
use crate::core::{Core, RpcInHandler};
use crate::player::{ClientVersion, Player, PlayerConnectEventHandler};
use crate::rpcs::{self, id};
use bedrock::logging::{self, Logger};
use quarry::events::EventDispatcher;
use quarry::extensions::{Extension, ExtensionId, ExtensionInfo};
use quarry::net::wire::PacketReader;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::thread;

/// The one user agent the artwork server talks to.
const CLIENT_USER_AGENT: &str = "SAMP/0.3";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModelType {
    Skin = 1,
    Object = 2,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModelFileType {
    Dff = 1,
    Txd = 2,
}

/// One downloadable file with its identity checksum.
#[derive(Clone, Debug)]
pub struct ModelFile {
    pub name: String,
    pub checksum: u32,
    pub size: u32,
}

impl ModelFile {
    fn from_disk(models_path: &str, name: &str) -> Option<ModelFile> {
        let mut path = PathBuf::from(models_path);
        path.push(name);
        let contents = fs::read(&path).ok()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&contents);
        Some(ModelFile {
            name: name.to_string(),
            checksum: hasher.finalize(),
            size: contents.len() as u32,
        })
    }
}

/// A registered custom model: a dff/txd pair replacing `base_id` under a
/// new client-side model id.
pub struct ModelInfo {
    pub model_type: ModelType,
    pub base_id: i32,
    pub new_id: i32,
    pub dff: ModelFile,
    pub txd: ModelFile,
    pub virtual_world: i32,
    pub time_on: u8,
    pub time_off: u8,
}

/// Per-player custom skin choice, kept while the skin's files download.
pub struct PlayerCustomModelsData {
    custom_skin: Cell<u32>,
}

impl PlayerCustomModelsData {
    #[inline]
    pub fn custom_skin(&self) -> u32 {
        self.custom_skin.get()
    }

    #[inline]
    pub fn set_custom_skin(&self, skin: u32) {
        self.custom_skin.set(skin);
    }
}

impl Extension for PlayerCustomModelsData {
    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn reset(&self) {
        self.custom_skin.set(0);
    }
}

impl ExtensionInfo for PlayerCustomModelsData {
    const EXTENSION_ID: ExtensionId = ExtensionId(0xd3e2f572b38fb3f2);
}

pub trait PlayerModelsEventHandler {
    fn on_player_finished_downloading(&self, _player: &Rc<Player>) {}
}

#[derive(Clone)]
struct ArtworkSettings {
    enabled: bool,
    cdn: String,
    models_path: String,
    bind: String,
    port: u16,
}

impl Default for ArtworkSettings {
    fn default() -> ArtworkSettings {
        ArtworkSettings {
            enabled: false,
            cdn: String::new(),
            models_path: "models".to_string(),
            bind: "127.0.0.1".to_string(),
            port: crate::config::DEFAULT_ARTWORK_PORT,
        }
    }
}

/// Custom model registry plus the file-serving side channel. Clients learn
/// the available models at connect, then fetch each file by checksum,
/// either from a configured CDN or from the built-in artwork HTTP server.
pub struct CustomModelsComponent {
    weak: Weak<CustomModelsComponent>,
    storage: RefCell<Vec<Rc<ModelInfo>>>,
    base_models: RefCell<hashbrown::HashMap<i32, i32>>,
    checksums: RefCell<hashbrown::HashMap<u32, (ModelFileType, usize)>>,
    events: EventDispatcher<dyn PlayerModelsEventHandler>,
    settings: RefCell<ArtworkSettings>,
    web_started: Cell<bool>,
    log: RefCell<Logger>,
}

impl CustomModelsComponent {
    pub fn new() -> Rc<CustomModelsComponent> {
        Rc::new_cyclic(|weak| CustomModelsComponent {
            weak: weak.clone(),
            storage: RefCell::new(Vec::new()),
            base_models: RefCell::new(hashbrown::HashMap::new()),
            checksums: RefCell::new(hashbrown::HashMap::new()),
            events: EventDispatcher::new(),
            settings: RefCell::new(ArtworkSettings::default()),
            web_started: Cell::new(false),
            log: RefCell::new(logging::child_or_discard(None)),
        })
    }

    fn handle(&self) -> Rc<CustomModelsComponent> {
        self.weak.upgrade().expect("component outlives its handle")
    }

    #[inline]
    pub fn events(&self) -> &EventDispatcher<dyn PlayerModelsEventHandler> {
        &self.events
    }

    pub fn model_count(&self) -> usize {
        self.storage.borrow().len()
    }

    /// Registers a custom model. Both files must exist under the models
    /// path; a missing file rejects the model (the request is dropped, the
    /// server keeps running).
    pub fn add_model(
        &self,
        model_type: ModelType,
        new_id: i32,
        base_id: i32,
        dff_name: &str,
        txd_name: &str,
        virtual_world: i32,
        time_on: u8,
        time_off: u8,
    ) -> bool {
        let settings = self.settings.borrow().clone();
        if !settings.enabled {
            return false;
        }

        let dff = match ModelFile::from_disk(&settings.models_path, dff_name) {
            Some(dff) => dff,
            None => {
                logging::warn!(self.log.borrow(), "model file unreadable"; "file" => dff_name);
                return false;
            }
        };
        let txd = match ModelFile::from_disk(&settings.models_path, txd_name) {
            Some(txd) => txd,
            None => {
                logging::warn!(self.log.borrow(), "model file unreadable"; "file" => txd_name);
                return false;
            }
        };

        let index = self.storage.borrow().len();
        self.checksums
            .borrow_mut()
            .insert(dff.checksum, (ModelFileType::Dff, index));
        self.checksums
            .borrow_mut()
            .insert(txd.checksum, (ModelFileType::Txd, index));
        self.base_models.borrow_mut().insert(new_id, base_id);

        self.storage.borrow_mut().push(Rc::new(ModelInfo {
            model_type,
            base_id,
            new_id,
            dff,
            txd,
            virtual_world,
            time_on,
            time_off,
        }));
        true
    }

    /// Splits a possibly-custom model id into `(base, custom)`: custom ids
    /// are rewritten to their base for the legacy field, with the custom id
    /// carried separately for DL clients.
    pub fn resolve_base_model(&self, model: i32) -> (i32, i32) {
        match self.base_models.borrow().get(&model) {
            Some(&base) => (base, model),
            None => (model, 0),
        }
    }

    /// Announces every registered model to a DL client.
    pub fn send_model_list(&self, player: &Rc<Player>) {
        if player.client_version() != ClientVersion::Samp03Dl {
            return;
        }

        let storage = self.storage.borrow();
        let count = storage.len() as u32;
        for (index, model) in storage.iter().enumerate() {
            player.send_rpc(
                rpcs::ModelRequest {
                    pool_id: index as u32,
                    count,
                    model_type: model.model_type as u8,
                    virtual_world: model.virtual_world,
                    base_id: model.base_id,
                    new_id: model.new_id,
                    dff_checksum: model.dff.checksum,
                    txd_checksum: model.txd.checksum,
                    dff_size: model.dff.size,
                    txd_size: model.txd.size,
                    time_on: model.time_on,
                    time_off: model.time_off,
                }
                .datagram(),
            );
        }
    }

    fn download_base_url(&self) -> String {
        let settings = self.settings.borrow();
        if !settings.cdn.is_empty() {
            let mut cdn = settings.cdn.clone();
            if !cdn.ends_with('/') {
                cdn.push('/');
            }
            return cdn;
        }
        format!("http://{}:{}/", settings.bind, settings.port)
    }

    fn handle_file_request(&self, player: &Rc<Player>, checksum: u32) {
        let (file_type, index) = match self.checksums.borrow().get(&checksum) {
            Some(&entry) => entry,
            // Unknown checksum: the request is dropped.
            None => return,
        };

        let storage = self.storage.borrow();
        let model = match storage.get(index) {
            Some(model) => model,
            None => return,
        };
        let file = match file_type {
            ModelFileType::Dff => &model.dff,
            ModelFileType::Txd => &model.txd,
        };

        let url = format!("{}{}", self.download_base_url(), file.name);
        player.send_rpc(
            rpcs::ModelUrl {
                url: &url,
                file_type: file_type as u8,
                checksum,
            }
            .datagram(),
        );
    }

    fn start_web_server(&self) {
        let settings = self.settings.borrow().clone();
        if self.web_started.get() || !settings.enabled || !settings.cdn.is_empty() {
            return;
        }
        self.web_started.set(true);

        let root = PathBuf::from(&settings.models_path);
        let address: IpAddr = settings
            .bind
            .parse()
            .unwrap_or_else(|_| IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let port = settings.port;

        // The file server never touches pools; it lives on its own thread
        // for the whole process.
        let spawned = thread::Builder::new()
            .name("artwork-http".to_string())
            .spawn(move || web::serve(address, port, root));
        if let Err(err) = spawned {
            logging::error!(self.log.borrow(), "artwork server failed to start"; "error" => %err);
        }
    }
}

mod web {
    use super::CLIENT_USER_AGENT;
    use rocket::fs::NamedFile;
    use rocket::http::Status;
    use rocket::request::{FromRequest, Outcome, Request};
    use rocket::State;
    use std::net::IpAddr;
    use std::path::PathBuf;

    /// Request guard admitting only the game client.
    pub struct GameClientAgent;

    #[rocket::async_trait]
    impl<'r> FromRequest<'r> for GameClientAgent {
        type Error = ();

        async fn from_request(request: &'r Request<'_>) -> Outcome<GameClientAgent, ()> {
            match request.headers().get_one("User-Agent") {
                Some(agent) if agent == CLIENT_USER_AGENT => Outcome::Success(GameClientAgent),
                _ => Outcome::Error((Status::Unauthorized, ())),
            }
        }
    }

    #[rocket::get("/<file..>")]
    async fn artwork_file(
        _agent: GameClientAgent,
        file: PathBuf,
        root: &State<PathBuf>,
    ) -> Option<NamedFile> {
        NamedFile::open(root.join(file)).await.ok()
    }

    /// Anything that isn't a well-formed client download is a 401.
    #[rocket::catch(default)]
    fn denied() -> Status {
        Status::Unauthorized
    }

    pub fn serve(address: IpAddr, port: u16, root: PathBuf) {
        let config = rocket::Config {
            address,
            port,
            ..rocket::Config::default()
        };

        let server = rocket::custom(config)
            .manage(root)
            .mount("/", rocket::routes![artwork_file])
            .register("/", rocket::catchers![denied]);

        let _ = rocket::execute(server.launch());
    }
}

impl Component for CustomModelsComponent {
    fn uid(&self) -> ComponentUid {
        Self::UID
    }

    fn name(&self) -> &'static str {
        "CustomModels"
    }

    fn version(&self) -> SemanticVersion {
        SemanticVersion::new(0, 1, 0)
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn on_load(&self, core: &Rc<Core>) {
        *self.log.borrow_mut() = core.log().new(logging::o!());

        core.with_config(|config| {
            *self.settings.borrow_mut() = ArtworkSettings {
                enabled: config.artwork.enabled,
                cdn: config.artwork.cdn.clone(),
                models_path: config.artwork.models_path.clone(),
                bind: if config.server.bind == "0.0.0.0" {
                    "127.0.0.1".to_string()
                } else {
                    config.server.bind.clone()
                },
                port: config.artwork.port,
            };
        });

        let this = self.handle();
        core.players()
            .connect_events()
            .add(&(this.clone() as Rc<dyn PlayerConnectEventHandler>));
        core.rpcs()
            .add_handler(id::REQUEST_DFF, &(this.clone() as Rc<dyn RpcInHandler>));
        core.rpcs()
            .add_handler(id::REQUEST_TXD, &(this.clone() as Rc<dyn RpcInHandler>));
        core.rpcs()
            .add_handler(id::FINISH_DOWNLOAD, &(this as Rc<dyn RpcInHandler>));

        self.start_web_server();
    }

    fn reset(&self) {
        self.storage.borrow_mut().clear();
        self.base_models.borrow_mut().clear();
        self.checksums.borrow_mut().clear();
    }
}

impl ComponentInfo for CustomModelsComponent {
    const UID: ComponentUid = 0x15e3cb1e7c77ffff;
}

impl PlayerConnectEventHandler for CustomModelsComponent {
    fn on_player_connect(&self, player: &Rc<Player>) {
        player.extensions().add(Rc::new(PlayerCustomModelsData {
            custom_skin: Cell::new(0),
        }));
        self.send_model_list(player);
    }
}

impl RpcInHandler for CustomModelsComponent {
    fn on_receive(&self, rpc: u8, player: &Rc<Player>, reader: &mut PacketReader) -> bool {
        match rpc {
            id::FINISH_DOWNLOAD => {
                player.send_rpc(rpcs::DownloadCompleted.datagram());
                self.events
                    .dispatch(|handler| handler.on_player_finished_downloading(player));
                true
            }
            id::REQUEST_DFF | id::REQUEST_TXD => {
                let request = match rpcs::RequestModelFile::read(reader) {
                    Ok(request) => request,
                    Err(_) => return false,
                };
                self.handle_file_request(player, request.checksum);
                true
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bans::BanList;
    use crate::config::ServerConfig;
    use bedrock::logging;
    use quarry::net::loopback::LoopbackTransport;
    use std::io::Write;
    use std::time::{Duration, Instant};

    fn models_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("models_{}_{:?}", std::process::id(), thread::current().id()));
        let _ = fs::create_dir_all(&dir);
        for (name, contents) in [("car.dff", b"dffdata".as_ref()), ("car.txd", b"txddata".as_ref())] {
            let mut file = fs::File::create(dir.join(name)).unwrap();
            file.write_all(contents).unwrap();
        }
        dir
    }

    fn fixture() -> (Rc<crate::core::Core>, Rc<LoopbackTransport>, Rc<CustomModelsComponent>, PathBuf) {
        let dir = models_dir();
        let mut config = ServerConfig::default();
        config.artwork.enabled = true;
        config.artwork.cdn = "http://cdn.example.com".to_string();
        config.artwork.models_path = dir.to_string_lossy().to_string();

        let transport = Rc::new(LoopbackTransport::new());
        let core = crate::core::Core::new(
            config,
            transport.clone(),
            BanList::in_memory(),
            logging::child_or_discard(None),
        );
        let models = CustomModelsComponent::new();
        core.components().register(models.clone());
        core.load_components();
        (core, transport, models, dir)
    }

    #[test]
    fn test_add_model_and_resolve() {
        let (_core, _transport, models, dir) = fixture();

        assert!(models.add_model(ModelType::Skin, 20001, 101, "car.dff", "car.txd", -1, 0, 0));
        assert_eq!(models.model_count(), 1);

        assert_eq!(models.resolve_base_model(20001), (101, 20001));
        assert_eq!(models.resolve_base_model(101), (101, 0));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_file_rejected() {
        let (_core, _transport, models, dir) = fixture();
        assert!(!models.add_model(ModelType::Skin, 20001, 101, "nope.dff", "car.txd", -1, 0, 0));
        assert_eq!(models.model_count(), 0);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_checksum_request_gets_cdn_url() {
        let (core, transport, models, dir) = fixture();
        models.add_model(ModelType::Skin, 20001, 101, "car.dff", "car.txd", -1, 0, 0);

        let conn = transport.connect("127.0.0.1:4000".parse().unwrap());
        core.run_once(Duration::from_millis(10), Instant::now());
        let player = core.players().by_connection(conn).unwrap();
        transport.take_sent();

        let checksum = models.storage.borrow()[0].dff.checksum;
        transport.inject(conn, rpcs::RequestModelFile { checksum }.datagram(id::REQUEST_DFF));
        core.run_once(Duration::from_millis(10), Instant::now());

        let sent = transport.take_sent_to(player.connection());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], id::MODEL_URL);

        let mut reader = PacketReader::new(&sent[0][1..]);
        assert_eq!(reader.read_u8().unwrap(), ModelFileType::Dff as u8);
        assert_eq!(reader.read_u32().unwrap(), checksum);
        assert_eq!(reader.read_str8().unwrap(), "http://cdn.example.com/car.dff");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_unknown_checksum_dropped() {
        let (core, transport, _models, dir) = fixture();
        let conn = transport.connect("127.0.0.1:4000".parse().unwrap());
        core.run_once(Duration::from_millis(10), Instant::now());
        transport.take_sent();

        transport.inject(conn, rpcs::RequestModelFile { checksum: 0xdead }.datagram(id::REQUEST_DFF));
        core.run_once(Duration::from_millis(10), Instant::now());
        assert!(transport.take_sent().is_empty());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_model_list_only_for_dl_clients(){
        let (core, transport, models, dir) = fixture();
        models.add_model(ModelType::Skin, 20001, 101, "car.dff", "car.txd", -1, 0, 0);

        let conn = transport.connect("127.0.0.1:4000".parse().unwrap());
        core.run_once(Duration::from_millis(10), Instant::now());
        let player = core.players().by_connection(conn).unwrap();
        transport.take_sent();

        models.send_model_list(&player);
        assert!(transport.take_sent().is_empty());

        player.set_client_version(ClientVersion::Samp03Dl);
        models.send_model_list(&player);
        let sent = transport.take_sent_to(player.connection());
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0], id::MODEL_REQUEST);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_finish_download_acknowledged() {
        struct Listener {
            done: Cell<u32>,
        }

        impl PlayerModelsEventHandler for Listener {
            fn on_player_finished_downloading(&self, _player: &Rc<Player>) {
                self.done.set(self.done.get() + 1);
            }
        }

        let (core, transport, models, dir) = fixture();
        let conn = transport.connect("127.0.0.1:4000".parse().unwrap());
        core.run_once(Duration::from_millis(10), Instant::now());
        transport.take_sent();

        let listener = Rc::new(Listener { done: Cell::new(0) });
        let handler: Rc<dyn PlayerModelsEventHandler> = listener.clone();
        models.events().add(&handler);

        transport.inject(conn, vec![id::FINISH_DOWNLOAD]);
        core.run_once(Duration::from_millis(10), Instant::now());

        assert_eq!(listener.done.get(), 1);
        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1[0], id::DOWNLOAD_COMPLETED);

        let _ = fs::remove_dir_all(dir);
    }
}
