use bedrock::logging::{self, Logger};
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_ARTWORK_PORT: u16 = 7778;

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ServerSection {
    pub name: String,
    pub bind: String,
    pub port: u16,
    pub max_players: usize,
    /// Disconnect idle players after this many milliseconds.
    pub player_timeout: u64,
    pub announce: bool,
    pub enable_query: bool,
    pub enable_rcon: bool,
    pub rcon_password: String,
    pub password: String,
    pub website: String,
    pub language: String,
    pub map_name: String,
    pub mode_name: String,
}

impl Default for ServerSection {
    fn default() -> ServerSection {
        ServerSection {
            name: "game server".to_string(),
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_players: 50,
            player_timeout: 10_000,
            announce: false,
            enable_query: true,
            enable_rcon: false,
            rcon_password: String::new(),
            password: String::new(),
            website: String::new(),
            language: String::new(),
            map_name: String::new(),
            mode_name: String::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GameSection {
    /// Visibility radius for entity streaming.
    pub stream_distance: f32,
    /// Per-player streaming scan interval in milliseconds.
    pub stream_rate: u64,
    pub on_foot_rate: u64,
    pub in_car_rate: u64,
    pub weapon_rate: u64,
    pub use_all_animations: bool,
    pub validate_animations: bool,
    pub gravity: f32,
    pub weather: i32,
}

impl Default for GameSection {
    fn default() -> GameSection {
        GameSection {
            stream_distance: 200.0,
            stream_rate: 1000,
            on_foot_rate: 30,
            in_car_rate: 30,
            weapon_rate: 30,
            use_all_animations: false,
            validate_animations: true,
            gravity: 0.008,
            weather: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ArtworkSection {
    pub enabled: bool,
    /// External CDN base url. When empty, the built-in file server is used.
    pub cdn: String,
    pub models_path: String,
    pub port: u16,
}

impl Default for ArtworkSection {
    fn default() -> ArtworkSection {
        ArtworkSection {
            enabled: false,
            cdn: String::new(),
            models_path: "models".to_string(),
            port: DEFAULT_ARTWORK_PORT,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct PawnSection {
    pub main_scripts: Vec<String>,
    pub side_scripts: Vec<String>,
    pub legacy_plugins: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub game: GameSection,
    pub artwork: ArtworkSection,
    pub pawn: PawnSection,
}

/// A single value translated from the legacy flat config format.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    Int(i64),
    Float(f32),
    Text(String),
    List(Vec<String>),
}

impl ServerConfig {
    /// Loads the TOML config, falling back to defaults (with a warning)
    /// when the file is missing or malformed.
    pub fn load_or_default<P: AsRef<Path>>(path: P, log: &Logger) -> ServerConfig {
        match serdeconv::from_toml_file::<ServerConfig, _>(&path) {
            Ok(config) => config,
            Err(err) => {
                logging::warn!(log, "config not loaded, using defaults";
                               "path" => %path.as_ref().display(),
                               "error" => %err);
                ServerConfig::default()
            }
        }
    }

    /// The transport bind string.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    /// Applies a value under its modern key name. Unknown keys warn and are
    /// skipped; mistyped values warn and keep the previous setting.
    pub fn apply(&mut self, key: &str, value: ConfigValue, log: &Logger) {
        use ConfigValue::*;

        match (key, value) {
            ("server_name", Text(v)) => self.server.name = v,
            ("bind", Text(v)) => self.server.bind = v,
            ("port", Int(v)) => self.server.port = v as u16,
            ("max_players", Int(v)) => self.server.max_players = v.max(1) as usize,
            ("player_timeout", Int(v)) => self.server.player_timeout = v.max(0) as u64,
            ("announce", Int(v)) => self.server.announce = v != 0,
            ("enable_query", Int(v)) => self.server.enable_query = v != 0,
            ("enable_rcon", Int(v)) => self.server.enable_rcon = v != 0,
            ("rcon_password", Text(v)) => self.server.rcon_password = v,
            ("password", Text(v)) => self.server.password = v,
            ("website", Text(v)) => self.server.website = v,
            ("language", Text(v)) => self.server.language = v,
            ("map_name", Text(v)) => self.server.map_name = v,
            ("mode_name", Text(v)) => self.server.mode_name = v,
            ("stream_distance", Float(v)) => self.game.stream_distance = v,
            ("stream_rate", Int(v)) => self.game.stream_rate = v.max(0) as u64,
            ("on_foot_rate", Int(v)) => self.game.on_foot_rate = v.max(0) as u64,
            ("in_car_rate", Int(v)) => self.game.in_car_rate = v.max(0) as u64,
            ("weapon_rate", Int(v)) => self.game.weapon_rate = v.max(0) as u64,
            ("weather", Int(v)) => self.game.weather = v as i32,
            ("gravity", Float(v)) => self.game.gravity = v,
            ("artwork.enabled", Int(v)) => self.artwork.enabled = v != 0,
            ("artwork.cdn", Text(v)) => self.artwork.cdn = v,
            ("artwork.models_path", Text(v)) => self.artwork.models_path = v,
            ("pawn.main_scripts", List(v)) => self.pawn.main_scripts = v,
            ("pawn.side_scripts", List(v)) => self.pawn.side_scripts = v,
            ("pawn.legacy_plugins", List(v)) => self.pawn.legacy_plugins = v,
            (key, value) => {
                logging::warn!(log, "unhandled config key"; "key" => key, "value" => ?value);
            }
        }
    }
}
