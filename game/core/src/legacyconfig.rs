use crate::config::{ConfigValue, ServerConfig};
use bedrock::logging::{self, Logger};
use std::fs;
use std::path::Path;

/// How a legacy key's value is parsed before translation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ParamType {
    Int,
    Float,
    Text,
    TextList,
    Custom,
    Obsolete,
}

const TYPES: &[(&str, ParamType)] = &[
    ("echo", ParamType::Custom),
    ("rcon_password", ParamType::Text),
    ("rcon", ParamType::Int),
    ("gamemode", ParamType::Custom),
    ("filterscripts", ParamType::Custom),
    ("plugins", ParamType::TextList),
    ("announce", ParamType::Int),
    ("query", ParamType::Int),
    ("hostname", ParamType::Text),
    ("language", ParamType::Text),
    ("mapname", ParamType::Text),
    ("gamemodetext", ParamType::Text),
    ("weather", ParamType::Int),
    ("worldtime", ParamType::Obsolete),
    ("gravity", ParamType::Float),
    ("weburl", ParamType::Text),
    ("maxplayers", ParamType::Int),
    ("password", ParamType::Custom),
    ("bind", ParamType::Text),
    ("port", ParamType::Int),
    ("conncookies", ParamType::Obsolete),
    ("playertimeout", ParamType::Int),
    ("output", ParamType::Obsolete),
    ("onfoot_rate", ParamType::Int),
    ("incar_rate", ParamType::Int),
    ("weapon_rate", ParamType::Int),
    ("stream_distance", ParamType::Float),
    ("stream_rate", ParamType::Int),
];

const DICTIONARY: &[(&str, &str)] = &[
    ("rcon", "enable_rcon"),
    ("rcon_password", "rcon_password"),
    ("gamemode", "pawn.main_scripts"),
    ("filterscripts", "pawn.side_scripts"),
    ("plugins", "pawn.legacy_plugins"),
    ("announce", "announce"),
    ("query", "enable_query"),
    ("hostname", "server_name"),
    ("language", "language"),
    ("mapname", "map_name"),
    ("gamemodetext", "mode_name"),
    ("weather", "weather"),
    ("gravity", "gravity"),
    ("weburl", "website"),
    ("maxplayers", "max_players"),
    ("password", "password"),
    ("bind", "bind"),
    ("port", "port"),
    ("playertimeout", "player_timeout"),
    ("onfoot_rate", "on_foot_rate"),
    ("incar_rate", "in_car_rate"),
    ("weapon_rate", "weapon_rate"),
];

fn param_type(name: &str) -> Option<ParamType> {
    TYPES
        .iter()
        .find(|(key, _)| *key == name)
        .map(|&(_, param)| param)
}

fn translate(name: &str) -> Option<&'static str> {
    DICTIONARY
        .iter()
        .find(|(key, _)| *key == name)
        .map(|&(_, modern)| modern)
}

/// Translator for the historical flat `server.cfg` format. Gamemode lines
/// are index-addressed (`gamemode0 .. gamemodeN`) and collected into the
/// script list in index order.
pub struct LegacyConfigLoader {
    gamemodes: Vec<String>,
    log: Logger,
}

impl LegacyConfigLoader {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(log: L) -> LegacyConfigLoader {
        LegacyConfigLoader {
            gamemodes: Vec::new(),
            log: logging::child_or_discard(log),
        }
    }

    /// Reads and applies a legacy config file. Returns whether the file was
    /// readable at all.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P, config: &mut ServerConfig) -> bool {
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                logging::warn!(self.log, "legacy config not readable";
                               "path" => %path.as_ref().display(),
                               "error" => %err);
                return false;
            }
        };

        self.gamemodes.clear();

        for raw in contents.lines() {
            // Strip // and # comments, then surrounding whitespace.
            let mut line = raw;
            if let Some(idx) = line.find("//") {
                line = &line[..idx];
            }
            if let Some(idx) = line.find('#') {
                line = &line[..idx];
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // A name with no value is skipped entirely.
            let (name, right) = match line.find(' ') {
                Some(idx) => (&line[..idx], line[idx + 1..].trim_start()),
                None => continue,
            };

            match param_type(name) {
                Some(ParamType::Custom) => {
                    if !self.process_custom(name, right, config) {
                        logging::warn!(self.log, "parsing unknown legacy option"; "key" => name);
                    }
                }
                Some(ParamType::Obsolete) => {
                    logging::warn!(self.log, "parsing obsolete legacy option"; "key" => name);
                }
                Some(param) => {
                    if !self.process_default(param, name, right, config) {
                        logging::warn!(self.log, "parsing unknown legacy option"; "key" => name);
                    }
                }
                None => {
                    if !self.process_custom(name, right, config) {
                        logging::warn!(self.log, "parsing unknown legacy option"; "key" => name);
                    }
                }
            }
        }

        let scripts: Vec<String> = self
            .gamemodes
            .iter()
            .filter(|gm| !gm.is_empty())
            .cloned()
            .collect();
        if !scripts.is_empty() {
            config.apply("pawn.main_scripts", ConfigValue::List(scripts), &self.log);
        }

        true
    }

    fn process_default(
        &self,
        param: ParamType,
        name: &str,
        right: &str,
        config: &mut ServerConfig,
    ) -> bool {
        let modern = match translate(name) {
            Some(modern) => modern,
            None => return false,
        };

        match param {
            ParamType::Int => match right.parse::<i64>() {
                Ok(value) => config.apply(modern, ConfigValue::Int(value), &self.log),
                Err(_) => {
                    logging::error!(self.log, "legacy value is not an integer";
                                    "key" => name, "value" => right);
                }
            },
            ParamType::Float => match right.parse::<f32>() {
                Ok(value) => config.apply(modern, ConfigValue::Float(value), &self.log),
                Err(_) => {
                    logging::error!(self.log, "legacy value is not a number";
                                    "key" => name, "value" => right);
                }
            },
            ParamType::Text => {
                config.apply(modern, ConfigValue::Text(right.to_string()), &self.log)
            }
            ParamType::TextList => {
                let list: Vec<String> = right
                    .split(' ')
                    .filter(|item| !item.is_empty())
                    .map(|item| item.to_string())
                    .collect();
                config.apply(modern, ConfigValue::List(list), &self.log);
            }
            _ => return false,
        }
        true
    }

    fn process_custom(&mut self, name: &str, right: &str, config: &mut ServerConfig) -> bool {
        if let Some(suffix) = name.strip_prefix("gamemode") {
            // The whole decimal suffix is the slot index, so `gamemode15`
            // addresses slot 15. A bare `gamemode` or a malformed index
            // lands in slot 0.
            let index = suffix.parse::<usize>().unwrap_or(0);
            if index > 1024 {
                logging::warn!(self.log, "gamemode index out of range"; "key" => name);
                return true;
            }
            while self.gamemodes.len() <= index {
                self.gamemodes.push(String::new());
            }
            self.gamemodes[index] = right.to_string();
            return true;
        }

        if name == "filterscripts" {
            let list: Vec<String> = right
                .split(' ')
                .filter(|item| !item.is_empty())
                .map(|item| format!("filterscripts/{}", item))
                .collect();
            config.apply("pawn.side_scripts", ConfigValue::List(list), &self.log);
            return true;
        }

        if name == "echo" {
            logging::info!(self.log, "{}", right);
            return true;
        }

        if name == "password" {
            // A leading '0' means "no password" in the legacy format.
            let password = if right.is_empty() || right.starts_with('0') {
                String::new()
            } else {
                right.to_string()
            };
            config.apply("password", ConfigValue::Text(password), &self.log);
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load(contents: &str) -> ServerConfig {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "legacy_cfg_{}_{:?}.cfg",
            std::process::id(),
            std::thread::current().id()
        ));
        {
            let mut out = fs::File::create(&path).unwrap();
            out.write_all(contents.as_bytes()).unwrap();
        }

        let mut config = ServerConfig::default();
        let mut loader = LegacyConfigLoader::new(None);
        assert!(loader.load_file(&path, &mut config));
        let _ = fs::remove_file(&path);
        config
    }

    #[test]
    fn test_basic_translation() {
        let config = load(
            "maxplayers 100\n\
             hostname my server // trailing comment\n\
             port 8000\n\
             stream_distance 250.5\n\
             rcon 1\n\
             # full comment line\n\
             query 0\n",
        );

        assert_eq!(config.server.max_players, 100);
        assert_eq!(config.server.name, "my server");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.game.stream_distance, 250.5);
        assert!(config.server.enable_rcon);
        assert!(!config.server.enable_query);
    }

    #[test]
    fn test_obsolete_and_unknown_skipped() {
        let config = load("worldtime 12:00\nnosuchkey 5\nmaxplayers 80\n");
        assert_eq!(config.server.max_players, 80);
    }

    #[test]
    fn test_gamemode_slots_in_order() {
        let config = load(
            "gamemode1 second 1\n\
             gamemode0 first 1\n\
             gamemode3 fourth 1\n",
        );
        assert_eq!(
            config.pawn.main_scripts,
            vec!["first 1", "second 1", "fourth 1"]
        );
    }

    #[test]
    fn test_gamemode_two_digit_index() {
        // Double-digit indices must address their own slot, not slot 1.
        let config = load("gamemode15 late 1\ngamemode0 early 1\n");
        assert_eq!(config.pawn.main_scripts, vec!["early 1", "late 1"]);
    }

    #[test]
    fn test_bare_gamemode_lands_in_slot_zero() {
        let config = load("gamemode solo 1\n");
        assert_eq!(config.pawn.main_scripts, vec!["solo 1"]);
    }

    #[test]
    fn test_filterscripts_prefixed() {
        let config = load("filterscripts admintools base\n");
        assert_eq!(
            config.pawn.side_scripts,
            vec!["filterscripts/admintools", "filterscripts/base"]
        );
    }

    #[test]
    fn test_password_zero_means_none() {
        let config = load("password 0\n");
        assert_eq!(config.server.password, "");

        let config = load("password hunter2\n");
        assert_eq!(config.server.password, "hunter2");
    }

    #[test]
    fn test_missing_file() {
        let mut config = ServerConfig::default();
        let mut loader = LegacyConfigLoader::new(None);
        assert!(!loader.load_file("no/such/server.cfg", &mut config));
    }
}
