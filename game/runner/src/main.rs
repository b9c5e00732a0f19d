use bedrock::logging;
use clap::{Arg, ArgAction, Command};
use quarry::net::endpoint::UdpEndpoint;
use servercore::actors::ActorsComponent;
use servercore::bans::BanList;
use servercore::checkpoints::CheckpointsComponent;
use servercore::classes::ClassesComponent;
use servercore::config::ServerConfig;
use servercore::console::ConsoleComponent;
use servercore::core::Core;
use servercore::dialogs::DialogsComponent;
use servercore::gangzones::GangZonesComponent;
use servercore::legacyconfig::LegacyConfigLoader;
use servercore::models::CustomModelsComponent;
use servercore::objects::ObjectsComponent;
use servercore::pickups::PickupsComponent;
use servercore::textlabels::TextLabelsComponent;
use servercore::vehicles::VehiclesComponent;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

const LOG_CONFIG: &str = "serverrunner.log.toml";
const BAN_FILE: &str = "samp.ban";

fn main() {
    let matches = Command::new("serverrunner")
        .about("Runs the game server.")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Path to the server config file")
                .default_value("server_config.toml"),
        )
        .arg(
            Arg::new("legacy-config")
                .long("legacy-config")
                .value_name("FILE")
                .help("Legacy flat config file applied on top of the native one"),
        )
        .arg(
            Arg::new("gen-config")
                .long("gen-config")
                .help("Print the default config and exit")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("gen-config") {
        let config =
            serdeconv::to_toml_string(&ServerConfig::default()).expect("Default config serializes");
        println!("{}", config);
        return;
    }

    let log = logging::init_from_file(LOG_CONFIG);

    let config_path = matches
        .get_one::<String>("config")
        .expect("config has a default");
    let mut config = ServerConfig::load_or_default(config_path, &log);

    // A legacy config, when given, overrides the native file.
    let legacy_path = matches.get_one::<String>("legacy-config").cloned();
    if let Some(path) = &legacy_path {
        let mut loader = LegacyConfigLoader::new(&log);
        loader.load_file(path, &mut config);
    }

    let bind = config.bind_address();
    let timeout = Duration::from_millis(config.server.player_timeout);
    let transport = match UdpEndpoint::new(&bind, timeout, &log) {
        Ok(endpoint) => Rc::new(endpoint),
        Err(err) => {
            logging::error!(log, "failed binding transport"; "bind" => %bind, "error" => %err);
            return;
        }
    };
    logging::info!(log, "transport bound"; "bind" => %bind);

    let bans = BanList::load(PathBuf::from(BAN_FILE), &log);
    let core = Core::new(config, transport, bans, log);
    if let Some(path) = legacy_path {
        core.set_legacy_config_path(path.into());
    }

    // The component manifest. Statically linked; registration order is
    // load and dispatch order.
    core.components().register(CustomModelsComponent::new());
    core.components().register(ActorsComponent::new());
    core.components().register(VehiclesComponent::new());
    core.components().register(PickupsComponent::new());
    core.components().register(TextLabelsComponent::new());
    core.components().register(ObjectsComponent::new());
    core.components().register(GangZonesComponent::new());
    core.components().register(CheckpointsComponent::new());
    core.components().register(ClassesComponent::new());
    core.components().register(DialogsComponent::new());
    core.components().register(ConsoleComponent::new());

    core.load_components();
    core.run();
}
