use std::env;
use std::fs;
use std::path::Path;

const SERVER_CFG_NAME: &str = "server_config.toml";
const LOG_CFG_NAME: &str = "serverrunner.log.toml";

fn main() {
    let source_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();

    let source_path = Path::new(&source_dir).join("config");

    // Navigate three levels up from OUT_DIR to the target directory so the
    // default configs land next to the executable.
    let out_path = Path::new(&out_dir)
        .parent()
        .and_then(|pth| pth.parent())
        .and_then(|pth| pth.parent())
        .expect("Failed navigating to the target directory");

    for name in [SERVER_CFG_NAME, LOG_CFG_NAME].iter() {
        fs::copy(source_path.join(name), out_path.join(name))
            .unwrap_or_else(|err| panic!("Failed to copy {}: {}", name, err));
    }
}
