use servercore::config::ServerConfig;

fn main() {
    let config = serdeconv::to_toml_string(&ServerConfig::default())
        .expect("Failed to generate config file");

    println!("{}", config);
}
