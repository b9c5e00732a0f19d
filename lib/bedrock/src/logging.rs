pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

use sloggers::{Config, LoggerConfig};
use std::path::Path;

const DEFAULT_CONFIG: &str = r#"
type = "terminal"
level = "info"
destination = "stderr"
"#;

/// Builds the default terminal logger.
pub fn init() -> Logger {
    let config: LoggerConfig =
        serdeconv::from_toml_str(DEFAULT_CONFIG).expect("Default logging config must parse");
    config.build_logger().expect("Failed building the default logger")
}

/// Builds a logger from a TOML logger config file. Falls back to the default
/// terminal logger when the file is missing or malformed.
pub fn init_from_file<P: AsRef<Path>>(path: P) -> Logger {
    match serdeconv::from_toml_file::<LoggerConfig, _>(path) {
        Ok(config) => match config.build_logger() {
            Ok(logger) => logger,
            Err(_) => init(),
        },
        Err(_) => init(),
    }
}

/// Resolves an optional parent logger into a concrete one, discarding output
/// when no parent was supplied. Used by constructors taking
/// `impl Into<Option<&Logger>>`.
pub fn child_or_discard<'a, L: Into<Option<&'a Logger>>>(log: L) -> Logger {
    match log.into() {
        Some(log) => log.new(o!()),
        None => Logger::root(Discard, o!()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logger_builds() {
        let logger = init();
        info!(logger, "logger smoke test");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let logger = init_from_file("no/such/logger.toml");
        debug!(logger, "fallback logger built");
    }

    #[test]
    fn test_child_or_discard() {
        let root = init();
        let _child = child_or_discard(&root);
        let _discard = child_or_discard(None);
    }
}
