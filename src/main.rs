//! GrihaIO - Home device control daemon
//!
//! Drives home AV and lighting hardware behind a binary TCP protocol.
//! Drivers are selected by the `[[module]]` entries of the config file and
//! run their own serial I/O threads; the server loop multiplexes all client
//! connections on one thread and applies profiles with per-step hardware
//! confirmation.

use griha_io::config::Config;
use griha_io::driver::create_driver;
use griha_io::error::Result;
use griha_io::model::Registry;
use griha_io::profile::ProfileStore;
use griha_io::server::Server;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `griha-io <path>` (positional)
/// - `griha-io --config <path>` (flag-based)
/// - `griha-io -c <path>` (short flag)
///
/// Defaults to `/etc/griha-io.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/griha-io.toml".to_string()
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = Config::load(&config_path)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    log::info!("GrihaIO starting (config: {})", config_path);

    // Module ids come from load order, so the [[module]] list must stay
    // stable for persisted profile ids to keep resolving.
    let mut registry = Registry::new();
    for module_config in &config.modules {
        let driver = create_driver(module_config)?;
        registry.load(driver)?;
    }
    if config.modules.is_empty() {
        log::warn!("No [[module]] entries configured; serving an empty tree");
    }

    let store = ProfileStore::open(&config.profiles.store_path)?;

    let mut server = Server::bind(&config, registry, store)?;
    server.start_drivers()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| griha_io::Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    server.run(&running);

    log::info!("GrihaIO stopped");
    Ok(())
}
