use anyhow::Context;
use log::info;
use skyward_server::config::ServerConfig;
use skyward_server::universe::UniverseServer;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Skyward Server {}", skyward_core::VERSION);
    info!(
        "protocol version {}",
        skyward_server::packets::PROTOCOL_VERSION
    );

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => ServerConfig::default(),
    };

    info!("bind address: {}", config.bind_address());
    info!("storage directory: {}", config.storage_directory.display());
    info!("max players: {}", config.max_players);

    let universe = UniverseServer::new(config).context("starting universe server")?;
    universe.run().context("universe server loop")?;

    info!("server stopped");
    Ok(())
}
