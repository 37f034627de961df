//! The universe server: connection acceptance, auth, world lifecycle,
//! warps, flights, bans and persistence.

pub mod server;
pub mod settings;
pub mod system_world;

pub use server::UniverseServer;
pub use settings::UniverseSettings;
