//! The JSON configuration surface.
//!
//! Everything tunable is read from one JSON document; missing fields fall
//! back to the defaults below. There is no hot reload.

use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use skyward_core::lighting::LightingConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// An account entry in `serverUsers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerUser {
    pub password: String,
    pub admin: bool,
}

/// World fidelity selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum WorldFidelity {
    Minimum,
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub game_server_bind: String,
    pub game_server_port: u16,
    pub server_name: String,
    pub max_players: u32,
    pub max_pending_connections: usize,

    pub storage_directory: PathBuf,

    /// Milliseconds between universe main-loop wakeups.
    pub main_wakeup_interval: u64,
    /// Milliseconds a handshake peer may take per message.
    pub client_wait_limit: u64,
    /// Milliseconds of inbound silence before an idle kick.
    pub connection_timeout: u64,
    /// Milliseconds between triggered storage flushes.
    pub universe_storage_interval: u64,
    /// Milliseconds between coalesced universe clock updates.
    pub clock_update_packet_interval: u64,
    /// Seconds between world server ticks.
    pub server_global_timestep: f32,
    /// Seconds an empty world lingers before shutdown.
    pub world_server_expiry: f32,
    /// Milliseconds a stopped temp world is kept on disk.
    pub temp_world_delete_time: u64,
    /// Seconds a queued in-system flight waits before departing.
    pub queued_flight_wait_time: f64,

    pub worker_pool_threads: usize,
    pub network_worker_threads: usize,

    pub allow_anonymous_connections: bool,
    pub anonymous_connections_are_admin: bool,
    pub allow_assets_mismatch: bool,
    pub assets_digest_override: Option<String>,
    pub compression: crate::packets::CompressionMode,

    pub server_users: HashMap<String, ServerUser>,
    pub banned_ips: Vec<String>,
    pub banned_uuids: Vec<String>,
    pub password_salt_length: usize,

    pub world_fidelity: WorldFidelity,
    pub lighting: LightingConfig,

    /// Species name -> intro instance; empty string means none.
    pub intro_instances: HashMap<String, String>,
    pub known_species: Vec<String>,

    /// Free-form instance world configuration, keyed by instance name.
    pub instance_worlds: Json,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            game_server_bind: "0.0.0.0".into(),
            game_server_port: 21025,
            server_name: "Skyward Server".into(),
            max_players: 8,
            max_pending_connections: 12,
            storage_directory: PathBuf::from("storage"),
            main_wakeup_interval: 100,
            client_wait_limit: 5000,
            connection_timeout: 60_000,
            universe_storage_interval: 60_000,
            clock_update_packet_interval: 500,
            server_global_timestep: 1.0 / 20.0,
            world_server_expiry: 30.0,
            temp_world_delete_time: 7 * 24 * 3600 * 1000,
            queued_flight_wait_time: 5.0,
            worker_pool_threads: 4,
            network_worker_threads: 2,
            allow_anonymous_connections: true,
            anonymous_connections_are_admin: false,
            allow_assets_mismatch: false,
            assets_digest_override: None,
            compression: crate::packets::CompressionMode::Zstd,
            server_users: HashMap::new(),
            banned_ips: Vec::new(),
            banned_uuids: Vec::new(),
            password_salt_length: 24,
            world_fidelity: WorldFidelity::Medium,
            lighting: LightingConfig::default(),
            intro_instances: HashMap::new(),
            known_species: vec![
                "human".into(),
                "avian".into(),
                "floran".into(),
                "hylotl".into(),
            ],
            instance_worlds: Json::Null,
        }
    }
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<ServerConfig> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ServerError::Config(format!(
                "could not read configuration {}: {e}",
                path.as_ref().display()
            ))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| ServerError::Config(format!("malformed configuration: {e}")))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.game_server_bind, self.game_server_port)
    }

    /// The per-instance world configuration for `instance`, if any.
    pub fn instance_world_config(&self, instance: &str) -> Option<&Json> {
        self.instance_worlds.get(instance)
    }

    /// Whether an instance world is persistent (stored under a `unique-`
    /// world file) rather than a temp world.
    pub fn instance_world_persistent(&self, instance: &str) -> bool {
        self.instance_world_config(instance)
            .and_then(|c| c.get("persistent"))
            .and_then(Json::as_bool)
            .unwrap_or(false)
    }

    pub fn intro_instance_for(&self, species: &str) -> Option<&str> {
        self.intro_instances
            .get(species)
            .or_else(|| self.intro_instances.get("default"))
            .map(String::as_str)
            .filter(|instance| !instance.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:21025");
        assert!(config.server_global_timestep > 0.0);
        assert!(config.max_players > 0);
    }

    #[test]
    fn partial_json_overrides_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "gameServerPort": 30000,
                "maxPlayers": 64,
                "serverUsers": {"admin": {"password": "hunter2", "admin": true}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.game_server_port, 30000);
        assert_eq!(config.max_players, 64);
        assert!(config.server_users["admin"].admin);
        assert_eq!(config.main_wakeup_interval, 100);
    }

    #[test]
    fn intro_instance_falls_back_to_default() {
        let mut config = ServerConfig::default();
        config
            .intro_instances
            .insert("default".into(), "protectorate".into());
        config.intro_instances.insert("floran".into(), "".into());
        assert_eq!(config.intro_instance_for("human"), Some("protectorate"));
        assert_eq!(config.intro_instance_for("floran"), None);
    }
}
