//! Durable per-client server state.

use crate::error::Result;
use crate::packets::NetCompatibilityRules;
use crate::warping::{WarpAction, WarpToWorld};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use skyward_core::math::Vec2F;
use skyward_core::types::celestial::CelestialCoordinate;
use skyward_core::types::game::{ConnectionId, DamageTeam};
use skyward_core::types::time::milliseconds_since_epoch;
use skyward_core::types::versioning::{VersionedJson, VersioningDatabase};
use skyward_core::Uuid;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// The serialized form of a ship world, keyed by chunk name. Carried
/// inside the owning player's client context so the ship follows them.
pub type WorldChunks = BTreeMap<String, Vec<u8>>;

/// Where a ship sits inside a system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SystemLocation {
    #[default]
    None,
    Celestial {
        coordinate: CelestialCoordinate,
    },
    Position {
        position: Vec2F,
    },
}

impl SystemLocation {
    pub fn is_none(&self) -> bool {
        matches!(self, SystemLocation::None)
    }

    pub fn celestial(&self) -> Option<CelestialCoordinate> {
        match self {
            SystemLocation::Celestial { coordinate } => Some(*coordinate),
            _ => None,
        }
    }
}

/// Upgrade state of a player's ship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShipUpgrades {
    pub ship_level: u32,
    pub max_fuel: u32,
    pub crew_size: u32,
    pub fuel_efficiency: f32,
    pub ship_speed: f32,
}

impl Default for ShipUpgrades {
    fn default() -> Self {
        ShipUpgrades {
            ship_level: 0,
            max_fuel: 100,
            crew_size: 2,
            fuel_efficiency: 1.0,
            ship_speed: 30.0,
        }
    }
}

/// The versioned-JSON kind tag for client context files.
pub const CLIENT_CONTEXT_KIND: &str = "ClientContext";
pub const CLIENT_CONTEXT_VERSION: u32 = 1;

/// The persisted slice of a client context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientContextStore {
    pub admin: bool,
    pub team: DamageTeam,
    pub ship_coordinate: CelestialCoordinate,
    pub ship_location: SystemLocation,
    pub ship_upgrades: ShipUpgrades,
    pub revive_warp: Option<WarpToWorld>,
    pub return_warp: Option<WarpToWorld>,
    /// Hex-encoded ship chunks.
    pub ship_chunks: BTreeMap<String, String>,
}

/// Server-side state for one connected client. Lives from successful
/// handshake to post-flush disconnect; the persistent slice round-trips
/// through `<uuid>.clientcontext`.
#[derive(Debug)]
pub struct ClientContext {
    pub client_id: ConnectionId,
    pub remote_address: Option<IpAddr>,
    pub net_rules: NetCompatibilityRules,
    pub player_uuid: Uuid,
    pub player_name: String,
    pub player_species: String,
    pub ship_species: String,
    pub creation_time: i64,

    /// Whether the account may hold admin powers at all.
    pub can_become_admin: bool,
    pub admin: bool,
    pub team: DamageTeam,

    pub ship_upgrades: ShipUpgrades,
    pub ship_chunks: WorldChunks,
    pub ship_coordinate: CelestialCoordinate,
    pub ship_location: SystemLocation,
    /// The system world this client's ship currently occupies.
    pub system_world: Option<skyward_core::math::Vec3I>,

    /// The world the player is currently in, when placed.
    pub player_world: Option<crate::warping::WorldId>,
    pub return_warp: Option<WarpToWorld>,
    pub revive_warp: Option<WarpToWorld>,
    pub orbit_warp_action: Option<WarpAction>,

    /// Bumped every time a context delta is sent, for client-side dedupe.
    pub context_revision: u64,
}

impl ClientContext {
    pub fn new(
        client_id: ConnectionId,
        remote_address: Option<IpAddr>,
        net_rules: NetCompatibilityRules,
        player_uuid: Uuid,
        player_name: String,
        player_species: String,
        ship_species: String,
        can_become_admin: bool,
        ship_chunks: WorldChunks,
    ) -> Self {
        ClientContext {
            client_id,
            remote_address,
            net_rules,
            player_uuid,
            player_name,
            player_species,
            ship_species,
            creation_time: milliseconds_since_epoch(),
            can_become_admin,
            admin: can_become_admin,
            team: DamageTeam::default(),
            ship_upgrades: ShipUpgrades::default(),
            ship_chunks,
            ship_coordinate: CelestialCoordinate::default(),
            ship_location: SystemLocation::None,
            system_world: None,
            player_world: None,
            return_warp: None,
            revive_warp: None,
            orbit_warp_action: None,
            context_revision: 0,
        }
    }

    pub fn descriptive_name(&self) -> String {
        format!(
            "'{}' <{}> ({})",
            self.player_name,
            self.client_id,
            self.remote_address
                .map(|a| a.to_string())
                .unwrap_or_else(|| "local".into())
        )
    }

    /// Registers the context file kind with a versioning database.
    pub fn register_versioning(db: &mut VersioningDatabase) {
        db.register_kind(CLIENT_CONTEXT_KIND, CLIENT_CONTEXT_VERSION);
        db.register_migration(CLIENT_CONTEXT_KIND, 0, |mut content| {
            // v0 stored the damage team as a bare integer
            if let Some(team) = content.get("team").and_then(Json::as_u64) {
                content["team"] = serde_json::json!({"type": "pvp", "team": team});
            }
            Ok(content)
        });
    }

    pub fn store(&self) -> ClientContextStore {
        ClientContextStore {
            admin: self.admin,
            team: self.team,
            ship_coordinate: self.ship_coordinate,
            ship_location: self.ship_location.clone(),
            ship_upgrades: self.ship_upgrades.clone(),
            revive_warp: self.revive_warp.clone(),
            return_warp: self.return_warp.clone(),
            ship_chunks: self
                .ship_chunks
                .iter()
                .map(|(name, data)| (name.clone(), hex_encode(data)))
                .collect(),
        }
    }

    pub fn load_store(&mut self, store: ClientContextStore) {
        self.admin = store.admin && self.can_become_admin;
        self.team = store.team;
        self.ship_coordinate = store.ship_coordinate;
        self.ship_location = store.ship_location;
        self.ship_upgrades = store.ship_upgrades;
        self.revive_warp = store.revive_warp;
        self.return_warp = store.return_warp;
        // Connect-supplied chunks win over stale stored ones
        if self.ship_chunks.is_empty() {
            self.ship_chunks = store
                .ship_chunks
                .into_iter()
                .filter_map(|(name, data)| Some((name, hex_decode(&data)?)))
                .collect();
        }
    }

    pub fn to_versioned(&self, db: &VersioningDatabase) -> Result<VersionedJson> {
        Ok(db.make(CLIENT_CONTEXT_KIND, serde_json::to_value(self.store())?)?)
    }

    pub fn load_versioned(&mut self, db: &VersioningDatabase, stored: VersionedJson) -> Result<()> {
        let content = db.load(CLIENT_CONTEXT_KIND, stored)?;
        self.load_store(serde_json::from_value(content)?);
        Ok(())
    }
}

fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len() / 2)
        .map(|i| u8::from_str_radix(&text[i * 2..i * 2 + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ClientContext {
        let mut context = ClientContext::new(
            1,
            None,
            NetCompatibilityRules::default(),
            Uuid::new(),
            "Kestrel".into(),
            "avian".into(),
            "avian".into(),
            false,
            WorldChunks::new(),
        );
        context.ship_coordinate =
            CelestialCoordinate::planet(skyward_core::math::Vec3I::new(1, 2, 3), 2);
        context.ship_upgrades.ship_level = 3;
        context.ship_chunks.insert("metadata".into(), vec![1, 2, 255]);
        context
    }

    fn versioning() -> VersioningDatabase {
        let mut db = VersioningDatabase::new();
        ClientContext::register_versioning(&mut db);
        db
    }

    #[test]
    fn versioned_store_round_trips() {
        let db = versioning();
        let original = context();
        let stored = original.to_versioned(&db).unwrap();

        let mut loaded = ClientContext::new(
            2,
            None,
            NetCompatibilityRules::default(),
            original.player_uuid,
            original.player_name.clone(),
            original.player_species.clone(),
            original.ship_species.clone(),
            false,
            WorldChunks::new(),
        );
        loaded.load_versioned(&db, stored).unwrap();

        assert_eq!(loaded.ship_coordinate, original.ship_coordinate);
        assert_eq!(loaded.ship_upgrades, original.ship_upgrades);
        assert_eq!(loaded.ship_chunks, original.ship_chunks);
    }

    #[test]
    fn admin_flag_capped_by_account() {
        let db = versioning();
        let mut original = context();
        original.admin = true;
        let stored = original.to_versioned(&db).unwrap();

        let mut loaded = context();
        loaded.can_become_admin = false;
        loaded.load_versioned(&db, stored).unwrap();
        assert!(!loaded.admin, "non-admin accounts cannot load admin state");
    }

    #[test]
    fn hex_codec_round_trips() {
        let data = vec![0u8, 15, 16, 255];
        assert_eq!(hex_decode(&hex_encode(&data)), Some(data));
        assert_eq!(hex_decode("xyz"), None);
    }
}
