//! World identities, warp actions and spawn targets.

use serde::{Deserialize, Serialize};
use skyward_core::math::Vec2F;
use skyward_core::types::celestial::CelestialCoordinate;
use skyward_core::Uuid;
use std::fmt;

/// Identity of an instance world: a named instance, optionally owned by a
/// player and pinned to a difficulty level. `uuid: None` denotes the
/// shared instance of that name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceWorldId {
    pub instance: String,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub level: Option<u32>,
}

impl InstanceWorldId {
    pub fn shared(instance: impl Into<String>) -> Self {
        InstanceWorldId {
            instance: instance.into(),
            uuid: None,
            level: None,
        }
    }

    pub fn owned(instance: impl Into<String>, uuid: Uuid) -> Self {
        InstanceWorldId {
            instance: instance.into(),
            uuid: Some(uuid),
            level: None,
        }
    }

    /// Storage base name; absent components are omitted.
    pub fn file_base(&self) -> String {
        let mut base = self.instance.clone();
        if let Some(uuid) = &self.uuid {
            base.push_str(&format!("-{}", uuid.hex()));
        }
        if let Some(level) = self.level {
            base.push_str(&format!("-{level}"));
        }
        base
    }
}

/// Identity of any world the universe can run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorldId {
    Celestial(CelestialCoordinate),
    ClientShip(Uuid),
    Instance(InstanceWorldId),
}

impl WorldId {
    pub fn parse(text: &str) -> Option<WorldId> {
        let (kind, rest) = text.split_once(':')?;
        match kind {
            "CelestialWorld" => Some(WorldId::Celestial(CelestialCoordinate::parse(rest)?)),
            "ClientShipWorld" => Some(WorldId::ClientShip(Uuid::from_hex(rest).ok()?)),
            "InstanceWorld" => {
                let mut parts = rest.split(':');
                let instance = parts.next()?.to_string();
                let uuid = match parts.next() {
                    None | Some("-") => None,
                    Some(hex) => Some(Uuid::from_hex(hex).ok()?),
                };
                let level = match parts.next() {
                    None | Some("-") => None,
                    Some(level) => Some(level.parse().ok()?),
                };
                Some(WorldId::Instance(InstanceWorldId {
                    instance,
                    uuid,
                    level,
                }))
            }
            _ => None,
        }
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorldId::Celestial(coord) => write!(f, "CelestialWorld:{coord}"),
            WorldId::ClientShip(uuid) => write!(f, "ClientShipWorld:{}", uuid.hex()),
            WorldId::Instance(id) => {
                write!(f, "InstanceWorld:{}", id.instance)?;
                match (&id.uuid, id.level) {
                    (None, None) => Ok(()),
                    (uuid, level) => {
                        match uuid {
                            Some(uuid) => write!(f, ":{}", uuid.hex())?,
                            None => write!(f, ":-")?,
                        }
                        match level {
                            Some(level) => write!(f, ":{level}"),
                            None => Ok(()),
                        }
                    }
                }
            }
        }
    }
}

/// Where within a world a warped player lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SpawnTarget {
    /// The world's default player start.
    #[default]
    Default,
    Position {
        position: Vec2F,
    },
    /// Land on top of the named unique entity.
    UniqueEntity {
        unique_id: String,
    },
    /// A specific x, at the surface.
    X {
        x: f32,
    },
}

/// A fully resolved warp destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarpToWorld {
    pub world: WorldId,
    #[serde(default)]
    pub target: SpawnTarget,
}

/// Client-facing warp shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarpAlias {
    Return,
    OrbitedWorld,
    OwnShip,
}

/// A warp request as it arrives: explicit destination, a player to chase,
/// or an alias resolved against the client's context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WarpAction {
    ToWorld(WarpToWorld),
    ToPlayer { uuid: Uuid },
    Alias { alias: WarpAlias },
}

impl WarpAction {
    pub fn own_ship() -> WarpAction {
        WarpAction::Alias {
            alias: WarpAlias::OwnShip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyward_core::math::Vec3I;

    #[test]
    fn world_id_display_parse_round_trip() {
        let ids = [
            WorldId::Celestial(CelestialCoordinate::planet(Vec3I::new(4, -2, 9), 3)),
            WorldId::ClientShip(Uuid::from_hex(&"cd".repeat(16)).unwrap()),
            WorldId::Instance(InstanceWorldId::shared("outpost")),
            WorldId::Instance(InstanceWorldId {
                instance: "mission1".into(),
                uuid: Some(Uuid::from_hex(&"ab".repeat(16)).unwrap()),
                level: Some(4),
            }),
        ];
        for id in ids {
            let text = id.to_string();
            assert_eq!(WorldId::parse(&text), Some(id), "{text}");
        }
    }

    #[test]
    fn shared_instances_are_equal_without_uuid() {
        assert_eq!(
            InstanceWorldId::shared("outpost"),
            InstanceWorldId::shared("outpost")
        );
        assert_ne!(
            InstanceWorldId::shared("outpost"),
            InstanceWorldId::owned("outpost", Uuid::new())
        );
    }

    #[test]
    fn instance_file_base_omits_absent_parts() {
        assert_eq!(InstanceWorldId::shared("outpost").file_base(), "outpost");
        let owned = InstanceWorldId {
            instance: "mission1".into(),
            uuid: Some(Uuid::from_hex(&"ab".repeat(16)).unwrap()),
            level: Some(2),
        };
        assert_eq!(owned.file_base(), format!("mission1-{}-2", "ab".repeat(16)));
    }

    #[test]
    fn warp_action_serde_round_trip() {
        let action = WarpAction::ToWorld(WarpToWorld {
            world: WorldId::Instance(InstanceWorldId::shared("outpost")),
            target: SpawnTarget::Position {
                position: Vec2F::new(100.0, 200.0),
            },
        });
        let json = serde_json::to_string(&action).unwrap();
        let back: WarpAction = serde_json::from_str(&json).unwrap();
        assert_eq!(action, back);
    }
}
