//! Connection and entity id spaces, directions, damage teams.

use serde::{Deserialize, Serialize};
use std::ops::Neg;

/// Entity identifier. Positive ids are server-owned; each client connection
/// owns a negative band for client-authoritative entities.
pub type EntityId = i32;

/// Id 0 is reserved and never names a live entity.
pub const NULL_ENTITY_ID: EntityId = 0;

pub const MIN_SERVER_ENTITY_ID: EntityId = 1;
pub const MAX_SERVER_ENTITY_ID: EntityId = i32::MAX;

/// Connection identifier. The server itself is connection 0.
pub type ConnectionId = u16;

pub const SERVER_CONNECTION_ID: ConnectionId = 0;
pub const MIN_CLIENT_CONNECTION_ID: ConnectionId = 1;
pub const MAX_CLIENT_CONNECTION_ID: ConnectionId = 32767;

/// The negative entity id band owned by a client connection, as
/// `(start, end)` with `start > end`.
pub fn connection_entity_space(connection_id: ConnectionId) -> (EntityId, EntityId) {
    if connection_id == SERVER_CONNECTION_ID {
        (MIN_SERVER_ENTITY_ID, MAX_SERVER_ENTITY_ID)
    } else {
        let band = MAX_SERVER_ENTITY_ID / MAX_CLIENT_CONNECTION_ID as i32;
        let base = -(connection_id as i32) * band;
        (base, base - band + 1)
    }
}

/// Which connection owns `entity_id` under the id-space convention.
pub fn connection_for_entity(entity_id: EntityId) -> ConnectionId {
    if entity_id >= MIN_SERVER_ENTITY_ID {
        SERVER_CONNECTION_ID
    } else if entity_id < 0 {
        let band = MAX_SERVER_ENTITY_ID / MAX_CLIENT_CONNECTION_ID as i32;
        ((-entity_id) / band) as ConnectionId
    } else {
        SERVER_CONNECTION_ID
    }
}

/// Horizontal facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Left,
    Right,
}

impl Direction {
    pub fn from_name(name: &str) -> Option<Direction> {
        match name {
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn numerical(&self) -> i32 {
        match self {
            Direction::Left => -1,
            Direction::Right => 1,
        }
    }
}

impl Neg for Direction {
    type Output = Direction;

    fn neg(self) -> Direction {
        match self {
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

/// Damage grouping; entities on the same team do not hurt each other
/// unless the team type says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamType {
    Null,
    Friendly,
    Enemy,
    Pvp,
    Passive,
    Ghostly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DamageTeam {
    #[serde(rename = "type")]
    pub team_type: TeamType,
    pub team: u16,
}

impl Default for DamageTeam {
    fn default() -> Self {
        DamageTeam {
            team_type: TeamType::Passive,
            team: 0,
        }
    }
}

impl DamageTeam {
    pub fn can_damage(&self, victim: DamageTeam, victim_is_self: bool) -> bool {
        if victim_is_self {
            return false;
        }
        match self.team_type {
            TeamType::Null | TeamType::Passive | TeamType::Ghostly => false,
            TeamType::Friendly => victim.team_type != TeamType::Friendly,
            TeamType::Enemy => {
                victim.team_type != TeamType::Enemy || self.team != victim.team
            }
            TeamType::Pvp => {
                victim.team_type != TeamType::Pvp || self.team == 0 || self.team != victim.team
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_entity_spaces_are_disjoint_and_negative() {
        let (start1, end1) = connection_entity_space(1);
        let (start2, end2) = connection_entity_space(2);
        assert!(start1 < 0 && end1 <= start1);
        assert!(start2 < end1, "bands must not overlap");
        assert!(end2 <= start2);
    }

    #[test]
    fn connection_for_entity_inverts_the_space() {
        for connection in [1u16, 2, 100, 4096] {
            let (start, end) = connection_entity_space(connection);
            assert_eq!(connection_for_entity(start), connection);
            assert_eq!(connection_for_entity(end), connection);
        }
        assert_eq!(connection_for_entity(42), SERVER_CONNECTION_ID);
    }

    #[test]
    fn friendly_teams_do_not_hurt_each_other() {
        let friendly = DamageTeam {
            team_type: TeamType::Friendly,
            team: 0,
        };
        let enemy = DamageTeam {
            team_type: TeamType::Enemy,
            team: 1,
        };
        assert!(!friendly.can_damage(friendly, false));
        assert!(friendly.can_damage(enemy, false));
        assert!(!enemy.can_damage(enemy, false));
        assert!(!friendly.can_damage(enemy, true));
    }
}
