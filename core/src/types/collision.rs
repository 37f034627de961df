//! Tile collision kinds.

use serde::{Deserialize, Serialize};

/// How a tile participates in collision, ordered by precedence: when
/// multiple sources contribute to one space, the highest kind wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionKind {
    /// Tile outside the world or not yet generated.
    Null,
    None,
    Platform,
    Climbable,
    Dynamic,
    Slippery,
    Block,
}

impl Default for CollisionKind {
    fn default() -> Self {
        CollisionKind::Null
    }
}

impl CollisionKind {
    /// True for kinds that block movement outright.
    pub fn is_solid(&self) -> bool {
        matches!(
            self,
            CollisionKind::Block | CollisionKind::Dynamic | CollisionKind::Slippery
        )
    }

    /// True when the tile obstructs light.
    pub fn is_obstacle(&self) -> bool {
        self.is_solid()
    }

    pub fn from_name(name: &str) -> Option<CollisionKind> {
        match name {
            "null" => Some(CollisionKind::Null),
            "none" => Some(CollisionKind::None),
            "platform" => Some(CollisionKind::Platform),
            "climbable" => Some(CollisionKind::Climbable),
            "dynamic" => Some(CollisionKind::Dynamic),
            "slippery" => Some(CollisionKind::Slippery),
            "block" => Some(CollisionKind::Block),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CollisionKind::Null => "null",
            CollisionKind::None => "none",
            CollisionKind::Platform => "platform",
            CollisionKind::Climbable => "climbable",
            CollisionKind::Dynamic => "dynamic",
            CollisionKind::Slippery => "slippery",
            CollisionKind::Block => "block",
        }
    }
}

/// A set of collision kinds, used by collision queries to select which
/// kinds count as hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollisionSet(u8);

impl CollisionSet {
    pub fn of(kinds: &[CollisionKind]) -> CollisionSet {
        let mut set = CollisionSet(0);
        for kind in kinds {
            set.0 |= 1 << (*kind as u8);
        }
        set
    }

    pub fn contains(&self, kind: CollisionKind) -> bool {
        self.0 & (1 << (kind as u8)) != 0
    }
}

/// The default query set: everything solid plus dynamic platforms.
pub fn default_collision_set() -> CollisionSet {
    CollisionSet::of(&[
        CollisionKind::Block,
        CollisionKind::Dynamic,
        CollisionKind::Slippery,
        CollisionKind::Null,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solidity() {
        assert!(CollisionKind::Block.is_solid());
        assert!(CollisionKind::Slippery.is_solid());
        assert!(!CollisionKind::Platform.is_solid());
        assert!(!CollisionKind::None.is_solid());
    }

    #[test]
    fn set_membership() {
        let set = default_collision_set();
        assert!(set.contains(CollisionKind::Block));
        assert!(!set.contains(CollisionKind::Platform));
    }

    #[test]
    fn name_round_trip() {
        for kind in [
            CollisionKind::Null,
            CollisionKind::None,
            CollisionKind::Platform,
            CollisionKind::Climbable,
            CollisionKind::Dynamic,
            CollisionKind::Slippery,
            CollisionKind::Block,
        ] {
            assert_eq!(CollisionKind::from_name(kind.name()), Some(kind));
        }
    }
}
