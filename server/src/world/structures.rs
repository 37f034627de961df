//! Pre-drawn world structures, notably a world's single optional central
//! structure.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use skyward_core::math::{RectI, Vec2I};
use skyward_core::types::game::{Direction, EntityId};
use skyward_core::types::material::MaterialId;
use skyward_core::types::tile::TileLayer;

/// One block a structure paints.
///
/// Residual blocks survive structure removal; everything else is cleaned
/// up when the structure goes away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructureBlock {
    pub position: Vec2I,
    pub material: MaterialId,
    pub layer: TileLayer,
    pub residual: bool,
}

impl Default for StructureBlock {
    fn default() -> Self {
        StructureBlock {
            position: Vec2I::zero(),
            material: 0,
            layer: TileLayer::Foreground,
            residual: false,
        }
    }
}

/// One object a structure places.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StructureObject {
    pub position: Vec2I,
    pub name: String,
    pub direction: Direction,
    pub parameters: Json,
    pub residual: bool,
}

/// An authored structure: blocks and objects relative to an anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldStructure {
    pub anchor_position: Vec2I,
    pub blocks: Vec<StructureBlock>,
    pub objects: Vec<StructureObject>,
    /// Entity ids of the objects the structure introduced, filled in at
    /// placement so removal can find them again.
    #[serde(skip)]
    pub placed_object_entities: Vec<EntityId>,
}

impl WorldStructure {
    pub fn from_json(config: &Json) -> WorldStructure {
        serde_json::from_value(config.clone()).unwrap_or_default()
    }

    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }

    /// The structure translated so its anchor lands on `position`.
    pub fn translated_to(&self, position: Vec2I) -> WorldStructure {
        let offset = position - self.anchor_position;
        WorldStructure {
            anchor_position: position,
            blocks: self
                .blocks
                .iter()
                .map(|block| StructureBlock {
                    position: block.position + offset,
                    ..block.clone()
                })
                .collect(),
            objects: self
                .objects
                .iter()
                .map(|object| StructureObject {
                    position: object.position + offset,
                    ..object.clone()
                })
                .collect(),
            placed_object_entities: Vec::new(),
        }
    }

    /// Bounding region of every block the structure paints.
    pub fn region(&self) -> RectI {
        let mut region = RectI::null();
        for block in &self.blocks {
            region.combine_point(block.position);
            region.combine_point(block.position + Vec2I::new(1, 1));
        }
        region
    }

    /// The blocks removal should erase: everything not residual.
    pub fn removable_blocks(&self) -> impl Iterator<Item = &StructureBlock> {
        self.blocks.iter().filter(|block| !block.residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn structure() -> WorldStructure {
        WorldStructure {
            anchor_position: Vec2I::new(10, 10),
            blocks: vec![
                StructureBlock {
                    position: Vec2I::new(10, 10),
                    material: 5,
                    layer: TileLayer::Foreground,
                    residual: false,
                },
                StructureBlock {
                    position: Vec2I::new(11, 10),
                    material: 5,
                    layer: TileLayer::Foreground,
                    residual: true,
                },
            ],
            objects: vec![StructureObject {
                position: Vec2I::new(10, 11),
                name: "beacon".into(),
                direction: Direction::Left,
                parameters: json!({}),
                residual: false,
            }],
            placed_object_entities: Vec::new(),
        }
    }

    #[test]
    fn translation_moves_everything_with_the_anchor() {
        let moved = structure().translated_to(Vec2I::new(100, 50));
        assert_eq!(moved.anchor_position, Vec2I::new(100, 50));
        assert_eq!(moved.blocks[0].position, Vec2I::new(100, 50));
        assert_eq!(moved.blocks[1].position, Vec2I::new(101, 50));
        assert_eq!(moved.objects[0].position, Vec2I::new(100, 51));
    }

    #[test]
    fn only_non_residual_blocks_are_removable() {
        let structure = structure();
        let removable: Vec<_> = structure.removable_blocks().collect();
        assert_eq!(removable.len(), 1);
        assert!(!removable[0].residual);
    }

    #[test]
    fn json_round_trip() {
        let original = structure();
        let back = WorldStructure::from_json(&original.to_json());
        assert_eq!(original, back);
    }

    #[test]
    fn region_covers_all_blocks() {
        let region = structure().region();
        assert_eq!(region, RectI::from_coords(10, 10, 12, 11));
    }
}
