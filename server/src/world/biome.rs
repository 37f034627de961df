//! Biome descriptions as the world layout consumes them.
//!
//! The asset system that authors biomes is external; this is the resolved
//! form a world carries, sufficient for block selection, ores and spawns.

use crate::world::spawner::SpawnProfile;
use serde::{Deserialize, Serialize};
use skyward_core::types::liquid::LiquidId;
use skyward_core::types::material::{MaterialHue, MaterialId, ModId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Biome {
    pub base_name: String,
    pub main_block: MaterialId,
    pub sub_blocks: Vec<MaterialId>,
    /// Ore mods with their commonality weights.
    pub ores: Vec<(ModId, f32)>,
    pub hue_shift: MaterialHue,
    pub surface_liquid: LiquidId,
    pub spawn_profile: SpawnProfile,
}

impl Default for Biome {
    fn default() -> Self {
        Biome {
            base_name: String::new(),
            main_block: 1,
            sub_blocks: Vec::new(),
            ores: Vec::new(),
            hue_shift: 0,
            surface_liquid: skyward_core::types::liquid::EMPTY_LIQUID_ID,
            spawn_profile: SpawnProfile::default(),
        }
    }
}

impl Biome {
    pub fn named(base_name: impl Into<String>) -> Biome {
        Biome {
            base_name: base_name.into(),
            ..Biome::default()
        }
    }
}
