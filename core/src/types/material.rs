//! Material and mod id bands.
//!
//! Real materials occupy the low id range; ids at and above
//! [`FIRST_META_MATERIAL_ID`] are configurable meta materials, and ids at
//! and above [`FIRST_ENGINE_META_MATERIAL_ID`] have engine-fixed meaning.

pub type MaterialId = u16;
pub type ModId = u16;

/// Hue shift stored per tile; a linear 0-255 mapping of 0-360 degrees.
pub type MaterialHue = u8;

pub type MaterialColorVariant = u8;

/// Empty and non-colliding.
pub const EMPTY_MATERIAL_ID: MaterialId = 65535;

/// Empty and colliding; the generation placeholder that must never survive
/// into a served sector.
pub const NULL_MATERIAL_ID: MaterialId = 65534;

/// Invisible colliding material for pre-drawn world structures.
pub const STRUCTURE_MATERIAL_ID: MaterialId = 65533;

/// Placeholders for the biome native ground material, variants 5 down to 0.
pub const BIOME5_MATERIAL_ID: MaterialId = 65532;
pub const BIOME4_MATERIAL_ID: MaterialId = 65531;
pub const BIOME3_MATERIAL_ID: MaterialId = 65530;
pub const BIOME2_MATERIAL_ID: MaterialId = 65529;
pub const BIOME1_MATERIAL_ID: MaterialId = 65528;
pub const BIOME_MATERIAL_ID: MaterialId = 65527;

/// Invisible walls that cannot be attached to.
pub const BOUNDARY_MATERIAL_ID: MaterialId = 65526;

/// Solid and platform surfaces registered by placed objects.
pub const OBJECT_SOLID_MATERIAL_ID: MaterialId = 65500;
pub const OBJECT_PLATFORM_MATERIAL_ID: MaterialId = 65501;

/// Ids at and above this are engine-specified meta materials.
pub const FIRST_ENGINE_META_MATERIAL_ID: MaterialId = 65500;

/// Ids in `[FIRST_META_MATERIAL_ID, FIRST_ENGINE_META_MATERIAL_ID)` are
/// configurable meta materials.
pub const FIRST_META_MATERIAL_ID: MaterialId = 65000;

pub const DEFAULT_MATERIAL_COLOR_VARIANT: MaterialColorVariant = 0;
pub const MAX_MATERIAL_COLOR_VARIANT: MaterialColorVariant = 8;

/// Tile has no mod.
pub const NO_MOD_ID: ModId = 65535;

/// Placeholder for the biome native ground mod.
pub const BIOME_MOD_ID: ModId = 65534;

/// Placeholder for the underground biome native ground mod.
pub const UNDERGROUND_BIOME_MOD_ID: ModId = 65533;

/// Mod ids at and above this are reserved.
pub const FIRST_META_MOD_ID: ModId = 65520;

pub fn is_real_material(material: MaterialId) -> bool {
    material < FIRST_META_MATERIAL_ID
}

pub fn is_biome_material(material: MaterialId) -> bool {
    (BIOME_MATERIAL_ID..=BIOME5_MATERIAL_ID).contains(&material)
}

pub fn is_real_mod(mod_id: ModId) -> bool {
    mod_id < FIRST_META_MOD_ID
}

pub fn is_connectable_material(material: MaterialId) -> bool {
    material != EMPTY_MATERIAL_ID && material != NULL_MATERIAL_ID && material != BOUNDARY_MATERIAL_ID
}

pub fn material_hue_to_degrees(hue: MaterialHue) -> f32 {
    hue as f32 * 360.0 / 255.0
}

pub fn material_hue_from_degrees(degrees: f32) -> MaterialHue {
    ((degrees % 360.0) * 255.0 / 360.0) as MaterialHue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_bands_are_ordered() {
        assert!(FIRST_META_MATERIAL_ID < FIRST_ENGINE_META_MATERIAL_ID);
        assert!(is_real_material(0));
        assert!(is_real_material(FIRST_META_MATERIAL_ID - 1));
        assert!(!is_real_material(EMPTY_MATERIAL_ID));
        assert!(!is_real_material(OBJECT_SOLID_MATERIAL_ID));
        assert!(is_biome_material(BIOME_MATERIAL_ID));
        assert!(!is_biome_material(BOUNDARY_MATERIAL_ID));
    }

    #[test]
    fn hue_mapping_round_trips_endpoints() {
        assert_eq!(material_hue_from_degrees(0.0), 0);
        assert_eq!(material_hue_to_degrees(255), 360.0);
        let mid = material_hue_from_degrees(180.0);
        assert!((material_hue_to_degrees(mid) - 180.0).abs() < 2.0);
    }
}
