//! World tile state, tile layers, dungeon ids and tile modifications.

use crate::serialization::{DataReader, DataWriter, Readable, Writable};
use crate::types::collision::CollisionKind;
use crate::types::liquid::{LiquidNetUpdate, LiquidStore};
use crate::types::material::{
    MaterialColorVariant, MaterialHue, MaterialId, ModId, DEFAULT_MATERIAL_COLOR_VARIANT,
    NO_MOD_ID, NULL_MATERIAL_ID,
};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Which of the two tile layers an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileLayer {
    Foreground,
    Background,
}

/// Tag grouping tiles by the structure that placed them; also drives tile
/// protection and spawn exclusion.
pub type DungeonId = u16;

pub const NO_DUNGEON_ID: DungeonId = 65535;
/// Marks the world spawn area, which is protected from natural spawns.
pub const SPAWN_DUNGEON_ID: DungeonId = 65534;
/// Marks biome microdungeon tiles.
pub const BIOME_MICRO_DUNGEON_ID: DungeonId = 65533;
/// Tiles placed by players.
pub const CONSTRUCTION_DUNGEON_ID: DungeonId = 65532;
/// Tiles whose natural block was destroyed.
pub const DESTROYED_BLOCK_DUNGEON_ID: DungeonId = 65531;
/// Zero-gravity region markers, plain and protected.
pub const ZERO_G_DUNGEON_ID: DungeonId = 65525;
pub const PROTECTED_ZERO_G_DUNGEON_ID: DungeonId = 65524;
/// Ids at and above this have reserved engine meaning.
pub const FIRST_META_DUNGEON_ID: DungeonId = 65520;

pub fn is_real_dungeon_id(dungeon_id: DungeonId) -> bool {
    dungeon_id < FIRST_META_DUNGEON_ID
}

/// One layer's worth of material state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileLayerState {
    pub material: MaterialId,
    pub hue_shift: MaterialHue,
    pub color_variant: MaterialColorVariant,
    pub material_mod: ModId,
    pub mod_hue_shift: MaterialHue,
}

impl Default for TileLayerState {
    fn default() -> Self {
        TileLayerState {
            material: NULL_MATERIAL_ID,
            hue_shift: 0,
            color_variant: DEFAULT_MATERIAL_COLOR_VARIANT,
            material_mod: NO_MOD_ID,
            mod_hue_shift: 0,
        }
    }
}

/// Full server-side tile state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerTile {
    pub foreground: TileLayerState,
    pub background: TileLayerState,
    pub liquid: LiquidStore,
    pub collision: CollisionKind,
    pub dungeon_id: DungeonId,
    /// Block biome index into the world layout's biome table.
    pub block_biome_index: u8,
    pub environment_biome_index: u8,
    /// Set when the foreground blocks light.
    pub obstacle: bool,
    /// Accumulated damage toward breaking, per layer.
    pub foreground_damage: f32,
    pub background_damage: f32,
}

impl ServerTile {
    pub fn new() -> Self {
        ServerTile {
            dungeon_id: NO_DUNGEON_ID,
            ..ServerTile::default()
        }
    }

    pub fn layer(&self, layer: TileLayer) -> &TileLayerState {
        match layer {
            TileLayer::Foreground => &self.foreground,
            TileLayer::Background => &self.background,
        }
    }

    pub fn layer_mut(&mut self, layer: TileLayer) -> &mut TileLayerState {
        match layer {
            TileLayer::Foreground => &mut self.foreground,
            TileLayer::Background => &mut self.background,
        }
    }

    pub fn material(&self, layer: TileLayer) -> MaterialId {
        self.layer(layer).material
    }

    /// Recomputes the derived collision and obstacle flags from the
    /// foreground material. Obstacle tiles always carry a solid collision
    /// kind; platforms and empties never do.
    pub fn update_collision(&mut self, kind: CollisionKind) {
        self.collision = kind;
        self.obstacle = kind.is_obstacle();
    }

    /// The client-visible slice of this tile.
    pub fn to_net_tile(&self) -> NetTile {
        NetTile {
            foreground: self.foreground.material,
            foreground_hue_shift: self.foreground.hue_shift,
            foreground_color_variant: self.foreground.color_variant,
            foreground_mod: self.foreground.material_mod,
            foreground_mod_hue_shift: self.foreground.mod_hue_shift,
            background: self.background.material,
            background_hue_shift: self.background.hue_shift,
            background_color_variant: self.background.color_variant,
            background_mod: self.background.material_mod,
            background_mod_hue_shift: self.background.mod_hue_shift,
            collision: self.collision,
            dungeon_id: self.dungeon_id,
            liquid: self.liquid.net_update(),
        }
    }
}

/// The tile state replicated to clients.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetTile {
    pub foreground: MaterialId,
    pub foreground_hue_shift: MaterialHue,
    pub foreground_color_variant: MaterialColorVariant,
    pub foreground_mod: ModId,
    pub foreground_mod_hue_shift: MaterialHue,
    pub background: MaterialId,
    pub background_hue_shift: MaterialHue,
    pub background_color_variant: MaterialColorVariant,
    pub background_mod: ModId,
    pub background_mod_hue_shift: MaterialHue,
    pub collision: CollisionKind,
    pub dungeon_id: DungeonId,
    pub liquid: LiquidNetUpdate,
}

impl Writable for NetTile {
    fn write(&self, writer: &mut DataWriter) {
        writer.write_u16(self.foreground);
        writer.write_u8(self.foreground_hue_shift);
        writer.write_u8(self.foreground_color_variant);
        writer.write_u16(self.foreground_mod);
        writer.write_u8(self.foreground_mod_hue_shift);
        writer.write_u16(self.background);
        writer.write_u8(self.background_hue_shift);
        writer.write_u8(self.background_color_variant);
        writer.write_u16(self.background_mod);
        writer.write_u8(self.background_mod_hue_shift);
        writer.write_u8(self.collision as u8);
        writer.write_u16(self.dungeon_id);
        writer.write_u8(self.liquid.liquid);
        writer.write_u8(self.liquid.level);
    }
}

impl Readable for NetTile {
    fn read(reader: &mut DataReader) -> Result<NetTile> {
        Ok(NetTile {
            foreground: reader.read_u16()?,
            foreground_hue_shift: reader.read_u8()?,
            foreground_color_variant: reader.read_u8()?,
            foreground_mod: reader.read_u16()?,
            foreground_mod_hue_shift: reader.read_u8()?,
            background: reader.read_u16()?,
            background_hue_shift: reader.read_u8()?,
            background_color_variant: reader.read_u8()?,
            background_mod: reader.read_u16()?,
            background_mod_hue_shift: reader.read_u8()?,
            collision: collision_from_u8(reader.read_u8()?)?,
            dungeon_id: reader.read_u16()?,
            liquid: LiquidNetUpdate {
                liquid: reader.read_u8()?,
                level: reader.read_u8()?,
            },
        })
    }
}

fn collision_from_u8(v: u8) -> Result<CollisionKind> {
    Ok(match v {
        0 => CollisionKind::Null,
        1 => CollisionKind::None,
        2 => CollisionKind::Platform,
        3 => CollisionKind::Climbable,
        4 => CollisionKind::Dynamic,
        5 => CollisionKind::Slippery,
        6 => CollisionKind::Block,
        _ => {
            return Err(crate::Error::serialization(format!(
                "unknown collision kind {v}"
            )))
        }
    })
}

/// A single requested change to a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TileModification {
    #[serde(rename_all = "camelCase")]
    PlaceMaterial {
        layer: TileLayer,
        material: MaterialId,
        hue_shift: MaterialHue,
        color_variant: MaterialColorVariant,
        collision_override: Option<CollisionKind>,
    },
    #[serde(rename_all = "camelCase")]
    PlaceMod {
        layer: TileLayer,
        material_mod: ModId,
        hue_shift: MaterialHue,
    },
    #[serde(rename_all = "camelCase")]
    PlaceLiquid { liquid: u8, level: f32 },
    #[serde(rename_all = "camelCase")]
    PlaceMaterialColor {
        layer: TileLayer,
        color_variant: MaterialColorVariant,
    },
}

impl TileModification {
    /// The layer a modification touches, when it addresses one.
    pub fn layer(&self) -> Option<TileLayer> {
        match self {
            TileModification::PlaceMaterial { layer, .. }
            | TileModification::PlaceMod { layer, .. }
            | TileModification::PlaceMaterialColor { layer, .. } => Some(*layer),
            TileModification::PlaceLiquid { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::material::EMPTY_MATERIAL_ID;

    #[test]
    fn new_tile_has_no_dungeon() {
        let tile = ServerTile::new();
        assert_eq!(tile.dungeon_id, NO_DUNGEON_ID);
        assert_eq!(tile.foreground.material, NULL_MATERIAL_ID);
    }

    #[test]
    fn obstacle_follows_collision() {
        let mut tile = ServerTile::new();
        tile.update_collision(CollisionKind::Block);
        assert!(tile.obstacle);
        tile.update_collision(CollisionKind::Platform);
        assert!(!tile.obstacle);
        tile.update_collision(CollisionKind::None);
        assert!(!tile.obstacle);
    }

    #[test]
    fn net_tile_round_trip() {
        let mut tile = ServerTile::new();
        tile.foreground.material = 120;
        tile.foreground.hue_shift = 30;
        tile.background.material = EMPTY_MATERIAL_ID;
        tile.update_collision(CollisionKind::Block);
        tile.dungeon_id = 7;
        tile.liquid = LiquidStore::filled(3, 0.5);

        let net = tile.to_net_tile();
        let mut writer = DataWriter::new();
        writer.write(&net);
        let bytes = writer.into_bytes();
        let mut reader = DataReader::new(&bytes);
        let back: NetTile = reader.read().unwrap();
        assert_eq!(net, back);
    }

    #[test]
    fn meta_dungeon_ids_are_not_real() {
        assert!(is_real_dungeon_id(0));
        assert!(is_real_dungeon_id(FIRST_META_DUNGEON_ID - 1));
        assert!(!is_real_dungeon_id(SPAWN_DUNGEON_ID));
        assert!(!is_real_dungeon_id(NO_DUNGEON_ID));
    }
}
