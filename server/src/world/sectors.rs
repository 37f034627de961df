//! The server tile grid, paged in fixed-size sectors.

use skyward_core::geometry::WorldGeometry;
use skyward_core::math::{RectI, Vec2I, Vec2U};
use skyward_core::types::tile::ServerTile;
use std::collections::HashMap;

/// Tiles per sector edge; sectors load and unload as a unit.
pub const SECTOR_SIZE: i32 = 32;

/// Sector address: tile position divided by the sector size.
pub type SectorId = Vec2I;

#[derive(Debug)]
pub struct Sector {
    pub tiles: Vec<ServerTile>,
    /// World tick the sector was last needed by anything.
    pub last_touched: u64,
    /// Set once generation finished; only generated sectors are served.
    pub generated: bool,
}

impl Sector {
    fn new() -> Sector {
        Sector {
            tiles: vec![ServerTile::new(); (SECTOR_SIZE * SECTOR_SIZE) as usize],
            last_touched: 0,
            generated: false,
        }
    }
}

/// A sparse, sector-paged tile array over the world geometry.
pub struct TileSectorArray {
    geometry: WorldGeometry,
    sectors: HashMap<SectorId, Sector>,
    default_tile: ServerTile,
}

impl TileSectorArray {
    pub fn new(size: Vec2U) -> TileSectorArray {
        TileSectorArray {
            geometry: WorldGeometry::new(size),
            sectors: HashMap::new(),
            default_tile: ServerTile::new(),
        }
    }

    pub fn geometry(&self) -> WorldGeometry {
        self.geometry
    }

    pub fn size(&self) -> Vec2U {
        self.geometry.size()
    }

    pub fn sector_for(&self, position: Vec2I) -> SectorId {
        let position = self.geometry.xwrap_vec_i(position);
        Vec2I::new(
            position.x().div_euclid(SECTOR_SIZE),
            position.y().div_euclid(SECTOR_SIZE),
        )
    }

    pub fn sector_region(&self, sector: SectorId) -> RectI {
        RectI::with_size(
            Vec2I::new(sector.x() * SECTOR_SIZE, sector.y() * SECTOR_SIZE),
            Vec2I::new(SECTOR_SIZE, SECTOR_SIZE),
        )
    }

    /// Every sector touching `region`, split across the wrap seam.
    pub fn sectors_for_region(&self, region: RectI) -> Vec<SectorId> {
        let mut sectors = Vec::new();
        for piece in self.geometry.split_rect_i(region) {
            if piece.is_null() || piece.is_empty() {
                continue;
            }
            let min = self.sector_for(piece.min);
            let max_tile = Vec2I::new(piece.x_max() - 1, piece.y_max() - 1);
            let max = Vec2I::new(
                max_tile.x().div_euclid(SECTOR_SIZE),
                max_tile.y().div_euclid(SECTOR_SIZE),
            );
            for x in min.x()..=max.x() {
                for y in min.y()..=max.y() {
                    let id = Vec2I::new(x, y);
                    if !sectors.contains(&id) && self.sector_valid(id) {
                        sectors.push(id);
                    }
                }
            }
        }
        sectors
    }

    fn sector_valid(&self, sector: SectorId) -> bool {
        sector.x() >= 0
            && sector.y() >= 0
            && sector.y() * SECTOR_SIZE < self.geometry.height() as i32
            && (self.geometry.width() == 0
                || sector.x() * SECTOR_SIZE < self.geometry.width() as i32)
    }

    pub fn is_loaded(&self, sector: SectorId) -> bool {
        self.sectors.contains_key(&sector)
    }

    pub fn is_generated(&self, sector: SectorId) -> bool {
        self.sectors.get(&sector).is_some_and(|s| s.generated)
    }

    /// Ensures a sector exists, returning true when it was newly created.
    pub fn load_sector(&mut self, sector: SectorId, tick: u64) -> bool {
        if !self.sector_valid(sector) {
            return false;
        }
        let entry = self.sectors.entry(sector);
        let fresh = matches!(entry, std::collections::hash_map::Entry::Vacant(_));
        let loaded = entry.or_insert_with(Sector::new);
        loaded.last_touched = tick;
        fresh
    }

    pub fn set_sector_generated(&mut self, sector: SectorId) {
        if let Some(loaded) = self.sectors.get_mut(&sector) {
            loaded.generated = true;
        }
    }

    pub fn touch_sector(&mut self, sector: SectorId, tick: u64) {
        if let Some(loaded) = self.sectors.get_mut(&sector) {
            loaded.last_touched = tick;
        }
    }

    /// Removes sectors untouched since `before_tick`, returning them for
    /// persistence.
    pub fn take_stale_sectors(&mut self, before_tick: u64) -> Vec<(SectorId, Sector)> {
        let stale: Vec<SectorId> = self
            .sectors
            .iter()
            .filter(|(_, sector)| sector.last_touched < before_tick)
            .map(|(id, _)| *id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.sectors.remove(&id).map(|sector| (id, sector)))
            .collect()
    }

    pub fn loaded_sectors(&self) -> Vec<SectorId> {
        self.sectors.keys().copied().collect()
    }

    pub fn sector(&self, sector: SectorId) -> Option<&Sector> {
        self.sectors.get(&sector)
    }

    pub fn sector_mut(&mut self, sector: SectorId) -> Option<&mut Sector> {
        self.sectors.get_mut(&sector)
    }

    pub fn insert_sector(&mut self, id: SectorId, sector: Sector) {
        self.sectors.insert(id, sector);
    }

    fn tile_index(position: Vec2I) -> usize {
        let x = position.x().rem_euclid(SECTOR_SIZE);
        let y = position.y().rem_euclid(SECTOR_SIZE);
        (x * SECTOR_SIZE + y) as usize
    }

    /// Tile at `position` if its sector is loaded; out-of-world positions
    /// read as the default (null) tile.
    pub fn tile(&self, position: Vec2I) -> &ServerTile {
        let position = self.geometry.xwrap_vec_i(position);
        let sector = self.sector_for(position);
        match self.sectors.get(&sector) {
            Some(loaded) => &loaded.tiles[Self::tile_index(position)],
            None => &self.default_tile,
        }
    }

    /// Mutable tile access; none when the sector is not loaded.
    pub fn tile_mut(&mut self, position: Vec2I) -> Option<&mut ServerTile> {
        let position = self.geometry.xwrap_vec_i(position);
        let sector = self.sector_for(position);
        self.sectors
            .get_mut(&sector)
            .map(|loaded| &mut loaded.tiles[Self::tile_index(position)])
    }

    pub fn tile_loaded(&self, position: Vec2I) -> bool {
        let position = self.geometry.xwrap_vec_i(position);
        self.sectors.contains_key(&self.sector_for(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array() -> TileSectorArray {
        TileSectorArray::new(Vec2U::new(256, 128))
    }

    #[test]
    fn sector_addressing_wraps_x() {
        let tiles = array();
        assert_eq!(tiles.sector_for(Vec2I::new(0, 0)), Vec2I::new(0, 0));
        assert_eq!(tiles.sector_for(Vec2I::new(33, 40)), Vec2I::new(1, 1));
        assert_eq!(tiles.sector_for(Vec2I::new(-1, 0)), Vec2I::new(7, 0));
        assert_eq!(tiles.sector_for(Vec2I::new(256, 0)), Vec2I::new(0, 0));
    }

    #[test]
    fn load_and_mutate_tile() {
        let mut tiles = array();
        let position = Vec2I::new(40, 40);
        assert!(tiles.tile_mut(position).is_none());

        let sector = tiles.sector_for(position);
        assert!(tiles.load_sector(sector, 1));
        assert!(!tiles.load_sector(sector, 2), "second load reuses");

        tiles.tile_mut(position).unwrap().foreground.material = 9;
        assert_eq!(tiles.tile(position).foreground.material, 9);
        // Unloaded positions read as the default tile
        assert_eq!(
            tiles.tile(Vec2I::new(200, 100)).foreground.material,
            skyward_core::types::material::NULL_MATERIAL_ID
        );
    }

    #[test]
    fn stale_sectors_age_out() {
        let mut tiles = array();
        tiles.load_sector(Vec2I::new(0, 0), 1);
        tiles.load_sector(Vec2I::new(1, 0), 10);
        let stale = tiles.take_stale_sectors(5);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].0, Vec2I::new(0, 0));
        assert!(tiles.is_loaded(Vec2I::new(1, 0)));
    }

    #[test]
    fn region_sectors_cover_the_seam() {
        let tiles = array();
        let region = RectI::from_coords(250, 0, 262, 10);
        let sectors = tiles.sectors_for_region(region);
        assert!(sectors.contains(&Vec2I::new(7, 0)), "{sectors:?}");
        assert!(sectors.contains(&Vec2I::new(0, 0)), "{sectors:?}");
    }

    #[test]
    fn out_of_world_sectors_are_invalid() {
        let mut tiles = array();
        assert!(!tiles.load_sector(Vec2I::new(0, 100), 1));
        assert!(!tiles.load_sector(Vec2I::new(-1, 0), 1));
    }
}
