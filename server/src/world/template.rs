//! The world template: what every tile of a world means before anything
//! modifies it, plus the celestial database interface that supplies
//! per-world parameters.

use crate::error::Result;
use crate::world::biome::Biome;
use crate::world::layout::{LayerParams, RegionParams, RegionWeighting, WorldLayout};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use skyward_core::math::{Vec2I, Vec2U, Vec3I};
use skyward_core::types::celestial::{
    CelestialBaseInformation, CelestialCoordinate, CelestialParameters,
};
use skyward_core::types::liquid::{LiquidId, EMPTY_LIQUID_ID};
use skyward_core::types::material::MaterialId;
use skyward_core::types::perlin::PerlinConfig;
use skyward_core::types::random::{static_random_u64, RandomSource};

/// Everything the celestial layer must answer for the universe server.
pub trait CelestialDatabase: Send {
    fn base_information(&self) -> CelestialBaseInformation;
    fn parameters(&mut self, coordinate: CelestialCoordinate) -> Option<CelestialParameters>;
    fn update_parameters(
        &mut self,
        coordinate: CelestialCoordinate,
        parameters: CelestialParameters,
    ) -> Result<()>;
    fn children(&mut self, coordinate: CelestialCoordinate) -> Vec<CelestialCoordinate>;
    fn coordinate_valid(&mut self, coordinate: CelestialCoordinate) -> bool;
    /// Random search for a world passing `predicate`, within `range` of
    /// the origin, giving up after `tries`.
    fn find_random_world(
        &mut self,
        tries: usize,
        range: i32,
        predicate: &dyn Fn(&CelestialParameters) -> bool,
    ) -> Option<CelestialCoordinate>;
    /// Serializes pending changes to the backing store.
    fn commit(&mut self) -> Result<()>;
}

/// Procedurally seeded in-memory celestial database backed by one file.
pub struct CelestialMasterDatabase {
    path: Option<std::path::PathBuf>,
    known: std::collections::HashMap<CelestialCoordinate, CelestialParameters>,
    dirty: bool,
}

impl CelestialMasterDatabase {
    pub fn open(path: impl Into<std::path::PathBuf>) -> CelestialMasterDatabase {
        let path = path.into();
        let known = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<Vec<(CelestialCoordinate, CelestialParameters)>>(&text).ok())
            .map(|entries| entries.into_iter().collect())
            .unwrap_or_default();
        CelestialMasterDatabase {
            path: Some(path),
            known,
            dirty: false,
        }
    }

    pub fn memory() -> CelestialMasterDatabase {
        CelestialMasterDatabase {
            path: None,
            known: std::collections::HashMap::new(),
            dirty: false,
        }
    }

    fn coordinate_seed(coordinate: CelestialCoordinate) -> u64 {
        static_random_u64(
            0x57a9_11fe,
            &[
                &(coordinate.location.x() as u64),
                &(coordinate.location.y() as u64),
                &(coordinate.location.z() as u64),
                &(coordinate.planet as u64),
                &(coordinate.satellite as u64),
            ],
        )
    }

    fn generate(coordinate: CelestialCoordinate) -> Option<CelestialParameters> {
        if !coordinate.is_planet() && !coordinate.is_satellite() {
            return None;
        }
        let seed = Self::coordinate_seed(coordinate);
        let mut random = RandomSource::with_seed(seed);
        let world_type = *random
            .rand_from(&["terrestrial", "terrestrial", "terrestrial", "barren"])
            .unwrap_or(&"terrestrial");
        let mut parameters = CelestialParameters::new(
            seed,
            format!("World {coordinate}"),
            world_type,
        );
        parameters.threat_level = (random.randf() * 6.0).floor() + 1.0;
        Some(parameters)
    }
}

impl CelestialDatabase for CelestialMasterDatabase {
    fn base_information(&self) -> CelestialBaseInformation {
        CelestialBaseInformation::default()
    }

    fn parameters(&mut self, coordinate: CelestialCoordinate) -> Option<CelestialParameters> {
        if let Some(known) = self.known.get(&coordinate) {
            return Some(known.clone());
        }
        let generated = Self::generate(coordinate)?;
        self.known.insert(coordinate, generated.clone());
        self.dirty = true;
        Some(generated)
    }

    fn update_parameters(
        &mut self,
        coordinate: CelestialCoordinate,
        parameters: CelestialParameters,
    ) -> Result<()> {
        self.known.insert(coordinate, parameters);
        self.dirty = true;
        Ok(())
    }

    fn children(&mut self, coordinate: CelestialCoordinate) -> Vec<CelestialCoordinate> {
        if coordinate.is_system() {
            (1..=6)
                .map(|planet| CelestialCoordinate::planet(coordinate.location, planet))
                .filter(|&c| self.coordinate_valid(c))
                .collect()
        } else {
            Vec::new()
        }
    }

    fn coordinate_valid(&mut self, coordinate: CelestialCoordinate) -> bool {
        self.parameters(coordinate).is_some()
    }

    fn find_random_world(
        &mut self,
        tries: usize,
        range: i32,
        predicate: &dyn Fn(&CelestialParameters) -> bool,
    ) -> Option<CelestialCoordinate> {
        let mut random = RandomSource::new();
        for _ in 0..tries {
            let coordinate = CelestialCoordinate::planet(
                Vec3I::new(
                    random.rand_int_range(-(range as i64), range as i64) as i32,
                    random.rand_int_range(-(range as i64), range as i64) as i32,
                    random.rand_int_range(-(range as i64), range as i64) as i32,
                ),
                random.rand_int_range(1, 6) as i32,
            );
            if let Some(parameters) = self.parameters(coordinate) {
                if parameters.visitable() && predicate(&parameters) {
                    return Some(coordinate);
                }
            }
        }
        None
    }

    fn commit(&mut self) -> Result<()> {
        if let (Some(path), true) = (&self.path, self.dirty) {
            let entries: Vec<(&CelestialCoordinate, &CelestialParameters)> =
                self.known.iter().collect();
            std::fs::write(path, serde_json::to_string(&entries)?)?;
            self.dirty = false;
        }
        Ok(())
    }
}

/// What one tile position means before modification.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BlockInfo {
    pub terrain: bool,
    pub foreground_cave: bool,
    pub background_cave: bool,
    pub main_block: Option<MaterialId>,
    pub block_biome_index: Option<usize>,
    pub environment_biome_index: Option<usize>,
    pub ocean_liquid: LiquidId,
    pub ocean_liquid_level: i32,
    pub cave_liquid: LiquidId,
    pub cave_liquid_seed_density: f32,
    pub enclose_liquids: bool,
    pub fill_microdungeons: bool,
}

/// Construction parameters for a terrestrial template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerrestrialParameters {
    pub size: Vec2U,
    pub surface_level: i32,
    pub undersurface_level: i32,
    pub core_level: i32,
    pub blend_size: f32,
    pub primary_biome: String,
    pub gravity: f32,
    pub day_length: f32,
    pub player_start_search_y_range: i32,
    pub terrain_noise: PerlinConfig,
    pub cave_noise: PerlinConfig,
}

impl Default for TerrestrialParameters {
    fn default() -> Self {
        TerrestrialParameters {
            size: Vec2U::new(3000, 2000),
            surface_level: 1000,
            undersurface_level: 900,
            core_level: 300,
            blend_size: 30.0,
            primary_biome: "forest".into(),
            gravity: 80.0,
            day_length: 600.0,
            player_start_search_y_range: 40,
            terrain_noise: PerlinConfig {
                octaves: 3,
                frequency: 0.02,
                amplitude: 1.0,
                ..PerlinConfig::default()
            },
            cave_noise: PerlinConfig {
                octaves: 2,
                frequency: 0.08,
                amplitude: 1.0,
                ..PerlinConfig::default()
            },
        }
    }
}

/// A world's immutable semantic description: its layout plus global
/// parameters. Everything generation asks about a tile starts here.
pub struct WorldTemplate {
    size: Vec2U,
    seed: u64,
    world_type: String,
    surface_level: f32,
    undersurface_level: f32,
    gravity: f32,
    day_length: f32,
    threat_level: f32,
    layout: WorldLayout,
    celestial_parameters: Option<CelestialParameters>,
}

impl WorldTemplate {
    /// A terrestrial world: core, underground, subsurface, surface and
    /// atmosphere layers over the primary biome.
    pub fn terrestrial(seed: u64, parameters: &TerrestrialParameters) -> WorldTemplate {
        let mut layout = WorldLayout::new(parameters.size, parameters.blend_size);

        let primary = Biome::named(parameters.primary_biome.clone());
        let region = |biome: &Biome, base: i32, with_terrain: bool| RegionParams {
            base_height: base,
            biome: Some(biome.clone()),
            terrain_noise: with_terrain.then_some(parameters.terrain_noise),
            cave_noise: with_terrain.then_some(parameters.cave_noise),
            ..RegionParams::bare(base)
        };

        // Core
        layout.add_layer(seed, 0, region(&primary, parameters.core_level / 2, true));

        // Underground and subsurface
        let underground = LayerParams {
            min_height: parameters.core_level,
            base_height: (parameters.core_level + parameters.undersurface_level) / 2,
            primary_region: region(
                &primary,
                (parameters.core_level + parameters.undersurface_level) / 2,
                true,
            ),
            primary_sub_region: region(
                &primary,
                (parameters.core_level + parameters.undersurface_level) / 2,
                true,
            ),
            secondary_regions: Vec::new(),
            secondary_sub_regions: Vec::new(),
            secondary_region_size: (0.3, 0.6),
            sub_region_size: (0.2, 0.4),
        };
        layout.add_terrestrial_layer(
            seed,
            &underground,
            &parameters.primary_biome,
            parameters.player_start_search_y_range,
        );

        // Surface
        let surface = LayerParams {
            min_height: parameters.undersurface_level,
            base_height: parameters.surface_level,
            primary_region: region(&primary, parameters.surface_level, true),
            primary_sub_region: region(&primary, parameters.surface_level, true),
            secondary_regions: Vec::new(),
            secondary_sub_regions: Vec::new(),
            secondary_region_size: (0.3, 0.6),
            sub_region_size: (0.2, 0.4),
        };
        layout.add_terrestrial_layer(
            seed,
            &surface,
            &parameters.primary_biome,
            parameters.player_start_search_y_range,
        );

        // Atmosphere and space carry no terrain
        layout.add_layer(
            seed,
            parameters.surface_level + 200,
            RegionParams::bare(parameters.surface_level + 200),
        );
        layout.finalize();

        WorldTemplate {
            size: parameters.size,
            seed,
            world_type: "terrestrial".into(),
            surface_level: parameters.surface_level as f32,
            undersurface_level: parameters.undersurface_level as f32,
            gravity: parameters.gravity,
            day_length: parameters.day_length,
            threat_level: 1.0,
            layout,
            celestial_parameters: None,
        }
    }

    /// Template for a celestial body, seeded from its parameters.
    pub fn from_celestial_parameters(parameters: CelestialParameters) -> WorldTemplate {
        let terrestrial = TerrestrialParameters {
            size: parameters.world_size,
            surface_level: (parameters.world_size.y() / 2) as i32,
            undersurface_level: (parameters.world_size.y() * 2 / 5) as i32,
            core_level: (parameters.world_size.y() / 8) as i32,
            ..TerrestrialParameters::default()
        };
        let mut template = WorldTemplate::terrestrial(parameters.seed, &terrestrial);
        template.world_type = parameters.world_type.clone();
        template.threat_level = parameters.threat_level;
        template.celestial_parameters = Some(parameters);
        template
    }

    pub fn size(&self) -> Vec2U {
        self.size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn world_type(&self) -> &str {
        &self.world_type
    }

    pub fn surface_level(&self) -> f32 {
        self.surface_level
    }

    pub fn undersurface_level(&self) -> f32 {
        self.undersurface_level
    }

    pub fn gravity(&self) -> f32 {
        self.gravity
    }

    pub fn day_length(&self) -> f32 {
        self.day_length
    }

    pub fn threat_level(&self) -> f32 {
        self.threat_level
    }

    pub fn layout(&self) -> &WorldLayout {
        &self.layout
    }

    pub fn layout_mut(&mut self) -> &mut WorldLayout {
        &mut self.layout
    }

    pub fn celestial_parameters(&self) -> Option<&CelestialParameters> {
        self.celestial_parameters.as_ref()
    }

    fn primary_weighting(&self, x: i32, y: i32) -> Option<RegionWeighting> {
        let position = match self.layout.block_noise() {
            Some(noise) => noise.apply(Vec2I::new(x, y), self.size),
            None => Vec2I::new(x, y),
        };
        self.layout
            .get_weighting(position.x(), position.y())
            .into_iter()
            .next()
    }

    /// What the tile at `(x, y)` means: terrain presence, caves, biome
    /// indices and the region's liquid profile.
    pub fn block_info(&self, x: i32, y: i32) -> BlockInfo {
        let Some(weighting) = self.primary_weighting(x, y) else {
            return BlockInfo::default();
        };
        let region = &weighting.region;

        let sample_x = weighting.x_value as f32;
        let sample = |index: Option<usize>, carve: bool| -> bool {
            index
                .and_then(|i| self.layout.terrain_selector(i))
                .map(|selector| {
                    let value = selector.get(sample_x, y as f32);
                    if carve {
                        value > 0.35
                    } else {
                        value > 0.0
                    }
                })
                .unwrap_or(false)
        };

        let terrain = sample(region.terrain_selector, false);
        let main_block = region
            .block_biome_index
            .and_then(|i| self.layout.biome(i))
            .map(|biome| biome.main_block);

        BlockInfo {
            terrain,
            foreground_cave: terrain && sample(region.foreground_cave_selector, true),
            background_cave: terrain && sample(region.background_cave_selector, true),
            main_block,
            block_biome_index: region.block_biome_index,
            environment_biome_index: region.environment_biome_index,
            ocean_liquid: region.region_liquids.ocean_liquid,
            ocean_liquid_level: region.region_liquids.ocean_liquid_level,
            cave_liquid: region.region_liquids.cave_liquid,
            cave_liquid_seed_density: region.region_liquids.cave_liquid_seed_density,
            enclose_liquids: region.region_liquids.enclose_liquids,
            fill_microdungeons: region.region_liquids.fill_microdungeons,
        }
    }

    pub fn biome_at(&self, x: i32, y: i32) -> Option<&std::sync::Arc<Biome>> {
        self.block_info(x, y)
            .block_biome_index
            .and_then(|index| self.layout.biome(index))
    }

    pub fn is_ocean_at(&self, x: i32, y: i32) -> bool {
        let info = self.block_info(x, y);
        info.ocean_liquid != EMPTY_LIQUID_ID && y < info.ocean_liquid_level && !info.terrain
    }

    /// Searches the layout's player start regions for a stand-able
    /// surface column: air above terrain.
    pub fn find_sensible_player_start(&self) -> Option<Vec2I> {
        let mut random = RandomSource::with_seed(static_random_u64(self.seed, &[&"PlayerStart"]));
        let regions = self.layout.player_start_search_regions();
        for _ in 0..(regions.len().max(1) * 32) {
            let Some(region) = random
                .rand_from(regions)
                .copied()
                .or_else(|| self.fallback_start_region())
            else {
                return None;
            };
            if region.is_empty() {
                continue;
            }
            let x = random.rand_int_range(region.x_min() as i64, region.x_max() as i64 - 1) as i32;
            // Scan down the column for the first air-over-terrain step
            for y in (region.y_min().max(1)..region.y_max()).rev() {
                let here = self.block_info(x, y);
                let below = self.block_info(x, y - 1);
                if !here.terrain && below.terrain {
                    return Some(Vec2I::new(x, y));
                }
            }
        }
        None
    }

    fn fallback_start_region(&self) -> Option<skyward_core::math::RectI> {
        Some(skyward_core::math::RectI::from_coords(
            0,
            (self.undersurface_level as i32).max(0),
            self.size.x() as i32,
            self.size.y() as i32,
        ))
    }

    /// Persistent form; the layout carries all derived state.
    pub fn to_store(&self) -> Result<Json> {
        Ok(serde_json::json!({
            "size": self.size,
            "seed": self.seed,
            "worldType": self.world_type,
            "surfaceLevel": self.surface_level,
            "undersurfaceLevel": self.undersurface_level,
            "gravity": self.gravity,
            "dayLength": self.day_length,
            "threatLevel": self.threat_level,
            "layout": serde_json::to_value(&self.layout)?,
            "celestialParameters": self.celestial_parameters,
        }))
    }

    pub fn from_store(store: &Json) -> Result<WorldTemplate> {
        Ok(WorldTemplate {
            size: serde_json::from_value(store["size"].clone())?,
            seed: store["seed"].as_u64().unwrap_or(0),
            world_type: store["worldType"].as_str().unwrap_or("terrestrial").into(),
            surface_level: store["surfaceLevel"].as_f64().unwrap_or(0.0) as f32,
            undersurface_level: store["undersurfaceLevel"].as_f64().unwrap_or(0.0) as f32,
            gravity: store["gravity"].as_f64().unwrap_or(80.0) as f32,
            day_length: store["dayLength"].as_f64().unwrap_or(600.0) as f32,
            threat_level: store["threatLevel"].as_f64().unwrap_or(1.0) as f32,
            layout: serde_json::from_value(store["layout"].clone())?,
            celestial_parameters: store
                .get("celestialParameters")
                .filter(|v| !v.is_null())
                .map(|v| serde_json::from_value(v.clone()))
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> WorldTemplate {
        WorldTemplate::terrestrial(
            4242,
            &TerrestrialParameters {
                size: Vec2U::new(1000, 800),
                surface_level: 400,
                undersurface_level: 350,
                core_level: 100,
                ..TerrestrialParameters::default()
            },
        )
    }

    #[test]
    fn deep_tiles_have_terrain_and_sky_does_not() {
        let template = template();
        let deep = template.block_info(500, 10);
        assert!(deep.terrain, "core is solid");
        let sky = template.block_info(500, 780);
        assert!(!sky.terrain, "space layer is empty");
    }

    #[test]
    fn block_info_is_deterministic() {
        let a = template();
        let b = template();
        for (x, y) in [(0, 10), (500, 390), (999, 420)] {
            assert_eq!(a.block_info(x, y), b.block_info(x, y));
        }
    }

    #[test]
    fn player_start_is_on_the_surface() {
        let template = template();
        let start = template.find_sensible_player_start().expect("start found");
        let here = template.block_info(start.x(), start.y());
        let below = template.block_info(start.x(), start.y() - 1);
        assert!(!here.terrain);
        assert!(below.terrain);
    }

    #[test]
    fn store_round_trip_preserves_block_info() {
        let template = template();
        let store = template.to_store().unwrap();
        let back = WorldTemplate::from_store(&store).unwrap();
        assert_eq!(back.size(), template.size());
        for (x, y) in [(10, 10), (400, 380), (900, 500)] {
            assert_eq!(back.block_info(x, y), template.block_info(x, y));
        }
    }

    #[test]
    fn celestial_database_is_stable_per_coordinate() {
        let mut db = CelestialMasterDatabase::memory();
        let coordinate = CelestialCoordinate::planet(Vec3I::new(3, 4, 5), 2);
        let first = db.parameters(coordinate).unwrap();
        let second = db.parameters(coordinate).unwrap();
        assert_eq!(first, second);
        assert!(db.parameters(CelestialCoordinate::system(Vec3I::new(3, 4, 5))).is_none());
    }
}
