//! The dungeon generator: pre-authored parts composed via directional
//! connectors under rule predicates.

pub mod brushes;
pub mod rules;
pub mod writer;

pub use brushes::{Brush, Phase};
pub use rules::Rule;
pub use writer::{DungeonGeneratorWorldFacade, DungeonGeneratorWriter};

use crate::error::{Result, ServerError};
use log::{debug, info};
use serde_json::Value as Json;
use skyward_core::math::{RectI, Vec2I, Vec2U};
use skyward_core::types::random::RandomSource;
use skyward_core::types::tile::DungeonId;
use skyward_core::types::weighted_pool::WeightedPool;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Connector facing. `Unknown` is resolved from the tile's position at
/// part read time; `Any` mates with every direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorDirection {
    Left,
    Right,
    Up,
    Down,
    Unknown,
    Any,
}

impl ConnectorDirection {
    fn from_name(name: &str) -> ConnectorDirection {
        match name {
            "left" => ConnectorDirection::Left,
            "right" => ConnectorDirection::Right,
            "up" => ConnectorDirection::Up,
            "down" => ConnectorDirection::Down,
            "any" => ConnectorDirection::Any,
            _ => ConnectorDirection::Unknown,
        }
    }

    fn opposite(&self) -> ConnectorDirection {
        match self {
            ConnectorDirection::Left => ConnectorDirection::Right,
            ConnectorDirection::Right => ConnectorDirection::Left,
            ConnectorDirection::Up => ConnectorDirection::Down,
            ConnectorDirection::Down => ConnectorDirection::Up,
            other => *other,
        }
    }

    fn delta(&self) -> Vec2I {
        match self {
            ConnectorDirection::Left => Vec2I::new(-1, 0),
            ConnectorDirection::Right => Vec2I::new(1, 0),
            ConnectorDirection::Up => Vec2I::new(0, 1),
            ConnectorDirection::Down => Vec2I::new(0, -1),
            _ => Vec2I::new(0, 0),
        }
    }

    fn mates_with(&self, other: ConnectorDirection) -> bool {
        match (self, other) {
            (ConnectorDirection::Any, _) | (_, ConnectorDirection::Any) => true,
            _ => self.opposite() == other,
        }
    }
}

/// The connector annotation carried on a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileConnector {
    pub value: String,
    pub forward_only: bool,
    pub direction: ConnectorDirection,
}

/// A connector discovered on a part: where it sits and how it mates.
#[derive(Debug, Clone)]
pub struct Connector {
    pub value: String,
    pub forward_only: bool,
    pub direction: ConnectorDirection,
    /// Tile offset of the connector within its part.
    pub offset: Vec2I,
}

impl Connector {
    /// Whether this connector can attach onto `open`. A forward-only
    /// connector may open outward but never be entered.
    pub fn connects_to(&self, open: &Connector) -> bool {
        self.value == open.value
            && self.direction.mates_with(open.direction)
            && !self.forward_only
    }
}

/// One tile of a part.
#[derive(Debug, Clone, Default)]
pub struct PartTile {
    pub brushes: Vec<Brush>,
    pub rules: Vec<Rule>,
    pub connector: Option<TileConnector>,
}

impl PartTile {
    fn uses_places(&self) -> bool {
        !self.brushes.is_empty()
    }
}

/// A rectangular pre-authored tile template.
#[derive(Debug, Clone)]
pub struct Part {
    name: String,
    size: Vec2U,
    anchor_point: Vec2I,
    chance: f32,
    mark_dungeon_id: bool,
    clear_anchored_objects: bool,
    rules: Vec<Rule>,
    tiles: Vec<(Vec2I, PartTile)>,
    connectors: Vec<Arc<Connector>>,
}

impl Part {
    /// Reads a part definition: a row/legend tile grid plus part options.
    /// Rows are listed top-down; tile y grows upward.
    pub fn from_json(config: &Json) -> Result<Part> {
        let name = config
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| ServerError::Dungeon("part missing name".into()))?
            .to_string();

        let def = config
            .get("def")
            .ok_or_else(|| ServerError::Dungeon(format!("part '{name}' missing def")))?;
        let rows: Vec<&str> = def
            .get("rows")
            .and_then(Json::as_array)
            .map(|rows| rows.iter().filter_map(Json::as_str).collect())
            .unwrap_or_default();
        let legend = def.get("legend").cloned().unwrap_or(Json::Null);

        let height = rows.len() as u32;
        let width = rows.iter().map(|r| r.chars().count()).max().unwrap_or(0) as u32;

        let mut legend_tiles: HashMap<char, PartTile> = HashMap::new();
        if let Some(entries) = legend.as_object() {
            for (key, tile_config) in entries {
                let symbol = key.chars().next().ok_or_else(|| {
                    ServerError::Dungeon(format!("part '{name}' has empty legend key"))
                })?;
                let brushes = tile_config
                    .get("brushes")
                    .map(Brush::read_brushes)
                    .transpose()?
                    .unwrap_or_default();
                let tile_rules = tile_config
                    .get("rules")
                    .map(Rule::read_rules)
                    .transpose()?
                    .unwrap_or_default();
                let connector = tile_config.get("connector").map(|c| TileConnector {
                    value: c
                        .get("value")
                        .and_then(Json::as_str)
                        .unwrap_or("default")
                        .to_string(),
                    forward_only: c
                        .get("forwardOnly")
                        .and_then(Json::as_bool)
                        .unwrap_or(false),
                    direction: c
                        .get("direction")
                        .and_then(Json::as_str)
                        .map(ConnectorDirection::from_name)
                        .unwrap_or(ConnectorDirection::Unknown),
                });
                legend_tiles.insert(
                    symbol,
                    PartTile {
                        brushes,
                        rules: tile_rules,
                        connector,
                    },
                );
            }
        }

        let mut tiles: Vec<(Vec2I, PartTile)> = Vec::new();
        for (row_index, row) in rows.iter().enumerate() {
            let y = (height as i32 - 1) - row_index as i32;
            for (x, symbol) in row.chars().enumerate() {
                if let Some(tile) = legend_tiles.get(&symbol) {
                    if !tile.brushes.is_empty() || !tile.rules.is_empty() || tile.connector.is_some()
                    {
                        tiles.push((Vec2I::new(x as i32, y), tile.clone()));
                    }
                }
            }
        }

        let mut part = Part {
            name,
            size: Vec2U::new(width, height),
            anchor_point: config
                .get("anchorPoint")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or(Vec2I::new(0, 0)),
            chance: config
                .get("chance")
                .and_then(Json::as_f64)
                .unwrap_or(1.0) as f32,
            mark_dungeon_id: config
                .get("markDungeonId")
                .and_then(Json::as_bool)
                .unwrap_or(true),
            clear_anchored_objects: config
                .get("clearAnchoredObjects")
                .and_then(Json::as_bool)
                .unwrap_or(false),
            rules: config
                .get("rules")
                .map(Rule::read_rules)
                .transpose()?
                .unwrap_or_default(),
            tiles,
            connectors: Vec::new(),
        };
        part.scan_connectors();
        Ok(part)
    }

    /// Collects connectors from connector-bearing tiles, inferring
    /// `Unknown` directions from the tile's position on the part edge.
    fn scan_connectors(&mut self) {
        let size = self.size;
        let connectors: Vec<Arc<Connector>> = self
            .tiles
            .iter()
            .filter_map(|(position, tile)| {
                let connector = tile.connector.as_ref()?;
                let direction = if connector.direction == ConnectorDirection::Unknown {
                    Self::pick_by_edge(*position, size)
                } else {
                    connector.direction
                };
                Some(Arc::new(Connector {
                    value: connector.value.clone(),
                    forward_only: connector.forward_only,
                    direction,
                    offset: *position,
                }))
            })
            .collect();
        self.connectors = connectors;
    }

    fn pick_by_edge(position: Vec2I, size: Vec2U) -> ConnectorDirection {
        if position.x() == 0 {
            ConnectorDirection::Left
        } else if position.x() == size.x() as i32 - 1 {
            ConnectorDirection::Right
        } else if position.y() == 0 {
            ConnectorDirection::Down
        } else if position.y() == size.y() as i32 - 1 {
            ConnectorDirection::Up
        } else {
            ConnectorDirection::Any
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> Vec2U {
        self.size
    }

    pub fn anchor_point(&self) -> Vec2I {
        self.anchor_point
    }

    pub fn chance(&self) -> f32 {
        self.chance
    }

    pub fn connectors(&self) -> &[Arc<Connector>] {
        &self.connectors
    }

    /// Part-level rule fold: a rule on any tile implies it on the part.
    fn any_rule(&self, predicate: impl Fn(&Rule) -> bool) -> bool {
        self.rules.iter().any(&predicate)
            || self
                .tiles
                .iter()
                .any(|(_, tile)| tile.rules.iter().any(&predicate))
    }

    pub fn overdrawable(&self) -> bool {
        self.any_rule(Rule::overdrawable)
    }

    pub fn ignores_part_maximum(&self) -> bool {
        self.any_rule(Rule::ignore_part_maximum)
    }

    pub fn allows_placement(&self, current_count: i32) -> bool {
        self.rules
            .iter()
            .chain(self.tiles.iter().flat_map(|(_, tile)| tile.rules.iter()))
            .all(|rule| rule.allow_spawn_count(current_count))
    }

    pub fn does_not_connect_to(&self, other: &Part) -> bool {
        self.any_rule(|rule| rule.does_not_connect_to_part(other.name()))
            || other.any_rule(|rule| rule.does_not_connect_to_part(self.name()))
    }

    pub fn check_part_combinations_allowed(
        &self,
        placement_counter: &HashMap<String, i32>,
    ) -> bool {
        self.rules
            .iter()
            .chain(self.tiles.iter().flat_map(|(_, tile)| tile.rules.iter()))
            .all(|rule| rule.check_part_combinations_allowed(placement_counter))
    }

    /// Whether every tile's rules accept the world at `origin`.
    pub fn can_place(&self, origin: Vec2I, writer: &mut DungeonGeneratorWriter) -> bool {
        self.tiles.iter().all(|(offset, tile)| {
            let position = origin + *offset;
            tile.rules
                .iter()
                .all(|rule| rule.check_tile_can_place(position, writer))
        })
    }

    pub fn collides_with_places(
        &self,
        origin: Vec2I,
        places: &HashSet<Vec2I>,
        writer: &DungeonGeneratorWriter,
    ) -> bool {
        if self.overdrawable() {
            return false;
        }
        self.tiles.iter().any(|(offset, tile)| {
            tile.uses_places() && places.contains(&writer.wrap_position(origin + *offset))
        })
    }

    /// Paints all tiles phase by phase and marks the footprint.
    pub fn place(
        &self,
        origin: Vec2I,
        places: &mut HashSet<Vec2I>,
        writer: &mut DungeonGeneratorWriter,
    ) {
        if self.clear_anchored_objects {
            let bounds = RectI::with_size(origin, self.size.to_i32());
            let positions: HashSet<Vec2I> = self
                .tiles
                .iter()
                .map(|(offset, _)| writer.wrap_position(origin + *offset))
                .collect();
            writer.clear_tile_entities(bounds, &positions, true);
        }

        for phase in Phase::ORDER {
            for (offset, tile) in &self.tiles {
                let position = origin + *offset;
                for brush in &tile.brushes {
                    brush.paint(position, phase, writer);
                }
            }
        }

        if !self.overdrawable() {
            for (offset, tile) in &self.tiles {
                if tile.uses_places() {
                    places.insert(writer.wrap_position(origin + *offset));
                }
            }
        }

        writer.finish_part();
    }
}

/// A named dungeon: its parts, its anchors, and placement limits.
#[derive(Debug, Clone)]
pub struct DungeonDefinition {
    name: String,
    display_name: String,
    is_protected: bool,
    gravity: Option<f32>,
    breathable: Option<bool>,
    max_parts: usize,
    max_radius: i32,
    extend_surface_free_space: i32,
    anchors: Vec<String>,
    parts: HashMap<String, Arc<Part>>,
    metadata: Json,
}

impl DungeonDefinition {
    pub fn from_json(config: &Json) -> Result<DungeonDefinition> {
        let name = config
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| ServerError::Dungeon("dungeon definition missing name".into()))?
            .to_string();

        let mut parts = HashMap::new();
        if let Some(entries) = config.get("parts").and_then(Json::as_array) {
            for entry in entries {
                let part = Part::from_json(entry)?;
                parts.insert(part.name().to_string(), Arc::new(part));
            }
        }

        let anchors: Vec<String> = config
            .get("anchors")
            .and_then(Json::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Json::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        for anchor in &anchors {
            if !parts.contains_key(anchor) {
                return Err(ServerError::Dungeon(format!(
                    "dungeon '{name}' anchor '{anchor}' has no part"
                )));
            }
        }

        Ok(DungeonDefinition {
            display_name: config
                .get("displayName")
                .and_then(Json::as_str)
                .unwrap_or(&name)
                .to_string(),
            name,
            is_protected: config
                .get("protected")
                .and_then(Json::as_bool)
                .unwrap_or(false),
            gravity: config
                .get("gravity")
                .and_then(Json::as_f64)
                .map(|g| g as f32),
            breathable: config.get("breathable").and_then(Json::as_bool),
            max_parts: config
                .get("maxParts")
                .and_then(Json::as_u64)
                .unwrap_or(64) as usize,
            max_radius: config
                .get("maxRadius")
                .and_then(Json::as_u64)
                .unwrap_or(100) as i32,
            extend_surface_free_space: config
                .get("extendSurfaceFreeSpace")
                .and_then(Json::as_u64)
                .unwrap_or(0) as i32,
            anchors,
            parts,
            metadata: config.get("metadata").cloned().unwrap_or(Json::Null),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_protected(&self) -> bool {
        self.is_protected
    }

    pub fn gravity(&self) -> Option<f32> {
        self.gravity
    }

    pub fn breathable(&self) -> Option<bool> {
        self.breathable
    }

    pub fn max_parts(&self) -> usize {
        self.max_parts
    }

    pub fn max_radius(&self) -> i32 {
        self.max_radius
    }

    pub fn extend_surface_free_space(&self) -> i32 {
        self.extend_surface_free_space
    }

    pub fn metadata(&self) -> &Json {
        &self.metadata
    }

    pub fn parts(&self) -> &HashMap<String, Arc<Part>> {
        &self.parts
    }

    pub fn part(&self, name: &str) -> Option<&Arc<Part>> {
        self.parts.get(name)
    }
}

/// Places one dungeon into a world through a facade.
pub struct DungeonGenerator {
    definition: Arc<DungeonDefinition>,
    random: RandomSource,
    dungeon_id: Option<DungeonId>,
}

impl DungeonGenerator {
    pub fn new(
        definition: Arc<DungeonDefinition>,
        seed: u64,
        dungeon_id: Option<DungeonId>,
    ) -> DungeonGenerator {
        DungeonGenerator {
            definition,
            random: RandomSource::with_seed(seed),
            dungeon_id,
        }
    }

    pub fn definition(&self) -> &Arc<DungeonDefinition> {
        &self.definition
    }

    /// Attempts placement anchored at `position`. Returns the placed
    /// parts' bounding rects and the set of tile positions they occupy,
    /// or `None` when the anchor cannot be placed and placement is not
    /// forced.
    pub fn generate(
        &mut self,
        facade: &mut dyn DungeonGeneratorWorldFacade,
        position: Vec2I,
        terrain_surface_level: Option<i32>,
        force_placement: bool,
    ) -> Option<(Vec<RectI>, HashSet<Vec2I>)> {
        let anchor = self.pick_anchor()?;
        let mut writer = DungeonGeneratorWriter::new(
            facade,
            terrain_surface_level,
            self.definition.extend_surface_free_space(),
        );
        writer.set_mark_dungeon_id(if anchor.mark_dungeon_id {
            self.dungeon_id
        } else {
            None
        });

        let origin = position - anchor.anchor_point();
        if !force_placement && !anchor.can_place(origin, &mut writer) {
            debug!(
                "dungeon '{}' anchor '{}' cannot place at {:?}",
                self.definition.name(),
                anchor.name(),
                position
            );
            return None;
        }

        let result = self.build_dungeon(&anchor, origin, &mut writer);

        writer.flush_liquid();
        writer.flush();

        if self.definition.is_protected() {
            if let Some(dungeon_id) = self.dungeon_id {
                facade.set_tile_protection(dungeon_id, true);
            }
        }

        Some(result)
    }

    /// Breadth-first walk over open connectors from the placed anchor.
    pub fn build_dungeon(
        &mut self,
        anchor: &Arc<Part>,
        origin: Vec2I,
        writer: &mut DungeonGeneratorWriter,
    ) -> (Vec<RectI>, HashSet<Vec2I>) {
        let mut places: HashSet<Vec2I> = HashSet::new();
        let mut placement_counter: HashMap<String, i32> = HashMap::new();
        let mut placed_parts = 1usize;

        info!(
            "placing dungeon '{}' anchored by '{}' at {:?}",
            self.definition.name(),
            anchor.name(),
            origin
        );

        anchor.place(origin, &mut places, writer);
        *placement_counter.entry(anchor.name().to_string()).or_insert(0) += 1;

        let anchor_center = origin + anchor.size().to_i32() / 2;

        // Frontier of open connectors: (owning part, its origin, connector)
        let mut frontier: VecDeque<(Arc<Part>, Vec2I, Arc<Connector>)> = anchor
            .connectors()
            .iter()
            .map(|connector| (anchor.clone(), origin, connector.clone()))
            .collect();

        while let Some((from_part, from_origin, open)) = frontier.pop_front() {
            if placed_parts >= self.definition.max_parts() {
                break;
            }

            let open_position = from_origin + open.offset;
            let mut candidates = self.find_connectable_parts(&open);
            self.random.shuffle(&mut candidates);

            for (part, connector) in candidates {
                let origin = open_position + open.direction.delta() - connector.offset;

                let center = origin + part.size().to_i32() / 2;
                let offset = center - anchor_center;
                let radius = self.definition.max_radius();
                if offset.x().abs() > radius || offset.y().abs() > radius {
                    continue;
                }

                if part.does_not_connect_to(&from_part) {
                    continue;
                }
                let count = placement_counter.get(part.name()).copied().unwrap_or(0);
                if !part.ignores_part_maximum() && !part.allows_placement(count) {
                    continue;
                }
                if !part.check_part_combinations_allowed(&placement_counter) {
                    continue;
                }
                if part.collides_with_places(origin, &places, writer) {
                    continue;
                }
                if !part.can_place(origin, writer) {
                    continue;
                }

                part.place(origin, &mut places, writer);
                *placement_counter.entry(part.name().to_string()).or_insert(0) += 1;
                placed_parts += 1;

                for next in part.connectors() {
                    if next.offset != connector.offset {
                        frontier.push_back((part.clone(), origin, next.clone()));
                    }
                }
                break;
            }
        }

        (writer.bounding_boxes(), places)
    }

    /// Weighted anchor pick by part chance.
    pub fn pick_anchor(&mut self) -> Option<Arc<Part>> {
        let mut pool = WeightedPool::new();
        for name in &self.definition.anchors {
            if let Some(part) = self.definition.part(name) {
                pool.add(part.chance() as f64, part.clone());
            }
        }
        pool.select(&mut self.random)
    }

    /// Every connector in the definition that can attach onto `open`.
    pub fn find_connectable_parts(&self, open: &Connector) -> Vec<(Arc<Part>, Arc<Connector>)> {
        let mut found = Vec::new();
        for part in self.definition.parts.values() {
            for connector in part.connectors() {
                if connector.connects_to(open) {
                    found.push((part.clone(), connector.clone()));
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skyward_core::geometry::WorldGeometry;
    use skyward_core::math::{PolyF, Vec2F};
    use skyward_core::types::game::Direction;
    use skyward_core::types::liquid::LiquidStore;
    use skyward_core::types::material::{
        MaterialColorVariant, MaterialHue, MaterialId, ModId, EMPTY_MATERIAL_ID, NULL_MATERIAL_ID,
    };
    use skyward_core::types::tile::{TileLayer, NO_DUNGEON_ID};

    struct TestFacade {
        geometry: WorldGeometry,
        foreground: HashMap<Vec2I, MaterialId>,
        background: HashMap<Vec2I, MaterialId>,
        dungeon_ids: HashMap<Vec2I, DungeonId>,
        marked_regions: Vec<RectI>,
        protected: Vec<(DungeonId, bool)>,
    }

    impl TestFacade {
        fn new(width: u32, height: u32) -> TestFacade {
            TestFacade {
                geometry: WorldGeometry::new(Vec2U::new(width, height)),
                foreground: HashMap::new(),
                background: HashMap::new(),
                dungeon_ids: HashMap::new(),
                marked_regions: Vec::new(),
                protected: Vec::new(),
            }
        }
    }

    impl DungeonGeneratorWorldFacade for TestFacade {
        fn mark_region(&mut self, region: RectI) {
            self.marked_regions.push(region);
        }
        fn mark_terrain(&mut self, _region: &PolyF) {}
        fn mark_space(&mut self, _region: &PolyF) {}
        fn set_foreground_material(
            &mut self,
            position: Vec2I,
            material: MaterialId,
            _hue: MaterialHue,
            _color: MaterialColorVariant,
        ) {
            self.foreground.insert(position, material);
        }
        fn set_background_material(
            &mut self,
            position: Vec2I,
            material: MaterialId,
            _hue: MaterialHue,
            _color: MaterialColorVariant,
        ) {
            self.background.insert(position, material);
        }
        fn set_foreground_mod(&mut self, _p: Vec2I, _m: ModId, _h: MaterialHue) {}
        fn set_background_mod(&mut self, _p: Vec2I, _m: ModId, _h: MaterialHue) {}
        fn place_object(&mut self, _p: Vec2I, _n: &str, _d: Direction, _j: &Json) {}
        fn place_vehicle(&mut self, _p: Vec2F, _n: &str, _j: &Json) {}
        fn place_surface_biome_items(&mut self, _p: Vec2I) {}
        fn place_biome_tree(&mut self, _p: Vec2I) {}
        fn add_drop(&mut self, _p: Vec2F, _d: &Json) {}
        fn spawn_npc(&mut self, _p: Vec2F, _d: &Json) {}
        fn spawn_stagehand(&mut self, _p: Vec2F, _d: &Json) {}
        fn set_liquid(&mut self, _p: Vec2I, _l: LiquidStore) {}
        fn connect_wire_group(&mut self, _g: &[Vec2I]) {}
        fn set_tile_protection(&mut self, dungeon_id: DungeonId, protected: bool) {
            self.protected.push((dungeon_id, protected));
        }
        fn check_solid(&mut self, position: Vec2I, _layer: TileLayer) -> bool {
            self.foreground
                .get(&position)
                .is_some_and(|&m| m != EMPTY_MATERIAL_ID && m != NULL_MATERIAL_ID)
        }
        fn check_open(&mut self, position: Vec2I, _layer: TileLayer) -> bool {
            !self.check_solid(position, TileLayer::Foreground)
        }
        fn check_ocean_liquid(&mut self, _p: Vec2I) -> bool {
            false
        }
        fn dungeon_id_at(&mut self, position: Vec2I) -> DungeonId {
            self.dungeon_ids
                .get(&position)
                .copied()
                .unwrap_or(NO_DUNGEON_ID)
        }
        fn set_dungeon_id_at(&mut self, position: Vec2I, dungeon_id: DungeonId) {
            self.dungeon_ids.insert(position, dungeon_id);
        }
        fn clear_tile_entities(&mut self, _b: RectI, _p: &HashSet<Vec2I>, _c: bool) {}
        fn world_geometry(&self) -> WorldGeometry {
            self.geometry
        }
        fn set_player_start(&mut self, _p: Vec2F) {}
    }

    fn solid_room_definition(max_parts: usize, max_radius: i32) -> DungeonDefinition {
        DungeonDefinition::from_json(&json!({
            "name": "testdungeon",
            "maxParts": max_parts,
            "maxRadius": max_radius,
            "anchors": ["room"],
            "parts": [{
                "name": "room",
                "def": {
                    "rows": ["#####", "#####", "#####", "#####", "#####"],
                    "legend": {"#": {"brushes": [["front", {"material": 7}]]}}
                }
            }]
        }))
        .unwrap()
    }

    #[test]
    fn anchor_only_placement() {
        let definition = Arc::new(solid_room_definition(1, 0));
        let mut generator = DungeonGenerator::new(definition, 1234, Some(40));
        let mut facade = TestFacade::new(1000, 1000);

        let (rects, places) = generator
            .generate(&mut facade, Vec2I::new(50, 50), None, false)
            .unwrap();

        assert_eq!(rects, vec![RectI::from_coords(50, 50, 55, 55)]);
        assert_eq!(places.len(), 25);
        assert_eq!(facade.foreground.len(), 25);
        for x in 50..55 {
            for y in 50..55 {
                assert_eq!(facade.foreground.get(&Vec2I::new(x, y)), Some(&7));
                assert_eq!(facade.dungeon_ids.get(&Vec2I::new(x, y)), Some(&40));
            }
        }
    }

    fn corridor_definition(max_parts: usize) -> DungeonDefinition {
        DungeonDefinition::from_json(&json!({
            "name": "corridors",
            "maxParts": max_parts,
            "maxRadius": 1000,
            "anchors": ["start"],
            "parts": [
                {
                    "name": "start",
                    "def": {
                        "rows": ["###>", "####", "####"],
                        "legend": {
                            "#": {"brushes": [["front", {"material": 7}]]},
                            ">": {
                                "brushes": [["front", {"material": 7}]],
                                "connector": {"value": "hall", "direction": "right"}
                            }
                        }
                    }
                },
                {
                    "name": "segment",
                    "rules": [["maxSpawnCount", [3]]],
                    "def": {
                        "rows": ["<##>", "####", "####"],
                        "legend": {
                            "#": {"brushes": [["front", {"material": 8}]]},
                            "<": {
                                "brushes": [["front", {"material": 8}]],
                                "connector": {"value": "hall", "direction": "left"}
                            },
                            ">": {
                                "brushes": [["front", {"material": 8}]],
                                "connector": {"value": "hall", "direction": "right"}
                            }
                        }
                    }
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn connectors_chain_parts_up_to_spawn_count() {
        let definition = Arc::new(corridor_definition(64));
        let mut generator = DungeonGenerator::new(definition, 99, None);
        let mut facade = TestFacade::new(2000, 1000);

        let (rects, _places) = generator
            .generate(&mut facade, Vec2I::new(100, 100), None, false)
            .unwrap();

        // Anchor plus at most three segments (maxSpawnCount)
        assert_eq!(rects.len(), 4);
        let segment_tiles = facade.foreground.values().filter(|&&m| m == 8).count();
        assert_eq!(segment_tiles, 3 * 12);
    }

    #[test]
    fn max_parts_caps_placement() {
        let definition = Arc::new(corridor_definition(2));
        let mut generator = DungeonGenerator::new(definition, 99, None);
        let mut facade = TestFacade::new(2000, 1000);

        let (rects, _) = generator
            .generate(&mut facade, Vec2I::new(100, 100), None, false)
            .unwrap();
        assert_eq!(rects.len(), 2);
    }

    #[test]
    fn placed_parts_do_not_overlap() {
        let definition = Arc::new(corridor_definition(64));
        let mut generator = DungeonGenerator::new(definition, 7, None);
        let mut facade = TestFacade::new(2000, 1000);

        let (rects, places) = generator
            .generate(&mut facade, Vec2I::new(100, 100), None, false)
            .unwrap();
        let total_area: i32 = rects.iter().map(|r| r.width() * r.height()).sum();
        assert_eq!(total_area as usize, places.len(), "no overdraw");
    }

    #[test]
    fn failed_anchor_returns_none_unless_forced() {
        let definition = DungeonDefinition::from_json(&json!({
            "name": "needsair",
            "maxParts": 1,
            "maxRadius": 0,
            "anchors": ["room"],
            "parts": [{
                "name": "room",
                "def": {
                    "rows": ["#"],
                    "legend": {"#": {
                        "brushes": [["front", {"material": 7}]],
                        "rules": [["worldGenMustContainSolid", ["foreground"]]]
                    }}
                }
            }]
        }))
        .unwrap();
        let definition = Arc::new(definition);

        let mut generator = DungeonGenerator::new(definition.clone(), 5, None);
        let mut facade = TestFacade::new(100, 100);
        assert!(generator
            .generate(&mut facade, Vec2I::new(10, 10), None, false)
            .is_none());

        let mut generator = DungeonGenerator::new(definition, 5, None);
        assert!(generator
            .generate(&mut facade, Vec2I::new(10, 10), None, true)
            .is_some());
    }
}
