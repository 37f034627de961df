//! The buffered dungeon writer and the world interface it flushes into.

use log::warn;
use serde_json::Value as Json;
use skyward_core::geometry::WorldGeometry;
use skyward_core::math::{PolyF, RectI, Vec2F, Vec2I};
use skyward_core::types::game::Direction;
use skyward_core::types::liquid::LiquidStore;
use skyward_core::types::material::{
    MaterialColorVariant, MaterialHue, MaterialId, ModId,
};
use skyward_core::types::tile::{DungeonId, TileLayer, NO_DUNGEON_ID};
use std::collections::{HashMap, HashSet};

/// What the dungeon generator needs from a world. Implemented by the
/// world server; the generator never mutates the world directly.
pub trait DungeonGeneratorWorldFacade {
    /// Hint that the region is dungeon generated and should skip natural
    /// entity generation.
    fn mark_region(&mut self, region: RectI);
    /// Mark a region as needing terrain to integrate with the dungeon.
    fn mark_terrain(&mut self, region: &PolyF);
    /// Mark a region as needing open space above the dungeon.
    fn mark_space(&mut self, region: &PolyF);

    fn set_foreground_material(
        &mut self,
        position: Vec2I,
        material: MaterialId,
        hue_shift: MaterialHue,
        color_variant: MaterialColorVariant,
    );
    fn set_background_material(
        &mut self,
        position: Vec2I,
        material: MaterialId,
        hue_shift: MaterialHue,
        color_variant: MaterialColorVariant,
    );
    fn set_foreground_mod(&mut self, position: Vec2I, material_mod: ModId, hue_shift: MaterialHue);
    fn set_background_mod(&mut self, position: Vec2I, material_mod: ModId, hue_shift: MaterialHue);
    fn place_object(&mut self, position: Vec2I, name: &str, direction: Direction, parameters: &Json);
    fn place_vehicle(&mut self, position: Vec2F, name: &str, parameters: &Json);
    fn place_surface_biome_items(&mut self, position: Vec2I);
    fn place_biome_tree(&mut self, position: Vec2I);
    fn add_drop(&mut self, position: Vec2F, descriptor: &Json);
    fn spawn_npc(&mut self, position: Vec2F, definition: &Json);
    fn spawn_stagehand(&mut self, position: Vec2F, definition: &Json);
    fn set_liquid(&mut self, position: Vec2I, liquid: LiquidStore);
    fn connect_wire_group(&mut self, group: &[Vec2I]);
    fn set_tile_protection(&mut self, dungeon_id: DungeonId, protected: bool);
    fn check_solid(&mut self, position: Vec2I, layer: TileLayer) -> bool;
    fn check_open(&mut self, position: Vec2I, layer: TileLayer) -> bool;
    fn check_ocean_liquid(&mut self, position: Vec2I) -> bool;
    fn dungeon_id_at(&mut self, position: Vec2I) -> DungeonId;
    fn set_dungeon_id_at(&mut self, position: Vec2I, dungeon_id: DungeonId);
    fn clear_tile_entities(&mut self, bounds: RectI, positions: &HashSet<Vec2I>, clear_anchored: bool);
    fn world_geometry(&self) -> WorldGeometry;
    fn set_player_start(&mut self, position: Vec2F);
}

struct BufferedMaterial {
    material: MaterialId,
    hue_shift: MaterialHue,
    color_variant: MaterialColorVariant,
}

struct BufferedObject {
    name: String,
    direction: Direction,
    parameters: Json,
}

/// Buffers every paint the generator makes and applies them to the facade
/// on `flush`. All positions are wrapped into world range on entry; part
/// bounding boxes accumulate from the positions each part touches.
pub struct DungeonGeneratorWriter<'a> {
    facade: &'a mut dyn DungeonGeneratorWorldFacade,
    geometry: WorldGeometry,
    terrain_marking_surface_level: Option<i32>,
    terrain_surface_space_extends: i32,

    foreground_material: HashMap<Vec2I, BufferedMaterial>,
    background_material: HashMap<Vec2I, BufferedMaterial>,
    foreground_mod: HashMap<Vec2I, (ModId, MaterialHue)>,
    background_mod: HashMap<Vec2I, (ModId, MaterialHue)>,
    objects: HashMap<Vec2I, BufferedObject>,
    vehicles: Vec<(Vec2F, String, Json)>,
    biome_trees: HashSet<Vec2I>,
    biome_items: HashSet<Vec2I>,
    drops: Vec<(Vec2F, Json)>,
    npcs: Vec<(Vec2F, Json)>,
    stagehands: Vec<(Vec2F, Json)>,
    dungeon_ids: HashMap<Vec2I, DungeonId>,

    /// Two-phase liquids: requested during painting, committed by
    /// `flush_liquid` once the surrounding walls exist.
    pending_liquids: HashMap<Vec2I, LiquidStore>,
    liquids: HashMap<Vec2I, LiquidStore>,

    global_wires: HashMap<String, HashSet<Vec2I>>,
    local_wires: Vec<HashSet<Vec2I>>,
    open_local_wires: HashMap<String, HashSet<Vec2I>>,

    mark_dungeon_id: Option<DungeonId>,
    player_start: Option<Vec2F>,
    current_bounds: RectI,
    bounding_boxes: Vec<RectI>,
}

impl<'a> DungeonGeneratorWriter<'a> {
    pub fn new(
        facade: &'a mut dyn DungeonGeneratorWorldFacade,
        terrain_marking_surface_level: Option<i32>,
        terrain_surface_space_extends: i32,
    ) -> DungeonGeneratorWriter<'a> {
        let geometry = facade.world_geometry();
        DungeonGeneratorWriter {
            facade,
            geometry,
            terrain_marking_surface_level,
            terrain_surface_space_extends,
            foreground_material: HashMap::new(),
            background_material: HashMap::new(),
            foreground_mod: HashMap::new(),
            background_mod: HashMap::new(),
            objects: HashMap::new(),
            vehicles: Vec::new(),
            biome_trees: HashSet::new(),
            biome_items: HashSet::new(),
            drops: Vec::new(),
            npcs: Vec::new(),
            stagehands: Vec::new(),
            dungeon_ids: HashMap::new(),
            pending_liquids: HashMap::new(),
            liquids: HashMap::new(),
            global_wires: HashMap::new(),
            local_wires: Vec::new(),
            open_local_wires: HashMap::new(),
            mark_dungeon_id: None,
            player_start: None,
            current_bounds: RectI::null(),
            bounding_boxes: Vec::new(),
        }
    }

    /// Every buffered tile additionally receives this dungeon id.
    pub fn set_mark_dungeon_id(&mut self, dungeon_id: Option<DungeonId>) {
        self.mark_dungeon_id = dungeon_id;
    }

    /// Always produces an in-range position under the world wrap.
    pub fn wrap_position(&self, position: Vec2I) -> Vec2I {
        self.geometry.xwrap_vec_i(position)
    }

    fn mark(&mut self, position: Vec2I) -> Vec2I {
        let wrapped = self.wrap_position(position);
        self.current_bounds.combine_point(wrapped);
        wrapped
    }

    pub fn set_foreground_material(
        &mut self,
        position: Vec2I,
        material: MaterialId,
        hue_shift: MaterialHue,
        color_variant: MaterialColorVariant,
    ) {
        let position = self.mark(position);
        self.foreground_material.insert(
            position,
            BufferedMaterial {
                material,
                hue_shift,
                color_variant,
            },
        );
    }

    pub fn set_background_material(
        &mut self,
        position: Vec2I,
        material: MaterialId,
        hue_shift: MaterialHue,
        color_variant: MaterialColorVariant,
    ) {
        let position = self.mark(position);
        self.background_material.insert(
            position,
            BufferedMaterial {
                material,
                hue_shift,
                color_variant,
            },
        );
    }

    pub fn set_foreground_mod(&mut self, position: Vec2I, material_mod: ModId, hue: MaterialHue) {
        let position = self.mark(position);
        self.foreground_mod.insert(position, (material_mod, hue));
    }

    pub fn set_background_mod(&mut self, position: Vec2I, material_mod: ModId, hue: MaterialHue) {
        let position = self.mark(position);
        self.background_mod.insert(position, (material_mod, hue));
    }

    pub fn place_object(
        &mut self,
        position: Vec2I,
        name: &str,
        direction: Direction,
        parameters: &Json,
    ) {
        let position = self.mark(position);
        self.objects.insert(
            position,
            BufferedObject {
                name: name.to_string(),
                direction,
                parameters: parameters.clone(),
            },
        );
    }

    pub fn place_vehicle(&mut self, position: Vec2F, name: &str, parameters: &Json) {
        self.vehicles
            .push((position, name.to_string(), parameters.clone()));
    }

    pub fn place_surface_biome_items(&mut self, position: Vec2I) {
        let position = self.mark(position);
        self.biome_items.insert(position);
    }

    pub fn place_biome_tree(&mut self, position: Vec2I) {
        let position = self.mark(position);
        self.biome_trees.insert(position);
    }

    pub fn add_drop(&mut self, position: Vec2F, descriptor: &Json) {
        self.drops.push((position, descriptor.clone()));
    }

    pub fn spawn_npc(&mut self, position: Vec2F, definition: &Json) {
        self.npcs.push((position, definition.clone()));
    }

    pub fn spawn_stagehand(&mut self, position: Vec2F, definition: &Json) {
        self.stagehands.push((position, definition.clone()));
    }

    pub fn set_player_start(&mut self, position: Vec2F) {
        self.player_start = Some(position);
    }

    pub fn request_liquid(&mut self, position: Vec2I, liquid: LiquidStore) {
        let position = self.mark(position);
        self.pending_liquids.insert(position, liquid);
    }

    /// A wire point: global groups connect across parts by name, local
    /// groups close when the part finishes.
    pub fn request_wire(&mut self, position: Vec2I, group: &str, part_local: bool) {
        let position = self.mark(position);
        if part_local {
            self.open_local_wires
                .entry(group.to_string())
                .or_default()
                .insert(position);
        } else {
            self.global_wires
                .entry(group.to_string())
                .or_default()
                .insert(position);
        }
    }

    pub fn set_dungeon_id(&mut self, position: Vec2I, dungeon_id: DungeonId) {
        let position = self.mark(position);
        self.dungeon_ids.insert(position, dungeon_id);
    }

    pub fn report_invalid_brush(&mut self, position: Vec2I, name_hint: Option<&str>) {
        warn!(
            "dungeon part references a removed asset{} at {:?}, skipping",
            name_hint
                .map(|n| format!(" '{n}'"))
                .unwrap_or_default(),
            position
        );
    }

    pub fn check_solid(&mut self, position: Vec2I, layer: TileLayer) -> bool {
        let position = self.wrap_position(position);
        self.facade.check_solid(position, layer)
    }

    pub fn check_open(&mut self, position: Vec2I, layer: TileLayer) -> bool {
        let position = self.wrap_position(position);
        self.facade.check_open(position, layer)
    }

    pub fn check_liquid(&mut self, position: Vec2I) -> bool {
        let position = self.wrap_position(position);
        self.facade.check_ocean_liquid(position)
    }

    /// True when another structure already owns this tile.
    pub fn other_dungeon_present(&mut self, position: Vec2I) -> bool {
        let position = self.wrap_position(position);
        let existing = self.facade.dungeon_id_at(position);
        existing != NO_DUNGEON_ID && Some(existing) != self.mark_dungeon_id
    }

    pub fn clear_tile_entities(
        &mut self,
        bounds: RectI,
        positions: &HashSet<Vec2I>,
        clear_anchored: bool,
    ) {
        self.facade.clear_tile_entities(bounds, positions, clear_anchored);
    }

    /// Closes the current part: local wires become connected groups, and
    /// the positions it touched become its bounding box.
    pub fn finish_part(&mut self) {
        for (_, wires) in self.open_local_wires.drain() {
            self.local_wires.push(wires);
        }
        if !self.current_bounds.is_null() {
            // max is exclusive for tile rects
            let bounds = RectI::new(
                self.current_bounds.min,
                self.current_bounds.max + Vec2I::new(1, 1),
            );
            self.bounding_boxes.push(bounds);
            self.current_bounds = RectI::null();
        }
    }

    pub fn bounding_boxes(&self) -> Vec<RectI> {
        self.bounding_boxes.clone()
    }

    /// Commits requested liquids. Separate from `flush` so walls land
    /// before liquid does.
    pub fn flush_liquid(&mut self) {
        for (position, liquid) in self.pending_liquids.drain() {
            self.liquids.insert(position, liquid);
        }
    }

    /// Applies every buffered operation to the facade.
    pub fn flush(&mut self) {
        for bounds in &self.bounding_boxes {
            self.facade.mark_region(*bounds);
            if let Some(surface_level) = self.terrain_marking_surface_level {
                // Below the surface the dungeon needs terrain around it;
                // above it, open space.
                let (min, max) = (bounds.min, bounds.max);
                if min.y() < surface_level {
                    let top = max.y().min(surface_level);
                    self.facade.mark_terrain(&PolyF::rect(
                        min.to_f32(),
                        Vec2F::new(max.x() as f32, top as f32),
                    ));
                }
                if max.y() > surface_level {
                    let bottom = min.y().max(surface_level);
                    self.facade.mark_space(&PolyF::rect(
                        Vec2F::new(min.x() as f32, bottom as f32),
                        max.to_f32() + Vec2F::new(0.0, self.terrain_surface_space_extends as f32),
                    ));
                }
            }
        }

        for (position, material) in self.foreground_material.drain() {
            self.facade.set_foreground_material(
                position,
                material.material,
                material.hue_shift,
                material.color_variant,
            );
        }
        for (position, material) in self.background_material.drain() {
            self.facade.set_background_material(
                position,
                material.material,
                material.hue_shift,
                material.color_variant,
            );
        }
        for (position, (material_mod, hue)) in self.foreground_mod.drain() {
            self.facade.set_foreground_mod(position, material_mod, hue);
        }
        for (position, (material_mod, hue)) in self.background_mod.drain() {
            self.facade.set_background_mod(position, material_mod, hue);
        }
        for (position, object) in self.objects.drain() {
            self.facade
                .place_object(position, &object.name, object.direction, &object.parameters);
        }
        for (position, name, parameters) in self.vehicles.drain(..) {
            self.facade.place_vehicle(position, &name, &parameters);
        }
        for position in self.biome_trees.drain() {
            self.facade.place_biome_tree(position);
        }
        for position in self.biome_items.drain() {
            self.facade.place_surface_biome_items(position);
        }
        for (position, descriptor) in self.drops.drain(..) {
            self.facade.add_drop(position, &descriptor);
        }
        for (position, liquid) in self.liquids.drain() {
            self.facade.set_liquid(position, liquid);
        }
        for (position, definition) in self.npcs.drain(..) {
            self.facade.spawn_npc(position, &definition);
        }
        for (position, definition) in self.stagehands.drain(..) {
            self.facade.spawn_stagehand(position, &definition);
        }

        for (position, dungeon_id) in self.dungeon_ids.drain() {
            self.facade.set_dungeon_id_at(position, dungeon_id);
        }
        if let Some(mark_id) = self.mark_dungeon_id {
            for bounds in &self.bounding_boxes {
                for position in bounds.positions() {
                    self.facade.set_dungeon_id_at(position, mark_id);
                }
            }
        }

        for (_, group) in self.global_wires.drain() {
            let group: Vec<Vec2I> = group.into_iter().collect();
            self.facade.connect_wire_group(&group);
        }
        for group in self.local_wires.drain(..) {
            let group: Vec<Vec2I> = group.into_iter().collect();
            self.facade.connect_wire_group(&group);
        }

        if let Some(start) = self.player_start.take() {
            self.facade.set_player_start(start);
        }
    }

    pub fn reset(&mut self) {
        self.foreground_material.clear();
        self.background_material.clear();
        self.foreground_mod.clear();
        self.background_mod.clear();
        self.objects.clear();
        self.vehicles.clear();
        self.biome_trees.clear();
        self.biome_items.clear();
        self.drops.clear();
        self.npcs.clear();
        self.stagehands.clear();
        self.dungeon_ids.clear();
        self.pending_liquids.clear();
        self.liquids.clear();
        self.global_wires.clear();
        self.local_wires.clear();
        self.open_local_wires.clear();
        self.player_start = None;
        self.current_bounds = RectI::null();
        self.bounding_boxes.clear();
    }
}
