//! The world layout: horizontal layers of biome cells with blending.
//!
//! A layout is a list of layers stacked by increasing `y_start`. Each
//! layer holds an ordered list of cells separated by x boundaries with an
//! implicit wrap; cell `i` owns `[boundaries[i-1], boundaries[i])` modulo
//! the world width.

use crate::world::biome::Biome;
use serde::{Deserialize, Serialize};
use skyward_core::geometry::WorldGeometry;
use skyward_core::math::{RectI, Vec2I, Vec2U};
use skyward_core::types::liquid::{LiquidId, EMPTY_LIQUID_ID};
use skyward_core::types::perlin::{PerlinConfig, PerlinF};
use skyward_core::types::random::{
    static_random_f32_range, static_random_i32_range, static_random_u64,
};
use std::sync::Arc;

/// A seedable procedural mask over (x, y); positive values select terrain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerrainSelector {
    noise: PerlinF,
    base_height: f32,
    /// Added to the noise before thresholding; negative values carve.
    threshold_bias: f32,
}

impl TerrainSelector {
    pub fn build(config: PerlinConfig, seed: u64, base_height: f32, threshold_bias: f32) -> Self {
        TerrainSelector {
            noise: PerlinF::with_seed(config, seed),
            base_height,
            threshold_bias,
        }
    }

    /// Positive output means the selector claims this position.
    pub fn get(&self, x: f32, y: f32) -> f32 {
        self.noise.get2(x, y) + self.threshold_bias + (self.base_height - y) * 0.05
    }
}

/// The liquid treatment of a region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegionLiquids {
    pub cave_liquid: LiquidId,
    pub cave_liquid_seed_density: f32,
    pub ocean_liquid: LiquidId,
    pub ocean_liquid_level: i32,
    pub enclose_liquids: bool,
    pub fill_microdungeons: bool,
}

impl Default for RegionLiquids {
    fn default() -> Self {
        RegionLiquids {
            cave_liquid: EMPTY_LIQUID_ID,
            cave_liquid_seed_density: 0.0,
            ocean_liquid: EMPTY_LIQUID_ID,
            ocean_liquid_level: 0,
            enclose_liquids: false,
            fill_microdungeons: false,
        }
    }
}

/// The semantic description assigned to a layout cell: which biome the
/// blocks belong to and which selectors carve it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldRegion {
    pub terrain_selector: Option<usize>,
    pub foreground_cave_selector: Option<usize>,
    pub background_cave_selector: Option<usize>,
    pub sub_block_selectors: Vec<usize>,
    pub foreground_ore_selectors: Vec<usize>,
    pub background_ore_selectors: Vec<usize>,
    pub block_biome_index: Option<usize>,
    pub environment_biome_index: Option<usize>,
    pub region_liquids: RegionLiquids,
}

/// One horizontal slab of the world.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorldLayer {
    pub y_start: i32,
    pub boundaries: Vec<i32>,
    pub cells: Vec<Arc<WorldRegion>>,
}

/// A weighted region contribution at some position.
#[derive(Debug, Clone)]
pub struct RegionWeighting {
    pub weight: f32,
    /// The x value to sample the region's selectors with; shifted by a
    /// world width for cells reached across the wrap.
    pub x_value: i32,
    pub region: Arc<WorldRegion>,
}

/// Toroidal displacement noise applied to block coordinates before layout
/// sampling, so biome borders are not perfectly straight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockNoise {
    horizontal_noise: PerlinF,
    vertical_noise: PerlinF,
    x_noise: PerlinF,
    y_noise: PerlinF,
}

impl BlockNoise {
    pub fn build(config: PerlinConfig, seed: u64) -> BlockNoise {
        BlockNoise {
            horizontal_noise: PerlinF::with_seed(
                config,
                static_random_u64(seed, &[&"HorizontalNoise"]),
            ),
            vertical_noise: PerlinF::with_seed(config, static_random_u64(seed, &[&"VerticalNoise"])),
            x_noise: PerlinF::with_seed(config, static_random_u64(seed, &[&"XNoise"])),
            y_noise: PerlinF::with_seed(config, static_random_u64(seed, &[&"YNoise"])),
        }
    }

    /// Projects x around the world circumference so displacement is
    /// continuous across the seam.
    pub fn apply(&self, input: Vec2I, world_size: Vec2U) -> Vec2I {
        let tau = std::f32::consts::TAU;
        let angle = input.x() as f32 / world_size.x() as f32 * tau;
        let xc = angle.sin() / tau * world_size.x() as f32;
        let zc = angle.cos() / tau * world_size.x() as f32;

        let x = (input.x() as f32
            + self.horizontal_noise.get1(input.y() as f32)
            + self.x_noise.get3(xc, input.y() as f32, zc))
        .floor() as i32;
        let y = (input.y() as f32
            + self.vertical_noise.get2(xc, zc)
            + self.y_noise.get3(xc, input.y() as f32, zc))
        .floor() as i32;

        Vec2I::new(x, (y).clamp(0, world_size.y() as i32))
    }
}

/// Parameters for building one region of a terrestrial layer.
#[derive(Debug, Clone)]
pub struct RegionParams {
    pub base_height: i32,
    pub biome: Option<Biome>,
    pub terrain_noise: Option<PerlinConfig>,
    pub cave_noise: Option<PerlinConfig>,
    pub region_liquids: RegionLiquids,
}

impl RegionParams {
    pub fn bare(base_height: i32) -> RegionParams {
        RegionParams {
            base_height,
            biome: None,
            terrain_noise: None,
            cave_noise: None,
            region_liquids: RegionLiquids::default(),
        }
    }
}

/// Parameters for one terrestrial layer.
#[derive(Debug, Clone)]
pub struct LayerParams {
    pub min_height: i32,
    pub base_height: i32,
    pub primary_region: RegionParams,
    pub primary_sub_region: RegionParams,
    pub secondary_regions: Vec<RegionParams>,
    pub secondary_sub_regions: Vec<RegionParams>,
    /// Relative size range for secondary regions.
    pub secondary_region_size: (f32, f32),
    /// Relative size range for sub regions, as a fraction of their parent.
    pub sub_region_size: (f32, f32),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorldLayout {
    world_size: Vec2U,
    biomes: Vec<Arc<Biome>>,
    terrain_selectors: Vec<Arc<TerrainSelector>>,
    layers: Vec<WorldLayer>,
    region_blending: f32,
    block_noise: Option<BlockNoise>,
    blend_noise: Option<PerlinF>,
    player_start_search_regions: Vec<RectI>,
}

impl WorldLayout {
    pub fn new(world_size: Vec2U, region_blending: f32) -> WorldLayout {
        WorldLayout {
            world_size,
            region_blending,
            ..WorldLayout::default()
        }
    }

    pub fn world_size(&self) -> Vec2U {
        self.world_size
    }

    pub fn layers(&self) -> &[WorldLayer] {
        &self.layers
    }

    pub fn block_noise(&self) -> Option<&BlockNoise> {
        self.block_noise.as_ref()
    }

    pub fn blend_noise(&self) -> Option<&PerlinF> {
        self.blend_noise.as_ref()
    }

    pub fn set_block_noise(&mut self, noise: BlockNoise) {
        self.block_noise = Some(noise);
    }

    pub fn set_blend_noise(&mut self, noise: PerlinF) {
        self.blend_noise = Some(noise);
    }

    pub fn player_start_search_regions(&self) -> &[RectI] {
        &self.player_start_search_regions
    }

    pub fn biome(&self, index: usize) -> Option<&Arc<Biome>> {
        self.biomes.get(index)
    }

    pub fn terrain_selector(&self, index: usize) -> Option<&Arc<TerrainSelector>> {
        self.terrain_selectors.get(index)
    }

    pub fn register_biome(&mut self, biome: Biome) -> usize {
        self.biomes.push(Arc::new(biome));
        self.biomes.len() - 1
    }

    pub fn register_terrain_selector(&mut self, selector: TerrainSelector) -> usize {
        self.terrain_selectors.push(Arc::new(selector));
        self.terrain_selectors.len() - 1
    }

    /// Up to nine weighted regions (3 vertical x 3 horizontal) blended
    /// around `(x, y)`, normalised and sorted descending by weight.
    pub fn get_weighting(&self, x: i32, y: i32) -> Vec<RegionWeighting> {
        let mut weighting: Vec<RegionWeighting> = Vec::new();

        let layer_index = match self.layer_index_for(y) {
            Some(index) => index,
            None => return weighting,
        };

        let half_blend = self.region_blending / 2.0;
        let layer = &self.layers[layer_index];

        if ((y - layer.y_start) as f32) < half_blend {
            if layer_index == 0 {
                self.add_layer_weighting(&mut weighting, layer_index, x, 1.0);
            } else {
                let y_weight = 0.5 + (y - layer.y_start) as f32 / self.region_blending;
                self.add_layer_weighting(&mut weighting, layer_index, x, y_weight);
                self.add_layer_weighting(&mut weighting, layer_index - 1, x, 1.0 - y_weight);
            }
        } else if layer_index + 1 < self.layers.len()
            && y as f32 > self.layers[layer_index + 1].y_start as f32 - half_blend
        {
            let next_start = self.layers[layer_index + 1].y_start;
            let y_weight = 0.5 - (next_start - y) as f32 / self.region_blending;
            self.add_layer_weighting(&mut weighting, layer_index, x, 1.0 - y_weight);
            self.add_layer_weighting(&mut weighting, layer_index + 1, x, y_weight);
        } else {
            self.add_layer_weighting(&mut weighting, layer_index, x, 1.0);
        }

        let total: f32 = weighting.iter().map(|w| w.weight).sum();
        if total > 0.0 {
            for entry in &mut weighting {
                entry.weight /= total;
            }
        }
        weighting.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        weighting
    }

    fn add_layer_weighting(
        &self,
        weighting: &mut Vec<RegionWeighting>,
        layer_index: usize,
        x: i32,
        weight_factor: f32,
    ) {
        let layer = &self.layers[layer_index];
        if layer.cells.is_empty() {
            return;
        }

        let (inner_index, inner_x) = self.find_containing_cell(layer, x);
        let (left_index, left_x) = self.left_cell(layer, inner_index, inner_x);
        let (right_index, right_x) = self.right_cell(layer, inner_index, inner_x);

        let inner_weight = self.cell_weighting(layer, inner_index, inner_x);
        let left_weight = self.cell_weighting(layer, left_index, left_x);
        let right_weight = self.cell_weighting(layer, right_index, right_x);

        let total = inner_weight + left_weight + right_weight;
        if total <= 0.0 {
            return;
        }

        let mut push = |weight: f32, x_value: i32, cell_index: usize| {
            if weight > 0.0 {
                weighting.push(RegionWeighting {
                    weight: weight * weight_factor / total,
                    x_value,
                    region: layer.cells[cell_index].clone(),
                });
            }
        };
        push(inner_weight, inner_x, inner_index);
        push(left_weight, left_x, left_index);
        push(right_weight, right_x, right_index);
    }

    /// Triangular ramp around the cell's span: full weight deep inside,
    /// falling off within `region_blending` of either boundary.
    fn cell_weighting(&self, layer: &WorldLayer, cell_index: usize, x: i32) -> f32 {
        let x_min = if cell_index > 0 {
            layer.boundaries[cell_index - 1]
        } else {
            0
        };
        let x_max = if cell_index < layer.boundaries.len() {
            layer.boundaries[cell_index]
        } else {
            self.world_size.x() as i32
        };

        let x = x as f32;
        if x > (x_min + x_max) as f32 / 2.0 {
            (0.5 - (x - x_max as f32) / self.region_blending).clamp(0.0, 1.0)
        } else {
            (0.5 - (x_min as f32 - x) / self.region_blending).clamp(0.0, 1.0)
        }
    }

    fn layer_index_for(&self, y: i32) -> Option<usize> {
        let mut found = None;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.y_start <= y {
                found = Some(i);
            } else {
                break;
            }
        }
        found
    }

    fn find_containing_cell(&self, layer: &WorldLayer, x: i32) -> (usize, i32) {
        let geometry = WorldGeometry::new(self.world_size);
        let x = geometry.xwrap_i(x);
        let index = layer.boundaries.partition_point(|&b| b <= x);
        (index, x)
    }

    fn left_cell(&self, layer: &WorldLayer, cell_index: usize, x: i32) -> (usize, i32) {
        if cell_index == 0 {
            (layer.cells.len() - 1, x + self.world_size.x() as i32)
        } else {
            (cell_index - 1, x)
        }
    }

    fn right_cell(&self, layer: &WorldLayer, cell_index: usize, x: i32) -> (usize, i32) {
        if cell_index >= layer.cells.len() - 1 {
            (0, x - self.world_size.x() as i32)
        } else {
            (cell_index + 1, x)
        }
    }

    /// The layer and cell containing a position.
    pub fn find_layer_and_cell(&self, x: i32, y: i32) -> (usize, usize) {
        let mut layer_index = 0;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.y_start < y {
                layer_index = i;
            } else {
                break;
            }
        }
        let cell = self.find_containing_cell(&self.layers[layer_index], x);
        (layer_index, cell.0)
    }

    /// Sets every cell of the layer containing `position` to the block
    /// biome of the cell at `position`, returning that biome's name.
    pub fn set_layer_environment_biome(&mut self, position: Vec2I) -> Option<String> {
        let (layer_index, cell_index) = self.find_layer_and_cell(position.x(), position.y());
        let biome_index = self.layers[layer_index].cells[cell_index].block_biome_index?;
        let layer = &mut self.layers[layer_index];
        for cell in &mut layer.cells {
            let mut region = (**cell).clone();
            region.environment_biome_index = Some(biome_index);
            *cell = Arc::new(region);
        }
        self.biomes.get(biome_index).map(|b| b.base_name.clone())
    }

    /// Inserts a new region of `width` centered at `position`, splitting
    /// the containing cell and pushing its neighbours aside. Returns the
    /// rectangles covered by the new region for sector invalidation.
    pub fn add_biome_region(
        &mut self,
        seed: u64,
        position: Vec2I,
        biome: Biome,
        width: i32,
    ) -> Vec<RectI> {
        let (layer_index, cell_index) = self.find_layer_and_cell(position.x(), position.y());
        let mut layer = self.layers[layer_index].clone();
        let target_region = layer.cells[cell_index].clone();

        let mut new_region = (*target_region).clone();
        // Fresh sub-block selectors for the inserted biome; everything else
        // is inherited from the split region
        new_region.sub_block_selectors = (0..biome.sub_blocks.len())
            .map(|i| {
                self.register_terrain_selector(TerrainSelector::build(
                    PerlinConfig::default(),
                    static_random_u64(seed, &[&i, &"SubBlocks", &biome.base_name.as_str()]),
                    position.y() as f32,
                    0.0,
                ))
            })
            .collect();
        new_region.block_biome_index = Some(self.register_biome(biome));
        // Environment biome stays the layer's; only blocks change
        new_region.environment_biome_index = target_region.environment_biome_index;
        let new_region = Arc::new(new_region);

        // Insertion exactly at the wrap seam is nudged inward one column
        let insert_x = if position.x() > 0 { position.x() } else { 1 };

        layer.boundaries.insert(cell_index, insert_x);
        layer.cells.insert(cell_index, new_region);

        layer.boundaries.insert(cell_index, insert_x - 1);
        layer.cells.insert(cell_index, target_region);

        let (layer, rects) = self.expand_region_in_layer(layer, cell_index + 1, width);
        self.layers[layer_index] = layer;
        rects
    }

    /// Expands the existing region at `position` to `new_width`. Returns
    /// the rectangles covered by the region after expansion.
    pub fn expand_biome_region(&mut self, position: Vec2I, new_width: i32) -> Vec<RectI> {
        let (layer_index, cell_index) = self.find_layer_and_cell(position.x(), position.y());
        let layer = self.layers[layer_index].clone();
        let (layer, rects) = self.expand_region_in_layer(layer, cell_index, new_width);
        self.layers[layer_index] = layer;
        rects
    }

    /// Like [`Self::add_biome_region`] but without mutating the layout.
    pub fn preview_add_biome_region(&self, position: Vec2I, width: i32) -> Vec<RectI> {
        let (layer_index, cell_index) = self.find_layer_and_cell(position.x(), position.y());
        let mut layer = self.layers[layer_index].clone();
        let target_region = layer.cells[cell_index].clone();

        let insert_x = if position.x() > 0 { position.x() } else { 1 };
        layer.boundaries.insert(cell_index, insert_x);
        layer.cells.insert(cell_index, Arc::new(WorldRegion::default()));
        layer.boundaries.insert(cell_index, insert_x - 1);
        layer.cells.insert(cell_index, target_region);

        self.expand_region_in_layer(layer, cell_index + 1, width).1
    }

    pub fn preview_expand_biome_region(&self, position: Vec2I, new_width: i32) -> Vec<RectI> {
        let (layer_index, cell_index) = self.find_layer_and_cell(position.x(), position.y());
        let layer = self.layers[layer_index].clone();
        self.expand_region_in_layer(layer, cell_index, new_width).1
    }

    fn layer_top(&self, layer: &WorldLayer) -> i32 {
        for (i, candidate) in self.layers.iter().enumerate() {
            if candidate.y_start == layer.y_start && i + 1 < self.layers.len() {
                return self.layers[i + 1].y_start;
            }
        }
        self.world_size.y() as i32
    }

    fn expand_region_in_layer(
        &self,
        mut layer: WorldLayer,
        cell_index: usize,
        new_width: i32,
    ) -> (WorldLayer, Vec<RectI>) {
        #[derive(Clone)]
        struct RegionCell {
            l_bound: i32,
            r_bound: i32,
            region: Arc<WorldRegion>,
        }

        let world_width = self.world_size.x() as i32;
        let layer_top = self.layer_top(&layer);
        let y_start = layer.y_start;
        let to_rects = |spans: &[(i32, i32)]| -> Vec<RectI> {
            spans
                .iter()
                .map(|&(l, r)| RectI::from_coords(l, y_start, r, layer_top))
                .collect()
        };

        if layer.cells.len() == 1 {
            log::info!("cannot expand region, it already fills the layer");
            return (layer, Vec::new());
        }

        if new_width >= world_width {
            // The region takes the whole layer
            layer.cells = vec![layer.cells[cell_index].clone()];
            layer.boundaries.clear();
            return (layer, to_rects(&[(0, world_width)]));
        }

        let target_region = layer.cells[cell_index].clone();

        // Flatten into explicit spans, separating target from others. The
        // first and last cell share a region when the layer wraps.
        let mut target_cells: Vec<RegionCell> = Vec::new();
        let mut other_cells: Vec<RegionCell> = Vec::new();
        let last_cell_index = layer.cells.len() - 1;
        let mut last_boundary = 0;
        for i in 0..=last_cell_index {
            let next_boundary = if i == last_cell_index {
                world_width
            } else {
                layer.boundaries[i]
            };
            let is_target = i == cell_index
                || (i == 0
                    && cell_index == last_cell_index
                    && Arc::ptr_eq(&layer.cells[i], &target_region))
                || (cell_index == 0
                    && i == last_cell_index
                    && Arc::ptr_eq(&layer.cells[i], &target_region));
            let cell = RegionCell {
                l_bound: last_boundary,
                r_bound: next_boundary,
                region: layer.cells[i].clone(),
            };
            if is_target {
                target_cells.push(cell);
            } else {
                other_cells.push(cell);
            }
            last_boundary = next_boundary;
        }

        let current_width: i32 = target_cells.iter().map(|c| c.r_bound - c.l_bound).sum();
        if current_width >= new_width {
            log::info!(
                "new cell width {new_width} must be greater than current width {current_width}"
            );
            return (layer, Vec::new());
        }

        // Push the rightmost edge right and the leftmost edge left
        let expand_right = (0.5 * (new_width - current_width) as f64).ceil() as i32;
        let expand_left = (0.5 * (new_width - current_width) as f64).floor() as i32;

        let first = 0;
        let last = target_cells.len() - 1;
        target_cells[first].r_bound += expand_right;
        target_cells[last].l_bound -= expand_left;

        // Split target spans that now cross the wrap
        let mut wrapped: Vec<RegionCell> = Vec::new();
        for cell in target_cells {
            if cell.l_bound < 0 {
                wrapped.push(RegionCell {
                    l_bound: 0,
                    r_bound: cell.r_bound,
                    region: cell.region.clone(),
                });
                wrapped.push(RegionCell {
                    l_bound: world_width + cell.l_bound,
                    r_bound: world_width,
                    region: cell.region,
                });
            } else if cell.r_bound > world_width {
                wrapped.push(RegionCell {
                    l_bound: cell.l_bound,
                    r_bound: world_width,
                    region: cell.region.clone(),
                });
                wrapped.push(RegionCell {
                    l_bound: 0,
                    r_bound: cell.r_bound - world_width,
                    region: cell.region,
                });
            } else {
                wrapped.push(cell);
            }
        }
        let target_cells = wrapped;

        // Trim or delete any overlapped neighbour
        let mut others = other_cells;
        for target in &target_cells {
            let mut surviving = Vec::with_capacity(others.len());
            for other in others {
                let r_inside = other.r_bound <= target.r_bound && other.r_bound >= target.l_bound;
                let l_inside = other.l_bound <= target.r_bound && other.l_bound >= target.l_bound;
                if r_inside && l_inside {
                    continue;
                } else if r_inside {
                    surviving.push(RegionCell {
                        l_bound: other.l_bound,
                        r_bound: target.l_bound,
                        region: other.region,
                    });
                } else if l_inside {
                    surviving.push(RegionCell {
                        l_bound: target.r_bound,
                        r_bound: other.r_bound,
                        region: other.region,
                    });
                } else {
                    surviving.push(other);
                }
            }
            others = surviving;
        }

        // Merge contiguous target spans for the invalidation rects
        let mut spans: Vec<(i32, i32)> = target_cells
            .iter()
            .map(|c| (c.l_bound, c.r_bound))
            .collect();
        spans.sort();
        let mut merged: Vec<(i32, i32)> = Vec::new();
        for span in spans {
            match merged.last_mut() {
                Some(last) if span.0 <= last.1 => last.1 = last.1.max(span.1),
                _ => merged.push(span),
            }
        }

        // Rebuild the layer's cell and boundary lists in x order
        let mut all = others;
        all.extend(target_cells);
        all.sort_by_key(|c| c.r_bound);

        layer.cells.clear();
        layer.boundaries.clear();
        for (i, cell) in all.iter().enumerate() {
            layer.cells.push(cell.region.clone());
            if i + 1 < all.len() {
                layer.boundaries.push(cell.r_bound);
            }
        }

        (layer, to_rects(&merged))
    }

    /// Appends a single-region layer.
    pub fn add_layer(&mut self, seed: u64, y_start: i32, params: RegionParams) {
        let region = self.build_region(seed, &params);
        self.layers.push(WorldLayer {
            y_start,
            boundaries: Vec::new(),
            cells: vec![Arc::new(region)],
        });
    }

    /// Appends a terrestrial layer: alternating primary / secondary
    /// regions, each with an embedded sub region, randomly sized on the
    /// world seed, with wrap-normalised boundaries. Cells whose biome
    /// matches `primary_biome` around the layer base height become player
    /// start search regions.
    pub fn add_terrestrial_layer(
        &mut self,
        seed: u64,
        params: &LayerParams,
        primary_biome: &str,
        player_start_search_y_range: i32,
    ) {
        let mut layer = WorldLayer {
            y_start: params.min_height,
            boundaries: Vec::new(),
            cells: Vec::new(),
        };

        let mut relative_sizes: Vec<f32> = Vec::new();
        let mut total_relative = 0.0f32;
        let mut mix = 0i32;
        let mut spawn_biome_indexes: Vec<usize> = Vec::new();

        let mut add_region =
            |layout: &mut WorldLayout,
             layer: &mut WorldLayer,
             region_params: &RegionParams,
             sub_params: &RegionParams,
             size_range: (f32, f32)| {
                let region = layout.build_region(seed, region_params);
                let mut sub_region = layout.build_region(seed, sub_params);
                sub_region.environment_biome_index = region.environment_biome_index;

                if region_params.biome.as_ref().map(|b| b.base_name.as_str())
                    == Some(primary_biome)
                {
                    if let Some(index) = region.block_biome_index {
                        spawn_biome_indexes.push(index);
                    }
                }
                if sub_params.biome.as_ref().map(|b| b.base_name.as_str()) == Some(primary_biome) {
                    if let Some(index) = sub_region.block_biome_index {
                        spawn_biome_indexes.push(index);
                    }
                }

                let region = Arc::new(region);
                layer.cells.push(region.clone());
                layer.cells.push(Arc::new(sub_region));
                layer.cells.push(region);

                mix += 1;
                let region_size =
                    static_random_f32_range(size_range.0, size_range.1, seed, &[&mix, &layer.y_start]);
                mix += 1;
                let mut sub_size = static_random_f32_range(
                    params.sub_region_size.0,
                    params.sub_region_size.1,
                    seed,
                    &[&mix, &layer.y_start],
                );
                total_relative += region_size;

                // A sub region is a fraction of its parent
                sub_size = sub_size.min(0.99) * region_size;
                let region_size = region_size - sub_size;

                relative_sizes.push(region_size / 2.0);
                relative_sizes.push(sub_size);
                relative_sizes.push(region_size / 2.0);
            };

        add_region(
            self,
            &mut layer,
            &params.primary_region,
            &params.primary_sub_region,
            (1.0, 1.0),
        );
        for (secondary, sub) in params
            .secondary_regions
            .iter()
            .zip(params.secondary_sub_regions.iter())
        {
            add_region(self, &mut layer, secondary, sub, params.secondary_region_size);
        }

        // Convert normalised sizes into boundaries from a random offset
        let world_width = self.world_size.x() as i32;
        let mut next_boundary = static_random_i32_range(
            0,
            world_width - 1,
            seed,
            &[&layer.y_start, &"LayerOffset"],
        );
        layer.boundaries.push(next_boundary);
        for relative in relative_sizes.iter().take(relative_sizes.len() - 1) {
            let region_size = (world_width as f32 * (relative / total_relative)) as i32;
            next_boundary += region_size;
            layer.boundaries.push(next_boundary);
        }

        // Rotate boundaries that fell past the seam back into range
        while layer.boundaries.last().is_some_and(|&b| b > world_width) {
            if let (Some(boundary), Some(cell)) = (layer.boundaries.pop(), layer.cells.pop()) {
                layer.boundaries.insert(0, boundary - world_width);
                layer.cells.insert(0, cell);
            }
        }
        if let Some(last_cell) = layer.cells.last().cloned() {
            layer.cells.insert(0, last_cell);
        }

        // Accumulate player start search regions on primary-biome cells
        let y_min = (params.base_height - player_start_search_y_range).max(0);
        let y_max =
            (params.base_height + player_start_search_y_range).min(self.world_size.y() as i32);
        let mut last_boundary = 0;
        for (i, cell) in layer.cells.iter().enumerate() {
            let next_boundary = if i < layer.boundaries.len() {
                layer.boundaries[i]
            } else {
                world_width
            };
            if cell
                .block_biome_index
                .is_some_and(|index| spawn_biome_indexes.contains(&index))
            {
                self.player_start_search_regions
                    .push(RectI::from_coords(last_boundary, y_min, next_boundary, y_max));
            }
            last_boundary = next_boundary;
        }

        self.layers.push(layer);
    }

    fn build_region(&mut self, seed: u64, params: &RegionParams) -> WorldRegion {
        let mut region = WorldRegion {
            region_liquids: params.region_liquids,
            ..WorldRegion::default()
        };

        if let Some(config) = params.terrain_noise {
            let selector = TerrainSelector::build(
                config,
                static_random_u64(seed, &[&"Terrain", &params.base_height]),
                params.base_height as f32,
                0.0,
            );
            region.terrain_selector = Some(self.register_terrain_selector(selector));
        }
        if let Some(config) = params.cave_noise {
            let fg = TerrainSelector::build(
                config,
                static_random_u64(seed, &[&"ForegroundCave", &params.base_height]),
                params.base_height as f32,
                -0.3,
            );
            let bg = TerrainSelector::build(
                config,
                static_random_u64(seed, &[&"BackgroundCave", &params.base_height]),
                params.base_height as f32,
                -0.2,
            );
            region.foreground_cave_selector = Some(self.register_terrain_selector(fg));
            region.background_cave_selector = Some(self.register_terrain_selector(bg));
        }

        if let Some(biome) = &params.biome {
            for i in 0..biome.sub_blocks.len() {
                let selector = TerrainSelector::build(
                    params.terrain_noise.unwrap_or_default(),
                    static_random_u64(seed, &[&i, &"SubBlocks"]),
                    params.base_height as f32,
                    0.0,
                );
                region
                    .sub_block_selectors
                    .push(self.register_terrain_selector(selector));
            }
            for (i, (_, commonality)) in biome.ores.iter().enumerate() {
                let fg = TerrainSelector::build(
                    params.terrain_noise.unwrap_or_default(),
                    static_random_u64(seed, &[&i, &"FgOreSelector"]),
                    params.base_height as f32,
                    -1.0 + commonality,
                );
                let bg = TerrainSelector::build(
                    params.terrain_noise.unwrap_or_default(),
                    static_random_u64(seed, &[&i, &"BgOreSelector"]),
                    params.base_height as f32,
                    -1.0 + commonality,
                );
                region
                    .foreground_ore_selectors
                    .push(self.register_terrain_selector(fg));
                region
                    .background_ore_selectors
                    .push(self.register_terrain_selector(bg));
            }

            let index = self.register_biome(biome.clone());
            region.block_biome_index = Some(index);
            region.environment_biome_index = Some(index);
        }

        region
    }

    /// Orders layers by `y_start`; must be called once building is done.
    pub fn finalize(&mut self) {
        self.layers.sort_by_key(|layer| layer.y_start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_layout(width: u32, height: u32, blending: f32) -> WorldLayout {
        let mut layout = WorldLayout::new(Vec2U::new(width, height), blending);
        layout.add_layer(1, 0, RegionParams::bare(0));
        layout.add_layer(
            1,
            (height / 2) as i32,
            RegionParams {
                biome: Some(Biome::named("tundra")),
                ..RegionParams::bare((height / 2) as i32)
            },
        );
        layout.finalize();
        layout
    }

    #[test]
    fn weighting_sums_to_one_and_sorts_descending() {
        let layout = simple_layout(1000, 500, 20.0);
        for (x, y) in [(0, 10), (500, 250), (999, 499), (123, 249)] {
            let weighting = layout.get_weighting(x, y);
            assert!(!weighting.is_empty(), "({x}, {y})");
            let total: f32 = weighting.iter().map(|w| w.weight).sum();
            assert!((total - 1.0).abs() < 1e-4, "total {total} at ({x}, {y})");
            for pair in weighting.windows(2) {
                assert!(pair[0].weight >= pair[1].weight);
            }
        }
    }

    #[test]
    fn insertion_splits_and_expands_symmetrically() {
        let width = 1000u32;
        let layout_height = 500u32;
        let mut layout = simple_layout(width, layout_height, 20.0);
        let x = (width / 2) as i32;
        let y = 10;

        let rects = layout.add_biome_region(7, Vec2I::new(x, y), Biome::named("oasis"), 100);

        assert_eq!(rects.len(), 1);
        let expected = RectI::from_coords(x - 50, 0, x + 50, (layout_height / 2) as i32);
        assert_eq!(rects[0], expected);

        let layer = &layout.layers()[0];
        assert_eq!(layer.boundaries, vec![x - 50, x + 50]);
        let mut sorted = layer.boundaries.clone();
        sorted.sort();
        assert_eq!(layer.boundaries, sorted);
    }

    #[test]
    fn insertion_at_seam_is_nudged_inward() {
        let mut layout = simple_layout(1000, 500, 20.0);
        let rects = layout.add_biome_region(7, Vec2I::new(0, 10), Biome::named("oasis"), 50);
        assert!(!rects.is_empty());
        for boundary in &layout.layers()[0].boundaries {
            assert!((0..=1000).contains(boundary));
        }
    }

    #[test]
    fn expansion_grows_the_region() {
        let mut layout = simple_layout(1000, 500, 20.0);
        let x = 500;
        layout.add_biome_region(7, Vec2I::new(x, 10), Biome::named("oasis"), 100);
        let rects = layout.expand_biome_region(Vec2I::new(x, 10), 200);
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].width(), 200);
        assert_eq!(layout.layers()[0].boundaries, vec![x - 100, x + 100]);
    }

    #[test]
    fn preview_does_not_mutate() {
        let layout = simple_layout(1000, 500, 20.0);
        let before = layout.layers()[0].boundaries.clone();
        let rects = layout.preview_add_biome_region(Vec2I::new(500, 10), 100);
        assert!(!rects.is_empty());
        assert_eq!(layout.layers()[0].boundaries, before);
    }

    #[test]
    fn terrestrial_layer_wraps_boundaries_into_range() {
        let mut layout = WorldLayout::new(Vec2U::new(3000, 2000), 30.0);
        let biome = Biome::named("forest");
        let params = LayerParams {
            min_height: 500,
            base_height: 600,
            primary_region: RegionParams {
                biome: Some(biome.clone()),
                ..RegionParams::bare(600)
            },
            primary_sub_region: RegionParams {
                biome: Some(biome.clone()),
                ..RegionParams::bare(600)
            },
            secondary_regions: vec![RegionParams {
                biome: Some(Biome::named("swamp")),
                ..RegionParams::bare(600)
            }],
            secondary_sub_regions: vec![RegionParams {
                biome: Some(Biome::named("bog")),
                ..RegionParams::bare(600)
            }],
            secondary_region_size: (0.3, 0.6),
            sub_region_size: (0.1, 0.3),
        };
        layout.add_terrestrial_layer(42, &params, "forest", 100);
        layout.finalize();

        let layer = &layout.layers()[0];
        assert_eq!(layer.cells.len(), layer.boundaries.len() + 1);
        for boundary in &layer.boundaries {
            assert!((0..=3000).contains(boundary));
        }
        let mut sorted = layer.boundaries.clone();
        sorted.sort();
        assert_eq!(layer.boundaries, sorted);
        assert!(!layout.player_start_search_regions().is_empty());
    }

    #[test]
    fn region_json_round_trip() {
        let region = WorldRegion {
            terrain_selector: Some(1),
            foreground_cave_selector: Some(2),
            background_cave_selector: None,
            sub_block_selectors: vec![3, 4],
            foreground_ore_selectors: vec![5],
            background_ore_selectors: vec![6],
            block_biome_index: Some(0),
            environment_biome_index: Some(0),
            region_liquids: RegionLiquids {
                cave_liquid: 2,
                cave_liquid_seed_density: 0.1,
                ocean_liquid: 1,
                ocean_liquid_level: 40,
                enclose_liquids: true,
                fill_microdungeons: false,
            },
        };
        let json = serde_json::to_string(&region).unwrap();
        let back: WorldRegion = serde_json::from_str(&json).unwrap();
        assert_eq!(region, back);
    }
}
