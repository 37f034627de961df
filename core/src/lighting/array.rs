//! The cellular light array and its scalar / colored trait instantiations.

use crate::math::{Vec2F, Vec3F, SQRT2};

/// Operations a light value type must provide for the cellular pipeline.
pub trait LightTraits {
    type Value: Copy + Default;

    /// Propagate `source` toward `dest`, attenuated by `drop`.
    fn spread(source: Self::Value, dest: Self::Value, drop: f32) -> Self::Value;
    /// Reduce a value by `drop`, clamping at zero.
    fn subtract(value: Self::Value, drop: f32) -> Self::Value;
    /// Scale a value by a factor.
    fn multiply(value: Self::Value, factor: f32) -> Self::Value;
    fn max(a: Self::Value, b: Self::Value) -> Self::Value;
    fn add(a: Self::Value, b: Self::Value) -> Self::Value;
    fn max_intensity(value: Self::Value) -> f32;
}

/// Single-channel lighting.
pub struct ScalarLightTraits;

impl LightTraits for ScalarLightTraits {
    type Value = f32;

    fn spread(source: f32, dest: f32, drop: f32) -> f32 {
        (source - drop).max(dest)
    }

    fn subtract(value: f32, drop: f32) -> f32 {
        (value - drop).max(0.0)
    }

    fn multiply(value: f32, factor: f32) -> f32 {
        value * factor
    }

    fn max(a: f32, b: f32) -> f32 {
        a.max(b)
    }

    fn add(a: f32, b: f32) -> f32 {
        a + b
    }

    fn max_intensity(value: f32) -> f32 {
        value
    }
}

/// Three-channel lighting. Attenuation is applied proportionally across
/// channels so the ratio between them, and therefore the hue, survives
/// spreading.
pub struct ColoredLightTraits;

impl LightTraits for ColoredLightTraits {
    type Value = Vec3F;

    fn spread(source: Vec3F, dest: Vec3F, drop: f32) -> Vec3F {
        let max_channel = source.max_component();
        if max_channel <= 0.0 {
            return dest;
        }
        let drop = drop / max_channel;
        Vec3F::new(
            (source.x() - source.x() * drop).max(dest.x()),
            (source.y() - source.y() * drop).max(dest.y()),
            (source.z() - source.z() * drop).max(dest.z()),
        )
    }

    fn subtract(mut value: Vec3F, drop: f32) -> Vec3F {
        let max_channel = value.max_component();
        if max_channel <= 0.0 {
            return value;
        }
        for i in 0..3 {
            let channel_drop = drop * value[i] / max_channel;
            value[i] = if value[i] > channel_drop {
                value[i] - channel_drop
            } else {
                0.0
            };
        }
        value
    }

    fn multiply(value: Vec3F, factor: f32) -> Vec3F {
        value * factor
    }

    fn max(a: Vec3F, b: Vec3F) -> Vec3F {
        a.vmax(b)
    }

    fn add(a: Vec3F, b: Vec3F) -> Vec3F {
        a + b
    }

    fn max_intensity(value: Vec3F) -> f32 {
        value.max_component()
    }
}

/// One grid cell: current light value plus the obstacle flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cell<V> {
    pub light: V,
    pub obstacle: bool,
}

/// A grid-resident light source; integer positions sit on grid corners,
/// not cell centers.
#[derive(Debug, Clone, Copy)]
pub struct SpreadLight<V> {
    pub position: Vec2F,
    pub value: V,
}

/// A positional emitter evaluated per target cell with line-of-sight
/// attenuation. `beam > 0` makes it directional.
#[derive(Debug, Clone, Copy)]
pub struct PointLight<V> {
    pub position: Vec2F,
    pub value: V,
    pub beam: f32,
    pub beam_angle: f32,
    pub beam_ambience: f32,
    pub as_spread: bool,
}

/// Cellular light computation over a rectangular window.
///
/// Callers must provide valid input data (lights, obstacles, pre-lit cells)
/// in a border of [`Self::border_cells`] around the query region.
pub struct CellularLightArray<T: LightTraits> {
    width: usize,
    height: usize,
    cells: Vec<Cell<T::Value>>,
    spread_lights: Vec<SpreadLight<T::Value>>,
    point_lights: Vec<PointLight<T::Value>>,

    spread_passes: u32,
    spread_max_air: f32,
    spread_max_obstacle: f32,
    point_max_air: f32,
    point_max_obstacle: f32,
    point_obstacle_boost: f32,
    point_additive: bool,
}

pub type ScalarCellularLightArray = CellularLightArray<ScalarLightTraits>;
pub type ColoredCellularLightArray = CellularLightArray<ColoredLightTraits>;

impl<T: LightTraits> Default for CellularLightArray<T> {
    fn default() -> Self {
        CellularLightArray {
            width: 0,
            height: 0,
            cells: Vec::new(),
            spread_lights: Vec::new(),
            point_lights: Vec::new(),
            spread_passes: 0,
            spread_max_air: 1.0,
            spread_max_obstacle: 1.0,
            point_max_air: 1.0,
            point_max_obstacle: 1.0,
            point_obstacle_boost: 0.0,
            point_additive: false,
        }
    }
}

#[allow(clippy::too_many_arguments)]
impl<T: LightTraits> CellularLightArray<T> {
    pub fn set_parameters(
        &mut self,
        spread_passes: u32,
        spread_max_air: f32,
        spread_max_obstacle: f32,
        point_max_air: f32,
        point_max_obstacle: f32,
        point_obstacle_boost: f32,
        point_additive: bool,
    ) {
        self.spread_passes = spread_passes;
        self.spread_max_air = spread_max_air;
        self.spread_max_obstacle = spread_max_obstacle;
        self.point_max_air = point_max_air;
        self.point_max_obstacle = point_max_obstacle;
        self.point_obstacle_boost = point_obstacle_boost;
        self.point_additive = point_additive;
    }

    /// Width of the border around the query region in which input data must
    /// be provided.
    pub fn border_cells(&self) -> usize {
        self.spread_max_air.max(self.point_max_air).max(0.0).ceil() as usize
    }

    /// Starts a new calculation. Reuses storage when the size is unchanged;
    /// always clears all light and obstacle state.
    pub fn begin(&mut self, width: usize, height: usize) {
        self.spread_lights.clear();
        self.point_lights.clear();

        if width != self.width || height != self.height {
            self.width = width;
            self.height = height;
            self.cells = vec![Cell::default(); width * height];
        } else {
            self.cells.fill(Cell::default());
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Registers a spread light. Lights outside the array have no effect.
    pub fn add_spread_light(&mut self, light: SpreadLight<T::Value>) {
        self.spread_lights.push(light);
    }

    /// Registers a point light; an `as_spread` light is instead seeded into
    /// the spread pass.
    pub fn add_point_light(&mut self, light: PointLight<T::Value>) {
        if light.as_spread {
            self.spread_lights.push(SpreadLight {
                position: light.position,
                value: light.value,
            });
        } else {
            self.point_lights.push(light);
        }
    }

    fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.width && y < self.height);
        x * self.height + y
    }

    pub fn set_light(&mut self, x: usize, y: usize, light: T::Value) {
        let index = self.index(x, y);
        self.cells[index].light = light;
    }

    pub fn get_light(&self, x: usize, y: usize) -> T::Value {
        self.cells[self.index(x, y)].light
    }

    pub fn set_obstacle(&mut self, x: usize, y: usize, obstacle: bool) {
        let index = self.index(x, y);
        self.cells[index].obstacle = obstacle;
    }

    pub fn get_obstacle(&self, x: usize, y: usize) -> bool {
        self.cells[self.index(x, y)].obstacle
    }

    pub fn set_cell_at_index(&mut self, index: usize, cell: Cell<T::Value>) {
        self.cells[index] = cell;
    }

    /// Obstacle test tolerant of positions just outside the array, which the
    /// line walk can touch at the border.
    fn obstacle_at(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return false;
        }
        self.cells[x as usize * self.height + y as usize].obstacle
    }

    /// Runs the full pipeline over `[x_min, x_max) x [y_min, y_max)`.
    pub fn calculate(&mut self, x_min: usize, y_min: usize, x_max: usize, y_max: usize) {
        self.set_spread_lighting_points();
        self.calculate_light_spread(x_min, y_min, x_max, y_max);
        self.calculate_point_lighting(x_min, y_min, x_max, y_max);
    }

    /// Seeds each spread light into the 2x2 block footprint that contains
    /// it, pre-attenuated by the bilinear distance to each corner. This
    /// smooths sub-tile light positions without multi-sampling.
    fn set_spread_lighting_points(&mut self) {
        let lights = std::mem::take(&mut self.spread_lights);
        for light in &lights {
            // -0.5 corrects for lights sitting on grid corners, not centers
            let min_x = (light.position.x() - 0.5).floor() as i64;
            let min_y = (light.position.y() - 0.5).floor() as i64;
            let max_x = min_x + 1;
            let max_y = min_y + 1;

            let x_dist = light.position.x() - min_x as f32 - 0.5;
            let y_dist = light.position.y() - min_y as f32 - 0.5;

            // Attenuation picked from the nearest block's obstacle value
            let probe = light.position.floor_vec();
            let one_block_att = if self.obstacle_at(probe.x() as i64, probe.y() as i64) {
                1.0 / self.spread_max_obstacle
            } else {
                1.0 / self.spread_max_air
            };

            let corners = [
                (min_x, min_y, (1.0 - x_dist) + (1.0 - y_dist)),
                (min_x, max_y, (1.0 - x_dist) + y_dist),
                (max_x, min_y, x_dist + (1.0 - y_dist)),
                (max_x, max_y, x_dist + y_dist),
            ];

            for (x, y, closeness) in corners {
                if x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height {
                    let (x, y) = (x as usize, y as usize);
                    let seeded =
                        T::subtract(light.value, one_block_att * (2.0 - closeness));
                    let light_value = T::max(self.get_light(x, y), seeded);
                    self.set_light(x, y, light_value);
                }
            }
        }
        self.spread_lights = lights;
    }

    /// Octagonal cellular spread. Each pass sweeps forward (right / up /
    /// both up-right and down-right diagonals) and then backward (left /
    /// down / both left diagonals), so information travels in all eight
    /// directions within one pass.
    fn calculate_light_spread(&mut self, x_min: usize, y_min: usize, x_max: usize, y_max: usize) {
        let drop_air = 1.0 / self.spread_max_air;
        let drop_obstacle = 1.0 / self.spread_max_obstacle;
        let drop_air_diag = drop_air * SQRT2;
        let drop_obstacle_diag = drop_obstacle * SQRT2;

        // Enlarge the window by the ambient spread distance.
        let spread = self.spread_max_air.ceil() as usize;
        let x_min = x_min.saturating_sub(spread);
        let y_min = y_min.saturating_sub(spread);
        let x_max = (x_max + spread).min(self.width);
        let y_max = (y_max + spread).min(self.height);

        if x_max < x_min + 3 || y_max < y_min + 3 {
            return;
        }

        for _ in 0..self.spread_passes {
            for x in (x_min + 1)..(x_max - 1) {
                let col = x * self.height;
                let col_right = (x + 1) * self.height;

                for y in (y_min + 1)..(y_max - 1) {
                    let cell = self.cells[col + y];
                    let (straight, diag) = if cell.obstacle {
                        (drop_obstacle, drop_obstacle_diag)
                    } else {
                        (drop_air, drop_air_diag)
                    };

                    let right = &mut self.cells[col_right + y];
                    right.light = T::spread(cell.light, right.light, straight);
                    let up = &mut self.cells[col + y + 1];
                    up.light = T::spread(cell.light, up.light, straight);
                    let right_up = &mut self.cells[col_right + y + 1];
                    right_up.light = T::spread(cell.light, right_up.light, diag);
                    let right_down = &mut self.cells[col_right + y - 1];
                    right_down.light = T::spread(cell.light, right_down.light, diag);
                }
            }

            for x in ((x_min + 1)..(x_max - 1)).rev() {
                let col = x * self.height;
                let col_left = (x - 1) * self.height;

                for y in ((y_min + 1)..(y_max - 1)).rev() {
                    let cell = self.cells[col + y];
                    let (straight, diag) = if cell.obstacle {
                        (drop_obstacle, drop_obstacle_diag)
                    } else {
                        (drop_air, drop_air_diag)
                    };

                    let left = &mut self.cells[col_left + y];
                    left.light = T::spread(cell.light, left.light, straight);
                    let down = &mut self.cells[col + y - 1];
                    down.light = T::spread(cell.light, down.light, straight);
                    let left_up = &mut self.cells[col_left + y + 1];
                    left_up.light = T::spread(cell.light, left_up.light, diag);
                    let left_down = &mut self.cells[col_left + y - 1];
                    left_down.light = T::spread(cell.light, left_down.light, diag);
                }
            }
        }
    }

    /// Per-cell point light evaluation: distance fall-off, optional beam
    /// weighting, then line-of-sight obstacle attenuation.
    fn calculate_point_lighting(&mut self, x_min: usize, y_min: usize, x_max: usize, y_max: usize) {
        if self.width == 0 || self.height == 0 {
            return;
        }

        let per_block_obstacle = 1.0 / self.point_max_obstacle;
        let per_block_air = 1.0 / self.point_max_air;

        let lights = std::mem::take(&mut self.point_lights);
        for light in &lights {
            let pos = light.position;
            if pos.x() < 0.0
                || pos.y() < 0.0
                || pos.x() > (self.width - 1) as f32
                || pos.y() > (self.height - 1) as f32
            {
                continue;
            }

            let max_intensity = T::max_intensity(light.value);
            let beam_direction = Vec2F::with_angle(light.beam_angle, 1.0);
            let max_range = self.point_max_air;

            let lx_min = ((pos.x() - max_range).floor().max(x_min as f32)) as usize;
            let ly_min = ((pos.y() - max_range).floor().max(y_min as f32)) as usize;
            let lx_max = ((pos.x() + max_range).ceil().min(x_max as f32)) as usize;
            let ly_max = ((pos.y() + max_range).ceil().min(y_max as f32)) as usize;

            for x in lx_min..lx_max {
                for y in ly_min..ly_max {
                    let existing = self.get_light(x, y);
                    let block_pos = Vec2F::new(x as f32, y as f32);

                    let relative = block_pos - pos;
                    let distance = relative.magnitude();
                    if distance == 0.0 {
                        self.set_light(x, y, T::max(light.value, existing));
                        continue;
                    }

                    let mut attenuation = distance * per_block_air;
                    if attenuation >= 1.0 {
                        continue;
                    }

                    let direction = relative / distance;
                    if light.beam > 0.0 {
                        let off_axis = light.beam * (1.0 - direction.dot(beam_direction));
                        attenuation +=
                            (1.0 - light.beam_ambience) * off_axis.clamp(0.0, 1.0);
                        if attenuation >= 1.0 {
                            continue;
                        }
                    }

                    // Circularize the per-block manhattan attenuation
                    let circularized =
                        per_block_obstacle / direction.x().abs().max(direction.y().abs());
                    let mut block_attenuation =
                        self.line_attenuation(block_pos, pos, circularized, 1.0 - attenuation);

                    // Boost single obstacles so thin walls still block
                    block_attenuation +=
                        block_attenuation.min(circularized) * self.point_obstacle_boost;
                    attenuation += block_attenuation;

                    if attenuation < 1.0 {
                        let contribution =
                            T::subtract(light.value, attenuation * max_intensity);
                        if T::max_intensity(contribution) > 0.0 {
                            if self.point_additive {
                                self.set_light(x, y, T::add(existing, contribution));
                            } else {
                                self.set_light(x, y, T::max(existing, contribution));
                            }
                        }
                    }
                }
            }
        }
        self.point_lights = lights;
    }

    /// Walks Xiaolin Wu's anti-aliased line from `start` to `end`, summing
    /// `per_obstacle_attenuation` scaled by each touched obstacle pixel's
    /// fractional coverage. Early-exits at `max_attenuation`.
    fn line_attenuation(
        &self,
        start: Vec2F,
        end: Vec2F,
        per_obstacle_attenuation: f32,
        max_attenuation: f32,
    ) -> f32 {
        let mut attenuation = 0.0f32;

        // Correction: integer coordinates name the lower-left corner
        let mut x1 = start.x() - 0.5;
        let mut y1 = start.y() - 0.5;
        let mut x2 = end.x() - 0.5;
        let mut y2 = end.y() - 0.5;

        let dx = x2 - x1;
        let dy = y2 - y1;

        let fpart = |v: f32| v - v.floor();
        let rfpart = |v: f32| 1.0 - (v - v.floor());
        let ipart = |v: f32| v.floor() as i64;

        if dx.abs() < dy.abs() {
            if y2 < y1 {
                std::mem::swap(&mut y1, &mut y2);
                std::mem::swap(&mut x1, &mut x2);
            }
            let gradient = dx / dy;

            let yend = y1.round();
            let xend = x1 + gradient * (yend - y1);
            let ygap = rfpart(y1 + 0.5);
            let ypxl1 = yend as i64;
            let xpxl1 = ipart(xend);

            if self.obstacle_at(xpxl1, ypxl1) {
                attenuation += rfpart(xend) * ygap * per_obstacle_attenuation;
            }
            if self.obstacle_at(xpxl1 + 1, ypxl1) {
                attenuation += fpart(xend) * ygap * per_obstacle_attenuation;
            }
            if attenuation >= max_attenuation {
                return max_attenuation;
            }

            let mut interx = xend + gradient;

            let yend = y2.round();
            let xend = x2 + gradient * (yend - y2);
            let ygap = fpart(y2 + 0.5);
            let ypxl2 = yend as i64;
            let xpxl2 = ipart(xend);

            if self.obstacle_at(xpxl2, ypxl2) {
                attenuation += rfpart(xend) * ygap * per_obstacle_attenuation;
            }
            if self.obstacle_at(xpxl2 + 1, ypxl2) {
                attenuation += fpart(xend) * ygap * per_obstacle_attenuation;
            }
            if attenuation >= max_attenuation {
                return max_attenuation;
            }

            for y in (ypxl1 + 1)..ypxl2 {
                let ix = ipart(interx);
                let frac = interx - ix as f32;

                if self.obstacle_at(ix, y) {
                    attenuation += (1.0 - frac) * per_obstacle_attenuation;
                }
                if self.obstacle_at(ix + 1, y) {
                    attenuation += frac * per_obstacle_attenuation;
                }
                if attenuation >= max_attenuation {
                    return max_attenuation;
                }
                interx += gradient;
            }
        } else {
            if x2 < x1 {
                std::mem::swap(&mut x1, &mut x2);
                std::mem::swap(&mut y1, &mut y2);
            }
            let gradient = dy / dx;

            let xend = x1.round();
            let yend = y1 + gradient * (xend - x1);
            let xgap = rfpart(x1 + 0.5);
            let xpxl1 = xend as i64;
            let ypxl1 = ipart(yend);

            if self.obstacle_at(xpxl1, ypxl1) {
                attenuation += rfpart(yend) * xgap * per_obstacle_attenuation;
            }
            if self.obstacle_at(xpxl1, ypxl1 + 1) {
                attenuation += fpart(yend) * xgap * per_obstacle_attenuation;
            }
            if attenuation >= max_attenuation {
                return max_attenuation;
            }

            let mut intery = yend + gradient;

            let xend = x2.round();
            let yend = y2 + gradient * (xend - x2);
            let xgap = fpart(x2 + 0.5);
            let xpxl2 = xend as i64;
            let ypxl2 = ipart(yend);

            if self.obstacle_at(xpxl2, ypxl2) {
                attenuation += rfpart(yend) * xgap * per_obstacle_attenuation;
            }
            if self.obstacle_at(xpxl2, ypxl2 + 1) {
                attenuation += fpart(yend) * xgap * per_obstacle_attenuation;
            }
            if attenuation >= max_attenuation {
                return max_attenuation;
            }

            for x in (xpxl1 + 1)..xpxl2 {
                let iy = ipart(intery);
                let frac = intery - iy as f32;

                if self.obstacle_at(x, iy) {
                    attenuation += (1.0 - frac) * per_obstacle_attenuation;
                }
                if self.obstacle_at(x, iy + 1) {
                    attenuation += frac * per_obstacle_attenuation;
                }
                if attenuation >= max_attenuation {
                    return max_attenuation;
                }
                intery += gradient;
            }
        }

        attenuation.min(max_attenuation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scalar_array(w: usize, h: usize) -> ScalarCellularLightArray {
        let mut array = ScalarCellularLightArray::default();
        array.set_parameters(2, 4.0, 1.5, 4.0, 1.0, 0.0, false);
        array.begin(w, h);
        array
    }

    #[test]
    fn empty_calculation_stays_dark() {
        let mut array = scalar_array(16, 16);
        array.calculate(0, 0, 16, 16);
        for x in 0..16 {
            for y in 0..16 {
                assert_eq!(array.get_light(x, y), 0.0);
            }
        }
    }

    #[test]
    fn single_point_light_falloff() {
        let mut array = scalar_array(16, 16);
        array.add_point_light(PointLight {
            position: Vec2F::new(8.0, 8.0),
            value: 10.0,
            beam: 0.0,
            beam_angle: 0.0,
            beam_ambience: 0.0,
            as_spread: false,
        });
        array.calculate(0, 0, 16, 16);

        assert!(array.get_light(8, 8) >= 10.0);
        assert_relative_eq!(array.get_light(9, 8), 7.5, epsilon = 1e-3);
        assert_relative_eq!(array.get_light(12, 8), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn point_light_blocked_by_obstacle_wall() {
        let mut array = scalar_array(16, 16);
        // Full-height wall one block right of the light
        for y in 0..16 {
            array.set_obstacle(10, y, true);
        }
        array.add_point_light(PointLight {
            position: Vec2F::new(8.0, 8.0),
            value: 10.0,
            beam: 0.0,
            beam_angle: 0.0,
            beam_ambience: 0.0,
            as_spread: false,
        });
        array.calculate(0, 0, 16, 16);

        assert!(array.get_light(11, 8) < array.get_light(9, 8));
    }

    #[test]
    fn spread_light_expands_outward() {
        let mut array = scalar_array(16, 16);
        array.add_spread_light(SpreadLight {
            position: Vec2F::new(8.0, 8.0),
            value: 1.0,
        });
        array.calculate(0, 0, 16, 16);

        let center = array.get_light(8, 8);
        assert!(center > 0.0);
        assert!(array.get_light(10, 8) > 0.0);
        assert!(array.get_light(10, 8) < center);
        // Beyond the spread radius nothing arrives
        assert_eq!(array.get_light(1, 1), 0.0);
    }

    #[test]
    fn monotonic_in_source_value() {
        let run = |value: f32| -> f32 {
            let mut array = scalar_array(16, 16);
            array.add_spread_light(SpreadLight {
                position: Vec2F::new(8.0, 8.0),
                value,
            });
            array.calculate(0, 0, 16, 16);
            array.get_light(9, 9)
        };
        assert!(run(2.0) >= run(1.0));
    }

    #[test]
    fn colored_spread_preserves_hue() {
        let mut array = ColoredCellularLightArray::default();
        array.set_parameters(2, 6.0, 1.5, 6.0, 1.0, 0.0, false);
        array.begin(8, 8);
        array.add_spread_light(SpreadLight {
            position: Vec2F::new(0.0, 0.0),
            value: Vec3F::new(10.0, 5.0, 2.0),
        });
        array.calculate(0, 0, 8, 8);

        for x in 0..8 {
            for y in 0..8 {
                let light = array.get_light(x, y);
                if light.x() > 1e-3 {
                    assert_relative_eq!(light.y() / light.x(), 0.5, max_relative = 0.01);
                    assert_relative_eq!(light.z() / light.x(), 0.2, max_relative = 0.01);
                }
            }
        }
    }

    #[test]
    fn colored_subtract_clamps_at_zero() {
        // Over-large drops zero channels out instead of going negative.
        let value = Vec3F::new(0.2, 0.1, 0.05);
        let out = ColoredLightTraits::subtract(value, 5.0);
        assert!(out.x() >= 0.0 && out.y() >= 0.0 && out.z() >= 0.0);
    }

    #[test]
    fn begin_clears_prior_state() {
        let mut array = scalar_array(8, 8);
        array.set_light(4, 4, 5.0);
        array.set_obstacle(4, 4, true);
        array.begin(8, 8);
        assert_eq!(array.get_light(4, 4), 0.0);
        assert!(!array.get_obstacle(4, 4));
    }
}
