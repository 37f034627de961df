//! Region-level drivers over the cellular light array.

use super::array::{
    Cell, ColoredCellularLightArray, PointLight, ScalarCellularLightArray, SpreadLight,
};
use crate::error::{Error, Result};
use crate::math::{RectI, Vec2F, Vec2I, Vec3F};
use serde::{Deserialize, Serialize};

/// Tunables for a lighting calculation, read from the world configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LightingConfig {
    pub spread_passes: u32,
    pub spread_max_air: f32,
    pub spread_max_obstacle: f32,
    pub point_max_air: f32,
    pub point_max_obstacle: f32,
    pub point_obstacle_boost: f32,
    pub point_additive: bool,
    pub brightness_limit: f32,
}

impl Default for LightingConfig {
    fn default() -> Self {
        LightingConfig {
            spread_passes: 2,
            spread_max_air: 8.0,
            spread_max_obstacle: 3.0,
            point_max_air: 24.0,
            point_max_obstacle: 6.0,
            point_obstacle_boost: 0.25,
            point_additive: false,
            brightness_limit: 4.0,
        }
    }
}

/// A float RGB light buffer, row major.
#[derive(Debug, Clone, Default)]
pub struct Lightmap {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl Lightmap {
    pub fn new(width: u32, height: u32) -> Self {
        Lightmap {
            width,
            height,
            data: vec![0.0; width as usize * height as usize * 3],
        }
    }

    pub fn empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn offset(&self, x: u32, y: u32, op: &str) -> Result<usize> {
        if x >= self.width || y >= self.height {
            return Err(Error::range(format!(
                "[{x}, {y}] out of range in Lightmap::{op}"
            )));
        }
        Ok((y as usize * self.width as usize + x as usize) * 3)
    }

    pub fn set_scalar(&mut self, x: u32, y: u32, v: f32) -> Result<()> {
        let offset = self.offset(x, y, "set")?;
        self.data[offset..offset + 3].fill(v);
        Ok(())
    }

    pub fn set(&mut self, x: u32, y: u32, v: Vec3F) -> Result<()> {
        let offset = self.offset(x, y, "set")?;
        self.data[offset] = v.x();
        self.data[offset + 1] = v.y();
        self.data[offset + 2] = v.z();
        Ok(())
    }

    pub fn add(&mut self, x: u32, y: u32, v: Vec3F) -> Result<()> {
        let offset = self.offset(x, y, "add")?;
        self.data[offset] += v.x();
        self.data[offset + 1] += v.y();
        self.data[offset + 2] += v.z();
        Ok(())
    }

    pub fn get(&self, x: u32, y: u32) -> Result<Vec3F> {
        let offset = self.offset(x, y, "get")?;
        Ok(Vec3F::new(
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ))
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

enum ModeArray {
    Colored(ColoredCellularLightArray),
    Scalar(ScalarCellularLightArray),
}

/// Produces lighting values for a world region. Supports floating point
/// positional point and spread light sources plus per-cell pre-lighting,
/// in either colored or monochrome mode.
pub struct LightingCalculator {
    config: LightingConfig,
    array: ModeArray,
    query_region: RectI,
    calculation_region: RectI,
}

impl LightingCalculator {
    pub fn new(monochrome: bool) -> Self {
        let config = LightingConfig::default();
        let mut calculator = LightingCalculator {
            config,
            array: if monochrome {
                ModeArray::Scalar(ScalarCellularLightArray::default())
            } else {
                ModeArray::Colored(ColoredCellularLightArray::default())
            },
            query_region: RectI::null(),
            calculation_region: RectI::null(),
        };
        calculator.set_parameters(config);
        calculator
    }

    pub fn monochrome(&self) -> bool {
        matches!(self.array, ModeArray::Scalar(_))
    }

    pub fn set_monochrome(&mut self, monochrome: bool) {
        if monochrome == self.monochrome() {
            return;
        }
        self.array = if monochrome {
            ModeArray::Scalar(ScalarCellularLightArray::default())
        } else {
            ModeArray::Colored(ColoredCellularLightArray::default())
        };
        self.set_parameters(self.config);
    }

    pub fn set_parameters(&mut self, config: LightingConfig) {
        self.config = config;
        match &mut self.array {
            ModeArray::Colored(array) => array.set_parameters(
                config.spread_passes,
                config.spread_max_air,
                config.spread_max_obstacle,
                config.point_max_air,
                config.point_max_obstacle,
                config.point_obstacle_boost,
                config.point_additive,
            ),
            ModeArray::Scalar(array) => array.set_parameters(
                config.spread_passes,
                config.spread_max_air,
                config.spread_max_obstacle,
                config.point_max_air,
                config.point_max_obstacle,
                config.point_obstacle_boost,
                config.point_additive,
            ),
        }
    }

    fn border_cells(&self) -> i32 {
        match &self.array {
            ModeArray::Colored(array) => array.border_cells() as i32,
            ModeArray::Scalar(array) => array.border_cells() as i32,
        }
    }

    /// Starts a calculation for `query_region`. Input data must then be
    /// supplied for all of [`Self::calculation_region`].
    pub fn begin(&mut self, query_region: RectI) {
        self.query_region = query_region;
        self.calculation_region = query_region.padded(self.border_cells());
        let width = self.calculation_region.width() as usize;
        let height = self.calculation_region.height() as usize;
        match &mut self.array {
            ModeArray::Colored(array) => array.begin(width, height),
            ModeArray::Scalar(array) => array.begin(width, height),
        }
    }

    /// The region whose data can affect the query region.
    pub fn calculation_region(&self) -> RectI {
        self.calculation_region
    }

    /// Column-major cell index of a world position inside the calculation
    /// region.
    pub fn base_index_for(&self, position: Vec2I) -> usize {
        let x = (position.x() - self.calculation_region.x_min()) as usize;
        let y = (position.y() - self.calculation_region.y_min()) as usize;
        x * self.calculation_region.height() as usize + y
    }

    pub fn set_cell_index(&mut self, index: usize, light: Vec3F, obstacle: bool) {
        match &mut self.array {
            ModeArray::Colored(array) => array.set_cell_at_index(index, Cell { light, obstacle }),
            ModeArray::Scalar(array) => array.set_cell_at_index(
                index,
                Cell {
                    light: light.sum() / 3.0,
                    obstacle,
                },
            ),
        }
    }

    pub fn add_spread_light(&mut self, position: Vec2F, light: Vec3F) {
        let array_position = position - self.calculation_region.min.to_f32();
        match &mut self.array {
            ModeArray::Colored(array) => array.add_spread_light(SpreadLight {
                position: array_position,
                value: light,
            }),
            ModeArray::Scalar(array) => array.add_spread_light(SpreadLight {
                position: array_position,
                value: light.max_component(),
            }),
        }
    }

    pub fn add_point_light(
        &mut self,
        position: Vec2F,
        light: Vec3F,
        beam: f32,
        beam_angle: f32,
        beam_ambience: f32,
        as_spread: bool,
    ) {
        let array_position = position - self.calculation_region.min.to_f32();
        match &mut self.array {
            ModeArray::Colored(array) => array.add_point_light(PointLight {
                position: array_position,
                value: light,
                beam,
                beam_angle,
                beam_ambience,
                as_spread,
            }),
            ModeArray::Scalar(array) => array.add_point_light(PointLight {
                position: array_position,
                value: light.max_component(),
                beam,
                beam_angle,
                beam_ambience,
                as_spread,
            }),
        }
    }

    /// Finishes the calculation into `output`, which is resized to the
    /// query region and clamped to the configured brightness limit.
    pub fn calculate(&mut self, output: &mut Lightmap) -> Result<()> {
        let array_min = self.query_region.min - self.calculation_region.min;
        let array_max = self.query_region.max - self.calculation_region.min;
        let (x0, y0) = (array_min.x() as usize, array_min.y() as usize);
        let (x1, y1) = (array_max.x() as usize, array_max.y() as usize);

        *output = Lightmap::new((x1 - x0) as u32, (y1 - y0) as u32);
        let limit = self.config.brightness_limit;

        match &mut self.array {
            ModeArray::Colored(array) => {
                array.calculate(x0, y0, x1, y1);
                for x in x0..x1 {
                    for y in y0..y1 {
                        let mut light = array.get_light(x, y);
                        let intensity = light.max_component();
                        if intensity > limit {
                            light = light * (limit / intensity);
                        }
                        output.set((x - x0) as u32, (y - y0) as u32, light)?;
                    }
                }
            }
            ModeArray::Scalar(array) => {
                array.calculate(x0, y0, x1, y1);
                for x in x0..x1 {
                    for y in y0..y1 {
                        let light = array.get_light(x, y).min(limit);
                        output.set_scalar((x - x0) as u32, (y - y0) as u32, light)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Computes light intensity at a single point, using scalar lights and the
/// same cellular pipeline, then bilinearly interpolating the queried block.
pub struct LightIntensityCalculator {
    array: ScalarCellularLightArray,
    query_position: Vec2F,
    query_region: RectI,
    calculation_region: RectI,
}

impl LightIntensityCalculator {
    pub fn new(config: LightingConfig) -> Self {
        let mut array = ScalarCellularLightArray::default();
        array.set_parameters(
            config.spread_passes,
            config.spread_max_air,
            config.spread_max_obstacle,
            config.point_max_air,
            config.point_max_obstacle,
            config.point_obstacle_boost,
            config.point_additive,
        );
        LightIntensityCalculator {
            array,
            query_position: Vec2F::zero(),
            query_region: RectI::null(),
            calculation_region: RectI::null(),
        }
    }

    pub fn begin(&mut self, query_position: Vec2F) {
        self.query_position = query_position;
        self.query_region = RectI::with_size(
            (query_position - Vec2F::filled(0.5)).floor_vec(),
            Vec2I::new(2, 2),
        );
        self.calculation_region = self.query_region.padded(self.array.border_cells() as i32);
        self.array.begin(
            self.calculation_region.width() as usize,
            self.calculation_region.height() as usize,
        );
    }

    pub fn calculation_region(&self) -> RectI {
        self.calculation_region
    }

    pub fn set_cell(&mut self, position: Vec2I, cell: Cell<f32>) {
        let x = (position.x() - self.calculation_region.x_min()) as usize;
        let y = (position.y() - self.calculation_region.y_min()) as usize;
        let index = x * self.calculation_region.height() as usize + y;
        self.array.set_cell_at_index(index, cell);
    }

    pub fn add_spread_light(&mut self, position: Vec2F, light: f32) {
        self.array.add_spread_light(SpreadLight {
            position: position - self.calculation_region.min.to_f32(),
            value: light,
        });
    }

    pub fn add_point_light(&mut self, position: Vec2F, light: f32) {
        self.array.add_point_light(PointLight {
            position: position - self.calculation_region.min.to_f32(),
            value: light,
            beam: 0.0,
            beam_angle: 0.0,
            beam_ambience: 0.0,
            as_spread: false,
        });
    }

    pub fn calculate(&mut self) -> f32 {
        let array_min = self.query_region.min - self.calculation_region.min;
        let array_max = self.query_region.max - self.calculation_region.min;
        let (x0, y0) = (array_min.x() as usize, array_min.y() as usize);
        self.array
            .calculate(x0, y0, array_max.x() as usize, array_max.y() as usize);

        let ll = self.array.get_light(x0, y0);
        let lr = self.array.get_light(x0 + 1, y0);
        let ul = self.array.get_light(x0, y0 + 1);
        let ur = self.array.get_light(x0 + 1, y0 + 1);

        let xl = self.query_position.x() - 0.5 - self.query_region.x_min() as f32;
        let yl = self.query_position.y() - 0.5 - self.query_region.y_min() as f32;

        lerp(yl, lerp(xl, ll, lr), lerp(xl, ul, ur))
    }
}

fn lerp(t: f32, a: f32, b: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lightmap_bounds_are_checked() {
        let mut map = Lightmap::new(8, 8);
        assert!(map.set_scalar(7, 7, 1.0).is_ok());
        let err = map.set_scalar(8, 7, 1.0).unwrap_err();
        assert!(matches!(err, Error::Range(_)));
        assert!(map.get(0, 8).is_err());
    }

    #[test]
    fn calculator_pads_query_region() {
        let mut calc = LightingCalculator::new(false);
        calc.begin(RectI::from_coords(0, 0, 16, 16));
        let region = calc.calculation_region();
        assert!(region.x_min() < 0);
        assert!(region.x_max() > 16);
    }

    #[test]
    fn calculate_produces_query_sized_map() {
        let mut calc = LightingCalculator::new(true);
        calc.begin(RectI::from_coords(0, 0, 8, 8));
        let region = calc.calculation_region();
        for position in region.positions() {
            let index = calc.base_index_for(position);
            calc.set_cell_index(index, Vec3F::zero(), false);
        }
        calc.add_point_light(Vec2F::new(4.0, 4.0), Vec3F::filled(2.0), 0.0, 0.0, 0.0, false);

        let mut map = Lightmap::default();
        calc.calculate(&mut map).unwrap();
        assert_eq!(map.width(), 8);
        assert_eq!(map.height(), 8);
        assert!(map.get(4, 4).unwrap().x() > 0.0);
    }

    #[test]
    fn intensity_at_light_position_is_full() {
        let mut calc = LightIntensityCalculator::new(LightingConfig {
            point_max_air: 4.0,
            ..LightingConfig::default()
        });
        calc.begin(Vec2F::new(8.5, 8.5));
        for position in calc.calculation_region().positions() {
            calc.set_cell(
                position,
                Cell {
                    light: 0.0,
                    obstacle: false,
                },
            );
        }
        calc.add_point_light(Vec2F::new(8.5, 8.5), 1.0);
        let intensity = calc.calculate();
        assert!(intensity > 0.5, "intensity was {intensity}");
    }
}
