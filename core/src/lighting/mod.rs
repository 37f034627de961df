//! Cellular lighting: spread (grid-resident) and point (positional) light
//! sources evaluated over a padded tile window.

mod array;
mod calculator;

pub use array::{
    Cell, CellularLightArray, ColoredCellularLightArray, ColoredLightTraits, LightTraits,
    PointLight, ScalarCellularLightArray, ScalarLightTraits, SpreadLight,
};
pub use calculator::{LightIntensityCalculator, LightingCalculator, LightingConfig, Lightmap};
