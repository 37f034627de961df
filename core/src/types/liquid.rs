//! Liquid ids and per-tile liquid state.

use serde::{Deserialize, Serialize};

pub type LiquidId = u8;

/// No liquid present.
pub const EMPTY_LIQUID_ID: LiquidId = 0;

/// A liquid quantity without pressure, used for query results and
/// collection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LiquidLevel {
    pub liquid: LiquidId,
    pub level: f32,
}

impl LiquidLevel {
    pub fn new(liquid: LiquidId, level: f32) -> Self {
        LiquidLevel { liquid, level }
    }

    pub fn is_empty(&self) -> bool {
        self.liquid == EMPTY_LIQUID_ID || self.level <= 0.0
    }

    /// Removes up to `amount`, returning what was taken.
    pub fn take(&mut self, amount: f32) -> LiquidLevel {
        let taken = amount.min(self.level);
        self.level -= taken;
        let result = LiquidLevel::new(self.liquid, taken);
        if self.level <= 0.0 {
            *self = LiquidLevel::default();
        }
        result
    }
}

/// Full per-tile liquid state as stored and simulated.
///
/// `level` lies in `[0, 1]` except in source tiles, which are pinned at 1;
/// `pressure` is never negative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LiquidStore {
    pub liquid: LiquidId,
    pub level: f32,
    pub pressure: f32,
    pub source: bool,
}

impl LiquidStore {
    pub fn new(liquid: LiquidId, level: f32, pressure: f32, source: bool) -> Self {
        LiquidStore {
            liquid,
            level,
            pressure,
            source,
        }
    }

    pub fn filled(liquid: LiquidId, level: f32) -> Self {
        LiquidStore::new(liquid, level, 0.0, false)
    }

    /// An endless source tile, always at level 1.
    pub fn endless(liquid: LiquidId, pressure: f32) -> Self {
        LiquidStore::new(liquid, 1.0, pressure, true)
    }

    pub fn is_empty(&self) -> bool {
        self.liquid == EMPTY_LIQUID_ID || self.level <= 0.0
    }

    pub fn liquid_level(&self) -> LiquidLevel {
        LiquidLevel::new(self.liquid, self.level)
    }

    /// Applies new simulation state, returning a net update when the
    /// visible (quantized) state changed.
    pub fn update(&mut self, liquid: LiquidId, level: f32, pressure: f32) -> Option<LiquidNetUpdate> {
        let before = self.net_update();
        self.liquid = liquid;
        self.level = if self.source { 1.0 } else { level };
        self.pressure = pressure.max(0.0);
        let after = self.net_update();
        (before != after).then_some(after)
    }

    pub fn take(&mut self, amount: f32) -> LiquidLevel {
        if self.source {
            return LiquidLevel::new(self.liquid, amount.min(1.0));
        }
        let taken = amount.min(self.level);
        self.level -= taken;
        let result = LiquidLevel::new(self.liquid, taken);
        if self.level <= 0.0 {
            *self = LiquidStore::default();
        }
        result
    }

    pub fn net_update(&self) -> LiquidNetUpdate {
        LiquidNetUpdate {
            liquid: self.liquid,
            level: float_to_byte(self.level),
        }
    }
}

/// Quantized liquid state sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiquidNetUpdate {
    pub liquid: LiquidId,
    pub level: u8,
}

impl LiquidNetUpdate {
    pub fn liquid_level(&self) -> LiquidLevel {
        LiquidLevel::new(self.liquid, byte_to_float(self.level))
    }
}

pub fn byte_to_float(byte: u8) -> f32 {
    byte as f32 / 255.0
}

pub fn float_to_byte(float: f32) -> u8 {
    (float.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tiles_stay_full() {
        let mut store = LiquidStore::endless(2, 1.5);
        store.update(2, 0.25, 0.0);
        assert_eq!(store.level, 1.0);

        let taken = store.take(0.5);
        assert_eq!(taken.level, 0.5);
        assert_eq!(store.level, 1.0);
    }

    #[test]
    fn take_drains_and_clears() {
        let mut store = LiquidStore::filled(1, 0.6);
        let taken = store.take(1.0);
        assert_eq!(taken.level, 0.6);
        assert!(store.is_empty());
        assert_eq!(store.liquid, EMPTY_LIQUID_ID);
    }

    #[test]
    fn update_reports_only_visible_changes() {
        let mut store = LiquidStore::filled(1, 0.5);
        assert!(store.update(1, 0.5001, 0.0).is_none());
        assert!(store.update(1, 0.75, 0.0).is_some());
    }

    #[test]
    fn pressure_is_clamped_non_negative() {
        let mut store = LiquidStore::filled(1, 0.5);
        store.update(1, 0.5, -3.0);
        assert_eq!(store.pressure, 0.0);
    }
}
