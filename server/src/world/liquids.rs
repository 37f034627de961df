//! The cellular liquid engine: dirty-cell relaxation with a simple
//! pressure and fall model.

use skyward_core::math::Vec2I;
use skyward_core::types::liquid::LiquidNetUpdate;
use std::collections::HashSet;

/// A liquid cell as the engine sees it through the world.
pub trait LiquidWorld {
    /// None when the position is unloaded or out of world.
    fn liquid_cell(&self, position: Vec2I) -> Option<LiquidCell>;
    fn set_liquid_cell(&mut self, position: Vec2I, liquid: u8, level: f32, pressure: f32);
    /// Whether liquid can occupy this position at all.
    fn cell_open(&self, position: Vec2I) -> bool;
    fn wrap(&self, position: Vec2I) -> Vec2I;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidCell {
    pub liquid: u8,
    pub level: f32,
    pub pressure: f32,
    pub source: bool,
}

/// Tracks dirty liquid positions and steps them through the fall /
/// spread model, emitting net updates for changed cells.
#[derive(Default)]
pub struct LiquidCellEngine {
    active: HashSet<Vec2I>,
    processed_per_step: usize,
}

impl LiquidCellEngine {
    pub fn new(processed_per_step: usize) -> LiquidCellEngine {
        LiquidCellEngine {
            active: HashSet::new(),
            processed_per_step,
        }
    }

    pub fn activate(&mut self, position: Vec2I) {
        self.active.insert(position);
    }

    pub fn activate_region(&mut self, min: Vec2I, max: Vec2I) {
        for x in min.x()..max.x() {
            for y in min.y()..max.y() {
                self.active.insert(Vec2I::new(x, y));
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// One engine step. Each dirty cell tries to fall, then to equalize
    /// sideways; cells that changed re-activate their neighbourhood.
    pub fn step(&mut self, world: &mut impl LiquidWorld) -> Vec<(Vec2I, LiquidNetUpdate)> {
        let mut updates = Vec::new();
        let batch: Vec<Vec2I> = self
            .active
            .iter()
            .copied()
            .take(self.processed_per_step.max(1))
            .collect();
        for position in &batch {
            self.active.remove(position);
        }

        for position in batch {
            let position = world.wrap(position);
            let Some(cell) = world.liquid_cell(position) else {
                continue;
            };
            if cell.level <= 0.0 && !cell.source {
                continue;
            }

            let below = world.wrap(position + Vec2I::new(0, -1));
            let below_cell = world.liquid_cell(below).filter(|_| world.cell_open(below));

            let mut remaining = cell.level;
            let mut changed = false;

            // Fall: pour as much as fits into the cell below
            if let Some(below_cell) = below_cell {
                if below_cell.liquid == cell.liquid || below_cell.level <= 0.0 {
                    let space = (1.0 - below_cell.level).max(0.0);
                    let poured = space.min(remaining);
                    if poured > 0.0 {
                        world.set_liquid_cell(
                            below,
                            cell.liquid,
                            below_cell.level + poured,
                            below_cell.pressure,
                        );
                        if !cell.source {
                            remaining -= poured;
                        }
                        changed = true;
                        self.activate(below);
                    }
                }
            }

            // Spread: equalize with lower neighbours on each side
            if remaining > 0.01 {
                for direction in [Vec2I::new(-1, 0), Vec2I::new(1, 0)] {
                    let side = world.wrap(position + direction);
                    if !world.cell_open(side) {
                        continue;
                    }
                    let Some(side_cell) = world.liquid_cell(side) else {
                        continue;
                    };
                    if side_cell.liquid != cell.liquid && side_cell.level > 0.0 {
                        continue;
                    }
                    if side_cell.level + 0.01 < remaining {
                        let flow = (remaining - side_cell.level) / 2.0;
                        world.set_liquid_cell(
                            side,
                            cell.liquid,
                            side_cell.level + flow,
                            side_cell.pressure,
                        );
                        if !cell.source {
                            remaining -= flow;
                        }
                        changed = true;
                        self.activate(side);
                    }
                }
            }

            if changed {
                let level = if cell.source { 1.0 } else { remaining };
                world.set_liquid_cell(position, cell.liquid, level, cell.pressure);
                self.activate(world.wrap(position + Vec2I::new(0, 1)));
                if level > 0.0 {
                    self.activate(position);
                }
                updates.push((
                    position,
                    LiquidNetUpdate {
                        liquid: cell.liquid,
                        level: skyward_core::types::liquid::float_to_byte(level),
                    },
                ));
            }
        }

        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct GridWorld {
        cells: HashMap<Vec2I, LiquidCell>,
        solid: HashSet<Vec2I>,
    }

    impl GridWorld {
        fn new() -> GridWorld {
            GridWorld {
                cells: HashMap::new(),
                solid: HashSet::new(),
            }
        }

        fn level(&self, position: Vec2I) -> f32 {
            self.cells.get(&position).map(|c| c.level).unwrap_or(0.0)
        }
    }

    impl LiquidWorld for GridWorld {
        fn liquid_cell(&self, position: Vec2I) -> Option<LiquidCell> {
            if position.y() < 0 {
                return None;
            }
            Some(self.cells.get(&position).copied().unwrap_or(LiquidCell {
                liquid: 0,
                level: 0.0,
                pressure: 0.0,
                source: false,
            }))
        }

        fn set_liquid_cell(&mut self, position: Vec2I, liquid: u8, level: f32, pressure: f32) {
            self.cells.insert(
                position,
                LiquidCell {
                    liquid,
                    level,
                    pressure,
                    source: self.cells.get(&position).map(|c| c.source).unwrap_or(false),
                },
            );
        }

        fn cell_open(&self, position: Vec2I) -> bool {
            position.y() >= 0 && !self.solid.contains(&position)
        }

        fn wrap(&self, position: Vec2I) -> Vec2I {
            position
        }
    }

    #[test]
    fn liquid_falls_into_open_space() {
        let mut world = GridWorld::new();
        for y in 0..8 {
            world.solid.insert(Vec2I::new(4, y));
            world.solid.insert(Vec2I::new(6, y));
        }
        world.cells.insert(
            Vec2I::new(5, 5),
            LiquidCell {
                liquid: 1,
                level: 1.0,
                pressure: 0.0,
                source: false,
            },
        );
        let mut engine = LiquidCellEngine::new(64);
        engine.activate(Vec2I::new(5, 5));

        for _ in 0..20 {
            engine.step(&mut world);
        }

        assert!(world.level(Vec2I::new(5, 5)) < 0.05);
        assert!(world.level(Vec2I::new(5, 0)) > 0.9, "pooled at the floor");
    }

    #[test]
    fn liquid_spreads_sideways_on_solid_ground() {
        let mut world = GridWorld::new();
        for x in 0..10 {
            world.solid.insert(Vec2I::new(x, 0));
        }
        world.cells.insert(
            Vec2I::new(5, 1),
            LiquidCell {
                liquid: 1,
                level: 1.0,
                pressure: 0.0,
                source: false,
            },
        );
        let mut engine = LiquidCellEngine::new(64);
        engine.activate(Vec2I::new(5, 1));

        for _ in 0..40 {
            engine.step(&mut world);
        }

        assert!(world.level(Vec2I::new(4, 1)) > 0.1);
        assert!(world.level(Vec2I::new(6, 1)) > 0.1);
        assert!(world.level(Vec2I::new(5, 1)) < 1.0);
    }

    #[test]
    fn sources_never_drain() {
        let mut world = GridWorld::new();
        world.cells.insert(
            Vec2I::new(3, 3),
            LiquidCell {
                liquid: 1,
                level: 1.0,
                pressure: 0.0,
                source: true,
            },
        );
        let mut engine = LiquidCellEngine::new(64);
        engine.activate(Vec2I::new(3, 3));

        for _ in 0..10 {
            engine.step(&mut world);
        }

        assert_eq!(world.level(Vec2I::new(3, 3)), 1.0);
        assert!(world.level(Vec2I::new(3, 2)) > 0.0);
    }

    #[test]
    fn engine_goes_quiet_when_settled() {
        let mut world = GridWorld::new();
        world.solid.insert(Vec2I::new(5, 4));
        world.cells.insert(
            Vec2I::new(5, 5),
            LiquidCell {
                liquid: 1,
                level: 0.0,
                pressure: 0.0,
                source: false,
            },
        );
        let mut engine = LiquidCellEngine::new(64);
        engine.activate(Vec2I::new(5, 5));
        engine.step(&mut world);
        assert_eq!(engine.active_count(), 0);
    }
}
