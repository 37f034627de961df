//! The falling blocks agent: granular materials with nothing beneath
//! them break loose and re-settle.

use skyward_core::math::Vec2I;
use skyward_core::types::material::MaterialId;
use std::collections::HashSet;

/// What the agent needs from the world.
pub trait FallingBlocksWorld {
    /// The falling material at a position, if the tile holds one.
    fn falling_material(&self, position: Vec2I) -> Option<MaterialId>;
    /// Whether the position can support a block above it.
    fn supported(&self, position: Vec2I) -> bool;
    /// Removes the block, returning its material.
    fn remove_block(&mut self, position: Vec2I) -> Option<MaterialId>;
    /// Settles a material at the given position.
    fn settle_block(&mut self, position: Vec2I, material: MaterialId);
    fn wrap(&self, position: Vec2I) -> Vec2I;
}

/// Watches positions whose support may have changed and converts
/// unsupported granular tiles into falling motion, settling them on the
/// first supported cell below.
#[derive(Default)]
pub struct FallingBlocksAgent {
    pending: HashSet<Vec2I>,
}

impl FallingBlocksAgent {
    pub fn new() -> FallingBlocksAgent {
        FallingBlocksAgent::default()
    }

    /// Marks a position (and the tile above it) for a support check.
    pub fn visit(&mut self, position: Vec2I) {
        self.pending.insert(position);
        self.pending.insert(position + Vec2I::new(0, 1));
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Processes pending positions; returns `(from, to, material)` for
    /// every block that moved this step.
    pub fn update(&mut self, world: &mut impl FallingBlocksWorld) -> Vec<(Vec2I, Vec2I, MaterialId)> {
        let mut moved = Vec::new();
        for position in std::mem::take(&mut self.pending) {
            let position = world.wrap(position);
            let Some(material) = world.falling_material(position) else {
                continue;
            };
            let below = world.wrap(position + Vec2I::new(0, -1));
            if world.supported(below) {
                continue;
            }

            // Drop until something supports it
            let mut target = below;
            loop {
                let next = world.wrap(target + Vec2I::new(0, -1));
                if world.supported(next) || next.y() >= target.y() {
                    break;
                }
                target = next;
            }

            if world.remove_block(position).is_some() {
                world.settle_block(target, material);
                moved.push((position, target, material));
                // The column above just lost support
                self.visit(position + Vec2I::new(0, 1));
                self.visit(target);
            }
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct SandWorld {
        sand: HashMap<Vec2I, MaterialId>,
        floor_y: i32,
    }

    impl FallingBlocksWorld for SandWorld {
        fn falling_material(&self, position: Vec2I) -> Option<MaterialId> {
            self.sand.get(&position).copied()
        }

        fn supported(&self, position: Vec2I) -> bool {
            position.y() <= self.floor_y || self.sand.contains_key(&position)
        }

        fn remove_block(&mut self, position: Vec2I) -> Option<MaterialId> {
            self.sand.remove(&position)
        }

        fn settle_block(&mut self, position: Vec2I, material: MaterialId) {
            self.sand.insert(position, material);
        }

        fn wrap(&self, position: Vec2I) -> Vec2I {
            position
        }
    }

    #[test]
    fn unsupported_sand_falls_to_the_floor() {
        let mut world = SandWorld {
            sand: HashMap::new(),
            floor_y: 0,
        };
        world.sand.insert(Vec2I::new(5, 10), 20);

        let mut agent = FallingBlocksAgent::new();
        agent.visit(Vec2I::new(5, 10));
        let moved = agent.update(&mut world);

        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].1, Vec2I::new(5, 1), "settled just above floor");
        assert!(world.sand.contains_key(&Vec2I::new(5, 1)));
        assert!(!world.sand.contains_key(&Vec2I::new(5, 10)));
    }

    #[test]
    fn supported_sand_stays_put() {
        let mut world = SandWorld {
            sand: HashMap::new(),
            floor_y: 0,
        };
        world.sand.insert(Vec2I::new(5, 1), 20);
        world.sand.insert(Vec2I::new(5, 2), 20);

        let mut agent = FallingBlocksAgent::new();
        agent.visit(Vec2I::new(5, 2));
        assert!(agent.update(&mut world).is_empty());
    }

    #[test]
    fn column_collapses_in_cascading_steps() {
        let mut world = SandWorld {
            sand: HashMap::new(),
            floor_y: 0,
        };
        world.sand.insert(Vec2I::new(5, 5), 20);
        world.sand.insert(Vec2I::new(5, 6), 20);

        let mut agent = FallingBlocksAgent::new();
        agent.visit(Vec2I::new(5, 5));
        agent.visit(Vec2I::new(5, 6));
        let mut total_moves = 0;
        for _ in 0..10 {
            total_moves += agent.update(&mut world).len();
        }
        assert!(total_moves >= 2);
        assert!(world.sand.contains_key(&Vec2I::new(5, 1)));
        assert!(world.sand.contains_key(&Vec2I::new(5, 2)));
    }
}
