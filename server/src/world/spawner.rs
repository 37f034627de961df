//! Natural monster spawning over newly activated sectors.

use serde::{Deserialize, Serialize};
use skyward_core::math::{RectI, Vec2F, Vec2I};
use skyward_core::types::random::RandomSource;

/// Where within the tile environment a group may spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpawnArea {
    Surface,
    Ceiling,
    Air,
    Liquid,
    Solid,
}

/// Whether the spawn cell must be roofed (enclosed) or open to the sky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SpawnRegion {
    #[default]
    All,
    Enclosed,
    Exposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SpawnTime {
    #[default]
    All,
    Day,
    Night,
}

/// One spawnable group in a biome's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpawnGroup {
    pub monster_type: String,
    pub group_size: (u32, u32),
    pub spawn_chance: f32,
    pub area: SpawnArea,
    pub region: SpawnRegion,
    pub time: SpawnTime,
}

impl Default for SpawnGroup {
    fn default() -> Self {
        SpawnGroup {
            monster_type: String::new(),
            group_size: (1, 1),
            spawn_chance: 0.5,
            area: SpawnArea::Surface,
            region: SpawnRegion::All,
            time: SpawnTime::All,
        }
    }
}

/// A biome's spawnable groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SpawnProfile {
    pub groups: Vec<SpawnGroup>,
}

/// What the spawner needs from the world.
pub trait SpawnerWorld {
    fn is_day(&self) -> bool;
    fn solid(&self, position: Vec2I) -> bool;
    fn liquid(&self, position: Vec2I) -> bool;
    /// Background present, so the cell counts as enclosed.
    fn enclosed(&self, position: Vec2I) -> bool;
    /// Spawns are suppressed here (protected or dungeon-marked tiles).
    fn spawning_blocked(&self, position: Vec2I) -> bool;
    fn spawn_profile(&self, position: Vec2I) -> Option<SpawnProfile>;
    fn spawn_monster(&mut self, position: Vec2F, monster_type: &str);
}

/// Attempts one spawn group per newly activated sector.
pub struct Spawner {
    random: RandomSource,
    enabled: bool,
}

impl Spawner {
    pub fn new(seed: u64) -> Spawner {
        Spawner {
            random: RandomSource::with_seed(seed),
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Tries to place one group inside the sector region. Picks a random
    /// column, resolves the group filters, and adjusts x to the nearest
    /// valid cell within the sector.
    pub fn spawn_in_region(&mut self, world: &mut impl SpawnerWorld, region: RectI) -> usize {
        if !self.enabled || region.is_empty() {
            return 0;
        }

        let x = self.random.rand_int_range(
            region.x_min() as i64,
            region.x_max() as i64 - 1,
        ) as i32;
        let y = self.random.rand_int_range(
            region.y_min() as i64,
            region.y_max() as i64 - 1,
        ) as i32;
        let probe = Vec2I::new(x, y);

        let Some(profile) = world.spawn_profile(probe) else {
            return 0;
        };

        let mut spawned = 0;
        for group in &profile.groups {
            if self.random.randf() > group.spawn_chance {
                continue;
            }
            match group.time {
                SpawnTime::Day if !world.is_day() => continue,
                SpawnTime::Night if world.is_day() => continue,
                _ => {}
            }

            let Some(position) = self.adjust_position(world, probe, region, group) else {
                continue;
            };
            if world.spawning_blocked(position) {
                continue;
            }

            let count = self
                .random
                .rand_int_range(group.group_size.0 as i64, group.group_size.1 as i64)
                as u32;
            for i in 0..count {
                world.spawn_monster(
                    position.to_f32() + Vec2F::new(i as f32 * 0.5, 0.0),
                    &group.monster_type,
                );
                spawned += 1;
            }
            // One group per sector activation
            break;
        }
        spawned
    }

    /// Walks outward from the probe column to the nearest cell matching
    /// the group's area and region filters.
    fn adjust_position(
        &mut self,
        world: &impl SpawnerWorld,
        probe: Vec2I,
        region: RectI,
        group: &SpawnGroup,
    ) -> Option<Vec2I> {
        for offset in 0..region.width() {
            for direction in [1, -1] {
                let x = probe.x() + offset * direction;
                if x < region.x_min() || x >= region.x_max() {
                    continue;
                }
                for y in region.y_min()..region.y_max() {
                    let position = Vec2I::new(x, y);
                    if self.cell_matches(world, position, group) {
                        return Some(position);
                    }
                }
            }
        }
        None
    }

    fn cell_matches(
        &self,
        world: &impl SpawnerWorld,
        position: Vec2I,
        group: &SpawnGroup,
    ) -> bool {
        let below = position + Vec2I::new(0, -1);
        let above = position + Vec2I::new(0, 1);
        let area_ok = match group.area {
            SpawnArea::Surface => !world.solid(position) && world.solid(below),
            SpawnArea::Ceiling => !world.solid(position) && world.solid(above),
            SpawnArea::Air => {
                !world.solid(position) && !world.solid(below) && !world.liquid(position)
            }
            SpawnArea::Liquid => world.liquid(position),
            SpawnArea::Solid => world.solid(position),
        };
        if !area_ok {
            return false;
        }
        match group.region {
            SpawnRegion::All => true,
            SpawnRegion::Enclosed => world.enclosed(position),
            SpawnRegion::Exposed => !world.enclosed(position),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FlatWorld {
        surface_y: i32,
        day: bool,
        profile: SpawnProfile,
        blocked: HashSet<Vec2I>,
        spawned: Vec<(Vec2F, String)>,
    }

    impl FlatWorld {
        fn new(profile: SpawnProfile) -> FlatWorld {
            FlatWorld {
                surface_y: 10,
                day: true,
                profile,
                blocked: HashSet::new(),
                spawned: Vec::new(),
            }
        }
    }

    impl SpawnerWorld for FlatWorld {
        fn is_day(&self) -> bool {
            self.day
        }
        fn solid(&self, position: Vec2I) -> bool {
            position.y() < self.surface_y
        }
        fn liquid(&self, _position: Vec2I) -> bool {
            false
        }
        fn enclosed(&self, _position: Vec2I) -> bool {
            false
        }
        fn spawning_blocked(&self, position: Vec2I) -> bool {
            self.blocked.contains(&position)
        }
        fn spawn_profile(&self, _position: Vec2I) -> Option<SpawnProfile> {
            Some(self.profile.clone())
        }
        fn spawn_monster(&mut self, position: Vec2F, monster_type: &str) {
            self.spawned.push((position, monster_type.to_string()));
        }
    }

    fn surface_group() -> SpawnGroup {
        SpawnGroup {
            monster_type: "strider".into(),
            group_size: (1, 3),
            spawn_chance: 1.0,
            area: SpawnArea::Surface,
            region: SpawnRegion::All,
            time: SpawnTime::All,
        }
    }

    #[test]
    fn spawns_on_the_surface() {
        let mut world = FlatWorld::new(SpawnProfile {
            groups: vec![surface_group()],
        });
        let mut spawner = Spawner::new(11);
        let count = spawner.spawn_in_region(&mut world, RectI::from_coords(0, 0, 32, 32));
        assert!(count >= 1);
        for (position, _) in &world.spawned {
            assert_eq!(position.y() as i32, world.surface_y, "on the surface");
        }
    }

    #[test]
    fn night_groups_skip_daytime() {
        let mut group = surface_group();
        group.time = SpawnTime::Night;
        let mut world = FlatWorld::new(SpawnProfile {
            groups: vec![group],
        });
        let mut spawner = Spawner::new(11);
        assert_eq!(
            spawner.spawn_in_region(&mut world, RectI::from_coords(0, 0, 32, 32)),
            0
        );
        world.day = false;
        assert!(spawner.spawn_in_region(&mut world, RectI::from_coords(0, 0, 32, 32)) >= 1);
    }

    #[test]
    fn disabled_spawner_is_quiet() {
        let mut world = FlatWorld::new(SpawnProfile {
            groups: vec![surface_group()],
        });
        let mut spawner = Spawner::new(11);
        spawner.set_enabled(false);
        assert_eq!(
            spawner.spawn_in_region(&mut world, RectI::from_coords(0, 0, 32, 32)),
            0
        );
    }

    #[test]
    fn exposed_filter_rejects_enclosed_worlds() {
        struct Cave(FlatWorld);
        impl SpawnerWorld for Cave {
            fn is_day(&self) -> bool {
                self.0.is_day()
            }
            fn solid(&self, p: Vec2I) -> bool {
                self.0.solid(p)
            }
            fn liquid(&self, p: Vec2I) -> bool {
                self.0.liquid(p)
            }
            fn enclosed(&self, _p: Vec2I) -> bool {
                true
            }
            fn spawning_blocked(&self, p: Vec2I) -> bool {
                self.0.spawning_blocked(p)
            }
            fn spawn_profile(&self, p: Vec2I) -> Option<SpawnProfile> {
                self.0.spawn_profile(p)
            }
            fn spawn_monster(&mut self, p: Vec2F, t: &str) {
                self.0.spawn_monster(p, t)
            }
        }

        let mut group = surface_group();
        group.region = SpawnRegion::Exposed;
        let mut world = Cave(FlatWorld::new(SpawnProfile {
            groups: vec![group],
        }));
        let mut spawner = Spawner::new(11);
        assert_eq!(
            spawner.spawn_in_region(&mut world, RectI::from_coords(0, 0, 32, 32)),
            0
        );
    }
}
