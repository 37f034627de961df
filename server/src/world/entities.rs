//! Entities and the world's entity map.

use crate::error::{Result, ServerError};
use serde_json::Value as Json;
use skyward_core::geometry::WorldGeometry;
use skyward_core::math::{RectF, Vec2F, Vec2I};
use skyward_core::types::game::{DamageTeam, EntityId, NULL_ENTITY_ID};
use std::collections::HashMap;

/// The closed set of entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum EntityType {
    Player = 0,
    Monster = 1,
    Npc = 2,
    Object = 3,
    ItemDrop = 4,
    Projectile = 5,
    Vehicle = 6,
    Plant = 7,
    PlantDrop = 8,
    Effect = 9,
    Stagehand = 10,
}

/// Tile-bound view: material spaces and root positions an entity claims
/// in the tile grid.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TileBoundView {
    pub spaces: Vec<Vec2I>,
    pub roots: Vec<Vec2I>,
}

/// Scripted view: the entity carries a script context driven by the world.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScriptedView {
    pub scripts: Vec<String>,
    pub message_handlers: Vec<String>,
}

/// A polymorphic world entity: the common core plus optional capability
/// views over a closed set.
#[derive(Debug, Clone)]
pub struct Entity {
    /// Stable id assigned by the world on addition; 0 before that.
    pub id: EntityId,
    pub entity_type: EntityType,
    pub position: Vec2F,
    /// Bound box relative to the position.
    pub meta_bound_box: RectF,
    pub collision_area: Option<RectF>,
    pub unique_id: Option<String>,
    pub team: DamageTeam,
    /// Master entities simulate here; slaves replicate a remote master.
    pub master: bool,
    /// Monotonic update version stamped on master-side changes.
    pub version: u64,
    /// Opaque serialized state, round-tripped to clients and storage.
    pub store: Json,

    pub tile_bound: Option<TileBoundView>,
    pub scripted: Option<ScriptedView>,
    pub interactive: bool,
    pub keep_alive: bool,
}

impl Entity {
    pub fn new(entity_type: EntityType, position: Vec2F) -> Entity {
        Entity {
            id: NULL_ENTITY_ID,
            entity_type,
            position,
            meta_bound_box: RectF::from_coords(-0.5, -0.5, 0.5, 0.5),
            collision_area: None,
            unique_id: None,
            team: DamageTeam::default(),
            master: true,
            version: 0,
            store: Json::Null,
            tile_bound: None,
            scripted: None,
            interactive: false,
            keep_alive: false,
        }
    }

    /// World-space bound box.
    pub fn bound_box(&self) -> RectF {
        self.meta_bound_box.translated(self.position)
    }
}

/// Owns all live entities of a world. Slot arena plus free list, so
/// references between entities stay ids and ownership stays here.
pub struct EntityMap {
    geometry: WorldGeometry,
    slots: Vec<Option<Entity>>,
    free_slots: Vec<usize>,
    by_id: HashMap<EntityId, usize>,
    by_unique_id: HashMap<String, EntityId>,
    next_id: EntityId,
    min_id: EntityId,
    max_id: EntityId,
}

impl EntityMap {
    pub fn new(geometry: WorldGeometry, min_id: EntityId, max_id: EntityId) -> EntityMap {
        EntityMap {
            geometry,
            slots: Vec::new(),
            free_slots: Vec::new(),
            by_id: HashMap::new(),
            by_unique_id: HashMap::new(),
            next_id: min_id,
            min_id,
            max_id,
        }
    }

    fn allocate_id(&mut self) -> Result<EntityId> {
        if self.by_id.len() >= (self.max_id - self.min_id) as usize {
            return Err(ServerError::world("entity id space exhausted"));
        }
        let mut id = self.next_id;
        while self.by_id.contains_key(&id) {
            id = if id >= self.max_id { self.min_id } else { id + 1 };
        }
        self.next_id = if id >= self.max_id { self.min_id } else { id + 1 };
        Ok(id)
    }

    /// Adds an entity, assigning an id when it has none. A duplicate
    /// unique id is a precondition failure on this add.
    pub fn add_entity(&mut self, mut entity: Entity) -> Result<EntityId> {
        if let Some(unique_id) = &entity.unique_id {
            if self.by_unique_id.contains_key(unique_id) {
                return Err(ServerError::world(format!(
                    "unique entity id '{unique_id}' already exists"
                )));
            }
        }

        let id = if entity.id == NULL_ENTITY_ID {
            self.allocate_id()?
        } else {
            if self.by_id.contains_key(&entity.id) {
                return Err(ServerError::world(format!(
                    "entity id {} already exists",
                    entity.id
                )));
            }
            entity.id
        };
        entity.id = id;

        if let Some(unique_id) = &entity.unique_id {
            self.by_unique_id.insert(unique_id.clone(), id);
        }

        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entity);
                slot
            }
            None => {
                self.slots.push(Some(entity));
                self.slots.len() - 1
            }
        };
        self.by_id.insert(id, slot);
        Ok(id)
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        let slot = self.by_id.remove(&id)?;
        let entity = self.slots[slot].take();
        self.free_slots.push(slot);
        if let Some(entity) = &entity {
            if let Some(unique_id) = &entity.unique_id {
                self.by_unique_id.remove(unique_id);
            }
        }
        entity
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.by_id.get(&id).and_then(|&slot| self.slots[slot].as_ref())
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        let slot = *self.by_id.get(&id)?;
        self.slots[slot].as_mut()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn unique_entity(&self, unique_id: &str) -> Option<EntityId> {
        self.by_unique_id.get(unique_id).copied()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.by_id.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.slots.iter_mut().filter_map(|slot| slot.as_mut())
    }

    /// Entities whose bound boxes intersect `region` under the world wrap.
    pub fn query(&self, region: &RectF) -> Vec<EntityId> {
        self.iter()
            .filter(|entity| self.geometry.rect_intersects_rect(region, &entity.bound_box()))
            .map(|entity| entity.id)
            .collect()
    }

    /// Entities rooted at or occupying the given tile.
    pub fn at_tile(&self, position: Vec2I) -> Vec<EntityId> {
        let wrapped = self.geometry.xwrap_vec_i(position);
        self.iter()
            .filter(|entity| {
                entity.tile_bound.as_ref().is_some_and(|view| {
                    view.spaces
                        .iter()
                        .chain(view.roots.iter())
                        .any(|&space| self.geometry.xwrap_vec_i(space) == wrapped)
                })
            })
            .map(|entity| entity.id)
            .collect()
    }

    pub fn closest_entity(
        &self,
        center: Vec2F,
        radius: f32,
        filter: impl Fn(&Entity) -> bool,
    ) -> Option<EntityId> {
        let mut best: Option<(f32, EntityId)> = None;
        for entity in self.iter() {
            if !filter(entity) {
                continue;
            }
            let distance = self.geometry.diff(entity.position, center).magnitude();
            if distance <= radius && best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, entity.id));
            }
        }
        best.map(|(_, id)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyward_core::math::Vec2U;

    fn map() -> EntityMap {
        EntityMap::new(WorldGeometry::new(Vec2U::new(1000, 1000)), 1, 100_000)
    }

    #[test]
    fn ids_are_assigned_and_stable() {
        let mut map = map();
        let a = map
            .add_entity(Entity::new(EntityType::Monster, Vec2F::new(10.0, 10.0)))
            .unwrap();
        let b = map
            .add_entity(Entity::new(EntityType::ItemDrop, Vec2F::new(20.0, 10.0)))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(map.get(a).unwrap().entity_type, EntityType::Monster);

        map.remove_entity(a).unwrap();
        let c = map
            .add_entity(Entity::new(EntityType::Npc, Vec2F::new(5.0, 5.0)))
            .unwrap();
        assert_ne!(c, a, "removed ids are not immediately reused");
    }

    #[test]
    fn duplicate_unique_id_fails_the_add() {
        let mut map = map();
        let mut first = Entity::new(EntityType::Object, Vec2F::new(1.0, 1.0));
        first.unique_id = Some("teleporter".into());
        let id = map.add_entity(first).unwrap();

        let mut second = Entity::new(EntityType::Object, Vec2F::new(2.0, 2.0));
        second.unique_id = Some("teleporter".into());
        assert!(map.add_entity(second).is_err());

        assert_eq!(map.unique_entity("teleporter"), Some(id));
        map.remove_entity(id);
        assert_eq!(map.unique_entity("teleporter"), None);
    }

    #[test]
    fn spatial_query_sees_across_the_wrap() {
        let mut map = map();
        let mut near_seam = Entity::new(EntityType::Monster, Vec2F::new(999.5, 50.0));
        near_seam.meta_bound_box = RectF::from_coords(-2.0, -2.0, 2.0, 2.0);
        let id = map.add_entity(near_seam).unwrap();

        let found = map.query(&RectF::from_coords(0.0, 48.0, 5.0, 52.0));
        assert_eq!(found, vec![id]);
    }

    #[test]
    fn closest_entity_respects_radius_and_filter() {
        let mut map = map();
        let near = map
            .add_entity(Entity::new(EntityType::Npc, Vec2F::new(10.0, 10.0)))
            .unwrap();
        let _far = map
            .add_entity(Entity::new(EntityType::Npc, Vec2F::new(500.0, 500.0)))
            .unwrap();

        let found = map.closest_entity(Vec2F::new(12.0, 10.0), 50.0, |_| true);
        assert_eq!(found, Some(near));
        let none = map.closest_entity(Vec2F::new(12.0, 10.0), 1.0, |_| true);
        assert_eq!(none, None);
    }
}
