//! The system map world each ship flies within.
//!
//! Full celestial system simulation is out of scope; this carries the
//! coordinate-level state the universe server needs: which ships are in
//! a system, where they sit, and where they are headed.

use crate::client_context::SystemLocation;
use crate::warping::{SpawnTarget, WarpAction, WarpToWorld, WorldId};
use crate::world::sky::SkyParameters;
use skyward_core::math::Vec3I;
use skyward_core::types::celestial::CelestialCoordinate;
use skyward_core::types::game::ConnectionId;
use skyward_core::Uuid;
use std::collections::HashMap;

struct ShipEntry {
    #[allow(dead_code)]
    uuid: Uuid,
    speed: f32,
    location: SystemLocation,
    destination: Option<SystemLocation>,
    travel_remaining: f32,
}

/// One active system: the ships currently in it.
pub struct SystemWorld {
    location: Vec3I,
    ships: HashMap<ConnectionId, ShipEntry>,
}

impl SystemWorld {
    pub fn new(location: Vec3I) -> SystemWorld {
        SystemWorld {
            location,
            ships: HashMap::new(),
        }
    }

    pub fn location(&self) -> Vec3I {
        self.location
    }

    pub fn add_client(
        &mut self,
        client_id: ConnectionId,
        uuid: Uuid,
        speed: f32,
        location: SystemLocation,
    ) {
        self.ships.insert(
            client_id,
            ShipEntry {
                uuid,
                speed,
                location,
                destination: None,
                travel_remaining: 0.0,
            },
        );
    }

    pub fn remove_client(&mut self, client_id: ConnectionId) {
        self.ships.remove(&client_id);
    }

    pub fn has_client(&self, client_id: ConnectionId) -> bool {
        self.ships.contains_key(&client_id)
    }

    pub fn is_empty(&self) -> bool {
        self.ships.is_empty()
    }

    /// Starts an in-system flight toward a new location.
    pub fn set_client_destination(&mut self, client_id: ConnectionId, destination: SystemLocation) {
        if let Some(ship) = self.ships.get_mut(&client_id) {
            ship.travel_remaining = 60.0 / ship.speed.max(1.0);
            ship.destination = Some(destination);
        }
    }

    /// Where the ship currently sits, once any in-system travel is done.
    pub fn client_ship_location(&self, client_id: ConnectionId) -> Option<SystemLocation> {
        let ship = self.ships.get(&client_id)?;
        if ship.destination.is_some() {
            return None;
        }
        Some(ship.location.clone())
    }

    /// The sky a ship at this client's location sees.
    pub fn client_sky_parameters(&self, client_id: ConnectionId) -> SkyParameters {
        let coordinate = self
            .ships
            .get(&client_id)
            .and_then(|ship| ship.location.celestial())
            .unwrap_or(CelestialCoordinate::system(self.location));
        SkyParameters {
            coordinate: Some(coordinate),
            parameters: serde_json::Value::Null,
        }
    }

    /// The warp a ship's crew uses to beam down to the orbited world.
    pub fn client_warp_action(&self, client_id: ConnectionId) -> Option<WarpAction> {
        let coordinate = self
            .ships
            .get(&client_id)
            .and_then(|ship| ship.location.celestial())?;
        Some(WarpAction::ToWorld(WarpToWorld {
            world: WorldId::Celestial(coordinate),
            target: SpawnTarget::Default,
        }))
    }

    /// Advances in-system travel; returns clients that just arrived.
    pub fn update(&mut self, dt: f32) -> Vec<ConnectionId> {
        let mut arrived = Vec::new();
        for (&client_id, ship) in &mut self.ships {
            if ship.destination.is_some() {
                ship.travel_remaining -= dt;
                if ship.travel_remaining <= 0.0 {
                    if let Some(destination) = ship.destination.take() {
                        ship.location = destination;
                    }
                    arrived.push(client_id);
                }
            }
        }
        arrived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_system_travel_arrives() {
        let mut system = SystemWorld::new(Vec3I::new(1, 2, 3));
        system.add_client(1, Uuid::new(), 60.0, SystemLocation::None);

        let target = SystemLocation::Celestial {
            coordinate: CelestialCoordinate::planet(Vec3I::new(1, 2, 3), 2),
        };
        system.set_client_destination(1, target.clone());
        assert_eq!(system.client_ship_location(1), None, "in transit");

        let mut arrived = Vec::new();
        for _ in 0..100 {
            arrived.extend(system.update(0.1));
            if !arrived.is_empty() {
                break;
            }
        }
        assert_eq!(arrived, vec![1]);
        assert_eq!(system.client_ship_location(1), Some(target));
    }

    #[test]
    fn orbit_warp_points_at_the_orbited_world() {
        let mut system = SystemWorld::new(Vec3I::new(0, 0, 0));
        let coordinate = CelestialCoordinate::planet(Vec3I::new(0, 0, 0), 1);
        system.add_client(
            5,
            Uuid::new(),
            30.0,
            SystemLocation::Celestial { coordinate },
        );

        let action = system.client_warp_action(5).unwrap();
        assert_eq!(
            action,
            WarpAction::ToWorld(WarpToWorld {
                world: WorldId::Celestial(coordinate),
                target: SpawnTarget::Default,
            })
        );
        assert!(system.client_warp_action(6).is_none());
    }
}
