//! Celestial coordinates and per-world celestial parameters.

use crate::math::{Vec2U, Vec3I};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

/// Address of a system, planet or satellite in the universe.
///
/// A system is `(location)`, a planet `(location, planet)`, a satellite
/// `(location, planet, satellite)`. Planet and satellite indices are
/// 1-based; zero means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CelestialCoordinate {
    pub location: Vec3I,
    pub planet: i32,
    pub satellite: i32,
}

impl CelestialCoordinate {
    pub fn system(location: Vec3I) -> Self {
        CelestialCoordinate {
            location,
            planet: 0,
            satellite: 0,
        }
    }

    pub fn planet(location: Vec3I, planet: i32) -> Self {
        CelestialCoordinate {
            location,
            planet,
            satellite: 0,
        }
    }

    pub fn satellite(location: Vec3I, planet: i32, satellite: i32) -> Self {
        CelestialCoordinate {
            location,
            planet,
            satellite,
        }
    }

    /// The null coordinate, used for "nowhere".
    pub fn is_null(&self) -> bool {
        self.location == Vec3I::zero() && self.planet == 0 && self.satellite == 0
    }

    pub fn is_system(&self) -> bool {
        !self.is_null() && self.planet == 0
    }

    pub fn is_planet(&self) -> bool {
        self.planet != 0 && self.satellite == 0
    }

    pub fn is_satellite(&self) -> bool {
        self.satellite != 0
    }

    pub fn parent_system(&self) -> CelestialCoordinate {
        CelestialCoordinate::system(self.location)
    }

    /// Filesystem-safe name, also the storage file base name.
    pub fn file_name(&self) -> String {
        let mut name = format!(
            "{}_{}_{}",
            self.location.x(),
            self.location.y(),
            self.location.z()
        );
        if self.planet != 0 {
            name.push_str(&format!("_{}", self.planet));
            if self.satellite != 0 {
                name.push_str(&format!("_{}", self.satellite));
            }
        }
        name
    }

    pub fn parse(text: &str) -> Option<CelestialCoordinate> {
        let parts: Vec<&str> = text.split(':').collect();
        if parts.len() < 3 || parts.len() > 5 {
            return None;
        }
        let x = parts[0].parse().ok()?;
        let y = parts[1].parse().ok()?;
        let z = parts[2].parse().ok()?;
        let planet = parts.get(3).map_or(Some(0), |p| p.parse().ok())?;
        let satellite = parts.get(4).map_or(Some(0), |s| s.parse().ok())?;
        Some(CelestialCoordinate {
            location: Vec3I::new(x, y, z),
            planet,
            satellite,
        })
    }
}

impl fmt::Display for CelestialCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.location.x(),
            self.location.y(),
            self.location.z()
        )?;
        if self.planet != 0 {
            write!(f, ":{}", self.planet)?;
            if self.satellite != 0 {
                write!(f, ":{}", self.satellite)?;
            }
        }
        Ok(())
    }
}

/// What a celestial body is: its seed, visitable world kind, size and the
/// free-form parameters the world template consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CelestialParameters {
    pub seed: u64,
    pub name: String,
    pub world_type: String,
    pub world_size: Vec2U,
    pub threat_level: f32,
    #[serde(default)]
    pub parameters: Json,
}

impl CelestialParameters {
    pub fn new(seed: u64, name: impl Into<String>, world_type: impl Into<String>) -> Self {
        CelestialParameters {
            seed,
            name: name.into(),
            world_type: world_type.into(),
            world_size: Vec2U::new(3000, 2000),
            threat_level: 1.0,
            parameters: Json::Null,
        }
    }

    /// Whether a player can warp down to this body.
    pub fn visitable(&self) -> bool {
        !self.world_type.is_empty() && self.world_type != "barren-star"
    }
}

/// Base universe information advertised to clients on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CelestialBaseInformation {
    pub planet_orbital_levels: i32,
    pub satellite_orbital_levels: i32,
    pub chunk_size: i32,
    pub xy_coord_range: (i32, i32),
    pub z_coord_range: (i32, i32),
}

impl Default for CelestialBaseInformation {
    fn default() -> Self {
        CelestialBaseInformation {
            planet_orbital_levels: 12,
            satellite_orbital_levels: 2,
            chunk_size: 32,
            xy_coord_range: (-100_000_000, 100_000_000),
            z_coord_range: (-100_000_000, 100_000_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_kinds() {
        let system = CelestialCoordinate::system(Vec3I::new(10, -4, 7));
        assert!(system.is_system());
        assert!(!system.is_planet());

        let planet = CelestialCoordinate::planet(Vec3I::new(10, -4, 7), 3);
        assert!(planet.is_planet());
        assert_eq!(planet.parent_system(), system);

        let moon = CelestialCoordinate::satellite(Vec3I::new(10, -4, 7), 3, 1);
        assert!(moon.is_satellite());
        assert!(CelestialCoordinate::default().is_null());
    }

    #[test]
    fn display_parse_round_trip() {
        for text in ["1:2:3", "1:2:3:4", "1:2:3:4:1", "-5:0:9:2"] {
            let coord = CelestialCoordinate::parse(text).unwrap();
            assert_eq!(coord.to_string(), text);
        }
        assert!(CelestialCoordinate::parse("1:2").is_none());
        assert!(CelestialCoordinate::parse("a:b:c").is_none());
    }

    #[test]
    fn file_name_is_flat() {
        let moon = CelestialCoordinate::satellite(Vec3I::new(10, -4, 7), 3, 1);
        assert_eq!(moon.file_name(), "10_-4_7_3_1");
    }
}
