//! Per-world sky state: orbit, interstellar flight, warp.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use skyward_core::types::celestial::CelestialCoordinate;

/// What a sky looks like: where it orbits and free-form presentation
/// parameters produced by the celestial layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SkyParameters {
    pub coordinate: Option<CelestialCoordinate>,
    pub parameters: Json,
}

/// The sky's flight phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum FlyingType {
    #[default]
    None,
    /// Lifting off toward a destination in the same system.
    Disembarking,
    /// Between systems.
    Flying,
    /// Arriving at the destination.
    Arriving,
}

/// The sky state machine of a ship (or any flying) world.
#[derive(Debug, Clone, Default)]
pub struct Sky {
    parameters: SkyParameters,
    flying_type: FlyingType,
    interstellar: bool,
    flight_time: f64,
    settings: Json,
    net_version: u64,
}

impl Sky {
    pub fn new(parameters: SkyParameters) -> Sky {
        Sky {
            parameters,
            ..Sky::default()
        }
    }

    pub fn parameters(&self) -> &SkyParameters {
        &self.parameters
    }

    pub fn flying_type(&self) -> FlyingType {
        self.flying_type
    }

    pub fn in_flight(&self) -> bool {
        self.flying_type != FlyingType::None
    }

    pub fn net_version(&self) -> u64 {
        self.net_version
    }

    /// Begins a flight. `start_in_warp` skips the disembark phase, used
    /// when a player logs in mid-flight.
    pub fn start_flying(&mut self, interstellar: bool, start_in_warp: bool, settings: Json) {
        self.interstellar = interstellar;
        self.flying_type = if start_in_warp {
            FlyingType::Flying
        } else {
            FlyingType::Disembarking
        };
        self.flight_time = 0.0;
        self.settings = settings;
        self.net_version += 1;
    }

    /// Ends the flight at a destination sky.
    pub fn stop_flying_at(&mut self, destination: SkyParameters) {
        self.parameters = destination;
        self.flying_type = FlyingType::None;
        self.interstellar = false;
        self.flight_time = 0.0;
        self.net_version += 1;
    }

    /// Replaces the orbital sky without touching flight state, used when
    /// the orbited planet changes type.
    pub fn set_orbital(&mut self, parameters: SkyParameters) {
        self.parameters = parameters;
        self.net_version += 1;
    }

    pub fn update(&mut self, dt: f64) {
        if self.flying_type == FlyingType::None {
            return;
        }
        self.flight_time += dt;
        // Disembark is a short fixed phase before open flight
        if self.flying_type == FlyingType::Disembarking && self.flight_time > 5.0 {
            self.flying_type = FlyingType::Flying;
            self.net_version += 1;
        }
    }

    /// Client-facing snapshot.
    pub fn net_state(&self) -> Json {
        serde_json::json!({
            "parameters": self.parameters,
            "flyingType": self.flying_type,
            "interstellar": self.interstellar,
            "settings": self.settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flight_progresses_through_phases() {
        let mut sky = Sky::new(SkyParameters::default());
        assert!(!sky.in_flight());

        sky.start_flying(true, false, Json::Null);
        assert_eq!(sky.flying_type(), FlyingType::Disembarking);

        for _ in 0..7 {
            sky.update(1.0);
        }
        assert_eq!(sky.flying_type(), FlyingType::Flying);

        sky.stop_flying_at(SkyParameters::default());
        assert!(!sky.in_flight());
    }

    #[test]
    fn warp_start_skips_disembark() {
        let mut sky = Sky::new(SkyParameters::default());
        sky.start_flying(true, true, Json::Null);
        assert_eq!(sky.flying_type(), FlyingType::Flying);
    }

    #[test]
    fn net_version_tracks_changes() {
        let mut sky = Sky::new(SkyParameters::default());
        let v0 = sky.net_version();
        sky.start_flying(false, false, Json::Null);
        assert!(sky.net_version() > v0);
        let v1 = sky.net_version();
        sky.set_orbital(SkyParameters::default());
        assert!(sky.net_version() > v1);
    }
}
