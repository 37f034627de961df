//! Server-side weather: a state machine over a weighted weather pool.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use skyward_core::geometry::WorldGeometry;
use skyward_core::math::{RectI, Vec2F};
use skyward_core::types::random::RandomSource;
use skyward_core::types::time::Clock;
use skyward_core::types::weighted_pool::WeightedPool;
use std::collections::HashMap;
use std::sync::Arc;

/// Weather names weighted by likelihood.
pub type WeatherPool = WeightedPool<String>;

/// A projectile a weather type rains down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeatherProjectileConfig {
    pub projectile: String,
    pub parameters: Json,
    pub velocity: Vec2F,
    /// Spawns per tick per horizontal tile of active client region.
    pub rate_per_x: f32,
    /// How far above the visible region projectiles appear.
    pub spawn_above_region: i32,
    pub spawn_horizontal_pad: i32,
    pub wind_affect_amount: f32,
}

impl Default for WeatherProjectileConfig {
    fn default() -> Self {
        WeatherProjectileConfig {
            projectile: String::new(),
            parameters: Json::Null,
            velocity: Vec2F::new(0.0, -40.0),
            rate_per_x: 0.0,
            spawn_above_region: 20,
            spawn_horizontal_pad: 10,
            wind_affect_amount: 0.0,
        }
    }
}

/// One authored weather state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WeatherType {
    pub name: String,
    pub projectiles: Vec<WeatherProjectileConfig>,
    pub status_effects: Vec<String>,
    pub maximum_wind: f32,
    /// Seconds a bout of this weather lasts, sampled uniformly.
    pub duration: (f32, f32),
}

/// A projectile produced by the weather step, to be added to the world.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherProjectile {
    pub projectile: String,
    pub parameters: Json,
    pub position: Vec2F,
    pub velocity: Vec2F,
}

/// The per-world weather server. Picks the next weather from the pool on
/// the reference clock, interpolates wind between changes, and spawns
/// weather projectiles across active client windows.
pub struct ServerWeather {
    pool: WeatherPool,
    types: HashMap<String, WeatherType>,
    geometry: WorldGeometry,
    undersurface_level: f32,

    client_visible_regions: Vec<RectI>,
    reference_clock: Option<Arc<Clock>>,

    current_weather: Option<WeatherType>,
    current_intensity: f32,
    current_wind: f32,
    target_wind: f32,
    force_weather: bool,

    current_time: f64,
    last_change_time: f64,
    next_change_time: f64,

    random: RandomSource,
    new_projectiles: Vec<WeatherProjectile>,
    /// Bumped whenever client-visible weather state changes.
    net_version: u64,
}

impl ServerWeather {
    pub fn new() -> ServerWeather {
        ServerWeather {
            pool: WeatherPool::new(),
            types: HashMap::new(),
            geometry: WorldGeometry::default(),
            undersurface_level: 0.0,
            client_visible_regions: Vec::new(),
            reference_clock: None,
            current_weather: None,
            current_intensity: 0.0,
            current_wind: 0.0,
            target_wind: 0.0,
            force_weather: false,
            current_time: 0.0,
            last_change_time: 0.0,
            next_change_time: 0.0,
            random: RandomSource::new(),
            new_projectiles: Vec::new(),
            net_version: 0,
        }
    }

    pub fn setup(
        &mut self,
        pool: WeatherPool,
        types: HashMap<String, WeatherType>,
        undersurface_level: f32,
        geometry: WorldGeometry,
    ) {
        self.pool = pool;
        self.types = types;
        self.undersurface_level = undersurface_level;
        self.geometry = geometry;
    }

    pub fn set_reference_clock(&mut self, clock: Option<Arc<Clock>>) {
        if let Some(clock) = &clock {
            self.current_time = clock.time();
        }
        self.reference_clock = clock;
    }

    pub fn set_client_visible_regions(&mut self, regions: Vec<RectI>) {
        self.client_visible_regions = regions;
    }

    pub fn weather_list(&self) -> Vec<String> {
        self.pool.items().cloned().collect()
    }

    pub fn current_weather_name(&self) -> Option<&str> {
        self.current_weather.as_ref().map(|w| w.name.as_str())
    }

    pub fn wind(&self) -> f32 {
        self.current_wind
    }

    pub fn intensity(&self) -> f32 {
        self.current_intensity
    }

    pub fn net_version(&self) -> u64 {
        self.net_version
    }

    pub fn status_effects(&self) -> Vec<String> {
        self.current_weather
            .as_ref()
            .map(|w| w.status_effects.clone())
            .unwrap_or_default()
    }

    /// Sets weather by name, clearing it when unknown. With `force`, no
    /// automatic change happens until forcing is lifted.
    pub fn set_weather(&mut self, name: &str, force: bool) {
        self.apply_weather(self.types.get(name).cloned());
        self.force_weather = force;
        self.schedule_next_change();
    }

    pub fn set_weather_index(&mut self, index: usize, force: bool) {
        let name = self.pool.item(index).cloned();
        match name {
            Some(name) => self.set_weather(&name, force),
            None => {
                self.apply_weather(None);
                self.force_weather = force;
            }
        }
    }

    pub fn force_weather(&mut self, force: bool) {
        self.force_weather = force;
    }

    fn apply_weather(&mut self, weather: Option<WeatherType>) {
        self.target_wind = weather
            .as_ref()
            .map(|w| {
                let wind = self.random.randf_range(-w.maximum_wind, w.maximum_wind);
                wind
            })
            .unwrap_or(0.0);
        self.current_intensity = if weather.is_some() { 1.0 } else { 0.0 };
        self.current_weather = weather;
        self.net_version += 1;
    }

    fn schedule_next_change(&mut self) {
        let duration = self
            .current_weather
            .as_ref()
            .map(|w| self.random.randf_range(w.duration.0, w.duration.1))
            .unwrap_or_else(|| self.random.randf_range(30.0, 120.0));
        self.last_change_time = self.current_time;
        self.next_change_time = self.current_time + duration as f64;
    }

    pub fn update(&mut self, dt: f64) {
        match &self.reference_clock {
            Some(clock) => self.current_time = clock.time(),
            None => self.current_time += dt,
        }

        if !self.force_weather && self.current_time >= self.next_change_time {
            let seed = self.random.randu64();
            let next = self.pool.select_seeded(seed);
            self.apply_weather(next.and_then(|name| self.types.get(&name).cloned()));
            self.schedule_next_change();
        }

        // Wind slides linearly toward the current target
        let window = (self.next_change_time - self.last_change_time).max(1.0);
        let rate = (self.target_wind - self.current_wind).abs() / window as f32;
        if self.current_wind < self.target_wind {
            self.current_wind = (self.current_wind + rate * dt as f32).min(self.target_wind);
        } else {
            self.current_wind = (self.current_wind - rate * dt as f32).max(self.target_wind);
        }

        self.spawn_weather_projectiles(dt as f32);
    }

    fn spawn_weather_projectiles(&mut self, dt: f32) {
        let Some(weather) = self.current_weather.clone() else {
            return;
        };
        for config in &weather.projectiles {
            if config.rate_per_x <= 0.0 {
                continue;
            }
            for region in &self.client_visible_regions {
                // Only above-surface regions receive weather
                if (region.y_max() as f32) < self.undersurface_level {
                    continue;
                }
                let width = region.width() + config.spawn_horizontal_pad * 2;
                let expected = config.rate_per_x * width as f32 * dt;
                let mut count = expected.floor() as i32;
                if self.random.randf() < expected.fract() {
                    count += 1;
                }
                for _ in 0..count {
                    let x = self.random.randf_range(
                        (region.x_min() - config.spawn_horizontal_pad) as f32,
                        (region.x_max() + config.spawn_horizontal_pad) as f32,
                    );
                    let y = (region.y_max() + config.spawn_above_region) as f32;
                    let position = self.geometry.xwrap(Vec2F::new(x, y));
                    let velocity = config.velocity
                        + Vec2F::new(self.current_wind * config.wind_affect_amount, 0.0);
                    self.new_projectiles.push(WeatherProjectile {
                        projectile: config.projectile.clone(),
                        parameters: config.parameters.clone(),
                        position,
                        velocity,
                    });
                }
            }
        }
    }

    /// Drains projectiles produced since the last pull.
    pub fn pull_new_projectiles(&mut self) -> Vec<WeatherProjectile> {
        std::mem::take(&mut self.new_projectiles)
    }
}

impl Default for ServerWeather {
    fn default() -> Self {
        ServerWeather::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyward_core::math::Vec2U;

    fn rain() -> WeatherType {
        WeatherType {
            name: "rain".into(),
            projectiles: vec![WeatherProjectileConfig {
                projectile: "raindrop".into(),
                rate_per_x: 0.5,
                ..WeatherProjectileConfig::default()
            }],
            status_effects: vec!["wet".into()],
            maximum_wind: 20.0,
            duration: (60.0, 120.0),
        }
    }

    fn weather() -> ServerWeather {
        let mut server = ServerWeather::new();
        let mut pool = WeatherPool::new();
        pool.add(1.0, "rain".to_string());
        let mut types = HashMap::new();
        types.insert("rain".to_string(), rain());
        server.setup(
            pool,
            types,
            500.0,
            WorldGeometry::new(Vec2U::new(3000, 2000)),
        );
        server
    }

    #[test]
    fn forced_weather_does_not_auto_change() {
        let mut server = weather();
        server.set_weather("rain", true);
        assert_eq!(server.current_weather_name(), Some("rain"));
        // Run far past any scheduled change
        for _ in 0..1000 {
            server.update(10.0);
        }
        assert_eq!(server.current_weather_name(), Some("rain"));
    }

    #[test]
    fn unknown_weather_clears() {
        let mut server = weather();
        server.set_weather("rain", false);
        server.set_weather("molten-glass", true);
        assert_eq!(server.current_weather_name(), None);
        assert_eq!(server.intensity(), 0.0);
    }

    #[test]
    fn projectiles_spawn_over_visible_regions() {
        let mut server = weather();
        server.set_weather("rain", true);
        server.set_client_visible_regions(vec![RectI::from_coords(100, 600, 200, 700)]);
        for _ in 0..10 {
            server.update(0.05);
        }
        let projectiles = server.pull_new_projectiles();
        assert!(!projectiles.is_empty());
        for projectile in &projectiles {
            assert_eq!(projectile.projectile, "raindrop");
            assert!(projectile.position.y() >= 700.0);
        }
        assert!(server.pull_new_projectiles().is_empty(), "pull drains");
    }

    #[test]
    fn no_projectiles_without_visible_regions() {
        let mut server = weather();
        server.set_weather("rain", true);
        for _ in 0..10 {
            server.update(0.05);
        }
        assert!(server.pull_new_projectiles().is_empty());
    }

    #[test]
    fn wind_moves_toward_target() {
        let mut server = weather();
        server.set_weather("rain", true);
        let initial = server.wind();
        for _ in 0..200 {
            server.update(1.0);
        }
        let target = server.target_wind;
        assert!(
            (server.wind() - target).abs() <= (initial - target).abs(),
            "wind approaches its target"
        );
    }
}
