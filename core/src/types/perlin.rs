//! Seeded gradient noise.

use crate::types::random::RandomSource;
use serde::{Deserialize, Serialize};

/// How octaves combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PerlinType {
    #[default]
    Perlin,
    Billow,
    RidgedMulti,
}

/// Noise parameters, persisted alongside world layout data so regeneration
/// is deterministic on the world seed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerlinConfig {
    #[serde(rename = "type")]
    pub noise_type: PerlinType,
    pub octaves: u32,
    pub frequency: f32,
    pub amplitude: f32,
    pub bias: f32,
    /// Per-octave amplitude divisor.
    pub alpha: f32,
    /// Per-octave frequency multiplier.
    pub beta: f32,
    pub seed: u64,
}

impl Default for PerlinConfig {
    fn default() -> Self {
        PerlinConfig {
            noise_type: PerlinType::Perlin,
            octaves: 1,
            frequency: 1.0,
            amplitude: 1.0,
            bias: 0.0,
            alpha: 2.0,
            beta: 2.0,
            seed: 0,
        }
    }
}

const TABLE_SIZE: usize = 256;

/// Seeded multi-octave gradient noise over one to three dimensions.
#[derive(Clone)]
pub struct PerlinF {
    config: PerlinConfig,
    permutation: [u8; TABLE_SIZE],
}

impl std::fmt::Debug for PerlinF {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerlinF").field("config", &self.config).finish()
    }
}

impl PerlinF {
    pub fn new(config: PerlinConfig) -> Self {
        let mut permutation = [0u8; TABLE_SIZE];
        for (i, slot) in permutation.iter_mut().enumerate() {
            *slot = i as u8;
        }
        let mut random = RandomSource::with_seed(config.seed);
        random.shuffle(&mut permutation);
        PerlinF {
            config,
            permutation,
        }
    }

    pub fn with_seed(config: PerlinConfig, seed: u64) -> Self {
        PerlinF::new(PerlinConfig { seed, ..config })
    }

    pub fn config(&self) -> &PerlinConfig {
        &self.config
    }

    pub fn get1(&self, x: f32) -> f32 {
        self.get3(x, 0.37, 0.71)
    }

    pub fn get2(&self, x: f32, y: f32) -> f32 {
        self.get3(x, y, 0.53)
    }

    pub fn get3(&self, x: f32, y: f32, z: f32) -> f32 {
        let mut total = 0.0f32;
        let mut frequency = self.config.frequency;
        let mut amplitude = self.config.amplitude;

        for _ in 0..self.config.octaves.max(1) {
            let sample = self.raw3(x * frequency, y * frequency, z * frequency);
            total += match self.config.noise_type {
                PerlinType::Perlin => sample * amplitude,
                PerlinType::Billow => (sample.abs() * 2.0 - 1.0) * amplitude,
                PerlinType::RidgedMulti => (1.0 - sample.abs() * 2.0) * amplitude,
            };
            frequency *= self.config.beta;
            amplitude /= self.config.alpha;
        }

        total + self.config.bias
    }

    fn hash(&self, x: i32, y: i32, z: i32) -> usize {
        let mask = (TABLE_SIZE - 1) as i32;
        let a = self.permutation[(x & mask) as usize] as i32;
        let b = self.permutation[((y + a) & mask) as usize] as i32;
        self.permutation[((z + b) & mask) as usize] as usize
    }

    fn gradient(&self, hash: usize, x: f32, y: f32, z: f32) -> f32 {
        // 12 gradient directions folded into the low hash bits
        match hash & 15 {
            0 => x + y,
            1 => -x + y,
            2 => x - y,
            3 => -x - y,
            4 => x + z,
            5 => -x + z,
            6 => x - z,
            7 => -x - z,
            8 => y + z,
            9 => -y + z,
            10 => y - z,
            11 => -y - z,
            12 => x + y,
            13 => -x + y,
            14 => y - z,
            _ => -y - z,
        }
    }

    fn raw3(&self, x: f32, y: f32, z: f32) -> f32 {
        let xi = x.floor() as i32;
        let yi = y.floor() as i32;
        let zi = z.floor() as i32;
        let xf = x - xi as f32;
        let yf = y - yi as f32;
        let zf = z - zi as f32;

        let u = fade(xf);
        let v = fade(yf);
        let w = fade(zf);

        let corner = |dx: i32, dy: i32, dz: i32| -> f32 {
            self.gradient(
                self.hash(xi + dx, yi + dy, zi + dz),
                xf - dx as f32,
                yf - dy as f32,
                zf - dz as f32,
            )
        };

        let x00 = lerp(u, corner(0, 0, 0), corner(1, 0, 0));
        let x10 = lerp(u, corner(0, 1, 0), corner(1, 1, 0));
        let x01 = lerp(u, corner(0, 0, 1), corner(1, 0, 1));
        let x11 = lerp(u, corner(0, 1, 1), corner(1, 1, 1));

        lerp(w, lerp(v, x00, x10), lerp(v, x01, x11)) * 0.5
    }
}

impl Serialize for PerlinF {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.config.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PerlinF {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(PerlinF::new(PerlinConfig::deserialize(deserializer)?))
    }
}

fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

fn lerp(t: f32, a: f32, b: f32) -> f32 {
    a + t * (b - a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_on_seed() {
        let config = PerlinConfig {
            octaves: 3,
            frequency: 0.05,
            amplitude: 2.0,
            seed: 77,
            ..PerlinConfig::default()
        };
        let a = PerlinF::new(config);
        let b = PerlinF::new(config);
        for i in 0..50 {
            let x = i as f32 * 1.7;
            assert_eq!(a.get2(x, 3.0), b.get2(x, 3.0));
        }
        let c = PerlinF::with_seed(config, 78);
        assert_ne!(a.get2(10.0, 3.0), c.get2(10.0, 3.0));
    }

    #[test]
    fn bias_offsets_output() {
        let base = PerlinConfig {
            seed: 5,
            ..PerlinConfig::default()
        };
        let biased = PerlinConfig { bias: 10.0, ..base };
        let a = PerlinF::new(base);
        let b = PerlinF::new(biased);
        let diff = b.get2(1.5, 2.5) - a.get2(1.5, 2.5);
        assert!((diff - 10.0).abs() < 1e-4);
    }

    #[test]
    fn noise_varies_over_space() {
        let noise = PerlinF::new(PerlinConfig {
            frequency: 0.3,
            seed: 9,
            ..PerlinConfig::default()
        });
        let samples: Vec<f32> = (0..20).map(|i| noise.get1(i as f32)).collect();
        let all_same = samples.windows(2).all(|w| w[0] == w[1]);
        assert!(!all_same);
    }

    #[test]
    fn serde_round_trip_preserves_output() {
        let noise = PerlinF::new(PerlinConfig {
            octaves: 2,
            frequency: 0.1,
            seed: 1234,
            ..PerlinConfig::default()
        });
        let json = serde_json::to_string(&noise).unwrap();
        let back: PerlinF = serde_json::from_str(&json).unwrap();
        assert_eq!(noise.get2(4.2, 7.7), back.get2(4.2, 7.7));
    }
}
