use landscape_noise::NoiseField;

use crate::biome::Biome;

const CONTINENTAL_FREQ: f64 = 0.0011;
const CONTINENTAL_AMP: f64 = 70.0;
const WARP_FREQ: f64 = 0.0004;
const WARP_STRENGTH: f64 = 0.6;
const MOUNTAIN_FREQ: f64 = 0.0045;
const MOUNTAIN_AMP: f64 = 18.0;
const RIDGE_AMP: f64 = 45.0;
const DETAIL_FREQ: f64 = 0.035;
const DETAIL_AMP: f64 = 2.5;
/// Subtracted from the blend so mean sea level sits near zero.
const HEIGHT_OFFSET: f64 = 10.0;

const HUMIDITY_FREQ: f64 = 0.0013;
const TEMPERATURE_FREQ: f64 = 0.0009;
/// World units of |z| over which the latitude term reaches its maximum.
const LATITUDE_SPAN: f64 = 20_000.0;
const LATITUDE_WEIGHT: f64 = 0.5;
/// Temperature lost per world unit above sea level.
const LAPSE_RATE: f64 = 0.006;

/// One point of the terrain field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainSample {
    pub height: f64,
    pub humidity: f64,
    pub temperature: f64,
}

impl TerrainSample {
    pub fn biome(&self) -> Biome {
        Biome::classify(self.height, self.humidity, self.temperature)
    }
}

/// Deterministic terrain sampler built from five independently seeded
/// noise fields.
///
/// Read-only after construction; share it behind an `Arc` and replace it
/// wholesale when the seed changes.
#[derive(Debug, Clone)]
pub struct TerrainField {
    seed: String,
    continental: NoiseField,
    mountain: NoiseField,
    detail: NoiseField,
    humidity: NoiseField,
    temperature: NoiseField,
}

impl TerrainField {
    pub fn new(seed: &str) -> Self {
        let role = |name: &str| NoiseField::new(&format!("{seed}:{name}"));
        tracing::debug!(seed, "building terrain field");
        Self {
            seed: seed.to_owned(),
            continental: role("continental"),
            mountain: role("mountain"),
            detail: role("detail"),
            humidity: role("humidity"),
            temperature: role("temperature"),
        }
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Terrain height at world (x, z).
    pub fn sample_height(&self, x: f64, z: f64) -> f64 {
        let warp_x = self
            .continental
            .fbm(x * WARP_FREQ + 31.7, z * WARP_FREQ - 11.3, 2);
        let warp_z = self
            .continental
            .fbm(x * WARP_FREQ - 47.1, z * WARP_FREQ + 23.9, 2);
        let continental = self.continental.fbm(
            x * CONTINENTAL_FREQ + warp_x * WARP_STRENGTH,
            z * CONTINENTAL_FREQ + warp_z * WARP_STRENGTH,
            4,
        );

        let mountain = self
            .mountain
            .fbm(x * MOUNTAIN_FREQ, z * MOUNTAIN_FREQ, 5);
        let ridge = 1.0 - mountain.abs();
        let detail = self.detail.fbm(x * DETAIL_FREQ, z * DETAIL_FREQ, 3);

        // Mountains only rise where the continent is above water.
        let land = smoothstep(-0.15, 0.45, continental);

        continental * CONTINENTAL_AMP
            + mountain * MOUNTAIN_AMP * land
            + ridge * ridge * RIDGE_AMP * land
            + detail * DETAIL_AMP
            - HEIGHT_OFFSET
    }

    /// Humidity in [0, 1].
    pub fn sample_humidity(&self, x: f64, z: f64) -> f64 {
        let n = self.humidity.fbm(
            x * HUMIDITY_FREQ + 100.0,
            z * HUMIDITY_FREQ - 100.0,
            4,
        );
        (n * 0.5 + 0.5).clamp(0.0, 1.0)
    }

    /// Temperature in [0, 1]: colder towards large |z| and above sea level.
    pub fn sample_temperature(&self, x: f64, z: f64, height: f64) -> f64 {
        let base = self
            .temperature
            .fbm(x * TEMPERATURE_FREQ, z * TEMPERATURE_FREQ, 3)
            * 0.5
            + 0.5;
        let latitude = (z.abs() / LATITUDE_SPAN).min(1.0);
        let altitude = height.max(0.0) * LAPSE_RATE;
        (base - latitude * LATITUDE_WEIGHT - altitude).clamp(0.0, 1.0)
    }

    /// All three samplers at once.
    pub fn sample(&self, x: f64, z: f64) -> TerrainSample {
        let height = self.sample_height(x, z);
        TerrainSample {
            height,
            humidity: self.sample_humidity(x, z),
            temperature: self.sample_temperature(x, z, height),
        }
    }

    pub fn biome_at(&self, x: f64, z: f64) -> Biome {
        self.sample(x, z).biome()
    }
}

fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
