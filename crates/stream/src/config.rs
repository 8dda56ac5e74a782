use std::path::Path;

use serde::{Deserialize, Serialize};

/// Largest accepted `chunk_radius`. A radius of 1024 already keeps over four
/// million chunks resident.
pub const MAX_CHUNK_RADIUS: u32 = 1024;

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("chunk_size must be positive and finite, got {0}")]
    InvalidChunkSize(f32),
    #[error("chunk_radius {radius} exceeds the maximum of {max}")]
    RadiusTooLarge { radius: u32, max: u32 },
    #[error("max_per_frame must be at least 1")]
    ZeroBudget,
    #[error("lod must be at least 1 subdivision (ring {ring})")]
    ZeroLod { ring: usize },
    #[error("ring thresholds must strictly increase: ring {ring} has max_distance {max_distance}")]
    RingsNotIncreasing { ring: usize, max_distance: u32 },
    #[error("lod must not increase with distance: ring {ring} has lod {lod} above {previous}")]
    LodIncreasesWithDistance { ring: usize, lod: u32, previous: u32 },
}

/// One step of the LOD policy: every chunk at Chebyshev distance
/// `<= max_distance` (and beyond the previous ring) gets `lod` subdivisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LodRing {
    pub max_distance: u32,
    pub lod: u32,
}

/// Step function from ring distance to grid resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodPolicy {
    /// Rings ordered by increasing `max_distance`.
    pub rings: Vec<LodRing>,
    /// Resolution of everything beyond the last ring.
    pub far_lod: u32,
}

impl Default for LodPolicy {
    fn default() -> Self {
        Self {
            rings: vec![
                LodRing {
                    max_distance: 1,
                    lod: 52,
                },
                LodRing {
                    max_distance: 2,
                    lod: 30,
                },
            ],
            far_lod: 18,
        }
    }
}

impl LodPolicy {
    pub fn lod_for_distance(&self, distance: u32) -> u32 {
        self.rings
            .iter()
            .find(|ring| distance <= ring.max_distance)
            .map_or(self.far_lod, |ring| ring.lod)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut previous: Option<LodRing> = None;
        for (i, ring) in self.rings.iter().enumerate() {
            if ring.lod == 0 {
                return Err(ConfigError::ZeroLod { ring: i });
            }
            if let Some(prev) = previous {
                if ring.max_distance <= prev.max_distance {
                    return Err(ConfigError::RingsNotIncreasing {
                        ring: i,
                        max_distance: ring.max_distance,
                    });
                }
                if ring.lod > prev.lod {
                    return Err(ConfigError::LodIncreasesWithDistance {
                        ring: i,
                        lod: ring.lod,
                        previous: prev.lod,
                    });
                }
            }
            previous = Some(*ring);
        }
        let far = self.rings.len();
        if self.far_lod == 0 {
            return Err(ConfigError::ZeroLod { ring: far });
        }
        if let Some(last) = previous {
            if self.far_lod > last.lod {
                return Err(ConfigError::LodIncreasesWithDistance {
                    ring: far,
                    lod: self.far_lod,
                    previous: last.lod,
                });
            }
        }
        Ok(())
    }
}

/// Streaming configuration: tile footprint, resident radius, LOD policy and
/// per-frame generation budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Tile footprint in world units.
    pub chunk_size: f32,
    /// Rings of tiles (Chebyshev radius) kept resident around the focus.
    pub chunk_radius: u32,
    pub lod: LodPolicy,
    /// Maximum number of queued requests popped per `process_queue` call.
    pub max_per_frame: usize,
    /// Background build threads. Zero builds inline on the calling thread.
    pub workers: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 96.0,
            chunk_radius: 3,
            lod: LodPolicy::default(),
            max_per_frame: 4,
            workers: 0,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.chunk_size.is_finite() && self.chunk_size > 0.0) {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.chunk_radius > MAX_CHUNK_RADIUS {
            return Err(ConfigError::RadiusTooLarge {
                radius: self.chunk_radius,
                max: MAX_CHUNK_RADIUS,
            });
        }
        if self.max_per_frame == 0 {
            return Err(ConfigError::ZeroBudget);
        }
        self.lod.validate()
    }
}

/// Everything needed to start a streamer: the world seed plus streaming knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandscapeConfig {
    pub seed: String,
    pub stream: StreamConfig,
}

impl Default for LandscapeConfig {
    fn default() -> Self {
        Self {
            seed: "demo".into(),
            stream: StreamConfig::default(),
        }
    }
}

impl LandscapeConfig {
    /// Read and validate a JSON config file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(std::fs::File::open(path.as_ref())?)?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), seed = %config.seed, "config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream.validate()
    }
}
