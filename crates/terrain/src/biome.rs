use serde::{Deserialize, Serialize};

/// Height of the water plane.
pub const SEA_LEVEL: f64 = 0.0;
/// Band above sea level classified as beach.
pub const BEACH_HEIGHT: f64 = 2.0;
/// Above this height the terrain is bare rock or snow.
const ALPINE_HEIGHT: f64 = 60.0;

/// Coarse surface classification derived from a terrain sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Biome {
    Ocean,
    Beach,
    Desert,
    Grassland,
    Forest,
    Rainforest,
    Tundra,
    Snow,
    Rock,
}

impl Biome {
    pub const ALL: [Biome; 9] = [
        Biome::Ocean,
        Biome::Beach,
        Biome::Desert,
        Biome::Grassland,
        Biome::Forest,
        Biome::Rainforest,
        Biome::Tundra,
        Biome::Snow,
        Biome::Rock,
    ];

    pub fn classify(height: f64, humidity: f64, temperature: f64) -> Self {
        if height < SEA_LEVEL {
            return Biome::Ocean;
        }
        if height > ALPINE_HEIGHT {
            return if temperature < 0.35 { Biome::Snow } else { Biome::Rock };
        }
        if temperature < 0.15 {
            return Biome::Snow;
        }
        if height < SEA_LEVEL + BEACH_HEIGHT {
            return Biome::Beach;
        }
        if temperature < 0.3 {
            Biome::Tundra
        } else if humidity < 0.3 && temperature > 0.6 {
            Biome::Desert
        } else if humidity > 0.7 && temperature > 0.65 {
            Biome::Rainforest
        } else if humidity > 0.5 {
            Biome::Forest
        } else {
            Biome::Grassland
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Biome::Ocean => "ocean",
            Biome::Beach => "beach",
            Biome::Desert => "desert",
            Biome::Grassland => "grassland",
            Biome::Forest => "forest",
            Biome::Rainforest => "rainforest",
            Biome::Tundra => "tundra",
            Biome::Snow => "snow",
            Biome::Rock => "rock",
        }
    }

    /// Single character used by text previews.
    pub fn glyph(self) -> char {
        match self {
            Biome::Ocean => '~',
            Biome::Beach => '.',
            Biome::Desert => ':',
            Biome::Grassland => ',',
            Biome::Forest => 'f',
            Biome::Rainforest => 'F',
            Biome::Tundra => 't',
            Biome::Snow => '*',
            Biome::Rock => '^',
        }
    }
}

impl std::fmt::Display for Biome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
