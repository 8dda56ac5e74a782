use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::hash::fnv1a_64;

/// Skew factor `(sqrt(3) - 1) / 2`.
const F2: f64 = 0.366_025_403_784_438_6;
/// Unskew factor `(3 - sqrt(3)) / 6`.
const G2: f64 = 0.211_324_865_405_187_1;
/// Scale bringing the summed corner contributions to roughly [-1, 1].
const SCALE: f64 = 70.0;

const GRADIENTS: [[f64; 2]; 12] = [
    [1.0, 1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [-1.0, -1.0],
    [1.0, 0.0],
    [-1.0, 0.0],
    [1.0, 0.0],
    [-1.0, 0.0],
    [0.0, 1.0],
    [0.0, -1.0],
    [0.0, 1.0],
    [0.0, -1.0],
];

/// A seeded 2D simplex noise field.
///
/// Immutable after construction, so one instance can be shared freely
/// between threads.
#[derive(Clone)]
pub struct NoiseField {
    perm: [u8; 512],
}

impl std::fmt::Debug for NoiseField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseField")
            .field("perm_head", &&self.perm[..8])
            .finish()
    }
}

impl NoiseField {
    /// Build the permutation table for `seed`.
    ///
    /// The seed string is hashed with FNV-1a, then a ChaCha8 stream seeded
    /// from that hash shuffles `0..=255`. The table is stored twice over so
    /// lattice lookups never need to wrap.
    pub fn new(seed: &str) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(fnv1a_64(seed));
        let mut p: [u8; 256] = std::array::from_fn(|i| i as u8);
        p.shuffle(&mut rng);
        let perm = std::array::from_fn(|i| p[i & 255]);
        tracing::trace!(seed, "noise field built");
        Self { perm }
    }

    /// Single-octave simplex noise in [-1, 1].
    pub fn noise2d(&self, x: f64, y: f64) -> f64 {
        let s = (x + y) * F2;
        let i = (x + s).floor();
        let j = (y + s).floor();
        let t = (i + j) * G2;
        let x0 = x - (i - t);
        let y0 = y - (j - t);

        // Upper or lower triangle of the skewed cell.
        let (i1, j1) = if x0 > y0 { (1, 0) } else { (0, 1) };

        let x1 = x0 - i1 as f64 + G2;
        let y1 = y0 - j1 as f64 + G2;
        let x2 = x0 - 1.0 + 2.0 * G2;
        let y2 = y0 - 1.0 + 2.0 * G2;

        let ii = (i as i64 & 255) as usize;
        let jj = (j as i64 & 255) as usize;
        let p = &self.perm;
        let g0 = p[ii + p[jj] as usize] as usize % 12;
        let g1 = p[ii + i1 + p[jj + j1] as usize] as usize % 12;
        let g2 = p[ii + 1 + p[jj + 1] as usize] as usize % 12;

        let n = corner(g0, x0, y0) + corner(g1, x1, y1) + corner(g2, x2, y2);
        (SCALE * n).clamp(-1.0, 1.0)
    }

    /// Multi-octave noise normalised by the accumulated amplitude.
    ///
    /// Each octave multiplies the frequency by `lacunarity` and the amplitude
    /// by `gain`. Zero octaves yields 0.
    pub fn fractal2d(&self, x: f64, y: f64, octaves: u32, lacunarity: f64, gain: f64) -> f64 {
        let mut sum = 0.0;
        let mut total = 0.0;
        let mut freq = 1.0;
        let mut amp = 1.0;
        for _ in 0..octaves {
            sum += self.noise2d(x * freq, y * freq) * amp;
            total += f64::abs(amp);
            freq *= lacunarity;
            amp *= gain;
        }
        if total == 0.0 { 0.0 } else { sum / total }
    }

    /// [`NoiseField::fractal2d`] with lacunarity 2 and gain 0.5.
    pub fn fbm(&self, x: f64, y: f64, octaves: u32) -> f64 {
        self.fractal2d(x, y, octaves, 2.0, 0.5)
    }
}

fn corner(gradient: usize, x: f64, y: f64) -> f64 {
    let t = 0.5 - x * x - y * y;
    if t < 0.0 {
        0.0
    } else {
        let t2 = t * t;
        let g = GRADIENTS[gradient];
        t2 * t2 * (g[0] * x + g[1] * y)
    }
}
