// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Gradient noise and its fractal sums, for the procedural shaders.
//!
//! The base field is classic Perlin gradient noise over a fixed permutation
//! table, so a given point always evaluates to the same value in every
//! frame and on every thread. Maximum frequency is about one cycle per
//! integer step; octave sums raise that by the lacunarity per octave.

use cgmath::{Point3, Vector3};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom as _;
use rand::SeedableRng as _;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::math::FreeCoordinate;

/// Doubled permutation table; fixed seed keeps the noise field stable
/// across runs.
static PERM: Lazy<[u8; 512]> = Lazy::new(|| {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x6e6f_6973_6521);
    let mut base: [u8; 256] = std::array::from_fn(|i| i as u8);
    base.shuffle(&mut rng);
    std::array::from_fn(|i| base[i % 256])
});

#[inline]
fn fade(t: f64) -> f64 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[inline]
fn lerp(t: f64, a: f64, b: f64) -> f64 {
    a + t * (b - a)
}

#[inline]
fn grad(hash: u8, x: f64, y: f64, z: f64) -> f64 {
    // 12 gradient directions, selected by the low hash bits.
    let h = hash & 15;
    let u = if h < 8 { x } else { y };
    let v = if h < 4 {
        y
    } else if h == 12 || h == 14 {
        x
    } else {
        z
    };
    (if h & 1 == 0 { u } else { -u }) + (if h & 2 == 0 { v } else { -v })
}

/// Gradient noise at `p`, roughly in `[-1, 1]`, zero at integer lattice
/// points.
pub fn noise(p: Point3<FreeCoordinate>) -> f64 {
    let perm = &*PERM;
    let xi = (p.x.floor() as i64 & 255) as usize;
    let yi = (p.y.floor() as i64 & 255) as usize;
    let zi = (p.z.floor() as i64 & 255) as usize;
    let x = p.x - p.x.floor();
    let y = p.y - p.y.floor();
    let z = p.z - p.z.floor();
    let (u, v, w) = (fade(x), fade(y), fade(z));

    let a = perm[xi] as usize + yi;
    let aa = perm[a] as usize + zi;
    let ab = perm[a + 1] as usize + zi;
    let b = perm[xi + 1] as usize + yi;
    let ba = perm[b] as usize + zi;
    let bb = perm[b + 1] as usize + zi;

    lerp(
        w,
        lerp(
            v,
            lerp(
                u,
                grad(perm[aa], x, y, z),
                grad(perm[ba], x - 1.0, y, z),
            ),
            lerp(
                u,
                grad(perm[ab], x, y - 1.0, z),
                grad(perm[bb], x - 1.0, y - 1.0, z),
            ),
        ),
        lerp(
            v,
            lerp(
                u,
                grad(perm[aa + 1], x, y, z - 1.0),
                grad(perm[ba + 1], x - 1.0, y, z - 1.0),
            ),
            lerp(
                u,
                grad(perm[ab + 1], x, y - 1.0, z - 1.0),
                grad(perm[bb + 1], x - 1.0, y - 1.0, z - 1.0),
            ),
        ),
    )
}

/// Fractional-Brownian-motion sum of `octaves` noise octaves, each octave's
/// frequency scaled by `lacunarity` and amplitude by `lacunarity^-h` from
/// the previous one. Fractional octave counts contribute a proportional
/// remainder.
pub fn fbm(p: Point3<FreeCoordinate>, h: f64, lacunarity: f64, octaves: f64) -> f64 {
    let gain = lacunarity.powf(-h);
    let mut value = 0.0;
    let mut amplitude = 1.0;
    let mut point = p;
    let whole = octaves.floor() as u32;
    for _ in 0..whole {
        value += noise(point) * amplitude;
        amplitude *= gain;
        point = scale_point(point, lacunarity);
    }
    let remainder = octaves - f64::from(whole);
    if remainder > 0.0 {
        value += noise(point) * amplitude * remainder;
    }
    value
}

/// Turbulence: the fbm sum of absolute noise values; always non-negative.
pub fn turb(p: Point3<FreeCoordinate>, h: f64, lacunarity: f64, octaves: f64) -> f64 {
    let gain = lacunarity.powf(-h);
    let mut value = 0.0;
    let mut amplitude = 1.0;
    let mut point = p;
    let whole = octaves.floor() as u32;
    for _ in 0..whole {
        value += noise(point).abs() * amplitude;
        amplitude *= gain;
        point = scale_point(point, lacunarity);
    }
    let remainder = octaves - f64::from(whole);
    if remainder > 0.0 {
        value += noise(point).abs() * amplitude * remainder;
    }
    value
}

/// A repeatable pseudo-random vector field: three decorrelated noise
/// evaluations at fixed offsets.
pub fn noise_vec(p: Point3<FreeCoordinate>) -> Vector3<FreeCoordinate> {
    Vector3::new(
        noise(p),
        noise(Point3::new(p.x + 119.2, p.y + 33.7, p.z - 71.3)),
        noise(Point3::new(p.x - 41.9, p.y + 271.1, p.z + 163.5)),
    )
}

#[inline]
fn scale_point(p: Point3<FreeCoordinate>, s: f64) -> Point3<FreeCoordinate> {
    Point3::new(p.x * s, p.y * s, p.z * s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_deterministic_and_bounded() {
        let p = Point3::new(1.37, -2.21, 0.55);
        assert_eq!(noise(p), noise(p));
        for i in 0..200 {
            let p = Point3::new(i as f64 * 0.173, i as f64 * -0.091, i as f64 * 0.047);
            let v = noise(p);
            assert!(v.abs() <= 1.5, "noise({p:?}) = {v}");
        }
    }

    #[test]
    fn noise_vanishes_on_lattice() {
        assert_eq!(noise(Point3::new(3.0, -7.0, 12.0)), 0.0);
    }

    #[test]
    fn turbulence_is_nonnegative_and_richer_than_one_octave() {
        let p = Point3::new(0.3, 0.4, 0.5);
        assert!(turb(p, 1.0, 2.0, 4.0) >= 0.0);
        assert!(turb(p, 1.0, 2.0, 4.0) >= noise(p).abs());
    }

    #[test]
    fn fbm_fractional_octaves_interpolate() {
        let p = Point3::new(0.21, 0.83, -0.44);
        let three = fbm(p, 1.0, 2.0, 3.0);
        let three_and_bit = fbm(p, 1.0, 2.0, 3.5);
        let four = fbm(p, 1.0, 2.0, 4.0);
        let lo = three.min(four) - 1e-12;
        let hi = three.max(four) + 1e-12;
        assert!((lo..=hi).contains(&three_and_bit));
    }
}
