// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Render-wide and per-thread state.
//!
//! What the ancestral design kept in file-scope globals is consolidated
//! here: a [`RenderContext`] is built once per frame and shared read-only
//! by the worker pool, and each worker owns a [`ThreadContext`] with its
//! RNG and statistics.

use std::sync::Arc;

use cgmath::{InnerSpace as _, Matrix4, SquareMatrix as _, Vector3};
use rand::{Rng as _, SeedableRng as _};
use rand_xoshiro::Xoshiro256PlusPlus;
use thiserror::Error;

use crate::dispatch::{JitterMode, ViewGrid};
use crate::kernel::{Intersector, OneHit, RayStats};
use crate::light::LightSet;
use crate::math::{FreeCoordinate, Rgb};
use crate::radiance::Radiance;

/// Errors from the named-option configuration surface.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum OptionError {
    #[error("unknown option {0:?}")]
    Unknown(String),
    #[error("option {name:?}: {value:?} is not a valid {expected}")]
    BadValue {
        name: String,
        value: String,
        expected: &'static str,
    },
}

/// A cutting plane: geometry on the far side is trimmed from primary rays.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KutPlane {
    pub normal: Vector3<FreeCoordinate>,
    pub dist: FreeCoordinate,
}

impl KutPlane {
    /// Signed distance of `point` from the plane.
    pub fn distance(&self, point: cgmath::Point3<FreeCoordinate>) -> FreeCoordinate {
        self.normal.dot(point - cgmath::Point3::new(0.0, 0.0, 0.0)) - self.dist
    }
}

/// The render-wide option record, settable by name (`set gamma=2.2`).
#[derive(Clone, Debug, PartialEq)]
pub struct RenderOptions {
    /// Output gamma; 0 disables correction.
    pub gamma: f64,
    /// Maximum reflection/refraction recursion depth.
    pub bounces: u32,
    /// Maximum successive internal reflections.
    pub ireflect: u32,
    /// Default `onehit` for primary rays.
    pub a_onehit: OneHit,
    /// Skip CSG evaluation for primary rays.
    pub a_no_booleans: bool,
    pub background: Rgb,
    /// Suppress background writes (compositing over existing content).
    pub overlay: bool,
    /// Ambient-occlusion ray count; 0 disables the pass.
    pub amb_samples: u32,
    /// Maximum occlusion distance; 0 = unlimited.
    pub amb_radius: f64,
    /// Offset of AO ray origins off the surface, along the normal.
    pub amb_offset: f64,
    /// Use the high-quality (slower) RNG for AO.
    pub amb_slow: bool,
    /// Thermal mode wavelength table: (nsamp, lo_nm, hi_nm).
    pub spectrum: Option<(usize, f64, f64)>,
    /// Background black-body temperature, kelvin.
    pub bg_temp: f64,
    /// Ambient light intensity (image brightness).
    pub ambient: f64,
    /// Hazy-air density; 0 disables the haze post-filter.
    pub airdensity: f64,
    pub haze: Rgb,
    /// Benchmark mode: no dither, pure black permitted.
    pub benchmark: bool,
    pub kut_plane: Option<KutPlane>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            gamma: 0.0,
            bounces: 5,
            ireflect: 5,
            a_onehit: -1,
            a_no_booleans: false,
            background: Rgb::ZERO,
            overlay: false,
            amb_samples: 0,
            amb_radius: 0.0,
            amb_offset: 0.0,
            amb_slow: false,
            spectrum: None,
            bg_temp: 293.0,
            ambient: 0.4,
            airdensity: 0.0,
            haze: Rgb::ZERO,
            benchmark: false,
            kut_plane: None,
        }
    }
}

impl RenderOptions {
    /// Sets one option by its external name, parsing `value`.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), OptionError> {
        match name {
            "gamma" => self.gamma = parse_f64(name, value)?,
            "bounces" => self.bounces = parse_f64(name, value)? as u32,
            "ireflect" => self.ireflect = parse_f64(name, value)? as u32,
            "a_onehit" => self.a_onehit = parse_f64(name, value)? as OneHit,
            "a_no_booleans" => self.a_no_booleans = parse_f64(name, value)? != 0.0,
            "background" => {
                let [r, g, b] = parse_vec3(name, value)?;
                self.background = Rgb::new(r as f32, g as f32, b as f32);
            }
            "overlay" | "ov" => self.overlay = parse_f64(name, value)? != 0.0,
            "ambSamples" => self.amb_samples = parse_f64(name, value)? as u32,
            "ambRadius" => self.amb_radius = parse_f64(name, value)?,
            "ambOffset" => self.amb_offset = parse_f64(name, value)?,
            "ambSlow" => self.amb_slow = parse_f64(name, value)? != 0.0,
            "spectrum" => {
                let [nsamp, lo, hi] = parse_vec3(name, value)?;
                self.spectrum = Some((nsamp as usize, lo, hi));
            }
            "bg_temp" => self.bg_temp = parse_f64(name, value)?,
            _ => return Err(OptionError::Unknown(name.to_string())),
        }
        Ok(())
    }
}

fn parse_f64(name: &str, value: &str) -> Result<f64, OptionError> {
    value.trim().parse().map_err(|_| OptionError::BadValue {
        name: name.to_string(),
        value: value.to_string(),
        expected: "number",
    })
}

fn parse_vec3(name: &str, value: &str) -> Result<[f64; 3], OptionError> {
    let bad = || OptionError::BadValue {
        name: name.to_string(),
        value: value.to_string(),
        expected: "three numbers",
    };
    let mut out = [0.0; 3];
    let mut n = 0;
    for piece in value.split(|c: char| c == ',' || c.is_whitespace()) {
        if piece.is_empty() {
            continue;
        }
        if n == 3 {
            return Err(bad());
        }
        out[n] = piece.parse().map_err(|_| bad())?;
        n += 1;
    }
    if n != 3 {
        return Err(bad());
    }
    Ok(out)
}

/// Sub-rectangle of the view to trace, inclusive pixel bounds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubGrid {
    pub xmin: u32,
    pub xmax: u32,
    pub ymin: u32,
    pub ymax: u32,
}

impl SubGrid {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.xmin..=self.xmax).contains(&x) && (self.ymin..=self.ymax).contains(&y)
    }
}

/// Per-frame view geometry and dispatch knobs.
#[derive(Clone, Debug)]
pub struct ViewParams {
    pub width: u32,
    pub height: u32,
    /// Extent of the view across X, model units.
    pub viewsize: FreeCoordinate,
    /// Perspective angle in degrees; 0 means parallel rays.
    pub perspective: f64,
    pub view2model: Matrix4<FreeCoordinate>,
    /// Extra anti-aliasing rays per pixel.
    pub hypersample: u32,
    pub jitter: JitterMode,
    pub stereo: bool,
    /// Progressive refinement over `incr_nlevel` passes.
    pub incr_mode: bool,
    pub incr_nlevel: u32,
    /// Multi-sample accumulation over whole frames.
    pub full_incr_mode: bool,
    pub full_incr_nsamples: u32,
    pub random_mode: bool,
    pub top_down: bool,
    pub sub_grid: Option<SubGrid>,
    /// Worker threads; 0 means one per available CPU.
    pub nproc: usize,
    /// Retain shaded points between frames and reproject them.
    pub fullfloat_mode: bool,
    /// 0 = off, 1 = with quality heuristics, 2 = reproject everything.
    pub reproject_mode: u8,
    /// Explicit buffer-mode choice; `None` selects one from the frame
    /// shape and worker count.
    pub buffer: Option<crate::framebuffer::BufMode>,
}

impl Default for ViewParams {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            viewsize: 10.0,
            perspective: 0.0,
            view2model: Matrix4::identity(),
            hypersample: 0,
            jitter: JitterMode::empty(),
            stereo: false,
            incr_mode: false,
            incr_nlevel: 0,
            full_incr_mode: false,
            full_incr_nsamples: 1,
            random_mode: false,
            top_down: false,
            sub_grid: None,
            nproc: 1,
            fullfloat_mode: false,
            reproject_mode: 0,
            buffer: None,
        }
    }
}

/// Everything the shading pipeline reads while a frame is in flight.
/// Construction happens in the view lifecycle; workers share it read-only.
pub struct RenderContext<R: Radiance = Rgb> {
    pub scene: Arc<dyn Intersector<R>>,
    pub lights: LightSet<R>,
    pub shared: R::Shared,
    pub options: RenderOptions,
    pub view: ViewParams,
    pub grid: ViewGrid,
    pub background: R,
    /// Integer 0..255 background, and the perturbed variant non-background
    /// pixels that happen to match it are nudged to.
    pub ibackground: [u8; 3],
    pub inonbackground: [u8; 3],
    pub curframe: i32,
}

/// State owned by one worker thread: its RNG (seeded by CPU index, so a
/// fixed pool size reproduces the image) and its ray statistics.
pub struct ThreadContext {
    pub cpu: usize,
    pub rng: Xoshiro256PlusPlus,
    /// Separate generator for quality-sensitive sampling (`ambSlow`).
    pub slow_rng: rand::rngs::StdRng,
    pub stats: RayStats,
}

impl ThreadContext {
    pub fn new(cpu: usize) -> Self {
        Self {
            cpu,
            rng: Xoshiro256PlusPlus::seed_from_u64(cpu as u64),
            slow_rng: rand::rngs::StdRng::seed_from_u64(0x5eed ^ cpu as u64),
            stats: RayStats::default(),
        }
    }

    /// Uniform in `[-0.5, 0.5)`.
    #[inline]
    pub fn rand_half(&mut self) -> f64 {
        self.rng.gen::<f64>() - 0.5
    }

    /// Uniform in `[0, 1)`.
    #[inline]
    pub fn rand0to1(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn options_set_by_name() {
        let mut opts = RenderOptions::default();
        opts.set("gamma", "2.2").unwrap();
        opts.set("bounces", "3").unwrap();
        opts.set("background", "0.25 0 0.5").unwrap();
        opts.set("ambSamples", "64").unwrap();
        opts.set("spectrum", "20,380,720").unwrap();
        opts.set("ov", "1").unwrap();
        assert_eq!(opts.gamma, 2.2);
        assert_eq!(opts.bounces, 3);
        assert_eq!(opts.background, Rgb::new(0.25, 0.0, 0.5));
        assert_eq!(opts.amb_samples, 64);
        assert_eq!(opts.spectrum, Some((20, 380.0, 720.0)));
        assert!(opts.overlay);
    }

    #[test]
    fn option_errors_are_structured() {
        let mut opts = RenderOptions::default();
        assert_eq!(
            opts.set("shininess", "2"),
            Err(OptionError::Unknown("shininess".into()))
        );
        assert!(matches!(
            opts.set("gamma", "bright"),
            Err(OptionError::BadValue { .. })
        ));
        assert!(opts.set("background", "1 2").is_err());
    }

    #[test]
    fn thread_rngs_are_deterministic_per_cpu() {
        let mut a = ThreadContext::new(3);
        let mut b = ThreadContext::new(3);
        let mut c = ThreadContext::new(4);
        let seq_a: Vec<f64> = (0..4).map(|_| a.rand0to1()).collect();
        let seq_b: Vec<f64> = (0..4).map(|_| b.rand0to1()).collect();
        let seq_c: Vec<f64> = (0..4).map(|_| c.rand0to1()).collect();
        assert_eq!(seq_a, seq_b);
        assert_ne!(seq_a, seq_c);
        assert!(seq_a.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn kut_plane_signed_distance() {
        let plane = KutPlane {
            normal: Vector3::unit_z(),
            dist: 2.0,
        };
        assert_eq!(plane.distance(cgmath::Point3::new(0.0, 0.0, 5.0)), 3.0);
        assert_eq!(plane.distance(cgmath::Point3::new(1.0, 1.0, 0.0)), -2.0);
    }
}
