// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The interface to the ray/geometry intersection kernel.
//!
//! candela does not own the intersection kernel; it consumes one through the
//! small fixed surface defined here. A kernel produces, for each ray, an
//! ordered list of [`Partition`]s — contiguous spans of the ray through
//! single regions — and the shading pipeline turns those into radiometric
//! pixel values. The crate ships a simple union-only kernel in
//! [`crate::geom`] for tests and embedders without their own.

use std::fmt;
use std::sync::Arc;

use cgmath::{Point3, Vector3};

use crate::math::{FreeCoordinate, Rgb};
use crate::radiance::Radiance;
use crate::shaders::Shader;

/// A ray: origin point and unit direction, in model space (millimeters).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Point3<FreeCoordinate>,
    pub direction: Vector3<FreeCoordinate>,
}

impl Ray {
    pub fn new(origin: Point3<FreeCoordinate>, direction: Vector3<FreeCoordinate>) -> Self {
        Self { origin, direction }
    }

    /// The point at parameter `dist` along the ray.
    #[inline]
    pub fn at(&self, dist: FreeCoordinate) -> Point3<FreeCoordinate> {
        self.origin + self.direction * dist
    }
}

/// Surface parameterization of a hit point, each coordinate in `[0, 1]`,
/// with approximate footprint extents for beam rays.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UvCoord {
    pub u: FreeCoordinate,
    pub v: FreeCoordinate,
    pub du: FreeCoordinate,
    pub dv: FreeCoordinate,
}

/// One intersection of a ray with a surface.
///
/// Only `dist` is guaranteed valid when a kernel returns a hit; `point` and
/// `normal` are computed lazily by the shading dispatcher when a shader
/// declares it needs them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitRecord {
    /// Signed distance along the ray, in mm. Negative means behind the ray
    /// origin (e.g. the eye is inside the solid).
    pub dist: FreeCoordinate,
    pub point: Point3<FreeCoordinate>,
    pub normal: Vector3<FreeCoordinate>,
}

impl HitRecord {
    pub fn at_dist(dist: FreeCoordinate) -> Self {
        Self {
            dist,
            point: Point3::new(0.0, 0.0, 0.0),
            normal: Vector3::new(0.0, 0.0, 0.0),
        }
    }
}

/// Geometric primitive interface consumed by the shading core: surface
/// normal and UV computation for hits, plus the center/bounding-radius
/// queries the light-source shader uses to place lights.
pub trait Primitive: fmt::Debug + Send + Sync {
    /// Name of the primitive type, for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Entry and exit distance of the ray through this solid, if it hits.
    fn intersect(&self, ray: &Ray) -> Option<(FreeCoordinate, FreeCoordinate)>;

    /// Outward surface normal at the point `ray.at(dist)`.
    fn normal(&self, ray: &Ray, dist: FreeCoordinate) -> Vector3<FreeCoordinate>;

    /// Surface UV at the point `ray.at(dist)`.
    fn uv(&self, ray: &Ray, dist: FreeCoordinate) -> UvCoord;

    fn center(&self) -> Point3<FreeCoordinate>;

    /// Radius of an approximating sphere about [`Primitive::center`].
    fn radius(&self) -> FreeCoordinate;
}

/// A contiguous span of a ray through one region, delimited by an in hit
/// and an out hit.
#[derive(Clone, Debug)]
pub struct Partition<R: Radiance = Rgb> {
    pub inhit: HitRecord,
    pub outhit: HitRecord,
    /// Whether the solid's outward normal at the in/out hit must be reversed
    /// to face against the ray.
    pub inflip: bool,
    pub outflip: bool,
    pub in_solid: Arc<dyn Primitive>,
    pub out_solid: Arc<dyn Primitive>,
    pub region: Arc<Region<R>>,
}

/// A geometry region together with its prepped material state.
///
/// Regions arrive from the geometry database as a [`RegionDef`]; running the
/// shader registry over the definitions (see `View::setup`) produces these
/// immutable prepped records.
#[derive(Debug)]
pub struct Region<R: Radiance = Rgb> {
    pub name: String,
    /// Numeric region identifier from the geometry database.
    pub id: i32,
    /// 0 for solid matter; positive values identify kinds of air.
    pub aircode: i32,
    /// Line-of-sight density percentage.
    pub los: f64,
    /// Override color; regions without one shade as white.
    pub color: Option<Rgb>,
    /// Temperature in kelvin, for thermal emission.
    pub temperature: Option<f64>,
    /// Prepped shader. `None` only on the error path where prep failed but
    /// the region was retained; shading such a region logs and produces no
    /// color.
    pub shader: Option<Shader<R>>,
    /// `base_color * transmit` as computed by the material setup; the shadow
    /// path consults this to decide whether a blocker is entirely opaque.
    pub transmit: Rgb,
    /// Region participates in shading (as a light target) but must not be
    /// drawn nor block rays. Set for invisible light sources.
    pub no_draw: bool,
}

impl<R: Radiance> Region<R> {
    /// Whether light can pass through this region at all.
    #[inline]
    pub fn is_transparent(&self) -> bool {
        self.transmit.sum() > 0.0
    }
}

/// An unprepped region definition: what the geometry database hands us.
#[derive(Clone, Debug)]
pub struct RegionDef {
    pub name: String,
    pub id: i32,
    pub aircode: i32,
    pub los: f64,
    pub color: Option<Rgb>,
    pub temperature: Option<f64>,
    /// Material specification: shader name followed by its parameter string,
    /// e.g. `"plastic sh=8 di=0.6"`.
    pub shader: String,
    /// Region-space to model-space transform, for shaders that march in the
    /// region's own coordinate system.
    pub to_model: cgmath::Matrix4<FreeCoordinate>,
}

impl RegionDef {
    pub fn new(name: impl Into<String>, shader: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: 0,
            aircode: 0,
            los: 100.0,
            color: None,
            temperature: None,
            shader: shader.into(),
            to_model: cgmath::Matrix4::from_scale(1.0),
        }
    }

    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_aircode(mut self, aircode: i32) -> Self {
        self.aircode = aircode;
        self
    }

    pub fn with_id(mut self, id: i32) -> Self {
        self.id = id;
        self
    }

    pub fn with_temperature(mut self, kelvin: f64) -> Self {
        self.temperature = Some(kelvin);
        self
    }
}

/// How many surface hits a primary ray follows before the kernel may stop.
///
/// Positive: require that many non-air hits, then stop (1 = opaque
/// first-surface only). Negative: same magnitude, but air partitions are
/// retained and do not satisfy the count. Zero: produce the full partition
/// list.
pub type OneHit = i32;

/// The intersection kernel contract.
pub trait Intersector<R: Radiance = Rgb>: Send + Sync {
    /// Shoots `ray` and returns the ordered partition list; empty means the
    /// ray missed everything.
    fn trace(&self, ray: &Ray, onehit: OneHit) -> Vec<Partition<R>>;

    /// Distance tolerance of the prepped geometry (the epsilon below which
    /// two hit distances are the same point).
    fn tolerance(&self) -> FreeCoordinate;
}

/// Per-thread ray statistics, summed into frame totals when a worker
/// finishes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RayStats {
    pub shots: u64,
    pub hits: u64,
    pub misses: u64,
}

impl RayStats {
    pub fn absorb(&mut self, other: RayStats) {
        self.shots += other.shots;
        self.hits += other.hits;
        self.misses += other.misses;
    }
}

/// The per-ray state bundle threaded through the shading pipeline.
///
/// One `Application` exists per in-flight ray; recursive rays (reflection,
/// refraction, shadows, ambient occlusion) clone the parent and bump
/// `level`. All fields are plain data; the structure never outlives the
/// pixel that spawned it.
#[derive(Clone, Debug)]
pub struct Application<R: Radiance = Rgb> {
    pub ray: Ray,
    /// Beam radius at the ray origin, mm.
    pub rbeam: FreeCoordinate,
    /// Angular beam divergence, radius growth per mm of travel.
    pub diverge: FreeCoordinate,
    /// Recursion depth; 0 for primary rays.
    pub level: u32,
    /// Count of successive total internal reflections on this ray tree.
    pub ireflect: u32,
    /// Why this ray was fired, for tracing.
    pub purpose: &'static str,
    /// Pixel indices of the primary ray this descends from.
    pub x: u32,
    pub y: u32,
    pub onehit: OneHit,
    /// Refractive index of the medium the ray is currently traveling in.
    pub refrac_index: FreeCoordinate,
    /// Distance traveled through preceding media before the first non-air
    /// hit, mm.
    pub cumlen: FreeCoordinate,
    /// Accumulated color output of the ray.
    pub color: R,
    /// True if the ray hit the model (`a_user` in the ancestral sense).
    pub hit: bool,
    /// Distance to the first shaded hit.
    pub dist: FreeCoordinate,
    /// Region of the primary hit, when any.
    pub hit_region: Option<Arc<Region<R>>>,
    /// Set when this ray is an internal ray escaping a refractive solid;
    /// enables the thin-sliver skip in the pixel shader.
    pub internal_escape: bool,
}

impl<R: Radiance> Application<R> {
    pub fn new(ray: Ray, shared: &R::Shared) -> Self {
        Self {
            ray,
            rbeam: 0.0,
            diverge: 0.0,
            level: 0,
            ireflect: 0,
            purpose: "main ray",
            x: 0,
            y: 0,
            onehit: -1,
            refrac_index: crate::RI_AIR,
            cumlen: 0.0,
            color: R::constant(shared, 0.0),
            hit: false,
            dist: 0.0,
            hit_region: None,
            internal_escape: false,
        }
    }

    /// Clones this application for a recursive sub-ray at `level + 1`.
    #[must_use]
    pub fn descend(&self, ray: Ray, purpose: &'static str) -> Self {
        let mut sub = self.clone();
        sub.ray = ray;
        sub.level = self.level + 1;
        sub.purpose = purpose;
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ray_at_walks_the_direction() {
        let ray = Ray::new(Point3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 0.0, -1.0));
        assert_eq!(ray.at(2.5), Point3::new(1.0, 0.0, -2.5));
    }

    #[test]
    fn stats_absorb() {
        let mut a = RayStats {
            shots: 10,
            hits: 4,
            misses: 6,
        };
        a.absorb(RayStats {
            shots: 2,
            hits: 2,
            misses: 0,
        });
        assert_eq!(
            a,
            RayStats {
                shots: 12,
                hits: 6,
                misses: 6
            }
        );
    }

    #[test]
    fn descend_increments_level_only() {
        let app: Application = Application::new(
            Ray::new(Point3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0)),
            &(),
        );
        let sub = app.descend(app.ray, "test sub-ray");
        assert_eq!(sub.level, 1);
        assert_eq!(sub.cumlen, app.cumlen);
        assert_eq!(sub.purpose, "test sub-ray");
    }
}
