// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! A minimal geometry kernel: sphere and box primitives and a union-only
//! [`Intersector`].
//!
//! This is not a production intersection kernel — no boolean evaluation, no
//! spatial partitioning — but it satisfies the kernel contract, which makes
//! the shading core testable end to end and usable by embedders that do not
//! bring their own kernel.

use std::f64::consts::{PI, TAU};
use std::sync::Arc;

use cgmath::{EuclideanSpace as _, InnerSpace as _, Point3, Vector3};

use crate::kernel::{
    HitRecord, Intersector, OneHit, Partition, Primitive, Ray, Region, RegionDef, UvCoord,
};
use crate::math::FreeCoordinate;
use crate::radiance::Radiance;

/// Default geometry distance tolerance, mm.
pub const DEFAULT_TOLERANCE: FreeCoordinate = 0.0005;

/// A sphere solid.
#[derive(Clone, Debug, PartialEq)]
pub struct Sphere {
    pub center: Point3<FreeCoordinate>,
    pub radius: FreeCoordinate,
}

impl Sphere {
    pub fn new(center: Point3<FreeCoordinate>, radius: FreeCoordinate) -> Self {
        Self { center, radius }
    }
}

impl Primitive for Sphere {
    fn type_name(&self) -> &'static str {
        "sphere"
    }

    fn intersect(&self, ray: &Ray) -> Option<(FreeCoordinate, FreeCoordinate)> {
        let oc = ray.origin - self.center;
        // direction is unit length, so a == 1
        let b = oc.dot(ray.direction);
        let c = oc.magnitude2() - self.radius * self.radius;
        let disc = b * b - c;
        if disc <= 0.0 {
            return None;
        }
        let root = disc.sqrt();
        Some((-b - root, -b + root))
    }

    fn normal(&self, ray: &Ray, dist: FreeCoordinate) -> Vector3<FreeCoordinate> {
        (ray.at(dist) - self.center).normalize()
    }

    fn uv(&self, ray: &Ray, dist: FreeCoordinate) -> UvCoord {
        let n = self.normal(ray, dist);
        // Longitude/latitude parameterization.
        let mut u = n.y.atan2(n.x) / TAU;
        if u < 0.0 {
            u += 1.0;
        }
        let v = n.z.clamp(-1.0, 1.0).acos() / PI;
        UvCoord {
            u,
            v: 1.0 - v,
            du: 0.0,
            dv: 0.0,
        }
    }

    fn center(&self) -> Point3<FreeCoordinate> {
        self.center
    }

    fn radius(&self) -> FreeCoordinate {
        self.radius
    }
}

/// An axis-aligned rectangular parallelepiped solid.
#[derive(Clone, Debug, PartialEq)]
pub struct Rpp {
    pub min: Point3<FreeCoordinate>,
    pub max: Point3<FreeCoordinate>,
}

impl Rpp {
    pub fn new(min: Point3<FreeCoordinate>, max: Point3<FreeCoordinate>) -> Self {
        Self { min, max }
    }
}

impl Primitive for Rpp {
    fn type_name(&self) -> &'static str {
        "rpp"
    }

    fn intersect(&self, ray: &Ray) -> Option<(FreeCoordinate, FreeCoordinate)> {
        let mut t_in = FreeCoordinate::NEG_INFINITY;
        let mut t_out = FreeCoordinate::INFINITY;
        for axis in 0..3 {
            let o = ray.origin[axis];
            let d = ray.direction[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if d.abs() < 1e-300 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let (mut t0, mut t1) = ((lo - o) / d, (hi - o) / d);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_in = t_in.max(t0);
            t_out = t_out.min(t1);
            if t_in > t_out {
                return None;
            }
        }
        if t_in.is_infinite() {
            // Ray parallel to every axis it spans; degenerate.
            return None;
        }
        Some((t_in, t_out))
    }

    fn normal(&self, ray: &Ray, dist: FreeCoordinate) -> Vector3<FreeCoordinate> {
        let p = ray.at(dist);
        // The face whose plane the point lies closest to wins.
        let mut best_axis = 0;
        let mut best_sign = -1.0;
        let mut best_gap = FreeCoordinate::INFINITY;
        for axis in 0..3 {
            let lo_gap = (p[axis] - self.min[axis]).abs();
            let hi_gap = (p[axis] - self.max[axis]).abs();
            if lo_gap < best_gap {
                best_gap = lo_gap;
                best_axis = axis;
                best_sign = -1.0;
            }
            if hi_gap < best_gap {
                best_gap = hi_gap;
                best_axis = axis;
                best_sign = 1.0;
            }
        }
        let mut n = Vector3::new(0.0, 0.0, 0.0);
        n[best_axis] = best_sign;
        n
    }

    fn uv(&self, ray: &Ray, dist: FreeCoordinate) -> UvCoord {
        let p = ray.at(dist);
        let n = self.normal(ray, dist);
        let axis = (0..3).find(|&a| n[a] != 0.0).unwrap_or(2);
        let (ua, va) = ((axis + 1) % 3, (axis + 2) % 3);
        let extent = |a: usize| (self.max[a] - self.min[a]).max(1e-30);
        UvCoord {
            u: ((p[ua] - self.min[ua]) / extent(ua)).clamp(0.0, 1.0),
            v: ((p[va] - self.min[va]) / extent(va)).clamp(0.0, 1.0),
            du: 0.0,
            dv: 0.0,
        }
    }

    fn center(&self) -> Point3<FreeCoordinate> {
        self.min.midpoint(self.max)
    }

    fn radius(&self) -> FreeCoordinate {
        (self.max - self.min).magnitude() * 0.5
    }
}

/// One solid instance bound to a region.
#[derive(Clone)]
struct SolidInstance<R: Radiance> {
    prim: Arc<dyn Primitive>,
    region: Arc<Region<R>>,
}

/// A region definition together with its solids, before material prep.
pub struct SceneRegion {
    pub def: RegionDef,
    pub solids: Vec<Arc<dyn Primitive>>,
}

/// Builder for a [`Scene`]: regions and their solids, pre-prep.
#[derive(Default)]
pub struct SceneBuilder {
    pub(crate) regions: Vec<SceneRegion>,
    tolerance: Option<FreeCoordinate>,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, def: RegionDef, solids: Vec<Arc<dyn Primitive>>) -> &mut Self {
        self.regions.push(SceneRegion { def, solids });
        self
    }

    pub fn tolerance(&mut self, tol: FreeCoordinate) -> &mut Self {
        self.tolerance = Some(tol);
        self
    }

    pub(crate) fn take_tolerance(&self) -> FreeCoordinate {
        self.tolerance.unwrap_or(DEFAULT_TOLERANCE)
    }
}

/// The prepped scene: an [`Intersector`] over a flat solid list with
/// union-only (no boolean) region evaluation.
pub struct Scene<R: Radiance> {
    solids: Vec<SolidInstance<R>>,
    regions: Vec<Arc<Region<R>>>,
    tolerance: FreeCoordinate,
}

impl<R: Radiance> Scene<R> {
    /// Assembles a scene from prepped regions and their solids. Regions
    /// flagged `no_draw` keep their entry in `regions()` but contribute no
    /// solids to intersection.
    pub fn assemble(
        prepped: Vec<(Arc<Region<R>>, Vec<Arc<dyn Primitive>>)>,
        tolerance: FreeCoordinate,
    ) -> Self {
        let mut solids = Vec::new();
        let mut regions = Vec::new();
        for (region, prims) in prepped {
            if !region.no_draw {
                for prim in prims {
                    solids.push(SolidInstance {
                        prim,
                        region: Arc::clone(&region),
                    });
                }
            }
            regions.push(region);
        }
        Self {
            solids,
            regions,
            tolerance,
        }
    }

    pub fn regions(&self) -> &[Arc<Region<R>>] {
        &self.regions
    }
}

impl<R: Radiance> Intersector<R> for Scene<R> {
    fn trace(&self, ray: &Ray, onehit: OneHit) -> Vec<Partition<R>> {
        let mut parts: Vec<Partition<R>> = Vec::new();
        for solid in &self.solids {
            let Some((t_in, t_out)) = solid.prim.intersect(ray) else {
                continue;
            };
            if t_out - t_in < self.tolerance {
                continue; // grazing
            }
            parts.push(Partition {
                inhit: HitRecord::at_dist(t_in),
                outhit: HitRecord::at_dist(t_out),
                inflip: false,
                outflip: false,
                in_solid: Arc::clone(&solid.prim),
                out_solid: Arc::clone(&solid.prim),
                region: Arc::clone(&solid.region),
            });
        }
        parts.sort_by(|a, b| a.inhit.dist.total_cmp(&b.inhit.dist));
        merge_same_region(&mut parts, self.tolerance);

        if onehit != 0 {
            let keep_air = onehit < 0;
            // |onehit| counts hit points; a whole partition provides two.
            let want_parts = (onehit.unsigned_abs() as usize + 1) / 2;
            let mut kept = Vec::new();
            let mut nonair = 0;
            for pp in parts {
                let is_air = pp.region.aircode != 0;
                // Spans entirely behind the ray start don't satisfy the
                // hit-point count.
                let out_front = pp.outhit.dist > self.tolerance;
                if is_air {
                    if keep_air {
                        kept.push(pp);
                    }
                    continue;
                }
                kept.push(pp);
                if out_front {
                    nonair += 1;
                    if nonair >= want_parts {
                        break;
                    }
                }
            }
            return kept;
        }
        parts
    }

    fn tolerance(&self) -> FreeCoordinate {
        self.tolerance
    }
}

/// Collapses overlapping spans belonging to the same region (union
/// semantics). Input must be sorted by entry distance.
fn merge_same_region<R: Radiance>(parts: &mut Vec<Partition<R>>, tol: FreeCoordinate) {
    let mut i = 0;
    while i + 1 < parts.len() {
        let overlapping = Arc::ptr_eq(&parts[i].region, &parts[i + 1].region)
            && parts[i + 1].inhit.dist <= parts[i].outhit.dist + tol;
        if overlapping {
            if parts[i + 1].outhit.dist > parts[i].outhit.dist {
                parts[i].outhit = parts[i + 1].outhit;
                parts[i].out_solid = Arc::clone(&parts[i + 1].out_solid);
                parts[i].outflip = parts[i + 1].outflip;
            }
            parts.remove(i + 1);
        } else {
            i += 1;
        }
    }
}

/// Computes the combined center and approximating radius of a set of
/// solids: a single solid reports its own; several report the midpoint of
/// the enclosing box and its smallest half-extent.
pub fn bounding_center_radius(
    solids: &[Arc<dyn Primitive>],
) -> Option<(Point3<FreeCoordinate>, FreeCoordinate)> {
    match solids {
        [] => None,
        [only] => Some((only.center(), only.radius())),
        many => {
            let mut min = Point3::new(
                FreeCoordinate::INFINITY,
                FreeCoordinate::INFINITY,
                FreeCoordinate::INFINITY,
            );
            let mut max = Point3::new(
                FreeCoordinate::NEG_INFINITY,
                FreeCoordinate::NEG_INFINITY,
                FreeCoordinate::NEG_INFINITY,
            );
            for s in many {
                let c = s.center();
                let r = s.radius();
                for axis in 0..3 {
                    min[axis] = min[axis].min(c[axis] - r);
                    max[axis] = max[axis].max(c[axis] + r);
                }
            }
            if !min.to_vec().magnitude2().is_finite() || !max.to_vec().magnitude2().is_finite() {
                return None;
            }
            let center = min.midpoint(max);
            let half = (max - min) * 0.5;
            Some((center, half.x.min(half.y).min(half.z)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Rgb;
    use pretty_assertions::assert_eq;

    fn plain_region(name: &str, aircode: i32) -> Arc<Region<Rgb>> {
        Arc::new(Region {
            name: name.into(),
            id: 0,
            aircode,
            los: 100.0,
            color: None,
            temperature: None,
            shader: None,
            transmit: Rgb::ZERO,
            no_draw: false,
        })
    }

    fn z_ray(x: FreeCoordinate, y: FreeCoordinate) -> Ray {
        Ray::new(Point3::new(x, y, 10.0), Vector3::new(0.0, 0.0, -1.0))
    }

    #[test]
    fn sphere_intersection_and_normal() {
        let s = Sphere::new(Point3::new(0.0, 0.0, 0.0), 1.0);
        let ray = z_ray(0.0, 0.0);
        let (t_in, t_out) = s.intersect(&ray).unwrap();
        assert_eq!((t_in, t_out), (9.0, 11.0));
        let n = s.normal(&ray, t_in);
        assert!((n - Vector3::new(0.0, 0.0, 1.0)).magnitude() < 1e-12);
        assert!(s.intersect(&z_ray(2.0, 0.0)).is_none());
    }

    #[test]
    fn rpp_intersection_normal_uv() {
        let b = Rpp::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
        let ray = z_ray(0.5, -0.5);
        let (t_in, t_out) = b.intersect(&ray).unwrap();
        assert_eq!((t_in, t_out), (9.0, 11.0));
        let n = b.normal(&ray, t_in);
        assert_eq!(n, Vector3::new(0.0, 0.0, 1.0));
        let uv = b.uv(&ray, t_in);
        assert!(uv.u >= 0.0 && uv.u <= 1.0 && uv.v >= 0.0 && uv.v <= 1.0);
    }

    #[test]
    fn scene_orders_partitions_front_to_back() {
        let near = plain_region("near", 0);
        let far = plain_region("far", 0);
        let scene = Scene::assemble(
            vec![
                (
                    Arc::clone(&far),
                    vec![Arc::new(Sphere::new(Point3::new(0.0, 0.0, -5.0), 1.0)) as _],
                ),
                (
                    Arc::clone(&near),
                    vec![Arc::new(Sphere::new(Point3::new(0.0, 0.0, 0.0), 1.0)) as _],
                ),
            ],
            DEFAULT_TOLERANCE,
        );
        let parts = scene.trace(&z_ray(0.0, 0.0), 0);
        assert_eq!(parts.len(), 2);
        assert!(Arc::ptr_eq(&parts[0].region, &near));
        assert!(Arc::ptr_eq(&parts[1].region, &far));
        assert!(parts[0].inhit.dist < parts[1].inhit.dist);
    }

    #[test]
    fn onehit_truncation_counts_nonair_only() {
        let air = plain_region("air", 1);
        let solid = plain_region("solid", 0);
        let behind = plain_region("behind", 0);
        let scene = Scene::assemble(
            vec![
                (
                    air,
                    vec![Arc::new(Sphere::new(Point3::new(0.0, 0.0, 5.0), 2.0)) as _],
                ),
                (
                    Arc::clone(&solid),
                    vec![Arc::new(Sphere::new(Point3::new(0.0, 0.0, 0.0), 1.0)) as _],
                ),
                (
                    behind,
                    vec![Arc::new(Sphere::new(Point3::new(0.0, 0.0, -5.0), 1.0)) as _],
                ),
            ],
            DEFAULT_TOLERANCE,
        );
        // Negative onehit keeps the air span; stops after the first solid.
        let parts = scene.trace(&z_ray(0.0, 0.0), -1);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].region.aircode, 1);
        assert!(Arc::ptr_eq(&parts[1].region, &solid));
        // Positive onehit discards air.
        let parts = scene.trace(&z_ray(0.0, 0.0), 1);
        assert_eq!(parts.len(), 1);
        assert!(Arc::ptr_eq(&parts[0].region, &solid));
        // Zero returns everything.
        assert_eq!(scene.trace(&z_ray(0.0, 0.0), 0).len(), 3);
    }

    #[test]
    fn same_region_spans_merge() {
        let region = plain_region("pair", 0);
        let scene = Scene::assemble(
            vec![(
                region,
                vec![
                    Arc::new(Sphere::new(Point3::new(0.0, 0.0, 0.0), 1.0)) as _,
                    Arc::new(Sphere::new(Point3::new(0.0, 0.0, -1.5), 1.0)) as _,
                ],
            )],
            DEFAULT_TOLERANCE,
        );
        let parts = scene.trace(&z_ray(0.0, 0.0), 0);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].inhit.dist, 9.0);
        assert_eq!(parts[0].outhit.dist, 12.5);
    }

    #[test]
    fn bounding_of_multiple_solids_uses_min_half_extent() {
        let solids: Vec<Arc<dyn Primitive>> = vec![
            Arc::new(Sphere::new(Point3::new(-2.0, 0.0, 0.0), 1.0)),
            Arc::new(Sphere::new(Point3::new(2.0, 0.0, 0.0), 1.0)),
        ];
        let (center, radius) = bounding_center_radius(&solids).unwrap();
        assert_eq!(center, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(radius, 1.0); // Y/Z half-extent, smaller than X's 3.0
    }
}
