// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The pixel shader: root hit handling for fully shaded rendering.
//!
//! [`colorview`] walks the partition list of a primary (or recursive) ray,
//! deals with the eye starting inside a solid, runs the shading dispatcher
//! on the chosen partition, and applies the haze and ambient-occlusion
//! post-filters.

use std::sync::Arc;

use cgmath::{InnerSpace as _, Point3, Vector3};

use crate::context::{RenderContext, ThreadContext};
use crate::kernel::{Application, Partition, Primitive, Ray, UvCoord};
use crate::math::{FreeCoordinate, Rgb};
use crate::radiance::Radiance;
use crate::shade::{viewshade, Shadework};

/// Thickness below which a re-entered sliver of the same refractive solid
/// is skipped, mm.
const GLASS_SLIVER: FreeCoordinate = 0.05;

/// Ambient occlusion never darkens below this factor.
const AO_FLOOR: f64 = 0.0125;

/// Shoots a ray and colors it: the partition list goes to [`colorview`],
/// a miss to the background handler. Returns whether the model was hit.
pub fn shoot_colorview<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
) -> bool {
    log::trace!("shooting {:?} at lvl {}", app.purpose, app.level);
    tctx.stats.shots += 1;
    let parts = ctx.scene.trace(&app.ray, app.onehit);
    if parts.is_empty() {
        tctx.stats.misses += 1;
        hit_nothing(ctx, app);
        false
    } else {
        tctx.stats.hits += 1;
        colorview(ctx, tctx, app, parts)
    }
}

/// No part of the model was hit; paint the background.
pub fn hit_nothing<R: Radiance>(ctx: &RenderContext<R>, app: &mut Application<R>) {
    app.hit = false;
    app.color = ctx.background.clone();
}

/// A stand-in surface for hits manufactured by the cutting plane: its
/// normal is the reversed plane normal everywhere.
#[derive(Debug)]
struct KutCap {
    normal: Vector3<FreeCoordinate>,
}

impl Primitive for KutCap {
    fn type_name(&self) -> &'static str {
        "kut plane"
    }
    fn intersect(&self, _: &Ray) -> Option<(FreeCoordinate, FreeCoordinate)> {
        None
    }
    fn normal(&self, _: &Ray, _: FreeCoordinate) -> Vector3<FreeCoordinate> {
        self.normal
    }
    fn uv(&self, _: &Ray, _: FreeCoordinate) -> UvCoord {
        UvCoord {
            u: 0.5,
            v: 0.5,
            du: 0.0,
            dv: 0.0,
        }
    }
    fn center(&self) -> Point3<FreeCoordinate> {
        Point3::new(0.0, 0.0, 0.0)
    }
    fn radius(&self) -> FreeCoordinate {
        0.0
    }
}

/// Manages the coloring of whatever it was we just hit. Recursive through
/// the reflection/refraction helper and the eye-inside push.
pub fn colorview<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    mut parts: Vec<Partition<R>>,
) -> bool {
    let mut index = 0;

    if app.internal_escape {
        // This ray is an escaping internal ray after refraction through
        // glass. Sometimes the new ray clips a sliver of the same glass
        // and gets confused; skip any sliver thinner than 0.05 mm.
        if let Some(prev_region) = &app.hit_region {
            if parts.len() > 1
                && Arc::ptr_eq(&parts[0].region, prev_region)
                && parts[0].outhit.dist - parts[0].inhit.dist < GLASS_SLIVER
            {
                index = 1;
            }
        }
    }

    while index < parts.len() && parts[index].outhit.dist < 0.0 {
        index += 1;
    }
    if index >= parts.len() {
        log::warn!("colorview: no hit out front?");
        return false;
    }

    if let Some(plane) = ctx.options.kut_plane {
        match kut_trim(app, &mut parts, &mut index, plane) {
            KutResult::Keep => {}
            KutResult::Miss => {
                hit_nothing(ctx, app);
                return false;
            }
        }
    }

    let pp = parts[index].clone();
    app.hit_region = Some(Arc::clone(&pp.region));

    log::trace!(
        "colorview: lvl={} coloring {}",
        app.level,
        pp.region.name
    );

    let out_dist;
    if pp.inhit.dist >= FreeCoordinate::INFINITY {
        log::warn!("colorview: entry beyond infinity");
        app.color = R::from_reflectance_rgb(&ctx.shared, Rgb::new(0.5, 0.0, 0.0));
        app.hit = true;
        app.dist = pp.inhit.dist;
        out_dist = pp.inhit.dist;
    } else if pp.inhit.dist < 0.0 && pp.region.aircode == 0 {
        // The eye is inside a solid.
        if pp.outhit.dist >= FreeCoordinate::INFINITY || app.level >= ctx.options.bounces {
            log::debug!(
                "colorview: eye inside {} (x={}, y={}, lvl={})",
                pp.region.name,
                app.x,
                app.y,
                app.level
            );
            app.color = R::constant(&ctx.shared, 0.18); // 18% grey
            app.hit = true;
            app.dist = pp.inhit.dist;
            out_dist = pp.inhit.dist;
        } else {
            // Push on to the exit point and trace on from there, darkening
            // the result as a visual cue that something is wrong.
            let f = pp.outhit.dist + ctx.scene.tolerance().max(1e-4);
            let mut sub = app.descend(
                Ray::new(app.ray.at(f), app.ray.direction),
                "pushed eye position",
            );
            shoot_colorview(ctx, tctx, &mut sub);
            app.color = sub.color.scaled(0.80);
            app.hit = true;
            app.dist = f + sub.dist;
            app.hit_region = sub.hit_region.clone();
            out_dist = app.dist;
        }
    } else {
        let mut sw = Shadework::new(ctx);
        // Individual shaders must handle reflection and refraction.
        viewshade(ctx, tctx, app, &pp, &mut sw);

        app.color = sw.color;
        app.hit = true;
        // Negative (and misleading) when the eye is inside an air solid.
        app.dist = pp.inhit.dist;
        out_dist = pp.inhit.dist;
    }

    // Haze: e^(-density * distance) toward the haze color.
    if ctx.options.airdensity > 0.0 {
        let f = (-out_dist * ctx.options.airdensity).exp() as f32;
        let haze = R::from_reflectance_rgb(&ctx.shared, ctx.options.haze);
        app.color.scale(f);
        app.color.add_assign(&haze.scaled(1.0 - f));
    }

    if ctx.options.amb_samples > 0 {
        ambient_occlusion(ctx, tctx, app, &pp);
    }

    true
}

enum KutResult {
    Keep,
    Miss,
}

/// Trims the partition list against the cutting plane, adjusting the entry
/// hit of a straddling partition onto the plane.
fn kut_trim<R: Radiance>(
    app: &Application<R>,
    parts: &mut [Partition<R>],
    index: &mut usize,
    plane: crate::context::KutPlane,
) -> KutResult {
    let norm_dist = plane.distance(app.ray.origin);
    let slant = -plane.normal.dot(app.ray.direction);
    if slant < -1e-10 {
        // Exit point: ignore everything before `dist`.
        let dist = norm_dist / slant;
        let mut i = *index;
        while i < parts.len() {
            if parts[i].outhit.dist >= dist && parts[i].inhit.dist < dist {
                parts[i].inhit.dist = dist;
                parts[i].inflip = false;
                parts[i].in_solid = Arc::new(KutCap {
                    normal: -plane.normal,
                });
                break;
            } else if parts[i].inhit.dist > dist {
                break;
            }
            i += 1;
        }
        if i >= parts.len() {
            return KutResult::Miss; // ignored everything
        }
        *index = i;
        KutResult::Keep
    } else if slant > 1e-10 {
        // Entry point: ignore everything after `dist`.
        let dist = norm_dist / slant;
        if parts[*index].inhit.dist > dist {
            return KutResult::Miss;
        }
        KutResult::Keep
    } else {
        // Ray parallel to the plane; a miss if on the inside.
        if norm_dist < 0.0 {
            KutResult::Miss
        } else {
            KutResult::Keep
        }
    }
}

/// Scales the ray's color by hemisphere-sampled ambient occlusion at the
/// first hit.
fn ambient_occlusion<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    pp: &Partition<R>,
) {
    use rand::Rng as _;

    let tol = ctx.scene.tolerance();
    let mut inormal = pp.in_solid.normal(&app.ray, pp.inhit.dist);
    if pp.inflip {
        inormal = -inormal;
    }

    // Move the origin normalward off the surface to reduce the chance of
    // re-hitting the departing surface.
    let offset = if ctx.options.amb_offset != 0.0 {
        ctx.options.amb_offset
    } else {
        tol
    };
    let origin = app.ray.at(pp.inhit.dist) + inormal * offset;

    // A coordinate frame at the hit point.
    let mut v_axis = inormal.cross(app.ray.direction);
    if v_axis.magnitude2() < tol * tol {
        // Ray and normal aligned; use an arbitrary cross vector.
        let arbitrary = Vector3::new(inormal.y, inormal.z, inormal.x);
        v_axis = inormal.cross(arbitrary);
    }
    let v_axis = v_axis.normalize();
    let u_axis = v_axis.cross(inormal);

    let samples = ctx.options.amb_samples;
    let mut hit_count = 0u32;
    for _ in 0..samples {
        // A random direction in the upper unit hemisphere.
        let scale = loop {
            let candidate: Vector3<f64> = if ctx.options.amb_slow {
                Vector3::new(
                    (tctx.slow_rng.gen::<f64>() - 0.5) * 2.0,
                    (tctx.slow_rng.gen::<f64>() - 0.5) * 2.0,
                    tctx.slow_rng.gen::<f64>(),
                )
            } else {
                Vector3::new(
                    tctx.rand_half() * 2.0,
                    tctx.rand_half() * 2.0,
                    tctx.rand_half() + 0.5,
                )
            };
            if candidate.magnitude2() <= 1.0 {
                break candidate;
            }
        };
        let dir = (u_axis * scale.x + v_axis * scale.y + inormal * scale.z).normalize();

        tctx.stats.shots += 1;
        // At least two complete partitions: the first may be behind the
        // ray start.
        let parts = ctx.scene.trace(&Ray::new(origin, dir), 4);
        if parts.is_empty() {
            tctx.stats.misses += 1;
            continue;
        }
        tctx.stats.hits += 1;
        if ao_occludes(ctx, &parts) {
            hit_count += 1;
        }
    }

    let occlusion =
        (1.0 - f64::from(hit_count) / f64::from(samples.max(1))).clamp(AO_FLOOR, 1.0);
    app.color.scale(occlusion as f32);
}

fn ao_occludes<R: Radiance>(ctx: &RenderContext<R>, parts: &[Partition<R>]) -> bool {
    // With no radius configured, any hit is occlusion.
    if ctx.options.amb_radius.abs() < ctx.scene.tolerance() {
        return true;
    }
    for pp in parts {
        if pp.inhit.dist > 0.0 {
            return pp.inhit.dist < ctx.options.amb_radius;
        }
    }
    false
}
