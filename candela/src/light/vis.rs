// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Light visibility: shadow and transmission rays.
//!
//! [`light_obs`] determines, for every light in the scene, how visible it
//! is from a surface point, sampling extended lights with multiple rays
//! across their presented disk for penumbras. Each sample ray runs
//! [`light_hit`], which walks the blocking partitions, accumulating
//! transmission through transparent and air media, and recursing past
//! filter glass (without refraction — refracting would miss the light).

use std::f64::consts::TAU;
use std::sync::Arc;

use cgmath::{InnerSpace as _, Vector3};

use crate::context::{RenderContext, ThreadContext};
use crate::kernel::{Application, Partition, Ray};
use crate::light::{Light, MAX_LIGHTS};
use crate::math::{ortho_frame, FreeCoordinate};
use crate::radiance::Radiance;
use crate::shade::{viewshade, ShadeInputs, Shadework};

/// Below this remaining energy, a shadow ray is considered fully
/// attenuated.
const ATTENUATION_FLOOR: f32 = 0.01;

/// Per-light sampling state shared between [`light_obs`] and its inner
/// visibility rays.
struct ObsFrame<'a, R: Radiance> {
    lp: &'a Arc<Light<R>>,
    /// Unit vector from the hit point toward the light center.
    to_light_center: Vector3<FreeCoordinate>,
    /// Basis of the light's cross-plane (the presented disk).
    light_x: Vector3<FreeCoordinate>,
    light_y: Vector3<FreeCoordinate>,
}

/// Determines the visibility of each light source from the shadework's hit
/// point, filling `tolight`, `intensity`, `visible`, and `lightfract`.
///
/// The `intensity` entries carry path attenuation only — the light's own
/// emission color is not folded in.
pub fn light_obs<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &Application<R>,
    sw: &mut Shadework<R>,
    have: ShadeInputs,
) {
    log::trace!("computing light obscuration: start");

    for (i, lp) in ctx.lights.iter().take(MAX_LIGHTS).enumerate() {
        sw.lightfract[i] = 0.0;
        sw.visible[i] = None;

        let tot_vis_rays = if lp.infinite || lp.shadows == 0 {
            1
        } else {
            lp.shadows.max(1)
        };

        // A coordinate system about the light center with the
        // hit-point-to-light ray as its axis.
        let to_center = lp.pos - sw.hit.point;
        let to_light_center = if to_center.magnitude2() > 1e-20 {
            to_center.normalize()
        } else {
            lp.vec
        };
        let (light_x, light_y) = ortho_frame(to_light_center);
        let frame = ObsFrame {
            lp,
            to_light_center,
            light_x,
            light_y,
        };

        let mut visibility = 0;
        let mut vis_ray = 0;
        while vis_ray < tot_vis_rays {
            match light_vis(ctx, tctx, app, sw, i, &frame, have) {
                1 => {
                    // Remember the last ray that got through.
                    sw.tolight[i] = frame.to_light_center;
                    visibility += 1;
                }
                -1 => {
                    // Fill light: no shadow testing for this source.
                    sw.tolight[i] = frame.to_light_center;
                    visibility = tot_vis_rays;
                    break;
                }
                -2 => {
                    // Back-facing an opaque surface: give up on this light.
                    visibility = 0;
                    break;
                }
                _ => {}
            }
            vis_ray += 1;
        }

        if visibility > 0 {
            sw.visible[i] = Some(Arc::clone(lp));
            sw.lightfract[i] = f64::from(visibility) / f64::from(tot_vis_rays);
        }
    }

    log::trace!("computing light obscuration: end");
}

/// Computes one light visibility ray from the hit point to the light.
///
/// Returns +1 visible, 0 blocked, −1 visible with no shadow test required
/// (fill light), −2 back-face/opaque no-go.
fn light_vis<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &Application<R>,
    sw: &mut Shadework<R>,
    index: usize,
    frame: &ObsFrame<'_, R>,
    have: ShadeInputs,
) -> i32 {
    let lp = frame.lp;

    // An opaque surface facing away from the light cannot be lit by it.
    if have.contains(ShadeInputs::NORMAL)
        && sw.transmit <= 0.0
        && sw.hit.normal.dot(frame.to_light_center) <= 0.0
    {
        log::trace!("norm backfacing, opaque surf: {}", lp.name);
        return -2;
    }

    let shoot_dir = if lp.infinite {
        // Infinite lights are point sources, no fuzzy penumbra.
        lp.vec
    } else {
        // Aim at a point picked uniformly at random on the light's
        // presented disk.
        let radius = lp.radius * (tctx.rand_half() * 2.0).abs();
        let angle = TAU * (tctx.rand_half() + 0.5);
        let x = radius * angle.cos();
        let y = radius * angle.sin();
        let shoot_pt = lp.pos + frame.light_x * x + frame.light_y * y;
        let dir = shoot_pt - sw.hit.point;
        if dir.magnitude2() < 1e-20 {
            return 0;
        }
        dir.normalize()
    };

    // See if the ray from the hit point to the light lies within the light
    // beam. (Always true for infinite lights.)
    if -shoot_dir.dot(lp.aim) < lp.cos_angle {
        log::trace!("point outside beam, obscured: {}", lp.name);
        return 0;
    }

    if lp.shadows == 0 {
        // "Fill light" in beam; don't care about shadows.
        sw.intensity[index] = R::constant(&ctx.shared, 1.0);
        return -1;
    }

    // Fire a ray at the light source to check for shadowing, advancing the
    // start point slightly off the surface.
    let tol = ctx.scene.tolerance();
    let mut sub = Application::new(
        Ray::new(sw.hit.point + shoot_dir * tol, shoot_dir),
        &ctx.shared,
    );
    sub.x = app.x;
    sub.y = app.y;
    sub.level = 0;
    sub.purpose = "light visibility";
    sub.rbeam = app.rbeam + sw.hit.dist * app.diverge;
    sub.diverge = app.diverge;
    // Will need entry and exit points for filter glass, and must continue
    // through air.
    sub.onehit = -2;
    sub.color = R::constant(&ctx.shared, 1.0); // visible intensity so far

    if shoot_light(ctx, tctx, &mut sub, lp) {
        log::trace!("light visible: {}", lp.name);
        sw.intensity[index] = sub.color;
        return 1;
    }
    log::trace!("light obscured: {}", lp.name);
    0
}

/// Shoots a shadow ray and dispatches its partitions to [`light_hit`] (or
/// the miss handler). Returns whether the light is visible along the ray.
pub(crate) fn shoot_light<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    lp: &Arc<Light<R>>,
) -> bool {
    tctx.stats.shots += 1;
    let parts = ctx.scene.trace(&app.ray, app.onehit);
    if parts.is_empty() {
        tctx.stats.misses += 1;
        light_miss(ctx, app, lp)
    } else {
        tctx.stats.hits += 1;
        light_hit(ctx, tctx, app, &parts, lp)
    }
}

/// A light visibility test ray hit something; determine what that means.
///
/// On entry `app.color` holds the fraction of the light propagated so far;
/// on exit it holds the fraction that can be seen, with RGB transmission
/// kept separate to allow simplistic colored glass.
fn light_hit<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    parts: &[Partition<R>],
    lp: &Arc<Light<R>>,
) -> bool {
    let tol = ctx.scene.tolerance();
    let mut filter_color = R::constant(&ctx.shared, 1.0);
    let mut air_sols_seen = 0;

    // Since the visibility ray started on the surface of a solid, that
    // solid is likely the first partition, with an out distance of roughly
    // zero. Skip partitions that include the start point; accumulate the
    // transmission of any air along the way.
    let mut blocker: Option<&Partition<R>> = None;
    for pp in parts {
        if pp.region.aircode != 0 {
            air_sols_seen += 1;
            let mut sw = Shadework::for_transmission(ctx);
            viewshade(ctx, tctx, app, pp, &mut sw);
            filter_color.scale(sw.transmit as f32);
            continue;
        }
        if pp.inhit.dist >= tol || pp.outhit.dist >= tol * 10.0 {
            blocker = Some(pp);
            break;
        }
    }

    let Some(pp) = blocker else {
        // Off the end of the partition list with no blocker found.
        if lp.invisible || lp.infinite {
            app.color = filter_color;
            log::trace!("light vis: unobstructed invisible/infinite light {}", lp.name);
            return true;
        }
        if air_sols_seen > 0 {
            // Happens with every light visibility ray through air.
            app.color = filter_color;
            log::trace!("light vis: off end of partition list, air was seen");
            return true;
        }
        let first = &parts[0];
        if first.inhit.dist <= tol {
            // The ray has probably produced an out-hit from the current
            // solid which looks valid but is in fact the start point.
            // Press on past it.
            let mut sub = app.descend(
                Ray::new(app.ray.at(first.outhit.dist), app.ray.direction),
                "pressed on past start point",
            );
            let result = shoot_light(ctx, tctx, &mut sub, lp);
            app.color = sub.color;
            app.cumlen = sub.cumlen;
            return result;
        }
        log::warn!(
            "light_hit: ERROR, nothing hit, sxy={},{}, dtol={tol:e}",
            app.x,
            app.y
        );
        app.color = R::constant(&ctx.shared, 0.0);
        return false;
    };

    let regp = &pp.region;

    // Did we hit the light source itself?
    if lp
        .region_arc()
        .map_or(false, |light_region| Arc::ptr_eq(&light_region, regp))
    {
        app.color = filter_color;
        log::trace!("light vis: hit light {}", lp.name);
        return true;
    }

    // Or something farther away than a finite invisible light?
    if lp.invisible && !lp.infinite {
        let tolight = lp.pos - app.ray.origin;
        if pp.inhit.dist >= tolight.magnitude() {
            app.color = filter_color;
            log::trace!("light vis: hit behind invisible light ==> hit light");
            return true;
        }
    }

    // An entirely opaque object makes this light invisible. Procedural
    // shaders own their hit points and may pass light even with zero
    // region transmission.
    let procedural = regp
        .shader
        .as_ref()
        .map_or(false, |s| s.flags().contains(crate::shaders::ShaderFlags::PROC));
    if pp.outhit.dist >= FreeCoordinate::INFINITY || (!regp.is_transparent() && !procedural) {
        app.color = R::constant(&ctx.shared, 0.0);
        log::trace!("light vis: hit opaque object {}", regp.name);
        return false;
    }

    // Will any further contribution matter?
    if filter_color.sum() < ATTENUATION_FLOOR {
        app.color = R::constant(&ctx.shared, 0.0);
        log::trace!("light vis: fully attenuated before shading");
        return false;
    }

    // Determine the transparency of this object; only the opacity is
    // needed, not full shading.
    let mut sw = Shadework::for_transmission(ctx);
    viewshade(ctx, tctx, app, pp, &mut sw);
    filter_color.scale(sw.transmit as f32);
    if filter_color.sum() < ATTENUATION_FLOOR {
        app.color = R::constant(&ctx.shared, 0.0);
        log::trace!("light vis: fully attenuated after shading");
        return false;
    }

    // Push on past the exit point and trace on from there. Don't even
    // think of trying to refract, or we will miss the light!
    let mut sub = app.descend(
        Ray::new(app.ray.at(pp.outhit.dist + tol), app.ray.direction),
        "light transmission after filtering",
    );
    let visible = shoot_light(ctx, tctx, &mut sub, lp);
    app.color = sub.color.filtered(&filter_color);
    visible
}

/// The shadow ray hit nothing at all. If there is no explicit light solid
/// in the model we will always "miss" the light, so that means visible.
fn light_miss<R: Radiance>(
    ctx: &RenderContext<R>,
    app: &mut Application<R>,
    lp: &Arc<Light<R>>,
) -> bool {
    if lp.invisible || lp.infinite {
        app.color = R::constant(&ctx.shared, 1.0);
        return true;
    }

    log::warn!(
        "light ray missed non-infinite, visible light source on pixel: {} {}",
        app.x,
        app.y
    );
    // Missed the light, either via blockage or dither. Return black.
    app.color = R::constant(&ctx.shared, 0.0);
    false
}
