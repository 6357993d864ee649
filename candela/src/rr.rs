// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Reflection and refraction recursion.
//!
//! Shaders that declare nonzero `reflect` or `transmit` coefficients
//! delegate here. Sub-rays run the full pixel shader; recursion depth is
//! bounded by `bounces` and the internal-reflection counter by `ireflect`.
//! Total internal reflection redirects the refracted contribution into the
//! reflected ray.

use std::sync::Arc;

use cgmath::InnerSpace as _;

use crate::context::{RenderContext, ThreadContext};
use crate::kernel::{Application, Partition, Ray};
use crate::math::FreeCoordinate;
use crate::radiance::Radiance;
use crate::shade::Shadework;
use crate::view;

/// Applies reflected and refracted contributions to `sw.color`.
pub fn rr_render<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    pp: &Partition<R>,
    sw: &mut Shadework<R>,
) {
    if sw.xmitonly {
        // Transmission queries carry their own continuation logic.
        return;
    }
    let reflect = sw.reflect.clamp(0.0, 1.0);
    let transmit = sw.transmit.clamp(0.0, 1.0);
    if reflect <= 0.0 && transmit <= 0.0 {
        return;
    }

    if app.level + 1 > ctx.options.bounces {
        log::debug!(
            "rr_render: lvl={} out of bounces, xy={},{}",
            app.level,
            app.x,
            app.y
        );
        sw.color.scale((1.0 - reflect - transmit).max(0.0) as f32);
        return;
    }

    let own = (1.0 - reflect - transmit).max(0.0);
    let mut color = sw.color.scaled(own as f32);
    let tol = ctx.scene.tolerance();
    let incident = app.ray.direction;
    let normal = sw.hit.normal;
    let mut extra_reflect = 0.0;

    // Refracted contribution, worked out first so that total internal
    // reflection can fold into the reflected ray below.
    if transmit > 0.0 {
        match refract_through(ctx, tctx, app, pp, sw) {
            Refraction::Escaped(sub_color) => {
                color.add_assign(&sub_color.scaled(transmit as f32));
            }
            Refraction::TotalInternal => extra_reflect = transmit,
            Refraction::Absorbed => {}
        }
    }

    let reflect = reflect + extra_reflect;
    if reflect > 0.0 {
        let refl_dir = (incident - normal * (2.0 * incident.dot(normal))).normalize();
        let mut sub = app.descend(
            Ray::new(sw.hit.point + refl_dir * tol, refl_dir),
            "reflected ray",
        );
        sub.color = R::constant(&ctx.shared, 0.0);
        view::shoot_colorview(ctx, tctx, &mut sub);
        color.add_assign(&sub.color.scaled(reflect as f32));
    }

    sw.color = color;
}

enum Refraction<R> {
    /// The refracted ray escaped the solid; its shaded color.
    Escaped(R),
    /// Entry-interface total internal reflection.
    TotalInternal,
    /// Lost inside the solid (internal-reflection budget exhausted or
    /// degenerate geometry).
    Absorbed,
}

/// Bends the ray into the solid at the entry interface, marches it to the
/// region's far side (bouncing off it while total internal reflection
/// holds), bends it out, and shades the escaping ray.
fn refract_through<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    pp: &Partition<R>,
    sw: &mut Shadework<R>,
) -> Refraction<R> {
    let tol = ctx.scene.tolerance();
    let outer_ri = app.refrac_index;
    let inner_ri = if sw.refrac_index > 0.0 {
        sw.refrac_index
    } else {
        crate::RI_AIR
    };

    // Entry interface.
    let Some(inside_dir) = snell(app.ray.direction, sw.hit.normal, outer_ri / inner_ri) else {
        return Refraction::TotalInternal;
    };

    // March to the far side of this region, reflecting internally while
    // the exit angle is past critical.
    let mut point = sw.hit.point;
    let mut dir = inside_dir;
    let mut bounces_left = ctx.options.ireflect;
    loop {
        let probe = Ray::new(point + dir * tol, dir);
        let exit = ctx
            .scene
            .trace(&probe, 0)
            .into_iter()
            .find(|cand| Arc::ptr_eq(&cand.region, &pp.region) && cand.outhit.dist > tol);
        let Some(exit) = exit else {
            log::debug!(
                "rr: refracted ray lost its solid at xy={},{} lvl={}",
                app.x,
                app.y,
                app.level
            );
            return Refraction::Absorbed;
        };
        let exit_dist = exit.outhit.dist;
        let exit_point = probe.at(exit_dist);
        let mut out_normal = exit.out_solid.normal(&probe, exit_dist);
        if exit.outflip {
            out_normal = -out_normal;
        }
        // For the exiting ray the interface normal faces back inward.
        if let Some(out_dir) = snell(dir, -out_normal, inner_ri / outer_ri) {
            // Escaped: shade the world beyond the exit point.
            let mut sub = app.descend(
                Ray::new(exit_point + out_dir * tol, out_dir),
                "escaping internal ray",
            );
            sub.color = R::constant(&ctx.shared, 0.0);
            sub.refrac_index = outer_ri;
            sub.internal_escape = true;
            sub.hit_region = Some(Arc::clone(&pp.region));
            view::shoot_colorview(ctx, tctx, &mut sub);
            return Refraction::Escaped(sub.color);
        }

        if bounces_left == 0 {
            log::debug!(
                "rr: excessive internal reflection, xy={},{} lvl={}",
                app.x,
                app.y,
                app.level
            );
            return Refraction::Absorbed;
        }
        bounces_left -= 1;
        app.ireflect += 1;
        // Internal bounce off the far wall.
        dir = (dir - out_normal * (2.0 * dir.dot(out_normal))).normalize();
        point = exit_point;
    }
}

/// Snell's law: the direction of `incident` after crossing an interface
/// with unit normal `normal` (facing against the incident ray) and index
/// ratio `eta = n_from / n_to`. `None` on total internal reflection.
fn snell(
    incident: cgmath::Vector3<FreeCoordinate>,
    normal: cgmath::Vector3<FreeCoordinate>,
    eta: FreeCoordinate,
) -> Option<cgmath::Vector3<FreeCoordinate>> {
    let cos_i = -incident.dot(normal);
    let sin2_t = eta * eta * (1.0 - cos_i * cos_i);
    if sin2_t > 1.0 {
        return None;
    }
    let cos_t = (1.0 - sin2_t).sqrt();
    Some((incident * eta + normal * (eta * cos_i - cos_t)).normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector3;

    #[test]
    fn snell_straight_through_is_unbent() {
        let d = Vector3::new(0.0, 0.0, -1.0);
        let n = Vector3::new(0.0, 0.0, 1.0);
        let out = snell(d, n, 1.0 / 1.65).unwrap();
        assert!((out - d).magnitude() < 1e-12);
    }

    #[test]
    fn snell_bends_toward_normal_entering_denser_medium() {
        let d = Vector3::new(1.0, 0.0, -1.0).normalize();
        let n = Vector3::new(0.0, 0.0, 1.0);
        let out = snell(d, n, 1.0 / 1.65).unwrap();
        // sin(theta_t) = sin(45°)/1.65
        let expected_sin = (45.0f64).to_radians().sin() / 1.65;
        assert!((out.x - expected_sin).abs() < 1e-12);
        assert!(out.z < 0.0);
    }

    #[test]
    fn snell_total_internal_reflection_past_critical_angle() {
        // Leaving glass at a grazing angle.
        let d = Vector3::new(1.0, 0.0, -0.2).normalize();
        let n = Vector3::new(0.0, 0.0, 1.0);
        assert!(snell(d, n, 1.65).is_none());
    }
}
