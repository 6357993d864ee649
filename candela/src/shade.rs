// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The shading dispatcher.
//!
//! [`viewshade`] mediates between the pixel shader and the material
//! shaders: it copies the partition's entry hit into a [`Shadework`]
//! workspace, computes whichever of the hit point / surface normal / UV /
//! light visibility inputs the region's shader declares it needs, and then
//! invokes the shader.
//!
//! Notes: the normals on all surfaces point OUT of the solid; the incoming
//! rays point IN.

use std::sync::Arc;

use bitflags::bitflags;
use cgmath::InnerSpace as _;

use crate::context::{RenderContext, ThreadContext};
use crate::kernel::{Application, HitRecord, Partition, UvCoord};
use crate::light::{self, Light};
use crate::math::Rgb;
use crate::radiance::Radiance;

bitflags! {
    /// The optional shading inputs a material shader may require.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ShadeInputs: u8 {
        const HIT = 1 << 0;
        const NORMAL = 1 << 1;
        const UV = 1 << 2;
        const LIGHT = 1 << 3;
    }
}

/// Per-shading-call workspace: the enriched hit, working colors,
/// transparency coefficients, and the per-light visibility arrays filled by
/// the penumbra sampler.
#[derive(Clone, Debug)]
pub struct Shadework<R: Radiance = Rgb> {
    pub hit: HitRecord,
    pub uv: UvCoord,
    /// Fraction of incident light transmitted through the surface, 0..=1.
    pub transmit: f64,
    /// Fraction reflected, 0..=1.
    pub reflect: f64,
    pub refrac_index: f64,
    pub extinction: f64,
    /// The caller wants only `transmit`; skip lighting and full shading.
    pub xmitonly: bool,
    /// Which optional inputs have been computed so far.
    pub inputs: ShadeInputs,
    /// Kelvin; positive values switch emission to black-body.
    pub temperature: f64,
    pub color: R,
    pub basecolor: R,
    /// Unit vector toward each light (valid where `visible` is set).
    pub tolight: Vec<cgmath::Vector3<f64>>,
    /// Path attenuation toward each light. This is the color returned by the
    /// *last* visible sample ray, not an average over the penumbra samples;
    /// `lightfract` carries the sample weighting.
    pub intensity: Vec<R>,
    /// Fraction of penumbra sample rays that reached each light.
    pub lightfract: Vec<f64>,
    /// The light handle where visible, `None` where fully obscured.
    pub visible: Vec<Option<Arc<Light<R>>>>,
}

impl<R: Radiance> Shadework<R> {
    /// A zeroed workspace sized for the context's light set, with working
    /// colors initialized to white.
    pub fn new(ctx: &RenderContext<R>) -> Self {
        let nlights = ctx.lights.len().min(light::MAX_LIGHTS);
        Self {
            hit: HitRecord::at_dist(0.0),
            uv: UvCoord::default(),
            transmit: 0.0,
            reflect: 0.0,
            refrac_index: crate::RI_AIR,
            extinction: 0.0,
            xmitonly: false,
            inputs: ShadeInputs::empty(),
            temperature: 0.0,
            color: R::constant(&ctx.shared, 1.0),
            basecolor: R::constant(&ctx.shared, 1.0),
            tolight: vec![cgmath::Vector3::new(0.0, 0.0, 0.0); nlights],
            intensity: vec![R::constant(&ctx.shared, 0.0); nlights],
            lightfract: vec![0.0; nlights],
            visible: vec![None; nlights],
        }
    }

    /// A workspace configured for a transmission-only query (shadow rays).
    pub fn for_transmission(ctx: &RenderContext<R>) -> Self {
        let mut sw = Self::new(ctx);
        sw.xmitonly = true;
        sw
    }
}

/// Calls the region's material shader, after making certain that all
/// shadework fields the shader wants have been provided.
///
/// Returns false only when the region has no shader attached (a prep
/// failure); the pixel then keeps whatever color was already set.
pub fn viewshade<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    pp: &Partition<R>,
    sw: &mut Shadework<R>,
) -> bool {
    let region = &pp.region;

    sw.hit = pp.inhit;

    let Some(shader) = &region.shader else {
        log::warn!("viewshade: region {:?} has no shader", region.name);
        return false;
    };

    // Default color is white (uncolored).
    if let Some(over) = region.color {
        sw.color = R::from_reflectance_rgb(&ctx.shared, over);
    }
    sw.basecolor = sw.color.clone();

    if sw.hit.dist < 0.0 {
        sw.hit.dist = 0.0; // Eye inside solid
    }
    app.cumlen += sw.hit.dist;

    let mut want = shader.inputs();
    if sw.xmitonly {
        want -= ShadeInputs::LIGHT;
    }

    // If light information is not needed, set the light array to "safe"
    // values and claim every light is visible, in case a shader iterates
    // them anyway.
    if !want.contains(ShadeInputs::LIGHT) {
        for (slot, lp) in sw.visible.iter_mut().zip(ctx.lights.iter()) {
            *slot = Some(Arc::clone(lp));
        }
    }

    if want.intersects(ShadeInputs::all()) {
        sw.hit.point = app.ray.at(sw.hit.dist);
        sw.inputs |= ShadeInputs::HIT;
    }
    if !sw.inputs.contains(want) && !shade_inputs(ctx, tctx, app, pp, sw, want) {
        // Diagnostic color already painted; skip the shader.
        return true;
    }

    log::trace!(
        "shading {:?} with {:?} shader (level {})",
        region.name,
        shader.name(),
        app.level
    );
    shader.render(ctx, tctx, app, pp, sw);
    true
}

/// Computes the fields of the shadework structure named in `want` that are
/// not yet present. Returns false if shading must stop (bad UV diagnostic).
fn shade_inputs<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    pp: &Partition<R>,
    sw: &mut Shadework<R>,
    mut want: ShadeInputs,
) -> bool {
    // These calculations all have HIT as a prerequisite.
    if want.intersects(ShadeInputs::NORMAL | ShadeInputs::LIGHT | ShadeInputs::UV) {
        want |= ShadeInputs::HIT;
    }

    let mut have = sw.inputs;
    want -= have;

    if want.contains(ShadeInputs::HIT) {
        sw.hit.point = app.ray.at(sw.hit.dist);
        have |= ShadeInputs::HIT;
    }

    if want.contains(ShadeInputs::NORMAL) {
        if pp.inhit.dist < 0.0 {
            // Eye inside solid, orthoview
            sw.hit.normal = -app.ray.direction;
        } else {
            let mut n = pp.in_solid.normal(&app.ray, sw.hit.dist);
            if pp.inflip {
                n = -n;
            }
            let f = app.ray.direction.dot(n);
            if f > 0.0 {
                log::warn!(
                    "shade_inputs({}) flip N xy={},{} dot={f:.6}",
                    pp.in_solid.type_name(),
                    app.x,
                    app.y
                );
            }
            sw.hit.normal = n;
        }
        have |= ShadeInputs::NORMAL;
    }

    if want.contains(ShadeInputs::UV) {
        if pp.inhit.dist < 0.0 {
            // Eye inside solid, orthoview
            sw.uv = UvCoord {
                u: 0.5,
                v: 0.5,
                du: 0.0,
                dv: 0.0,
            };
        } else {
            sw.uv = pp.in_solid.uv(&app.ray, sw.hit.dist);
        }
        if !(0.0..=1.0).contains(&sw.uv.u) || !(0.0..=1.0).contains(&sw.uv.v) {
            log::warn!(
                "shade_inputs: bad u,v={},{} seg={} xy={},{}. Making green.",
                sw.uv.u,
                sw.uv.v,
                pp.in_solid.type_name(),
                app.x,
                app.y
            );
            sw.color = R::from_reflectance_rgb(&ctx.shared, Rgb::new(0.0, 1.0, 0.0));
            sw.inputs = have;
            return false;
        }
        have |= ShadeInputs::UV;
    }

    if want.contains(ShadeInputs::LIGHT) {
        light::vis::light_obs(ctx, tctx, app, sw, have);
        have |= ShadeInputs::LIGHT;
    }

    sw.inputs = have;
    true
}
