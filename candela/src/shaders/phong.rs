// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The Phong shader family: `plastic`, `mirror`, and `glass` are one shader
//! with different default parameters.
//!
//! The energy reflected toward the observer is an ambient term plus, per
//! visible light, a diffuse term proportional to the cosine of the angle of
//! incidence and a specular term proportional to that cosine's reflection
//! raised to the `shine` power. Reflection and refraction, when the
//! coefficients call for them, are delegated to the recursion helper.

use cgmath::InnerSpace as _;

use crate::context::{RenderContext, ThreadContext};
use crate::kernel::{Application, Partition, RegionDef};
use crate::math::ipow;
use crate::radiance::Radiance;
use crate::rr;
use crate::shade::Shadework;
use crate::shaders::{ParamSet, SetupCtx, SetupError, SetupOutcome, Shader};

/// Prepped Phong parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct PhongData {
    pub name: &'static str,
    pub shine: i32,
    pub wgt_specular: f64,
    pub wgt_diffuse: f64,
    pub transmit: f64,
    pub reflect: f64,
    pub refrac_index: f64,
}

pub fn plastic_setup<R: Radiance>(
    def: &RegionDef,
    params: &ParamSet,
    ctx: &mut SetupCtx<'_, R>,
) -> Result<SetupOutcome<R>, SetupError> {
    let defaults = PhongData {
        name: "plastic",
        shine: 10,
        wgt_specular: 0.7,
        wgt_diffuse: 0.3,
        transmit: 0.0,
        reflect: 0.0,
        refrac_index: crate::RI_AIR,
    };
    finish_setup(defaults, def, params, ctx)
}

pub fn mirror_setup<R: Radiance>(
    def: &RegionDef,
    params: &ParamSet,
    ctx: &mut SetupCtx<'_, R>,
) -> Result<SetupOutcome<R>, SetupError> {
    let defaults = PhongData {
        name: "mirror",
        shine: 4,
        wgt_specular: 0.6,
        wgt_diffuse: 0.4,
        transmit: 0.0,
        reflect: 0.75,
        refrac_index: 1.65,
    };
    finish_setup(defaults, def, params, ctx)
}

pub fn glass_setup<R: Radiance>(
    def: &RegionDef,
    params: &ParamSet,
    ctx: &mut SetupCtx<'_, R>,
) -> Result<SetupOutcome<R>, SetupError> {
    let defaults = PhongData {
        name: "glass",
        shine: 4,
        wgt_specular: 0.7,
        wgt_diffuse: 0.3,
        transmit: 0.6,
        reflect: 0.3,
        // leaving 0.1 for diffuse/specular
        refrac_index: 1.65,
    };
    finish_setup(defaults, def, params, ctx)
}

fn finish_setup<R: Radiance>(
    mut data: PhongData,
    def: &RegionDef,
    params: &ParamSet,
    ctx: &mut SetupCtx<'_, R>,
) -> Result<SetupOutcome<R>, SetupError> {
    for (key, value) in params.pairs() {
        match key {
            "shine" | "sh" => data.shine = value.as_i32()?,
            "specular" | "sp" => data.wgt_specular = value.as_f64()?,
            "diffuse" | "di" => data.wgt_diffuse = value.as_f64()?,
            "transmit" | "tr" => data.transmit = value.as_f64()?,
            "reflect" | "re" => data.reflect = value.as_f64()?,
            "ri" => data.refrac_index = value.as_f64()?,
            other => return Err(params.unknown(data.name, other).into()),
        }
    }

    // Publish base_color * transmit so the shadow path can tell whether
    // this region passes any light at all.
    let base = def.color.unwrap_or(crate::math::Rgb::ONE);
    ctx.reg_transmit = base * data.transmit as f32;

    Ok(SetupOutcome::Keep(Shader::Phong(data)))
}

pub fn phong_render<R: Radiance>(
    ps: &PhongData,
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    pp: &Partition<R>,
    sw: &mut Shadework<R>,
) {
    sw.transmit = ps.transmit;
    sw.reflect = ps.reflect;
    sw.refrac_index = ps.refrac_index;

    if sw.xmitonly {
        // Shadow/transmission query: the coefficients are the whole answer.
        return;
    }

    let to_eye = -app.ray.direction;
    let normal = sw.hit.normal;
    let matcolor = sw.basecolor.clone();

    // Diffuse reflectance from the "ambient" light source (at the eye).
    let mut d_a = 0.0;
    let cos_amb = normal.dot(to_eye);
    if cos_amb > 0.0 {
        let cos_amb = if cos_amb > 1.00001 {
            log::warn!(
                "cosAmb={cos_amb} (x{},y{},lvl{})",
                app.x,
                app.y,
                app.level
            );
            1.0
        } else {
            cos_amb
        };
        d_a = cos_amb * ctx.options.ambient;
    }
    sw.color = matcolor.scaled(d_a as f32);

    // Consider effects of each light source.
    for i in 0..sw.visible.len() {
        let Some(lp) = sw.visible[i].clone() else {
            continue;
        };
        // Path attenuation toward the light, weighted by the fraction of
        // penumbra samples that got through.
        let light_intensity = lp
            .color
            .filtered(&sw.intensity[i])
            .scaled(sw.lightfract[i] as f32);

        // Diffuse reflectance from this light source.
        let mut cos_i = normal.dot(sw.tolight[i]);
        if cos_i > 0.0 {
            if cos_i > 1.0 {
                if cos_i > 1.00001 {
                    log::warn!("cosI={cos_i} (x{},y{},lvl{})", app.x, app.y, app.level);
                }
                cos_i = 1.0;
            }
            let rd = cos_i * lp.fraction() * ps.wgt_diffuse;
            let mut cprod = matcolor.filtered(&light_intensity);
            cprod.scale(rd as f32);
            sw.color.add_assign(&cprod);
        }

        // Specular: reflected ray = 2 cos(i) N - tolight;
        // cos(s) = reflected . to_eye.
        cos_i *= 2.0;
        let reflected = normal * cos_i - sw.tolight[i];
        let mut cos_s = reflected.dot(to_eye);
        if cos_s > 0.0 {
            if cos_s > 1.0 {
                if cos_s > 1.00001 {
                    log::warn!("cosS={cos_s} (x{},y{},lvl{})", app.x, app.y, app.level);
                }
                cos_s = 1.0;
            }
            let rs = ps.wgt_specular * lp.fraction() * ipow(cos_s, ps.shine);
            sw.color
                .add_assign(&light_intensity.scaled(rs as f32));
        }
    }

    if sw.reflect > 0.0 || sw.transmit > 0.0 {
        rr::rr_render(ctx, tctx, app, pp, sw);
    }
}
