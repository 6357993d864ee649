// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Volumetric noise clouds.
//!
//! `scloud` marches the ray through its (air-coded) region and accumulates
//! extinction from a turbulence field, making a 3-D "solid" cloud.
//! `tsplat` is the cheap cousin: one fbm evaluation at the surface hit
//! picks a transparency for the spot.

use cgmath::{InnerSpace as _, Matrix4, SquareMatrix as _, Transform as _};

use crate::context::{RenderContext, ThreadContext};
use crate::kernel::{Application, Partition, RegionDef};
use crate::light;
use crate::math::FreeCoordinate;
use crate::radiance::Radiance;
use crate::rr;
use crate::shade::{ShadeInputs, Shadework};
use crate::shaders::{noise, ParamSet, SetupCtx, SetupError, SetupOutcome, Shader};

/// Prepped cloud parameters. `xform` maps model space into noise space.
#[derive(Clone, Debug)]
pub struct CloudData {
    pub lacunarity: f64,
    pub h_val: f64,
    pub octaves: f64,
    pub scale: f64,
    pub vscale: [f64; 3],
    pub delta: [f64; 3],
    /// Maximum density per millimeter of path length.
    pub max_d_p_mm: f64,
    pub xform: Matrix4<FreeCoordinate>,
}

impl Default for CloudData {
    fn default() -> Self {
        Self {
            lacunarity: 2.175_397_4,
            h_val: 1.0,
            octaves: 4.0,
            scale: 1.0,
            vscale: [1.0, 1.0, 1.0],
            delta: [1000.0, 1200.0, 2100.0],
            max_d_p_mm: 0.01,
            xform: Matrix4::identity(),
        }
    }
}

pub fn scloud_setup<R: Radiance>(
    def: &RegionDef,
    params: &ParamSet,
    ctx: &mut SetupCtx<'_, R>,
) -> Result<SetupOutcome<R>, SetupError> {
    Ok(SetupOutcome::Keep(Shader::Scloud(cloud_setup(
        "scloud", def, params, ctx,
    )?)))
}

pub fn tsplat_setup<R: Radiance>(
    def: &RegionDef,
    params: &ParamSet,
    ctx: &mut SetupCtx<'_, R>,
) -> Result<SetupOutcome<R>, SetupError> {
    Ok(SetupOutcome::Keep(Shader::Tsplat(cloud_setup(
        "tsplat", def, params, ctx,
    )?)))
}

fn cloud_setup<R: Radiance>(
    shader: &'static str,
    def: &RegionDef,
    params: &ParamSet,
    ctx: &mut SetupCtx<'_, R>,
) -> Result<CloudData, SetupError> {
    if def.aircode == 0 {
        return Err(SetupError::NotAir {
            shader,
            region: def.name.clone(),
        });
    }

    let mut data = CloudData::default();
    for (key, value) in params.pairs() {
        match key {
            "lacunarity" | "l" => data.lacunarity = value.as_f64()?,
            "H" => data.h_val = value.as_f64()?,
            "octaves" | "o" => data.octaves = value.as_f64()?,
            "scale" | "s" => data.scale = value.as_f64()?,
            "vscale" | "vs" => data.vscale = value.as_vec3()?,
            "delta" | "d" => data.delta = value.as_vec3()?,
            "m" => data.max_d_p_mm = value.as_f64()?,
            other => return Err(params.unknown(shader, other).into()),
        }
    }

    // Map points from model space to region space, then into noise space
    // via the configured scaling and translation.
    let model_to_region = ctx
        .to_model
        .invert()
        .unwrap_or_else(Matrix4::identity);
    let scaling = if data.scale != 1.0 {
        Matrix4::from_scale(1.0 / data.scale)
    } else {
        Matrix4::from_nonuniform_scale(
            1.0 / data.vscale[0],
            1.0 / data.vscale[1],
            1.0 / data.vscale[2],
        )
    };
    let translate =
        Matrix4::from_translation(cgmath::Vector3::new(data.delta[0], data.delta[1], data.delta[2]));
    data.xform = translate * scaling * model_to_region;

    Ok(data)
}

/// Sort of a surface-spot transparency shader: picks transparency from the
/// noise value at the hit point.
pub fn tsplat_render<R: Radiance>(
    data: &CloudData,
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    pp: &Partition<R>,
    sw: &mut Shadework<R>,
) {
    let in_pt = data.xform.transform_point(sw.hit.point);
    let val = noise::fbm(in_pt, data.h_val, data.lacunarity, data.octaves);
    sw.transmit = 1.0 - val.clamp(0.0, 1.0);

    if sw.reflect > 0.0 || sw.transmit > 0.0 {
        rr::rr_render(ctx, tctx, app, pp, sw);
    }
}

pub fn scloud_render<R: Radiance>(
    data: &CloudData,
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    pp: &Partition<R>,
    sw: &mut Shadework<R>,
) {
    // Ray/solid span endpoints, in noise space.
    let in_pt = data.xform.transform_point(app.ray.at(pp.inhit.dist));
    let out_pt = data.xform.transform_point(app.ray.at(pp.outhit.dist));

    let v_cloud = out_pt - in_pt;
    let thickness = v_cloud.magnitude();
    if thickness <= 0.0 {
        sw.transmit = 1.0;
        return;
    }
    let v_cloud = v_cloud / thickness;

    // The noise field has a maximum frequency of about one cycle per
    // integer step, raised by the lacunarity per octave; sampling at 4x the
    // top octave's frequency resolves it.
    let steps = (data.lacunarity.powf(data.octaves - 1.0) * 4.0).ceil().max(1.0) as usize;
    let step_delta = thickness / steps as f64;
    let model_step = (pp.outhit.dist - pp.inhit.dist) / steps as f64;

    log::trace!("scloud steps={steps} delta={step_delta} thickness={thickness}");

    let mut trans = 1.0f64;
    for i in 0..steps {
        let pt = in_pt + v_cloud * (i as f64 * step_delta);
        let val = noise::turb(pt, data.h_val, data.lacunarity, data.octaves);
        let val = ((val - 0.5).clamp(0.0, 1.0)) * 2.0;
        trans *= (-val * data.max_d_p_mm * model_step).exp();
    }

    // scloud is basically a white object with partial transparency.
    sw.transmit = trans;
    if sw.xmitonly {
        return;
    }

    // At the point of entry, check light visibility for light color and
    // cloud shadowing. Don't use an interior point, or the visibility test
    // would see an attenuated version of its own light source.
    sw.hit.dist = pp.inhit.dist;
    sw.hit.point = app.ray.at(sw.hit.dist);
    sw.hit.normal = -app.ray.direction;
    sw.inputs |= ShadeInputs::HIT | ShadeInputs::NORMAL;
    let have = sw.inputs;
    light::vis::light_obs(ctx, tctx, app, sw, have);

    let mut incident = R::constant(&ctx.shared, 0.0);
    for i in 0..sw.visible.len() {
        let Some(lp) = &sw.visible[i] else { continue };
        incident.add_assign(&sw.intensity[i].filtered(&lp.color));
    }
    sw.color.mul_assign(&incident);

    if sw.reflect > 0.0 || sw.transmit > 0.0 {
        rr::rr_render(ctx, tctx, app, pp, sw);
    }
}
