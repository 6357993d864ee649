// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Procedural grass: surface-marching microgeometry.
//!
//! The shader lives on an air-coded bounding region. A ray entering the
//! region is marched through a 2-D integer grid (a DDA over cell
//! boundaries); each cell owns a single leaning stalk, and the ray is
//! tested against the stalk as a line/line closest-approach problem. The
//! ray's beam radius grows with distance, so distant grass fades toward
//! a solid mass rather than aliasing.

use cgmath::{InnerSpace as _, Point3, Vector3};

use crate::context::{RenderContext, ThreadContext};
use crate::kernel::{Application, Partition, RegionDef};
use crate::math::FreeCoordinate;
use crate::radiance::Radiance;
use crate::rr;
use crate::shade::Shadework;
use crate::shaders::{noise, ParamSet, SetupCtx, SetupError, SetupOutcome, Shader};

/// Known height of the bounding solid, mm; stalk heights are a noise
/// fraction of this.
const SOLID_HEIGHT: f64 = 500.0;

/// Prepped grass parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct GrassData {
    pub lacunarity: f64,
    pub h_val: f64,
    pub octaves: f64,
    /// Cell size: model space is divided by this before marching.
    pub size: f64,
    pub inv_size: f64,
    /// Lean/tilt scaling of the stalk direction noise.
    pub ls: f64,
    /// Stalk radius, mm.
    pub radius: f64,
    /// Stalk height noise scaling.
    pub thresh: f64,
    pub delta: [f64; 3],
}

impl Default for GrassData {
    fn default() -> Self {
        Self {
            lacunarity: 2.175_397_4,
            h_val: 1.0,
            octaves: 4.0,
            size: 1.0,
            inv_size: 1.0,
            ls: std::f64::consts::PI,
            radius: 1.0,
            thresh: 1.0,
            delta: [1000.0, 1000.0, 1000.0],
        }
    }
}

pub fn grass_setup<R: Radiance>(
    def: &RegionDef,
    params: &ParamSet,
    _ctx: &mut SetupCtx<'_, R>,
) -> Result<SetupOutcome<R>, SetupError> {
    if def.aircode == 0 {
        return Err(SetupError::NotAir {
            shader: "grass",
            region: def.name.clone(),
        });
    }

    let mut data = GrassData::default();
    for (key, value) in params.pairs() {
        match key {
            "lacunarity" | "l" => data.lacunarity = value.as_f64()?,
            "H" => data.h_val = value.as_f64()?,
            "octaves" | "o" => data.octaves = value.as_f64()?,
            "size" | "s" => data.size = value.as_f64()?,
            "lean" | "ls" => data.ls = value.as_f64()?,
            "radius" | "r" => data.radius = value.as_f64()?,
            "thresh" | "t" => data.thresh = value.as_f64()?,
            "delta" | "d" => data.delta = value.as_vec3()?,
            other => return Err(params.unknown("grass", other).into()),
        }
    }
    data.inv_size = 1.0 / data.size;

    Ok(SetupOutcome::Keep(Shader::Grass(data)))
}

/// Result of testing one grid cell's stalk against the ray.
enum StalkTest {
    Miss,
    /// The stalk test says to stop marching (below ground, or opaque hit on
    /// a transmission ray).
    Stop,
    Hit,
}

/// Ray/stalk intersection for the cell whose corner is `p2` (scaled space).
#[allow(clippy::too_many_arguments)]
fn stalk_test<R: Radiance>(
    data: &GrassData,
    ctx: &RenderContext<R>,
    app: &Application<R>,
    sw: &mut Shadework<R>,
    in_pt: Point3<FreeCoordinate>,
    dir: Vector3<FreeCoordinate>,
    p2: Point3<FreeCoordinate>,
    in_radius: FreeCoordinate,
) -> StalkTest {
    let grass_diameter = data.radius * data.size;

    // Tilt the vertical stalk by a (repeatable) random amount; keep Z the
    // largest component so the grass doesn't lean over too far.
    let mut stalk = noise::noise_vec(Point3::new(p2.x * data.ls, p2.y * data.ls, p2.z * data.ls));
    if stalk.x > stalk.z {
        std::mem::swap(&mut stalk.x, &mut stalk.z);
    }
    if stalk.y > stalk.z {
        std::mem::swap(&mut stalk.y, &mut stalk.z);
    }
    stalk.z += 2.0;
    let stalk = stalk.normalize();

    // Closest approach between the ray line and the stalk line.
    let Some((ldist_ray, ldist_stalk)) = line_line_closest(in_pt, dir, p2, stalk) else {
        return StalkTest::Miss;
    };

    // Noise decides how tall this cell's blade grows.
    let val = noise::fbm(
        Point3::new(p2.x * data.thresh, p2.y * data.thresh, p2.z * data.thresh),
        data.h_val,
        data.lacunarity,
        data.octaves,
    );
    let alt = val * (SOLID_HEIGHT * data.size);

    let pca_ray = in_pt + dir * ldist_ray;
    let radius_at_pca = in_radius + ldist_ray * app.diverge;

    // Blade too short to reach the ray.
    if pca_ray.z - radius_at_pca >= alt {
        return StalkTest::Miss;
    }
    // Closest approach is below the ground plane: stop marching downward.
    if pca_ray.z + radius_at_pca < 0.0 {
        return StalkTest::Stop;
    }

    let pca_stalk = p2 + stalk * ldist_stalk;
    let dist = (pca_ray - pca_stalk).magnitude();

    if dist > radius_at_pca + grass_diameter && (radius_at_pca + grass_diameter) < 0.75 {
        return StalkTest::Miss;
    }

    // Ray overlaps the blade of grass.
    sw.transmit = 0.0;
    if sw.xmitonly {
        return StalkTest::Stop;
    }

    // Scale the color by the height of the hit to approximate basic
    // self-shadowing within the clump.
    let ramp = if alt > 0.0 {
        (pca_ray.z / alt) * 0.5 + 0.5
    } else {
        0.5
    };
    sw.color = sw.basecolor.scaled(ramp.clamp(0.0, 1.0) as f32);

    // Hemispherical normal for the stalk, flipped to face the first
    // strong light.
    let mut tolight = Vector3::new(0.0, 0.0, 1.0);
    for lp in ctx.lights.iter() {
        if lp.infinite {
            tolight = lp.vec;
        } else {
            let scaled_pos = Point3::new(
                lp.pos.x * data.size,
                lp.pos.y * data.size,
                lp.pos.z * data.size,
            );
            tolight = scaled_pos - sw.hit.point;
        }
        if lp.fraction() > 0.6 {
            break;
        }
    }
    let side = stalk.cross(Vector3::unit_z());
    let normal = side.cross(stalk).normalize();
    if tolight.magnitude2() > 0.0 && normal.dot(tolight.normalize()) > 0.0 {
        sw.hit.normal = normal;
    } else {
        sw.hit.normal = -normal;
    }

    StalkTest::Hit
}

/// Parameters along two lines (`p + t*d`) at their mutual closest approach.
/// `None` when the lines are effectively parallel.
fn line_line_closest(
    p1: Point3<FreeCoordinate>,
    d1: Vector3<FreeCoordinate>,
    p2: Point3<FreeCoordinate>,
    d2: Vector3<FreeCoordinate>,
) -> Option<(FreeCoordinate, FreeCoordinate)> {
    let w0 = p1 - p2;
    let b = d1.dot(d2);
    let d = d1.dot(w0);
    let e = d2.dot(w0);
    let denom = 1.0 - b * b; // both directions are unit
    if denom.abs() < 1e-12 {
        return None;
    }
    Some(((b * e - d) / denom, (e - b * d) / denom))
}

pub fn grass_render<R: Radiance>(
    data: &GrassData,
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &mut Application<R>,
    pp: &Partition<R>,
    sw: &mut Shadework<R>,
) {
    let dir = app.ray.direction;

    if sw.xmitonly {
        // Cast no shadows: report full transmission without marching.
        sw.basecolor = R::constant(&ctx.shared, 1.0);
        sw.transmit = 1.0;
        return;
    }

    // In/out points and beam radius, in model space, then scaled into cell
    // space. The shader grid is one cell per scaled unit.
    let in_model = app.ray.at(sw.hit.dist);
    let in_radius_model = app.rbeam + sw.hit.dist * app.diverge;

    let scale = data.size;
    let in_pt = Point3::new(in_model.x * scale, in_model.y * scale, in_model.z * scale);
    let in_radius = in_radius_model * scale;
    let out_dist = (pp.outhit.dist - sw.hit.dist) * scale;

    // Set up the 2-D DDA: tDX/tDY are the ray distances to cross one cell
    // along each axis, tX/tY the distances to the first boundaries.
    let (t_dx, mut t_x, which_x) = dda_axis(in_pt.x, dir.x, out_dist);
    let (t_dy, mut t_y, which_y) = dda_axis(in_pt.y, dir.y, out_dist);

    log::trace!("grass dda tX={t_x} tDX={t_dx} tY={t_y} tDY={t_dy} out={out_dist}");

    #[derive(Clone, Copy, PartialEq)]
    enum Prev {
        None,
        X,
        Y,
    }
    let mut step_prev = Prev::None;
    let mut hit = false;
    sw.transmit = 1.0;

    'march: while t_x < out_dist || t_y < out_dist {
        let (t, axis) = if t_x < t_y {
            (t_x, Prev::X)
        } else {
            (t_y, Prev::Y)
        };
        let next_pt = in_pt + dir * t;

        // When the march direction just changed, the stalk could be in
        // either of the two cells straddling the orthogonal axis; test
        // both. Otherwise only the rayward cell is a candidate.
        let candidates: [Option<Point3<FreeCoordinate>>; 2] = match axis {
            Prev::X => {
                let x = next_pt.x.floor();
                if step_prev != Prev::Y {
                    [
                        Some(Point3::new(x, next_pt.y.floor(), 0.0)),
                        Some(Point3::new(x, next_pt.y.floor() + 1.0, 0.0)),
                    ]
                } else {
                    [Some(Point3::new(x, (next_pt.y + which_y).floor(), 0.0)), None]
                }
            }
            Prev::Y | Prev::None => {
                let y = next_pt.y.floor();
                if step_prev != Prev::X {
                    [
                        Some(Point3::new(next_pt.x.floor(), y, 0.0)),
                        Some(Point3::new(next_pt.x.floor() + 1.0, y, 0.0)),
                    ]
                } else {
                    [Some(Point3::new((next_pt.x + which_x).floor(), y, 0.0)), None]
                }
            }
        };

        for p2 in candidates.into_iter().flatten() {
            match stalk_test(data, ctx, app, sw, in_pt, dir, p2, in_radius) {
                StalkTest::Miss => {}
                StalkTest::Stop => break 'march,
                StalkTest::Hit => {
                    sw.hit.dist += t * data.inv_size;
                    sw.hit.point = next_pt;
                    hit = true;
                    break 'march;
                }
            }
        }

        step_prev = axis;
        match axis {
            Prev::X => t_x += t_dx,
            _ => t_y += t_dy,
        }
    }

    if hit {
        // Re-derive the hit point in model coordinates from the updated
        // distance.
        sw.hit.point = app.ray.at(sw.hit.dist);
        return;
    }

    // Missed every blade (or hit ground): trace on through the bounding
    // region.
    // Setting basecolor to 1 prevents a "filter glass" tint.
    sw.basecolor = R::constant(&ctx.shared, 1.0);
    sw.transmit = 1.0;
    rr::rr_render(ctx, tctx, app, pp, sw);
}

/// One axis of the DDA setup: returns (distance per cell, distance to the
/// first boundary clamped to the exit distance, rayward offset).
fn dda_axis(
    origin: FreeCoordinate,
    dir: FreeCoordinate,
    out_dist: FreeCoordinate,
) -> (FreeCoordinate, FreeCoordinate, FreeCoordinate) {
    let frac = origin - origin.floor();
    if dir < 0.0 {
        let t_d = -1.0 / dir;
        let t = (frac / -dir).min(out_dist);
        (t_d, t, 0.0)
    } else if dir > 0.0 {
        let t_d = 1.0 / dir;
        let t = ((1.0 - frac) / dir).min(out_dist);
        (t_d, t, 1.0)
    } else {
        (FreeCoordinate::MAX, FreeCoordinate::MAX, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::LightSet;
    use crate::math::Rgb;
    use crate::shaders::ShaderRegistry;
    use cgmath::Matrix4;

    #[test]
    fn setup_requires_air_and_parses_fields() {
        let registry: ShaderRegistry = ShaderRegistry::with_builtins();
        let mut lights = LightSet::new();
        let mut sctx = SetupCtx {
            lights: &mut lights,
            shared: &(),
            solids: &[],
            to_model: Matrix4::from_scale(1.0),
            reg_transmit: Rgb::ZERO,
        };
        assert!(registry
            .setup(&RegionDef::new("ground", "grass"), &mut sctx)
            .is_err());
        let def = RegionDef::new("lawn", "grass s=0.5 r=2 t=0.3").with_aircode(1);
        let SetupOutcome::Keep(Shader::Grass(data)) = registry.setup(&def, &mut sctx).unwrap()
        else {
            panic!();
        };
        assert_eq!(data.size, 0.5);
        assert_eq!(data.inv_size, 2.0);
        assert_eq!(data.radius, 2.0);
        assert_eq!(data.thresh, 0.3);
    }

    #[test]
    fn dda_axis_first_boundaries() {
        // Moving +X from x=0.25: first boundary at 0.75 ray units.
        let (t_d, t, which) = dda_axis(0.25, 1.0, 100.0);
        assert_eq!((t_d, t, which), (1.0, 0.75, 1.0));
        // Moving -X from x=0.25: boundary at 0.25.
        let (t_d, t, which) = dda_axis(0.25, -1.0, 100.0);
        assert_eq!((t_d, t, which), (1.0, 0.25, 0.0));
        // Boundary distances clamp to the exit distance.
        let (_, t, _) = dda_axis(0.25, 1.0, 0.5);
        assert_eq!(t, 0.5);
        // Perpendicular axis never advances.
        let (t_d, t, _) = dda_axis(0.25, 0.0, 100.0);
        assert!(t_d > 1e300 && t > 1e300);
    }

    #[test]
    fn line_line_closest_orthogonal() {
        // Ray along +X at z=1; stalk along +Z through origin.
        let (t_ray, t_stalk) = line_line_closest(
            Point3::new(-2.0, 0.0, 1.0),
            Vector3::unit_x(),
            Point3::new(0.0, 0.0, 0.0),
            Vector3::unit_z(),
        )
        .unwrap();
        assert_eq!(t_ray, 2.0);
        assert_eq!(t_stalk, 1.0);
        // Parallel lines have no unique closest approach.
        assert!(line_line_closest(
            Point3::new(0.0, 1.0, 0.0),
            Vector3::unit_x(),
            Point3::new(0.0, 0.0, 0.0),
            Vector3::unit_x(),
        )
        .is_none());
    }
}
