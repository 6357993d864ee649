// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Per-pixel dispatch: grid setup and the firing of primary rays from the
//! camera model, with anti-aliasing, stereo, and incremental-grid
//! handling.

use bitflags::bitflags;
use cgmath::{InnerSpace as _, Matrix4, Point3, SquareMatrix as _, Transform as _, Vector3};

use crate::context::{RenderContext, ThreadContext, ViewParams};
use crate::framebuffer::{view_pixel, FrameOutput};
use crate::kernel::{Application, Ray};
use crate::math::{FreeCoordinate, Rgb};
use crate::radiance::Radiance;
use crate::view::shoot_colorview;

bitflags! {
    /// Where random offsets are applied to break aliasing patterns.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct JitterMode: u8 {
        /// Jitter the position of the ray within each grid cell.
        const CELL = 1 << 0;
        /// Jitter the position of the entire frame.
        const FRAME = 1 << 1;
    }
}

/// CRT-weighted luminance, for packing stereo pairs into red/blue.
fn crt_blend(color: Rgb) -> f32 {
    0.26 * color.red().into_inner() + 0.66 * color.green().into_inner()
        + 0.08 * color.blue().into_inner()
}

/// The precomputed ray grid for one frame.
#[derive(Clone, Debug)]
pub struct ViewGrid {
    /// Model-space point of the view-plane corner (pixel 0,0).
    pub viewbase: Point3<FreeCoordinate>,
    /// Model-space step per pixel along the view X and Y axes.
    pub dx_model: Vector3<FreeCoordinate>,
    pub dy_model: Vector3<FreeCoordinate>,
    pub eye: Point3<FreeCoordinate>,
    /// Ray direction for parallel projection.
    pub direction: Vector3<FreeCoordinate>,
    /// Per-ray beam radius (parallel) and divergence (perspective).
    pub rbeam: FreeCoordinate,
    pub diverge: FreeCoordinate,
    /// Offset of the left eye for stereo viewing (63.5 mm in view X).
    pub left_eye_delta: Vector3<FreeCoordinate>,
    pub model2view: Matrix4<FreeCoordinate>,
    pub perspective: bool,
}

impl ViewGrid {
    /// Derives the grid from the view parameters. `view2model` is taken as
    /// a rigid transform; the view cube spans `viewsize` model units
    /// across X.
    pub fn new(view: &ViewParams) -> Self {
        let r = view.view2model;
        let half = view.viewsize * 0.5;
        let aspect = f64::from(view.width) / f64::from(view.height).max(1.0);
        let cell = view.viewsize / f64::from(view.width);

        let dx_unit = r.transform_vector(Vector3::unit_x()).normalize();
        let dy_unit = r.transform_vector(Vector3::unit_y()).normalize();
        let perspective = view.perspective > 0.0;

        let zbase = if perspective { 0.0 } else { 1.0 };
        let viewbase =
            r.transform_point(Point3::new(-half, -half / aspect, zbase * half));
        let eye = r.transform_point(Point3::new(0.0, 0.0, half));
        let direction = r.transform_vector(-Vector3::unit_z()).normalize();

        let (rbeam, diverge) = if perspective {
            (
                0.0,
                (view.perspective * std::f64::consts::PI / 360.0).tan()
                    / f64::from(view.width),
            )
        } else {
            (view.viewsize / (2.0 * f64::from(view.width)), 0.0)
        };

        let model2view = Matrix4::from_scale(1.0 / half)
            * r.invert().unwrap_or_else(Matrix4::identity);

        Self {
            viewbase,
            dx_model: dx_unit * cell,
            dy_model: dy_unit * cell,
            eye,
            direction,
            rbeam,
            diverge,
            left_eye_delta: dx_unit * -63.5,
            model2view,
            perspective,
        }
    }
}

/// For certain hypersample values there is a particular advantage to
/// subdividing the pixel and shooting a ray in each sub-pixel.
#[derive(Debug)]
pub struct JitterPattern {
    samples: usize,
    rand_scale: [f64; 2],
    /// Center of each sub-pixel.
    coords: &'static [[f64; 2]],
}

static PATTERNS: &[JitterPattern] = &[
    JitterPattern {
        samples: 4,
        rand_scale: [0.5, 0.5],
        coords: &[[0.25, 0.25], [0.25, 0.75], [0.75, 0.25], [0.75, 0.75]],
    },
    JitterPattern {
        samples: 5,
        rand_scale: [0.4, 0.4],
        coords: &[
            [0.2, 0.2],
            [0.2, 0.8],
            [0.8, 0.2],
            [0.8, 0.8],
            [0.5, 0.5],
        ],
    },
    JitterPattern {
        samples: 9,
        rand_scale: [0.3333, 0.3333],
        coords: &[
            [0.17, 0.17],
            [0.17, 0.5],
            [0.17, 0.82],
            [0.5, 0.17],
            [0.5, 0.5],
            [0.5, 0.82],
            [0.82, 0.17],
            [0.82, 0.5],
            [0.82, 0.82],
        ],
    },
    JitterPattern {
        samples: 16,
        rand_scale: [0.25, 0.25],
        coords: &[
            [0.125, 0.125],
            [0.125, 0.375],
            [0.125, 0.625],
            [0.125, 0.875],
            [0.375, 0.125],
            [0.375, 0.375],
            [0.375, 0.625],
            [0.375, 0.875],
            [0.625, 0.125],
            [0.625, 0.375],
            [0.625, 0.625],
            [0.625, 0.875],
            [0.875, 0.125],
            [0.875, 0.375],
            [0.875, 0.625],
            [0.875, 0.875],
        ],
    },
];

/// The deterministic sub-pixel pattern matching `hypersample + 1` rays per
/// pixel, if one exists.
pub fn pattern_for(hypersample: u32) -> Option<&'static JitterPattern> {
    if hypersample == 0 {
        return None;
    }
    let ray_samples = hypersample as usize + 1;
    PATTERNS.iter().find(|p| p.samples == ray_samples)
}

/// The sub-pixel start point for this sample, based on the pattern (or a
/// plain uniform jitter without one).
fn jitter_start_pnt<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    x: u32,
    y: u32,
    samplenum: usize,
    pattern: Option<&JitterPattern>,
) -> Point3<FreeCoordinate> {
    let (dx, dy) = match pattern {
        Some(pat) => (
            f64::from(x)
                + pat.coords[samplenum][0]
                + tctx.rand_half() * pat.rand_scale[0],
            f64::from(y)
                + pat.coords[samplenum][1]
                + tctx.rand_half() * pat.rand_scale[1],
        ),
        None => (
            f64::from(x) + tctx.rand_half(),
            f64::from(y) + tctx.rand_half(),
        ),
    };
    ctx.grid.viewbase + ctx.grid.dx_model * dx + ctx.grid.dy_model * dy
}

/// The primary ray for a view-plane point: from the eye in perspective,
/// parallel otherwise.
fn primary_ray<R: Radiance>(ctx: &RenderContext<R>, point: Point3<FreeCoordinate>) -> Ray {
    if ctx.grid.perspective {
        Ray::new(ctx.grid.eye, (point - ctx.grid.eye).normalize())
    } else {
        Ray::new(point, ctx.grid.direction)
    }
}

/// Computes and emits one pixel: sub-pixel sample loop, stereo, and
/// delivery to the frame output.
pub fn do_pixel<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    out: &FrameOutput<R>,
    pixmap: Option<&[u8]>,
    pattern: Option<&JitterPattern>,
    pixelnum: usize,
) {
    let (x, y) = if ctx.view.incr_mode {
        let i = 1usize << out.incr_level;
        let y = pixelnum / i;
        let x = pixelnum - y * i;
        if out.incr_level > 1 && (x & 1) == 0 && (y & 1) == 0 {
            return; // already done last pass
        }
        let shift = out.incr_nlevel - out.incr_level;
        ((x << shift) as u32, (y << shift) as u32)
    } else {
        let y = pixelnum / ctx.view.width as usize;
        ((pixelnum - y * ctx.view.width as usize) as u32, y as u32)
    };
    if x >= ctx.view.width || y >= ctx.view.height {
        return;
    }

    if let Some(sub) = ctx.view.sub_grid {
        if !sub.contains(x, y) {
            return;
        }
    }
    if out.fullfloat_covered(x, y) {
        return; // pixel was reprojected
    }

    let mut app: Application<R> = Application::new(
        Ray::new(ctx.grid.viewbase, ctx.grid.direction),
        &ctx.shared,
    );
    app.x = x;
    app.y = y;
    app.rbeam = ctx.grid.rbeam;
    app.diverge = ctx.grid.diverge;
    app.onehit = if ctx.options.kut_plane.is_some() {
        0
    } else {
        ctx.options.a_onehit
    };

    // A reusable prior frame can spare us the trace entirely (except that
    // black pixels are re-rendered; black is the "unknown" value).
    if let Some(map) = pixmap {
        let pindex = pixelnum * 3;
        if let Some(rgb) = map.get(pindex..pindex + 3) {
            if rgb.iter().any(|&b| b != 0) {
                app.hit = true; // force shot hit
                app.color = R::from_reflectance_rgb(
                    &ctx.shared,
                    Rgb::new(
                        f32::from(rgb[0]) / 255.0,
                        f32::from(rgb[1]) / 255.0,
                        f32::from(rgb[2]) / 255.0,
                    ),
                );
                view_pixel(ctx, tctx, out, &app);
                return;
            }
        }
    }

    let samples = ctx.view.hypersample + 1;
    let mut colorsum = R::constant(&ctx.shared, 0.0);
    let mut any_hit = false;
    let mut last_dist = 0.0;

    for samplenum in 0..samples {
        let point = if ctx.view.jitter.contains(JitterMode::CELL) {
            jitter_start_pnt(ctx, tctx, x, y, samplenum as usize, pattern)
        } else {
            ctx.grid.viewbase
                + ctx.grid.dx_model * f64::from(x)
                + ctx.grid.dy_model * f64::from(y)
        };

        app.ray = primary_ray(ctx, point);
        app.level = 0;
        app.purpose = "main ray";
        app.cumlen = 0.0;
        app.color = R::constant(&ctx.shared, 0.0);
        app.hit = false;
        app.hit_region = None;
        app.internal_escape = false;
        shoot_colorview(ctx, tctx, &mut app);

        if ctx.view.stereo {
            let right = crt_blend(app.color.to_display_rgb());

            // Shift the origin for the second eye and shoot again.
            let stereo_point = point - ctx.grid.left_eye_delta;
            app.ray = if ctx.grid.perspective {
                Ray::new(
                    ctx.grid.eye + ctx.grid.left_eye_delta,
                    (stereo_point - ctx.grid.eye).normalize(),
                )
            } else {
                Ray::new(stereo_point, ctx.grid.direction)
            };
            app.level = 0;
            app.purpose = "left eye ray";
            shoot_colorview(ctx, tctx, &mut app);
            let left = crt_blend(app.color.to_display_rgb());

            app.color = R::from_reflectance_rgb(&ctx.shared, Rgb::new(left, 0.0, right));
        }

        any_hit |= app.hit;
        last_dist = app.dist;
        colorsum.add_assign(&app.color);
    }

    if samples > 1 {
        colorsum.scale(1.0 / samples as f32);
    }
    app.color = colorsum;
    app.hit = any_hit;
    app.dist = last_dist;

    view_pixel(ctx, tctx, out, &app);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn patterns_exist_for_canonical_hypersamples() {
        for (h, n) in [(3u32, 4usize), (4, 5), (8, 9), (15, 16)] {
            let pat = pattern_for(h).expect("pattern");
            assert_eq!(pat.samples, n);
            assert_eq!(pat.coords.len(), n);
            // All sub-pixel centers are inside the cell.
            assert!(pat
                .coords
                .iter()
                .all(|c| (0.0..1.0).contains(&c[0]) && (0.0..1.0).contains(&c[1])));
        }
        assert!(pattern_for(0).is_none());
        assert!(pattern_for(7).is_none());
    }

    #[test]
    fn grid_steps_span_the_view() {
        let view = ViewParams {
            width: 100,
            height: 100,
            viewsize: 10.0,
            ..ViewParams::default()
        };
        let grid = ViewGrid::new(&view);
        // 100 steps of dx cross the full 10-unit view.
        assert!((grid.dx_model.magnitude() - 0.1).abs() < 1e-12);
        assert!((grid.dy_model.magnitude() - 0.1).abs() < 1e-12);
        // Parallel projection: beam has width, no divergence.
        assert_eq!(grid.diverge, 0.0);
        assert!((grid.rbeam - 0.05).abs() < 1e-12);
        assert!(!grid.perspective);
        // Identity view2model looks down -Z from z = +half.
        assert_eq!(grid.direction, Vector3::new(0.0, 0.0, -1.0));
        assert_eq!(grid.viewbase, Point3::new(-5.0, -5.0, 5.0));
    }

    #[test]
    fn perspective_grid_diverges_from_the_eye() {
        let view = ViewParams {
            width: 100,
            height: 100,
            viewsize: 10.0,
            perspective: 90.0,
            ..ViewParams::default()
        };
        let grid = ViewGrid::new(&view);
        assert!(grid.perspective);
        assert_eq!(grid.rbeam, 0.0);
        let expected = (90.0f64 * std::f64::consts::PI / 360.0).tan() / 100.0;
        assert!((grid.diverge - expected).abs() < 1e-15);
        assert_eq!(grid.eye, Point3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn model2view_inverts_the_grid() {
        let view = ViewParams {
            width: 64,
            height: 64,
            viewsize: 8.0,
            ..ViewParams::default()
        };
        let grid = ViewGrid::new(&view);
        let p = grid.model2view.transform_point(Point3::new(4.0, 0.0, 0.0));
        assert!((p.x - 1.0).abs() < 1e-12);
        assert!(p.y.abs() < 1e-12);
    }
}
