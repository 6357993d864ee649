// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! End-to-end shading scenarios: small scenes rendered through the full
//! lifecycle, plus direct probes of the shading dispatcher where the test
//! wants to see the shadework arrays themselves.

use std::sync::Arc;

use cgmath::{InnerSpace as _, Point3, Vector3};
use pretty_assertions::assert_eq;

use candela::context::{RenderContext, RenderOptions, ThreadContext, ViewParams};
use candela::framebuffer::{BufMode, MemorySink, SharedSink};
use candela::geom::{Rpp, SceneBuilder, Sphere};
use candela::kernel::{Application, Partition, Primitive, Ray, RegionDef};
use candela::lifecycle::View;
use candela::math::Rgb;
use candela::shade::{viewshade, Shadework};
use candela::view::shoot_colorview;

fn sphere(x: f64, y: f64, z: f64, r: f64) -> Vec<Arc<dyn Primitive>> {
    vec![Arc::new(Sphere::new(Point3::new(x, y, z), r))]
}

fn slab(min: [f64; 3], max: [f64; 3]) -> Vec<Arc<dyn Primitive>> {
    vec![Arc::new(Rpp::new(Point3::from(min), Point3::from(max)))]
}

/// Builds a view over the scene and opens a throwaway frame, returning the
/// probe-ready render context.
fn probe_ctx(
    builder: SceneBuilder,
    options: RenderOptions,
    view_params: ViewParams,
) -> (View, Arc<RenderContext>) {
    let mut view: View = View::new(options, view_params, ());
    view.setup(builder);
    let ctx = view.begin_frame(Box::new(MemorySink::new(4, 4)));
    (view, ctx)
}

/// The first renderable partition of a traced ray.
fn first_hit(ctx: &RenderContext, ray: Ray) -> Partition {
    let parts = ctx.scene.trace(&ray, -1);
    parts
        .into_iter()
        .find(|pp| pp.outhit.dist >= 0.0)
        .expect("probe ray missed the scene")
}

fn shade_probe(ctx: &RenderContext, ray: Ray) -> (Application, Shadework) {
    let mut tctx = ThreadContext::new(0);
    let pp = first_hit(ctx, ray);
    let mut app: Application = Application::new(ray, &());
    let mut sw = Shadework::new(ctx);
    viewshade(ctx, &mut tctx, &mut app, &pp, &mut sw);
    (app, sw)
}

fn channels(color: Rgb) -> [f32; 3] {
    [
        color.red().into_inner(),
        color.green().into_inner(),
        color.blue().into_inner(),
    ]
}

/// A white plastic sphere lit head-on by an infinite light: diffuse and
/// specular terms sum to full intensity with no ambient.
#[test]
fn single_point_single_light() {
    let mut builder = SceneBuilder::new();
    builder.push(RegionDef::new("ball", "plastic"), sphere(0.0, 0.0, 0.0, 1.0));
    builder.push(
        RegionDef::new("sun", "light i=1 s=1 b=1000"),
        sphere(0.0, 0.0, 100.0, 2.0),
    );
    let options = RenderOptions {
        ambient: 0.0,
        ..RenderOptions::default()
    };
    let (_view, ctx) = probe_ctx(builder, options, ViewParams::default());

    let ray = Ray::new(Point3::new(0.0, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0));
    let (_, sw) = shade_probe(&ctx, ray);

    assert!(sw.visible[0].is_some(), "infinite light must be visible");
    assert_eq!(sw.lightfract[0], 1.0);
    for c in channels(sw.color) {
        assert!(c > 0.6, "diffuse-dominated color too dim: {c}");
        assert!((c - 1.0).abs() < 1e-4, "expected full contribution: {c}");
    }
}

/// An opaque sphere between the surface and a finite light leaves only the
/// ambient term.
#[test]
fn shadow_of_opaque_object() {
    let mut builder = SceneBuilder::new();
    builder.push(RegionDef::new("target", "plastic"), sphere(0.0, 0.0, 0.0, 1.0));
    builder.push(RegionDef::new("blocker", "plastic"), sphere(5.0, 0.0, 0.0, 1.0));
    builder.push(
        RegionDef::new("lamp", "light s=1"),
        sphere(10.0, 0.0, 0.0, 0.5),
    );
    let (_view, ctx) = probe_ctx(builder, RenderOptions::default(), ViewParams::default());

    // Hits the target at (sqrt(.5), 0, sqrt(.5)), facing both the eye and
    // (partly) the lamp.
    let x = 0.5f64.sqrt();
    let ray = Ray::new(Point3::new(x, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0));
    let (_, sw) = shade_probe(&ctx, ray);

    assert!(sw.visible[0].is_none(), "lamp must be fully obscured");
    assert_eq!(sw.lightfract[0], 0.0);
    // Ambient only: basecolor * cos(eye angle) * AmbientIntensity.
    let cos_amb = sw.hit.normal.dot(Vector3::new(0.0, 0.0, 1.0));
    let expected = (cos_amb * 0.4) as f32;
    for c in channels(sw.color) {
        assert!((c - expected).abs() < 1e-5, "want {expected}, got {c}");
    }
}

/// A shadow ray through glass is attenuated by the glass transmission, not
/// extinguished.
#[test]
fn transparent_glass_attenuation() {
    let mut builder = SceneBuilder::new();
    builder.push(RegionDef::new("target", "plastic"), sphere(0.0, 0.0, 0.0, 1.0));
    builder.push(RegionDef::new("pane", "glass"), sphere(5.0, 0.0, 0.0, 1.0));
    builder.push(
        RegionDef::new("lamp", "light s=1"),
        sphere(10.0, 0.0, 0.0, 0.5),
    );
    let (_view, ctx) = probe_ctx(builder, RenderOptions::default(), ViewParams::default());

    let x = 0.5f64.sqrt();
    let ray = Ray::new(Point3::new(x, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0));
    let (_, sw) = shade_probe(&ctx, ray);

    assert!(sw.visible[0].is_some(), "glass must pass the light");
    assert_eq!(sw.lightfract[0], 1.0);
    for c in channels(sw.intensity[0]) {
        assert!(
            (c - 0.6).abs() < 1e-5,
            "filter color should be the glass transmit: {c}"
        );
    }
}

/// With the eye inside a solid and recursion forbidden, the pixel is 18%
/// grey and still counts as a hit.
#[test]
fn eye_inside_solid() {
    let mut builder = SceneBuilder::new();
    builder.push(
        RegionDef::new("cube", "plastic"),
        slab([-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]),
    );
    let options = RenderOptions {
        bounces: 0,
        ..RenderOptions::default()
    };
    let (_view, ctx) = probe_ctx(builder, options, ViewParams::default());

    let mut tctx = ThreadContext::new(0);
    let mut app: Application = Application::new(
        Ray::new(Point3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, -1.0)),
        &(),
    );
    app.onehit = -1;
    shoot_colorview(&ctx, &mut tctx, &mut app);

    assert!(app.hit);
    assert_eq!(app.color, Rgb::new(0.18, 0.18, 0.18));
}

/// With bounces available, the eye-inside case pushes through the solid and
/// darkens whatever lies beyond.
#[test]
fn eye_inside_solid_pushes_through() {
    let mut builder = SceneBuilder::new();
    builder.push(
        RegionDef::new("cube", "plastic"),
        slab([-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]),
    );
    let (_view, ctx) = probe_ctx(builder, RenderOptions::default(), ViewParams::default());

    let mut tctx = ThreadContext::new(0);
    let mut app: Application = Application::new(
        Ray::new(Point3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, -1.0)),
        &(),
    );
    app.onehit = -1;
    shoot_colorview(&ctx, &mut tctx, &mut app);

    assert!(app.hit);
    // Beyond the cube is background (black here), scaled by the 0.80 cue.
    assert_eq!(app.color, Rgb::ZERO);
}

/// Ambient occlusion: an unobstructed hemisphere leaves the color exactly
/// unchanged; a nearby parallel surface darkens it, but never below the
/// occlusion floor.
#[test]
fn ambient_occlusion_floor() {
    let open_color = {
        let mut builder = SceneBuilder::new();
        builder.push(
            RegionDef::new("floor", "plastic"),
            slab([-2.0, -2.0, 0.0], [2.0, 2.0, 0.1]),
        );
        let options = RenderOptions {
            amb_samples: 64,
            amb_radius: 0.5,
            ..RenderOptions::default()
        };
        let (_view, ctx) = probe_ctx(builder, options, ViewParams::default());
        let mut tctx = ThreadContext::new(0);
        let mut app: Application = Application::new(
            Ray::new(Point3::new(0.0, 0.0, -1.0), Vector3::new(0.0, 0.0, 1.0)),
            &(),
        );
        app.onehit = -1;
        shoot_colorview(&ctx, &mut tctx, &mut app);
        assert!(app.hit);
        app.color
    };

    let baseline = {
        // Same probe with the AO pass disabled.
        let mut builder = SceneBuilder::new();
        builder.push(
            RegionDef::new("floor", "plastic"),
            slab([-2.0, -2.0, 0.0], [2.0, 2.0, 0.1]),
        );
        let (_view, ctx) = probe_ctx(builder, RenderOptions::default(), ViewParams::default());
        let mut tctx = ThreadContext::new(0);
        let mut app: Application = Application::new(
            Ray::new(Point3::new(0.0, 0.0, -1.0), Vector3::new(0.0, 0.0, 1.0)),
            &(),
        );
        app.onehit = -1;
        shoot_colorview(&ctx, &mut tctx, &mut app);
        app.color
    };

    // Nothing below the floor: occlusion is exactly 1.
    assert_eq!(open_color, baseline);
    assert!(baseline.sum() > 0.0);

    let occluded_color = {
        // A second slab hangs 0.05 under the floor; the probe starts in the
        // gap between them.
        let mut builder = SceneBuilder::new();
        builder.push(
            RegionDef::new("floor", "plastic"),
            slab([-2.0, -2.0, 0.0], [2.0, 2.0, 0.1]),
        );
        builder.push(
            RegionDef::new("shelf", "plastic"),
            slab([-5.0, -5.0, -0.1], [5.0, 5.0, -0.05]),
        );
        let options = RenderOptions {
            amb_samples: 64,
            amb_radius: 0.5,
            ..RenderOptions::default()
        };
        let (_view, ctx) = probe_ctx(builder, options, ViewParams::default());
        let mut tctx = ThreadContext::new(0);
        let mut app: Application = Application::new(
            Ray::new(Point3::new(0.0, 0.0, -0.02), Vector3::new(0.0, 0.0, 1.0)),
            &(),
        );
        app.onehit = -1;
        shoot_colorview(&ctx, &mut tctx, &mut app);
        assert!(app.hit);
        app.color
    };

    assert!(
        occluded_color.sum() < 0.5 * baseline.sum(),
        "occluder should darken the surface: {occluded_color:?} vs {baseline:?}"
    );
    // The occlusion factor is clamped at 1/80.
    assert!(occluded_color.sum() >= baseline.sum() * 0.0124);
}

/// Incremental mode: three passes at doubling density cover an 8x8 frame
/// with exactly one primary ray per pixel in total.
#[test]
fn incremental_mode_pixel_budget() {
    let builder = SceneBuilder::new(); // empty scene; every ray misses
    let view_params = ViewParams {
        width: 8,
        height: 8,
        incr_mode: true,
        incr_nlevel: 3,
        nproc: 1,
        ..ViewParams::default()
    };
    let mut view: View = View::new(RenderOptions::default(), view_params, ());
    view.setup(builder);
    let ctx = view.begin_frame(Box::new(MemorySink::new(8, 8)));
    view.render_frame(&ctx);
    view.end_frame();

    // 4 pixels at level 1, 12 at level 2, 48 at level 3.
    assert_eq!(view.stats().shots, 64);
    assert_eq!(view.stats().misses, 64);
}

/// One sub-ray per pixel at hypersample 0; the deterministic pattern count
/// otherwise.
#[test]
fn hypersample_ray_counts() {
    for (hyper, expected) in [(0u32, 16u64), (3, 64)] {
        let builder = SceneBuilder::new();
        let view_params = ViewParams {
            width: 4,
            height: 4,
            hypersample: hyper,
            nproc: 1,
            ..ViewParams::default()
        };
        let mut view: View = View::new(RenderOptions::default(), view_params, ());
        view.setup(builder);
        let ctx = view.begin_frame(Box::new(MemorySink::new(4, 4)));
        view.render_frame(&ctx);
        view.end_frame();
        assert_eq!(view.stats().shots, expected, "hypersample {hyper}");
    }
}

fn render_sphere_scene(buffer: Option<BufMode>) -> Vec<u8> {
    let mut builder = SceneBuilder::new();
    builder.push(
        RegionDef::new("ball", "plastic").with_color(Rgb::new(0.9, 0.4, 0.1)),
        sphere(0.0, 0.0, 0.0, 1.5),
    );
    builder.push(
        RegionDef::new("lamp", "light s=1"),
        sphere(0.0, 0.0, 50.0, 1.0),
    );
    let view_params = ViewParams {
        width: 64,
        height: 64,
        viewsize: 8.0,
        nproc: 1,
        buffer,
        ..ViewParams::default()
    };
    let mut view: View = View::new(RenderOptions::default(), view_params, ());
    view.setup(builder);
    let (sink, image) = SharedSink::new(MemorySink::new(64, 64));
    let ctx = view.begin_frame(Box::new(sink));
    view.render_frame(&ctx);
    view.end_frame();
    let data = image.lock().unwrap().data().to_vec();
    data
}

/// Deterministic settings render byte-identical images regardless of the
/// buffering strategy.
#[test]
fn buffer_modes_agree() {
    let unbuf = render_sphere_scene(Some(BufMode::Unbuf));
    let dynamic = render_sphere_scene(Some(BufMode::Dynamic));
    let scanline = render_sphere_scene(Some(BufMode::Scanline));
    assert_eq!(unbuf, dynamic);
    assert_eq!(dynamic, scanline);
    // And the image actually contains the sphere.
    assert!(unbuf.iter().any(|&b| b > 16));
}

/// Every flushed pixel is either shaded content or exactly the integer
/// background.
#[test]
fn misses_are_exact_background() {
    let mut builder = SceneBuilder::new();
    builder.push(
        RegionDef::new("ball", "plastic").with_color(Rgb::new(0.9, 0.4, 0.1)),
        sphere(0.0, 0.0, 0.0, 1.0),
    );
    builder.push(
        RegionDef::new("lamp", "light s=1"),
        sphere(0.0, 0.0, 50.0, 1.0),
    );
    let view_params = ViewParams {
        width: 32,
        height: 32,
        viewsize: 8.0,
        nproc: 1,
        ..ViewParams::default()
    };
    let mut options = RenderOptions::default();
    options.set("background", "0.1 0.2 0.3").unwrap();
    let mut view: View = View::new(options, view_params, ());
    view.setup(builder);
    let (sink, image) = SharedSink::new(MemorySink::new(32, 32));
    let ctx = view.begin_frame(Box::new(sink));
    view.render_frame(&ctx);
    view.end_frame();

    let image = image.lock().unwrap();
    // Corner pixels miss (the sphere spans only the middle quarter).
    assert_eq!(image.pixel(0, 0), ctx.ibackground);
    assert_eq!(image.pixel(31, 31), ctx.ibackground);
    // The center is shaded, and not accidentally the background value.
    assert!(image.pixel(16, 16) != ctx.ibackground);
}

/// FULLFLOAT bookkeeping: after a frame each cell is either current or
/// marked not-computed; the next frame is seeded by reprojection.
#[test]
fn fullfloat_reprojection_seeds_next_frame() {
    let mut builder = SceneBuilder::new();
    builder.push(
        RegionDef::new("ball", "plastic").with_color(Rgb::new(0.2, 0.9, 0.3)),
        sphere(0.0, 0.0, 0.0, 2.0),
    );
    builder.push(
        RegionDef::new("lamp", "light s=1"),
        sphere(0.0, 0.0, 50.0, 1.0),
    );
    let view_params = ViewParams {
        width: 32,
        height: 32,
        viewsize: 8.0,
        nproc: 1,
        fullfloat_mode: true,
        reproject_mode: 1,
        ..ViewParams::default()
    };
    let mut view: View = View::new(RenderOptions::default(), view_params, ());
    view.setup(builder);

    let ctx = view.begin_frame(Box::new(MemorySink::new(32, 32)));
    view.render_frame(&ctx);
    {
        let out = view.output().unwrap();
        let floats = out.floats.lock().unwrap();
        let mut hits = 0;
        for fp in &floats.curr {
            assert!(fp.frame == 0 || fp.frame == -1, "frame {}", fp.frame);
            if fp.frame == 0 {
                hits += 1;
                assert!(fp.dist.is_finite());
            }
        }
        assert!(hits > 0, "sphere should cover some pixels");
    }
    view.end_frame();

    // Same view for the next frame: reprojection covers the hit pixels
    // before any ray is traced.
    let ctx = view.begin_frame(Box::new(MemorySink::new(32, 32)));
    let seeded = {
        let out = view.output().unwrap();
        let floats = out.floats.lock().unwrap();
        floats.curr.iter().filter(|fp| fp.frame >= 0).count()
    };
    assert!(seeded > 0, "reprojection should seed the new frame");
    view.render_frame(&ctx);
    let out = view.output().unwrap();
    let floats = out.floats.lock().unwrap();
    for fp in &floats.curr {
        assert!(fp.frame <= ctx.curframe);
        assert!(fp.frame >= -1);
    }
}

/// Stereo packs the left/right CRT luminances into red and blue.
#[test]
fn stereo_packs_red_blue() {
    let mut builder = SceneBuilder::new();
    builder.push(
        RegionDef::new("ball", "plastic").with_color(Rgb::new(0.8, 0.8, 0.8)),
        sphere(0.0, 0.0, 0.0, 2.0),
    );
    builder.push(
        RegionDef::new("lamp", "light s=1"),
        sphere(0.0, 0.0, 50.0, 1.0),
    );
    let view_params = ViewParams {
        width: 16,
        height: 16,
        viewsize: 8.0,
        nproc: 1,
        stereo: true,
        buffer: Some(BufMode::Unbuf),
        ..ViewParams::default()
    };
    let options = RenderOptions {
        benchmark: true,
        ..RenderOptions::default()
    };
    let mut view: View = View::new(options, view_params, ());
    view.setup(builder);
    let (sink, image) = SharedSink::new(MemorySink::new(16, 16));
    let ctx = view.begin_frame(Box::new(sink));
    view.render_frame(&ctx);
    view.end_frame();

    let image = image.lock().unwrap();
    let mut lit = 0;
    for y in 0..16 {
        for x in 0..16 {
            let [r, g, b] = image.pixel(x, y);
            assert_eq!(g, 0, "green channel must stay empty at {x},{y}");
            if r > 0 || b > 0 {
                lit += 1;
            }
        }
    }
    assert!(lit > 0);
}

/// Non-black pixmap entries are emitted without re-tracing.
#[test]
fn pixmap_short_circuits_tracing() {
    let builder = SceneBuilder::new(); // nothing to hit anyway
    let view_params = ViewParams {
        width: 8,
        height: 8,
        nproc: 1,
        buffer: Some(BufMode::Unbuf),
        ..ViewParams::default()
    };
    let options = RenderOptions {
        benchmark: true,
        ..RenderOptions::default()
    };
    let mut view: View = View::new(options, view_params, ());
    view.setup(builder);
    view.set_pixmap(vec![200u8; 8 * 8 * 3]);
    let (sink, image) = SharedSink::new(MemorySink::new(8, 8));
    let ctx = view.begin_frame(Box::new(sink));
    view.render_frame(&ctx);
    view.end_frame();

    assert_eq!(view.stats().shots, 0, "pixmap pixels must not be traced");
    let image = image.lock().unwrap();
    for c in image.pixel(3, 5) {
        assert!((i32::from(c) - 200).abs() <= 1, "got {c}");
    }
}

/// The volumetric cloud reports a transmission in range for shadow-style
/// queries and renders without touching lighting when asked for
/// transmission only.
#[test]
fn scloud_transmission_bounds() {
    let mut builder = SceneBuilder::new();
    builder.push(
        RegionDef::new("cloud", "scloud s=2 m=0.5").with_aircode(1),
        sphere(0.0, 0.0, 0.0, 2.0),
    );
    builder.push(
        RegionDef::new("wall", "plastic"),
        slab([-3.0, -3.0, -6.0], [3.0, 3.0, -5.0]),
    );
    let (_view, ctx) = probe_ctx(builder, RenderOptions::default(), ViewParams::default());

    let ray = Ray::new(Point3::new(0.0, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0));
    let parts = ctx.scene.trace(&ray, 0);
    let cloud_pp = parts
        .iter()
        .find(|pp| pp.region.aircode != 0)
        .expect("cloud partition");

    let mut tctx = ThreadContext::new(0);
    let mut app: Application = Application::new(ray, &());
    let mut sw = Shadework::for_transmission(&ctx);
    viewshade(&ctx, &mut tctx, &mut app, cloud_pp, &mut sw);
    assert!(
        (0.0..=1.0).contains(&sw.transmit),
        "transmit {}",
        sw.transmit
    );
}

/// Grass casts no shadows: a transmission query reports full transparency.
/// A camera-style render through the region completes and stays plausible.
#[test]
fn grass_is_transparent_to_shadow_rays() {
    let mut builder = SceneBuilder::new();
    builder.push(
        RegionDef::new("lawn", "grass s=0.01 r=2").with_aircode(1),
        slab([-500.0, -500.0, 0.0], [500.0, 500.0, 500.0]),
    );
    builder.push(
        RegionDef::new("dirt", "plastic").with_color(Rgb::new(0.4, 0.3, 0.1)),
        slab([-500.0, -500.0, -10.0], [500.0, 500.0, 0.0]),
    );
    let (_view, ctx) = probe_ctx(builder, RenderOptions::default(), ViewParams::default());

    let ray = Ray::new(
        Point3::new(0.0, 0.0, 400.0),
        Vector3::new(0.3, 0.1, -1.0).normalize(),
    );
    let parts = ctx.scene.trace(&ray, 0);
    let lawn_pp = parts
        .iter()
        .find(|pp| pp.region.aircode != 0)
        .expect("lawn partition");

    let mut tctx = ThreadContext::new(0);
    let mut app: Application = Application::new(ray, &());
    let mut sw = Shadework::for_transmission(&ctx);
    viewshade(&ctx, &mut tctx, &mut app, lawn_pp, &mut sw);
    assert_eq!(sw.transmit, 1.0);

    // Full shading: marches the grid; either a blade (opaque) or a clean
    // pass-through.
    let mut sw = Shadework::new(&ctx);
    let mut app: Application = Application::new(ray, &());
    viewshade(&ctx, &mut tctx, &mut app, lawn_pp, &mut sw);
    assert!(sw.transmit == 0.0 || sw.transmit == 1.0);
}

/// The spectral carrier renders end to end: a warm light source over a
/// plastic ball, collapsed to displayable RGB at output.
#[test]
fn spectral_smoke() {
    use candela::spectral::{Spectrum, WavelengthTable};

    let table = WavelengthTable::visible();
    let mut builder = SceneBuilder::new();
    builder.push(
        RegionDef::new("ball", "plastic").with_color(Rgb::new(0.7, 0.7, 0.7)),
        sphere(0.0, 0.0, 0.0, 1.5),
    );
    builder.push(
        RegionDef::new("lamp", "light s=1").with_temperature(3000.0),
        sphere(0.0, 0.0, 50.0, 1.0),
    );
    let view_params = ViewParams {
        width: 8,
        height: 8,
        viewsize: 8.0,
        nproc: 1,
        buffer: Some(BufMode::Unbuf),
        ..ViewParams::default()
    };
    let mut options = RenderOptions::default();
    options.set("spectrum", "20 380 720").unwrap();
    let mut view: View<Spectrum> = View::new(options, view_params, table);
    view.setup(builder);
    let (sink, image) = SharedSink::new(MemorySink::new(8, 8));
    let ctx = view.begin_frame(Box::new(sink));
    view.render_frame(&ctx);
    view.end_frame();

    let image = image.lock().unwrap();
    assert!(image.data().iter().any(|&b| b > 0));
}
