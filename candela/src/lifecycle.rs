// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The view lifecycle: init, per-frame setup, rendering, and teardown.
//!
//! A [`View`] owns everything with a lifetime longer than one frame — the
//! shader registry, the prepped scene, the light set, the retained output
//! buffers — and walks each frame through the canonical sequence:
//! `setup` (shader prep over the region list), `begin_frame`,
//! `render_frame`, `end_frame`, and finally `cleanup`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::{RenderContext, RenderOptions, ViewParams};
use crate::dispatch::{JitterMode, ViewGrid};
use crate::framebuffer::{reproject, BufMode, FrameOutput, PixelSink};
use crate::geom::{Scene, SceneBuilder};
use crate::kernel::{RayStats, Region};
use crate::light::LightSet;
use crate::math::Rgb;
use crate::radiance::Radiance;
use crate::shaders::{SetupCtx, SetupOutcome, Shader, ShaderRegistry};
use crate::worker;

/// A rendering view: the owner of the lifecycle hooks.
pub struct View<R: Radiance = Rgb> {
    registry: ShaderRegistry<R>,
    pub options: RenderOptions,
    pub view: ViewParams,
    shared: R::Shared,
    scene: Option<Arc<Scene<R>>>,
    lights: LightSet<R>,
    out: Option<FrameOutput<R>>,
    /// A previously rendered byte image; non-black pixels are reused
    /// rather than re-traced.
    pixmap: Option<Vec<u8>>,
    curframe: i32,
    stop: Arc<AtomicBool>,
    stats: RayStats,
}

impl<R: Radiance> View<R> {
    /// Early initialization: registers the shaders and fixes the options.
    pub fn new(options: RenderOptions, view: ViewParams, shared: R::Shared) -> Self {
        Self {
            registry: ShaderRegistry::with_builtins(),
            options,
            view,
            shared,
            scene: None,
            lights: LightSet::new(),
            out: None,
            pixmap: None,
            curframe: -1,
            stop: Arc::new(AtomicBool::new(false)),
            stats: RayStats::default(),
        }
    }

    /// Installs a custom shader alongside the built-ins. Must precede
    /// [`View::setup`].
    pub fn registry_mut(&mut self) -> &mut ShaderRegistry<R> {
        &mut self.registry
    }

    /// Supplies a reusable byte image (scanline-major RGB); its non-black
    /// pixels short-circuit the trace.
    pub fn set_pixmap(&mut self, pixmap: Vec<u8>) {
        self.pixmap = Some(pixmap);
    }

    /// A handle that cancels in-flight rendering when set.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stats(&self) -> RayStats {
        self.stats
    }

    /// Runs every region's shader setup and preps the scene.
    ///
    /// Regions whose setup fails are logged and dropped before the
    /// intersection kernel preps itself; this is not fatal.
    pub fn setup(&mut self, builder: SceneBuilder) {
        let tolerance = builder.take_tolerance();
        let mut prepped = Vec::new();

        for scene_region in builder.regions {
            let def = scene_region.def;
            let mut sctx = SetupCtx {
                lights: &mut self.lights,
                shared: &self.shared,
                solids: &scene_region.solids,
                to_model: def.to_model,
                reg_transmit: Rgb::ZERO,
            };
            let outcome = match self.registry.setup(&def, &mut sctx) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::warn!("shader setup failure on {}: {e}", def.name);
                    continue; // drop the region
                }
            };
            let reg_transmit = sctx.reg_transmit;
            let (shader, no_draw) = match outcome {
                SetupOutcome::Keep(shader) => (shader, false),
                SetupOutcome::KeepInvisible(shader) => (shader, true),
                SetupOutcome::Drop => {
                    log::debug!("setup: drop region {}", def.name);
                    continue;
                }
            };

            let region = Arc::new(Region {
                name: def.name,
                id: def.id,
                aircode: def.aircode,
                los: def.los,
                color: def.color,
                temperature: def.temperature,
                shader: Some(shader),
                transmit: reg_transmit,
                no_draw,
            });

            // A visible light region backs its light record; invisible and
            // implicit lights stay region-less.
            if let Some(Shader::Light(lp)) = &region.shader {
                if !no_draw {
                    let _ = lp.region.set(Arc::downgrade(&region));
                }
            }

            prepped.push((region, scene_region.solids));
        }

        self.scene = Some(Arc::new(Scene::assemble(prepped, tolerance)));
    }

    /// Per-frame reset: chooses the buffer mode, allocates the output
    /// buffers, fabricates implicit lights if the model has none, and
    /// recomputes the light fractions. Returns the frame's render context.
    pub fn begin_frame(&mut self, sink: Box<dyn PixelSink>) -> Arc<RenderContext<R>> {
        self.curframe += 1;
        self.stop.store(false, Ordering::Relaxed);

        let mode = self.choose_buf_mode();
        log::info!("frame {}: buffer mode {:?}", self.curframe, mode);

        let reuse_float = self
            .out
            .take()
            .filter(|out| mode == BufMode::FullFloat && out.mode == BufMode::FullFloat);
        let mut out = match reuse_float {
            Some(mut existing) => {
                // Keep the retained float frames; mark the current frame
                // entirely not-computed.
                let floats = existing.floats.get_mut().unwrap();
                for fp in floats.curr.iter_mut() {
                    fp.frame = -1;
                }
                existing.replace_sink(sink);
                existing
            }
            None => FrameOutput::new(mode, self.view.width, self.view.height, sink),
        };

        // If the modeler did not specify any light sources, create a
        // default one.
        if self.lights.is_empty() {
            log::debug!("no explicit light");
            // The canonical positions are view-cube corners; fold the view
            // scale into the matrix so they land at the view's edges.
            let v2m = self.view.view2model
                * cgmath::Matrix4::from_scale(self.view.viewsize * 0.5);
            self.lights.light_maker(1, v2m, &self.shared);
        }
        self.lights.light_init(self.options.ambient);

        let background = if self.options.spectrum.is_some() {
            R::black_body(&self.shared, self.options.bg_temp)
        } else {
            R::from_reflectance_rgb(&self.shared, self.options.background)
        };

        let ibackground = background_bytes(self.options.background);
        let inonbackground = perturb_background(ibackground);

        let mut grid = ViewGrid::new(&self.view);
        if self.view.jitter.contains(JitterMode::FRAME) {
            // Shift the whole grid by a sub-cell amount, varying per frame.
            use rand::{Rng as _, SeedableRng as _};
            let mut rng =
                rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(self.curframe as u64);
            let jx = rng.gen::<f64>() - 0.5;
            let jy = rng.gen::<f64>() - 0.5;
            grid.viewbase += grid.dx_model * jx + grid.dy_model * jy;
        }

        // Reproject the previous float frame through the new view before
        // any tracing happens.
        if mode == BufMode::FullFloat && self.view.reproject_mode > 0 {
            let floats = out.floats.get_mut().unwrap();
            if let Some(prev) = floats.prev.take() {
                let count = reproject::reproject_frame(
                    &prev,
                    &mut floats.curr,
                    grid.model2view,
                    self.view.width,
                    self.view.height,
                    self.curframe,
                    self.view.reproject_mode,
                );
                log::info!(
                    "reprojected {count}/{} pixels",
                    self.view.width * self.view.height
                );
                floats.prev = Some(prev);
            }
        }

        let scene = self
            .scene
            .clone()
            .expect("View::setup must run before begin_frame");

        self.out = Some(out);
        Arc::new(RenderContext {
            scene,
            lights: self.lights.clone(),
            shared: self.shared.clone(),
            options: self.options.clone(),
            view: self.view.clone(),
            grid,
            background,
            ibackground,
            inonbackground,
            curframe: self.curframe,
        })
    }

    fn choose_buf_mode(&self) -> BufMode {
        if let Some(mode) = self.view.buffer {
            return mode;
        }
        if self.view.fullfloat_mode {
            BufMode::FullFloat
        } else if self.view.incr_mode {
            BufMode::Incr
        } else if self.view.full_incr_mode {
            BufMode::Acc
        } else if self.view.width <= 96 || self.view.random_mode {
            BufMode::Unbuf
        } else if self.view.nproc != 0 && self.view.nproc as u32 <= self.view.height / 4 {
            // Each CPU does whole scanlines; saves lots of interlocking.
            BufMode::Scanline
        } else {
            BufMode::Dynamic
        }
    }

    /// Traces the frame: all pixels through the worker pool, honoring the
    /// incremental and accumulation pass structure.
    pub fn render_frame(&mut self, ctx: &RenderContext<R>) {
        let out = self.out.as_mut().expect("begin_frame must precede render_frame");
        let npix = (self.view.width * self.view.height) as usize;
        let (xspan, yrange) = match self.view.sub_grid {
            Some(sub) => (sub.xmax - sub.xmin + 1, sub.ymin..=sub.ymax),
            None => (self.view.width, 0..=self.view.height - 1),
        };

        match out.mode {
            BufMode::Incr => {
                let nlevel = self.view.incr_nlevel.max(1);
                for level in 1..=nlevel {
                    if self.stop.load(Ordering::Relaxed) {
                        break;
                    }
                    out.reset_scanlines_incr(level, nlevel);
                    let grid = 1usize << level;
                    let stats = worker::do_run(
                        ctx,
                        out,
                        self.pixmap.as_deref(),
                        0,
                        grid * grid - 1,
                        &self.stop,
                    );
                    self.stats.absorb(stats);
                }
            }
            BufMode::Acc => {
                for sample in 1..=self.view.full_incr_nsamples.max(1) {
                    if self.stop.load(Ordering::Relaxed) {
                        break;
                    }
                    out.full_incr_sample = sample;
                    out.reset_scanlines(xspan, yrange.clone());
                    let stats =
                        worker::do_run(ctx, out, self.pixmap.as_deref(), 0, npix - 1, &self.stop);
                    self.stats.absorb(stats);
                }
            }
            _ => {
                out.reset_scanlines(xspan, yrange);
                let stats =
                    worker::do_run(ctx, out, self.pixmap.as_deref(), 0, npix - 1, &self.stop);
                self.stats.absorb(stats);
            }
        }
    }

    /// Flushes the frame and swaps the retained float frames.
    pub fn end_frame(&mut self) {
        if let Some(out) = self.out.as_mut() {
            out.end_frame(self.view.reproject_mode);
        }
    }

    /// Read access to the frame output (for embedders polling FULLFLOAT
    /// state between frames).
    pub fn output(&self) -> Option<&FrameOutput<R>> {
        self.out.as_ref()
    }

    /// Per-region shader teardown happens when the scene drops; the light
    /// set additionally releases implicit and orphaned lights.
    pub fn cleanup(&mut self) {
        self.lights.light_cleanup();
        self.scene = None;
        self.out = None;
    }
}

fn background_bytes(bg: Rgb) -> [u8; 3] {
    [
        (bg.red().into_inner() * 255.0 + 0.5).clamp(0.0, 255.0) as u8,
        (bg.green().into_inner() * 255.0 + 0.5).clamp(0.0, 255.0) as u8,
        (bg.blue().into_inner() * 255.0 + 0.5).clamp(0.0, 255.0) as u8,
    ]
}

/// If a non-background pixel comes out the same color as the background,
/// it is nudged to this value to permit compositing: the channel with the
/// largest intensity is perturbed by one.
fn perturb_background(ibackground: [u8; 3]) -> [u8; 3] {
    let mut out = ibackground;
    let mut i = 0;
    for c in 1..3 {
        if out[c] > out[i] {
            i = c;
        }
    }
    if out[i] < 127 {
        out[i] += 1;
    } else {
        out[i] -= 1;
    }
    out
}
