// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! candela is the shading and visibility core of a parallel CPU
//! ray-tracing renderer: it converts ray/geometry intersection results
//! into radiometric pixel values.
//!
//! The crate covers the per-pixel dispatch loop (anti-aliasing,
//! incremental refinement, stereo, temporal reprojection), the shading
//! pipeline ([`shade::viewshade`] and the built-in material shaders), the
//! shadow and light-transport subsystem with penumbra sampling, and the
//! output buffer model. The ray/geometry intersection kernel itself is a
//! collaborator consumed through [`kernel::Intersector`]; a simple
//! union-only kernel over spheres and boxes ships in [`geom`].
//!
//! The shading pipeline is generic over its color carrier: plain
//! [`math::Rgb`] (the default) or tabulated spectra for thermal work, via
//! the [`radiance::Radiance`] trait.
//!
//! A minimal rendering:
//!
//! ```
//! use std::sync::Arc;
//! use candela::framebuffer::{MemorySink, SharedSink};
//! use candela::geom::{SceneBuilder, Sphere};
//! use candela::kernel::RegionDef;
//! use candela::context::{RenderOptions, ViewParams};
//! use candela::lifecycle::View;
//! use candela::math::Rgb;
//! use cgmath::Point3;
//!
//! let mut builder = SceneBuilder::new();
//! builder.push(
//!     RegionDef::new("ball", "plastic").with_color(Rgb::new(0.8, 0.2, 0.2)),
//!     vec![Arc::new(Sphere::new(Point3::new(0.0, 0.0, 0.0), 1.0))],
//! );
//!
//! let view = ViewParams { width: 32, height: 32, viewsize: 4.0, ..Default::default() };
//! let mut render: View = View::new(RenderOptions::default(), view, ());
//! render.setup(builder);
//!
//! let (sink, image) = SharedSink::new(MemorySink::new(32, 32));
//! let ctx = render.begin_frame(Box::new(sink));
//! render.render_frame(&ctx);
//! render.end_frame();
//! let center = image.lock().unwrap().pixel(16, 16);
//! assert!(center[0] > 0);
//! ```

pub mod context;
pub mod dispatch;
pub mod framebuffer;
pub mod geom;
pub mod kernel;
pub mod lifecycle;
pub mod light;
pub mod math;
pub mod radiance;
pub mod rr;
pub mod shade;
pub mod shaders;
pub mod spectral;
pub mod view;
pub(crate) mod worker;

/// Refractive index of air.
pub const RI_AIR: f64 = 1.0;
