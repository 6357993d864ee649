// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Material shaders and the shader registry.
//!
//! Each region names a shader; at prep time the registry runs that shader's
//! setup over the region's parameter string, producing a [`Shader`] value
//! that the region owns for the rest of the frame. The built-in shaders are
//! enum variants; external shaders plug in through the [`MaterialShader`]
//! trait.

pub mod cloud;
pub mod grass;
pub(crate) mod noise;
pub mod params;
pub mod phong;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use cgmath::Matrix4;
use thiserror::Error;

use crate::context::{RenderContext, ThreadContext};
use crate::kernel::{Application, Partition, Primitive, RegionDef};
use crate::light::{self, Light, LightSet};
use crate::math::{FreeCoordinate, Rgb};
use crate::radiance::Radiance;
use crate::shade::{ShadeInputs, Shadework};

pub use params::{ParamError, ParamSet};

bitflags! {
    /// Shader behavior flags.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ShaderFlags: u8 {
        /// Procedural shader: claims ownership of the hit point, and may be
        /// non-opaque even when the region's transmission is zero.
        const PROC = 1 << 0;
    }
}

/// Escape hatch for shaders not built into this crate.
pub trait MaterialShader<R: Radiance>: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;
    fn inputs(&self) -> ShadeInputs;
    fn flags(&self) -> ShaderFlags {
        ShaderFlags::empty()
    }
    fn render(
        &self,
        ctx: &RenderContext<R>,
        tctx: &mut ThreadContext,
        app: &mut Application<R>,
        pp: &Partition<R>,
        sw: &mut Shadework<R>,
    );
}

/// A prepped material shader, owned by its region.
#[derive(Debug)]
pub enum Shader<R: Radiance = Rgb> {
    /// Isotropic light source.
    Light(Arc<Light<R>>),
    /// The Phong family: plastic, mirror, glass.
    Phong(phong::PhongData),
    /// Volumetric noise cloud.
    Scloud(cloud::CloudData),
    /// Surface-splat transparency from the same noise field.
    Tsplat(cloud::CloudData),
    /// Procedural grass microgeometry.
    Grass(grass::GrassData),
    Custom(Box<dyn MaterialShader<R>>),
}

impl<R: Radiance> Shader<R> {
    pub fn name(&self) -> &'static str {
        match self {
            Shader::Light(_) => "light",
            Shader::Phong(data) => data.name,
            Shader::Scloud(_) => "scloud",
            Shader::Tsplat(_) => "tsplat",
            Shader::Grass(_) => "grass",
            Shader::Custom(custom) => custom.name(),
        }
    }

    /// The union of shading inputs this shader requires.
    pub fn inputs(&self) -> ShadeInputs {
        match self {
            Shader::Light(_) => ShadeInputs::NORMAL,
            Shader::Phong(_) => ShadeInputs::NORMAL | ShadeInputs::LIGHT,
            Shader::Scloud(_) | Shader::Tsplat(_) => ShadeInputs::HIT,
            Shader::Grass(_) => ShadeInputs::HIT | ShadeInputs::NORMAL | ShadeInputs::UV,
            Shader::Custom(custom) => custom.inputs(),
        }
    }

    pub fn flags(&self) -> ShaderFlags {
        match self {
            Shader::Light(_) | Shader::Phong(_) => ShaderFlags::empty(),
            Shader::Scloud(_) | Shader::Tsplat(_) | Shader::Grass(_) => ShaderFlags::PROC,
            Shader::Custom(custom) => custom.flags(),
        }
    }

    pub fn render(
        &self,
        ctx: &RenderContext<R>,
        tctx: &mut ThreadContext,
        app: &mut Application<R>,
        pp: &Partition<R>,
        sw: &mut Shadework<R>,
    ) {
        match self {
            Shader::Light(lp) => light::light_render(lp, ctx, app, sw),
            Shader::Phong(data) => phong::phong_render(data, ctx, tctx, app, pp, sw),
            Shader::Scloud(data) => cloud::scloud_render(data, ctx, tctx, app, pp, sw),
            Shader::Tsplat(data) => cloud::tsplat_render(data, ctx, tctx, app, pp, sw),
            Shader::Grass(data) => grass::grass_render(data, ctx, tctx, app, pp, sw),
            Shader::Custom(custom) => custom.render(ctx, tctx, app, pp, sw),
        }
    }
}

/// Errors from running a shader's setup over a region.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no shader named {0:?}")]
    UnknownShader(String),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error("air shader {shader:?} applied to non-air region {region:?}")]
    NotAir {
        shader: &'static str,
        region: String,
    },
    #[error("infinitely large light sources not supported ({region:?})")]
    InfiniteLight { region: String },
    #[error("region {region:?} has no solids to take a light position from")]
    NoSolids { region: String },
}

/// What a shader setup decided about its region.
#[derive(Debug)]
pub enum SetupOutcome<R: Radiance = Rgb> {
    /// Region is renderable with this shader.
    Keep(Shader<R>),
    /// Region should be removed before the kernel preps itself.
    Drop,
    /// Region is retained (as a target for light shading) but must not be
    /// drawn; used by invisible light sources.
    KeepInvisible(Shader<R>),
}

/// Context handed to shader setup functions.
pub struct SetupCtx<'a, R: Radiance = Rgb> {
    pub lights: &'a mut LightSet<R>,
    pub shared: &'a R::Shared,
    /// The solids of the region being prepped.
    pub solids: &'a [Arc<dyn Primitive>],
    /// Region-space to model-space transform of the region being prepped.
    pub to_model: Matrix4<FreeCoordinate>,
    /// `base_color * transmit`, published by setups that know their
    /// transmission so the shadow path can classify the region.
    pub reg_transmit: Rgb,
}

type SetupFn<R> =
    fn(&RegionDef, &ParamSet, &mut SetupCtx<'_, R>) -> Result<SetupOutcome<R>, SetupError>;

/// Process-wide mapping from shader names to setup functions.
pub struct ShaderRegistry<R: Radiance = Rgb> {
    map: HashMap<&'static str, SetupFn<R>>,
}

impl<R: Radiance> ShaderRegistry<R> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// A registry with all built-in shaders registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("light", light::light_setup::<R>);
        registry.register("plastic", phong::plastic_setup::<R>);
        registry.register("mirror", phong::mirror_setup::<R>);
        registry.register("glass", phong::glass_setup::<R>);
        registry.register("scloud", cloud::scloud_setup::<R>);
        registry.register("tsplat", cloud::tsplat_setup::<R>);
        registry.register("grass", grass::grass_setup::<R>);
        registry
    }

    pub fn register(&mut self, name: &'static str, setup: SetupFn<R>) {
        self.map.insert(name, setup);
    }

    /// Runs the named shader's setup over a region definition.
    pub fn setup(
        &self,
        def: &RegionDef,
        ctx: &mut SetupCtx<'_, R>,
    ) -> Result<SetupOutcome<R>, SetupError> {
        let params = ParamSet::parse_material(&def.shader)?;
        let setup = self
            .map
            .get(params.shader_name())
            .ok_or_else(|| SetupError::UnknownShader(params.shader_name().to_string()))?;
        setup(def, &params, ctx)
    }
}

impl<R: Radiance> Default for ShaderRegistry<R> {
    fn default() -> Self {
        Self::with_builtins()
    }
}
