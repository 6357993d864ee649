// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Light sources.
//!
//! Lights are a material property: a region whose shader is `"light"`
//! becomes an explicit light source at prep time. If no region does, the
//! frame setup fabricates one to three implicit lights in view space. All
//! lights live in one insertion-ordered [`LightSet`].

pub mod vis;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use cgmath::{EuclideanSpace as _, InnerSpace as _, Matrix4, Point3, Transform as _, Vector3};
use once_cell::sync::OnceCell;

use crate::context::RenderContext;
use crate::geom;
use crate::kernel::{Application, Region, RegionDef};
use crate::math::{FreeCoordinate, Rgb};
use crate::radiance::Radiance;
use crate::shade::Shadework;
use crate::shaders::{ParamSet, SetupCtx, SetupError, SetupOutcome, Shader};

/// Upper bound on the number of lights the shadework arrays carry.
pub const MAX_LIGHTS: usize = 16;

/// An `f64` cell that many shading threads read while frame setup writes it
/// once. Used for the per-light energy fraction, which is recomputed by
/// [`LightSet::light_init`] after the lights already sit behind `Arc`s.
#[derive(Debug)]
pub struct SharedFraction(AtomicU64);

impl SharedFraction {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// One light source.
#[derive(Debug)]
pub struct Light<R: Radiance = Rgb> {
    pub name: String,
    /// The region this light was modeled as; unset for implicit and
    /// invisible lights. Filled in after region construction.
    pub region: OnceCell<Weak<Region<R>>>,
    pub pos: Point3<FreeCoordinate>,
    /// Approximate radius of the light's presented disk, for penumbra
    /// sampling.
    pub radius: FreeCoordinate,
    /// Unit beam direction.
    pub aim: Vector3<FreeCoordinate>,
    /// Beam dispersion half-angle, degrees, 0..=180.
    pub angle: f64,
    pub cos_angle: f64,
    pub color: R,
    /// Total output, lumens.
    pub intensity: f64,
    /// This light's share of the scene's total emission; recomputed by
    /// `light_init` unless the modeler overrode it.
    fraction: SharedFraction,
    /// 0 = fill light (no shadow rays); otherwise the number of penumbra
    /// sample rays (1 = point sample).
    pub shadows: i32,
    pub infinite: bool,
    /// Both polarities are kept to permit either spelling at parse time.
    pub visible: bool,
    pub invisible: bool,
    pub explicit_aim: bool,
    /// Unit vector from the model origin toward the light; doubles as the
    /// incoming direction of infinite lights.
    pub vec: Vector3<FreeCoordinate>,
    /// Fabricated by `light_maker` rather than modeled.
    pub implicit: bool,
}

impl<R: Radiance> Light<R> {
    pub fn fraction(&self) -> f64 {
        self.fraction.get()
    }

    /// The region backing this light, if it is still alive.
    pub fn region_arc(&self) -> Option<Arc<Region<R>>> {
        self.region.get().and_then(Weak::upgrade)
    }
}

/// The scene's lights, in insertion order.
#[derive(Clone)]
pub struct LightSet<R: Radiance = Rgb> {
    lights: Vec<Arc<Light<R>>>,
}

impl<R: Radiance> LightSet<R> {
    pub fn new() -> Self {
        Self { lights: Vec::new() }
    }

    pub fn push(&mut self, light: Arc<Light<R>>) {
        self.lights.push(light);
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Light<R>>> {
        self.lights.iter()
    }

    /// Fabricates `num` (1..=3) implicit lights at canonical view-space
    /// positions: upper-left white, upper-right reddish, behind-overhead
    /// bluish.
    pub fn light_maker(
        &mut self,
        num: usize,
        view2model: Matrix4<FreeCoordinate>,
        shared: &R::Shared,
    ) {
        for i in 0..num {
            let (color, view_pos) = match i {
                0 => (Rgb::ONE, Vector3::new(-1.0, 0.0, 1.0)),
                1 => (Rgb::new(1.0, 0.1, 0.1), Vector3::new(1.0, 0.0, 1.0)),
                2 => (Rgb::new(0.1, 0.1, 1.0), Vector3::new(0.0, 1.0, -0.5)),
                _ => return,
            };
            let pos = view2model.transform_point(Point3::from_vec(view_pos));
            let vec = if pos.to_vec().magnitude2() > 1e-20 {
                pos.to_vec().normalize()
            } else {
                Vector3::unit_z()
            };
            self.push(Arc::new(Light {
                name: format!("Implicit light {i}"),
                region: OnceCell::new(),
                pos,
                radius: 0.1, // mm, "point" source
                aim: -Vector3::unit_z(),
                angle: 180.0,
                cos_angle: -1.0,
                color: R::from_reflectance_rgb(shared, color),
                intensity: 1000.0,
                fraction: SharedFraction::new(-1.0),
                shadows: 0, // no shadows, for speed
                infinite: false,
                visible: false,
                invisible: true,
                explicit_aim: false,
                vec,
                implicit: true,
            }));
        }
    }

    /// Determines the relative intensity of each light source.
    ///
    /// The brightest single light is taken as the overload reference, and
    /// ambient light is assumed to contribute only half its intensity, to
    /// keep pictures reasonably bright within RGB dynamic range. Returns
    /// the number of lights usable by the shadework arrays.
    pub fn light_init(&self, ambient: f64) -> usize {
        let mut nlights = 0;
        let mut inten: f64 = 0.0;
        for lp in &self.lights {
            nlights += 1;
            if lp.fraction() > 0.0 {
                continue; // overridden
            }
            let li = if lp.intensity <= 0.0 {
                1.0 // keep non-negative
            } else {
                lp.intensity
            };
            if li > inten {
                inten = li;
            }
        }

        inten *= 1.0 + ambient * 0.5;

        for lp in &self.lights {
            if lp.fraction() > 0.0 {
                continue; // overridden
            }
            let li = if lp.intensity <= 0.0 { 1.0 } else { lp.intensity };
            lp.fraction.set(li / inten);
        }

        log::info!("Lighting: Ambient = {}%", (ambient * 100.0) as i32);
        for lp in &self.lights {
            log::info!(
                "  {}: {}, {}, {} lumens ({}%), halfang={}",
                lp.name,
                if lp.visible { "visible" } else { "invisible" },
                if lp.shadows != 0 {
                    "casts shadows"
                } else {
                    "no shadows"
                },
                lp.intensity,
                (lp.fraction() * 100.0) as i32,
                lp.angle,
            );
        }

        if nlights > MAX_LIGHTS {
            log::warn!("Number of lights limited to {MAX_LIGHTS}");
            nlights = MAX_LIGHTS;
        }
        nlights
    }

    /// Releases lights that the region teardown will not: implicit lights
    /// (no region), and lights whose region is gone or that were marked
    /// invisible.
    pub fn light_cleanup(&mut self) {
        self.lights
            .retain(|lp| !lp.implicit && lp.visible && lp.region_arc().is_some());
    }
}

impl<R: Radiance> Default for LightSet<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shader setup for the `"light"` material: builds the light record from
/// the region and inserts it into the light set.
///
/// Called once for each light-emitting region.
pub fn light_setup<R: Radiance>(
    def: &RegionDef,
    params: &ParamSet,
    ctx: &mut SetupCtx<'_, R>,
) -> Result<SetupOutcome<R>, SetupError> {
    let mut intensity = 1000.0; // lumens
    let mut fraction = -1.0; // recomputed later
    let mut visible = true; // explicitly modeled
    let mut shadows = 1; // by default, casts shadows
    let mut angle: f64 = 180.0; // spherical emission by default
    let mut infinite = false;
    let mut explicit_aim = false;
    let mut aim_target = Vector3::new(0.0, 0.0, 0.0);

    for (key, value) in params.pairs() {
        match key {
            "bright" | "b" | "inten" => intensity = value.as_f64()?,
            "angle" | "a" => angle = value.as_f64()?,
            "fract" | "f" => fraction = value.as_f64()?,
            "dir" | "d" | "aim" => {
                let v = value.as_vec3()?;
                aim_target = Vector3::new(v[0], v[1], v[2]);
                explicit_aim = true;
            }
            "shadows" | "s" => shadows = value.as_i32()?,
            "infinite" | "i" => infinite = value.as_bool()?,
            "visible" | "v" => visible = value.as_bool()?,
            "invisible" => visible = !value.as_bool()?,
            other => return Err(params.unknown("light", other).into()),
        }
    }

    let angle = angle.min(180.0);
    let cos_angle = angle.to_radians().cos();

    // Determine position and size from the region's solids.
    let (pos, radius) = geom::bounding_center_radius(ctx.solids).ok_or_else(|| {
        SetupError::NoSolids {
            region: def.name.clone(),
        }
    })?;
    if !radius.is_finite() || !pos.to_vec().magnitude2().is_finite() {
        return Err(SetupError::InfiniteLight {
            region: def.name.clone(),
        });
    }

    // The light is aimed down -Z in its local coordinate system, unless an
    // explicit aim point was given.
    let aim = if explicit_aim {
        (aim_target - pos.to_vec()).normalize()
    } else {
        ctx.to_model
            .transform_vector(-Vector3::unit_z())
            .normalize()
    };

    let color = match def.temperature {
        Some(temp) if temp > 0.0 => R::black_body(ctx.shared, temp),
        _ => R::from_reflectance_rgb(ctx.shared, def.color.unwrap_or(Rgb::ONE)),
    };

    let vec = if pos.to_vec().magnitude2() < 1e-20 {
        // light at the origin, make its direction vector up
        Vector3::unit_z()
    } else {
        pos.to_vec().normalize()
    };

    let light = Arc::new(Light {
        name: def.name.clone(),
        region: OnceCell::new(),
        pos,
        radius,
        aim,
        angle,
        cos_angle,
        color,
        intensity,
        fraction: SharedFraction::new(fraction),
        shadows,
        infinite,
        visible,
        invisible: !visible,
        explicit_aim,
        vec,
        implicit: false,
    });
    ctx.lights.push(Arc::clone(&light));

    if !visible {
        // Don't draw the light region; it is retained only so light
        // shading still has a target.
        return Ok(SetupOutcome::KeepInvisible(Shader::Light(light)));
    }
    Ok(SetupOutcome::Keep(Shader::Light(light)))
}

/// Renders a direct view of a light source.
///
/// A cosine term gives the source dimension and shape, but a plain cosine
/// looks dim; within the beam a `cos/2 + 0.5` term is used, and `cos/2`
/// outside it.
pub fn light_render<R: Radiance>(
    lp: &Light<R>,
    ctx: &RenderContext<R>,
    app: &Application<R>,
    sw: &mut Shadework<R>,
) {
    let mut f = -sw.hit.normal.dot(app.ray.direction) * 0.5;
    if f < 0.0 {
        f = 0.0;
    }

    // See if the surface normal falls within the beam direction.
    if lp.aim.dot(sw.hit.normal) < lp.cos_angle {
        // dark, outside of light beam area
        f *= lp.fraction();
    } else {
        f = (f + 0.5) * lp.fraction();
    }

    if sw.temperature > 0.0 {
        // A shader modified the temperature of the source.
        log::debug!(
            "light {} xy={},{} temp={}",
            lp.name,
            app.x,
            app.y,
            sw.temperature
        );
        sw.color = R::black_body(&ctx.shared, sw.temperature).scaled(f as f32);
    } else {
        sw.color = lp.color.scaled(f as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Sphere;
    use crate::kernel::Primitive;
    use crate::shaders::ShaderRegistry;
    use pretty_assertions::assert_eq;

    fn setup_light(spec: &str, solids: Vec<Arc<dyn Primitive>>) -> (LightSet<Rgb>, bool) {
        let registry: ShaderRegistry = ShaderRegistry::with_builtins();
        let def = RegionDef::new("LIGHT", spec).with_color(Rgb::new(1.0, 1.0, 0.9));
        let mut lights = LightSet::new();
        let mut ctx = SetupCtx {
            lights: &mut lights,
            shared: &(),
            solids: &solids,
            to_model: Matrix4::from_scale(1.0),
            reg_transmit: Rgb::ZERO,
        };
        let outcome = registry.setup(&def, &mut ctx).expect("light setup");
        let invisible = matches!(outcome, SetupOutcome::KeepInvisible(_));
        (lights, invisible)
    }

    fn ball() -> Vec<Arc<dyn Primitive>> {
        vec![Arc::new(Sphere::new(Point3::new(5.0, 0.0, 20.0), 2.0))]
    }

    #[test]
    fn setup_takes_position_from_solid() {
        let (lights, invisible) = setup_light("light", ball());
        assert!(!invisible);
        let lp = lights.iter().next().unwrap();
        assert_eq!(lp.pos, Point3::new(5.0, 0.0, 20.0));
        assert_eq!(lp.radius, 2.0);
        assert_eq!(lp.intensity, 1000.0);
        assert_eq!(lp.shadows, 1);
        assert!(lp.visible);
        assert_eq!(lp.color, Rgb::new(1.0, 1.0, 0.9));
    }

    #[test]
    fn invisible_light_keeps_region_undrawn() {
        let (lights, invisible) = setup_light("light invisible=1 s=3 b=500", ball());
        assert!(invisible);
        let lp = lights.iter().next().unwrap();
        assert!(!lp.visible && lp.invisible);
        assert_eq!(lp.shadows, 3);
        assert_eq!(lp.intensity, 500.0);
    }

    #[test]
    fn fractions_normalize_against_brightest_plus_ambient() {
        let (lights, _) = setup_light("light b=1000", ball());
        let mut lights = lights;
        // A second, dimmer light.
        let registry: ShaderRegistry = ShaderRegistry::with_builtins();
        let def = RegionDef::new("dim", "light b=250");
        let mut ctx = SetupCtx {
            lights: &mut lights,
            shared: &(),
            solids: &ball(),
            to_model: Matrix4::from_scale(1.0),
            reg_transmit: Rgb::ZERO,
        };
        registry.setup(&def, &mut ctx).unwrap();

        let n = lights.light_init(0.4);
        assert_eq!(n, 2);
        let fractions: Vec<f64> = lights.iter().map(|lp| lp.fraction()).collect();
        let expected_max = 1000.0 / (1000.0 * 1.2);
        assert!((fractions[0] - expected_max).abs() < 1e-12);
        assert!((fractions[1] - expected_max / 4.0).abs() < 1e-12);
        // Idempotent: a second init leaves the values untouched.
        lights.light_init(0.4);
        let again: Vec<f64> = lights.iter().map(|lp| lp.fraction()).collect();
        assert_eq!(fractions, again);
    }

    #[test]
    fn nonpositive_intensity_clamps_to_one() {
        let (lights, _) = setup_light("light b=0", ball());
        lights.light_init(0.0);
        let lp = lights.iter().next().unwrap();
        assert_eq!(lp.fraction(), 1.0);
    }

    #[test]
    fn light_maker_builds_canonical_lights() {
        let mut lights: LightSet = LightSet::new();
        lights.light_maker(3, Matrix4::from_scale(1.0), &());
        assert_eq!(lights.len(), 3);
        let all: Vec<&Arc<Light>> = lights.iter().collect();
        assert_eq!(all[0].color, Rgb::ONE);
        assert!(all.iter().all(|lp| lp.implicit && lp.invisible));
        assert!(all.iter().all(|lp| lp.shadows == 0));
        assert_eq!(all[2].pos, Point3::new(0.0, 1.0, -0.5));
    }

    #[test]
    fn cleanup_releases_implicit_lights() {
        let mut lights: LightSet = LightSet::new();
        lights.light_maker(2, Matrix4::from_scale(1.0), &());
        assert_eq!(lights.len(), 2);
        lights.light_cleanup();
        assert_eq!(lights.len(), 0);
    }
}
