// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The color carrier abstraction.
//!
//! The renderer can run either on plain RGB triples or on tabulated spectra
//! (for thermal imaging); the choice is a type parameter on the shading
//! pipeline rather than a runtime branch. [`Radiance`] is the operation set
//! both carriers provide. [`Rgb`] is the default carrier throughout.

use std::fmt::Debug;
use std::sync::Arc;

use crate::math::Rgb;
use crate::spectral::{Spectrum, WavelengthTable};

/// Operations required of a color carrier by the shading pipeline.
///
/// `Shared` is whatever immutable context new values must be allocated
/// against: nothing for RGB, the wavelength table for spectra.
pub trait Radiance: Clone + Debug + PartialEq + Send + Sync + 'static {
    type Shared: Clone + Debug + Send + Sync;

    /// A carrier with every channel equal to `value`.
    fn constant(shared: &Self::Shared, value: f32) -> Self;

    /// Black-body emission at `temp_k` kelvin. For RGB this is a normalized
    /// chromaticity approximation; for spectra it is Planck's law.
    fn black_body(shared: &Self::Shared, temp_k: f64) -> Self;

    /// A reflectance carrier approximating the given RGB color.
    fn from_reflectance_rgb(shared: &Self::Shared, color: Rgb) -> Self;

    fn scale(&mut self, s: f32);
    fn add_assign(&mut self, other: &Self);
    /// Componentwise product: filtering by a transmission color.
    fn mul_assign(&mut self, other: &Self);

    /// Channel sum, used for "any energy left?" attenuation thresholds.
    fn sum(&self) -> f32;

    /// Collapse to a displayable RGB triple.
    fn to_display_rgb(&self) -> Rgb;

    #[must_use]
    fn scaled(&self, s: f32) -> Self {
        let mut out = self.clone();
        out.scale(s);
        out
    }

    #[must_use]
    fn filtered(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.mul_assign(other);
        out
    }
}

impl Radiance for Rgb {
    type Shared = ();

    fn constant(_: &(), value: f32) -> Self {
        Rgb::new(value, value, value)
    }

    fn black_body(_: &(), temp_k: f64) -> Self {
        black_body_rgb(temp_k)
    }

    fn from_reflectance_rgb(_: &(), color: Rgb) -> Self {
        color
    }

    fn scale(&mut self, s: f32) {
        *self = *self * s;
    }

    fn add_assign(&mut self, other: &Self) {
        *self += *other;
    }

    fn mul_assign(&mut self, other: &Self) {
        *self = self.filter(*other);
    }

    fn sum(&self) -> f32 {
        Rgb::sum(*self)
    }

    fn to_display_rgb(&self) -> Rgb {
        *self
    }
}

impl Radiance for Spectrum {
    type Shared = Arc<WavelengthTable>;

    fn constant(shared: &Self::Shared, value: f32) -> Self {
        Spectrum::constant(shared, value)
    }

    fn black_body(shared: &Self::Shared, temp_k: f64) -> Self {
        Spectrum::black_body(shared, temp_k)
    }

    fn from_reflectance_rgb(shared: &Self::Shared, color: Rgb) -> Self {
        Spectrum::reflectance_from_rgb(shared, color)
    }

    fn scale(&mut self, s: f32) {
        Spectrum::scale(self, s);
    }

    fn add_assign(&mut self, other: &Self) {
        Spectrum::add(self, other);
    }

    fn mul_assign(&mut self, other: &Self) {
        Spectrum::mul(self, other);
    }

    fn sum(&self) -> f32 {
        Spectrum::sum(self)
    }

    fn to_display_rgb(&self) -> Rgb {
        Spectrum::to_display_rgb(self)
    }
}

/// Normalized black-body chromaticity for the RGB carrier.
///
/// A coarse piecewise fit is entirely adequate here: RGB renderings use this
/// only to tint light sources and shadework temperatures, and the result is
/// normalized so intensity is carried separately.
fn black_body_rgb(temp_k: f64) -> Rgb {
    let t = temp_k.clamp(1000.0, 12000.0);
    // Red: full below 6600 K, falling above.
    let r = if t <= 6600.0 {
        1.0
    } else {
        (1.2929 * ((t - 6000.0) / 100.0).powf(-0.1332)).clamp(0.0, 1.0)
    };
    // Green: logarithmic rise to 6600 K, falling above.
    let g = if t <= 6600.0 {
        (0.3900 * (t / 100.0).ln() - 0.6318).clamp(0.0, 1.0)
    } else {
        (1.1299 * ((t - 6000.0) / 100.0).powf(-0.0755)).clamp(0.0, 1.0)
    };
    // Blue: zero below 1900 K, logarithmic rise to 6600 K, full above.
    let b = if t >= 6600.0 {
        1.0
    } else if t <= 1900.0 {
        0.0
    } else {
        (0.5432 * ((t - 1000.0) / 100.0).ln() - 1.1962).clamp(0.0, 1.0)
    };
    Rgb::new(r as f32, g as f32, b as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_carrier_ops() {
        let mut c = Rgb::constant(&(), 0.5);
        c.add_assign(&Rgb::new(0.5, 0.0, 0.0));
        c.mul_assign(&Rgb::new(1.0, 0.5, 0.0));
        assert_eq!(c, Rgb::new(1.0, 0.25, 0.0));
        assert_eq!(c.to_display_rgb(), c);
    }

    #[test]
    fn black_body_rgb_is_warm_then_cool() {
        let candle = black_body_rgb(1800.0);
        let daylight = black_body_rgb(6500.0);
        let sky = black_body_rgb(10000.0);
        // A candle flame is red-heavy, the blue sky is blue-heavy.
        assert!(candle.red() > candle.blue());
        assert!(sky.blue() > sky.red());
        assert!(daylight.green() > candle.green());
    }

    #[test]
    fn spectral_carrier_round_trips_through_trait() {
        let table = WavelengthTable::visible();
        let mut s = Spectrum::constant(&table, 1.0);
        let filt = Spectrum::from_reflectance_rgb(&table, Rgb::new(0.0, 0.0, 1.0));
        s.mul_assign(&filt);
        // A pure-blue filter leaves energy only in the blue band.
        let rgb = s.to_display_rgb();
        assert!(rgb.blue().into_inner() > 0.0);
        assert_eq!(rgb.red().into_inner(), 0.0);
    }
}
