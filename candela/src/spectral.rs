// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Tabulated spectra for thermal rendering.
//!
//! A [`Spectrum`] is an array of per-wavelength-bin samples aligned to a
//! [`WavelengthTable`] shared by every spectrum in a rendering. The table is
//! constructed once per frame setup and is immutable afterward.

use std::sync::Arc;

use crate::math::Rgb;

/// Planck's first radiation constant, W·µm⁴/m² (2πhc²).
const PLANCK_C1: f64 = 3.741_771e8;
/// Planck's second radiation constant, µm·K (hc/k).
const PLANCK_C2: f64 = 1.438_776_9e4;

/// Nominal RGB band boundaries, nanometers. Blue below, red above.
const BLUE_GREEN_NM: f64 = 492.0;
const GREEN_RED_NM: f64 = 577.0;

/// The shared wavelength axis of all tabulated spectra in one rendering.
///
/// `edges` holds `nsamp + 1` bin boundaries in nanometers, ascending.
#[derive(Debug, PartialEq)]
pub struct WavelengthTable {
    edges: Box<[f64]>,
}

impl WavelengthTable {
    /// Constructs a table of `nsamp` equal-width bins spanning
    /// `lo_nm..hi_nm`.
    ///
    /// # Panics
    ///
    /// Panics if `nsamp` is zero or the range is empty; table parameters are
    /// configuration, validated at option-parsing time.
    pub fn new(nsamp: usize, lo_nm: f64, hi_nm: f64) -> Arc<Self> {
        assert!(nsamp > 0 && hi_nm > lo_nm, "degenerate wavelength table");
        let step = (hi_nm - lo_nm) / nsamp as f64;
        let edges = (0..=nsamp).map(|i| lo_nm + step * i as f64).collect();
        Arc::new(Self { edges })
    }

    /// Default table used by thermal views when no `spectrum` option is
    /// given: 20 bins over the visible range.
    pub fn visible() -> Arc<Self> {
        Self::new(20, 380.0, 720.0)
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.edges.len() - 1
    }

    /// Lower and upper edge of bin `i`, nanometers.
    #[inline]
    pub fn bin(&self, i: usize) -> (f64, f64) {
        (self.edges[i], self.edges[i + 1])
    }
}

/// A spectral radiance (or reflectance) curve sampled on a shared
/// [`WavelengthTable`].
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    table: Arc<WavelengthTable>,
    samples: Box<[f32]>,
}

impl Spectrum {
    /// A spectrum with every sample equal to `value`.
    pub fn constant(table: &Arc<WavelengthTable>, value: f32) -> Self {
        Self {
            table: Arc::clone(table),
            samples: vec![value; table.num_samples()].into(),
        }
    }

    /// Black-body emission at temperature `temp_k`, by Planck's law,
    /// integrated approximately over each bin (midpoint rule).
    ///
    /// Output units are W/(m²·µm) per bin midpoint; callers scale as needed.
    pub fn black_body(table: &Arc<WavelengthTable>, temp_k: f64) -> Self {
        let samples = (0..table.num_samples())
            .map(|i| {
                let (lo, hi) = table.bin(i);
                let um = (lo + hi) * 0.5 * 1e-3; // nm -> µm
                planck(um, temp_k) as f32
            })
            .collect();
        Self {
            table: Arc::clone(table),
            samples,
        }
    }

    /// A reflectance curve approximating the given RGB color: each bin takes
    /// the value of the RGB channel its midpoint falls within.
    pub fn reflectance_from_rgb(table: &Arc<WavelengthTable>, color: Rgb) -> Self {
        let samples = (0..table.num_samples())
            .map(|i| {
                let (lo, hi) = table.bin(i);
                let mid = (lo + hi) * 0.5;
                if mid < BLUE_GREEN_NM {
                    color.blue().into_inner()
                } else if mid < GREEN_RED_NM {
                    color.green().into_inner()
                } else {
                    color.red().into_inner()
                }
            })
            .collect();
        Self {
            table: Arc::clone(table),
            samples,
        }
    }

    #[inline]
    pub fn table(&self) -> &Arc<WavelengthTable> {
        &self.table
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn scale(&mut self, s: f32) {
        for v in self.samples.iter_mut() {
            *v *= s;
        }
    }

    /// Componentwise sum with another spectrum on the same table.
    pub fn add(&mut self, other: &Spectrum) {
        debug_assert_eq!(self.table, other.table);
        for (v, o) in self.samples.iter_mut().zip(other.samples.iter()) {
            *v += o;
        }
    }

    /// Componentwise product (filtering) with another spectrum.
    pub fn mul(&mut self, other: &Spectrum) {
        debug_assert_eq!(self.table, other.table);
        for (v, o) in self.samples.iter_mut().zip(other.samples.iter()) {
            *v *= o;
        }
    }

    pub fn sum(&self) -> f32 {
        self.samples.iter().sum()
    }

    /// Collapses the spectrum into a display RGB triple by averaging the
    /// bins that fall into each of the three nominal color bands, then
    /// normalizing against the spectrum's peak so that thermal images remain
    /// displayable regardless of absolute radiance scale.
    pub fn to_display_rgb(&self) -> Rgb {
        let mut acc = [0.0f64; 3];
        let mut count = [0u32; 3];
        for (i, &v) in self.samples.iter().enumerate() {
            let (lo, hi) = self.table.bin(i);
            let mid = (lo + hi) * 0.5;
            let band = if mid < BLUE_GREEN_NM {
                2
            } else if mid < GREEN_RED_NM {
                1
            } else {
                0
            };
            acc[band] += f64::from(v);
            count[band] += 1;
        }
        for (a, n) in acc.iter_mut().zip(count) {
            if n > 0 {
                *a /= f64::from(n);
            }
        }
        let peak = acc[0].max(acc[1]).max(acc[2]);
        if peak > 1.0 {
            for a in acc.iter_mut() {
                *a /= peak;
            }
        }
        Rgb::new(acc[0] as f32, acc[1] as f32, acc[2] as f32)
    }
}

/// Planck's law: spectral radiant exitance at wavelength `um` (micrometers)
/// and temperature `temp_k` (kelvin), W/(m²·µm).
fn planck(um: f64, temp_k: f64) -> f64 {
    if temp_k <= 0.0 {
        return 0.0;
    }
    PLANCK_C1 / (um.powi(5) * ((PLANCK_C2 / (um * temp_k)).exp() - 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn table_bins_are_contiguous() {
        let t = WavelengthTable::new(4, 400.0, 800.0);
        assert_eq!(t.num_samples(), 4);
        assert_eq!(t.bin(0), (400.0, 500.0));
        assert_eq!(t.bin(3), (700.0, 800.0));
    }

    #[test]
    fn black_body_hotter_is_brighter() {
        let t = WavelengthTable::visible();
        let cool = Spectrum::black_body(&t, 293.0);
        let hot = Spectrum::black_body(&t, 3000.0);
        assert!(hot.sum() > cool.sum());
        assert!(cool.sum() >= 0.0);
    }

    #[test]
    fn black_body_peak_shifts_blue_with_temperature() {
        // Wien displacement, qualitatively: the hotter body has relatively
        // more energy at the short-wavelength end.
        let t = WavelengthTable::new(10, 380.0, 720.0);
        let warm = Spectrum::black_body(&t, 2000.0);
        let hot = Spectrum::black_body(&t, 8000.0);
        let ratio = |s: &Spectrum| s.samples()[0] / s.samples()[9].max(1e-30);
        assert!(ratio(&hot) > ratio(&warm));
    }

    #[test]
    fn reflectance_matches_bands() {
        let t = WavelengthTable::new(3, 400.0, 700.0);
        // Bin midpoints: 450 (blue), 550 (green), 650 (red).
        let s = Spectrum::reflectance_from_rgb(&t, Rgb::new(0.9, 0.5, 0.1));
        assert_eq!(s.samples(), &[0.1, 0.5, 0.9]);
    }

    #[test]
    fn filtering_is_componentwise() {
        let t = WavelengthTable::new(3, 400.0, 700.0);
        let mut a = Spectrum::constant(&t, 0.5);
        let b = Spectrum::reflectance_from_rgb(&t, Rgb::new(1.0, 0.5, 0.0));
        a.mul(&b);
        assert_eq!(a.samples(), &[0.0, 0.25, 0.5]);
    }
}
