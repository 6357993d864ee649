// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Mathematical utilities: coordinates, colors, and small vector helpers
//! shared by the whole shading pipeline.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub};

use cgmath::{InnerSpace as _, Vector3};
pub use ordered_float::NotNan;

/// Coordinates that are not locked to the pixel grid: world distances in
/// millimeters, ray parameters, matrix elements.
pub type FreeCoordinate = f64;

/// Construct a [`Rgb`] value with compile-time checking of the components.
///
/// Only literal values may be used, so the `NotNan` invariant cannot be
/// violated at run time.
#[macro_export]
macro_rules! rgb_const {
    ($r:literal, $g:literal, $b:literal) => {
        $crate::math::Rgb::new_nn(
            // SAFETY: Only literal values are allowed, which will be
            // evaluated at compile time; a NaN literal is a compile error
            // in practice and a programmer error in principle.
            unsafe { $crate::math::NotNan::new_unchecked($r) },
            unsafe { $crate::math::NotNan::new_unchecked($g) },
            unsafe { $crate::math::NotNan::new_unchecked($b) },
        )
    };
}

/// A floating-point RGB color value, with components in nominal range 0 to 1
/// (but not clamped; shading intermediates may exceed 1).
///
/// Components are [`NotNan`] so that color arithmetic cannot silently
/// introduce NaN into the output image.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Rgb(Vector3<NotNan<f32>>);

impl Rgb {
    /// Black.
    pub const ZERO: Rgb = rgb_const!(0.0, 0.0, 0.0);
    /// White (unity radiance; the neutral element of filtering).
    pub const ONE: Rgb = rgb_const!(1.0, 1.0, 1.0);

    /// Constructs a color from components, panicking if any is NaN.
    ///
    /// Intended primarily for constants and tests; shading code should
    /// prefer arithmetic on existing values or [`Rgb::try_from`].
    #[track_caller]
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self::try_from(Vector3::new(r, g, b)).expect("color component out of range (NaN)")
    }

    /// Constructs a color from components that are already [`NotNan`].
    pub const fn new_nn(r: NotNan<f32>, g: NotNan<f32>, b: NotNan<f32>) -> Self {
        Self(Vector3::new(r, g, b))
    }

    #[inline]
    pub fn red(self) -> NotNan<f32> {
        self.0.x
    }
    #[inline]
    pub fn green(self) -> NotNan<f32> {
        self.0.y
    }
    #[inline]
    pub fn blue(self) -> NotNan<f32> {
        self.0.z
    }

    /// Sum of the components; the light-transport code uses this as its
    /// "is any energy left" test.
    #[inline]
    pub fn sum(self) -> f32 {
        self.0.x.into_inner() + self.0.y.into_inner() + self.0.z.into_inner()
    }

    /// Componentwise clamp to the closed range `[low, high]`.
    #[must_use]
    pub fn clamp(self, low: f32, high: f32) -> Self {
        Self(self.0.map(|c| {
            // clamp() cannot produce NaN from non-NaN inputs
            NotNan::new(c.into_inner().clamp(low, high)).unwrap_or(c)
        }))
    }

    /// Componentwise multiplication (filtering one color by another).
    #[inline]
    #[must_use]
    pub fn filter(self, other: Rgb) -> Self {
        Self(Vector3::new(
            self.0.x * other.0.x,
            self.0.y * other.0.y,
            self.0.z * other.0.z,
        ))
    }

    /// Maps each component through `f`.
    #[must_use]
    pub fn map(self, mut f: impl FnMut(f32) -> f32) -> Self {
        Self::new(
            f(self.0.x.into_inner()),
            f(self.0.y.into_inner()),
            f(self.0.z.into_inner()),
        )
    }
}

impl fmt::Debug for Rgb {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "Rgb({:?}, {:?}, {:?})",
            self.red().into_inner(),
            self.green().into_inner(),
            self.blue().into_inner()
        )
    }
}

impl From<Rgb> for Vector3<f32> {
    #[inline]
    fn from(color: Rgb) -> Self {
        color.0.map(NotNan::into_inner)
    }
}

impl TryFrom<Vector3<f32>> for Rgb {
    type Error = ordered_float::FloatIsNan;
    #[inline]
    fn try_from(value: Vector3<f32>) -> Result<Self, Self::Error> {
        Ok(Self(Vector3::new(
            value.x.try_into()?,
            value.y.try_into()?,
            value.z.try_into()?,
        )))
    }
}

impl Add<Rgb> for Rgb {
    type Output = Rgb;
    #[inline]
    fn add(self, other: Rgb) -> Rgb {
        Rgb(self.0 + other.0)
    }
}
impl AddAssign<Rgb> for Rgb {
    #[inline]
    fn add_assign(&mut self, other: Rgb) {
        self.0 += other.0;
    }
}
impl Sub<Rgb> for Rgb {
    type Output = Rgb;
    #[inline]
    fn sub(self, other: Rgb) -> Rgb {
        Rgb(self.0 - other.0)
    }
}
/// Multiplies two color values componentwise.
impl Mul<Rgb> for Rgb {
    type Output = Rgb;
    #[inline]
    fn mul(self, other: Rgb) -> Rgb {
        self.filter(other)
    }
}
/// Scales the color by a scalar (panics on NaN scale).
impl Mul<f32> for Rgb {
    type Output = Rgb;
    #[inline]
    #[track_caller]
    fn mul(self, scale: f32) -> Rgb {
        let scale = NotNan::new(scale).expect("multiplying color by NaN");
        Rgb(self.0.map(|c| c * scale))
    }
}
impl Sum for Rgb {
    fn sum<I: Iterator<Item = Rgb>>(iter: I) -> Self {
        iter.fold(Rgb::ZERO, Add::add)
    }
}

/// Constructs a right-handed orthonormal frame `(x_axis, y_axis)`
/// perpendicular to the given axis.
///
/// The axis need not be unit length, but must be nonzero. Used to build the
/// cross-plane of a light source for penumbra sampling and the tangent plane
/// at a hit point for ambient occlusion.
pub fn ortho_frame(axis: Vector3<FreeCoordinate>) -> (Vector3<FreeCoordinate>, Vector3<FreeCoordinate>) {
    let axis = axis.normalize();
    // Pick the coordinate axis most orthogonal to `axis` as the seed.
    let seed = if axis.x.abs() <= axis.y.abs() && axis.x.abs() <= axis.z.abs() {
        Vector3::unit_x()
    } else if axis.y.abs() <= axis.z.abs() {
        Vector3::unit_y()
    } else {
        Vector3::unit_z()
    };
    let x_axis = axis.cross(seed).normalize();
    let y_axis = axis.cross(x_axis);
    (x_axis, y_axis)
}

/// Raises `base` to a small non-negative integer power.
///
/// Phong specular exponents are small integers; repeated multiplication is
/// both faster and better behaved than `powf` for that range. Out-of-range
/// exponents are logged and treated as the identity.
pub fn ipow(base: f64, exponent: i32) -> f64 {
    if base < 1e-8 {
        return 0.0;
    }
    if !(0..=200).contains(&exponent) {
        log::warn!("ipow({base}, {exponent}) exponent out of range");
        return base;
    }
    let mut result = 1.0;
    for _ in 0..exponent {
        result *= base;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Zero as _;
    use pretty_assertions::assert_eq;

    #[test]
    fn rgb_arithmetic() {
        let a = Rgb::new(0.25, 0.5, 1.0);
        let b = Rgb::new(0.5, 0.5, 0.5);
        assert_eq!(a + b, Rgb::new(0.75, 1.0, 1.5));
        assert_eq!(a * b, Rgb::new(0.125, 0.25, 0.5));
        assert_eq!(a * 2.0, Rgb::new(0.5, 1.0, 2.0));
        assert_eq!((a * 2.0).clamp(0.0, 1.0), Rgb::new(0.5, 1.0, 1.0));
    }

    #[test]
    fn rgb_sum_matches_components() {
        assert_eq!(Rgb::new(0.1, 0.2, 0.3).sum(), 0.1 + 0.2 + 0.3);
        assert_eq!(Rgb::ZERO.sum(), 0.0);
    }

    #[test]
    fn ortho_frame_is_orthonormal() {
        for axis in [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(-5.0, 0.1, 0.0),
        ] {
            let (x, y) = ortho_frame(axis);
            let axis = axis.normalize();
            assert!(x.dot(axis).abs() < 1e-12);
            assert!(y.dot(axis).abs() < 1e-12);
            assert!(x.dot(y).abs() < 1e-12);
            assert!((x.magnitude() - 1.0).abs() < 1e-12);
            assert!((y.magnitude() - 1.0).abs() < 1e-12);
            assert!(!x.is_zero() && !y.is_zero());
        }
    }

    #[test]
    fn ipow_small_cases() {
        assert_eq!(ipow(2.0, 10), 1024.0);
        assert_eq!(ipow(0.5, 2), 0.25);
        assert_eq!(ipow(0.0, 3), 0.0);
    }
}
