// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Temporal reprojection of a retained float frame.
//!
//! Before tracing a new FULLFLOAT frame, every valid pixel of the previous
//! frame is projected through the new view transform and splatted into the
//! current frame; pixels so covered are skipped by the tracer. A pure
//! function of `(prev_frame, model2view, curframe)`.

use cgmath::{Matrix4, Transform as _};

use crate::framebuffer::FloatPixel;
use crate::math::FreeCoordinate;
use crate::radiance::Radiance;

/// Screen-distance-squared limit (in pixels) a reprojected point may move
/// before it is discarded as unreliable.
const SCR_LIM_DIST_SQ: i64 = 100;

/// Reprojects `prev` into `curr` through `model2view`. Returns the number
/// of destination pixels covered.
///
/// `mode` 2 reprojects unconditionally; mode 1 applies the
/// quality-preserving heuristics (limited screen motion, age-spread cache
/// expiry).
pub fn reproject_frame<R: Radiance>(
    prev: &[FloatPixel<R>],
    curr: &mut [FloatPixel<R>],
    model2view: Matrix4<FreeCoordinate>,
    width: u32,
    height: u32,
    curframe: i32,
    mode: u8,
) -> usize {
    let mut count = 0;
    for ip in prev {
        if ip.frame < 0 {
            continue; // not valid
        }
        if ip.dist <= FreeCoordinate::NEG_INFINITY {
            continue; // was a miss
        }
        let view_pt = model2view.transform_point(ip.hitpt);

        // Convert from the -1..+1 view cube to pixel subscripts.
        let fx = (view_pt.x + 1.0) * 0.5 * f64::from(width);
        let fy = (view_pt.y + 1.0) * 0.5 * f64::from(height);
        if !fx.is_finite() || !fy.is_finite() || fx < 0.0 || fy < 0.0 {
            continue;
        }
        let ix = fx as i64;
        let iy = fy as i64;

        if mode != 2 {
            // Don't reproject a pixel that moved too far on screen.
            let dx = ix - i64::from(ip.x);
            let dy = iy - i64::from(ip.y);
            if dx * dx + dy * dy > SCR_LIM_DIST_SQ {
                continue;
            }
            // Don't reproject for too many frame-times; spread the expiry
            // ages so the cache doesn't die all at once.
            let agelim = ((iy + ix) & 0x3) + 4;
            if i64::from(curframe - ip.frame) >= agelim {
                continue;
            }
        }

        // 4-way splat around the landing point.
        for (sx, sy) in [(ix, iy), (ix + 1, iy), (ix + 1, iy + 1), (ix, iy + 1)] {
            if sx >= 0 && sy >= 0 && (sx as u32) < width && (sy as u32) < height {
                count += splat(ip, curr, sx as u32, sy as u32, width, view_pt.z, model2view);
            }
        }
    }
    count
}

/// Writes the reprojected value into the destination pixel, yielding to an
/// existing occupant nearer the eye. Returns 1 if a previously-empty pixel
/// became covered.
fn splat<R: Radiance>(
    ip: &FloatPixel<R>,
    curr: &mut [FloatPixel<R>],
    ix: u32,
    iy: u32,
    width: u32,
    new_view_z: FreeCoordinate,
    model2view: Matrix4<FreeCoordinate>,
) -> usize {
    let op = &mut curr[(iy * width + ix) as usize];
    let mut count = 1;
    if op.frame >= 0 {
        // Both distances from the current eye; larger view Z is nearer.
        let o_pt = model2view.transform_point(op.hitpt);
        if o_pt.z > new_view_z {
            return 0; // previous value is closer to the eye; leave it
        }
        count = 0; // already reprojected once, don't double-count
    }
    *op = ip.clone();
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Rgb;
    use cgmath::{Matrix4, Point3, SquareMatrix as _};

    fn seeded_pixel(x: u32, y: u32, frame: i32, hitpt: Point3<f64>) -> FloatPixel<Rgb> {
        FloatPixel {
            frame,
            color: [10, 20, 30],
            x,
            y,
            dist: 5.0,
            hitpt,
            region: None,
        }
    }

    /// Identity view: a 4x4 frame whose pixel (1, 1) saw a point that maps
    /// back onto pixel (1, 1).
    fn identity_setup() -> (Vec<FloatPixel<Rgb>>, Vec<FloatPixel<Rgb>>, Matrix4<f64>) {
        let mut prev: Vec<FloatPixel<Rgb>> = (0..16).map(|_| FloatPixel::unset()).collect();
        // view coords for pixel center (1,1) of a 4-wide frame: x = -0.25
        let hit = Point3::new(-0.25, -0.25, 0.5);
        prev[5] = seeded_pixel(1, 1, 3, hit);
        let curr: Vec<FloatPixel<Rgb>> = (0..16).map(|_| FloatPixel::unset()).collect();
        (prev, curr, Matrix4::identity())
    }

    #[test]
    fn reprojecting_into_itself_is_identity() {
        let (prev, mut curr, m2v) = identity_setup();
        let count = reproject_frame(&prev, &mut curr, m2v, 4, 4, 4, 1);
        // The 4-way splat lands on (1,1) and three neighbors.
        assert_eq!(count, 4);
        assert_eq!(curr[5].frame, 3); // source frame is preserved (aging)
        assert_eq!(curr[5].color, [10, 20, 30]);
        assert_eq!(curr[5].hitpt, prev[5].hitpt);
    }

    #[test]
    fn misses_and_unset_pixels_do_not_reproject() {
        let (mut prev, mut curr, m2v) = identity_setup();
        prev[5].dist = f64::NEG_INFINITY;
        assert_eq!(reproject_frame(&prev, &mut curr, m2v, 4, 4, 4, 1), 0);
        prev[5] = FloatPixel::unset();
        assert_eq!(reproject_frame(&prev, &mut curr, m2v, 4, 4, 4, 1), 0);
    }

    #[test]
    fn old_pixels_age_out_unless_forced() {
        let (prev, mut curr, m2v) = identity_setup();
        // agelim for (1,1)-ish splats is 4..8; frame 3 at curframe 40 is
        // far past any of them.
        assert_eq!(reproject_frame(&prev, &mut curr, m2v, 4, 4, 40, 1), 0);
        // Mode 2 ignores age.
        assert_eq!(reproject_frame(&prev, &mut curr, m2v, 4, 4, 40, 2), 4);
    }

    #[test]
    fn nearer_occupant_wins() {
        let (prev, mut curr, m2v) = identity_setup();
        // Occupy the landing pixel with a strictly nearer point (larger
        // view-space Z).
        curr[5] = seeded_pixel(1, 1, 2, Point3::new(-0.25, -0.25, 0.9));
        curr[5].color = [1, 1, 1];
        reproject_frame(&prev, &mut curr, m2v, 4, 4, 4, 1);
        assert_eq!(curr[5].color, [1, 1, 1], "nearer value must survive");
        // A farther occupant is replaced.
        curr[6] = seeded_pixel(2, 1, 2, Point3::new(0.25, -0.25, 0.1));
        reproject_frame(&prev, &mut curr, m2v, 4, 4, 4, 1);
        assert_eq!(curr[6].color, [10, 20, 30]);
    }
}
