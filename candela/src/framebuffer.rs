// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! Output buffering: how shaded ray colors become stored pixels.
//!
//! A frame renders in one of several buffer modes — immediate writes,
//! per-scanline buffers flushed as their last pixel lands, progressive
//! refinement, multi-sample accumulation, or a retained float frame that
//! supports temporal reprojection. Pixels arrive from many threads; the
//! scanline bookkeeping and the sink each sit behind their own lock, held
//! only for the brief critical sections.

pub mod reproject;

use std::io::{self, Seek, SeekFrom, Write};
use std::sync::Mutex;

use cgmath::Point3;

use crate::context::{RenderContext, ThreadContext};
use crate::kernel::{Application, Region};
use crate::math::FreeCoordinate;
use crate::radiance::Radiance;

use std::sync::Arc;

/// Buffering strategies for a frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufMode {
    /// Write each pixel immediately; no scanline buffers.
    Unbuf,
    /// One CPU per scanline; minimal contention on the line buffers.
    Scanline,
    /// Pixels arrive out of order; per-scanline countdown, flush at zero.
    Dynamic,
    /// Incremental refinement over `nlevel` passes at doubling resolution.
    Incr,
    /// Full-frame accumulation: the stored bytes always show the running
    /// average of the samples so far.
    Acc,
    /// Retain every shaded pixel as a float record for reprojection.
    FullFloat,
}

/// Destination for finished pixel bytes: a raw frame-buffer or file
/// stream. Raw output order is scanline-major, bottom-up.
pub trait PixelSink: Send {
    fn write_pixel(&mut self, x: u32, y: u32, pixel: [u8; 3]) -> io::Result<()>;
    fn write_scanline(&mut self, y: u32, bytes: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An in-memory sink; also the test observation point.
#[derive(Clone, Debug)]
pub struct MemorySink {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl MemorySink {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width * height * 3) as usize],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * self.width + x) * 3) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl PixelSink for MemorySink {
    fn write_pixel(&mut self, x: u32, y: u32, pixel: [u8; 3]) -> io::Result<()> {
        if x >= self.width || y >= self.height {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "out of frame"));
        }
        let i = ((y * self.width + x) * 3) as usize;
        self.data[i..i + 3].copy_from_slice(&pixel);
        Ok(())
    }

    fn write_scanline(&mut self, y: u32, bytes: &[u8]) -> io::Result<()> {
        let i = (y * self.width * 3) as usize;
        self.data[i..i + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// A sink shared between the renderer and an outside observer (tests,
/// incremental previews).
pub struct SharedSink<S: PixelSink> {
    inner: Arc<Mutex<S>>,
}

impl<S: PixelSink> SharedSink<S> {
    /// Wraps `sink`, returning the sink handle to give the renderer and a
    /// second handle for observation.
    pub fn new(sink: S) -> (Self, Arc<Mutex<S>>) {
        let inner = Arc::new(Mutex::new(sink));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            inner,
        )
    }
}

impl<S: PixelSink> PixelSink for SharedSink<S> {
    fn write_pixel(&mut self, x: u32, y: u32, pixel: [u8; 3]) -> io::Result<()> {
        self.inner.lock().unwrap().write_pixel(x, y, pixel)
    }
    fn write_scanline(&mut self, y: u32, bytes: &[u8]) -> io::Result<()> {
        self.inner.lock().unwrap().write_scanline(y, bytes)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap().flush()
    }
}

/// Writes raw R,G,B byte triples at seek offsets, for `.pix`-style streams.
pub struct StreamSink<W: Write + Seek + Send> {
    writer: W,
    width: u32,
}

impl<W: Write + Seek + Send> StreamSink<W> {
    pub fn new(writer: W, width: u32) -> Self {
        Self { writer, width }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Seek + Send> PixelSink for StreamSink<W> {
    fn write_pixel(&mut self, x: u32, y: u32, pixel: [u8; 3]) -> io::Result<()> {
        self.writer
            .seek(SeekFrom::Start(u64::from(y * self.width + x) * 3))?;
        self.writer.write_all(&pixel)
    }

    fn write_scanline(&mut self, y: u32, bytes: &[u8]) -> io::Result<()> {
        self.writer
            .seek(SeekFrom::Start(u64::from(y * self.width) * 3))?;
        self.writer.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// One scanline's buffer: pixels remaining and the lazily-allocated bytes.
#[derive(Debug, Default)]
pub struct Scanline {
    pub left: u32,
    pub buf: Option<Box<[u8]>>,
}

/// One retained shaded pixel of a float frame.
#[derive(Clone, Debug)]
pub struct FloatPixel<R: Radiance> {
    /// Frame number this value was traced in; -1 = not computed.
    pub frame: i32,
    pub color: [u8; 3],
    pub x: u32,
    pub y: u32,
    /// Distance to the hit; `-INFINITY` marks a miss.
    pub dist: FreeCoordinate,
    pub hitpt: Point3<FreeCoordinate>,
    pub region: Option<Arc<Region<R>>>,
}

impl<R: Radiance> FloatPixel<R> {
    pub fn unset() -> Self {
        Self {
            frame: -1,
            color: [0; 3],
            x: 0,
            y: 0,
            dist: 0.0,
            hitpt: Point3::new(0.0, 0.0, 0.0),
            region: None,
        }
    }
}

/// The current and previous retained frames for FULLFLOAT mode.
pub struct FloatFrames<R: Radiance> {
    pub curr: Vec<FloatPixel<R>>,
    pub prev: Option<Vec<FloatPixel<R>>>,
}

/// The output half of a frame in flight.
pub struct FrameOutput<R: Radiance> {
    pub mode: BufMode,
    width: u32,
    height: u32,
    /// Current incremental level (1-based) and level count.
    pub incr_level: u32,
    pub incr_nlevel: u32,
    /// Sample count so far in accumulation mode, including the one being
    /// rendered.
    pub full_incr_sample: u32,
    scanlines: Mutex<Box<[Scanline]>>,
    /// Running floating-point partial sums for accumulation mode.
    psum: Mutex<Vec<f32>>,
    pub floats: Mutex<FloatFrames<R>>,
    sink: Mutex<Box<dyn PixelSink>>,
}

impl<R: Radiance> FrameOutput<R> {
    pub fn new(mode: BufMode, width: u32, height: u32, sink: Box<dyn PixelSink>) -> Self {
        let scanlines: Box<[Scanline]> = (0..height).map(|_| Scanline::default()).collect();
        let psum = if mode == BufMode::Acc {
            vec![0.0f32; (width * height * 3) as usize]
        } else {
            Vec::new()
        };
        let floats = FloatFrames {
            curr: if mode == BufMode::FullFloat {
                vec![FloatPixel::unset(); (width * height) as usize]
            } else {
                Vec::new()
            },
            prev: None,
        };
        Self {
            mode,
            width,
            height,
            incr_level: 0,
            incr_nlevel: 0,
            full_incr_sample: 1,
            scanlines: Mutex::new(scanlines),
            psum: Mutex::new(psum),
            floats: Mutex::new(floats),
            sink: Mutex::new(sink),
        }
    }

    /// Resets every scanline's remaining-pixel counter for a plain pass
    /// over `(xspan, yrange)`.
    pub fn reset_scanlines(&mut self, xspan: u32, yrange: std::ops::RangeInclusive<u32>) {
        let scanlines = self.scanlines.get_mut().unwrap();
        for (y, sl) in scanlines.iter_mut().enumerate() {
            sl.left = if yrange.contains(&(y as u32)) { xspan } else { 0 };
            sl.buf = None;
        }
    }

    /// Sets up the scanline counters for one incremental pass: only every
    /// `2^(nlevel-level)`-th scanline accumulates, and even rows were half
    /// computed by the previous pass.
    pub fn reset_scanlines_incr(&mut self, level: u32, nlevel: u32) {
        self.incr_level = level;
        self.incr_nlevel = nlevel;
        let rows = 1u32 << level;
        let stride = 1u32 << (nlevel - level);
        let scanlines = self.scanlines.get_mut().unwrap();
        for sl in scanlines.iter_mut() {
            sl.left = 0;
            sl.buf = None;
        }
        for i in 0..rows {
            let y = (i * stride) as usize;
            if y >= scanlines.len() {
                break;
            }
            scanlines[y].left = if i % 2 == 0 { rows / 2 } else { rows };
        }
    }

    /// Swaps in a new sink for the next frame, keeping the retained
    /// buffers.
    pub fn replace_sink(&mut self, sink: Box<dyn PixelSink>) {
        *self.sink.get_mut().unwrap() = sink;
    }

    /// Runs `f` with the sink lock held.
    pub fn with_sink<T>(&self, f: impl FnOnce(&mut dyn PixelSink) -> T) -> T {
        let mut sink = self.sink.lock().unwrap();
        f(sink.as_mut())
    }

    /// Retires the current frame: flushes FULLFLOAT content, and swaps the
    /// float frames so the next frame can reproject from this one.
    pub fn end_frame(&mut self, reproject_mode: u8) {
        if self.mode == BufMode::FullFloat {
            {
                let floats = self.floats.get_mut().unwrap();
                let mut line = vec![0u8; (self.width * 3) as usize];
                let mut sink = self.sink.lock().unwrap();
                for y in 0..self.height {
                    for x in 0..self.width {
                        let fp = &floats.curr[(y * self.width + x) as usize];
                        line[(x * 3) as usize..(x * 3 + 3) as usize]
                            .copy_from_slice(&fp.color);
                    }
                    let _ = sink.write_scanline(y, &line);
                }
            }
            if reproject_mode != 2 {
                let floats = self.floats.get_mut().unwrap();
                let old_prev = floats.prev.take();
                let curr = std::mem::replace(
                    &mut floats.curr,
                    old_prev.unwrap_or_else(|| {
                        vec![FloatPixel::unset(); (self.width * self.height) as usize]
                    }),
                );
                floats.prev = Some(curr);
            }
        }
        let mut sink = self.sink.lock().unwrap();
        let _ = sink.flush();
    }

    /// True if the FULLFLOAT pixel is already covered by a fresh
    /// reprojection and need not be traced.
    pub fn fullfloat_covered(&self, x: u32, y: u32) -> bool {
        if self.mode != BufMode::FullFloat {
            return false;
        }
        let floats = self.floats.lock().unwrap();
        floats.curr[(y * self.width + x) as usize].frame >= 0
    }
}

/// Converts the application's accumulated color to output bytes: gamma
/// correction, anti-banding dither, the background/non-background
/// distinction, and the never-pure-black rule.
fn pixel_bytes<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    app: &Application<R>,
) -> [u8; 3] {
    if !app.hit {
        // Shot missed the model; don't dither the background.
        return ctx.ibackground;
    }

    let color = app.color.to_display_rgb();
    let channels = [
        color.red().into_inner(),
        color.green().into_inner(),
        color.blue().into_inner(),
    ];
    let mut out = [0u8; 3];
    for (slot, c) in out.iter_mut().zip(channels) {
        // Color dither prevents banding; integer-valued colors retain
        // their values because the noise is in [0, 1).
        let dither = if ctx.options.benchmark {
            0.0
        } else {
            tctx.rand0to1()
        };
        let v = if ctx.options.gamma > 0.0 {
            // Gamma-correct in floating point to avoid Mach bands in the
            // dark end.
            (f64::from(c).powf(1.0 / ctx.options.gamma) * 255.0 + dither + 0.5).floor()
        } else {
            f64::from(c) * 255.0 + dither
        };
        *slot = v.clamp(0.0, 255.0) as u8;
    }

    if out == ctx.ibackground {
        out = ctx.inonbackground;
    }
    // Make sure a hit is never perfect black.
    if out == [0, 0, 0] && !ctx.options.benchmark {
        out[2] = 1;
    }
    out
}

/// Arranges for a finished pixel to be output according to the frame's
/// buffer mode.
pub fn view_pixel<R: Radiance>(
    ctx: &RenderContext<R>,
    tctx: &mut ThreadContext,
    out: &FrameOutput<R>,
    app: &Application<R>,
) {
    let bytes = pixel_bytes(ctx, tctx, app);
    let (x, y) = (app.x, app.y);

    match out.mode {
        BufMode::FullFloat => {
            let mut floats = out.floats.lock().unwrap();
            let width = out.width;
            let i = (y * width + x) as usize;
            {
                let fp = &mut floats.curr[i];
                fp.frame = ctx.curframe;
                fp.color = bytes;
                fp.x = x;
                fp.y = y;
                if !app.hit {
                    fp.dist = FreeCoordinate::NEG_INFINITY;
                    fp.frame = -1; // don't cache misses
                    return;
                }
                fp.dist = app.dist;
                fp.hitpt = app.ray.at(app.dist);
                fp.region = app.hit_region.clone();
            }
            // The pixel to the right may be a reprojected value from a
            // different region; if so it is probably stale now.
            if x >= width - 1 {
                return;
            }
            let this_region = floats.curr[i].region.clone();
            let next = &mut floats.curr[i + 1];
            if next.frame <= 0 {
                return; // not valid; will be recomputed anyway
            }
            let same = match (&this_region, &next.region) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if !same {
                next.frame = -1;
            }
        }

        BufMode::Unbuf => {
            if ctx.options.overlay && !app.hit {
                return;
            }
            out.with_sink(|sink| {
                if let Err(e) = sink.write_pixel(x, y, bytes) {
                    log::error!("pixel write error: {e}");
                }
            });
        }

        BufMode::Dynamic | BufMode::Scanline => {
            let flush = {
                let mut scanlines = out.scanlines.lock().unwrap();
                let sl = &mut scanlines[y as usize];
                let buf = sl
                    .buf
                    .get_or_insert_with(|| vec![0u8; (out.width * 3) as usize].into());
                buf[(x * 3) as usize..(x * 3 + 3) as usize].copy_from_slice(&bytes);
                sl.left = sl.left.saturating_sub(1);
                sl.left == 0
            };
            if flush {
                flush_scanline(out, y);
            }
        }

        BufMode::Incr => {
            let spread = 1u32 << (out.incr_nlevel - out.incr_level);
            let flush = {
                let mut scanlines = out.scanlines.lock().unwrap();
                for dy in 0..spread {
                    if y + dy >= out.height {
                        break;
                    }
                    let sl = &mut scanlines[(y + dy) as usize];
                    let buf = sl
                        .buf
                        .get_or_insert_with(|| vec![0u8; (out.width * 3) as usize].into());
                    for dx in 0..spread {
                        if x + dx >= out.width {
                            break;
                        }
                        let o = ((x + dx) * 3) as usize;
                        buf[o..o + 3].copy_from_slice(&bytes);
                    }
                }
                // The first few incremental iterations are boring.
                if out.incr_level > 3 {
                    let sl = &mut scanlines[y as usize];
                    sl.left = sl.left.saturating_sub(1);
                    sl.left == 0
                } else {
                    false
                }
            };
            if flush {
                let spread = spread.min(out.height - y);
                for dy in (0..spread).rev() {
                    flush_incr_row(out, y + dy);
                }
            }
        }

        BufMode::Acc => {
            let display = app.color.to_display_rgb();
            let sample_color = [
                display.red().into_inner(),
                display.green().into_inner(),
                display.blue().into_inner(),
            ];
            let flush = {
                let mut psum = out.psum.lock().unwrap();
                let mut scanlines = out.scanlines.lock().unwrap();
                let sl = &mut scanlines[y as usize];
                let buf = sl
                    .buf
                    .get_or_insert_with(|| vec![0u8; (out.width * 3) as usize].into());
                let base = ((y * out.width + x) * 3) as usize;
                for c in 0..3 {
                    psum[base + c] += sample_color[c];
                    let avg = psum[base + c] * 255.0 / out.full_incr_sample as f32 + 0.5;
                    buf[(x * 3) as usize + c] = avg.clamp(0.0, 255.0) as u8;
                }
                sl.left = sl.left.saturating_sub(1);
                sl.left == 0
            };
            if flush {
                flush_scanline(out, y);
            }
        }
    }
}

/// Flushes a completed scanline to the sink and frees its buffer. Once
/// flushed, every pixel in the line is final for this frame.
fn flush_scanline<R: Radiance>(out: &FrameOutput<R>, y: u32) {
    let buf = {
        let mut scanlines = out.scanlines.lock().unwrap();
        let sl = &mut scanlines[y as usize];
        if out.mode == BufMode::Acc {
            // Accumulation keeps its buffer: later samples rewrite it.
            sl.buf.clone()
        } else {
            sl.buf.take()
        }
    };
    if let Some(buf) = buf {
        out.with_sink(|sink| {
            if let Err(e) = sink.write_scanline(y, &buf) {
                log::error!("scanline write error: {e}");
            }
        });
    }
}

fn flush_incr_row<R: Radiance>(out: &FrameOutput<R>, y: u32) {
    let buf = {
        let scanlines = out.scanlines.lock().unwrap();
        scanlines[y as usize].buf.clone()
    };
    if let Some(buf) = buf {
        out.with_sink(|sink| {
            if let Err(e) = sink.write_scanline(y, &buf) {
                log::error!("scanline write error: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn memory_sink_addressing() {
        let mut sink = MemorySink::new(4, 2);
        sink.write_pixel(3, 1, [9, 8, 7]).unwrap();
        assert_eq!(sink.pixel(3, 1), [9, 8, 7]);
        sink.write_scanline(0, &[1; 12]).unwrap();
        assert_eq!(sink.pixel(0, 0), [1, 1, 1]);
        assert!(sink.write_pixel(4, 0, [0; 3]).is_err());
    }

    #[test]
    fn stream_sink_is_scanline_major() {
        let cursor = std::io::Cursor::new(vec![0u8; 4 * 2 * 3]);
        let mut sink = StreamSink::new(cursor, 4);
        sink.write_pixel(1, 1, [5, 6, 7]).unwrap();
        let data = sink.into_inner().into_inner();
        assert_eq!(&data[(4 + 1) * 3..(4 + 2) * 3], &[5, 6, 7]);
    }

    #[test]
    fn incr_counters_follow_level_parity() {
        let sink = MemorySink::new(8, 8);
        let mut out: FrameOutput<crate::math::Rgb> =
            FrameOutput::new(BufMode::Incr, 8, 8, Box::new(sink));
        out.reset_scanlines_incr(2, 3);
        let scanlines = out.scanlines.get_mut().unwrap();
        // level 2 of 3: rows 0, 2, 4, 6 active; evens halved.
        assert_eq!(scanlines[0].left, 2);
        assert_eq!(scanlines[2].left, 4);
        assert_eq!(scanlines[4].left, 2);
        assert_eq!(scanlines[6].left, 4);
        assert_eq!(scanlines[1].left, 0);
    }
}
