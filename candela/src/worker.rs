// Copyright 2021-2024 the candela developers under the terms of the MIT License
// as detailed in the accompanying file README.md or <https://opensource.org/licenses/MIT>.

//! The self-dispatching worker pool.
//!
//! A frame's pixels form a work queue `[first, last]`; each worker
//! atomically reserves a chunk, renders those pixels, and comes back for
//! more until the queue is dry or the stop flag is raised. Chunk size is
//! picked once per frame from the amount of work and the worker count.
//! Statistics are thread-local and summed once the frame completes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom as _;
use rand::SeedableRng as _;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::context::{RenderContext, ThreadContext};
use crate::dispatch::{do_pixel, pattern_for};
use crate::framebuffer::FrameOutput;
use crate::kernel::RayStats;
use crate::radiance::Radiance;

/// Largest chunk handed to one worker at a time (a 512x512 tile).
const MAX_CHUNK: usize = 262_144;

/// Picks a chunk size that should keep every worker busy to the end:
/// large when work is abundant, shrinking to single pixels when it is
/// scarce. Target: each worker processes at least 8 chunks.
fn chunk_size(total_work: usize, hypersample: u32, nworkers: usize) -> usize {
    let one_eighth = (total_work * (hypersample as usize + 1) / 8).max(1);
    let mut chunk = MAX_CHUNK;
    while chunk > 1 && one_eighth <= nworkers * chunk {
        chunk /= 4;
    }
    chunk.max(1)
}

/// Renders pixels `first..=last` of the frame, in parallel.
///
/// Returns the summed ray statistics of all workers. `stop` may be set by
/// another thread to abandon the frame; workers notice at their next loop
/// iteration.
pub fn do_run<R: Radiance>(
    ctx: &RenderContext<R>,
    out: &FrameOutput<R>,
    pixmap: Option<&[u8]>,
    first: usize,
    last: usize,
    stop: &AtomicBool,
) -> RayStats {
    let nworkers = if ctx.view.nproc == 0 {
        std::thread::available_parallelism().map_or(1, |n| n.get())
    } else {
        ctx.view.nproc
    };
    let total = last.saturating_sub(first) + 1;
    let chunk = chunk_size(total, ctx.view.hypersample, nworkers);
    let cursor = AtomicUsize::new(0);

    // Random mode dispenses a fixed permutation of the pixel indices in
    // the same chunked manner. The permutation seed is fixed so that a
    // given frame is reproducible.
    let permutation: Option<Arc<Vec<usize>>> = if ctx.view.random_mode {
        let mut order: Vec<usize> = (first..=last).collect();
        order.shuffle(&mut Xoshiro256PlusPlus::seed_from_u64(ctx.curframe as u64));
        Some(Arc::new(order))
    } else {
        None
    };

    let mut totals = RayStats::default();
    if nworkers == 1 {
        // Serial case: one CPU does all the work.
        let mut tctx = ThreadContext::new(0);
        worker(ctx, out, pixmap, &mut tctx, &cursor, permutation.as_deref(), first, last, chunk, stop);
        totals.absorb(tctx.stats);
        return totals;
    }

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(nworkers);
        for cpu in 0..nworkers {
            let cursor = &cursor;
            let permutation = permutation.as_deref();
            handles.push(scope.spawn(move || {
                let mut tctx = ThreadContext::new(cpu);
                worker(ctx, out, pixmap, &mut tctx, cursor, permutation, first, last, chunk, stop);
                tctx.stats
            }));
        }
        for handle in handles {
            match handle.join() {
                Ok(stats) => totals.absorb(stats),
                Err(_) => log::error!("worker thread panicked; statistics lost"),
            }
        }
    });
    totals
}

/// One worker: repeatedly reserves a chunk of the queue and renders it.
#[allow(clippy::too_many_arguments)]
fn worker<R: Radiance>(
    ctx: &RenderContext<R>,
    out: &FrameOutput<R>,
    pixmap: Option<&[u8]>,
    tctx: &mut ThreadContext,
    cursor: &AtomicUsize,
    permutation: Option<&Vec<usize>>,
    first: usize,
    last: usize,
    chunk: usize,
    stop: &AtomicBool,
) {
    let total = last - first + 1;
    let pattern = pattern_for(ctx.view.hypersample);

    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let start = cursor.fetch_add(chunk, Ordering::Relaxed);
        if start >= total {
            return;
        }
        let end = (start + chunk).min(total);

        for offset in start..end {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let pixelnum = match permutation {
                Some(order) => order[offset],
                None if ctx.view.top_down => last - offset,
                None => first + offset,
            };
            do_pixel(ctx, tctx, out, pixmap, pattern, pixelnum);
        }
    }
}
