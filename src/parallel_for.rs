//! Data-parallel fork-join over scoped threads.
//!
//! The reference engine parallelizes over planes of its destination buffer: each
//! unit of the parallel axis owns one contiguous plane and is the only writer of
//! it. Planes are handed out with `chunks_mut`, so no locks, atomics or raw
//! pointers are involved, and every write goes through a [`WriteRegion`] that
//! asserts (in debug builds) that the target lies inside the unit's plane.

use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crate::errors::{ParallelForError, ParallelForResult};

/// Thread configuration for parallel loops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParallelConfig {
    threads: Option<usize>,
}

impl ParallelConfig {
    pub fn new() -> Self {
        Self { threads: None }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn single_threaded() -> Self {
        Self::new().with_threads(1)
    }

    /// Configured thread count, or the available parallelism when none was set.
    pub fn get_threads(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Contiguous share of `units` work items owned by `worker` out of `workers`.
///
/// Shares are as equal as possible and together cover `0..units` exactly once.
pub fn partition_range(units: usize, workers: usize, worker: usize) -> Range<usize> {
    if workers == 0 || worker >= workers {
        return 0..0;
    }
    let chunk = units.div_ceil(workers);
    let start = (worker * chunk).min(units);
    let end = (start + chunk).min(units);
    start..end
}

/// Exclusive view of one unit's plane, addressed with indices into the whole buffer.
pub struct WriteRegion<'a, T> {
    base: usize,
    plane: &'a mut [T],
}

impl<'a, T> WriteRegion<'a, T> {
    pub fn new(base: usize, plane: &'a mut [T]) -> Self {
        Self { base, plane }
    }

    /// The global index range this region is allowed to write.
    pub fn range(&self) -> Range<usize> {
        self.base..self.base + self.plane.len()
    }

    pub fn covers(&self, index: usize) -> bool {
        self.range().contains(&index)
    }

    /// Mutable access to the element at `index` of the whole buffer.
    ///
    /// Panics when `index` lies outside the region.
    #[inline]
    pub fn slot(&mut self, index: usize) -> &mut T {
        debug_assert!(
            self.covers(index),
            "write to index {} outside the declared region {:?}",
            index,
            self.range()
        );
        &mut self.plane[index - self.base]
    }
}

/// Runs `body(plane_index, plane)` for every `plane_len`-sized plane of `buffer`.
///
/// Planes are split into contiguous per-thread shares; the call returns once all
/// threads have finished, so the buffer is complete when it returns. With one
/// thread (or one plane) the loop runs on the calling thread. A panic in `body`,
/// on any number of threads, is returned as [`ParallelForError::ThreadPanicked`].
pub fn parallel_for_planes<T, F>(
    buffer: &mut [T],
    plane_len: usize,
    config: &ParallelConfig,
    body: F,
) -> ParallelForResult<()>
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync,
{
    if plane_len == 0 || buffer.len() % plane_len != 0 {
        return Err(ParallelForError::InvalidPlaneLength {
            buffer_len: buffer.len(),
            plane_len,
        });
    }

    let num_threads = config.get_threads();
    if num_threads == 0 {
        return Err(ParallelForError::InvalidThreadCount { count: 0 });
    }

    let planes = buffer.len() / plane_len;
    if planes == 0 {
        return Ok(());
    }

    let workers = num_threads.min(planes);
    if workers == 1 {
        let sequential = panic::catch_unwind(AssertUnwindSafe(|| {
            for (plane_index, plane) in buffer.chunks_mut(plane_len).enumerate() {
                body(plane_index, plane);
            }
        }));
        return sequential.map_err(|_| ParallelForError::ThreadPanicked);
    }

    let planes_per_worker = planes.div_ceil(workers);
    let body = &body;

    thread::scope(|scope| {
        let handles: Vec<_> = buffer
            .chunks_mut(planes_per_worker * plane_len)
            .enumerate()
            .map(|(worker, share)| {
                scope.spawn(move || {
                    let first_plane = worker * planes_per_worker;
                    for (offset, plane) in share.chunks_mut(plane_len).enumerate() {
                        body(first_plane + offset, plane);
                    }
                })
            })
            .collect();

        // Every handle is joined; an unjoined panicked thread makes the scope itself panic.
        let mut result = Ok(());
        for handle in handles {
            if handle.join().is_err() {
                result = Err(ParallelForError::ThreadPanicked);
            }
        }
        result
    })
}
