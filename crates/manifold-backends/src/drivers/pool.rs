//! Host-parallel driver
//!
//! Owns a fixed-size worker pool and distributes the launch index range
//! across it. The schedule policy picks the decomposition granularity;
//! the pool's work stealing handles placement. All index iterations
//! complete before `launch` returns, so `sync` has nothing left to wait
//! for.

use std::sync::Arc;

use rayon::prelude::*;

use crate::driver::{CompiledKernel, Driver};
use crate::drivers::store::HostStore;
use crate::error::{BackendError, Result};
use crate::kir::{self, LaunchPlan};
use crate::types::{BufferHandle, BuildOptions, LaunchArg, Mode, Schedule};

/// Parsed host-parallel settings
#[derive(Debug, Clone, Default)]
pub(crate) struct PoolOptions {
    pub schedule: Schedule,
    pub chunk: Option<usize>,
    pub threads: Option<usize>,
}

/// Worker-pool host execution
pub struct PoolDriver {
    store: HostStore,
    pool: rayon::ThreadPool,
    schedule: Schedule,
    chunk: Option<usize>,
}

impl PoolDriver {
    pub(crate) fn new(options: PoolOptions) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("manifold-worker-{i}"));
        if let Some(threads) = options.threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| BackendError::Init(format!("failed to start worker pool: {e}")))?;

        tracing::debug!(
            workers = pool.current_num_threads(),
            schedule = %options.schedule,
            chunk = options.chunk,
            "worker_pool_started"
        );

        Ok(Self {
            store: HostStore::new(),
            pool,
            schedule: options.schedule,
            chunk: options.chunk,
        })
    }
}

/// Split `[start, bound)` into spans according to the schedule policy.
///
/// - compact: one contiguous span per worker
/// - static: fixed-size chunks, default `ceil(n / workers)`
/// - dynamic: fixed-size chunks claimed by idle workers, default 1
fn spans_for(schedule: Schedule, chunk: Option<usize>, start: i64, bound: i64, workers: usize) -> Vec<(i64, i64)> {
    let n = (bound - start).max(0);
    if n == 0 {
        return Vec::new();
    }
    let workers = workers.max(1) as i64;
    let per_worker = (n + workers - 1) / workers;
    let span = match schedule {
        Schedule::Compact => per_worker,
        Schedule::Static => chunk.map(|c| c as i64).unwrap_or(per_worker),
        Schedule::Dynamic => chunk.map(|c| c as i64).unwrap_or(1),
    }
    .max(1);

    let mut spans = Vec::with_capacity(((n + span - 1) / span) as usize);
    let mut lo = start;
    while lo < bound {
        let hi = (lo + span).min(bound);
        spans.push((lo, hi));
        lo = hi;
    }
    spans
}

impl std::fmt::Debug for PoolDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolDriver")
            .field("schedule", &self.schedule)
            .field("chunk", &self.chunk)
            .finish_non_exhaustive()
    }
}

impl Driver for PoolDriver {
    fn mode(&self) -> Mode {
        Mode::HostParallel
    }

    fn alloc(&mut self, bytes: usize) -> Result<BufferHandle> {
        self.store.alloc(bytes)
    }

    fn free(&mut self, handle: BufferHandle) -> Result<()> {
        self.store.free(handle)
    }

    fn copy_in(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        self.store.copy_in(handle, data)
    }

    fn copy_out(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        self.store.copy_out(handle, data)
    }

    fn bytes_of(&self, handle: BufferHandle) -> Result<usize> {
        self.store.bytes_of(handle)
    }

    fn compile(&mut self, source: &str, entry: &str, options: &BuildOptions) -> Result<Arc<CompiledKernel>> {
        let program = kir::build_program(source, entry, options)?;
        tracing::debug!(entry = entry, params = program.params().len(), "kernel_compiled");
        Ok(Arc::new(CompiledKernel::new(program, Mode::HostParallel)))
    }

    fn launch(&mut self, kernel: &Arc<CompiledKernel>, args: &[LaunchArg]) -> Result<()> {
        let mut guards = Vec::new();
        let plan = LaunchPlan::bind(kernel.program(), args, |handle, elem| {
            self.store.binding(handle, elem, &mut guards)
        })?;

        let spans = spans_for(
            self.schedule,
            self.chunk,
            plan.start,
            plan.bound,
            self.pool.current_num_threads(),
        );
        tracing::trace!(
            work_items = plan.len(),
            spans = spans.len(),
            schedule = %self.schedule,
            "launch_decomposed"
        );

        self.pool
            .install(|| spans.into_par_iter().try_for_each(|(lo, hi)| plan.run_range(lo, hi)))
    }

    fn sync(&mut self) -> Result<()> {
        // install() blocks until the whole launch has run.
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        self.store.clear();
        Ok(())
    }
}
