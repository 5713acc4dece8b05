//! Stream driver
//!
//! Queue-model execution on the host: launches are submitted to a
//! dedicated worker thread and run in submission order, the way
//! accelerator drivers feed a device queue. `sync` is the completion
//! barrier; host-visible operations (copies, free) synchronize
//! implicitly first, which is what makes the runtime's
//! synchronous-by-contract guarantees hold over an asynchronous queue.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::driver::{CompiledKernel, Driver};
use crate::drivers::store::HostStore;
use crate::error::{BackendError, Result};
use crate::kir::{self, LaunchPlan};
use crate::types::{BufferHandle, BuildOptions, LaunchArg, Mode};

/// One queued launch
struct Job {
    kernel: Arc<CompiledKernel>,
    args: Vec<LaunchArg>,
}

struct StreamState {
    pending: usize,
    /// First failure since the last synchronizing call
    failure: Option<String>,
}

struct StreamShared {
    state: Mutex<StreamState>,
    cond: Condvar,
}

/// Host-side submission-queue execution
pub struct StreamDriver {
    store: Arc<HostStore>,
    queue: Mutex<Option<Sender<Job>>>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<StreamShared>,
}

fn run_job(store: &HostStore, job: &Job) -> Result<()> {
    let mut guards = Vec::new();
    let plan = LaunchPlan::bind(job.kernel.program(), &job.args, |handle, elem| {
        store.binding(handle, elem, &mut guards)
    })?;
    plan.run_range(plan.start, plan.bound)
}

impl StreamDriver {
    pub(crate) fn new() -> Result<Self> {
        let store = Arc::new(HostStore::new());
        let shared = Arc::new(StreamShared {
            state: Mutex::new(StreamState {
                pending: 0,
                failure: None,
            }),
            cond: Condvar::new(),
        });

        let (sender, receiver) = mpsc::channel::<Job>();
        let worker_store = Arc::clone(&store);
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("manifold-stream".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    let result = run_job(&worker_store, &job);
                    let mut state = worker_shared.state.lock();
                    if let Err(err) = result {
                        state.failure.get_or_insert_with(|| err.to_string());
                    }
                    state.pending -= 1;
                    worker_shared.cond.notify_all();
                }
            })
            .map_err(|e| BackendError::Init(format!("failed to start stream worker: {e}")))?;

        Ok(Self {
            store,
            queue: Mutex::new(Some(sender)),
            worker: Some(worker),
            shared,
        })
    }

    /// Wait for the queue to drain, then surface the first recorded failure.
    fn flush(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        while state.pending > 0 {
            self.shared.cond.wait(&mut state);
        }
        match state.failure.take() {
            Some(diagnostic) => Err(BackendError::execution(diagnostic)),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        // Dropping the sender ends the worker loop after it drains the
        // queue, so joining doubles as the final completion barrier.
        drop(self.queue.lock().take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                return Err(BackendError::execution("stream worker terminated abnormally"));
            }
        }
        let failure = self.shared.state.lock().failure.take();
        self.store.clear();
        match failure {
            Some(diagnostic) => Err(BackendError::execution(diagnostic)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for StreamDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDriver").finish_non_exhaustive()
    }
}

impl Driver for StreamDriver {
    fn mode(&self) -> Mode {
        Mode::Stream
    }

    fn alloc(&mut self, bytes: usize) -> Result<BufferHandle> {
        self.store.alloc(bytes)
    }

    fn free(&mut self, handle: BufferHandle) -> Result<()> {
        // Host-visible operation: establish the implicit sync point first.
        self.flush()?;
        self.store.free(handle)
    }

    fn copy_in(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        self.flush()?;
        self.store.copy_in(handle, data)
    }

    fn copy_out(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        self.flush()?;
        self.store.copy_out(handle, data)
    }

    fn bytes_of(&self, handle: BufferHandle) -> Result<usize> {
        self.store.bytes_of(handle)
    }

    fn compile(&mut self, source: &str, entry: &str, options: &BuildOptions) -> Result<Arc<CompiledKernel>> {
        let program = kir::build_program(source, entry, options)?;
        tracing::debug!(entry = entry, params = program.params().len(), "kernel_compiled");
        Ok(Arc::new(CompiledKernel::new(program, Mode::Stream)))
    }

    fn launch(&mut self, kernel: &Arc<CompiledKernel>, args: &[LaunchArg]) -> Result<()> {
        let queue = self.queue.lock();
        let Some(sender) = queue.as_ref() else {
            return Err(BackendError::execution("stream context is torn down"));
        };

        self.shared.state.lock().pending += 1;
        let job = Job {
            kernel: Arc::clone(kernel),
            args: args.to_vec(),
        };
        if sender.send(job).is_err() {
            self.shared.state.lock().pending -= 1;
            return Err(BackendError::execution("stream worker terminated"));
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.flush()
    }

    fn teardown(&mut self) -> Result<()> {
        self.shutdown()
    }
}

impl Drop for StreamDriver {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "stream driver teardown failed");
        }
    }
}
