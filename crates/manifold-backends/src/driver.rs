//! Driver trait for execution backends
//!
//! Every execution mode implements one uniform capability set. The core
//! runtime selects a driver once at device setup and holds it for the
//! device's lifetime; no per-call mode inspection happens above this
//! trait.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Driver Trait                        │
//! │  alloc / free / copy_in / copy_out                       │
//! │  compile / launch / sync / teardown                      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         ▼             ▼             ▼
//!   ┌──────────┐ ┌─────────────┐ ┌─────────┐
//!   │Sequential│ │Host-parallel│ │ Stream  │
//!   │  driver  │ │   driver    │ │ driver  │
//!   └──────────┘ └─────────────┘ └─────────┘
//! ```

use std::sync::Arc;

use crate::error::Result;
use crate::kir::{Param, Program};
use crate::types::{BufferHandle, BuildOptions, LaunchArg, Mode};

/// A compiled, launchable kernel bound to one driver mode
///
/// Produced by [`Driver::compile`]; shared between the kernel cache and
/// outstanding kernel handles via `Arc`.
#[derive(Debug)]
pub struct CompiledKernel {
    program: Arc<Program>,
    mode: Mode,
}

impl CompiledKernel {
    pub(crate) fn new(program: Program, mode: Mode) -> Self {
        Self {
            program: Arc::new(program),
            mode,
        }
    }

    /// Entry-point name the kernel was built for
    pub fn entry(&self) -> &str {
        self.program.entry()
    }

    /// Ordered formal parameters, as declared in kernel source
    pub fn params(&self) -> &[Param] {
        self.program.params()
    }

    /// Number of formal parameters expected at launch
    pub fn arity(&self) -> usize {
        self.program.params().len()
    }

    /// The driver mode this kernel was compiled for
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn program(&self) -> &Arc<Program> {
        &self.program
    }
}

/// Uniform capability set implemented by every execution driver
///
/// Initialization is the constructor, dispatched once by
/// [`crate::drivers::create`]. All entry points are synchronous from the
/// caller's point of view: when a call returns, its effects are visible
/// to the next operation on the same driver, regardless of how the
/// driver schedules work internally.
pub trait Driver: Send + Sync + std::fmt::Debug {
    /// The mode tag this driver was selected for
    fn mode(&self) -> Mode;

    /// Allocate a zero-initialized device buffer of `bytes` bytes
    fn alloc(&mut self, bytes: usize) -> Result<BufferHandle>;

    /// Release a buffer; the handle is invalid afterwards
    fn free(&mut self, handle: BufferHandle) -> Result<()>;

    /// Copy host bytes into a buffer; complete on return
    fn copy_in(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()>;

    /// Copy buffer bytes out to the host; complete on return
    fn copy_out(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()>;

    /// Byte capacity of a buffer
    fn bytes_of(&self, handle: BufferHandle) -> Result<usize>;

    /// Compile kernel source for this driver's execution model
    fn compile(&mut self, source: &str, entry: &str, options: &BuildOptions) -> Result<Arc<CompiledKernel>>;

    /// Execute a compiled kernel with marshalled arguments.
    ///
    /// Queue-model drivers may return before execution finishes (they
    /// retain the kernel for the queued work); the results must be
    /// observable after the next [`Driver::sync`] (or any host-visible
    /// operation, which synchronizes implicitly).
    fn launch(&mut self, kernel: &Arc<CompiledKernel>, args: &[LaunchArg]) -> Result<()>;

    /// Completion barrier: all previously submitted work has finished
    /// (or failed) when this returns
    fn sync(&mut self) -> Result<()>;

    /// Release the driver's execution context and all remaining buffers
    fn teardown(&mut self) -> Result<()>;
}
