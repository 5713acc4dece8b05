//! Kernel handles and launch argument marshalling
//!
//! A [`Kernel`] is a compiled, launchable unit bound to the device that
//! built it. Launch arguments are a closed sum of scalars and memory
//! handles; they are validated against the kernel's formals and lowered
//! into the driver's calling convention before any backend call is
//! issued.

use std::sync::{Arc, Weak};
use std::time::Instant;

use manifold_backends::{CompiledKernel, LaunchArg, ParamKind, ScalarValue};

use crate::device::DeviceContext;
use crate::error::{Error, Result};
use crate::memory::Memory;

/// One launch argument: a scalar or a borrowed memory handle
///
/// Memory handles are borrowed for the call's duration only; the kernel
/// does not take ownership.
#[derive(Debug)]
pub enum KernelArg<'m> {
    Scalar(ScalarValue),
    Buffer(&'m Memory),
}

impl From<i32> for KernelArg<'_> {
    fn from(v: i32) -> Self {
        KernelArg::Scalar(ScalarValue::I32(v))
    }
}

impl From<i64> for KernelArg<'_> {
    fn from(v: i64) -> Self {
        KernelArg::Scalar(ScalarValue::I64(v))
    }
}

impl From<f32> for KernelArg<'_> {
    fn from(v: f32) -> Self {
        KernelArg::Scalar(ScalarValue::F32(v))
    }
}

impl From<f64> for KernelArg<'_> {
    fn from(v: f64) -> Self {
        KernelArg::Scalar(ScalarValue::F64(v))
    }
}

impl<'m> From<&'m Memory> for KernelArg<'m> {
    fn from(memory: &'m Memory) -> Self {
        KernelArg::Buffer(memory)
    }
}

/// A compiled kernel bound to one device
pub struct Kernel {
    ctx: Weak<DeviceContext>,
    device_id: u64,
    unit: Arc<CompiledKernel>,
}

impl Kernel {
    pub(crate) fn new(ctx: Weak<DeviceContext>, device_id: u64, unit: Arc<CompiledKernel>) -> Self {
        Self { ctx, device_id, unit }
    }

    /// Entry-point name
    pub fn entry(&self) -> &str {
        self.unit.entry()
    }

    /// Number of formal parameters expected at launch
    pub fn arity(&self) -> usize {
        self.unit.arity()
    }

    /// Invoke the kernel.
    ///
    /// The argument list must match the kernel's declared formals in
    /// order and count. Synchronous-by-contract: results of the launch
    /// are visible to subsequent operations on the same device when this
    /// returns.
    #[tracing::instrument(skip(self, args), fields(kernel = self.entry(), args = args.len()))]
    pub fn launch(&self, args: &[KernelArg<'_>]) -> Result<()> {
        let params = self.unit.params();
        if args.len() != params.len() {
            return Err(Error::ArgumentCount {
                expected: params.len(),
                actual: args.len(),
            });
        }

        let ctx = self.ctx.upgrade().ok_or(Error::UseAfterFree)?;

        let mut marshalled = Vec::with_capacity(args.len());
        for (param, arg) in params.iter().zip(args) {
            match (param.kind, arg) {
                (ParamKind::Scalar(expected), KernelArg::Scalar(value)) => {
                    let widened = value
                        .widen_to(expected)
                        .ok_or_else(|| Error::type_mismatch(expected, value.scalar_type()))?;
                    marshalled.push(LaunchArg::Scalar(widened));
                }
                (ParamKind::Buffer { elem, .. }, KernelArg::Buffer(memory)) => {
                    if memory.device_id() != self.device_id {
                        return Err(Error::DeviceMismatch);
                    }
                    if let Some(actual) = memory.element_type() {
                        if actual != elem {
                            return Err(Error::type_mismatch(elem, actual));
                        }
                    }
                    marshalled.push(LaunchArg::Buffer(memory.live_handle()?));
                }
                (ParamKind::Scalar(expected), KernelArg::Buffer(_)) => {
                    return Err(Error::type_mismatch(format!("{expected} scalar"), "buffer"));
                }
                (ParamKind::Buffer { elem, .. }, KernelArg::Scalar(value)) => {
                    return Err(Error::type_mismatch(
                        format!("{elem} buffer"),
                        value.scalar_type(),
                    ));
                }
            }
        }

        let start = Instant::now();
        {
            let mut driver = ctx.driver.write();
            driver.launch(&self.unit, &marshalled)?;
            // Completion barrier: makes the launch synchronous-by-contract
            // even over queue-model drivers.
            driver.sync()?;
        }

        tracing::debug!(
            duration_us = start.elapsed().as_micros() as u64,
            kernel = self.entry(),
            "kernel_launched"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("entry", &self.entry())
            .field("arity", &self.arity())
            .field("mode", &self.unit.mode())
            .finish()
    }
}
