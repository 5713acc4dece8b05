//! Sequential driver
//!
//! Reference implementation of the Driver trait: kernels execute inline
//! on the calling thread, one work item after another. Every other
//! driver must be observationally equivalent to this one.

use std::sync::Arc;

use crate::driver::{CompiledKernel, Driver};
use crate::drivers::store::HostStore;
use crate::error::Result;
use crate::kir::{self, LaunchPlan};
use crate::types::{BufferHandle, BuildOptions, LaunchArg, Mode};

/// Inline host execution
pub struct SerialDriver {
    store: HostStore,
}

impl SerialDriver {
    pub fn new() -> Self {
        Self {
            store: HostStore::new(),
        }
    }
}

impl Default for SerialDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SerialDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDriver").finish_non_exhaustive()
    }
}

impl Driver for SerialDriver {
    fn mode(&self) -> Mode {
        Mode::Sequential
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
        Ok(Arc::new(CompiledKernel::new(program, Mode::Sequential)))
    }

    fn launch(&mut self, kernel: &Arc<CompiledKernel>, args: &[LaunchArg]) -> Result<()> {
        let mut guards = Vec::new();
        let plan = LaunchPlan::bind(kernel.program(), args, |handle, elem| {
            self.store.binding(handle, elem, &mut guards)
        })?;
        plan.run_range(plan.start, plan.bound)
    }

    fn sync(&mut self) -> Result<()> {
        // Launches complete before returning; nothing is in flight.
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        self.store.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarValue;

    const SCALE: &str = r#"
        @kernel void scale(const int n, const float factor, float *x) {
          @outer for (int i = 0; i < n; ++i) {
            x[i] = x[i] * factor;
          }
        }
    "#;

    #[test]
    fn test_serial_driver_roundtrip() {
        let mut driver = SerialDriver::new();
        let buffer = driver.alloc(4 * 4).unwrap();

        let input = [1.0f32, 2.0, 3.0, 4.0];
        driver.copy_in(buffer, bytemuck::cast_slice(&input)).unwrap();

        let kernel = driver.compile(SCALE, "scale", &BuildOptions::new()).unwrap();
        driver
            .launch(
                &kernel,
                &[
                    LaunchArg::Scalar(ScalarValue::I32(4)),
                    LaunchArg::Scalar(ScalarValue::F32(2.0)),
                    LaunchArg::Buffer(buffer),
                ],
            )
            .unwrap();
        driver.sync().unwrap();

        let mut output = [0.0f32; 4];
        driver.copy_out(buffer, bytemuck::cast_slice_mut(&mut output)).unwrap();
        assert_eq!(output, [2.0, 4.0, 6.0, 8.0]);

        driver.free(buffer).unwrap();
        driver.teardown().unwrap();
    }

    #[test]
    fn test_serial_driver_compile_error() {
        let mut driver = SerialDriver::new();
        let err = driver
            .compile("@kernel void broken(", "broken", &BuildOptions::new())
            .unwrap_err();
        assert!(matches!(err, crate::error::BackendError::Compile(_)));
    }
}
