//! Device memory handles
//!
//! A [`Memory`] is an opaque reference to a contiguous device-resident
//! buffer, owned by the device that allocated it. Typed handles check
//! element-type identity on every transfer; untyped handles skip that
//! check and move raw bytes. All transfers are synchronous-by-contract:
//! the data is visible at the destination when the call returns.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use manifold_backends::{BufferHandle, ScalarType};

use crate::device::DeviceContext;
use crate::error::{Error, Result};

/// Element types allowed in typed device buffers
pub trait Element: bytemuck::Pod {
    /// The kernel-language scalar type of this element
    const SCALAR: ScalarType;
}

impl Element for i32 {
    const SCALAR: ScalarType = ScalarType::I32;
}

impl Element for i64 {
    const SCALAR: ScalarType = ScalarType::I64;
}

impl Element for f32 {
    const SCALAR: ScalarType = ScalarType::F32;
}

impl Element for f64 {
    const SCALAR: ScalarType = ScalarType::F64;
}

/// A device-resident buffer
///
/// Allocated through `Device::malloc*`; invalid after `free()` or after
/// the owning device is torn down (both reported as [`Error::UseAfterFree`]).
pub struct Memory {
    ctx: Weak<DeviceContext>,
    device_id: u64,
    handle: BufferHandle,
    bytes: usize,
    element: Option<ScalarType>,
    freed: AtomicBool,
}

impl Memory {
    pub(crate) fn new(
        ctx: Weak<DeviceContext>,
        device_id: u64,
        handle: BufferHandle,
        bytes: usize,
        element: Option<ScalarType>,
    ) -> Self {
        Self {
            ctx,
            device_id,
            handle,
            bytes,
            element,
            freed: AtomicBool::new(false),
        }
    }

    /// Byte capacity of the buffer
    pub fn len_bytes(&self) -> usize {
        self.bytes
    }

    /// Element type, or `None` for untyped allocations
    pub fn element_type(&self) -> Option<ScalarType> {
        self.element
    }

    /// Element count for typed handles
    pub fn len(&self) -> Option<usize> {
        self.element.map(|elem| self.bytes / elem.size_bytes())
    }

    /// True until `free()` or device teardown invalidates the handle
    pub fn is_live(&self) -> bool {
        !self.freed.load(Ordering::Acquire) && self.ctx.strong_count() > 0
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device_id
    }

    /// The backend handle, provided the memory is still usable
    pub(crate) fn live_handle(&self) -> Result<BufferHandle> {
        if self.freed.load(Ordering::Acquire) {
            return Err(Error::UseAfterFree);
        }
        Ok(self.handle)
    }

    fn guard(&self) -> Result<Arc<DeviceContext>> {
        if self.freed.load(Ordering::Acquire) {
            return Err(Error::UseAfterFree);
        }
        self.ctx.upgrade().ok_or(Error::UseAfterFree)
    }

    fn check_element<T: Element>(&self) -> Result<()> {
        if let Some(elem) = self.element {
            if elem != T::SCALAR {
                return Err(Error::type_mismatch(elem, T::SCALAR));
            }
        }
        Ok(())
    }

    /// Copy host data into the buffer (H2D).
    ///
    /// Transfers `size_of_val(src)` bytes; fails with
    /// [`Error::SizeMismatch`] if that exceeds the buffer's capacity and
    /// with [`Error::TypeMismatch`] if a typed handle's element type
    /// disagrees with `T`.
    #[tracing::instrument(skip(self, src), fields(
        handle = %self.handle,
        bytes = std::mem::size_of_val(src),
        type_name = std::any::type_name::<T>()
    ))]
    pub fn copy_from<T: Element>(&self, src: &[T]) -> Result<()> {
        self.check_element::<T>()?;
        self.copy_from_bytes(bytemuck::cast_slice(src))
    }

    /// Copy buffer contents out to host storage (D2H).
    ///
    /// Transfers `size_of_val(dst)` bytes, so a shorter destination reads
    /// a prefix of the buffer.
    #[tracing::instrument(skip(self, dst), fields(
        handle = %self.handle,
        bytes = std::mem::size_of_val(dst),
        type_name = std::any::type_name::<T>()
    ))]
    pub fn copy_to<T: Element>(&self, dst: &mut [T]) -> Result<()> {
        self.check_element::<T>()?;
        self.copy_to_bytes(bytemuck::cast_slice_mut(dst))
    }

    /// Untyped H2D transfer; no element-type checking
    pub fn copy_from_bytes(&self, src: &[u8]) -> Result<()> {
        let ctx = self.guard()?;
        let start = Instant::now();

        ctx.driver.write().copy_in(self.handle, src)?;

        tracing::debug!(
            duration_us = start.elapsed().as_micros() as u64,
            bytes = src.len(),
            direction = "H2D",
            "memory_copy"
        );
        Ok(())
    }

    /// Untyped D2H transfer; no element-type checking
    pub fn copy_to_bytes(&self, dst: &mut [u8]) -> Result<()> {
        let ctx = self.guard()?;
        let start = Instant::now();

        ctx.driver.write().copy_out(self.handle, dst)?;

        tracing::debug!(
            duration_us = start.elapsed().as_micros() as u64,
            bytes = dst.len(),
            direction = "D2H",
            "memory_copy"
        );
        Ok(())
    }

    /// Read the whole buffer into a `Vec` (D2H)
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_element::<T>()?;
        let mut out = vec![T::zeroed(); self.bytes / std::mem::size_of::<T>()];
        self.copy_to(&mut out)?;
        Ok(out)
    }

    /// Release the backing storage immediately.
    ///
    /// Any later operation on this handle (including a second `free`)
    /// fails with [`Error::UseAfterFree`].
    pub fn free(&self) -> Result<()> {
        let ctx = self.guard()?;
        self.freed.store(true, Ordering::Release);
        ctx.driver.write().free(self.handle)?;
        tracing::debug!(handle = %self.handle, bytes = self.bytes, "memory_freed");
        Ok(())
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        if self.freed.load(Ordering::Acquire) {
            return;
        }
        if let Some(ctx) = self.ctx.upgrade() {
            if let Err(err) = ctx.driver.write().free(self.handle) {
                tracing::warn!(handle = %self.handle, error = %err, "memory release failed");
            }
        }
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("handle", &self.handle)
            .field("bytes", &self.bytes)
            .field("element", &self.element)
            .field("live", &self.is_live())
            .finish()
    }
}
