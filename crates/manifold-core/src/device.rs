//! Device façade
//!
//! A [`Device`] composes one selected driver with its memory handles and
//! kernel cache. It is the unit of configuration and of resource
//! ownership: `setup` binds exactly one backend for the device's
//! lifetime (re-setup replaces it atomically), and teardown cascades in
//! reverse dependency order — outstanding kernel and memory handles are
//! invalidated first (they can no longer reach the context), then the
//! driver releases its execution context.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use manifold_backends::{drivers, BuildOptions, DeviceConfig, Driver, Mode, ScalarType};
use parking_lot::RwLock;

use crate::cache::{Fingerprint, KernelCache};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::memory::{Element, Memory};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Shared state behind one configured backend
///
/// Memory and kernel handles hold `Weak` references to this; dropping
/// the context (teardown or re-setup) invalidates them all.
pub(crate) struct DeviceContext {
    pub(crate) device_id: u64,
    pub(crate) mode: Mode,
    pub(crate) driver: RwLock<Box<dyn Driver>>,
    pub(crate) cache: KernelCache,
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(err) = self.driver.write().teardown() {
            tracing::warn!(device_id = self.device_id, error = %err, "driver teardown failed");
        } else {
            tracing::debug!(device_id = self.device_id, mode = %self.mode, "device_context_released");
        }
    }
}

/// The unit of backend configuration and resource ownership
///
/// ```no_run
/// use manifold_backends::DeviceConfig;
/// use manifold_core::{Device, KernelArg};
///
/// # fn main() -> manifold_core::Result<()> {
/// let device = Device::new();
/// device.setup(&DeviceConfig::new("sequential"))?;
///
/// let a = device.malloc_init::<f32>(&[1.0, 2.0, 3.0])?;
/// let out = device.malloc::<f32>(3)?;
///
/// let kernel = device.build_kernel_from_source(
///     r#"
///     @kernel void copy(const int n, const float *src, float *dst) {
///       @outer for (int i = 0; i < n; ++i) { dst[i] = src[i]; }
///     }
///     "#,
///     "copy",
/// )?;
/// kernel.launch(&[KernelArg::from(3), (&a).into(), (&out).into()])?;
///
/// let mut host = [0.0f32; 3];
/// out.copy_to(&mut host)?;
/// # Ok(())
/// # }
/// ```
pub struct Device {
    ctx: RwLock<Option<Arc<DeviceContext>>>,
}

impl Device {
    /// Create an unconfigured device; operations fail with
    /// [`Error::NotReady`] until [`Device::setup`] succeeds
    pub fn new() -> Self {
        Self { ctx: RwLock::new(None) }
    }

    /// Create and configure in one step
    pub fn with_config(config: &DeviceConfig) -> Result<Self> {
        let device = Self::new();
        device.setup(config)?;
        Ok(device)
    }

    /// Select and initialize exactly one backend.
    ///
    /// Re-invoking on a configured device tears the prior backend down
    /// first. If the new backend fails to initialize, the device is left
    /// unconfigured — it does not keep the old backend.
    #[tracing::instrument(skip(self, config), fields(mode = config.mode_str()))]
    pub fn setup(&self, config: &DeviceConfig) -> Result<()> {
        // Old resources are released before the new backend is usable.
        let previous = self.ctx.write().take();
        drop(previous);

        let driver = drivers::create(config)?;
        let mode = driver.mode();
        let device_id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        *self.ctx.write() = Some(Arc::new(DeviceContext {
            device_id,
            mode,
            driver: RwLock::new(driver),
            cache: KernelCache::new(),
        }));

        tracing::info!(device_id, mode = %mode, "device_configured");
        Ok(())
    }

    fn context(&self) -> Result<Arc<DeviceContext>> {
        self.ctx.read().clone().ok_or(Error::NotReady)
    }

    /// True once `setup` has succeeded and the backend is usable
    pub fn is_configured(&self) -> bool {
        self.ctx.read().is_some()
    }

    /// The active mode, if configured
    pub fn mode(&self) -> Option<Mode> {
        self.ctx.read().as_ref().map(|ctx| ctx.mode)
    }

    /// Allocate a typed buffer of `len` elements
    pub fn malloc<T: Element>(&self, len: usize) -> Result<Memory> {
        self.alloc_inner(len * std::mem::size_of::<T>(), Some(T::SCALAR))
    }

    /// Allocate a typed buffer and copy `data` into it
    pub fn malloc_init<T: Element>(&self, data: &[T]) -> Result<Memory> {
        let memory = self.malloc::<T>(data.len())?;
        memory.copy_from(data)?;
        Ok(memory)
    }

    /// Allocate an untyped buffer of `bytes` bytes.
    ///
    /// Untyped buffers skip element-type checking on transfers and
    /// launches.
    pub fn malloc_bytes(&self, bytes: usize) -> Result<Memory> {
        self.alloc_inner(bytes, None)
    }

    fn alloc_inner(&self, bytes: usize, element: Option<ScalarType>) -> Result<Memory> {
        let ctx = self.context()?;
        let start = Instant::now();

        let handle = ctx.driver.write().alloc(bytes)?;

        tracing::debug!(
            duration_us = start.elapsed().as_micros() as u64,
            handle = %handle,
            bytes,
            element = element.map(|e| e.as_str()),
            "memory_allocated"
        );
        Ok(Memory::new(Arc::downgrade(&ctx), ctx.device_id, handle, bytes, element))
    }

    /// Build (or fetch from cache) the kernel at `path` with entry point
    /// `entry`
    pub fn build_kernel(&self, path: impl AsRef<Path>, entry: &str) -> Result<Kernel> {
        self.build_kernel_with_options(path, entry, &BuildOptions::new())
    }

    /// [`Device::build_kernel`] with explicit build options
    pub fn build_kernel_with_options(
        &self,
        path: impl AsRef<Path>,
        entry: &str,
        options: &BuildOptions,
    ) -> Result<Kernel> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| Error::Build {
            diagnostic: format!("failed to read kernel source '{}': {err}", path.display()),
        })?;
        self.build_kernel_from_source_with_options(&source, entry, options)
    }

    /// Build (or fetch from cache) a kernel from inline source
    pub fn build_kernel_from_source(&self, source: &str, entry: &str) -> Result<Kernel> {
        self.build_kernel_from_source_with_options(source, entry, &BuildOptions::new())
    }

    /// [`Device::build_kernel_from_source`] with explicit build options
    #[tracing::instrument(skip(self, source, options), fields(entry = entry))]
    pub fn build_kernel_from_source_with_options(
        &self,
        source: &str,
        entry: &str,
        options: &BuildOptions,
    ) -> Result<Kernel> {
        let ctx = self.context()?;
        let fingerprint = Fingerprint::new(source, entry, options, ctx.mode, ctx.device_id);
        let digest = fingerprint.digest();
        let start = Instant::now();

        let unit = ctx
            .cache
            .get_or_build(fingerprint, || {
                ctx.driver.write().compile(source, entry, options).map_err(Error::from)
            })?;

        tracing::debug!(
            duration_us = start.elapsed().as_micros() as u64,
            entry,
            fingerprint = %format_args!("{digest:016x}"),
            cached = ctx.cache.len(),
            "kernel_built"
        );
        Ok(Kernel::new(Arc::downgrade(&ctx), ctx.device_id, unit))
    }

    /// Device-wide completion barrier: all submitted work has finished
    /// when this returns
    pub fn finish(&self) -> Result<()> {
        let ctx = self.context()?;
        ctx.driver.write().sync()?;
        Ok(())
    }

    /// Release the backend and all resources; the device returns to the
    /// unconfigured state and outstanding handles become invalid
    pub fn teardown(&self) {
        let _ = self.ctx.write().take();
    }

    /// Number of kernel compilations performed since setup (cache misses)
    pub fn kernel_builds(&self) -> u64 {
        self.ctx.read().as_ref().map(|ctx| ctx.cache.builds()).unwrap_or(0)
    }

    /// Number of kernels currently cached
    pub fn cached_kernels(&self) -> usize {
        self.ctx.read().as_ref().map(|ctx| ctx.cache.len()).unwrap_or(0)
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("mode", &self.mode()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_device_is_not_ready() {
        let device = Device::new();
        assert!(!device.is_configured());
        assert_eq!(device.mode(), None);
        assert!(matches!(device.malloc::<f32>(4), Err(Error::NotReady)));
        assert!(matches!(device.finish(), Err(Error::NotReady)));
    }

    #[test]
    fn test_setup_sequential() {
        let device = Device::new();
        device.setup(&DeviceConfig::new("sequential")).unwrap();
        assert!(device.is_configured());
        assert_eq!(device.mode(), Some(Mode::Sequential));
    }

    #[test]
    fn test_unrecognized_mode_is_configuration_error() {
        let device = Device::new();
        let err = device.setup(&DeviceConfig::new("quantum")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "{err}");
        assert!(!device.is_configured());
        assert!(matches!(device.malloc::<f32>(4), Err(Error::NotReady)));
    }

    #[test]
    fn test_failed_resetup_leaves_device_not_ready() {
        let device = Device::new();
        device.setup(&DeviceConfig::new("sequential")).unwrap();

        // cuda is recognized but unavailable in this build
        let err = device.setup(&DeviceConfig::new("cuda")).unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)), "{err}");

        // The device did not keep the old backend
        assert!(!device.is_configured());
        assert!(matches!(device.malloc::<f32>(4), Err(Error::NotReady)));
    }

    #[test]
    fn test_resetup_replaces_backend() {
        let device = Device::new();
        device.setup(&DeviceConfig::new("sequential")).unwrap();
        let memory = device.malloc::<f32>(4).unwrap();

        device
            .setup(&DeviceConfig::new("host-parallel").set("threads", 2))
            .unwrap();
        assert_eq!(device.mode(), Some(Mode::HostParallel));

        // Handles from the previous epoch are invalid
        assert!(matches!(memory.copy_from(&[0.0f32; 4]), Err(Error::UseAfterFree)));
    }

    #[test]
    fn test_teardown_invalidates_handles() {
        let device = Device::new();
        device.setup(&DeviceConfig::new("sequential")).unwrap();
        let memory = device.malloc::<f32>(4).unwrap();
        let kernel = device
            .build_kernel_from_source(
                r#"
                @kernel void zero(const int n, float *x) {
                  @outer for (int i = 0; i < n; ++i) { x[i] = 0.0; }
                }
                "#,
                "zero",
            )
            .unwrap();

        device.teardown();
        assert!(!device.is_configured());
        assert!(matches!(memory.copy_from(&[0.0f32; 4]), Err(Error::UseAfterFree)));
        assert!(matches!(
            kernel.launch(&[4i32.into(), (&memory).into()]),
            Err(Error::UseAfterFree)
        ));
    }
}
