//! Manifold: one programming model over multiple execution backends
//!
//! The runtime presents a uniform device/memory/kernel surface whose
//! concrete execution mode — sequential host code, a host worker pool, a
//! host-side submission queue, or a vendor accelerator — is selected
//! once at device setup:
//!
//! 1. configure a [`Device`] (mode tag + mode-specific settings)
//! 2. allocate [`Memory`] and copy host data in
//! 3. build a [`Kernel`] from backend-agnostic source (cached by
//!    fingerprint, compiled at most once per identity)
//! 4. launch with a uniform argument list of scalars and memory handles
//! 5. copy results back; everything is synchronous-by-contract
//!
//! Drivers, the kernel source language, and the program IR live in
//! `manifold-backends`; this crate owns the façade, the kernel cache,
//! and the error taxonomy.

mod cache;
mod device;
mod error;
mod kernel;
mod memory;

pub use cache::Fingerprint;
pub use device::Device;
pub use error::{Error, Result};
pub use kernel::{Kernel, KernelArg};
pub use memory::{Element, Memory};

// Configuration and shared types come from the driver layer unchanged.
pub use manifold_backends::{BuildOptions, DeviceConfig, Mode, ScalarType, ScalarValue, Schedule, SettingValue};
