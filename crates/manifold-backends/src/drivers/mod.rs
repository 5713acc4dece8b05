//! Concrete drivers and the mode registry
//!
//! `create` is the single dispatch point from a configuration to a boxed
//! driver; the selected driver is then held for the device's lifetime.

mod pool;
mod serial;
mod store;
mod stream;

pub use pool::PoolDriver;
pub use serial::SerialDriver;
pub use stream::StreamDriver;

use crate::config::DeviceConfig;
use crate::driver::Driver;
use crate::error::{BackendError, Result};
use crate::types::{Mode, Schedule};

use pool::PoolOptions;

/// Initialize the driver selected by `config`.
///
/// Unrecognized mode tags and malformed settings fail with
/// [`BackendError::Config`]; a recognized mode whose execution context
/// cannot be acquired fails with [`BackendError::Init`].
pub fn create(config: &DeviceConfig) -> Result<Box<dyn Driver>> {
    let mode = Mode::parse(config.mode_str())
        .ok_or_else(|| BackendError::config(format!("unrecognized mode '{}'", config.mode_str())))?;

    match mode {
        Mode::Sequential => Ok(Box::new(SerialDriver::new())),
        Mode::HostParallel => {
            let schedule = match config.str_setting("schedule")? {
                None => Schedule::default(),
                Some(tag) => Schedule::parse(tag).ok_or_else(|| {
                    BackendError::config(format!(
                        "unknown schedule '{tag}' (expected static, dynamic, or compact)"
                    ))
                })?,
            };
            let options = PoolOptions {
                schedule,
                chunk: config.positive_setting("chunk")?,
                threads: config.positive_setting("threads")?,
            };
            Ok(Box::new(PoolDriver::new(options)?))
        }
        Mode::Stream => Ok(Box::new(StreamDriver::new()?)),
        Mode::Cuda => {
            for key in ["platform_id", "device_id"] {
                if let Some(index) = config.int_setting(key)? {
                    if index < 0 {
                        return Err(BackendError::config(format!(
                            "setting '{key}' must be non-negative, got {index}"
                        )));
                    }
                }
            }
            Err(BackendError::Init(
                "cuda support is not compiled into this build".to_string(),
            ))
        }
    }
}
